//! 客户端命令定义
//!
//! 每个命令占一个字节，取值与遥控端键盘按键一致（方向键除外）。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 遥控命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    // === 履带 ===
    /// 前进 / 加速
    Forward = b'w',
    /// 后退 / 减速
    Backward = b's',
    /// 左转（右履带加速，左履带减速）
    TurnLeft = b'a',
    /// 右转
    TurnRight = b'd',
    /// 停车
    Stop = b'e',

    // === 超声波舵机 ===
    SonicRight = b'c',
    SonicCentre = b'x',
    SonicLeft = b'z',

    // === 摄像头云台 ===
    CameraUp = b'r',
    CameraDown = b't',
    CameraRight = b'y',
    CameraLeft = b'u',
    /// 两个云台舵机同时回中
    CameraCentre = b'/',

    // === 指示灯 / 蜂鸣器（翻转） ===
    RedLed = b'1',
    GreenLed = b'2',
    BlueLed = b'3',
    Buzzer = b'4',

    // === 超声波模式（保留：可解析，但不改变任何状态） ===
    SonicOneShot = b'5',
    SonicContinuous = b'6',

    /// 存活检查应答
    LivenessAck = b'0',
}

impl Command {
    /// 从线上字节解析命令
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Self::try_from(byte).map_err(|_| ProtocolError::UnknownCommand(byte))
    }

    /// 转换为线上字节
    pub fn as_byte(self) -> u8 {
        self.into()
    }

    /// 是否为履带命令
    pub fn is_drive(self) -> bool {
        matches!(
            self,
            Self::Forward | Self::Backward | Self::TurnLeft | Self::TurnRight | Self::Stop
        )
    }

    /// 是否为保留命令（协议中定义，但没有处理逻辑）
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::SonicOneShot | Self::SonicContinuous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes_match_keys() {
        assert_eq!(Command::Forward.as_byte(), b'w');
        assert_eq!(Command::CameraCentre.as_byte(), b'/');
        assert_eq!(Command::LivenessAck.as_byte(), b'0');
        assert_eq!(Command::from_byte(b'a'), Ok(Command::TurnLeft));
        assert_eq!(Command::from_byte(b'y'), Ok(Command::CameraRight));
    }

    #[test]
    fn test_unknown_byte_is_rejected() {
        assert_eq!(
            Command::from_byte(b'q'),
            Err(ProtocolError::UnknownCommand(b'q'))
        );
        assert!(Command::from_byte(0x00).is_err());
    }

    #[test]
    fn test_command_classification() {
        assert!(Command::Stop.is_drive());
        assert!(!Command::SonicLeft.is_drive());
        assert!(Command::SonicOneShot.is_reserved());
        assert!(Command::SonicContinuous.is_reserved());
        assert!(!Command::Buzzer.is_reserved());
    }
}
