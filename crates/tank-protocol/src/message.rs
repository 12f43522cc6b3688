//! 服务器 → 客户端消息
//!
//! 每条消息以 1 字节类型标签开头：
//!
//! | 标签  | 含义       | 总长度 |
//! |-------|------------|--------|
//! | `'o'` | 存活检查   | 1      |
//! | `'k'` | 状态快照   | 1 + 13 |
//!
//! 状态记录布局（大端）：
//!
//! ```text
//! 0..2   右履带速度（占满周期的百分比，i16）
//! 2..4   左履带速度（i16）
//! 4..6   超声波距离（厘米，-1 表示无效，i16）
//! 6      超声波舵机相对默认角度的偏移（i8）
//! 7      摄像头水平舵机偏移（i8）
//! 8      摄像头俯仰舵机偏移（i8）
//! 9..13  红 / 绿 / 蓝 / 蜂鸣器 指示字符
//! ```

use crate::ProtocolError;
use bytes::{Buf, BufMut};

/// 存活检查消息标签
pub const MSG_TYPE_LIVENESS_CHECK: u8 = b'o';
/// 状态快照消息标签
pub const MSG_TYPE_STATE: u8 = b'k';

/// 状态记录长度（不含标签）
pub const STATE_RECORD_LEN: usize = 13;
/// 状态消息总长度
pub const STATE_MESSAGE_LEN: usize = 1 + STATE_RECORD_LEN;

/// 指示器关闭时的占位字符
pub const INDICATOR_OFF: u8 = b'_';
pub const RED_ON: u8 = b'R';
pub const GREEN_ON: u8 = b'G';
pub const BLUE_ON: u8 = b'B';
pub const BUZZER_ON: u8 = b'Z';

/// 坦克状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TankStatus {
    pub right_speed_pct: i16,
    pub left_speed_pct: i16,
    /// 超声波距离（厘米），-1 表示无效
    pub sonic_distance: i16,
    pub sonic_servo_offset: i8,
    pub camera_pan_offset: i8,
    pub camera_tilt_offset: i8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub buzzer: u8,
}

impl Default for TankStatus {
    fn default() -> Self {
        Self {
            right_speed_pct: 0,
            left_speed_pct: 0,
            sonic_distance: -1,
            sonic_servo_offset: 0,
            camera_pan_offset: 0,
            camera_tilt_offset: 0,
            red: INDICATOR_OFF,
            green: INDICATOR_OFF,
            blue: INDICATOR_OFF,
            buzzer: INDICATOR_OFF,
        }
    }
}

impl TankStatus {
    /// 指示器字符：打开时为 `on_char`，关闭时为 `'_'`
    pub fn indicator(on: bool, on_char: u8) -> u8 {
        if on { on_char } else { INDICATOR_OFF }
    }

    /// 按 (红, 绿, 蓝, 蜂鸣器) 设置指示字符
    pub fn with_indicators(mut self, red: bool, green: bool, blue: bool, buzzer: bool) -> Self {
        self.red = Self::indicator(red, RED_ON);
        self.green = Self::indicator(green, GREEN_ON);
        self.blue = Self::indicator(blue, BLUE_ON);
        self.buzzer = Self::indicator(buzzer, BUZZER_ON);
        self
    }

    /// 编码状态记录（不含标签）
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.right_speed_pct);
        buf.put_i16(self.left_speed_pct);
        buf.put_i16(self.sonic_distance);
        buf.put_i8(self.sonic_servo_offset);
        buf.put_i8(self.camera_pan_offset);
        buf.put_i8(self.camera_tilt_offset);
        buf.put_u8(self.red);
        buf.put_u8(self.green);
        buf.put_u8(self.blue);
        buf.put_u8(self.buzzer);
    }

    /// 解码状态记录（不含标签）
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < STATE_RECORD_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: STATE_RECORD_LEN,
                actual: buf.len(),
            });
        }

        Ok(Self {
            right_speed_pct: buf.get_i16(),
            left_speed_pct: buf.get_i16(),
            sonic_distance: buf.get_i16(),
            sonic_servo_offset: buf.get_i8(),
            camera_pan_offset: buf.get_i8(),
            camera_tilt_offset: buf.get_i8(),
            red: buf.get_u8(),
            green: buf.get_u8(),
            blue: buf.get_u8(),
            buzzer: buf.get_u8(),
        })
    }
}

/// 服务器 → 客户端消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    /// 存活检查，客户端必须回送 [`Command::LivenessAck`](crate::Command::LivenessAck)
    LivenessCheck,
    /// 状态快照
    State(TankStatus),
}

impl ServerMessage {
    /// 编码后的长度
    pub fn encoded_len(&self) -> usize {
        match self {
            ServerMessage::LivenessCheck => 1,
            ServerMessage::State(_) => STATE_MESSAGE_LEN,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            ServerMessage::LivenessCheck => buf.put_u8(MSG_TYPE_LIVENESS_CHECK),
            ServerMessage::State(status) => {
                buf.put_u8(MSG_TYPE_STATE);
                status.encode(buf);
            },
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// 从流缓冲区头部解码一条消息
    ///
    /// 返回 `Ok(None)` 表示数据不完整，需要继续读取；
    /// 成功时返回消息和消耗的字节数。
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        match tag {
            MSG_TYPE_LIVENESS_CHECK => Ok(Some((ServerMessage::LivenessCheck, 1))),
            MSG_TYPE_STATE => {
                if buf.len() < STATE_MESSAGE_LEN {
                    return Ok(None);
                }
                let status = TankStatus::decode(&buf[1..STATE_MESSAGE_LEN])?;
                Ok(Some((ServerMessage::State(status), STATE_MESSAGE_LEN)))
            },
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}
