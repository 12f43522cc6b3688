//! # Tank Protocol
//!
//! 坦克遥控链路协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: 客户端 → 服务器的单字节命令
//! - `handshake`: 问候字符串握手
//! - `message`: 服务器 → 客户端的带标签消息（存活检查 / 状态快照）
//!
//! ## 字节序
//!
//! 状态记录中的 16 位字段使用大端字节序（网络字节序）。

pub mod command;
pub mod handshake;
pub mod message;

pub use command::Command;
pub use handshake::{CLIENT_GREETING, Handshake, HandshakeProgress, SERVER_GREETING};
pub use message::{
    BLUE_ON, BUZZER_ON, GREEN_ON, INDICATOR_OFF, MSG_TYPE_LIVENESS_CHECK, MSG_TYPE_STATE, RED_ON,
    STATE_MESSAGE_LEN, STATE_RECORD_LEN, ServerMessage, TankStatus,
};

use thiserror::Error;

/// 协议层错误类型
///
/// 任何协议错误都只关闭对应连接，不影响调度器和其他连接。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Greeting mismatch at byte {offset}")]
    GreetingMismatch { offset: usize },

    #[error("Unknown command byte: 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("Invalid message length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownCommand(0x7F);
        assert_eq!(err.to_string(), "Unknown command byte: 0x7F");

        let err = ProtocolError::GreetingMismatch { offset: 3 };
        assert!(err.to_string().contains("byte 3"));

        let err = ProtocolError::InvalidLength {
            expected: 14,
            actual: 5,
        };
        assert!(err.to_string().contains("expected 14"));
    }
}
