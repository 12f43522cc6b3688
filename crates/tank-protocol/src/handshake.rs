//! 问候字符串握手
//!
//! 连接建立后服务器先发送 [`SERVER_GREETING`]，客户端校验通过后回送
//! [`CLIENT_GREETING`]。双方都使用 [`Handshake`] 增量校验对端的问候字符串，
//! 字节可以分多次到达。

use crate::ProtocolError;

/// 服务器在 accept 之后立即发送的问候字符串
pub const SERVER_GREETING: &[u8] = b"i tunchik tinkerboard";

/// 客户端回送的问候字符串
pub const CLIENT_GREETING: &[u8] = b"hochu pogonyat";

/// 握手进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// 还需要更多字节
    Pending,
    /// 问候字符串完整且匹配
    Complete,
}

/// 增量问候字符串校验器
#[derive(Debug, Clone)]
pub struct Handshake {
    expected: &'static [u8],
    matched: usize,
}

impl Handshake {
    /// 创建校验器，`expected` 为期望收到的问候字符串
    pub fn new(expected: &'static [u8]) -> Self {
        Self {
            expected,
            matched: 0,
        }
    }

    /// 服务器端：等待客户端问候
    pub fn server() -> Self {
        Self::new(CLIENT_GREETING)
    }

    /// 客户端：等待服务器问候
    pub fn client() -> Self {
        Self::new(SERVER_GREETING)
    }

    /// 还需要多少字节
    pub fn remaining(&self) -> usize {
        self.expected.len() - self.matched
    }

    pub fn is_complete(&self) -> bool {
        self.matched == self.expected.len()
    }

    /// 输入收到的字节
    ///
    /// 返回 `(进度, 消耗的字节数)`。握手完成后多余的字节不会被消耗，
    /// 由调用方按命令流继续处理。任何不匹配的字节立即返回错误。
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(HandshakeProgress, usize), ProtocolError> {
        let take = bytes.len().min(self.remaining());
        for (i, &byte) in bytes[..take].iter().enumerate() {
            let offset = self.matched + i;
            if self.expected[offset] != byte {
                return Err(ProtocolError::GreetingMismatch { offset });
            }
        }
        self.matched += take;

        let progress = if self.is_complete() {
            HandshakeProgress::Complete
        } else {
            HandshakeProgress::Pending
        };
        Ok((progress, take))
    }
}
