//! 终端按键序列解码
//!
//! 终端把方向键等特殊键编码为以 ESC 开头的多字节序列，而且可能分多次读到。
//! [`KeyDecoder`] 缓存不完整的序列：
//!
//! - 非 ESC 字节：单字节按键
//! - `ESC O [PQRS]`：F1 ~ F4
//! - `ESC [ {数字或 ';'} 结束符`，结束符为 `ABCDFHPQRS~` 之一
//! - 其他形式：把 ESC 作为单独的按键，剩余字节重新解析
//!
//! 不完整的序列超过 20ms 仍未补齐时，把第一个字节作为单独的按键输出。

use std::time::{Duration, Instant};

const ESC: u8 = 0x1b;

/// 缓冲区上限
const KEY_BUFFER: usize = 32;

/// 不完整序列的最长等待时间
pub const ESCAPE_TIMEOUT: Duration = Duration::from_millis(20);

/// 解码后的按键
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// 单字节按键（包括单独的 ESC）
    Char(u8),
    Up,
    Down,
    Right,
    Left,
    /// F1 ~ F4
    Function(u8),
    /// 其他完整的转义序列
    Sequence(Vec<u8>),
}

impl Key {
    fn from_sequence(seq: &[u8]) -> Key {
        match seq {
            [b] => Key::Char(*b),
            [ESC, b'[', b'A'] => Key::Up,
            [ESC, b'[', b'B'] => Key::Down,
            [ESC, b'[', b'C'] => Key::Right,
            [ESC, b'[', b'D'] => Key::Left,
            [ESC, b'O', f @ b'P'..=b'S'] => Key::Function(f - b'P' + 1),
            other => Key::Sequence(other.to_vec()),
        }
    }
}

/// 缓冲区头部按键的长度，`None` 表示序列尚不完整
fn key_len(buf: &[u8]) -> Option<usize> {
    match buf {
        [] => Some(0),
        [first, ..] if *first != ESC => Some(1),
        [_] => None,
        [_, b'O', rest @ ..] => match rest.first() {
            None => None,
            Some(b'P'..=b'S') => Some(3),
            Some(_) => Some(1),
        },
        [_, b'[', rest @ ..] => {
            for (i, &b) in rest.iter().enumerate() {
                if b.is_ascii_digit() || b == b';' {
                    continue;
                }
                if b"ABCDFHPQRS~".contains(&b) {
                    return Some(i + 3);
                }
                return Some(1);
            }
            None
        },
        _ => Some(1),
    }
}

/// 增量按键解码器
#[derive(Debug)]
pub struct KeyDecoder {
    buf: Vec<u8>,
    unfinished_since: Option<Instant>,
    timeout: Duration,
}

impl Default for KeyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(KEY_BUFFER),
            unfinished_since: None,
            timeout: ESCAPE_TIMEOUT,
        }
    }

    /// 输入读到的字节，返回所有完整的按键
    ///
    /// 超出缓冲区上限的字节被丢弃。
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<Key> {
        let room = KEY_BUFFER.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
        self.drain(now)
    }

    /// 检查不完整序列是否超时（没有新输入时调用）
    pub fn poll(&mut self, now: Instant) -> Vec<Key> {
        self.drain(now)
    }

    /// 不完整序列的超时时刻，用作 IO 轮询超时
    pub fn deadline(&self) -> Option<Instant> {
        self.unfinished_since.map(|t| t + self.timeout)
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    fn drain(&mut self, now: Instant) -> Vec<Key> {
        let mut keys = Vec::new();
        loop {
            let len = match key_len(&self.buf) {
                Some(0) => break,
                Some(len) => len,
                None => {
                    let since = *self.unfinished_since.get_or_insert(now);
                    if now.saturating_duration_since(since) < self.timeout {
                        break;
                    }
                    1
                },
            };
            self.unfinished_since = None;
            keys.push(Key::from_sequence(&self.buf[..len]));
            self.buf.drain(..len);
        }
        keys
    }
}
