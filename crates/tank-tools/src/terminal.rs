//! 终端原始模式和非阻塞键盘读取
//!
//! - [`RawTerminal`]: 关闭行缓冲和回显（`ICANON`、`ECHO`），drop 时恢复
//! - [`KeyboardInput`]: 直接读取 stdin 描述符（不经过 std 的缓冲），
//!   配合 IO 多路复用使用：就绪后调用 [`KeyboardInput::read_keys`] 读空所有可用字节

use crate::keys::{Key, KeyDecoder};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Instant;
use tracing::{debug, warn};

/// 终端原始模式守卫
pub struct RawTerminal {
    original: Termios,
}

impl RawTerminal {
    /// 进入非规范、无回显模式，stdin 不是终端时返回 `None`
    pub fn enable() -> io::Result<Option<Self>> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }

        let original = termios::tcgetattr(stdin.as_fd()).map_err(io::Error::from)?;
        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        debug!("terminal switched to raw mode");
        Ok(Some(Self { original }))
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        let stdin = io::stdin();
        if let Err(e) = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.original) {
            warn!("failed to restore terminal mode: {}", e);
        }
    }
}

/// 一次读取的结果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyRead {
    pub keys: Vec<Key>,
    /// stdin 已关闭
    pub closed: bool,
}

/// stdin 键盘输入
pub struct KeyboardInput {
    file: File,
    decoder: KeyDecoder,
}

impl KeyboardInput {
    /// 复制 stdin 描述符，绕开 std 的输入缓冲
    pub fn open() -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self {
            file: File::from(fd),
            decoder: KeyDecoder::new(),
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn readable(&self) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::ZERO).map_err(io::Error::from)?;
        Ok(n > 0)
    }

    /// 读空当前可用的字节并解码
    pub fn read_keys(&mut self) -> io::Result<KeyRead> {
        let mut result = KeyRead::default();
        let mut buf = [0u8; 64];

        while self.readable()? {
            match self.file.read(&mut buf) {
                Ok(0) => {
                    result.closed = true;
                    break;
                },
                Ok(n) => {
                    let keys = self.decoder.feed(&buf[..n], Instant::now());
                    result.keys.extend(keys);
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        result.keys.extend(self.decoder.poll(Instant::now()));
        Ok(result)
    }

    /// 不完整转义序列的超时检查（没有新输入时调用）
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<Key> {
        self.decoder.poll(now)
    }

    /// 不完整转义序列的超时时刻
    pub fn deadline(&self) -> Option<Instant> {
        self.decoder.deadline()
    }
}
