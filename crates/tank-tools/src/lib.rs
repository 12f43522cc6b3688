//! # Tank Tools
//!
//! 坦克本机程序和远程客户端共用的终端工具：
//!
//! - `keys`: 终端按键序列解码
//! - `keymap`: 按键到遥控命令的映射
//! - `status`: 状态行渲染
//! - `terminal`: 原始模式守卫和 stdin 读取（仅 Unix）

pub mod keymap;
pub mod keys;
pub mod status;
#[cfg(unix)]
pub mod terminal;

pub use keymap::{HELP_TEXT, KeyAction, action_for_key};
pub use keys::{ESCAPE_TIMEOUT, Key, KeyDecoder};
pub use status::{redraw, status_line};
#[cfg(unix)]
pub use terminal::{KeyRead, KeyboardInput, RawTerminal};
