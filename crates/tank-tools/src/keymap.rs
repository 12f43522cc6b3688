//! 按键到遥控命令的映射（坦克本机键盘和远程客户端共用）

use crate::keys::Key;
use tank_protocol::Command;

/// 按键动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(Command),
    Quit,
    Ignore,
}

/// 把按键映射为动作
///
/// 方向键控制摄像头云台，`q` 退出，其他按键按命令字节解释。
/// 存活应答和保留的超声波模式命令不能从键盘发出。
pub fn action_for_key(key: &Key) -> KeyAction {
    match key {
        Key::Char(b'q') => KeyAction::Quit,
        Key::Char(byte) => match Command::from_byte(*byte) {
            Ok(Command::LivenessAck) => KeyAction::Ignore,
            Ok(cmd) if cmd.is_reserved() => KeyAction::Ignore,
            Ok(cmd) => KeyAction::Command(cmd),
            Err(_) => KeyAction::Ignore,
        },
        Key::Up => KeyAction::Command(Command::CameraUp),
        Key::Down => KeyAction::Command(Command::CameraDown),
        Key::Right => KeyAction::Command(Command::CameraRight),
        Key::Left => KeyAction::Command(Command::CameraLeft),
        Key::Function(_) | Key::Sequence(_) => KeyAction::Ignore,
    }
}

/// 启动时打印的按键说明
pub const HELP_TEXT: &str = "\
BUTTONS:
--------------------------------------------------
MOVEMENT:
 'w' forward / speed up     's' backward / slow down
 'a' turn left              'd' turn right
 'e' stop
SONIC ANGLE:
 'z' turn left              'c' turn right
 'x' centre
CAMERA (arrow keys):
 left / right / up / down   '/' centre
LED:
 '1' red   '2' green   '3' blue   (press again to switch off)
BUZZER:
 '4' on / off
EXIT:
 'q' quit
--------------------------------------------------";
