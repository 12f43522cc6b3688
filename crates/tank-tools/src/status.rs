//! 状态行渲染
//!
//! 状态行用 `\r` 覆盖同一行输出，日志写到 stderr，避免互相干扰。

use std::io::{self, Write};
use tank_protocol::TankStatus;

/// 渲染状态行（不含行首 `\r`）
///
/// ```text
/// track_power [+015%, +025%], sonic [-05, 170cm], camera [+010, +000], led [R_B], buzzer [PAIN]
/// ```
///
/// 履带功率按 左, 右 的顺序显示。
pub fn status_line(status: &TankStatus) -> String {
    let buzzer = if status.buzzer == tank_protocol::BUZZER_ON {
        "PAIN"
    } else {
        "____"
    };
    format!(
        "track_power [{:+04}%, {:+04}%], sonic [{:+03}, {:03}cm], camera [{:+04}, {:+04}], led [{}{}{}], buzzer [{}]",
        status.left_speed_pct,
        status.right_speed_pct,
        status.sonic_servo_offset,
        status.sonic_distance,
        status.camera_pan_offset,
        status.camera_tilt_offset,
        status.red as char,
        status.green as char,
        status.blue as char,
        buzzer,
    )
}

/// 在当前行重绘状态
pub fn redraw(out: &mut impl Write, status: &TankStatus) -> io::Result<()> {
    write!(out, "\r{}", status_line(status))?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_format() {
        let status = TankStatus {
            right_speed_pct: 25,
            left_speed_pct: -15,
            sonic_distance: 170,
            sonic_servo_offset: -5,
            camera_pan_offset: 10,
            camera_tilt_offset: 0,
            ..TankStatus::default()
        }
        .with_indicators(true, false, true, true);

        assert_eq!(
            status_line(&status),
            "track_power [-015%, +025%], sonic [-05, 170cm], camera [+010, +000], led [R_B], buzzer [PAIN]"
        );
    }

    #[test]
    fn test_idle_status_line() {
        let line = status_line(&TankStatus::default());
        assert_eq!(
            line,
            "track_power [+000%, +000%], sonic [+00, -01cm], camera [+000, +000], led [___], buzzer [____]"
        );
    }

    #[test]
    fn test_redraw_starts_with_carriage_return() {
        let mut out = Vec::new();
        redraw(&mut out, &TankStatus::default()).unwrap();
        assert!(out.starts_with(b"\rtrack_power"));
    }
}
