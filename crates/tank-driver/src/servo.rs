//! 舵机角度控制（软件 PWM）
//!
//! 每个周期输出一个宽度为 `angle * 11 + 500` 微秒的高电平脉冲。
//! 角度变化后保持输出 50 个周期，然后关闭输出直到下一次变化，
//! 避免舵机在静止时持续抖动和发热。

use crate::clock::Timestamp;
use crate::device::{Device, DeviceCore, DeviceOps, DeviceState};
use crate::error::DriverError;
use tank_gpio::OutputLine;
use tracing::{trace, warn};

/// 舵机 PWM 周期（微秒）
pub const SERVO_PERIOD_US: u32 = 20_000;
/// 角度变化后保持输出的周期数
pub const SERVO_HOLD_CYCLES: u32 = 50;
/// 命令层每次微调的角度
pub const SERVO_NUDGE_STEP: i32 = 5;

/// 角度对应的脉冲宽度（微秒）
pub const fn pulse_width_us(angle: i32) -> u32 {
    (angle * 11 + 500) as u32
}

/// 舵机角度范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoBounds {
    min: i32,
    max: i32,
    default: i32,
}

impl ServoBounds {
    /// 要求 `0 <= min <= default <= max`，且最大角度的脉冲短于周期
    pub fn new(min: i32, max: i32, default: i32) -> Result<Self, DriverError> {
        let valid = 0 <= min
            && min <= default
            && default <= max
            && i64::from(max) * 11 + 500 < i64::from(SERVO_PERIOD_US);
        if !valid {
            return Err(DriverError::InvalidBounds { min, default, max });
        }
        Ok(Self { min, max, default })
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn default_angle(&self) -> i32 {
        self.default
    }

    pub fn clamp(&self, angle: i32) -> i32 {
        angle.clamp(self.min, self.max)
    }
}

/// 舵机驱动
pub struct ServoAngle {
    out: Box<dyn OutputLine>,
    bounds: ServoBounds,
    active_angle: i32,
    pending_angle: i32,
    on: bool,
    remaining_idle_cycles: u32,
}

impl ServoAngle {
    pub fn new(out: Box<dyn OutputLine>, bounds: ServoBounds) -> Self {
        Self {
            out,
            bounds,
            active_angle: bounds.default,
            pending_angle: bounds.default,
            on: false,
            remaining_idle_cycles: 0,
        }
    }

    pub fn bounds(&self) -> ServoBounds {
        self.bounds
    }

    /// 当前输出的角度
    pub fn active_angle(&self) -> i32 {
        self.active_angle
    }

    pub fn remaining_idle_cycles(&self) -> u32 {
        self.remaining_idle_cycles
    }
}

impl DeviceOps for ServoAngle {
    fn reset(&mut self) {
        self.on = false;
    }

    fn tick(&mut self, core: &mut DeviceCore, now: Timestamp) -> Result<(), DriverError> {
        if core.state() == DeviceState::Starting {
            core.set_state(DeviceState::Started);
            self.remaining_idle_cycles = SERVO_HOLD_CYCLES;
        }

        if self.on {
            self.out.set(false)?;
            self.on = false;
            let pulse = pulse_width_us(self.active_angle);
            core.schedule_in(now, u64::from(SERVO_PERIOD_US.saturating_sub(pulse)));
            return Ok(());
        }

        if self.remaining_idle_cycles == 0 || core.state() == DeviceState::Stopping {
            self.out.set(false)?;
            self.remaining_idle_cycles = 0;
            core.set_state(DeviceState::Stopped);
            return Ok(());
        }

        if self.active_angle != self.pending_angle {
            trace!(
                "{}: angle {} -> {}",
                core.name(),
                self.active_angle,
                self.pending_angle
            );
            self.active_angle = self.pending_angle;
            self.remaining_idle_cycles = SERVO_HOLD_CYCLES;
        }

        self.remaining_idle_cycles -= 1;
        self.out.set(true)?;
        self.on = true;
        core.schedule_in(now, u64::from(pulse_width_us(self.active_angle)));
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.out.set(false) {
            warn!("servo: failed to drive output low: {}", e);
        }
        self.on = false;
    }
}

impl Device<ServoAngle> {
    /// 创建舵机设备并立即请求启动（输出默认角度）
    pub fn servo(name: impl Into<String>, out: Box<dyn OutputLine>, bounds: ServoBounds) -> Self {
        let mut dev = Device::new(name, ServoAngle::new(out, bounds));
        dev.request_start();
        dev
    }

    /// 请求启动，已在运行时的 `InvalidState` 不算错误
    fn request_start(&mut self) {
        if let Err(e) = self.start()
            && !e.is_invalid_state()
        {
            warn!("{}: start failed: {}", self.name(), e);
        }
    }

    /// 设置目标角度（限幅），并请求启动
    ///
    /// 设备已在运行时目标值照样更新，下一个周期生效。
    pub fn set_angle(&mut self, angle: i32) {
        let servo = self.driver_mut();
        servo.pending_angle = servo.bounds.clamp(angle);
        self.request_start();
    }

    /// 目标角度
    pub fn angle(&self) -> i32 {
        self.driver().pending_angle
    }

    pub fn min_angle(&self) -> i32 {
        self.driver().bounds.min
    }

    pub fn max_angle(&self) -> i32 {
        self.driver().bounds.max
    }

    pub fn default_angle(&self) -> i32 {
        self.driver().bounds.default
    }

    /// 相对默认角度的偏移
    pub fn offset(&self) -> i32 {
        self.angle() - self.default_angle()
    }

    /// 按步长微调，`steps` 为正时角度增大
    pub fn nudge(&mut self, steps: i32) {
        self.set_angle(self.angle() + steps * SERVO_NUDGE_STEP);
    }

    /// 回到默认角度
    pub fn centre(&mut self) {
        self.set_angle(self.default_angle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Wakeup;
    use std::time::Duration;
    use tank_gpio::{LineId, MockOutput, MockProbe};

    fn mock_servo(min: i32, max: i32, default: i32) -> (Device<ServoAngle>, MockProbe) {
        let (out, probe) = MockOutput::new(LineId::new(5, 10));
        let bounds = ServoBounds::new(min, max, default).unwrap();
        (Device::servo("servo", Box::new(out), bounds), probe)
    }

    /// 连续执行 tick，直到设备停止，返回高电平脉冲个数
    fn run_until_stopped(dev: &mut Device<ServoAngle>, probe: &MockProbe) -> u32 {
        let mut now = Timestamp::ZERO;
        let mut pulses = 0;
        for _ in 0..1_000 {
            match dev.next_wait(now) {
                Wakeup::Never => break,
                Wakeup::Now => {},
                Wakeup::After(d) => now = now.after(d),
            }
            let was_high = probe.level();
            dev.tick(now).unwrap();
            if !was_high && probe.level() {
                pulses += 1;
            }
        }
        pulses
    }

    #[test]
    fn test_set_angle_clamps() {
        let (mut dev, _) = mock_servo(0, 160, 80);
        dev.set_angle(200);
        assert_eq!(dev.angle(), 160);
        dev.set_angle(-5);
        assert_eq!(dev.angle(), 0);
    }

    #[test]
    fn test_constructor_starts_device() {
        let (dev, _) = mock_servo(0, 170, 85);
        assert_eq!(dev.state(), DeviceState::Starting);
        assert_eq!(dev.angle(), 85);
        assert_eq!(dev.min_angle(), 0);
        assert_eq!(dev.max_angle(), 170);
        assert_eq!(dev.default_angle(), 85);
    }

    #[test]
    fn test_pulse_width_and_period() {
        let (mut dev, probe) = mock_servo(0, 160, 80);
        let t0 = Timestamp::ZERO;
        dev.tick(t0).unwrap();
        assert!(probe.level());
        // 80 * 11 + 500
        assert_eq!(dev.next_wait(t0), Wakeup::After(Duration::from_micros(1_380)));

        let t1 = t0.after_micros(1_380);
        dev.tick(t1).unwrap();
        assert!(!probe.level());
        assert_eq!(dev.next_wait(t1), Wakeup::After(Duration::from_micros(18_620)));
    }

    #[test]
    fn test_auto_idle_after_hold_cycles() {
        let (mut dev, probe) = mock_servo(0, 160, 80);
        let pulses = run_until_stopped(&mut dev, &probe);
        assert_eq!(pulses, SERVO_HOLD_CYCLES);
        assert_eq!(dev.state(), DeviceState::Stopped);
        assert!(!probe.level());
    }

    #[test]
    fn test_set_angle_while_running_resets_hold() {
        let (mut dev, probe) = mock_servo(0, 160, 80);
        let mut now = Timestamp::ZERO;
        // 10 个周期
        for _ in 0..20 {
            dev.tick(now).unwrap();
            now = now.after_micros(10_000);
        }
        assert_eq!(dev.driver().remaining_idle_cycles(), SERVO_HOLD_CYCLES - 10);

        dev.set_angle(100);
        assert_eq!(dev.state(), DeviceState::Started);
        dev.tick(now).unwrap();
        assert_eq!(dev.driver().active_angle(), 100);
        assert_eq!(dev.driver().remaining_idle_cycles(), SERVO_HOLD_CYCLES - 1);
        assert!(probe.level());
    }

    #[test]
    fn test_set_angle_restarts_idle_servo() {
        let (mut dev, probe) = mock_servo(0, 160, 80);
        run_until_stopped(&mut dev, &probe);

        dev.nudge(1);
        assert_eq!(dev.angle(), 85);
        assert_eq!(dev.offset(), 5);
        assert_eq!(dev.state(), DeviceState::Starting);
        let pulses = run_until_stopped(&mut dev, &probe);
        assert_eq!(pulses, SERVO_HOLD_CYCLES);
        assert_eq!(dev.driver().active_angle(), 85);

        dev.centre();
        assert_eq!(dev.angle(), 80);
    }

    #[test]
    fn test_stop_finishes_pulse_first() {
        let (mut dev, probe) = mock_servo(0, 160, 80);
        dev.tick(Timestamp::ZERO).unwrap();
        dev.stop();
        assert!(probe.level());

        dev.tick(Timestamp::from_micros(1_380)).unwrap();
        assert!(!probe.level());
        assert_eq!(dev.state(), DeviceState::Stopping);

        dev.tick(Timestamp::from_micros(20_000)).unwrap();
        assert_eq!(dev.state(), DeviceState::Stopped);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(ServoBounds::new(100, 50, 60).is_err());
        assert!(ServoBounds::new(0, 160, 170).is_err());
        assert!(ServoBounds::new(-1, 160, 80).is_err());
        // 脉冲超过周期
        assert!(ServoBounds::new(0, 2_000, 80).is_err());
        assert!(ServoBounds::new(25, 160, 60).is_ok());
    }
}
