//! 履带驱动（软件 PWM）
//!
//! 左右两路电机各由一个 H 桥线路三元组控制：PWM 使能、方向 A、方向 B。
//! 占空时间（duty）是带符号的微秒数，符号表示方向，绝对值是一个周期内的导通时间。
//!
//! | 状态 | 方向 A   | 方向 B   | PWM       |
//! |------|----------|----------|-----------|
//! | ON   | duty < 0 | duty > 0 | duty != 0 |
//! | OFF  | 0        | 0        | 0         |
//!
//! 新的 duty 只在两侧都处于 OFF 时生效，保证一个周期内波形完整。

use crate::clock::Timestamp;
use crate::device::{Device, DeviceCore, DeviceOps, DeviceState};
use crate::error::DriverError;
use tank_gpio::OutputLine;
use tracing::{trace, warn};

/// PWM 周期（微秒）
pub const TRACK_PERIOD_US: i32 = 20_000;
/// 最小导通时间（微秒），低于此值电机不转
pub const TRACK_MIN_ON_US: i32 = 2_000;
/// 每次加减速的步长（微秒）
pub const TRACK_STEP_US: i32 = 1_000;

/// 步数上限：(周期 - 最小导通) / 步长
const MAX_STEPS: i32 = (TRACK_PERIOD_US - TRACK_MIN_ON_US) / TRACK_STEP_US;

/// 驾驶命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stop,
}

/// 按驾驶命令计算新的 (右, 左) 速度
///
/// 速度先换算为步数，前进/后退在两侧平均值上加减一步，
/// 转向时两侧反向各调整一步，最后限幅并重新加上最小导通时间。
/// 结果总是落在 `{0} ∪ [2000, 20000]`（带符号）。
pub fn drive_step(cmd: DriveCommand, right: i32, left: i32) -> (i32, i32) {
    let mut r = to_steps(right);
    let mut l = to_steps(left);

    match cmd {
        DriveCommand::Forward => {
            r = (r + l) / 2 + 1;
            l = r;
        },
        DriveCommand::Backward => {
            r = (r + l) / 2 - 1;
            l = r;
        },
        DriveCommand::TurnLeft => {
            r += 1;
            l -= 1;
        },
        DriveCommand::TurnRight => {
            r -= 1;
            l += 1;
        },
        DriveCommand::Stop => {
            r = 0;
            l = 0;
        },
    }

    (from_steps(r), from_steps(l))
}

fn to_steps(duty: i32) -> i32 {
    (duty - duty.signum() * TRACK_MIN_ON_US) / TRACK_STEP_US
}

fn from_steps(steps: i32) -> i32 {
    let steps = steps.clamp(-MAX_STEPS, MAX_STEPS);
    steps.signum() * (TRACK_MIN_ON_US + TRACK_STEP_US * steps.abs())
}

/// 单侧履带
pub struct TrackSide {
    pwm: Box<dyn OutputLine>,
    dir_a: Box<dyn OutputLine>,
    dir_b: Box<dyn OutputLine>,
    on: bool,
    active_duty: i32,
    pending_duty: i32,
}

impl TrackSide {
    pub fn new(
        pwm: Box<dyn OutputLine>,
        dir_a: Box<dyn OutputLine>,
        dir_b: Box<dyn OutputLine>,
    ) -> Self {
        Self {
            pwm,
            dir_a,
            dir_b,
            on: false,
            active_duty: 0,
            pending_duty: 0,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn active_duty(&self) -> i32 {
        self.active_duty
    }

    pub fn pending_duty(&self) -> i32 {
        self.pending_duty
    }

    fn on_time(&self) -> u32 {
        self.active_duty.unsigned_abs()
    }

    /// 提交待生效的 duty，返回是否有变化
    fn latch(&mut self) -> bool {
        if self.active_duty != self.pending_duty {
            self.active_duty = self.pending_duty;
            true
        } else {
            false
        }
    }

    fn control(&mut self, on: bool) -> Result<(), DriverError> {
        self.dir_a.set(on && self.active_duty < 0)?;
        self.dir_b.set(on && self.active_duty > 0)?;
        self.pwm.set(on && self.active_duty != 0)?;
        self.on = on;
        Ok(())
    }

    fn force_off(&mut self, side: &str) {
        if let Err(e) = self.control(false) {
            warn!("{} track: failed to drive lines low: {}", side, e);
        }
        self.on = false;
    }
}

/// 双路履带驱动
pub struct TrackDrive {
    right: TrackSide,
    left: TrackSide,
}

impl TrackDrive {
    pub fn new(right: TrackSide, left: TrackSide) -> Self {
        Self { right, left }
    }

    pub fn right(&self) -> &TrackSide {
        &self.right
    }

    pub fn left(&self) -> &TrackSide {
        &self.left
    }
}

impl DeviceOps for TrackDrive {
    fn reset(&mut self) {
        self.right.on = false;
        self.left.on = false;
    }

    fn tick(&mut self, core: &mut DeviceCore, now: Timestamp) -> Result<(), DriverError> {
        let period = TRACK_PERIOD_US.unsigned_abs();

        if core.state() == DeviceState::Stopping && !self.right.on && !self.left.on {
            core.set_state(DeviceState::Stopped);
            return Ok(());
        }
        if core.state() == DeviceState::Starting {
            core.set_state(DeviceState::Started);
        }

        let delay = match (self.right.on, self.left.on) {
            (false, false) => {
                let right_changed = self.right.latch();
                let left_changed = self.left.latch();
                if right_changed || left_changed {
                    trace!(
                        "track: latched right={} left={}",
                        self.right.active_duty, self.left.active_duty
                    );
                }
                let (r, l) = (self.right.on_time(), self.left.on_time());
                if r == 0 && l == 0 {
                    core.set_state(DeviceState::Stopped);
                    return Ok(());
                }
                if r != 0 {
                    self.right.control(true)?;
                }
                if l != 0 {
                    self.left.control(true)?;
                }
                match r.min(l) {
                    0 => r.max(l),
                    m => m,
                }
            },
            (true, true) => {
                let (r, l) = (self.right.on_time(), self.left.on_time());
                let m = r.min(l);
                if r == m {
                    self.right.control(false)?;
                }
                if l == m {
                    self.left.control(false)?;
                }
                if r == l { period.saturating_sub(m) } else { r.abs_diff(l) }
            },
            (true, false) => {
                self.right.control(false)?;
                period.saturating_sub(self.right.on_time())
            },
            (false, true) => {
                self.left.control(false)?;
                period.saturating_sub(self.left.on_time())
            },
        };

        core.schedule_in(now, u64::from(delay));
        Ok(())
    }

    fn release(&mut self) {
        self.right.force_off("right");
        self.left.force_off("left");
    }
}

impl Device<TrackDrive> {
    /// 设置待生效的占空时间（限幅到一个周期）
    ///
    /// 只更新目标值，实际电平在下一个两侧均为 OFF 的 tick 中生效。
    pub fn set_speed(&mut self, right: i32, left: i32) {
        let track = self.driver_mut();
        track.right.pending_duty = right.clamp(-TRACK_PERIOD_US, TRACK_PERIOD_US);
        track.left.pending_duty = left.clamp(-TRACK_PERIOD_US, TRACK_PERIOD_US);
    }

    /// 右侧待生效占空时间
    pub fn speed_right(&self) -> i32 {
        self.driver().right.pending_duty
    }

    /// 左侧待生效占空时间
    pub fn speed_left(&self) -> i32 {
        self.driver().left.pending_duty
    }

    /// 执行驾驶命令，设备处于 Stopped 时先启动
    pub fn apply(&mut self, cmd: DriveCommand) {
        if self.state() == DeviceState::Stopped {
            if let Err(e) = self.start() {
                warn!("track: start rejected: {}", e);
            }
        }
        let (r, l) = drive_step(cmd, self.speed_right(), self.speed_left());
        self.set_speed(r, l);
    }
}
