//! 超声波测距（触发/回波计时状态机）
//!
//! 每个测量周期（60ms）：
//!
//! ```text
//! Idle --trigger HIGH--> Pulse --10us, trigger LOW--> WaitEcho --echo HIGH--> Timing --echo LOW--> Idle
//! ```
//!
//! 回波高电平持续时间换算为距离，写入 5 个样本的环形缓冲区，
//! 至少 3 个有效样本时取整数平均值作为当前距离。

use crate::clock::Timestamp;
use crate::device::{Device, DeviceCore, DeviceOps, DeviceState};
use crate::error::DriverError;
use tank_gpio::{InputLine, OutputLine};
use tracing::{trace, warn};

/// 触发脉冲宽度（微秒）
pub const SONIC_TRIGGER_US: u64 = 10;
/// 触发后开始检查回波前的保护时间（微秒）
pub const SONIC_ECHO_GUARD_US: u64 = 100;
/// 回波轮询间隔（微秒）
pub const SONIC_POLL_US: u64 = 15;
/// 测量周期（微秒）
pub const SONIC_PERIOD_US: u64 = 60_000;
/// 最大可测距离（厘米）
pub const SONIC_MAX_DISTANCE_CM: u32 = 450;
/// 平滑窗口大小
pub const SONIC_WINDOW: usize = 5;
/// 计算平均值所需的最少有效样本数
pub const SONIC_MIN_VALID: usize = 3;

/// 回波时间（微秒）换算为距离（厘米）
///
/// 声速约 340 m/s，往返时间 t 对应距离 `t * 17 / 1000` 厘米。
/// 超过 450 厘米视为无效。
pub fn distance_cm(echo_us: u64) -> Option<u32> {
    let cm = echo_us.saturating_mul(17) / 1000;
    if cm > u64::from(SONIC_MAX_DISTANCE_CM) {
        None
    } else {
        Some(cm as u32)
    }
}

/// 5 样本滑动窗口
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleWindow {
    samples: [Option<u32>; SONIC_WINDOW],
    cursor: usize,
    count: usize,
    last_distance: Option<u32>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个样本（`None` 为无效样本）
    ///
    /// 窗口首次填满后，每次写入都重新计算平滑距离。
    pub fn push(&mut self, sample: Option<u32>) {
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % SONIC_WINDOW;
        if self.count < SONIC_WINDOW {
            self.count += 1;
        }
        if self.count < SONIC_WINDOW {
            return;
        }

        let (sum, valid) = self
            .samples
            .iter()
            .flatten()
            .fold((0u32, 0u32), |(sum, n), &cm| (sum + cm, n + 1));
        self.last_distance = if valid as usize >= SONIC_MIN_VALID {
            Some(sum / valid)
        } else {
            None
        };
    }

    pub fn last_distance(&self) -> Option<u32> {
        self.last_distance
    }

    /// 已收集的样本数（最多 5）
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == SONIC_WINDOW
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 测量模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SonicMode {
    /// 持续测量
    #[default]
    Continuous,
    /// 收集满 5 个样本后停止
    OneShot,
}

impl SonicMode {
    /// 0 为持续测量，其他值为单次
    pub fn from_raw(mode: i32) -> Self {
        if mode == 0 { Self::Continuous } else { Self::OneShot }
    }
}

/// 测量阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SonicPhase {
    Idle,
    Pulse,
    WaitEcho,
    Timing,
}

/// 超声波测距驱动
pub struct SonicRange {
    trigger: Box<dyn OutputLine>,
    echo: Box<dyn InputLine>,
    window: SampleWindow,
    phase: SonicPhase,
    mode: SonicMode,
    cycle_start: Timestamp,
    echo_rise: Timestamp,
}

impl SonicRange {
    pub fn new(trigger: Box<dyn OutputLine>, echo: Box<dyn InputLine>) -> Self {
        Self {
            trigger,
            echo,
            window: SampleWindow::new(),
            phase: SonicPhase::Idle,
            mode: SonicMode::default(),
            cycle_start: Timestamp::ZERO,
            echo_rise: Timestamp::ZERO,
        }
    }

    pub fn phase(&self) -> SonicPhase {
        self.phase
    }

    pub fn mode(&self) -> SonicMode {
        self.mode
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    fn finish_cycle(&mut self, sample: Option<u32>) {
        trace!("sonic: sample {:?}", sample);
        self.window.push(sample);
        self.phase = SonicPhase::Idle;
    }
}

impl DeviceOps for SonicRange {
    fn reset(&mut self) {
        self.phase = SonicPhase::Idle;
        self.window.clear();
    }

    fn tick(&mut self, core: &mut DeviceCore, now: Timestamp) -> Result<(), DriverError> {
        if core.state() == DeviceState::Starting {
            core.set_state(DeviceState::Started);
        }
        let elapsed = now.micros_since(self.cycle_start);

        match self.phase {
            SonicPhase::Idle => {
                let done = self.mode == SonicMode::OneShot && self.window.is_full();
                if core.state() == DeviceState::Stopping || done {
                    core.set_state(DeviceState::Stopped);
                    return Ok(());
                }
                self.trigger.set(true)?;
                self.cycle_start = now;
                self.phase = SonicPhase::Pulse;
                core.schedule_in(now, SONIC_TRIGGER_US);
            },
            SonicPhase::Pulse => {
                self.trigger.set(false)?;
                self.phase = SonicPhase::WaitEcho;
                core.schedule_in(now, SONIC_ECHO_GUARD_US);
            },
            SonicPhase::WaitEcho => {
                if elapsed >= SONIC_PERIOD_US / 2 {
                    self.finish_cycle(None);
                    core.schedule_at(self.cycle_start.after_micros(SONIC_PERIOD_US));
                } else if !self.echo.get()? {
                    core.schedule_in(now, SONIC_POLL_US);
                } else {
                    self.echo_rise = now;
                    self.phase = SonicPhase::Timing;
                    core.schedule_in(now, SONIC_ECHO_GUARD_US);
                }
            },
            SonicPhase::Timing => {
                if !self.echo.get()? {
                    let sample = distance_cm(now.micros_since(self.echo_rise));
                    self.finish_cycle(sample);
                    core.schedule_at(self.cycle_start.after_micros(SONIC_PERIOD_US));
                } else if elapsed >= SONIC_PERIOD_US {
                    // 回波一直为高：周期已经结束，cycle_start + P 不晚于 now，立即开始下一周期
                    self.finish_cycle(None);
                    core.schedule_at(self.cycle_start.after_micros(SONIC_PERIOD_US));
                } else {
                    core.schedule_in(now, SONIC_POLL_US);
                }
            },
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.trigger.set(false) {
            warn!("sonic: failed to drive trigger low: {}", e);
        }
        self.phase = SonicPhase::Idle;
    }
}

impl Device<SonicRange> {
    /// 设置测量模式，0 为持续测量，其他值为单次
    pub fn set_mode(&mut self, mode: i32) {
        self.driver_mut().mode = SonicMode::from_raw(mode);
    }

    /// 平滑后的距离（厘米），有效样本不足时为 `None`
    pub fn distance(&self) -> Option<u32> {
        self.driver().window.last_distance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Wakeup;
    use std::time::Duration;
    use tank_gpio::{LineId, MockInput, MockOutput, MockProbe};

    fn mock_sonic() -> (Device<SonicRange>, MockProbe, MockProbe) {
        let (trigger, trig_p) = MockOutput::new(LineId::new(0, 0));
        let (echo, echo_p) = MockInput::new(LineId::new(0, 1));
        let dev = Device::new("sonic", SonicRange::new(Box::new(trigger), Box::new(echo)));
        (dev, trig_p, echo_p)
    }

    fn wait_us(dev: &Device<SonicRange>, now: Timestamp) -> Option<u64> {
        match dev.next_wait(now) {
            Wakeup::Now => Some(0),
            Wakeup::After(d) => Some(d.as_micros() as u64),
            Wakeup::Never => None,
        }
    }

    /// 模拟一个完整的测量周期，回波在 `rise` 升起、持续 `width` 微秒
    fn measure(dev: &mut Device<SonicRange>, echo: &MockProbe, start: Timestamp, width: u64) {
        let rise = start.after_micros(500);
        let fall = rise.after_micros(width);
        let mut now = start;
        loop {
            echo.set_level(now >= rise && now < fall);
            dev.tick(now).unwrap();
            if dev.driver().phase() == SonicPhase::Idle {
                return;
            }
            match wait_us(dev, now) {
                Some(us) => now = now.after_micros(us),
                None => return,
            }
        }
    }

    #[test]
    fn test_distance_conversion() {
        assert_eq!(distance_cm(10_000), Some(170));
        assert_eq!(distance_cm(0), Some(0));
        assert_eq!(distance_cm(30_000), None);
        assert_eq!(distance_cm(26_470), Some(449));
        assert_eq!(distance_cm(u64::MAX), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_distance_is_monotonic(a in 0u64..40_000, b in 0u64..40_000) {
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            match (distance_cm(short), distance_cm(long)) {
                (Some(x), Some(y)) => proptest::prop_assert!(x <= y),
                // 一旦无效，更长的回波也无效
                (None, other) => proptest::prop_assert_eq!(other, None),
                (Some(_), None) => {},
            }
        }
    }

    #[test]
    fn test_window_mean_of_valid_samples() {
        let mut w = SampleWindow::new();
        for s in [Some(20), Some(22), None, Some(21)] {
            w.push(s);
            assert_eq!(w.last_distance(), None);
        }
        w.push(None);
        assert_eq!(w.last_distance(), Some(21));
    }

    #[test]
    fn test_window_needs_three_valid() {
        let mut w = SampleWindow::new();
        for s in [Some(20), None, None, Some(21), None] {
            w.push(s);
        }
        assert!(w.is_full());
        assert_eq!(w.last_distance(), None);

        // 覆盖最旧的样本：[30, _, _, 21, _]
        w.push(Some(30));
        assert_eq!(w.last_distance(), None);
        // [30, 24, _, 21, _]
        w.push(Some(24));
        assert_eq!(w.last_distance(), Some(25));
        assert_eq!(w.count(), SONIC_WINDOW);
    }

    #[test]
    fn test_window_mean_is_truncated_over_ring() {
        let mut w = SampleWindow::new();
        for s in [Some(20), Some(21), Some(21), None, None] {
            w.push(s);
        }
        // 62 / 3
        assert_eq!(w.last_distance(), Some(20));

        // 覆盖后：[450, 21, 21, _, _] -> 492 / 3
        w.push(Some(450));
        assert_eq!(w.last_distance(), Some(164));
        w.push(None);
        w.push(None);
        assert_eq!(w.last_distance(), None);
    }

    #[test]
    fn test_mode_from_raw() {
        assert_eq!(SonicMode::from_raw(0), SonicMode::Continuous);
        assert_eq!(SonicMode::from_raw(1), SonicMode::OneShot);
        assert_eq!(SonicMode::from_raw(-3), SonicMode::OneShot);
    }

    #[test]
    fn test_trigger_pulse_timing() {
        let (mut dev, trig, _) = mock_sonic();
        dev.start().unwrap();
        let t0 = Timestamp::from_micros(100);

        dev.tick(t0).unwrap();
        assert!(trig.level());
        assert_eq!(dev.driver().phase(), SonicPhase::Pulse);
        assert_eq!(wait_us(&dev, t0), Some(SONIC_TRIGGER_US));

        let t1 = t0.after_micros(10);
        dev.tick(t1).unwrap();
        assert!(!trig.level());
        assert_eq!(dev.driver().phase(), SonicPhase::WaitEcho);
        assert_eq!(wait_us(&dev, t1), Some(SONIC_ECHO_GUARD_US));

        // 回波未到：按轮询间隔重试
        let t2 = t1.after_micros(100);
        dev.tick(t2).unwrap();
        assert_eq!(wait_us(&dev, t2), Some(SONIC_POLL_US));
    }

    #[test]
    fn test_echo_produces_sample_and_waits_for_cycle_end() {
        let (mut dev, _, echo) = mock_sonic();
        dev.start().unwrap();
        let start = Timestamp::from_micros(1_000);
        measure(&mut dev, &echo, start, 10_000);

        let samples = dev.driver().window().samples;
        // 轮询间隔带来最多一个间隔的误差
        let cm = samples[0].unwrap();
        assert!((170..=173).contains(&cm), "distance {cm}");
        assert_eq!(dev.driver().window().count(), 1);
        assert_eq!(dev.next_action(), start.after_micros(SONIC_PERIOD_US));
        // 窗口未满，距离仍然无效
        assert_eq!(dev.distance(), None);
    }

    #[test]
    fn test_missing_echo_times_out_at_half_cycle() {
        let (mut dev, _, _) = mock_sonic();
        dev.start().unwrap();
        let start = Timestamp::ZERO;
        dev.tick(start).unwrap();
        dev.tick(start.after_micros(10)).unwrap();

        let late = start.after_micros(SONIC_PERIOD_US / 2);
        dev.tick(late).unwrap();
        assert_eq!(dev.driver().phase(), SonicPhase::Idle);
        assert_eq!(dev.driver().window().samples[0], None);
        assert_eq!(dev.driver().window().count(), 1);
        assert_eq!(
            dev.next_wait(late),
            Wakeup::After(Duration::from_micros(SONIC_PERIOD_US / 2))
        );
    }

    #[test]
    fn test_stuck_echo_restarts_immediately() {
        let (mut dev, _, echo) = mock_sonic();
        dev.start().unwrap();
        let start = Timestamp::ZERO;
        dev.tick(start).unwrap();
        dev.tick(start.after_micros(10)).unwrap();
        echo.set_level(true);
        dev.tick(start.after_micros(110)).unwrap();
        assert_eq!(dev.driver().phase(), SonicPhase::Timing);

        let late = start.after_micros(SONIC_PERIOD_US + 5);
        dev.tick(late).unwrap();
        assert_eq!(dev.driver().phase(), SonicPhase::Idle);
        assert_eq!(dev.driver().window().samples[0], None);
        assert_eq!(dev.next_wait(late), Wakeup::Now);
    }

    #[test]
    fn test_one_shot_stops_after_window_full() {
        let (mut dev, _, echo) = mock_sonic();
        dev.set_mode(1);
        dev.start().unwrap();

        let mut start = Timestamp::ZERO;
        for _ in 0..SONIC_WINDOW {
            measure(&mut dev, &echo, start, 5_000);
            start = start.after_micros(SONIC_PERIOD_US);
        }
        assert!(dev.distance().is_some());

        dev.tick(start).unwrap();
        assert_eq!(dev.state(), DeviceState::Stopped);
        assert_eq!(dev.next_wait(start), Wakeup::Never);
    }

    #[test]
    fn test_continuous_keeps_measuring() {
        let (mut dev, trig, echo) = mock_sonic();
        dev.set_mode(0);
        dev.start().unwrap();

        let mut start = Timestamp::ZERO;
        for _ in 0..SONIC_WINDOW + 2 {
            measure(&mut dev, &echo, start, 5_000);
            start = start.after_micros(SONIC_PERIOD_US);
        }
        dev.tick(start).unwrap();
        assert_eq!(dev.state(), DeviceState::Started);
        assert!(trig.level());
    }

    #[test]
    fn test_start_resets_window() {
        let (mut dev, _, echo) = mock_sonic();
        dev.start().unwrap();
        measure(&mut dev, &echo, Timestamp::ZERO, 5_000);
        dev.stop();
        dev.tick(Timestamp::from_micros(SONIC_PERIOD_US)).unwrap();
        assert_eq!(dev.state(), DeviceState::Stopped);

        dev.start().unwrap();
        assert_eq!(dev.driver().window().count(), 0);
        assert_eq!(dev.distance(), None);
        assert_eq!(dev.driver().phase(), SonicPhase::Idle);
    }
}
