//! 协作式调度器
//!
//! 每一轮（pass）：
//!
//! 1. 读取一次 `now`
//! 2. 按固定顺序遍历设备，等待时间为"立即"的设备恰好执行一次 tick，然后重新查询
//! 3. 取所有非 `Never` 设备的最小等待时间
//!
//! 调用方负责在两轮之间等待：可以直接用 [`Scheduler::step`] 睡眠，
//! 也可以把等待时间作为 IO 轮询超时，让外部命令提前唤醒循环。
//! 没有重排、没有优先级、没有抢占。

use crate::clock::{Clock, Timestamp};
use crate::device::{Schedulable, Wakeup};
use std::time::Duration;
use tracing::{error, trace};

/// 调度器配置
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// 所有设备都停止时的空闲等待
    pub idle_sleep: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(10),
        }
    }
}

/// 调度统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// 已执行的轮数
    pub passes: u64,
    /// tick 调用次数
    pub dispatches: u64,
    /// tick 失败次数（失败的设备被立即停止）
    pub faults: u64,
    /// 观察到的最大调度延迟（微秒）
    pub max_lateness_us: u64,
}

/// 睡眠接口
pub trait Sleeper {
    fn sleep(&mut self, d: Duration);
}

/// 基于 spin_sleep 的睡眠（微秒级精度）
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinSleeper;

impl Sleeper for SpinSleeper {
    fn sleep(&mut self, d: Duration) {
        if !d.is_zero() {
            spin_sleep::sleep(d);
        }
    }
}

/// 协作式调度器
#[derive(Debug, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// 执行一轮调度，返回所有设备中最早的唤醒时间
    pub fn run_pass(&mut self, devices: &mut [&mut dyn Schedulable], now: Timestamp) -> Wakeup {
        let mut wakeup = Wakeup::Never;

        for dev in devices.iter_mut() {
            let mut wait = dev.next_wait(now);
            if wait == Wakeup::Now {
                self.dispatch(&mut **dev, now);
                wait = dev.next_wait(now);
            }
            wakeup = wakeup.min(wait);
        }

        self.stats.passes += 1;
        wakeup
    }

    fn dispatch(&mut self, dev: &mut dyn Schedulable, now: Timestamp) {
        self.stats.dispatches += 1;
        if let Err(e) = dev.tick(now) {
            self.stats.faults += 1;
            error!("{}: tick failed, halting device: {}", dev.name(), e);
            dev.halt();
        } else {
            trace!("{}: tick at {}us -> {:?}", dev.name(), now.as_micros(), dev.state());
        }
    }

    /// 记录调度延迟（`now` 晚于计划时间的部分）
    pub fn record_lateness(&mut self, planned: Timestamp, now: Timestamp) {
        let late = now.micros_since(planned);
        if late > self.stats.max_lateness_us {
            self.stats.max_lateness_us = late;
        }
    }

    /// 把唤醒时间换算为实际等待时长，`Never` 时使用空闲等待
    pub fn sleep_duration(&self, wakeup: Wakeup) -> Duration {
        wakeup.as_duration().unwrap_or(self.config.idle_sleep)
    }

    /// 执行一轮并睡眠到下次唤醒
    pub fn step(
        &mut self,
        devices: &mut [&mut dyn Schedulable],
        clock: &impl Clock,
        sleeper: &mut impl Sleeper,
    ) -> Wakeup {
        let now = clock.now();
        let wakeup = self.run_pass(devices, now);
        let wait = self.sleep_duration(wakeup);
        sleeper.sleep(wait);
        if let Some(d) = wakeup.as_duration() {
            self.record_lateness(now.after(d), clock.now());
        }
        wakeup
    }
}

/// 提升当前线程优先级（需要 `realtime` feature）
#[cfg(feature = "realtime")]
pub fn raise_thread_priority() {
    use thread_priority::*;
    use tracing::{info, warn};

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => {
            info!("control thread priority set to MAX (realtime)");
        },
        Err(e) => {
            warn!(
                "Failed to set control thread priority: {:?}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            );
        },
    }
}
