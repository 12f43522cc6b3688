//! 单调时钟
//!
//! 所有定时都是相对的：时间戳是从进程内某个锚点开始计数的微秒数，
//! 与墙上时间无关。

use std::cell::Cell;
use std::time::{Duration, Instant};

/// 单调时间戳（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// `self + us`
    pub const fn after_micros(self, us: u64) -> Self {
        Self(self.0.saturating_add(us))
    }

    pub fn after(self, d: Duration) -> Self {
        self.after_micros(d.as_micros().min(u64::MAX as u128) as u64)
    }

    /// 从 `earlier` 到 `self` 经过的微秒数（`earlier` 更晚时为 0）
    pub const fn micros_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.micros_since(earlier))
    }
}

/// 时钟接口
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// 基于 `Instant` 的系统单调时钟
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// 把 `Instant` 换算为本时钟的时间戳
    pub fn timestamp_of(&self, instant: Instant) -> Timestamp {
        let us = instant.saturating_duration_since(self.anchor).as_micros();
        Timestamp(us.min(u64::MAX as u128) as u64)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.timestamp_of(Instant::now())
    }
}

/// 手动推进的时钟，用于仿真和测试
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Cell::new(start.0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.set(self.now().after(d));
    }

    pub fn set(&self, t: Timestamp) {
        self.now.set(t.0);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.get())
    }
}
