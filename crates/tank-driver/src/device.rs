//! 设备抽象
//!
//! 每个设备由通用的生命周期/调度记录 [`DeviceCore`] 和驱动私有状态组成。
//! 驱动通过 [`DeviceOps`] 提供行为，[`Device`] 负责状态检查：
//!
//! ```text
//! Stopped --start--> Starting --tick--> Started --stop--> Stopping --tick--> Stopped
//! ```
//!
//! `Starting -> Started` 和 `Stopping -> Stopped` 只在周期动作（tick）中发生。

use crate::clock::Timestamp;
use crate::error::DriverError;
use std::time::Duration;
use tracing::{debug, warn};

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// 下次唤醒时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// 立即执行
    Now,
    /// 在给定时长之后
    After(Duration),
    /// 不需要调度（设备已停止）
    Never,
}

impl Wakeup {
    /// 取两者中较早的一个
    pub fn min(self, other: Wakeup) -> Wakeup {
        match (self, other) {
            (Wakeup::Now, _) | (_, Wakeup::Now) => Wakeup::Now,
            (Wakeup::Never, w) | (w, Wakeup::Never) => w,
            (Wakeup::After(a), Wakeup::After(b)) => Wakeup::After(a.min(b)),
        }
    }

    /// `Never` 返回 `None`，`Now` 返回零时长
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Wakeup::Now => Some(Duration::ZERO),
            Wakeup::After(d) => Some(d),
            Wakeup::Never => None,
        }
    }
}

/// 设备通用记录
#[derive(Debug, Clone)]
pub struct DeviceCore {
    name: String,
    state: DeviceState,
    next_action: Timestamp,
}

impl DeviceCore {
    fn new(name: String) -> Self {
        Self {
            name,
            state: DeviceState::Stopped,
            next_action: Timestamp::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn set_state(&mut self, state: DeviceState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.name, self.state, state);
            self.state = state;
        }
    }

    pub fn next_action(&self) -> Timestamp {
        self.next_action
    }

    /// 在绝对时间点 `at` 唤醒
    pub fn schedule_at(&mut self, at: Timestamp) {
        self.next_action = at;
    }

    /// 在 `now` 之后 `us` 微秒唤醒
    pub fn schedule_in(&mut self, now: Timestamp, us: u64) {
        self.next_action = now.after_micros(us);
    }

    pub fn next_wait(&self, now: Timestamp) -> Wakeup {
        match self.state {
            DeviceState::Stopped => Wakeup::Never,
            DeviceState::Starting => Wakeup::Now,
            DeviceState::Started | DeviceState::Stopping => {
                let us = self.next_action.micros_since(now);
                if us == 0 {
                    Wakeup::Now
                } else {
                    Wakeup::After(Duration::from_micros(us))
                }
            },
        }
    }
}

/// 驱动行为
pub trait DeviceOps {
    /// start 时重置驱动子状态
    fn reset(&mut self);

    /// 周期动作，只在设备非 Stopped 时被调用
    ///
    /// 必须非阻塞且 O(1)，通过 `core` 设置下次唤醒时间和状态迁移。
    fn tick(&mut self, core: &mut DeviceCore, now: Timestamp) -> Result<(), DriverError>;

    /// 把所有输出线路驱动到安全电平（尽力而为）
    fn release(&mut self);
}

/// 设备：通用记录 + 独占的驱动状态
pub struct Device<D: DeviceOps> {
    core: DeviceCore,
    driver: D,
    released: bool,
}

impl<D: DeviceOps> Device<D> {
    /// 创建设备，初始为 Stopped
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        Self {
            core: DeviceCore::new(name.into()),
            driver,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> DeviceState {
        self.core.state()
    }

    pub fn next_action(&self) -> Timestamp {
        self.core.next_action()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// 请求启动，只允许在 Stopped 状态下调用
    pub fn start(&mut self) -> Result<(), DriverError> {
        if self.released {
            return Err(DriverError::Released(self.core.name.clone()));
        }
        if self.core.state != DeviceState::Stopped {
            return Err(DriverError::InvalidState {
                device: self.core.name.clone(),
                state: self.core.state,
            });
        }
        self.driver.reset();
        self.core.set_state(DeviceState::Starting);
        Ok(())
    }

    /// 请求优雅停止，Stopped / Stopping 时为空操作
    pub fn stop(&mut self) {
        match self.core.state {
            DeviceState::Stopped | DeviceState::Stopping => {},
            DeviceState::Starting | DeviceState::Started => {
                self.core.set_state(DeviceState::Stopping);
            },
        }
    }

    /// 周期动作，Stopped 时为空操作
    pub fn tick(&mut self, now: Timestamp) -> Result<(), DriverError> {
        if self.core.state == DeviceState::Stopped {
            return Ok(());
        }
        self.driver.tick(&mut self.core, now)
    }

    pub fn next_wait(&self, now: Timestamp) -> Wakeup {
        self.core.next_wait(now)
    }

    /// 立即停止：输出驱动到安全电平，状态置为 Stopped
    pub fn halt(&mut self) {
        self.driver.release();
        self.core.set_state(DeviceState::Stopped);
    }

    /// 释放设备持有的线路
    ///
    /// 非 Stopped 状态下需要 `force`，否则返回 `InvalidState`。
    /// 线路句柄本身随设备一起 drop。
    pub fn teardown(&mut self, force: bool) -> Result<(), DriverError> {
        if self.released {
            return Ok(());
        }
        if !force && self.core.state != DeviceState::Stopped {
            return Err(DriverError::InvalidState {
                device: self.core.name.clone(),
                state: self.core.state,
            });
        }
        if self.core.state != DeviceState::Stopped {
            warn!("{}: forced teardown in state {:?}", self.core.name, self.core.state);
        }
        self.driver.release();
        self.core.set_state(DeviceState::Stopped);
        self.released = true;
        debug!("{}: torn down", self.core.name);
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<D: DeviceOps> Drop for Device<D> {
    fn drop(&mut self) {
        if !self.released {
            self.driver.release();
        }
    }
}

impl<D: DeviceOps> std::fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.core.name)
            .field("state", &self.core.state)
            .field("next_action", &self.core.next_action)
            .field("released", &self.released)
            .finish()
    }
}

/// 调度器使用的对象安全接口
pub trait Schedulable {
    fn name(&self) -> &str;
    fn state(&self) -> DeviceState;
    fn next_wait(&self, now: Timestamp) -> Wakeup;
    fn tick(&mut self, now: Timestamp) -> Result<(), DriverError>;
    fn halt(&mut self);
}

impl<D: DeviceOps> Schedulable for Device<D> {
    fn name(&self) -> &str {
        Device::name(self)
    }

    fn state(&self) -> DeviceState {
        Device::state(self)
    }

    fn next_wait(&self, now: Timestamp) -> Wakeup {
        Device::next_wait(self, now)
    }

    fn tick(&mut self, now: Timestamp) -> Result<(), DriverError> {
        Device::tick(self, now)
    }

    fn halt(&mut self) {
        Device::halt(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// 每次 tick 推进一步：Starting -> Started，Stopping -> Stopped
    #[derive(Default)]
    struct Blinker {
        ticks: u32,
        resets: u32,
        releases: Rc<Cell<u32>>,
    }

    impl DeviceOps for Blinker {
        fn reset(&mut self) {
            self.resets += 1;
        }

        fn tick(&mut self, core: &mut DeviceCore, now: Timestamp) -> Result<(), DriverError> {
            self.ticks += 1;
            match core.state() {
                DeviceState::Starting => core.set_state(DeviceState::Started),
                DeviceState::Stopping => {
                    core.set_state(DeviceState::Stopped);
                    return Ok(());
                },
                _ => {},
            }
            core.schedule_in(now, 1_000);
            Ok(())
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    #[test]
    fn test_new_device_is_stopped_and_never_scheduled() {
        let mut dev = Device::new("blinker", Blinker::default());
        assert_eq!(dev.state(), DeviceState::Stopped);
        assert_eq!(dev.next_wait(Timestamp::ZERO), Wakeup::Never);

        dev.tick(Timestamp::ZERO).unwrap();
        assert_eq!(dev.driver().ticks, 0);
    }

    #[test]
    fn test_starting_waits_zero_until_first_tick() {
        let mut dev = Device::new("blinker", Blinker::default());
        dev.start().unwrap();
        assert_eq!(dev.state(), DeviceState::Starting);
        assert_eq!(dev.driver().resets, 1);
        // next_action 可能早已过去，也可能在将来，Starting 总是立即执行
        assert_eq!(dev.next_wait(Timestamp::from_micros(5)), Wakeup::Now);

        let now = Timestamp::from_micros(100);
        dev.tick(now).unwrap();
        assert_eq!(dev.state(), DeviceState::Started);
        assert_eq!(
            dev.next_wait(now),
            Wakeup::After(Duration::from_micros(1_000))
        );
        assert_eq!(dev.next_wait(now.after_micros(2_000)), Wakeup::Now);
    }

    #[test]
    fn test_start_requires_stopped() {
        let mut dev = Device::new("blinker", Blinker::default());
        dev.start().unwrap();
        let err = dev.start().unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(dev.driver().resets, 1);
    }

    #[test]
    fn test_repeated_stop_is_noop() {
        let mut dev = Device::new("blinker", Blinker::default());
        dev.stop();
        assert_eq!(dev.state(), DeviceState::Stopped);

        dev.start().unwrap();
        dev.tick(Timestamp::ZERO).unwrap();
        dev.stop();
        dev.stop();
        assert_eq!(dev.state(), DeviceState::Stopping);

        dev.tick(Timestamp::from_micros(1_000)).unwrap();
        assert_eq!(dev.state(), DeviceState::Stopped);
        dev.stop();
        assert_eq!(dev.state(), DeviceState::Stopped);
    }

    #[test]
    fn test_teardown_requires_stopped_unless_forced() {
        let releases = Rc::new(Cell::new(0));
        let mut dev = Device::new(
            "blinker",
            Blinker {
                releases: releases.clone(),
                ..Blinker::default()
            },
        );
        dev.start().unwrap();
        assert!(dev.teardown(false).unwrap_err().is_invalid_state());
        assert_eq!(releases.get(), 0);

        dev.teardown(true).unwrap();
        assert_eq!(releases.get(), 1);
        assert!(dev.is_released());
        assert!(matches!(dev.start(), Err(DriverError::Released(_))));

        // drop 不会重复释放
        drop(dev);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_drop_releases_lines() {
        let releases = Rc::new(Cell::new(0));
        {
            let _dev = Device::new(
                "blinker",
                Blinker {
                    releases: releases.clone(),
                    ..Blinker::default()
                },
            );
        }
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_wakeup_min() {
        let a = Wakeup::After(Duration::from_micros(10));
        let b = Wakeup::After(Duration::from_micros(20));
        assert_eq!(a.min(b), a);
        assert_eq!(Wakeup::Never.min(b), b);
        assert_eq!(b.min(Wakeup::Now), Wakeup::Now);
        assert_eq!(Wakeup::Never.min(Wakeup::Never), Wakeup::Never);
        assert_eq!(Wakeup::Never.as_duration(), None);
    }
}
