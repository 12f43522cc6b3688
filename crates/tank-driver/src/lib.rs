//! 驱动层模块
//!
//! 本模块在没有硬件 PWM 的情况下，用单线程协作式调度生成所有周期波形：
//! - 设备抽象（生命周期 + 调度记录）
//! - 协作式调度器（每轮一次读时钟、一次等待）
//! - 履带、舵机、超声波三个状态机
//! - LED / 蜂鸣器开关输出
//!
//! 所有驱动只依赖"设置一根线路"和"读取单调时钟"两个能力。
//! 命令通过 setter 只更新目标值，实际电平只在调度器的 tick 中改变。

pub mod clock;
pub mod device;
mod error;
pub mod indicator;
pub mod scheduler;
pub mod servo;
pub mod sonic;
pub mod track;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use device::{Device, DeviceCore, DeviceOps, DeviceState, Schedulable, Wakeup};
pub use error::DriverError;
pub use indicator::Indicator;
#[cfg(feature = "realtime")]
pub use scheduler::raise_thread_priority;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats, Sleeper, SpinSleeper};
pub use servo::{ServoAngle, ServoBounds};
pub use sonic::{SampleWindow, SonicMode, SonicPhase, SonicRange, distance_cm};
pub use track::{DriveCommand, TrackDrive, TrackSide, drive_step};
