//! 驱动层错误类型定义

use crate::device::DeviceState;
use tank_gpio::GpioError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 当前状态不允许该操作（如对非 Stopped 设备 start）
    ///
    /// 调用方可以安全忽略，从不致命。
    #[error("Device '{device}' rejected request in state {state:?}")]
    InvalidState { device: String, state: DeviceState },

    /// 舵机角度范围无效
    #[error("Invalid servo bounds: min={min}, default={default}, max={max}")]
    InvalidBounds { min: i32, default: i32, max: i32 },

    /// 设备已经 teardown
    #[error("Device '{0}' has been torn down")]
    Released(String),

    /// GPIO 错误
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),
}

impl DriverError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}
