//! # Tank GPIO Layer
//!
//! 数字线路抽象层：驱动只依赖"设置一根输出线"和"读取一根输入线"两个能力。
//!
//! ## 后端
//!
//! - `cdev`: Linux GPIO 字符设备（`/dev/gpiochipN`，基于 `gpio-cdev`）
//! - `mock`: 无硬件依赖，线路电平通过 [`MockProbe`] 观察和注入
//!
//! ## 独占
//!
//! 每根线路同一时间只能被一个持有者申请，重复申请返回 [`GpioError::LineBusy`]。
//! 线路句柄在 drop 时释放，登记随之注销。

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod cdev;

#[cfg(target_os = "linux")]
pub use cdev::CdevProvider;

pub mod mock;

pub use mock::{MockInput, MockOutput, MockProbe, MockProvider};

/// GPIO 层统一错误类型
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {path}: {message}")]
    ChipOpen { path: String, message: String },

    #[error("Failed to request line {line}: {message}")]
    LineRequest { line: LineId, message: String },

    #[error("Failed to access line {line}: {message}")]
    LineAccess { line: LineId, message: String },

    #[error("Line {0} is already claimed")]
    LineBusy(LineId),

    #[error("GPIO backend not supported on this platform")]
    Unsupported,
}

/// 物理线路编号（芯片号 + 芯片内偏移）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineId {
    pub chip: u32,
    pub line: u32,
}

impl LineId {
    pub const fn new(chip: u32, line: u32) -> Self {
        Self { chip, line }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpiochip{}/{}", self.chip, self.line)
    }
}

/// 输出线路
pub trait OutputLine {
    fn id(&self) -> LineId;
    /// 设置电平，`true` 为高
    fn set(&mut self, high: bool) -> Result<(), GpioError>;
}

/// 输入线路
pub trait InputLine {
    fn id(&self) -> LineId;
    /// 读取电平，`true` 为高
    fn get(&mut self) -> Result<bool, GpioError>;
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn id(&self) -> LineId {
        (**self).id()
    }

    fn set(&mut self, high: bool) -> Result<(), GpioError> {
        (**self).set(high)
    }
}

impl<T: InputLine + ?Sized> InputLine for Box<T> {
    fn id(&self) -> LineId {
        (**self).id()
    }

    fn get(&mut self) -> Result<bool, GpioError> {
        (**self).get()
    }
}

/// 线路申请接口
///
/// `consumer` 是写入内核的使用者标签，便于 `gpioinfo` 等工具识别。
pub trait LineProvider {
    fn output(
        &mut self,
        id: LineId,
        consumer: &str,
        initial: bool,
    ) -> Result<Box<dyn OutputLine>, GpioError>;

    fn input(&mut self, id: LineId, consumer: &str) -> Result<Box<dyn InputLine>, GpioError>;
}

/// 已申请线路登记表
///
/// 克隆共享同一张表。[`LineClaims::claim`] 返回的 [`LineClaim`] 在 drop 时注销线路，
/// 线路句柄持有它，句柄释放后同一根线路可以再次申请。
#[derive(Debug, Clone, Default)]
pub struct LineClaims {
    claimed: Rc<RefCell<HashSet<LineId>>>,
}

impl LineClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一根线路，已登记则返回 `LineBusy`
    pub fn claim(&self, id: LineId) -> Result<LineClaim, GpioError> {
        if self.claimed.borrow_mut().insert(id) {
            Ok(LineClaim {
                id,
                claims: self.clone(),
            })
        } else {
            Err(GpioError::LineBusy(id))
        }
    }

    pub fn is_claimed(&self, id: LineId) -> bool {
        self.claimed.borrow().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.claimed.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.borrow().is_empty()
    }
}

/// 一根线路的登记，drop 时注销
#[derive(Debug)]
pub struct LineClaim {
    id: LineId,
    claims: LineClaims,
}

impl LineClaim {
    pub fn id(&self) -> LineId {
        self.id
    }
}

impl Drop for LineClaim {
    fn drop(&mut self) {
        self.claims.claimed.borrow_mut().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_id_display() {
        assert_eq!(LineId::new(7, 22).to_string(), "gpiochip7/22");
    }

    #[test]
    fn test_claims_reject_duplicates() {
        let claims = LineClaims::new();
        let id = LineId::new(5, 10);
        let claim = claims.claim(id).unwrap();
        assert_eq!(claim.id(), id);
        assert!(matches!(claims.claim(id), Err(GpioError::LineBusy(busy)) if busy == id));
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_dropped_claim_frees_line() {
        let claims = LineClaims::new();
        let id = LineId::new(5, 10);
        let shared = claims.clone();

        let claim = claims.claim(id).unwrap();
        assert!(shared.is_claimed(id));
        drop(claim);
        assert!(!shared.is_claimed(id));
        assert!(claims.is_empty());

        let _again = shared.claim(id).unwrap();
        assert!(claims.is_claimed(id));
    }

    #[test]
    fn test_gpio_error_display() {
        let err = GpioError::LineBusy(LineId::new(8, 7));
        assert_eq!(err.to_string(), "Line gpiochip8/7 is already claimed");

        let err = GpioError::LineRequest {
            line: LineId::new(6, 1),
            message: "EINVAL".into(),
        };
        assert!(err.to_string().contains("gpiochip6/1"));
    }
}
