//! Linux GPIO 字符设备后端
//!
//! 通过 `gpio-cdev` 在 `/dev/gpiochipN` 上申请单根线路的 line handle，
//! 在句柄上读写电平。句柄关闭时内核自动释放线路，登记同时注销。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **权限要求**：通常需要 `gpio` 组权限或 `sudo`

use crate::{GpioError, InputLine, LineClaim, LineClaims, LineId, LineProvider, OutputLine};
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 单根线路句柄
struct CdevLine {
    id: LineId,
    handle: LineHandle,
    _claim: LineClaim,
}

impl fmt::Debug for CdevLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdevLine").field("id", &self.id).finish_non_exhaustive()
    }
}

impl CdevLine {
    fn access_error(&self, e: gpio_cdev::Error) -> GpioError {
        GpioError::LineAccess {
            line: self.id,
            message: e.to_string(),
        }
    }

    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        self.handle
            .set_value(u8::from(high))
            .map_err(|e| self.access_error(e))
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        let value = self.handle.get_value().map_err(|e| self.access_error(e))?;
        Ok(value != 0)
    }
}

/// 字符设备输出线路
#[derive(Debug)]
pub struct CdevOutput(CdevLine);

impl OutputLine for CdevOutput {
    fn id(&self) -> LineId {
        self.0.id
    }

    fn set(&mut self, high: bool) -> Result<(), GpioError> {
        self.0.write(high)
    }
}

/// 字符设备输入线路
#[derive(Debug)]
pub struct CdevInput(CdevLine);

impl InputLine for CdevInput {
    fn id(&self) -> LineId {
        self.0.id
    }

    fn get(&mut self) -> Result<bool, GpioError> {
        self.0.read()
    }
}

/// 字符设备线路提供者
#[derive(Debug)]
pub struct CdevProvider {
    dev_root: PathBuf,
    claims: LineClaims,
}

impl Default for CdevProvider {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl CdevProvider {
    /// `dev_root` 为 `gpiochipN` 所在目录，通常是 `/dev`
    pub fn new(dev_root: impl AsRef<Path>) -> Self {
        Self {
            dev_root: dev_root.as_ref().to_path_buf(),
            claims: LineClaims::new(),
        }
    }

    fn chip_path(&self, chip: u32) -> PathBuf {
        self.dev_root.join(format!("gpiochip{}", chip))
    }

    fn request(
        &self,
        id: LineId,
        consumer: &str,
        flags: LineRequestFlags,
        initial: bool,
    ) -> Result<CdevLine, GpioError> {
        // 申请失败时 claim 随之 drop，登记自动撤销
        let claim = self.claims.claim(id)?;

        let path = self.chip_path(id.chip);
        let mut chip = Chip::new(&path).map_err(|e| GpioError::ChipOpen {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let request_error = |e: gpio_cdev::Error| GpioError::LineRequest {
            line: id,
            message: e.to_string(),
        };

        let line = chip.get_line(id.line).map_err(request_error)?;
        let info = line.info().map_err(request_error)?;
        if info.is_used() {
            warn!(
                "{} is held by another consumer ({})",
                id,
                info.consumer().unwrap_or("kernel")
            );
            return Err(GpioError::LineBusy(id));
        }

        let handle = line
            .request(flags.clone(), u8::from(initial), consumer)
            .map_err(request_error)?;
        debug!("requested {} for {} ({:?})", id, consumer, flags);
        Ok(CdevLine {
            id,
            handle,
            _claim: claim,
        })
    }
}

impl LineProvider for CdevProvider {
    fn output(
        &mut self,
        id: LineId,
        consumer: &str,
        initial: bool,
    ) -> Result<Box<dyn OutputLine>, GpioError> {
        let line = self.request(id, consumer, LineRequestFlags::OUTPUT, initial)?;
        Ok(Box::new(CdevOutput(line)))
    }

    fn input(&mut self, id: LineId, consumer: &str) -> Result<Box<dyn InputLine>, GpioError> {
        let line = self.request(id, consumer, LineRequestFlags::INPUT, false)?;
        Ok(Box::new(CdevInput(line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_chip_reports_path_and_frees_claim() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = CdevProvider::new(dir.path());
        let id = LineId::new(42, 3);

        let err = provider.output(id, "test", false).err().unwrap();
        match err {
            GpioError::ChipOpen { path, .. } => assert!(path.ends_with("gpiochip42")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!provider.claims.is_claimed(id));
        assert!(provider.claims.is_empty());
    }

    #[test]
    fn test_chip_path_under_dev_root() {
        let provider = CdevProvider::new("/tmp/gpio-root");
        assert_eq!(
            provider.chip_path(7),
            PathBuf::from("/tmp/gpio-root/gpiochip7")
        );
    }
}
