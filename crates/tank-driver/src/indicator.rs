//! 开关型输出（LED / 蜂鸣器）
//!
//! 不参与调度：命令直接翻转线路电平。蜂鸣器为低电平有效。

use crate::error::DriverError;
use tank_gpio::OutputLine;
use tracing::warn;

pub struct Indicator {
    name: String,
    line: Box<dyn OutputLine>,
    active_low: bool,
    on: bool,
}

impl Indicator {
    /// 线路应已按"关闭"电平申请（低有效时为高电平）
    pub fn new(name: impl Into<String>, line: Box<dyn OutputLine>, active_low: bool) -> Self {
        Self {
            name: name.into(),
            line,
            active_low,
            on: false,
        }
    }

    /// 关闭状态对应的线路电平
    pub fn off_level(active_low: bool) -> bool {
        active_low
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn set(&mut self, on: bool) -> Result<(), DriverError> {
        self.line.set(on != self.active_low)?;
        self.on = on;
        Ok(())
    }

    /// 翻转，返回新的状态
    pub fn toggle(&mut self) -> Result<bool, DriverError> {
        self.set(!self.on)?;
        Ok(self.on)
    }

    /// 关闭（尽力而为）
    pub fn release(&mut self) {
        if let Err(e) = self.set(false) {
            warn!("{}: failed to switch off: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indicator")
            .field("name", &self.name)
            .field("line", &self.line.id())
            .field("active_low", &self.active_low)
            .field("on", &self.on)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tank_gpio::{LineId, MockOutput};

    #[test]
    fn test_led_toggle() {
        let (line, probe) = MockOutput::new(LineId::new(5, 15));
        let mut led = Indicator::new("red", Box::new(line), false);
        assert!(led.toggle().unwrap());
        assert!(probe.level());
        assert!(!led.toggle().unwrap());
        assert!(!probe.level());
    }

    #[test]
    fn test_buzzer_is_active_low() {
        let (line, probe) = MockOutput::new(LineId::new(8, 7));
        probe.set_level(Indicator::off_level(true));
        let mut buzzer = Indicator::new("buzzer", Box::new(line), true);
        assert!(probe.level());

        buzzer.toggle().unwrap();
        assert!(buzzer.is_on());
        assert!(!probe.level());

        buzzer.release();
        assert!(!buzzer.is_on());
        assert!(probe.level());
    }
}
