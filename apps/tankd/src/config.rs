//! 配置文件
//!
//! 所有字段都有默认值，默认值即参考机器人的接线。
//!
//! 查找顺序：`--config` 指定的文件，`<config_dir>/tank/tankd.toml`，内置默认值。
//!
//! ```toml
//! [track.right]
//! pwm = { chip = 7, line = 22 }
//!
//! [servos.camera_tilt]
//! line = { chip = 8, line = 8 }
//! min = 25
//! max = 160
//! default = 60
//!
//! [sonic]
//! trigger = { chip = 5, line = 1 }
//! echo = { chip = 5, line = 2 }
//!
//! [server]
//! listen = "0.0.0.0:8888"
//! keepalive_secs = 30
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tank_gpio::LineId;
use tracing::{debug, info};

/// tankd 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TankConfig {
    pub track: TrackConfig,
    pub servos: ServosConfig,
    pub indicators: IndicatorsConfig,
    /// 超声波测距模块（参考机器人上未安装）
    pub sonic: Option<SonicConfig>,
    pub server: ServerConfig,
    pub scheduler: SchedulerSection,
}

/// 一侧履带的 H 桥线路
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackSideConfig {
    pub pwm: LineId,
    /// 占空时间为负时拉高
    pub dir_a: LineId,
    /// 占空时间为正时拉高
    pub dir_b: LineId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackConfig {
    pub right: TrackSideConfig,
    pub left: TrackSideConfig,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            // PWMB, BIN1, BIN2
            right: TrackSideConfig {
                pwm: LineId::new(7, 22),
                dir_a: LineId::new(7, 8),
                dir_b: LineId::new(6, 1),
            },
            // PWMA, AIN1, AIN2
            left: TrackSideConfig {
                pwm: LineId::new(7, 7),
                dir_a: LineId::new(6, 4),
                dir_b: LineId::new(6, 3),
            },
        }
    }
}

/// 舵机线路和角度范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServoConfig {
    pub line: LineId,
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl ServoConfig {
    const fn new(chip: u32, line: u32, min: i32, max: i32, default: i32) -> Self {
        Self {
            line: LineId::new(chip, line),
            min,
            max,
            default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServosConfig {
    /// 超声波转向舵机
    pub sonic: ServoConfig,
    pub camera_pan: ServoConfig,
    pub camera_tilt: ServoConfig,
}

impl Default for ServosConfig {
    fn default() -> Self {
        Self {
            sonic: ServoConfig::new(5, 10, 0, 160, 80),
            camera_pan: ServoConfig::new(8, 6, 0, 170, 85),
            camera_tilt: ServoConfig::new(8, 8, 25, 160, 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorsConfig {
    pub red: LineId,
    pub green: LineId,
    pub blue: LineId,
    pub buzzer: LineId,
    /// 蜂鸣器低电平有效
    pub buzzer_active_low: bool,
}

impl Default for IndicatorsConfig {
    fn default() -> Self {
        Self {
            red: LineId::new(5, 15),
            green: LineId::new(5, 14),
            blue: LineId::new(5, 11),
            buzzer: LineId::new(8, 7),
            buzzer_active_low: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SonicConfig {
    pub trigger: LineId,
    pub echo: LineId,
    /// 0 为持续测量，其他值为单次
    #[serde(default)]
    pub mode: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    /// 存活检查窗口（秒）
    pub keepalive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8888".to_string(),
            keepalive_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    /// 所有设备停止时的空闲等待（毫秒）
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self { idle_sleep_ms: 10 }
    }
}

impl SchedulerSection {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tank").join("tankd.toml"))
}

impl TankConfig {
    /// 从 TOML 文本解析
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config")
    }

    /// 读取指定文件
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// 按查找顺序加载
    ///
    /// 显式指定的文件必须存在；默认位置的文件不存在时使用内置默认值。
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::from_file(&path)
            },
            Some(path) => {
                debug!("No config at {}, using built-in defaults", path.display());
                Ok(Self::default())
            },
            None => {
                debug!("No config directory, using built-in defaults");
                Ok(Self::default())
            },
        }
    }
}
