//! TOML 配置文件
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [behavior]
//! idle_timeout_s = 30
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! 所有字段都有默认值，空文件即默认配置。

use crate::error::ConfigError;
use crate::machine::MachineConfig;
use dashan_behavior::PtzConfig;
use dashan_link::LinkConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub serial: SerialSection,
    pub link: LinkSection,
    pub behavior: BehaviorSection,
    pub ptz: PtzSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    /// 未指定时由宿主程序选择第一个可用串口
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            read_timeout_ms: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub response_timeout_ms: u64,
    pub queue_capacity: usize,
    pub max_payload: usize,
    /// SET_STATE 是否等待固件回显
    pub confirm_state_changes: bool,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            response_timeout_ms: 2000,
            queue_capacity: 64,
            max_payload: 1024,
            confirm_state_changes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    pub idle_timeout_s: f64,
    pub wake_dwell_ms: u64,
    pub animation_hz: f64,
    pub expression_hz: f64,
    pub ptz_hz: f64,
    pub main_hz: f64,
    /// 情绪强度逼近比例
    pub transition_speed: f64,
    /// 每个主循环周期的情绪衰减量
    pub emotion_decay: f64,
    /// 合成器随机数种子，未指定时取系统熵
    pub seed: Option<u64>,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            idle_timeout_s: 30.0,
            wake_dwell_ms: 1000,
            animation_hz: 100.0,
            expression_hz: 60.0,
            ptz_hz: 60.0,
            main_hz: 10.0,
            transition_speed: 0.1,
            emotion_decay: 0.01,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PtzSection {
    pub gaze_velocity: f64,
    pub tracking_sensitivity: f64,
    pub image_width: f64,
    pub image_height: f64,
    pub target_max_age_ms: u64,
}

impl Default for PtzSection {
    fn default() -> Self {
        Self {
            gaze_velocity: 0.5,
            tracking_sensitivity: 0.3,
            image_width: 640.0,
            image_height: 480.0,
            target_max_age_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl RobotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查无法换算为时长的取值（负数、NaN、无穷）
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.machine_config()?;
        self.main_period()?;
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            response_timeout: Duration::from_millis(self.link.response_timeout_ms),
            queue_capacity: self.link.queue_capacity.max(1),
            max_payload: self.link.max_payload,
            ..LinkConfig::default()
        }
    }

    pub fn machine_config(&self) -> Result<MachineConfig, ConfigError> {
        let idle_timeout =
            Duration::try_from_secs_f64(self.behavior.idle_timeout_s).map_err(|e| ConfigError::Invalid {
                field: "behavior.idle_timeout_s",
                reason: e.to_string(),
            })?;
        Ok(MachineConfig {
            idle_timeout,
            wake_dwell: Duration::from_millis(self.behavior.wake_dwell_ms),
        })
    }

    pub fn ptz_config(&self) -> PtzConfig {
        PtzConfig {
            gaze_velocity: self.ptz.gaze_velocity,
            tracking_sensitivity: self.ptz.tracking_sensitivity,
            image_width: self.ptz.image_width,
            image_height: self.ptz.image_height,
            target_max_age: Duration::from_millis(self.ptz.target_max_age_ms),
            ..PtzConfig::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn main_period(&self) -> Result<Duration, ConfigError> {
        let hz = self.behavior.main_hz;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "behavior.main_hz",
                reason: format!("{hz} is not a positive rate"),
            });
        }
        Ok(Duration::from_secs_f64(1.0 / hz.max(1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = RobotConfig::from_toml_str("").unwrap();
        assert_eq!(config, RobotConfig::default());
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.machine_config().unwrap(), MachineConfig::default());
        let link = config.link_config();
        assert_eq!(link.response_timeout, Duration::from_secs(2));
        assert_eq!(link.max_payload, 1024);
        assert_eq!(config.ptz_config(), PtzConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = RobotConfig::from_toml_str(
            r#"
            [serial]
            port = "/dev/ttyACM0"

            [behavior]
            idle_timeout_s = 5.5
            seed = 42

            [link]
            confirm_state_changes = true
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.read_timeout_ms, 20);
        assert_eq!(config.machine_config().unwrap().idle_timeout, Duration::from_millis(5500));
        assert_eq!(config.behavior.seed, Some(42));
        assert_eq!(config.behavior.main_hz, 10.0);
        assert!(config.link.confirm_state_changes);
        assert_eq!(config.main_period().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_type_error_is_parse_error() {
        let err = RobotConfig::from_toml_str("[serial]\nbaud = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_non_finite_durations_are_rejected() {
        let err = RobotConfig::from_toml_str("[behavior]\nidle_timeout_s = inf").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "behavior.idle_timeout_s",
                ..
            }
        ));
        assert!(RobotConfig::from_toml_str("[behavior]\nidle_timeout_s = -1.0").is_err());

        let err = RobotConfig::from_toml_str("[behavior]\nmain_hz = nan").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "behavior.main_hz", .. }));

        // 命令行覆盖绕过了加载时的检查
        let mut config = RobotConfig::default();
        config.behavior.idle_timeout_s = f64::INFINITY;
        assert!(config.validate().is_err());
        assert!(config.machine_config().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = RobotConfig::load("/nonexistent/dashan.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/dashan.toml"));
    }
}
