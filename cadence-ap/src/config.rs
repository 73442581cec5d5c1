//! Configuration management for cadence-ap
//!
//! Bootstrap configuration comes from a TOML file (see
//! [`cadence_common::config`] for how its location is resolved). Every key has
//! a built-in default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [engine]
//! load_timeout_ms = 10000
//! heartbeat_ms = 16
//! dsp_enabled = true
//!
//! [[presets]]
//! key = "club"
//! label = "Club"
//! chain = [{ kind = "equalizer", gains = [6.0, 3.0, 0.0, 1.0, 2.0] }]
//! ```

use crate::presets::EffectPreset;
use crate::recovery::RecoveryPolicy;
use crate::{Error, Result};
use cadence_common::time::millis_to_duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Presets added to the built-in catalog (same key replaces a built-in)
    #[serde(default)]
    pub presets: Vec<EffectPreset>,
}

impl TomlConfig {
    /// Resolve and load the config file, falling back to defaults
    ///
    /// `cli_path` wins over the `CADENCE_CONFIG` environment variable, which
    /// wins over the per-user config directory.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config: Self = cadence_common::config::load_or_default(cli_path)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Effective configuration rendered back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Print outbound events as JSON lines on stdout
    #[serde(default)]
    pub json_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_events: false,
        }
    }
}

impl LoggingConfig {
    /// EnvFilter directive for this config
    pub fn filter_directive(&self) -> String {
        if self.level.contains('=') {
            self.level.clone()
        } else {
            format!("cadence_ap={0},cadence_common={0}", self.level)
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Timing constants and switches for the playback engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    // === Loading ===
    pub load_timeout_ms: u64,
    pub warmup_timeout_ms: u64,
    pub warmup_min_buffer_secs: f64,
    pub warmup_poll_ms: u64,

    // === Resource ===
    pub resume_timeout_ms: u64,

    // === Periodic tasks ===
    pub heartbeat_ms: u64,
    pub buffer_poll_ms: u64,
    pub performance_window_ms: u64,
    pub error_watchdog_ms: u64,
    pub manager_watchdog_ms: u64,

    // === Recovery ===
    pub max_retries: u32,
    pub retry_step_ms: u64,
    pub error_window_ms: u64,

    // === Processing ===
    pub dsp_enabled: bool,

    // === Outbound relay ===
    pub pending_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            load_timeout_ms: 10_000,
            warmup_timeout_ms: 3_000,
            warmup_min_buffer_secs: 2.0,
            warmup_poll_ms: 100,
            resume_timeout_ms: 500,
            heartbeat_ms: 16,
            buffer_poll_ms: 1_000,
            performance_window_ms: 2_000,
            error_watchdog_ms: 2_000,
            manager_watchdog_ms: 1_000,
            max_retries: 3,
            retry_step_ms: 1_000,
            error_window_ms: 30_000,
            dsp_enabled: true,
            pending_capacity: 256,
        }
    }
}

impl EngineSettings {
    pub fn load_timeout(&self) -> Duration {
        millis_to_duration(self.load_timeout_ms)
    }

    pub fn warmup_timeout(&self) -> Duration {
        millis_to_duration(self.warmup_timeout_ms)
    }

    pub fn warmup_poll(&self) -> Duration {
        millis_to_duration(self.warmup_poll_ms.max(1))
    }

    pub fn resume_timeout(&self) -> Duration {
        millis_to_duration(self.resume_timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        millis_to_duration(self.heartbeat_ms.max(1))
    }

    pub fn buffer_poll(&self) -> Duration {
        millis_to_duration(self.buffer_poll_ms.max(1))
    }

    pub fn performance_window(&self) -> Duration {
        millis_to_duration(self.performance_window_ms.max(1))
    }

    pub fn error_watchdog(&self) -> Duration {
        millis_to_duration(self.error_watchdog_ms.max(1))
    }

    pub fn manager_watchdog(&self) -> Duration {
        millis_to_duration(self.manager_watchdog_ms.max(1))
    }

    pub fn retry_step(&self) -> Duration {
        millis_to_duration(self.retry_step_ms)
    }

    pub fn error_window(&self) -> Duration {
        millis_to_duration(self.error_window_ms)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> cadence_common::Result<()> {
        let invalid = |msg: &str| Err(cadence_common::Error::InvalidInput(msg.to_string()));
        if !self.warmup_min_buffer_secs.is_finite() || self.warmup_min_buffer_secs < 0.0 {
            return invalid("warmup_min_buffer_secs must be a non-negative number");
        }
        if self.load_timeout_ms == 0 {
            return invalid("load_timeout_ms must be greater than zero");
        }
        if self.pending_capacity == 0 {
            return invalid("pending_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_retries: self.max_retries,
            retry_step: self.retry_step(),
            error_window: self.error_window(),
            watchdog_interval: self.error_watchdog(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.load_timeout(), Duration::from_secs(10));
        assert_eq!(settings.resume_timeout(), Duration::from_millis(500));
        assert_eq!(settings.error_watchdog(), Duration::from_secs(2));
        assert_eq!(settings.max_retries, 3);
        assert!(settings.dsp_enabled);

        let policy = settings.recovery_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_step, Duration::from_secs(1));
        assert_eq!(policy.error_window, Duration::from_secs(30));
    }

    #[test]
    fn test_default_log_level() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(
            logging.filter_directive(),
            "cadence_ap=info,cadence_common=info"
        );
    }

    #[test]
    fn test_full_directive_passes_through() {
        let logging = LoggingConfig {
            level: "cadence_ap=trace".to_string(),
            json_events: false,
        };
        assert_eq!(logging.filter_directive(), "cadence_ap=trace");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nheartbeat_ms = 33\ndsp_enabled = false").unwrap();

        let config = TomlConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.heartbeat_ms, 33);
        assert!(!config.engine.dsp_enabled);
        assert_eq!(config.engine.load_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
        assert!(config.presets.is_empty());
    }

    #[test]
    fn test_presets_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[presets]]
key = "club"
label = "Club"
chain = [{{ kind = "equalizer", gains = [6.0, 3.0] }}, {{ kind = "reverb", mix = 0.2, decay = 1.0 }}]
"#
        )
        .unwrap();

        let config = TomlConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.presets[0].key, "club");
        assert_eq!(config.presets[0].chain.len(), 2);
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut config = TomlConfig::default();
        config.engine.heartbeat_ms = 20;
        config.logging.level = "debug".to_string();

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[engine]"));
        let parsed: TomlConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.engine, config.engine);
        assert_eq!(parsed.logging.level, "debug");
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(EngineSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cases = [
            EngineSettings {
                warmup_min_buffer_secs: -1.0,
                ..EngineSettings::default()
            },
            EngineSettings {
                warmup_min_buffer_secs: f64::NAN,
                ..EngineSettings::default()
            },
            EngineSettings {
                load_timeout_ms: 0,
                ..EngineSettings::default()
            },
            EngineSettings {
                pending_capacity: 0,
                ..EngineSettings::default()
            },
        ];
        for settings in cases {
            assert!(matches!(
                settings.validate(),
                Err(cadence_common::Error::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_load_rejects_invalid_engine_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\npending_capacity = 0").unwrap();

        let result = TomlConfig::load(Some(file.path()));
        assert!(matches!(
            result,
            Err(Error::Common(cadence_common::Error::InvalidInput(_)))
        ));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = TomlConfig::load(Some(Path::new("/nonexistent/cadence.toml")));
        assert!(result.is_err());
    }
}
