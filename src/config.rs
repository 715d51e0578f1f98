// src/config.rs
//! Bridge configuration, loaded from JSON.
//!
//! Every field has a default, so an empty object (or no file at all) gives the
//! stock behaviour. `HAIR_BRIDGE_CONFIG` names a file to load at initialize.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::frame::DEFAULT_SHUTDOWN_GRACE;
use crate::sdk::ConversionSettings;
use crate::skinning::DEFAULT_CAPACITY;

pub const CONFIG_ENV_VAR: &str = "HAIR_BRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Matrices held by the async skinning ring.
    pub skinning_capacity: usize,
    /// Flushes discarded per pipeline after the shutdown flag.
    pub shutdown_grace_frames: u32,
    /// Load every asset left-handed, Y-up regardless of the caller's settings.
    pub force_engine_conversion: bool,
    /// Depth compare greater-equal instead of less-equal.
    pub reverse_z: bool,
    pub log_level: String,
    pub hot_reload_shaders: bool,
    pub hot_reload_debounce_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            skinning_capacity: DEFAULT_CAPACITY,
            shutdown_grace_frames: DEFAULT_SHUTDOWN_GRACE,
            force_engine_conversion: true,
            reverse_z: true,
            log_level: "info".into(),
            hot_reload_shaders: false,
            hot_reload_debounce_ms: 150,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing bridge config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading bridge config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Defaults when the env var is unset; an error if it names a bad file.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.skinning_capacity == 0 {
            anyhow::bail!("skinning_capacity must be > 0");
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| anyhow::anyhow!("unknown log_level {:?}", self.log_level))
    }

    pub fn hot_reload_debounce(&self) -> Duration {
        Duration::from_millis(self.hot_reload_debounce_ms)
    }

    /// Settings actually handed to the SDK for a load request.
    pub fn effective_conversion(&self, requested: ConversionSettings) -> ConversionSettings {
        if self.force_engine_conversion {
            ConversionSettings::engine()
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(BridgeConfig::from_json_str("{}").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn partial_override() {
        let cfg = BridgeConfig::from_json_str(
            r#"{ "skinning_capacity": 64, "reverse_z": false, "log_level": "debug" }"#,
        )
        .unwrap();
        assert_eq!(cfg.skinning_capacity, 64);
        assert!(!cfg.reverse_z);
        assert_eq!(cfg.level_filter().unwrap(), LevelFilter::Debug);
        assert_eq!(cfg.shutdown_grace_frames, 2);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BridgeConfig::from_json_str(r#"{ "skinning_capacity": 0 }"#).is_err());
        assert!(BridgeConfig::from_json_str(r#"{ "log_level": "loud" }"#).is_err());
        assert!(BridgeConfig::from_json_str(r#"{ "skinning": 5 }"#).is_err());
    }

    #[test]
    fn forced_conversion_overrides_request() {
        let requested = ConversionSettings {
            scene_unit: 100.0,
            ..Default::default()
        };
        let forced = BridgeConfig::default();
        assert_eq!(forced.effective_conversion(requested), ConversionSettings::engine());

        let passthrough = BridgeConfig {
            force_engine_conversion: false,
            ..Default::default()
        };
        assert_eq!(passthrough.effective_conversion(requested), requested);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = BridgeConfig::from_path("/nonexistent/hair_bridge.json").unwrap_err();
        assert!(err.to_string().contains("reading bridge config"));
    }
}
