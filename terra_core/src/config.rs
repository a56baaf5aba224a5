//! Engine-wide configuration.
//!
//! Every component keeps its own config struct with defaults; `EngineConfig`
//! bundles them so a whole session can be tuned from one JSON document.
//! Missing fields fall back to their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fix_gate::GateConfig;
use crate::path_tracker::TrackerConfig;
use crate::position_filter::FilterConfig;
use crate::signal_conditioner::ConditionerConfig;
use crate::territory::TerritoryConfig;

/// Errors from loading an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Configuration for every stage of a tracking session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gate: GateConfig,
    pub filter: FilterConfig,
    pub conditioner: ConditionerConfig,
    pub tracker: TrackerConfig,
    pub territory: TerritoryConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Pretty-printed JSON, suitable as a starting template.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values that would make a stage meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("gate.max_jump_m", self.gate.max_jump_m),
            ("filter.max_dt_secs", self.filter.max_dt_secs),
            ("filter.max_variance", self.filter.max_variance),
            ("conditioner.max_raw_speed_mps", self.conditioner.max_raw_speed_mps),
            ("conditioner.max_output_speed_mps", self.conditioner.max_output_speed_mps),
            ("conditioner.min_measurement_accuracy_m", self.conditioner.min_measurement_accuracy_m),
            ("tracker.min_point_spacing_m", self.tracker.min_point_spacing_m),
            ("territory.closure_distance_m", self.territory.closure_distance_m),
            ("territory.loop_threshold_m", self.territory.loop_threshold_m),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
        }

        if self.filter.decay_rate < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "filter.decay_rate must be at least 1, got {}",
                self.filter.decay_rate
            )));
        }
        if self.territory.min_loop_points < 3 {
            return Err(ConfigError::Invalid(format!(
                "territory.min_loop_points must be at least 3, got {}",
                self.territory.min_loop_points
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.conditioner.max_accuracy_m, 20.0);
        assert_eq!(config.territory.loop_threshold_m, 30.0);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{ "tracker": { "max_splice_gap_m": 80.0 }, "filter": { "decay_rate": 2.0 } }"#;
        let config = EngineConfig::from_json_str(json).unwrap();

        assert_eq!(config.tracker.max_splice_gap_m, 80.0);
        assert_eq!(config.tracker.min_point_spacing_m, 8.0);
        assert_eq!(config.filter.decay_rate, 2.0);
        assert_eq!(config.filter.process_noise, 0.5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let json = r#"{ "territory": { "loop_threshold_m": 0.0 } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(ConfigError::Invalid(_))
        ));

        let json = r#"{ "filter": { "decay_rate": 0.5 } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/terra.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_json_template_parses_back() {
        let json = EngineConfig::default().to_json_string().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), EngineConfig::default());
    }
}
