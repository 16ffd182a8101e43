use crate::core::errors::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Configuration for flow execution behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flow-level deadline in seconds; setting it switches the runner to
    /// parallel scheduling
    #[serde(default)]
    pub flow_timeout_secs: Option<u64>,
    /// Maximum number of node tasks running at once in parallel mode
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
    /// Capacity of the bounded result sink between node tasks and the runner
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,
    /// Default tool-call loop budget of AI nodes
    #[serde(default = "default_ai_max_iterations")]
    pub ai_max_iterations: usize,
    /// Upper bound on a single HTTP exchange
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long resolved secrets stay cached
    #[serde(default = "default_secret_cache_ttl_secs")]
    pub secret_cache_ttl_secs: u64,
    /// How long request nodes wait for the persistence acknowledgement
    #[serde(default = "default_side_channel_ack_timeout_secs")]
    pub side_channel_ack_timeout_secs: u64,
}

fn default_max_parallel_nodes() -> usize {
    16
}

fn default_result_buffer() -> usize {
    64
}

fn default_ai_max_iterations() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_secret_cache_ttl_secs() -> u64 {
    300
}

fn default_side_channel_ack_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flow_timeout_secs: None,
            max_parallel_nodes: default_max_parallel_nodes(),
            result_buffer: default_result_buffer(),
            ai_max_iterations: default_ai_max_iterations(),
            request_timeout_secs: default_request_timeout_secs(),
            secret_cache_ttl_secs: default_secret_cache_ttl_secs(),
            side_channel_ack_timeout_secs: default_side_channel_ack_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.flow_timeout_secs {
            if timeout == 0 {
                return Err(FlowError::configuration(
                    "flow_timeout_secs must be greater than 0",
                ));
            }
            if timeout > MAX_TIMEOUT_SECS {
                return Err(FlowError::configuration(
                    "flow_timeout_secs cannot exceed 24 hours",
                ));
            }
        }
        if self.max_parallel_nodes == 0 {
            return Err(FlowError::configuration(
                "max_parallel_nodes must be greater than 0",
            ));
        }
        if self.result_buffer == 0 {
            return Err(FlowError::configuration(
                "result_buffer must be greater than 0",
            ));
        }
        if self.ai_max_iterations == 0 {
            return Err(FlowError::configuration(
                "ai_max_iterations must be greater than 0",
            ));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(FlowError::configuration(
                "request_timeout_secs must be between 1 second and 24 hours",
            ));
        }
        if self.side_channel_ack_timeout_secs == 0 {
            return Err(FlowError::configuration(
                "side_channel_ack_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Merges two configurations, with `override_with` taking precedence
    /// wherever it differs from the defaults.
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let defaults = Self::default();
        let pick = |over: u64, base: u64, default: u64| if over != default { over } else { base };
        let pick_usize =
            |over: usize, base: usize, default: usize| if over != default { over } else { base };

        let merged = Self {
            flow_timeout_secs: override_with.flow_timeout_secs.or(base.flow_timeout_secs),
            max_parallel_nodes: pick_usize(
                override_with.max_parallel_nodes,
                base.max_parallel_nodes,
                defaults.max_parallel_nodes,
            ),
            result_buffer: pick_usize(
                override_with.result_buffer,
                base.result_buffer,
                defaults.result_buffer,
            ),
            ai_max_iterations: pick_usize(
                override_with.ai_max_iterations,
                base.ai_max_iterations,
                defaults.ai_max_iterations,
            ),
            request_timeout_secs: pick(
                override_with.request_timeout_secs,
                base.request_timeout_secs,
                defaults.request_timeout_secs,
            ),
            secret_cache_ttl_secs: pick(
                override_with.secret_cache_ttl_secs,
                base.secret_cache_ttl_secs,
                defaults.secret_cache_ttl_secs,
            ),
            side_channel_ack_timeout_secs: pick(
                override_with.side_channel_ack_timeout_secs,
                base.side_channel_ack_timeout_secs,
                defaults.side_channel_ack_timeout_secs,
            ),
        };

        merged.validate()?;
        Ok(merged)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file
    pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn flow_timeout(&self) -> Option<Duration> {
        self.flow_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn secret_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_cache_ttl_secs)
    }

    pub fn side_channel_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.side_channel_ack_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flow_timeout(), None);
        assert_eq!(config.ai_max_iterations, 5);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = EngineConfig {
            flow_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_parallel_nodes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            flow_timeout_secs: Some(MAX_TIMEOUT_SECS + 1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_override() {
        let base = EngineConfig {
            flow_timeout_secs: Some(30),
            max_parallel_nodes: 4,
            ..Default::default()
        };
        let over = EngineConfig {
            ai_max_iterations: 9,
            ..Default::default()
        };
        let merged = EngineConfig::merge(&base, &over).unwrap();
        assert_eq!(merged.flow_timeout_secs, Some(30));
        assert_eq!(merged.max_parallel_nodes, 4);
        assert_eq!(merged.ai_max_iterations, 9);
    }

    #[test]
    fn test_yaml_loading() {
        let config = EngineConfig::from_yaml_str(
            "flow_timeout_secs: 10\nmax_parallel_nodes: 2\n",
        )
        .unwrap();
        assert_eq!(config.flow_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.max_parallel_nodes, 2);
        assert_eq!(config.result_buffer, 64);

        assert!(EngineConfig::from_yaml_str("result_buffer: 0\n").is_err());
    }
}
