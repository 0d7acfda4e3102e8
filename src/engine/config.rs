//! Engine configuration options.

use crate::config::{ConfigError, ExchangeParams};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Exchange-wide parameters markets inherit at launch.
    pub params: ExchangeParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            params: ExchangeParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn for_tests() -> Self {
        Self {
            max_events: 10_000,
            params: ExchangeParams::testnet(),
        }
    }

    pub fn with_params(params: ExchangeParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.params.validate()
    }
}
