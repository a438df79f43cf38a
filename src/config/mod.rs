//! # config
//!
//! Analysis knobs. Defaults can be overridden by environment variables,
//! and the driver overrides those with command-line flags.

use std::env;

use thiserror::Error;

pub const MAX_DEPTH_VAR: &str = "FUNCPTR_MAX_DEPTH";
pub const ROUNDS_VAR: &str = "FUNCPTR_ROUNDS";
pub const OPAQUE_VAR: &str = "FUNCPTR_OPAQUE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: expected a non-negative integer")]
    InvalidNumber { key: &'static str, value: String },

    #[error("rounds must be at least 1")]
    ZeroRounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// How many callee bodies may be nested below one top-level function visit.
    pub max_call_depth: usize,
    /// Number of passes over the whole module.
    pub rounds: usize,
    /// Allocation primitives whose return value is not propagated.
    pub opaque_functions: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 32,
            rounds: 1,
            opaque_functions: vec!["malloc".to_owned()],
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, e.g. `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(MAX_DEPTH_VAR) {
            config.max_call_depth = parse_number(MAX_DEPTH_VAR, &value)?;
        }
        if let Some(value) = lookup(ROUNDS_VAR) {
            config.rounds = parse_number(ROUNDS_VAR, &value)?;
        }
        if let Some(value) = lookup(OPAQUE_VAR) {
            config.opaque_functions = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        Ok(())
    }

    pub fn is_opaque(&self, name: &str) -> bool {
        self.opaque_functions.iter().any(|opaque| opaque == name)
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_owned(),
        })
}
