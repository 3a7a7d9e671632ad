//! Configuration for the reconciliation engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::settlement::DEFAULT_CURRENCY_SCALE;
use crate::types::{ReconcileError, ReconcileResult};
use crate::utils::validation::validate_currency_scale;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "HOUSEHOLDER_";

/// Which query supplies the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterSource {
    /// `Query::GetResidents`
    #[default]
    Residents,
    /// `Query::GetAllUsers`
    Users,
}

impl FromStr for RosterSource {
    type Err = ReconcileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "residents" => Ok(RosterSource::Residents),
            "users" => Ok(RosterSource::Users),
            other => Err(ReconcileError::Config(format!(
                "Unknown roster source '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RosterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RosterSource::Residents => f.write_str("residents"),
            RosterSource::Users => f.write_str("users"),
        }
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Fractional digits of the household currency (2 for cents)
    pub currency_scale: u32,

    /// Attempts per reconciliation request, counting the first one
    pub max_attempts: u32,

    /// Roster query used when computing balances
    pub roster_source: RosterSource,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            currency_scale: DEFAULT_CURRENCY_SCALE,
            max_attempts: 3,
            roster_source: RosterSource::Residents,
        }
    }
}

impl ReconcilerConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ReconcileResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> ReconcileResult<Self> {
        let config: ReconcilerConfig = toml::from_str(content)
            .map_err(|e| ReconcileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `HOUSEHOLDER_*` environment variables on top of the defaults
    pub fn from_env() -> ReconcileResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source using the environment variable names
    pub fn from_lookup<F>(lookup: F) -> ReconcileResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ReconcilerConfig::default();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(scale) = var("CURRENCY_SCALE") {
            config.currency_scale = parse_number("CURRENCY_SCALE", &scale)?;
        }

        if let Some(attempts) = var("MAX_ATTEMPTS") {
            config.max_attempts = parse_number("MAX_ATTEMPTS", &attempts)?;
        }

        if let Some(source) = var("ROSTER_SOURCE") {
            config.roster_source = source.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that values are usable
    pub fn validate(&self) -> ReconcileResult<()> {
        validate_currency_scale(self.currency_scale)?;

        if self.max_attempts == 0 {
            return Err(ReconcileError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> ReconcileResult<u32> {
    value.trim().parse().map_err(|_| {
        ReconcileError::Config(format!(
            "{}{} must be a non-negative integer, got '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.currency_scale, 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.roster_source, RosterSource::Residents);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReconcilerConfig::from_toml("roster_source = \"users\"\n").unwrap();
        assert_eq!(config.roster_source, RosterSource::Users);
        assert_eq!(config.currency_scale, 2);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HOUSEHOLDER_CURRENCY_SCALE", "0"),
            ("HOUSEHOLDER_MAX_ATTEMPTS", "5"),
            ("HOUSEHOLDER_ROSTER_SOURCE", "Users"),
        ]
        .into_iter()
        .collect();

        let config =
            ReconcilerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.currency_scale, 0);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.roster_source, RosterSource::Users);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ReconcilerConfig::from_toml("max_attempts = 0").is_err());
        assert!(ReconcilerConfig::from_toml("currency_scale = 40").is_err());
        assert!(ReconcilerConfig::from_lookup(|key| {
            (key == "HOUSEHOLDER_MAX_ATTEMPTS").then(|| "many".to_string())
        })
        .is_err());
        assert!("households".parse::<RosterSource>().is_err());
    }
}
