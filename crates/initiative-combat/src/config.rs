//! Tracker settings.
//!
//! Settings come from a YAML document, from `INITIATIVE_*` environment
//! variables, or from defaults. Missing values fall back to the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the default initiative formula.
pub const ENV_FORMULA: &str = "INITIATIVE_FORMULA";
/// Environment variable enabling `skip_defeated`.
pub const ENV_SKIP_DEFEATED: &str = "INITIATIVE_SKIP_DEFEATED";
/// Environment variable holding the per-roll timeout in milliseconds.
pub const ENV_ROLL_TIMEOUT_MS: &str = "INITIATIVE_ROLL_TIMEOUT_MS";
/// Environment variable bounding concurrent rolls.
pub const ENV_MAX_CONCURRENT_ROLLS: &str = "INITIATIVE_MAX_CONCURRENT_ROLLS";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is present but unusable.
    #[error("configuration error: {0}")]
    Invalid(String),

    /// The settings document could not be parsed.
    #[error("settings document error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Settings for encounter tracking and initiative rolling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatSettings {
    /// Formula rolled when a request does not name one.
    pub initiative_formula: String,
    /// Turn movement skips defeated combatants.
    pub skip_defeated: bool,
    /// Per-roll timeout; `None` waits indefinitely.
    pub roll_timeout_ms: Option<u64>,
    /// Upper bound on rolls in flight for one batch.
    pub max_concurrent_rolls: usize,
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            initiative_formula: "1d20".to_owned(),
            skip_defeated: false,
            roll_timeout_ms: None,
            max_concurrent_rolls: 8,
        }
    }
}

impl CombatSettings {
    /// Parses settings from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Yaml` if the document is malformed and
    /// `ConfigError::Invalid` if a value fails validation.
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(document)?;
        settings.validate()
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(formula) = lookup(ENV_FORMULA) {
            settings.initiative_formula = formula;
        }
        if let Some(raw) = lookup(ENV_SKIP_DEFEATED) {
            settings.skip_defeated = parse_bool(ENV_SKIP_DEFEATED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ROLL_TIMEOUT_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid(format!("{ENV_ROLL_TIMEOUT_MS} must be a valid u64: {e}"))
            })?;
            settings.roll_timeout_ms = Some(millis);
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_ROLLS) {
            settings.max_concurrent_rolls = raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::Invalid(format!(
                    "{ENV_MAX_CONCURRENT_ROLLS} must be a valid usize: {e}"
                ))
            })?;
        }

        settings.validate()
    }

    /// The per-roll timeout as a `Duration`.
    #[must_use]
    pub fn roll_timeout(&self) -> Option<Duration> {
        self.roll_timeout_ms.map(Duration::from_millis)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.initiative_formula.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "initiative formula must not be empty".to_owned(),
            ));
        }
        if self.max_concurrent_rolls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_rolls must be at least 1".to_owned(),
            ));
        }
        if self.roll_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "roll_timeout_ms must be greater than 0".to_owned(),
            ));
        }
        Ok(self)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{key} must be a boolean, got `{other}`"
        ))),
    }
}
