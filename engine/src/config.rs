//! Engine configuration.

use std::env;

/// Options for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Check records against their type's schema before writing
    pub validate_records: bool,
    /// Upper bound on index keys one mutation updates concurrently
    pub index_fanout: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            validate_records: true,
            index_fanout: 16,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// - `GROVE_VALIDATE_RECORDS`: `true`/`false` (also `1`/`0`)
    /// - `GROVE_INDEX_FANOUT`: positive integer
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let validate_records = match lookup("GROVE_VALIDATE_RECORDS") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(ConfigError::InvalidValidateRecords(raw)),
            },
            None => defaults.validate_records,
        };

        let index_fanout = match lookup("GROVE_INDEX_FANOUT") {
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .ok_or(ConfigError::InvalidIndexFanout(raw))?,
            None => defaults.index_fanout,
        };

        Ok(Self {
            validate_records,
            index_fanout,
        })
    }

    /// Builder-style setter for [`StoreConfig::validate_records`].
    pub fn with_validate_records(mut self, validate: bool) -> Self {
        self.validate_records = validate;
        self
    }

    /// Builder-style setter for [`StoreConfig::index_fanout`].
    pub fn with_index_fanout(mut self, fanout: usize) -> Self {
        self.index_fanout = fanout;
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid GROVE_VALIDATE_RECORDS value: {0}")]
    InvalidValidateRecords(String),

    #[error("Invalid GROVE_INDEX_FANOUT value: {0}")]
    InvalidIndexFanout(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn reads_variables() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("GROVE_VALIDATE_RECORDS", "false"),
            ("GROVE_INDEX_FANOUT", "4"),
        ]))
        .unwrap();
        assert!(!config.validate_records);
        assert_eq!(config.index_fanout, 4);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            StoreConfig::from_lookup(lookup(&[("GROVE_INDEX_FANOUT", "0")])).unwrap_err(),
            ConfigError::InvalidIndexFanout("0".into())
        );
        assert_eq!(
            StoreConfig::from_lookup(lookup(&[("GROVE_VALIDATE_RECORDS", "maybe")]))
                .unwrap_err(),
            ConfigError::InvalidValidateRecords("maybe".into())
        );
    }

    #[test]
    fn builder_setters() {
        let config = StoreConfig::default()
            .with_validate_records(false)
            .with_index_fanout(2);
        assert!(!config.validate_records);
        assert_eq!(config.index_fanout, 2);
    }
}
