use std::str::FromStr;

use hashbrown::HashMap;
use serde::Deserialize;

use crate::ConfigError;

const SETTING_LOG_LEVEL: &str = "logLevel";
const SETTING_LOG_LEVEL_DEFAULT: &str = "INFO";

/// String-keyed writer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Settings(HashMap<String, String>);

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Settings::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// # Errors
    ///
    /// Errors if `key` is absent.
    pub fn required(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingField(key))
    }

    /// # Errors
    ///
    /// Errors if `key` is absent or does not parse.
    pub fn parse_required<T: FromStr>(&self, key: &'static str) -> Result<T, ConfigError> {
        parse(key, self.required(key)?)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// # Errors
    ///
    /// Errors if `key` is present but does not parse.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| parse(key, raw))
    }

    /// # Errors
    ///
    /// Errors if `key` is present but does not parse.
    pub fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key).map(|raw| parse(key, raw)).transpose()
    }

    /// The writer's `logLevel`, `INFO` when unset.
    #[must_use]
    pub fn log_level(&self) -> &str {
        self.get_or(SETTING_LOG_LEVEL, SETTING_LOG_LEVEL_DEFAULT)
    }

    /// Splits a `,`, `;` or newline delimited setting into trimmed, non-empty items.
    #[must_use]
    pub fn delimited_list(&self, key: &str) -> Vec<&str> {
        self.get(key).map_or_else(Vec::new, |raw| {
            raw.split([',', ';', '\n'])
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect()
        })
    }
}

impl<K, V> FromIterator<(K, V)> for Settings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
