use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use wildmatch::WildMatch;

use crate::ConfigError;

/// Name of a managed object, or a pattern selecting several of them.
///
/// The textual form is `domain:key=value[,key=value...]`. Wildcards (`*`, `?`) are accepted in
/// the domain and in unquoted property values, and a trailing `*` entry in the property list
/// allows the matched object to carry extra properties (e.g. `java.lang:type=GarbageCollector,*`).
///
/// A value may be quoted (`name="a,b"`, with `\"` escaping a quote). Quoted values keep their
/// quotes and always match literally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName {
    domain: String,
    properties: BTreeMap<String, String>,
    property_list_pattern: bool,
}

impl ObjectName {
    /// Parses an object name or pattern.
    ///
    /// # Errors
    ///
    /// Errors if the name has no domain separator, an empty property list, an unterminated or
    /// misplaced quote, a property without `=`, an empty key or a duplicate key.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidObjectName {
            name: raw.to_string(),
            reason: reason.to_string(),
        };

        let (domain, property_list) = raw.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        if property_list.is_empty() {
            return Err(invalid("empty property list"));
        }

        let mut properties = BTreeMap::new();
        let mut property_list_pattern = false;
        let entries = split_properties(property_list).ok_or_else(|| invalid("unterminated quote"))?;
        for entry in entries {
            if entry == "*" {
                property_list_pattern = true;
                continue;
            }

            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| invalid(&format!("property '{entry}' has no '='")))?;
            if key.is_empty() {
                return Err(invalid("empty property key"));
            }
            if value.starts_with('"') && !is_quoted(value) {
                return Err(invalid(&format!("property '{key}' has text after its closing quote")));
            }
            if properties.insert(key.to_string(), value.to_string()).is_some() {
                return Err(invalid(&format!("duplicate property key '{key}'")));
            }
        }

        Ok(ObjectName { domain: domain.to_string(), properties, property_list_pattern })
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Key properties, sorted by key.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns `true` if this name contains any wildcard.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.property_list_pattern
            || has_wildcard(&self.domain)
            || self
                .properties
                .values()
                .any(|value| !is_quoted(value) && has_wildcard(value))
    }

    /// Checks whether the concrete `name` is selected by this pattern.
    ///
    /// A non-pattern name only matches itself.
    #[must_use]
    pub fn matches(&self, name: &ObjectName) -> bool {
        if !WildMatch::new(&self.domain).matches(&name.domain) {
            return false;
        }

        if !self.property_list_pattern && self.properties.len() != name.properties.len() {
            return false;
        }

        self.properties.iter().all(|(key, pattern)| {
            name.properties
                .get(key)
                .is_some_and(|value| match is_quoted(pattern) {
                    true => pattern == value,
                    false => WildMatch::new(pattern).matches(value),
                })
        })
    }

    /// Canonical form: properties sorted by key, property-list wildcard last.
    #[must_use]
    pub fn canonical(&self) -> String {
        let properties = self
            .properties
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .chain(self.property_list_pattern.then(|| "*".to_string()))
            .join(",");

        format!("{}:{properties}", self.domain)
    }
}

impl FromStr for ObjectName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectName::parse(s)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

/// Splits a property list on the commas outside quoted values; `None` if a quote is left open.
fn split_properties(list: &str) -> Option<Vec<&str>> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in list.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                entries.push(&list[start..i]);
                start = i.saturating_add(1);
            }
            _ => {}
        }
    }
    if quoted {
        return None;
    }
    entries.push(&list[start..]);

    Some(entries)
}

/// `"..."` with its closing quote last and unescaped.
fn is_quoted(value: &str) -> bool {
    let Some(inner) = value.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) else {
        return false;
    };

    let mut escaped = false;
    for c in inner.chars() {
        match (escaped, c) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, '"') => return false,
            (false, _) => {}
        }
    }

    !escaped
}
