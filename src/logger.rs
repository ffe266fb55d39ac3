//! Dynamic log levels.
//!
//! A level for `a.b.c` is looked up as `log-level.a.b.c`, then
//! `log-level.a.b`, `log-level.a` and finally `log-level`. The first
//! configured level wins; otherwise the caller's default applies.

use std::fmt;
use std::str::FromStr;

use crate::codec::ConfigValue;

/// Prefix of every log-level config key.
pub const LOG_LEVEL_PREFIX: &str = "log-level";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Numeric level; a message is emitted when its level is at least the
    /// configured one.
    pub fn level(self) -> u8 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 2,
            Severity::Info => 3,
            Severity::Warn => 5,
            Severity::Error => 6,
            Severity::Fatal => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level `{0}`")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Severity::Trace),
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

/// Keys consulted for `logger_name`, most specific first.
pub fn lookup_keys(logger_name: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut name = logger_name.trim_matches('.');
    while !name.is_empty() {
        keys.push(format!("{}.{}", LOG_LEVEL_PREFIX, name));
        name = match name.rfind('.') {
            Some(idx) => &name[..idx],
            None => "",
        };
    }
    keys.push(LOG_LEVEL_PREFIX.to_string());
    keys
}

/// Whether a message at `desired` should be emitted by `logger_name`.
///
/// `lookup` resolves a config key. A configured level that is not a known
/// severity word suppresses logging.
pub fn should_log<F>(logger_name: &str, desired: Severity, default: Severity, lookup: F) -> bool
where
    F: Fn(&str) -> Option<ConfigValue>,
{
    for key in lookup_keys(logger_name) {
        let Some(value) = lookup(&key) else {
            continue;
        };
        return match value.as_str().map(str::parse::<Severity>) {
            Some(Ok(configured)) => desired.level() >= configured.level(),
            _ => false,
        };
    }
    desired.level() >= default.level()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn levels(entries: &[(&str, &str)]) -> HashMap<String, ConfigValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), ConfigValue::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_lookup_keys_walk_up() {
        assert_eq!(
            lookup_keys("example.nested.path"),
            vec![
                "log-level.example.nested.path",
                "log-level.example.nested",
                "log-level.example",
                "log-level",
            ]
        );
        assert_eq!(lookup_keys(""), vec!["log-level"]);
    }

    #[test]
    fn test_uses_default_when_unconfigured() {
        let configs = levels(&[]);
        let lookup = |k: &str| configs.get(k).cloned();
        assert!(should_log("a.b", Severity::Warn, Severity::Warn, lookup));
        assert!(!should_log("a.b", Severity::Info, Severity::Warn, lookup));
    }

    #[test]
    fn test_most_specific_level_wins() {
        let configs = levels(&[
            ("log-level", "ERROR"),
            ("log-level.example", "INFO"),
            ("log-level.example.nested", "DEBUG"),
        ]);
        let lookup = |k: &str| configs.get(k).cloned();

        assert!(should_log("example.nested.path", Severity::Debug, Severity::Error, lookup));
        assert!(!should_log("example.nested.path", Severity::Trace, Severity::Error, lookup));
        assert!(should_log("example.other", Severity::Info, Severity::Error, lookup));
        assert!(!should_log("example.other", Severity::Debug, Severity::Error, lookup));
        assert!(!should_log("unrelated", Severity::Warn, Severity::Trace, lookup));
        assert!(should_log("unrelated", Severity::Fatal, Severity::Trace, lookup));
    }

    #[test]
    fn test_unknown_level_suppresses() {
        let configs = levels(&[("log-level.noisy", "LOUD")]);
        let lookup = |k: &str| configs.get(k).cloned();
        assert!(!should_log("noisy", Severity::Fatal, Severity::Trace, lookup));
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warn));
        assert_eq!(" FATAL ".parse::<Severity>(), Ok(Severity::Fatal));
        assert!("verbose".parse::<Severity>().is_err());
    }
}
