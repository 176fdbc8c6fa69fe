//! Ceph configuration file parser
//!
//! Parses Ceph-style `key = value` files with `[section]` headers and resolves
//! options with entity/section fallback (`client.admin` -> `client` -> `global`).
//! Option names treat spaces, dashes and underscores alike, so `mon host`,
//! `mon-host` and `mon_host` all name the same option.
//!
//! # Example
//!
//! ```no_run
//! use cephconfig::CephConfig;
//!
//! let config = CephConfig::from_file("/etc/ceph/ceph.conf").unwrap();
//! let sections = CephConfig::entity_sections("client.admin");
//! let mon_addrs = config.mon_addrs(&sections);
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid {expected} value for option {option}: {value:?}")]
    InvalidValue {
        option: String,
        value: String,
        expected: &'static str,
    },

    #[error("Missing required option: {0}")]
    MissingOption(String),
}

/// Trait for types that can be parsed from ceph.conf values
pub trait ConfigValue: Sized + Clone {
    /// Parse from a string value, returning `None` when malformed
    fn parse_config_value(s: &str) -> Option<Self>;

    /// Get the type name for error messages
    fn type_name() -> &'static str;
}

/// Size value in bytes (supports K, M, G, T with optional B suffix)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size(pub u64);

impl ConfigValue for Size {
    fn parse_config_value(s: &str) -> Option<Self> {
        parse_size(s).map(Size)
    }

    fn type_name() -> &'static str {
        "size"
    }
}

/// Duration value (supports time units: s, ms, us, m, h, d)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(pub std::time::Duration);

impl ConfigValue for Duration {
    fn parse_config_value(s: &str) -> Option<Self> {
        parse_duration(s).map(Duration)
    }

    fn type_name() -> &'static str {
        "duration"
    }
}

/// Count value (plain integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count(pub u64);

impl ConfigValue for Count {
    fn parse_config_value(s: &str) -> Option<Self> {
        s.trim().parse().ok().map(Count)
    }

    fn type_name() -> &'static str {
        "count"
    }
}

/// Comma or whitespace separated list of names
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct List(pub Vec<String>);

impl ConfigValue for List {
    fn parse_config_value(s: &str) -> Option<Self> {
        Some(List(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    fn type_name() -> &'static str {
        "list"
    }
}

impl ConfigValue for bool {
    fn parse_config_value(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    fn type_name() -> &'static str {
        "bool"
    }
}

impl ConfigValue for String {
    fn parse_config_value(s: &str) -> Option<Self> {
        Some(s.to_string())
    }

    fn type_name() -> &'static str {
        "string"
    }
}

/// A typed configuration option with a default value
pub struct ConfigOption<T: ConfigValue> {
    name: &'static str,
    default: T,
}

impl<T: ConfigValue> ConfigOption<T> {
    pub const fn new(name: &'static str, default: T) -> Self {
        Self { name, default }
    }

    /// Get the value from config, falling back to the default when the
    /// option is absent or malformed
    pub fn get<S: AsRef<str>>(&self, config: &CephConfig, sections: &[S]) -> T {
        self.try_get(config, sections)
            .unwrap_or_else(|_| self.default.clone())
    }

    /// Get the value from config, falling back to the default only when the
    /// option is absent
    pub fn try_get<S: AsRef<str>>(
        &self,
        config: &CephConfig,
        sections: &[S],
    ) -> Result<T, ConfigError> {
        match config.get_with_fallback(sections, self.name) {
            None => Ok(self.default.clone()),
            Some(raw) => T::parse_config_value(raw).ok_or_else(|| ConfigError::InvalidValue {
                option: self.name.to_string(),
                value: raw.to_string(),
                expected: T::type_name(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }
}

/// Check that `value` parses as `T`, for validating runtime overrides
pub fn validate<T: ConfigValue>(option: &str, value: &str) -> Result<(), ConfigError> {
    T::parse_config_value(value)
        .map(|_| ())
        .ok_or_else(|| ConfigError::InvalidValue {
            option: normalize_key(option),
            value: value.to_string(),
            expected: T::type_name(),
        })
}

/// Canonical form of an option name: trimmed, with runs of spaces, dashes
/// and underscores folded into a single underscore
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut pending_sep = false;
    for c in key.trim().chars() {
        if c == ' ' || c == '-' || c == '_' || c == '\t' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(c);
    }
    out
}

fn split_number(s: &str) -> (&str, &str) {
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (&s[..num_end], s[num_end..].trim())
}

fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().replace('_', "");
    let (num_str, unit) = split_number(&s);
    let num: f64 = num_str.parse().ok()?;

    let multiplier: u64 = match unit.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => 1 << 30,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        _ => return None,
    };

    Some((num * multiplier as f64) as u64)
}

fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let (num_str, unit) = split_number(s.trim());
    let num: f64 = num_str.parse().ok()?;

    let seconds = match unit.to_lowercase().as_str() {
        "" | "s" | "sec" | "second" | "seconds" => num,
        "ms" | "msec" | "millisecond" | "milliseconds" => num / 1000.0,
        "us" | "usec" | "microsecond" | "microseconds" => num / 1_000_000.0,
        "m" | "min" | "minute" | "minutes" => num * 60.0,
        "h" | "hr" | "hour" | "hours" => num * 3600.0,
        "d" | "day" | "days" => num * 86400.0,
        _ => return None,
    };

    Some(std::time::Duration::from_secs_f64(seconds))
}

/// Strip an inline `#` or `;` comment that follows whitespace
fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 1..bytes.len() {
        if (bytes[i] == b'#' || bytes[i] == b';') && bytes[i - 1].is_ascii_whitespace() {
            return value[..i].trim_end();
        }
    }
    value
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Represents a parsed Ceph configuration plus runtime overrides
#[derive(Debug, Clone, Default)]
pub struct CephConfig {
    sections: HashMap<String, HashMap<String, String>>,
    overrides: HashMap<String, String>,
}

impl CephConfig {
    /// Parse a Ceph configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a Ceph configuration from a string
    ///
    /// Lines outside any section belong to `global`. Anything that is not a
    /// blank line, a comment, a section header or a `key = value` pair is
    /// rejected with the offending line number.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section = String::from("global");

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::ParseError {
                    line: line_no,
                    message: format!("unterminated section header: {}", line),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::ParseError {
                        line: line_no,
                        message: "empty section name".to_string(),
                    });
                }
                current_section = name.to_string();
                sections.entry(current_section.clone()).or_default();
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::ParseError {
                line: line_no,
                message: format!("expected 'key = value', found: {}", line),
            })?;

            let key = normalize_key(key);
            if key.is_empty() {
                return Err(ConfigError::ParseError {
                    line: line_no,
                    message: "missing option name".to_string(),
                });
            }
            let value = unquote(strip_inline_comment(value.trim())).to_string();

            sections
                .entry(current_section.clone())
                .or_default()
                .insert(key, value);
        }

        Ok(Self {
            sections,
            overrides: HashMap::new(),
        })
    }

    /// Section search order for an entity: `client.admin` -> `client` -> `global`
    pub fn entity_sections(entity_name: &str) -> Vec<String> {
        let mut sections = vec![entity_name.to_string()];
        if let Some((entity_type, _)) = entity_name.split_once('.') {
            sections.push(entity_type.to_string());
        }
        if entity_name != "global" {
            sections.push("global".to_string());
        }
        sections
    }

    /// Get a configuration value from a specific section
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(&normalize_key(key)))
            .map(|v| v.as_str())
    }

    /// Get a configuration value, consulting runtime overrides first and
    /// then each section in order
    pub fn get_with_fallback<S: AsRef<str>>(&self, sections: &[S], key: &str) -> Option<&str> {
        let key = normalize_key(key);
        if let Some(value) = self.overrides.get(&key) {
            return Some(value.as_str());
        }
        sections
            .iter()
            .find_map(|section| self.sections.get(section.as_ref())?.get(&key))
            .map(|v| v.as_str())
    }

    /// Set a runtime override that takes precedence over every section
    pub fn set_override(&mut self, key: &str, value: &str) {
        self.overrides.insert(normalize_key(key), value.to_string());
    }

    /// Replace the file-derived sections, keeping runtime overrides
    pub fn replace_sections(&mut self, other: CephConfig) {
        self.sections = other.sections;
    }

    /// Monitor addresses from `mon host`
    ///
    /// Accepts the bracketed multi-protocol form
    /// `[v2:10.0.0.1:3300,v1:10.0.0.1:6789] [v2:...]` as well as plain
    /// comma-separated addresses.
    pub fn mon_addrs<S: AsRef<str>>(&self, sections: &[S]) -> Result<Vec<String>, ConfigError> {
        let mon_host = self
            .get_with_fallback(sections, "mon host")
            .ok_or_else(|| ConfigError::MissingOption("mon_host".to_string()))?;

        let addrs: Vec<String> = mon_host
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(|part| part.trim().trim_start_matches('[').trim_end_matches(']'))
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect();

        if addrs.is_empty() {
            return Err(ConfigError::MissingOption("mon_host".to_string()));
        }

        Ok(addrs)
    }

    pub fn sections(&self) -> Vec<&str> {
        self.sections.keys().map(|s| s.as_str()).collect()
    }
}

/// Define a configuration struct with typed options
///
/// # Example
///
/// ```
/// use cephconfig::{define_options, CephConfig, Count, Size};
///
/// define_options! {
///     /// Simulated OSD settings
///     pub struct OsdSettings {
///         /// Number of OSDs
///         mem_osds: Count = Count(3),
///         /// Raw capacity
///         mem_capacity: Size = Size(1 << 30),
///     }
/// }
///
/// let ceph_config = CephConfig::parse("[global]\nmem osds = 5\n").unwrap();
/// let settings = OsdSettings::try_from_ceph_config(&ceph_config, &["global"]).unwrap();
///
/// assert_eq!(settings.mem_osds.0, 5);
/// assert_eq!(settings.mem_capacity.0, 1 << 30);
/// ```
#[macro_export]
macro_rules! define_options {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Create with default values
            pub fn new() -> Self {
                Self {
                    $(
                        $field: $default,
                    )*
                }
            }

            /// Load from a config, ignoring malformed values
            pub fn from_ceph_config<S: AsRef<str>>(
                config: &$crate::CephConfig,
                sections: &[S],
            ) -> Self {
                Self {
                    $(
                        $field: $crate::ConfigOption::new(stringify!($field), $default)
                            .get(config, sections),
                    )*
                }
            }

            /// Load from a config, rejecting malformed values
            pub fn try_from_ceph_config<S: AsRef<str>>(
                config: &$crate::CephConfig,
                sections: &[S],
            ) -> Result<Self, $crate::ConfigError> {
                Ok(Self {
                    $(
                        $field: $crate::ConfigOption::new(stringify!($field), $default)
                            .try_get(config, sections)?,
                    )*
                })
            }

            /// Validate a single runtime override against the option's type
            pub fn validate_override(key: &str, value: &str) -> Result<(), $crate::ConfigError> {
                let key = $crate::normalize_key(key);
                $(
                    if key == stringify!($field) {
                        return $crate::validate::<$ty>(&key, value);
                    }
                )*
                Ok(())
            }

            /// Get option names (for introspection)
            pub fn option_names() -> &'static [&'static str] {
                &[
                    $(stringify!($field),)*
                ]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}
