use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod duration;


pub use duration::{format_duration, parse_duration, DurationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not parse default value for {field}: {reason}")]
    BadDefault { field: &'static str, reason: String },

    #[error("could not read specified file {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {} (try passing it through a linter): {reason}", path.display())]
    ParseError { path: PathBuf, reason: String },

    #[error("{field}: cannot use {value} as {expected}")]
    TypeMismatch {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    // tracing has nothing above error
    #[serde(alias = "fatal", alias = "panic")]
    Error,
    #[serde(alias = "disabled")]
    Off,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: LogLevel,
    pub shutdown_deadline: Duration,
    pub http: HttpConfig,
    pub https: HttpsConfig,
    /// Loaded for compatibility; the redirect decision does not consult it.
    pub destination_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub server_name: String,
    pub listen_address: String,
    pub keep_alive: bool,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsConfig {
    pub server_name: String,
    pub listen_address: String,
    pub certificate_path: String,
    pub key_path: String,
    pub is_offloaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Bool,
    Duration,
    Level,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Str => "a string",
            FieldKind::Bool => "a boolean",
            FieldKind::Duration => "a duration",
            FieldKind::Level => "a log level",
        }
    }
}

/// Every configuration key. The `match` arms below are the default table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    LogLevel,
    ShutdownDeadline,
    HttpServerName,
    HttpServerAddr,
    HttpServerKeepAlive,
    HttpReadTimeout,
    HttpWriteTimeout,
    HttpIdleTimeout,
    HttpsServerName,
    HttpsServerAddr,
    HttpsCertificatePath,
    HttpsKeyPath,
    HttpsIsOffloaded,
    DestinationHost,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::LogLevel,
        Field::ShutdownDeadline,
        Field::HttpServerName,
        Field::HttpServerAddr,
        Field::HttpServerKeepAlive,
        Field::HttpReadTimeout,
        Field::HttpWriteTimeout,
        Field::HttpIdleTimeout,
        Field::HttpsServerName,
        Field::HttpsServerAddr,
        Field::HttpsCertificatePath,
        Field::HttpsKeyPath,
        Field::HttpsIsOffloaded,
        Field::DestinationHost,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::LogLevel => "LogLevel",
            Field::ShutdownDeadline => "ShutdownDeadline",
            Field::HttpServerName => "HttpServerName",
            Field::HttpServerAddr => "HttpServerAddr",
            Field::HttpServerKeepAlive => "HttpServerKeepAlive",
            Field::HttpReadTimeout => "HttpReadTimeout",
            Field::HttpWriteTimeout => "HttpWriteTimeout",
            Field::HttpIdleTimeout => "HttpIdleTimeout",
            Field::HttpsServerName => "HttpsServerName",
            Field::HttpsServerAddr => "HttpsServerAddr",
            Field::HttpsCertificatePath => "HttpsCertificatePath",
            Field::HttpsKeyPath => "HttpsKeyPath",
            Field::HttpsIsOffloaded => "HttpsIsOffloaded",
            Field::DestinationHost => "DestinationHost",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::LogLevel => FieldKind::Level,
            Field::ShutdownDeadline
            | Field::HttpReadTimeout
            | Field::HttpWriteTimeout
            | Field::HttpIdleTimeout => FieldKind::Duration,
            Field::HttpServerKeepAlive | Field::HttpsIsOffloaded => FieldKind::Bool,
            Field::HttpServerName
            | Field::HttpServerAddr
            | Field::HttpsServerName
            | Field::HttpsServerAddr
            | Field::HttpsCertificatePath
            | Field::HttpsKeyPath
            | Field::DestinationHost => FieldKind::Str,
        }
    }

    /// Production defaults.
    pub fn default_literal(self) -> &'static str {
        match self {
            Field::LogLevel => "error",
            Field::ShutdownDeadline => "10s",
            Field::HttpServerName => "localhost.localdomain",
            Field::HttpServerAddr => ":80",
            Field::HttpServerKeepAlive => "true",
            Field::HttpReadTimeout => "10s",
            Field::HttpWriteTimeout => "10s",
            Field::HttpIdleTimeout => "30s",
            Field::HttpsServerName => "localhost.localdomain",
            Field::HttpsServerAddr => ":443",
            Field::HttpsCertificatePath => "",
            Field::HttpsKeyPath => "",
            Field::HttpsIsOffloaded => "true",
            Field::DestinationHost => "example.org",
        }
    }

    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|field| field.key().eq_ignore_ascii_case(key))
    }
}

/// A value after defaults, file and environment have been layered.
#[derive(Debug, Clone, PartialEq)]
enum Raw {
    Duration(Duration),
    Literal(String),
    File(Value),
}

impl Raw {
    fn describe(&self) -> String {
        match self {
            Raw::Duration(d) => format_duration(*d),
            Raw::Literal(s) => format!("{:?}", s),
            Raw::File(v) => v.to_string(),
        }
    }
}

/// Builds a [`Config`] from defaults, an optional file and an environment snapshot.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: fn(Field) -> &'static str,
    env: Vec<(String, String)>,
}

impl ConfigResolver {
    /// Snapshots the process environment.
    pub fn from_env() -> Self {
        Self::with_env(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    pub fn with_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env: Vec<(String, String)> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        env.sort();
        Self {
            defaults: Field::default_literal,
            env,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_defaults(mut self, defaults: fn(Field) -> &'static str) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn resolve(&self, path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut merged = self.defaults()?;

        if let Some(path) = path {
            for (field, value) in read_file(path)? {
                merged.insert(field, Raw::File(value));
            }
        }

        for field in Field::ALL {
            // env is sorted, so the first case-insensitive match is stable
            if let Some((_, value)) = self
                .env
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(field.key()))
            {
                merged.insert(field, Raw::Literal(value.clone()));
            }
        }

        decode(&merged)
    }

    fn defaults(&self) -> Result<BTreeMap<Field, Raw>, ConfigError> {
        let mut table = BTreeMap::new();
        for field in Field::ALL {
            let literal = (self.defaults)(field);
            let raw = match field.kind() {
                FieldKind::Duration => {
                    let parsed =
                        parse_duration(literal).map_err(|e| ConfigError::BadDefault {
                            field: field.key(),
                            reason: e.to_string(),
                        })?;
                    Raw::Duration(parsed)
                }
                _ => Raw::Literal(literal.to_string()),
            };
            table.insert(field, raw);
        }
        Ok(table)
    }
}

fn read_file(path: &Path) -> Result<Vec<(Field, Value)>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |reason: String| ConfigError::ParseError {
        path: path.to_path_buf(),
        reason,
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let table: BTreeMap<String, Value> = match extension.as_deref() {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
        Some("json") => {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        }
        other => {
            return Err(parse_error(format!(
                "unsupported config type {:?}, expected .toml or .json",
                other.unwrap_or("")
            )))
        }
    };

    Ok(table
        .into_iter()
        .filter_map(|(key, value)| Field::from_key(&key).map(|field| (field, value)))
        .collect())
}

fn decode(merged: &BTreeMap<Field, Raw>) -> Result<Config, ConfigError> {
    let get = |field: Field| {
        merged.get(&field).ok_or_else(|| ConfigError::BadDefault {
            field: field.key(),
            reason: "no value registered".to_string(),
        })
    };
    let string = |field| get(field).and_then(|raw| coerce_string(field, raw));
    let boolean = |field| get(field).and_then(|raw| coerce_bool(field, raw));
    let duration = |field| get(field).and_then(|raw| coerce_duration(field, raw));

    Ok(Config {
        log_level: get(Field::LogLevel).and_then(|raw| coerce_level(Field::LogLevel, raw))?,
        shutdown_deadline: duration(Field::ShutdownDeadline)?,
        http: HttpConfig {
            server_name: string(Field::HttpServerName)?,
            listen_address: string(Field::HttpServerAddr)?,
            keep_alive: boolean(Field::HttpServerKeepAlive)?,
            read_timeout: duration(Field::HttpReadTimeout)?,
            write_timeout: duration(Field::HttpWriteTimeout)?,
            idle_timeout: duration(Field::HttpIdleTimeout)?,
        },
        https: HttpsConfig {
            server_name: string(Field::HttpsServerName)?,
            listen_address: string(Field::HttpsServerAddr)?,
            certificate_path: string(Field::HttpsCertificatePath)?,
            key_path: string(Field::HttpsKeyPath)?,
            is_offloaded: boolean(Field::HttpsIsOffloaded)?,
        },
        destination_host: string(Field::DestinationHost)?,
    })
}

fn mismatch(field: Field, raw: &Raw) -> ConfigError {
    ConfigError::TypeMismatch {
        field: field.key(),
        value: raw.describe(),
        expected: field.kind().expected(),
    }
}

fn coerce_string(field: Field, raw: &Raw) -> Result<String, ConfigError> {
    match raw {
        Raw::Literal(s) | Raw::File(Value::String(s)) => Ok(s.clone()),
        Raw::File(Value::Bool(b)) => Ok(b.to_string()),
        Raw::File(Value::Number(n)) => Ok(n.to_string()),
        Raw::File(Value::Null) => Ok(String::new()),
        _ => Err(mismatch(field, raw)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn coerce_bool(field: Field, raw: &Raw) -> Result<bool, ConfigError> {
    match raw {
        Raw::File(Value::Bool(b)) => Ok(*b),
        Raw::File(Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(i != 0),
            None => Err(mismatch(field, raw)),
        },
        Raw::Literal(s) | Raw::File(Value::String(s)) => {
            parse_bool(s.trim()).ok_or_else(|| mismatch(field, raw))
        }
        _ => Err(mismatch(field, raw)),
    }
}

fn coerce_duration(field: Field, raw: &Raw) -> Result<Duration, ConfigError> {
    match raw {
        Raw::Duration(d) => Ok(*d),
        Raw::Literal(s) | Raw::File(Value::String(s)) => {
            parse_duration(s).map_err(|_| mismatch(field, raw))
        }
        // bare integers are nanoseconds
        Raw::File(Value::Number(n)) => n
            .as_u64()
            .map(Duration::from_nanos)
            .ok_or_else(|| mismatch(field, raw)),
        _ => Err(mismatch(field, raw)),
    }
}

fn coerce_level(field: Field, raw: &Raw) -> Result<LogLevel, ConfigError> {
    let text = match raw {
        Raw::Literal(s) | Raw::File(Value::String(s)) => s.trim().to_ascii_lowercase(),
        _ => return Err(mismatch(field, raw)),
    };
    if text.is_empty() {
        return Ok(LogLevel::Off);
    }
    serde_json::from_value(Value::String(text)).map_err(|_| mismatch(field, raw))
}

impl Config {
    pub fn http_enabled(&self) -> bool {
        !self.http.listen_address.is_empty()
    }

    pub fn https_enabled(&self) -> bool {
        !self.https.listen_address.is_empty()
    }
}
