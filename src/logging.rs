use crate::config::LogLevel;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// The filter for a configured level. `RUST_LOG`, when set, replaces it.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// JSON lines on stderr with RFC 3339 timestamps. Call once, from `main`.
pub fn init(level: LogLevel) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("could not configure logger: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_follows_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(env_filter(LogLevel::Debug).to_string(), "debug");
        assert_eq!(env_filter(LogLevel::Off).to_string(), "off");
    }
}
