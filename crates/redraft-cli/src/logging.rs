#![forbid(unsafe_code)]

//! Subscriber setup for the binary. Library crates only emit events.

use tracing_subscriber::EnvFilter;

use crate::error::{CliError, Result};

/// Filter used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "redraft=warn";

/// Resolve the filter: an explicit level wins over `RUST_LOG`.
pub fn filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|err| CliError::invalid(format!("log level '{level}': {err}"))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install a stderr `fmt` subscriber. Returns `false` if one was already set.
pub fn init(level: Option<&str>) -> Result<bool> {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_is_parsed() {
        assert!(filter(Some("redraft.executor=debug,info")).is_ok());
    }

    #[test]
    fn malformed_level_is_rejected() {
        let err = filter(Some("redraft=loud")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn init_is_idempotent() {
        init(Some("off")).unwrap();
        assert!(!init(Some("off")).unwrap());
    }
}
