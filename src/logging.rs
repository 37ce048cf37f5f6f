use crate::error::ProxyError;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, Registry};

/// Handle for adjusting the global log level while the process runs.
///
/// Cloned into the config watcher so that `log_level` updates apply in
/// place, without touching the listener.
#[derive(Clone)]
pub struct LogHandle {
    reload: Option<reload::Handle<LevelFilter, Registry>>,
}

impl LogHandle {
    /// A handle with no subscriber attached. `set_level` still validates
    /// the level name; callers that own their own logging setup (tests,
    /// embedding) use this.
    pub fn disabled() -> Self {
        Self { reload: None }
    }

    pub fn set_level(&self, level: &str) -> Result<(), ProxyError> {
        let filter = parse_level(level)
            .ok_or_else(|| ProxyError::ConfigInvalid(format!("unknown log level {level}")))?;
        if let Some(handle) = &self.reload {
            handle
                .reload(filter)
                .map_err(|e| ProxyError::ConfigInvalid(format!("could not update log level: {e}")))?;
        }
        Ok(())
    }
}

/// Install the global subscriber: JSON records, level-filtered, written to
/// stderr through a non-blocking appender. Returns the reload handle used
/// for runtime log-level updates.
pub fn init() -> LogHandle {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let (filter, handle) = reload::Layer::new(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // Keep the appender guard alive for the process lifetime.
    std::mem::forget(guard);

    LogHandle {
        reload: Some(handle),
    }
}

/// Map a configured level name onto a tracing filter. FATAL has no tracing
/// equivalent and collapses to ERROR. Unknown names are rejected by config
/// validation before they reach a reload.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_uppercase().as_str() {
        "FATAL" | "ERROR" => Some(LevelFilter::ERROR),
        "WARNING" => Some(LevelFilter::WARN),
        "INFO" => Some(LevelFilter::INFO),
        "DEBUG" => Some(LevelFilter::DEBUG),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_known_names() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("info"), Some(LevelFilter::INFO));
        assert_eq!(parse_level("Warning"), Some(LevelFilter::WARN));
        assert_eq!(parse_level("ERROR"), Some(LevelFilter::ERROR));
        assert_eq!(parse_level("FATAL"), Some(LevelFilter::ERROR));
    }

    #[test]
    fn test_parse_level_unknown() {
        assert_eq!(parse_level("TRACE"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_disabled_handle_still_validates() {
        let handle = LogHandle::disabled();
        assert!(handle.set_level("INFO").is_ok());
        assert!(handle.set_level("VERBOSE").is_err());
    }
}
