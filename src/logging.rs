//! Logging and tracing initialization for mangahubd.
//!
//! Structured logging through the `tracing` ecosystem, either as pretty
//! console output or as JSON lines for log aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Call once from `main()` after the configuration is loaded. `RUST_LOG`
/// overrides the default filter at runtime. A second call is a no-op.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mangahubd={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Rate limiter for log lines that can fire once per message under load,
/// such as event-queue overflow or junk datagrams.
///
/// Calls that are throttled are counted, and the count is handed back on the
/// next call that is allowed through so the log line can report it.
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or `NEVER_LOGGED`
    last_log_ms: AtomicU64,
    suppressed: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            suppressed: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Returns `Some(suppressed)` when the caller should log now, where
    /// `suppressed` is the number of calls swallowed since the last one.
    pub fn check(&self) -> Option<u64> {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let due = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;

        if due
            && self
                .last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Allow the next call through immediately.
    pub fn reset(&self) {
        self.last_log_ms.store(NEVER_LOGGED, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_first_log() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.check(), Some(0));
    }

    #[test]
    fn throttle_counts_suppressed_calls() {
        let throttle = LogThrottle::new(Duration::from_secs(100));
        assert!(throttle.check().is_some());
        assert!(throttle.check().is_none());
        assert!(throttle.check().is_none());

        throttle.reset();
        assert_eq!(throttle.check(), Some(2));
    }

    #[test]
    fn log_config_follows_app_config() {
        let config = AppConfig {
            verbose: true,
            json_logs: true,
            ..AppConfig::default()
        };
        let log = LogConfig::from(&config);
        assert!(log.verbose);
        assert!(log.json);
    }
}
