//! Tracing/logging initialization.
//!
//! `RUST_LOG` controls filtering (default `info`). `BILLFORGE_LOG_FORMAT`
//! selects `json` (default), `pretty` or `compact` output.

use core::str::FromStr;

use tracing_subscriber::EnvFilter;

use billforge_platform::env_or;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Initialize tracing using `BILLFORGE_LOG_FORMAT`.
///
/// An invalid format falls back to JSON and is reported once the subscriber is up.
pub fn init() {
    match env_or("BILLFORGE_LOG_FORMAT", LogFormat::default()) {
        Ok(format) => init_with(format),
        Err(err) => {
            init_with(LogFormat::default());
            ::tracing::warn!(error = %err, "ignoring BILLFORGE_LOG_FORMAT");
        }
    }
}

/// Initialize tracing with an explicit format.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}
