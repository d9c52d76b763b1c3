use crate::{Error, Result};
use chrono::Local;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Format of the timestamp prefixed to every log line and prompt.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders the local time as `[YYYY-MM-DD HH:MM:SS]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampTimer;

impl FormatTime for TimestampTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", Local::now().format(DATE_FORMAT))
    }
}

pub fn add_timestamp(msg: &str) -> String {
    format!("[{}] {}", Local::now().format(DATE_FORMAT), msg)
}

pub fn setup_simple_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_timer(TimestampTimer)
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::General(e.to_string()))
}
