use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

use crate::errors::{Result, RunboxError};

/// Installs the process-wide fmt subscriber.
///
/// Directives come from `RUST_LOG` when it is set and parses, otherwise from
/// `level` (the `RUNBOX_LOG` setting), falling back to `info`. Colours are
/// only emitted when stdout is a terminal. Fails if a subscriber is already
/// installed.
pub fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .try_init()
        .map_err(|err| RunboxError::Logging(err.to_string()))
}
