//! Diagnostics for the pipeline, written to stderr.
//!
//! Product output (answers, verdicts, snippets) goes to stdout and never
//! depends on the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count: 0 is `warn`, 1 shows stage progress,
/// 2 or more shows prompts and process details.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,sqlviz=info",
        _ => "warn,sqlviz=debug",
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level comes from `verbosity`.
///
/// ```bash
/// RUST_LOG=sqlviz::stages=debug sqlviz ask "Total production by site?"
/// sqlviz -vv ask "Total production by site?"
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity > 1)
                .compact(),
        )
        .init();
}
