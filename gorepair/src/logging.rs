//! Tracing setup for the `gorepair` binary.
//!
//! Tracing goes to stderr and is meant for following the repair loop live.
//! What each attempt sent and received is kept separately by
//! `io::attempt_log` under `.gorepair/sessions/`, whatever the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count when `RUST_LOG` is unset.
///
/// Other crates (reqwest, hyper) stay at `warn` at every level.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "warn,gorepair=info",
        2 => "warn,gorepair=debug",
        _ => "warn,gorepair=trace",
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose`.
///
/// ```bash
/// gorepair -vv run . calc.go
/// RUST_LOG=gorepair::controller=trace gorepair run . calc.go
/// ```
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 1)
                .compact(),
        )
        .init();
}
