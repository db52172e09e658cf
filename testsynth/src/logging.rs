//! Diagnostic tracing for the synthesis pipeline.
//!
//! Logs go to stderr so that stdout stays reserved for command output
//! (JSON outcomes, generated tests).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `testsynth=debug` with `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=testsynth=info testsynth generate demos/calculator.py
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,testsynth=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (e.g. from an embedding test harness) is not an error.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
