//! Support for tracing execution of a program.

use tracing_subscriber::{
    fmt::{format::FmtSpan, Subscriber},
    prelude::*,
    EnvFilter,
};

/// The filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "bfabric_app_runner_common=info,bfabric_app_runner=info";

/// Set up the `tracing` library with reasonable options.
///
/// Log output goes to standard error, so that commands which print tables or
/// YAML to standard output can still be piped.
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let result = Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(filter)
        .finish()
        .try_init();
    if let Err(err) = result {
        eprintln!("tracing was already initialized: {}", err);
    }
}
