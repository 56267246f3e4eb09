//! Support for tracing execution of a program.

use tracing_subscriber::{
    fmt::{format::FmtSpan, Subscriber},
    prelude::*,
    EnvFilter,
};

/// The filter we use when `RUST_LOG` is unset or unparseable.
const DEFAULT_FILTER: &str = "info";

/// Set up the `tracing` library with reasonable options. Filtering is
/// controlled by `RUST_LOG`, for example `RUST_LOG=dbs_common=debug`.
pub fn initialize_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(filter)
        .finish()
        .init();
}
