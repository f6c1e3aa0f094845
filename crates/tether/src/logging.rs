//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global `fmt` subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset or unparsable, e.g.
/// `"tether=info,tether_session=debug"`. Returns `false` if a global
/// subscriber was already installed (tests, embedding applications).
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
