//! Logging setup for host applications that do not install their own
//! `tracing` subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber filtered by `RUST_LOG`, or by `filter` when
/// `RUST_LOG` is unset.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("d2_engine=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
