/// anonrelay daemon
///
/// Wires the identity store, the overlay transport and the relay engine
/// together behind a small command line.

pub mod cli;
pub mod supervisor;

pub use cli::Cli;
pub use supervisor::Supervisor;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Defaults to INFO; `RUST_LOG` overrides it.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
