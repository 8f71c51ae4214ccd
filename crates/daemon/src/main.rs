use anonrelay_daemon::{init_logging, Cli, Supervisor};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    info!("Starting anonrelay v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = Supervisor::new(cli.config_path).run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
