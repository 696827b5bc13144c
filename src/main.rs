use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kusd_keeper::config::KeeperConfig;
use kusd_keeper::keeper::Keeper;

/// Exit codes: 0 graceful shutdown, 1 fatal startup error, 2 unrecoverable
/// runtime fault. The supervisor restarts non-zero exits.
#[tokio::main]
async fn main() {
    let config = KeeperConfig::parse();

    let filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut keeper = match Keeper::bootstrap(config).await {
        Ok(keeper) => keeper,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    match keeper.run().await {
        Ok(()) => {
            info!("shutdown complete");
        }
        Err(e) => {
            error!(error = %e, "unrecoverable runtime fault");
            std::process::exit(2);
        }
    }
}
