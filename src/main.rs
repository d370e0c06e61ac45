use clap::Parser;
use tracing_subscriber::EnvFilter;

use mixtape::backend;
use mixtape::config::{CliArgs, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);

    init_tracing(&config);

    // Resolve once; the Arc is the process-wide shared handle.
    let store = backend::resolve(&config.database)?;
    store.connect().await?;
    tracing::info!(backend = %config.database.backend, "storage ready");

    tokio::signal::ctrl_c().await?;

    store.disconnect().await?;
    tracing::info!("storage closed");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
