use clap::Parser;
use nutgraf::api::{self, AppState};
use nutgraf::config::AppConfig;
use nutgraf::store::MemoryStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nutgraf", about = "Nutgraf summarization API server")]
struct Args {
    /// Override the listen port (NUTGRAF_PORT otherwise)
    #[arg(long)]
    port: Option<u16>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), rocket::Error> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let address = config.address;
    let port = args.port.unwrap_or(config.port);
    info!(%address, port, "starting Nutgraf API server");

    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store, config);

    api::rocket(state)
        .configure(rocket::Config {
            address,
            port,
            ..rocket::Config::default()
        })
        .launch()
        .await?;

    Ok(())
}
