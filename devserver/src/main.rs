use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onemedi_devserver::{build_state, create_router, Settings};

/// Local backend for the ONE MEDI data layer
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Settings file (JSON, TOML or YAML)
    #[clap(short, long, env = "ONEMEDI_CONFIG")]
    config: Option<String>,

    /// Interface to bind
    #[clap(long, env = "ONEMEDI_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[clap(short, long, env = "ONEMEDI_PORT")]
    port: Option<u16>,

    /// API key clients must present
    #[clap(long, env = "ONEMEDI_API_KEY")]
    api_key: Option<String>,

    /// Seed data file
    #[clap(long, env = "ONEMEDI_SEED_FILE")]
    seed: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if args.api_key.is_some() {
        settings.api_key = args.api_key;
    }
    if args.seed.is_some() {
        settings.seed_file = args.seed;
    }

    tracing::info!("Starting ONE MEDI development server");
    let state = build_state(&settings)?;
    let app = create_router(state);

    let addr = settings.addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
        })
        .await?;

    tracing::info!("Development server stopped");
    Ok(())
}
