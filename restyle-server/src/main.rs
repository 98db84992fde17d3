use anyhow::{Context, Result};
use clap::Parser;
use restyle_core::{load_backend, BackendKind, BackendOptions, DeviceMap, Dispatcher};
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

use routes::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Room restyling server")]
struct Args {
    /// Image generation backend: hosted, flux or legacy
    #[arg(long, env = "RESTYLE_BACKEND", default_value = "hosted")]
    backend: BackendKind,

    /// Use CPU instead of GPU for local pipelines
    #[arg(long)]
    cpu: bool,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 5001)]
    port: u16,

    /// Directory holding index.html and the front-end assets
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// fal.ai API key for the hosted backend
    #[arg(long, env = "FAL_KEY", hide_env_values = true)]
    fal_key: Option<String>,

    /// Override the fal.ai endpoint
    #[arg(long, env = "FAL_BASE_URL")]
    fal_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "restyle_server=debug,restyle_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(backend = %args.backend, "starting room restyling server");

    let options = BackendOptions {
        device_map: DeviceMap::from_cpu_flag(args.cpu),
        fal_key: args.fal_key,
        fal_base_url: args.fal_base_url,
    };
    let backend = load_backend(args.backend, &options)
        .await
        .with_context(|| format!("failed to load `{}` backend", args.backend))?;

    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(backend),
    });
    let app = routes::routes(state, &args.static_dir);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
