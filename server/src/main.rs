//! Newshelf Server - keeps a Shopify collection in step with recent products.
//!
//! Run with no arguments to serve `POST /sync` for an external scheduler,
//! or with `once` to run a single cycle, print its outcome as JSON and exit
//! with a status-dependent code (0 success, 2 partial, 1 failed).

mod auth;
mod config;
mod error;
mod handlers;
mod routes;
mod shopify;

use crate::config::Config;
use crate::shopify::ShopifyClient;
use axum::Router;
use newshelf_engine::{CycleStatus, SyncRunner};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SyncRunner>,
    pub config: Arc<Config>,
    /// Held for the duration of a cycle.
    pub cycle_lock: Arc<Mutex<()>>,
    /// Fires on shutdown; in-flight cycles stop at the next item.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    Once,
}

impl Mode {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        match args.next().as_deref() {
            None | Some("serve") => Ok(Mode::Serve),
            Some("once") => Ok(Mode::Once),
            Some(other) => Err(format!(
                "unknown command {other:?}, expected `serve` or `once`"
            )),
        }
    }
}

fn exit_code(status: CycleStatus) -> ExitCode {
    match status {
        CycleStatus::Success => ExitCode::SUCCESS,
        CycleStatus::Partial => ExitCode::from(2),
        CycleStatus::Failed => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logs go to stderr so `once` can print the outcome on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "newshelf_server=info,newshelf_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let mode = Mode::from_args(std::env::args().skip(1))?;

    let client = ShopifyClient::new(&config.shop)?;
    let runner = Arc::new(
        SyncRunner::new(
            Arc::new(client),
            config.collection_id.clone(),
            config.window,
        )
        .with_retry(config.retry_policy()),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        }
    });

    if mode == Mode::Once {
        let outcome = handlers::run_logged(&runner, &shutdown).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(exit_code(outcome.status));
    }

    tracing::info!(
        "Starting Newshelf Server on {}:{} for collection {}",
        config.host,
        config.port,
        config.collection_id
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        runner,
        config: Arc::new(config),
        cycle_lock: Arc::default(),
        shutdown: shutdown.clone(),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(ExitCode::SUCCESS)
}
