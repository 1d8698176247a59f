//! nl2sql-server: thin HTTP boundary over the pipeline.
//!
//! `POST /query` runs a natural-language question through the full
//! orchestrator; `GET /runs/:id` fetches a previously recorded run. The
//! binary holds no pipeline logic of its own — it loads the same data
//! directory `nl2sql-cli` writes to, wires one `AppState`, and serves it.

mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Extension, Router};
use clap::Parser;
use nl2sql_core::config::PipelineConfig;
use tracing::{info, Level};

use state::AppState;

#[derive(Parser)]
#[command(name = "nl2sql-server")]
#[command(about = "HTTP boundary for the nl2sql orchestration pipeline", long_about = None)]
struct Args {
    /// Directory holding the persistent schema store and local registry
    #[arg(long, env = "NL2SQL_DATA_DIR", default_value = ".nl2sql")]
    data_dir: PathBuf,

    /// Address to bind the HTTP listener on
    #[arg(long, env = "NL2SQL_SERVER_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Optional TOML file overriding pipeline configuration defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    nl2sql_core::init_tracing(args.json, Level::INFO);

    let config = match &args.config {
        Some(path) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("reading config at {}", path.display()))?;
            PipelineConfig::from_toml_str(&body).with_context(|| format!("parsing config at {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let state = Arc::new(AppState::bootstrap(&args.data_dir, config).await?);
    let app = build_router(state);

    info!(addr = %args.addr, "nl2sql-server listening");
    let listener = tokio::net::TcpListener::bind(args.addr).await.context("binding HTTP listener")?;
    axum::serve(listener, app).await.context("HTTP server exited")?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(handlers::query))
        .route("/runs/:id", get(handlers::get_run))
        .layer(Extension(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::parse_from(["nl2sql-server"]);
        assert_eq!(args.addr.port(), 8080);
        assert_eq!(args.data_dir, PathBuf::from(".nl2sql"));
    }
}
