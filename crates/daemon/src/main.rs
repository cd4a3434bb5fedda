#![forbid(unsafe_code)]

//! Audit daemon: accepts contract submissions, runs the analysis pipeline and
//! serves job status.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use audit_daemon::{http, Config, Services};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "auditd", version, about = "Smart-contract audit daemon")]
struct Args {
    /// Path to auditd.toml.
    #[arg(long, default_value = "auditd.toml")]
    config: PathBuf,

    /// Overrides `server.listen`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Don't re-trigger jobs left pending by a previous run.
    #[arg(long, default_value_t = false)]
    no_resume: bool,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cfg = Config::load_from(&args.config)?;
    let listen: SocketAddr = match args.listen {
        Some(addr) => addr,
        None => cfg
            .server
            .listen
            .parse()
            .with_context(|| format!("invalid server.listen {:?}", cfg.server.listen))?,
    };

    let svc = Arc::new(Services::from_config(&cfg)?);

    if cfg.server.resume_unfinished && !args.no_resume {
        let resumed = svc.resume_unfinished().await?;
        tracing::info!(resumed, "resumed unfinished jobs");
    }

    let app = http::router(Arc::clone(&svc));

    tracing::info!(%listen, program = %cfg.analyzer.program, "auditd starting");
    axum::serve(tokio::net::TcpListener::bind(listen).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
