use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use materials_sync::config;
use materials_sync::db;
use materials_sync::remote::{RemoteBackend, SupabaseClient};
use materials_sync::sync::{connectivity, Connectivity, SyncEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Keep local materials pushed to Supabase")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let remote: Arc<dyn RemoteBackend> = Arc::new(SupabaseClient::from_config(&cfg)?);
    let online = Connectivity::new(false);
    connectivity::probe_once(remote.as_ref(), &online).await;

    let (probe_stop, probe_rx) = watch::channel(false);
    let probe = tokio::spawn(connectivity::run_probe(
        Arc::clone(&remote),
        online.clone(),
        cfg.app.poll_interval(),
        probe_rx,
    ));

    let engine = SyncEngine::new(pool, remote, online);
    let session = engine.start(cfg.app.poll_interval()).await?;

    info!("materials sync running; press Ctrl-C to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    session.stop().await;
    let _ = probe_stop.send(true);
    if let Err(err) = probe.await {
        error!(?err, "connectivity probe ended abnormally");
    }
    Ok(())
}
