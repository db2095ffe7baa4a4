use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use materials_sync::config;
use materials_sync::db;
use materials_sync::remote::{RemoteBackend, SupabaseClient};
use materials_sync::sync::{self, PassOutcome};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Push every pending category and material to Supabase once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Skip the reachability probe and assume the backend is online
    #[arg(long)]
    assume_online: bool,
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

    let before = db::count_by_status(&pool).await?;
    info!(outstanding = before.outstanding(), "starting manual sync");

    let remote: Arc<dyn RemoteBackend> = Arc::new(SupabaseClient::from_config(&cfg)?);
    match sync::sync_once(pool, remote, args.assume_online).await? {
        PassOutcome::Offline => {
            warn!("backend unreachable; nothing was pushed");
            bail!("offline");
        }
        PassOutcome::Completed(report) => {
            println!("{}", report);
            if report.failed > 0 {
                bail!("{} record(s) failed to sync", report.failed);
            }
        }
    }
    Ok(())
}
