use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use onevone::config::UpdaterConfig;
use onevone::database_ops::riot::Region;
use onevone::scheduler::Scheduler;
use onevone::updater::{default_tasks, UpdaterContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "onevone", version, about = "Lane matchup statistics updater")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Start every scheduled task and run until Ctrl+C
    Run {
        /// Seconds to wait for in-flight runs after Ctrl+C
        #[arg(long, default_value_t = 30)]
        grace_secs: u64,
    },
    /// Refresh leaderboard players once
    DiscoverPlayers {
        /// Regions to process (default: ONEVONE_REGIONS)
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Queue new matches for known players once
    DiscoverMatches {
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Decompose queued matches into matchups once
    ExtractMatchups {
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Recompute matchup averages for the newest patch families
    RecomputeAverages,
    /// Compare upstream version with the checkpoint and refresh static data if newer
    CheckVersion {
        /// Refresh static tables even when the checkpoint is current
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    onevone::env_boot::ensure_dotenv();
    onevone::tracing::init_tracing("info,onevone=debug,sqlx=warn")?;

    let cli = Cli::parse();
    let config = UpdaterConfig::from_env().context("loading configuration")?;
    let ctx = Arc::new(
        UpdaterContext::connect(config)
            .await
            .context("building updater context")?,
    );

    match cli.command {
        Commands::Run { grace_secs } => run(ctx, Duration::from_secs(grace_secs)).await,
        Commands::DiscoverPlayers { regions, limit } => {
            let tier = ctx.config.league_tier.clone();
            let limit = limit.unwrap_or(ctx.config.player_limit);
            for region in pick_regions(&ctx, regions)? {
                let n = ctx.pipeline.discover_players(region, &tier, limit).await?;
                info!(%region, players = n, "discover-players done");
            }
            Ok(())
        }
        Commands::DiscoverMatches { regions, limit } => {
            let limit = limit.unwrap_or(ctx.config.match_limit);
            for region in pick_regions(&ctx, regions)? {
                let n = ctx.pipeline.discover_matches(region, limit).await?;
                info!(%region, queued = n, "discover-matches done");
            }
            Ok(())
        }
        Commands::ExtractMatchups { regions, limit } => {
            let limit = limit.unwrap_or(ctx.config.matchup_limit);
            for region in pick_regions(&ctx, regions)? {
                let s = ctx.pipeline.extract_matchups(region, limit).await?;
                info!(%region, checked = s.checked, skipped = s.skipped, "extract-matchups done");
            }
            Ok(())
        }
        Commands::RecomputeAverages => {
            let s = ctx.aggregation.recompute_averages().await?;
            info!(written = s.written, families = ?s.families, "recompute-averages done");
            Ok(())
        }
        Commands::CheckVersion { force } => {
            let refreshed = ctx.static_data.check_version(&ctx.checkpoint).await?;
            if force && !refreshed {
                let n = ctx.static_data.force_refresh().await?;
                info!(entities = n, "static data refreshed (forced)");
            }
            Ok(())
        }
    }
}

async fn run(ctx: Arc<UpdaterContext>, grace: Duration) -> Result<()> {
    let mut scheduler = Scheduler::start(default_tasks(ctx));
    info!(tasks = ?scheduler.task_names(), "updater started; press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("shutdown: Ctrl+C received");

    scheduler.stop_all();
    if scheduler.wait_idle(grace).await {
        info!("all tasks stopped");
    } else {
        warn!(grace_secs = grace.as_secs(), "exiting with runs still in flight");
    }
    Ok(())
}

fn pick_regions(ctx: &UpdaterContext, cli: Option<Vec<String>>) -> Result<Vec<Region>> {
    match cli {
        Some(list) => onevone::config::parse_regions(&list),
        None => Ok(ctx.config.regions.clone()),
    }
}
