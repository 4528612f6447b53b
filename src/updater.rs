//! Wires the store, upstream clients and engines into the scheduled task set.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::aggregation::AggregationEngine;
use crate::checkpoint::CheckpointFile;
use crate::config::{StoreKind, UpdaterConfig};
use crate::database_ops::riot::ingest::MatchPipeline;
use crate::database_ops::riot::provider::RiotProvider;
use crate::database_ops::static_data::StaticData;
use crate::database_ops::{Db, MemoryStore, Store};
use crate::rest::{ReqwestTransport, RestClient, Transport};
use crate::scheduler::TaskSpec;

/// Everything a task needs; shared read-only across tasks.
pub struct UpdaterContext {
    pub config: UpdaterConfig,
    pub store: Arc<dyn Store>,
    pub riot: Arc<RiotProvider>,
    pub pipeline: MatchPipeline,
    pub aggregation: AggregationEngine,
    pub static_data: StaticData,
    pub checkpoint: CheckpointFile,
}

impl UpdaterContext {
    /// Connects the configured store and builds one HTTP client per endpoint family.
    pub async fn connect(config: UpdaterConfig) -> Result<Self> {
        let store: Arc<dyn Store> = match (config.store, config.database_url.as_deref()) {
            (StoreKind::Postgres, Some(url)) => {
                Arc::new(Db::connect(url, config.db_max_connections).await?)
            }
            (StoreKind::Postgres, None) => anyhow::bail!("postgres store selected without a database URL"),
            (StoreKind::Memory, _) => {
                info!("using in-memory store; nothing will be persisted");
                Arc::new(MemoryStore::new())
            }
        };
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.http_timeout_secs)?);
        Ok(Self::with_parts(config, store, transport))
    }

    pub fn with_parts(
        config: UpdaterConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        // the regional client's own base is unused; every call passes the per-region base
        let api = RestClient::new(&config.regional_base, transport.clone(), config.retry.clone());
        let static_api = RestClient::new(&config.static_base, transport, config.retry.clone());
        let riot = Arc::new(RiotProvider::new(
            api,
            static_api,
            config.api_key.clone(),
            config.regional_base.clone(),
        ));
        Self {
            pipeline: MatchPipeline::new(store.clone(), riot.clone()),
            aggregation: AggregationEngine::new(store.clone()),
            static_data: StaticData::new(
                store.clone(),
                riot.clone(),
                config.version_cache_ttl,
                config.static_patches,
            ),
            checkpoint: CheckpointFile::new(config.checkpoint_path.clone()),
            store,
            riot,
            config,
        }
    }
}

/// Three ingestion tasks per region, plus averages and the version check.
pub fn default_tasks(ctx: Arc<UpdaterContext>) -> Vec<TaskSpec> {
    let cfg = &ctx.config;
    let mut tasks = Vec::with_capacity(cfg.regions.len() * 3 + 2);

    for &region in &cfg.regions {
        let c = ctx.clone();
        tasks.push(TaskSpec::new(
            format!("players:{}", region.as_str()),
            cfg.cadences.players,
            move || {
                let c = c.clone();
                async move {
                    let tier = c.config.league_tier.clone();
                    c.pipeline
                        .discover_players(region, &tier, c.config.player_limit)
                        .await
                        .map(|_| ())
                }
            },
        ));

        let c = ctx.clone();
        tasks.push(TaskSpec::new(
            format!("matches:{}", region.as_str()),
            cfg.cadences.matches,
            move || {
                let c = c.clone();
                async move {
                    c.pipeline
                        .discover_matches(region, c.config.match_limit)
                        .await
                        .map(|_| ())
                }
            },
        ));

        let c = ctx.clone();
        tasks.push(TaskSpec::new(
            format!("matchups:{}", region.as_str()),
            cfg.cadences.matchups,
            move || {
                let c = c.clone();
                async move {
                    c.pipeline
                        .extract_matchups(region, c.config.matchup_limit)
                        .await
                        .map(|_| ())
                }
            },
        ));
    }

    let c = ctx.clone();
    tasks.push(TaskSpec::new("averages", cfg.cadences.averages, move || {
        let c = c.clone();
        async move { c.aggregation.recompute_averages().await.map(|_| ()) }
    }));

    let c = ctx.clone();
    tasks.push(TaskSpec::new("version-check", cfg.cadences.version, move || {
        let c = c.clone();
        async move { c.static_data.check_version(&c.checkpoint).await.map(|_| ()) }
    }));

    info!(
        regions = cfg.regions.len(),
        tasks = tasks.len(),
        "task set built"
    );
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cadences;
    use crate::database_ops::riot::timeline::fixtures::standard_detail;
    use crate::database_ops::riot::Region;
    use crate::rest::testing::ScriptedTransport;
    use crate::rest::RetryPolicy;
    use crate::scheduler::Scheduler;
    use serde_json::json;
    use std::time::Duration;

    fn config(checkpoint: std::path::PathBuf) -> UpdaterConfig {
        let every = Duration::from_secs(10);
        UpdaterConfig {
            store: StoreKind::Memory,
            database_url: None,
            db_max_connections: 1,
            api_key: "KEY".into(),
            regional_base: "https://{region}.test".into(),
            static_base: "https://static.test".into(),
            regions: vec![Region::Euw],
            league_tier: "challenger".into(),
            player_limit: 100,
            match_limit: 30,
            matchup_limit: 125,
            http_timeout_secs: 5,
            retry: RetryPolicy::default(),
            cadences: Cadences {
                players: every,
                matches: every,
                matchups: every,
                averages: every,
                version: Duration::from_secs(3600),
            },
            checkpoint_path: checkpoint,
            version_cache_ttl: Duration::from_secs(3600),
            static_patches: 1,
        }
    }

    #[test]
    fn task_set_covers_every_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("v.json"));
        cfg.regions = vec![Region::Eune, Region::Kr];
        let ctx = UpdaterContext::with_parts(
            cfg,
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
        );
        let names: Vec<String> = default_tasks(Arc::new(ctx)).into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "players:eune",
                "matches:eune",
                "matchups:eune",
                "players:kr",
                "matches:kr",
                "matchups:kr",
                "averages",
                "version-check"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_pipeline_fills_averages() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                "/league/challenger",
                json!({"entries": [{"playerOrTeamId": "7", "playerOrTeamName": "p", "leaguePoints": 1}]}),
            )
            .await;
        transport
            .push_json(
                "/by-summoner/7",
                json!({"matches": [{"matchId": 1, "timestamp": 1000}]}),
            )
            .await;
        transport.push_json("/match/1", standard_detail()).await;
        transport.push_json("/versions", json!(["7.14.1"])).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(UpdaterContext::with_parts(
            config(dir.path().join("api_version.json")),
            store.clone(),
            transport.clone(),
        ));
        let mut scheduler = Scheduler::start(default_tasks(ctx));

        tokio::time::sleep(Duration::from_secs(45)).await;
        scheduler.stop_all();
        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(store.checked_matches().await.len(), 1);
        assert_eq!(transport.calls_to("/match/1").await, 1);
        assert_eq!(store.averages().await.len(), 4);
        assert!(dir.path().join("api_version.json").exists());
    }
}
