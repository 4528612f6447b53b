//! Region-scoped ingestion: leaderboard players → queued matches → matchups.
//!
//! Upstream and data-shape failures are absorbed per unit (one player, one
//! match) and logged; store failures propagate to the caller.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::provider::RiotProvider;
use super::timeline;
use super::Region;
use crate::database_ops::models::{CheckedMatch, Player, QueuedMatch};
use crate::database_ops::store::Store;
use crate::rest::ApiError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub attempted: usize,
    pub checked: usize,
    pub skipped: usize,
    pub matchups: usize,
}

#[derive(Clone)]
pub struct MatchPipeline {
    store: Arc<dyn Store>,
    riot: Arc<RiotProvider>,
}

impl MatchPipeline {
    pub fn new(store: Arc<dyn Store>, riot: Arc<RiotProvider>) -> Self {
        Self { store, riot }
    }

    /// Upserts the top `limit` leaderboard entries by league points.
    #[instrument(skip(self))]
    pub async fn discover_players(&self, region: Region, tier: &str, limit: usize) -> Result<usize> {
        let league = match self.riot.league(region, tier).await {
            Ok(v) => v,
            Err(e) => {
                log_skip(&e, region, "league");
                return Ok(0);
            }
        };

        let tier = tier.to_ascii_lowercase();
        let players = top_players(&league, region, &tier, limit);
        for p in &players {
            self.store.upsert_player(p).await?;
        }
        info!(%region, tier = %tier, count = players.len(), "players refreshed");
        Ok(players.len())
    }

    /// Queues matches newer than the region watermark for every known player.
    /// Returns how many match ids were queued for the first time.
    #[instrument(skip(self))]
    pub async fn discover_matches(&self, region: Region, limit: usize) -> Result<usize> {
        let watermark = self.store.latest_match_timestamp(region.as_str()).await?;
        let players = self.store.players_in_region(region.as_str()).await?;
        let mut queued = 0usize;

        for player in &players {
            let list = match self.riot.match_list(region, player.id, watermark, limit).await {
                Ok(v) => v,
                Err(e) => {
                    log_skip(&e, region, "matchlist");
                    continue;
                }
            };
            let Some(matches) = list.get("matches").and_then(Value::as_array) else {
                debug!(%region, player = player.id, "no matches in window");
                continue;
            };
            for m in matches {
                let (Some(id), Some(ts)) = (
                    m.get("matchId").and_then(Value::as_i64),
                    m.get("timestamp").and_then(Value::as_i64),
                ) else {
                    debug!(%region, player = player.id, "match reference without id/timestamp");
                    continue;
                };
                let fresh = self
                    .store
                    .upsert_queued_match(&QueuedMatch {
                        id,
                        region: region.as_str().to_string(),
                        match_timestamp: ts,
                        added_at: Utc::now(),
                    })
                    .await?;
                if fresh {
                    queued += 1;
                }
            }
        }

        info!(%region, players = players.len(), queued, watermark = ?watermark, "matches discovered");
        Ok(queued)
    }

    /// Processes up to `limit` unchecked matches, one store transaction each.
    #[instrument(skip(self))]
    pub async fn extract_matchups(&self, region: Region, limit: usize) -> Result<ExtractSummary> {
        let pending = self.store.unchecked_matches(region.as_str(), limit).await?;
        let mut summary = ExtractSummary {
            attempted: pending.len(),
            ..Default::default()
        };

        for queued in &pending {
            let detail = match self.riot.match_detail(region, queued.id).await {
                Ok(v) => v,
                Err(e) => {
                    log_skip(&e, region, "match");
                    summary.skipped += 1;
                    continue;
                }
            };
            let rows = match timeline::extract_matchups(queued.id, &detail) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(%region, match_id = queued.id, error = %e, "match left unchecked");
                    summary.skipped += 1;
                    continue;
                }
            };
            let checked = CheckedMatch::from_queued(queued, Utc::now());
            self.store.record_checked_match(&checked, &rows).await?;
            summary.checked += 1;
            summary.matchups += rows.len();
        }

        info!(
            %region,
            attempted = summary.attempted,
            checked = summary.checked,
            skipped = summary.skipped,
            matchups = summary.matchups,
            "matchups extracted"
        );
        Ok(summary)
    }
}

/// Sorts by league points (descending, stable) and keeps the first `limit`.
fn top_players(league: &Value, region: Region, tier: &str, limit: usize) -> Vec<Player> {
    let mut entries: Vec<(i64, Player)> = league
        .get("entries")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|e| entry(e, region, tier)).collect())
        .unwrap_or_default();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries.into_iter().take(limit).map(|(_, p)| p).collect()
}

fn entry(e: &Value, region: Region, tier: &str) -> Option<(i64, Player)> {
    // the id arrives as a string on the league endpoint
    let id = match e.get("playerOrTeamId")? {
        Value::String(s) => s.parse().ok()?,
        other => other.as_i64()?,
    };
    let points = e.get("leaguePoints").and_then(Value::as_i64).unwrap_or(0);
    let name = e
        .get("playerOrTeamName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((
        points,
        Player {
            id,
            region: region.as_str().to_string(),
            tier: tier.to_string(),
            name,
        },
    ))
}

fn log_skip(e: &ApiError, region: Region, what: &str) {
    if e.is_terminal() {
        warn!(%region, endpoint = what, error = %e, "skipping unit");
    } else {
        error!(%region, endpoint = what, error = %e, "upstream unavailable; skipping unit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryStore;
    use crate::database_ops::riot::timeline::fixtures::standard_detail;
    use crate::rest::testing::{status, ScriptedTransport};
    use crate::rest::{RestClient, RetryPolicy};
    use serde_json::json;

    fn pipeline(transport: Arc<ScriptedTransport>, store: Arc<MemoryStore>) -> MatchPipeline {
        let api = RestClient::new("", transport.clone(), RetryPolicy::default());
        let static_api = RestClient::new("https://static.test", transport, RetryPolicy::default());
        let riot = RiotProvider::new(api, static_api, "KEY", "https://{region}.test");
        MatchPipeline::new(store, Arc::new(riot))
    }

    fn player(id: i64) -> Player {
        Player {
            id,
            region: "euw".into(),
            tier: "challenger".into(),
            name: format!("p{id}"),
        }
    }

    fn queued(id: i64, ts: i64) -> QueuedMatch {
        QueuedMatch {
            id,
            region: "euw".into(),
            match_timestamp: ts,
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn discover_players_keeps_top_by_points() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                "/league/challenger",
                json!({"entries": [
                    {"playerOrTeamId": "1", "playerOrTeamName": "low", "leaguePoints": 10},
                    {"playerOrTeamId": "2", "playerOrTeamName": "high", "leaguePoints": 900},
                    {"playerOrTeamId": "3", "playerOrTeamName": "mid", "leaguePoints": 400},
                    {"playerOrTeamName": "no id", "leaguePoints": 1000}
                ]}),
            )
            .await;
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(transport, store.clone());

        let n = p.discover_players(Region::Euw, "CHALLENGER", 2).await.unwrap();

        assert_eq!(n, 2);
        let mut ids: Vec<i64> = store.players().await.iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
        assert!(store.players().await.iter().all(|p| p.tier == "challenger" && p.region == "euw"));
    }

    #[tokio::test]
    async fn discover_players_replay_does_not_duplicate() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                "/league/challenger",
                json!({"entries": [
                    {"playerOrTeamId": "1", "playerOrTeamName": "a", "leaguePoints": 300},
                    {"playerOrTeamId": 2, "playerOrTeamName": "b", "leaguePoints": 200}
                ]}),
            )
            .await;
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(transport, store.clone());

        p.discover_players(Region::Euw, "challenger", 10).await.unwrap();
        let first = store.players().await;
        p.discover_players(Region::Euw, "challenger", 10).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(store.players().await, first);
    }

    #[tokio::test]
    async fn discover_players_keeps_ladder_order_on_tied_points() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                "/league/challenger",
                json!({"entries": [
                    {"playerOrTeamId": "7", "playerOrTeamName": "first", "leaguePoints": 500},
                    {"playerOrTeamId": "3", "playerOrTeamName": "second", "leaguePoints": 500},
                    {"playerOrTeamId": "5", "playerOrTeamName": "third", "leaguePoints": 500}
                ]}),
            )
            .await;
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(transport, store.clone());

        assert_eq!(p.discover_players(Region::Euw, "challenger", 2).await.unwrap(), 2);
        let mut ids: Vec<i64> = store.players().await.iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(ids, vec![3, 7]);
    }

    #[tokio::test]
    async fn discover_players_swallows_forbidden() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("/league/challenger", status(403)).await;
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(transport, store.clone());

        assert_eq!(p.discover_players(Region::Euw, "challenger", 5).await.unwrap(), 0);
        assert!(store.players().await.is_empty());
    }

    #[tokio::test]
    async fn discover_matches_uses_watermark_and_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(
                "/by-summoner/1",
                json!({"matches": [
                    {"matchId": 100, "timestamp": 5_000},
                    {"matchId": 101, "timestamp": 6_000}
                ]}),
            )
            .await;
        transport.push("/by-summoner/2", status(404)).await;
        let store = Arc::new(MemoryStore::new());
        store.upsert_player(&player(1)).await.unwrap();
        store.upsert_player(&player(2)).await.unwrap();
        store.upsert_queued_match(&queued(50, 4_000)).await.unwrap();
        let p = pipeline(transport.clone(), store.clone());

        assert_eq!(p.discover_matches(Region::Euw, 30).await.unwrap(), 2);
        // the inclusive window hands back the watermark match again
        assert_eq!(p.discover_matches(Region::Euw, 30).await.unwrap(), 0);

        let ids: Vec<i64> = store.queued_matches().await.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![50, 100, 101]);

        let calls = transport.calls().await;
        let begin = |i: usize| {
            calls
                .iter()
                .filter(|c| c.url.ends_with("/by-summoner/1"))
                .nth(i)
                .and_then(|c| c.params.iter().find(|(k, _)| k == "beginTime"))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(begin(0).as_deref(), Some("4000"));
        assert_eq!(begin(1).as_deref(), Some("6000"));
    }

    #[tokio::test]
    async fn extract_matchups_checks_good_matches_only() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json("/match/1", standard_detail()).await;
        transport.push("/match/2", status(404)).await;
        let mut no_winner = standard_detail();
        no_winner["teams"][0]["winner"] = json!(false);
        transport.push_json("/match/3", no_winner).await;

        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store.upsert_queued_match(&queued(id, id * 10)).await.unwrap();
        }
        let p = pipeline(transport, store.clone());

        let s = p.extract_matchups(Region::Euw, 125).await.unwrap();

        assert_eq!(
            s,
            ExtractSummary {
                attempted: 3,
                checked: 1,
                skipped: 2,
                matchups: 4
            }
        );
        let checked: Vec<i64> = store.checked_matches().await.iter().map(|c| c.id).collect();
        assert_eq!(checked, vec![1]);
        assert!(store.matchups().await.iter().all(|r| r.matchup.match_id == 1));

        let pending: Vec<i64> = store
            .unchecked_matches("euw", 10)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[tokio::test]
    async fn extract_matchups_never_revisits_checked_matches() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json("/match/1", standard_detail()).await;
        let store = Arc::new(MemoryStore::new());
        store.upsert_queued_match(&queued(1, 10)).await.unwrap();
        let p = pipeline(transport.clone(), store.clone());

        p.extract_matchups(Region::Euw, 10).await.unwrap();
        let second = p.extract_matchups(Region::Euw, 10).await.unwrap();

        assert_eq!(second.attempted, 0);
        assert_eq!(transport.calls_to("/match/1").await, 1);
        assert_eq!(store.matchups().await.len(), 4);
    }

    #[tokio::test]
    async fn extract_matchups_honours_limit() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryStore::new());
        for id in 1..=5 {
            transport.push_json(&format!("/match/{id}"), standard_detail()).await;
            store.upsert_queued_match(&queued(id, id)).await.unwrap();
        }
        let p = pipeline(transport, store.clone());

        let s = p.extract_matchups(Region::Euw, 2).await.unwrap();
        assert_eq!(s.checked, 2);
        assert_eq!(store.unchecked_matches("euw", 10).await.unwrap().len(), 3);
    }
}
