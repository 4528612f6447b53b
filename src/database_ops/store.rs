use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    CheckedMatch, MatchupAverages, MatchupRecord, NewMatchup, Player, QueuedMatch, StaticEntity,
    StaticKind,
};

/// Persistence consumed by ingestion and aggregation.
///
/// Upserts are keyed and idempotent; concurrent writers to one key resolve
/// last-writer-wins. Region arguments are lowercase region codes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_player(&self, player: &Player) -> Result<()>;

    async fn players_in_region(&self, region: &str) -> Result<Vec<Player>>;

    /// Watermark: newest queued match timestamp for the region.
    async fn latest_match_timestamp(&self, region: &str) -> Result<Option<i64>>;

    /// Returns true when the id was not queued before.
    async fn upsert_queued_match(&self, queued: &QueuedMatch) -> Result<bool>;

    /// Queued matches in `region` with no checked counterpart, oldest id first.
    async fn unchecked_matches(&self, region: &str, limit: usize) -> Result<Vec<QueuedMatch>>;

    /// Atomically persist a match's matchups (with timelines) and its checked marker.
    /// Returns the new matchup ids in input order.
    async fn record_checked_match(
        &self,
        checked: &CheckedMatch,
        matchups: &[NewMatchup],
    ) -> Result<Vec<i64>>;

    async fn upsert_static_entity(&self, kind: StaticKind, entity: &StaticEntity) -> Result<()>;

    /// Ids from the static champion table, ascending.
    async fn champion_ids(&self) -> Result<Vec<i64>>;

    /// Distinct patch families present among matchups (unordered).
    async fn patch_families(&self) -> Result<Vec<String>>;

    /// Distinct (champion, enemy) pairs with unconsumed matchups in a patch family.
    async fn matchup_pairs(&self, patch_version: &str) -> Result<Vec<(i64, i64)>>;

    /// Unconsumed matchups for one ordered pair and patch family, with timelines.
    async fn matchup_samples(
        &self,
        champion: i64,
        enemy: i64,
        patch_version: &str,
    ) -> Result<Vec<MatchupRecord>>;

    async fn upsert_matchup_average(&self, averages: &MatchupAverages) -> Result<()>;
}
