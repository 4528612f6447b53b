//! In-process [`Store`] used for dry runs and tests. Same keying and
//! anti-join semantics as the Postgres store, no durability.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::models::{
    CheckedMatch, MatchupAverages, MatchupRecord, NewMatchup, Player, QueuedMatch, StaticEntity,
    StaticKind,
};
use super::store::Store;

#[derive(Default)]
struct Tables {
    players: BTreeMap<i64, Player>,
    queued: BTreeMap<i64, QueuedMatch>,
    checked: BTreeMap<i64, CheckedMatch>,
    matchups: Vec<MatchupRecord>,
    next_matchup_id: i64,
    statics: HashMap<StaticKind, BTreeMap<i64, StaticEntity>>,
    averages: BTreeMap<(i64, i64, String), MatchupAverages>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    static_writes_fail: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later static-entity upsert return an error.
    #[cfg(test)]
    pub(crate) fn fail_static_writes(&self) {
        self.static_writes_fail.store(true, Ordering::Relaxed);
    }

    pub async fn players(&self) -> Vec<Player> {
        self.tables.lock().await.players.values().cloned().collect()
    }

    pub async fn queued_matches(&self) -> Vec<QueuedMatch> {
        self.tables.lock().await.queued.values().cloned().collect()
    }

    pub async fn checked_matches(&self) -> Vec<CheckedMatch> {
        self.tables.lock().await.checked.values().cloned().collect()
    }

    pub async fn matchups(&self) -> Vec<MatchupRecord> {
        self.tables.lock().await.matchups.clone()
    }

    pub async fn averages(&self) -> Vec<MatchupAverages> {
        self.tables.lock().await.averages.values().cloned().collect()
    }

    pub async fn static_entities(&self, kind: StaticKind) -> Vec<StaticEntity> {
        self.tables
            .lock()
            .await
            .statics
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_player(&self, player: &Player) -> Result<()> {
        self.tables
            .lock()
            .await
            .players
            .insert(player.id, player.clone());
        Ok(())
    }

    async fn players_in_region(&self, region: &str) -> Result<Vec<Player>> {
        let t = self.tables.lock().await;
        Ok(t.players
            .values()
            .filter(|p| p.region == region)
            .cloned()
            .collect())
    }

    async fn latest_match_timestamp(&self, region: &str) -> Result<Option<i64>> {
        let t = self.tables.lock().await;
        Ok(t.queued
            .values()
            .filter(|q| q.region == region)
            .map(|q| q.match_timestamp)
            .max())
    }

    async fn upsert_queued_match(&self, queued: &QueuedMatch) -> Result<bool> {
        let mut t = self.tables.lock().await;
        match t.queued.get_mut(&queued.id) {
            Some(existing) => {
                existing.region = queued.region.clone();
                existing.match_timestamp = queued.match_timestamp;
                Ok(false)
            }
            None => {
                t.queued.insert(queued.id, queued.clone());
                Ok(true)
            }
        }
    }

    async fn unchecked_matches(&self, region: &str, limit: usize) -> Result<Vec<QueuedMatch>> {
        let t = self.tables.lock().await;
        Ok(t.queued
            .values()
            .filter(|q| q.region == region && !t.checked.contains_key(&q.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_checked_match(
        &self,
        checked: &CheckedMatch,
        matchups: &[NewMatchup],
    ) -> Result<Vec<i64>> {
        let mut t = self.tables.lock().await;
        let mut ids = Vec::with_capacity(matchups.len());
        for m in matchups {
            t.next_matchup_id += 1;
            let id = t.next_matchup_id;
            t.matchups.push(MatchupRecord {
                id,
                checked: false,
                matchup: m.clone(),
            });
            ids.push(id);
        }
        t.checked.entry(checked.id).or_insert_with(|| checked.clone());
        Ok(ids)
    }

    async fn upsert_static_entity(&self, kind: StaticKind, entity: &StaticEntity) -> Result<()> {
        if self.static_writes_fail.load(Ordering::Relaxed) {
            bail!("static write rejected for {}", kind.label());
        }
        self.tables
            .lock()
            .await
            .statics
            .entry(kind)
            .or_default()
            .insert(entity.id, entity.clone());
        Ok(())
    }

    async fn champion_ids(&self) -> Result<Vec<i64>> {
        let t = self.tables.lock().await;
        Ok(t.statics
            .get(&StaticKind::Champion)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn patch_families(&self) -> Result<Vec<String>> {
        let t = self.tables.lock().await;
        let families: BTreeSet<String> = t
            .matchups
            .iter()
            .map(|r| r.matchup.patch_version.clone())
            .collect();
        Ok(families.into_iter().collect())
    }

    async fn matchup_pairs(&self, patch_version: &str) -> Result<Vec<(i64, i64)>> {
        let t = self.tables.lock().await;
        let pairs: BTreeSet<(i64, i64)> = t
            .matchups
            .iter()
            .filter(|r| !r.checked && r.matchup.patch_version == patch_version)
            .map(|r| (r.matchup.champion, r.matchup.enemy))
            .collect();
        Ok(pairs.into_iter().collect())
    }

    async fn matchup_samples(
        &self,
        champion: i64,
        enemy: i64,
        patch_version: &str,
    ) -> Result<Vec<MatchupRecord>> {
        let t = self.tables.lock().await;
        Ok(t.matchups
            .iter()
            .filter(|r| {
                !r.checked
                    && r.matchup.champion == champion
                    && r.matchup.enemy == enemy
                    && r.matchup.patch_version == patch_version
            })
            .cloned()
            .collect())
    }

    async fn upsert_matchup_average(&self, averages: &MatchupAverages) -> Result<()> {
        let key = (
            averages.champion,
            averages.enemy,
            averages.patch_version.clone(),
        );
        self.tables.lock().await.averages.insert(key, averages.clone());
        Ok(())
    }
}
