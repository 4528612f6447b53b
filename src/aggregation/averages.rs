use anyhow::Result;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::consensus::plurality_consensus;
use crate::checkpoint::compare_versions;
use crate::database_ops::models::{MatchupAverages, MatchupRecord};
use crate::database_ops::store::Store;

/// Number of newest patch families recomputed per cycle.
pub const RECOMPUTED_FAMILIES: usize = 2;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub families: Vec<String>,
    pub pairs: usize,
    pub written: usize,
}

#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn Store>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recomputes every (champion, enemy) average for the newest patch families.
    #[instrument(skip(self))]
    pub async fn recompute_averages(&self) -> Result<RecomputeSummary> {
        let families = newest_families(self.store.patch_families().await?, RECOMPUTED_FAMILIES);
        let known: BTreeSet<i64> = self.store.champion_ids().await?.into_iter().collect();
        if known.is_empty() {
            debug!("champion table empty; using champions seen in matchups");
        }

        let mut summary = RecomputeSummary {
            families: families.clone(),
            ..Default::default()
        };
        for family in &families {
            let pairs = self.store.matchup_pairs(family).await?;
            for (champion, enemy) in pairs {
                if champion == enemy {
                    continue;
                }
                if !known.is_empty() && !(known.contains(&champion) && known.contains(&enemy)) {
                    continue;
                }
                summary.pairs += 1;
                let samples = self.store.matchup_samples(champion, enemy, family).await?;
                if let Some(avg) = summarize(champion, enemy, family, &samples) {
                    self.store.upsert_matchup_average(&avg).await?;
                    summary.written += 1;
                }
            }
            debug!(family = %family, "patch family aggregated");
        }

        info!(
            families = ?summary.families,
            pairs = summary.pairs,
            written = summary.written,
            "matchup averages recomputed"
        );
        Ok(summary)
    }
}

/// Newest-first distinct patch families, numerically ordered.
pub fn newest_families(families: Vec<String>, n: usize) -> Vec<String> {
    families
        .into_iter()
        .unique()
        .sorted_by(|a, b| compare_versions(b, a))
        .take(n)
        .collect()
}

/// Means, win count and consensus sequences for one pair. `None` for an empty sample.
pub fn summarize(
    champion: i64,
    enemy: i64,
    patch_version: &str,
    samples: &[MatchupRecord],
) -> Option<MatchupAverages> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = |f: fn(&MatchupRecord) -> f64| samples.iter().map(f).sum::<f64>() / n;

    let items: Vec<&[i32]> = samples.iter().map(|r| r.matchup.item_timeline.as_slice()).collect();
    let skills: Vec<&[i32]> = samples.iter().map(|r| r.matchup.skill_timeline.as_slice()).collect();
    let masteries: Vec<&[String]> = samples.iter().map(|r| r.matchup.masteries.as_slice()).collect();
    let runes: Vec<&[String]> = samples.iter().map(|r| r.matchup.runes.as_slice()).collect();
    let summoners: Vec<Vec<i32>> = samples.iter().map(|r| summoner_pair(&r.matchup.summoners)).collect();

    Some(MatchupAverages {
        champion,
        enemy,
        patch_version: patch_version.to_string(),
        kills: mean(|r| r.matchup.kills as f64),
        deaths: mean(|r| r.matchup.deaths as f64),
        assists: mean(|r| r.matchup.assists as f64),
        creep_score: mean(|r| r.matchup.creep_score as f64),
        damage_dealt: mean(|r| r.matchup.damage_dealt),
        duration: mean(|r| r.matchup.duration as f64),
        wins: samples.iter().filter(|r| r.matchup.won).count() as i32,
        total_games: samples.len() as i32,
        item_timeline: plurality_consensus(&items),
        skill_timeline: plurality_consensus(&skills),
        masteries: plurality_consensus(&masteries),
        runes: plurality_consensus(&runes),
        summoners: plurality_consensus(&summoners),
    })
}

/// `"14,4"` → `[4, 14]`; unparseable parts are dropped.
fn summoner_pair(raw: &str) -> Vec<i32> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<i32>().ok())
        .sorted()
        .collect()
}
