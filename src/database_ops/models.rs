use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Leaderboard player tracked for match discovery. Keyed by upstream id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub region: String,
    pub tier: String,
    pub name: String,
}

/// Discovered match waiting for extraction; its timestamp drives the region watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMatch {
    pub id: i64,
    pub region: String,
    pub match_timestamp: i64,
    pub added_at: DateTime<Utc>,
}

/// Marker written once a queued match has been processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedMatch {
    pub id: i64,
    pub region: String,
    pub checked_at: DateTime<Utc>,
    pub match_timestamp: i64,
}

impl CheckedMatch {
    pub fn from_queued(queued: &QueuedMatch, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: queued.id,
            region: queued.region.clone(),
            checked_at,
            match_timestamp: queued.match_timestamp,
        }
    }
}

/// One participant's view of a 1v1 lane matchup, with its purchase and skill order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMatchup {
    pub match_id: i64,
    pub champion: i64,
    pub enemy: i64,
    pub won: bool,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub creep_score: i32,
    pub damage_dealt: f64,
    pub duration: i64,
    /// `"masteryId:rank"` entries.
    pub masteries: Vec<String>,
    /// `"runeId:rank"` entries.
    pub runes: Vec<String>,
    /// `"spell1,spell2"`.
    pub summoners: String,
    /// Patch family, e.g. `"7.14"`.
    pub patch_version: String,
    pub item_timeline: Vec<i32>,
    pub skill_timeline: Vec<i32>,
}

/// Persisted matchup as read back for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupRecord {
    pub id: i64,
    pub checked: bool,
    pub matchup: NewMatchup,
}

/// Aggregated view of every unconsumed matchup for (champion, enemy, patch family).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupAverages {
    pub champion: i64,
    pub enemy: i64,
    pub patch_version: String,
    pub kills: f64,
    pub deaths: f64,
    pub assists: f64,
    pub creep_score: f64,
    pub damage_dealt: f64,
    pub duration: f64,
    pub wins: i32,
    pub total_games: i32,
    pub item_timeline: Vec<i32>,
    pub skill_timeline: Vec<i32>,
    pub masteries: Vec<String>,
    pub runes: Vec<String>,
    pub summoners: Vec<i32>,
}

impl MatchupAverages {
    /// Never persisted with zero games, so the division is always defined.
    pub fn win_rate(&self) -> f64 {
        if self.total_games == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_games as f64
    }
}

/// Static game-data entity kinds refreshed when the upstream version changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticKind {
    Champion,
    Item,
    Mastery,
    Rune,
    SummonerSpell,
}

impl StaticKind {
    pub const ALL: [StaticKind; 5] = [
        StaticKind::Champion,
        StaticKind::Item,
        StaticKind::Mastery,
        StaticKind::Rune,
        StaticKind::SummonerSpell,
    ];

    pub fn table(self) -> &'static str {
        match self {
            StaticKind::Champion => "tb_champions",
            StaticKind::Item => "tb_items",
            StaticKind::Mastery => "tb_masteries",
            StaticKind::Rune => "tb_runes",
            StaticKind::SummonerSpell => "tb_summoners",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StaticKind::Champion => "champion",
            StaticKind::Item => "item",
            StaticKind::Mastery => "mastery",
            StaticKind::Rune => "rune",
            StaticKind::SummonerSpell => "summoner-spell",
        }
    }
}

/// Normalized static entity; kind-specific attributes live in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticEntity {
    pub id: i64,
    pub name: String,
    pub patch_version: String,
    pub image_blob: Option<String>,
    pub details: Value,
}
