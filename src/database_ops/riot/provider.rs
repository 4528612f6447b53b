use serde_json::Value;

use super::Region;
use crate::database_ops::models::StaticKind;
use crate::rest::{ApiError, RestClient};

const LEAGUE_API: &str = "v2.5";
const MATCHLIST_API: &str = "v2.2";
const MATCH_API: &str = "v2.2";
const RANKED_QUEUE: &str = "RANKED_SOLO_5x5";
const MATCHLIST_QUEUES: &str = "TEAM_BUILDER_DRAFT_RANKED_5x5,RANKED_SOLO_5x5";
const MATCHLIST_SEASONS: &str = "SEASON2016,PRESEASON2016,PRESEASON2017";

pub const DEFAULT_REGIONAL_BASE: &str = "https://{region}.api.pvp.net/api/lol/{region}";
pub const DEFAULT_STATIC_BASE: &str = "https://global.api.pvp.net/api/lol/static-data/eune/v1.2";

/// Endpoint catalog for the match-statistics API.
///
/// Holds one client for the regional endpoints (base chosen per call) and one
/// for the static-data endpoint. Stateless apart from the shared clients.
#[derive(Clone)]
pub struct RiotProvider {
    api: RestClient,
    static_api: RestClient,
    api_key: String,
    regional_base: String,
}

impl RiotProvider {
    pub fn new(
        api: RestClient,
        static_api: RestClient,
        api_key: impl Into<String>,
        regional_base: impl Into<String>,
    ) -> Self {
        Self {
            api,
            static_api,
            api_key: api_key.into(),
            regional_base: regional_base.into(),
        }
    }

    pub fn regional_base(&self, region: Region) -> String {
        self.regional_base.replace("{region}", region.as_str())
    }

    fn params(&self, extra: &[(&str, String)]) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(extra.len() + 1);
        out.push(("api_key".to_string(), self.api_key.clone()));
        out.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));
        out
    }

    /// Ranked solo leaderboard for a tier (`challenger`, `master`).
    pub async fn league(&self, region: Region, tier: &str) -> Result<Value, ApiError> {
        let base = self.regional_base(region);
        let path = format!("/{}/league/{}", LEAGUE_API, tier.to_ascii_lowercase());
        let params = self.params(&[("type", RANKED_QUEUE.to_string())]);
        self.api.get_json_at(Some(&base), &path, &params).await
    }

    /// Ranked match list for one player, newest first, starting at `begin_time` (epoch ms).
    pub async fn match_list(
        &self,
        region: Region,
        summoner_id: i64,
        begin_time: Option<i64>,
        limit: usize,
    ) -> Result<Value, ApiError> {
        let base = self.regional_base(region);
        let path = format!("/{}/matchlist/by-summoner/{}", MATCHLIST_API, summoner_id);
        let mut extra = vec![
            ("rankedQueues", MATCHLIST_QUEUES.to_string()),
            ("seasons", MATCHLIST_SEASONS.to_string()),
            ("beginIndex", "0".to_string()),
            ("endIndex", limit.to_string()),
        ];
        if let Some(ts) = begin_time {
            extra.push(("beginTime", ts.to_string()));
        }
        let params = self.params(&extra);
        self.api.get_json_at(Some(&base), &path, &params).await
    }

    /// Full match detail including the per-minute event timeline.
    pub async fn match_detail(&self, region: Region, match_id: i64) -> Result<Value, ApiError> {
        let base = self.regional_base(region);
        let path = format!("/{}/match/{}", MATCH_API, match_id);
        let params = self.params(&[("includeTimeline", "true".to_string())]);
        self.api.get_json_at(Some(&base), &path, &params).await
    }

    /// Upstream data versions, newest first.
    pub async fn versions(&self) -> Result<Vec<String>, ApiError> {
        let v = self.static_api.get_json("/versions", &self.params(&[])).await?;
        Ok(v.as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Static-data list for one entity kind at a patch version (`{"data": {...}}`).
    pub async fn static_list(&self, kind: StaticKind, version: &str) -> Result<Value, ApiError> {
        let (path, extra) = static_request(kind);
        let mut extra: Vec<(&str, String)> =
            extra.iter().map(|(k, v)| (*k, v.to_string())).collect();
        if kind != StaticKind::SummonerSpell {
            extra.push(("version", version.to_string()));
        }
        let params = self.params(&extra);
        self.static_api.get_json(path, &params).await
    }
}

fn static_request(kind: StaticKind) -> (&'static str, &'static [(&'static str, &'static str)]) {
    match kind {
        StaticKind::Champion => (
            "/champion",
            &[("locale", "en_US"), ("champData", "image,tags")],
        ),
        StaticKind::Item => ("/item", &[("itemListData", "image")]),
        StaticKind::Mastery => ("/mastery", &[("masteryListData", "all")]),
        StaticKind::Rune => ("/rune", &[("runeListData", "image")]),
        StaticKind::SummonerSpell => ("/summoner-spell", &[("spellData", "image")]),
    }
}
