use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::checkpoint::DEFAULT_CHECKPOINT_PATH;
use crate::database_ops::riot::provider::{DEFAULT_REGIONAL_BASE, DEFAULT_STATIC_BASE};
use crate::database_ops::riot::Region;
use crate::rest::RetryPolicy;
use crate::util::env::{db_url, env_list, env_opt, env_parse, env_parse_opt, env_req, preflight_check};

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadences {
    pub players: Duration,
    pub matches: Duration,
    pub matchups: Duration,
    pub averages: Duration,
    pub version: Duration,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            players: Duration::from_secs(WEEK),
            matches: Duration::from_secs(5 * HOUR),
            matchups: Duration::from_secs(30 * 60),
            averages: Duration::from_secs(DAY),
            version: Duration::from_secs(DAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub api_key: String,
    pub regional_base: String,
    pub static_base: String,
    pub regions: Vec<Region>,
    pub league_tier: String,
    pub player_limit: usize,
    pub match_limit: usize,
    pub matchup_limit: usize,
    pub http_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub cadences: Cadences,
    pub checkpoint_path: PathBuf,
    pub version_cache_ttl: Duration,
    pub static_patches: usize,
}

impl UpdaterConfig {
    pub fn from_env() -> Result<Self> {
        let store = match env_opt("ONEVONE_STORE")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("postgres") => StoreKind::Postgres,
            Some("memory") => StoreKind::Memory,
            Some(other) => bail!("ONEVONE_STORE must be `postgres` or `memory`, got `{other}`"),
        };

        let mut required = vec!["RIOT_API_KEY"];
        if store == StoreKind::Postgres && env_opt("PGHOST").is_none() {
            if env_opt("DATABASE_URL").is_some() {
                required.push("DATABASE_URL");
            } else {
                required.push("ONEVONE_DATABASE_URL");
            }
        }
        preflight_check(
            "onevone updater",
            &required,
            &[
                "ONEVONE_STORE",
                "ONEVONE_DATABASE_URL",
                "DATABASE_URL",
                "RIOT_API_KEY",
                "RIOT_API_BASE",
                "RIOT_STATIC_BASE",
                "ONEVONE_REGIONS",
                "ONEVONE_LEAGUE_TIER",
                "ONEVONE_RETRY_MAX_ATTEMPTS",
                "ONEVONE_CHECKPOINT_PATH",
            ],
        )?;

        let database_url = match store {
            StoreKind::Postgres => Some(db_url()?),
            StoreKind::Memory => None,
        };

        let regions = match env_list("ONEVONE_REGIONS") {
            Some(list) => parse_regions(&list)?,
            None => vec![Region::Eune, Region::Euw, Region::Na, Region::Kr],
        };

        let secs = |key: &str, default: Duration| {
            env_parse_opt::<u64>(key)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let d = Cadences::default();
        let cadences = Cadences {
            players: secs("ONEVONE_PLAYERS_EVERY_SECS", d.players),
            matches: secs("ONEVONE_MATCHES_EVERY_SECS", d.matches),
            matchups: secs("ONEVONE_MATCHUPS_EVERY_SECS", d.matchups),
            averages: secs("ONEVONE_AVERAGES_EVERY_SECS", d.averages),
            version: secs("ONEVONE_VERSION_EVERY_SECS", d.version),
        };

        let retry = RetryPolicy::unbounded(Duration::from_secs(env_parse(
            "ONEVONE_RETRY_WAIT_SECS",
            10u64,
        )))
        .with_rate_limit_wait(Duration::from_secs(env_parse(
            "ONEVONE_RATE_LIMIT_WAIT_SECS",
            10u64,
        )))
        .with_max_attempts(env_parse_opt("ONEVONE_RETRY_MAX_ATTEMPTS"));

        Ok(Self {
            store,
            database_url,
            db_max_connections: env_parse("ONEVONE_DB_MAX_CONNECTIONS", 8u32),
            api_key: env_req("RIOT_API_KEY")?,
            regional_base: env_opt("RIOT_API_BASE").unwrap_or_else(|| DEFAULT_REGIONAL_BASE.into()),
            static_base: env_opt("RIOT_STATIC_BASE").unwrap_or_else(|| DEFAULT_STATIC_BASE.into()),
            regions,
            league_tier: env_opt("ONEVONE_LEAGUE_TIER")
                .map(|t| t.trim().to_ascii_lowercase())
                .unwrap_or_else(|| "challenger".into()),
            player_limit: env_parse("ONEVONE_PLAYER_LIMIT", 100usize),
            match_limit: env_parse("ONEVONE_MATCH_LIMIT", 30usize),
            matchup_limit: env_parse("ONEVONE_MATCHUP_LIMIT", 125usize),
            http_timeout_secs: env_parse("ONEVONE_HTTP_TIMEOUT_SECS", 30u64),
            retry,
            cadences,
            checkpoint_path: env_opt("ONEVONE_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            version_cache_ttl: secs("ONEVONE_VERSION_CACHE_TTL_SECS", Duration::from_secs(HOUR)),
            static_patches: env_parse("ONEVONE_STATIC_PATCHES", 5usize),
        })
    }
}

pub fn parse_regions(list: &[String]) -> Result<Vec<Region>> {
    let mut out: Vec<Region> = Vec::with_capacity(list.len());
    for raw in list {
        let region: Region = raw
            .parse()
            .with_context(|| format!("invalid entry in ONEVONE_REGIONS: `{raw}`"))?;
        if !out.contains(&region) {
            out.push(region);
        }
    }
    if out.is_empty() {
        bail!("ONEVONE_REGIONS is empty");
    }
    Ok(out)
}
