use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode},
    PgPool, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::models::{
    CheckedMatch, MatchupAverages, MatchupRecord, NewMatchup, Player, QueuedMatch, StaticEntity,
    StaticKind,
};
use super::store::Store;

/// Long-lived Postgres pool shared by every scheduled task.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // DSNs can carry credentials; keep them out of spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    async fn write_average(&self, a: &MatchupAverages) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tb_matchup_averages \
             (champion, enemy, patch_version, kills, deaths, assists, creep_score, damage_dealt, \
              duration, wins, total_games, item_timeline, spell_timeline, masteries, runes, summoners) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16) \
             ON CONFLICT (champion, enemy, patch_version) DO UPDATE SET \
               kills=EXCLUDED.kills, deaths=EXCLUDED.deaths, assists=EXCLUDED.assists, \
               creep_score=EXCLUDED.creep_score, damage_dealt=EXCLUDED.damage_dealt, \
               duration=EXCLUDED.duration, wins=EXCLUDED.wins, total_games=EXCLUDED.total_games, \
               item_timeline=EXCLUDED.item_timeline, spell_timeline=EXCLUDED.spell_timeline, \
               masteries=EXCLUDED.masteries, runes=EXCLUDED.runes, summoners=EXCLUDED.summoners",
        )
        .bind(a.champion)
        .bind(a.enemy)
        .bind(&a.patch_version)
        .bind(a.kills)
        .bind(a.deaths)
        .bind(a.assists)
        .bind(a.creep_score)
        .bind(a.damage_dealt)
        .bind(a.duration)
        .bind(a.wins)
        .bind(a.total_games)
        .bind(&a.item_timeline[..])
        .bind(&a.skill_timeline[..])
        .bind(&a.masteries[..])
        .bind(&a.runes[..])
        .bind(&a.summoners[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn queued_from_row(r: &PgRow) -> Result<QueuedMatch> {
    Ok(QueuedMatch {
        id: r.try_get("id")?,
        region: r.try_get("region")?,
        match_timestamp: r.try_get("match_timestamp")?,
        added_at: r.try_get("added_at")?,
    })
}

fn matchup_from_row(r: &PgRow) -> Result<MatchupRecord> {
    Ok(MatchupRecord {
        id: r.try_get("id")?,
        checked: r.try_get("checked")?,
        matchup: NewMatchup {
            match_id: r.try_get("match_id")?,
            champion: r.try_get("champion")?,
            enemy: r.try_get("enemy")?,
            won: r.try_get("won")?,
            kills: r.try_get("kills")?,
            deaths: r.try_get("deaths")?,
            assists: r.try_get("assists")?,
            creep_score: r.try_get("creep_score")?,
            damage_dealt: r.try_get("damage_dealt")?,
            duration: r.try_get("duration")?,
            masteries: r.try_get("masteries")?,
            runes: r.try_get("runes")?,
            summoners: r.try_get("summoners")?,
            patch_version: r.try_get("patch_version")?,
            item_timeline: r.try_get("item_timeline")?,
            skill_timeline: r.try_get("spell_timeline")?,
        },
    })
}

#[async_trait]
impl Store for Db {
    async fn upsert_player(&self, player: &Player) -> Result<()> {
        sqlx::query(
            "INSERT INTO tb_pro_players (id, region, tier, name) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (id) DO UPDATE SET region=EXCLUDED.region, tier=EXCLUDED.tier, name=EXCLUDED.name",
        )
        .bind(player.id)
        .bind(&player.region)
        .bind(&player.tier)
        .bind(&player.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn players_in_region(&self, region: &str) -> Result<Vec<Player>> {
        let rows = sqlx::query("SELECT id, region, tier, name FROM tb_pro_players WHERE region = $1 ORDER BY id")
            .bind(region)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok(Player {
                    id: r.try_get("id")?,
                    region: r.try_get("region")?,
                    tier: r.try_get("tier")?,
                    name: r.try_get("name")?,
                })
            })
            .collect()
    }

    async fn latest_match_timestamp(&self, region: &str) -> Result<Option<i64>> {
        let ts: Option<i64> =
            sqlx::query_scalar("SELECT MAX(match_timestamp) FROM tb_queued_matches WHERE region = $1")
                .bind(region)
                .fetch_one(&self.pool)
                .await?;
        Ok(ts)
    }

    async fn upsert_queued_match(&self, queued: &QueuedMatch) -> Result<bool> {
        // added_at keeps the first discovery time; xmax is 0 only on a fresh insert
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO tb_queued_matches (id, region, added_at, match_timestamp) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (id) DO UPDATE SET region=EXCLUDED.region, match_timestamp=EXCLUDED.match_timestamp \
             RETURNING (xmax = 0)",
        )
        .bind(queued.id)
        .bind(&queued.region)
        .bind(queued.added_at)
        .bind(queued.match_timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn unchecked_matches(&self, region: &str, limit: usize) -> Result<Vec<QueuedMatch>> {
        let rows = sqlx::query(
            "SELECT q.id, q.region, q.match_timestamp, q.added_at FROM tb_queued_matches q \
             WHERE q.region = $1 \
               AND NOT EXISTS (SELECT 1 FROM tb_checked_matches c WHERE c.id = q.id) \
             ORDER BY q.id LIMIT $2",
        )
        .bind(region)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queued_from_row).collect()
    }

    #[instrument(skip(self, matchups), fields(match_id = checked.id, matchups = matchups.len()))]
    async fn record_checked_match(
        &self,
        checked: &CheckedMatch,
        matchups: &[NewMatchup],
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(matchups.len());
        for m in matchups {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO tb_matchups \
                 (match_id, champion, enemy, won, kills, deaths, assists, creep_score, damage_dealt, \
                  duration, masteries, runes, summoners, patch_version, checked) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,false) RETURNING id",
            )
            .bind(m.match_id)
            .bind(m.champion)
            .bind(m.enemy)
            .bind(m.won)
            .bind(m.kills)
            .bind(m.deaths)
            .bind(m.assists)
            .bind(m.creep_score)
            .bind(m.damage_dealt)
            .bind(m.duration)
            .bind(&m.masteries[..])
            .bind(&m.runes[..])
            .bind(&m.summoners)
            .bind(&m.patch_version)
            .fetch_one(&mut *tx)
            .await?;
            sqlx::query("INSERT INTO tb_item_timelines (matchup_id, item_timeline) VALUES ($1,$2)")
                .bind(id)
                .bind(&m.item_timeline[..])
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO tb_spell_timelines (matchup_id, spell_timeline) VALUES ($1,$2)")
                .bind(id)
                .bind(&m.skill_timeline[..])
                .execute(&mut *tx)
                .await?;
            ids.push(id);
        }
        sqlx::query(
            "INSERT INTO tb_checked_matches (id, region, checked_at, match_timestamp) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(checked.id)
        .bind(&checked.region)
        .bind(checked.checked_at)
        .bind(checked.match_timestamp)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn upsert_static_entity(&self, kind: StaticKind, entity: &StaticEntity) -> Result<()> {
        // table names come from a closed enum, never from input
        let sql = format!(
            "INSERT INTO {} (id, name, patch_version, image_blob, details) VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (id) DO UPDATE SET name=EXCLUDED.name, patch_version=EXCLUDED.patch_version, \
             image_blob=EXCLUDED.image_blob, details=EXCLUDED.details",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(entity.id)
            .bind(&entity.name)
            .bind(&entity.patch_version)
            .bind(&entity.image_blob)
            .bind(&entity.details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn champion_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM tb_champions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn patch_families(&self) -> Result<Vec<String>> {
        let families: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT patch_version FROM tb_matchups")
                .fetch_all(&self.pool)
                .await?;
        Ok(families)
    }

    async fn matchup_pairs(&self, patch_version: &str) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT champion, enemy FROM tb_matchups \
             WHERE patch_version = $1 AND checked = false ORDER BY champion, enemy",
        )
        .bind(patch_version)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("champion")?, r.try_get("enemy")?)))
            .collect()
    }

    async fn matchup_samples(
        &self,
        champion: i64,
        enemy: i64,
        patch_version: &str,
    ) -> Result<Vec<MatchupRecord>> {
        let rows = sqlx::query(
            "SELECT m.id, m.match_id, m.champion, m.enemy, m.won, m.kills, m.deaths, m.assists, \
                    m.creep_score, m.damage_dealt, m.duration, m.masteries, m.runes, m.summoners, \
                    m.patch_version, m.checked, \
                    COALESCE(i.item_timeline, ARRAY[]::INT[]) AS item_timeline, \
                    COALESCE(s.spell_timeline, ARRAY[]::INT[]) AS spell_timeline \
             FROM tb_matchups m \
             LEFT JOIN tb_item_timelines i ON i.matchup_id = m.id \
             LEFT JOIN tb_spell_timelines s ON s.matchup_id = m.id \
             WHERE m.champion = $1 AND m.enemy = $2 AND m.patch_version = $3 AND m.checked = false \
             ORDER BY m.id",
        )
        .bind(champion)
        .bind(enemy)
        .bind(patch_version)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(matchup_from_row).collect()
    }

    async fn upsert_matchup_average(&self, averages: &MatchupAverages) -> Result<()> {
        match self.write_average(averages).await {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                warn!(
                    champion = averages.champion,
                    enemy = averages.enemy,
                    patch = %averages.patch_version,
                    "average already exists; re-merging"
                );
                self.write_average(averages).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
