//! Static game data (champions, items, masteries, runes, summoner spells) and
//! the upstream version check that gates its refresh.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::models::{StaticEntity, StaticKind};
use super::riot::provider::RiotProvider;
use super::store::Store;
use crate::checkpoint::{needs_update, CheckpointFile, VersionCheckpoint, KEPT_VERSIONS};
use crate::rest::ApiError;

/// Caches the upstream version list for `ttl`.
pub struct VersionCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, Vec<String>)>>,
}

impl VersionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self, riot: &RiotProvider) -> Result<Vec<String>, ApiError> {
        let mut slot = self.slot.lock().await;
        if let Some((at, versions)) = slot.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(versions.clone());
            }
        }
        let fresh = riot.versions().await?;
        *slot = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

pub struct StaticData {
    store: Arc<dyn Store>,
    riot: Arc<RiotProvider>,
    cache: VersionCache,
    patches: usize,
}

impl StaticData {
    pub fn new(
        store: Arc<dyn Store>,
        riot: Arc<RiotProvider>,
        cache_ttl: Duration,
        patches: usize,
    ) -> Self {
        Self {
            store,
            riot,
            cache: VersionCache::new(cache_ttl),
            patches,
        }
    }

    pub async fn api_versions(&self) -> Result<Vec<String>, ApiError> {
        self.cache.get(&self.riot).await
    }

    /// Refreshes every static kind for the given versions (newest first as
    /// served upstream); applied oldest to newest so the newest patch wins.
    pub async fn refresh(&self, versions: &[String]) -> Result<usize> {
        let mut written = 0usize;
        for raw in versions.iter().take(self.patches).rev() {
            let version = truncate_xyz(raw);
            for kind in StaticKind::ALL {
                written += self.refresh_kind(kind, &version).await?;
            }
        }
        Ok(written)
    }

    async fn refresh_kind(&self, kind: StaticKind, version: &str) -> Result<usize> {
        let list = match self.riot.static_list(kind, version).await {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = kind.label(), version, error = %e, "static list unavailable; kind skipped");
                return Ok(0);
            }
        };
        let Some(entries) = list.get("data").and_then(Value::as_object) else {
            debug!(kind = kind.label(), version, "static list without data");
            return Ok(0);
        };

        let mut n = 0usize;
        for raw in entries.values() {
            match normalize(kind, raw, version) {
                Some(entity) => {
                    self.store.upsert_static_entity(kind, &entity).await?;
                    n += 1;
                }
                None => debug!(kind = kind.label(), "static entry missing id/name; skipped"),
            }
        }
        info!(kind = kind.label(), version, count = n, "static table refreshed");
        Ok(n)
    }

    /// Compares upstream's newest version with the checkpoint; on a newer
    /// version rewrites the checkpoint and refreshes static tables.
    /// Returns whether a refresh ran.
    pub async fn check_version(&self, checkpoint: &CheckpointFile) -> Result<bool> {
        let latest = match self.api_versions().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "version list unavailable; check skipped");
                return Ok(false);
            }
        };
        let Some(newest) = latest.first() else {
            warn!("upstream returned no versions");
            return Ok(false);
        };

        let current = checkpoint.load().await?;
        if !needs_update(&current, newest) {
            debug!(version = %newest, "static data current");
            return Ok(false);
        }

        warn!(
            from = current.newest().unwrap_or("none"),
            to = %newest,
            "newer upstream version; refreshing static tables"
        );
        // checkpoint only moves once the tables match it
        self.refresh(&latest).await?;
        checkpoint
            .save(&VersionCheckpoint {
                versions: latest.iter().take(KEPT_VERSIONS).cloned().collect(),
            })
            .await?;
        Ok(true)
    }

    /// Drops the cached version list and refreshes static tables from a
    /// fresh upstream fetch, regardless of the checkpoint.
    pub async fn force_refresh(&self) -> Result<usize> {
        self.cache.invalidate().await;
        let versions = self.api_versions().await?;
        self.refresh(&versions).await
    }
}

/// `"7.14.1.3"` → `"7.14.1"`. Shorter strings are returned unchanged.
pub fn truncate_xyz(version: &str) -> String {
    version.split('.').take(3).collect::<Vec<_>>().join(".")
}

fn rune_slot(colour: &str) -> Option<&'static str> {
    match colour {
        "black" => Some("quint"),
        "red" => Some("mark"),
        "yellow" => Some("seal"),
        "blue" => Some("glyph"),
        _ => None,
    }
}

/// Maps one upstream static entry to the stored shape. `None` when id or name is absent.
pub fn normalize(kind: StaticKind, data: &Value, patch_version: &str) -> Option<StaticEntity> {
    let id = data.get("id")?.as_i64()?;
    let name = data.get("name")?.as_str()?.to_string();
    let image = data
        .get("image")
        .and_then(|i| i.get("full"))
        .and_then(Value::as_str);
    let text = |k: &str| data.get(k).cloned().unwrap_or(Value::Null);

    let details = match kind {
        StaticKind::Champion => {
            let tags = data
                .get("tags")
                .and_then(Value::as_array)
                .map(|t| {
                    t.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            let splash = image.map(|f| format!("{}_0.jpg", f.trim_end_matches(".png")));
            json!({"title": text("title"), "tags": tags, "splash_blob": splash})
        }
        StaticKind::Item => {
            json!({"plaintext": text("plaintext"), "description": text("description")})
        }
        StaticKind::Mastery => {
            json!({"tree": text("masteryTree"), "description": text("sanitizedDescription")})
        }
        StaticKind::Rune => {
            let rune = data.get("rune");
            let colour = rune.and_then(|r| r.get("type")).and_then(Value::as_str);
            json!({
                "description": text("description"),
                "tier": rune.and_then(|r| r.get("tier")).cloned().unwrap_or(Value::Null),
                "rtype": colour.and_then(rune_slot),
            })
        }
        StaticKind::SummonerSpell => json!({"description": text("description")}),
    };

    Some(StaticEntity {
        id,
        name,
        patch_version: patch_version.to_string(),
        image_blob: image.map(str::to_string),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::MemoryStore;
    use crate::rest::testing::{status, ScriptedTransport};
    use crate::rest::{RestClient, RetryPolicy};

    fn static_data(transport: Arc<ScriptedTransport>, store: Arc<MemoryStore>) -> StaticData {
        let api = RestClient::new("", transport.clone(), RetryPolicy::default());
        let static_api = RestClient::new("https://static.test", transport, RetryPolicy::default());
        let riot = Arc::new(RiotProvider::new(api, static_api, "KEY", "https://{region}.test"));
        StaticData::new(store, riot, Duration::from_secs(3600), 5)
    }

    #[test]
    fn rune_colour_maps_to_slot() {
        let raw = json!({
            "id": 5245, "name": "Greater Mark of Attack Damage",
            "image": {"full": "r_1_3.png"},
            "rune": {"tier": "3", "type": "red"}
        });
        let e = normalize(StaticKind::Rune, &raw, "7.14.1").unwrap();
        assert_eq!(e.details["rtype"], "mark");
        assert_eq!(e.image_blob.as_deref(), Some("r_1_3.png"));
    }

    #[test]
    fn champion_gets_tags_and_splash() {
        let raw = json!({
            "id": 266, "name": "Aatrox", "title": "the Darkin Blade",
            "image": {"full": "Aatrox.png"}, "tags": ["Fighter", "Tank"]
        });
        let e = normalize(StaticKind::Champion, &raw, "7.14.1").unwrap();
        assert_eq!(e.details["tags"], "Fighter,Tank");
        assert_eq!(e.details["splash_blob"], "Aatrox_0.jpg");
        assert_eq!(e.patch_version, "7.14.1");
    }

    #[test]
    fn entries_without_id_are_rejected() {
        assert!(normalize(StaticKind::Item, &json!({"name": "Boots"}), "7.1.1").is_none());
    }

    #[test]
    fn xyz_truncation() {
        assert_eq!(truncate_xyz("7.14.1.3"), "7.14.1");
        assert_eq!(truncate_xyz("7.14"), "7.14");
    }

    #[tokio::test]
    async fn refresh_applies_oldest_first_and_skips_forbidden_kinds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json("/champion", json!({"data": {"Aatrox": {"id": 266, "name": "Aatrox"}}}))
            .await;
        transport.push("/item", status(403)).await;
        let store = Arc::new(MemoryStore::new());
        let sd = static_data(transport.clone(), store.clone());

        sd.refresh(&["7.14.1.1".into(), "7.13.1".into()]).await.unwrap();

        let champs = store.static_entities(StaticKind::Champion).await;
        assert_eq!(champs.len(), 1);
        assert_eq!(champs[0].patch_version, "7.14.1");
        assert!(store.static_entities(StaticKind::Item).await.is_empty());

        let versions: Vec<String> = transport
            .calls()
            .await
            .iter()
            .filter(|c| c.url.ends_with("/champion"))
            .filter_map(|c| c.params.iter().find(|(k, _)| k == "version").map(|(_, v)| v.clone()))
            .collect();
        assert_eq!(versions, vec!["7.13.1", "7.14.1"]);
    }

    #[tokio::test]
    async fn check_version_rewrites_checkpoint_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json("/versions", json!(["7.15.1", "7.14.1"]))
            .await;
        let store = Arc::new(MemoryStore::new());
        let sd = static_data(transport.clone(), store);
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("api_version.json"));
        file.save(&VersionCheckpoint {
            versions: vec!["7.14.1".into()],
        })
        .await
        .unwrap();

        assert!(sd.check_version(&file).await.unwrap());
        assert_eq!(file.load().await.unwrap().newest(), Some("7.15.1"));

        assert!(!sd.check_version(&file).await.unwrap());
        // second check is served from the version cache
        assert_eq!(transport.calls_to("/versions").await, 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_old_checkpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json("/versions", json!(["7.15.1", "7.14.1"]))
            .await;
        transport
            .push_json("/champion", json!({"data": {"Aatrox": {"id": 266, "name": "Aatrox"}}}))
            .await;
        let store = Arc::new(MemoryStore::new());
        store.fail_static_writes();
        let sd = static_data(transport, store);
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("api_version.json"));
        file.save(&VersionCheckpoint {
            versions: vec!["7.14.1".into()],
        })
        .await
        .unwrap();

        assert!(sd.check_version(&file).await.is_err());
        assert_eq!(file.load().await.unwrap().newest(), Some("7.14.1"));
    }

    #[tokio::test]
    async fn force_refresh_bypasses_version_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json("/versions", json!(["7.14.1"])).await;
        transport
            .push_json("/champion", json!({"data": {"Aatrox": {"id": 266, "name": "Aatrox"}}}))
            .await;
        let store = Arc::new(MemoryStore::new());
        let sd = static_data(transport.clone(), store.clone());

        sd.api_versions().await.unwrap();
        assert!(sd.force_refresh().await.unwrap() >= 1);

        assert_eq!(transport.calls_to("/versions").await, 2);
        assert_eq!(store.static_entities(StaticKind::Champion).await.len(), 1);
    }
}
