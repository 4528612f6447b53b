//! Persisted record of the last upstream data versions seen (`{"versions": [...]}`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHECKPOINT_PATH: &str = "/var/tmp/onevone/api_version.json";
pub const KEPT_VERSIONS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionCheckpoint {
    #[serde(default)]
    pub versions: Vec<String>,
}

impl VersionCheckpoint {
    pub fn newest(&self) -> Option<&str> {
        self.versions.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or empty file reads as an empty checkpoint.
    pub async fn load(&self) -> Result<VersionCheckpoint> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VersionCheckpoint::default())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(VersionCheckpoint::default());
        }
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Writes through a sibling temp file so readers never see a partial document.
    pub async fn save(&self, checkpoint: &VersionCheckpoint) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Component-wise numeric comparison (`"7.10.1" > "7.9.3"`). Non-numeric
/// components compare as strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// True when `latest` should replace the checkpoint: no recorded version, or
/// `latest` is strictly newer than the recorded newest.
pub fn needs_update(checkpoint: &VersionCheckpoint, latest: &str) -> bool {
    match checkpoint.newest() {
        None => true,
        Some(current) => compare_versions(latest, current) == Ordering::Greater,
    }
}
