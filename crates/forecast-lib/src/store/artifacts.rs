//! On-disk ensemble artifacts
//!
//! Each artifact is a JSON envelope holding the serialized model and its
//! SHA-256 checksum. Files are written to a temp path, synced, then renamed
//! into place. Only the newest two versions per horizon are kept.

use crate::model::{ForestSet, ModelArtifact, ModelParams, ValidationSnapshot};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_ARTIFACT_DIR: &str = "/var/lib/airq/artifacts";

/// Versions kept per horizon: current and previous
const VERSIONS_TO_KEEP: usize = 2;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedArtifact {
    version: u64,
    horizon_hours: u32,
    window_length: usize,
    training_samples: usize,
    created_at: DateTime<Utc>,
    validation: ValidationSnapshot,
    forests: ForestSet,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: String,
}

/// Artifacts recovered for one horizon, newest first
#[derive(Debug, Default)]
pub struct LoadedArtifacts {
    pub current: Option<ModelArtifact>,
    pub previous: Option<ModelArtifact>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, horizon_hours: u32, version: u64) -> PathBuf {
        self.dir.join(format!("h{}-v{}.json", horizon_hours, version))
    }

    /// Persist an ensemble artifact; sequence artifacts stay in memory
    pub fn save(&self, artifact: &ModelArtifact) -> Result<Option<PathBuf>> {
        let forests = match &artifact.params {
            ModelParams::Ensemble(forests) => forests.clone(),
            ModelParams::Sequence(_) => return Ok(None),
        };
        let persisted = PersistedArtifact {
            version: artifact.version,
            horizon_hours: artifact.horizon_hours,
            window_length: artifact.window_length,
            training_samples: artifact.training_samples,
            created_at: artifact.created_at,
            validation: artifact.validation,
            forests,
        };
        let payload = serde_json::to_string(&persisted).context("Failed to serialize artifact")?;
        let envelope = Envelope {
            checksum: compute_checksum(payload.as_bytes()),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope).context("Failed to serialize artifact envelope")?;

        let path = self.path_for(artifact.horizon_hours, artifact.version);
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Artifact saved");

        self.cleanup(artifact.horizon_hours)?;
        Ok(Some(path))
    }

    /// Load the newest valid artifacts for every horizon on disk.
    ///
    /// Unreadable or tampered files are skipped with a warning.
    pub fn load_all(&self) -> Result<BTreeMap<u32, LoadedArtifacts>> {
        let mut out: BTreeMap<u32, LoadedArtifacts> = BTreeMap::new();
        for (horizon, versions) in self.scan()? {
            let loaded = out.entry(horizon).or_default();
            for (_, path) in versions.into_iter().rev() {
                match load_file(&path) {
                    Ok(artifact) => {
                        if loaded.current.is_none() {
                            loaded.current = Some(artifact);
                        } else {
                            loaded.previous = Some(artifact);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable artifact");
                    }
                }
            }
        }
        out.retain(|_, l| l.current.is_some());
        Ok(out)
    }

    /// Horizon to (version, path), oldest version first
    fn scan(&self) -> Result<BTreeMap<u32, Vec<(u64, PathBuf)>>> {
        let mut out: BTreeMap<u32, Vec<(u64, PathBuf)>> = BTreeMap::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list artifact directory {:?}", self.dir))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((h, v)) = parse_file_name(name) {
                out.entry(h).or_default().push((v, path));
            }
        }
        for versions in out.values_mut() {
            versions.sort_by_key(|(v, _)| *v);
        }
        Ok(out)
    }

    fn cleanup(&self, horizon_hours: u32) -> Result<()> {
        let scanned = self.scan()?;
        let Some(versions) = scanned.get(&horizon_hours) else {
            return Ok(());
        };
        let excess = versions.len().saturating_sub(VERSIONS_TO_KEEP);
        for (_, path) in &versions[..excess] {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove old artifact");
            }
        }
        Ok(())
    }
}

fn parse_file_name(name: &str) -> Option<(u32, u64)> {
    let stem = name.strip_suffix(".json")?;
    let (h, v) = stem.strip_prefix('h')?.split_once("-v")?;
    Some((h.parse().ok()?, v.parse().ok()?))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp artifact file {:?}", temp_path))?;
    file.write_all(bytes).context("Failed to write artifact")?;
    file.sync_all().context("Failed to sync artifact file")?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}

fn load_file(path: &Path) -> Result<ModelArtifact> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let envelope: Envelope = serde_json::from_slice(&bytes).context("Malformed artifact envelope")?;
    let computed = compute_checksum(envelope.payload.as_bytes());
    if computed != envelope.checksum {
        return Err(anyhow!(
            "Checksum mismatch: expected {}, got {}",
            envelope.checksum,
            computed
        ));
    }
    let persisted: PersistedArtifact =
        serde_json::from_str(&envelope.payload).context("Malformed artifact payload")?;
    persisted.forests.validate()?;

    Ok(ModelArtifact {
        version: persisted.version,
        horizon_hours: persisted.horizon_hours,
        window_length: persisted.window_length,
        params: ModelParams::Ensemble(persisted.forests),
        training_samples: persisted.training_samples,
        created_at: persisted.created_at,
        validation: persisted.validation,
    })
}

/// Hex-encoded SHA-256 of `data`
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
