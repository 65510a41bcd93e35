//! Persisted camera registry.
//!
//! Owner -> {camera name -> source URL}, stored as a JSON file with
//! last-writer-wins semantics. The registry is reloaded before every
//! mutation so the file stays the single source of truth across add/remove
//! operations. A missing or corrupt file yields an empty registry instead
//! of an error; losing the registry must never take the daemon down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::{CameraIdentity, CameraSource};

/// Owner id -> camera name -> source URL.
pub type RegistryData = BTreeMap<String, BTreeMap<String, String>>;

pub struct CameraRegistry {
    path: PathBuf,
}

impl CameraRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full registry. Missing file is a normal first-run state;
    /// a parse failure is logged and treated as empty.
    pub fn load(&self) -> RegistryData {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RegistryData::new(),
            Err(e) => {
                log::warn!(
                    "failed to read camera registry {}: {} (starting empty)",
                    self.path.display(),
                    e
                );
                return RegistryData::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                log::warn!(
                    "camera registry {} is corrupt: {} (starting empty)",
                    self.path.display(),
                    e
                );
                RegistryData::new()
            }
        }
    }

    /// Overwrite the registry file. Last writer wins.
    pub fn save(&self, data: &RegistryData) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, json).map_err(|e| {
            anyhow!(
                "failed to write camera registry {}: {}",
                self.path.display(),
                e
            )
        })
    }

    /// Record a camera and persist. Replaces any existing URL for the name.
    pub fn add(&self, source: &CameraSource) -> Result<()> {
        let mut data = self.load();
        data.entry(source.identity.owner.clone())
            .or_default()
            .insert(source.identity.name.clone(), source.url.clone());
        self.save(&data)
    }

    /// Remove a camera and persist. Returns whether it was present.
    pub fn remove(&self, identity: &CameraIdentity) -> Result<bool> {
        let mut data = self.load();
        let removed = match data.get_mut(&identity.owner) {
            Some(cameras) => cameras.remove(&identity.name).is_some(),
            None => false,
        };
        if removed {
            if data
                .get(&identity.owner)
                .is_some_and(|cameras| cameras.is_empty())
            {
                data.remove(&identity.owner);
            }
            self.save(&data)?;
        }
        Ok(removed)
    }

    /// Every registered camera, for startup boot.
    pub fn sources(&self) -> Vec<CameraSource> {
        let mut sources = Vec::new();
        for (owner, cameras) in self.load() {
            for (name, url) in cameras {
                match CameraIdentity::new(owner.clone(), name.clone()) {
                    Ok(identity) => sources.push(CameraSource { identity, url }),
                    Err(e) => {
                        log::warn!("skipping invalid registry entry {}/{}: {}", owner, name, e)
                    }
                }
            }
        }
        sources
    }
}
