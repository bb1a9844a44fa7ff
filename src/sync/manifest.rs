use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::PreservedFields;
use crate::eid::Eid;
use crate::storage::{BackendLocal, StorageManager};

const MANIFEST_FILE: &str = "manifests.yaml";
const FAILURES_FILE: &str = "sync_failures.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest file is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),
}

/// Per-deck sync bookkeeping. Only successful transfers touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncManifest {
    pub deck_id: Eid,
    #[serde(default)]
    pub remote_location: Option<String>,
    #[serde(default)]
    pub last_exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_imported_at: Option<DateTime<Utc>>,
    /// Deck `updated_at` right after the last transfer; a later value means
    /// local edits the remote side has not seen.
    #[serde(default)]
    pub synced_deck_version: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "PreservedFields::is_empty")]
    pub preserved: PreservedFields,
}

impl SyncManifest {
    pub fn new(deck_id: Eid) -> Self {
        SyncManifest {
            deck_id,
            remote_location: None,
            last_exported_at: None,
            last_imported_at: None,
            synced_deck_version: None,
            preserved: PreservedFields::default(),
        }
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_exported_at.max(self.last_imported_at)
    }
}

/// Last failed transfer of a deck. Kept apart from the manifest, which a
/// failure must not touch, so later runs can still report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// All manifests, one YAML file keyed by deck id.
pub struct ManifestStore {
    store: BackendLocal,
    manifests: Mutex<BTreeMap<Eid, SyncManifest>>,
    failures: Mutex<BTreeMap<Eid, SyncFailure>>,
}

impl ManifestStore {
    pub fn load(store: BackendLocal) -> Result<Self, ManifestError> {
        let manifests = read_yaml(&store, MANIFEST_FILE)?;
        let failures = read_yaml(&store, FAILURES_FILE)?;

        Ok(ManifestStore {
            store,
            manifests: Mutex::new(manifests),
            failures: Mutex::new(failures),
        })
    }

    pub fn get(&self, deck_id: &Eid) -> Option<SyncManifest> {
        self.lock().get(deck_id).cloned()
    }

    /// Apply `update` to the deck's manifest and persist all manifests.
    /// Nothing changes in memory if the write fails.
    pub fn update(
        &self,
        deck_id: &Eid,
        update: impl FnOnce(&mut SyncManifest),
    ) -> Result<SyncManifest, ManifestError> {
        let mut manifests = self.lock();

        let mut manifest = manifests
            .get(deck_id)
            .cloned()
            .unwrap_or_else(|| SyncManifest::new(deck_id.clone()));
        update(&mut manifest);

        let mut next = manifests.clone();
        next.insert(deck_id.clone(), manifest.clone());
        let yaml = serde_yml::to_string(&next)?;
        self.store.write(MANIFEST_FILE, yaml.as_bytes())?;

        *manifests = next;
        Ok(manifest)
    }

    pub fn remove(&self, deck_id: &Eid) -> Result<(), ManifestError> {
        let mut manifests = self.lock();
        if !manifests.contains_key(deck_id) {
            return Ok(());
        }

        let mut next = manifests.clone();
        next.remove(deck_id);
        self.store.write(MANIFEST_FILE, serde_yml::to_string(&next)?.as_bytes())?;
        *manifests = next;
        Ok(())
    }

    pub fn failure(&self, deck_id: &Eid) -> Option<SyncFailure> {
        self.lock_failures().get(deck_id).cloned()
    }

    pub fn record_failure(&self, deck_id: &Eid, reason: &str) -> Result<(), ManifestError> {
        let failure = SyncFailure {
            reason: reason.to_string(),
            at: Utc::now(),
        };
        self.write_failures(|failures| {
            failures.insert(deck_id.clone(), failure);
        })
    }

    pub fn clear_failure(&self, deck_id: &Eid) -> Result<(), ManifestError> {
        if self.failure(deck_id).is_none() {
            return Ok(());
        }
        self.write_failures(|failures| {
            failures.remove(deck_id);
        })
    }

    fn write_failures(&self, change: impl FnOnce(&mut BTreeMap<Eid, SyncFailure>)) -> Result<(), ManifestError> {
        let mut failures = self.lock_failures();
        let mut next = failures.clone();
        change(&mut next);
        self.store.write(FAILURES_FILE, serde_yml::to_string(&next)?.as_bytes())?;
        *failures = next;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Eid, SyncManifest>> {
        self.manifests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, BTreeMap<Eid, SyncFailure>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_yaml<T>(store: &BackendLocal, ident: &str) -> Result<BTreeMap<Eid, T>, ManifestError>
where
    T: serde::de::DeserializeOwned,
{
    if !store.exists(ident) {
        return Ok(BTreeMap::new());
    }
    let bytes = store.read(ident)?;
    Ok(serde_yml::from_str(&String::from_utf8_lossy(&bytes))?)
}
