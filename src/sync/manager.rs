//! Per-deck export/import state machine.
//!
//! ```text
//! Idle ──export──▶ Exporting ──ok──▶ Idle (lastExportedAt)
//!   │                  └──err──▶ Failed
//!   └──import──▶ Importing ──ok──▶ Idle (lastImportedAt)
//!                      └──err──▶ Failed
//! Failed ──user retry──▶ Exporting | Importing
//! ```
//!
//! One operation per deck at a time; a second one is rejected, not queued.
//! Remote calls are bounded by the configured timeout. Import overwrites
//! the local deck in a single store commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::document::{self, InterchangeDocument};
use super::manifest::{ManifestError, ManifestStore, SyncManifest};
use super::remote::{RemoteError, RemoteRepository};
use crate::cards::{CardStore, Deck, StoreError};
use crate::eid::Eid;
use crate::semantic::EmbeddingProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Exporting,
    Importing,
    Failed(String),
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Exporting => write!(f, "exporting"),
            SyncState::Importing => write!(f, "importing"),
            SyncState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync of deck {0} is already in progress")]
    ConflictingSync(Eid),

    #[error("deck not found: {0}")]
    DeckNotFound(Eid),

    #[error("remote unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("remote did not answer within {0} seconds")]
    RemoteTimeout(u64),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no document at {0}")]
    NotFound(String),

    #[error("invalid location {0:?}")]
    InvalidLocation(String),

    #[error("{0}")]
    MalformedDocument(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("sync cancelled while writing to {0}; the remote document may be incomplete")]
    CancelledAfterPartialWrite(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

impl SyncError {
    fn from_remote(err: RemoteError, timeout: Duration) -> Self {
        match err {
            RemoteError::Unreachable(reason) => SyncError::RemoteUnreachable(reason),
            RemoteError::Timeout => SyncError::RemoteTimeout(timeout.as_secs()),
            RemoteError::PermissionDenied(reason) => SyncError::PermissionDenied(reason),
            RemoteError::NotFound(location) => SyncError::NotFound(location),
            RemoteError::InvalidLocation(location) => SyncError::InvalidLocation(location),
            RemoteError::Malformed(err) => SyncError::MalformedDocument(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub deck_id: Eid,
    pub location: String,
    pub cards: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub deck_id: Eid,
    pub state: SyncState,
    pub manifest: Option<SyncManifest>,
    /// The deck changed after the last successful transfer.
    pub local_changes: bool,
    pub warning: Option<String>,
}

pub struct SyncManager {
    store: Arc<dyn CardStore>,
    remote: Arc<dyn RemoteRepository>,
    manifests: ManifestStore,
    provider: Option<Arc<EmbeddingProvider>>,
    timeout: Duration,
    states: Mutex<HashMap<Eid, SyncState>>,
}

/// Marks a deck busy; a dropped operation falls back to `Idle`.
struct InFlight<'a> {
    manager: &'a SyncManager,
    deck_id: Eid,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self, state: SyncState) {
        self.manager.record_outcome(&self.deck_id, &state);
        self.manager.set_state(&self.deck_id, state);
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.set_state(&self.deck_id, SyncState::Idle);
        }
    }
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn CardStore>,
        remote: Arc<dyn RemoteRepository>,
        manifests: ManifestStore,
        timeout: Duration,
    ) -> Self {
        SyncManager {
            store,
            remote,
            manifests,
            provider: None,
            timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Use the loaded model's width to validate imported embeddings.
    pub fn with_provider(mut self, provider: Arc<EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Falls back to the failure recorded by an earlier run.
    pub fn state(&self, deck_id: &Eid) -> SyncState {
        if let Some(state) = self.lock().get(deck_id) {
            return state.clone();
        }
        match self.manifests.failure(deck_id) {
            Some(failure) => SyncState::Failed(failure.reason),
            None => SyncState::Idle,
        }
    }

    pub async fn export(
        &self,
        deck_id: &Eid,
        location: &str,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let deck = self
            .store
            .deck(deck_id)
            .ok_or_else(|| SyncError::DeckNotFound(deck_id.clone()))?;
        let inflight = self.begin(deck_id, SyncState::Exporting)?;
        log::info!("exporting deck {deck_id} to {location}");

        let cards = self.store.cards(Some(deck_id));
        let preserved = self.manifests.get(deck_id).map(|m| m.preserved);
        let doc = document::serialize(&deck, &cards, preserved.as_ref());

        if cancel.is_cancelled() {
            log::info!("export of deck {deck_id} cancelled before any write");
            inflight.finish(SyncState::Idle);
            return Err(SyncError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::CancelledAfterPartialWrite(location.to_string())),
            result = tokio::time::timeout(self.timeout, self.remote.put_document(location, &doc)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(SyncError::from_remote(err, self.timeout)),
                    Err(_) => Err(SyncError::RemoteTimeout(self.timeout.as_secs())),
                }
            }
        };

        if let Err(err) = result {
            return Err(self.fail(inflight, err));
        }

        let at = Utc::now();
        let recorded = self.manifests.update(deck_id, |manifest| {
            manifest.remote_location = Some(location.to_string());
            manifest.last_exported_at = Some(at);
            manifest.synced_deck_version = Some(deck.updated_at);
        });
        if let Err(err) = recorded {
            return Err(self.fail(inflight, err.into()));
        }

        inflight.finish(SyncState::Idle);
        log::info!("exported {} cards of deck {deck_id}", cards.len());
        Ok(SyncReport {
            deck_id: deck_id.clone(),
            location: location.to_string(),
            cards: cards.len(),
            at,
        })
    }

    /// Replace the deck's contents with the document at `location`,
    /// creating the deck if needed. Local-only changes are discarded.
    pub async fn import(
        &self,
        deck_id: &Eid,
        location: &str,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let inflight = self.begin(deck_id, SyncState::Importing)?;
        log::info!("importing {location} into deck {deck_id}");

        let fetched: Result<InterchangeDocument, SyncError> = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.remote.get_document(location)) => {
                match result {
                    Ok(Ok(doc)) => Ok(doc),
                    Ok(Err(err)) => Err(SyncError::from_remote(err, self.timeout)),
                    Err(_) => Err(SyncError::RemoteTimeout(self.timeout.as_secs())),
                }
            }
        };

        let doc = match fetched {
            Ok(doc) => doc,
            Err(SyncError::Cancelled) => {
                log::info!("import into deck {deck_id} cancelled before any write");
                inflight.finish(SyncState::Idle);
                return Err(SyncError::Cancelled);
            }
            Err(err) => return Err(self.fail(inflight, err)),
        };

        let at = Utc::now();
        let target = self.store.deck(deck_id).unwrap_or_else(|| Deck {
            id: deck_id.clone(),
            name: String::new(),
            description: String::new(),
            artwork_url: None,
            is_public: false,
            created_at: at,
            updated_at: at,
        });
        let dimensions = self.provider.as_ref().and_then(|p| p.dimensions());

        let imported = match document::deserialize(doc, &target, dimensions, at) {
            Ok(imported) => imported,
            Err(err) => return Err(self.fail(inflight, SyncError::MalformedDocument(err.to_string()))),
        };
        if imported.dropped_embeddings > 0 {
            log::warn!(
                "{} embeddings had the wrong width and will be recomputed",
                imported.dropped_embeddings
            );
        }

        // last point where nothing local has changed
        if cancel.is_cancelled() {
            log::info!("import into deck {deck_id} cancelled before any write");
            inflight.finish(SyncState::Idle);
            return Err(SyncError::Cancelled);
        }

        let count = imported.cards.len();
        let version = imported.deck.updated_at;
        let document_ids: Vec<String> = imported.cards.iter().map(|c| c.id.to_string()).collect();
        let stored = match self.store.replace_deck(imported.deck, imported.cards) {
            Ok(stored) => stored,
            Err(err) => return Err(self.fail(inflight, err.into())),
        };

        let mut preserved = imported.preserved;
        for (from, card) in document_ids.iter().zip(&stored) {
            preserved.rename_card(from, card.id.as_str());
        }

        let recorded = self.manifests.update(deck_id, |manifest| {
            manifest.remote_location = Some(location.to_string());
            manifest.last_imported_at = Some(at);
            manifest.synced_deck_version = Some(version);
            manifest.preserved = preserved;
        });
        if let Err(err) = recorded {
            return Err(self.fail(inflight, err.into()));
        }

        inflight.finish(SyncState::Idle);
        log::info!("imported {count} cards into deck {deck_id}");
        Ok(SyncReport {
            deck_id: deck_id.clone(),
            location: location.to_string(),
            cards: count,
            at,
        })
    }

    pub fn status(&self, deck_id: &Eid) -> Result<SyncStatus, SyncError> {
        let deck = self
            .store
            .deck(deck_id)
            .ok_or_else(|| SyncError::DeckNotFound(deck_id.clone()))?;
        let manifest = self.manifests.get(deck_id);

        let local_changes = match manifest.as_ref().and_then(|m| m.synced_deck_version) {
            Some(version) => deck.updated_at > version,
            None => false,
        };

        let warning = if local_changes {
            Some(format!(
                "deck '{}' changed locally since the last sync; importing will discard those \
                 changes and exporting will overwrite the remote copy",
                deck.name
            ))
        } else {
            None
        };

        Ok(SyncStatus {
            deck_id: deck_id.clone(),
            state: self.state(deck_id),
            manifest,
            local_changes,
            warning,
        })
    }

    /// Drop sync bookkeeping of a deleted deck.
    pub fn forget(&self, deck_id: &Eid) -> Result<(), SyncError> {
        self.lock().remove(deck_id);
        self.manifests.clear_failure(deck_id)?;
        Ok(self.manifests.remove(deck_id)?)
    }

    fn begin(&self, deck_id: &Eid, state: SyncState) -> Result<InFlight<'_>, SyncError> {
        let mut states = self.lock();
        if let Some(SyncState::Exporting | SyncState::Importing) = states.get(deck_id) {
            return Err(SyncError::ConflictingSync(deck_id.clone()));
        }
        states.insert(deck_id.clone(), state);

        Ok(InFlight {
            manager: self,
            deck_id: deck_id.clone(),
            finished: false,
        })
    }

    fn fail(&self, inflight: InFlight<'_>, err: SyncError) -> SyncError {
        log::error!("sync of deck {} failed: {err}", inflight.deck_id);
        inflight.finish(SyncState::Failed(err.to_string()));
        err
    }

    fn record_outcome(&self, deck_id: &Eid, state: &SyncState) {
        let result = match state {
            SyncState::Failed(reason) => self.manifests.record_failure(deck_id, reason),
            SyncState::Idle => self.manifests.clear_failure(deck_id),
            SyncState::Exporting | SyncState::Importing => Ok(()),
        };
        if let Err(err) = result {
            log::warn!("could not record sync outcome of deck {deck_id}: {err}");
        }
    }

    fn set_state(&self, deck_id: &Eid, state: SyncState) {
        self.lock().insert(deck_id.clone(), state);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Eid, SyncState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
