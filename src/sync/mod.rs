//! Deck export and import through the interchange document.
//!
//! - `document`: wire format and conversion to/from local decks
//! - `manifest`: per-deck timestamps of the last transfers
//! - `remote`: where documents live (filesystem or HTTP)
//! - `manager`: the per-deck sync state machine

pub mod document;
pub mod manager;
pub mod manifest;
pub mod remote;

pub use manager::{SyncError, SyncManager, SyncReport, SyncState, SyncStatus};
pub use manifest::ManifestStore;
pub use remote::RemoteRouter;
