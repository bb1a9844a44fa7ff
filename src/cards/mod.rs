//! Decks, cards and the storage boundary the core reads them through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;
use crate::semantic::codec::CodecError;

mod backend_csv;

pub use backend_csv::BackendCsv;

pub const DEFAULT_BACK_FORMAT: &str = "markdown";

/// Suffix appended to the title of a duplicated card.
const COPY_SUFFIX: &str = " (Copy)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub id: Eid,
    pub name: String,
    pub description: String,
    pub artwork_url: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever the deck or any of its cards changes.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeckCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeckUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Eid,
    pub deck_id: Eid,
    pub front_title: String,
    /// Zone template for the card front, see [`crate::template`].
    pub front_custom_json: Option<String>,
    pub back_content: String,
    pub back_format: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    /// Present only if computed from the current `back_content`.
    pub content_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Whether search has to (re)compute this card's embedding.
    pub fn needs_embedding(&self, dimensions: usize) -> bool {
        match &self.content_embedding {
            Some(vector) => vector.len() != dimensions,
            None => !self.back_content.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CardCreate {
    pub deck_id: Eid,
    #[serde(default)]
    pub front_title: Option<String>,
    #[serde(default)]
    pub front_custom_json: Option<String>,
    #[serde(default)]
    pub back_content: Option<String>,
    #[serde(default)]
    pub back_format: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CardUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_id: Option<Eid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_custom_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("deck not found: {0}")]
    DeckNotFound(Eid),

    #[error("card not found: {0}")]
    CardNotFound(Eid),

    #[error("deck name must not be empty")]
    EmptyDeckName,

    #[error("invalid record in {file} at row {row}: {reason}")]
    InvalidRecord {
        file: &'static str,
        row: usize,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("vector encoding error: {0}")]
    Codec(#[from] CodecError),
}

/// Generic record interface over a card database.
///
/// The textual embedding form is authoritative; a backend with a native
/// vector column keeps that column in sync on its own.
pub trait CardStore: Send + Sync {
    fn decks(&self) -> Vec<Deck>;
    fn deck(&self, id: &Eid) -> Option<Deck>;
    fn create_deck(&self, create: DeckCreate) -> Result<Deck, StoreError>;
    fn update_deck(&self, id: &Eid, update: DeckUpdate) -> Result<Deck, StoreError>;
    /// Deletes the deck and every card in it.
    fn delete_deck(&self, id: &Eid) -> Result<(), StoreError>;

    /// Cards in stored order, for one deck or all decks.
    fn cards(&self, deck_id: Option<&Eid>) -> Vec<Card>;
    fn card(&self, id: &Eid) -> Option<Card>;
    fn create_card(&self, create: CardCreate) -> Result<Card, StoreError>;
    /// Changing `back_content` drops the stored embedding.
    fn update_card(&self, id: &Eid, update: CardUpdate) -> Result<Card, StoreError>;
    fn delete_card(&self, id: &Eid) -> Result<(), StoreError>;
    fn duplicate_card(&self, id: &Eid) -> Result<Card, StoreError>;

    /// Store `embedding` only if the card still holds `source_content`.
    /// Returns `false` when the content moved on in the meantime.
    fn set_embedding(
        &self,
        id: &Eid,
        source_content: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<bool, StoreError>;

    /// Replace a deck's metadata and all of its cards in one commit,
    /// creating the deck if it does not exist. Returns the stored cards in
    /// input order; ids taken by other decks are replaced.
    fn replace_deck(&self, deck: Deck, cards: Vec<Card>) -> Result<Vec<Card>, StoreError>;
}

pub(crate) fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

pub(crate) fn copy_title(title: &str) -> String {
    format!("{title}{COPY_SUFFIX}")
}

/// Split a comma/whitespace separated tag list from the command line.
pub fn parse_tags(tags: &str) -> Vec<String> {
    dedup_tags(
        tags.split([',', ' '])
            .map(|tag| tag.to_lowercase())
            .collect(),
    )
}
