//! Local file-backed card database.
//!
//! Two CSV files live in the data directory:
//! - `decks.csv`: one row per deck
//! - `cards.csv`: one row per card, in stored order; `tags` is a JSON
//!   array and `content_embedding` the codec text form (empty when absent)
//!
//! Every mutation builds the next state, writes both files through
//! [`BackendLocal`] (temp file + rename) and only then swaps the in-memory
//! state, so readers never observe a half-applied change.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::*;
use crate::semantic::codec;
use crate::storage::{BackendLocal, StorageManager};

const DECKS_FILE: &str = "decks.csv";
const CARDS_FILE: &str = "cards.csv";

const DECK_HEADERS: [&str; 7] = [
    "id",
    "name",
    "description",
    "artwork_url",
    "is_public",
    "created_at",
    "updated_at",
];

const CARD_HEADERS: [&str; 11] = [
    "id",
    "deck_id",
    "front_title",
    "front_custom_json",
    "back_content",
    "back_format",
    "tags",
    "favorite",
    "content_embedding",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone)]
struct State {
    decks: Vec<Deck>,
    cards: Vec<Card>,
}

#[derive(Clone)]
pub struct BackendCsv {
    state: Arc<RwLock<State>>,
    store: BackendLocal,
}

impl BackendCsv {
    /// Open the database in `base_dir`. Missing files mean an empty database;
    /// they are created on the first write.
    pub fn load(base_dir: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let store = BackendLocal::new(base_dir)?;
        let now = Instant::now();

        let decks = if store.exists(DECKS_FILE) {
            decode_decks(&store.read(DECKS_FILE)?)?
        } else {
            log::info!("no deck table at {}, starting empty", store.path_of(DECKS_FILE).display());
            vec![]
        };

        let cards = if store.exists(CARDS_FILE) {
            decode_cards(&store.read(CARDS_FILE)?)?
        } else {
            vec![]
        };

        log::debug!(
            "took {}ms to read {} decks and {} cards",
            now.elapsed().as_micros() as f64 / 1000.0,
            decks.len(),
            cards.len()
        );

        Ok(BackendCsv {
            state: Arc::new(RwLock::new(State { decks, cards })),
            store,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist `next` and make it current. On failure the previous files are
    /// restored as far as possible and the in-memory state is unchanged.
    fn commit(&self, current: &mut State, next: State) -> Result<(), StoreError> {
        let cards_bytes = encode_cards(&next.cards)?;
        let decks_bytes = encode_decks(&next.decks)?;

        self.store.write(CARDS_FILE, &cards_bytes)?;
        if let Err(err) = self.store.write(DECKS_FILE, &decks_bytes) {
            log::error!("failed to write {DECKS_FILE}, rolling back {CARDS_FILE}: {err}");
            match encode_cards(&current.cards) {
                Ok(previous) => {
                    if let Err(err) = self.store.write(CARDS_FILE, &previous) {
                        log::error!("rollback of {CARDS_FILE} failed: {err}");
                    }
                }
                Err(err) => log::error!("rollback of {CARDS_FILE} failed: {err}"),
            }
            return Err(err.into());
        }

        *current = next;
        Ok(())
    }
}

fn touch_deck(state: &mut State, deck_id: &Eid, now: DateTime<Utc>) {
    if let Some(deck) = state.decks.iter_mut().find(|d| &d.id == deck_id) {
        deck.updated_at = now;
    }
}

impl CardStore for BackendCsv {
    fn decks(&self) -> Vec<Deck> {
        self.read().decks.clone()
    }

    fn deck(&self, id: &Eid) -> Option<Deck> {
        self.read().decks.iter().find(|d| &d.id == id).cloned()
    }

    fn create_deck(&self, create: DeckCreate) -> Result<Deck, StoreError> {
        let name = create.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::EmptyDeckName);
        }

        let now = Utc::now();
        let deck = Deck {
            id: Eid::new(),
            name,
            description: create.description.unwrap_or_default(),
            artwork_url: create.artwork_url.filter(|url| !url.is_empty()),
            is_public: create.is_public,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.write();
        let mut next = state.clone();
        next.decks.push(deck.clone());
        self.commit(&mut state, next)?;

        Ok(deck)
    }

    fn update_deck(&self, id: &Eid, update: DeckUpdate) -> Result<Deck, StoreError> {
        let mut state = self.write();
        let mut next = state.clone();

        let deck = next
            .decks
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StoreError::DeckNotFound(id.clone()))?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(StoreError::EmptyDeckName);
            }
            deck.name = name;
        }
        if let Some(description) = update.description {
            deck.description = description;
        }
        if let Some(artwork_url) = update.artwork_url {
            deck.artwork_url = Some(artwork_url).filter(|url| !url.is_empty());
        }
        if let Some(is_public) = update.is_public {
            deck.is_public = is_public;
        }
        deck.updated_at = Utc::now();

        let result = deck.clone();
        self.commit(&mut state, next)?;
        Ok(result)
    }

    fn delete_deck(&self, id: &Eid) -> Result<(), StoreError> {
        let mut state = self.write();
        if !state.decks.iter().any(|d| &d.id == id) {
            return Err(StoreError::DeckNotFound(id.clone()));
        }

        let mut next = state.clone();
        next.decks.retain(|d| &d.id != id);
        next.cards.retain(|c| &c.deck_id != id);
        self.commit(&mut state, next)
    }

    fn cards(&self, deck_id: Option<&Eid>) -> Vec<Card> {
        self.read()
            .cards
            .iter()
            .filter(|card| deck_id.map(|id| &card.deck_id == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn card(&self, id: &Eid) -> Option<Card> {
        self.read().cards.iter().find(|c| &c.id == id).cloned()
    }

    fn create_card(&self, create: CardCreate) -> Result<Card, StoreError> {
        let mut state = self.write();
        if !state.decks.iter().any(|d| d.id == create.deck_id) {
            return Err(StoreError::DeckNotFound(create.deck_id));
        }

        let now = Utc::now();
        let card = Card {
            id: Eid::new(),
            deck_id: create.deck_id,
            front_title: create.front_title.unwrap_or_default(),
            front_custom_json: create.front_custom_json.filter(|json| !json.trim().is_empty()),
            back_content: create.back_content.unwrap_or_default(),
            back_format: create
                .back_format
                .unwrap_or_else(|| DEFAULT_BACK_FORMAT.to_string()),
            tags: dedup_tags(create.tags.unwrap_or_default()),
            favorite: create.favorite,
            content_embedding: None,
            created_at: now,
            updated_at: now,
        };

        let mut next = state.clone();
        next.cards.push(card.clone());
        touch_deck(&mut next, &card.deck_id, now);
        self.commit(&mut state, next)?;

        Ok(card)
    }

    fn update_card(&self, id: &Eid, update: CardUpdate) -> Result<Card, StoreError> {
        let mut state = self.write();

        if let Some(deck_id) = &update.deck_id {
            if !state.decks.iter().any(|d| &d.id == deck_id) {
                return Err(StoreError::DeckNotFound(deck_id.clone()));
            }
        }

        let mut next = state.clone();
        let now = Utc::now();
        let card = next
            .cards
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::CardNotFound(id.clone()))?;
        let previous_deck = card.deck_id.clone();

        if let Some(deck_id) = update.deck_id {
            card.deck_id = deck_id;
        }
        if let Some(title) = update.front_title {
            card.front_title = title;
        }
        if let Some(json) = update.front_custom_json {
            card.front_custom_json = Some(json).filter(|json| !json.trim().is_empty());
        }
        if let Some(content) = update.back_content {
            if content != card.back_content {
                card.back_content = content;
                card.content_embedding = None;
            }
        }
        if let Some(format) = update.back_format {
            card.back_format = format;
        }
        if let Some(tags) = update.tags {
            card.tags = dedup_tags(tags);
        }
        if let Some(favorite) = update.favorite {
            card.favorite = favorite;
        }
        card.updated_at = now;

        let result = card.clone();
        touch_deck(&mut next, &previous_deck, now);
        touch_deck(&mut next, &result.deck_id, now);
        self.commit(&mut state, next)?;

        Ok(result)
    }

    fn delete_card(&self, id: &Eid) -> Result<(), StoreError> {
        let mut state = self.write();
        let idx = state
            .cards
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| StoreError::CardNotFound(id.clone()))?;

        let mut next = state.clone();
        let removed = next.cards.remove(idx);
        touch_deck(&mut next, &removed.deck_id, Utc::now());
        self.commit(&mut state, next)
    }

    fn duplicate_card(&self, id: &Eid) -> Result<Card, StoreError> {
        let mut state = self.write();
        let idx = state
            .cards
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| StoreError::CardNotFound(id.clone()))?;

        let now = Utc::now();
        let original = &state.cards[idx];
        let copy = Card {
            id: Eid::new(),
            front_title: copy_title(&original.front_title),
            created_at: now,
            updated_at: now,
            ..original.clone()
        };

        let mut next = state.clone();
        next.cards.insert(idx + 1, copy.clone());
        touch_deck(&mut next, &copy.deck_id, now);
        self.commit(&mut state, next)?;

        Ok(copy)
    }

    fn set_embedding(
        &self,
        id: &Eid,
        source_content: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<bool, StoreError> {
        let mut state = self.write();
        let Some(idx) = state.cards.iter().position(|c| &c.id == id) else {
            return Err(StoreError::CardNotFound(id.clone()));
        };

        if state.cards[idx].back_content != source_content {
            return Ok(false);
        }
        if state.cards[idx].content_embedding == embedding {
            return Ok(true);
        }

        // derived data: updated_at stays, so a re-embed is not a local edit
        let mut next = state.clone();
        next.cards[idx].content_embedding = embedding;
        self.commit(&mut state, next)?;
        Ok(true)
    }

    fn replace_deck(&self, deck: Deck, cards: Vec<Card>) -> Result<Vec<Card>, StoreError> {
        let mut state = self.write();
        let mut next = state.clone();

        match next.decks.iter_mut().find(|d| d.id == deck.id) {
            Some(existing) => *existing = deck.clone(),
            None => next.decks.push(deck.clone()),
        }

        next.cards.retain(|c| c.deck_id != deck.id);
        next.cards.extend(cards.into_iter().map(|mut card| {
            card.deck_id = deck.id.clone();
            card
        }));

        // card ids are unique across the database
        let mut seen = std::collections::HashSet::new();
        for card in next.cards.iter_mut() {
            if !seen.insert(card.id.clone()) {
                log::warn!("card id {} already taken, assigning a new id", card.id);
                card.id = Eid::new();
                seen.insert(card.id.clone());
            }
        }

        self.commit(&mut state, next)?;
        Ok(state.cards.iter().filter(|c| c.deck_id == deck.id).cloned().collect())
    }
}

fn encode_decks(decks: &[Deck]) -> Result<Vec<u8>, StoreError> {
    let mut csv_wrt = csv::Writer::from_writer(vec![]);
    csv_wrt.write_record(DECK_HEADERS)?;
    for deck in decks {
        csv_wrt.write_record([
            deck.id.as_str(),
            &deck.name,
            &deck.description,
            deck.artwork_url.as_deref().unwrap_or_default(),
            if deck.is_public { "true" } else { "false" },
            &deck.created_at.to_rfc3339(),
            &deck.updated_at.to_rfc3339(),
        ])?;
    }
    csv_wrt
        .into_inner()
        .map_err(|err| StoreError::Io(err.into_error()))
}

fn encode_cards(cards: &[Card]) -> Result<Vec<u8>, StoreError> {
    let mut csv_wrt = csv::Writer::from_writer(vec![]);
    csv_wrt.write_record(CARD_HEADERS)?;
    for card in cards {
        let tags = serde_json::to_string(&card.tags).map_err(|err| StoreError::Codec(err.into()))?;
        let embedding = match &card.content_embedding {
            Some(vector) => codec::to_text(vector)?,
            None => String::new(),
        };

        csv_wrt.write_record([
            card.id.as_str(),
            card.deck_id.as_str(),
            &card.front_title,
            card.front_custom_json.as_deref().unwrap_or_default(),
            &card.back_content,
            &card.back_format,
            &tags,
            if card.favorite { "true" } else { "false" },
            &embedding,
            &card.created_at.to_rfc3339(),
            &card.updated_at.to_rfc3339(),
        ])?;
    }
    csv_wrt
        .into_inner()
        .map_err(|err| StoreError::Io(err.into_error()))
}

struct Row<'a> {
    file: &'static str,
    row: usize,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn field(&self, idx: usize, name: &str) -> Result<&str, StoreError> {
        self.record.get(idx).ok_or_else(|| self.invalid(format!("missing column {name}")))
    }

    fn optional(&self, idx: usize, name: &str) -> Result<Option<String>, StoreError> {
        let value = self.field(idx, name)?;
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn boolean(&self, idx: usize, name: &str) -> Result<bool, StoreError> {
        match self.field(idx, name)? {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(self.invalid(format!("{name} is not a boolean: {other:?}"))),
        }
    }

    fn timestamp(&self, idx: usize, name: &str) -> Result<DateTime<Utc>, StoreError> {
        let value = self.field(idx, name)?;
        DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| self.invalid(format!("{name}: {err}")))
    }

    fn invalid(&self, reason: String) -> StoreError {
        StoreError::InvalidRecord {
            file: self.file,
            row: self.row,
            reason,
        }
    }
}

fn decode_decks(bytes: &[u8]) -> Result<Vec<Deck>, StoreError> {
    let mut csv_reader = csv::Reader::from_reader(bytes);
    let mut decks = vec![];

    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row = Row {
            file: DECKS_FILE,
            row: row + 1,
            record: &record,
        };

        decks.push(Deck {
            id: Eid::from(row.field(0, "id")?),
            name: row.field(1, "name")?.to_string(),
            description: row.field(2, "description")?.to_string(),
            artwork_url: row.optional(3, "artwork_url")?,
            is_public: row.boolean(4, "is_public")?,
            created_at: row.timestamp(5, "created_at")?,
            updated_at: row.timestamp(6, "updated_at")?,
        });
    }

    Ok(decks)
}

fn decode_cards(bytes: &[u8]) -> Result<Vec<Card>, StoreError> {
    let mut csv_reader = csv::Reader::from_reader(bytes);
    let mut cards = vec![];

    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row = Row {
            file: CARDS_FILE,
            row: row + 1,
            record: &record,
        };

        let tags_text = row.field(6, "tags")?;
        let tags: Vec<String> = if tags_text.is_empty() {
            vec![]
        } else {
            serde_json::from_str(tags_text).map_err(|err| row.invalid(format!("tags: {err}")))?
        };

        let content_embedding = codec::from_text(row.field(8, "content_embedding")?)
            .map_err(|err| row.invalid(format!("content_embedding: {err}")))?;

        cards.push(Card {
            id: Eid::from(row.field(0, "id")?),
            deck_id: Eid::from(row.field(1, "deck_id")?),
            front_title: row.field(2, "front_title")?.to_string(),
            front_custom_json: row.optional(3, "front_custom_json")?,
            back_content: row.field(4, "back_content")?.to_string(),
            back_format: row
                .optional(5, "back_format")?
                .unwrap_or_else(|| DEFAULT_BACK_FORMAT.to_string()),
            tags,
            favorite: row.boolean(7, "favorite")?,
            content_embedding,
            created_at: row.timestamp(9, "created_at")?,
            updated_at: row.timestamp(10, "updated_at")?,
        });
    }

    Ok(cards)
}
