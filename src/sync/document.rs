//! Interchange document: the backend-neutral JSON form of one deck.
//!
//! Embeddings travel as plain numeric arrays (or `null`), whatever the
//! local backend stores. Fields this version does not know about are kept
//! in `extra` maps and written back out unchanged.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cards::{dedup_tags, Card, Deck, DEFAULT_BACK_FORMAT};
use crate::eid::Eid;

/// Version written by this implementation. Newer documents are read
/// best-effort.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed document: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterchangeDocument {
    pub format_version: u32,
    pub name: String,
    pub description: String,
    pub cards: Vec<CardRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub id: String,
    pub front_title: String,
    pub back_content: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Unknown fields of the last imported document, re-attached on export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreservedFields {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub document: Map<String, Value>,
    /// Keyed by card id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cards: BTreeMap<String, Map<String, Value>>,
}

impl PreservedFields {
    pub fn is_empty(&self) -> bool {
        self.document.is_empty() && self.cards.is_empty()
    }

    /// Move a card's fields to the id the store actually assigned.
    pub fn rename_card(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(extra) = self.cards.remove(from) {
            self.cards.insert(to.to_string(), extra);
        }
    }
}

impl InterchangeDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let document: InterchangeDocument = serde_json::from_slice(bytes)?;
        document.validate()?;
        Ok(document)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn validate(&self) -> Result<(), DocumentError> {
        if self.format_version == 0 {
            return Err(DocumentError::Invalid("formatVersion must be at least 1".into()));
        }
        if self.format_version > FORMAT_VERSION {
            log::warn!(
                "document formatVersion {} is newer than {FORMAT_VERSION}, reading best-effort",
                self.format_version
            );
        }
        if self.name.trim().is_empty() {
            return Err(DocumentError::Invalid("deck name is empty".into()));
        }

        let mut ids = HashSet::with_capacity(self.cards.len());
        for (idx, card) in self.cards.iter().enumerate() {
            if card.id.trim().is_empty() {
                return Err(DocumentError::Invalid(format!("card {idx} has an empty id")));
            }
            if !ids.insert(card.id.as_str()) {
                return Err(DocumentError::Invalid(format!("duplicate card id {}", card.id)));
            }
            // out-of-range numbers parse as infinity
            if let Some(vector) = &card.embedding {
                if vector.iter().any(|x| !x.is_finite()) {
                    return Err(DocumentError::Invalid(format!(
                        "card {} has a non-finite embedding component",
                        card.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Build the interchange form of a deck. Cards keep their order.
pub fn serialize(deck: &Deck, cards: &[Card], preserved: Option<&PreservedFields>) -> InterchangeDocument {
    let empty = PreservedFields::default();
    let preserved = preserved.unwrap_or(&empty);

    InterchangeDocument {
        format_version: FORMAT_VERSION,
        name: deck.name.clone(),
        description: deck.description.clone(),
        cards: cards
            .iter()
            .map(|card| CardRecord {
                id: card.id.to_string(),
                front_title: card.front_title.clone(),
                back_content: card.back_content.clone(),
                tags: card.tags.clone(),
                favorite: card.favorite,
                embedding: card.content_embedding.clone(),
                extra: preserved.cards.get(card.id.as_str()).cloned().unwrap_or_default(),
            })
            .collect(),
        extra: preserved.document.clone(),
    }
}

/// Result of reading a document into a target deck.
#[derive(Debug, Clone)]
pub struct Imported {
    pub deck: Deck,
    pub cards: Vec<Card>,
    pub preserved: PreservedFields,
    /// Embeddings dropped because their width did not match.
    pub dropped_embeddings: usize,
}

/// Turn a document into the full contents of `target`.
///
/// Name and description come from the document; deck fields the format does
/// not carry keep their local values. Embeddings whose width differs from
/// `dimensions` (or, when unknown, from the most common width in the
/// document) are dropped so search recomputes them.
pub fn deserialize(
    document: InterchangeDocument,
    target: &Deck,
    dimensions: Option<usize>,
    now: DateTime<Utc>,
) -> Result<Imported, DocumentError> {
    document.validate()?;

    let expected = dimensions.or_else(|| dominant_width(&document.cards));
    let mut dropped_embeddings = 0;
    let mut preserved = PreservedFields {
        document: document.extra,
        cards: BTreeMap::new(),
    };

    let deck = Deck {
        name: document.name.trim().to_string(),
        description: document.description,
        updated_at: now,
        ..target.clone()
    };

    let mut cards = Vec::with_capacity(document.cards.len());
    for record in document.cards {
        let embedding = match record.embedding {
            Some(vector) if Some(vector.len()) == expected && !vector.is_empty() => Some(vector),
            Some(vector) => {
                log::warn!(
                    "dropping embedding of card {}: {} dimensions, expected {:?}",
                    record.id,
                    vector.len(),
                    expected
                );
                dropped_embeddings += 1;
                None
            }
            None => None,
        };

        if !record.extra.is_empty() {
            preserved.cards.insert(record.id.clone(), record.extra);
        }

        cards.push(Card {
            id: Eid::from(record.id),
            deck_id: deck.id.clone(),
            front_title: record.front_title,
            front_custom_json: None,
            back_content: record.back_content,
            back_format: DEFAULT_BACK_FORMAT.to_string(),
            tags: dedup_tags(record.tags),
            favorite: record.favorite,
            content_embedding: embedding,
            created_at: now,
            updated_at: now,
        });
    }

    Ok(Imported {
        deck,
        cards,
        preserved,
        dropped_embeddings,
    })
}

fn dominant_width(cards: &[CardRecord]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for vector in cards.iter().filter_map(|c| c.embedding.as_ref()) {
        *counts.entry(vector.len()).or_default() += 1;
    }
    // ties resolve to the wider vector so the choice is deterministic
    counts
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map(|(width, _)| width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck() -> Deck {
        let now = Utc::now();
        Deck {
            id: Eid::new(),
            name: "Kitchen".into(),
            description: "things to cook".into(),
            artwork_url: Some("https://example.com/art.png".into()),
            is_public: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn card(deck: &Deck, content: &str, embedding: Option<Vec<f32>>) -> Card {
        let now = Utc::now();
        Card {
            id: Eid::new(),
            deck_id: deck.id.clone(),
            front_title: format!("title of {content}"),
            front_custom_json: None,
            back_content: content.into(),
            back_format: DEFAULT_BACK_FORMAT.into(),
            tags: vec!["kitchen".into(), content.split(' ').next().unwrap_or_default().into()],
            favorite: content.len() % 2 == 0,
            content_embedding: embedding,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let deck = deck();
        let cards = vec![card(&deck, "bread", Some(vec![0.5, -0.25])), card(&deck, "tax", None)];
        let bytes = serialize(&deck, &cards, None).to_vec().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["formatVersion"], 1);
        assert_eq!(value["name"], "Kitchen");
        assert_eq!(value["description"], "things to cook");
        let first = &value["cards"][0];
        for field in ["id", "frontTitle", "backContent", "tags", "favorite", "embedding"] {
            assert!(first.get(field).is_some(), "missing {field}");
        }
        assert_eq!(first["embedding"], serde_json::json!([0.5, -0.25]));
        assert!(value["cards"][1]["embedding"].is_null());
    }

    #[test]
    fn test_round_trip_preserves_content_and_order() {
        let source = deck();
        let cards = vec![
            card(&source, "how to bake bread", Some(vec![1.0, 0.0, 0.0])),
            card(&source, "sourdough baking tips", None),
            card(&source, "quarterly tax filing", Some(vec![0.0, 0.0, 1.0])),
        ];

        let bytes = serialize(&source, &cards, None).to_vec().unwrap();
        let document = InterchangeDocument::from_slice(&bytes).unwrap();

        let mut target = deck();
        target.name = "old name".into();
        let imported = deserialize(document, &target, None, Utc::now()).unwrap();

        assert_eq!(imported.deck.id, target.id);
        assert_eq!(imported.deck.name, source.name);
        assert_eq!(imported.deck.description, source.description);
        assert_eq!(imported.cards.len(), 3);
        for (got, want) in imported.cards.iter().zip(&cards) {
            assert_eq!(got.id, want.id);
            assert_eq!(got.deck_id, target.id);
            assert_eq!(got.front_title, want.front_title);
            assert_eq!(got.back_content, want.back_content);
            assert_eq!(got.tags, want.tags);
            assert_eq!(got.favorite, want.favorite);
            assert_eq!(got.content_embedding, want.content_embedding);
        }
    }

    #[test]
    fn test_missing_embeddings_are_accepted() {
        let json = br#"{"formatVersion": 1, "name": "n", "description": "",
            "cards": [{"id": "a", "frontTitle": "", "backContent": "x", "tags": [], "favorite": false}]}"#;
        let document = InterchangeDocument::from_slice(json).unwrap();
        let imported = deserialize(document, &deck(), Some(384), Utc::now()).unwrap();

        assert!(imported.cards[0].content_embedding.is_none());
    }

    #[test]
    fn test_wrong_width_embeddings_dropped() {
        let json = br#"{"formatVersion": 1, "name": "n", "description": "", "cards": [
            {"id": "a", "frontTitle": "", "backContent": "x", "tags": [], "favorite": false, "embedding": [1, 0, 0]},
            {"id": "b", "frontTitle": "", "backContent": "y", "tags": [], "favorite": false, "embedding": [0, 1, 0]},
            {"id": "c", "frontTitle": "", "backContent": "z", "tags": [], "favorite": false, "embedding": [0, 1]}
        ]}"#;

        let document = InterchangeDocument::from_slice(json).unwrap();
        let imported = deserialize(document.clone(), &deck(), None, Utc::now()).unwrap();
        assert_eq!(imported.dropped_embeddings, 1);
        assert!(imported.cards[2].content_embedding.is_none());

        let imported = deserialize(document, &deck(), Some(2), Utc::now()).unwrap();
        assert_eq!(imported.dropped_embeddings, 2);
        assert_eq!(imported.cards[2].content_embedding, Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_malformed_documents_rejected() {
        let cases: [&[u8]; 5] = [
            br#"{"formatVersion": 0, "name": "n", "description": "", "cards": []}"#,
            br#"{"name": "n", "description": "", "cards": []}"#,
            br#"{"formatVersion": 1, "name": "n", "description": "", "cards": [{"id": "a"}]}"#,
            br#"{"formatVersion": 1, "name": "  ", "description": "", "cards": []}"#,
            br#"{"formatVersion": 1, "name": "n", "description": "", "cards": [
                {"id": "a", "frontTitle": "", "backContent": "", "tags": [], "favorite": false},
                {"id": "a", "frontTitle": "", "backContent": "", "tags": [], "favorite": false}]}"#,
        ];

        for json in cases {
            assert!(InterchangeDocument::from_slice(json).is_err());
        }
    }

    #[test]
    fn test_out_of_range_embedding_rejected() {
        let json = br#"{"formatVersion": 1, "name": "n", "description": "", "cards": [
            {"id": "a", "frontTitle": "", "backContent": "x", "tags": [], "favorite": false, "embedding": [1e39, 0]}
        ]}"#;

        assert!(InterchangeDocument::from_slice(json).is_err());
    }

    #[test]
    fn test_rename_card_moves_preserved_fields() {
        let mut preserved = PreservedFields::default();
        let mut extra = Map::new();
        extra.insert("difficulty".into(), Value::from(3));
        preserved.cards.insert("a".into(), extra);

        preserved.rename_card("a", "b");
        preserved.rename_card("missing", "c");

        assert!(!preserved.cards.contains_key("a"));
        assert_eq!(preserved.cards["b"]["difficulty"], 3);
        assert_eq!(preserved.cards.len(), 1);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let json = br#"{"formatVersion": 2, "name": "n", "description": "", "theme": {"dark": true},
            "cards": [{"id": "a", "frontTitle": "", "backContent": "x", "tags": [], "favorite": false,
                       "embedding": null, "difficulty": 3}]}"#;

        let document = InterchangeDocument::from_slice(json).unwrap();
        let imported = deserialize(document, &deck(), None, Utc::now()).unwrap();
        assert!(!imported.preserved.is_empty());

        let exported = serialize(&imported.deck, &imported.cards, Some(&imported.preserved));
        let value: Value = serde_json::from_slice(&exported.to_vec().unwrap()).unwrap();

        assert_eq!(value["formatVersion"], FORMAT_VERSION);
        assert_eq!(value["theme"]["dark"], true);
        assert_eq!(value["cards"][0]["difficulty"], 3);
    }
}
