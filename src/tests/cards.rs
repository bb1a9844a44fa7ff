use crate::cards::{BackendCsv, CardCreate, CardStore, CardUpdate, DeckCreate, StoreError};
use crate::eid::Eid;

fn fresh_store() -> (BackendCsv, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = BackendCsv::load(tmp.path()).unwrap();
    (store, tmp)
}

fn deck(store: &BackendCsv, name: &str) -> Eid {
    store
        .create_deck(DeckCreate {
            name: name.into(),
            ..Default::default()
        })
        .unwrap()
        .id
}

fn seed(store: &BackendCsv, deck_id: &Eid, count: usize) -> Vec<Eid> {
    (0..count)
        .map(|i| {
            store
                .create_card(CardCreate {
                    deck_id: deck_id.clone(),
                    front_title: Some(format!("Title {i}")),
                    back_content: Some(format!("Content {i}")),
                    tags: Some(vec!["all".to_string(), format!("tag{i}")]),
                    ..Default::default()
                })
                .unwrap()
                .id
        })
        .collect()
}

// --- save / load roundtrip ---

#[test]
fn save_load_roundtrip_preserves_data() {
    let tmp = tempfile::tempdir().unwrap();

    let (deck_id, card_id) = {
        let store = BackendCsv::load(tmp.path()).unwrap();
        let deck = store
            .create_deck(DeckCreate {
                name: "Kitchen".into(),
                description: Some("things, \"quoted\"\nand multiline".into()),
                artwork_url: Some("https://example.com/kitchen.png".into()),
                is_public: true,
            })
            .unwrap();
        let card = store
            .create_card(CardCreate {
                deck_id: deck.id.clone(),
                front_title: Some("Bread".into()),
                front_custom_json: Some(r#"{"zones":[]}"#.into()),
                back_content: Some("how to bake bread".into()),
                tags: Some(vec!["baking".into(), "bread".into()]),
                favorite: true,
                ..Default::default()
            })
            .unwrap();
        assert!(store
            .set_embedding(&card.id, "how to bake bread", Some(vec![0.25, -0.5, 1.0]))
            .unwrap());
        (deck.id, card.id)
    };

    // reload from disk
    let store = BackendCsv::load(tmp.path()).unwrap();
    let deck = store.deck(&deck_id).unwrap();
    assert_eq!(deck.name, "Kitchen");
    assert_eq!(deck.description, "things, \"quoted\"\nand multiline");
    assert_eq!(deck.artwork_url.as_deref(), Some("https://example.com/kitchen.png"));
    assert!(deck.is_public);

    let card = store.card(&card_id).unwrap();
    assert_eq!(card.deck_id, deck_id);
    assert_eq!(card.front_title, "Bread");
    assert_eq!(card.front_custom_json.as_deref(), Some(r#"{"zones":[]}"#));
    assert_eq!(card.back_content, "how to bake bread");
    assert_eq!(card.back_format, "markdown");
    assert_eq!(card.tags, vec!["baking", "bread"]);
    assert!(card.favorite);
    assert_eq!(card.content_embedding, Some(vec![0.25, -0.5, 1.0]));
}

#[test]
fn load_missing_files_gives_empty_store() {
    let (store, _tmp) = fresh_store();
    assert!(store.decks().is_empty());
    assert!(store.cards(None).is_empty());
}

#[test]
fn load_rejects_corrupt_card_table() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = BackendCsv::load(tmp.path()).unwrap();
        let deck_id = deck(&store, "Kitchen");
        seed(&store, &deck_id, 1);
    }

    let path = tmp.path().join("cards.csv");
    let text = std::fs::read_to_string(&path).unwrap();
    let corrupted = text.replacen("[\"\"all\"\"", "[not json", 1);
    assert_ne!(text, corrupted);
    std::fs::write(&path, corrupted).unwrap();

    assert!(BackendCsv::load(tmp.path()).is_err());
}

// --- decks ---

#[test]
fn create_deck_rejects_blank_name() {
    let (store, _tmp) = fresh_store();
    let result = store.create_deck(DeckCreate {
        name: "   ".into(),
        ..Default::default()
    });
    assert!(matches!(result, Err(StoreError::EmptyDeckName)));
}

#[test]
fn delete_deck_removes_its_cards_only() {
    let (store, _tmp) = fresh_store();
    let kitchen = deck(&store, "Kitchen");
    let taxes = deck(&store, "Taxes");
    seed(&store, &kitchen, 3);
    seed(&store, &taxes, 2);

    store.delete_deck(&kitchen).unwrap();

    assert!(store.deck(&kitchen).is_none());
    assert!(store.cards(Some(&kitchen)).is_empty());
    assert_eq!(store.cards(Some(&taxes)).len(), 2);
    assert_eq!(store.cards(None).len(), 2);
}

#[test]
fn card_changes_bump_deck_version() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let before = store.deck(&deck_id).unwrap().updated_at;

    std::thread::sleep(std::time::Duration::from_millis(5));
    seed(&store, &deck_id, 1);

    assert!(store.deck(&deck_id).unwrap().updated_at > before);
}

// --- cards ---

#[test]
fn create_card_in_unknown_deck_fails() {
    let (store, _tmp) = fresh_store();
    let result = store.create_card(CardCreate {
        deck_id: Eid::new(),
        back_content: Some("orphan".into()),
        ..Default::default()
    });
    assert!(matches!(result, Err(StoreError::DeckNotFound(_))));
}

#[test]
fn cards_keep_stored_order() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let ids = seed(&store, &deck_id, 5);

    let listed: Vec<Eid> = store.cards(Some(&deck_id)).into_iter().map(|c| c.id).collect();
    assert_eq!(listed, ids);
}

#[test]
fn tags_are_trimmed_and_deduplicated() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let card = store
        .create_card(CardCreate {
            deck_id,
            tags: Some(vec![" bread".into(), "bread".into(), "".into(), "baking".into()]),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(card.tags, vec!["bread", "baking"]);
}

#[test]
fn duplicate_inserts_copy_after_original() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let ids = seed(&store, &deck_id, 3);
    store.set_embedding(&ids[1], "Content 1", Some(vec![1.0, 0.0])).unwrap();

    let copy = store.duplicate_card(&ids[1]).unwrap();

    assert_ne!(copy.id, ids[1]);
    assert_eq!(copy.front_title, "Title 1 (Copy)");
    assert_eq!(copy.back_content, "Content 1");
    assert_eq!(copy.tags, vec!["all", "tag1"]);
    assert_eq!(copy.content_embedding, Some(vec![1.0, 0.0]));

    let listed: Vec<Eid> = store.cards(Some(&deck_id)).into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![ids[0].clone(), ids[1].clone(), copy.id, ids[2].clone()]);
}

#[test]
fn content_edit_drops_embedding() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let id = seed(&store, &deck_id, 1).remove(0);
    store.set_embedding(&id, "Content 0", Some(vec![1.0, 0.0])).unwrap();

    // title-only edit keeps the vector
    let card = store
        .update_card(
            &id,
            CardUpdate {
                front_title: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(card.content_embedding.is_some());

    let card = store
        .update_card(
            &id,
            CardUpdate {
                back_content: Some("Something else".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(card.content_embedding.is_none());
}

#[test]
fn set_embedding_ignores_stale_content() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let id = seed(&store, &deck_id, 1).remove(0);

    store
        .update_card(
            &id,
            CardUpdate {
                back_content: Some("new content".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let stored = store.set_embedding(&id, "Content 0", Some(vec![1.0, 0.0])).unwrap();
    assert!(!stored);
    assert!(store.card(&id).unwrap().content_embedding.is_none());
}

#[test]
fn set_embedding_is_not_a_local_edit() {
    let (store, _tmp) = fresh_store();
    let deck_id = deck(&store, "Kitchen");
    let id = seed(&store, &deck_id, 1).remove(0);
    let version = store.deck(&deck_id).unwrap().updated_at;
    let card_version = store.card(&id).unwrap().updated_at;

    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(store.set_embedding(&id, "Content 0", Some(vec![0.5, 0.5])).unwrap());

    assert_eq!(store.deck(&deck_id).unwrap().updated_at, version);
    assert_eq!(store.card(&id).unwrap().updated_at, card_version);
}

#[test]
fn move_card_between_decks() {
    let (store, _tmp) = fresh_store();
    let kitchen = deck(&store, "Kitchen");
    let taxes = deck(&store, "Taxes");
    let id = seed(&store, &kitchen, 1).remove(0);

    store
        .update_card(
            &id,
            CardUpdate {
                deck_id: Some(taxes.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(store.cards(Some(&kitchen)).is_empty());
    assert_eq!(store.cards(Some(&taxes))[0].id, id);
}

// --- replace_deck ---

#[test]
fn replace_deck_swaps_cards_of_that_deck() {
    let (store, _tmp) = fresh_store();
    let kitchen = deck(&store, "Kitchen");
    let taxes = deck(&store, "Taxes");
    seed(&store, &kitchen, 3);
    let tax_ids = seed(&store, &taxes, 1);

    let mut replacement = store.deck(&kitchen).unwrap();
    replacement.name = "Bakery".into();
    let mut cards = store.cards(Some(&kitchen));
    cards.truncate(1);
    cards[0].back_content = "replaced".into();
    // an id already used by another deck
    let mut stolen = cards[0].clone();
    stolen.id = tax_ids[0].clone();
    cards.push(stolen);

    let stored = store.replace_deck(replacement, cards).unwrap();

    assert_eq!(store.deck(&kitchen).unwrap().name, "Bakery");
    let kitchen_cards = store.cards(Some(&kitchen));
    assert_eq!(kitchen_cards.len(), 2);
    // the caller learns the reassigned id
    assert_eq!(stored, kitchen_cards);
    assert_eq!(kitchen_cards[0].back_content, "replaced");
    assert_ne!(kitchen_cards[1].id, tax_ids[0]);
    assert_eq!(store.card(&tax_ids[0]).unwrap().deck_id, taxes);
}

#[test]
fn replace_deck_creates_missing_deck() {
    let (store, _tmp) = fresh_store();
    let source = deck(&store, "Kitchen");
    seed(&store, &source, 2);

    let mut target = store.deck(&source).unwrap();
    target.id = Eid::new();
    let cards = store
        .cards(Some(&source))
        .into_iter()
        .map(|mut card| {
            card.id = Eid::new();
            card
        })
        .collect();

    store.replace_deck(target.clone(), cards).unwrap();

    assert_eq!(store.decks().len(), 2);
    assert_eq!(store.cards(Some(&target.id)).len(), 2);
    assert_eq!(store.cards(Some(&source)).len(), 2);
}
