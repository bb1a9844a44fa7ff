use crate::{
    app::errors::AppError,
    cards::{BackendCsv, Card, CardCreate, CardStore, CardUpdate, Deck, DeckCreate, DeckUpdate},
    eid::Eid,
    semantic::{ReconcileResult, SearchScope, SemanticSearchService},
    sync::{SyncManager, SyncReport, SyncStatus},
    template::FrontTemplate,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type AppResult<T> = Result<T, AppError>;

/// Single entry point the command line talks to.
pub struct AppService {
    store: Arc<BackendCsv>,
    search: SemanticSearchService,
    sync: SyncManager,
}

impl AppService {
    pub fn new(store: Arc<BackendCsv>, search: SemanticSearchService, sync: SyncManager) -> Self {
        Self { store, search, sync }
    }

    pub fn decks(&self) -> Vec<Deck> {
        self.store.decks()
    }

    /// Find a deck by id, or by name when the name is unique.
    pub fn resolve_deck(&self, key: &str) -> AppResult<Deck> {
        if let Some(deck) = self.store.deck(&Eid::from(key)) {
            return Ok(deck);
        }

        let mut matches = self
            .store
            .decks()
            .into_iter()
            .filter(|deck| deck.name.eq_ignore_ascii_case(key.trim()));

        match (matches.next(), matches.next()) {
            (Some(deck), None) => Ok(deck),
            (Some(_), Some(_)) => Err(AppError::AmbiguousDeck(key.to_string())),
            (None, _) => Err(AppError::DeckNotFound(key.to_string())),
        }
    }

    pub fn create_deck(&self, create: DeckCreate) -> AppResult<Deck> {
        Ok(self.store.create_deck(create)?)
    }

    pub fn update_deck(&self, id: &Eid, update: DeckUpdate) -> AppResult<Deck> {
        Ok(self.store.update_deck(id, update)?)
    }

    pub fn delete_deck(&self, id: &Eid) -> AppResult<()> {
        self.store.delete_deck(id)?;
        self.sync.forget(id)?;
        Ok(())
    }

    pub fn cards(&self, deck_id: Option<&Eid>) -> Vec<Card> {
        self.store.cards(deck_id)
    }

    pub fn card(&self, id: &Eid) -> AppResult<Card> {
        self.store
            .card(id)
            .ok_or_else(|| AppError::CardNotFound(id.clone()))
    }

    pub fn create_card(&self, create: CardCreate) -> AppResult<Card> {
        if let Some(json) = &create.front_custom_json {
            FrontTemplate::parse(json)?;
        }
        Ok(self.store.create_card(create)?)
    }

    pub fn update_card(&self, id: &Eid, update: CardUpdate) -> AppResult<Card> {
        if let Some(json) = update.front_custom_json.as_deref().filter(|json| !json.trim().is_empty()) {
            FrontTemplate::parse(json)?;
        }

        let before = self.card(id)?;
        let after = self.store.update_card(id, update)?;
        self.search.card_updated(&before, &after);
        Ok(after)
    }

    pub fn delete_card(&self, id: &Eid) -> AppResult<()> {
        Ok(self.store.delete_card(id)?)
    }

    pub fn duplicate_card(&self, id: &Eid) -> AppResult<Card> {
        Ok(self.store.duplicate_card(id)?)
    }

    /// Text rendering of the card front: the zone template if present,
    /// otherwise the title.
    pub fn render_front(&self, card: &Card) -> AppResult<String> {
        match &card.front_custom_json {
            Some(json) => Ok(FrontTemplate::parse(json)?.render_text(&card.front_title)),
            None => Ok(card.front_title.clone()),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        scope: &SearchScope,
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> AppResult<Vec<(Card, f32)>> {
        let results = self.search.search(query, scope, limit, threshold).await?;

        Ok(results
            .into_iter()
            .filter_map(|result| {
                let card = self.store.card(&Eid::from(result.id));
                card.map(|card| (card, result.score))
            })
            .collect())
    }

    pub async fn reembed(
        &self,
        scope: &SearchScope,
        on_card: impl FnMut(usize, usize),
    ) -> AppResult<ReconcileResult> {
        Ok(self.search.reembed(scope, on_card).await?)
    }

    /// Clear a latched model failure.
    pub fn retry_model(&self) -> Option<String> {
        let provider = self.search.provider();
        let reason = provider.unavailable_reason();
        provider.retry();
        reason
    }

    pub async fn export(&self, deck_id: &Eid, location: &str, cancel: CancellationToken) -> AppResult<SyncReport> {
        Ok(self.sync.export(deck_id, location, cancel).await?)
    }

    pub async fn import(&self, deck_id: &Eid, location: &str, cancel: CancellationToken) -> AppResult<SyncReport> {
        Ok(self.sync.import(deck_id, location, cancel).await?)
    }

    pub fn sync_status(&self, deck_id: &Eid) -> AppResult<SyncStatus> {
        Ok(self.sync.status(deck_id)?)
    }

    /// Persist what should survive the process, if configured.
    pub fn shutdown(&self) {
        if let Err(err) = self.search.provider().persist_cache() {
            log::warn!("failed to persist embedding cache: {err}");
        }
    }
}
