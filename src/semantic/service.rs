//! Semantic search over stored cards.
//!
//! Ties the provider, the card store and the similarity index together:
//! - the query is embedded through the cache-first provider
//! - cards whose embedding is absent or of the wrong width are embedded on
//!   the spot and written back to the store
//! - ranking is delegated to [`index::search`]

use std::sync::Arc;

use super::embeddings::EmbeddingError;
use super::index::{self, Candidate, IndexError, SearchResult};
use super::provider::EmbeddingProvider;
use crate::cards::{Card, CardStore, StoreError};
use crate::config::SemanticSearchConfig;
use crate::eid::Eid;

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Semantic search is disabled")]
    Disabled,

    #[error("Deck not found: {0}")]
    DeckNotFound(Eid),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Which cards a search or sweep covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    Deck(Eid),
    All,
}

/// Result of a re-embedding sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Cards that got a fresh embedding.
    pub embedded: usize,
    /// Cards already up to date, or with nothing to embed.
    pub skipped: usize,
    /// Cards whose embedding could not be computed or stored.
    pub failed: usize,
}

pub struct SemanticSearchService {
    config: SemanticSearchConfig,
    provider: Arc<EmbeddingProvider>,
    store: Arc<dyn CardStore>,
}

impl SemanticSearchService {
    pub fn new(
        config: SemanticSearchConfig,
        provider: Arc<EmbeddingProvider>,
        store: Arc<dyn CardStore>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
        }
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    /// Rank the cards in `scope` by similarity to `query`.
    ///
    /// `limit` and `threshold` fall back to the configured defaults. Fails
    /// with `ModelUnavailable` rather than returning unranked results.
    pub async fn search(
        &self,
        query: &str,
        scope: &SearchScope,
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if !self.config.enabled {
            return Err(SearchError::Disabled);
        }

        let cards = self.cards_in(scope)?;
        let query_embedding = self.provider.embed(query).await?;
        let dimensions = query_embedding.len();

        let mut vectors: Vec<(Eid, Vec<f32>)> = Vec::with_capacity(cards.len());
        for card in cards {
            if !card.needs_embedding(dimensions) {
                if let Some(vector) = card.content_embedding {
                    vectors.push((card.id, vector));
                }
                continue;
            }

            match self.embed_card(&card).await {
                Ok(vector) => vectors.push((card.id, vector)),
                Err(err @ EmbeddingError::ModelUnavailable(_)) => return Err(err.into()),
                Err(err) => log::warn!("skipping card {} in search: {err}", card.id),
            }
        }

        let candidates: Vec<Candidate<'_>> = vectors
            .iter()
            .map(|(id, vector)| Candidate {
                id: id.as_str(),
                vector,
            })
            .collect();

        let limit = limit.unwrap_or(self.config.default_limit);
        let threshold = threshold.unwrap_or(self.config.default_threshold);
        let results = index::search(&query_embedding, &candidates, limit, threshold)?;

        log::debug!(
            "semantic search over {} cards returned {} results",
            candidates.len(),
            results.len()
        );
        Ok(results)
    }

    /// Embed every card in `scope` that lacks a current embedding.
    ///
    /// `on_card` is called after each card with `(done, total)`.
    pub async fn reembed(
        &self,
        scope: &SearchScope,
        mut on_card: impl FnMut(usize, usize),
    ) -> Result<ReconcileResult, SearchError> {
        if !self.config.enabled {
            return Err(SearchError::Disabled);
        }

        let cards = self.cards_in(scope)?;
        let dimensions = self.provider.ensure_loaded().await?;
        let total = cards.len();
        let mut result = ReconcileResult::default();

        for (done, card) in cards.iter().enumerate() {
            if !card.needs_embedding(dimensions) {
                result.skipped += 1;
            } else {
                match self.embed_card(card).await {
                    Ok(_) => result.embedded += 1,
                    Err(err @ EmbeddingError::ModelUnavailable(_)) => return Err(err.into()),
                    Err(err) => {
                        log::warn!("failed to embed card {}: {err}", card.id);
                        result.failed += 1;
                    }
                }
            }
            on_card(done + 1, total);
        }

        log::info!(
            "reembed: {} embedded, {} skipped, {} failed",
            result.embedded,
            result.skipped,
            result.failed
        );
        Ok(result)
    }

    /// Drop the cached vector of a card's previous content after an edit.
    pub fn card_updated(&self, before: &Card, after: &Card) {
        if before.back_content != after.back_content && self.provider.invalidate(&before.back_content) {
            log::debug!("invalidated cached embedding of card {}", before.id);
        }
    }

    async fn embed_card(&self, card: &Card) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.provider.embed(&card.back_content).await?;

        match self
            .store
            .set_embedding(&card.id, &card.back_content, Some(vector.clone()))
        {
            Ok(true) => {}
            Ok(false) => log::debug!("card {} changed while embedding, not stored", card.id),
            Err(err) => log::warn!("failed to store embedding of card {}: {err}", card.id),
        }

        Ok(vector)
    }

    fn cards_in(&self, scope: &SearchScope) -> Result<Vec<Card>, SearchError> {
        match scope {
            SearchScope::All => Ok(self.store.cards(None)),
            SearchScope::Deck(id) => {
                if self.store.deck(id).is_none() {
                    return Err(SearchError::DeckNotFound(id.clone()));
                }
                Ok(self.store.cards(Some(id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{BackendCsv, CardCreate, CardUpdate, DeckCreate};
    use crate::tests::support::{provider_with, CountingLoader, FailingLoader, LexiconLoader};
    use std::sync::atomic::Ordering;

    fn test_config(enabled: bool) -> SemanticSearchConfig {
        SemanticSearchConfig {
            enabled,
            ..Default::default()
        }
    }

    struct Fixture {
        service: SemanticSearchService,
        store: Arc<BackendCsv>,
        cache: Arc<crate::semantic::EmbeddingCache>,
        deck: Eid,
        _tmp: tempfile::TempDir,
    }

    fn fixture(loader: impl crate::semantic::embeddings::ModelLoader + 'static, enabled: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(BackendCsv::load(tmp.path()).unwrap());
        let deck = store
            .create_deck(DeckCreate {
                name: "Kitchen".into(),
                ..Default::default()
            })
            .unwrap()
            .id;
        let (provider, cache) = provider_with(loader);
        let service = SemanticSearchService::new(test_config(enabled), Arc::new(provider), store.clone());
        Fixture {
            service,
            store,
            cache,
            deck,
            _tmp: tmp,
        }
    }

    fn add(store: &BackendCsv, deck: &Eid, content: &str) -> Eid {
        store
            .create_card(CardCreate {
                deck_id: deck.clone(),
                back_content: Some(content.into()),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_disabled_service_returns_error() {
        let f = fixture(LexiconLoader::default(), false);

        let result = f.service.search("bread", &SearchScope::All, None, None).await;
        assert!(matches!(result, Err(SearchError::Disabled)));
    }

    #[tokio::test]
    async fn test_search_writes_back_embeddings() {
        let f = fixture(LexiconLoader::default(), true);
        let id = add(&f.store, &f.deck, "how to bake bread");
        assert!(f.store.card(&id).unwrap().content_embedding.is_none());

        let results = f
            .service
            .search("baking bread", &SearchScope::Deck(f.deck.clone()), None, Some(0.5))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let stored = f.store.card(&id).unwrap().content_embedding.unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_wrong_width_embedding_is_recomputed() {
        let f = fixture(LexiconLoader::default(), true);
        let id = add(&f.store, &f.deck, "how to bake bread");
        f.store
            .set_embedding(&id, "how to bake bread", Some(vec![1.0, 0.0]))
            .unwrap();

        let results = f
            .service
            .search("baking bread", &SearchScope::All, None, Some(0.5))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(f.store.card(&id).unwrap().content_embedding.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_deck_scope() {
        let f = fixture(LexiconLoader::default(), true);

        let result = f
            .service
            .search("bread", &SearchScope::Deck(Eid::new()), None, None)
            .await;
        assert!(matches!(result, Err(SearchError::DeckNotFound(_))));
    }

    #[tokio::test]
    async fn test_model_unavailable_is_surfaced() {
        let f = fixture(FailingLoader::new(usize::MAX), true);
        add(&f.store, &f.deck, "how to bake bread");

        let result = f.service.search("bread", &SearchScope::All, None, None).await;
        assert!(matches!(
            result,
            Err(SearchError::Embedding(EmbeddingError::ModelUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_reembed_counts() {
        let f = fixture(LexiconLoader::default(), true);
        add(&f.store, &f.deck, "how to bake bread");
        add(&f.store, &f.deck, "quarterly tax filing");
        add(&f.store, &f.deck, "   ");

        let mut calls = 0;
        let first = f
            .service
            .reembed(&SearchScope::All, |_, _| calls += 1)
            .await
            .unwrap();
        assert_eq!(
            first,
            ReconcileResult {
                embedded: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(calls, 3);

        let second = f.service.reembed(&SearchScope::All, |_, _| {}).await.unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.skipped, 3);
    }

    #[tokio::test]
    async fn test_content_edit_triggers_recompute() {
        let loader = CountingLoader::new(LexiconLoader::default());
        let runs = loader.runs.clone();
        let f = fixture(loader, true);
        let id = add(&f.store, &f.deck, "how to bake bread");

        f.service.reembed(&SearchScope::All, |_, _| {}).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let before = f.store.card(&id).unwrap();
        let after = f
            .store
            .update_card(
                &id,
                CardUpdate {
                    back_content: Some("quarterly tax filing".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        f.service.card_updated(&before, &after);

        assert!(after.content_embedding.is_none());
        assert!(f.cache.get("how to bake bread").is_none());

        let results = f
            .service
            .search("tax", &SearchScope::All, None, Some(0.5))
            .await
            .unwrap();
        assert_eq!(results[0].id, id.as_str());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
