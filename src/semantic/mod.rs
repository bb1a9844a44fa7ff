//! Semantic search infrastructure for card content.
//!
//! # Architecture
//!
//! - `codec`: text and native encodings of embedding vectors
//! - `normalize`: text normalization, content hashing, vector pooling
//! - `cache`: TTL + LRU embedding cache keyed by content hash
//! - `snapshot`: optional vectors.bin persistence of the cache
//! - `embeddings`: model loader/runner boundary and the fastembed backend
//! - `provider`: cache-first embedding with a lazily loaded model
//! - `index`: cosine similarity ranking
//! - `service`: search and re-embedding over the card store

pub mod cache;
pub mod codec;
pub mod embeddings;
pub mod index;
pub mod normalize;
pub mod provider;
pub mod service;
pub mod snapshot;

pub use cache::EmbeddingCache;
pub use embeddings::{EmbeddingError, FastembedLoader};
pub use provider::EmbeddingProvider;
pub use service::{ReconcileResult, SearchError, SearchScope, SemanticSearchService};
pub use snapshot::CacheSnapshot;
