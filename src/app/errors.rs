use crate::cards::StoreError;
use crate::config::ConfigError;
use crate::eid::Eid;
use crate::semantic::SearchError;
use crate::sync::SyncError;
use crate::template::TemplateError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("deck not found: {0}")]
    DeckNotFound(String),

    #[error("card not found: {0}")]
    CardNotFound(Eid),

    #[error("several decks are named {0:?}, use the deck id")]
    AmbiguousDeck(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("card front template: {0}")]
    Template(#[from] TemplateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
