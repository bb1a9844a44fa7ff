use crate::{
    app::service::AppService,
    cards::BackendCsv,
    config::{Config, RemoteAuth},
    semantic::{CacheSnapshot, EmbeddingCache, EmbeddingProvider, FastembedLoader, SemanticSearchService},
    storage::BackendLocal,
    sync::{ManifestStore, RemoteRouter, SyncManager},
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Wire the card store, semantic search and sync around one data directory.
    pub fn create_app_service(paths: &AppPaths, config: &Config) -> Result<AppService> {
        let store = Arc::new(
            BackendCsv::load(&paths.base_path)
                .with_context(|| format!("failed to open card database in {}", paths.base_path.display()))?,
        );

        let capacity = NonZeroUsize::new(config.embedding_cache.capacity)
            .context("embedding cache capacity cannot be 0")?;
        let cache = Arc::new(EmbeddingCache::new(
            capacity,
            Duration::from_secs(config.embedding_cache.ttl_secs),
        ));

        let semantic = &config.semantic_search;
        let loader = FastembedLoader::new(
            &semantic.model,
            paths.base_path.clone(),
            Some(Duration::from_secs(semantic.download_timeout_secs)),
        )?;

        let mut provider = EmbeddingProvider::new(Arc::new(loader), cache);
        if config.embedding_cache.persist {
            provider = provider.with_snapshot(CacheSnapshot::new(BackendLocal::new(&paths.base_path)?));
        }
        let provider = Arc::new(provider);

        let search = SemanticSearchService::new(semantic.clone(), provider.clone(), store.clone());

        let auth = Self::remote_auth_from_env()?.or_else(|| config.sync.remote_auth.clone());
        let manifests = ManifestStore::load(BackendLocal::new(&paths.base_path)?)
            .context("failed to read sync manifests")?;
        let sync = SyncManager::new(
            store.clone(),
            Arc::new(RemoteRouter::new(auth)),
            manifests,
            Duration::from_secs(config.sync.timeout_secs),
        )
        .with_provider(provider);

        Ok(AppService::new(store, search, sync))
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    /// Load `config.yaml`, creating it with defaults on first run.
    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        let config = Config::load_with(&paths.base_path)
            .with_context(|| format!("failed to load config from {}", paths.base_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("CARDVAULT_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/cardvault"))
    }

    /// Credentials for HTTP repositories from the environment override the
    /// config file.
    fn remote_auth_from_env() -> Result<Option<RemoteAuth>> {
        if let Some(token) = std::env::var("CARDVAULT_AUTH_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            return Ok(Some(RemoteAuth::Bearer(token)));
        }

        match std::env::var("CARDVAULT_BASIC_AUTH") {
            Ok(ba) => Ok(parse_basic_auth(&ba)),
            Err(_) => Ok(None),
        }
    }
}

fn parse_basic_auth(value: &str) -> Option<RemoteAuth> {
    match value.split_once(':') {
        None if !value.is_empty() => Some(RemoteAuth::Basic {
            username: value.to_string(),
            password: None,
        }),
        Some((username, password)) if !username.is_empty() => Some(RemoteAuth::Basic {
            username: username.to_string(),
            password: Some(password.to_string()),
        }),
        _ => {
            log::warn!("Invalid CARDVAULT_BASIC_AUTH format. Expected 'username' or 'username:password'");
            None
        }
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_auth() {
        assert_eq!(
            parse_basic_auth("alice"),
            Some(RemoteAuth::Basic {
                username: "alice".into(),
                password: None
            })
        );
        assert_eq!(
            parse_basic_auth("alice:s3:cret"),
            Some(RemoteAuth::Basic {
                username: "alice".into(),
                password: Some("s3:cret".into())
            })
        );
        assert_eq!(parse_basic_auth(":nope"), None);
        assert_eq!(parse_basic_auth(""), None);
    }

    #[test]
    fn test_create_app_service_in_fresh_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths {
            base_path: tmp.path().to_path_buf(),
        };

        let config = AppFactory::create_config(&paths).unwrap();
        assert_eq!(config, Config::default());
        assert!(tmp.path().join("config.yaml").exists());

        let service = AppFactory::create_app_service(&paths, &config).unwrap();
        assert!(service.decks().is_empty());
    }
}
