//! Where interchange documents are stored.
//!
//! A location is either a filesystem path (optionally `file://`-prefixed)
//! naming a JSON file, or an `http(s)://` URL that answers `GET` with the
//! document and accepts `PUT` of a new one. Retries are left to the user.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;

use super::document::{DocumentError, InterchangeDocument};
use crate::config::RemoteAuth;
use crate::storage::{BackendLocal, StorageManager};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote timed out")]
    Timeout,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no document at {0}")]
    NotFound(String),

    #[error("invalid location {0:?}")]
    InvalidLocation(String),

    #[error(transparent)]
    Malformed(#[from] DocumentError),
}

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn put_document(&self, location: &str, document: &InterchangeDocument) -> Result<(), RemoteError>;

    async fn get_document(&self, location: &str) -> Result<InterchangeDocument, RemoteError>;
}

/// Dispatches on the location scheme.
pub struct RemoteRouter {
    directory: DirectoryRepository,
    http: HttpRepository,
}

impl RemoteRouter {
    pub fn new(auth: Option<RemoteAuth>) -> Self {
        RemoteRouter {
            directory: DirectoryRepository,
            http: HttpRepository::new(auth),
        }
    }

    fn route(&self, location: &str) -> Result<&dyn RemoteRepository, RemoteError> {
        match location.split_once("://") {
            Some(("http" | "https", _)) => Ok(&self.http),
            Some(("file" | "dir", _)) | None => Ok(&self.directory),
            Some(_) => Err(RemoteError::InvalidLocation(location.to_string())),
        }
    }
}

#[async_trait]
impl RemoteRepository for RemoteRouter {
    async fn put_document(&self, location: &str, document: &InterchangeDocument) -> Result<(), RemoteError> {
        self.route(location)?.put_document(location, document).await
    }

    async fn get_document(&self, location: &str) -> Result<InterchangeDocument, RemoteError> {
        self.route(location)?.get_document(location).await
    }
}

/// Documents as JSON files on a local or mounted filesystem.
pub struct DirectoryRepository;

impl DirectoryRepository {
    fn split(location: &str) -> Result<(PathBuf, String), RemoteError> {
        let path = ["file://", "dir://"]
            .iter()
            .find_map(|scheme| location.strip_prefix(scheme))
            .map(Path::new)
            .unwrap_or_else(|| Path::new(location));

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RemoteError::InvalidLocation(location.to_string()))?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok((parent, file_name.to_string()))
    }
}

fn io_error(location: &str, err: std::io::Error) -> RemoteError {
    match err.kind() {
        std::io::ErrorKind::NotFound => RemoteError::NotFound(location.to_string()),
        std::io::ErrorKind::PermissionDenied => RemoteError::PermissionDenied(err.to_string()),
        _ => RemoteError::Unreachable(err.to_string()),
    }
}

#[async_trait]
impl RemoteRepository for DirectoryRepository {
    async fn put_document(&self, location: &str, document: &InterchangeDocument) -> Result<(), RemoteError> {
        let (dir, file_name) = Self::split(location)?;
        let bytes = document.to_vec()?;
        let location = location.to_string();

        tokio::task::spawn_blocking(move || {
            let store = BackendLocal::new(&dir).map_err(|err| io_error(&location, err))?;
            store
                .write(&file_name, &bytes)
                .map_err(|err| io_error(&location, err))?;
            log::debug!("wrote {} bytes to {}", bytes.len(), store.path_of(&file_name).display());
            Ok::<_, RemoteError>(())
        })
        .await
        .map_err(|err| RemoteError::Unreachable(err.to_string()))?
    }

    async fn get_document(&self, location: &str) -> Result<InterchangeDocument, RemoteError> {
        let (dir, file_name) = Self::split(location)?;
        let location = location.to_string();

        let bytes = tokio::task::spawn_blocking(move || {
            BackendLocal { base_dir: dir }
                .read(&file_name)
                .map_err(|err| io_error(&location, err))
        })
        .await
        .map_err(|err| RemoteError::Unreachable(err.to_string()))??;

        Ok(InterchangeDocument::from_slice(&bytes)?)
    }
}

/// Documents behind a plain HTTP endpoint.
pub struct HttpRepository {
    client: reqwest::Client,
    auth: Option<RemoteAuth>,
}

impl HttpRepository {
    pub fn new(auth: Option<RemoteAuth>) -> Self {
        HttpRepository {
            client: reqwest::Client::new(),
            auth,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(RemoteAuth::Bearer(token)) => request.bearer_auth(token),
            Some(RemoteAuth::Basic { username, password }) => request.basic_auth(username, password.as_ref()),
            None => request,
        }
    }

    fn check_url(location: &str) -> Result<url::Url, RemoteError> {
        url::Url::parse(location).map_err(|_| RemoteError::InvalidLocation(location.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unreachable(err.to_string())
    }
}

fn status_error(location: &str, status: StatusCode) -> Option<RemoteError> {
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(RemoteError::PermissionDenied(format!("{location} answered {status}")))
        }
        StatusCode::NOT_FOUND => Some(RemoteError::NotFound(location.to_string())),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Some(RemoteError::Timeout),
        _ => Some(RemoteError::Unreachable(format!("{location} answered {status}"))),
    }
}

#[async_trait]
impl RemoteRepository for HttpRepository {
    async fn put_document(&self, location: &str, document: &InterchangeDocument) -> Result<(), RemoteError> {
        let url = Self::check_url(location)?;
        log::info!("PUT {url}");

        let response = self
            .authorize(self.client.put(url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document.to_vec()?)
            .send()
            .await
            .map_err(transport_error)?;

        match status_error(location, response.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_document(&self, location: &str) -> Result<InterchangeDocument, RemoteError> {
        let url = Self::check_url(location)?;
        log::info!("GET {url}");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        if let Some(err) = status_error(location, response.status()) {
            return Err(err);
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(InterchangeDocument::from_slice(&bytes)?)
    }
}
