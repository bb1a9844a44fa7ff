use std::path::{Path, PathBuf};

use crate::eid::Eid;

/// Flat key-value file storage. Every record is one file under a base
/// directory; writes replace the whole record atomically.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(BackendLocal { base_dir })
    }

    pub fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }

    fn checked_path(&self, ident: &str) -> std::io::Result<PathBuf> {
        let valid = !ident.is_empty()
            && ident != "."
            && ident != ".."
            && !ident.contains(['/', '\\']);
        if !valid {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid record name {ident:?}"),
            ));
        }
        Ok(self.path_of(ident))
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        self.checked_path(ident)
            .map(|path| std::fs::metadata(path).is_ok())
            .unwrap_or(false)
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.checked_path(ident)?)
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.checked_path(ident)?;
        let temp_path = self.base_dir.join(format!(".{}-{ident}", Eid::new()));

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.checked_path(ident)?)
    }
}
