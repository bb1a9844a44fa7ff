//! Optional on-disk snapshot of the embedding cache.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, oldest use first):
//! - content_hash: [u8; 32]
//! - created_at: i64 (unix seconds, little-endian)
//! - ttl_secs: u64 (little-endian)
//! - embedding: [f32; dimensions] (native codec form)

use chrono::{DateTime, Utc};

use super::cache::EmbeddingCacheEntry;
use super::codec::{self, CodecError};
use crate::storage::{BackendLocal, StorageManager};

pub const SNAPSHOT_FILE: &str = "vectors.bin";

const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// content_hash(32) + created_at(8) + ttl(8)
const ENTRY_PREFIX_SIZE: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector decode error: {0}")]
    Codec(#[from] CodecError),
}

pub struct CacheSnapshot {
    store: BackendLocal,
}

impl CacheSnapshot {
    pub fn new(store: BackendLocal) -> Self {
        Self { store }
    }

    pub fn exists(&self) -> bool {
        self.store.exists(SNAPSHOT_FILE)
    }

    pub fn delete(&self) -> Result<(), SnapshotError> {
        if self.exists() {
            self.store.delete(SNAPSHOT_FILE)?;
        }
        Ok(())
    }

    /// Write entries; replaces any previous snapshot atomically.
    pub fn save(
        &self,
        entries: &[EmbeddingCacheEntry],
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<usize, SnapshotError> {
        let dims = u16::try_from(dimensions).map_err(|_| {
            SnapshotError::InvalidFormat(format!("{dimensions} dimensions do not fit the header"))
        })?;

        let kept: Vec<&EmbeddingCacheEntry> = entries
            .iter()
            .filter(|entry| entry.vector.len() == dimensions)
            .collect();

        let mut bytes = Vec::with_capacity(HEADER_SIZE + kept.len() * (ENTRY_PREFIX_SIZE + dimensions * 4));
        write_header(&mut bytes, model_id, dims, kept.len() as u64);

        for entry in &kept {
            bytes.extend_from_slice(&entry.content_hash);
            bytes.extend_from_slice(&entry.created_at.timestamp().to_le_bytes());
            bytes.extend_from_slice(&entry.ttl_secs.to_le_bytes());
            bytes.extend_from_slice(&codec::to_native(&entry.vector));
        }

        self.store.write(SNAPSHOT_FILE, &bytes)?;
        Ok(kept.len())
    }

    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Vec<EmbeddingCacheEntry>, SnapshotError> {
        let bytes = self.store.read(SNAPSHOT_FILE)?;
        let header = read_header(&bytes)?;

        if header.model_id != *expected_model_id {
            return Err(SnapshotError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(SnapshotError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let entry_size = ENTRY_PREFIX_SIZE + expected_dimensions * 4;
        let body = &bytes[HEADER_SIZE..];
        let expected_len = (header.entry_count as usize).checked_mul(entry_size);
        if expected_len != Some(body.len()) {
            return Err(SnapshotError::InvalidFormat(format!(
                "{} entries declared, {} body bytes present",
                header.entry_count,
                body.len()
            )));
        }

        body.chunks_exact(entry_size)
            .map(|chunk| read_entry(chunk, expected_dimensions))
            .collect()
    }
}

struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn write_header(out: &mut Vec<u8>, model_id: &[u8; 32], dimensions: u16, entry_count: u64) {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(model_id);
    header[33..35].copy_from_slice(&dimensions.to_le_bytes());
    header[35..43].copy_from_slice(&entry_count.to_le_bytes());
    let checksum = crc32fast::hash(&header[0..43]);
    header[43..47].copy_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&header);
}

fn read_header(bytes: &[u8]) -> Result<Header, SnapshotError> {
    if bytes.len() < HEADER_SIZE {
        return Err(SnapshotError::InvalidFormat(format!(
            "file is {} bytes, shorter than the header",
            bytes.len()
        )));
    }

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(le_array(&bytes[43..47]));
    if crc32fast::hash(&bytes[0..43]) != stored_checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);

    Ok(Header {
        model_id,
        dimensions: u16::from_le_bytes(le_array(&bytes[33..35])),
        entry_count: u64::from_le_bytes(le_array(&bytes[35..43])),
    })
}

fn read_entry(chunk: &[u8], dimensions: usize) -> Result<EmbeddingCacheEntry, SnapshotError> {
    let mut content_hash = [0u8; 32];
    content_hash.copy_from_slice(&chunk[0..32]);

    let created_secs = i64::from_le_bytes(le_array(&chunk[32..40]));
    let created_at = DateTime::<Utc>::from_timestamp(created_secs, 0).ok_or_else(|| {
        SnapshotError::InvalidFormat(format!("timestamp {created_secs} out of range"))
    })?;
    let ttl_secs = u64::from_le_bytes(le_array(&chunk[40..48]));
    let vector = codec::from_native(&chunk[ENTRY_PREFIX_SIZE..], dimensions)?;

    Ok(EmbeddingCacheEntry {
        content_hash,
        vector,
        created_at,
        ttl_secs,
    })
}

fn le_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}
