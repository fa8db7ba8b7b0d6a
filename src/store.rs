//! The chunk store interface and store construction from configuration

use crate::error::{ChunkStoreError, Result};
use crate::memory::MemoryChunkStore;
use crate::metadata;
use crate::npy::NpyFileChunkStore;
#[cfg(feature = "object-store")]
use crate::object::{ObjectChunkStore, ObjectStoreConfig};
use crate::types::{Chunk, DType};
use async_trait::async_trait;
use ndarray::SliceInfoElem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Directory of NPY files
    Npy,
    /// Process memory
    Memory,
    /// Object store (S3, GCS, Azure, HTTP, local or in-memory via `object_store`)
    ObjectStore,
}

/// A store of chunks, i.e. rectangular pieces of N-dimensional arrays.
///
/// Chunks are addressed by an array name and a slice specification with unit
/// steps. Implementations validate every request through
/// [`metadata::chunk_metadata`] before doing any I/O and report backend
/// failures as [`ChunkStoreError::StoreUnavailable`] or
/// [`ChunkStoreError::ChunkNotFound`].
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Get the chunk of `array_name` covered by `slices`.
    ///
    /// The dtype is always required, since raw-byte backends cannot describe
    /// their own contents.
    async fn get(&self, array_name: &str, slices: &[SliceInfoElem], dtype: &DType) -> Result<Chunk>;

    /// Store `chunk` as the part of `array_name` covered by `slices`,
    /// replacing any existing data for that chunk
    async fn put(&self, array_name: &str, slices: &[SliceInfoElem], chunk: &Chunk) -> Result<()>;

    /// Join name segments into an array name
    fn join(&self, names: &[&str]) -> String {
        metadata::join(names)
    }

    /// Get the backend type
    fn backend(&self) -> StorageBackend;
}

/// Serializable description of a chunk store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// NPY files under an existing directory
    Npy { path: PathBuf },
    /// Fresh, empty in-memory store
    Memory,
    /// Object store bucket / pool
    #[cfg(feature = "object-store")]
    ObjectStore(ObjectStoreConfig),
}

impl StoreConfig {
    /// Derive a store configuration from a URL.
    ///
    /// `file://` URLs and bare paths select the NPY backend, `memory://` an
    /// in-memory store and any other scheme the object store backend.
    pub fn from_url(url: &str) -> Result<Self> {
        match url.find("://") {
            None => Ok(StoreConfig::Npy {
                path: PathBuf::from(url),
            }),
            Some(scheme_end) => {
                let scheme = &url[..scheme_end];
                match scheme {
                    "file" => Ok(StoreConfig::Npy {
                        path: PathBuf::from(&url[scheme_end + 3..]),
                    }),
                    "memory" => Ok(StoreConfig::Memory),
                    #[cfg(feature = "object-store")]
                    _ => Ok(StoreConfig::ObjectStore(ObjectStoreConfig::from_url(url))),
                    #[cfg(not(feature = "object-store"))]
                    _ => Err(ChunkStoreError::Configuration(format!(
                        "Scheme {:?} needs the object-store feature",
                        scheme
                    ))),
                }
            }
        }
    }

    /// Read a store configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ChunkStoreError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Backend selected by this configuration
    pub fn backend(&self) -> StorageBackend {
        match self {
            StoreConfig::Npy { .. } => StorageBackend::Npy,
            StoreConfig::Memory => StorageBackend::Memory,
            #[cfg(feature = "object-store")]
            StoreConfig::ObjectStore(_) => StorageBackend::ObjectStore,
        }
    }
}

/// Open the chunk store described by `config`.
///
/// Fails with [`ChunkStoreError::StoreUnavailable`] if the underlying
/// directory or service cannot be reached.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ChunkStore>> {
    match config {
        StoreConfig::Npy { path } => Ok(Arc::new(NpyFileChunkStore::new(path)?)),
        StoreConfig::Memory => Ok(Arc::new(MemoryChunkStore::new())),
        #[cfg(feature = "object-store")]
        StoreConfig::ObjectStore(config) => Ok(Arc::new(ObjectChunkStore::connect(config).await?)),
    }
}

/// Parse a URL and open the matching chunk store
pub async fn open_store_url(url: &str) -> Result<Arc<dyn ChunkStore>> {
    open_store(&StoreConfig::from_url(url)?).await
}
