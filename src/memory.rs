//! In-memory chunk store holding raw chunk bytes

use crate::error::{ErrorMap, NativeError, Result, StandardError};
use crate::metadata::chunk_metadata;
use crate::store::{ChunkStore, StorageBackend};
use crate::types::{Chunk, DType};
use async_trait::async_trait;
use bytes::Bytes;
use ndarray::SliceInfoElem;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Native failures of the memory store
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("No object stored under key {0}")]
    KeyNotFound(String),
    #[error("Object {key} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        key: String,
        actual: usize,
        expected: usize,
    },
}

/// Categories of [`MemoryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryErrorKind {
    KeyNotFound,
    SizeMismatch,
}

impl NativeError for MemoryError {
    type Kind = MemoryErrorKind;

    fn native_kind(&self) -> MemoryErrorKind {
        match self {
            MemoryError::KeyNotFound(_) => MemoryErrorKind::KeyNotFound,
            MemoryError::SizeMismatch { .. } => MemoryErrorKind::SizeMismatch,
        }
    }
}

/// Chunk store keeping raw chunk buffers in a map, keyed like an object store
#[derive(Debug)]
pub struct MemoryChunkStore {
    objects: RwLock<HashMap<String, Bytes>>,
    error_map: ErrorMap<MemoryErrorKind>,
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChunkStore {
    /// Create a new, empty memory store
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            error_map: ErrorMap::new()
                .with(MemoryErrorKind::KeyNotFound, StandardError::ChunkNotFound),
        }
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Sorted keys of all stored chunks
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read_object(&self, key: &str, num_bytes: usize) -> std::result::Result<Bytes, MemoryError> {
        let objects = self.objects.read();
        let data = objects
            .get(key)
            .ok_or_else(|| MemoryError::KeyNotFound(key.to_string()))?;
        if data.len() != num_bytes {
            return Err(MemoryError::SizeMismatch {
                key: key.to_string(),
                actual: data.len(),
                expected: num_bytes,
            });
        }
        Ok(data.clone())
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn get(
        &self,
        array_name: &str,
        slices: &[SliceInfoElem],
        dtype: &DType,
    ) -> Result<Chunk> {
        let meta = chunk_metadata(array_name, slices, None, Some(dtype))?;
        let num_bytes = meta.num_elements() * dtype.itemsize();
        log::debug!("Reading chunk {} from memory", meta.key);
        let data = self
            .error_map
            .translate(self.read_object(&meta.key, num_bytes), Some(&meta.key))?;
        Chunk::new(*dtype, meta.shape, data)
    }

    async fn put(&self, array_name: &str, slices: &[SliceInfoElem], chunk: &Chunk) -> Result<()> {
        let meta = chunk_metadata(array_name, slices, Some(chunk), None)?;
        log::debug!("Writing chunk {} to memory ({} bytes)", meta.key, chunk.nbytes());
        self.objects.write().insert(meta.key, chunk.data().clone());
        Ok(())
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
