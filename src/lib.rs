//! Chunkstore - storage of N-dimensional arrays as independent chunks
//!
//! A chunk is the rectangular piece of a named array covered by a slice
//! specification with unit steps. Every chunk is stored under its own key
//! derived from the array name and the slice start offsets, e.g. chunk
//! `[3..6, 0..2]` of array `cb1/flags` lives at `cb1/flags/00003_00000`.
//!
//! # Features
//!
//! - One async [`ChunkStore`] interface with `get`, `put` and `join`
//! - Request validation shared by all backends ([`metadata::chunk_metadata`])
//! - Backend failures normalised through per-store error maps into
//!   [`ChunkStoreError::StoreUnavailable`] and [`ChunkStoreError::ChunkNotFound`]
//! - Directory-of-NPY-files, in-memory and object store (S3, GCS, Azure,
//!   HTTP via `object_store`, feature `object-store`) backends
//! - Lazy chunked arrays that fetch blocks only when awaited
//!
//! # Example
//!
//! ```rust,ignore
//! use chunkstore::{open_store_url, slices_from_ranges, Chunk};
//!
//! # async fn example() -> chunkstore::Result<()> {
//! let store = open_store_url("file:///data/chunks").await?;
//! let slices = slices_from_ranges(&[3..5]);
//! store.put("x", &slices, &Chunk::from_vec(vec![2], &[1.0f32, 2.0])?).await?;
//! let chunk = store.get("x", &slices, &"<f4".parse()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod datasource;
pub mod error;
pub mod layout;
pub mod lazy;
pub mod memory;
pub mod metadata;
pub mod npy;
#[cfg(feature = "object-store")]
pub mod object;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use datasource::{ArrayInfo, VisFlagsWeights};
pub use error::{ChunkStoreError, ErrorMap, Result, StandardError};
pub use layout::ChunkGrid;
pub use lazy::{DeferredChunk, LazyArray};
pub use memory::MemoryChunkStore;
pub use metadata::{chunk_metadata, chunk_name, slices_from_ranges, ChunkMetadata};
pub use npy::NpyFileChunkStore;
#[cfg(feature = "object-store")]
pub use object::{ObjectChunkStore, ObjectStoreConfig};
pub use store::{open_store, open_store_url, ChunkStore, StorageBackend, StoreConfig};
pub use types::{ByteOrder, Chunk, DType, DTypeKind, Element};

/// Version of the chunkstore implementation
pub const CHUNKSTORE_VERSION: &str = env!("CARGO_PKG_VERSION");
