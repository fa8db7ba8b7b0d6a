//! Lazy, chunk-granular view of an array held in a chunk store
//!
//! A [`LazyArray`] fetches nothing when created. Each block maps to a
//! [`DeferredChunk`], a zero-argument `get` against the store that runs only
//! when awaited. There is no cache: awaiting the same block twice issues two
//! backend calls.

use crate::error::{ChunkStoreError, Result};
use crate::layout::ChunkGrid;
use crate::metadata::{checked_num_bytes, slices_from_ranges};
use crate::store::ChunkStore;
use crate::types::{Chunk, DType};
use crate::utils::format_bytes;
use futures::future::{try_join_all, BoxFuture};
use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn, SliceInfoElem};
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

/// A pending fetch of one chunk
#[derive(Clone)]
pub struct DeferredChunk {
    store: Arc<dyn ChunkStore>,
    array_name: String,
    slices: Vec<SliceInfoElem>,
    dtype: DType,
}

impl DeferredChunk {
    /// Slice specification of the chunk
    pub fn slices(&self) -> &[SliceInfoElem] {
        &self.slices
    }

    pub fn array_name(&self) -> &str {
        &self.array_name
    }

    /// Fetch the chunk from the store
    pub async fn fetch(&self) -> Result<Chunk> {
        self.store.get(&self.array_name, &self.slices, &self.dtype).await
    }
}

impl IntoFuture for DeferredChunk {
    type Output = Result<Chunk>;
    type IntoFuture = BoxFuture<'static, Result<Chunk>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.fetch().await })
    }
}

impl fmt::Debug for DeferredChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredChunk")
            .field("array_name", &self.array_name)
            .field("slices", &self.slices)
            .field("dtype", &self.dtype)
            .field("backend", &self.store.backend())
            .finish()
    }
}

/// An array in a chunk store, exposed block by block
#[derive(Clone)]
pub struct LazyArray {
    store: Arc<dyn ChunkStore>,
    array_name: String,
    grid: ChunkGrid,
    dtype: DType,
}

impl LazyArray {
    /// Describe the array `array_name` split into `chunks` (extents per dimension)
    pub fn new(
        store: Arc<dyn ChunkStore>,
        array_name: impl Into<String>,
        chunks: Vec<Vec<usize>>,
        dtype: DType,
    ) -> Result<Self> {
        Self::with_grid(store, array_name, ChunkGrid::new(chunks)?, dtype)
    }

    /// Describe an array with an existing chunk grid
    pub fn with_grid(
        store: Arc<dyn ChunkStore>,
        array_name: impl Into<String>,
        grid: ChunkGrid,
        dtype: DType,
    ) -> Result<Self> {
        let array_name = array_name.into();
        if array_name.is_empty() {
            return Err(ChunkStoreError::malformed("Array name is empty"));
        }
        if !dtype.is_fixed_size() {
            return Err(ChunkStoreError::malformed(format!(
                "Array dtype {} is not a fixed-size element type",
                dtype
            )));
        }
        Ok(Self {
            store,
            array_name,
            grid,
            dtype,
        })
    }

    pub fn array_name(&self) -> &str {
        &self.array_name
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn shape(&self) -> Vec<usize> {
        self.grid.shape()
    }

    pub fn ndim(&self) -> usize {
        self.grid.ndim()
    }

    /// Number of blocks in each dimension
    pub fn num_blocks(&self) -> Vec<usize> {
        self.grid.num_blocks()
    }

    /// Slice specification of the block at `coords`
    pub fn block_slices(&self, coords: &[usize]) -> Result<Vec<SliceInfoElem>> {
        Ok(slices_from_ranges(&self.grid.block_ranges(coords)?))
    }

    /// Deferred fetch of the block at `coords`
    pub fn block(&self, coords: &[usize]) -> Result<DeferredChunk> {
        Ok(DeferredChunk {
            store: Arc::clone(&self.store),
            array_name: self.array_name.clone(),
            slices: self.block_slices(coords)?,
            dtype: self.dtype,
        })
    }

    /// All blocks with their coordinates, in row-major order
    pub fn blocks(&self) -> impl Iterator<Item = (Vec<usize>, DeferredChunk)> + '_ {
        self.grid.block_coords().map(move |coords| {
            let slices = slices_from_ranges(&self.grid.block_ranges(&coords).unwrap_or_default());
            let deferred = DeferredChunk {
                store: Arc::clone(&self.store),
                array_name: self.array_name.clone(),
                slices,
                dtype: self.dtype,
            };
            (coords, deferred)
        })
    }

    /// Fetch every block concurrently and assemble the whole array in host
    /// byte order
    pub async fn compute(&self) -> Result<Chunk> {
        let futures: Vec<_> = self
            .blocks()
            .map(|(coords, deferred)| async move {
                let chunk = deferred.fetch().await?;
                Ok::<_, ChunkStoreError>((coords, chunk))
            })
            .collect();
        let blocks = try_join_all(futures).await?;

        let dtype = self.dtype.to_native_order();
        let itemsize = dtype.itemsize();
        let shape = self.shape();
        let mut byte_shape = shape.clone();
        byte_shape.push(itemsize);
        let num_bytes = checked_num_bytes(&shape, itemsize).ok_or_else(|| {
            ChunkStoreError::malformed(format!(
                "Array {} of shape {:?} is too large to assemble",
                self.array_name, shape
            ))
        })?;
        let mut data = vec![0u8; num_bytes];
        {
            let mut full = ArrayViewMutD::from_shape(IxDyn(&byte_shape), &mut data)?;
            for (coords, chunk) in &blocks {
                let chunk = chunk.to_native_order();
                if *chunk.dtype() != dtype {
                    return Err(ChunkStoreError::InvalidFormat(format!(
                        "Block {:?} of {} has dtype {}, expected {}",
                        coords,
                        self.array_name,
                        chunk.dtype(),
                        dtype
                    )));
                }
                let ranges = self.grid.block_ranges(coords)?;
                let mut chunk_shape = chunk.shape().to_vec();
                chunk_shape.push(itemsize);
                let block = ArrayViewD::from_shape(IxDyn(&chunk_shape), chunk.data())?;
                let mut target =
                    full.slice_each_axis_mut(|axis| match ranges.get(axis.axis.index()) {
                        Some(range) => ndarray::Slice::from(range.clone()),
                        None => ndarray::Slice::from(..),
                    });
                if target.shape() != block.shape() {
                    return Err(ChunkStoreError::InvalidFormat(format!(
                        "Block {:?} of {} has shape {:?}, expected {:?}",
                        coords,
                        self.array_name,
                        chunk.shape(),
                        &target.shape()[..self.ndim()]
                    )));
                }
                target.assign(&block);
            }
        }
        Chunk::new(dtype, shape, data)
    }

    /// Get a summary string of the array
    pub fn summary(&self) -> String {
        let nbytes = self
            .shape()
            .iter()
            .fold(self.dtype.itemsize(), |total, &extent| total.saturating_mul(extent));
        format!(
            "{} ({}): {}, {} uncompressed",
            self.array_name,
            self.dtype,
            self.grid.summary(),
            format_bytes(nbytes)
        )
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyArray")
            .field("array_name", &self.array_name)
            .field("chunks", &self.grid.chunks())
            .field("dtype", &self.dtype)
            .field("backend", &self.store.backend())
            .finish()
    }
}
