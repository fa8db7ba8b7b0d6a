//! Chunk grid - how a logical array is divided into chunks

use crate::error::{ChunkStoreError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Extents of the chunks along every dimension of an array.
///
/// Dimension `d` is split into `chunks[d].len()` consecutive pieces whose
/// extents sum to the array size in that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<usize>>", into = "Vec<Vec<usize>>")]
pub struct ChunkGrid {
    chunks: Vec<Vec<usize>>,
}

impl ChunkGrid {
    /// Create a grid from explicit per-dimension chunk extents
    pub fn new(chunks: Vec<Vec<usize>>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(ChunkStoreError::malformed(
                "Chunk grid must have at least one dimension",
            ));
        }
        for (dim, extents) in chunks.iter().enumerate() {
            if extents.is_empty() {
                return Err(ChunkStoreError::malformed(format!(
                    "Dimension {} has no chunks",
                    dim
                )));
            }
            if extents.iter().any(|&extent| extent == 0) {
                return Err(ChunkStoreError::malformed(format!(
                    "Chunk extents {:?} in dimension {} must be positive",
                    extents, dim
                )));
            }
        }
        Ok(Self { chunks })
    }

    /// Split `shape` into chunks of `chunk_size`, trimming the last chunk of
    /// each dimension to fit
    pub fn regular(shape: &[usize], chunk_size: &[usize]) -> Result<Self> {
        if shape.len() != chunk_size.len() {
            return Err(ChunkStoreError::malformed(format!(
                "Chunk size {:?} does not match dimensionality of shape {:?}",
                chunk_size, shape
            )));
        }
        if chunk_size.iter().any(|&size| size == 0) {
            return Err(ChunkStoreError::malformed(format!(
                "Chunk size {:?} must be positive",
                chunk_size
            )));
        }
        let chunks = shape
            .iter()
            .zip(chunk_size)
            .map(|(&size, &chunk)| {
                (0..size)
                    .step_by(chunk)
                    .map(|start| chunk.min(size - start))
                    .collect()
            })
            .collect();
        Self::new(chunks)
    }

    /// Per-dimension chunk extents
    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    pub fn ndim(&self) -> usize {
        self.chunks.len()
    }

    /// Get the total size in each dimension
    pub fn shape(&self) -> Vec<usize> {
        self.chunks.iter().map(|extents| extents.iter().sum()).collect()
    }

    /// Get the number of chunks in each dimension
    pub fn num_blocks(&self) -> Vec<usize> {
        self.chunks.iter().map(Vec::len).collect()
    }

    /// Get the total number of chunks
    pub fn total_blocks(&self) -> usize {
        self.num_blocks().iter().product()
    }

    /// Convert a row-major chunk index to chunk coordinates
    pub fn block_index_to_coords(&self, index: usize) -> Vec<usize> {
        let num_blocks = self.num_blocks();
        let mut coords = vec![0; self.ndim()];
        let mut remaining = index;

        for (i, coord) in coords.iter_mut().enumerate() {
            let stride: usize = num_blocks.iter().skip(i + 1).product();
            *coord = remaining / stride;
            remaining %= stride;
        }

        coords
    }

    /// Convert chunk coordinates to a row-major chunk index
    pub fn block_coords_to_index(&self, coords: &[usize]) -> usize {
        let num_blocks = self.num_blocks();
        let mut index = 0;

        for (i, &coord) in coords.iter().enumerate().take(self.ndim()) {
            let stride: usize = num_blocks.iter().skip(i + 1).product();
            index += coord * stride;
        }

        index
    }

    /// Get the element range covered by a chunk in each dimension
    pub fn block_ranges(&self, coords: &[usize]) -> Result<Vec<Range<usize>>> {
        if coords.len() != self.ndim() {
            return Err(ChunkStoreError::malformed(format!(
                "Chunk coordinates {:?} do not match {}-dimensional grid",
                coords,
                self.ndim()
            )));
        }
        coords
            .iter()
            .zip(&self.chunks)
            .enumerate()
            .map(|(dim, (&coord, extents))| {
                if coord >= extents.len() {
                    return Err(ChunkStoreError::malformed(format!(
                        "Chunk coordinate {} out of bounds in dimension {} ({} chunks)",
                        coord,
                        dim,
                        extents.len()
                    )));
                }
                let start: usize = extents[..coord].iter().sum();
                Ok(start..start + extents[coord])
            })
            .collect()
    }

    /// Iterate over all chunk coordinates in row-major order
    pub fn block_coords(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        (0..self.total_blocks()).map(move |index| self.block_index_to_coords(index))
    }

    /// Get a summary string of the grid
    pub fn summary(&self) -> String {
        let join = |values: Vec<usize>| {
            values
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" x ")
        };
        format!(
            "{}D array: {} in {} chunks ({})",
            self.ndim(),
            join(self.shape()),
            self.total_blocks(),
            join(self.num_blocks())
        )
    }
}

impl TryFrom<Vec<Vec<usize>>> for ChunkGrid {
    type Error = ChunkStoreError;

    fn try_from(chunks: Vec<Vec<usize>>) -> Result<Self> {
        Self::new(chunks)
    }
}

impl From<ChunkGrid> for Vec<Vec<usize>> {
    fn from(grid: ChunkGrid) -> Self {
        grid.chunks
    }
}
