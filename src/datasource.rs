//! Correlator data (visibilities, flags and weights) held in a chunk store

use crate::error::{ChunkStoreError, Result};
use crate::layout::ChunkGrid;
use crate::lazy::LazyArray;
use crate::store::ChunkStore;
use crate::types::{Chunk, DType, DTypeKind};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const VIS_ARRAY: &str = "correlator_data";
pub const FLAGS_ARRAY: &str = "flags";
pub const WEIGHTS_ARRAY: &str = "weights";
pub const WEIGHTS_CHANNEL_ARRAY: &str = "weights_channel";

/// Dtype, shape and chunking of one stored array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl ArrayInfo {
    /// Chunk grid of the array, checked against its shape
    pub fn grid(&self) -> Result<ChunkGrid> {
        let grid = ChunkGrid::new(self.chunks.clone())
            .map_err(|e| ChunkStoreError::Metadata(e.to_string()))?;
        if grid.shape() != self.shape {
            return Err(ChunkStoreError::Metadata(format!(
                "Chunks {:?} cover shape {:?}, not {:?}",
                self.chunks,
                grid.shape(),
                self.shape
            )));
        }
        Ok(grid)
    }
}

/// Visibilities, flags and weights of one capture, as lazy arrays.
///
/// Weights are stored in two parts: coarse per-baseline `weights` of shape
/// (time, frequency, baseline) and `weights_channel` of shape (time,
/// frequency). The effective weight is their product.
#[derive(Debug, Clone)]
pub struct VisFlagsWeights {
    name: String,
    arrays: HashMap<String, LazyArray>,
}

impl VisFlagsWeights {
    /// Set up lazy arrays for every array in `chunk_info`, named
    /// `<base_name>/<array>` in `store`
    pub fn from_store(
        store: Arc<dyn ChunkStore>,
        base_name: &str,
        chunk_info: &HashMap<String, ArrayInfo>,
    ) -> Result<Self> {
        let mut arrays = HashMap::with_capacity(chunk_info.len());
        for (array, info) in chunk_info {
            let array_name = store.join(&[base_name, array]);
            let lazy =
                LazyArray::with_grid(Arc::clone(&store), array_name, info.grid()?, info.dtype)
                    .map_err(|e| ChunkStoreError::Metadata(format!("Array {}: {}", array, e)))?;
            arrays.insert(array.clone(), lazy);
        }
        for required in [VIS_ARRAY, FLAGS_ARRAY, WEIGHTS_ARRAY, WEIGHTS_CHANNEL_ARRAY] {
            if !arrays.contains_key(required) {
                return Err(ChunkStoreError::Metadata(format!(
                    "No chunk info for array {} of {}",
                    required, base_name
                )));
            }
        }

        let data = Self {
            name: base_name.to_string(),
            arrays,
        };
        let (vis, flags, weights) = (
            data.vis().shape(),
            data.flags().shape(),
            data.weights().shape(),
        );
        if vis != flags || vis != weights {
            return Err(ChunkStoreError::Metadata(format!(
                "Shapes of vis {:?}, flags {:?} and weights {:?} differ",
                vis, flags, weights
            )));
        }
        let weights_grid = data.weights().grid().chunks();
        let channel_grid = data.weights_channel().grid().chunks();
        if weights_grid.len() < 2 || channel_grid != &weights_grid[..weights_grid.len() - 1] {
            return Err(ChunkStoreError::Metadata(format!(
                "Chunks of weights_channel {:?} do not match leading chunks of weights {:?}",
                channel_grid, weights_grid
            )));
        }
        log::debug!(
            "Opened correlator data {} with {} arrays: {}",
            data.name,
            data.arrays.len(),
            data.vis().summary()
        );
        Ok(data)
    }

    /// Dataset name (the array name prefix in the store)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape of the visibilities
    pub fn shape(&self) -> Vec<usize> {
        self.vis().shape()
    }

    /// Any array from the chunk info, by its short name
    pub fn array(&self, name: &str) -> Option<&LazyArray> {
        self.arrays.get(name)
    }

    pub fn vis(&self) -> &LazyArray {
        &self.arrays[VIS_ARRAY]
    }

    pub fn flags(&self) -> &LazyArray {
        &self.arrays[FLAGS_ARRAY]
    }

    pub fn weights(&self) -> &LazyArray {
        &self.arrays[WEIGHTS_ARRAY]
    }

    pub fn weights_channel(&self) -> &LazyArray {
        &self.arrays[WEIGHTS_CHANNEL_ARRAY]
    }

    /// Effective weights of the block at `coords`: the weights block scaled
    /// by the weights_channel block broadcast over the last axis
    pub async fn weights_block(&self, coords: &[usize]) -> Result<ArrayD<f32>> {
        let weights = self.weights().block(coords)?;
        let channel = self
            .weights_channel()
            .block(&coords[..coords.len().saturating_sub(1)])?;
        let (weights, channel) = futures::try_join!(weights.fetch(), channel.fetch())?;
        let weights = to_f32_array(&weights)?;
        let channel = to_f32_array(&channel)?;
        let last = Axis(channel.ndim());
        Ok(&weights * &channel.insert_axis(last))
    }
}

fn to_f32_array(chunk: &Chunk) -> Result<ArrayD<f32>> {
    let dtype = chunk.dtype();
    match (dtype.kind(), dtype.itemsize()) {
        (DTypeKind::Float, 4) => chunk.to_array::<f32>(),
        (DTypeKind::Float, 8) => Ok(chunk.to_array::<f64>()?.mapv(|w| w as f32)),
        (DTypeKind::UInt, 1) => Ok(chunk.to_array::<u8>()?.mapv(f32::from)),
        _ => Err(ChunkStoreError::InvalidFormat(format!(
            "Weights of dtype {} are not supported",
            dtype
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChunkStore;
    use crate::metadata::slices_from_ranges;
    use crate::types::Element;
    use ndarray::{s, Array, Array2, Array3};
    use num_complex::Complex;

    const SHAPE: [usize; 3] = [4, 6, 2];

    fn chunk_info() -> HashMap<String, ArrayInfo> {
        let full = |dtype: DType| ArrayInfo {
            dtype,
            shape: SHAPE.to_vec(),
            chunks: vec![vec![2, 2], vec![3, 3], vec![2]],
        };
        let mut info = HashMap::new();
        info.insert(VIS_ARRAY.to_string(), full(Complex::<f32>::dtype()));
        info.insert(FLAGS_ARRAY.to_string(), full(u8::dtype()));
        info.insert(WEIGHTS_ARRAY.to_string(), full(u8::dtype()));
        info.insert(
            WEIGHTS_CHANNEL_ARRAY.to_string(),
            ArrayInfo {
                dtype: f32::dtype(),
                shape: vec![4, 6],
                chunks: vec![vec![2, 2], vec![3, 3]],
            },
        );
        info
    }

    #[test]
    fn test_array_info_serde() {
        let json = r#"{"dtype": "<f4", "shape": [4, 6], "chunks": [[2, 2], [3, 3]]}"#;
        let info: ArrayInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.dtype, "<f4".parse::<DType>().unwrap());
        assert_eq!(info.grid().unwrap().num_blocks(), vec![2, 2]);

        let bad = ArrayInfo {
            shape: vec![5, 6],
            ..info
        };
        assert!(matches!(bad.grid(), Err(ChunkStoreError::Metadata(_))));
    }

    #[test]
    fn test_from_store() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let data = VisFlagsWeights::from_store(store, "cb1_sdp_l0", &chunk_info()).unwrap();
        assert_eq!(data.name(), "cb1_sdp_l0");
        assert_eq!(data.shape(), SHAPE.to_vec());
        assert_eq!(data.vis().array_name(), "cb1_sdp_l0/correlator_data");
        assert_eq!(data.weights_channel().array_name(), "cb1_sdp_l0/weights_channel");
        assert!(data.array("timestamps").is_none());
    }

    #[test]
    fn test_missing_array() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut info = chunk_info();
        info.remove(WEIGHTS_CHANNEL_ARRAY);
        let err = VisFlagsWeights::from_store(store, "cb", &info).unwrap_err();
        assert!(matches!(err, ChunkStoreError::Metadata(_)));
    }

    #[test]
    fn test_shape_mismatch() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut info = chunk_info();
        info.insert(
            FLAGS_ARRAY.to_string(),
            ArrayInfo {
                dtype: u8::dtype(),
                shape: vec![4, 6, 3],
                chunks: vec![vec![2, 2], vec![3, 3], vec![3]],
            },
        );
        let err = VisFlagsWeights::from_store(store, "cb", &info).unwrap_err();
        assert!(matches!(err, ChunkStoreError::Metadata(_)));
    }

    #[tokio::test]
    async fn test_weights_block() {
        let store = Arc::new(MemoryChunkStore::new());
        let weights = Array3::from_shape_fn(SHAPE, |(t, f, b)| (t + f + b) as u8);
        let channel = Array2::from_shape_fn((4, 6), |(t, f)| 0.5 * (t * 6 + f) as f32);
        let weights_slices = slices_from_ranges(&[2..4, 0..3, 0..2]);
        let channel_slices = slices_from_ranges(&[2..4, 0..3]);
        store
            .put(
                "cb/weights",
                &weights_slices,
                &Chunk::from_array(&weights.slice(s![2..4, 0..3, ..])),
            )
            .await
            .unwrap();
        store
            .put(
                "cb/weights_channel",
                &channel_slices,
                &Chunk::from_array(&channel.slice(s![2..4, 0..3])),
            )
            .await
            .unwrap();

        let data = VisFlagsWeights::from_store(store, "cb", &chunk_info()).unwrap();
        let block = data.weights_block(&[1, 0, 0]).await.unwrap();
        let expected = Array::from_shape_fn((2, 3, 2), |(t, f, b)| {
            f32::from(weights[[t + 2, f, b]]) * channel[[t + 2, f]]
        });
        assert_eq!(block, expected.into_dyn());

        // Neighbouring block was never written
        let err = data.weights_block(&[0, 0, 0]).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::ChunkNotFound { .. }));
    }
}
