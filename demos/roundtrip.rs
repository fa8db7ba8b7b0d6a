//! Example: store correlator data as chunks and read it back lazily
//!
//! Run with: cargo run --example roundtrip [store-url]
//!
//! Without a URL the chunks go to a temporary NPY directory.

use anyhow::Context;
use chunkstore::{
    open_store, ArrayInfo, Chunk, ChunkGrid, Element, StoreConfig, VisFlagsWeights,
};
use ndarray::{s, Array2, Array3};
use num_complex::Complex;
use std::collections::HashMap;
use std::time::Instant;

const SHAPE: [usize; 3] = [8, 64, 12];
const CHUNKS: [usize; 3] = [2, 16, 12];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let temp_dir = tempfile::tempdir()?;
    let config = match std::env::args().nth(1) {
        Some(url) => StoreConfig::from_url(&url)?,
        None => StoreConfig::Npy {
            path: temp_dir.path().to_path_buf(),
        },
    };
    println!("Chunk store: {:?}", config);
    let store = open_store(&config).await.context("Cannot open chunk store")?;

    let vis = Array3::from_shape_fn(SHAPE, |(t, f, b)| Complex::new(t as f32, (f * b) as f32));
    let flags = Array3::<u8>::zeros(SHAPE);
    let weights = Array3::from_shape_fn(SHAPE, |(_, _, b)| (b % 4) as u8 + 1);
    let weights_channel =
        Array2::from_shape_fn((SHAPE[0], SHAPE[1]), |(_, f)| 1.0 / (f + 1) as f32);

    let grid = ChunkGrid::regular(&SHAPE, &CHUNKS)?;
    let channel_grid = ChunkGrid::regular(&SHAPE[..2], &CHUNKS[..2])?;
    println!("Layout: {}", grid.summary());

    let start = Instant::now();
    let mut writes = 0;
    for coords in grid.block_coords() {
        let r = grid.block_ranges(&coords)?;
        let slices = chunkstore::slices_from_ranges(&r);
        let block = s![r[0].clone(), r[1].clone(), r[2].clone()];
        store
            .put("demo/correlator_data", &slices, &Chunk::from_array(&vis.slice(block)))
            .await?;
        store
            .put("demo/flags", &slices, &Chunk::from_array(&flags.slice(block)))
            .await?;
        store
            .put("demo/weights", &slices, &Chunk::from_array(&weights.slice(block)))
            .await?;
        writes += 3;
    }
    for coords in channel_grid.block_coords() {
        let r = channel_grid.block_ranges(&coords)?;
        let piece = Chunk::from_array(&weights_channel.slice(s![r[0].clone(), r[1].clone()]));
        let slices = chunkstore::slices_from_ranges(&r);
        store.put("demo/weights_channel", &slices, &piece).await?;
        writes += 1;
    }
    println!("Wrote {} chunks in {:?}", writes, start.elapsed());

    let info = |dtype, grid: &ChunkGrid| ArrayInfo {
        dtype,
        shape: grid.shape(),
        chunks: grid.chunks().to_vec(),
    };
    let chunk_info = HashMap::from([
        ("correlator_data".to_string(), info(Complex::<f32>::dtype(), &grid)),
        ("flags".to_string(), info(u8::dtype(), &grid)),
        ("weights".to_string(), info(u8::dtype(), &grid)),
        ("weights_channel".to_string(), info(f32::dtype(), &channel_grid)),
    ]);
    let data = VisFlagsWeights::from_store(store, "demo", &chunk_info)?;
    println!("{}", data.vis().summary());

    let start = Instant::now();
    let all_vis = data.vis().compute().await?;
    println!(
        "Read back {} visibilities in {:?}",
        all_vis.len(),
        start.elapsed()
    );
    anyhow::ensure!(
        all_vis.to_array::<Complex<f32>>()? == vis.into_dyn(),
        "Visibilities differ after round trip"
    );

    let block = data.weights_block(&[1, 2, 0]).await?;
    println!("Weights block [1, 2, 0]: shape {:?}, sum {}", block.shape(), block.sum());
    Ok(())
}
