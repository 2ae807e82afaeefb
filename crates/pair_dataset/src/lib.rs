//! Paired image loading for image-to-image translation.
//!
//! This crate provides utilities for:
//! - Decoding BMP/PNG files into RGB and splitting side-by-side composites
//! - Discovering pairs as composites or as parallel directories (e.g. `T1`/`T2`)
//! - Joint random jitter (resize, shared crop, shared flip) and [-1, 1] normalization
//! - Burn-compatible batch iteration with per-epoch seeded shuffling

pub mod aug;
pub mod index;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use aug::{
    chw_to_rgb_image, decode, denormalize_value, load_composite, normalize, normalize_value, preprocess_test,
    random_jitter, resize, split_composite, to_display, PairTransform, IMAGE_SIZE, LOAD_SIZE,
};
pub use index::{
    index_composites, index_paired_dirs, list_images, load_pair, DatasetSplits, PairLayout,
};
pub use types::*;

#[cfg(feature = "burn-runtime")]
pub use batch::{LoaderConfig, PairBatch, PairBatchIter};
