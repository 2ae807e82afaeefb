//! Batch iteration for training and evaluation.

use crate::aug::PairTransform;
use crate::index::load_pair;
use crate::types::{DatasetResult, PairDatasetError, PairIndex, Split};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 100;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub transform: PairTransform,
    pub split: Split,
    /// Shuffle pairs once per epoch.
    pub shuffle: bool,
    /// Seed for shuffling and jitter; drawn from the thread rng when None.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
}

impl LoaderConfig {
    pub fn train(seed: Option<u64>) -> Self {
        Self {
            transform: PairTransform::default(),
            split: Split::Train,
            shuffle: true,
            seed,
            drop_last: false,
        }
    }

    pub fn test() -> Self {
        Self {
            transform: PairTransform::default(),
            split: Split::Test,
            shuffle: false,
            seed: Some(0),
            drop_last: false,
        }
    }
}

/// Inputs and targets as `[batch, 3, height, width]` tensors in [-1, 1].
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> PairBatch<B> {
    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PairBatchIter {
    indices: Vec<PairIndex>,
    cursor: usize,
    cfg: LoaderConfig,
    base_seed: u64,
    epoch: usize,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    total_load_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    inputs_buf: Vec<f32>,
    targets_buf: Vec<f32>,
}

fn mix_seed(seed: u64, epoch: usize, position: usize) -> u64 {
    seed.wrapping_add(0x9E37_79B9_7F4A_7C15u64.wrapping_mul(epoch as u64 + 1)) ^ position as u64
}

impl PairBatchIter {
    /// Iterate `indices` once; `epoch` feeds the shuffle and jitter seeds.
    pub fn new(mut indices: Vec<PairIndex>, cfg: LoaderConfig, epoch: usize) -> Self {
        let base_seed = cfg.seed.unwrap_or_else(|| rand::rng().random());
        if cfg.shuffle {
            let mut rng = StdRng::seed_from_u64(mix_seed(base_seed, epoch, usize::MAX));
            indices.shuffle(&mut rng);
        }
        let log_every_samples = match std::env::var("PAIR_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let now = Instant::now();
        Self {
            indices,
            cursor: 0,
            cfg,
            base_seed,
            epoch,
            processed_samples: 0,
            processed_batches: 0,
            started: now,
            total_load_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
            inputs_buf: Vec::new(),
            targets_buf: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Pairs in iteration order.
    pub fn order(&self) -> &[PairIndex] {
        &self.indices
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<PairBatch<B>>> {
        let batch_size = batch_size.max(1);
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let start = self.cursor;
        let end = (start + batch_size).min(self.indices.len());
        if self.cfg.drop_last && end - start < batch_size {
            self.cursor = self.indices.len();
            return Ok(None);
        }
        self.cursor = end;

        let transform = &self.cfg.transform;
        let split = self.cfg.split;
        let base_seed = self.base_seed;
        let epoch = self.epoch;
        let slice = &self.indices[start..end];

        let t_load = Instant::now();
        // Decode in parallel; the indexed collect keeps shuffle order.
        let loaded: Vec<_> = slice
            .par_iter()
            .enumerate()
            .map(|(i, idx)| {
                let mut rng = StdRng::seed_from_u64(mix_seed(base_seed, epoch, start + i));
                (idx, load_pair(idx, transform, split, &mut rng))
            })
            .collect();
        let load_elapsed = t_load.elapsed();

        self.inputs_buf.clear();
        self.targets_buf.clear();
        let mut expected_size: Option<(u32, u32)> = None;
        for (idx, res) in loaded {
            let sample = res?;
            let size = (sample.width, sample.height);
            match expected_size {
                None => expected_size = Some(size),
                Some(expected) if expected != size => {
                    return Err(PairDatasetError::ShapeMismatch {
                        path: idx.display_path().to_path_buf(),
                        expected,
                        actual: size,
                    });
                }
                _ => {}
            }
            self.inputs_buf.extend_from_slice(&sample.input_chw);
            self.targets_buf.extend_from_slice(&sample.target_chw);
        }

        let Some((width, height)) = expected_size else {
            return Ok(None);
        };
        let batch_len = end - start;
        let shape = [batch_len, 3, height as usize, width as usize];
        let inputs = Tensor::<B, 1>::from_floats(self.inputs_buf.as_slice(), device).reshape(shape);
        let targets =
            Tensor::<B, 1>::from_floats(self.targets_buf.as_slice(), device).reshape(shape);

        self.processed_samples += batch_len;
        self.processed_batches += 1;
        self.total_load_time += load_elapsed;
        self.maybe_log_progress();

        Ok(Some(PairBatch { inputs, targets }))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let should_log =
            processed_since >= threshold || self.last_log.elapsed() >= Duration::from_secs(30);
        if !should_log {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        let avg_load_ms = if self.processed_batches > 0 {
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        log::info!(
            "[dataset] epoch={} batches={} samples={}/{} elapsed={:.1}s rate={:.1} pair/s avg_load_ms={:.2}",
            self.epoch,
            self.processed_batches,
            self.processed_samples,
            self.indices.len(),
            secs,
            rate,
            avg_load_ms
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}
