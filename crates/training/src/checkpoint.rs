//! Numbered snapshots of both networks and both optimizers.
//!
//! Layout under the checkpoint directory:
//! ```text
//! checkpoint.json          {"latest": "ckpt-3", "index": 3}
//! config.json              TrainingConfig of the run
//! ckpt-3/generator.bin
//! ckpt-3/discriminator.bin
//! ckpt-3/optim_gen.bin
//! ckpt-3/optim_disc.bin
//! ckpt-3/state.json        CheckpointState
//! ```

use crate::session::TrainingSession;
use anyhow::{anyhow, Context};
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use models::{GeneratorConfig, PatchDiscriminator, UnetGenerator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "checkpoint.json";
const STATE_FILE: &str = "state.json";
const PREFIX: &str = "ckpt-";

/// Progress stored with each snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Snapshot number (`ckpt-<index>`).
    pub index: usize,
    /// Epochs fully trained when the snapshot was taken.
    pub epochs_completed: usize,
    pub steps: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointIndex {
    latest: String,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

fn parse_index(name: &str) -> Option<usize> {
    name.strip_prefix(PREFIX)?.parse().ok()
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    /// Latest snapshot directory, from the index file or else by scanning for
    /// the highest `ckpt-<n>`.
    pub fn latest(&self) -> anyhow::Result<Option<PathBuf>> {
        let index_path = self.dir.join(INDEX_FILE);
        if index_path.is_file() {
            let raw = fs::read_to_string(&index_path)
                .with_context(|| format!("reading {}", index_path.display()))?;
            let index: CheckpointIndex = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", index_path.display()))?;
            let path = self.dir.join(&index.latest);
            if path.is_dir() {
                return Ok(Some(path));
            }
            log::warn!(
                "{} names missing snapshot {}; scanning",
                index_path.display(),
                index.latest
            );
        }
        Ok(self
            .scan()?
            .last()
            .map(|(_, path)| path.clone()))
    }

    /// Snapshots sorted by index.
    fn scan(&self) -> anyhow::Result<Vec<(usize, PathBuf)>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(idx) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_index)
            {
                found.push((idx, path));
            }
        }
        found.sort_by_key(|(idx, _)| *idx);
        Ok(found)
    }

    /// Write a new snapshot and point the index at it. `state.index` is set
    /// to the assigned number.
    pub fn save<B, OG, OD>(
        &self,
        session: &TrainingSession<B, OG, OD>,
        state: &mut CheckpointState,
    ) -> anyhow::Result<PathBuf>
    where
        B: AutodiffBackend,
        OG: Optimizer<UnetGenerator<B>, B>,
        OD: Optimizer<PatchDiscriminator<B>, B>,
    {
        let index = self.scan()?.last().map(|(idx, _)| idx + 1).unwrap_or(1);
        let name = format!("{PREFIX}{index}");
        let dir = self.dir.join(&name);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let recorder = recorder();
        session
            .generator
            .clone()
            .save_file(dir.join("generator"), &recorder)
            .map_err(|e| anyhow!("failed to save generator: {e}"))?;
        session
            .discriminator
            .clone()
            .save_file(dir.join("discriminator"), &recorder)
            .map_err(|e| anyhow!("failed to save discriminator: {e}"))?;
        Recorder::<B>::record(&recorder, session.optim_gen.to_record(), dir.join("optim_gen"))
            .map_err(|e| anyhow!("failed to save generator optimizer: {e}"))?;
        Recorder::<B>::record(&recorder, session.optim_disc.to_record(), dir.join("optim_disc"))
            .map_err(|e| anyhow!("failed to save discriminator optimizer: {e}"))?;

        state.index = index;
        fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;
        let pointer = CheckpointIndex {
            latest: name,
            index,
        };
        fs::write(
            self.dir.join(INDEX_FILE),
            serde_json::to_string_pretty(&pointer)?,
        )?;
        log::info!("saved checkpoint {}", dir.display());
        Ok(dir)
    }

    /// Load the latest snapshot into `session`. `Ok(None)` when there is no
    /// snapshot; a snapshot that exists but cannot be read is an error.
    pub fn restore<B, OG, OD>(
        &self,
        session: &mut TrainingSession<B, OG, OD>,
        device: &B::Device,
    ) -> anyhow::Result<Option<CheckpointState>>
    where
        B: AutodiffBackend,
        OG: Optimizer<UnetGenerator<B>, B> + Clone,
        OD: Optimizer<PatchDiscriminator<B>, B> + Clone,
    {
        let Some(dir) = self.latest()? else {
            return Ok(None);
        };
        let recorder = recorder();
        session.generator = session
            .generator
            .clone()
            .load_file(dir.join("generator"), &recorder, device)
            .map_err(|e| anyhow!("failed to load generator from {}: {e}", dir.display()))?;
        session.discriminator = session
            .discriminator
            .clone()
            .load_file(dir.join("discriminator"), &recorder, device)
            .map_err(|e| anyhow!("failed to load discriminator from {}: {e}", dir.display()))?;
        let record = Recorder::<B>::load(&recorder, dir.join("optim_gen"), device)
            .map_err(|e| anyhow!("failed to load generator optimizer: {e}"))?;
        session.optim_gen = session.optim_gen.clone().load_record(record);
        let record = Recorder::<B>::load(&recorder, dir.join("optim_disc"), device)
            .map_err(|e| anyhow!("failed to load discriminator optimizer: {e}"))?;
        session.optim_disc = session.optim_disc.clone().load_record(record);

        let state_path = dir.join(STATE_FILE);
        let state = if state_path.is_file() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)
                .with_context(|| format!("parsing {}", state_path.display()))?
        } else {
            log::warn!("{} missing; resuming from epoch 0", state_path.display());
            CheckpointState {
                index: dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_index)
                    .unwrap_or(0),
                ..Default::default()
            }
        };
        log::info!(
            "restored {} (epochs_completed={}, steps={})",
            dir.display(),
            state.epochs_completed,
            state.steps
        );
        Ok(Some(state))
    }

    /// Inference-only generator from `snapshot` or the latest snapshot.
    pub fn load_generator<B: Backend>(
        &self,
        config: &GeneratorConfig,
        snapshot: Option<&Path>,
        device: &B::Device,
    ) -> anyhow::Result<UnetGenerator<B>> {
        let dir = match snapshot {
            Some(dir) => dir.to_path_buf(),
            None => self
                .latest()?
                .ok_or_else(|| anyhow!("no checkpoint found under {}", self.dir.display()))?,
        };
        config
            .init::<B>(device)
            .load_file(dir.join("generator"), &recorder(), device)
            .map_err(|e| anyhow!("failed to load generator from {}: {e}", dir.display()))
    }
}
