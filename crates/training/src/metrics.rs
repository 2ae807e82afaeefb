//! JSON-lines scalar log, one file per run.

use crate::session::StepLosses;
use anyhow::Context;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Mean losses and wall time of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub steps: usize,
    pub losses: StepLosses,
    pub seconds: f64,
}

impl EpochSummary {
    pub fn new(epoch: usize, losses: &[StepLosses], seconds: f64) -> Self {
        Self {
            epoch,
            steps: losses.len(),
            losses: StepLosses::mean(losses),
            seconds,
        }
    }
}

pub struct MetricsWriter {
    run_dir: PathBuf,
    path: PathBuf,
    file: File,
}

impl MetricsWriter {
    /// Open `<log_dir>/fit/<YYYYmmdd-HHMMSS>/metrics.jsonl`.
    pub fn create(log_dir: &Path) -> anyhow::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut run_dir = log_dir.join("fit").join(&stamp);
        // Two runs started within the same second get distinct directories.
        let mut n = 1;
        while run_dir.exists() {
            run_dir = log_dir.join("fit").join(format!("{stamp}-{n}"));
            n += 1;
        }
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("creating log dir {}", run_dir.display()))?;
        let path = run_dir.join("metrics.jsonl");
        let mut writer = Self::open(&path)?;
        writer.run_dir = run_dir;
        Ok(writer)
    }

    /// Append to an existing (or new) JSONL file.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening metrics file {}", path.display()))?;
        Ok(Self {
            run_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_step(&mut self, epoch: usize, step: u64, losses: &StepLosses) -> anyhow::Result<()> {
        let line = serde_json::json!({
            "kind": "step",
            "epoch": epoch,
            "step": step,
            "gen_total_loss": losses.gen_total_loss,
            "gen_gan_loss": losses.gen_gan_loss,
            "gen_l1_loss": losses.gen_l1_loss,
            "disc_loss": losses.disc_loss,
        });
        self.write_line(&line)
    }

    pub fn log_epoch(&mut self, summary: &EpochSummary) -> anyhow::Result<()> {
        let line = serde_json::json!({
            "kind": "epoch_summary",
            "epoch": summary.epoch,
            "steps": summary.steps,
            "seconds": summary.seconds,
            "gen_total_loss": summary.losses.gen_total_loss,
            "gen_gan_loss": summary.losses.gen_gan_loss,
            "gen_l1_loss": summary.losses.gen_l1_loss,
            "disc_loss": summary.losses.disc_loss,
        });
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &serde_json::Value) -> anyhow::Result<()> {
        writeln!(self.file, "{line}")
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.file.flush()?;
        Ok(())
    }
}
