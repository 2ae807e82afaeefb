use crate::checkpoint::{CheckpointManager, CheckpointState};
use crate::config::TrainingConfig;
use crate::metrics::{EpochSummary, MetricsWriter};
use crate::sample::save_sample;
use crate::TrainBackend;
use anyhow::{anyhow, Context};
use burn::backend::Autodiff;
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use clap::{Parser, ValueEnum};
use models::{DiscriminatorConfig, GeneratorConfig, UnetGenerator};
use pair_dataset::{
    chw_to_rgb_image, decode, list_images, load_composite, load_pair, normalize, resize,
    DatasetSplits, LoaderConfig, PairBatchIter, PairIndex, PairLayout, PairTransform, Split,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// `<root>/<input-subdir>` and `<root>/<target-subdir>` matched by file name.
    Paired,
    /// Side-by-side `target | input` files under `<root>/train` (and `<root>/test`).
    Composite,
}

/// Which batch-norm statistics the generator uses outside of a training step.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceNorm {
    /// Normalize with the statistics of the batch being translated, dropout
    /// active. Each call also advances the running averages.
    #[default]
    BatchStats,
    /// Use the running averages gathered during training; deterministic.
    RunningStats,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the Pix2Pix generator/discriminator pair")]
pub struct TrainArgs {
    /// Dataset root.
    #[arg(long, default_value = "data")]
    pub data_root: String,
    /// How pairs are stored under the dataset root.
    #[arg(long, value_enum, default_value_t = LayoutKind::Paired)]
    pub layout: LayoutKind,
    /// Input modality directory (paired layout).
    #[arg(long, default_value = "T1")]
    pub input_subdir: String,
    /// Target modality directory (paired layout).
    #[arg(long, default_value = "T2")]
    pub target_subdir: String,
    /// Exchange input and target (e.g. learn T2 -> T1).
    #[arg(long, default_value_t = false)]
    pub swap: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Load hyper-parameters from a saved config.json; the flags below are ignored.
    #[arg(long)]
    pub config: Option<String>,
    /// Number of epochs.
    #[arg(long, default_value_t = 20)]
    pub epochs: usize,
    /// Batch size.
    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,
    /// Adam learning rate for both networks.
    #[arg(long, default_value_t = 2e-4)]
    pub lr: f64,
    /// Weight of the L1 term in the generator loss.
    #[arg(long, default_value_t = 100.0)]
    pub lambda: f32,
    /// First-layer width of both networks.
    #[arg(long, default_value_t = 64)]
    pub base_filters: usize,
    /// Snapshot every N epochs.
    #[arg(long, default_value_t = 20)]
    pub checkpoint_every: usize,
    /// Seed for shuffling and jitter.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Checkpoint directory.
    #[arg(long, default_value = "training_checkpoints")]
    pub checkpoint_dir: String,
    /// Scalar log directory (runs go under <log-dir>/fit/<timestamp>).
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    /// Per-epoch preview images; disabled when empty.
    #[arg(long, default_value = "samples")]
    pub sample_dir: String,
    /// Batch-norm statistics used for preview images.
    #[arg(long, value_enum, default_value_t = InferenceNorm::BatchStats)]
    pub preview_norm: InferenceNorm,
    /// Start from fresh parameters even if a checkpoint exists.
    #[arg(long, default_value_t = false)]
    pub no_resume: bool,
}

impl TrainArgs {
    pub fn training_config(&self) -> anyhow::Result<TrainingConfig> {
        if let Some(path) = &self.config {
            return TrainingConfig::load(path)
                .map_err(|e| anyhow!("failed to load config {path}: {e}"));
        }
        Ok(TrainingConfig::new(
            GeneratorConfig::new().with_base_filters(self.base_filters),
            DiscriminatorConfig::new().with_base_filters(self.base_filters),
        )
        .with_num_epochs(self.epochs)
        .with_batch_size(self.batch_size)
        .with_learning_rate(self.lr)
        .with_lambda(self.lambda)
        .with_checkpoint_every(self.checkpoint_every)
        .with_seed(self.seed))
    }

    pub fn pair_layout(&self) -> PairLayout {
        match self.layout {
            LayoutKind::Composite => PairLayout::Composite,
            LayoutKind::Paired => PairLayout::PairedDirs {
                input_subdir: self.input_subdir.clone(),
                target_subdir: self.target_subdir.clone(),
            },
        }
    }
}

/// Output locations and resume policy for [`fit`].
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
    pub sample_dir: Option<PathBuf>,
    pub preview_norm: InferenceNorm,
    pub resume: bool,
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub state: CheckpointState,
    /// Epochs trained by this call (excludes restored ones).
    pub epochs_run: usize,
    pub last_epoch: Option<EpochSummary>,
    pub final_checkpoint: PathBuf,
    pub metrics_path: PathBuf,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let config = args.training_config()?;
    let root = Path::new(&args.data_root);
    let splits = args
        .pair_layout()
        .splits(root, args.swap)
        .map_err(|e| anyhow!("failed to index dataset at {}: {e}", root.display()))?;
    log::info!(
        "dataset {}: {} train pairs, {} test pairs",
        root.display(),
        splits.train.len(),
        splits.test.len()
    );

    let opts = FitOptions {
        checkpoint_dir: PathBuf::from(&args.checkpoint_dir),
        log_dir: PathBuf::from(&args.log_dir),
        sample_dir: (!args.sample_dir.is_empty()).then(|| PathBuf::from(&args.sample_dir)),
        preview_norm: args.preview_norm,
        resume: !args.no_resume,
    };
    let device = <Autodiff<TrainBackend> as Backend>::Device::default();
    let summary = fit::<Autodiff<TrainBackend>>(&config, &splits, &opts, &device)?;
    println!(
        "Trained {} epoch(s) ({} total, {} steps); checkpoint {}; metrics {}",
        summary.epochs_run,
        summary.state.epochs_completed,
        summary.state.steps,
        summary.final_checkpoint.display(),
        summary.metrics_path.display()
    );
    Ok(())
}

/// Train for `config.num_epochs`, resuming from the latest checkpoint when
/// `opts.resume` is set. Always leaves a checkpoint of the final state.
///
/// Resuming fails if the snapshot directory was written with different
/// generator or discriminator settings; `config.json` is left untouched then.
pub fn fit<B: AutodiffBackend>(
    config: &TrainingConfig,
    splits: &DatasetSplits,
    opts: &FitOptions,
    device: &B::Device,
) -> anyhow::Result<FitSummary> {
    if splits.train.is_empty() {
        anyhow::bail!("no training pairs");
    }
    let ckpts = CheckpointManager::new(&opts.checkpoint_dir);
    fs::create_dir_all(ckpts.dir())
        .with_context(|| format!("creating {}", ckpts.dir().display()))?;

    let mut session = config.init_session::<B>(device);
    let mut state = CheckpointState::default();
    let mut last_saved = None;
    if opts.resume && ckpts.latest()?.is_some() {
        ensure_same_models(config, &ckpts.config_path())?;
        if let Some(restored) = ckpts.restore(&mut session, device)? {
            last_saved = Some(ckpts.dir().join(format!("ckpt-{}", restored.index)));
            state = restored;
        }
    }
    config
        .save(ckpts.config_path())
        .with_context(|| format!("writing {}", ckpts.config_path().display()))?;
    let mut saved_at = last_saved.as_ref().map(|_| state.epochs_completed);

    let mut metrics = MetricsWriter::create(&opts.log_dir)?;
    log::info!("writing scalars to {}", metrics.path().display());

    let loader = LoaderConfig::train(Some(config.seed));
    let preview = splits.test.first().or_else(|| splits.train.first()).cloned();
    let mut last_epoch = None;
    let first_epoch = state.epochs_completed;

    for epoch in first_epoch..config.num_epochs {
        let started = Instant::now();
        if let (Some(dir), Some(pair)) = (&opts.sample_dir, &preview) {
            let path = dir.join(format!("epoch_{epoch:04}.png"));
            write_preview(
                &session.generator,
                pair,
                &loader.transform,
                opts.preview_norm,
                &path,
                device,
            )?;
        }

        let mut iter = PairBatchIter::new(splits.train.clone(), loader.clone(), epoch);
        let mut losses = Vec::with_capacity(iter.len());
        while let Some(batch) = iter.next_batch::<B>(config.batch_size, device)? {
            let step = session.train_step(batch.inputs, batch.targets);
            state.steps += 1;
            if !step.all_finite() {
                log::warn!("non-finite loss at epoch {epoch} step {}: {step:?}", state.steps);
            }
            metrics.log_step(epoch, state.steps, &step)?;
            losses.push(step);
            if state.steps % 100 == 0 {
                log::info!("epoch {} step {}", epoch + 1, state.steps);
            }
        }

        let seconds = started.elapsed().as_secs_f64();
        let summary = EpochSummary::new(epoch, &losses, seconds);
        metrics.log_epoch(&summary)?;
        log::info!("Time taken for epoch {} is {:.2} sec", epoch + 1, seconds);
        log::info!(
            "epoch {} gen_total={:.4} gen_gan={:.4} gen_l1={:.4} disc={:.4}",
            epoch + 1,
            summary.losses.gen_total_loss,
            summary.losses.gen_gan_loss,
            summary.losses.gen_l1_loss,
            summary.losses.disc_loss
        );
        last_epoch = Some(summary);
        state.epochs_completed = epoch + 1;

        if config.checkpoint_every > 0 && (epoch + 1) % config.checkpoint_every == 0 {
            last_saved = Some(ckpts.save(&session, &mut state)?);
            saved_at = Some(state.epochs_completed);
        }
    }

    let final_checkpoint = match last_saved {
        Some(path) if saved_at == Some(state.epochs_completed) => path,
        _ => ckpts.save(&session, &mut state)?,
    };

    Ok(FitSummary {
        state,
        epochs_run: state.epochs_completed - first_epoch,
        last_epoch,
        final_checkpoint,
        metrics_path: metrics.path().to_path_buf(),
    })
}

/// Refuse to resume from snapshots of differently shaped networks.
fn ensure_same_models(config: &TrainingConfig, saved_path: &Path) -> anyhow::Result<()> {
    if !saved_path.is_file() {
        log::warn!(
            "{} missing; resuming without a model check",
            saved_path.display()
        );
        return Ok(());
    }
    let saved = TrainingConfig::load(saved_path)
        .map_err(|e| anyhow!("failed to load {}: {e}", saved_path.display()))?;
    let generator = serde_json::to_value(&saved.generator)? == serde_json::to_value(&config.generator)?;
    let discriminator =
        serde_json::to_value(&saved.discriminator)? == serde_json::to_value(&config.discriminator)?;
    if !(generator && discriminator) {
        anyhow::bail!(
            "checkpoints in {} were trained with different model settings; \
             use a new --checkpoint-dir or --no-resume",
            saved_path.parent().unwrap_or(saved_path).display()
        );
    }
    Ok(())
}

/// Run the generator on an inner-backend batch without recording gradients.
pub fn infer<B: AutodiffBackend>(
    generator: &UnetGenerator<B>,
    input: Tensor<B::InnerBackend, 4>,
    norm: InferenceNorm,
) -> Tensor<B::InnerBackend, 4> {
    match norm {
        InferenceNorm::BatchStats => generator
            .forward(Tensor::from_inner(input))
            .detach()
            .inner(),
        InferenceNorm::RunningStats => generator.valid().forward(input),
    }
}

/// Translate one pair and save the `input | ground truth | prediction` strip.
fn write_preview<B: AutodiffBackend>(
    generator: &UnetGenerator<B>,
    pair: &PairIndex,
    transform: &PairTransform,
    norm: InferenceNorm,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    let sample = load_pair(pair, transform, Split::Test, &mut rng)?;
    let shape = [1, 3, sample.height as usize, sample.width as usize];
    let input =
        Tensor::<B::InnerBackend, 1>::from_floats(sample.input_chw.as_slice(), device).reshape(shape);
    let target =
        Tensor::<B::InnerBackend, 1>::from_floats(sample.target_chw.as_slice(), device).reshape(shape);
    let prediction = infer(generator, input.clone(), norm);
    save_sample(input, target, prediction, path)
}

#[derive(Parser, Debug)]
#[command(
    name = "translate",
    about = "Translate a directory of images with a trained generator"
)]
pub struct TranslateArgs {
    /// Directory of source-modality images.
    #[arg(long)]
    pub input_dir: String,
    /// Where translated PNGs are written.
    #[arg(long, default_value = "translated")]
    pub output_dir: String,
    /// Checkpoint directory of the training run.
    #[arg(long, default_value = "training_checkpoints")]
    pub checkpoint_dir: String,
    /// Specific snapshot directory (defaults to the latest).
    #[arg(long)]
    pub checkpoint: Option<String>,
    /// Inputs are `target | input` composites; only the input half is used.
    #[arg(long, default_value_t = false)]
    pub composite: bool,
    /// With --composite, take the left half as the input.
    #[arg(long, default_value_t = false)]
    pub swap: bool,
    /// Batch-norm statistics used for translation.
    #[arg(long, value_enum, default_value_t = InferenceNorm::BatchStats)]
    pub norm: InferenceNorm,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

pub fn run_translate(args: TranslateArgs) -> anyhow::Result<usize> {
    validate_backend_choice(args.backend)?;
    let device = <Autodiff<TrainBackend> as Backend>::Device::default();
    let ckpts = CheckpointManager::new(&args.checkpoint_dir);
    let generator_cfg = match TrainingConfig::load(ckpts.config_path()) {
        Ok(cfg) => cfg.generator,
        Err(e) => {
            log::warn!(
                "no usable {} ({e}); assuming default generator",
                ckpts.config_path().display()
            );
            GeneratorConfig::new()
        }
    };
    let generator = ckpts.load_generator::<Autodiff<TrainBackend>>(
        &generator_cfg,
        args.checkpoint.as_deref().map(Path::new),
        &device,
    )?;
    translate_dir(
        &generator,
        Path::new(&args.input_dir),
        Path::new(&args.output_dir),
        args.composite,
        args.swap,
        args.norm,
        &device,
    )
}

/// Translate every image in `input_dir` into `output_dir/<stem>.png`.
pub fn translate_dir<B: AutodiffBackend>(
    generator: &UnetGenerator<B>,
    input_dir: &Path,
    output_dir: &Path,
    composite: bool,
    swap: bool,
    norm: InferenceNorm,
    device: &B::Device,
) -> anyhow::Result<usize> {
    let size = PairTransform::default().image_size;
    let files = list_images(input_dir)?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    for path in &files {
        let image = if composite {
            let (input, target) = load_composite(path)?;
            if swap {
                target
            } else {
                input
            }
        } else {
            decode(path)?
        };
        let chw = normalize(&resize(&image, size, size));
        let input = Tensor::<B::InnerBackend, 1>::from_floats(chw.as_slice(), device)
            .reshape([1, 3, size as usize, size as usize]);
        let output = infer(generator, input, norm)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("reading generator output: {e:?}"))?;
        let translated = chw_to_rgb_image(&output, size, size)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let out = output_dir.join(format!("{stem}.png"));
        translated
            .save(&out)
            .with_context(|| format!("saving {}", out.display()))?;
        log::info!("{} -> {}", path.display(), out.display());
    }
    Ok(files.len())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
