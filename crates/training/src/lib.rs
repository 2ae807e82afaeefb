#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod loss;
pub mod metrics;
pub mod sample;
pub mod session;
pub mod util;

pub use checkpoint::{CheckpointManager, CheckpointState};
pub use config::TrainingConfig;
pub use loss::{bce_with_logits, discriminator_loss, generator_loss, GeneratorLoss, LAMBDA};
pub use metrics::{EpochSummary, MetricsWriter};
pub use models::{DiscriminatorConfig, GeneratorConfig, PatchDiscriminator, UnetGenerator};
pub use sample::save_sample;
pub use session::{StepGradients, StepLosses, TrainingSession};
pub use util::{
    fit, infer, run_train, run_translate, translate_dir, FitOptions, FitSummary, InferenceNorm,
    TrainArgs, TranslateArgs,
};

/// Backend alias for training/translation (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
