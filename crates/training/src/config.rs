use crate::session::TrainingSession;
use burn::config::Config;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use models::{DiscriminatorConfig, GeneratorConfig, PatchDiscriminator, UnetGenerator};

/// Hyper-parameters for one training run; saved as `config.json` beside the
/// checkpoints.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    #[config(default = "2e-4")]
    pub learning_rate: f64,
    #[config(default = "0.5")]
    pub beta_1: f32,
    #[config(default = "0.999")]
    pub beta_2: f32,
    #[config(default = "1e-7")]
    pub epsilon: f32,
    /// Weight of the L1 term in the generator loss.
    #[config(default = "100.0")]
    pub lambda: f32,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 1)]
    pub batch_size: usize,
    /// Snapshot every N epochs; 0 keeps only the final checkpoint.
    #[config(default = 20)]
    pub checkpoint_every: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Standard networks with `base_filters` as the first-layer width.
    pub fn with_base_filters(base_filters: usize) -> Self {
        Self::new(
            GeneratorConfig::new().with_base_filters(base_filters),
            DiscriminatorConfig::new().with_base_filters(base_filters),
        )
    }

    pub fn adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
    }

    /// Fresh networks and one Adam optimizer per network.
    pub fn init_session<B: AutodiffBackend>(
        &self,
        device: &B::Device,
    ) -> TrainingSession<
        B,
        impl Optimizer<UnetGenerator<B>, B> + Clone,
        impl Optimizer<PatchDiscriminator<B>, B> + Clone,
    > {
        TrainingSession::new(
            self.generator.init(device),
            self.discriminator.init(device),
            self.adam().init(),
            self.adam().init(),
            self.learning_rate,
            self.lambda,
        )
    }
}
