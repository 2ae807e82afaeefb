//! One generator/discriminator pair with their optimizers.

use crate::loss::{discriminator_loss, generator_loss};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use models::{PatchDiscriminator, UnetGenerator};
use serde::{Deserialize, Serialize};

/// Scalar losses of one training step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepLosses {
    pub gen_total_loss: f32,
    pub gen_gan_loss: f32,
    pub gen_l1_loss: f32,
    pub disc_loss: f32,
}

impl StepLosses {
    pub fn all_finite(&self) -> bool {
        [
            self.gen_total_loss,
            self.gen_gan_loss,
            self.gen_l1_loss,
            self.disc_loss,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Element-wise mean; zero for an empty slice.
    pub fn mean(losses: &[StepLosses]) -> StepLosses {
        if losses.is_empty() {
            return StepLosses::default();
        }
        let n = losses.len() as f32;
        let mut acc = StepLosses::default();
        for l in losses {
            acc.gen_total_loss += l.gen_total_loss;
            acc.gen_gan_loss += l.gen_gan_loss;
            acc.gen_l1_loss += l.gen_l1_loss;
            acc.disc_loss += l.disc_loss;
        }
        StepLosses {
            gen_total_loss: acc.gen_total_loss / n,
            gen_gan_loss: acc.gen_gan_loss / n,
            gen_l1_loss: acc.gen_l1_loss / n,
            disc_loss: acc.disc_loss / n,
        }
    }
}

/// Gradients of one step, each holding only its own network's parameters.
pub struct StepGradients {
    pub generator: GradientsParams,
    pub discriminator: GradientsParams,
}

pub struct TrainingSession<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<UnetGenerator<B>, B>,
    OD: Optimizer<PatchDiscriminator<B>, B>,
{
    pub generator: UnetGenerator<B>,
    pub discriminator: PatchDiscriminator<B>,
    pub optim_gen: OG,
    pub optim_disc: OD,
    pub learning_rate: f64,
    pub lambda: f32,
}

impl<B, OG, OD> TrainingSession<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<UnetGenerator<B>, B>,
    OD: Optimizer<PatchDiscriminator<B>, B>,
{
    pub fn new(
        generator: UnetGenerator<B>,
        discriminator: PatchDiscriminator<B>,
        optim_gen: OG,
        optim_disc: OD,
        learning_rate: f64,
        lambda: f32,
    ) -> Self {
        Self {
            generator,
            discriminator,
            optim_gen,
            optim_disc,
            learning_rate,
            lambda,
        }
    }

    /// Discriminator loss on (input, target) against (input, candidate).
    /// The candidate is detached, so the graph never reaches the generator.
    pub fn discriminator_scope(
        &self,
        input: Tensor<B, 4>,
        target: Tensor<B, 4>,
        candidate: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let real_logits = self.discriminator.forward(input.clone(), target);
        let fake_logits = self.discriminator.forward(input, candidate.detach());
        discriminator_loss(real_logits, fake_logits)
    }

    /// Both gradient sets, taken from the current parameters.
    pub fn gradients(
        &self,
        input: Tensor<B, 4>,
        target: Tensor<B, 4>,
    ) -> (StepGradients, StepLosses) {
        let candidate = self.generator.forward(input.clone());

        let disc_loss = self.discriminator_scope(input.clone(), target.clone(), candidate.clone());
        let discriminator = GradientsParams::from_grads(disc_loss.backward(), &self.discriminator);

        // Generator scope: flows through D, only G's parameters are kept.
        let fake_logits = self.discriminator.forward(input, candidate.clone());
        let gen = generator_loss(fake_logits, candidate, target, self.lambda);
        let generator = GradientsParams::from_grads(gen.total.backward(), &self.generator);

        let losses = StepLosses {
            gen_total_loss: gen.total.into_scalar().elem::<f32>(),
            gen_gan_loss: gen.adversarial.into_scalar().elem::<f32>(),
            gen_l1_loss: gen.reconstruction.into_scalar().elem::<f32>(),
            disc_loss: disc_loss.into_scalar().elem::<f32>(),
        };
        (
            StepGradients {
                generator,
                discriminator,
            },
            losses,
        )
    }

    /// One Adam step per network.
    pub fn apply(&mut self, grads: StepGradients) {
        self.generator =
            self.optim_gen
                .step(self.learning_rate, self.generator.clone(), grads.generator);
        self.discriminator = self.optim_disc.step(
            self.learning_rate,
            self.discriminator.clone(),
            grads.discriminator,
        );
    }

    /// One adversarial update of both networks on `[N, 3, H, W]` tensors.
    ///
    /// Both gradient sets are computed from the pre-step parameters; the two
    /// optimizer steps are applied afterwards.
    pub fn train_step(&mut self, input: Tensor<B, 4>, target: Tensor<B, 4>) -> StepLosses {
        let (grads, losses) = self.gradients(input, target);
        self.apply(grads);
        losses
    }
}
