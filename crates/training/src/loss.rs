//! Adversarial and reconstruction losses.

use burn::tensor::{backend::Backend, Tensor};

/// Default weight of the L1 reconstruction term.
pub const LAMBDA: f32 = 100.0;

/// Mean binary cross-entropy of raw `logits` against a constant `label`.
///
/// Uses `max(x, 0) - x * z + ln(1 + exp(-|x|))`, which stays finite for any
/// logit magnitude.
pub fn bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    label: f32,
) -> Tensor<B, 1> {
    let softplus_tail = logits.clone().abs().neg().exp().log1p();
    let loss = logits.clone().clamp_min(0.0) - logits.mul_scalar(label) + softplus_tail;
    loss.mean()
}

/// Real patches should score 1, generated patches 0.
pub fn discriminator_loss<B: Backend>(
    real_logits: Tensor<B, 4>,
    fake_logits: Tensor<B, 4>,
) -> Tensor<B, 1> {
    bce_with_logits(real_logits, 1.0) + bce_with_logits(fake_logits, 0.0)
}

#[derive(Debug, Clone)]
pub struct GeneratorLoss<B: Backend> {
    /// `adversarial + lambda * reconstruction`.
    pub total: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
    /// Mean absolute error against the target.
    pub reconstruction: Tensor<B, 1>,
}

pub fn generator_loss<B: Backend>(
    fake_logits: Tensor<B, 4>,
    generated: Tensor<B, 4>,
    target: Tensor<B, 4>,
    lambda: f32,
) -> GeneratorLoss<B> {
    let adversarial = bce_with_logits(fake_logits, 1.0);
    let reconstruction = (generated - target).abs().mean();
    let total = adversarial.clone() + reconstruction.clone().mul_scalar(lambda);
    GeneratorLoss {
        total,
        adversarial,
        reconstruction,
    }
}
