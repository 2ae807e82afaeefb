//! Burn networks for paired image translation.
//!
//! - `UnetGenerator`: encoder/decoder with channel-concatenated skip connections.
//! - `PatchDiscriminator`: conditional PatchGAN emitting a grid of logits.
//!
//! These are plain Burn Modules. Training mode follows the backend: under
//! `Autodiff` dropout is active and batch norm uses batch statistics; call
//! `.valid()` for inference behavior.

pub mod blocks;
pub mod discriminator;
pub mod generator;

pub use blocks::{Downsample, DownsampleConfig, Upsample, UpsampleConfig};
pub use discriminator::{DiscriminatorConfig, PatchDiscriminator};
pub use generator::{GeneratorConfig, UnetGenerator};

pub mod prelude {
    pub use super::{
        DiscriminatorConfig, GeneratorConfig, PatchDiscriminator, UnetGenerator,
    };
}
