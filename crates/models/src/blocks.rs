//! Encoder/decoder building blocks shared by the generator and discriminator.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu,
    LeakyReluConfig, PaddingConfig2d, Relu,
};
use burn::tensor::{backend::Backend, Tensor};

/// Weight init used by every convolution in both networks.
pub fn weight_init() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: 0.02,
    }
}

/// Batch norm with a running-average decay of 0.99 and epsilon 1e-3.
pub fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(channels)
        .with_momentum(0.01)
        .with_epsilon(1e-3)
        .init(device)
}

/// Stride-2 convolution, optional batch norm, leaky ReLU. Halves H and W.
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    /// `[in, out]` channels.
    pub channels: [usize; 2],
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = true)]
    pub apply_norm: bool,
    #[config(default = "0.3")]
    pub negative_slope: f64,
}

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    activation: LeakyRelu,
}

impl DownsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Downsample<B> {
        let k = self.kernel_size;
        let pad = (k - 1) / 2;
        let conv = Conv2dConfig::new(self.channels, [k, k])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .with_initializer(weight_init())
            .init(device);
        let norm = self
            .apply_norm
            .then(|| batch_norm(self.channels[1], device));
        Downsample {
            conv,
            norm,
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.negative_slope)
                .init(),
        }
    }
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

/// Stride-2 transposed convolution, batch norm, optional dropout, ReLU.
/// Doubles H and W.
#[derive(Config, Debug)]
pub struct UpsampleConfig {
    /// `[in, out]` channels.
    pub channels: [usize; 2],
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = false)]
    pub apply_dropout: bool,
    #[config(default = "0.5")]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
    dropout: Option<Dropout>,
    activation: Relu,
}

impl UpsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Upsample<B> {
        Upsample {
            conv: transposed_conv(self.channels, self.kernel_size, false, device),
            norm: batch_norm(self.channels[1], device),
            dropout: self
                .apply_dropout
                .then(|| DropoutConfig::new(self.dropout).init()),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Upsample<B> {
    /// Dropout only fires on autodiff backends (training).
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(input));
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

/// Stride-2 transposed convolution whose output is exactly twice the input.
pub fn transposed_conv<B: Backend>(
    channels: [usize; 2],
    kernel_size: usize,
    bias: bool,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    let pad = (kernel_size - 1) / 2;
    ConvTranspose2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([2, 2])
        .with_padding([pad, pad])
        .with_padding_out([kernel_size % 2, kernel_size % 2])
        .with_bias(bias)
        .with_initializer(weight_init())
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn downsample_halves_and_upsample_doubles() {
        let device = Default::default();
        let down = DownsampleConfig::new([3, 8]).init::<B>(&device);
        let up = UpsampleConfig::new([8, 4])
            .with_apply_dropout(true)
            .init::<B>(&device);
        let x = Tensor::<B, 4>::ones([2, 3, 16, 16], &device);
        let y = down.forward(x);
        assert_eq!(y.dims(), [2, 8, 8, 8]);
        let z = up.forward(y);
        assert_eq!(z.dims(), [2, 4, 16, 16]);
        let min = z.min().into_data().to_vec::<f32>().unwrap_or_default()[0];
        assert!(min >= 0.0, "ReLU output must be non-negative");
    }

    #[test]
    fn first_block_skips_normalization() {
        let device = Default::default();
        let block = DownsampleConfig::new([6, 4])
            .with_apply_norm(false)
            .init::<B>(&device);
        assert!(block.norm.is_none());
        let block = DownsampleConfig::new([6, 4]).init::<B>(&device);
        assert!(block.norm.is_some());
    }
}
