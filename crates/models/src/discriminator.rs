use crate::blocks::{batch_norm, weight_init, Downsample, DownsampleConfig};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor};

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = 3)]
    pub target_channels: usize,
    /// Width of the first block; zero is treated as 1.
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = "0.3")]
    pub negative_slope: f64,
}

/// PatchGAN discriminator scoring (input, candidate) pairs.
///
/// For 256x256 images the output is a `[N, 1, 30, 30]` grid of raw logits,
/// one per overlapping receptive-field patch.
#[derive(Module, Debug)]
pub struct PatchDiscriminator<B: Backend> {
    down: Vec<Downsample<B>>,
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: LeakyRelu,
    head: Conv2d<B>,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchDiscriminator<B> {
        let base = self.base_filters.max(1);
        let k = self.kernel_size;
        let widths = [base, base * 2, base * 4];

        let mut in_ch = self.input_channels + self.target_channels;
        let mut down = Vec::with_capacity(widths.len());
        for (i, &out_ch) in widths.iter().enumerate() {
            down.push(
                DownsampleConfig::new([in_ch, out_ch])
                    .with_kernel_size(k)
                    .with_apply_norm(i != 0)
                    .with_negative_slope(self.negative_slope)
                    .init(device),
            );
            in_ch = out_ch;
        }

        // Stride-1 convs with one pixel of zero padding shrink H and W by one each.
        let conv = Conv2dConfig::new([in_ch, base * 8], [k, k])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(weight_init())
            .init(device);
        let head = Conv2dConfig::new([base * 8, 1], [k, k])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(weight_init())
            .init(device);

        PatchDiscriminator {
            down,
            conv,
            norm: batch_norm(base * 8, device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.negative_slope)
                .init(),
            head,
        }
    }
}

impl<B: Backend> PatchDiscriminator<B> {
    pub fn forward(&self, input: Tensor<B, 4>, candidate: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = Tensor::cat(vec![input, candidate], 1);
        for block in &self.down {
            x = block.forward(x);
        }
        let x = self.activation.forward(self.norm.forward(self.conv.forward(x)));
        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn patch_grid_is_30_by_30() {
        let device = Default::default();
        let disc = DiscriminatorConfig::new()
            .with_base_filters(2)
            .init::<B>(&device);
        let input = Tensor::<B, 4>::zeros([2, 3, 256, 256], &device);
        let target = Tensor::<B, 4>::ones([2, 3, 256, 256], &device);
        assert_eq!(disc.forward(input, target).dims(), [2, 1, 30, 30]);
    }

    #[test]
    fn logits_are_unbounded() {
        let device = Default::default();
        let disc = DiscriminatorConfig::new()
            .with_base_filters(2)
            .init::<B>(&device);
        let input = Tensor::<B, 4>::ones([1, 3, 256, 256], &device);
        let logits = disc.forward(input.clone(), input.neg());
        let values = logits.into_data().to_vec::<f32>().unwrap_or_default();
        assert_eq!(values.len(), 900);
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_base_filters_builds_the_narrowest_net() {
        let device = Default::default();
        let zero = DiscriminatorConfig::new().with_base_filters(0).init::<B>(&device);
        let one = DiscriminatorConfig::new().with_base_filters(1).init::<B>(&device);
        assert_eq!(zero.num_params(), one.num_params());
        let x = Tensor::<B, 4>::zeros([1, 3, 256, 256], &device);
        assert_eq!(zero.forward(x.clone(), x).dims(), [1, 1, 30, 30]);
    }
}
