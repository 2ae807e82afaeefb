use crate::blocks::{transposed_conv, Downsample, DownsampleConfig, Upsample, UpsampleConfig};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::ConvTranspose2d;
use burn::tensor::activation::tanh;
use burn::tensor::{backend::Backend, Tensor};

/// Encoder widths as multiples of `base_filters`.
const DOWN_WIDTHS: [usize; 8] = [1, 2, 4, 8, 8, 8, 8, 8];
/// Decoder widths as multiples of `base_filters`.
const UP_WIDTHS: [usize; 7] = [8, 8, 8, 8, 4, 2, 1];
/// Leading decoder blocks that apply dropout.
const DROPOUT_BLOCKS: usize = 3;

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = 3)]
    pub out_channels: usize,
    /// Width of the first encoder block; 64 gives the standard Pix2Pix U-Net.
    /// Zero is treated as 1.
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = "0.3")]
    pub negative_slope: f64,
    #[config(default = "0.5")]
    pub dropout: f64,
}

/// U-Net with eight stride-2 encoder blocks and seven decoder blocks.
///
/// Every decoder output is concatenated on the channel axis with the encoder
/// output of the same resolution. Input `[N, in, 256, 256]` maps to
/// `[N, out, 256, 256]` in [-1, 1].
#[derive(Module, Debug)]
pub struct UnetGenerator<B: Backend> {
    down: Vec<Downsample<B>>,
    up: Vec<Upsample<B>>,
    last: ConvTranspose2d<B>,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UnetGenerator<B> {
        let base = self.base_filters.max(1);
        let down_out: Vec<usize> = DOWN_WIDTHS.iter().map(|m| m * base).collect();
        let up_out: Vec<usize> = UP_WIDTHS.iter().map(|m| m * base).collect();

        let mut in_ch = self.in_channels;
        let mut down = Vec::with_capacity(down_out.len());
        for (i, &out_ch) in down_out.iter().enumerate() {
            down.push(
                DownsampleConfig::new([in_ch, out_ch])
                    .with_kernel_size(self.kernel_size)
                    .with_apply_norm(i != 0)
                    .with_negative_slope(self.negative_slope)
                    .init(device),
            );
            in_ch = out_ch;
        }

        let mut up = Vec::with_capacity(up_out.len());
        for (i, &out_ch) in up_out.iter().enumerate() {
            up.push(
                UpsampleConfig::new([in_ch, out_ch])
                    .with_kernel_size(self.kernel_size)
                    .with_apply_dropout(i < DROPOUT_BLOCKS)
                    .with_dropout(self.dropout)
                    .init(device),
            );
            // Next block sees this output plus the mirrored skip.
            in_ch = out_ch + down_out[down_out.len() - 2 - i];
        }

        let last = transposed_conv(
            [in_ch, self.out_channels],
            self.kernel_size,
            true,
            device,
        );
        UnetGenerator { down, up, last }
    }
}

impl<B: Backend> UnetGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        let mut skips = Vec::with_capacity(self.down.len());
        for block in &self.down {
            x = block.forward(x);
            skips.push(x.clone());
        }
        // The bottleneck feeds the decoder directly, not as a skip.
        skips.pop();

        for (block, skip) in self.up.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x);
            x = Tensor::cat(vec![x, skip], 1);
        }
        tanh(self.last.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    #[test]
    fn output_matches_input_resolution_and_range() {
        let device = Default::default();
        let model = GeneratorConfig::new()
            .with_base_filters(2)
            .init::<B>(&device);
        let x = Tensor::<B, 4>::random(
            [1, 3, 256, 256],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let y = model.forward(x);
        assert_eq!(y.dims(), [1, 3, 256, 256]);
        let values = y.into_data().to_vec::<f32>().unwrap_or_default();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn trains_with_batches_larger_than_one() {
        let device = Default::default();
        let model = GeneratorConfig::new()
            .with_base_filters(2)
            .init::<Autodiff<B>>(&device);
        let x = Tensor::<Autodiff<B>, 4>::zeros([2, 3, 256, 256], &device);
        assert_eq!(model.forward(x).dims(), [2, 3, 256, 256]);
    }

    #[test]
    fn zero_base_filters_builds_the_narrowest_net() {
        let device = Default::default();
        let zero = GeneratorConfig::new().with_base_filters(0).init::<B>(&device);
        let one = GeneratorConfig::new().with_base_filters(1).init::<B>(&device);
        assert_eq!(zero.num_params(), one.num_params());
    }

    #[test]
    fn layer_counts() {
        let model = GeneratorConfig::new()
            .with_base_filters(1)
            .init::<B>(&Default::default());
        assert_eq!(model.down.len(), 8);
        assert_eq!(model.up.len(), 7);
    }

    #[test]
    #[ignore = "full-width U-Net is slow on the CPU backend"]
    fn full_width_generator_shape() {
        let device = Default::default();
        let model = GeneratorConfig::new().init::<B>(&device);
        let y = model.forward(Tensor::<B, 4>::zeros([1, 3, 256, 256], &device));
        assert_eq!(y.dims(), [1, 3, 256, 256]);
    }
}
