//! Pair decoding, joint augmentation and normalization.
//!
//! Every spatial operation is applied to the input and the target together so
//! pixel correspondence between the two survives augmentation.

use crate::types::{DatasetResult, PairDatasetError, PairSample, Split};
use image::imageops::FilterType;
use image::RgbImage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Final square edge fed to the networks.
pub const IMAGE_SIZE: u32 = 256;
/// Edge the pair is upscaled to before the random crop.
pub const LOAD_SIZE: u32 = 286;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairTransform {
    /// Output edge (crop size in training, resize target in test).
    pub image_size: u32,
    /// Upscale edge before cropping (training only).
    pub load_size: u32,
    /// Probability of a joint horizontal flip (training only).
    pub flip_horizontal_prob: f32,
}

impl Default for PairTransform {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            load_size: LOAD_SIZE,
            flip_horizontal_prob: 0.5,
        }
    }
}

impl PairTransform {
    pub fn describe(&self) -> String {
        format!(
            "image_size={} load_size={} flip_p={:.2}",
            self.image_size, self.load_size, self.flip_horizontal_prob
        )
    }

    /// Preprocess a decoded pair into normalized CHW buffers.
    pub fn apply(
        &self,
        input: RgbImage,
        target: RgbImage,
        split: Split,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<PairSample> {
        if self.load_size < self.image_size {
            return Err(PairDatasetError::Other(format!(
                "load_size {} is smaller than image_size {}",
                self.load_size, self.image_size
            )));
        }
        let (input, target) = match split {
            Split::Train => random_jitter(&input, &target, self, rng),
            Split::Test => preprocess_test(&input, &target, self),
        };
        Ok(PairSample {
            input_chw: normalize(&input),
            target_chw: normalize(&target),
            width: self.image_size,
            height: self.image_size,
        })
    }
}

/// Decode an image file into 3-channel RGB.
pub fn decode(path: &Path) -> DatasetResult<RgbImage> {
    let img = image::open(path).map_err(|source| PairDatasetError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgb8())
}

/// Split a side-by-side composite at `w / 2` into `(input, target)`.
///
/// The left half is the target and the right half is the input. Callers
/// reading from disk go through [`load_composite`], which checks the width.
pub fn split_composite(image: &RgbImage) -> (RgbImage, RgbImage) {
    let (w, h) = image.dimensions();
    let half = w / 2;
    let target = image::imageops::crop_imm(image, 0, 0, half, h).to_image();
    let input = image::imageops::crop_imm(image, half, 0, w - half, h).to_image();
    (input, target)
}

/// Decode a composite file and split it. Composites narrower than two
/// pixels have no halves to split and are rejected.
pub fn load_composite(path: &Path) -> DatasetResult<(RgbImage, RgbImage)> {
    let image = decode(path)?;
    let (w, h) = image.dimensions();
    if w < 2 {
        return Err(PairDatasetError::ShapeMismatch {
            path: path.to_path_buf(),
            expected: (2, h),
            actual: (w, h),
        });
    }
    Ok(split_composite(&image))
}

/// Nearest-neighbour resample to exactly `width` x `height`.
pub fn resize(image: &RgbImage, height: u32, width: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Nearest)
}

/// Resize both to `load_size`, take one shared crop window, then flip both
/// with `flip_horizontal_prob`.
pub fn random_jitter(
    input: &RgbImage,
    target: &RgbImage,
    cfg: &PairTransform,
    rng: &mut dyn rand::RngCore,
) -> (RgbImage, RgbImage) {
    let load = cfg.load_size;
    let crop = cfg.image_size.min(load);
    let input = resize(input, load, load);
    let target = resize(target, load, load);

    let x0 = rng.random_range(0..=load - crop);
    let y0 = rng.random_range(0..=load - crop);
    let mut input = image::imageops::crop_imm(&input, x0, y0, crop, crop).to_image();
    let mut target = image::imageops::crop_imm(&target, x0, y0, crop, crop).to_image();

    maybe_hflip_pair(&mut input, &mut target, cfg.flip_horizontal_prob, rng);
    (input, target)
}

/// Deterministic test-time preprocessing: resize both to `image_size`.
pub fn preprocess_test(
    input: &RgbImage,
    target: &RgbImage,
    cfg: &PairTransform,
) -> (RgbImage, RgbImage) {
    (
        resize(input, cfg.image_size, cfg.image_size),
        resize(target, cfg.image_size, cfg.image_size),
    )
}

pub(crate) fn maybe_hflip_pair(
    input: &mut RgbImage,
    target: &mut RgbImage,
    prob: f32,
    rng: &mut dyn rand::RngCore,
) -> bool {
    if prob <= 0.0 {
        return false;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(input);
        image::imageops::flip_horizontal_in_place(target);
        return true;
    }
    false
}

/// Map [0, 255] to [-1, 1].
#[inline]
pub fn normalize_value(v: f32) -> f32 {
    v / 127.5 - 1.0
}

/// Map [-1, 1] back to [0, 255].
#[inline]
pub fn denormalize_value(v: f32) -> f32 {
    (v + 1.0) * 127.5
}

/// Map [-1, 1] to the [0, 1] display range.
#[inline]
pub fn to_display(v: f32) -> f32 {
    v * 0.5 + 0.5
}

/// Normalize an RGB image into a CHW buffer in [-1, 1].
pub fn normalize(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        chw[base] = normalize_value(pixel[0] as f32);
        chw[plane + base] = normalize_value(pixel[1] as f32);
        chw[2 * plane + base] = normalize_value(pixel[2] as f32);
    }
    chw
}

/// Rebuild an RGB image from a normalized CHW buffer.
pub fn chw_to_rgb_image(chw: &[f32], width: u32, height: u32) -> DatasetResult<RgbImage> {
    let plane = (width * height) as usize;
    if chw.len() != plane * 3 {
        return Err(PairDatasetError::Other(format!(
            "expected {} values for a {}x{} image, got {}",
            plane * 3,
            width,
            height,
            chw.len()
        )));
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let base = (y * width + x) as usize;
        let px = |c: usize| (to_display(chw[c * plane + base]).clamp(0.0, 1.0) * 255.0).round() as u8;
        image::Rgb([px(0), px(1), px(2)])
    }))
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_round_trips_every_byte() {
        for v in 0..=255u32 {
            let v = v as f32;
            let back = denormalize_value(normalize_value(v));
            assert!((back - v).abs() < 1e-4, "{v} came back as {back}");
        }
        assert!((normalize_value(0.0) + 1.0).abs() < 1e-6);
        assert!((normalize_value(255.0) - 1.0).abs() < 1e-6);
        assert!((to_display(-1.0)).abs() < 1e-6);
        assert!((to_display(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn split_keeps_target_on_the_left() {
        let img = RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let (input, target) = split_composite(&img);
        assert_eq!(input.dimensions(), (4, 4));
        assert_eq!(target.dimensions(), (4, 4));
        assert_eq!(target.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(input.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn resize_is_nearest_neighbour() {
        let img = RgbImage::from_fn(2, 2, |x, y| image::Rgb([(x * 100) as u8, (y * 100) as u8, 7]));
        let out = resize(&img, 4, 4);
        assert_eq!(out.dimensions(), (4, 4));
        for pixel in out.pixels() {
            assert!(pixel[0] == 0 || pixel[0] == 100);
            assert!(pixel[1] == 0 || pixel[1] == 100);
            assert_eq!(pixel[2], 7);
        }
    }

    #[test]
    fn hflip_pair_flips_both_or_neither() {
        let mut a = RgbImage::from_fn(3, 1, |x, _| image::Rgb([x as u8, 0, 0]));
        let mut b = a.clone();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(maybe_hflip_pair(&mut a, &mut b, 1.0, &mut rng));
        assert_eq!(a.get_pixel(0, 0)[0], 2);
        assert_eq!(a, b);
        assert!(!maybe_hflip_pair(&mut a, &mut b, 0.0, &mut rng));
        assert_eq!(a.get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn chw_buffer_rebuilds_image() {
        let img = RgbImage::from_fn(3, 2, |x, y| image::Rgb([(x * 80) as u8, (y * 200) as u8, 33]));
        let chw = normalize(&img);
        let back = chw_to_rgb_image(&chw, 3, 2).unwrap();
        assert_eq!(img, back);
        assert!(chw_to_rgb_image(&chw, 4, 4).is_err());
    }

    #[test]
    fn test_split_is_deterministic_resize() {
        let input = RgbImage::from_pixel(300, 200, image::Rgb([128, 128, 128]));
        let target = RgbImage::from_pixel(100, 100, image::Rgb([0, 255, 0]));
        let mut rng = StdRng::seed_from_u64(0);
        let sample = PairTransform::default()
            .apply(input, target, Split::Test, &mut rng)
            .unwrap();
        assert_eq!((sample.width, sample.height), (256, 256));
        assert_eq!(sample.input_chw.len(), 3 * 256 * 256);
        assert!(sample
            .input_chw
            .iter()
            .all(|v| (v - normalize_value(128.0)).abs() < 1e-6));
        assert!(sample.target_chw.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
