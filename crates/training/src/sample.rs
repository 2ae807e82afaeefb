use anyhow::{anyhow, Context};
use burn::tensor::{backend::Backend, Tensor};
use image::RgbImage;
use pair_dataset::chw_to_rgb_image;
use std::path::Path;

fn first_image<B: Backend>(batch: Tensor<B, 4>) -> anyhow::Result<RgbImage> {
    let [_, channels, height, width] = batch.dims();
    if channels != 3 {
        return Err(anyhow!("expected 3 channels, got {channels}"));
    }
    let first = batch.slice([0..1, 0..3, 0..height, 0..width]);
    let values = first
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("reading tensor data: {e:?}"))?;
    Ok(chw_to_rgb_image(&values, width as u32, height as u32)?)
}

/// Save `input | ground truth | prediction` for the first item of the batch
/// as one PNG, mapping [-1, 1] back to [0, 255].
pub fn save_sample<B: Backend>(
    input: Tensor<B, 4>,
    target: Tensor<B, 4>,
    prediction: Tensor<B, 4>,
    path: &Path,
) -> anyhow::Result<()> {
    let panels = [
        first_image(input)?,
        first_image(target)?,
        first_image(prediction)?,
    ];
    let (w, h) = panels[0].dimensions();
    let mut canvas = RgbImage::new(w * panels.len() as u32, h);
    for (i, panel) in panels.iter().enumerate() {
        image::imageops::replace(&mut canvas, panel, (i as u32 * w) as i64, 0);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas
        .save(path)
        .with_context(|| format!("saving sample {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn panels_are_side_by_side() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let path = tmp.path().join("samples/epoch_0000.png");
        let black = Tensor::<B, 4>::ones([2, 3, 8, 8], &device).neg();
        let white = Tensor::<B, 4>::ones([2, 3, 8, 8], &device);
        let gray = Tensor::<B, 4>::zeros([2, 3, 8, 8], &device);
        save_sample(black, white, gray, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (24, 8));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(8, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(16, 0).0, [128, 128, 128]);
    }
}
