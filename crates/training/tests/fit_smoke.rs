use burn::backend::{ndarray::NdArray, Autodiff};
use burn::config::Config;
use image::{Rgb, RgbImage};
use pair_dataset::PairLayout;
use std::fs;
use std::path::Path;
use training::{fit, FitOptions, InferenceNorm, TrainingConfig};

type ADBackend = Autodiff<NdArray<f32>>;

fn write_composites(dir: &Path, count: usize) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    for i in 0..count {
        let shade = 60 + (i as u8) * 50;
        let img = RgbImage::from_fn(64, 32, |x, _| {
            if x < 32 {
                Rgb([shade, shade, shade])
            } else {
                Rgb([255 - shade, 255 - shade, 255 - shade])
            }
        });
        img.save(dir.join(format!("{i}.png")))?;
    }
    Ok(())
}

fn read_lines(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
    fs::read_to_string(path)?
        .lines()
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}

#[test]
fn fit_checkpoints_logs_and_resumes() -> anyhow::Result<()> {
    std::env::set_var("PAIR_DATASET_LOG_EVERY", "off");
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    write_composites(&data.join("train"), 2)?;
    write_composites(&data.join("test"), 1)?;
    let splits = PairLayout::Composite.splits(&data, false)?;
    assert_eq!(splits.train.len(), 2);
    assert_eq!(splits.test.len(), 1);

    let opts = FitOptions {
        checkpoint_dir: tmp.path().join("ckpt"),
        log_dir: tmp.path().join("logs"),
        sample_dir: Some(tmp.path().join("samples")),
        preview_norm: InferenceNorm::BatchStats,
        resume: true,
    };
    let device = Default::default();
    let config = TrainingConfig::with_base_filters(2)
        .with_num_epochs(2)
        .with_checkpoint_every(1)
        .with_seed(3);

    let first = fit::<ADBackend>(&config, &splits, &opts, &device)?;
    assert_eq!(first.epochs_run, 2);
    assert_eq!(first.state.epochs_completed, 2);
    assert_eq!(first.state.steps, 4);
    assert_eq!(first.state.index, 2);
    assert!(first.final_checkpoint.ends_with("ckpt-2"));
    assert!(opts.checkpoint_dir.join("config.json").is_file());
    assert!(opts.checkpoint_dir.join("checkpoint.json").is_file());
    let summary = first.last_epoch.expect("epoch summary");
    assert_eq!(summary.steps, 2);
    assert!(summary.losses.gen_l1_loss >= 0.0);

    let lines = read_lines(&first.metrics_path)?;
    assert_eq!(lines.len(), 4 + 2);
    assert_eq!(
        lines.iter().filter(|l| l["kind"] == "epoch_summary").count(),
        2
    );
    for key in ["gen_total_loss", "gen_gan_loss", "gen_l1_loss", "disc_loss"] {
        assert!(lines[0][key].as_f64().is_some(), "missing {key}");
    }

    let sample = image::open(opts.sample_dir.as_ref().unwrap().join("epoch_0001.png"))?;
    assert_eq!((sample.width(), sample.height()), (768, 256));

    // Resume picks up after the two finished epochs.
    let config = config.with_num_epochs(3).with_checkpoint_every(0);
    let second = fit::<ADBackend>(&config, &splits, &opts, &device)?;
    assert_eq!(second.epochs_run, 1);
    assert_eq!(second.state.epochs_completed, 3);
    assert_eq!(second.state.steps, 6);
    assert!(second.final_checkpoint.ends_with("ckpt-3"));
    assert_ne!(second.metrics_path, first.metrics_path);

    // Nothing left to train: the existing checkpoint is reported, none added.
    let third = fit::<ADBackend>(&config, &splits, &opts, &device)?;
    assert_eq!(third.epochs_run, 0);
    assert!(third.final_checkpoint.ends_with("ckpt-3"));
    assert!(!opts.checkpoint_dir.join("ckpt-4").exists());
    Ok(())
}

#[test]
fn fit_without_resume_starts_over() -> anyhow::Result<()> {
    std::env::set_var("PAIR_DATASET_LOG_EVERY", "off");
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("flat");
    write_composites(&data, 1)?;
    let splits = PairLayout::Composite.splits(&data, false)?;
    let mut opts = FitOptions {
        checkpoint_dir: tmp.path().join("ckpt"),
        log_dir: tmp.path().join("logs"),
        sample_dir: None,
        preview_norm: InferenceNorm::RunningStats,
        resume: true,
    };
    let device = Default::default();
    let config = TrainingConfig::with_base_filters(1).with_num_epochs(1);

    fit::<ADBackend>(&config, &splits, &opts, &device)?;
    opts.resume = false;
    let again = fit::<ADBackend>(&config, &splits, &opts, &device)?;
    assert_eq!(again.epochs_run, 1);
    assert_eq!(again.state.steps, 1);
    assert!(again.final_checkpoint.ends_with("ckpt-2"));
    Ok(())
}

#[test]
fn resume_refuses_a_different_model() -> anyhow::Result<()> {
    std::env::set_var("PAIR_DATASET_LOG_EVERY", "off");
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("flat");
    write_composites(&data, 1)?;
    let splits = PairLayout::Composite.splits(&data, false)?;
    let opts = FitOptions {
        checkpoint_dir: tmp.path().join("ckpt"),
        log_dir: tmp.path().join("logs"),
        sample_dir: None,
        preview_norm: InferenceNorm::RunningStats,
        resume: true,
    };
    let device = Default::default();
    let wide = TrainingConfig::with_base_filters(2).with_num_epochs(1);
    fit::<ADBackend>(&wide, &splits, &opts, &device)?;

    let narrower = TrainingConfig::with_base_filters(1).with_num_epochs(2);
    let err = fit::<ADBackend>(&narrower, &splits, &opts, &device).unwrap_err();
    assert!(err.to_string().contains("different model settings"), "{err}");
    let saved = TrainingConfig::load(opts.checkpoint_dir.join("config.json"))?;
    assert_eq!(saved.generator.base_filters, 2);
    assert!(!opts.checkpoint_dir.join("ckpt-2").exists());

    // Same models with more epochs still resumes.
    let longer = TrainingConfig::with_base_filters(2).with_num_epochs(2);
    let resumed = fit::<ADBackend>(&longer, &splits, &opts, &device)?;
    assert_eq!(resumed.epochs_run, 1);
    assert_eq!(TrainingConfig::load(opts.checkpoint_dir.join("config.json"))?.num_epochs, 2);
    Ok(())
}
