//! Discover training pairs on disk and load them.

use crate::aug::{decode, load_composite, PairTransform};
use crate::types::{DatasetResult, PairDatasetError, PairIndex, PairSample, PairSource, Split};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "bmp", "jpg", "jpeg"];

/// On-disk arrangement of a dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairLayout {
    /// Every file under the root is a `target | input` composite.
    Composite,
    /// Two parallel directories under the root, matched by file name.
    PairedDirs {
        input_subdir: String,
        target_subdir: String,
    },
}

impl Default for PairLayout {
    fn default() -> Self {
        PairLayout::PairedDirs {
            input_subdir: "T1".to_string(),
            target_subdir: "T2".to_string(),
        }
    }
}

impl PairLayout {
    pub fn index(&self, root: &Path, swap: bool) -> DatasetResult<Vec<PairIndex>> {
        match self {
            PairLayout::Composite => index_composites(root, swap),
            PairLayout::PairedDirs {
                input_subdir,
                target_subdir,
            } => index_paired_dirs(&root.join(input_subdir), &root.join(target_subdir), swap),
        }
    }
}

/// Training pairs plus the optional held-out test pairs.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<PairIndex>,
    pub test: Vec<PairIndex>,
}

impl PairLayout {
    /// Resolve the train/test splits under `root`.
    ///
    /// Composites are read from `root/train` and `root/test` when those exist,
    /// otherwise every file under `root` is a training pair. Directory pairs
    /// have no test split.
    pub fn splits(&self, root: &Path, swap: bool) -> DatasetResult<DatasetSplits> {
        match self {
            PairLayout::Composite => {
                let train_dir = root.join("train");
                let test_dir = root.join("test");
                if !train_dir.is_dir() {
                    return Ok(DatasetSplits {
                        train: index_composites(root, swap)?,
                        test: Vec::new(),
                    });
                }
                let test = if test_dir.is_dir() {
                    match index_composites(&test_dir, swap) {
                        Ok(test) => test,
                        Err(PairDatasetError::EmptyDataset { .. }) => Vec::new(),
                        Err(err) => return Err(err),
                    }
                } else {
                    Vec::new()
                };
                Ok(DatasetSplits {
                    train: index_composites(&train_dir, swap)?,
                    test,
                })
            }
            PairLayout::PairedDirs { .. } => Ok(DatasetSplits {
                train: self.index(root, swap)?,
                test: Vec::new(),
            }),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
}

/// Sorted image files directly inside `dir`.
pub fn list_images(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| PairDatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PairDatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn index_composites(dir: &Path, swap: bool) -> DatasetResult<Vec<PairIndex>> {
    let files = list_images(dir)?;
    if files.is_empty() {
        return Err(PairDatasetError::EmptyDataset {
            root: dir.to_path_buf(),
        });
    }
    Ok(files
        .into_iter()
        .map(|path| PairIndex {
            source: PairSource::Composite(path),
            swap,
        })
        .collect())
}

/// Pair every image in `input_dir` with the same file name in `target_dir`.
pub fn index_paired_dirs(
    input_dir: &Path,
    target_dir: &Path,
    swap: bool,
) -> DatasetResult<Vec<PairIndex>> {
    let inputs = list_images(input_dir)?;
    if inputs.is_empty() {
        return Err(PairDatasetError::EmptyDataset {
            root: input_dir.to_path_buf(),
        });
    }
    let mut pairs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let Some(name) = input.file_name() else {
            continue;
        };
        let target = target_dir.join(name);
        if !target.is_file() {
            return Err(PairDatasetError::UnpairedFile { path: input });
        }
        pairs.push(PairIndex {
            source: PairSource::Separate { input, target },
            swap,
        });
    }
    Ok(pairs)
}

/// Decode one pair and run it through `transform`.
pub fn load_pair(
    idx: &PairIndex,
    transform: &PairTransform,
    split: Split,
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<PairSample> {
    let (input, target) = match &idx.source {
        PairSource::Composite(path) => load_composite(path)?,
        PairSource::Separate { input, target } => (decode(input)?, decode(target)?),
    };
    let (input, target) = if idx.swap {
        (target, input)
    } else {
        (input, target)
    };
    transform.apply(input, target, split, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn paired_dirs_match_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let t1 = tmp.path().join("T1");
        let t2 = tmp.path().join("T2");
        fs::create_dir_all(&t1).unwrap();
        fs::create_dir_all(&t2).unwrap();
        for name in ["2.bmp", "1.bmp"] {
            let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
            img.save(t1.join(name)).unwrap();
            img.save(t2.join(name)).unwrap();
        }
        fs::write(t1.join("notes.txt"), b"ignored").unwrap();

        let pairs = PairLayout::default().index(tmp.path(), false).unwrap();
        assert_eq!(pairs.len(), 2);
        match &pairs[0].source {
            PairSource::Separate { input, target } => {
                assert!(input.ends_with("T1/1.bmp"));
                assert!(target.ends_with("T2/1.bmp"));
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn missing_target_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let t1 = tmp.path().join("T1");
        fs::create_dir_all(&t1).unwrap();
        fs::create_dir_all(tmp.path().join("T2")).unwrap();
        RgbImage::new(2, 2).save(t1.join("1.png")).unwrap();
        let err = PairLayout::default().index(tmp.path(), false).unwrap_err();
        assert!(matches!(err, PairDatasetError::UnpairedFile { .. }));
    }

    #[test]
    fn composite_swap_exchanges_halves() {
        let tmp = tempfile::tempdir().unwrap();
        let img = RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        img.save(tmp.path().join("a.png")).unwrap();
        let pairs = index_composites(tmp.path(), true).unwrap();
        let mut rng = rand::rng();
        let transform = PairTransform {
            image_size: 4,
            load_size: 4,
            flip_horizontal_prob: 0.0,
        };
        let sample = load_pair(&pairs[0], &transform, Split::Test, &mut rng).unwrap();
        // Swapped: the left (white) half is now the input.
        assert!(sample.input_chw.iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(sample.target_chw.iter().all(|v| (*v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn empty_directory_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = index_composites(tmp.path(), false).unwrap_err();
        assert!(matches!(err, PairDatasetError::EmptyDataset { .. }));
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        let pairs = index_composites(tmp.path(), false).unwrap();
        let mut rng = rand::rng();
        let err = load_pair(&pairs[0], &PairTransform::default(), Split::Test, &mut rng)
            .unwrap_err();
        assert!(matches!(err, PairDatasetError::Decode { .. }));
    }

    #[test]
    fn composite_splits_read_train_and_test() {
        let tmp = tempfile::tempdir().unwrap();
        for split in ["train", "test"] {
            let dir = tmp.path().join(split);
            fs::create_dir_all(&dir).unwrap();
            RgbImage::new(8, 4).save(dir.join("x.png")).unwrap();
        }
        RgbImage::new(8, 4).save(tmp.path().join("train/y.png")).unwrap();
        let splits = PairLayout::Composite.splits(tmp.path(), false).unwrap();
        assert_eq!(splits.train.len(), 2);
        assert_eq!(splits.test.len(), 1);

        let flat = tempfile::tempdir().unwrap();
        RgbImage::new(8, 4).save(flat.path().join("z.png")).unwrap();
        let splits = PairLayout::Composite.splits(flat.path(), false).unwrap();
        assert_eq!(splits.train.len(), 1);
        assert!(splits.test.is_empty());
    }

    #[test]
    fn sliver_composite_is_a_shape_error() {
        let tmp = tempfile::tempdir().unwrap();
        RgbImage::new(1, 8).save(tmp.path().join("thin.png")).unwrap();
        let pairs = index_composites(tmp.path(), false).unwrap();
        let mut rng = rand::rng();
        let err = load_pair(&pairs[0], &PairTransform::default(), Split::Train, &mut rng)
            .unwrap_err();
        match err {
            PairDatasetError::ShapeMismatch { actual, .. } => assert_eq!(actual, (1, 8)),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
