use crate::error::{Error, Result};
use ndarray::prelude::*;

pub const NB_CLASSES: usize = 10;
pub const CHANNELS: usize = 3;
pub const HEIGHT: usize = 32;
pub const WIDTH: usize = 32;
/// Bytes per raw image: 3 channel planes of 32x32, red first.
pub const IMAGE_BYTES: usize = CHANNELS * HEIGHT * WIDTH;

const TRAIN_LEN: usize = 50_000;
const TEST_LEN: usize = 10_000;

/// Human-readable names, indexed by label.
pub const CLASS_NAMES: [&str; NB_CLASSES] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// One split of the dataset: images (N, C, H, W) with values in [0, 1] and one label per image.
#[derive(Debug, Clone)]
pub struct Partition {
    images: Array4<f32>,
    labels: Vec<u8>,
}

impl Partition {
    /// Build a partition, checking that there is one valid label per image.
    pub fn new(images: Array4<f32>, labels: Vec<u8>) -> Result<Partition> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::Dataset(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l as usize >= NB_CLASSES) {
            return Err(Error::Dataset(format!("label {bad} is not a CIFAR-10 class")));
        }
        Ok(Partition { images, labels })
    }

    /// Decode raw CIFAR bytes (N * 3072, channel planes) and normalize them.
    pub fn from_raw(raw_images: &[u8], labels: Vec<u8>) -> Result<Partition> {
        if raw_images.len() % IMAGE_BYTES != 0 {
            return Err(Error::Dataset(format!(
                "{} image bytes is not a multiple of {IMAGE_BYTES}",
                raw_images.len()
            )));
        }
        let n = raw_images.len() / IMAGE_BYTES;
        let images = Array4::from_shape_vec((n, CHANNELS, HEIGHT, WIDTH), normalize(raw_images))?;
        Partition::new(images, labels)
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Keep only the first `len` samples.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len() {
            return;
        }
        self.images = self.images.slice(s![..len, .., .., ..]).to_owned();
        self.labels.truncate(len);
    }
}

/// Rescale 8-bit pixel intensities to [0, 1].
pub fn normalize(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|&p| p as f32 / 255.0).collect()
}

/// Loads CIFAR-10 from `data_dir`, downloading the binary archive on first use.
/// Returns (train, test).
pub fn load_cifar10(data_dir: &str) -> Result<(Partition, Partition)> {
    use cifar_ten::{Cifar10, CifarResult};

    let CifarResult(train_images, train_labels, test_images, test_labels) = Cifar10::default()
        .download_and_extract(true)
        .base_path(data_dir)
        .encode_one_hot(false)
        .build()
        .map_err(|e| Error::Dataset(e.to_string()))?;

    if train_labels.len() != TRAIN_LEN || test_labels.len() != TEST_LEN {
        log::warn!(
            "unexpected CIFAR-10 split sizes: {} train, {} test",
            train_labels.len(),
            test_labels.len()
        );
    }

    let train = Partition::from_raw(&train_images, train_labels)?;
    let test = Partition::from_raw(&test_images, test_labels)?;
    log::info!("[TRAIN] len: {}", train.len());
    log::info!("[TEST] len: {}", test.len());
    Ok((train, test))
}

/// Class name for a label already validated by [`Partition::new`].
pub fn class_name(label: usize) -> &'static str {
    CLASS_NAMES[label]
}
