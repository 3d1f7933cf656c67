//! Random affine augmentation of image batches.
//!
//! [`ImageDataGenerator`] holds the augmentation settings and the dataset statistics fit from
//! the training images. [`ImageDataGenerator::flow`] turns a partition into a [`Flow`]: an
//! endless iterator of freshly augmented batches that reshuffles at every pass.

use crate::error::{Error, Result};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

/// How samples that land outside the source image are filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Repeat the closest edge pixel.
    Nearest,
    Constant(f32),
}

#[derive(Debug, Clone)]
pub struct ImageDataGenerator {
    /// Max rotation, in degrees.
    pub rotation_range: f32,
    /// Max horizontal shift, as a fraction of the width.
    pub width_shift_range: f32,
    /// Max vertical shift, as a fraction of the height.
    pub height_shift_range: f32,
    /// Max shear factor.
    pub shear_range: f32,
    /// Zoom factors are drawn per axis from [1 - zoom_range, 1 + zoom_range].
    pub zoom_range: f32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub fill_mode: FillMode,
    pub featurewise_center: bool,
    pub featurewise_std_normalization: bool,
    stats: Option<ChannelStats>,
}

/// Per-channel statistics of a fitted image set.
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub mean: Array1<f32>,
    pub std: Array1<f32>,
}

/// One draw of the random transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub theta: f32, // degrees
    pub tx: f32,    // pixels, along the width
    pub ty: f32,    // pixels, along the height
    pub shear: f32,
    pub zx: f32,
    pub zy: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl AffineParams {
    pub fn identity() -> AffineParams {
        AffineParams {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

impl Default for ImageDataGenerator {
    /// rotation 40°, shifts 0.2, shear 0.2, zoom 0.2, horizontal flips, nearest fill.
    fn default() -> Self {
        ImageDataGenerator {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
            vertical_flip: false,
            fill_mode: FillMode::Nearest,
            featurewise_center: false,
            featurewise_std_normalization: false,
            stats: None,
        }
    }
}

impl ImageDataGenerator {
    /// A generator that leaves images untouched.
    pub fn identity() -> Self {
        ImageDataGenerator {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            vertical_flip: false,
            ..Default::default()
        }
    }

    /// Compute the per-channel mean and std of `images` (N, C, H, W).
    /// Must run before `flow` when featurewise normalization is enabled.
    pub fn fit(&mut self, images: &Array4<f32>) {
        let (n, channels, h, w) = images.dim();
        let count = (n * h * w).max(1) as f32;
        let mut mean = Array1::<f32>::zeros(channels);
        let mut std = Array1::<f32>::zeros(channels);
        for c in 0..channels {
            let plane = images.index_axis(Axis(1), c);
            let m = plane.sum() / count;
            let var = plane.fold(0.0, |acc, &x| acc + (x - m).powi(2)) / count;
            mean[c] = m;
            std[c] = var.sqrt();
        }
        log::info!("augmentation stats fit on {n} images: mean {mean:.4}, std {std:.4}");
        self.stats = Some(ChannelStats { mean, std });
    }

    pub fn stats(&self) -> Option<&ChannelStats> {
        self.stats.as_ref()
    }

    pub fn random_transform<R: Rng + ?Sized>(
        &self,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> AffineParams {
        fn symmetric<R: Rng + ?Sized>(range: f32, rng: &mut R) -> f32 {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        }

        let (zx, zy) = if self.zoom_range > 0.0 {
            let (lo, hi) = (1.0 - self.zoom_range, 1.0 + self.zoom_range);
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };

        AffineParams {
            theta: symmetric(self.rotation_range, rng),
            tx: symmetric(self.width_shift_range, rng) * width as f32,
            ty: symmetric(self.height_shift_range, rng) * height as f32,
            shear: symmetric(self.shear_range, rng),
            zx,
            zy,
            flip_horizontal: self.horizontal_flip && rng.gen_bool(0.5),
            flip_vertical: self.vertical_flip && rng.gen_bool(0.5),
        }
    }

    /// Warp one (C, H, W) image. Every output pixel is mapped back into the source image
    /// (zoom, shear, shift, then rotation about the center) and sampled bilinearly.
    pub fn apply_transform(&self, image: ArrayView3<f32>, params: &AffineParams) -> Array3<f32> {
        let (channels, h, w) = image.dim();
        let cy = (h as f32 - 1.0) / 2.0;
        let cx = (w as f32 - 1.0) / 2.0;
        let (sin, cos) = params.theta.to_radians().sin_cos();

        let mut out = Array3::<f32>::zeros((channels, h, w));
        for y in 0..h {
            for x in 0..w {
                let mut u = x as f32 - cx;
                let mut v = y as f32 - cy;
                u *= params.zx;
                v *= params.zy;
                u += params.shear * v;
                u += params.tx;
                v += params.ty;
                let src_x = cos * u - sin * v + cx;
                let src_y = sin * u + cos * v + cy;

                let out_y = if params.flip_vertical { h - 1 - y } else { y };
                let out_x = if params.flip_horizontal { w - 1 - x } else { x };
                for c in 0..channels {
                    out[(c, out_y, out_x)] =
                        self.sample(image.index_axis(Axis(0), c), src_y, src_x);
                }
            }
        }
        out
    }

    fn sample(&self, plane: ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (h, w) = plane.dim();
        let (max_y, max_x) = ((h - 1) as f32, (w - 1) as f32);
        let (y, x) = match self.fill_mode {
            FillMode::Nearest => (y.clamp(0.0, max_y), x.clamp(0.0, max_x)),
            FillMode::Constant(value) => {
                if y < 0.0 || x < 0.0 || y > max_y || x > max_x {
                    return value;
                }
                (y, x)
            }
        };

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let fy = y - y0 as f32;
        let fx = x - x0 as f32;

        plane[(y0, x0)] * (1.0 - fx) * (1.0 - fy)
            + plane[(y0, x1)] * fx * (1.0 - fy)
            + plane[(y1, x0)] * (1.0 - fx) * fy
            + plane[(y1, x1)] * fx * fy
    }

    /// Featurewise normalization, when enabled.
    fn standardize(&self, mut image: Array3<f32>) -> Array3<f32> {
        let Some(stats) = &self.stats else {
            return image;
        };
        for (c, mut plane) in image.outer_iter_mut().enumerate() {
            if self.featurewise_center {
                plane -= stats.mean[c];
            }
            if self.featurewise_std_normalization {
                plane /= stats.std[c] + 1e-6;
            }
        }
        image
    }

    /// Wrap a partition into an endless stream of augmented batches.
    pub fn flow<'a>(
        &'a self,
        images: &'a Array4<f32>,
        labels: &'a [u8],
        batch_size: usize,
        shuffle: bool,
        rng: StdRng,
    ) -> Result<Flow<'a>> {
        if (self.featurewise_center || self.featurewise_std_normalization) && self.stats.is_none()
        {
            return Err(Error::Augment(
                "featurewise normalization requires fit() before flow()".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(Error::Augment("batch size must be positive".to_string()));
        }
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::Augment(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        Ok(Flow {
            generator: self,
            images: images.view(),
            labels,
            batch_size,
            shuffle,
            order: (0..labels.len()).collect(),
            cursor: 0,
            passes: 0,
            rng,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>, // (batch_size, C, H, W)
    pub labels: Vec<u8>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Endless batch iterator built by [`ImageDataGenerator::flow`].
///
/// A pass visits every sample once. The last batch of a pass may be smaller than
/// `batch_size`. An empty partition yields empty batches.
pub struct Flow<'a> {
    generator: &'a ImageDataGenerator,
    images: ArrayView4<'a, f32>,
    labels: &'a [u8],
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    cursor: usize,
    passes: usize,
    rng: StdRng,
}

impl Flow<'_> {
    /// Completed passes over the data.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Drop the rest of the current pass; the next batch starts a new one.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for Flow<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let (_, channels, h, w) = self.images.dim();
        if self.labels.is_empty() {
            return Some(Batch {
                images: Array4::zeros((0, channels, h, w)),
                labels: Vec::new(),
            });
        }

        if self.cursor == 0 && self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];

        let generator = self.generator;
        let params: Vec<AffineParams> = indices
            .iter()
            .map(|_| generator.random_transform(h, w, &mut self.rng))
            .collect();
        let images = self.images;
        let augmented: Vec<Array3<f32>> = indices
            .par_iter()
            .zip(params.par_iter())
            .map(|(&idx, p)| {
                let image = generator.apply_transform(images.index_axis(Axis(0), idx), p);
                generator.standardize(image)
            })
            .collect();

        let mut batch = Array4::zeros((indices.len(), channels, h, w));
        for (mut slot, image) in batch.outer_iter_mut().zip(&augmented) {
            slot.assign(image);
        }
        let labels = indices.iter().map(|&i| self.labels[i]).collect();

        self.cursor = end;
        if self.cursor >= self.order.len() {
            self.cursor = 0;
            self.passes += 1;
        }

        Some(Batch {
            images: batch,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ramp_image() -> Array3<f32> {
        Array3::from_shape_fn((3, 8, 8), |(c, y, x)| (c * 64 + y * 8 + x) as f32 / 192.0)
    }

    #[test]
    fn identity_transform_is_a_no_op() {
        let gen = ImageDataGenerator::default();
        let image = ramp_image();
        let out = gen.apply_transform(image.view(), &AffineParams::identity());
        for (a, b) in out.iter().zip(image.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn horizontal_flip_mirrors_columns() {
        let gen = ImageDataGenerator::default();
        let image = ramp_image();
        let params = AffineParams {
            flip_horizontal: true,
            ..AffineParams::identity()
        };
        let out = gen.apply_transform(image.view(), &params);
        assert!((out[(1, 2, 0)] - image[(1, 2, 7)]).abs() < 1e-5);
        assert!((out[(2, 5, 7)] - image[(2, 5, 0)]).abs() < 1e-5);
    }

    #[test]
    fn shift_repeats_edge_pixels() {
        let gen = ImageDataGenerator::default();
        let image = ramp_image();
        // output x samples source x + 4
        let params = AffineParams {
            tx: 4.0,
            ..AffineParams::identity()
        };
        let out = gen.apply_transform(image.view(), &params);
        assert!((out[(0, 3, 0)] - image[(0, 3, 4)]).abs() < 1e-5);
        // past the right edge: nearest column
        assert!((out[(0, 3, 7)] - image[(0, 3, 7)]).abs() < 1e-5);
    }

    #[test]
    fn constant_fill_outside_the_source() {
        let gen = ImageDataGenerator {
            fill_mode: FillMode::Constant(0.25),
            ..ImageDataGenerator::default()
        };
        let image = ramp_image();
        let params = AffineParams {
            tx: 2.0,
            ..AffineParams::identity()
        };
        let out = gen.apply_transform(image.view(), &params);
        for c in 0..3 {
            for y in 0..8 {
                for x in 0..6 {
                    assert!((out[(c, y, x)] - image[(c, y, x + 2)]).abs() < 1e-5);
                }
                assert_eq!(out[(c, y, 6)], 0.25);
                assert_eq!(out[(c, y, 7)], 0.25);
            }
        }

        // shifted fully out of the image
        let params = AffineParams {
            ty: -8.0,
            ..AffineParams::identity()
        };
        let out = gen.apply_transform(image.view(), &params);
        assert!(out.iter().all(|&p| p == 0.25));
    }

    #[test]
    fn random_transform_stays_in_range() {
        let gen = ImageDataGenerator::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = gen.random_transform(32, 32, &mut rng);
            assert!(p.theta.abs() <= 40.0);
            assert!(p.tx.abs() <= 0.2 * 32.0 && p.ty.abs() <= 0.2 * 32.0);
            assert!(p.shear.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zx) && (0.8..=1.2).contains(&p.zy));
            assert!(!p.flip_vertical);
        }
    }

    #[test]
    fn featurewise_flow_requires_fit() {
        let gen = ImageDataGenerator {
            featurewise_center: true,
            ..Default::default()
        };
        let images = Array4::<f32>::zeros((2, 3, 4, 4));
        let labels = vec![0, 1];
        let flow = gen.flow(&images, &labels, 32, true, StdRng::seed_from_u64(0));
        assert!(matches!(flow, Err(Error::Augment(_))));
    }
}
