use crate::layers::glorot_uniform;
use crate::model::Module;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;

/// 2D convolution layer (no padding, stride 1).
#[derive(Debug, Clone)]
pub struct Conv2Dlayer {
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    // weights
    pub kernels_mat: Array2<f32>, // img2col layout: (out_channels, in_channels*k^2)
    pub b: Array1<f32>,           // (out_channels)
    // for backprop
    patches: Option<Array3<f32>>, // (batch_size, locations, in_channels*k^2)
    //
    pub k_grad: Option<Array2<f32>>, // (out_channels, in_channels*k^2)
    pub b_grad: Option<Array1<f32>>, // (out_channels)
}

impl Conv2Dlayer {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        rng: &mut R,
    ) -> Conv2Dlayer {
        assert!(kernel_size.0 == kernel_size.1, "only square kernels");
        let k = kernel_size.0;
        let fan_in = in_channels * k * k;
        let fan_out = out_channels * k * k;
        Conv2Dlayer {
            in_channels,
            out_channels,
            kernel_size,
            kernels_mat: glorot_uniform((out_channels, in_channels * k * k), fan_in, fan_out, rng),
            b: Array1::zeros(out_channels),
            patches: None,
            k_grad: None,
            b_grad: None,
        }
    }

    pub fn param_count(&self) -> usize {
        self.kernels_mat.len() + self.b.len()
    }

    /// (out_channels, height-k+1, width-k+1)
    pub fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        let k = self.kernel_size.0;
        vec![self.out_channels, input[1] - k + 1, input[2] - k + 1]
    }
}

impl Module for Conv2Dlayer {
    /// Convolution as a single matmul per batch item ('img2col'):
    /// OUT (out_channels, L) = kernels_mat (out_channels, in_channels*k^2) x patches^T,
    /// where every row of `patches` is one flattened (in_channels, k, k) input window and
    /// L is the number of valid window locations.
    ///
    /// Input: (batch_size, in_channels, height, width)
    /// Output: (batch_size, out_channels, height-k+1, width-k+1)
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        log::trace!("[forward] [conv] input: {:?}", input.shape());
        let input = input
            .into_dimensionality::<Ix4>()
            .expect("Conv layer input should be 4D");

        let (batch_size, in_channels, in_height, in_width) = input.dim();
        assert_eq!(in_channels, self.in_channels);
        let k = self.kernel_size.0;
        let out_height = in_height - k + 1;
        let out_width = in_width - k + 1;
        let nb_locations = out_height * out_width;

        let mut out = Array4::zeros((batch_size, self.out_channels, out_height, out_width));
        let mut patches = Array3::<f32>::zeros((batch_size, nb_locations, in_channels * k * k));

        for (batch_idx, feature_maps) in input.outer_iter().enumerate() {
            let mut patches_mat = patches.index_axis_mut(Axis(0), batch_idx);
            // windows() walks locations row-major, which matches the output layout
            for (mut row, window) in patches_mat
                .rows_mut()
                .into_iter()
                .zip(feature_maps.windows((in_channels, k, k)))
            {
                row.assign(&window.flatten());
            }

            // (out_channels, L) = (out_channels, in_channels*k^2) dot (L, in_channels*k^2)^T
            let mut flat_out = self.kernels_mat.dot(&patches_mat.t());
            flat_out += &self.b.view().insert_axis(Axis(1));

            let feature_map = flat_out
                .into_shape_with_order((self.out_channels, out_height, out_width))
                .expect("(out_channels, L) reshapes to (out_channels, out_height, out_width)");
            out.index_axis_mut(Axis(0), batch_idx).assign(&feature_map);
        }

        self.patches = Some(patches);
        out.into_dyn()
    }

    /// With OUT = kernels_mat . patches^T per batch item:
    /// - dL/dkernels_mat = dz . patches, averaged over the batch
    /// - dL/db = dz summed over locations, averaged over the batch
    /// - dL/dpatches = dz^T . kernels_mat, then every patch gradient is accumulated back
    ///   onto the k x k input window it came from.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        log::trace!("[backward] [conv] incoming dz: {:?}", dz.shape());
        let dz = dz
            .into_dimensionality::<Ix4>()
            .expect("[backward] [conv] incoming dz is 4D");
        let (batch_size, out_channels, out_height, out_width) = dz.dim();
        let nb_locations = out_height * out_width;
        let dz = dz
            .to_shape((batch_size, out_channels, nb_locations))
            .expect("[backward] [conv] incoming dz is compatible with img2col shape");

        let patches = self.patches.as_ref().expect("Run forward before the backward");
        let k = self.kernel_size.0;

        let mut dkernels = Array2::<f32>::zeros((out_channels, self.in_channels * k * k));
        for batch_idx in 0..batch_size {
            dkernels += &dz
                .index_axis(Axis(0), batch_idx)
                .dot(&patches.index_axis(Axis(0), batch_idx));
        }
        let scale = batch_size.max(1) as f32;
        self.k_grad = Some(dkernels / scale);
        self.b_grad = Some(dz.sum_axis(Axis(2)).sum_axis(Axis(0)) / scale);

        let height = out_height + k - 1;
        let width = out_width + k - 1;
        let mut dinput = Array4::<f32>::zeros((batch_size, self.in_channels, height, width));
        for batch_idx in 0..batch_size {
            // (L, in_channels*k^2) = (out_channels, L)^T dot (out_channels, in_channels*k^2)
            let dpatches = dz.index_axis(Axis(0), batch_idx).t().dot(&self.kernels_mat);
            let dpatches = dpatches
                .into_shape_with_order((nb_locations, self.in_channels, k, k))
                .expect("patch gradients reshape to (L, in_channels, k, k)");
            for (location, patch_grad) in dpatches.outer_iter().enumerate() {
                let top_y = location / out_width;
                let top_x = location % out_width;
                let mut window =
                    dinput.slice_mut(s![batch_idx, .., top_y..top_y + k, top_x..top_x + k]);
                window += &patch_grad;
            }
        }

        dinput.into_dyn()
    }

    fn zero_grad(&mut self) {
        self.k_grad = None;
        self.b_grad = None;
    }
}

/// Max pooling with a square window and stride equal to the window.
/// Rows and columns that do not fill a whole window are dropped ("valid" pooling).
#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    pool_size: (usize, usize),
    // for backprop
    input_dim: Option<(usize, usize, usize, usize)>,
    max_mask: Option<Array6<f32>>, // (batch_size, channels, height/k, k, width/k, k)
}

impl MaxPoolLayer {
    pub fn new(pool_size: (usize, usize)) -> MaxPoolLayer {
        assert!(pool_size.0 == pool_size.1, "only square pooling windows");
        MaxPoolLayer {
            pool_size,
            input_dim: None,
            max_mask: None,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        let k = self.pool_size.0;
        vec![input[0], input[1] / k, input[2] / k]
    }
}

impl Module for MaxPoolLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix4>()
            .expect("[forward] [maxPool] input is a 4D tensor");

        let (batch_size, channels, height, width) = input.dim();
        let k = self.pool_size.0;
        let (out_height, out_width) = (height / k, width / k);

        let cropped = input.slice(s![.., .., ..out_height * k, ..out_width * k]);
        let input_6d = cropped
            .to_shape((batch_size, channels, out_height, k, out_width, k))
            .expect("[forward] [maxPool] cropped input splits into pooling windows");

        // fold axis 3 first, the second k axis then sits at index 4
        let pooled: Array4<f32> = input_6d
            .fold_axis(Axis(3), f32::NEG_INFINITY, |&a, &b| a.max(b))
            .fold_axis(Axis(4), f32::NEG_INFINITY, |&a, &b| a.max(b));

        // only the first max of each window (row-major) receives the gradient
        let mut mask = Array6::<f32>::zeros((batch_size, channels, out_height, k, out_width, k));
        for ((b, c, oy, ox), &max_val) in pooled.indexed_iter() {
            let first = (0..k)
                .flat_map(|dy| (0..k).map(move |dx| (dy, dx)))
                .find(|&(dy, dx)| input_6d[(b, c, oy, dy, ox, dx)] == max_val);
            if let Some((dy, dx)) = first {
                mask[(b, c, oy, dy, ox, dx)] = 1.0;
            }
        }

        self.input_dim = Some((batch_size, channels, height, width));
        self.max_mask = Some(mask);

        pooled.into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let dz = dz
            .into_dimensionality::<Ix4>()
            .expect("[backward] [maxPool] dz is 4D");
        let (batch_size, channels, out_height, out_width) = dz.dim();
        let k = self.pool_size.0;

        let mask = self
            .max_mask
            .as_ref()
            .expect("[backward] [maxPool] Run forward before backward");
        let (_, _, height, width) = self
            .input_dim
            .expect("[backward] [maxPool] Run forward before backward");

        let dz_6d = dz.view().insert_axis(Axis(3)).insert_axis(Axis(5));
        let mut dwindows = Array6::<f32>::zeros((batch_size, channels, out_height, k, out_width, k));
        Zip::from(&mut dwindows)
            .and(mask)
            .and_broadcast(&dz_6d)
            .for_each(|d, &m, &g| *d = m * g);

        let dwindows = dwindows
            .into_shape_with_order((batch_size, channels, out_height * k, out_width * k))
            .expect("[backward] [maxPool] windows gradient is compatible with the cropped input");

        let mut dinput = Array4::<f32>::zeros((batch_size, channels, height, width));
        dinput
            .slice_mut(s![.., .., ..out_height * k, ..out_width * k])
            .assign(&dwindows);
        dinput.into_dyn()
    }

    fn zero_grad(&mut self) {
        self.max_mask = None;
        self.input_dim = None;
    }
}

/// (batch_size, C, H, W) -> (batch_size, C*H*W)
#[derive(Debug, Clone, Default)]
pub struct FlattenLayer {
    input_shape: Option<Vec<usize>>,
}

impl FlattenLayer {
    pub fn new() -> FlattenLayer {
        FlattenLayer { input_shape: None }
    }

    pub fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        vec![input.iter().product()]
    }
}

impl Module for FlattenLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        let batch_size = input.shape()[0];
        let features: usize = input.shape()[1..].iter().product();
        self.input_shape = Some(input.shape().to_vec());
        input
            .to_shape((batch_size, features))
            .expect("flatten input to 2D array should not fail")
            .to_owned()
            .into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let shape = self
            .input_shape
            .as_ref()
            .expect("Need to do a forward pass before the backward");
        dz.to_shape(shape.as_slice())
            .expect("should be able to reshape the incoming gradient")
            .to_owned()
    }

    fn zero_grad(&mut self) {
        self.input_shape = None;
    }
}
