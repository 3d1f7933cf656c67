pub use crate::layers::activations::ReluLayer;
pub use crate::layers::conv::{Conv2Dlayer, FlattenLayer, MaxPoolLayer};
pub use crate::layers::fc::FcLayer;
pub use crate::model::Module;

use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

pub mod activations;
pub mod conv;
pub mod fc;

/// A weight tensor next to its gradient, if backward has filled one.
pub type ParamGrad<'a> = (ArrayViewMutD<'a, f32>, Option<ArrayViewD<'a, f32>>);

#[derive(Debug, Clone)]
pub enum Layer {
    FC(FcLayer),
    Conv(Conv2Dlayer),
    Pool(MaxPoolLayer),
    ReLU(ReluLayer),
    Flatten(FlattenLayer),
}

impl Layer {
    /// Layer type, as shown in the model summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::FC(_) => "Dense",
            Layer::Conv(_) => "Conv2D",
            Layer::Pool(_) => "MaxPooling2D",
            Layer::ReLU(_) => "ReLU",
            Layer::Flatten(_) => "Flatten",
        }
    }

    /// Per-sample output shape for a per-sample input shape (batch dim excluded).
    pub fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        match self {
            Layer::FC(l) => vec![l.output_size()],
            Layer::Conv(l) => l.output_shape(input),
            Layer::Pool(l) => l.output_shape(input),
            Layer::ReLU(_) => input.to_vec(),
            Layer::Flatten(l) => l.output_shape(input),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Layer::FC(l) => l.param_count(),
            Layer::Conv(l) => l.param_count(),
            _ => 0,
        }
    }

    /// Trainable tensors with their gradients, in a stable order.
    pub fn params_and_grads(&mut self) -> Vec<ParamGrad<'_>> {
        fn pair<'a, D: Dimension>(
            param: &'a mut Array<f32, D>,
            grad: &'a Option<Array<f32, D>>,
        ) -> ParamGrad<'a> {
            (
                param.view_mut().into_dyn(),
                grad.as_ref().map(|g| g.view().into_dyn()),
            )
        }

        match self {
            Layer::FC(l) => vec![
                pair(&mut l.weights, &l.w_grad),
                pair(&mut l.bias, &l.b_grad),
            ],
            Layer::Conv(l) => vec![
                pair(&mut l.kernels_mat, &l.k_grad),
                pair(&mut l.b, &l.b_grad),
            ],
            _ => Vec::new(), // no weights in other layers
        }
    }
}

impl Module for Layer {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Layer::FC(l) => l.forward(input),
            Layer::Conv(l) => l.forward(input),
            Layer::Pool(l) => l.forward(input),
            Layer::ReLU(l) => l.forward(input),
            Layer::Flatten(l) => l.forward(input),
        }
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Layer::FC(l) => l.backward(dz),
            Layer::Conv(l) => l.backward(dz),
            Layer::Pool(l) => l.backward(dz),
            Layer::ReLU(l) => l.backward(dz),
            Layer::Flatten(l) => l.backward(dz),
        }
    }

    fn zero_grad(&mut self) {
        match self {
            Layer::FC(l) => l.zero_grad(),
            Layer::Conv(l) => l.zero_grad(),
            Layer::Pool(l) => l.zero_grad(),
            Layer::ReLU(l) => l.zero_grad(),
            Layer::Flatten(l) => l.zero_grad(),
        }
    }
}

/// Glorot (Xavier) uniform init: U(-l, l) with l = sqrt(6 / (fan_in + fan_out)).
pub(crate) fn glorot_uniform<R: Rng + ?Sized>(
    shape: (usize, usize),
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array2::random_using(shape, Uniform::new(-limit, limit), rng)
}
