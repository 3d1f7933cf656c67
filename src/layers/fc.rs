use crate::layers::glorot_uniform;
use crate::model::Module;
use ndarray::prelude::*;
use rand::Rng;

///  z = a_prev . W + b
#[derive(Debug, Clone)]
pub struct FcLayer {
    output_size: usize,
    //
    pub weights: Array2<f32>, // (input_size, output_size)
    pub bias: Array1<f32>,    // (output_size)
    // for backprop
    last_input: Option<Array2<f32>>, // (batch_size, input_size)
    //
    pub w_grad: Option<Array2<f32>>, // (input_size, output_size)
    pub b_grad: Option<Array1<f32>>, // (output_size)
}

impl FcLayer {
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> FcLayer {
        FcLayer {
            output_size,
            weights: glorot_uniform((input_size, output_size), input_size, output_size, rng),
            bias: Array1::zeros(output_size),
            last_input: None,
            w_grad: None,
            b_grad: None,
        }
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

impl Module for FcLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix2>()
            .expect("FC layer input should be 2D");

        // (batch_size, input_size) X (input_size, output_size) = (batch_size, output_size)
        let out = input.dot(&self.weights) + &self.bias;
        self.last_input = Some(input);
        out.into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let dz = dz
            .into_dimensionality::<Ix2>()
            .expect("FC layer backward input should be 2D");

        let last_input = self
            .last_input
            .take()
            .expect("Need to do a forward pass before the backward");

        let batch_size = dz.nrows().max(1) as f32;
        // (batch_size, input_size)^T X (batch_size, output_size) = (input_size, output_size)
        self.w_grad = Some(last_input.t().dot(&dz) / batch_size);
        self.b_grad = Some(dz.sum_axis(Axis(0)) / batch_size);

        // (batch_size, output_size) X (input_size, output_size)^T
        dz.dot(&self.weights.t()).into_dyn()
    }

    fn zero_grad(&mut self) {
        self.w_grad = None;
        self.b_grad = None;
    }
}
