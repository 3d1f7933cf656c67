use crate::cifar_dataset::{CHANNELS, HEIGHT, NB_CLASSES, WIDTH};
use crate::layers::{Conv2Dlayer, FcLayer, FlattenLayer, Layer, MaxPoolLayer, ReluLayer};
use ndarray::prelude::*;
use rand::Rng;
use std::collections::HashMap;
use std::fmt::Write;

pub trait Module {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32>; // first axis is the batch
    /// Backward pass
    ///
    /// Receives dLoss/dz, where z is this module's output. It fills the gradients of the
    /// module's own weights (dLoss/dw) and returns dLoss/dx, shaped like the forward input.
    /// Jacobians are never materialized: each layer computes the product directly.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32>;
    fn zero_grad(&mut self);
}

/// An ordered stack of layers applied to (batch_size, C, H, W) inputs.
#[derive(Debug, Clone)]
pub struct Sequential {
    input_shape: Vec<usize>, // per sample
    pub layers: Vec<Layer>,
}

impl Module for Sequential {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        let mut x = input;
        for layer in &mut self.layers {
            x = layer.forward(x);
        }
        x
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let mut x = dz;
        for layer in self.layers.iter_mut().rev() {
            x = layer.backward(x);
        }
        x
    }

    fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }
}

impl Sequential {
    pub fn new(input_shape: &[usize]) -> Sequential {
        Sequential {
            input_shape: input_shape.to_vec(),
            layers: Vec::new(),
        }
    }

    pub fn add(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Per-sample shape produced by the last layer.
    pub fn output_shape(&self) -> Vec<usize> {
        self.layers
            .iter()
            .fold(self.input_shape.clone(), |shape, layer| layer.output_shape(&shape))
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Logits for a batch of images (batch_size, C, H, W) -> (batch_size, classes).
    pub fn logits(&mut self, images: ArrayView4<f32>) -> Array2<f32> {
        self.forward(images.to_owned().into_dyn())
            .into_dimensionality::<Ix2>()
            .expect("Network output should be 2D: (batch_size, num_classes)")
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self) -> String {
        const RULE: &str =
            "_________________________________________________________________";
        const DOUBLE_RULE: &str =
            "=================================================================";

        let mut out = String::new();
        let _ = writeln!(out, "Model: \"sequential\"");
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, " {:<28}{:<26}{}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{DOUBLE_RULE}");

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut shape = self.input_shape.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            shape = layer.output_shape(&shape);
            let kind = layer.kind();
            let count = seen.entry(kind).or_insert(0);
            let name = match *count {
                0 => kind.to_lowercase(),
                n => format!("{}_{n}", kind.to_lowercase()),
            };
            *count += 1;

            let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
            let _ = writeln!(
                out,
                " {:<28}{:<26}{}",
                format!("{name} ({kind})"),
                format!("(None, {})", dims.join(", ")),
                layer.param_count()
            );
            if i + 1 < self.layers.len() {
                let _ = writeln!(out);
            }
        }

        let _ = writeln!(out, "{DOUBLE_RULE}");
        let _ = writeln!(out, "Total params: {}", self.param_count());
        let _ = writeln!(out, "{RULE}");
        out
    }
}

/// conv(32) -> pool -> conv(64) -> pool -> conv(64), each conv followed by a ReLU.
pub fn build_conv_base<R: Rng + ?Sized>(rng: &mut R) -> Sequential {
    let mut model = Sequential::new(&[CHANNELS, HEIGHT, WIDTH]);
    model.add(Layer::Conv(Conv2Dlayer::new(CHANNELS, 32, (3, 3), rng))); // (3, 32, 32) --> (32, 30, 30)
    model.add(Layer::ReLU(ReluLayer::new()));
    model.add(Layer::Pool(MaxPoolLayer::new((2, 2)))); // --> (32, 15, 15)
    //
    model.add(Layer::Conv(Conv2Dlayer::new(32, 64, (3, 3), rng))); // --> (64, 13, 13)
    model.add(Layer::ReLU(ReluLayer::new()));
    model.add(Layer::Pool(MaxPoolLayer::new((2, 2)))); // --> (64, 6, 6)
    //
    model.add(Layer::Conv(Conv2Dlayer::new(64, 64, (3, 3), rng))); // --> (64, 4, 4)
    model.add(Layer::ReLU(ReluLayer::new()));
    model
}

/// flatten -> dense(64) -> relu -> dense(classes). The last layer emits raw logits.
pub fn add_dense_head<R: Rng + ?Sized>(model: &mut Sequential, rng: &mut R) {
    let features: usize = model.output_shape().iter().product();
    model.add(Layer::Flatten(FlattenLayer::new()));
    model.add(Layer::FC(FcLayer::new(features, 64, rng)));
    model.add(Layer::ReLU(ReluLayer::new()));
    model.add(Layer::FC(FcLayer::new(64, NB_CLASSES, rng)));
}

pub fn build_model<R: Rng + ?Sized>(rng: &mut R) -> Sequential {
    let mut model = build_conv_base(rng);
    add_dense_head(&mut model, rng);
    model
}
