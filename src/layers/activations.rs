use crate::model::Module;
use ndarray::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct ReluLayer {
    // 1.0 where the input was positive
    active: Option<ArrayD<f32>>,
}

impl ReluLayer {
    pub fn new() -> ReluLayer {
        ReluLayer { active: None }
    }
}

impl Module for ReluLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> ArrayD<f32> {
        self.active = Some(input.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 }));
        input.mapv_into(|x| x.max(0.0))
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let active = self.active.as_ref().expect("run forward before backward");
        dz * active
    }

    fn zero_grad(&mut self) {
        self.active = None;
    }
}
