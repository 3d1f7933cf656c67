use crate::model::Sequential;
use ndarray::prelude::*;

/// Sparse categorical cross-entropy on raw logits.
///
/// Labels are class indices, not one-hot rows. The log-softmax is computed with the row max
/// subtracted first. Returns the per-sample losses and dLoss/dlogits = softmax - one_hot
/// (not averaged: layers average their own weight gradients over the batch).
pub fn sparse_categorical_crossentropy(
    labels: &[u8],
    logits: &Array2<f32>,
) -> (Array1<f32>, Array2<f32>) {
    assert_eq!(labels.len(), logits.nrows(), "one label per logit row");

    let max = logits.fold_axis(Axis(1), f32::NEG_INFINITY, |&a, &b| a.max(b));
    let shifted = logits - &max.insert_axis(Axis(1));
    let log_sum_exp = shifted.mapv(f32::exp).sum_axis(Axis(1)).mapv(f32::ln);
    let log_probs = shifted - &log_sum_exp.insert_axis(Axis(1));

    let mut grad = log_probs.mapv(f32::exp);
    let mut loss = Array1::zeros(labels.len());
    for (i, &label) in labels.iter().enumerate() {
        let label = label as usize;
        loss[i] = -log_probs[(i, label)];
        grad[(i, label)] -= 1.0;
    }

    (loss, grad)
}

/// Number of rows whose argmax matches the label.
pub fn count_correct(labels: &[u8], logits: &Array2<f32>) -> usize {
    logits
        .outer_iter()
        .zip(labels)
        .filter(|(row, label)| argmax(row.view()) == **label as usize)
        .count()
}

/// Index of the largest value (first one on ties, NaN never wins).
pub fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_i, best), (i, &v)| {
            if v > best {
                (i, v)
            } else {
                (best_i, best)
            }
        })
        .0
}

pub trait Optimizer {
    /// Run one optimization step.
    /// Note:
    /// - Assumes forward+backward pass have been done.
    /// - May mutate the optimizer internal state (e.g. moments).
    fn step(&mut self, nn: &mut Sequential);
}

pub struct Adam {
    pub t: i32,
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// (m, v) per trainable tensor, per layer. Filled lazily on the first step.
    pub states: Vec<Vec<(ArrayD<f32>, ArrayD<f32>)>>,
}

impl Adam {
    pub fn new(nn: &Sequential, learning_rate: f32) -> Self {
        Adam {
            t: 0,
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            states: vec![Vec::new(); nn.layers.len()],
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, nn: &mut Sequential) {
        self.t += 1;
        let t = self.t as f32;

        for (layer, state) in nn.layers.iter_mut().zip(self.states.iter_mut()) {
            for (i, (mut param, grad)) in layer.params_and_grads().into_iter().enumerate() {
                let Some(grad) = grad else {
                    continue;
                };
                if state.len() <= i {
                    state.push((ArrayD::zeros(grad.raw_dim()), ArrayD::zeros(grad.raw_dim())));
                }
                update_param(
                    &mut param,
                    &grad,
                    &mut state[i],
                    self.learning_rate,
                    self.beta1,
                    self.beta2,
                    self.epsilon,
                    t,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update_param(
    param: &mut ArrayViewMutD<f32>,
    grad: &ArrayViewD<f32>,
    state: &mut (ArrayD<f32>, ArrayD<f32>),
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: f32,
) {
    let (m, v) = state;

    // m = beta1 * m + (1 - beta1) * grad
    m.zip_mut_with(grad, |m_val, g_val| {
        *m_val = beta1 * *m_val + (1.0 - beta1) * g_val;
    });

    // v = beta2 * v + (1 - beta2) * grad^2
    v.zip_mut_with(grad, |v_val, g_val| {
        *v_val = beta2 * *v_val + (1.0 - beta2) * g_val.powi(2);
    });

    let m_corr = 1.0 - beta1.powf(t);
    let v_corr = 1.0 - beta2.powf(t);

    // w = w - lr * (m / m_corr) / (sqrt(v / v_corr) + eps)
    azip!((p in param, mv in &*m, vv in &*v) {
        let m_hat = mv / m_corr;
        let v_hat = vv / v_corr;
        *p -= lr * m_hat / (v_hat.sqrt() + eps);
    });
}
