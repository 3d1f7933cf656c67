use crate::augment::Batch;
use crate::error::Result;
use crate::model::{Module, Sequential};
use crate::optim::{count_correct, sparse_categorical_crossentropy, Adam, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Draw progress bars (off in tests).
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 25,
            batch_size: 32,
            learning_rate: 0.001,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub steps: usize,
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    /// Write the per-epoch metrics as pretty JSON.
    pub fn save(&self, path: &str) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// Batches needed to see `nb_samples` once: ceil(nb_samples / batch_size).
pub fn steps_per_epoch(nb_samples: usize, batch_size: usize) -> usize {
    nb_samples.div_ceil(batch_size)
}

/// Sample-weighted running loss and accuracy.
#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f32,
    correct: usize,
    seen: usize,
}

impl RunningMetrics {
    fn update(&mut self, loss_sum: f32, correct: usize, seen: usize) {
        self.loss_sum += loss_sum;
        self.correct += correct;
        self.seen += seen;
    }

    fn loss(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f32
        }
    }

    fn accuracy(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f32 / self.seen as f32
        }
    }
}

/// Train `nn` for `config.epochs` epochs of `steps_per_epoch` batches pulled from `batches`,
/// minimizing the cross-entropy of its logits with Adam.
pub fn fit<I>(
    mut nn: Sequential,
    batches: &mut I,
    steps_per_epoch: usize,
    config: &TrainConfig,
) -> (Sequential, History)
where
    I: Iterator<Item = Batch>,
{
    let mut optimizer = Adam::new(&nn, config.learning_rate);
    let mut history = History::default();

    for epoch in 1..=config.epochs {
        let started = Instant::now();
        let pb = epoch_bar(epoch, config.epochs, steps_per_epoch, config.progress);
        let mut metrics = RunningMetrics::default();

        for (step, batch) in batches.by_ref().take(steps_per_epoch).enumerate() {
            if batch.is_empty() {
                continue;
            }
            // ----------
            nn.zero_grad();
            let logits = nn.logits(batch.images.view());
            let (loss, dlogits) = sparse_categorical_crossentropy(&batch.labels, &logits);
            nn.backward(dlogits.into_dyn());
            optimizer.step(&mut nn);
            // ----------

            metrics.update(loss.sum(), count_correct(&batch.labels, &logits), batch.len());
            pb.set_message(format!(
                "loss: {:.4} - accuracy: {:.4}",
                metrics.loss(),
                metrics.accuracy()
            ));
            pb.inc(1);
            log::trace!("[BATCH] epoch {epoch} step {} loss: {:.4}", step + 1, metrics.loss());
        }
        pb.finish();

        log::debug!("epoch {epoch} took {:.1?}", started.elapsed());
        history.epochs.push(EpochMetrics {
            epoch,
            steps: steps_per_epoch,
            loss: metrics.loss(),
            accuracy: metrics.accuracy(),
        });
    }

    (nn, history)
}

/// Average loss and accuracy of `nn` over `steps` batches. The model is cloned per worker
/// thread and the caller's copy is left untouched.
pub fn evaluate<I>(nn: &Sequential, batches: &mut I, steps: usize) -> Evaluation
where
    I: Iterator<Item = Batch>,
{
    let batches: Vec<Batch> = batches.by_ref().take(steps).filter(|b| !b.is_empty()).collect();

    let metrics = batches
        .par_iter()
        .map_init(
            || nn.clone(),
            |nn, batch| {
                let logits = nn.logits(batch.images.view());
                let (loss, _) = sparse_categorical_crossentropy(&batch.labels, &logits);
                (loss.sum(), count_correct(&batch.labels, &logits), batch.len())
            },
        )
        .collect::<Vec<_>>()
        .into_iter()
        .fold(RunningMetrics::default(), |mut acc, (loss, correct, seen)| {
            acc.update(loss, correct, seen);
            acc
        });

    Evaluation {
        loss: metrics.loss(),
        accuracy: metrics.accuracy(),
    }
}

fn epoch_bar(epoch: usize, epochs: usize, steps: usize, visible: bool) -> ProgressBar {
    let pb = ProgressBar::new(steps as u64);
    if !visible {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} {pos}/{len} [{bar:30.cyan/blue}] {elapsed_precise} - {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_prefix(format!("Epoch {epoch}/{epochs}"));
    pb
}
