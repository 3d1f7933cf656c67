use cifar_cnn::layers::{Conv2Dlayer, FcLayer, FlattenLayer, Layer, MaxPoolLayer, ReluLayer};
use cifar_cnn::model::{Module, Sequential};
use cifar_cnn::optim::{sparse_categorical_crossentropy, Adam, Optimizer};
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn small_cnn(rng: &mut StdRng) -> Sequential {
    let mut cnn = Sequential::new(&[3, 16, 16]);
    cnn.add(Layer::Conv(Conv2Dlayer::new(3, 8, (3, 3), rng))); // (3, 16, 16) --> (8, 14, 14)
    cnn.add(Layer::ReLU(ReluLayer::new()));
    cnn.add(Layer::Pool(MaxPoolLayer::new((2, 2)))); // --> (8, 7, 7)
    cnn.add(Layer::Flatten(FlattenLayer::new()));
    cnn.add(Layer::FC(FcLayer::new(8 * 7 * 7, 32, rng)));
    cnn.add(Layer::ReLU(ReluLayer::new()));
    cnn.add(Layer::FC(FcLayer::new(32, 5, rng))); // 5 classes, raw logits
    cnn
}

#[test]
/// Adam can drive a small CNN to overfit a batch of 32 random 16x16 RGB images
/// associated to random integer labels in 0..5.
fn test_adam_can_overfit_single_batch() -> Result<(), Box<dyn std::error::Error>> {
    const MAX_RETRIES: u64 = 3;
    const OVERFITTED_LOSS_VALUE: f32 = 0.1;
    const MAX_OPTIM_STEPS: usize = 500;
    let batch_size = 32;
    let nb_classes = 5;
    let mut last_error = String::new();

    for attempt in 0..MAX_RETRIES {
        let mut rng = StdRng::seed_from_u64(attempt);
        let mut cnn = small_cnn(&mut rng);
        let mut optimizer = Adam::new(&cnn, 0.005);

        let images: Array4<f32> =
            Array4::random_using((batch_size, 3, 16, 16), Uniform::new(0.0, 1.0), &mut rng);
        let labels: Vec<u8> = (0..batch_size).map(|_| rng.gen_range(0..nb_classes)).collect();

        let mut avg_loss = f32::MAX;
        for optim_step in 1..=MAX_OPTIM_STEPS {
            cnn.zero_grad();
            let logits = cnn.logits(images.view());
            let (loss, dlogits) = sparse_categorical_crossentropy(&labels, &logits);

            avg_loss = loss.mean().unwrap_or(f32::MAX);
            if avg_loss < OVERFITTED_LOSS_VALUE {
                println!("Reached loss<{OVERFITTED_LOSS_VALUE} in attempt {attempt} with {optim_step} optimisation steps");
                return Ok(());
            }

            cnn.backward(dlogits.into_dyn());
            optimizer.step(&mut cnn);
        }
        last_error = format!("Attempt {attempt} failed: Final loss was {avg_loss}");
        println!("{}", last_error);
    }
    Err(format!(
        "Failed to overfit after {MAX_RETRIES} attempts. Last error: {last_error}"
    ))?
}
