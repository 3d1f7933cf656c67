use cifar_cnn::augment::ImageDataGenerator;
use cifar_cnn::cifar_dataset::load_cifar10;
use cifar_cnn::error::{Error, Result};
use cifar_cnn::inspect::{render_ansi, save_png, select_index, Inspection};
use cifar_cnn::model::{add_dense_head, build_conv_base};
use cifar_cnn::predict::predict;
use cifar_cnn::train::{evaluate, fit, steps_per_epoch, TrainConfig};

use clap::Parser;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;

/// Train a small CNN on CIFAR-10, then inspect one test prediction.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Where the CIFAR-10 binary archive is (or will be downloaded)
    #[arg(long, default_value = "data/")]
    data_dir: String,
    #[arg(long, default_value_t = 25)]
    epochs: usize,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 0.001)]
    learning_rate: f32,
    /// Only use the first N training images
    #[arg(long)]
    train_size: Option<usize>,
    /// Only use the first N test images
    #[arg(long)]
    test_size: Option<usize>,
    /// Seed for weight init, shuffling and augmentation
    #[arg(long)]
    seed: Option<u64>,
    /// Write per-epoch loss/accuracy to this JSON file
    #[arg(long)]
    history: Option<String>,
    /// Also save the inspected image as a PNG
    #[arg(long)]
    save_image: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// The given seed, or a fresh one from entropy.
fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::thread_rng().gen())
}

fn run(cli: Cli) -> Result<()> {
    let seed = resolve_seed(cli.seed);
    log::info!("seed: {seed} (rerun with --seed {seed} to reproduce)");
    let mut rng = StdRng::seed_from_u64(seed);

    let (mut train, mut test) = load_cifar10(&cli.data_dir)?;
    if let Some(len) = cli.train_size {
        train.truncate(len);
    }
    if let Some(len) = cli.test_size {
        test.truncate(len);
    }
    log::info!("using {} train / {} test images", train.len(), test.len());

    let mut model = build_conv_base(&mut rng);
    println!("{}", model.summary());
    add_dense_head(&mut model, &mut rng);
    println!("{}", model.summary());

    let mut datagen = ImageDataGenerator::default();
    datagen.fit(train.images());

    let config = TrainConfig {
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        learning_rate: cli.learning_rate,
        ..TrainConfig::default()
    };
    let mut train_flow = datagen.flow(
        train.images(),
        train.labels(),
        config.batch_size,
        true,
        StdRng::seed_from_u64(rng.gen()),
    )?;
    let steps = steps_per_epoch(train.len(), config.batch_size);
    log::info!("training: {} epochs x {steps} steps", config.epochs);
    let (model, history) = fit(model, &mut train_flow, steps, &config);
    if let Some(path) = &cli.history {
        history.save(path)?;
        log::info!("history written to {path}");
    }

    let mut test_flow = datagen.flow(
        test.images(),
        test.labels(),
        config.batch_size,
        true,
        StdRng::seed_from_u64(rng.gen()),
    )?;
    let evaluation = evaluate(
        &model,
        &mut test_flow,
        steps_per_epoch(test.len(), config.batch_size),
    );
    println!(
        "loss: {:.4} - accuracy: {:.4}",
        evaluation.loss, evaluation.accuracy
    );

    let predictions = predict(&model, test.images(), config.batch_size);

    if test.is_empty() {
        return Err(Error::Dataset("no test images to inspect".to_string()));
    }
    let index = select_index(&mut io::stdin().lock(), &mut io::stdout(), test.len())?;
    let inspection = Inspection::new(&predictions, test.labels(), index);
    println!("{inspection}");

    let image = test.images().index_axis(Axis(0), index);
    print!("{}", render_ansi(image));
    if let Some(path) = &cli.save_image {
        save_png(image, path, 8)?;
        log::info!("image {index} saved to {path}");
    }

    Ok(())
}
