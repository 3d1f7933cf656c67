use cifar_cnn::cifar_dataset::{CHANNELS, HEIGHT, NB_CLASSES, WIDTH};
use cifar_cnn::layers::Layer;
use cifar_cnn::model::{add_dense_head, build_conv_base, build_model};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn outputs_ten_logits_per_image() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = build_model(&mut rng);
    let images = Array4::<f32>::from_elem((3, CHANNELS, HEIGHT, WIDTH), 0.5);
    let logits = model.logits(images.view());
    assert_eq!(logits.dim(), (3, NB_CLASSES));
    assert!(logits.iter().all(|v| v.is_finite()));
}

#[test]
fn layer_order_and_shapes() {
    let mut rng = StdRng::seed_from_u64(0);
    let model = build_model(&mut rng);
    let kinds: Vec<&str> = model.layers.iter().map(Layer::kind).collect();
    assert_eq!(
        kinds,
        [
            "Conv2D",
            "ReLU",
            "MaxPooling2D",
            "Conv2D",
            "ReLU",
            "MaxPooling2D",
            "Conv2D",
            "ReLU",
            "Flatten",
            "Dense",
            "ReLU",
            "Dense"
        ]
    );

    let mut shape = model.input_shape().to_vec();
    let mut shapes = Vec::new();
    for layer in &model.layers {
        shape = layer.output_shape(&shape);
        shapes.push(shape.clone());
    }
    assert_eq!(shapes[0], [32, 30, 30]);
    assert_eq!(shapes[2], [32, 15, 15]);
    assert_eq!(shapes[3], [64, 13, 13]);
    assert_eq!(shapes[5], [64, 6, 6]);
    assert_eq!(shapes[6], [64, 4, 4]);
    assert_eq!(shapes[8], [1024]);
    assert_eq!(shapes[9], [64]);
    assert_eq!(shapes[11], [NB_CLASSES]);
}

#[test]
fn parameter_counts() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = build_conv_base(&mut rng);
    assert_eq!(model.output_shape(), [64, 4, 4]);
    assert_eq!(model.param_count(), 896 + 18_496 + 36_928);

    add_dense_head(&mut model, &mut rng);
    assert_eq!(model.param_count(), 122_570);
}

#[test]
fn summary_lists_every_layer() {
    let mut rng = StdRng::seed_from_u64(0);
    let model = build_model(&mut rng);
    let summary = model.summary();
    assert!(summary.contains("conv2d (Conv2D)"));
    assert!(summary.contains("conv2d_2 (Conv2D)"));
    assert!(summary.contains("dense_1 (Dense)"));
    assert!(summary.contains("(None, 64, 4, 4)"));
    assert!(summary.contains("(None, 10)"));
    assert!(summary.contains("Total params: 122570"));
}
