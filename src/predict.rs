use crate::model::Sequential;
use ndarray::prelude::*;
use rayon::prelude::*;

/// Logits for every image (N, C, H, W) -> (N, classes), computed in chunks of `batch_size`.
/// Row i belongs to image i.
pub fn predict(nn: &Sequential, images: &Array4<f32>, batch_size: usize) -> Array2<f32> {
    let nb_classes: usize = nn.output_shape().iter().product();
    let nb_images = images.len_of(Axis(0));
    if nb_images == 0 {
        return Array2::zeros((0, nb_classes));
    }

    let chunks: Vec<ArrayView4<f32>> = images
        .axis_chunks_iter(Axis(0), batch_size.max(1))
        .collect();
    let outputs: Vec<Array2<f32>> = chunks
        .par_iter()
        .map_init(|| nn.clone(), |nn, chunk| nn.logits(chunk.view()))
        .collect();

    let views: Vec<ArrayView2<f32>> = outputs.iter().map(|o| o.view()).collect();
    ndarray::concatenate(Axis(0), &views).expect("every chunk yields (chunk_len, classes) logits")
}
