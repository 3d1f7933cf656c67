use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Fetching or decoding the CIFAR-10 archives failed.
    #[error("dataset: {0}")]
    Dataset(String),

    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The augmentation generator was misconfigured or used before `fit`.
    #[error("augmentation: {0}")]
    Augment(String),
}
