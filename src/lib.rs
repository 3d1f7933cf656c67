pub mod augment;
pub mod cifar_dataset;
pub mod error;
pub mod inspect;
pub mod layers;
pub mod model;
pub mod optim;
pub mod predict;
pub mod train;
