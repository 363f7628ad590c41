//! quizrec-models — Statistical classifiers and artifact loading.
//!
//! Implements the core `TypeClassifier` trait with a trainable softmax model
//! and a mock, and provides the file-backed `ArtifactStore` the pipeline
//! loads its model and calibrator from.

pub mod error;
pub mod mock;
pub mod softmax;
pub mod store;

pub use error::ModelError;
pub use mock::{MockCalibrator, MockClassifier};
pub use softmax::{SoftmaxModel, TrainConfig, TrainReport};
pub use store::ArtifactStore;
