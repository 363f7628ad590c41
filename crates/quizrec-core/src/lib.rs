//! quizrec-core — Question layout parsing, classification, and calibration.
//!
//! This crate defines the data model, the layout state machine that turns
//! extracted text fragments into question records, the rule engine and
//! calibrator, and the pipeline and batch processor that tie them together.
//! Statistical classifiers live in `quizrec-models`.

pub mod calibrator;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod lexicon;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod statistics;
pub mod traits;
