//! Training module
//!
//! This module provides:
//! - The fit/evaluate engine (Adam + categorical cross-entropy)
//! - Per-epoch training history
//! - The orchestrator that trains the teacher, then the student
//!
//! ## Pipeline
//!
//! 1. Open the data source and validate the whole configuration
//! 2. Build the student, then the teacher
//! 3. Fit and persist the teacher
//! 4. Fit, persist and evaluate the student
//! 5. Reload the student artifact and check its accuracy
//! 6. Print the summary and write charts

pub mod history;
pub mod orchestrator;
pub mod trainer;

// Re-export main types for convenience
pub use history::{EpochRecord, TrainingHistory};
pub use orchestrator::{Orchestrator, Phase, RunReport, RELOAD_TOLERANCE};
pub use trainer::{
    categorical_cross_entropy, compile, count_correct, evaluate_batches, Evaluation, Trainer,
};
