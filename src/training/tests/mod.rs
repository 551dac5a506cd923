//! Test suite for the XAE training pipeline
//!
//! Unit tests live next to the code they cover; the modules here run the
//! shared loop end to end: every model variant, checkpoint resume, and
//! experiment files through data loading.

pub mod integration_tests;

// Utility modules for testing
pub mod fixtures;

pub use fixtures::{data_for, model, paired_data, single_data, training_config, ExperimentFixture};
