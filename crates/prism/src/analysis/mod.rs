//! Document analysis: classification, structuring, insights and tasks.

pub mod classifier;
pub mod insights;
pub mod roles;
pub mod structure;
pub mod tasks;
pub mod value;

pub use classifier::{ClassificationOutcome, Classifier};
pub use insights::{InsightGenerator, InsightOutcome};
pub use structure::{structure, StructuredData};
pub use tasks::TaskSynthesizer;
