pub mod context;
pub mod error;
pub mod handler;
pub mod progress;
pub mod runner;

pub use context::{Analysis, AnalyzeJob};
pub use error::PipelineError;
pub use handler::AnalyzeHandler;
pub use progress::{JobProgress, NoopProgress, ProgressReporter};
pub use runner::Pipeline;
