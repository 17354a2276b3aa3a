//! Domain records shared across the pipeline stages.

pub mod classification;
pub mod insight;
pub mod report;
pub mod task;

pub use classification::{Classification, DocumentType};
pub use insight::{Insight, InsightBundle, InsightItem, InsightKind, InsightPriority, ProposedTask};
pub use report::{LogStatus, ProcessingLogEntry, Report, ReportSource, ReportStatus};
pub use task::{max_due_days, Role, Task, TaskStatus, MAX_TASK_HOURS, MIN_TASK_HOURS};
