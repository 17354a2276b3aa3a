//! Typed live-update events for reports moving through the pipeline.

pub mod report_events;

pub use report_events::{
    ReportEvent, ReportEventBroadcaster, ReportPhase, ReportStatusUpdate, ReportTracker,
};
