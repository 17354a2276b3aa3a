pub mod analysis;
pub mod app;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod intake;
pub mod llm;
pub mod logging;
pub mod model;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod watcher;

pub use app::Services;
pub use broadcast::{ReportEvent, ReportEventBroadcaster};
pub use config::{load_config, Config};
pub use error::{ConfigError, ExtractError, PrismError, QueueError, Result, StorageError, WatchError};
pub use intake::{WebhookIntake, WebhookResponse};
pub use pipeline::{Analysis, Pipeline};
pub use queue::{JobQueue, Lane, QueueStats};
