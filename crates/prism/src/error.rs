use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrismError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Provider error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Notification error: {0}")]
    Notification(#[from] crate::notification::NotificationError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Secret for {name} could not be resolved: {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse delimited text: {0}")]
    Delimited(String),

    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    #[error("No reader registered for format: {0}")]
    NoReader(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch root '{0}' does not exist")]
    MissingRoot(PathBuf),

    #[error("Failed to start file notifications: {0}")]
    Notify(String),

    #[error("Ready-file channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to encode job payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode payload of job {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Queue storage failed: {0}")]
    Storage(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, PrismError>;
