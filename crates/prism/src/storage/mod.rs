pub mod filesystem;

pub use filesystem::{IntakeStorage, ARCHIVE_DIR, ERRORS_DIR};
