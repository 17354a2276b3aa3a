//! Report intake: inbound e-mail webhook and watched folders.

pub mod folder;
pub mod tenant;
pub mod webhook;

pub use folder::FolderIntake;
pub use tenant::resolve_tenant;
pub use webhook::{InboundAttachment, InboundEmail, WebhookIntake, WebhookResponse};
