//! Outbound e-mail: role summaries, sender receipts and digests.

pub mod digest;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod transport;

pub use digest::{build_digest, Digest};
pub use dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher, GroupResult};
pub use error::NotificationError;
pub use handler::{NotifyHandler, NotifyJob};
pub use message::{EmailMessage, Rejection};
pub use transport::{HttpMailTransport, MailTransport, SandboxTransport};
