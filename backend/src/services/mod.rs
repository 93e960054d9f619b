pub mod email;
pub mod webhook;

pub use email::{DisabledEmailSender, EmailError, EmailSender, EmailService, OutgoingEmail};
pub use webhook::{WebhookClient, WebhookEnvelope};
