//! Outgoing email: transport selection in [`sendmail`], message kinds in
//! [`mails`].
pub mod mails;
pub mod sendmail;

pub use mails::EmailKind;
pub use sendmail::{MailError, Mailer, OutgoingMail};
