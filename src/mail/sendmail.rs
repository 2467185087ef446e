use std::sync::{Arc, Mutex};

use lettre::{
    Message, SmtpTransport, Transport,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;

use crate::config::Config;

/// Development transport keeps this many messages.
const OUTBOX_CAPACITY: usize = 50;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message could not be built: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp transport failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("mail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("outbox lock poisoned")]
    Outbox,
}

/// A message handed to the development transport.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
enum MailTransport {
    /// STARTTLS relay
    Smtp(SmtpTransport),
    /// No relay configured: messages are logged and kept in memory.
    Log(Arc<Mutex<Vec<OutgoingMail>>>),
}

/// Sends HTML mail through SMTP when a relay is configured.
///
/// Cloning is cheap; the SMTP transport pools its connections.
#[derive(Clone)]
pub struct Mailer {
    from: Mailbox,
    transport: MailTransport,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let from: Mailbox = config.email_from.parse()?;

        let transport = match &config.smtp {
            Some(smtp) => {
                let mut builder = SmtpTransport::starttls_relay(&smtp.host)?.port(smtp.port);
                if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
                    builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                tracing::info!(host = %smtp.host, port = smtp.port, "mail goes through SMTP");
                MailTransport::Smtp(builder.build())
            }
            None => {
                tracing::info!("SMTP_HOST not set, mail is only logged");
                MailTransport::Log(Arc::new(Mutex::new(Vec::new())))
            }
        };

        Ok(Mailer { from, transport })
    }

    /// Mailer that only logs, regardless of configuration.
    pub fn log_only(from: Mailbox) -> Self {
        Mailer {
            from,
            transport: MailTransport::Log(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Messages kept by the development transport, oldest first. Always
    /// empty when sending through SMTP.
    pub fn outbox(&self) -> Vec<OutgoingMail> {
        match &self.transport {
            MailTransport::Log(outbox) => outbox.lock().map(|mails| mails.clone()).unwrap_or_default(),
            MailTransport::Smtp(_) => Vec::new(),
        }
    }

    /// Send one HTML message.
    pub async fn send_email(&self, to_email: &str, subject: &str, html: String) -> Result<(), MailError> {
        match &self.transport {
            MailTransport::Smtp(transport) => {
                let email = Message::builder()
                    .from(self.from.clone())
                    .to(to_email.parse()?)
                    .subject(subject)
                    .header(ContentType::TEXT_HTML)
                    .body(html)?;

                // lettre's SmtpTransport is blocking
                let transport = transport.clone();
                tokio::task::spawn_blocking(move || transport.send(&email)).await??;
                tracing::info!(to = %to_email, subject = %subject, "email sent");
            }
            MailTransport::Log(outbox) => {
                let _: Mailbox = to_email.parse()?;
                tracing::info!(to = %to_email, subject = %subject, "email (not sent, no SMTP relay)");
                tracing::debug!(body = %html, "email body");

                let mut mails = outbox.lock().map_err(|_| MailError::Outbox)?;
                if mails.len() >= OUTBOX_CAPACITY {
                    mails.remove(0);
                }
                mails.push(OutgoingMail {
                    to: to_email.to_string(),
                    subject: subject.to_string(),
                    html,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> Mailer {
        Mailer::log_only("Natours <hello@natours.io>".parse().unwrap())
    }

    #[tokio::test]
    async fn log_transport_keeps_messages() {
        let mailer = mailer();
        mailer
            .send_email("user@example.com", "Hello", "<p>Hi</p>".to_string())
            .await
            .unwrap();

        let outbox = mailer.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "user@example.com");
        assert_eq!(outbox[0].subject, "Hello");
    }

    #[tokio::test]
    async fn invalid_recipient_is_an_error() {
        let err = mailer()
            .send_email("not an address", "Hello", String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Address(_)));
    }

    #[tokio::test]
    async fn outbox_is_bounded() {
        let mailer = mailer();
        for i in 0..OUTBOX_CAPACITY + 5 {
            mailer
                .send_email("user@example.com", &format!("n{}", i), String::new())
                .await
                .unwrap();
        }
        let outbox = mailer.outbox();
        assert_eq!(outbox.len(), OUTBOX_CAPACITY);
        assert_eq!(outbox[0].subject, "n5");
    }
}
