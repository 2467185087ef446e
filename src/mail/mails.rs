use super::sendmail::{MailError, Mailer};
use crate::{models::User, templates};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Welcome,
    PasswordReset,
}

impl EmailKind {
    pub fn subject(&self) -> &'static str {
        match self {
            EmailKind::Welcome => "Welcome to the Natours Family!",
            EmailKind::PasswordReset => "Your password reset token (valid for only 10 minutes)",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            EmailKind::Welcome => templates::EMAIL_WELCOME,
            EmailKind::PasswordReset => templates::EMAIL_PASSWORD_RESET,
        }
    }
}

/// First word of the user's name.
fn first_name(user: &User) -> &str {
    user.name.split_whitespace().next().unwrap_or(&user.name)
}

impl Mailer {
    /// Render the `kind` template for `user` and send it. `url` is the
    /// link the message points to; it is built from configuration and is
    /// inserted as is.
    pub async fn send(&self, user: &User, kind: EmailKind, url: &str) -> Result<(), MailError> {
        let html = templates::fill(
            kind.template(),
            &[
                ("first_name", templates::escape(first_name(user)).as_str()),
                ("url", url),
            ],
        );
        self.send_email(&user.email, kind.subject(), html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_mail_carries_the_link() {
        let mailer = Mailer::log_only("Natours <hello@natours.io>".parse().unwrap());
        let user = User::new("Jonas Schmedtmann".to_string(), "jonas@example.com", "x".to_string());

        mailer
            .send(&user, EmailKind::PasswordReset, "http://localhost:3000/api/v1/users/resetPassword/abc")
            .await
            .unwrap();

        let mail = &mailer.outbox()[0];
        assert_eq!(mail.subject, EmailKind::PasswordReset.subject());
        assert!(mail.html.contains("Hi Jonas,"));
        assert!(mail.html.contains("/api/v1/users/resetPassword/abc"));
    }
}
