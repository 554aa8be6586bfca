/// Outbound account notifications (verification and password reset mail)
use crate::config::EmailSettings;
use crate::error::{IdentityError, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Delivery channel for account emails
///
/// Failures are reported to the caller, which decides whether they matter;
/// account flows treat delivery as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_email(&self, recipient: &str, token: &str) -> Result<()>;
    async fn send_password_reset_email(&self, recipient: &str, token: &str) -> Result<()>;
}

/// SMTP notifier backed by lettre
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    verification_base_url: Option<String>,
    password_reset_base_url: Option<String>,
}

impl SmtpNotifier {
    /// Build the notifier from configuration
    ///
    /// If SMTP host is empty, operates in no-op mode (logs only).
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; notifier will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| {
                IdentityError::Internal(format!("Failed to configure SMTP transport: {}", e))
            })?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            verification_base_url: config.verification_base_url.clone(),
            password_reset_base_url: config.password_reset_base_url.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn build_verification_link(&self, token: &str) -> String {
        let token = urlencoding::encode(token);
        match &self.verification_base_url {
            Some(base) if !base.is_empty() => format!("{base}?token={token}"),
            _ => format!("http://localhost:3000/verify-email?token={token}"),
        }
    }

    fn build_password_reset_link(&self, token: &str) -> String {
        let token = urlencoding::encode(token);
        match &self.password_reset_base_url {
            Some(base) if !base.is_empty() => format!("{base}?token={token}"),
            _ => format!("http://localhost:3000/reset-password?token={token}"),
        }
    }

    async fn send_message(&self, recipient: &str, subject: &str, build: MailBody<'_>) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                subject,
                recipient, "Notifier running in no-op mode; skipping actual send"
            );
            return Ok(());
        };

        let to = recipient.parse::<Mailbox>().map_err(|e| {
            IdentityError::Internal(format!("Invalid recipient email address: {}", e))
        })?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);

        let email = match build {
            MailBody::Text(body) => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(body.to_string()),
            MailBody::Html { html, text } => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            ),
        }
        .map_err(|e| IdentityError::Internal(format!("Failed to build email message: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| IdentityError::Internal(format!("Failed to send email: {}", e)))?;
        info!(subject, "email sent successfully");
        Ok(())
    }
}

enum MailBody<'a> {
    Text(&'a str),
    Html { html: &'a str, text: &'a str },
}

#[async_trait]
impl Notifier for SmtpNotifier {
    /// Send verification email with activation link
    ///
    /// ## Arguments
    ///
    /// * `recipient` - Email address
    /// * `token` - Raw verification token
    async fn send_verification_email(&self, recipient: &str, token: &str) -> Result<()> {
        let link = self.build_verification_link(token);
        let body = format!(
            "Welcome!\n\nPlease click the following link to complete your email verification:\n{}\n\nIf you did not request this, please ignore this email.",
            link
        );
        self.send_message(recipient, "Verify your account", MailBody::Text(&body))
            .await
    }

    async fn send_password_reset_email(&self, recipient: &str, token: &str) -> Result<()> {
        let link = self.build_password_reset_link(token);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
    <h2>Password Reset Request</h2>
    <p>We received your password reset request.</p>
    <p style="margin: 30px 0;">
        <a href="{link}" style="background-color: #000; color: #fff; padding: 14px 28px; text-decoration: none; border-radius: 25px; display: inline-block;">Reset Password</a>
    </p>
    <p style="color: #999; font-size: 12px; margin-top: 30px;">
        This link will expire in 1 hour.<br>
        If you did not request this, please ignore this email.
    </p>
</body>
</html>"#
        );

        let text = format!(
            "We received your password reset request.\n\n\
            Please click the following link to reset your password:\n{}\n\n\
            This link will expire in 1 hour.\n\
            If you did not request this, please ignore this email.",
            link
        );

        self.send_message(
            recipient,
            "Password Reset",
            MailBody::Html {
                html: &html,
                text: &text,
            },
        )
        .await
    }
}

/// Kind of notification captured by `RecordingNotifier`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Verification,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub token: String,
}

/// In-process notifier that keeps every message; used by tests and local tooling
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Token of the most recent notification of `kind` sent to `recipient`
    pub fn last_token(&self, kind: NotificationKind, recipient: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.kind == kind && n.recipient == recipient)
            .map(|n| n.token)
    }

    fn push(&self, kind: NotificationKind, recipient: &str, token: &str) {
        let entry = SentNotification {
            kind,
            recipient: recipient.to_string(),
            token: token.to_string(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_verification_email(&self, recipient: &str, token: &str) -> Result<()> {
        self.push(NotificationKind::Verification, recipient, token);
        Ok(())
    }

    async fn send_password_reset_email(&self, recipient: &str, token: &str) -> Result<()> {
        self.push(NotificationKind::PasswordReset, recipient, token);
        Ok(())
    }
}
