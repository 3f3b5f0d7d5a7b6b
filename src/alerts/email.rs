//! Outbound email channel

use anyhow::Result;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EmailConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Result of a single send. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl EmailOutcome {
    pub fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: OutgoingEmail) -> EmailOutcome;
}

fn new_message_id() -> String {
    format!("<{}@citguard>", Uuid::new_v4())
}

/// SMTP delivery through a STARTTLS relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(config.username.clone(), config.password.clone()));
        }
        let from: Mailbox = config.from_address.parse()?;

        info!("SMTP mailer configured for {}:{}", config.smtp_host, config.smtp_port);
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send_email(&self, email: OutgoingEmail) -> EmailOutcome {
        let to: Mailbox = match email.to.parse() {
            Ok(to) => to,
            Err(e) => return EmailOutcome::failed(format!("invalid recipient '{}': {}", email.to, e)),
        };

        let message_id = new_message_id();
        let message = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
        {
            Ok(message) => message,
            Err(e) => return EmailOutcome::failed(format!("failed to build message: {}", e)),
        };

        match self.transport.send(message).await {
            Ok(_) => EmailOutcome::sent(message_id),
            Err(e) => EmailOutcome::failed(e.to_string()),
        }
    }
}

/// Stand-in used when SMTP is disabled; logs instead of sending
pub struct LogMailer;

#[async_trait]
impl EmailSender for LogMailer {
    async fn send_email(&self, email: OutgoingEmail) -> EmailOutcome {
        let message_id = new_message_id();
        info!(to = %email.to, subject = %email.subject, "Email (not sent, SMTP disabled)");
        debug!("{}", email.text);
        EmailOutcome::sent(message_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every send; addresses in `failing` report a failure
    #[derive(Default)]
    pub struct RecordingMailer {
        pub failing: HashSet<String>,
        pub sent: Mutex<Vec<OutgoingEmail>>,
    }

    impl RecordingMailer {
        pub fn failing_for(addresses: &[&str]) -> Self {
            Self {
                failing: addresses.iter().map(|a| a.to_string()).collect(),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn delivered_to(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send_email(&self, email: OutgoingEmail) -> EmailOutcome {
            if self.failing.contains(&email.to) {
                return EmailOutcome::failed("connection refused");
            }
            self.sent.lock().unwrap().push(email);
            EmailOutcome::sent(new_message_id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_reports_success() {
        let outcome = LogMailer
            .send_email(OutgoingEmail {
                to: "ops@example.com".to_string(),
                subject: "test".to_string(),
                html: "<p>test</p>".to_string(),
                text: "test".to_string(),
            })
            .await;
        assert!(outcome.success);
        assert!(outcome.message_id.unwrap().ends_with("@citguard>"));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_from() {
        let config = EmailConfig {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            from_address: "not an address".to_string(),
            ..EmailConfig::default()
        };
        assert!(SmtpMailer::new(&config).is_err());
    }
}
