//! Outbound result notifications: a confirmation to the registrant when
//! everything checks out, an alert to the operator when something does not.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpSettings;
use crate::response::ValidationResponse;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
            .credentials(Credentials::new(
                settings.user.clone(),
                settings.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: settings.from_address.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)?;
        self.transport.send(message).await?;
        tracing::info!(to = %email.to, subject = %email.subject, "notification sent");
        Ok(())
    }
}

/// Build the notification for a handled submission. `None` when there is
/// nobody to write to (a passing submission without a registrant address).
pub fn compose_notification(
    res: &ValidationResponse,
    operator_address: &str,
) -> Option<OutboundEmail> {
    let s = &res.submission;
    if res.overall_success() {
        let to = s.email.clone()?;
        let body = format!(
            "Dear {},\n\n\
             Thank you for registering for our course! Here are your registration details:\n\
             - Form ID: {}\n\
             - Submission ID: {}\n\
             - Full Name: {}\n\
             - Email: {}\n\
             - Phone Number: {}\n\n\
             We look forward to seeing you in the course!\n\n\
             Best regards,\n\
             The Registration Team\n",
            s.full_name,
            s.form_id.as_deref().unwrap_or("-"),
            s.submission_id.as_deref().unwrap_or("-"),
            s.full_name,
            to,
            s.phone_number.as_deref().unwrap_or("-"),
        );
        Some(OutboundEmail {
            to,
            subject: "Registration Confirmation: Welcome to Our Course!".to_string(),
            body,
        })
    } else {
        let form_id = s.form_id.as_deref().unwrap_or("-");
        let submission_id = s.submission_id.as_deref().unwrap_or("-");
        let body = format!(
            "An error occurred during form submission:\n\
             - Errors: {}\n\
             - Form ID: {form_id}\n\
             - Submission ID: {submission_id}\n\
             - Full Name: {}\n\
             - Email Address: {}\n\
             - Phone Number: {}\n\n\
             Please address these issues as soon as possible.\n\n\
             The customer form detail: https://www.jotform.com/inbox/{form_id}/{submission_id}\n\n\
             Course table: https://www.jotform.com/tables/{form_id}\n",
            res.failure_reasons().join(" / "),
            s.full_name,
            s.email.as_deref().unwrap_or("-"),
            s.phone_number.as_deref().unwrap_or("-"),
        );
        Some(OutboundEmail {
            to: operator_address.to_string(),
            subject: "Error in Form Submission - Action Required".to_string(),
            body,
        })
    }
}

/// Test double that records everything it is asked to send.
#[cfg(test)]
pub struct RecordingMailer {
    pub sent: tokio::sync::Mutex<Vec<OutboundEmail>>,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn new() -> Self {
        Self { sent: tokio::sync::Mutex::new(Vec::new()) }
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        self.sent.lock().await.push(email);
        Ok(())
    }
}
