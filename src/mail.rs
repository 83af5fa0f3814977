//! Outbound mail seam for verification and password-reset links.
//!
//! Delivery transport is out of scope; implementations decide how a message
//! leaves the process (SMTP, API, broker). The default `LogMailSender` logs
//! the payload and returns `Ok`, which is what local development wants.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to_email: String,
    pub template: &'static str,
    pub payload_json: String,
}

/// Mail delivery abstraction.
pub trait MailSender: Send + Sync {
    /// Deliver a message or return an error so the failure gets logged.
    fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real mail.
#[derive(Clone, Debug)]
pub struct LogMailSender;

impl MailSender for LogMailSender {
    fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "mail send stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_accepts_messages() {
        let sender = LogMailSender;
        let message = MailMessage {
            to_email: "alice@example.com".to_string(),
            template: "verify_email",
            payload_json: "{}".to_string(),
        };
        assert!(sender.send(&message).is_ok());
    }
}
