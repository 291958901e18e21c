use anyhow::{Context, Result};
use lettre::message::Mailbox as Address;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::{Config, ALERT_SUBJECT};

const SMTP_SERVER: &str = "smtp.gmail.com";

/// Send a single alert to the operator's own mailbox. Only called on
/// unrecoverable pipeline failure.
pub fn send_failure_alert(config: &Config, error_text: &str) -> Result<()> {
    let operator: Address = config
        .username
        .parse()
        .context("Invalid operator email address")?;

    let email = Message::builder()
        .from(operator.clone())
        .to(operator)
        .subject(ALERT_SUBJECT)
        .body(format!(
            "The job application tracker encountered an error:\n\n{error_text}\n\nPlease check the logs."
        ))
        .context("Failed to build alert email")?;

    let creds = Credentials::new(config.username.clone(), config.app_password.clone());
    let mailer = SmtpTransport::relay(SMTP_SERVER)
        .context("Failed to configure SMTP relay")?
        .credentials(creds)
        .build();

    mailer.send(&email).context("Failed to send alert email")?;
    Ok(())
}
