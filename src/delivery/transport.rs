//! Outbound mail transports: SendGrid HTTP API (reqwest) and SMTP (lettre).

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, Transport};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;

use crate::delivery::OutboundEmail;
use crate::error::TransportError;

/// SMTP success code reported by `SmtpTransport`.
pub const SMTP_OK: u16 = 250;

/// One delivery attempt. Statuses `>= 400` are failures, as are errors.
#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, email: &OutboundEmail) -> Result<u16, TransportError>;
}

/// SendGrid v3 `mail/send` client.
pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: SecretString,
    from_address: String,
    endpoint: String,
}

impl SendGridTransport {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.sendgrid.com/v3/mail/send";

    pub fn new(api_key: SecretString, from_address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from_address: from_address.into(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point at a different API endpoint (sandbox or test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn payload(&self, email: &OutboundEmail) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_address },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        })
    }
}

#[async_trait]
impl MailTransport for SendGridTransport {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn deliver(&self, email: &OutboundEmail) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                transport: "sendgrid".into(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status < 400 {
            info!(to = %email.to, status, "SendGrid accepted email");
        }
        Ok(status)
    }
}

/// SMTP relay via lettre.
pub struct SmtpTransport {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    from_address: String,
}

impl SmtpTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            from_address: from_address.into(),
        }
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, TransportError> {
        let from: Mailbox = self
            .from_address
            .parse()
            .map_err(|e| TransportError::InvalidAddress {
                address: self.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to: Mailbox = email.to.parse().map_err(|e| TransportError::InvalidAddress {
            address: email.to.clone(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| TransportError::RequestFailed {
                transport: "smtp".into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn deliver(&self, email: &OutboundEmail) -> Result<u16, TransportError> {
        let message = self.build_message(email)?;
        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );
        let transport = lettre::SmtpTransport::relay(&self.host)
            .map_err(|e| TransportError::RequestFailed {
                transport: "smtp".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(self.port)
            .credentials(creds)
            .build();

        // lettre's SMTP transport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| TransportError::RequestFailed {
                transport: "smtp".into(),
                reason: format!("SMTP task failed: {e}"),
            })?
            .map_err(|e| TransportError::RequestFailed {
                transport: "smtp".into(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!(to = %email.to, "Email sent via SMTP");
        Ok(SMTP_OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail {
            to: "a@x.com".into(),
            subject: "Re: aws outage".into(),
            html: "<p>hi</p>".into(),
            text: "hi".into(),
        }
    }

    #[test]
    fn sendgrid_payload_carries_both_bodies() {
        let transport = SendGridTransport::new(SecretString::from("key"), "no-reply@relay.test");
        let payload = transport.payload(&email());
        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "a@x.com");
        assert_eq!(payload["from"]["email"], "no-reply@relay.test");
        assert_eq!(payload["subject"], "Re: aws outage");
        assert_eq!(payload["content"][0]["type"], "text/plain");
        assert_eq!(payload["content"][0]["value"], "hi");
        assert_eq!(payload["content"][1]["value"], "<p>hi</p>");
    }

    #[test]
    fn smtp_rejects_invalid_recipient() {
        let transport = SmtpTransport::new(
            "smtp.test.com",
            587,
            "user",
            SecretString::from("pass"),
            "no-reply@relay.test",
        );
        let mut bad = email();
        bad.to = "not an address".into();
        assert!(matches!(
            transport.build_message(&bad),
            Err(TransportError::InvalidAddress { .. })
        ));
        assert!(transport.build_message(&email()).is_ok());
    }

    #[test]
    fn transport_names() {
        let sg = SendGridTransport::new(SecretString::from("key"), "a@b.c");
        assert_eq!(sg.name(), "sendgrid");
    }
}
