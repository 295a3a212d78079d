use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

pub const MAILGUN_API_BASE: &str = "https://api.mailgun.net/v3";

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, text: &str) -> Result<()>;
}

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, subject: &str, text: &str) -> Result<()> {
        info!(%recipient, %subject, %text, "outgoing email (not delivered)");
        Ok(())
    }
}

pub struct MailgunMailer {
    http: reqwest::Client,
    api_base: String,
    domain: String,
    api_key: String,
    sender: String,
}

impl MailgunMailer {
    pub fn new(domain: String, api_key: String, sender: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: MAILGUN_API_BASE.to_string(),
            domain,
            api_key,
            sender,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn from_header(&self) -> String {
        format!("No Reply <{}@{}>", self.sender, self.domain)
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, recipient: &str, subject: &str, text: &str) -> Result<()> {
        let url = format!(
            "{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.domain
        );
        let from = self.from_header();
        self.http
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", from.as_str()),
                ("to", recipient),
                ("subject", subject),
                ("text", text),
            ])
            .send()
            .await
            .with_context(|| format!("failed to reach mail api at {url}"))?
            .error_for_status()
            .with_context(|| format!("mail api rejected message to {recipient}"))?;
        info!(%recipient, %subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct Outbox {
    pub(crate) sent: tokio::sync::Mutex<Vec<(String, String, String)>>,
}

#[cfg(test)]
impl Outbox {
    /// The code from the most recent message, as the user would read it.
    pub(crate) async fn last_code(&self) -> String {
        let sent = self.sent.lock().await;
        let (_, _, text) = sent.last().expect("an email was sent");
        text.trim_start_matches("Please enter the code ")
            .split_whitespace()
            .next()
            .expect("code")
            .to_string()
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, recipient: &str, subject: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .await
            .push((recipient.into(), subject.into(), text.into()));
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/mailer_tests.rs"]
mod tests;
