//! Pushover target

use super::{BackendKind, NotificationTarget};
use crate::error::{Error, Result};
use futures::future::BoxFuture;

pub const DEFAULT_API_URL: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Clone)]
pub struct Pushover {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    user_key: String,
}

impl Pushover {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        api_url: Option<String>,
        api_token: String,
        user_key: String,
    ) -> Self {
        Self {
            client,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token,
            user_key,
        }
    }

    async fn post(&self, sender: &str, subject: &str) -> Result<()> {
        let message = format!("From: {sender}\nSubject: {subject}");
        let form = [
            ("token", self.api_token.as_str()),
            ("user", self.user_key.as_str()),
            ("message", message.as_str()),
        ];

        let response = self.client.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Notify(format!("Pushover returned {status}")))
        }
    }
}

impl NotificationTarget for Pushover {
    fn kind(&self) -> BackendKind {
        BackendKind::Pushover
    }

    fn label(&self) -> String {
        format!("pushover {}", self.api_url)
    }

    fn send<'a>(&'a self, sender: &'a str, subject: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(sender, subject))
    }
}
