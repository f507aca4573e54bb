//! Gotify target
//!
//! The application token travels as a `token` query parameter; the
//! payload is JSON.

use super::{BackendKind, NotificationTarget};
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use serde::Serialize;

pub const DEFAULT_PRIORITY: u8 = 5;

#[derive(Debug, Clone)]
pub struct Gotify {
    client: reqwest::Client,
    url: String,
    token: String,
    priority: u8,
}

#[derive(Serialize)]
struct Payload<'a> {
    title: &'a str,
    message: String,
    priority: u8,
}

impl Gotify {
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String, token: String, priority: u8) -> Self {
        Self {
            client,
            url,
            token,
            priority,
        }
    }

    async fn post(&self, sender: &str, subject: &str) -> Result<()> {
        let payload = Payload {
            title: subject,
            message: format!("From: {sender}\nSubject: {subject}"),
            priority: self.priority,
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("token", self.token.as_str())])
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Notify(format!("Gotify returned {status}")))
        }
    }
}

impl NotificationTarget for Gotify {
    fn kind(&self) -> BackendKind {
        BackendKind::Gotify
    }

    fn label(&self) -> String {
        format!("gotify {}", self.url)
    }

    fn send<'a>(&'a self, sender: &'a str, subject: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(sender, subject))
    }
}
