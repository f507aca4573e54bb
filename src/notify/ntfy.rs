//! ntfy target
//!
//! POSTs the sender as the message body with the subject in the
//! `Title` header. Topics protected by access tokens get a bearer
//! `Authorization` header.

use super::{BackendKind, NotificationTarget};
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, HeaderValue};

#[derive(Debug, Clone)]
pub struct Ntfy {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl Ntfy {
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String, token: Option<String>) -> Self {
        Self { client, url, token }
    }

    async fn post(&self, sender: &str, subject: &str) -> Result<()> {
        // Non-ASCII subjects go out as raw UTF-8, which ntfy accepts.
        let title = HeaderValue::from_bytes(subject.as_bytes())
            .map_err(|e| Error::Notify(format!("Subject is not a valid header value: {e}")))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Title", title)
            .body(sender.as_bytes().to_vec());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Notify(format!("ntfy returned {status}")))
        }
    }
}

impl NotificationTarget for Ntfy {
    fn kind(&self) -> BackendKind {
        BackendKind::Ntfy
    }

    fn label(&self) -> String {
        format!("ntfy {}", self.url)
    }

    fn send<'a>(&'a self, sender: &'a str, subject: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(sender, subject))
    }
}
