//! Notification fan-out
//!
//! A [`Notifier`] sends one `(sender, subject)` pair to every target
//! it holds, one after the other. A failing target is logged and
//! skipped; it never stops the remaining targets and never turns the
//! fan-out itself into an error.

pub(crate) mod gotify;
mod ntfy;
mod pushover;

pub use gotify::Gotify;
pub use ntfy::Ntfy;
pub use pushover::Pushover;

use crate::error::Result;
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Placeholder used when a message has no `From` header.
pub const UNKNOWN_SENDER: &str = "Unknown Sender";

/// Placeholder used when a message has no `Subject` header.
pub const NO_SUBJECT: &str = "No Subject";

/// Sender shown on operator alerts about the notifier itself.
pub const ALERT_SENDER: &str = "Script Error";

/// The notification backends this build knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ntfy,
    Pushover,
    Gotify,
    /// Targets supplied programmatically rather than from config.
    Custom,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ntfy => "ntfy",
            Self::Pushover => "pushover",
            Self::Gotify => "gotify",
            Self::Custom => "custom",
        })
    }
}

/// Something that can deliver a `(sender, subject)` notification.
///
/// Implementations are stateless apart from their credentials and are
/// shared freely between sessions.
pub trait NotificationTarget: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Short human-readable label for logs (never includes secrets).
    fn label(&self) -> String;

    fn send<'a>(&'a self, sender: &'a str, subject: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// A target plus its own minimum spacing between calls.
///
/// Shared by every notifier that references the same configured
/// target, so the spacing holds across accounts.
pub struct TargetSlot {
    target: Box<dyn NotificationTarget>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl TargetSlot {
    #[must_use]
    pub fn new(target: impl NotificationTarget + 'static, min_interval: Duration) -> Self {
        Self::from_boxed(Box::new(target), min_interval)
    }

    #[must_use]
    pub fn from_boxed(target: Box<dyn NotificationTarget>, min_interval: Duration) -> Self {
        Self {
            target,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.target.kind()
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.target.label()
    }

    async fn send(&self, sender: &str, subject: &str) -> Result<()> {
        // Held across the call so concurrent sessions queue up here.
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            tokio::time::sleep_until(last + self.min_interval).await;
        }
        let result = self.target.send(sender, subject).await;
        *last_call = Some(Instant::now());
        result
    }
}

impl fmt::Debug for TargetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSlot")
            .field("target", &self.target.label())
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

/// Outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

impl FanOutReport {
    #[must_use]
    pub const fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// An ordered, immutable set of targets.
#[derive(Debug, Default)]
pub struct Notifier {
    targets: Vec<Arc<TargetSlot>>,
}

impl Notifier {
    #[must_use]
    pub const fn new(targets: Vec<Arc<TargetSlot>>) -> Self {
        Self { targets }
    }

    #[must_use]
    pub fn targets(&self) -> &[Arc<TargetSlot>] {
        &self.targets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Send to every target in order. Missing values are replaced by
    /// [`UNKNOWN_SENDER`] and [`NO_SUBJECT`].
    pub async fn send(&self, sender: Option<&str>, subject: Option<&str>) -> FanOutReport {
        let sender = sender.filter(|s| !s.trim().is_empty()).unwrap_or(UNKNOWN_SENDER);
        let subject = subject.filter(|s| !s.trim().is_empty()).unwrap_or(NO_SUBJECT);

        let mut report = FanOutReport::default();
        for slot in &self.targets {
            match slot.send(sender, subject).await {
                Ok(()) => {
                    info!(target_label = %slot.label(), "Notification sent");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(target_label = %slot.label(), "Notification failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Tell operators that something went wrong with the notifier itself.
    pub async fn alert(&self, message: &str) -> FanOutReport {
        self.send(Some(ALERT_SENDER), Some(message)).await
    }
}
