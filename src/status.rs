//! Per-account status for operators
//!
//! Sessions and the supervisor write here; whoever exposes status to
//! operators (a signal handler, an HTTP endpoint) only reads
//! snapshots.

use crate::account::AccountId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Lifecycle state of one protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected with the folder selected; waiting for mail.
    Ready,
    Processing,
    Terminating,
    /// The account loop gave up after a fatal error.
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Processing)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountStatus {
    pub account: String,
    pub state: SessionState,
    pub connected: bool,
    /// Last time a wait completed or a pass ran.
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub notified: u64,
    pub reconnects: u64,
}

/// Shared, cheaply cloneable status table.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<AccountId, AccountStatus>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: &AccountId, f: impl FnOnce(&mut AccountStatus)) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(id.clone()).or_insert_with(|| AccountStatus {
            account: id.to_string(),
            ..AccountStatus::default()
        });
        f(entry);
    }

    pub fn register(&self, id: &AccountId) {
        self.update(id, |_| {});
    }

    pub fn set_state(&self, id: &AccountId, state: SessionState) {
        self.update(id, |s| {
            s.state = state;
            s.connected = state.is_connected();
        });
    }

    pub fn touch(&self, id: &AccountId) {
        self.update(id, |s| s.last_check = Some(Utc::now()));
    }

    pub fn record_error(&self, id: &AccountId, error: &str) {
        self.update(id, |s| s.last_error = Some(error.to_string()));
    }

    pub fn record_notified(&self, id: &AccountId) {
        self.update(id, |s| s.notified += 1);
    }

    pub fn record_reconnect(&self, id: &AccountId) {
        self.update(id, |s| s.reconnects += 1);
    }

    #[must_use]
    pub fn get(&self, id: &AccountId) -> Option<AccountStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All accounts, ordered by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AccountStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
