//! Monitored account identity and connection settings

use crate::notify::Notifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How the IMAP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// TLS from the first byte (usually port 993).
    #[default]
    Implicit,
    /// Plaintext greeting, then STARTTLS (usually port 143).
    StartTls,
}

impl TlsMode {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Implicit => 993,
            Self::StartTls => 143,
        }
    }
}

/// Identity of one monitored mailbox folder.
///
/// IMAP UIDs are only unique within one folder of one account, so
/// this is the first half of every dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AccountId {
    pub user: String,
    pub host: String,
    pub folder: String,
}

impl AccountId {
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            folder: folder.into(),
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user, self.host, self.folder)
    }
}

/// Wrapper that keeps passwords out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// A fully resolved account/folder pair, immutable for the lifetime
/// of one configuration snapshot.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub password: Password,
    pub port: u16,
    pub tls: TlsMode,
    /// Skip certificate verification (self-signed bridges, tests).
    pub accept_invalid_certs: bool,
    /// Targets notified for this account: its own or the global set.
    pub notifier: Arc<Notifier>,
}

impl Account {
    /// Key under which this account's messages are recorded in the
    /// dedup store.
    #[must_use]
    pub fn store_key(&self) -> String {
        self.id.to_string()
    }
}
