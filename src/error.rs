//! Error types for idle-notifier
//!
//! Every failure maps onto one [`ErrorKind`]. The supervisor uses the
//! kind to decide between reconnecting and giving up on an account.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Store migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network drop, timeout or peer abort. Reconnect after a delay.
    Transient,
    /// Bad credentials, bad settings or anything unclassified. Ends
    /// the account loop.
    Fatal,
    /// The dedup store failed. Aborts the current pass only.
    Persistence,
    /// A notification target failed. Never escapes the fan-out.
    Delivery,
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLost(_) | Self::Io(_) => ErrorKind::Transient,
            Self::Auth(_)
            | Self::Imap(_)
            | Self::Config(_)
            | Self::Tls(_)
            | Self::Toml(_)
            | Self::Internal(_) => ErrorKind::Fatal,
            Self::Store(_) | Self::Migration(_) => ErrorKind::Persistence,
            Self::Notify(_) | Self::Http(_) => ErrorKind::Delivery,
        }
    }

    /// Whether the account loop should reconnect instead of stopping.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Map an `async-imap` error, keeping transport failures
    /// recoverable.
    pub(crate) fn from_imap(context: &str, err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;

        match err {
            ImapError::Io(e) => Self::ConnectionLost(format!("{context}: {e}")),
            ImapError::ConnectionLost => Self::ConnectionLost(context.to_string()),
            other => Self::Imap(format!("{context}: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
