//! IMAP IDLE mail notifier
//!
//! Watches one or more IMAP folders with IDLE and sends exactly one
//! push notification (ntfy, Pushover, Gotify) per new message. Which
//! messages were already notified is recorded in a small SQLite
//! database, so restarts and reconnects never notify twice.
//!
//! The usual entry point is [`Settings`] → [`Resolved`] →
//! [`Supervisor::run`].

pub mod account;
pub mod backoff;
pub mod config;
pub mod connection;
mod error;
pub mod headers;
pub mod idle;
pub mod notify;
pub mod session;
pub mod status;
pub mod store;
pub mod supervisor;

pub use account::{Account, AccountId, Password, TlsMode};
pub use config::{Capabilities, Resolved, Settings};
pub use error::{Error, ErrorKind, Result};
pub use notify::{BackendKind, FanOutReport, NotificationTarget, Notifier, TargetSlot};
pub use session::{PassReport, Session, SessionContext, WaitOutcome};
pub use status::{AccountStatus, SessionState, StatusBoard};
pub use store::DedupStore;
pub use supervisor::{FatalPolicy, RunSummary, Supervisor, SupervisorSettings};
