//! Classification of responses received while idling
//!
//! During IDLE the server pushes untagged lines. Only two of them
//! matter: `* n EXISTS` means new mail, `* BYE` means the server is
//! dropping the session. Everything else (`EXPUNGE`, `FETCH` flag
//! updates, `OK` keepalives) keeps the wait going.
//!
//! Outside IDLE the server piggybacks the same `EXISTS` on the
//! response to whatever command runs next. The client queues those
//! and [`announces_new_mail`] reads the queue.

use async_imap::imap_proto::{MailboxDatum, Response, Status};
use async_imap::types::UnsolicitedResponse;

/// What a single pushed response means for the waiting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// The folder grew; stop idling and look for unseen mail.
    NewMail,
    /// The server ended the session.
    PeerAbort,
    /// Anything else. Keep waiting.
    Other,
}

impl IdleEvent {
    #[must_use]
    pub fn classify(response: &Response<'_>) -> Self {
        match response {
            Response::MailboxData(MailboxDatum::Exists(_)) => Self::NewMail,
            Response::Data {
                status: Status::Bye,
                ..
            } => Self::PeerAbort,
            _ => Self::Other,
        }
    }
}

/// Whether any queued response reported a grown folder. Consumes the
/// whole queue. `RECENT` always travels with an `EXISTS`, so it is not
/// counted on its own.
#[must_use]
pub fn announces_new_mail(queued: impl IntoIterator<Item = UnsolicitedResponse>) -> bool {
    queued.into_iter().fold(false, |grown, response| {
        grown | matches!(response, UnsolicitedResponse::Exists(_))
    })
}
