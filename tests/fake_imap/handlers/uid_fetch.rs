//! UID FETCH command handler.
//!
//! Message data is sent as a counted literal:
//!
//! ```text
//! * <seq> FETCH (UID <uid> BODY[HEADER] {<length>}
//! <exactly length bytes>
//! )
//! ```
//!
//! `BODY.PEEK[HEADER]` returns only the header block and leaves the
//! `\Seen` flag alone. Anything else returns the whole message as
//! `BODY[]` and marks it seen, like a real server would.

use crate::fake_imap::io::{write_literal, write_tagged};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// What the client asked for, taken from the raw command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    PeekHeader,
    FullBody,
}

impl FetchItem {
    pub fn from_command_line(line: &str) -> Self {
        if line.to_ascii_uppercase().contains("BODY.PEEK[HEADER]") {
            Self::PeekHeader
        } else {
            Self::FullBody
        }
    }
}

/// Single UIDs only; that is what a per-message fetch sends.
pub fn extract_uids(seq_set: &SequenceSet) -> Vec<u32> {
    seq_set
        .0
        .as_ref()
        .iter()
        .filter_map(|seq| match seq {
            Sequence::Single(SeqOrUid::Value(v)) => Some(v.get()),
            _ => None,
        })
        .collect()
}

pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    item: FetchItem,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let responses: Option<Vec<(String, Vec<u8>)>> = {
        let mut mailbox = mailbox.lock().unwrap();
        selected_folder
            .and_then(|name| mailbox.get_folder_mut(name))
            .map(|folder| {
                let mut out = Vec::new();
                for uid in extract_uids(sequence_set) {
                    let Some(idx) = folder.messages.iter().position(|m| m.uid == uid) else {
                        continue;
                    };
                    let message = &mut folder.messages[idx];
                    let seq = idx + 1;
                    let (section, data) = match item {
                        FetchItem::PeekHeader => ("BODY[HEADER]", message.header().to_vec()),
                        FetchItem::FullBody => {
                            message.seen = true;
                            ("BODY[]", message.raw.clone())
                        }
                    };
                    out.push((format!("* {seq} FETCH (UID {uid} {section}"), data));
                }
                out
            })
    };

    let Some(responses) = responses else {
        let _ = write_tagged(stream, tag, "BAD", "No folder selected").await;
        return;
    };

    for (prefix, data) in &responses {
        if write_literal(stream, prefix, data).await.is_err() {
            return;
        }
    }
    let _ = write_tagged(stream, tag, "OK", "FETCH completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::capture;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use std::num::NonZeroU32;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Test\r\n\r\nBody";

    fn uid_set(uid: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(uid).unwrap()))]
                .try_into()
                .unwrap(),
        )
    }

    fn mailbox() -> Mutex<Mailbox> {
        Mutex::new(MailboxBuilder::new().folder("INBOX").unseen(42, RAW).build())
    }

    #[test]
    fn detects_peek_header() {
        assert_eq!(
            FetchItem::from_command_line("A5 UID FETCH 42 (UID BODY.PEEK[HEADER])"),
            FetchItem::PeekHeader
        );
        assert_eq!(
            FetchItem::from_command_line("A5 UID FETCH 42 BODY[]"),
            FetchItem::FullBody
        );
    }

    #[tokio::test]
    async fn peek_header_sends_only_headers() {
        let mailbox = mailbox();
        let mb = &mailbox;
        let output = capture(|mut s| async move {
            handle_uid_fetch("A1", &uid_set(42), FetchItem::PeekHeader, mb, Some("INBOX"), &mut s)
                .await;
        })
        .await;

        assert!(output.starts_with("* 1 FETCH (UID 42 BODY[HEADER] {32}\r\n"));
        assert!(!output.contains("Body"));
        assert!(output.ends_with("A1 OK FETCH completed\r\n"));
        assert!(!mailbox.lock().unwrap().get_folder("INBOX").unwrap().messages[0].seen);
    }

    #[tokio::test]
    async fn full_fetch_marks_seen() {
        let mailbox = mailbox();
        let mb = &mailbox;
        let output = capture(|mut s| async move {
            handle_uid_fetch("A1", &uid_set(42), FetchItem::FullBody, mb, Some("INBOX"), &mut s)
                .await;
        })
        .await;

        assert!(output.contains("BODY[] {36}"));
        assert!(mailbox.lock().unwrap().get_folder("INBOX").unwrap().messages[0].seen);
    }

    #[tokio::test]
    async fn missing_uid_returns_only_ok() {
        let mailbox = mailbox();
        let mb = &mailbox;
        let output = capture(|mut s| async move {
            handle_uid_fetch("A1", &uid_set(99), FetchItem::PeekHeader, mb, Some("INBOX"), &mut s)
                .await;
        })
        .await;
        assert_eq!(output, "A1 OK FETCH completed\r\n");
    }
}
