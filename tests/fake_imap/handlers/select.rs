//! SELECT command handler.
//!
//! Sends the folder metadata a real server sends (FLAGS, EXISTS,
//! RECENT, UIDVALIDITY, UIDNEXT) and returns the selected folder name,
//! or `None` with a tagged NO if it does not exist.

use crate::fake_imap::io::{write_line, write_tagged};
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<String> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let _ = write_tagged(stream, tag, "NO", "[NONEXISTENT] Folder not found").await;
        return None;
    };

    let uidnext = folder
        .messages
        .iter()
        .map(|m| m.uid)
        .max()
        .map_or(1, |max| max + 1);
    let lines = [
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)".to_string(),
        format!("* {} EXISTS", folder.messages.len()),
        "* 0 RECENT".to_string(),
        "* OK [UIDVALIDITY 1] UIDs valid".to_string(),
        format!("* OK [UIDNEXT {uidnext}] Predicted next UID"),
    ];
    for line in &lines {
        if write_line(stream, line).await.is_err() {
            return None;
        }
    }

    let _ = write_tagged(stream, tag, "OK", "[READ-WRITE] SELECT completed").await;
    Some(folder_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::capture;
    use crate::fake_imap::mailbox::MailboxBuilder;

    #[tokio::test]
    async fn selects_existing_folder() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .unseen(5, b"a")
            .seen(10, b"b")
            .build();

        let output = capture(|mut s| async move {
            let selected = handle_select("A1", "INBOX", &mailbox, &mut s).await;
            assert_eq!(selected.as_deref(), Some("INBOX"));
        })
        .await;

        assert!(output.contains("* 2 EXISTS"));
        assert!(output.contains("[UIDNEXT 11]"));
        assert!(output.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn missing_folder_is_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let output = capture(|mut s| async move {
            assert!(handle_select("A1", "Nope", &mailbox, &mut s).await.is_none());
        })
        .await;

        assert!(output.starts_with("A1 NO"));
    }
}
