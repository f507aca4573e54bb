//! LOGOUT command handler: untagged BYE, then the tagged OK.

use crate::fake_imap::io::{write_line, write_tagged};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(tag: &str, stream: &mut BufReader<S>) {
    let _ = write_line(stream, "* BYE Logging out").await;
    let _ = write_tagged(stream, tag, "OK", "LOGOUT completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::capture;

    #[tokio::test]
    async fn bye_comes_before_ok() {
        let output = capture(|mut s| async move { handle_logout("X1", &mut s).await }).await;
        let bye = output.find("* BYE").unwrap();
        let ok = output.find("X1 OK LOGOUT completed").unwrap();
        assert!(bye < ok);
    }
}
