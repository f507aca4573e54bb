//! Sender and subject extraction
//!
//! Only the header block is parsed. Encoded words (RFC 2047) are
//! decoded and folded lines unfolded; the body is never looked at.

use mailparse::MailHeaderMap;
use tracing::warn;

/// The two header fields a notification carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub from: Option<String>,
    pub subject: Option<String>,
}

impl Summary {
    /// Parse `From` and `Subject` from a raw RFC 5322 message or
    /// header block. Blank values count as missing.
    #[must_use]
    pub fn from_raw(raw: &[u8]) -> Self {
        let headers = match mailparse::parse_headers(raw) {
            Ok((headers, _body_offset)) => headers,
            Err(e) => {
                warn!("Unparseable message headers: {}", e);
                return Self::default();
            }
        };

        Self {
            from: non_blank(headers.get_first_value("From")),
            subject: non_blank(headers.get_first_value("Subject")),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
