//! Email decoding: raw RFC 5322 / MIME bytes into the fields the pipeline uses.

use lazy_static::lazy_static;
use mail_parser::{MessageParser, PartType};
use regex::bytes::Regex;
use tracing::debug;

use crate::error::{IngestError, IngestResult};

lazy_static! {
    // First line must be a header field: printable ASCII name (no colon), then ':'.
    static ref HEADER_FIELD: Regex = Regex::new(r"^[\x21-\x39\x3B-\x7E]+:").unwrap();
}

/// Fields pulled from a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    pub subject: Option<String>,
    pub body: String,
    pub sender: Option<String>,
    pub message_id: Option<String>,
}

/// Stateless decoder around `mail_parser`.
#[derive(Debug, Default, Clone)]
pub struct EmailDecoder;

impl EmailDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw` and select its first `text/plain` body part.
    ///
    /// HTML alternatives are skipped and never converted to text.
    pub fn decode(&self, raw: &[u8]) -> IngestResult<DecodedEmail> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestError::Parse("empty message".to_string()));
        }
        if !HEADER_FIELD.is_match(raw) {
            return Err(IngestError::Parse(
                "message does not start with a header field".to_string(),
            ));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| IngestError::Parse("unparsable MIME message".to_string()))?;

        if message.headers().is_empty() {
            return Err(IngestError::Parse("message has no header section".to_string()));
        }

        let body = message
            .text_bodies()
            .find_map(|part| match &part.body {
                PartType::Text(text) => Some(text.to_string()),
                _ => None,
            })
            .ok_or_else(|| IngestError::Parse("message has no text/plain body part".to_string()))?;

        let subject = message.subject().map(str::to_string);
        let sender = message
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.address())
            .map(str::to_string);
        let message_id = message
            .message_id()
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|id| !id.is_empty());

        debug!(
            "Decoded email: subject={:?}, sender={:?}, body_len={}",
            subject,
            sender,
            body.len()
        );

        Ok(DecodedEmail {
            subject,
            body,
            sender,
            message_id,
        })
    }
}
