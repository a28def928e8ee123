use chrono::Local;
use serde::{Deserialize, Serialize};

/// One inbound frame, relayed untouched to every recipient.
///
/// The relay never inspects the contents. Text and binary frames keep their
/// kind so a text frame is never re-sent as binary or vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// JSON envelope the publishing client wraps lines in when it is given a
/// speaker label. The relay itself treats it like any other text frame.
///
/// Publishers that stream from files leave the timestamp out entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: String,
    pub text: String,
    /// Local wall-clock time, formatted with [`TIMESTAMP_FORMAT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TranscriptLine {
    pub fn now(speaker: &str, text: &str) -> Self {
        Self {
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp: Some(Local::now().format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Returns `None` for anything that is not a transcript envelope.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}
