use serde::Deserialize;

/// Prefix carried by every data-bearing line of the chat stream.
pub const DATA_PREFIX: &str = "data: ";
/// Sentinel closing a streamed turn; the remainder of the line is JSON metadata.
pub const TERMINAL_PREFIX: &str = "[DONE]:";
/// Sentinel reporting a backend failure; the remainder of the line is plain text.
pub const FAILURE_PREFIX: &str = "[ERROR]:";

/// Follow-up metadata attached to the terminal line of a turn.
///
/// The backend may omit either field; absent fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TurnMetadata {
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// One classified line of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Content fragment for the open assistant message.
    Token(String),
    /// End of turn, carrying follow-up metadata.
    Terminal(TurnMetadata),
    /// Backend-reported failure text, verbatim.
    Failure(String),
}

/// Splits an incremental byte stream into complete lines.
///
/// Chunks are appended to an internal buffer and complete lines are drained
/// off; the trailing fragment stays buffered until more bytes arrive. Keeping
/// the buffer as bytes lets a multi-byte character straddle a chunk boundary.
/// One decoder instance serves one stream.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completes, in order.
    ///
    /// An empty chunk, or a chunk without a newline, completes nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(at) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=at).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Consumes the decoder at stream end, discarding any retained fragment.
    ///
    /// The protocol terminates every meaningful line with a newline, so a
    /// leftover fragment is noise worth a debug line and nothing more.
    pub fn finish(self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                bytes = self.buffer.len(),
                "stream ended with an unterminated fragment, discarding"
            );
        }
    }
}

/// Classifies one complete line of the chat stream.
///
/// Lines that do not carry the data prefix hold nothing and yield `None`.
pub fn classify_line(line: &str) -> Option<TurnEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if let Some(raw) = payload.strip_prefix(TERMINAL_PREFIX) {
        return Some(TurnEvent::Terminal(parse_turn_metadata(raw)));
    }
    if let Some(raw) = payload.strip_prefix(FAILURE_PREFIX) {
        return Some(TurnEvent::Failure(raw.to_string()));
    }
    Some(TurnEvent::Token(unescape_newlines(payload)))
}

/// Malformed metadata degrades to the empty object instead of aborting the
/// turn; the failure is logged locally and never surfaced.
fn parse_turn_metadata(raw: &str) -> TurnMetadata {
    match serde_json::from_str(raw) {
        Ok(metadata) => metadata,
        Err(error) => {
            tracing::debug!(error = %error, "unparseable terminal metadata, substituting empty defaults");
            TurnMetadata::default()
        }
    }
}

/// Token lines carry real newlines as the two-character sequence `\n`.
fn unescape_newlines(raw: &str) -> String {
    raw.replace("\\n", "\n")
}
