/// Domain entities and deterministic stream state boundaries.
pub mod message;
/// Streaming exchange orchestration and the transcript observer seam.
pub mod session;

pub use message::{
    ExchangeId, Message, MessageId, MessageStatus, Role, StreamRejection, StreamState,
    StreamTransition, StreamTransitionResult, Transcript,
};
pub use session::{CONNECTIVITY_NOTICE, ChatSession, TranscriptView};
