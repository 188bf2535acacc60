#![deny(unsafe_code)]

pub mod error;
/// Cancellable per-exchange plumbing and the backend seam.
pub mod exchange;
/// reqwest transport for every backend endpoint.
pub mod http;
/// Line protocol of the chat stream: decoder and classifier.
pub mod stream;
pub mod types;

pub use error::{BackendError, BackendResult};
pub use exchange::{
    CancelHandle, CancelSignal, EventStream, ExchangeEvent, ExchangeSender, ExchangeWorker,
    StreamHandle, TutorBackend, make_event_channel, relay_chunks,
};
pub use http::{BackendConfig, HttpBackend};
pub use stream::{
    DATA_PREFIX, FAILURE_PREFIX, LineDecoder, TERMINAL_PREFIX, TurnEvent, TurnMetadata,
    classify_line,
};
pub use types::{
    ActivityEntry, ActivityKind, ActivityRecord, AuthSession, ChatTurnRequest, DayActivity,
    DetailLevel, Difficulty, DocumentAnswer, DocumentList, DocumentSummary, DocumentUpload,
    Explanation, ExplainRequest, Flashcard, FlashcardSet, LoginRequest, PracticeQuestion,
    PracticeRequest, PracticeSet, ProgressSummary, ProgressTotals, RegisterRequest, StudyDocument,
    SubjectActivity, UserAccount, VerifiedUser, VoiceReply, VoiceTurnRequest,
};
