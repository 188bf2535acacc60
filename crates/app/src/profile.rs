use uuid::Uuid;

/// Per-run identity shared by chat and voice exchanges.
///
/// Created once at startup and immutable afterwards; the backend groups
/// conversation context by this id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub session_id: String,
}

impl SessionProfile {
    /// Generates a profile with a fresh time-ordered session id.
    pub fn generate() -> Self {
        Self {
            session_id: format!("session_{}", Uuid::now_v7().simple()),
        }
    }
}
