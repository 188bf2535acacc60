use serde::{Deserialize, Serialize};

/// Body of a streaming chat turn. Conversation history lives server-side,
/// keyed by `session_id`; only the new user message travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurnRequest {
    pub session_id: String,
    pub message: String,
    pub subject: String,
    pub grade_level: String,
    pub language: String,
}

/// Form fields accompanying one uploaded voice clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTurnRequest {
    pub session_id: String,
    pub subject: String,
    pub grade_level: String,
}

/// Activity categories understood by the progress tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ChatMessage,
    FlashcardSession,
    QuizAttempt,
    VoiceSession,
    Explanation,
}

impl ActivityKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::FlashcardSession => "flashcard_session",
            Self::QuizAttempt => "quiz_attempt",
            Self::VoiceSession => "voice_session",
            Self::Explanation => "explanation",
        }
    }
}

/// One fire-and-forget record for the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub user_id: i64,
    pub activity_type: ActivityKind,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActivityRecord {
    pub fn new(user_id: i64, activity_type: ActivityKind, subject: &str) -> Self {
        Self {
            user_id,
            activity_type,
            subject: subject_or_general(subject),
            score: None,
            metadata: None,
        }
    }

    pub fn chat_message(user_id: i64, subject: &str) -> Self {
        Self::new(user_id, ActivityKind::ChatMessage, subject)
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The tracker groups blank subjects under a catch-all bucket.
fn subject_or_general(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        "General".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// Successful register/login response. The token is held in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: UserAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifiedUser {
    pub user: UserAccount,
}

/// How much depth an explanation should carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Simple,
    #[default]
    Medium,
    Detailed,
}

impl DetailLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "simple" => Some(Self::Simple),
            "medium" => Some(Self::Medium),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Detailed => "detailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainRequest {
    pub topic: String,
    pub grade_level: String,
    pub detail_level: DetailLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Explanation {
    #[serde(default)]
    pub topic: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeRequest {
    pub subject: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub num_questions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PracticeQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PracticeSet {
    #[serde(default)]
    pub questions: Vec<PracticeQuestion>,
}

/// One uploaded study document as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StudyDocument {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub num_chunks: u64,
    #[serde(default)]
    pub total_words: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentList {
    #[serde(default)]
    pub documents: Vec<StudyDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentUpload {
    pub document: StudyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentSummary {
    pub summary: String,
}

/// One two-sided review card.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FlashcardSet {
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressTotals {
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub flashcard_sessions: u64,
    #[serde(default)]
    pub voice_sessions: u64,
    #[serde(default)]
    pub explanations: u64,
    #[serde(default)]
    pub quiz_attempts: u64,
    #[serde(default)]
    pub avg_quiz_score: Option<f64>,
    #[serde(default)]
    pub fc_accuracy: Option<f64>,
    #[serde(default)]
    pub streak: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DayActivity {
    pub day: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubjectActivity {
    pub subject: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActivityEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timestamp: String,
}

/// Aggregate view backing the progress dashboard. Every field tolerates
/// absence so a partially-populated account still renders.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressSummary {
    #[serde(default)]
    pub totals: ProgressTotals,
    #[serde(default)]
    pub week_activity: Vec<DayActivity>,
    #[serde(default)]
    pub subject_breakdown: Vec<SubjectActivity>,
    #[serde(default)]
    pub recent_activity: Vec<ActivityEntry>,
}

/// Round-trip result of one spoken exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VoiceReply {
    #[serde(default)]
    pub user_text: String,
    #[serde(default)]
    pub assistant_text: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_record_defaults_blank_subject_to_general() {
        let record = ActivityRecord::chat_message(7, "  ");
        assert_eq!(record.subject, "General");
        assert_eq!(record.activity_type.name(), "chat_message");
        let encoded = serde_json::to_value(&record).expect("serializable record");
        assert_eq!(encoded["activity_type"], "chat_message");
        assert!(encoded.get("score").is_none());
        assert!(encoded.get("metadata").is_none());
    }

    #[test]
    fn scored_record_serializes_score_and_metadata() {
        let record = ActivityRecord::new(3, ActivityKind::FlashcardSession, "biology")
            .with_score(75)
            .with_metadata(serde_json::json!({ "got": 3, "total": 4 }));
        let encoded = serde_json::to_value(&record).expect("serializable record");
        assert_eq!(encoded["score"], 75);
        assert_eq!(encoded["metadata"]["total"], 4);
    }

    #[test]
    fn progress_summary_tolerates_sparse_payloads() {
        let summary: ProgressSummary = serde_json::from_str("{}").expect("empty object decodes");
        assert_eq!(summary.totals.messages, 0);
        assert!(summary.week_activity.is_empty());

        let summary: ProgressSummary = serde_json::from_str(
            "{\"totals\":{\"messages\":5,\"streak\":2},\"recent_activity\":[{\"type\":\"chat_message\"}]}",
        )
        .expect("partial object decodes");
        assert_eq!(summary.totals.messages, 5);
        assert_eq!(summary.totals.streak, 2);
        assert_eq!(summary.recent_activity[0].kind, "chat_message");
    }

    #[test]
    fn difficulty_and_detail_level_parse_their_wire_names() {
        assert_eq!(Difficulty::parse("hard"), Some(Difficulty::Hard));
        assert_eq!(Difficulty::parse("brutal"), None);
        assert_eq!(DetailLevel::parse("detailed"), Some(DetailLevel::Detailed));
        for level in [DetailLevel::Simple, DetailLevel::Medium, DetailLevel::Detailed] {
            assert_eq!(DetailLevel::parse(level.name()), Some(level));
        }
    }
}
