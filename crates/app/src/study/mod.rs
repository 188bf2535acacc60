/// Flashcard review queue over backend-generated decks.
pub mod review;

pub use review::{ReviewGrade, ReviewPhase, ReviewReport, ReviewSession};
