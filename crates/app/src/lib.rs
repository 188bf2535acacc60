#![deny(unsafe_code)]

/// Conversation transcript, stream lifecycle, and the session controller.
pub mod chat;
pub mod profile;
/// Persisted tutoring preferences and the backend location.
pub mod settings;
/// Client-side study flows over backend-generated material.
pub mod study;
