use std::sync::Arc;

use parking_lot::RwLock;
use sage_backend::{
    ActivityRecord, CancelHandle, ChatTurnRequest, EventStream, ExchangeEvent, TurnMetadata,
    TutorBackend, UserAccount,
};
use tokio::sync::watch;

use crate::chat::message::{ExchangeId, Transcript};
use crate::profile::SessionProfile;
use crate::settings::SettingsStore;

/// Shown in place of the assistant reply when the backend cannot be reached.
pub const CONNECTIVITY_NOTICE: &str = "⚠️ Could not reach the server. Is the backend running?";

/// Controller-level handle for the exchange in flight.
struct ActiveExchange {
    exchange: ExchangeId,
    cancel: CancelHandle,
}

/// Orchestrates streaming chat exchanges against one tutoring backend.
///
/// Owns the transcript. Rendering layers observe it read-only through
/// [`TranscriptView`]; the only writers are the active exchange's reader task
/// and [`ChatSession::cancel`]. At most one exchange is in flight at a time,
/// and `submit` is a silent no-op while one is.
pub struct ChatSession {
    backend: Arc<dyn TutorBackend>,
    settings: Arc<SettingsStore>,
    profile: SessionProfile,
    user: Option<UserAccount>,
    transcript: Arc<RwLock<Transcript>>,
    changed: Arc<watch::Sender<u64>>,
    active: Option<ActiveExchange>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn TutorBackend>,
        settings: Arc<SettingsStore>,
        profile: SessionProfile,
    ) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            backend,
            settings,
            profile,
            user: None,
            transcript: Arc::new(RwLock::new(Transcript::new())),
            changed: Arc::new(changed),
            active: None,
        }
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    /// Identifies the signed-in user for activity logging; `None` keeps the
    /// session anonymous and logs nothing.
    pub fn set_user(&mut self, user: Option<UserAccount>) {
        self.user = user;
    }

    pub fn user(&self) -> Option<&UserAccount> {
        self.user.as_ref()
    }

    /// Hands out a read-only transcript view for a rendering layer.
    pub fn view(&self) -> TranscriptView {
        TranscriptView {
            transcript: Arc::clone(&self.transcript),
            changed: self.changed.subscribe(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.transcript.read().is_streaming()
    }

    /// Opens one streaming exchange for `text`.
    ///
    /// Silent no-op when `text` trims to nothing or an exchange is already
    /// active. Must be called from within a tokio runtime; the transport
    /// worker and the reader task are spawned onto it.
    pub fn submit(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let opened = self.transcript.write().begin_turn(trimmed);
        let exchange = match opened {
            Ok(exchange) => exchange,
            Err(rejection) => {
                tracing::debug!(?rejection, "submit ignored");
                return;
            }
        };
        notify(&self.changed);

        let settings = self.settings.settings();
        let request = ChatTurnRequest {
            session_id: self.profile.session_id.clone(),
            message: trimmed.to_string(),
            subject: settings.subject.clone(),
            grade_level: settings.grade_level.clone(),
            language: settings.language.clone(),
        };

        match self.backend.stream_chat(request) {
            Ok(handle) => {
                let activity = self
                    .user
                    .as_ref()
                    .map(|user| ActivityRecord::chat_message(user.id, &settings.subject));

                self.active = Some(ActiveExchange {
                    exchange,
                    cancel: handle.cancel,
                });
                tokio::spawn(handle.worker);
                tokio::spawn(drive_exchange(
                    handle.events,
                    exchange,
                    Arc::clone(&self.transcript),
                    Arc::clone(&self.changed),
                    Arc::clone(&self.backend),
                    activity,
                ));
            }
            Err(error) => {
                tracing::warn!(error = %error, "chat exchange could not start");
                let closed = self
                    .transcript
                    .write()
                    .fail_turn(exchange, CONNECTIVITY_NOTICE.to_string());
                if closed.is_ok() {
                    notify(&self.changed);
                }
            }
        }
    }

    /// Cancels the exchange in flight, keeping whatever content arrived.
    ///
    /// No-op when nothing is streaming. The worker is signaled cooperatively;
    /// chunks still in transit are discarded, never applied.
    pub fn cancel(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();

        let closed = self.transcript.write().cancel_turn(active.exchange);
        match closed {
            Ok(()) => notify(&self.changed),
            Err(rejection) => {
                // The exchange already settled on its own; nothing to close.
                tracing::debug!(?rejection, "cancel ignored");
            }
        }
    }
}

/// Read-only transcript observer: snapshot now, or wait for the next change.
#[derive(Clone)]
pub struct TranscriptView {
    transcript: Arc<RwLock<Transcript>>,
    changed: watch::Receiver<u64>,
}

impl TranscriptView {
    /// Clones the transcript as of this instant.
    pub fn snapshot(&self) -> Transcript {
        self.transcript.read().clone()
    }

    /// Waits until a mutation lands after the last one this view observed.
    ///
    /// Returns `false` once the session and all its exchanges are gone.
    pub async fn changed(&mut self) -> bool {
        self.changed.changed().await.is_ok()
    }
}

/// Applies one exchange's events to the transcript in arrival order.
///
/// Every applied mutation bumps the change signal. Rejected events (a stale
/// exchange, an already-closed turn) are dropped.
async fn drive_exchange(
    mut events: EventStream,
    exchange: ExchangeId,
    transcript: Arc<RwLock<Transcript>>,
    changed: Arc<watch::Sender<u64>>,
    backend: Arc<dyn TutorBackend>,
    activity: Option<ActivityRecord>,
) {
    loop {
        match events.recv().await {
            Some(ExchangeEvent::Token(text)) => {
                let applied = transcript.write().append_token(exchange, &text);
                match applied {
                    Ok(()) => notify(&changed),
                    Err(rejection) => tracing::debug!(?rejection, "token dropped"),
                }
            }
            Some(ExchangeEvent::Completed(metadata)) => {
                let closed = transcript.write().complete_turn(exchange, metadata);
                match closed {
                    Ok(()) => {
                        notify(&changed);
                        // Logged only on a normal terminal close, and only for
                        // signed-in users.
                        if let Some(record) = activity {
                            spawn_activity_log(backend, record);
                        }
                    }
                    Err(rejection) => tracing::debug!(?rejection, "completion dropped"),
                }
                return;
            }
            Some(ExchangeEvent::Failed(message)) => {
                let closed = transcript
                    .write()
                    .fail_turn(exchange, failure_display(&message));
                match closed {
                    Ok(()) => notify(&changed),
                    Err(rejection) => tracing::debug!(?rejection, "failure dropped"),
                }
                return;
            }
            Some(ExchangeEvent::Unreachable(detail)) => {
                tracing::warn!(detail = %detail, "chat exchange transport failed");
                let closed = transcript
                    .write()
                    .fail_turn(exchange, CONNECTIVITY_NOTICE.to_string());
                match closed {
                    Ok(()) => notify(&changed),
                    Err(rejection) => tracing::debug!(?rejection, "transport failure dropped"),
                }
                return;
            }
            None => {
                // Stream ended without a terminal line. Close the turn with
                // whatever content arrived; no activity is logged.
                let closed = transcript
                    .write()
                    .complete_turn(exchange, TurnMetadata::default());
                match closed {
                    Ok(()) => {
                        tracing::warn!(
                            exchange = exchange.0,
                            "stream ended without a terminal line, closing the open turn"
                        );
                        notify(&changed);
                    }
                    Err(rejection) => {
                        tracing::debug!(?rejection, "exchange already settled at stream end")
                    }
                }
                return;
            }
        }
    }
}

fn spawn_activity_log(backend: Arc<dyn TutorBackend>, record: ActivityRecord) {
    tokio::spawn(async move {
        if let Err(error) = backend.log_activity(record).await {
            tracing::debug!(error = %error, "activity log failed, ignoring");
        }
    });
}

fn failure_display(message: &str) -> String {
    format!("⚠️ Error: {message}")
}

fn notify(changed: &watch::Sender<u64>) {
    changed.send_modify(|version| *version = version.wrapping_add(1));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use sage_backend::{
        ActivityKind, BackendError, BackendResult, StreamHandle, make_event_channel, relay_chunks,
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::chat::message::{Message, MessageStatus, Role};

    /// Backend double replaying a scripted chunk sequence through the real
    /// decode/classify relay.
    struct ScriptedBackend {
        script: Vec<Result<Vec<u8>, String>>,
        hold_open: bool,
        refuse: bool,
        log_fails: bool,
        requests: Mutex<Vec<ChatTurnRequest>>,
        log_tx: mpsc::UnboundedSender<ActivityRecord>,
    }

    fn scripted(
        script: Vec<Result<Vec<u8>, String>>,
    ) -> (ScriptedBackend, mpsc::UnboundedReceiver<ActivityRecord>) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        (
            ScriptedBackend {
                script,
                hold_open: false,
                refuse: false,
                log_fails: false,
                requests: Mutex::new(Vec::new()),
                log_tx,
            },
            log_rx,
        )
    }

    impl TutorBackend for ScriptedBackend {
        fn stream_chat(&self, request: ChatTurnRequest) -> BackendResult<StreamHandle> {
            self.requests.lock().push(request);
            if self.refuse {
                return Err(BackendError::MissingBaseUrl {
                    stage: "chat stream",
                });
            }

            let (event_tx, events, cancel, cancel_rx) = make_event_channel();
            let script = self.script.clone();
            let hold_open = self.hold_open;
            let worker = Box::pin(async move {
                let chunks = futures::stream::iter(script);
                if hold_open {
                    relay_chunks(
                        chunks.chain(futures::stream::pending()),
                        &event_tx,
                        cancel_rx,
                    )
                    .await;
                } else {
                    relay_chunks(chunks, &event_tx, cancel_rx).await;
                }
            });

            Ok(StreamHandle {
                events,
                cancel,
                worker,
            })
        }

        fn log_activity(&self, record: ActivityRecord) -> BoxFuture<'_, BackendResult<()>> {
            if self.log_fails {
                return Box::pin(async {
                    Err(BackendError::MissingBaseUrl {
                        stage: "activity log",
                    })
                });
            }
            let _ = self.log_tx.send(record);
            Box::pin(async { Ok(()) })
        }
    }

    fn chunk(bytes: &[u8]) -> Result<Vec<u8>, String> {
        Ok(bytes.to_vec())
    }

    fn session_for(backend: Arc<ScriptedBackend>) -> ChatSession {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")));
        ChatSession::new(backend, settings, SessionProfile::generate())
    }

    fn signed_in(session: &mut ChatSession) {
        session.set_user(Some(UserAccount {
            id: 7,
            username: "pat".to_string(),
            email: String::new(),
        }));
    }

    async fn wait_for<F>(view: &mut TranscriptView, predicate: F) -> Transcript
    where
        F: Fn(&Transcript) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = view.snapshot();
                if predicate(&snapshot) {
                    return snapshot;
                }
                assert!(view.changed().await, "session ended before the condition");
            }
        })
        .await
        .expect("condition within deadline")
    }

    fn turn_settled(transcript: &Transcript) -> bool {
        !transcript.messages().is_empty() && !transcript.is_streaming()
    }

    #[tokio::test]
    async fn streamed_turn_assembles_content_and_metadata() {
        let (backend, mut log_rx) = scripted(vec![
            chunk(b"data: Hel"),
            chunk(b"lo\ndata: [DONE]:{\"suggestions\":[\"x\"]}\n"),
        ]);
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hi");
        let transcript = wait_for(&mut view, turn_settled).await;

        let messages = transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[1].suggestions, vec!["x".to_string()]);
        assert_eq!(messages[1].status, MessageStatus::Done);

        let record = tokio::time::timeout(Duration::from_secs(2), log_rx.recv())
            .await
            .expect("activity within deadline")
            .expect("one record");
        assert_eq!(record.user_id, 7);
        assert_eq!(record.subject, "math");
        assert_eq!(record.activity_type, ActivityKind::ChatMessage);
    }

    #[tokio::test]
    async fn blank_submit_leaves_the_transcript_untouched() {
        let (backend, _log_rx) = scripted(Vec::new());
        let backend = Arc::new(backend);
        let mut session = session_for(Arc::clone(&backend));
        let view = session.view();

        session.submit("   \n");

        assert!(view.snapshot().messages().is_empty());
        assert!(!session.is_streaming());
        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn second_submit_while_streaming_is_a_no_op() {
        let (mut backend, _log_rx) = scripted(vec![chunk(b"data: part\n")]);
        backend.hold_open = true;
        let backend = Arc::new(backend);
        let mut session = session_for(Arc::clone(&backend));
        let mut view = session.view();

        session.submit("hi");
        wait_for(&mut view, |transcript| {
            transcript
                .messages()
                .last()
                .is_some_and(|message| message.content == "part")
        })
        .await;

        session.submit("again");

        let transcript = view.snapshot();
        let user_turns: Vec<_> = transcript
            .messages()
            .iter()
            .filter(|message| message.role == Role::User)
            .collect();
        assert_eq!(user_turns.len(), 1);
        assert_eq!(user_turns[0].content, "hi");
        assert!(transcript.messages().last().is_some_and(Message::is_open));
        assert_eq!(backend.requests.lock().len(), 1);

        session.cancel();
    }

    #[tokio::test]
    async fn failure_line_replaces_content_and_skips_the_activity_log() {
        let (backend, mut log_rx) = scripted(vec![chunk(b"data: [ERROR]:backend down\n")]);
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hi");
        let transcript = wait_for(&mut view, turn_settled).await;

        let last = transcript.messages().last().expect("assistant message");
        assert_eq!(last.content, "⚠️ Error: backend down");
        assert!(matches!(last.status, MessageStatus::Error(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_closes_the_turn_with_content_preserved() {
        let (mut backend, mut log_rx) = scripted(vec![chunk(b"data: partial answ\n")]);
        backend.hold_open = true;
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hi");
        wait_for(&mut view, |transcript| {
            transcript
                .messages()
                .last()
                .is_some_and(|message| message.content == "partial answ")
        })
        .await;

        session.cancel();

        let transcript = view.snapshot();
        let last = transcript.messages().last().expect("assistant message");
        assert_eq!(last.content, "partial answ");
        assert_eq!(last.status, MessageStatus::Cancelled);
        assert!(!session.is_streaming());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log_rx.try_recv().is_err());

        // The session accepts a fresh turn afterwards.
        session.submit("next");
        assert_eq!(view.snapshot().messages().len(), 4);
    }

    #[tokio::test]
    async fn cancel_without_an_active_stream_is_a_no_op() {
        let (backend, _log_rx) = scripted(Vec::new());
        let mut session = session_for(Arc::new(backend));
        let view = session.view();

        session.cancel();

        assert!(view.snapshot().messages().is_empty());
    }

    #[tokio::test]
    async fn transport_error_mid_stream_shows_the_connectivity_notice() {
        let (backend, mut log_rx) = scripted(vec![
            chunk(b"data: Hel\n"),
            Err("connection reset".to_string()),
        ]);
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hi");
        let transcript = wait_for(&mut view, turn_settled).await;

        let last = transcript.messages().last().expect("assistant message");
        assert_eq!(last.content, CONNECTIVITY_NOTICE);
        assert!(matches!(last.status, MessageStatus::Error(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_exchange_fails_the_turn_immediately() {
        let (mut backend, _log_rx) = scripted(Vec::new());
        backend.refuse = true;
        let mut session = session_for(Arc::new(backend));
        let view = session.view();

        session.submit("hi");

        let transcript = view.snapshot();
        assert_eq!(transcript.messages().len(), 2);
        let last = transcript.messages().last().expect("assistant message");
        assert_eq!(last.content, CONNECTIVITY_NOTICE);
        assert!(!transcript.is_streaming());
    }

    #[tokio::test]
    async fn stream_end_without_terminal_closes_the_turn_quietly() {
        let (backend, mut log_rx) = scripted(vec![chunk(b"data: Hi\n")]);
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hello");
        let transcript = wait_for(&mut view, turn_settled).await;

        let last = transcript.messages().last().expect("assistant message");
        assert_eq!(last.content, "Hi");
        assert_eq!(last.status, MessageStatus::Done);
        assert!(last.suggestions.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn anonymous_turns_never_log_activity() {
        let (backend, mut log_rx) = scripted(vec![chunk(
            b"data: Hello\ndata: [DONE]:{\"suggestions\":[]}\n",
        )]);
        let mut session = session_for(Arc::new(backend));
        let mut view = session.view();

        session.submit("hi");
        wait_for(&mut view, turn_settled).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn activity_log_failure_leaves_the_transcript_alone() {
        let (mut backend, _log_rx) = scripted(vec![chunk(
            b"data: Hello\ndata: [DONE]:{\"suggestions\":[]}\n",
        )]);
        backend.log_fails = true;
        let mut session = session_for(Arc::new(backend));
        signed_in(&mut session);
        let mut view = session.view();

        session.submit("hi");
        let transcript = wait_for(&mut view, turn_settled).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(view.snapshot(), transcript);
        assert_eq!(
            transcript.messages().last().map(|m| m.status.clone()),
            Some(MessageStatus::Done)
        );
    }

    #[tokio::test]
    async fn submit_sends_trimmed_text_and_session_fields() {
        let (backend, _log_rx) = scripted(vec![chunk(b"data: ok\ndata: [DONE]:{}\n")]);
        let backend = Arc::new(backend);
        let mut session = session_for(Arc::clone(&backend));
        let mut view = session.view();

        session.submit("  what is gravity?  ");
        let transcript = wait_for(&mut view, turn_settled).await;

        assert_eq!(transcript.messages()[0].content, "what is gravity?");
        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "what is gravity?");
        assert_eq!(requests[0].subject, "math");
        assert_eq!(requests[0].grade_level, "High School");
        assert_eq!(requests[0].language, "en");
        assert_eq!(requests[0].session_id, session.profile().session_id);
    }
}
