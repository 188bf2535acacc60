use sage_backend::TurnMetadata;

/// Stable identifier for one transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one streaming exchange.
///
/// A fresh one is allocated on every submit so stale events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl ExchangeId {
    /// Creates a typed exchange identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming(ExchangeId),
    Done,
    Error(String),
    Cancelled,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub suggestions: Vec<String>,
    pub resources: Vec<String>,
}

impl Message {
    /// Creates a message with explicit status and no follow-up metadata.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            status,
            suggestions: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Creates a closed user message.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, MessageStatus::Done)
    }

    /// Creates an assistant placeholder while streaming.
    pub fn assistant_streaming(id: MessageId, exchange: ExchangeId) -> Self {
        Self::new(
            id,
            Role::Assistant,
            String::new(),
            MessageStatus::Streaming(exchange),
        )
    }

    /// Returns true while the message still accepts stream events.
    pub fn is_open(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }
}

/// Stream lifecycle boundary for the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(ExchangeId),
    Done(ExchangeId),
    Error {
        exchange: ExchangeId,
        message: String,
    },
    Cancelled(ExchangeId),
}

/// State transition input for the stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(ExchangeId),
    Complete(ExchangeId),
    Fail {
        exchange: ExchangeId,
        message: String,
    },
    Cancel(ExchangeId),
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRejection {
    AlreadyStreaming {
        active: ExchangeId,
        attempted: ExchangeId,
    },
    NoActiveStream,
    ExchangeMismatch {
        active: ExchangeId,
        attempted: ExchangeId,
    },
}

/// Result type for stream transition application.
pub type StreamTransitionResult = Result<StreamState, StreamRejection>;

impl StreamState {
    /// Returns the active exchange if and only if state is `Streaming`.
    pub fn active_exchange(&self) -> Option<ExchangeId> {
        match self {
            Self::Streaming(exchange) => Some(*exchange),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Non-streaming states may start a new exchange directly. Any closing
    /// transition (`Complete`/`Fail`/`Cancel`) must match the active exchange
    /// exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(exchange) => self.apply_start(exchange),
            StreamTransition::Complete(exchange) => self.apply_complete(exchange),
            StreamTransition::Fail { exchange, message } => self.apply_fail(exchange, message),
            StreamTransition::Cancel(exchange) => self.apply_cancel(exchange),
        }
    }

    fn apply_start(&self, exchange: ExchangeId) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active != exchange => {
                Err(StreamRejection::AlreadyStreaming {
                    active: *active,
                    attempted: exchange,
                })
            }
            Self::Streaming(_) => Ok(self.clone()),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Ok(Self::Streaming(exchange))
            }
        }
    }

    fn apply_complete(&self, exchange: ExchangeId) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == exchange => Ok(Self::Done(exchange)),
            Self::Streaming(active) => Err(StreamRejection::ExchangeMismatch {
                active: *active,
                attempted: exchange,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamRejection::NoActiveStream)
            }
        }
    }

    fn apply_fail(&self, exchange: ExchangeId, message: String) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == exchange => Ok(Self::Error { exchange, message }),
            Self::Streaming(active) => Err(StreamRejection::ExchangeMismatch {
                active: *active,
                attempted: exchange,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamRejection::NoActiveStream)
            }
        }
    }

    fn apply_cancel(&self, exchange: ExchangeId) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == exchange => Ok(Self::Cancelled(exchange)),
            Self::Streaming(active) => Err(StreamRejection::ExchangeMismatch {
                active: *active,
                attempted: exchange,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamRejection::NoActiveStream)
            }
        }
    }
}

/// Conversation aggregate: ordered messages plus the stream lifecycle.
///
/// Append-only, except that the trailing open assistant message accumulates
/// tokens while its exchange is active. At most one message is open at any
/// time, and a closed message never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
    stream_state: StreamState,
    open_message: Option<MessageId>,
    next_message_id: u64,
    next_exchange_id: u64,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Creates an empty transcript in idle state.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            stream_state: StreamState::Idle,
            open_message: None,
            next_message_id: 1,
            next_exchange_id: 1,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    /// Returns true while an exchange is streaming into the transcript.
    pub fn is_streaming(&self) -> bool {
        self.stream_state.active_exchange().is_some()
    }

    /// Opens a new turn: a closed user message plus an open assistant message.
    ///
    /// Returns the exchange identifier stream events must carry to be
    /// accepted. Rejected outright while another exchange is active.
    pub fn begin_turn(
        &mut self,
        user_text: impl Into<String>,
    ) -> Result<ExchangeId, StreamRejection> {
        let exchange = ExchangeId::new(self.next_exchange_id);
        self.stream_state = self.stream_state.apply(StreamTransition::Start(exchange))?;
        // Reserve the next exchange id immediately so a follow-up turn never reuses one.
        self.next_exchange_id = self.next_exchange_id.saturating_add(1);

        let user_id = self.alloc_message_id();
        self.messages.push(Message::user(user_id, user_text));

        let assistant_id = self.alloc_message_id();
        self.messages
            .push(Message::assistant_streaming(assistant_id, exchange));
        self.open_message = Some(assistant_id);

        Ok(exchange)
    }

    /// Appends token text to the open assistant message.
    pub fn append_token(&mut self, exchange: ExchangeId, text: &str) -> Result<(), StreamRejection> {
        self.guard_active(exchange)?;
        if let Some(message) = self.open_message_mut() {
            message.content.push_str(text);
        }
        Ok(())
    }

    /// Closes the open assistant message normally, attaching follow-up metadata.
    pub fn complete_turn(
        &mut self,
        exchange: ExchangeId,
        metadata: TurnMetadata,
    ) -> Result<(), StreamRejection> {
        self.stream_state = self
            .stream_state
            .apply(StreamTransition::Complete(exchange))?;
        if let Some(message) = self.open_message_mut() {
            message.status = MessageStatus::Done;
            message.suggestions = metadata.suggestions;
            message.resources = metadata.resources;
        }
        self.open_message = None;
        Ok(())
    }

    /// Closes the open assistant message with an error display string.
    ///
    /// The accumulated content is replaced, not appended to.
    pub fn fail_turn(&mut self, exchange: ExchangeId, display: String) -> Result<(), StreamRejection> {
        self.stream_state = self.stream_state.apply(StreamTransition::Fail {
            exchange,
            message: display.clone(),
        })?;
        if let Some(message) = self.open_message_mut() {
            message.content = display.clone();
            message.status = MessageStatus::Error(display);
        }
        self.open_message = None;
        Ok(())
    }

    /// Closes the open assistant message on cancellation, content preserved.
    pub fn cancel_turn(&mut self, exchange: ExchangeId) -> Result<(), StreamRejection> {
        self.stream_state = self.stream_state.apply(StreamTransition::Cancel(exchange))?;
        if let Some(message) = self.open_message_mut() {
            message.status = MessageStatus::Cancelled;
        }
        self.open_message = None;
        Ok(())
    }

    fn guard_active(&self, exchange: ExchangeId) -> Result<(), StreamRejection> {
        match self.stream_state {
            StreamState::Streaming(active) if active == exchange => Ok(()),
            StreamState::Streaming(active) => Err(StreamRejection::ExchangeMismatch {
                active,
                attempted: exchange,
            }),
            StreamState::Idle
            | StreamState::Done(_)
            | StreamState::Error { .. }
            | StreamState::Cancelled(_) => Err(StreamRejection::NoActiveStream),
        }
    }

    fn open_message_mut(&mut self) -> Option<&mut Message> {
        let id = self.open_message?;
        self.messages.iter_mut().find(|message| message.id == id)
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }
}
