use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};

use crate::error::{
    BackendResult, BuildClientSnafu, DecodeResponseSnafu, MissingBaseUrlSnafu, RejectedSnafu,
    RequestSnafu,
};
use crate::exchange::{
    CancelSignal, ExchangeEvent, ExchangeSender, StreamHandle, TutorBackend, make_event_channel,
    relay_chunks,
};
use crate::types::{
    ActivityRecord, AuthSession, ChatTurnRequest, DocumentAnswer, DocumentList, DocumentSummary,
    DocumentUpload, Explanation, ExplainRequest, Flashcard, FlashcardSet, LoginRequest,
    PracticeRequest, PracticeSet, ProgressSummary, RegisterRequest, StudyDocument, UserAccount,
    VerifiedUser, VoiceReply, VoiceTurnRequest,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fallback shown when a rejection arrives without a usable detail body.
const GENERIC_REJECTION: &str = "Something went wrong. Please try again.";

/// Connection settings for the tutoring backend, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Self {
            base_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Error body shape used by the backend for every rejection.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: String,
}

/// reqwest-backed client for the tutoring backend.
pub struct HttpBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        ensure!(
            !config.base_url.is_empty(),
            MissingBaseUrlSnafu {
                stage: "http-backend-new"
            }
        );
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-backend-new",
            })?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    pub async fn register(&self, request: &RegisterRequest) -> BackendResult<AuthSession> {
        self.post_json("auth-register", "/api/auth/register", request)
            .await
    }

    pub async fn login(&self, request: &LoginRequest) -> BackendResult<AuthSession> {
        self.post_json("auth-login", "/api/auth/login", request)
            .await
    }

    /// Exchanges a previously issued token for its account, rejecting stale
    /// tokens.
    pub async fn verify_token(&self, token: &str) -> BackendResult<UserAccount> {
        let verified: VerifiedUser = self
            .post_json(
                "auth-verify",
                "/api/auth/me",
                &serde_json::json!({ "token": token }),
            )
            .await?;
        Ok(verified.user)
    }

    pub async fn explain(&self, request: &ExplainRequest) -> BackendResult<Explanation> {
        self.post_json("explain", "/api/explain", request).await
    }

    pub async fn practice(&self, request: &PracticeRequest) -> BackendResult<PracticeSet> {
        self.post_json("practice", "/api/practice", request).await
    }

    pub async fn documents(&self) -> BackendResult<Vec<StudyDocument>> {
        let list: DocumentList = self.get_json("documents-list", "/api/documents").await?;
        Ok(list.documents)
    }

    pub async fn upload_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<StudyDocument> {
        let stage = "document-upload";
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(self.endpoint("/api/documents/upload"))
            .multipart(form)
            .send()
            .await
            .context(RequestSnafu { stage })?;
        let upload: DocumentUpload = Self::decode(stage, response).await?;
        Ok(upload.document)
    }

    pub async fn delete_document(&self, id: &str) -> BackendResult<()> {
        let stage = "document-delete";
        let response = self
            .client
            .delete(self.endpoint(&format!("/api/documents/{id}")))
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::check_status(stage, response).await?;
        Ok(())
    }

    pub async fn query_document(&self, id: &str, question: &str) -> BackendResult<DocumentAnswer> {
        let stage = "document-query";
        let form = multipart::Form::new().text("question", question.to_string());
        let response = self
            .client
            .post(self.endpoint(&format!("/api/documents/{id}/query")))
            .multipart(form)
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::decode(stage, response).await
    }

    pub async fn summarize_document(&self, id: &str) -> BackendResult<DocumentSummary> {
        let stage = "document-summarize";
        let response = self
            .client
            .post(self.endpoint(&format!("/api/documents/{id}/summarize")))
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::decode(stage, response).await
    }

    pub async fn document_flashcards(&self, id: &str, count: u32) -> BackendResult<Vec<Flashcard>> {
        let stage = "document-flashcards";
        let response = self
            .client
            .get(self.endpoint(&format!("/api/documents/{id}/flashcards")))
            .query(&[("count", count)])
            .send()
            .await
            .context(RequestSnafu { stage })?;
        let set: FlashcardSet = Self::decode(stage, response).await?;
        Ok(set.flashcards)
    }

    pub async fn progress_summary(&self, user_id: i64) -> BackendResult<ProgressSummary> {
        self.get_json("progress-summary", &format!("/api/progress/{user_id}"))
            .await
    }

    pub async fn voice_chat(
        &self,
        request: &VoiceTurnRequest,
        filename: &str,
        audio: Vec<u8>,
    ) -> BackendResult<VoiceReply> {
        let stage = "voice-chat";
        let clip = multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = multipart::Form::new()
            .part("audio", clip)
            .text("session_id", request.session_id.clone())
            .text("subject", request.subject.clone())
            .text("grade_level", request.grade_level.clone());
        let response = self
            .client
            .post(self.endpoint("/api/voice/chat"))
            .multipart(form)
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::decode(stage, response).await
    }

    /// Fetches the synthesized reply audio advertised by a voice exchange.
    pub async fn fetch_voice_audio(&self, audio_url: &str) -> BackendResult<Vec<u8>> {
        let stage = "voice-audio";
        let response = self
            .client
            .get(self.endpoint(audio_url))
            .send()
            .await
            .context(RequestSnafu { stage })?;
        let response = Self::check_status(stage, response).await?;
        let bytes = response
            .bytes()
            .await
            .context(DecodeResponseSnafu { stage })?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        path: &str,
    ) -> BackendResult<T> {
        let response = self
            .client
            .get(self.endpoint(path))
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::decode(stage, response).await
    }

    async fn post_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        stage: &'static str,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .context(RequestSnafu { stage })?;
        Self::decode(stage, response).await
    }

    async fn decode<T: DeserializeOwned>(
        stage: &'static str,
        response: reqwest::Response,
    ) -> BackendResult<T> {
        let response = Self::check_status(stage, response).await?;
        response.json().await.context(DecodeResponseSnafu { stage })
    }

    /// Rejections carry a `{detail}` body; surface that text when present.
    async fn check_status(
        stage: &'static str,
        response: reqwest::Response,
    ) -> BackendResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .map(|body| body.detail)
            .filter(|detail| !detail.is_empty())
            .unwrap_or_else(|| GENERIC_REJECTION.to_string());
        RejectedSnafu {
            stage,
            status: status.as_u16(),
            detail,
        }
        .fail()
    }
}

impl TutorBackend for HttpBackend {
    fn stream_chat(&self, request: ChatTurnRequest) -> BackendResult<StreamHandle> {
        let (event_tx, events, cancel, cancel_rx) = make_event_channel();
        let call = self
            .client
            .post(self.endpoint("/api/chat/stream"))
            .json(&request);
        let worker = Box::pin(run_exchange_worker(call, event_tx, cancel_rx));
        Ok(StreamHandle {
            events,
            cancel,
            worker,
        })
    }

    fn log_activity(&self, record: ActivityRecord) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let stage = "activity-log";
            let response = self
                .client
                .post(self.endpoint("/api/progress/log"))
                .json(&record)
                .send()
                .await
                .context(RequestSnafu { stage })?;
            Self::check_status(stage, response).await?;
            Ok(())
        })
    }
}

/// Network side of one chat exchange.
///
/// Opens the request, then relays body chunks through the line decoder until
/// the turn closes. Transport trouble before any data and a non-success
/// status both map to the unreachable event; the caller shows one
/// connectivity notice either way.
async fn run_exchange_worker(
    call: reqwest::RequestBuilder,
    events: ExchangeSender,
    mut cancel: CancelSignal,
) {
    let response = tokio::select! {
        biased;
        _ = &mut cancel => {
            tracing::debug!("exchange cancelled before the request completed");
            return;
        }
        sent = call.send() => match sent {
            Ok(response) => response,
            Err(error) => {
                let _ = events.send(ExchangeEvent::Unreachable(error.to_string()));
                return;
            }
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = events.send(ExchangeEvent::Unreachable(format!("HTTP {status}")));
        return;
    }

    relay_chunks(response.bytes_stream(), &events, cancel).await;
}
