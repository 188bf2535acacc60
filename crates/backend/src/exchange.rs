use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::BackendResult;
use crate::stream::{LineDecoder, TurnEvent, TurnMetadata, classify_line};
use crate::types::{ActivityRecord, ChatTurnRequest};

/// Network-side future of one exchange. The caller spawns it; it exits on
/// terminal line, failure, stream end, or cancellation.
pub type ExchangeWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Sending half of an exchange's event channel.
pub type ExchangeSender = mpsc::UnboundedSender<ExchangeEvent>;

/// Receiving half of an exchange's cancellation signal.
pub type CancelSignal = oneshot::Receiver<()>;

/// One event of an active exchange, in reducer-ready form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// Content fragment for the open assistant message.
    Token(String),
    /// The turn closed normally, with follow-up metadata.
    Completed(TurnMetadata),
    /// The backend reported a failure inside the stream.
    Failed(String),
    /// The transport failed before the turn could close.
    Unreachable(String),
}

/// Reducer-side view of one exchange.
pub struct EventStream {
    events: mpsc::UnboundedReceiver<ExchangeEvent>,
}

impl EventStream {
    /// Next event in arrival order, or `None` once the worker is done.
    pub async fn recv(&mut self) -> Option<ExchangeEvent> {
        self.events.recv().await
    }
}

/// Cooperative cancellation for an in-flight exchange.
///
/// Dropping the handle cancels too, so an abandoned exchange never outlives
/// its owner.
#[derive(Debug)]
pub struct CancelHandle {
    signal: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(&mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(());
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One active streaming exchange.
///
/// `events` goes to the reducer, `cancel` stays with the controller, and
/// `worker` must be spawned onto the runtime by the caller.
pub struct StreamHandle {
    pub events: EventStream,
    pub cancel: CancelHandle,
    pub worker: ExchangeWorker,
}

/// Builds the channel plumbing for one exchange.
pub fn make_event_channel() -> (ExchangeSender, EventStream, CancelHandle, CancelSignal) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        EventStream { events: event_rx },
        CancelHandle {
            signal: Some(cancel_tx),
        },
        cancel_rx,
    )
}

/// Drives one exchange: decodes arriving chunks into lines, classifies each
/// line, and forwards the events until a terminal line, a failure, stream
/// end, or cancellation.
///
/// Chunks are processed strictly in arrival order and lines in extraction
/// order. Once cancellation is signaled no further chunk is touched, even if
/// more are already buffered.
pub async fn relay_chunks<S, B, E>(mut chunks: S, events: &ExchangeSender, mut cancel: CancelSignal)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = LineDecoder::new();
    loop {
        tokio::select! {
            // Cancellation must win over a ready chunk.
            biased;
            _ = &mut cancel => {
                tracing::debug!("exchange cancelled, discarding the rest of the stream");
                return;
            }
            next = chunks.next() => match next {
                Some(Ok(chunk)) => {
                    for line in decoder.push(chunk.as_ref()) {
                        match classify_line(&line) {
                            Some(TurnEvent::Token(text)) => {
                                if events.send(ExchangeEvent::Token(text)).is_err() {
                                    return;
                                }
                            }
                            Some(TurnEvent::Terminal(metadata)) => {
                                let _ = events.send(ExchangeEvent::Completed(metadata));
                                return;
                            }
                            Some(TurnEvent::Failure(message)) => {
                                let _ = events.send(ExchangeEvent::Failed(message));
                                return;
                            }
                            None => {}
                        }
                    }
                }
                Some(Err(error)) => {
                    let _ = events.send(ExchangeEvent::Unreachable(error.to_string()));
                    return;
                }
                None => {
                    decoder.finish();
                    return;
                }
            }
        }
    }
}

/// Seam between the chat session and the tutoring backend.
pub trait TutorBackend: Send + Sync {
    /// Opens one streaming chat exchange.
    ///
    /// Returns synchronously; the network work happens inside the returned
    /// worker once spawned.
    fn stream_chat(&self, request: ChatTurnRequest) -> BackendResult<StreamHandle>;

    /// Records one activity with the progress tracker.
    fn log_activity(&self, record: ActivityRecord) -> BoxFuture<'_, BackendResult<()>>;
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn ok_chunks(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<&'static [u8], Infallible>> + Unpin {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn relay_forwards_tokens_and_completion_in_order() {
        let (event_tx, mut events, _cancel, cancel_rx) = make_event_channel();
        let chunks = ok_chunks(vec![
            b"data: Hel".as_slice(),
            b"lo\ndata: [DONE]:{\"suggestions\":[\"x\"]}\n".as_slice(),
        ]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(
            events.recv().await,
            Some(ExchangeEvent::Token("Hello".to_string()))
        );
        let completed = events.recv().await;
        match completed {
            Some(ExchangeEvent::Completed(metadata)) => {
                assert_eq!(metadata.suggestions, vec!["x".to_string()]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn relay_stops_at_the_terminal_line() {
        let (event_tx, mut events, _cancel, cancel_rx) = make_event_channel();
        let chunks = ok_chunks(vec![
            b"data: [DONE]:{}\ndata: stray token after close\n".as_slice(),
        ]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(
            events.recv().await,
            Some(ExchangeEvent::Completed(TurnMetadata::default()))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn relay_surfaces_backend_failure_lines() {
        let (event_tx, mut events, _cancel, cancel_rx) = make_event_channel();
        let chunks = ok_chunks(vec![b"data: [ERROR]:backend down\n".as_slice()]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(
            events.recv().await,
            Some(ExchangeEvent::Failed("backend down".to_string()))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn relay_reports_mid_stream_transport_errors() {
        let (event_tx, mut events, _cancel, cancel_rx) = make_event_channel();
        let chunks = futures::stream::iter(vec![
            Ok(b"data: partial".as_slice()),
            Err("connection reset"),
        ]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(
            events.recv().await,
            Some(ExchangeEvent::Unreachable("connection reset".to_string()))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn relay_discards_ready_chunks_once_cancelled() {
        let (event_tx, mut events, mut cancel, cancel_rx) = make_event_channel();
        cancel.cancel();
        let chunks = ok_chunks(vec![b"data: never seen\n".as_slice()]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn relay_ends_quietly_when_stream_closes_without_terminal() {
        let (event_tx, mut events, _cancel, cancel_rx) = make_event_channel();
        let chunks = ok_chunks(vec![b"data: half an answer\n".as_slice()]);

        relay_chunks(chunks, &event_tx, cancel_rx).await;
        drop(event_tx);

        assert_eq!(
            events.recv().await,
            Some(ExchangeEvent::Token("half an answer".to_string()))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_the_cancel_handle_signals_the_worker() {
        let (_event_tx, _events, cancel, cancel_rx) = make_event_channel();
        drop(cancel);
        assert!(cancel_rx.await.is_ok());
    }
}
