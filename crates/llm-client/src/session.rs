use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::decoder::{DecodeErrorPolicy, EventDecoder};
use crate::errors::StreamError;
use crate::events::{self, ResponseEvent};
use crate::sse::{Frame, FrameReader};
use crate::types::Response;

pub const DEFAULT_BUFFER_CAPACITY: usize = 16;
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Tuning for a single stream session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bounded event buffer size; values below 1 are raised to 1.
    pub buffer_capacity: usize,
    pub max_line_bytes: usize,
    pub decode_error_policy: DecodeErrorPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            decode_error_policy: DecodeErrorPolicy::default(),
        }
    }
}

/// Lifecycle of the producer side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Producer is reading the body.
    Open,
    /// Producer stopped reading and is releasing the body.
    Draining,
    /// Body released, error slot final, channel closed.
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Handle used to cancel a stream session from another task.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Requests cancellation. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Returns true once the session was cancelled.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Shared {
    state: AtomicU8,
    outcome: OnceLock<StreamError>,
    decode_errors: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Open as u8),
            outcome: OnceLock::new(),
            decode_errors: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Consumer side of a streamed response.
///
/// Events arrive in server order through a bounded channel fed by a
/// background task that owns the HTTP body. Read events with
/// [`next_event`](Self::next_event) or as a [`Stream`], then check
/// [`err`](Self::err) once the channel has closed.
///
/// Dropping the session cancels the producer.
pub struct StreamSession {
    id: uuid::Uuid,
    rx: mpsc::Receiver<ResponseEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    response_id: Option<String>,
    completed: Option<Response>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("response_id", &self.response_id)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Takes ownership of `body` and starts the producer task.
    ///
    /// Cancelling `cancel` (or any parent it was derived from) stops the
    /// producer.
    pub fn spawn<S, E>(body: S, options: SessionOptions, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let capacity = options.buffer_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared::new());
        let id = uuid::Uuid::new_v4();
        debug!(session_id = %id, capacity, "starting response stream session");

        tokio::spawn(produce(
            id,
            body,
            options,
            tx,
            shared.clone(),
            cancel.clone(),
        ));

        Self {
            id,
            rx,
            shared,
            cancel,
            response_id: None,
            completed: None,
        }
    }

    /// Client-side id used in log fields.
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Waits for the next event. `None` once the channel has closed.
    pub async fn next_event(&mut self) -> Option<ResponseEvent> {
        let event = self.rx.recv().await;
        if let Some(event) = &event {
            self.observe(event);
        }
        event
    }

    /// Raw receive side of the event channel.
    ///
    /// Events read here bypass [`response_id`](Self::response_id) and
    /// [`finish`](Self::finish) bookkeeping.
    pub fn events(&mut self) -> &mut mpsc::Receiver<ResponseEvent> {
        &mut self.rx
    }

    /// Terminal error, meaningful once the channel is observed closed.
    ///
    /// `None` on normal completion, including `[DONE]` and plain end of input.
    pub fn err(&self) -> Option<&StreamError> {
        self.shared.outcome.get()
    }

    /// Requests early termination. Events already buffered may still be
    /// delivered before the channel closes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a cloneable handle that cancels this session from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    /// Number of frames dropped because they failed to decode.
    pub fn decode_errors(&self) -> u64 {
        self.shared.decode_errors.load(Ordering::Relaxed)
    }

    /// Returns the producer's lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Id of the server response, taken from the first snapshot event seen.
    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    /// Drains the stream and returns the completed response, if one arrived.
    ///
    /// Safe to call after consuming events with `next_event()`.
    pub async fn finish(mut self) -> Result<Option<Response>, StreamError> {
        while self.next_event().await.is_some() {}
        match self.err() {
            Some(err) => Err(err.clone()),
            None => Ok(self.completed.take()),
        }
    }

    /// Drains the stream and concatenates output text deltas.
    ///
    /// Falls back to the completed response's text when no deltas were sent.
    pub async fn collect_text(mut self) -> Result<String, StreamError> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            if let Some(delta) = event.text_delta() {
                text.push_str(delta);
            }
        }
        if let Some(err) = self.err() {
            return Err(err.clone());
        }
        if text.is_empty()
            && let Some(response) = &self.completed
        {
            text = response.output_text();
        }
        Ok(text)
    }

    fn observe(&mut self, event: &ResponseEvent) {
        if self.response_id.is_none()
            && let Some(response) = event.response()
            && !response.id.is_empty()
        {
            self.response_id = Some(response.id.clone());
        }
        if let ResponseEvent::Completed(snapshot) = event {
            self.completed = Some(snapshot.response.clone());
        }
    }
}

impl Stream for StreamSession {
    type Item = ResponseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(event)) = &polled {
            this.observe(event);
        }
        polled
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Exit {
    Clean(&'static str),
    ReceiverGone,
    Failed(StreamError),
}

async fn produce<S, E>(
    session_id: uuid::Uuid,
    body: S,
    options: SessionOptions,
    tx: mpsc::Sender<ResponseEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut reader = FrameReader::new(Box::pin(body), options.max_line_bytes);
    let decoder = EventDecoder;
    let mut delivered = 0_u64;

    let exit = 'frames: loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'frames Exit::Failed(StreamError::Cancelled),
            next = reader.next_frame() => next,
        };
        let frame = match next {
            Ok(Some(Frame::Event(frame))) => frame,
            Ok(Some(Frame::Done)) => break Exit::Clean("done sentinel"),
            Ok(None) => break Exit::Clean("end of input"),
            Err(err) => break Exit::Failed(err),
        };

        let event = match decoder.decode(&frame) {
            Ok(event) => event,
            Err(err) => {
                shared.decode_errors.fetch_add(1, Ordering::Relaxed);
                // A terminal kind ends the stream even when its payload is unreadable.
                if events::lookup(err.event_name()).is_some_and(|entry| entry.kind.is_terminal()) {
                    warn!(session_id = %session_id, event = %frame.event, error = %err, "undecodable terminal stream event");
                    break Exit::Failed(StreamError::Decode(err));
                }
                match options.decode_error_policy {
                    DecodeErrorPolicy::Skip => {
                        warn!(session_id = %session_id, event = %frame.event, error = %err, "dropping undecodable stream event");
                        continue;
                    }
                    DecodeErrorPolicy::Fail => break Exit::Failed(StreamError::Decode(err)),
                }
            }
        };

        let terminal = event.is_terminal();
        let failure = event.terminal_error();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'frames Exit::Failed(StreamError::Cancelled),
            sent = tx.send(event) => sent.is_ok(),
        };
        if !sent {
            break Exit::ReceiverGone;
        }
        delivered += 1;

        if terminal {
            break match failure {
                Some(err) => Exit::Failed(err),
                None => Exit::Clean("terminal event"),
            };
        }
    };

    shared.set_state(SessionState::Draining);
    let bytes_read = reader.bytes_read();
    drop(reader);

    match exit {
        Exit::Clean(reason) => {
            debug!(session_id = %session_id, delivered, bytes_read, reason, "response stream finished");
        }
        Exit::ReceiverGone => {
            debug!(session_id = %session_id, delivered, bytes_read, "response stream receiver dropped");
        }
        Exit::Failed(err) => {
            debug!(session_id = %session_id, delivered, bytes_read, error = %err, "response stream ended with error");
            let _ = shared.outcome.set(err);
        }
    }

    shared.set_state(SessionState::Closed);
    drop(tx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DecodeError, ServerFailureKind};
    use crate::events::EventKind;
    use futures::{StreamExt as _, stream};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    fn frame(name: &str, data: &str) -> String {
        format!("event: {name}\ndata: {data}\n\n")
    }

    fn body(chunks: Vec<String>) -> impl Stream<Item = Result<Bytes, String>> + Send + 'static {
        stream::iter(chunks.into_iter().map(|c| Ok::<_, String>(Bytes::from(c))))
    }

    fn spawn_with(chunks: Vec<String>, options: SessionOptions) -> StreamSession {
        StreamSession::spawn(body(chunks), options, CancellationToken::new())
    }

    fn spawn(chunks: Vec<String>) -> StreamSession {
        spawn_with(chunks, SessionOptions::default())
    }

    /// Body double that records when it is dropped.
    struct GuardedBody<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for GuardedBody<S> {
        type Item = S::Item;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            Pin::new(&mut self.inner).poll_next(cx)
        }
    }

    impl<S> Drop for GuardedBody<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn hanging_body(
        first: String,
        dropped: Arc<AtomicBool>,
    ) -> impl Stream<Item = Result<Bytes, String>> + Send + 'static {
        GuardedBody {
            inner: stream::iter(vec![Ok::<_, String>(Bytes::from(first))]).chain(stream::pending()),
            dropped,
        }
    }

    #[tokio::test]
    async fn deltas_done_and_done_sentinel_close_cleanly() {
        let mut session = spawn(vec![
            frame("response.output_text.delta", r#"{"delta":"He"}"#),
            frame("response.output_text.delta", r#"{"delta":"llo"}"#),
            frame("response.output_text.done", r#"{"text":"Hello"}"#),
            "data: [DONE]\n\n".to_string(),
            frame("response.output_text.delta", r#"{"delta":"ignored"}"#),
        ]);

        let mut kinds = Vec::new();
        let mut deltas = String::new();
        let mut done_text = None;
        while let Some(event) = session.next_event().await {
            kinds.push(event.kind());
            match event {
                ResponseEvent::OutputTextDelta(delta) => deltas.push_str(&delta.delta),
                ResponseEvent::OutputTextDone(done) => done_text = Some(done.text),
                _ => {}
            }
        }

        assert_eq!(
            kinds,
            vec![
                EventKind::OutputTextDelta,
                EventKind::OutputTextDelta,
                EventKind::OutputTextDone
            ]
        );
        assert_eq!(done_text.as_deref(), Some(deltas.as_str()));
        assert!(session.err().is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn failed_event_is_delivered_then_reported() {
        let mut session = spawn(vec![frame(
            "response.failed",
            r#"{"error":{"message":"boom"}}"#,
        )]);

        let event = session.next_event().await.expect("failed event");
        assert_eq!(event.kind(), EventKind::Failed);
        assert!(session.next_event().await.is_none());
        assert!(matches!(
            session.err(),
            Some(StreamError::Server { kind: ServerFailureKind::Failed, message, .. }) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn unknown_event_is_forwarded_and_stream_runs_to_end() {
        let mut session = spawn(vec![frame("response.nonsense.future", r#"{"x":1}"#)]);

        match session.next_event().await {
            Some(ResponseEvent::Unknown(unknown)) => {
                assert_eq!(unknown.name, "response.nonsense.future");
                assert_eq!(unknown.raw, serde_json::json!({"x": 1}));
            }
            other => panic!("expected unknown event, got {other:?}"),
        }
        assert!(session.next_event().await.is_none());
        assert!(session.err().is_none());
    }

    #[tokio::test]
    async fn cancel_closes_channel_and_releases_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut session = StreamSession::spawn(
            hanging_body(
                frame("response.output_text.delta", r#"{"delta":"a"}"#),
                dropped.clone(),
            ),
            SessionOptions::default(),
            CancellationToken::new(),
        );

        assert!(session.next_event().await.is_some());
        session.cancel();
        session.cancel();

        let closed = tokio::time::timeout(Duration::from_secs(1), session.next_event())
            .await
            .expect("channel closes promptly");
        assert!(closed.is_none());
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(session.err(), Some(&StreamError::Cancelled));
    }

    #[tokio::test]
    async fn parent_token_and_abort_handle_cancel_the_session() {
        let parent = CancellationToken::new();
        let mut session = StreamSession::spawn(
            hanging_body(
                frame("response.output_text.delta", r#"{"delta":"a"}"#),
                Arc::new(AtomicBool::new(false)),
            ),
            SessionOptions::default(),
            parent.child_token(),
        );
        let handle = session.abort_handle();
        assert!(!handle.is_aborted());

        parent.cancel();
        assert!(handle.is_aborted());
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while session.next_event().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
        assert!(session.err().is_some_and(StreamError::is_cancelled));
    }

    #[tokio::test]
    async fn dropping_session_stops_producer() {
        let dropped = Arc::new(AtomicBool::new(false));
        let session = StreamSession::spawn(
            hanging_body(
                frame("response.output_text.delta", r#"{"delta":"a"}"#),
                dropped.clone(),
            ),
            SessionOptions::default(),
            CancellationToken::new(),
        );
        drop(session);

        let released = tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(released.is_ok(), "body was not released after drop");
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_and_counted() {
        let mut session = spawn(vec![
            frame("response.output_text.delta", r#"{"delta":"a"}"#),
            frame("response.output_text.delta", "{not json"),
            frame("response.output_text.delta", r#"{"delta":"b"}"#),
        ]);

        let mut deltas = Vec::new();
        while let Some(event) = session.next_event().await {
            deltas.extend(event.text_delta().map(ToOwned::to_owned));
        }
        assert_eq!(deltas, vec!["a", "b"]);
        assert_eq!(session.decode_errors(), 1);
        assert!(session.err().is_none());
    }

    #[tokio::test]
    async fn fail_policy_ends_stream_on_first_decode_error() {
        let options = SessionOptions {
            decode_error_policy: DecodeErrorPolicy::Fail,
            ..SessionOptions::default()
        };
        let mut session = spawn_with(
            vec![
                frame("response.output_text.delta", r#"{"delta":"a"}"#),
                frame("response.output_text.delta", "{not json"),
                frame("response.output_text.delta", r#"{"delta":"b"}"#),
            ],
            options,
        );

        assert!(session.next_event().await.is_some());
        assert!(session.next_event().await.is_none());
        assert!(matches!(
            session.err(),
            Some(StreamError::Decode(DecodeError::InvalidJson { .. }))
        ));
    }

    #[tokio::test]
    async fn undecodable_terminal_event_ends_stream_with_error() {
        let mut session = spawn(vec![
            frame("response.output_text.delta", r#"{"delta":"a"}"#),
            frame("response.failed", r#"{"error":"boom"}"#),
            frame("response.output_text.delta", r#"{"delta":"late"}"#),
        ]);

        assert!(session.next_event().await.is_some());
        assert!(session.next_event().await.is_none());
        assert_eq!(session.decode_errors(), 1);
        assert!(matches!(
            session.err(),
            Some(StreamError::Decode(DecodeError::Shape { event, .. })) if event == "response.failed"
        ));
    }

    #[tokio::test]
    async fn nothing_follows_a_terminal_event() {
        let session = spawn(vec![
            frame("response.completed", r#"{"response":{"id":"resp_1"}}"#),
            frame("response.output_text.delta", r#"{"delta":"late"}"#),
        ]);
        let events: Vec<ResponseEvent> = session.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Completed);
    }

    #[tokio::test]
    async fn events_keep_wire_order() {
        let chunks = (1..=6)
            .map(|n| {
                frame(
                    "response.output_text.delta",
                    &format!(r#"{{"sequence_number":{n},"delta":"{n}"}}"#),
                )
            })
            .collect();
        let session = spawn_with(
            chunks,
            SessionOptions {
                buffer_capacity: 1,
                ..SessionOptions::default()
            },
        );
        let seqs: Vec<u64> = session.map(|e| e.sequence_number()).collect().await;
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_is_terminal() {
        let chunks = vec![
            Ok(Bytes::from(frame(
                "response.output_text.delta",
                r#"{"delta":"a"}"#,
            ))),
            Err("connection reset".to_string()),
            Ok(Bytes::from(frame(
                "response.output_text.delta",
                r#"{"delta":"b"}"#,
            ))),
        ];
        let mut session = StreamSession::spawn(
            stream::iter(chunks),
            SessionOptions::default(),
            CancellationToken::new(),
        );

        assert!(session.next_event().await.is_some());
        assert!(session.next_event().await.is_none());
        assert!(matches!(session.err(), Some(StreamError::Transport(msg)) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn slow_consumer_stalls_body_reads() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let body = stream::iter(0_u64..).map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Bytes::from(format!(
                "event: response.output_text.delta\ndata: {{\"sequence_number\":{n},\"delta\":\"x\"}}\n\n"
            )))
        });
        let capacity = 2;
        let mut session = StreamSession::spawn(
            body,
            SessionOptions {
                buffer_capacity: capacity,
                ..SessionOptions::default()
            },
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stalled_at = pulled.load(Ordering::SeqCst);
        assert!(stalled_at >= capacity, "producer never filled the buffer");
        assert!(stalled_at <= capacity + 2, "producer read {stalled_at} chunks");

        assert!(session.next_event().await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pulled.load(Ordering::SeqCst) <= capacity + 3);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn finish_returns_completed_response_and_tracks_id() {
        let mut session = spawn(vec![
            frame(
                "response.created",
                r#"{"sequence_number":0,"response":{"id":"resp_1","status":"in_progress"}}"#,
            ),
            frame("response.output_text.delta", r#"{"delta":"Hi"}"#),
            frame(
                "response.completed",
                r#"{"response":{"id":"resp_1","status":"completed","output":[{"type":"message","content":[{"type":"output_text","text":"Hi"}]}]}}"#,
            ),
        ]);

        assert_eq!(
            session.next_event().await.map(|e| e.kind()),
            Some(EventKind::Created)
        );
        assert_eq!(session.response_id(), Some("resp_1"));

        let response = session.finish().await.expect("finish").expect("completed");
        assert_eq!(response.status.as_deref(), Some("completed"));
        assert_eq!(response.output_text(), "Hi");
    }

    #[tokio::test]
    async fn collect_text_joins_deltas_or_reports_failure() {
        let text = spawn(vec![
            frame("response.output_text.delta", r#"{"delta":"He"}"#),
            frame("response.output_text.delta", r#"{"delta":"llo"}"#),
            frame("response.completed", r#"{"response":{"id":"resp_1"}}"#),
        ])
        .collect_text()
        .await
        .expect("text");
        assert_eq!(text, "Hello");

        let fallback = spawn(vec![frame(
            "response.completed",
            r#"{"response":{"output_text":"whole"}}"#,
        )])
        .collect_text()
        .await
        .expect("text");
        assert_eq!(fallback, "whole");

        let err = spawn(vec![frame("error", r#"{"message":"overloaded"}"#)])
            .collect_text()
            .await
            .expect_err("error event");
        assert!(matches!(err, StreamError::Server { kind: ServerFailureKind::Error, .. }));
    }
}
