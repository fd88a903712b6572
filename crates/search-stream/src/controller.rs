use std::sync::Arc;

use futures::StreamExt as _;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::SearchBackend;
use crate::config::IngestConfig;
use crate::decoder::EventDecoder;
use crate::errors::IngestError;
use crate::model::QueryRequest;
use crate::observer::{self, IngestObserver};
use crate::session::{IngestStats, IngestionSession, Notification, SessionReport};

/// Serializes observer delivery against cancellation for all sessions of
/// one controller. Reentrant so observers may cancel from a callback.
type Gate = Arc<ReentrantMutex<()>>;

/// Handle used to cancel a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
    gate: Gate,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Once this returns the session delivers no further notifications; it
    /// stops reading at its next suspension point and releases the stream.
    /// Cancellation is never reported as an error.
    pub fn abort(&self) {
        let _guard = self.gate.lock();
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Runs ingestion sessions against one backend.
///
/// Starting a session cancels the previous one started by the same
/// controller, so only the latest query ever notifies its observer.
pub struct StreamController {
    backend: Arc<dyn SearchBackend>,
    config: IngestConfig,
    gate: Gate,
    active: Mutex<Option<AbortHandle>>,
}

impl StreamController {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        config: IngestConfig,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            gate: Arc::new(ReentrantMutex::new(())),
            active: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Validates `request`, cancels any in-flight session and spawns a new
    /// one on the current tokio runtime.
    pub fn start(
        &self,
        request: QueryRequest,
        observer: Arc<dyn IngestObserver>,
    ) -> Result<IngestHandle, IngestError> {
        if request.session_id.trim().is_empty() {
            return Err(IngestError::Validation(
                "session_id must not be empty".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            IngestError::Config("sessions must be started inside a tokio runtime".into())
        })?;

        let (tx, rx) = watch::channel(false);
        let abort = AbortHandle {
            tx: Arc::new(tx),
            gate: self.gate.clone(),
        };
        let previous = self.active.lock().replace(abort.clone());
        if let Some(previous) = previous {
            previous.abort();
            debug!(session_id = %request.session_id, "cancelled previous session for new query");
        }

        let session_id = request.session_id.clone();
        let dispatcher = Dispatcher {
            observer,
            abort: rx,
            gate: self.gate.clone(),
        };
        let task = runtime.spawn(ingest_task(
            self.backend.clone(),
            request,
            self.config.clone(),
            dispatcher,
        ));

        Ok(IngestHandle {
            session_id,
            abort,
            task,
        })
    }

    /// Starts a session and waits for its report.
    pub async fn run(
        &self,
        request: QueryRequest,
        observer: Arc<dyn IngestObserver>,
    ) -> Result<SessionReport, IngestError> {
        self.start(request, observer)?.finish().await
    }

    /// Cancels the in-flight session, if any.
    pub fn cancel_active(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.abort();
        }
    }
}

/// Handle to a spawned session.
pub struct IngestHandle {
    session_id: String,
    abort: AbortHandle,
    task: JoinHandle<SessionReport>,
}

impl IngestHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns a handle that can cancel the session.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Waits for the session to reach a terminal state.
    ///
    /// Failures and cancellation are part of the report; `Err` means the
    /// session task itself died.
    pub async fn finish(self) -> Result<SessionReport, IngestError> {
        self.task
            .await
            .map_err(|e| IngestError::Internal(format!("session task ended abnormally: {e}")))
    }
}

struct Dispatcher {
    observer: Arc<dyn IngestObserver>,
    abort: watch::Receiver<bool>,
    gate: Gate,
}

impl Dispatcher {
    fn aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Delivers `notification` unless the session was cancelled. Returns
    /// `false` when cancelled.
    fn deliver(&self, notification: Notification) -> bool {
        let _guard = self.gate.lock();
        if self.aborted() {
            return false;
        }
        observer::deliver(self.observer.as_ref(), notification);
        true
    }
}

async fn ingest_task(
    backend: Arc<dyn SearchBackend>,
    request: QueryRequest,
    config: IngestConfig,
    dispatcher: Dispatcher,
) -> SessionReport {
    let mut session = IngestionSession::new(request.session_id.clone());
    let mut decoder = EventDecoder::new(config.wire_format, config.max_frame_bytes);
    let mut abort_rx = dispatcher.abort.clone();
    session.begin();
    debug!(session_id = %request.session_id, format = ?config.wire_format, "session started");

    let result = read_loop(
        backend.as_ref(),
        &request,
        &mut session,
        &mut decoder,
        &dispatcher,
        &mut abort_rx,
    )
    .await;
    if let Err(err) = result {
        if err.is_fatal() {
            warn!(session_id = %request.session_id, code = ?err.code(), error = %err, "session failed");
        }
        if let Some(notification) = session.fail(err) {
            dispatcher.deliver(notification);
        }
    }

    let stats = IngestStats {
        frames: decoder.frames(),
        dropped_frames: decoder.dropped(),
        ignored_frames: decoder.ignored(),
        ..IngestStats::default()
    };
    let report = session.into_report(stats);
    debug!(
        session_id = %report.session_id,
        state = ?report.state,
        frames = report.stats.frames,
        events = report.stats.events,
        dropped = report.stats.dropped_frames,
        "session finished"
    );
    report
}

/// Reads until the session is terminal. The response body lives only in
/// this frame, so every return path drops (and thereby releases) it.
async fn read_loop(
    backend: &dyn SearchBackend,
    request: &QueryRequest,
    session: &mut IngestionSession,
    decoder: &mut EventDecoder,
    dispatcher: &Dispatcher,
    abort_rx: &mut watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let mut body = tokio::select! {
        biased;
        _ = wait_aborted(abort_rx) => return Err(IngestError::Cancelled),
        opened = backend.open_stream(request) => opened?,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_aborted(abort_rx) => return Err(IngestError::Cancelled),
            next = body.next() => next,
        };
        // Events decoded ahead of a framing error are delivered before it.
        let mut events = Vec::new();
        let (decoded, ended) = match next {
            Some(Ok(chunk)) => (decoder.push_chunk(&chunk, &mut events), false),
            Some(Err(err)) => return Err(err.into()),
            None => (decoder.finish(&mut events), true),
        };

        for event in events {
            if dispatcher.aborted() {
                return Err(IngestError::Cancelled);
            }
            if let Some(notification) = session.apply(event)
                && !dispatcher.deliver(notification)
            {
                return Err(IngestError::Cancelled);
            }
            if session.is_terminal() {
                return Ok(());
            }
        }
        decoded?;

        if ended {
            return Err(IngestError::framing(
                "stream ended without a done record",
            ));
        }
    }
}

/// Resolves once the abort flag is set; never resolves if every handle was
/// dropped without aborting.
async fn wait_aborted(abort_rx: &mut watch::Receiver<bool>) {
    let closed = abort_rx.wait_for(|aborted| *aborted).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ByteStream;
    use crate::decoder::WireFormat;
    use crate::errors::{BackendError, ErrorCode};
    use crate::observer::{ChannelObserver, RecordingObserver};
    use crate::session::SessionState;
    use futures::stream;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;

    /// Wraps a body and records when it is dropped.
    struct Tracked {
        inner: ByteStream,
        released: Arc<AtomicBool>,
    }

    impl futures::Stream for Tracked {
        type Item = Result<bytes::Bytes, BackendError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.get_mut().inner.as_mut().poll_next(cx)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    enum Behavior {
        Body(ByteStream),
        OpenError(BackendError),
    }

    #[derive(Default)]
    struct FakeBackend {
        behaviors: Mutex<VecDeque<Behavior>>,
        opened: AtomicUsize,
        released: Vec<Arc<AtomicBool>>,
        requests: Mutex<Vec<QueryRequest>>,
    }

    impl FakeBackend {
        fn with_bodies(bodies: Vec<ByteStream>) -> Self {
            let mut backend = FakeBackend::default();
            for body in bodies {
                let released = Arc::new(AtomicBool::new(false));
                backend.released.push(released.clone());
                backend.behaviors.lock().push_back(Behavior::Body(Box::pin(Tracked {
                    inner: body,
                    released,
                })));
            }
            backend
        }

        fn with_open_error(err: BackendError) -> Self {
            let backend = FakeBackend::default();
            backend.behaviors.lock().push_back(Behavior::OpenError(err));
            backend
        }

        fn released(&self, index: usize) -> bool {
            self.released[index].load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SearchBackend for FakeBackend {
        async fn open_stream(&self, request: &QueryRequest) -> Result<ByteStream, BackendError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());
            match self.behaviors.lock().pop_front() {
                Some(Behavior::Body(body)) => Ok(body),
                Some(Behavior::OpenError(err)) => Err(err),
                None => Ok(Box::pin(stream::pending())),
            }
        }
    }

    fn chunks(parts: &[&str]) -> ByteStream {
        let items: Vec<Result<bytes::Bytes, BackendError>> = parts
            .iter()
            .map(|p| Ok(bytes::Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        Box::pin(stream::iter(items))
    }

    /// Body fed by the test through a channel; stays open until the sender drops.
    fn channel_body() -> (mpsc::UnboundedSender<&'static str>, ByteStream) {
        let (tx, rx) = mpsc::unbounded_channel::<&'static str>();
        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|part| (Ok(bytes::Bytes::from_static(part.as_bytes())), rx))
        });
        (tx, Box::pin(body))
    }

    fn controller(backend: Arc<FakeBackend>) -> StreamController {
        StreamController::new(backend, IngestConfig::default()).expect("controller")
    }

    const HELLO: [&str; 4] = [
        "{\"type\":\"source\",\"items\":[{\"id\":1,\"name\":\"A\",\"url\":\"http://a\"}]}\n",
        "{\"type\":\"text\",\"delta\":\"Hello \"}\n",
        "{\"type\":\"text\",\"delta\":\"world\"}\n",
        "{\"type\":\"done\"}\n",
    ];

    #[tokio::test]
    async fn hello_world_session_completes_without_error() {
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&HELLO)]));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend.clone())
            .run(QueryRequest::new("who idolizes Spock?", "uuid-1"), observer.clone())
            .await
            .expect("report");

        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.error, None);
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].id.as_str(), "1");
        assert_eq!(report.answer_text.as_str(), "Hello world");
        assert_eq!(observer.answer_text(), "Hello world");
        assert!(observer.errors().is_empty());
        assert_eq!(observer.notifications().len(), 3);
        assert!(backend.released(0));
        assert_eq!(backend.requests.lock()[0].session_id, "uuid-1");
    }

    #[tokio::test]
    async fn first_frame_rate_limited_reports_once_and_nothing_else() {
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&[
            "{\"type\":\"error\",\"code\":429}\n",
            "{\"type\":\"text\",\"delta\":\"ignored\"}\n",
        ])]));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend.clone())
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");

        assert_eq!(report.state, SessionState::Failed(ErrorCode::RateLimited));
        assert_eq!(report.error, Some(IngestError::RateLimited));
        assert_eq!(
            observer.notifications(),
            vec![Notification::Error(ErrorCode::RateLimited)]
        );
        assert_eq!(observer.errors()[0].as_u16(), 429);
        assert!(backend.released(0));
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_do_not_stop_the_session() {
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&[
            "{\"type\":\"text\",\"delta\":\"a\"}\n{\"type\":\"future-kind\",\"x\":1}\n",
            "{oops\n{\"type\":\"text\",\"delta\":\"b\"}\n{\"type\":\"done\"}\n",
        ])]));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend)
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");

        assert!(report.is_completed());
        assert_eq!(report.answer_text.as_str(), "ab");
        assert_eq!(report.stats.frames, 5);
        assert_eq!(report.stats.dropped_frames, 1);
        assert_eq!(report.stats.ignored_frames, 1);
        assert!(observer.errors().is_empty());
    }

    #[tokio::test]
    async fn text_snapshots_grow_and_concatenate_all_deltas() {
        let deltas = ["The ", "Big ", "", "Bang ", "Theory ", "Sheldon Cooper 🖖"];
        let mut frames: Vec<String> = deltas
            .iter()
            .map(|d| serde_json::json!({"type": "text", "delta": d}).to_string() + "\n")
            .collect();
        frames.push("{\"type\":\"done\"}\n".into());
        let body: String = frames.concat();
        // Re-chunk at awkward 3-byte boundaries, splitting code points and records.
        let parts: Vec<bytes::Bytes> = body
            .as_bytes()
            .chunks(3)
            .map(bytes::Bytes::copy_from_slice)
            .collect();
        let stream: ByteStream = Box::pin(stream::iter(parts.into_iter().map(Ok::<_, BackendError>)));
        let backend = Arc::new(FakeBackend::with_bodies(vec![stream]));
        let observer = Arc::new(RecordingObserver::new());
        controller(backend)
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");

        let snapshots: Vec<String> = observer
            .notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::AnswerText(t) => Some(t.as_str().to_owned()),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 5);
        for pair in snapshots.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
        assert_eq!(snapshots.last().map(String::as_str), Some(deltas.concat().as_str()));
    }

    #[tokio::test]
    async fn cancel_mid_stream_silences_observer_and_releases_body() {
        let (tx, body) = channel_body();
        let backend = Arc::new(FakeBackend::with_bodies(vec![body]));
        let (observer, mut rx) = ChannelObserver::new();
        let handle = controller(backend.clone())
            .start(QueryRequest::new("q", "s"), Arc::new(observer))
            .expect("start");

        tx.send(HELLO[1]).expect("send");
        assert!(matches!(rx.recv().await, Some(Notification::AnswerText(_))));
        handle.abort();
        let _ = tx.send(HELLO[2]);
        let _ = tx.send(HELLO[3]);

        let report = handle.finish().await.expect("report");
        assert_eq!(report.state, SessionState::Cancelled);
        assert_eq!(report.error, None);
        assert!(backend.released(0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_while_opening_is_silent() {
        let backend = Arc::new(FakeBackend::default());
        let observer = Arc::new(RecordingObserver::new());
        let handle = controller(backend)
            .start(QueryRequest::new("q", "s"), observer.clone())
            .expect("start");
        handle.abort();
        let report = handle.finish().await.expect("report");
        assert_eq!(report.state, SessionState::Cancelled);
        assert!(observer.notifications().is_empty());
    }

    struct CancelOnText {
        abort: Mutex<Option<AbortHandle>>,
        texts: AtomicUsize,
    }

    impl IngestObserver for CancelOnText {
        fn on_answer_text(&self, _text: Arc<String>) {
            self.texts.fetch_add(1, Ordering::SeqCst);
            if let Some(abort) = self.abort.lock().as_ref() {
                abort.abort();
            }
        }
    }

    #[tokio::test]
    async fn observer_can_cancel_from_inside_a_callback() {
        let (tx, body) = channel_body();
        let backend = Arc::new(FakeBackend::with_bodies(vec![body]));
        let observer = Arc::new(CancelOnText {
            abort: Mutex::new(None),
            texts: AtomicUsize::new(0),
        });
        let handle = controller(backend)
            .start(QueryRequest::new("q", "s"), observer.clone())
            .expect("start");
        *observer.abort.lock() = Some(handle.abort_handle());

        tx.send("{\"type\":\"text\",\"delta\":\"a\"}\n{\"type\":\"text\",\"delta\":\"b\"}\n")
            .expect("send");
        let report = handle.finish().await.expect("report");
        assert_eq!(report.state, SessionState::Cancelled);
        assert_eq!(observer.texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_query_cancels_in_flight_session() {
        let (_tx, first_body) = channel_body();
        let backend = Arc::new(FakeBackend::with_bodies(vec![first_body, chunks(&HELLO)]));
        let controller = controller(backend.clone());
        let first_observer = Arc::new(RecordingObserver::new());
        let second_observer = Arc::new(RecordingObserver::new());

        let first = controller
            .start(QueryRequest::new("old", "s-1"), first_observer.clone())
            .expect("first");
        while backend.opened.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = controller
            .start(QueryRequest::new("new", "s-2"), second_observer.clone())
            .expect("second");

        assert!(first.abort_handle().is_aborted());
        let first_report = first.finish().await.expect("first report");
        let second_report = second.finish().await.expect("second report");
        assert_eq!(first_report.state, SessionState::Cancelled);
        assert!(first_observer.notifications().is_empty());
        assert!(second_report.is_completed());
        assert_eq!(second_observer.answer_text(), "Hello world");
    }

    #[tokio::test]
    async fn transport_failure_mid_stream_is_generic_and_reported_once() {
        let body: ByteStream = Box::pin(stream::iter(vec![
            Ok(bytes::Bytes::from_static(HELLO[1].as_bytes())),
            Err(BackendError::transport("connection reset by peer")),
        ]));
        let backend = Arc::new(FakeBackend::with_bodies(vec![body]));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend.clone())
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");

        assert_eq!(report.state, SessionState::Failed(ErrorCode::Generic));
        assert_eq!(observer.errors(), vec![ErrorCode::Generic]);
        assert_eq!(report.answer_text.as_str(), "Hello ");
        assert!(backend.released(0));
    }

    #[tokio::test]
    async fn frames_ahead_of_an_oversized_frame_are_delivered() {
        let oversized = format!("{{\"type\":\"text\",\"delta\":\"{}\"}}\n", "x".repeat(64));
        let body = format!("{}{}{}", HELLO[0], HELLO[1], oversized);
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&[body.as_str()])]));
        let controller = StreamController::new(backend, IngestConfig::default().max_frame_bytes(80))
            .expect("controller");
        let observer = Arc::new(RecordingObserver::new());
        let report = controller
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");

        assert!(matches!(report.error, Some(IngestError::Framing { .. })));
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.answer_text.as_str(), "Hello ");
        let notifications = observer.notifications();
        assert_eq!(notifications.len(), 3);
        assert!(matches!(notifications[0], Notification::Sources(_)));
        assert!(matches!(notifications[1], Notification::AnswerText(_)));
        assert_eq!(notifications[2], Notification::Error(ErrorCode::Generic));
    }

    #[tokio::test]
    async fn http_429_on_open_is_rate_limited() {
        let backend = Arc::new(FakeBackend::with_open_error(BackendError::status(
            429,
            "too many requests",
        )));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend)
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");
        assert_eq!(report.error, Some(IngestError::RateLimited));
        assert_eq!(observer.errors(), vec![ErrorCode::RateLimited]);
    }

    #[tokio::test]
    async fn stream_ending_without_done_is_a_framing_failure() {
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&HELLO[..3])]));
        let observer = Arc::new(RecordingObserver::new());
        let report = controller(backend)
            .run(QueryRequest::new("q", "s"), observer.clone())
            .await
            .expect("report");
        assert!(matches!(report.error, Some(IngestError::Framing { .. })));
        assert_eq!(observer.errors(), vec![ErrorCode::Generic]);
        assert_eq!(report.answer_text.as_str(), "Hello world");
    }

    #[tokio::test]
    async fn marked_stream_fills_all_three_channels() {
        let backend = Arc::new(FakeBackend::with_bodies(vec![chunks(&[
            "[{\"name\":\"Wiki\",\"url\":\"http://w\",\"snippet\":\"s\"}]\n___LLM_RE",
            "SPONSE___\nSheldon [citation:1].\n",
            "\n__RELATED_QUESTIONS__\n\n[{\"question\":\"Who is Leonard?\"}]",
        ])]));
        let controller = StreamController::new(
            backend,
            IngestConfig::default().wire_format(WireFormat::Marked),
        )
        .expect("controller");
        let observer = Arc::new(RecordingObserver::new());
        let report = controller
            .run(QueryRequest::new("q", "s"), observer)
            .await
            .expect("report");

        assert!(report.is_completed());
        assert_eq!(report.sources[0].id.as_str(), "http://w");
        assert_eq!(report.answer_text.as_str(), "Sheldon [citation:1].");
        assert_eq!(report.related[0].text, "Who is Leonard?");
    }

    #[tokio::test]
    async fn empty_session_id_is_rejected_before_opening() {
        let backend = Arc::new(FakeBackend::default());
        let result = controller(backend.clone())
            .start(QueryRequest::new("q", "  "), Arc::new(RecordingObserver::new()));
        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_outside_runtime_is_a_config_error() {
        let backend = Arc::new(FakeBackend::default());
        let result = controller(backend)
            .start(QueryRequest::new("q", "s"), Arc::new(RecordingObserver::new()));
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
