use std::sync::Arc;

use crate::accumulate::{AnswerAccumulator, RelatedAccumulator, SourcesAccumulator};
use crate::errors::{ErrorCode, IngestError};
use crate::model::{RelatedQuestion, Source};
use crate::stream::StreamEvent;

/// Lifecycle of one ingestion session.
///
/// `Idle -> Streaming -> {Completed | Failed | Cancelled}`; terminal states
/// are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Failed(ErrorCode),
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }
}

/// Snapshot update destined for the observer.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Sources(Arc<Vec<Source>>),
    AnswerText(Arc<String>),
    Related(Arc<Vec<RelatedQuestion>>),
    Error(ErrorCode),
}

/// Counters collected over a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Frames (or marked sections) decoded.
    pub frames: u64,
    /// Events applied while streaming.
    pub events: u64,
    /// Frames dropped because they failed to parse.
    pub dropped_frames: u64,
    /// Frames skipped because their kind is unknown.
    pub ignored_frames: u64,
}

/// Final state of a session, returned by `IngestHandle::finish`.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub state: SessionState,
    /// Terminal error, set only when `state` is `Failed`.
    pub error: Option<IngestError>,
    pub stats: IngestStats,
    pub sources: Arc<Vec<Source>>,
    pub answer_text: Arc<String>,
    pub related: Arc<Vec<RelatedQuestion>>,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// State of one query's ingestion: the three accumulators, the lifecycle
/// state and the terminal-error slot.
///
/// Only the stream controller mutates a session. Once terminal, further
/// events and failures are ignored and produce no notifications.
#[derive(Debug)]
pub struct IngestionSession {
    session_id: String,
    state: SessionState,
    sources: SourcesAccumulator,
    answer: AnswerAccumulator,
    related: RelatedAccumulator,
    error: Option<IngestError>,
    events: u64,
}

impl IngestionSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Idle,
            sources: SourcesAccumulator::default(),
            answer: AnswerAccumulator::default(),
            related: RelatedAccumulator::default(),
            error: None,
            events: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn error(&self) -> Option<&IngestError> {
        self.error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves an idle session to `Streaming`.
    pub fn begin(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Streaming;
        }
    }

    /// Folds one event into the session and returns the notification it
    /// causes, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<Notification> {
        if self.state != SessionState::Streaming {
            return None;
        }
        self.events += 1;
        match event {
            StreamEvent::SourceBatch(batch) => self
                .sources
                .apply(batch)
                .then(|| Notification::Sources(self.sources.snapshot())),
            StreamEvent::TextDelta(delta) => self
                .answer
                .apply(&delta)
                .then(|| Notification::AnswerText(self.answer.snapshot())),
            StreamEvent::RelatedBatch(batch) => self
                .related
                .apply(batch)
                .then(|| Notification::Related(self.related.snapshot())),
            StreamEvent::Error(ErrorCode::RateLimited) => self.fail(IngestError::RateLimited),
            StreamEvent::Error(code) => self.fail(IngestError::Backend(code)),
            StreamEvent::Done => {
                self.state = SessionState::Completed;
                None
            }
        }
    }

    /// Records a terminal error. Errors without a reportable code are not
    /// terminal: a cancellation cancels, a record parse error is ignored.
    pub fn fail(&mut self, error: IngestError) -> Option<Notification> {
        if self.is_terminal() {
            return None;
        }
        if error == IngestError::Cancelled {
            self.cancel();
            return None;
        }
        let code = error.code()?;
        self.state = SessionState::Failed(code);
        self.error = Some(error);
        Some(Notification::Error(code))
    }

    /// Moves a non-terminal session to `Cancelled`.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.state = SessionState::Cancelled;
        }
    }

    pub fn sources(&self) -> Arc<Vec<Source>> {
        self.sources.snapshot()
    }

    pub fn answer_text(&self) -> Arc<String> {
        self.answer.snapshot()
    }

    pub fn related(&self) -> Arc<Vec<RelatedQuestion>> {
        self.related.snapshot()
    }

    /// Consumes the session into its final report. `stats.events` is taken
    /// from the session itself.
    pub fn into_report(self, stats: IngestStats) -> SessionReport {
        SessionReport {
            stats: IngestStats {
                events: self.events,
                ..stats
            },
            sources: self.sources.snapshot(),
            answer_text: self.answer.snapshot(),
            related: self.related.snapshot(),
            session_id: self.session_id,
            state: self.state,
            error: self.error,
        }
    }
}
