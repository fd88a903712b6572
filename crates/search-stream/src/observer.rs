use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::ErrorCode;
use crate::model::{RelatedQuestion, Source};
use crate::session::Notification;

/// Receiver of snapshot updates for one session.
///
/// Each callback fires only when its channel changed, never after the
/// session was cancelled or reached a terminal state. Callbacks run on the
/// session task and should return quickly.
pub trait IngestObserver: Send + Sync {
    fn on_sources(&self, _sources: Arc<Vec<Source>>) {}

    fn on_answer_text(&self, _text: Arc<String>) {}

    fn on_related(&self, _related: Arc<Vec<RelatedQuestion>>) {}

    fn on_error(&self, _code: ErrorCode) {}
}

pub(crate) fn deliver(observer: &dyn IngestObserver, notification: Notification) {
    match notification {
        Notification::Sources(sources) => observer.on_sources(sources),
        Notification::AnswerText(text) => observer.on_answer_text(text),
        Notification::Related(related) => observer.on_related(related),
        Notification::Error(code) => observer.on_error(code),
    }
}

/// Observer that records every notification in delivery order.
#[derive(Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the notifications received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Error codes received so far.
    pub fn errors(&self) -> Vec<ErrorCode> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Error(code) => Some(*code),
                _ => None,
            })
            .collect()
    }

    /// Latest answer text snapshot, or empty.
    pub fn answer_text(&self) -> String {
        self.notifications
            .lock()
            .iter()
            .rev()
            .find_map(|n| match n {
                Notification::AnswerText(text) => Some(text.as_str().to_owned()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn record(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

impl IngestObserver for RecordingObserver {
    fn on_sources(&self, sources: Arc<Vec<Source>>) {
        self.record(Notification::Sources(sources));
    }

    fn on_answer_text(&self, text: Arc<String>) {
        self.record(Notification::AnswerText(text));
    }

    fn on_related(&self, related: Arc<Vec<RelatedQuestion>>) {
        self.record(Notification::Related(related));
    }

    fn on_error(&self, code: ErrorCode) {
        self.record(Notification::Error(code));
    }
}

/// Observer that forwards notifications to an unbounded tokio channel, for
/// consumers that prefer pulling updates from their own task.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, notification: Notification) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(notification);
    }
}

impl IngestObserver for ChannelObserver {
    fn on_sources(&self, sources: Arc<Vec<Source>>) {
        self.forward(Notification::Sources(sources));
    }

    fn on_answer_text(&self, text: Arc<String>) {
        self.forward(Notification::AnswerText(text));
    }

    fn on_related(&self, related: Arc<Vec<RelatedQuestion>>) {
        self.forward(Notification::Related(related));
    }

    fn on_error(&self, code: ErrorCode) {
        self.forward(Notification::Error(code));
    }
}
