use crate::errors::ErrorCode;
use crate::model::{RelatedQuestion, Source};

/// Classified interpretation of one wire frame.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Sources in citation order.
    SourceBatch(Vec<Source>),
    /// Next fragment of the answer text.
    TextDelta(String),
    /// Follow-up questions in arrival order.
    RelatedBatch(Vec<RelatedQuestion>),
    /// Backend-reported terminal error.
    Error(ErrorCode),
    /// Terminal success marker.
    Done,
}
