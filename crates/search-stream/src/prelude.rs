//! Common imports for typical ingestion usage.
pub use crate::{
    AbortHandle, ErrorCode, IngestConfig, IngestError, IngestHandle, IngestObserver,
    Notification, QueryRequest, RecordingObserver, RelatedQuestion, SessionReport, Source,
    StreamController, StreamEvent, WireFormat,
};
