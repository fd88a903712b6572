//! Streaming ingester for search answers.
//!
//! A response body arrives as arbitrary byte chunks. The crate frames those
//! bytes into records, classifies each record into a [`StreamEvent`], folds
//! events into three independent channels (sources, answer text and related
//! questions) and pushes a fresh snapshot of a channel to an
//! [`IngestObserver`] every time that channel changes.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use search_stream::http::HttpSearchBackend;
//! use search_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), IngestError> {
//! let backend = Arc::new(HttpSearchBackend::from_env()?);
//! let controller = StreamController::new(backend, IngestConfig::from_env()?)?;
//!
//! let observer = Arc::new(RecordingObserver::new());
//! let handle = controller.start(
//!     QueryRequest::new("Who said live long and prosper?", "3f0c2a"),
//!     observer.clone(),
//! )?;
//! let report = handle.finish().await?;
//!
//! println!("{}", report.answer_text);
//! # Ok(())
//! # }
//! ```

/// Per-channel accumulators with copy-on-write snapshots.
pub mod accumulate;
/// Byte source contract for streamed answers.
pub mod backend;
/// Record classification into stream events.
pub mod classify;
/// Ingestion settings.
pub mod config;
/// Session lifecycle, cancellation and delivery.
pub mod controller;
/// Combined framing and classification pipeline.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Newline-delimited record framing.
pub mod frame;
/// HTTP implementation of [`SearchBackend`].
pub mod http;
/// Marker-delimited record framing.
pub mod marked;
/// Domain records carried by the stream.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Observer contract and ready-made observers.
pub mod observer;
/// Common imports for typical usage.
pub mod prelude;
/// Per-query ingestion state.
pub mod session;
/// Normalized stream events.
pub mod stream;

pub use backend::{ByteStream, SearchBackend};
pub use config::IngestConfig;
pub use controller::{AbortHandle, IngestHandle, StreamController};
pub use decoder::{EventDecoder, WireFormat};
pub use errors::{BackendError, ErrorCode, IngestError};
pub use model::{PageImage, QueryRequest, RelatedQuestion, Source, SourceId};
pub use observability::init_observability;
pub use observer::{ChannelObserver, IngestObserver, RecordingObserver};
pub use session::{IngestStats, IngestionSession, Notification, SessionReport, SessionState};
pub use stream::StreamEvent;
