use std::pin::Pin;

use crate::errors::BackendError;
use crate::model::QueryRequest;

/// Raw response body delivered in arrival order.
///
/// Dropping the stream must release the underlying connection.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, BackendError>> + Send + 'static>>;

/// Source of streamed answers.
///
/// The session id in the request is forwarded opaquely for correlation;
/// implementations never generate one.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Opens the answer stream for `request`.
    async fn open_stream(&self, request: &QueryRequest) -> Result<ByteStream, BackendError>;
}
