use futures::StreamExt as _;
use tracing::debug;

use crate::backend::{ByteStream, SearchBackend};
use crate::errors::{BackendError, IngestError};
use crate::model::QueryRequest;

use super::config::HttpBackendConfig;

/// Longest error body kept in a `BackendError::Status` message.
const MAX_ERROR_BODY: usize = 512;

/// `SearchBackend` that streams answers from the search service over HTTP.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpSearchBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, IngestError> {
        if config.base_url.trim().is_empty() {
            return Err(IngestError::Config(
                "search backend base_url must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a backend from `SEARCH_BACKEND_*` environment variables.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::new(HttpBackendConfig::from_env()?)
    }
}

pub(crate) fn build_request_body(request: &QueryRequest) -> serde_json::Value {
    serde_json::json!({
        "query": request.query,
        "search_uuid": request.session_id,
        "generate_related_questions": request.generate_related_questions,
    })
}

#[async_trait::async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn open_stream(&self, request: &QueryRequest) -> Result<ByteStream, BackendError> {
        debug!(session_id = %request.session_id, url = %self.config.query_url(), "opening search stream");
        let mut http_req = self
            .client
            .post(self.config.query_url())
            .json(&build_request_body(request));
        if let Some(token) = self.config.api_token.as_deref() {
            http_req = http_req.bearer_auth(token);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("search request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(BackendError::status(status.as_u16(), body));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BackendError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(body))
    }
}
