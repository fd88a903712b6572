use std::time::Duration;

use crate::errors::IngestError;

/// Configuration for the HTTP search backend client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpBackendConfig {
    /// Base URL of the search service; `/query` is appended.
    pub base_url: String,
    /// Optional bearer token.
    pub api_token: Option<String>,
    /// Limit for establishing the connection.
    pub connect_timeout: Duration,
    /// Limit for the whole request, including the streamed body.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    /// Creates a config with default timeouts and no token.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from the process environment.
    ///
    /// - `SEARCH_BACKEND_URL` (required)
    /// - `SEARCH_BACKEND_TOKEN`
    /// - `SEARCH_BACKEND_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, IngestError> {
        let base_url = lookup("SEARCH_BACKEND_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(IngestError::Config(
                "missing SEARCH_BACKEND_URL for the search backend".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(token) = lookup("SEARCH_BACKEND_TOKEN").filter(|t| !t.trim().is_empty()) {
            config = config.api_token(token.trim());
        }
        if let Some(raw) = lookup("SEARCH_BACKEND_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                IngestError::Config(format!("invalid SEARCH_BACKEND_TIMEOUT_SECS: {raw}"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Sets the bearer token.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the overall request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn query_url(&self) -> String {
        format!("{}/query", self.base_url.trim_end_matches('/'))
    }
}
