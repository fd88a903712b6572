use crate::decoder::WireFormat;
use crate::errors::IngestError;
use crate::frame::DEFAULT_MAX_FRAME_BYTES;

/// Ingestion behavior shared by every session of a controller.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IngestConfig {
    /// Framing of the backend's response body.
    pub wire_format: WireFormat,
    /// Upper bound for one frame (or one buffered marked section).
    pub max_frame_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl IngestConfig {
    /// Overrides the wire format.
    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Overrides the frame size limit.
    pub fn max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Builds a config from the process environment.
    ///
    /// - `SEARCH_WIRE_FORMAT`: `ndjson` (default) or `marked`
    /// - `SEARCH_MAX_FRAME_BYTES`
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, IngestError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("SEARCH_WIRE_FORMAT").filter(|v| !v.trim().is_empty()) {
            config.wire_format = raw.parse()?;
        }
        if let Some(raw) = lookup("SEARCH_MAX_FRAME_BYTES") {
            config.max_frame_bytes = raw.trim().parse().map_err(|_| {
                IngestError::Config(format!("invalid SEARCH_MAX_FRAME_BYTES: {raw}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_frame_bytes == 0 {
            return Err(IngestError::Config(
                "max_frame_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
