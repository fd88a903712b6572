use std::fmt;

/// Opaque identifier of a cited source.
///
/// The backend sends either a string or an integer; both are kept as their
/// textual form so `1` and `"1"` compare equal.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a source id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for SourceId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SourceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

/// Thumbnail attached to a source page.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    pub thumbnail_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// A cited source. Citation markers in the answer refer to its 1-based
/// position in the sources snapshot.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", from = "WireSource")]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_image_of_page: Option<PageImage>,
}

impl Source {
    /// Creates a source without a thumbnail.
    pub fn new(
        id: impl Into<SourceId>,
        name: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            snippet: snippet.into(),
            primary_image_of_page: None,
        }
    }
}

// Plain search contexts carry no id; their url stands in as identity.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSource {
    #[serde(default)]
    id: Option<SourceId>,
    #[serde(default)]
    name: String,
    url: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    primary_image_of_page: Option<PageImage>,
}

impl From<WireSource> for Source {
    fn from(wire: WireSource) -> Self {
        Self {
            id: wire.id.unwrap_or_else(|| SourceId::new(wire.url.clone())),
            name: wire.name,
            url: wire.url,
            snippet: wire.snippet,
            primary_image_of_page: wire.primary_image_of_page,
        }
    }
}

/// A follow-up question suggested by the backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelatedQuestion {
    #[serde(alias = "question")]
    pub text: String,
}

impl RelatedQuestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Parameters of one search query.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueryRequest {
    /// User query, forwarded verbatim.
    pub query: String,
    /// Caller-supplied correlation id (`search_uuid` on the wire).
    pub session_id: String,
    /// Whether the backend should produce related questions.
    pub generate_related_questions: bool,
}

impl QueryRequest {
    /// Creates a request that asks for related questions.
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            generate_related_questions: true,
        }
    }

    /// Enables or disables related question generation.
    pub fn related_questions(mut self, enabled: bool) -> Self {
        self.generate_related_questions = enabled;
        self
    }
}
