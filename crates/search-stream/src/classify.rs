use serde::de::DeserializeOwned;

use crate::errors::{ErrorCode, IngestError};
use crate::frame::Frame;
use crate::marked::Section;
use crate::model::{RelatedQuestion, Source};
use crate::stream::StreamEvent;

#[derive(serde::Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(serde::Deserialize)]
struct Text {
    delta: String,
}

#[derive(serde::Deserialize)]
struct ErrorRecord {
    code: u16,
}

/// Classifies one frame into a `StreamEvent`.
///
/// Unknown discriminants yield `Ok(None)` so newer backends can add record
/// kinds without breaking older clients. A frame that cannot be parsed yields
/// `IngestError::RecordParse`, which callers skip.
pub fn classify(frame: &Frame) -> Result<Option<StreamEvent>, IngestError> {
    let text = std::str::from_utf8(&frame.bytes)
        .map_err(|e| IngestError::record_parse(frame.index, format!("invalid UTF-8: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| IngestError::record_parse(frame.index, format!("invalid JSON: {e}")))?;
    let Some(kind) = value.get("type").and_then(|v| v.as_str()) else {
        return Err(IngestError::record_parse(
            frame.index,
            "record has no string `type` field",
        ));
    };

    let event = match kind {
        "source" | "sources" => {
            StreamEvent::SourceBatch(payload::<Items<Source>>(frame, kind, &value)?.items)
        }
        "text" => StreamEvent::TextDelta(payload::<Text>(frame, kind, &value)?.delta),
        "related" => StreamEvent::RelatedBatch(
            payload::<Items<RelatedQuestion>>(frame, kind, &value)?.items,
        ),
        "error" => StreamEvent::Error(ErrorCode::from_status(
            payload::<ErrorRecord>(frame, kind, &value)?.code,
        )),
        "done" => StreamEvent::Done,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Classifies one section of a marker-delimited stream.
pub fn classify_section(section: Section) -> Result<Option<StreamEvent>, IngestError> {
    match section {
        Section::Sources { index, bytes } => serde_json::from_slice::<Vec<Source>>(&bytes)
            .map(|sources| Some(StreamEvent::SourceBatch(sources)))
            .map_err(|e| IngestError::record_parse(index, format!("malformed sources: {e}"))),
        Section::Text(text) => Ok(Some(StreamEvent::TextDelta(text))),
        Section::Related { bytes, .. } if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Section::Related { index, bytes } => serde_json::from_slice::<Vec<RelatedQuestion>>(&bytes)
            .map(|related| Some(StreamEvent::RelatedBatch(related)))
            .map_err(|e| {
                IngestError::record_parse(index, format!("malformed related questions: {e}"))
            }),
        Section::End => Ok(Some(StreamEvent::Done)),
    }
}

fn payload<T: DeserializeOwned>(
    frame: &Frame,
    kind: &str,
    value: &serde_json::Value,
) -> Result<T, IngestError> {
    serde::Deserialize::deserialize(value).map_err(|e| {
        IngestError::record_parse(frame.index, format!("malformed `{kind}` record: {e}"))
    })
}
