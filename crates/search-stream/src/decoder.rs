use std::str::FromStr;

use tracing::{debug, warn};

use crate::classify::{classify, classify_section};
use crate::errors::IngestError;
use crate::frame::LineDecoder;
use crate::marked::{MarkedDecoder, Section};
use crate::stream::StreamEvent;

/// Framing of the backend's response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// One `type`-tagged JSON record per line.
    #[default]
    Ndjson,
    /// Sources JSON, answer text and related JSON separated by marker lines.
    Marked,
}

impl FromStr for WireFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            "marked" | "legacy" => Ok(Self::Marked),
            other => Err(IngestError::Config(format!("unknown wire format: {other}"))),
        }
    }
}

enum Framing {
    Lines(LineDecoder),
    Marked(MarkedDecoder),
}

/// Frame decoder and classifier joined into one incremental pipeline.
///
/// Records that fail to parse are logged and counted, never returned.
pub struct EventDecoder {
    framing: Framing,
    dropped: u64,
    ignored: u64,
}

impl EventDecoder {
    pub fn new(format: WireFormat, max_frame_bytes: usize) -> Self {
        let framing = match format {
            WireFormat::Ndjson => Framing::Lines(LineDecoder::new(max_frame_bytes)),
            WireFormat::Marked => Framing::Marked(MarkedDecoder::new(max_frame_bytes)),
        };
        Self {
            framing,
            dropped: 0,
            ignored: 0,
        }
    }

    /// Feeds one chunk and appends the events it completed to `events`, in
    /// order.
    ///
    /// A fatal framing error is returned only after the events decoded ahead
    /// of it were appended, so callers see the same events however the
    /// bytes were chunked.
    pub fn push_chunk(
        &mut self,
        chunk: &[u8],
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), IngestError> {
        match &mut self.framing {
            Framing::Lines(decoder) => {
                let mut frames = Vec::new();
                let result = decoder.push_chunk(chunk, &mut frames);
                for frame in frames {
                    let classified = classify(&frame);
                    self.keep(classified, events);
                }
                result
            }
            Framing::Marked(decoder) => {
                let mut sections = Vec::new();
                let result = decoder.push_chunk(chunk, &mut sections);
                self.keep_sections(sections, events);
                result
            }
        }
    }

    /// Flushes the decoder at end of stream.
    pub fn finish(&mut self, events: &mut Vec<StreamEvent>) -> Result<(), IngestError> {
        match &mut self.framing {
            Framing::Lines(decoder) => {
                if let Some(frame) = decoder.finish()? {
                    let classified = classify(&frame);
                    self.keep(classified, events);
                }
                Ok(())
            }
            Framing::Marked(decoder) => {
                let mut sections = Vec::new();
                let result = decoder.finish(&mut sections);
                self.keep_sections(sections, events);
                result
            }
        }
    }

    /// Frames (or marked sections) decoded so far.
    pub fn frames(&self) -> u64 {
        match &self.framing {
            Framing::Lines(decoder) => decoder.frames_decoded(),
            Framing::Marked(decoder) => decoder.sections_decoded(),
        }
    }

    /// Frames dropped because they failed to parse.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Frames skipped because their kind is unknown.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    fn keep_sections(&mut self, sections: Vec<Section>, events: &mut Vec<StreamEvent>) {
        for section in sections {
            let classified = classify_section(section);
            self.keep(classified, events);
        }
    }

    fn keep(
        &mut self,
        classified: Result<Option<StreamEvent>, IngestError>,
        events: &mut Vec<StreamEvent>,
    ) {
        match classified {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {
                self.ignored += 1;
                debug!("ignoring record of unknown type");
            }
            Err(err) => {
                self.dropped += 1;
                warn!(error = %err, "dropping malformed record");
            }
        }
    }
}
