//! Marker-delimited framing used by the search backend's own `/query`
//! endpoint and by its cached replays:
//!
//! ```text
//! [ {source}, ... ]
//! ___LLM_RESPONSE___
//! answer text streamed as it is generated ...
//!
//! __RELATED_QUESTIONS__
//!
//! [ {"question": ...}, ... ]
//! ```

use crate::errors::IngestError;

pub(crate) const ANSWER_MARKER: &[u8] = b"\n___LLM_RESPONSE___\n";
pub(crate) const RELATED_MARKER: &[u8] = b"\n\n__RELATED_QUESTIONS__\n\n";

/// One decoded section of a marked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// Raw JSON array of sources.
    Sources { index: u64, bytes: Vec<u8> },
    /// Answer text, always on UTF-8 boundaries.
    Text(String),
    /// Raw JSON array of related questions.
    Related { index: u64, bytes: Vec<u8> },
    /// End of stream.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sources,
    Answer,
    Related,
}

/// Incremental decoder for the marker-delimited layout.
#[derive(Debug)]
pub struct MarkedDecoder {
    buf: Vec<u8>,
    phase: Phase,
    sections: u64,
    max_section_bytes: usize,
}

impl MarkedDecoder {
    pub fn new(max_section_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            phase: Phase::Sources,
            sections: 0,
            max_section_bytes,
        }
    }

    /// Number of sections produced so far.
    pub fn sections_decoded(&self) -> u64 {
        self.sections
    }

    /// Buffers `chunk` and appends every section it completed to `out`.
    ///
    /// On a fatal error, sections completed before it are still in `out`.
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<Section>) -> Result<(), IngestError> {
        // The answer marker can only end inside the new bytes.
        let scan_from = self.buf.len().saturating_sub(ANSWER_MARKER.len() - 1);
        self.buf.extend_from_slice(chunk);
        loop {
            match self.phase {
                Phase::Sources => {
                    let Some(pos) = find(&self.buf, ANSWER_MARKER, scan_from) else {
                        self.check_len(self.buf.len())?;
                        break;
                    };
                    self.check_len(pos)?;
                    let bytes: Vec<u8> = self.buf.drain(..pos).collect();
                    self.buf.drain(..ANSWER_MARKER.len());
                    out.push(self.sources(bytes));
                    self.phase = Phase::Answer;
                }
                Phase::Answer => {
                    if let Some(pos) = find(&self.buf, RELATED_MARKER, 0) {
                        self.push_text(pos, true, out)?;
                        self.buf.drain(..RELATED_MARKER.len());
                        self.phase = Phase::Related;
                        continue;
                    }
                    // A suffix that may open the related marker waits for more bytes.
                    let held = marker_prefix_suffix(&self.buf, RELATED_MARKER);
                    self.push_text(self.buf.len() - held, false, out)?;
                    break;
                }
                Phase::Related => {
                    self.check_len(self.buf.len())?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Flushes buffered data at end of stream and appends `Section::End`.
    pub fn finish(&mut self, out: &mut Vec<Section>) -> Result<(), IngestError> {
        match self.phase {
            Phase::Sources => {
                if !self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Err(IngestError::framing(format!(
                        "stream ended before the answer marker ({} bytes pending)",
                        self.buf.len()
                    )));
                }
                self.buf.clear();
            }
            Phase::Answer => {
                let end = self.buf.len();
                self.push_text(end, true, out)?;
            }
            Phase::Related => {
                let bytes = std::mem::take(&mut self.buf);
                self.sections += 1;
                out.push(Section::Related {
                    index: self.sections - 1,
                    bytes,
                });
            }
        }
        out.push(Section::End);
        Ok(())
    }

    fn sources(&mut self, bytes: Vec<u8>) -> Section {
        self.sections += 1;
        Section::Sources {
            index: self.sections - 1,
            bytes,
        }
    }

    /// Moves up to `end` bytes of answer text into `out`. Unless `complete`,
    /// an incomplete trailing UTF-8 sequence stays buffered.
    fn push_text(
        &mut self,
        end: usize,
        complete: bool,
        out: &mut Vec<Section>,
    ) -> Result<(), IngestError> {
        let (valid, invalid_at) = match std::str::from_utf8(&self.buf[..end]) {
            Ok(_) => (end, None),
            Err(e) if e.error_len().is_none() && !complete => (e.valid_up_to(), None),
            Err(e) => (e.valid_up_to(), Some(e.valid_up_to())),
        };
        if valid > 0 {
            let bytes: Vec<u8> = self.buf.drain(..valid).collect();
            let text = String::from_utf8(bytes).map_err(|e| {
                IngestError::framing(format!("answer text is not valid UTF-8: {e}"))
            })?;
            self.sections += 1;
            out.push(Section::Text(text));
        }
        match invalid_at {
            Some(at) => Err(IngestError::framing(format!(
                "answer text is not valid UTF-8 after byte {at}"
            ))),
            None => Ok(()),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), IngestError> {
        if len > self.max_section_bytes {
            return Err(IngestError::framing(format!(
                "section of {len} bytes exceeds limit of {} bytes",
                self.max_section_bytes
            )));
        }
        Ok(())
    }
}

/// Position of the first `needle` in `haystack` starting at or after `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Length of the longest proper prefix of `marker` that `buf` ends with.
fn marker_prefix_suffix(buf: &[u8], marker: &[u8]) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| buf.ends_with(&marker[..k]))
        .unwrap_or(0)
}
