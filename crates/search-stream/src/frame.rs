//! Newline-delimited framing over raw byte chunks.
//!
//! Splitting happens on bytes, never on decoded text: `\n` cannot occur
//! inside a multi-byte UTF-8 sequence, so a chunk that ends mid code point
//! simply stays in the buffer until the rest arrives.

use crate::errors::IngestError;

/// Default cap on a single frame, including a partial one still buffering.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// One complete, delimited record of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Zero-based position of the frame within its stream.
    pub index: u64,
    /// Record bytes without the delimiter.
    pub bytes: Vec<u8>,
}

/// Incremental NDJSON frame decoder.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    next_index: u64,
    max_frame_bytes: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl LineDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            next_index: 0,
            max_frame_bytes,
        }
    }

    /// Number of frames produced so far.
    pub fn frames_decoded(&self) -> u64 {
        self.next_index
    }

    /// Buffers `chunk` and appends every frame it completed to `out`.
    ///
    /// On a fatal error, frames completed before the offending one are still
    /// in `out`.
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> Result<(), IngestError> {
        // Bytes already buffered are known to hold no delimiter.
        let mut cursor = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        let mut result = Ok(());
        while let Some(offset) = self.buf[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            if let Some(line) = record_bytes(&self.buf[start..end]) {
                if line.len() > self.max_frame_bytes {
                    result = Err(self.oversized(line.len()));
                    break;
                }
                out.push(Frame {
                    index: self.next_index,
                    bytes: line.to_vec(),
                });
                self.next_index += 1;
            }
            start = end + 1;
            cursor = start;
        }
        self.buf.drain(..start);
        result?;

        if self.buf.len() > self.max_frame_bytes {
            return Err(self.oversized(self.buf.len()));
        }
        Ok(())
    }

    /// Flushes the trailing fragment at end of stream.
    ///
    /// A fragment that is a complete JSON value is returned as the last
    /// frame; whitespace is ignored; anything else means the stream was cut
    /// inside a record.
    pub fn finish(&mut self) -> Result<Option<Frame>, IngestError> {
        let rest = std::mem::take(&mut self.buf);
        let Some(line) = record_bytes(&rest) else {
            return Ok(None);
        };
        if serde_json::from_slice::<serde::de::IgnoredAny>(line).is_err() {
            return Err(IngestError::framing(format!(
                "stream ended inside an unterminated frame ({} bytes)",
                line.len()
            )));
        }
        let frame = Frame {
            index: self.next_index,
            bytes: line.to_vec(),
        };
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn oversized(&self, len: usize) -> IngestError {
        IngestError::framing(format!(
            "frame of {len} bytes exceeds limit of {} bytes",
            self.max_frame_bytes
        ))
    }
}

/// Strips a trailing `\r`; returns `None` for blank keep-alive lines.
fn record_bytes(line: &[u8]) -> Option<&[u8]> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(line)
    }
}
