use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::error::{MarkbenchError, Result};
use crate::protocol::ResultEnvelope;

/// Bytes written after every record.
pub const RECORD_DELIMITER: &[u8] = b"\n\n";

/// Encodes one envelope as a framed record
///
/// # Arguments
///
/// * `envelope` - The envelope to encode
///
/// # Returns
///
/// The JSON-encoded envelope followed by [`RECORD_DELIMITER`]
pub fn encode_record(envelope: &ResultEnvelope) -> Result<Bytes> {
    let mut buf = serde_json::to_vec(envelope)?;
    buf.extend_from_slice(RECORD_DELIMITER);
    Ok(Bytes::from(buf))
}

/// Incremental decoder for a record stream
///
/// Bytes are pushed as they arrive from the network; complete records are
/// pulled out with [`RecordDecoder::next_record`]. Serialized JSON never
/// contains a raw newline, so every non-blank line is one record and blank
/// lines are separators.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: BytesMut,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes to the decoder buffer
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete record, if one is buffered
    ///
    /// # Returns
    ///
    /// - `Ok(Some(envelope))` - a complete record was decoded
    /// - `Ok(None)` - more bytes are needed
    /// - `Err(_)` - a complete line was not a valid record
    pub fn next_record(&mut self) -> Result<Option<ResultEnvelope>> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(&line)?));
        }
        Ok(None)
    }

    /// Decodes whatever is left once the stream has ended
    ///
    /// A final record without its delimiter is accepted. Trailing whitespace
    /// is not an error.
    pub fn finish(&mut self) -> Result<Option<ResultEnvelope>> {
        if let Some(envelope) = self.next_record()? {
            return Ok(Some(envelope));
        }

        let rest = self.buffer.split();
        if rest.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&rest).map(Some).map_err(|e| {
            MarkbenchError::InvalidResponse(format!("Truncated record at end of stream: {}", e))
        })
    }

    /// Returns whether undecoded bytes remain buffered
    pub fn has_pending(&self) -> bool {
        !self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}
