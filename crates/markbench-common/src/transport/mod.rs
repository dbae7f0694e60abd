//! markbench Transport Layer
//!
//! This module provides the record framing used on the aggregated response
//! stream.
//!
//! # Wire Format
//!
//! - **Serialization**: one JSON object per record
//! - **Framing**: `[JSON object] + "\n\n"`
//! - **Flushing**: the writer flushes after every record
//!
//! Records are independent documents, not elements of one JSON array, so a
//! reader must parse them one at a time. [`RecordDecoder`] does this over
//! arbitrary chunk boundaries.
//!
//! # Example
//!
//! ```
//! use markbench_common::ResultEnvelope;
//! use markbench_common::transport::{encode_record, RecordDecoder};
//!
//! let bytes = encode_record(&ResultEnvelope::rejection("busy")).unwrap();
//!
//! let mut decoder = RecordDecoder::new();
//! decoder.push(&bytes[..5]);
//! assert!(decoder.next_record().unwrap().is_none());
//! decoder.push(&bytes[5..]);
//! assert_eq!(decoder.next_record().unwrap().unwrap().html, "busy");
//! ```

pub mod codec;

pub use codec::{encode_record, RecordDecoder, RECORD_DELIMITER};
