//! markbench Common Types
//!
//! This crate provides the protocol definitions shared by every markbench
//! component: the registry entry model, the result envelope streamed to
//! callers, the record framing used on the wire, the registry URL cipher and
//! the per-client admission controller.
//!
//! # Overview
//!
//! markbench fans a single rendering request out to every implementation
//! listed in a registry, and streams one normalized [`ResultEnvelope`] per
//! implementation back to the caller as soon as it completes:
//!
//! - **Protocol Layer**: [`ImplementationEntry`], [`ResultEnvelope`], [`MarkbenchError`]
//! - **Transport Layer**: newline-delimited JSON records ([`transport`])
//! - **Cipher**: obfuscation of registry URLs ([`cipher`])
//! - **Rate Limiting**: per-client admission control ([`rate_limit`])
//!
//! # Wire Format
//!
//! - **Serialization**: JSON
//! - **Record Format**: `[JSON object] + "\n\n"`, flushed after every record
//! - **Ordering**: completion order (fastest backend first)
//!
//! # Example
//!
//! ```
//! use markbench_common::{ResultEnvelope, transport::encode_record};
//!
//! let envelope = ResultEnvelope::rejection("Error: slow down");
//! let record = encode_record(&envelope).unwrap();
//! assert!(record.ends_with(b"\n\n"));
//! ```

pub mod cipher;
pub mod protocol;
pub mod rate_limit;
pub mod transport;

pub use protocol::*;
