pub mod entry;
pub mod envelope;
pub mod error;


pub use entry::{
    decode_registry, Endpoint, ImplementationEntry, ReferenceImplementation, RegistryDocument,
    RegistryRecord,
};
pub use envelope::{RenderedHtml, ResultEnvelope};
pub use error::{error_chain_message, MarkbenchError, Result};
