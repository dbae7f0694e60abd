pub mod aggregator;
pub mod config;
pub mod http_server;
pub mod invoker;
pub mod registry;
pub mod sanitize;

pub use aggregator::{Aggregator, Dispatch};
pub use config::{AggregatorConfig, PassphraseSource, RegistryConfig};
pub use http_server::HttpServer;
pub use invoker::{EndpointInvoker, Invoke, RawRender};
pub use registry::{
    FileRegistrySource, HttpRegistrySource, RegistryCache, RegistrySnapshot, RegistrySource,
};
pub use sanitize::{DefaultSanitizer, HtmlSanitizer};
