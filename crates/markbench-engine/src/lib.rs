//! markbench Embedded Engine
//!
//! This crate evaluates markdown with pinned JavaScript reference
//! implementations, in-process, using the Boa JavaScript engine. It lets one
//! or two "ground truth" implementations take part in a comparison without a
//! hosted HTTP service of their own.
//!
//! # Architecture
//!
//! - **[`PinnedScript`]**: the exact script version and render call of each
//!   [`ReferenceImplementation`](markbench_common::ReferenceImplementation)
//! - **[`ScriptLoader`]**: where script sources come from (HTTP by default)
//! - **[`ScriptWorker`]**: a thread owning one loaded script context
//! - **[`EmbeddedEngine`]**: lazily starts one worker per implementation
//!
//! Scripts are loaded on first use. A failed load is reported to the caller
//! and retried on the next request.

pub mod engine;
pub mod loader;
pub mod reference;
pub mod runtime;

pub use engine::{EmbeddedEngine, EngineOutput};
pub use loader::{HttpScriptLoader, ScriptLoader, StaticScriptLoader};
pub use reference::PinnedScript;
pub use runtime::{ScriptContext, ScriptWorker};
