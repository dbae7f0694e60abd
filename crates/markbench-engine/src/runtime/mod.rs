pub mod context;
pub mod worker;

#[cfg(test)]
mod tests;

pub use context::ScriptContext;
pub use worker::ScriptWorker;
