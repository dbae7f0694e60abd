use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkbenchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Registry fetch failed: {0}")]
    RegistryFetch(String),

    #[error("Malformed registry: {0}")]
    MalformedRegistry(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Script load error: {0}")]
    ScriptLoad(String),

    #[error("Script execution error: {0}")]
    ScriptExecution(String),

    #[error("Sanitizer error: {0}")]
    Sanitizer(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MarkbenchError {
    /// Returns whether this error came from reaching the registry source
    /// rather than from its content.
    ///
    /// Fetch failures are recoverable by serving the last good snapshot;
    /// content failures are not.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            MarkbenchError::RegistryFetch(_)
                | MarkbenchError::Transport(_)
                | MarkbenchError::Timeout(_)
                | MarkbenchError::Io(_)
        )
    }
}

/// Renders an error and all of its nested sources as one message.
///
/// Each source's message is appended once, innermost included. A source whose
/// message is already part of the accumulated text (as happens when an outer
/// error formats its source into its own message) is skipped.
pub fn error_chain_message(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(inner) = source {
        let inner_message = inner.to_string();
        if !inner_message.is_empty() && !message.contains(&inner_message) {
            message.push_str(": ");
            message.push_str(&inner_message);
        }
        source = inner.source();
    }

    message
}

pub type Result<T> = std::result::Result<T, MarkbenchError>;
