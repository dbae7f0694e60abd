use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::entry::ImplementationEntry;
use super::error::{error_chain_message, MarkbenchError};

/// Identity used for records the server produces on its own behalf.
const SYNTHETIC_NAME: &str = "unknown";
const SYNTHETIC_REPO: &str = "#";

/// Rendering output of one backend, after sanitization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedHtml {
    /// Raw backend output
    pub html: String,
    /// Tidied form for display
    pub html_clean: String,
    /// Script-stripped form
    pub html_safe: String,
    /// Implementation version, when the backend reports one
    pub version: Option<String>,
}

/// One record of the aggregated response stream.
///
/// Exactly one envelope is emitted per registry entry per request. On
/// failure `error` is set and the html fields are empty; the envelope is
/// still emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub name: String,
    pub repo: String,
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmark: Option<bool>,
    /// Wall-clock seconds spent on this backend
    pub time: f64,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub html_clean: String,
    #[serde(default)]
    pub html_safe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResultEnvelope {
    /// Builds the envelope for one completed unit of work.
    ///
    /// Identity fields are copied from `entry` last, so nothing the backend
    /// produced can override them.
    ///
    /// # Arguments
    ///
    /// * `entry` - The registry entry that was queried
    /// * `outcome` - The sanitized output, or the failure that replaced it
    /// * `elapsed` - Time spent on the backend call
    pub fn from_outcome(
        entry: &ImplementationEntry,
        outcome: std::result::Result<RenderedHtml, MarkbenchError>,
        elapsed: Duration,
    ) -> Self {
        let mut envelope = match outcome {
            Ok(rendered) => ResultEnvelope {
                html: rendered.html,
                html_clean: rendered.html_clean,
                html_safe: rendered.html_safe,
                version: rendered.version,
                ..Default::default()
            },
            Err(e) => ResultEnvelope {
                error: Some(error_chain_message(&e)),
                ..Default::default()
            },
        };

        envelope.time = elapsed.as_secs_f64();
        envelope.name = entry.name.clone();
        envelope.repo = entry.repo.clone();
        envelope.lang = entry.lang.clone();
        envelope.cmark = entry.cmark;
        envelope
    }

    /// Builds the single record sent to a caller whose request was refused.
    ///
    /// The message goes into every html field so that clients displaying
    /// results show it like any other rendering.
    ///
    /// # Example
    ///
    /// ```
    /// use markbench_common::ResultEnvelope;
    ///
    /// let envelope = ResultEnvelope::rejection("Error: slow down");
    /// assert_eq!(envelope.name, "unknown");
    /// assert_eq!(envelope.html_safe, "Error: slow down");
    /// assert!(envelope.error.is_none());
    /// ```
    pub fn rejection(message: impl Into<String>) -> Self {
        let message = message.into();
        ResultEnvelope {
            name: SYNTHETIC_NAME.to_string(),
            repo: SYNTHETIC_REPO.to_string(),
            lang: String::new(),
            cmark: Some(false),
            time: 0.0,
            html: message.clone(),
            html_clean: message.clone(),
            html_safe: message,
            error: None,
            version: None,
        }
    }

    /// Returns whether this envelope reports a backend failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
