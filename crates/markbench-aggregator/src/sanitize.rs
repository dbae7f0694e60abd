//! HTML post-processing
//!
//! Backends format their HTML differently even when they agree on the
//! structure. Every rendering is therefore turned into two extra forms:
//!
//! - **clean**: the same markup with normalized layout, for side-by-side comparison
//! - **safe**: the clean form with scripts, event handlers and dangerous URLs removed

use ammonia::Builder;
use markbench_common::protocol::error::{MarkbenchError, Result};
use regex::Regex;

/// Turns backend HTML into its clean and safe forms.
pub trait HtmlSanitizer: Send + Sync {
    /// Returns `(clean, safe)` for a non-empty `html`.
    fn clean(&self, html: &str) -> Result<(String, String)>;
}

/// Block-level elements that start on their own line in the clean form.
const BLOCK_TAGS: &str =
    "address|article|aside|blockquote|dd|div|dl|dt|figcaption|figure|footer|h[1-6]|header|hr|li|ol|p|pre|section|table|tbody|td|tfoot|th|thead|tr|ul";

/// Default sanitizer: regex layout normalization plus an ammonia allow-list.
pub struct DefaultSanitizer {
    preformatted: Regex,
    void_self_closing: Regex,
    block_open: Regex,
    block_close: Regex,
    blank_lines: Regex,
    safe: Builder<'static>,
}

impl DefaultSanitizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| {
                    MarkbenchError::Sanitizer(format!("Invalid pattern {}: {}", pattern, e))
                })
        };

        let mut safe = Builder::default();
        safe.add_generic_attributes(["class", "id", "align", "title", "start"])
            .add_tags(["input", "details", "summary", "section", "sup", "sub"])
            .add_tag_attributes("input", ["type", "checked", "disabled"])
            .add_tag_attributes("a", ["name"])
            .strip_comments(false)
            .link_rel(None);

        Ok(Self {
            preformatted: compile(r"(?is)<pre\b.*?</pre>")?,
            void_self_closing: compile(r"(?i)<(br|hr|img|input|meta|link|col|wbr)\b([^>]*?)\s*/>")?,
            block_open: compile(&format!(r"(?i)\s*(<(?:{})\b[^>]*>)", BLOCK_TAGS))?,
            block_close: compile(&format!(r"(?i)(</(?:{})>)\s*", BLOCK_TAGS))?,
            blank_lines: compile(r"\n[ \t]*\n+")?,
            safe,
        })
    }

    /// Normalizes the layout of `html` without changing its content.
    ///
    /// Line endings become `\n`, void elements lose their self-closing slash,
    /// and block-level tags start on their own line. `<pre>` blocks are kept
    /// verbatim.
    pub fn tidy(&self, html: &str) -> String {
        let html = html.replace("\r\n", "\n");
        let mut out = String::with_capacity(html.len());
        let mut last = 0;

        for pre in self.preformatted.find_iter(&html) {
            out.push_str(&self.tidy_flow(&html[last..pre.start()]));
            out.push_str(pre.as_str());
            last = pre.end();
        }
        out.push_str(&self.tidy_flow(&html[last..]));

        out.trim().to_string()
    }

    fn tidy_flow(&self, fragment: &str) -> String {
        let fragment = self.void_self_closing.replace_all(fragment, "<$1$2>");
        let fragment = self.block_open.replace_all(&fragment, "\n$1");
        let fragment = self.block_close.replace_all(&fragment, "$1\n");
        self.blank_lines.replace_all(&fragment, "\n").into_owned()
    }
}

impl HtmlSanitizer for DefaultSanitizer {
    fn clean(&self, html: &str) -> Result<(String, String)> {
        let clean = self.tidy(html);
        let safe = self.safe.clean(&clean).to_string();
        Ok((clean, safe))
    }
}
