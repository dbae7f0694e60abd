use markbench_common::ReferenceImplementation;

/// A reference implementation script at a fixed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedScript {
    pub reference: ReferenceImplementation,
    /// Version reported with every rendering
    pub version: &'static str,
    /// Where the script source is published
    pub url: &'static str,
    /// Evaluated once after the script source
    pub prelude: Option<&'static str>,
    /// JavaScript expression rendering the string bound to `input`
    pub render_expr: &'static str,
}

const COMMONMARK_JS: PinnedScript = PinnedScript {
    reference: ReferenceImplementation::CommonMarkJs,
    version: "0.28.1",
    url: "https://raw.githubusercontent.com/commonmark/commonmark.js/0.28.1/dist/commonmark.min.js",
    prelude: None,
    render_expr: "(new commonmark.HtmlRenderer()).render((new commonmark.Parser()).parse(input))",
};

const MARKDOWN_IT: PinnedScript = PinnedScript {
    reference: ReferenceImplementation::MarkdownIt,
    version: "8.4.0",
    url: "https://raw.githubusercontent.com/markdown-it/markdown-it/8.4.0/dist/markdown-it.min.js",
    prelude: Some("var MarkdownIt = markdownit();"),
    render_expr: "MarkdownIt.render(input)",
};

impl PinnedScript {
    /// Returns the pinned script of a reference implementation.
    pub fn of(reference: ReferenceImplementation) -> &'static PinnedScript {
        match reference {
            ReferenceImplementation::CommonMarkJs => &COMMONMARK_JS,
            ReferenceImplementation::MarkdownIt => &MARKDOWN_IT,
        }
    }
}
