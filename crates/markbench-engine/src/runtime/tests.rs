#[cfg(test)]
mod tests {
    use crate::reference::PinnedScript;
    use crate::runtime::{ScriptContext, ScriptWorker};
    use markbench_common::{MarkbenchError, ReferenceImplementation};

    // Stand-in for markdown-it exposing the same factory function
    const FAKE_MARKDOWN_IT: &str = r#"
        var markdownit = function () {
            return {
                render: function (src) {
                    if (src === 'boom') { throw new Error('parser exploded'); }
                    if (src === 'nothing') { return undefined; }
                    return '<p>' + src + '</p>\n';
                }
            };
        };
    "#;

    fn markdown_it() -> &'static PinnedScript {
        PinnedScript::of(ReferenceImplementation::MarkdownIt)
    }

    #[test]
    fn test_context_renders_with_prelude() {
        let mut ctx = ScriptContext::load(FAKE_MARKDOWN_IT, markdown_it()).unwrap();
        assert_eq!(ctx.render("hi").unwrap(), "<p>hi</p>\n");
    }

    #[test]
    fn test_context_keeps_unicode_and_quotes() {
        let mut ctx = ScriptContext::load(FAKE_MARKDOWN_IT, markdown_it()).unwrap();
        assert_eq!(
            ctx.render("\"Grüße\" 'x' \\ `y`").unwrap(),
            "<p>\"Grüße\" 'x' \\ `y`</p>\n"
        );
    }

    #[test]
    fn test_context_undefined_result_is_empty() {
        let mut ctx = ScriptContext::load(FAKE_MARKDOWN_IT, markdown_it()).unwrap();
        assert_eq!(ctx.render("nothing").unwrap(), "");
    }

    #[test]
    fn test_context_render_error() {
        let mut ctx = ScriptContext::load(FAKE_MARKDOWN_IT, markdown_it()).unwrap();
        let err = ctx.render("boom").unwrap_err();
        assert!(matches!(err, MarkbenchError::ScriptExecution(_)));
        // context stays usable after a thrown error
        assert_eq!(ctx.render("ok").unwrap(), "<p>ok</p>\n");
    }

    #[test]
    fn test_context_syntax_error_fails_load() {
        let result = ScriptContext::load("this is not valid javascript ))", markdown_it());
        assert!(matches!(result, Err(MarkbenchError::ScriptLoad(_))));
    }

    #[test]
    fn test_context_missing_prelude_symbol_fails_load() {
        // markdownit is never defined, so the prelude throws
        let result = ScriptContext::load("var unrelated = 1;", markdown_it());
        assert!(matches!(result, Err(MarkbenchError::ScriptLoad(_))));
    }

    #[tokio::test]
    async fn test_worker_renders_concurrent_requests() {
        let worker = ScriptWorker::start(markdown_it(), FAKE_MARKDOWN_IT.to_string())
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(worker.render("a"), worker.render("b"), worker.render("c"));
        assert_eq!(a.unwrap(), "<p>a</p>\n");
        assert_eq!(b.unwrap(), "<p>b</p>\n");
        assert_eq!(c.unwrap(), "<p>c</p>\n");
    }

    #[tokio::test]
    async fn test_worker_load_failure() {
        let result = ScriptWorker::start(markdown_it(), "))".to_string()).await;
        assert!(matches!(result, Err(MarkbenchError::ScriptLoad(_))));
    }
}
