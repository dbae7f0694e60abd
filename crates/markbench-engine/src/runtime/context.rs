use boa_engine::{js_string, value::JsValue, Context, Source};
use markbench_common::protocol::error::{MarkbenchError, Result};

use crate::reference::PinnedScript;

/// Name of the global function wrapping a script's render expression.
const RENDER_FUNCTION: &str = "__markbench_render";

/// Boa context holding one loaded reference implementation
///
/// Boa's `Context` is single-threaded: it is neither `Send` nor `Sync`, and
/// its garbage collector is thread-local. A `ScriptContext` must therefore be
/// created and used on one thread. [`ScriptWorker`](super::ScriptWorker)
/// owns one on a dedicated thread.
pub struct ScriptContext {
    ctx: Context,
}

impl ScriptContext {
    /// Create a context and evaluate a pinned script in it
    ///
    /// Evaluates, in order, the script source, the script's prelude and a
    /// global render function wrapping its render expression.
    ///
    /// # Arguments
    ///
    /// * `source` - The script source text
    /// * `script` - The pinned script metadata
    pub fn load(source: &str, script: &PinnedScript) -> Result<Self> {
        let mut ctx = Context::default();

        ctx.eval(Source::from_bytes(source)).map_err(|e| {
            MarkbenchError::ScriptLoad(format!("{} evaluation error: {}", script.reference, e))
        })?;

        if let Some(prelude) = script.prelude {
            ctx.eval(Source::from_bytes(prelude)).map_err(|e| {
                MarkbenchError::ScriptLoad(format!("{} prelude error: {}", script.reference, e))
            })?;
        }

        let render_function = format!(
            "function {}(input) {{ return {}; }}",
            RENDER_FUNCTION, script.render_expr
        );
        ctx.eval(Source::from_bytes(&render_function)).map_err(|e| {
            MarkbenchError::ScriptLoad(format!("{} render setup error: {}", script.reference, e))
        })?;

        Ok(Self { ctx })
    }

    /// Render markdown text to HTML
    ///
    /// A `null` or `undefined` result renders as the empty string. Any other
    /// value is converted with JavaScript `String` semantics.
    pub fn render(&mut self, input: &str) -> Result<String> {
        let ctx = &mut self.ctx;

        let func = ctx
            .global_object()
            .get(js_string!(RENDER_FUNCTION), ctx)
            .map_err(|e| MarkbenchError::ScriptExecution(e.to_string()))?;

        let func_obj = func
            .as_object()
            .ok_or_else(|| MarkbenchError::ScriptExecution("Render function is missing".into()))?;

        let arg = JsValue::from(js_string!(input));
        let result = func_obj
            .call(&JsValue::undefined(), &[arg], ctx)
            .map_err(|e| MarkbenchError::ScriptExecution(format!("Render error: {}", e)))?;

        if result.is_null_or_undefined() {
            return Ok(String::new());
        }

        let html = result
            .to_string(ctx)
            .map_err(|e| MarkbenchError::ScriptExecution(format!("Render result error: {}", e)))?;
        Ok(html.to_std_string_escaped())
    }
}
