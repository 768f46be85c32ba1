use std::cell::{Cell, RefCell};

use rhai::{Array, Dynamic, Engine, EvalAltResult, Position, Scope, AST};
use tracing::{debug, info, warn};

use pl_core::PlangError;

use crate::api::register_array_api;
use crate::array::TypedArray;

pub const FORMATTER_FUNCTION: &str = "format_exception";

const SCRIPT_LOG_TARGET: &str = "pl_script";

const BUILTIN_FORMATTER: &str = r#"
fn format_exception(kind, value, trace) {
    let lines = [];
    if trace.len() > 0 {
        lines.push("Traceback (innermost call last):\n");
        for frame in trace {
            lines.push(`  ${frame}` + "\n");
        }
    }
    lines.push(`${kind}: ${value}` + "\n");
    lines
}
"#;

#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    pub strict_variables: bool,
    pub max_call_levels: Option<usize>,
    /// Replaces the built-in error formatter. The source must define
    /// `format_exception(kind, value, trace)` returning an array of strings.
    pub formatter_source: Option<String>,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            strict_variables: true,
            max_call_levels: None,
            formatter_source: None,
        }
    }
}

/// An initialized embedded runtime plus its error formatter.
///
/// Several environments can coexist; each one serves at most one bound
/// chunk at a time.
pub struct ScriptEnvironment {
    engine: Engine,
    formatter: Option<AST>,
    pending_error: RefCell<Option<Box<EvalAltResult>>>,
    chunk_active: Cell<bool>,
    running: bool,
}

struct NormalizedError {
    kind: &'static str,
    value: String,
    trace: Vec<String>,
}

impl ScriptEnvironment {
    pub fn startup(options: EnvironmentOptions) -> Result<Self, PlangError> {
        let mut engine = Engine::new();
        engine.set_strict_variables(options.strict_variables);
        if let Some(levels) = options.max_call_levels {
            engine.set_max_call_levels(levels);
        }
        engine.on_print(|text| info!(target: SCRIPT_LOG_TARGET, "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(
                target: SCRIPT_LOG_TARGET,
                source = source.unwrap_or(""),
                position = %position,
                "{}",
                text
            )
        });

        register_array_api(&mut engine);
        verify_array_api(&engine)?;

        let formatter_source = options
            .formatter_source
            .as_deref()
            .unwrap_or(BUILTIN_FORMATTER);
        let formatter = engine.compile(formatter_source).map_err(|error| {
            PlangError::environment_init(
                "ENV_FORMATTER_LOAD",
                format!("Failed to load the error formatter: {}", error),
            )
        })?;
        let callable = formatter
            .iter_functions()
            .any(|function| function.name == FORMATTER_FUNCTION && function.params.len() == 3);
        if !callable {
            return Err(PlangError::environment_init(
                "ENV_FORMATTER_NOT_CALLABLE",
                format!(
                    "Error formatter does not define {}(kind, value, trace).",
                    FORMATTER_FUNCTION
                ),
            ));
        }

        info!(
            strict_variables = options.strict_variables,
            custom_formatter = options.formatter_source.is_some(),
            "script environment started"
        );
        Ok(Self {
            engine,
            formatter: Some(formatter),
            pending_error: RefCell::new(None),
            chunk_active: Cell::new(false),
            running: true,
        })
    }

    /// Finalizes the runtime. Returns false if it was already released.
    pub fn shutdown(mut self) -> bool {
        self.release()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_pending_error(&self) -> bool {
        self.pending_error.borrow().is_some()
    }

    pub fn has_active_chunk(&self) -> bool {
        self.chunk_active.get()
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Records a runtime error for the next [`Self::format_error`] call.
    pub(crate) fn raise(&self, error: Box<EvalAltResult>) {
        let replaced = self.pending_error.borrow_mut().replace(error);
        if let Some(previous) = replaced {
            warn!(error = %previous, "discarding unformatted script error");
        }
    }

    pub(crate) fn claim_chunk(&self) -> Result<(), PlangError> {
        if self.chunk_active.replace(true) {
            return Err(PlangError::internal_fault(
                "ENV_CHUNK_ACTIVE",
                "Another chunk is still bound to this script environment.",
            ));
        }
        Ok(())
    }

    pub(crate) fn finish_chunk(&self) {
        self.chunk_active.set(false);
    }

    /// Takes the pending runtime error and renders it through the formatter.
    pub fn format_error(&self) -> Result<String, PlangError> {
        let Some(error) = self.pending_error.borrow_mut().take() else {
            return Err(PlangError::internal_fault(
                "ENV_NO_PENDING_ERROR",
                "format_error was called without a pending script error.",
            ));
        };
        let normalized = normalize_error(&error);
        Ok(self.render(normalized))
    }

    fn render(&self, error: NormalizedError) -> String {
        let fallback = format!("{}: {}\n", error.kind, error.value);
        let Some(formatter) = self.formatter.as_ref() else {
            return fallback;
        };
        let trace = error
            .trace
            .into_iter()
            .map(Dynamic::from)
            .collect::<Array>();
        let lines = self.engine.call_fn::<Array>(
            &mut Scope::new(),
            formatter,
            FORMATTER_FUNCTION,
            (error.kind.to_string(), error.value, trace),
        );
        match lines {
            Ok(lines) => lines.iter().map(ToString::to_string).collect(),
            Err(formatter_error) => {
                warn!(error = %formatter_error, "error formatter failed; using plain text");
                fallback
            }
        }
    }

    fn release(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.formatter = None;
        if self.pending_error.borrow_mut().take().is_some() {
            warn!("script environment shut down with an unformatted error");
        }
        info!("script environment shut down");
        true
    }
}

impl Drop for ScriptEnvironment {
    fn drop(&mut self) {
        self.release();
    }
}

fn verify_array_api(engine: &Engine) -> Result<(), PlangError> {
    let smoke = engine
        .eval::<TypedArray>(r#"zeros(2, "float64") + 1.0"#)
        .map_err(|error| {
            PlangError::environment_init(
                "ENV_ARRAY_INIT",
                format!("Array support failed its start-up check: {}", error),
            )
        })?;
    if smoke.len() != 2 {
        return Err(PlangError::environment_init(
            "ENV_ARRAY_INIT",
            "Array support returned an unexpected smoke-test result.",
        ));
    }
    Ok(())
}

fn normalize_error(error: &EvalAltResult) -> NormalizedError {
    let mut trace = Vec::new();
    let mut current = error;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, _, inner, position) => {
                trace.push(frame(&format!("{}()", name), *position));
                current = inner.as_ref();
            }
            EvalAltResult::ErrorInModule(name, inner, position) => {
                trace.push(frame(&format!("module '{}'", name), *position));
                current = inner.as_ref();
            }
            _ => break,
        }
    }

    let position = current.position();
    if !position.is_none() {
        trace.push(format!("at {}", position));
    }
    let value = match current {
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => strip_position(&other.to_string(), position),
    };
    NormalizedError {
        kind: error_kind(current),
        value,
        trace,
    }
}

fn frame(label: &str, position: Position) -> String {
    if position.is_none() {
        label.to_string()
    } else {
        format!("{} at {}", label, position)
    }
}

fn strip_position(text: &str, position: Position) -> String {
    if position.is_none() {
        return text.to_string();
    }
    let suffix = format!(" ({})", position);
    text.strip_suffix(&suffix).unwrap_or(text).to_string()
}

fn error_kind(error: &EvalAltResult) -> &'static str {
    match error {
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorVariableNotFound(..)
        | EvalAltResult::ErrorFunctionNotFound(..)
        | EvalAltResult::ErrorModuleNotFound(..) => "NameError",
        EvalAltResult::ErrorArrayBounds(..)
        | EvalAltResult::ErrorStringBounds(..)
        | EvalAltResult::ErrorIndexNotFound(..) => "IndexError",
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..)
        | EvalAltResult::ErrorFor(..) => "TypeError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..) => "ResourceError",
        EvalAltResult::ErrorPropertyNotFound(..) | EvalAltResult::ErrorDotExpr(..) => {
            "AttributeError"
        }
        _ => "ScriptError",
    }
}

#[cfg(test)]
mod environment_tests {
    use super::*;
    use pl_core::ErrorKind;

    fn started() -> ScriptEnvironment {
        ScriptEnvironment::startup(EnvironmentOptions::default()).expect("startup")
    }

    fn raise_from(env: &ScriptEnvironment, source: &str) {
        let error = env
            .engine()
            .run(source)
            .expect_err("script should fail");
        env.raise(error);
    }

    #[test]
    fn startup_and_shutdown_run_once() {
        let env = started();
        assert!(env.is_running());
        assert!(!env.has_pending_error());
        assert!(!env.has_active_chunk());
        assert!(env.shutdown());
    }

    #[test]
    fn environments_are_isolated() {
        let first = started();
        let second = started();
        raise_from(&first, r#"throw "only here";"#);
        assert!(first.has_pending_error());
        assert!(!second.has_pending_error());
    }

    #[test]
    fn format_error_renders_trace_and_clears_state() {
        let env = started();
        raise_from(
            &env,
            r#"
            fn inner() { throw "boom"; }
            fn outer() { inner() }
            outer();
            "#,
        );
        let text = env.format_error().expect("formatted");
        assert!(text.starts_with("Traceback (innermost call last):\n"));
        assert!(text.contains("  outer() at line 4"));
        assert!(text.contains("  inner() at line 3"));
        assert!(text.ends_with("RuntimeError: boom\n"));
        assert!(!env.has_pending_error());
    }

    #[test]
    fn format_error_without_pending_error_is_internal_fault() {
        let env = started();
        let error = env.format_error().expect_err("nothing pending");
        assert_eq!(error.kind, ErrorKind::InternalFault);
        assert_eq!(error.code, "ENV_NO_PENDING_ERROR");
    }

    #[test]
    fn error_kinds_follow_the_rhai_error() {
        let env = started();
        raise_from(&env, "let a = [1]; a[5]");
        let text = env.format_error().expect("formatted");
        assert!(text.contains("IndexError: "), "{}", text);
        assert!(!text.contains("(line"), "{}", text);

        raise_from(&env, "missing_function(1)");
        assert!(env.format_error().expect("formatted").contains("NameError: "));
    }

    #[test]
    fn custom_formatter_replaces_builtin() {
        let env = ScriptEnvironment::startup(EnvironmentOptions {
            formatter_source: Some(
                r#"fn format_exception(kind, value, trace) { [kind + "|" + value] }"#.to_string(),
            ),
            ..EnvironmentOptions::default()
        })
        .expect("startup");
        raise_from(&env, r#"throw "bad";"#);
        assert_eq!(env.format_error().expect("formatted"), "RuntimeError|bad");
    }

    #[test]
    fn failing_formatter_falls_back_to_plain_text() {
        let env = ScriptEnvironment::startup(EnvironmentOptions {
            formatter_source: Some(
                r#"fn format_exception(kind, value, trace) { throw "formatter broke"; }"#
                    .to_string(),
            ),
            ..EnvironmentOptions::default()
        })
        .expect("startup");
        raise_from(&env, r#"throw "bad";"#);
        assert_eq!(env.format_error().expect("formatted"), "RuntimeError: bad\n");
    }

    #[test]
    fn broken_formatters_fail_startup() {
        let error = ScriptEnvironment::startup(EnvironmentOptions {
            formatter_source: Some("fn format_exception(kind, value, trace {".to_string()),
            ..EnvironmentOptions::default()
        })
        .err()
        .expect("syntax error");
        assert_eq!(error.kind, ErrorKind::EnvironmentInit);
        assert_eq!(error.code, "ENV_FORMATTER_LOAD");

        let error = ScriptEnvironment::startup(EnvironmentOptions {
            formatter_source: Some("fn format_exception(kind) { [] }".to_string()),
            ..EnvironmentOptions::default()
        })
        .err()
        .expect("wrong arity");
        assert_eq!(error.code, "ENV_FORMATTER_NOT_CALLABLE");
    }

    #[test]
    fn chunk_claims_are_exclusive() {
        let env = started();
        env.claim_chunk().expect("first claim");
        let error = env.claim_chunk().expect_err("second claim");
        assert_eq!(error.code, "ENV_CHUNK_ACTIVE");
        env.finish_chunk();
        env.claim_chunk().expect("claim after finish");
    }
}
