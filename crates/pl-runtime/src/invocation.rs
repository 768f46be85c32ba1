use rhai::{CallFnOptions, Dynamic, EvalAltResult, FnPtr, Scope, AST};
use tracing::{debug, warn};

use pl_core::{ErrorKind, PlangError, PointBuffer};

use crate::chunk::BoundChunk;
use crate::environment::ScriptEnvironment;

/// Name of the function every script must define.
pub const ENTRY_FUNCTION: &str = "process";

#[derive(Debug, Clone)]
enum EntryPoint {
    Function,
    Pointer(FnPtr),
}

struct CompiledScript {
    ast: AST,
    module_scope: Scope<'static>,
    entry: EntryPoint,
}

/// One user script bound to an environment. Compiled lazily on the first
/// invoke and reused for every later chunk.
pub struct ScriptInvocation<'env> {
    env: &'env ScriptEnvironment,
    source: String,
    compiled: Option<CompiledScript>,
    failure: Option<PlangError>,
}

impl<'env> ScriptInvocation<'env> {
    pub fn new(env: &'env ScriptEnvironment, source: impl Into<String>) -> Self {
        Self {
            env,
            source: source.into(),
            compiled: None,
            failure: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn environment(&self) -> &'env ScriptEnvironment {
        self.env
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Wraps every column of `buffer` as a view for the next invoke.
    pub fn bind<'a>(
        &'a mut self,
        buffer: &'a mut PointBuffer,
    ) -> Result<BoundChunk<'a, 'env>, PlangError> {
        BoundChunk::bind(self, buffer)
    }

    /// Compiles the script and runs its top-level statements once. A failure
    /// is remembered and returned again by every later call.
    pub fn compile(&mut self) -> Result<(), PlangError> {
        if self.compiled.is_some() {
            return Ok(());
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        match self.compile_fresh() {
            Ok(compiled) => {
                debug!(entry = ?compiled.entry, "script compiled");
                self.compiled = Some(compiled);
                Ok(())
            }
            Err(error) => {
                warn!(code = %error.code, "script compilation failed");
                self.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    pub(crate) fn call_entry(
        &mut self,
        input: Dynamic,
        output: Dynamic,
    ) -> Result<Dynamic, PlangError> {
        self.compile()?;
        let env = self.env;
        let Some(compiled) = self.compiled.as_mut() else {
            return Err(PlangError::internal_fault(
                "SCRIPT_NOT_COMPILED",
                "Script has no compiled entry point.",
            ));
        };
        let outcome = match &compiled.entry {
            EntryPoint::Function => env.engine().call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(false).rewind_scope(true),
                &mut compiled.module_scope,
                &compiled.ast,
                ENTRY_FUNCTION,
                (input, output),
            ),
            EntryPoint::Pointer(pointer) => {
                pointer.call::<Dynamic>(env.engine(), &compiled.ast, (input, output))
            }
        };
        outcome.map_err(|error| diagnose(env, error, ErrorKind::RuntimeFailure, "SCRIPT_RUNTIME"))
    }

    fn compile_fresh(&self) -> Result<CompiledScript, PlangError> {
        let engine = self.env.engine();
        let ast = engine.compile(&self.source).map_err(|error| {
            diagnose(self.env, error.into(), ErrorKind::Compile, "SCRIPT_COMPILE")
        })?;

        let mut module_scope = Scope::new();
        engine
            .run_ast_with_scope(&mut module_scope, &ast)
            .map_err(|error| diagnose(self.env, error, ErrorKind::Compile, "SCRIPT_MODULE_INIT"))?;

        let entry = resolve_entry(&ast, &module_scope)?;
        Ok(CompiledScript {
            ast,
            module_scope,
            entry,
        })
    }
}

fn resolve_entry(ast: &AST, module_scope: &Scope<'_>) -> Result<EntryPoint, PlangError> {
    let arities = ast
        .iter_functions()
        .filter(|function| function.name == ENTRY_FUNCTION)
        .map(|function| function.params.len())
        .collect::<Vec<_>>();
    if arities.contains(&2) {
        return Ok(EntryPoint::Function);
    }

    if let Some(value) = module_scope.get_value::<Dynamic>(ENTRY_FUNCTION) {
        let type_name = value.type_name();
        return match value.try_cast::<FnPtr>() {
            Some(pointer) => Ok(EntryPoint::Pointer(pointer)),
            None => Err(PlangError::not_callable(
                "SCRIPT_ENTRY_NOT_CALLABLE",
                format!(
                    "Module-level \"{}\" is a {}, not a function.",
                    ENTRY_FUNCTION, type_name
                ),
            )),
        };
    }

    if !arities.is_empty() {
        return Err(PlangError::not_callable(
            "SCRIPT_ENTRY_NOT_CALLABLE",
            format!(
                "Function \"{}\" must take (input, output); found {} parameter(s).",
                ENTRY_FUNCTION,
                arities
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or ")
            ),
        ));
    }

    Err(PlangError::lookup(
        "SCRIPT_ENTRY_MISSING",
        format!("Script does not define a \"{}\" function.", ENTRY_FUNCTION),
    ))
}

fn diagnose(
    env: &ScriptEnvironment,
    error: Box<EvalAltResult>,
    kind: ErrorKind,
    code: &str,
) -> PlangError {
    env.raise(error);
    match env.format_error() {
        Ok(text) => PlangError::new(kind, code, text),
        Err(fault) => fault,
    }
}

#[cfg(test)]
mod invocation_tests {
    use super::*;
    use crate::environment::EnvironmentOptions;

    fn env() -> ScriptEnvironment {
        ScriptEnvironment::startup(EnvironmentOptions::default()).expect("startup")
    }

    #[test]
    fn compile_finds_a_two_argument_entry() {
        let env = env();
        let mut invocation = ScriptInvocation::new(&env, "fn process(input, output) { 1 }");
        assert!(!invocation.is_compiled());
        invocation.compile().expect("compile");
        assert!(invocation.is_compiled());
        invocation.compile().expect("cached compile");
    }

    #[test]
    fn syntax_errors_are_compile_errors_and_stay_cached() {
        let env = env();
        let mut invocation = ScriptInvocation::new(&env, "fn process(input, output) {");
        let first = invocation.compile().expect_err("syntax error");
        assert_eq!(first.kind, ErrorKind::Compile);
        assert_eq!(first.code, "SCRIPT_COMPILE");
        assert!(first.message.contains("SyntaxError"));
        assert!(!env.has_pending_error());

        let second = invocation.compile().expect_err("cached");
        assert_eq!(second, first);
    }

    #[test]
    fn module_statements_run_once_at_compile() {
        let env = env();
        let mut invocation = ScriptInvocation::new(
            &env,
            r#"throw "module failed"; fn process(input, output) {}"#,
        );
        let error = invocation.compile().expect_err("module error");
        assert_eq!(error.code, "SCRIPT_MODULE_INIT");
        assert!(error.message.contains("module failed"));
    }

    #[test]
    fn missing_and_non_callable_entries_are_distinguished() {
        let env = env();
        let error = ScriptInvocation::new(&env, "fn other(a, b) {}")
            .compile()
            .expect_err("missing");
        assert_eq!(error.kind, ErrorKind::Lookup);

        let error = ScriptInvocation::new(&env, "let process = 5;")
            .compile()
            .expect_err("integer");
        assert_eq!(error.kind, ErrorKind::NotCallable);
        assert!(error.message.contains("i64"), "{}", error.message);

        let error = ScriptInvocation::new(&env, "fn process(input) {}")
            .compile()
            .expect_err("arity");
        assert_eq!(error.kind, ErrorKind::NotCallable);
        assert!(error.message.contains("found 1"));
    }

    #[test]
    fn closures_bound_to_the_entry_name_are_callable() {
        let env = env();
        let mut invocation =
            ScriptInvocation::new(&env, "let process = |input, output| 42;");
        invocation.compile().expect("compile");
        let value = invocation
            .call_entry(Dynamic::UNIT, Dynamic::UNIT)
            .expect("call");
        assert_eq!(value.as_int().expect("int"), 42);
    }

    #[test]
    fn runtime_errors_are_formatted() {
        let env = env();
        let mut invocation =
            ScriptInvocation::new(&env, r#"fn process(input, output) { throw "nope"; }"#);
        let error = invocation
            .call_entry(Dynamic::UNIT, Dynamic::UNIT)
            .expect_err("throws");
        assert_eq!(error.kind, ErrorKind::RuntimeFailure);
        assert!(error.message.contains("process()"));
        assert!(error.message.ends_with("RuntimeError: nope\n"));
        assert!(!env.has_pending_error());
    }
}
