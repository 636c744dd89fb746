//! Anvil Engine
//!
//! Lexer, parser, validator and tree-walking interpreter for `.aml` and
//! `.asl` sources:
//!
//! ```text
//! source -> tokens -> Program -> validated Program -> Value / RuntimeFault
//! ```
//!
//! Every stage collects [`Diagnostic`]s instead of stopping at the first
//! problem. Evaluation only starts when analysis found no errors (or only
//! resolution errors under [`UnresolvedPolicy::Degrade`]).

pub mod diagnostics;
pub mod engine;
pub mod frontend;
pub mod stdlib;
pub mod utils;
pub mod writer;

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use engine::{BufferHost, CancelToken, Context, FaultKind, Host, RuntimeFault, StdoutHost, Value};
pub use frontend::ast::{Dialect, Program};
pub use utils::{Error, Result, Span};
pub use writer::format_program;

use frontend::lexer::tokenize;
use frontend::parser::Parser;
use frontend::semantic::Validator;

/// What to do when names fail to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Refuse to evaluate
    #[default]
    Reject,
    /// Evaluate anyway; unresolved names evaluate to `Value::Error`
    Degrade,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub unresolved: UnresolvedPolicy,
    /// Bound on nested function calls
    pub max_call_depth: usize,
    /// Bound on syntactic nesting; deeper sources are rejected with a
    /// diagnostic
    pub max_nesting: usize,
    /// Dialect used when the source has no shebang. `None` picks it from the
    /// file extension.
    pub dialect: Option<Dialect>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unresolved: UnresolvedPolicy::Reject,
            max_call_depth: engine::DEFAULT_MAX_DEPTH,
            max_nesting: frontend::parser::MAX_NESTING,
            dialect: None,
        }
    }
}

/// Result of running one source
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// All diagnostics, ordered by position
    pub diagnostics: Vec<Diagnostic>,
    /// Value of the last top-level expression statement
    pub value: Option<Value>,
    pub fault: Option<RuntimeFault>,
    /// Whether evaluation was attempted
    pub evaluated: bool,
}

impl Outcome {
    pub fn has_errors(&self) -> bool {
        diagnostics::error_count(&self.diagnostics) > 0
    }

    /// 0 on success, 1 on any error diagnostic or fault
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() || self.fault.is_some() {
            1
        } else {
            0
        }
    }

    /// The value, or why there is none
    pub fn into_result(self) -> Result<Value> {
        if let Some(fault) = self.fault {
            return Err(Error::Fault(fault));
        }
        match self.value {
            Some(value) if self.evaluated => Ok(value),
            _ => Err(Error::Rejected {
                errors: diagnostics::error_count(&self.diagnostics),
            }),
        }
    }
}

/// Runs sources through the full pipeline. Holds only configuration, so
/// one engine can serve several threads, each with its own [`Context`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read a source file and pick its dialect
    pub fn load(&self, path: &Path) -> Result<(String, Dialect)> {
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        let source = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded {} ({} bytes)", path.display(), source.len());

        let dialect = match self.config.dialect {
            Some(dialect) => dialect,
            None => {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                Dialect::from_extension(ext).unwrap_or_else(|| {
                    warn!("{}: unrecognized extension `{}`, assuming aml", path.display(), ext);
                    Dialect::Aml
                })
            }
        };
        Ok((source, dialect))
    }

    /// Run a file in a fresh context that prints to stdout
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<Outcome> {
        let (source, dialect) = self.load(path.as_ref())?;
        let mut ctx = Context::new();
        Ok(self.run_source_as(&source, dialect, &mut ctx))
    }

    /// Run source text in `ctx`. Names already bound in `ctx` are visible to
    /// the program.
    pub fn run_source(&self, source: &str, ctx: &mut Context) -> Outcome {
        let dialect = self.config.dialect.unwrap_or_default();
        self.run_source_as(source, dialect, ctx)
    }

    /// Run source text with an explicit default dialect
    pub fn run_source_as(&self, source: &str, dialect: Dialect, ctx: &mut Context) -> Outcome {
        let (program, diagnostics) = self.analyze(source, dialect, ctx);

        if !self.may_evaluate(&diagnostics) {
            debug!("not evaluating: {} error(s)", diagnostics::error_count(&diagnostics));
            return Outcome {
                diagnostics,
                value: None,
                fault: None,
                evaluated: false,
            };
        }

        ctx.set_max_depth(self.config.max_call_depth);
        let (value, fault) = match ctx.evaluate(&program) {
            Ok(value) => (Some(value), None),
            Err(fault) => (None, Some(fault)),
        };
        Outcome {
            diagnostics,
            value,
            fault,
            evaluated: true,
        }
    }

    /// Lex, parse and validate against the names bound in `ctx`
    pub fn analyze(&self, source: &str, dialect: Dialect, ctx: &Context) -> (Program, Vec<Diagnostic>) {
        let (program, mut diagnostics) = Parser::new(tokenize(source))
            .with_dialect(dialect)
            .with_max_nesting(self.config.max_nesting)
            .parse_program();

        let mut validator = Validator::new();
        for (name, kind) in ctx.global_names() {
            validator.predeclare(&name, kind);
        }
        let validated = validator.validate(program);

        diagnostics.extend(validated.diagnostics);
        diagnostics::sort(&mut diagnostics);
        (validated.program, diagnostics)
    }

    fn may_evaluate(&self, diagnostics: &[Diagnostic]) -> bool {
        diagnostics.iter().filter(|d| d.is_error()).all(|d| {
            self.config.unresolved == UnresolvedPolicy::Degrade && d.kind == DiagnosticKind::Resolution
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let engine = Engine::default();
        let mut ctx = Context::with_host(BufferHost::new());
        assert_eq!(engine.run_source("let a = 1;", &mut ctx).exit_code(), 0);
        assert_eq!(engine.run_source("let a = ;", &mut ctx).exit_code(), 1);
        assert_eq!(engine.run_source("1 / 0;", &mut ctx).exit_code(), 1);
    }

    #[test]
    fn test_degraded_policy() {
        let strict = Engine::default();
        let degraded = Engine::new(EngineConfig {
            unresolved: UnresolvedPolicy::Degrade,
            ..EngineConfig::default()
        });
        let source = "let x = missing + 1; x;";

        let rejected = strict.run_source(source, &mut Context::with_host(BufferHost::new()));
        assert!(!rejected.evaluated);
        assert!(matches!(rejected.into_result(), Err(Error::Rejected { errors: 1 })));

        let outcome = degraded.run_source(source, &mut Context::with_host(BufferHost::new()));
        assert!(outcome.evaluated);
        assert_eq!(outcome.value, Some(Value::Error));
        // the resolution error still counts
        assert_eq!(outcome.exit_code(), 1);

        // type errors are never tolerated
        let typed = degraded.run_source("let y = 1 + true;", &mut Context::with_host(BufferHost::new()));
        assert!(!typed.evaluated);
    }

    #[test]
    fn test_degraded_unknown_base() {
        let degraded = Engine::new(EngineConfig {
            unresolved: UnresolvedPolicy::Degrade,
            ..EngineConfig::default()
        });
        let mut ctx = Context::with_host(BufferHost::new());
        let outcome = degraded.run_source("c : missing := { x := 1 } c;", &mut ctx);
        assert!(outcome.evaluated);
        assert_eq!(outcome.fault, None);
        assert_eq!(outcome.value, Some(Value::Error));
        assert_eq!(ctx.get("c"), Some(&Value::Error));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn test_names_carry_over_between_runs() {
        let engine = Engine::default();
        let mut ctx = Context::with_host(BufferHost::new());
        let first = engine.run_source("fn double(n) { return n * 2; } base := { hp := 10 }", &mut ctx);
        assert_eq!(first.exit_code(), 0);
        let second = engine.run_source("orc : base := { speed := 3 } double(orc.hp);", &mut ctx);
        assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
        assert_eq!(second.value, Some(Value::Int(20)));
    }
}
