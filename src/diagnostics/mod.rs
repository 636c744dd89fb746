//! Diagnostics
//!
//! Every problem found before evaluation (lexing, parsing, resolution and
//! static checks) is collected as a [`Diagnostic`] instead of aborting the
//! pipeline, so a single run reports as much as possible.

pub mod report;

use std::fmt;

use serde::Serialize;

use crate::utils::Span;

pub use report::{DiagnosticRecord, FaultRecord, RunReport};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Which pipeline stage a diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Lex,
    Syntax,
    Resolution,
    Type,
}

/// Numbered diagnostic catalogue.
///
/// 1xxx lexer, 2xxx/3xxx parser, 4xxx resolution, 5xxx static checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    // ============ Lexer ============
    UnexpectedChar,
    UnterminatedString,
    UnterminatedBlob,
    UnterminatedComment,
    InvalidHexLiteral,
    InvalidNumber,
    ExpectedBlob,

    // ============ Parser: top level ============
    ExpectedIdentifier,
    ExpectedAssign,
    ExpectedExpression,
    ShebangNotFirst,
    InvalidValueInAttribute,
    EmptyAttributeBlock,
    UnsupportedDialect,

    // ============ Parser: composites ============
    MissingCommaInArray,
    ExpectedClose,
    EmptyObject,
    MissingCommaInAttributes,
    ModuleAttributesAfterStatements,
    TupleTooShort,
    RocketNotValid,
    InvalidAssignmentTarget,
    ReturnOutsideFunction,
    LoopControlOutsideLoop,
    UnexpectedToken,
    NestingTooDeep,

    // ============ Resolution ============
    UnresolvedIdentifier,
    DuplicateDefinition,
    DuplicateField,
    DuplicateAttribute,
    BuiltinRedefinition,
    ShadowedBinding,

    // ============ Static checks ============
    TypeMismatch,
    ArityMismatch,
    NotCallable,
    FunctionAsValue,
    NotIndexable,
    AssignToNode,
    InvalidBase,
}

impl Code {
    /// Stable numeric code
    pub fn number(&self) -> u16 {
        match self {
            Code::UnexpectedChar => 1001,
            Code::UnterminatedString => 1002,
            Code::UnterminatedBlob => 1003,
            Code::UnterminatedComment => 1004,
            Code::InvalidHexLiteral => 1007,
            Code::InvalidNumber => 1009,
            Code::ExpectedBlob => 1005,

            Code::ExpectedIdentifier => 2001,
            Code::ExpectedAssign => 2002,
            Code::ExpectedExpression => 2003,
            Code::ShebangNotFirst => 2005,
            Code::InvalidValueInAttribute => 2006,
            Code::EmptyAttributeBlock => 2008,
            Code::UnsupportedDialect => 2009,

            Code::MissingCommaInArray => 3007,
            Code::ExpectedClose => 3008,
            Code::EmptyObject => 3010,
            Code::MissingCommaInAttributes => 3012,
            Code::ModuleAttributesAfterStatements => 3013,
            Code::TupleTooShort => 3014,
            Code::RocketNotValid => 3015,
            Code::InvalidAssignmentTarget => 3016,
            Code::ReturnOutsideFunction => 3017,
            Code::LoopControlOutsideLoop => 3018,
            Code::UnexpectedToken => 3100,
            Code::NestingTooDeep => 3101,

            Code::UnresolvedIdentifier => 4000,
            Code::DuplicateDefinition => 4001,
            Code::DuplicateField => 4002,
            Code::DuplicateAttribute => 4013,
            Code::BuiltinRedefinition => 4014,
            Code::ShadowedBinding => 4015,

            Code::TypeMismatch => 5001,
            Code::ArityMismatch => 5002,
            Code::NotCallable => 5003,
            Code::FunctionAsValue => 5004,
            Code::NotIndexable => 5005,
            Code::AssignToNode => 5006,
            Code::InvalidBase => 5007,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self.number() {
            1000..=1999 => DiagnosticKind::Lex,
            2000..=3999 => DiagnosticKind::Syntax,
            4000..=4999 => DiagnosticKind::Resolution,
            _ => DiagnosticKind::Type,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Code::ShadowedBinding => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Default message, used when no more specific text is supplied
    pub fn message(&self) -> &'static str {
        match self {
            Code::UnexpectedChar => "unexpected character",
            Code::UnterminatedString => "unterminated string literal",
            Code::UnterminatedBlob => "unterminated blob literal",
            Code::UnterminatedComment => "unterminated block comment",
            Code::InvalidHexLiteral => "invalid hex number format",
            Code::InvalidNumber => "invalid number format",
            Code::ExpectedBlob => "expected blob after tag",
            Code::ExpectedIdentifier => "expected identifier",
            Code::ExpectedAssign => "expected ':=' after identifier",
            Code::ExpectedExpression => "expected expression",
            Code::ShebangNotFirst => "shebang must be the first non-whitespace line",
            Code::InvalidValueInAttribute => "attribute value must be a string, number, boolean or null",
            Code::EmptyAttributeBlock => "attribute blocks cannot be empty",
            Code::UnsupportedDialect => "unsupported dialect",
            Code::MissingCommaInArray => "missing ',' in array",
            Code::ExpectedClose => "expected closing delimiter",
            Code::EmptyObject => "empty objects are not allowed",
            Code::MissingCommaInAttributes => "missing ',' in attribute block",
            Code::ModuleAttributesAfterStatements => "module attributes must come before statements",
            Code::TupleTooShort => "tuple requires at least 2 values",
            Code::RocketNotValid => "rocket operator '=>' is not valid",
            Code::InvalidAssignmentTarget => "invalid assignment target",
            Code::ReturnOutsideFunction => "'return' outside of a function",
            Code::LoopControlOutsideLoop => "loop control outside of a loop",
            Code::UnexpectedToken => "unexpected token",
            Code::NestingTooDeep => "nesting too deep",
            Code::UnresolvedIdentifier => "unresolved identifier",
            Code::DuplicateDefinition => "duplicate definition",
            Code::DuplicateField => "duplicate field in object",
            Code::DuplicateAttribute => "duplicate attribute key",
            Code::BuiltinRedefinition => "cannot redefine builtin",
            Code::ShadowedBinding => "binding shadows an outer binding",
            Code::TypeMismatch => "type mismatch",
            Code::ArityMismatch => "argument count mismatch",
            Code::NotCallable => "expression is not callable",
            Code::FunctionAsValue => "function used as a value",
            Code::NotIndexable => "expression is not indexable",
            Code::AssignToNode => "nodes cannot be reassigned",
            Code::InvalidBase => "base must be an object node",
        }
    }
}

/// A single reported problem
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub code: Code,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    /// Diagnostic with the code's default message
    pub fn new(code: Code, span: Span) -> Self {
        Self::with_message(code, code.message(), span)
    }

    pub fn with_message(code: Code, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: code.severity(),
            kind: code.kind(),
            code,
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// `line:column: severity: message`
    pub fn render(&self, index: &LineIndex) -> String {
        let (line, column) = index.line_col(self.span.start);
        format!("{}:{}: {}: {}", line, column, self.severity, self.message)
    }
}

/// Sort diagnostics by position, keeping report order for ties
pub fn sort(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|d| d.span.start);
}

/// Count error-severity diagnostics
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

/// Maps byte offsets to 1-based line and column numbers
#[derive(Debug, Clone)]
pub struct LineIndex<'src> {
    source: &'src str,
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(source: &'src str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, line_starts }
    }

    /// Line and column (in characters) of a byte offset
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self.source.get(start..offset).map_or(0, |s| s.chars().count());
        (line + 1, column + 1)
    }
}
