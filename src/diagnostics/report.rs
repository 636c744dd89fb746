//! Structured run report
//!
//! Machine-readable form of an [`Outcome`](crate::Outcome), emitted by
//! `anvil --format json`.

use serde::Serialize;

use super::{Diagnostic, DiagnosticKind, LineIndex, Severity};
use crate::engine::RuntimeFault;
use crate::Outcome;

/// One diagnostic with resolved positions
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub code: u16,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl DiagnosticRecord {
    pub fn from_diagnostic(diag: &Diagnostic, index: &LineIndex) -> Self {
        let (line, column) = index.line_col(diag.span.start);
        let (end_line, end_column) = index.line_col(diag.span.end);
        Self {
            code: diag.code.number(),
            severity: diag.severity,
            kind: diag.kind,
            message: diag.message.clone(),
            line,
            column,
            end_line,
            end_column,
        }
    }
}

/// A runtime fault with its position
#[derive(Debug, Clone, Serialize)]
pub struct FaultRecord {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl FaultRecord {
    pub fn from_fault(fault: &RuntimeFault, index: &LineIndex) -> Self {
        let (line, column) = index.line_col(fault.span.start);
        Self {
            message: fault.to_string(),
            line,
            column,
        }
    }
}

/// Complete report for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub file: String,
    pub success: bool,
    pub evaluated: bool,
    pub diagnostics: Vec<DiagnosticRecord>,
    pub fault: Option<FaultRecord>,
    pub value: Option<String>,
}

impl RunReport {
    pub fn new(file: &str, source: &str, outcome: &Outcome) -> Self {
        let index = LineIndex::new(source);
        Self {
            file: file.to_string(),
            success: outcome.exit_code() == 0,
            evaluated: outcome.evaluated,
            diagnostics: outcome
                .diagnostics
                .iter()
                .map(|d| DiagnosticRecord::from_diagnostic(d, &index))
                .collect(),
            fault: outcome.fault.as_ref().map(|f| FaultRecord::from_fault(f, &index)),
            value: outcome.value.as_ref().map(|v| v.to_string()),
        }
    }

    /// Pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Code;
    use crate::utils::Span;

    #[test]
    fn test_record_positions() {
        let source = "let a = 1;\nlet b = c;";
        let diag = Diagnostic::new(Code::UnresolvedIdentifier, Span::new(19, 20));
        let record = DiagnosticRecord::from_diagnostic(&diag, &LineIndex::new(source));
        assert_eq!((record.line, record.column), (2, 9));
        assert_eq!((record.end_line, record.end_column), (2, 10));
        assert_eq!(record.code, 4000);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["kind"], "resolution");
    }
}
