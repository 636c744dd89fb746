//! Semantic Analysis for Anvil
//!
//! Performs, in a single depth-first pass:
//! - Symbol table management (scopes, definitions, hoisting)
//! - Name resolution, annotating every reference with a [`Resolution`]
//! - Structural type checks on a coarse [`StaticType`]
//!
//! Scopes: builtins at the root, then a session scope holding names the
//! caller predeclares (bindings left in a reused context), then the global
//! scope of the program. Blocks, function bodies and `for` bodies open child
//! scopes. Function bodies hang off the global scope: they see globals and
//! their own locals, never the locals of an enclosing function.

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::debug;

use crate::diagnostics::{self, Code, Diagnostic};
use crate::frontend::ast::*;
use crate::stdlib::builtins;
use crate::utils::Span;

// ==================== Static Types ====================

/// Coarse value category known before evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType {
    /// Anything; variables and call results are not tracked
    Unknown,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Blob,
    Array,
    Tuple,
    Object,
    Range,
    Function,
}

impl StaticType {
    pub fn name(&self) -> &'static str {
        match self {
            StaticType::Unknown => "unknown",
            StaticType::Null => "null",
            StaticType::Bool => "bool",
            StaticType::Int => "int",
            StaticType::Float => "float",
            StaticType::Str => "string",
            StaticType::Blob => "blob",
            StaticType::Array => "array",
            StaticType::Tuple => "tuple",
            StaticType::Object => "object",
            StaticType::Range => "range",
            StaticType::Function => "function",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != StaticType::Unknown
    }

    fn is_numeric(&self) -> bool {
        matches!(self, StaticType::Int | StaticType::Float)
    }

    fn is_iterable(&self) -> bool {
        matches!(
            self,
            StaticType::Array | StaticType::Tuple | StaticType::Range | StaticType::Str | StaticType::Unknown
        )
    }

    fn of_literal(lit: &Literal) -> StaticType {
        match lit {
            Literal::Int(..) => StaticType::Int,
            Literal::Float(..) => StaticType::Float,
            Literal::Str(..) | Literal::Bare(..) => StaticType::Str,
            Literal::Blob { .. } => StaticType::Blob,
            Literal::Bool(..) => StaticType::Bool,
            Literal::Null(_) => StaticType::Null,
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ==================== Symbol Table ====================

/// Unique identifier for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Kind of symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// `let`, parameter or loop variable
    Local,
    /// AML node
    Node,
    Function { params: usize },
    Builtin,
}

impl SymbolKind {
    fn resolution(&self) -> Resolution {
        match self {
            SymbolKind::Local => Resolution::Local,
            SymbolKind::Node => Resolution::Node,
            SymbolKind::Function { .. } => Resolution::Function,
            SymbolKind::Builtin => Resolution::Builtin,
        }
    }
}

/// Symbol information
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: StaticType,
    pub span: Span,
}

/// A scope containing symbols
#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    symbols: HashMap<String, Symbol>,
}

/// Symbol table with nested scopes
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: ScopeId,
    /// Scopes to return to on exit
    trail: Vec<ScopeId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let root = Scope {
            parent: None,
            symbols: HashMap::new(),
        };
        Self {
            scopes: vec![root],
            current: ScopeId(0),
            trail: Vec::new(),
        }
    }

    /// Enter a new scope nested in the current one
    pub fn enter_scope(&mut self) -> ScopeId {
        self.enter_scope_under(self.current)
    }

    /// Enter a new scope whose parent is `parent` rather than the current scope
    pub fn enter_scope_under(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            symbols: HashMap::new(),
        });
        self.trail.push(self.current);
        self.current = id;
        id
    }

    /// Exit the current scope
    pub fn exit_scope(&mut self) {
        if let Some(previous) = self.trail.pop() {
            self.current = previous;
        }
    }

    /// Define a symbol in the current scope. Returns false if the name is
    /// already taken there.
    pub fn define(&mut self, symbol: Symbol) -> bool {
        let scope = &mut self.scopes[self.current.0];
        if scope.symbols.contains_key(&symbol.name) {
            return false;
        }
        scope.symbols.insert(symbol.name.clone(), symbol);
        true
    }

    /// Look up a symbol, searching from current scope upward
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        let mut scope_id = Some(self.current);
        while let Some(id) = scope_id {
            if let Some(symbol) = self.scopes[id.0].symbols.get(name) {
                return Some(symbol);
            }
            scope_id = self.scopes[id.0].parent;
        }
        None
    }

    /// Function symbols visible from the current scope, innermost first,
    /// up to but excluding `outer`
    pub fn functions_below(&self, outer: ScopeId) -> Vec<Symbol> {
        let mut found = Vec::new();
        let mut scope_id = Some(self.current);
        while let Some(id) = scope_id.filter(|id| *id != outer) {
            let scope = &self.scopes[id.0];
            found.extend(
                scope
                    .symbols
                    .values()
                    .filter(|s| matches!(s.kind, SymbolKind::Function { .. }))
                    .cloned(),
            );
            scope_id = scope.parent;
        }
        found
    }

    /// Look up a symbol only in the current scope
    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current.0].symbols.get(name)
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Validator ====================

/// A validated program and everything found while validating it
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The program with every reference annotated
    pub program: Program,
    /// Resolution and type diagnostics, ordered by position
    pub diagnostics: Vec<Diagnostic>,
}

impl Validated {
    pub fn has_errors(&self) -> bool {
        diagnostics::error_count(&self.diagnostics) > 0
    }
}

/// Validate with no predeclared names
pub fn validate(program: Program) -> Validated {
    Validator::new().validate(program)
}

/// Resolver and static checker
pub struct Validator {
    symbols: SymbolTable,
    global: ScopeId,
    diagnostics: Vec<Diagnostic>,
}

impl Validator {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        for builtin in builtins::registry().all() {
            symbols.define(Symbol {
                name: builtin.name.to_string(),
                kind: SymbolKind::Builtin,
                ty: StaticType::Function,
                span: Span::default(),
            });
        }
        // Session scope for predeclared names
        let session = symbols.enter_scope();

        Self {
            symbols,
            global: session,
            diagnostics: Vec::new(),
        }
    }

    /// Declare a name that already exists in the execution context
    pub fn predeclare(&mut self, name: &str, kind: SymbolKind) {
        let ty = match kind {
            SymbolKind::Function { .. } | SymbolKind::Builtin => StaticType::Function,
            _ => StaticType::Unknown,
        };
        self.symbols.define(Symbol {
            name: name.to_string(),
            kind,
            ty,
            span: Span::default(),
        });
    }

    pub fn validate(mut self, mut program: Program) -> Validated {
        self.global = self.symbols.enter_scope();

        self.check_attributes(&program.attributes);
        self.hoist_functions(&program.stmts);
        for stmt in &mut program.stmts {
            self.check_stmt(stmt);
        }
        self.symbols.exit_scope();

        diagnostics::sort(&mut self.diagnostics);
        debug!(
            "validated {} statements: {} diagnostics",
            program.stmts.len(),
            self.diagnostics.len()
        );

        Validated {
            program,
            diagnostics: self.diagnostics,
        }
    }

    fn report(&mut self, code: Code, message: String, span: Span) {
        self.diagnostics.push(Diagnostic::with_message(code, message, span));
    }

    // ==================== Declarations ====================

    /// Bind `name` in the current scope
    fn declare(&mut self, name: &Ident, kind: SymbolKind, ty: StaticType) {
        if self.symbols.lookup_local(&name.name).is_some() {
            self.report(
                Code::DuplicateDefinition,
                format!("`{}` is already defined in this scope", name.name),
                name.span,
            );
            return;
        }

        match self.symbols.lookup(&name.name).map(|s| s.kind) {
            Some(SymbolKind::Builtin) => {
                self.report(
                    Code::BuiltinRedefinition,
                    format!("cannot redefine builtin `{}`", name.name),
                    name.span,
                );
                return;
            }
            Some(_) => self.report(
                Code::ShadowedBinding,
                format!("`{}` shadows an outer binding", name.name),
                name.span,
            ),
            None => {}
        }

        self.symbols.define(Symbol {
            name: name.name.clone(),
            kind,
            ty,
            span: name.span,
        });
    }

    /// Functions are visible throughout the block that declares them
    fn hoist_functions(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if let Stmt::Function(func) = stmt {
                self.declare(
                    &func.name,
                    SymbolKind::Function {
                        params: func.params.len(),
                    },
                    StaticType::Function,
                );
            }
        }
    }

    fn check_attributes(&mut self, attributes: &[Attribute]) {
        let mut seen = HashSet::new();
        for attr in attributes {
            if !seen.insert(attr.key.name.as_str()) {
                self.report(
                    Code::DuplicateAttribute,
                    format!("duplicate attribute `{}`", attr.key.name),
                    attr.key.span,
                );
            }
        }
    }

    // ==================== Statements ====================

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.check_expr(value);
                self.declare(name, SymbolKind::Local, StaticType::Unknown);
            }
            Stmt::Node(node) => self.check_node(node),
            Stmt::Function(func) => self.check_function(func),
            Stmt::Assign { target, value, .. } => {
                self.check_expr(value);
                self.check_place(target);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.check_condition(cond);
                self.check_block(then_block);
                if let Some(block) = else_block {
                    self.check_block(block);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.check_condition(cond);
                self.check_block(body);
            }
            Stmt::For { var, iter, body, .. } => {
                let ty = self.check_expr(iter);
                if !ty.is_iterable() {
                    self.report(Code::TypeMismatch, format!("cannot iterate over {}", ty), iter.span());
                }
                self.symbols.enter_scope();
                self.declare(var, SymbolKind::Local, StaticType::Unknown);
                self.check_stmts(&mut body.stmts);
                self.symbols.exit_scope();
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Block(block) => self.check_block(block),
            Stmt::Expr(expr) => {
                self.check_expr(expr);
            }
            Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Error { .. } => {}
        }
    }

    /// Statements sharing the current scope
    fn check_stmts(&mut self, stmts: &mut [Stmt]) {
        self.hoist_functions(stmts);
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_block(&mut self, block: &mut Block) {
        self.symbols.enter_scope();
        self.check_stmts(&mut block.stmts);
        self.symbols.exit_scope();
    }

    /// A body sees the globals and every function visible where it is
    /// declared, but not the enclosing locals
    fn check_function(&mut self, func: &mut FunctionDecl) {
        let visible = self.symbols.functions_below(self.global);
        self.symbols.enter_scope_under(self.global);
        for symbol in visible {
            // inner declarations win over outer ones with the same name
            self.symbols.define(symbol);
        }
        self.symbols.enter_scope();
        for param in &func.params {
            self.declare(param, SymbolKind::Local, StaticType::Unknown);
        }
        self.check_stmts(&mut func.body.stmts);
        self.symbols.exit_scope();
        self.symbols.exit_scope();
    }

    fn check_node(&mut self, node: &mut NodeDecl) {
        self.check_attributes(&node.attributes);
        let ty = self.check_expr(&mut node.value);

        if let Some(base) = &node.base {
            match self.symbols.lookup(&base.name).map(|s| (s.kind, s.ty)) {
                None => self.report(
                    Code::UnresolvedIdentifier,
                    format!("unknown base `{}`", base.name),
                    base.span,
                ),
                Some((SymbolKind::Node, base_ty)) if !base_ty.is_known() || base_ty == StaticType::Object => {}
                Some(_) => self.report(
                    Code::InvalidBase,
                    format!("base `{}` is not an object node", base.name),
                    base.span,
                ),
            }
            if ty.is_known() && ty != StaticType::Object {
                self.report(
                    Code::InvalidBase,
                    format!("node `{}` has a base but its value is {}", node.name.name, ty),
                    node.value.span(),
                );
            }
        }

        let ty = if node.base.is_some() { StaticType::Object } else { ty };
        self.declare(&node.name, SymbolKind::Node, ty);
    }

    fn check_condition(&mut self, cond: &mut Expr) {
        let ty = self.check_expr(cond);
        if ty.is_known() && ty != StaticType::Bool {
            self.report(
                Code::TypeMismatch,
                format!("condition must be bool, found {}", ty),
                cond.span(),
            );
        }
    }

    /// Left-hand side of `=`
    fn check_place(&mut self, target: &mut Expr) {
        match target {
            Expr::Ident { name, resolution } => match self.symbols.lookup(&name.name).map(|s| s.kind) {
                None => {
                    *resolution = Resolution::Unknown;
                    self.report(
                        Code::UnresolvedIdentifier,
                        format!("unresolved identifier `{}`", name.name),
                        name.span,
                    );
                }
                Some(kind) => {
                    *resolution = kind.resolution();
                    match kind {
                        SymbolKind::Node => self.report(
                            Code::AssignToNode,
                            format!("node `{}` cannot be reassigned", name.name),
                            name.span,
                        ),
                        SymbolKind::Function { .. } | SymbolKind::Builtin => self.report(
                            Code::TypeMismatch,
                            format!("cannot assign to function `{}`", name.name),
                            name.span,
                        ),
                        SymbolKind::Local => {}
                    }
                }
            },
            Expr::Index { expr, index, .. } => {
                self.check_place(expr);
                self.check_expr(index);
            }
            Expr::Field { expr, .. } => self.check_place(expr),
            other => {
                self.check_expr(other);
            }
        }
    }

    // ==================== Expressions ====================

    fn check_expr(&mut self, expr: &mut Expr) -> StaticType {
        match expr {
            Expr::Literal(lit) => StaticType::of_literal(lit),

            Expr::Ident { name, resolution } => {
                let Some(symbol) = self.symbols.lookup(&name.name) else {
                    *resolution = Resolution::Unknown;
                    self.report(
                        Code::UnresolvedIdentifier,
                        format!("unresolved identifier `{}`", name.name),
                        name.span,
                    );
                    return StaticType::Unknown;
                };
                let (kind, ty) = (symbol.kind, symbol.ty);
                *resolution = kind.resolution();
                if matches!(kind, SymbolKind::Function { .. } | SymbolKind::Builtin) {
                    self.report(
                        Code::FunctionAsValue,
                        format!("function `{}` cannot be used as a value", name.name),
                        name.span,
                    );
                    return StaticType::Unknown;
                }
                ty
            }

            Expr::Binary { left, op, right, span } => {
                let lt = self.check_expr(left);
                let rt = self.check_expr(right);
                self.binary_type(*op, lt, rt, *span)
            }

            Expr::Unary { op, expr: operand, span } => {
                let ty = self.check_expr(operand);
                match op {
                    UnOp::Neg if ty.is_known() && !ty.is_numeric() => {
                        self.report(Code::TypeMismatch, format!("cannot negate {}", ty), *span);
                        StaticType::Unknown
                    }
                    UnOp::Neg => ty,
                    UnOp::Not => {
                        if ty.is_known() && ty != StaticType::Bool {
                            self.report(Code::TypeMismatch, format!("cannot apply `!` to {}", ty), *span);
                        }
                        StaticType::Bool
                    }
                }
            }

            Expr::Call {
                callee,
                resolution,
                args,
                span,
            } => {
                for arg in args.iter_mut() {
                    self.check_expr(arg);
                }
                self.check_call(callee, resolution, args.len(), *span)
            }

            Expr::Index { expr: target, index, span } => {
                let target_ty = self.check_expr(target);
                let index_ty = self.check_expr(index);
                let wanted = match target_ty {
                    StaticType::Array | StaticType::Tuple | StaticType::Str => Some(StaticType::Int),
                    StaticType::Object => Some(StaticType::Str),
                    StaticType::Unknown => None,
                    other => {
                        self.report(Code::NotIndexable, format!("cannot index into {}", other), *span);
                        None
                    }
                };
                if let Some(wanted) = wanted {
                    if index_ty.is_known() && index_ty != wanted {
                        self.report(
                            Code::TypeMismatch,
                            format!("{} index must be {}, found {}", target_ty, wanted, index_ty),
                            index.span(),
                        );
                    }
                }
                StaticType::Unknown
            }

            Expr::Field { expr: target, field, span } => {
                let ty = self.check_expr(target);
                if ty.is_known() && ty != StaticType::Object {
                    self.report(
                        Code::NotIndexable,
                        format!("cannot access field `{}` on {}", field.name, ty),
                        *span,
                    );
                }
                StaticType::Unknown
            }

            Expr::Array { elements, .. } => {
                for element in elements.iter_mut() {
                    self.check_expr(element);
                }
                StaticType::Array
            }

            Expr::Tuple { elements, .. } => {
                for element in elements.iter_mut() {
                    self.check_expr(element);
                }
                StaticType::Tuple
            }

            Expr::Object { fields, .. } => {
                let mut seen = HashSet::new();
                for field in fields.iter_mut() {
                    if !seen.insert(field.name.name.clone()) {
                        self.report(
                            Code::DuplicateField,
                            format!("duplicate field `{}`", field.name.name),
                            field.name.span,
                        );
                    }
                    self.check_attributes(&field.attributes);
                    self.check_expr(&mut field.value);
                }
                StaticType::Object
            }

            Expr::Error { .. } => StaticType::Unknown,
        }
    }

    fn check_call(&mut self, callee: &Ident, resolution: &mut Resolution, argc: usize, span: Span) -> StaticType {
        let Some(symbol) = self.symbols.lookup(&callee.name) else {
            *resolution = Resolution::Unknown;
            self.report(
                Code::UnresolvedIdentifier,
                format!("unresolved function `{}`", callee.name),
                callee.span,
            );
            return StaticType::Unknown;
        };

        let kind = symbol.kind;
        *resolution = kind.resolution();
        match kind {
            SymbolKind::Function { params } => {
                if argc != params {
                    self.report(
                        Code::ArityMismatch,
                        format!("`{}` expects {} arguments, found {}", callee.name, params, argc),
                        span,
                    );
                }
                StaticType::Unknown
            }
            SymbolKind::Builtin => {
                let Some(builtin) = builtins::registry().get(&callee.name) else {
                    return StaticType::Unknown;
                };
                if !builtin.accepts(argc) {
                    self.report(
                        Code::ArityMismatch,
                        format!("`{}` expects {} arguments, found {}", callee.name, builtin.arity(), argc),
                        span,
                    );
                }
                builtin.ret
            }
            SymbolKind::Local | SymbolKind::Node => {
                self.report(
                    Code::NotCallable,
                    format!("`{}` is not a function", callee.name),
                    callee.span,
                );
                StaticType::Unknown
            }
        }
    }

    fn binary_type(&mut self, op: BinOp, lt: StaticType, rt: StaticType, span: Span) -> StaticType {
        use StaticType::*;

        let operand_ok = |t: StaticType| match op {
            BinOp::Add => matches!(t, Int | Float | Str | Array | Unknown),
            _ if op.is_arithmetic() => matches!(t, Int | Float | Unknown),
            _ if op.is_comparison() => matches!(t, Int | Float | Str | Unknown),
            BinOp::And | BinOp::Or => matches!(t, Bool | Unknown),
            BinOp::Range => matches!(t, Int | Unknown),
            _ => true,
        };
        let pair_ok = !lt.is_known()
            || !rt.is_known()
            || lt == rt
            || (lt.is_numeric() && rt.is_numeric())
            || matches!(op, BinOp::Eq | BinOp::Ne);

        if !operand_ok(lt) || !operand_ok(rt) || !pair_ok {
            self.report(
                Code::TypeMismatch,
                format!("cannot apply `{}` to {} and {}", op, lt, rt),
                span,
            );
            return if op.is_comparison() || matches!(op, BinOp::Eq | BinOp::Ne) {
                Bool
            } else {
                Unknown
            };
        }

        match op {
            _ if op.is_comparison() => Bool,
            BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => Bool,
            BinOp::Range => Range,
            BinOp::Pow => match (lt, rt) {
                (Float, _) | (_, Float) => Float,
                _ => Unknown,
            },
            _ => match (lt, rt) {
                (Int, Int) => Int,
                (Float, Int | Float) | (Int, Float) => Float,
                (Str, Str) => Str,
                (Array, Array) => Array,
                _ => Unknown,
            },
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Severity};
    use crate::frontend::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn check(source: &str) -> Validated {
        let (program, diags) = parse_source(source);
        assert!(diags.is_empty(), "syntax errors: {:?}", diags);
        validate(program)
    }

    fn codes(source: &str) -> Vec<Code> {
        check(source).diagnostics.into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_declared_before_use() {
        let validated = check(
            "let a = 1;\nlet b = a + 2;\nfn add(x, y) { return x + y; }\nprint(add(a, b));\n\
             server := { host := \"localhost\", port := 8080 }\nlet p = server.port;",
        );
        assert_eq!(validated.diagnostics, vec![]);
    }

    #[test]
    fn test_unresolved_identifier() {
        let validated = check("let x = y;");
        assert_eq!(validated.diagnostics.len(), 1);
        let diag = &validated.diagnostics[0];
        assert_eq!(diag.kind, DiagnosticKind::Resolution);
        assert_eq!(diag.span, Span::new(8, 9));
        let Stmt::Let { value, .. } = &validated.program.stmts[0] else {
            panic!("expected let");
        };
        assert!(matches!(value, Expr::Ident { resolution: Resolution::Unknown, .. }));
    }

    #[test]
    fn test_annotations() {
        let validated = check("let a = 1; a; print(a); fn f() { } f(); n := 2; n;");
        let res: Vec<_> = validated
            .program
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Expr(Expr::Ident { resolution, .. }) => Some(*resolution),
                Stmt::Expr(Expr::Call { resolution, .. }) => Some(*resolution),
                _ => None,
            })
            .collect();
        assert_eq!(
            res,
            vec![Resolution::Local, Resolution::Builtin, Resolution::Function, Resolution::Node]
        );
    }

    #[test]
    fn test_definitions() {
        assert_eq!(codes("let a = 1; let a = 2;"), vec![Code::DuplicateDefinition]);
        assert_eq!(codes("let print = 1;"), vec![Code::BuiltinRedefinition]);
        assert_eq!(codes("fn len(x) { }"), vec![Code::BuiltinRedefinition]);
        assert_eq!(codes("fn f(a, a) { }"), vec![Code::DuplicateDefinition]);

        let validated = check("let a = 1; { let a = 2; }");
        assert_eq!(validated.diagnostics.len(), 1);
        assert_eq!(validated.diagnostics[0].severity, Severity::Warning);
        assert!(!validated.has_errors());
    }

    #[test]
    fn test_functions_are_hoisted() {
        assert_eq!(codes("let r = f(1); fn f(x) { return g(x); } fn g(x) { return x; }"), vec![]);
    }

    #[test]
    fn test_function_bodies_do_not_capture() {
        assert_eq!(codes("let g = 1; fn f() { return g; }"), vec![]);
        assert_eq!(
            codes("fn outer() { let a = 1; fn inner() { return a; } return inner(); }"),
            vec![Code::UnresolvedIdentifier]
        );
    }

    #[test]
    fn test_local_functions_see_themselves_and_siblings() {
        assert_eq!(
            codes("{ fn f(n) { if n == 0 { return 0; } return f(n - 1); } f(3); }"),
            vec![]
        );
        assert_eq!(
            codes(
                "fn parity(n) {\n\
                     fn even(k) { if k == 0 { return true; } return odd(k - 1); }\n\
                     fn odd(k) { if k == 0 { return false; } return even(k - 1); }\n\
                     return even(n);\n\
                 }"
            ),
            vec![]
        );
        // siblings are only visible inside their block
        assert_eq!(
            codes("{ fn hidden() { } } hidden();"),
            vec![Code::UnresolvedIdentifier]
        );
    }

    #[test]
    fn test_calls() {
        assert_eq!(codes("fn f(a) { } f(1, 2);"), vec![Code::ArityMismatch]);
        assert_eq!(codes("len();"), vec![Code::ArityMismatch]);
        assert_eq!(codes("print(1, 2, 3); print();"), vec![]);
        assert_eq!(codes("assert(true); assert(true, \"msg\");"), vec![]);
        assert_eq!(codes("let a = 1; a();"), vec![Code::NotCallable]);
        assert_eq!(codes("fn f() { } let g = f;"), vec![Code::FunctionAsValue]);
        assert_eq!(codes("missing();"), vec![Code::UnresolvedIdentifier]);
    }

    #[test]
    fn test_type_checks() {
        assert_eq!(codes("1 + \"a\";"), vec![Code::TypeMismatch]);
        assert_eq!(codes("if 1 { }"), vec![Code::TypeMismatch]);
        assert_eq!(codes("while \"yes\" { }"), vec![Code::TypeMismatch]);
        assert_eq!(codes("for i in 5 { }"), vec![Code::TypeMismatch]);
        assert_eq!(codes("-\"a\";"), vec![Code::TypeMismatch]);
        assert_eq!(codes("true && 1;"), vec![Code::TypeMismatch]);
        assert_eq!(codes("1 / 0;"), vec![]);
        assert_eq!(codes("\"a\" + \"b\"; [1] + [2]; 1 + 2.5; 1 == \"a\";"), vec![]);
        assert_eq!(codes("let a = 1[0];"), vec![Code::NotIndexable]);
        assert_eq!(codes("let a = 5.x;"), vec![Code::NotIndexable]);
        assert_eq!(codes("let a = [1, 2][\"k\"];"), vec![Code::TypeMismatch]);
        assert_eq!(codes("let a = 1; let b = a + \"x\"; for i in a { }"), vec![]);
    }

    #[test]
    fn test_nodes() {
        assert_eq!(codes("a := 1\na = 2;"), vec![Code::AssignToNode]);
        assert_eq!(codes("a := { x := 1 }\na.x = 2;"), vec![Code::AssignToNode]);
        assert_eq!(
            codes("base := { x := 1 }\nchild : base := { y := 2 }\nlet v = child.x;"),
            vec![]
        );
        assert_eq!(codes("c : missing := { x := 1 }"), vec![Code::UnresolvedIdentifier]);
        assert_eq!(codes("b := 1\nc : b := { x := 1 }"), vec![Code::InvalidBase]);
        assert_eq!(codes("let b = 1;\nc : b := { x := 1 }"), vec![Code::InvalidBase]);
        assert_eq!(codes("a := { x := 1, x := 2 }"), vec![Code::DuplicateField]);
        assert_eq!(codes("a @[k, k=1] := 1"), vec![Code::DuplicateAttribute]);
        assert_eq!(codes("@[v=1]\n@[v=2]\na := 1"), vec![Code::DuplicateAttribute]);
    }

    #[test]
    fn test_predeclared_names() {
        let (program, _) = parse_source("let y = x + 1; let z = sq(y); let x = 3;");
        let mut validator = Validator::new();
        validator.predeclare("x", SymbolKind::Local);
        validator.predeclare("sq", SymbolKind::Function { params: 1 });
        let validated = validator.validate(program);
        // redeclaring a session binding only shadows it
        let codes: Vec<_> = validated.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![Code::ShadowedBinding]);
    }

    #[test]
    fn test_scope_tree() {
        let mut table = SymbolTable::new();
        let symbol = |name: &str| Symbol {
            name: name.to_string(),
            kind: SymbolKind::Local,
            ty: StaticType::Unknown,
            span: Span::default(),
        };
        assert!(table.define(symbol("a")));
        let outer = table.current();
        let inner = table.enter_scope();
        assert!(table.define(symbol("b")));
        assert!(table.lookup("a").is_some());
        assert!(table.lookup_local("a").is_none());
        table.exit_scope();
        assert_eq!(table.current(), outer);
        assert_ne!(inner, outer);
        assert!(table.lookup("b").is_none());
        assert!(!table.define(symbol("a")));
    }
}
