//! Source writer
//!
//! Prints a [`Program`] back as source in one of two layouts. The pretty
//! layout is canonical: four-space indentation, one statement per line,
//! objects one field per line, and only the parentheses precedence
//! requires. The compact layout puts everything on one line with only the
//! spaces that keep tokens apart. Reparsing either output gives the same
//! tree. Comments are not part of the AST and are dropped.

use crate::frontend::ast::{
    Attribute, BinOp, Block, Dialect, Expr, Field, FunctionDecl, Literal, NodeDecl, Program, Stmt, PREFIX_PRECEDENCE,
};

const INDENT: &str = "    ";

/// Output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Pretty,
    Compact,
}

/// Format a whole program in the canonical layout
pub fn format_program(program: &Program) -> String {
    format_program_with(program, Layout::Pretty)
}

pub fn format_program_with(program: &Program, layout: Layout) -> String {
    let mut writer = SourceWriter::new(layout);
    writer.write_program(program);
    writer.output
}

/// Format a single expression
pub fn format_expr(expr: &Expr) -> String {
    let mut writer = SourceWriter::new(Layout::Pretty);
    writer.write_expr(expr);
    writer.output
}

/// Printer state
struct SourceWriter {
    output: String,
    indent: usize,
    pretty: bool,
}

impl SourceWriter {
    fn new(layout: Layout) -> Self {
        Self {
            output: String::new(),
            indent: 0,
            pretty: layout == Layout::Pretty,
        }
    }

    fn push(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn newline(&mut self) {
        if !self.pretty {
            return;
        }
        self.output.push('\n');
        for _ in 0..self.indent {
            self.output.push_str(INDENT);
        }
    }

    fn space(&mut self) {
        if self.pretty {
            self.output.push(' ');
        }
    }

    /// An infix symbol, spaced out when pretty
    fn infix(&mut self, symbol: &str) {
        self.space();
        self.push(symbol);
        self.space();
    }

    fn comma(&mut self) {
        self.push(",");
        self.space();
    }

    // ==================== Program and Statements ====================

    fn write_program(&mut self, program: &Program) {
        if program.dialect != Dialect::default() {
            self.push("#!");
            self.push(program.dialect.name());
            self.push("\n");
        }
        if !self.pretty {
            self.write_attributes(&program.attributes);
            for stmt in &program.stmts {
                self.write_stmt(stmt);
            }
            if !self.output.is_empty() && !self.output.ends_with('\n') {
                self.push("\n");
            }
            return;
        }

        if !program.attributes.is_empty() {
            self.write_attributes(&program.attributes);
            self.push("\n");
            if !program.stmts.is_empty() {
                self.push("\n");
            }
        }

        let mut prev: Option<&Stmt> = None;
        for stmt in &program.stmts {
            if let Some(prev) = prev {
                // functions stand apart from their neighbours
                if matches!(prev, Stmt::Function(_)) || matches!(stmt, Stmt::Function(_)) {
                    self.push("\n");
                }
            }
            self.write_stmt(stmt);
            self.push("\n");
            prev = Some(stmt);
        }
    }

    fn write_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.push("let ");
                self.push(&name.name);
                self.infix("=");
                self.write_expr(value);
                self.push(";");
            }
            Stmt::Node(node) => self.write_node(node),
            Stmt::Function(func) => self.write_function(func),
            Stmt::Assign { target, value, .. } => {
                self.write_expr(target);
                self.infix("=");
                self.write_expr(value);
                self.push(";");
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.push("if ");
                self.write_expr(cond);
                self.space();
                self.write_block(then_block);
                if let Some(else_block) = else_block {
                    self.space();
                    self.push("else");
                    match else_block.stmts.as_slice() {
                        [nested @ Stmt::If { .. }] if nested.span() == else_block.span => {
                            self.push(" ");
                            self.write_stmt(nested);
                        }
                        _ => {
                            self.space();
                            self.write_block(else_block);
                        }
                    }
                }
            }
            Stmt::While { cond, body, .. } => {
                self.push("while ");
                self.write_expr(cond);
                self.space();
                self.write_block(body);
            }
            Stmt::For { var, iter, body, .. } => {
                self.push("for ");
                self.push(&var.name);
                self.push(" in ");
                self.write_expr(iter);
                self.space();
                self.write_block(body);
            }
            Stmt::Return { value, .. } => {
                self.push("return");
                if let Some(value) = value {
                    self.push(" ");
                    self.write_expr(value);
                }
                self.push(";");
            }
            Stmt::Break { .. } => self.push("break;"),
            Stmt::Continue { .. } => self.push("continue;"),
            Stmt::Block(block) => self.write_block(block),
            Stmt::Expr(expr) => {
                // a leading `{` would start a block
                if starts_with_brace(expr) {
                    self.push("(");
                    self.write_expr(expr);
                    self.push(")");
                } else {
                    self.write_expr(expr);
                }
                self.push(";");
            }
            Stmt::Error { .. } => self.push("/* error */"),
        }
    }

    fn write_block(&mut self, block: &Block) {
        if block.stmts.is_empty() {
            self.push("{}");
            return;
        }
        self.push("{");
        self.indent += 1;
        for stmt in &block.stmts {
            self.newline();
            self.write_stmt(stmt);
        }
        self.indent -= 1;
        self.newline();
        self.push("}");
    }

    fn write_function(&mut self, func: &FunctionDecl) {
        self.push("fn ");
        self.push(&func.name.name);
        self.push("(");
        for (i, param) in func.params.iter().enumerate() {
            if i > 0 {
                self.comma();
            }
            self.push(&param.name);
        }
        self.push(")");
        self.space();
        self.write_block(&func.body);
    }

    fn write_node(&mut self, node: &NodeDecl) {
        self.push(&node.name.name);
        if let Some(base) = &node.base {
            self.infix(":");
            self.push(&base.name);
        }
        if !node.attributes.is_empty() {
            self.space();
            self.write_attributes(&node.attributes);
        }
        self.infix(":=");
        self.write_expr(&node.value);
        self.push(";");
    }

    fn write_attributes(&mut self, attributes: &[Attribute]) {
        if attributes.is_empty() {
            return;
        }
        self.push("@[");
        for (i, attr) in attributes.iter().enumerate() {
            if i > 0 {
                self.comma();
            }
            self.push(&attr.key.name);
            if let Some(value) = &attr.value {
                self.infix("=");
                self.write_literal(value);
            }
        }
        self.push("]");
    }

    // ==================== Expressions ====================

    fn write_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(lit) => self.write_literal(lit),
            Expr::Ident { name, .. } => self.push(&name.name),
            Expr::Binary { left, op, right, .. } => {
                let prec = op.precedence();
                let left_parens = match precedence(left) {
                    Some(p) => p < prec || (p == prec && matches!(op, BinOp::Pow | BinOp::Range)),
                    None => false,
                };
                let right_parens = match (right.as_ref(), precedence(right)) {
                    // a prefix operator in operand position parses on its own
                    (Expr::Unary { .. }, _) => false,
                    (_, Some(p)) => p < prec || (p == prec && *op != BinOp::Pow),
                    (_, None) => false,
                };
                self.write_operand(left, left_parens);
                self.infix(op.symbol());
                self.write_operand(right, right_parens);
            }
            Expr::Unary { op, expr, .. } => {
                self.push(op.symbol());
                let parens = precedence(expr).is_some_and(|p| p < PREFIX_PRECEDENCE);
                self.write_operand(expr, parens);
            }
            Expr::Call { callee, args, .. } => {
                self.push(&callee.name);
                self.push("(");
                self.write_list(args);
                self.push(")");
            }
            Expr::Index { expr, index, .. } => {
                self.write_operand(expr, precedence(expr).is_some());
                self.push("[");
                self.write_expr(index);
                self.push("]");
            }
            Expr::Field { expr, field, .. } => {
                self.write_operand(expr, precedence(expr).is_some());
                self.push(".");
                self.push(&field.name);
            }
            Expr::Array { elements, .. } => {
                self.push("[");
                self.write_list(elements);
                self.push("]");
            }
            Expr::Tuple { elements, .. } => {
                self.push("(");
                self.write_list(elements);
                self.push(")");
            }
            Expr::Object { fields, .. } => self.write_object(fields),
            Expr::Error { .. } => self.push("/* error */"),
        }
    }

    fn write_operand(&mut self, expr: &Expr, parens: bool) {
        if parens {
            self.push("(");
            self.write_expr(expr);
            self.push(")");
        } else {
            self.write_expr(expr);
        }
    }

    fn write_list(&mut self, items: &[Expr]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.comma();
            }
            self.write_expr(item);
        }
    }

    fn write_object(&mut self, fields: &[Field]) {
        if fields.is_empty() {
            self.push("{}");
            return;
        }
        self.push("{");
        self.indent += 1;
        for (i, field) in fields.iter().enumerate() {
            // pretty objects end every field with a comma
            if i > 0 && !self.pretty {
                self.push(",");
            }
            self.newline();
            self.push(&field.name.name);
            if !field.attributes.is_empty() {
                self.space();
                self.write_attributes(&field.attributes);
            }
            self.infix(":=");
            self.write_expr(&field.value);
            if self.pretty {
                self.push(",");
            }
        }
        self.indent -= 1;
        self.newline();
        self.push("}");
    }

    fn write_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Int(v, _) => self.push(&v.to_string()),
            // Debug keeps a `.` or an exponent, so the text lexes as a float
            Literal::Float(v, _) => self.push(&format!("{:?}", v)),
            Literal::Str(s, _) => self.push(&quote(s)),
            Literal::Blob { tag, content, .. } => {
                if let Some(tag) = tag {
                    self.push("@");
                    self.push(tag);
                }
                self.push("`");
                self.push(&content.replace('`', "\\`"));
                self.push("`");
            }
            Literal::Bool(b, _) => self.push(if *b { "true" } else { "false" }),
            Literal::Null(_) => self.push("null"),
            Literal::Bare(text, _) => self.push(text),
        }
    }
}

/// Binding strength of operator expressions; `None` for atoms
fn precedence(expr: &Expr) -> Option<u8> {
    match expr {
        Expr::Binary { op, .. } => Some(op.precedence()),
        Expr::Unary { .. } => Some(PREFIX_PRECEDENCE),
        _ => None,
    }
}

fn starts_with_brace(expr: &Expr) -> bool {
    match expr {
        Expr::Object { .. } => true,
        Expr::Binary { left, .. } => starts_with_brace(left),
        Expr::Index { expr, .. } | Expr::Field { expr, .. } => starts_with_brace(expr),
        _ => false,
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
