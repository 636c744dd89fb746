//! Tree-walking evaluation
//!
//! Statements yield a [`Flow`] so `return`, `break` and `continue` travel up
//! to the loop or call that handles them. Expressions yield values.

use std::sync::Arc;

use log::{debug, trace};

use super::context::{Callable, Context};
use super::value::Value;
use super::{FaultKind, RuntimeFault};
use crate::frontend::ast::{BinOp, Block, Expr, Ident, NodeDecl, Program, Resolution, Stmt, UnOp};
use crate::stdlib::builtins::registry;
use crate::utils::Span;

pub type EvalResult<T> = Result<T, RuntimeFault>;

/// Statement outcome
#[derive(Debug, Clone, PartialEq)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// One step of an assignment path: `.field` or `[index]`
struct PathKey {
    key: Value,
    span: Span,
}

fn fault(kind: FaultKind, span: Span) -> RuntimeFault {
    RuntimeFault::new(kind, span)
}

fn malformed(what: &str, span: Span) -> RuntimeFault {
    fault(FaultKind::Malformed(what.to_string()), span)
}

fn mismatch(message: String, span: Span) -> RuntimeFault {
    fault(FaultKind::TypeMismatch(message), span)
}

impl Context {
    /// Evaluate a validated program. The value is that of the last top-level
    /// expression statement. On a fault the context is unwound to its global
    /// scope and can be reused.
    pub fn evaluate(&mut self, program: &Program) -> EvalResult<Value> {
        debug!("evaluating {} top-level statements", program.stmts.len());
        self.set_module_attributes(&program.attributes);
        let result = self.eval_program(program);
        if let Err(err) = &result {
            debug!("evaluation stopped: {}", err);
            self.unwind();
        }
        result
    }

    fn eval_program(&mut self, program: &Program) -> EvalResult<Value> {
        self.hoist(&program.stmts);
        let mut last = Value::Null;
        for stmt in &program.stmts {
            if let Stmt::Expr(expr) = stmt {
                self.check_cancelled(expr.span())?;
                last = self.eval_expr(expr)?;
                continue;
            }
            if self.exec_stmt(stmt)? != Flow::Normal {
                return Err(malformed("control flow statement at top level", stmt.span()));
            }
        }
        Ok(last)
    }

    fn check_cancelled(&self, span: Span) -> EvalResult<()> {
        if self.is_cancelled() {
            Err(fault(FaultKind::Cancelled, span))
        } else {
            Ok(())
        }
    }

    /// Functions are visible from the start of their block
    fn hoist(&mut self, stmts: &[Stmt]) {
        let decls = stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Function(func) => Some(Arc::new(func.clone())),
                _ => None,
            })
            .collect();
        self.hoist_functions(decls);
    }

    // ==================== Statements ====================

    fn exec_block(&mut self, block: &Block) -> EvalResult<Flow> {
        self.push_scope();
        let result = self.exec_scoped(&block.stmts);
        self.pop_scope();
        result
    }

    /// Run statements in the current innermost scope
    fn exec_scoped(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        self.hoist(stmts);
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.check_cancelled(stmt.span())?;
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval_expr(value)?;
                self.define(&name.name, value, false);
                Ok(Flow::Normal)
            }
            Stmt::Node(node) => {
                let value = self.eval_node(node)?;
                self.define(&node.name.name, value, true);
                self.set_node_attributes(&node.name.name, &node.attributes);
                self.set_field_attributes(&node.name.name, &node.value);
                Ok(Flow::Normal)
            }
            // hoisted on block entry
            Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Assign { target, value, span } => {
                let value = self.eval_expr(value)?;
                self.assign(target, value, *span)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                if self.eval_condition(cond)? {
                    self.exec_block(then_block)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body, .. } => {
                while self.eval_condition(cond)? {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body, .. } => self.exec_for(var, iter, body),
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Block(block) => self.exec_block(block),
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Error { span } => Err(malformed("statement could not be parsed", *span)),
        }
    }

    fn exec_for(&mut self, var: &Ident, iter: &Expr, body: &Block) -> EvalResult<Flow> {
        let items: Box<dyn Iterator<Item = Value>> = match self.eval_expr(iter)? {
            Value::Array(items) | Value::Tuple(items) => Box::new(items.into_iter()),
            Value::Range(start, end) => Box::new((start..end).map(Value::Int)),
            Value::Str(s) => Box::new(s.chars().map(|c| Value::Str(c.to_string())).collect::<Vec<_>>().into_iter()),
            Value::Error => return Ok(Flow::Normal),
            other => {
                return Err(mismatch(
                    format!("cannot iterate over {}", other.type_name()),
                    iter.span(),
                ))
            }
        };

        for item in items {
            self.check_cancelled(body.span)?;
            // the loop variable shares a scope with the body
            self.push_scope();
            self.define(&var.name, item, false);
            let result = self.exec_scoped(&body.stmts);
            self.pop_scope();
            match result? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_condition(&mut self, cond: &Expr) -> EvalResult<bool> {
        match self.eval_expr(cond)? {
            Value::Bool(b) => Ok(b),
            Value::Error => Ok(false),
            other => Err(mismatch(
                format!("condition must be a bool, found {}", other.type_name()),
                cond.span(),
            )),
        }
    }

    /// A node with a base starts from the base object's fields
    fn eval_node(&mut self, node: &NodeDecl) -> EvalResult<Value> {
        let value = self.eval_expr(&node.value)?;
        let Some(base) = &node.base else {
            return Ok(value);
        };
        // only reachable with unresolved names tolerated
        let Some(base_value) = self.get(&base.name).cloned() else {
            debug!("unknown base `{}` of `{}`", base.name, node.name.name);
            return Ok(Value::Error);
        };

        match (base_value, value) {
            (Value::Error, _) | (_, Value::Error) => Ok(Value::Error),
            (Value::Object(mut fields), Value::Object(own)) => {
                for (key, value) in own {
                    match fields.iter_mut().find(|(name, _)| *name == key) {
                        Some(entry) => entry.1 = value,
                        None => fields.push((key, value)),
                    }
                }
                Ok(Value::Object(fields))
            }
            (Value::Object(_), other) => Err(fault(
                FaultKind::InvalidBase(format!(
                    "`{}` extends `{}` but is a {}",
                    node.name.name,
                    base.name,
                    other.type_name()
                )),
                node.value.span(),
            )),
            (other, _) => Err(fault(
                FaultKind::InvalidBase(format!("base `{}` is a {}, not an object", base.name, other.type_name())),
                base.span,
            )),
        }
    }

    // ==================== Assignment ====================

    fn assign(&mut self, target: &Expr, value: Value, span: Span) -> EvalResult<()> {
        let mut path = Vec::new();
        let Some(root) = self.place_path(target, &mut path)? else {
            // unresolved name in degraded mode
            return Ok(());
        };
        let slot = self.place_mut(&root.name).map_err(|kind| fault(kind, root.span))?;
        store(slot, &path, value, span)
    }

    /// Evaluate the index expressions of a place, outermost last
    fn place_path<'a>(&mut self, target: &'a Expr, path: &mut Vec<PathKey>) -> EvalResult<Option<&'a Ident>> {
        match target {
            Expr::Ident { resolution: Resolution::Unknown, .. } => Ok(None),
            Expr::Ident { name, .. } => Ok(Some(name)),
            Expr::Field { expr, field, .. } => {
                let root = self.place_path(expr, path)?;
                path.push(PathKey {
                    key: Value::Str(field.name.clone()),
                    span: field.span,
                });
                Ok(root)
            }
            Expr::Index { expr, index, .. } => {
                let root = self.place_path(expr, path)?;
                let key = self.eval_expr(index)?;
                path.push(PathKey { key, span: index.span() });
                Ok(root)
            }
            other => Err(malformed("invalid assignment target", other.span())),
        }
    }

    // ==================== Expressions ====================

    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.check_cancelled(expr.span())?;
        match expr {
            Expr::Literal(lit) => Ok(Value::from_literal(lit)),
            Expr::Ident {
                resolution: Resolution::Unknown,
                ..
            } => Ok(Value::Error),
            Expr::Ident { name, .. } => self.eval_ident(name),
            Expr::Binary { left, op, right, span } => match op {
                BinOp::And | BinOp::Or => self.eval_logical(*op, left, right, *span),
                _ => {
                    let left = self.eval_expr(left)?;
                    let right = self.eval_expr(right)?;
                    binary(*op, left, right, *span)
                }
            },
            Expr::Unary { op, expr, span } => {
                let value = self.eval_expr(expr)?;
                unary(*op, value, *span)
            }
            Expr::Call {
                callee,
                resolution,
                args,
                span,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg))
                    .collect::<EvalResult<Vec<_>>>()?;
                if *resolution == Resolution::Unknown {
                    return Ok(Value::Error);
                }
                self.eval_call(callee, args, *span)
            }
            Expr::Index { expr, index, span } => {
                let base = self.eval_expr(expr)?;
                let index = self.eval_expr(index)?;
                index_value(base, index, *span)
            }
            Expr::Field { expr, field, .. } => match self.eval_expr(expr)? {
                Value::Error => Ok(Value::Error),
                object @ Value::Object(_) => object
                    .field(&field.name)
                    .cloned()
                    .ok_or_else(|| fault(FaultKind::UnknownField(field.name.clone()), field.span)),
                other => Err(mismatch(
                    format!("{} has no field `{}`", other.type_name(), field.name),
                    field.span,
                )),
            },
            Expr::Array { elements, .. } => Ok(Value::Array(self.eval_list(elements)?)),
            Expr::Tuple { elements, .. } => Ok(Value::Tuple(self.eval_list(elements)?)),
            Expr::Object { fields, .. } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push((field.name.name.clone(), self.eval_expr(&field.value)?));
                }
                Ok(Value::Object(values))
            }
            Expr::Error { span } => Err(malformed("expression could not be parsed", *span)),
        }
    }

    fn eval_list(&mut self, elements: &[Expr]) -> EvalResult<Vec<Value>> {
        elements.iter().map(|e| self.eval_expr(e)).collect()
    }

    fn eval_ident(&mut self, name: &Ident) -> EvalResult<Value> {
        if let Some(value) = self.get(&name.name) {
            return Ok(value.clone());
        }
        if self.function(&name.name).is_some() || registry().is_builtin(&name.name) {
            return Err(mismatch(format!("function `{}` used as a value", name.name), name.span));
        }
        Err(fault(FaultKind::UndefinedVariable(name.name.clone()), name.span))
    }

    /// `&&` and `||` skip the right operand when the left decides
    fn eval_logical(&mut self, op: BinOp, left: &Expr, right: &Expr, span: Span) -> EvalResult<Value> {
        let lhs = match self.eval_expr(left)? {
            Value::Error => return Ok(Value::Error),
            Value::Bool(b) => b,
            other => {
                return Err(mismatch(
                    format!("`{}` expects bools, found {}", op, other.type_name()),
                    left.span(),
                ))
            }
        };
        if (op == BinOp::And && !lhs) || (op == BinOp::Or && lhs) {
            return Ok(Value::Bool(lhs));
        }
        match self.eval_expr(right)? {
            value @ (Value::Bool(_) | Value::Error) => Ok(value),
            other => Err(mismatch(
                format!("`{}` expects bools, found {}", op, other.type_name()),
                right.span().merge(&span),
            )),
        }
    }

    fn eval_call(&mut self, callee: &Ident, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        if let Some(callable) = self.function(&callee.name) {
            return self.call_function(&callable, args, span);
        }
        if let Some(builtin) = registry().get(&callee.name) {
            if !builtin.accepts(args.len()) {
                return Err(fault(
                    FaultKind::ArityMismatch {
                        name: callee.name.clone(),
                        expected: builtin.arity(),
                        found: args.len(),
                    },
                    span,
                ));
            }
            if args.iter().any(Value::is_error) {
                return Ok(Value::Error);
            }
            trace!("builtin {}({} args)", builtin.name, args.len());
            return (builtin.call)(self, args, span);
        }
        if self.get(&callee.name).is_some() {
            return Err(fault(FaultKind::NotCallable(callee.name.clone()), callee.span));
        }
        Err(fault(FaultKind::UndefinedVariable(callee.name.clone()), callee.span))
    }

    fn call_function(&mut self, callable: &Callable, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        let func = &callable.decl;
        if args.len() != func.params.len() {
            return Err(fault(
                FaultKind::ArityMismatch {
                    name: func.name.name.clone(),
                    expected: func.params.len().to_string(),
                    found: args.len(),
                },
                span,
            ));
        }
        if self.depth() >= self.max_depth() {
            return Err(fault(FaultKind::RecursionLimit(self.max_depth()), span));
        }
        trace!("call {} at depth {}", func.name.name, self.depth());

        self.push_frame(callable);
        for (param, arg) in func.params.iter().zip(args) {
            self.define(&param.name, arg, false);
        }
        let result = self.exec_scoped(&func.body.stmts);
        self.pop_frame();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
            Flow::Break | Flow::Continue => Err(malformed("loop control outside of a loop", span)),
        }
    }
}

/// Write `value` at `path` below `slot`. Assigning a missing object field
/// creates it.
fn store(slot: &mut Value, path: &[PathKey], value: Value, span: Span) -> EvalResult<()> {
    let Some((step, rest)) = path.split_first() else {
        *slot = value;
        return Ok(());
    };
    match slot {
        Value::Error => Ok(()),
        Value::Object(fields) => {
            let Value::Str(name) = &step.key else {
                return Err(mismatch(
                    format!("object keys are strings, found {}", step.key.type_name()),
                    step.span,
                ));
            };
            if let Some(entry) = fields.iter_mut().find(|(key, _)| key == name) {
                return store(&mut entry.1, rest, value, span);
            }
            if rest.is_empty() {
                fields.push((name.clone(), value));
                Ok(())
            } else {
                Err(fault(FaultKind::UnknownField(name.clone()), step.span))
            }
        }
        Value::Array(items) | Value::Tuple(items) => {
            let Value::Int(index) = &step.key else {
                return Err(mismatch(
                    format!("indices are ints, found {}", step.key.type_name()),
                    step.span,
                ));
            };
            let len = items.len();
            let item = usize::try_from(*index)
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| fault(FaultKind::IndexOutOfRange { index: *index, len }, step.span))?;
            store(item, rest, value, span)
        }
        other => Err(mismatch(format!("cannot assign into {}", other.type_name()), span)),
    }
}

fn index_value(base: Value, index: Value, span: Span) -> EvalResult<Value> {
    match (base, index) {
        (Value::Error, _) | (_, Value::Error) => Ok(Value::Error),
        (Value::Array(items) | Value::Tuple(items), Value::Int(i)) => {
            let len = items.len();
            usize::try_from(i)
                .ok()
                .and_then(|at| items.into_iter().nth(at))
                .ok_or_else(|| fault(FaultKind::IndexOutOfRange { index: i, len }, span))
        }
        (Value::Str(s), Value::Int(i)) => {
            let len = s.chars().count();
            usize::try_from(i)
                .ok()
                .and_then(|at| s.chars().nth(at))
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| fault(FaultKind::IndexOutOfRange { index: i, len }, span))
        }
        (Value::Object(fields), Value::Str(key)) => fields
            .into_iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
            .ok_or_else(|| fault(FaultKind::UnknownField(key), span)),
        (base, index) => Err(mismatch(
            format!("cannot index {} with {}", base.type_name(), index.type_name()),
            span,
        )),
    }
}

fn unary(op: UnOp, value: Value, span: Span) -> EvalResult<Value> {
    match (op, value) {
        (_, Value::Error) => Ok(Value::Error),
        (UnOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| fault(FaultKind::IntegerOverflow, span)),
        (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, other) => Err(mismatch(
            format!("cannot apply `{}` to {}", op.symbol(), other.type_name()),
            span,
        )),
    }
}

fn binary(op: BinOp, left: Value, right: Value, span: Span) -> EvalResult<Value> {
    if left.is_error() || right.is_error() {
        return Ok(Value::Error);
    }
    match op {
        BinOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
        BinOp::Ne => Ok(Value::Bool(!left.loose_eq(&right))),
        _ if op.is_comparison() => compare(op, &left, &right, span),
        BinOp::Range => match (left, right) {
            (Value::Int(start), Value::Int(end)) => Ok(Value::Range(start, end)),
            (l, r) => Err(operand_mismatch(op, &l, &r, span)),
        },
        BinOp::And | BinOp::Or => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinOp::And { a && b } else { a || b })),
            (l, r) => Err(operand_mismatch(op, &l, &r, span)),
        },
        _ if op.is_arithmetic() => arithmetic(op, left, right, span),
        _ => Err(operand_mismatch(op, &left, &right, span)),
    }
}

fn operand_mismatch(op: BinOp, left: &Value, right: &Value, span: Span) -> RuntimeFault {
    mismatch(
        format!("cannot apply `{}` to {} and {}", op, left.type_name(), right.type_name()),
        span,
    )
}

fn compare(op: BinOp, left: &Value, right: &Value, span: Span) -> EvalResult<Value> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(operand_mismatch(op, left, right, span)),
        },
    };
    // NaN compares false
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinOp, left: Value, right: Value, span: Span) -> EvalResult<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (op, Value::Int(a), Value::Int(b)) => int_arithmetic(op, a, b, span),
        (op, l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => float_arithmetic(op, x, y, span),
            _ => Err(operand_mismatch(op, &l, &r, span)),
        },
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64, span: Span) -> EvalResult<Value> {
    if matches!(op, BinOp::Div | BinOp::Mod) && b == 0 {
        return Err(fault(FaultKind::DivisionByZero, span));
    }
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => a.checked_div(b),
        BinOp::Mod => a.checked_rem(b),
        // negative exponents leave the integers
        BinOp::Pow if b < 0 => return Ok(Value::Float((a as f64).powf(b as f64))),
        BinOp::Pow => u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
        _ => return Err(operand_mismatch(op, &Value::Int(a), &Value::Int(b), span)),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| fault(FaultKind::IntegerOverflow, span))
}

fn float_arithmetic(op: BinOp, x: f64, y: f64, span: Span) -> EvalResult<Value> {
    if matches!(op, BinOp::Div | BinOp::Mod) && y == 0.0 {
        return Err(fault(FaultKind::DivisionByZero, span));
    }
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Mod => x % y,
        BinOp::Pow => x.powf(y),
        _ => return Err(operand_mismatch(op, &Value::Float(x), &Value::Float(y), span)),
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BufferHost;
    use crate::frontend::parser::parse_source;
    use crate::frontend::semantic::validate;
    use pretty_assertions::assert_eq;

    fn run_with(ctx: &mut Context, source: &str) -> EvalResult<Value> {
        let (program, diagnostics) = parse_source(source);
        assert!(diagnostics.is_empty(), "syntax errors: {:?}", diagnostics);
        let validated = validate(program);
        assert!(!validated.has_errors(), "validation errors: {:?}", validated.diagnostics);
        ctx.evaluate(&validated.program)
    }

    fn run(source: &str) -> EvalResult<Value> {
        run_with(&mut Context::with_host(BufferHost::new()), source)
    }

    fn fault_kind(source: &str) -> FaultKind {
        match run(source) {
            Err(err) => err.kind,
            Ok(value) => panic!("expected a fault, got {}", value),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("1 + 2 * 3;"), Ok(Value::Int(7)));
        assert_eq!(run("2 ** 3 ** 2;"), Ok(Value::Int(512)));
        assert_eq!(run("-2 ** 2;"), Ok(Value::Int(-4)));
        assert_eq!(run("7 % 3 + 7 / 2;"), Ok(Value::Int(4)));
        assert_eq!(run("1 + 0.5;"), Ok(Value::Float(1.5)));
        assert_eq!(run("2 ** -1;"), Ok(Value::Float(0.5)));
        assert_eq!(run("\"ab\" + \"cd\";"), Ok(Value::Str("abcd".into())));
        assert_eq!(run("1 == 1.0 && 2 < 3;"), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_arithmetic_faults() {
        assert_eq!(fault_kind("1 / 0;"), FaultKind::DivisionByZero);
        assert_eq!(fault_kind("1.5 % 0.0;"), FaultKind::DivisionByZero);
        assert_eq!(fault_kind("9223372036854775807 + 1;"), FaultKind::IntegerOverflow);
        // `let` bindings are untyped statically
        assert!(matches!(fault_kind("let s = \"a\"; 1 < s;"), FaultKind::TypeMismatch(_)));
    }

    #[test]
    fn test_short_circuit() {
        // the right operand would divide by zero
        assert_eq!(run("false && 1 / 0 == 1;"), Ok(Value::Bool(false)));
        assert_eq!(run("true || 1 / 0 == 1;"), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_control_flow() {
        let source = r#"
            let total = 0;
            for i in 0..10 {
                if i == 7 { break; }
                if i % 2 == 0 { continue; }
                total = total + i;
            }
            let n = 0;
            while n < 3 { n = n + 1; }
            total * 10 + n;
        "#;
        // 1 + 3 + 5
        assert_eq!(run(source), Ok(Value::Int(93)));
    }

    #[test]
    fn test_functions_and_recursion() {
        let source = r#"
            fn fib(n) {
                if n < 2 { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            fib(15);
        "#;
        assert_eq!(run(source), Ok(Value::Int(610)));
        // hoisted
        assert_eq!(run("twice(4); fn twice(x) { return x * 2; }"), Ok(Value::Int(8)));
        assert_eq!(run("fn nothing() { } nothing();"), Ok(Value::Null));
    }

    #[test]
    fn test_local_functions_recurse() {
        let source = r#"
            let total = 0;
            {
                fn count(n) { if n == 0 { return 0; } return 1 + count(n - 1); }
                total = count(5);
            }
            fn parity(n) {
                fn even(k) { if k == 0 { return true; } return odd(k - 1); }
                fn odd(k) { if k == 0 { return false; } return even(k - 1); }
                return even(n);
            }
            [total, parity(7), parity(10)];
        "#;
        assert_eq!(
            run(source),
            Ok(Value::Array(vec![Value::Int(5), Value::Bool(false), Value::Bool(true)]))
        );
    }

    #[test]
    fn test_recursion_limit() {
        let mut ctx = Context::with_host(BufferHost::new());
        ctx.set_max_depth(16);
        let result = run_with(&mut ctx, "fn down(n) { return down(n + 1); } down(0);");
        assert_eq!(result.map_err(|f| f.kind), Err(FaultKind::RecursionLimit(16)));
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_nodes_inherit_fields() {
        let source = r#"
            base @[kind = "mob"] := { health := 20, speed := 1 };
            zombie : base := { speed := 2, undead := true };
            zombie;
        "#;
        let mut ctx = Context::with_host(BufferHost::new());
        let value = run_with(&mut ctx, source);
        assert_eq!(
            value,
            Ok(Value::Object(vec![
                ("health".into(), Value::Int(20)),
                ("speed".into(), Value::Int(2)),
                ("undead".into(), Value::Bool(true)),
            ]))
        );
        assert_eq!(
            ctx.node_attributes("base"),
            Some(&[("kind".to_string(), Value::Str("mob".into()))][..])
        );
        assert_eq!(ctx.node_attributes("zombie"), None);
    }

    #[test]
    fn test_field_attributes() {
        let source = r#"
            spawn := { point @[respawn] := (1, 2), name := "hub", area := { edge @[radius = 8, soft] := 3 } };
            pit : spawn := { point @[hidden] := (0, 0) };
        "#;
        let mut ctx = Context::with_host(BufferHost::new());
        assert_eq!(run_with(&mut ctx, source), Ok(Value::Null));
        assert_eq!(
            ctx.field_attributes("spawn", "point"),
            Some(&[("respawn".to_string(), Value::Bool(true))][..])
        );
        assert_eq!(ctx.field_attributes("spawn", "name"), None);
        assert_eq!(
            ctx.field_attributes("spawn", "area.edge"),
            Some(&[("radius".to_string(), Value::Int(8)), ("soft".to_string(), Value::Bool(true))][..])
        );
        assert_eq!(
            ctx.field_attributes("pit", "point"),
            Some(&[("hidden".to_string(), Value::Bool(true))][..])
        );
        assert_eq!(ctx.field_attributes("pit", "area.edge"), None);

        // redeclaring a node drops what its old fields carried
        assert_eq!(run_with(&mut ctx, "spawn := { point := (3, 4) };"), Ok(Value::Null));
        assert_eq!(ctx.field_attributes("spawn", "point"), None);
        assert_eq!(ctx.field_attributes("spawn", "area.edge"), None);
        assert!(ctx.field_attributes("pit", "point").is_some());
    }

    #[test]
    fn test_place_assignment() {
        let source = r#"
            let p = { pos := [1, 2, 3], name := "a" };
            p.pos[1] = 20;
            p.extra = true;
            p["name"] = "b";
            p;
        "#;
        assert_eq!(
            run(source),
            Ok(Value::Object(vec![
                ("pos".into(), Value::Array(vec![Value::Int(1), Value::Int(20), Value::Int(3)])),
                ("name".into(), Value::Str("b".into())),
                ("extra".into(), Value::Bool(true)),
            ]))
        );
        assert_eq!(
            fault_kind("let a = [1]; a[3] = 0;"),
            FaultKind::IndexOutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn test_indexing_and_fields() {
        assert_eq!(run("let t = (1, \"x\"); t[1];"), Ok(Value::Str("x".into())));
        assert_eq!(run("\"héllo\"[1];"), Ok(Value::Str("é".into())));
        assert_eq!(fault_kind("[1, 2][-1];"), FaultKind::IndexOutOfRange { index: -1, len: 2 });
        assert_eq!(fault_kind("let o = { a := 1 }; o.b;"), FaultKind::UnknownField("b".into()));
    }

    #[test]
    fn test_print_and_attributes() {
        let host = BufferHost::new();
        let mut ctx = Context::with_host(host.clone());
        let source = "@[version = 2, strict]\nfor c in \"ab\" { print(c, len([c])); }";
        assert_eq!(run_with(&mut ctx, source), Ok(Value::Null));
        assert_eq!(host.lines(), vec!["a 1", "b 1"]);
        assert_eq!(
            ctx.module_attributes(),
            &[
                ("version".to_string(), Value::Int(2)),
                ("strict".to_string(), Value::Bool(true)),
            ][..]
        );
    }

    #[test]
    fn test_fault_unwinds_context() {
        let mut ctx = Context::with_host(BufferHost::new());
        assert_eq!(run_with(&mut ctx, "let kept = 1;"), Ok(Value::Null));
        let fault = run_with(&mut ctx, "fn f() { let inner = 2; return 1 / 0; } f();");
        assert_eq!(fault.map_err(|f| f.kind), Err(FaultKind::DivisionByZero));
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.get("kept"), Some(&Value::Int(1)));
        assert_eq!(ctx.get("inner"), None);
    }

    #[test]
    fn test_cancelled_before_first_statement() {
        let mut ctx = Context::with_host(BufferHost::new());
        ctx.cancel_token().cancel();
        assert_eq!(
            run_with(&mut ctx, "let x = 1;").map_err(|f| f.kind),
            Err(FaultKind::Cancelled)
        );
        assert_eq!(ctx.get("x"), None);
    }
}
