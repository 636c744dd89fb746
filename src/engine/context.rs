//! Execution context
//!
//! Holds everything a running program may observe or change: bindings,
//! declared functions, recorded attributes, the host capability and the
//! cancellation flag. A context can be reused for several programs; after a
//! fault it is unwound to its global scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::host::{Host, StdoutHost};
use super::value::Value;
use super::FaultKind;
use crate::frontend::ast::{Attribute, Expr, Field, FunctionDecl};
use crate::frontend::semantic::SymbolKind;

/// Default bound on nested function calls
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Shared cancellation flag, checked before every statement and expression
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the context can run again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    /// Nodes are immutable once declared
    node: bool,
}

/// Functions hoisted in one scope, chained to those visible where the
/// scope was entered
#[derive(Debug, Default)]
struct FunctionEnv {
    functions: HashMap<String, Arc<FunctionDecl>>,
    parent: Option<Arc<FunctionEnv>>,
}

impl FunctionEnv {
    fn find(env: &Arc<FunctionEnv>, name: &str) -> Option<Callable> {
        let mut current = Some(env);
        while let Some(env) = current {
            if let Some(decl) = env.functions.get(name) {
                return Some(Callable {
                    decl: Arc::clone(decl),
                    env: Arc::clone(env),
                });
            }
            current = env.parent.as_ref();
        }
        None
    }
}

/// A function together with the functions visible at its declaration
#[derive(Debug, Clone)]
pub(crate) struct Callable {
    pub(crate) decl: Arc<FunctionDecl>,
    env: Arc<FunctionEnv>,
}

#[derive(Debug, Default)]
struct Scope {
    values: HashMap<String, Slot>,
    functions: Option<Arc<FunctionEnv>>,
}

/// Scopes of one activation; never empty
#[derive(Debug)]
struct Frame {
    scopes: Vec<Scope>,
    /// Declaring environment of the called function
    env: Option<Arc<FunctionEnv>>,
}

impl Frame {
    fn new(env: Option<Arc<FunctionEnv>>) -> Self {
        Self {
            scopes: vec![Scope::default()],
            env,
        }
    }

    fn innermost(&mut self) -> Option<&mut Scope> {
        self.scopes.last_mut()
    }

    fn functions(&self) -> Option<&Arc<FunctionEnv>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.functions.as_ref())
            .or(self.env.as_ref())
    }
}

/// Runtime state of one evaluation session
pub struct Context {
    /// Top-level frame; its first scope is the global scope
    global: Frame,
    /// One frame per active function call
    calls: Vec<Frame>,
    host: Box<dyn Host>,
    cancel: CancelToken,
    module_attributes: Vec<(String, Value)>,
    node_attributes: HashMap<String, Vec<(String, Value)>>,
    /// Keyed by `node.field`, with nested fields as `node.outer.inner`
    field_attributes: HashMap<String, Vec<(String, Value)>>,
    max_depth: usize,
}

impl Context {
    /// Context printing to stdout
    pub fn new() -> Self {
        Self::with_host(StdoutHost)
    }

    pub fn with_host(host: impl Host + 'static) -> Self {
        Self {
            global: Frame::new(None),
            calls: Vec::new(),
            host: Box::new(host),
            cancel: CancelToken::new(),
            module_attributes: Vec::new(),
            node_attributes: HashMap::new(),
            field_attributes: HashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Share an existing cancellation flag
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn host_mut(&mut self) -> &mut dyn Host {
        self.host.as_mut()
    }

    // ==================== Bindings ====================

    /// Value of a visible binding
    pub fn get(&self, name: &str) -> Option<&Value> {
        let frame = self.calls.last().unwrap_or(&self.global);
        frame
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.values.get(name))
            .or_else(|| {
                if self.calls.is_empty() {
                    None
                } else {
                    self.global.scopes.first().and_then(|scope| scope.values.get(name))
                }
            })
            .map(|slot| &slot.value)
    }

    /// Bind a value in the global scope, e.g. to pass input to a program
    pub fn set_global(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.global.scopes.first_mut() {
            scope.values.insert(name.to_string(), Slot { value, node: false });
        }
    }

    /// Names bound in the global scope, for validating the next program
    /// against this context
    pub fn global_names(&self) -> Vec<(String, SymbolKind)> {
        let Some(scope) = self.global.scopes.first() else {
            return Vec::new();
        };
        let mut names: Vec<_> = scope
            .values
            .iter()
            .map(|(name, slot)| {
                let kind = if slot.node { SymbolKind::Node } else { SymbolKind::Local };
                (name.clone(), kind)
            })
            .chain(scope.functions.iter().flat_map(|env| {
                env.functions
                    .iter()
                    .map(|(name, func)| (name.clone(), SymbolKind::Function { params: func.params.len() }))
            }))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }

    /// Attributes of the last evaluated program
    pub fn module_attributes(&self) -> &[(String, Value)] {
        &self.module_attributes
    }

    /// Attributes declared on a node
    pub fn node_attributes(&self, node: &str) -> Option<&[(String, Value)]> {
        self.node_attributes.get(node).map(Vec::as_slice)
    }

    /// Attributes declared on a field of a node's object literal. `field`
    /// may be a dotted path into nested objects. Fields inherited from a base
    /// keep their attributes on the base only.
    pub fn field_attributes(&self, node: &str, field: &str) -> Option<&[(String, Value)]> {
        self.field_attributes
            .get(&format!("{}.{}", node, field))
            .map(Vec::as_slice)
    }

    pub(crate) fn set_module_attributes(&mut self, attributes: &[Attribute]) {
        self.module_attributes = attribute_values(attributes);
    }

    pub(crate) fn set_node_attributes(&mut self, node: &str, attributes: &[Attribute]) {
        if attributes.is_empty() {
            self.node_attributes.remove(node);
        } else {
            self.node_attributes.insert(node.to_string(), attribute_values(attributes));
        }
    }

    /// Replace the field attributes recorded for `node` with those in `value`
    pub(crate) fn set_field_attributes(&mut self, node: &str, value: &Expr) {
        let prefix = format!("{}.", node);
        self.field_attributes.retain(|path, _| !path.starts_with(&prefix));
        if let Expr::Object { fields, .. } = value {
            record_fields(&mut self.field_attributes, node, fields);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ==================== Scopes and Frames ====================

    fn frame_mut(&mut self) -> &mut Frame {
        self.calls.last_mut().unwrap_or(&mut self.global)
    }

    /// Number of active function calls
    pub(crate) fn depth(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn push_scope(&mut self) {
        self.frame_mut().scopes.push(Scope::default());
    }

    pub(crate) fn pop_scope(&mut self) {
        let frame = self.frame_mut();
        if frame.scopes.len() > 1 {
            frame.scopes.pop();
        }
    }

    /// Enter `callee`: its body sees the functions of its declaring scope
    pub(crate) fn push_frame(&mut self, callee: &Callable) {
        self.calls.push(Frame::new(Some(Arc::clone(&callee.env))));
    }

    pub(crate) fn pop_frame(&mut self) {
        self.calls.pop();
    }

    /// Drop every call frame and nested scope, keeping globals
    pub(crate) fn unwind(&mut self) {
        self.calls.clear();
        self.global.scopes.truncate(1);
    }

    pub(crate) fn define(&mut self, name: &str, value: Value, node: bool) {
        if let Some(scope) = self.frame_mut().innermost() {
            scope.values.insert(name.to_string(), Slot { value, node });
        }
    }

    /// Declare the functions of the innermost scope. Hoisting into a scope
    /// that already has functions, like the global scope of a reused
    /// context, adds to them.
    pub(crate) fn hoist_functions(&mut self, decls: Vec<Arc<FunctionDecl>>) {
        if decls.is_empty() {
            return;
        }
        let frame = self.frame_mut();
        let outer = frame.functions().cloned();
        let Some(scope) = frame.innermost() else {
            return;
        };
        let (mut functions, parent) = match scope.functions.take() {
            Some(env) => (env.functions.clone(), env.parent.clone()),
            None => (HashMap::new(), outer),
        };
        for decl in decls {
            functions.insert(decl.name.name.clone(), decl);
        }
        scope.functions = Some(Arc::new(FunctionEnv { functions, parent }));
    }

    pub(crate) fn function(&self, name: &str) -> Option<Callable> {
        let frame = self.calls.last().unwrap_or(&self.global);
        frame
            .functions()
            .and_then(|env| FunctionEnv::find(env, name))
            .or_else(|| {
                self.global
                    .scopes
                    .first()
                    .and_then(|scope| scope.functions.as_ref())
                    .and_then(|env| FunctionEnv::find(env, name))
            })
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        if let Some(frame) = self.calls.last_mut() {
            if let Some(slot) = frame.scopes.iter_mut().rev().find_map(|s| s.values.get_mut(name)) {
                return Some(slot);
            }
            return self.global.scopes.first_mut().and_then(|s| s.values.get_mut(name));
        }
        self.global.scopes.iter_mut().rev().find_map(|s| s.values.get_mut(name))
    }

    /// Mutable access to a variable for assignment
    pub(crate) fn place_mut(&mut self, name: &str) -> Result<&mut Value, FaultKind> {
        match self.slot_mut(name) {
            None => Err(FaultKind::UndefinedVariable(name.to_string())),
            Some(slot) if slot.node => Err(FaultKind::TypeMismatch(format!("node `{}` cannot be reassigned", name))),
            Some(slot) => Ok(&mut slot.value),
        }
    }
}

fn attribute_values(attributes: &[Attribute]) -> Vec<(String, Value)> {
    attributes
        .iter()
        .map(|attr| {
            let value = attr.value.as_ref().map_or(Value::Bool(true), Value::from_literal);
            (attr.key.name.clone(), value)
        })
        .collect()
}

fn record_fields(table: &mut HashMap<String, Vec<(String, Value)>>, path: &str, fields: &[Field]) {
    for field in fields {
        let path = format!("{}.{}", path, field.name.name);
        if !field.attributes.is_empty() {
            table.insert(path.clone(), attribute_values(&field.attributes));
        }
        if let Expr::Object { fields, .. } = &field.value {
            record_fields(table, &path, fields);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("global", &self.global)
            .field("depth", &self.calls.len())
            .field("module_attributes", &self.module_attributes)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BufferHost;
    use crate::frontend::ast::Stmt;
    use crate::frontend::parser::parse_source;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_context_is_send() {
        assert_send::<Context>();
        assert_send::<CancelToken>();
    }

    fn declare(ctx: &mut Context, source: &str) {
        let (program, diagnostics) = parse_source(source);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let decls = program
            .stmts
            .into_iter()
            .filter_map(|stmt| match stmt {
                Stmt::Function(func) => Some(Arc::new(func)),
                _ => None,
            })
            .collect();
        ctx.hoist_functions(decls);
    }

    #[test]
    fn test_scoping() {
        let mut ctx = Context::with_host(BufferHost::new());
        declare(&mut ctx, "fn g() { }");
        ctx.define("a", Value::Int(1), false);
        ctx.push_scope();
        ctx.define("a", Value::Int(2), false);
        assert_eq!(ctx.get("a"), Some(&Value::Int(2)));
        ctx.pop_scope();
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));

        ctx.push_scope();
        ctx.define("local", Value::Null, false);
        let callee = ctx.function("g").expect("declared");
        ctx.push_frame(&callee);
        // a call sees globals but not the caller's locals
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));
        assert_eq!(ctx.get("local"), None);
        ctx.unwind();
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.get("local"), None);
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_nodes_are_immutable() {
        let mut ctx = Context::with_host(BufferHost::new());
        ctx.define("n", Value::Int(1), true);
        ctx.set_global("v", Value::Int(1));
        assert!(matches!(ctx.place_mut("n"), Err(FaultKind::TypeMismatch(_))));
        assert!(matches!(ctx.place_mut("missing"), Err(FaultKind::UndefinedVariable(_))));
        if let Ok(slot) = ctx.place_mut("v") {
            *slot = Value::Int(5);
        }
        assert_eq!(ctx.get("v"), Some(&Value::Int(5)));
        assert_eq!(
            ctx.global_names(),
            vec![("n".to_string(), SymbolKind::Node), ("v".to_string(), SymbolKind::Local)]
        );
    }

    #[test]
    fn test_block_functions_see_their_siblings() {
        let mut ctx = Context::with_host(BufferHost::new());
        declare(&mut ctx, "fn top() { }");
        ctx.push_scope();
        declare(&mut ctx, "fn even(n) { } fn odd(n) { }");
        let odd = ctx.function("odd").expect("hoisted in the block");

        ctx.push_frame(&odd);
        assert!(ctx.function("even").is_some());
        assert!(ctx.function("odd").is_some());
        assert!(ctx.function("top").is_some());
        ctx.pop_frame();

        ctx.pop_scope();
        assert!(ctx.function("even").is_none());
        assert_eq!(
            ctx.global_names(),
            vec![("top".to_string(), SymbolKind::Function { params: 0 })]
        );
    }

    #[test]
    fn test_hoisting_again_extends_the_global_scope() {
        let mut ctx = Context::with_host(BufferHost::new());
        declare(&mut ctx, "fn a() { }");
        declare(&mut ctx, "fn b(x) { }");
        let names: Vec<_> = ctx.global_names().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let ctx = Context::with_host(BufferHost::new()).with_cancel_token(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancel_token().reset();
        assert!(!token.is_cancelled());
    }
}
