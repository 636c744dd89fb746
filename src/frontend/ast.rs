//! Abstract Syntax Tree definitions for Anvil

use std::fmt;

use crate::utils::Span;

/// Source dialect, selected by shebang or file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Anvil Markup Language
    #[default]
    Aml,
    /// Anvil Script Language
    Asl,
}

impl Dialect {
    pub fn from_extension(ext: &str) -> Option<Dialect> {
        match ext.to_ascii_lowercase().as_str() {
            "aml" => Some(Dialect::Aml),
            "asl" => Some(Dialect::Asl),
            _ => None,
        }
    }

    /// Parse a `#!aml` style shebang
    pub fn from_shebang(text: &str) -> Option<Dialect> {
        Dialect::from_extension(text.trim_start_matches("#!"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Aml => "aml",
            Dialect::Asl => "asl",
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::from_extension(s).ok_or_else(|| format!("unknown dialect `{}`", s))
    }
}

/// A complete source file
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub dialect: Dialect,
    /// Module attributes: `@[...]` blocks before the first statement
    pub attributes: Vec<Attribute>,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// `key` or `key = literal` inside `@[...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: Ident,
    pub value: Option<Literal>,
    pub span: Span,
}

/// Identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// What an identifier reference was bound to by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Not validated yet
    #[default]
    Pending,
    /// `let`, parameter or loop variable
    Local,
    /// AML node declaration
    Node,
    /// User function
    Function,
    /// Builtin function
    Builtin,
    /// No declaration in scope
    Unknown,
}

/// Code block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Block,
    pub span: Span,
}

/// Node declaration: `name [: base] [@[...]] := value`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecl {
    pub name: Ident,
    pub base: Option<Ident>,
    pub attributes: Vec<Attribute>,
    pub value: Expr,
    pub span: Span,
}

/// Object field: `name [@[...]] := value`
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Ident,
    pub attributes: Vec<Attribute>,
    pub value: Expr,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// let name = expr
    Let { name: Ident, value: Expr, span: Span },
    /// AML node
    Node(NodeDecl),
    /// fn name(params) { ... }
    Function(FunctionDecl),
    /// target = value
    Assign { target: Expr, value: Expr, span: Span },
    /// if cond { ... } [else { ... }]; `else if` is nested in the else block
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    While { cond: Expr, body: Block, span: Span },
    /// for var in iter { ... }
    For {
        var: Ident,
        iter: Expr,
        body: Block,
        span: Span,
    },
    Return { value: Option<Expr>, span: Span },
    Break { span: Span },
    Continue { span: Span },
    Block(Block),
    /// Expression statement
    Expr(Expr),
    /// Placeholder left by error recovery
    Error { span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. } => *span,
            Stmt::Node(node) => node.span,
            Stmt::Function(func) => func.span,
            Stmt::Assign { span, .. } => *span,
            Stmt::If { span, .. } => *span,
            Stmt::While { span, .. } => *span,
            Stmt::For { span, .. } => *span,
            Stmt::Return { span, .. } => *span,
            Stmt::Break { span } => *span,
            Stmt::Continue { span } => *span,
            Stmt::Block(block) => block.span,
            Stmt::Expr(expr) => expr.span(),
            Stmt::Error { span } => *span,
        }
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Variable, node or function reference
    Ident { name: Ident, resolution: Resolution },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
        span: Span,
    },
    /// Call of a named function or builtin
    Call {
        callee: Ident,
        resolution: Resolution,
        args: Vec<Expr>,
        span: Span,
    },
    /// expr[index]
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// expr.field
    Field {
        expr: Box<Expr>,
        field: Ident,
        span: Span,
    },
    Array { elements: Vec<Expr>, span: Span },
    /// Two or more values in parentheses
    Tuple { elements: Vec<Expr>, span: Span },
    Object { fields: Vec<Field>, span: Span },
    /// Placeholder left by error recovery
    Error { span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(lit) => lit.span(),
            Expr::Ident { name, .. } => name.span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Index { span, .. } => *span,
            Expr::Field { span, .. } => *span,
            Expr::Array { span, .. } => *span,
            Expr::Tuple { span, .. } => *span,
            Expr::Object { span, .. } => *span,
            Expr::Error { span } => *span,
        }
    }

    /// Unresolved reference to `name`
    pub fn ident(name: Ident) -> Expr {
        Expr::Ident {
            name,
            resolution: Resolution::Pending,
        }
    }

    /// Shapes that may appear on the left of `=`
    pub fn is_place(&self) -> bool {
        matches!(self, Expr::Ident { .. } | Expr::Index { .. } | Expr::Field { .. })
    }
}

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64, Span),
    Float(f64, Span),
    Str(String, Span),
    Blob {
        tag: Option<String>,
        content: String,
        span: Span,
    },
    Bool(bool, Span),
    Null(Span),
    /// Unquoted attribute value such as `stone` or `minecraft:stone`
    Bare(String, Span),
}

impl Literal {
    pub fn span(&self) -> Span {
        match self {
            Literal::Int(_, s) => *s,
            Literal::Float(_, s) => *s,
            Literal::Str(_, s) => *s,
            Literal::Blob { span, .. } => *span,
            Literal::Bool(_, s) => *s,
            Literal::Null(s) => *s,
            Literal::Bare(_, s) => *s,
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    /// start..end, end exclusive
    Range,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Range => "..",
        }
    }

    /// Precedence level, matching `TokenKind::binary_precedence`
    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Range => 5,
            BinOp::Add | BinOp::Sub => 6,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 7,
            BinOp::Pow => 9,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Negation (-)
    Neg,
    /// Logical not (!)
    Not,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }
}

/// Prefix operators bind between `*` and `**`
pub const PREFIX_PRECEDENCE: u8 = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_lookup() {
        assert_eq!(Dialect::from_extension("AML"), Some(Dialect::Aml));
        assert_eq!(Dialect::from_shebang("#!asl"), Some(Dialect::Asl));
        assert_eq!(Dialect::from_shebang("#!toml"), None);
        assert_eq!("asl".parse::<Dialect>(), Ok(Dialect::Asl));
    }

    #[test]
    fn test_place_expressions() {
        let name = Ident { name: "a".into(), span: Span::new(0, 1) };
        let target = Expr::ident(name.clone());
        assert!(target.is_place());
        let field = Expr::Field {
            expr: Box::new(target),
            field: name,
            span: Span::new(0, 3),
        };
        assert!(field.is_place());
        assert!(!Expr::Literal(Literal::Int(1, Span::new(0, 1))).is_place());
    }
    #[test]
    fn test_operator_classes() {
        assert!(BinOp::Pow.is_arithmetic());
        assert!(!BinOp::Range.is_arithmetic());
        assert!(BinOp::Ge.is_comparison());
        assert!(!BinOp::Eq.is_comparison());
    }
}
