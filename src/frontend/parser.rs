//! Parser for Anvil sources
//!
//! Recursive descent for statements and composites, Pratt parsing for
//! expressions. Errors never abort the parse: each one is recorded as a
//! diagnostic, the parser resynchronizes at the next statement boundary and
//! a [`Stmt::Error`] placeholder takes the place of the broken statement.

use log::debug;

use crate::diagnostics::{self, Code, Diagnostic};
use crate::frontend::ast::*;
use crate::frontend::lexer::tokenize;
use crate::frontend::token::{LexError, Token, TokenKind};
use crate::utils::Span;

/// Internal result: the error is reported by the statement loop
type PResult<T> = std::result::Result<T, Diagnostic>;

/// Default bound on syntactic nesting: parenthesized, prefix, binary and
/// postfix expressions, composites, blocks and `else if` chains all count.
/// The tree depth it allows keeps validation and evaluation off the end
/// of the stack.
pub const MAX_NESTING: usize = 256;

/// Parse a token stream into a program plus diagnostics ordered by position
pub fn parse<'src>(tokens: impl IntoIterator<Item = Token<'src>>) -> (Program, Vec<Diagnostic>) {
    Parser::new(tokens).parse_program()
}

/// Lex and parse `source`
pub fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
    parse(tokenize(source))
}

/// The parser
pub struct Parser<'src> {
    /// Never empty; the last token is always `Eof`
    tokens: Vec<Token<'src>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    dialect: Dialect,
    fn_depth: usize,
    loop_depth: usize,
    nesting: usize,
    max_nesting: usize,
}

impl<'src> Parser<'src> {
    /// Create a parser. Lexer error tokens are turned into diagnostics here
    /// and do not reach the grammar rules.
    pub fn new(tokens: impl IntoIterator<Item = Token<'src>>) -> Self {
        let mut diagnostics = Vec::new();
        let mut kept: Vec<Token<'src>> = Vec::new();

        for token in tokens {
            match token.kind {
                TokenKind::Error(error) => diagnostics.push(lex_diagnostic(error, token.span)),
                TokenKind::Eof => {
                    kept.push(token);
                    break;
                }
                _ => kept.push(token),
            }
        }

        if !matches!(kept.last(), Some(t) if t.kind == TokenKind::Eof) {
            let (end, line, column) = kept.last().map_or((0, 1, 1), |t| {
                (t.span.end, t.line, t.column + t.lexeme.chars().count())
            });
            kept.push(Token {
                kind: TokenKind::Eof,
                lexeme: "",
                span: Span::new(end, end),
                line,
                column,
            });
        }

        Self {
            tokens: kept,
            pos: 0,
            diagnostics,
            dialect: Dialect::default(),
            fn_depth: 0,
            loop_depth: 0,
            nesting: 0,
            max_nesting: MAX_NESTING,
        }
    }

    /// Dialect used when the source has no shebang
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Override [`MAX_NESTING`]
    pub fn with_max_nesting(mut self, limit: usize) -> Self {
        self.max_nesting = limit;
        self
    }

    // ==================== Helper Methods ====================

    fn current(&self) -> &Token<'src> {
        &self.tokens[self.pos]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self) -> &TokenKind {
        let next = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[next].kind
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) -> Token<'src> {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: TokenKind) -> PResult<Token<'src>> {
        if self.check(&expected) {
            return Ok(self.advance());
        }
        let code = match expected {
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => Code::ExpectedClose,
            _ => Code::UnexpectedToken,
        };
        Err(self.error_here(code, format!("expected {}, found {}", expected, self.current_kind())))
    }

    /// `;`, optional before `}` and at end of input
    fn expect_terminator(&mut self) -> PResult<()> {
        if self.consume(&TokenKind::Semicolon) {
            return Ok(());
        }
        match self.current_kind() {
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            TokenKind::FatArrow => Err(self.error_here(Code::RocketNotValid, Code::RocketNotValid.message())),
            other => Err(self.error_here(Code::UnexpectedToken, format!("expected ';', found {}", other))),
        }
    }

    fn error_here(&self, code: Code, message: impl Into<String>) -> Diagnostic {
        Diagnostic::with_message(code, message, self.current().span)
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// `IDENT :=`, `IDENT :`, `IDENT @[`, or the invalid `IDENT =>`
    fn at_node_start(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Ident(_))
            && matches!(
                self.peek_kind(),
                TokenKind::ColonEq | TokenKind::Colon | TokenKind::AttrOpen | TokenKind::FatArrow
            )
    }

    // ==================== Error Recovery ====================

    /// Make progress past a failed statement, then skip to the next
    /// statement boundary: after `;`, before `{`/`}`, a statement keyword,
    /// the start of a node declaration or end of input.
    fn recover(&mut self, stmt_start: usize) {
        if self.pos == stmt_start && !self.is_at_end() {
            self.advance();
        }
        self.synchronize();
    }

    /// One level deeper; callers restore `nesting` when they return
    fn deepen(&mut self) -> PResult<()> {
        if self.nesting >= self.max_nesting {
            return Err(self.error_here(
                Code::NestingTooDeep,
                format!("nesting deeper than {} levels", self.max_nesting),
            ));
        }
        self.nesting += 1;
        Ok(())
    }

    /// Skip the statement starting at `stmt_start` as a whole, keeping
    /// brackets balanced, so a statement abandoned deep inside its nesting
    /// leaves no closing brackets behind.
    fn skip_statement(&mut self, stmt_start: usize) {
        self.pos = stmt_start;
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.current_kind() {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace | TokenKind::AttrOpen => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
                TokenKind::RBrace if depth == 0 => break,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        if self.current_kind().starts_statement() || self.at_node_start() {
                            break;
                        }
                        continue;
                    }
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    break;
                }
                _ => {}
            }
            self.advance();
        }
        if self.pos == stmt_start && !self.is_at_end() {
            self.advance();
        }
        debug!("parser skipped over-nested statement at token {}", stmt_start);
    }

    fn synchronize(&mut self) {
        let from = self.current().span.start;
        while !self.is_at_end() {
            if self.consume(&TokenKind::Semicolon) {
                break;
            }
            if matches!(self.current_kind(), TokenKind::LBrace | TokenKind::RBrace)
                || self.current_kind().starts_statement()
                || self.at_node_start()
            {
                break;
            }
            self.advance();
        }
        debug!("parser resynchronized: skipped {}..{}", from, self.current().span.start);
    }

    // ==================== Program and Statements ====================

    /// Parse a complete program
    pub fn parse_program(mut self) -> (Program, Vec<Diagnostic>) {
        let mut dialect = self.dialect;

        if let TokenKind::Shebang(text) = self.current_kind().clone() {
            let token = self.advance();
            match Dialect::from_shebang(&text) {
                Some(found) => dialect = found,
                None => self.report(Diagnostic::with_message(
                    Code::UnsupportedDialect,
                    format!("unsupported dialect `{}`", text.trim_start_matches("#!")),
                    token.span,
                )),
            }
        }

        let mut attributes = Vec::new();
        while self.check(&TokenKind::AttrOpen) {
            let start = self.pos;
            match self.parse_attr_block() {
                Ok(mut block) => attributes.append(&mut block),
                Err(diag) => {
                    self.report(diag);
                    self.recover(start);
                }
            }
        }

        let stmts = self.parse_stmt_list(false);
        let span = Span::new(0, self.current().span.end);

        debug!(
            "parsed {} statements, {} module attributes, {} diagnostics",
            stmts.len(),
            attributes.len(),
            self.diagnostics.len()
        );

        diagnostics::sort(&mut self.diagnostics);
        let program = Program {
            dialect,
            attributes,
            stmts,
            span,
        };
        (program, self.diagnostics)
    }

    /// Statements up to end of input, or up to `}` inside a block
    fn parse_stmt_list(&mut self, in_block: bool) -> Vec<Stmt> {
        let mut stmts = Vec::new();

        loop {
            match self.current_kind() {
                TokenKind::Eof => break,
                TokenKind::RBrace if in_block => break,
                TokenKind::Semicolon => {
                    self.advance();
                    continue;
                }
                TokenKind::Shebang(_) => {
                    let token = self.advance();
                    self.report(Diagnostic::new(Code::ShebangNotFirst, token.span));
                    continue;
                }
                TokenKind::AttrOpen => {
                    let start = self.pos;
                    let span = self.current().span;
                    self.report(Diagnostic::new(Code::ModuleAttributesAfterStatements, span));
                    if let Err(diag) = self.parse_attr_block() {
                        self.report(diag);
                        self.recover(start);
                    }
                    continue;
                }
                _ => {}
            }

            let start = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(diag) => {
                    let at = diag.span.start;
                    let too_deep = diag.code == Code::NestingTooDeep;
                    self.report(diag);
                    if too_deep {
                        self.skip_statement(start);
                    } else {
                        self.recover(start);
                    }
                    stmts.push(Stmt::Error {
                        span: Span::synthetic(at),
                    });
                }
            }
        }

        stmts
    }

    /// First set: `let fn if while for return break continue {`, an
    /// identifier starting a node, or any expression start.
    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.current_kind() {
            TokenKind::Let => self.parse_let(),
            TokenKind::Fn => Ok(Stmt::Function(self.parse_function()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break | TokenKind::Continue => self.parse_loop_control(),
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Ident(_) if self.at_node_start() => Ok(Stmt::Node(self.parse_node()?)),
            _ => self.parse_expr_stmt(),
        }
    }

    /// `let IDENT = expr ;`
    fn parse_let(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let name = self.parse_ident()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect_terminator()?;
        Ok(Stmt::Let {
            name,
            value,
            span: start.merge(&self.prev_span()),
        })
    }

    /// `fn IDENT ( [IDENT {, IDENT}] ) block`
    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let start = self.advance().span;
        let name = self.parse_ident()?;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            params.push(self.parse_ident()?);
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        self.fn_depth += 1;
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.parse_block();
        self.loop_depth = saved_loops;
        self.fn_depth -= 1;
        let body = body?;

        Ok(FunctionDecl {
            span: start.merge(&body.span),
            name,
            params,
            body,
        })
    }

    /// `{ stmt* }`. A block cut off by end of input is reported and kept.
    fn parse_block(&mut self) -> PResult<Block> {
        let saved = self.nesting;
        let block = self.deepen().and_then(|()| self.parse_block_body());
        self.nesting = saved;
        block
    }

    fn parse_block_body(&mut self) -> PResult<Block> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let stmts = self.parse_stmt_list(true);

        let end = if self.check(&TokenKind::RBrace) {
            self.advance().span
        } else {
            let diag = self.error_here(Code::ExpectedClose, "expected '}' to close block, found end of input");
            self.report(diag);
            self.prev_span()
        };

        Ok(Block {
            stmts,
            span: start.merge(&end),
        })
    }

    /// `if expr block [else (if ... | block)]`
    fn parse_if(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;

        let else_block = if self.consume(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let saved = self.nesting;
                let nested = self.deepen().and_then(|()| self.parse_if());
                self.nesting = saved;
                let nested = nested?;
                Some(Block {
                    span: nested.span(),
                    stmts: vec![nested],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        let end = else_block.as_ref().map_or(then_block.span, |b| b.span);
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span: start.merge(&end),
        })
    }

    fn parse_loop_body(&mut self) -> PResult<Block> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    /// `while expr block`
    fn parse_while(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let cond = self.parse_expr()?;
        let body = self.parse_loop_body()?;
        Ok(Stmt::While {
            span: start.merge(&body.span),
            cond,
            body,
        })
    }

    /// `for IDENT in expr block`
    fn parse_for(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let var = self.parse_ident()?;
        self.expect(TokenKind::In)?;
        let iter = self.parse_expr()?;
        let body = self.parse_loop_body()?;
        Ok(Stmt::For {
            span: start.merge(&body.span),
            var,
            iter,
            body,
        })
    }

    /// `return [expr] ;`
    fn parse_return(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        if self.fn_depth == 0 {
            self.report(Diagnostic::new(Code::ReturnOutsideFunction, start));
        }

        let value = match self.current_kind() {
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => None,
            _ => Some(self.parse_expr()?),
        };
        self.expect_terminator()?;

        Ok(Stmt::Return {
            value,
            span: start.merge(&self.prev_span()),
        })
    }

    /// `break ;` or `continue ;`
    fn parse_loop_control(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        if self.loop_depth == 0 {
            self.report(Diagnostic::with_message(
                Code::LoopControlOutsideLoop,
                format!("{} outside of a loop", token.kind),
                token.span,
            ));
        }
        self.expect_terminator()?;

        let span = token.span.merge(&self.prev_span());
        Ok(match token.kind {
            TokenKind::Break => Stmt::Break { span },
            _ => Stmt::Continue { span },
        })
    }

    /// `IDENT [: IDENT] [attr_block] := expr [, | ;]`
    fn parse_node(&mut self) -> PResult<NodeDecl> {
        let name = self.parse_ident()?;
        let base = if self.consume(&TokenKind::Colon) {
            Some(self.parse_ident()?)
        } else {
            None
        };
        let attributes = if self.check(&TokenKind::AttrOpen) {
            self.parse_attr_block()?
        } else {
            Vec::new()
        };

        self.expect_assign(&name)?;
        let value = self.parse_expr()?;
        let span = name.span.merge(&value.span());

        if !self.consume(&TokenKind::Comma) {
            self.consume(&TokenKind::Semicolon);
        }

        Ok(NodeDecl {
            name,
            base,
            attributes,
            value,
            span,
        })
    }

    /// `:=` after a node or field name; `=>` is reported and accepted
    fn expect_assign(&mut self, name: &Ident) -> PResult<()> {
        if self.check(&TokenKind::FatArrow) {
            let token = self.advance();
            self.report(Diagnostic::new(Code::RocketNotValid, token.span));
            return Ok(());
        }
        if self.consume(&TokenKind::ColonEq) {
            return Ok(());
        }
        Err(self.error_here(
            Code::ExpectedAssign,
            format!("expected ':=' after `{}`, found {}", name.name, self.current_kind()),
        ))
    }

    /// `expr ;` or `place = expr ;`
    fn parse_expr_stmt(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expr()?;

        if self.consume(&TokenKind::Eq) {
            let value = self.parse_expr()?;
            if !expr.is_place() {
                self.report(Diagnostic::new(Code::InvalidAssignmentTarget, expr.span()));
            }
            self.expect_terminator()?;
            return Ok(Stmt::Assign {
                span: expr.span().merge(&value.span()),
                target: expr,
                value,
            });
        }

        self.expect_terminator()?;
        Ok(Stmt::Expr(expr))
    }

    // ==================== Attributes ====================

    /// `@[ IDENT [= literal] {, IDENT [= literal]} [,] ]`
    fn parse_attr_block(&mut self) -> PResult<Vec<Attribute>> {
        let open = self.expect(TokenKind::AttrOpen)?;
        let mut attributes = Vec::new();

        if self.check(&TokenKind::RBracket) {
            let close = self.advance();
            self.report(Diagnostic::new(Code::EmptyAttributeBlock, open.span.merge(&close.span)));
            return Ok(attributes);
        }

        loop {
            let key = self.parse_ident()?;
            let value = if self.consume(&TokenKind::Eq) {
                self.parse_attr_value()?
            } else {
                None
            };
            attributes.push(Attribute {
                span: key.span.merge(&self.prev_span()),
                key,
                value,
            });

            if self.consume(&TokenKind::Comma) {
                if self.check(&TokenKind::RBracket) {
                    break;
                }
                continue;
            }
            if self.check(&TokenKind::RBracket) {
                break;
            }
            if matches!(self.current_kind(), TokenKind::Ident(_)) {
                let diag = self.error_here(Code::MissingCommaInAttributes, Code::MissingCommaInAttributes.message());
                self.report(diag);
                continue;
            }
            return Err(self.error_here(
                Code::ExpectedClose,
                format!("expected ']' to close attribute block, found {}", self.current_kind()),
            ));
        }

        self.expect(TokenKind::RBracket)?;
        Ok(attributes)
    }

    /// Literal after `key =`; anything else is reported and skipped
    fn parse_attr_value(&mut self) -> PResult<Option<Literal>> {
        if self.current_kind().is_literal() {
            let token = self.advance();
            return Ok(literal_from_token(&token));
        }

        if matches!(self.current_kind(), TokenKind::Ident(_)) {
            return Ok(Some(self.parse_bare_literal()));
        }

        if self.check(&TokenKind::Minus) {
            if matches!(self.peek_kind(), TokenKind::IntLit(_) | TokenKind::FloatLit(_)) {
                let minus = self.advance().span;
                let token = self.advance();
                let span = minus.merge(&token.span);
                return Ok(match token.kind {
                    TokenKind::IntLit(v) => Some(Literal::Int(v.wrapping_neg(), span)),
                    TokenKind::FloatLit(v) => Some(Literal::Float(-v, span)),
                    _ => None,
                });
            }
        }

        let diag = self.error_here(Code::InvalidValueInAttribute, Code::InvalidValueInAttribute.message());
        self.report(diag);
        self.parse_expr()?;
        Ok(None)
    }

    /// `stone`, `minecraft:stone`, `ore.iron_2`: an identifier followed by
    /// touching letters, digits, `:`, `.` and `_`
    fn parse_bare_literal(&mut self) -> Literal {
        let first = self.advance();
        let mut text = first.lexeme.to_string();
        let mut span = first.span;

        while self.current().span.start == span.end && is_bare_piece(self.current().lexeme) {
            let piece = self.advance();
            text.push_str(piece.lexeme);
            span = span.merge(&piece.span);
        }
        Literal::Bare(text, span)
    }

    // ==================== Expression Parsing (Pratt) ====================

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_expr_bp(0)
    }

    /// Parse expression with binding power (Pratt parsing)
    fn parse_expr_bp(&mut self, min_bp: u8) -> PResult<Expr> {
        let saved = self.nesting;
        let expr = self.parse_binary(min_bp);
        self.nesting = saved;
        expr
    }

    /// Each operator folded into `left` deepens the tree by one
    fn parse_binary(&mut self, min_bp: u8) -> PResult<Expr> {
        self.deepen()?;
        let mut left = self.parse_unary()?;

        loop {
            let Some(bp) = self.current_kind().binary_precedence() else {
                break;
            };
            if bp < min_bp {
                break;
            }
            let Some(op) = Self::token_to_binop(self.current_kind()) else {
                break;
            };
            self.advance();
            self.deepen()?;

            // `**` is right-associative
            let next_bp = if op == BinOp::Pow { bp } else { bp + 1 };

            let right = self.parse_expr_bp(next_bp)?;
            let span = left.span().merge(&right.span());
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
                span,
            };

            if op == BinOp::Range && self.check(&TokenKind::DotDot) {
                return Err(self.error_here(Code::UnexpectedToken, "range operator '..' cannot be chained"));
            }
        }

        Ok(left)
    }

    /// Prefix `-` / `!`, binding tighter than `*` but looser than `**`
    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.current_kind() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Not => UnOp::Not,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };

        let start = self.advance().span;
        let expr = self.parse_expr_bp(PREFIX_PRECEDENCE)?;
        Ok(Expr::Unary {
            op,
            span: start.merge(&expr.span()),
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.current().clone();

        let expr = match &token.kind {
            kind if kind.is_literal() => {
                self.advance();
                match literal_from_token(&token) {
                    Some(lit) => Expr::Literal(lit),
                    None => Expr::Error {
                        span: Span::synthetic(token.span.start),
                    },
                }
            }
            TokenKind::Ident(name) => {
                self.advance();
                Expr::ident(Ident {
                    name: name.clone(),
                    span: token.span,
                })
            }
            TokenKind::LParen => self.parse_paren()?,
            TokenKind::LBracket => self.parse_array()?,
            TokenKind::LBrace => self.parse_object()?,
            TokenKind::FatArrow => {
                return Err(Diagnostic::new(Code::RocketNotValid, token.span));
            }
            other => {
                return Err(Diagnostic::with_message(
                    Code::ExpectedExpression,
                    format!("expected expression, found {}", other),
                    token.span,
                ));
            }
        };

        Ok(expr)
    }

    /// `( expr )` or a tuple `( expr , expr {, expr} [,] )`
    fn parse_paren(&mut self) -> PResult<Expr> {
        let open = self.advance().span;

        if self.check(&TokenKind::RParen) {
            let span = open.merge(&self.advance().span);
            self.report(Diagnostic::new(Code::TupleTooShort, span));
            return Ok(Expr::Tuple {
                elements: Vec::new(),
                span,
            });
        }

        let first = self.parse_expr()?;
        if !self.check(&TokenKind::Comma) {
            self.expect(TokenKind::RParen)?;
            return Ok(first);
        }

        let mut elements = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            elements.push(self.parse_expr()?);
        }
        let close = self.expect(TokenKind::RParen)?;
        let span = open.merge(&close.span);

        if elements.len() < 2 {
            self.report(Diagnostic::new(Code::TupleTooShort, span));
        }
        Ok(Expr::Tuple { elements, span })
    }

    /// `[ [expr {, expr} [,]] ]`
    fn parse_array(&mut self) -> PResult<Expr> {
        let open = self.advance().span;
        let mut elements = Vec::new();

        loop {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_expr()?);

            if self.consume(&TokenKind::Comma) {
                continue;
            }
            if self.check(&TokenKind::RBracket) {
                break;
            }
            if starts_expression(self.current_kind()) {
                let diag = self.error_here(Code::MissingCommaInArray, Code::MissingCommaInArray.message());
                self.report(diag);
                continue;
            }
            return Err(self.error_here(
                Code::ExpectedClose,
                format!("expected ']' to close array, found {}", self.current_kind()),
            ));
        }

        let close = self.advance().span;
        Ok(Expr::Array {
            elements,
            span: open.merge(&close),
        })
    }

    /// `{ field {[,] field} [,] }`
    fn parse_object(&mut self) -> PResult<Expr> {
        let open = self.advance().span;
        let mut fields = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            fields.push(self.parse_field()?);
            self.consume(&TokenKind::Comma);
        }
        let close = self.expect(TokenKind::RBrace)?;
        let span = open.merge(&close.span);

        if fields.is_empty() {
            self.report(Diagnostic::new(Code::EmptyObject, span));
        }
        Ok(Expr::Object { fields, span })
    }

    /// `IDENT [attr_block] := expr`
    fn parse_field(&mut self) -> PResult<Field> {
        let name = self.parse_ident()?;
        let attributes = if self.check(&TokenKind::AttrOpen) {
            self.parse_attr_block()?
        } else {
            Vec::new()
        };
        self.expect_assign(&name)?;
        let value = self.parse_expr()?;

        Ok(Field {
            span: name.span.merge(&value.span()),
            name,
            attributes,
            value,
        })
    }

    /// Calls, indexing and field access
    fn parse_postfix(&mut self, mut expr: Expr) -> PResult<Expr> {
        loop {
            if matches!(self.current_kind(), TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot) {
                self.deepen()?;
            }
            match self.current_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.check(&TokenKind::RParen) && !self.is_at_end() {
                        args.push(self.parse_expr()?);
                        if !self.consume(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let close = self.expect(TokenKind::RParen)?;
                    let span = expr.span().merge(&close.span);

                    expr = match expr {
                        Expr::Ident { name, .. } => Expr::Call {
                            callee: name,
                            resolution: Resolution::Pending,
                            args,
                            span,
                        },
                        other => {
                            self.report(Diagnostic::with_message(
                                Code::UnexpectedToken,
                                "only named functions can be called",
                                other.span(),
                            ));
                            Expr::Error {
                                span: Span::synthetic(span.start),
                            }
                        }
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let close = self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        span: expr.span().merge(&close.span),
                        expr: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.parse_ident()?;
                    expr = Expr::Field {
                        span: expr.span().merge(&field.span),
                        expr: Box::new(expr),
                        field,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_ident(&mut self) -> PResult<Ident> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Ident {
                    name,
                    span: token.span,
                })
            }
            other => Err(Diagnostic::with_message(
                Code::ExpectedIdentifier,
                format!("expected identifier, found {}", other),
                token.span,
            )),
        }
    }

    fn token_to_binop(kind: &TokenKind) -> Option<BinOp> {
        match kind {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Percent => Some(BinOp::Mod),
            TokenKind::StarStar => Some(BinOp::Pow),
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::Ne => Some(BinOp::Ne),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Le => Some(BinOp::Le),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::Ge => Some(BinOp::Ge),
            TokenKind::AndAnd => Some(BinOp::And),
            TokenKind::OrOr => Some(BinOp::Or),
            TokenKind::DotDot => Some(BinOp::Range),
            _ => None,
        }
    }
}

fn literal_from_token(token: &Token<'_>) -> Option<Literal> {
    let span = token.span;
    Some(match &token.kind {
        TokenKind::IntLit(v) => Literal::Int(*v, span),
        TokenKind::FloatLit(v) => Literal::Float(*v, span),
        TokenKind::StringLit(s) => Literal::Str(s.clone(), span),
        TokenKind::Blob { tag, content } => Literal::Blob {
            tag: tag.clone(),
            content: content.clone(),
            span,
        },
        TokenKind::True => Literal::Bool(true, span),
        TokenKind::False => Literal::Bool(false, span),
        TokenKind::Null => Literal::Null(span),
        _ => return None,
    })
}

fn is_bare_piece(lexeme: &str) -> bool {
    !lexeme.is_empty() && lexeme.chars().all(|c| c.is_alphanumeric() || matches!(c, ':' | '.' | '_'))
}

fn starts_expression(kind: &TokenKind) -> bool {
    kind.is_literal()
        || matches!(
            kind,
            TokenKind::Ident(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Not
        )
}

fn lex_diagnostic(error: LexError, span: Span) -> Diagnostic {
    match error {
        LexError::UnexpectedChar(c) => {
            Diagnostic::with_message(Code::UnexpectedChar, format!("unexpected character '{}'", c), span)
        }
        LexError::UnterminatedString => Diagnostic::new(Code::UnterminatedString, span),
        LexError::UnterminatedBlob => Diagnostic::new(Code::UnterminatedBlob, span),
        LexError::UnterminatedComment => Diagnostic::new(Code::UnterminatedComment, span),
        LexError::InvalidHex => Diagnostic::new(Code::InvalidHexLiteral, span),
        LexError::InvalidNumber => Diagnostic::new(Code::InvalidNumber, span),
        LexError::ExpectedBlob => Diagnostic::new(Code::ExpectedBlob, span),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Program {
        let (program, diags) = parse_source(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        program
    }

    fn codes(source: &str) -> Vec<Code> {
        parse_source(source).1.into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_let_statement() {
        let program = parse_ok("let x = 1 + 2;");
        assert_eq!(program.stmts.len(), 1);
        let Stmt::Let { name, value, span } = &program.stmts[0] else {
            panic!("expected let, got {:?}", program.stmts[0]);
        };
        assert_eq!(name.name, "x");
        assert_eq!(*span, Span::new(0, 14));
        assert!(matches!(
            value,
            Expr::Binary { op: BinOp::Add, left, right, .. }
                if matches!(**left, Expr::Literal(Literal::Int(1, _)))
                    && matches!(**right, Expr::Literal(Literal::Int(2, _)))
        ));
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("1 + 2 * 3");
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &program.stmts[0] else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_negation() {
        let program = parse_ok("2 ** 3 ** 2; -2 ** 2");
        let Stmt::Expr(Expr::Binary { op: BinOp::Pow, left, right, .. }) = &program.stmts[0] else {
            panic!("expected power");
        };
        assert!(matches!(**left, Expr::Literal(Literal::Int(2, _))));
        assert!(matches!(**right, Expr::Binary { op: BinOp::Pow, .. }));

        let Stmt::Expr(Expr::Unary { op: UnOp::Neg, expr, .. }) = &program.stmts[1] else {
            panic!("expected negation");
        };
        assert!(matches!(**expr, Expr::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn test_range_is_not_associative() {
        parse_ok("let r = 0..10;");
        assert_eq!(codes("let r = 1..2..3;"), vec![Code::UnexpectedToken]);
    }

    #[test]
    fn test_node_with_base_and_attributes() {
        let program = parse_ok("child : base @[deprecated, since=\"1.2\"] := { a := 1, b := 2 c := 3 }");
        let Stmt::Node(node) = &program.stmts[0] else {
            panic!("expected node");
        };
        assert_eq!(node.name.name, "child");
        assert_eq!(node.base.as_ref().map(|b| b.name.as_str()), Some("base"));
        assert_eq!(node.attributes.len(), 2);
        assert_eq!(node.attributes[0].value, None);
        assert!(matches!(node.attributes[1].value, Some(Literal::Str(ref s, _)) if s == "1.2"));
        let Expr::Object { fields, .. } = &node.value else {
            panic!("expected object");
        };
        let names: Vec<_> = fields.iter().map(|f| f.name.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_bare_attribute_values() {
        let program = parse_ok("ore @[type=block, tool=minecraft:pickaxe, drop = ore.iron_2] := 1");
        let Stmt::Node(node) = &program.stmts[0] else {
            panic!("expected node");
        };
        let values: Vec<_> = node
            .attributes
            .iter()
            .map(|attr| match &attr.value {
                Some(Literal::Bare(text, _)) => text.as_str(),
                other => panic!("expected a bare value, got {:?}", other),
            })
            .collect();
        assert_eq!(values, vec!["block", "minecraft:pickaxe", "ore.iron_2"]);
        let span = node.attributes[1].value.as_ref().map(Literal::span);
        assert_eq!(span, Some(Span::new(23, 40)));

        // pieces separated by spaces are not joined
        assert_eq!(codes("a @[tool=pick axe] := 1"), vec![Code::MissingCommaInAttributes]);
    }

    #[test]
    fn test_shebang_and_module_attributes() {
        let program = parse_ok("#!asl\n@[version=\"1.0\"]\n@[strict]\nport := 8080\nhost := \"localhost\"");
        assert_eq!(program.dialect, Dialect::Asl);
        assert_eq!(program.attributes.len(), 2);
        assert_eq!(program.stmts.len(), 2);
    }

    #[test]
    fn test_shebang_errors() {
        assert_eq!(codes("#!toml\na := 1"), vec![Code::UnsupportedDialect]);
        assert_eq!(codes("a := 1\n#!aml"), vec![Code::ShebangNotFirst]);
        assert_eq!(codes("a := 1\n@[late]\nb := 2"), vec![Code::ModuleAttributesAfterStatements]);
    }

    #[test]
    fn test_composites() {
        let program = parse_ok("pos := (10, 64, -32)\ntags := [\"a\", \"b\",]\nempty := []\ncolor := #ff0000");
        assert!(matches!(&program.stmts[0], Stmt::Node(n) if matches!(&n.value, Expr::Tuple { elements, .. } if elements.len() == 3)));
        assert!(matches!(&program.stmts[1], Stmt::Node(n) if matches!(&n.value, Expr::Array { elements, .. } if elements.len() == 2)));
        assert!(matches!(&program.stmts[2], Stmt::Node(n) if matches!(&n.value, Expr::Array { elements, .. } if elements.is_empty())));
        assert!(matches!(&program.stmts[3], Stmt::Node(n) if matches!(n.value, Expr::Literal(Literal::Int(0xff0000, _)))));
    }

    #[test]
    fn test_composite_errors() {
        assert_eq!(codes("a := {}"), vec![Code::EmptyObject]);
        assert_eq!(codes("a := (1,)"), vec![Code::TupleTooShort]);
        assert_eq!(codes("a := [1 2]"), vec![Code::MissingCommaInArray]);
        assert_eq!(codes("a @[] := 1"), vec![Code::EmptyAttributeBlock]);
        assert_eq!(codes("a @[x y] := 1"), vec![Code::MissingCommaInAttributes]);
        assert_eq!(codes("a @[x=[1]] := 1"), vec![Code::InvalidValueInAttribute]);
        assert_eq!(codes("a @[x=(1, 2)] := 1"), vec![Code::InvalidValueInAttribute]);
        assert_eq!(codes("a => 1"), vec![Code::RocketNotValid]);
    }

    #[test]
    fn test_functions_and_control_flow() {
        let program = parse_ok(
            "fn fact(n) { if n <= 1 { return 1; } else if n == 2 { return 2 } else { return n * fact(n - 1); } }\n\
             for i in 0..3 { if i == 1 { continue; } print(i); }\n\
             while true { break }",
        );
        assert_eq!(program.stmts.len(), 3);
        let Stmt::Function(func) = &program.stmts[0] else {
            panic!("expected function");
        };
        assert_eq!(func.params.len(), 1);
        let Stmt::If { else_block: Some(else_block), .. } = &func.body.stmts[0] else {
            panic!("expected if/else");
        };
        assert!(matches!(else_block.stmts[0], Stmt::If { else_block: Some(_), .. }));
    }

    #[test]
    fn test_context_errors() {
        assert_eq!(codes("return 1;"), vec![Code::ReturnOutsideFunction]);
        assert_eq!(codes("break;"), vec![Code::LoopControlOutsideLoop]);
        assert_eq!(codes("while true { fn f() { continue; } }"), vec![Code::LoopControlOutsideLoop]);
        assert_eq!(codes("1 = 2;"), vec![Code::InvalidAssignmentTarget]);
        assert!(codes("let a = [1]; a[0] = 2; a = 3;").is_empty());
    }

    #[test]
    fn test_recovery_inserts_error_statement() {
        let (program, diags) = parse_source("let = 5; let y = 2;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::ExpectedIdentifier);
        assert!(matches!(&program.stmts[0], Stmt::Error { span } if span.is_synthetic()));
        assert!(matches!(&program.stmts[1], Stmt::Let { name, .. } if name.name == "y"));
    }

    #[test]
    fn test_unterminated_block_keeps_partial_program() {
        let (program, diags) = parse_source("let a = 1;\nfn f() { let x = 1;");
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::Syntax));
        assert_eq!(program.stmts.len(), 2);
        assert!(matches!(&program.stmts[1], Stmt::Function(f) if f.body.stmts.len() == 1));
    }

    #[test]
    fn test_stray_close_brace_makes_progress() {
        let (program, diags) = parse_source("} } let a = 1;");
        assert_eq!(diags.len(), 2);
        assert!(matches!(program.stmts.last(), Some(Stmt::Let { .. })));
    }

    #[test]
    fn test_lex_errors_become_one_diagnostic_each() {
        let (_, diags) = parse_source("let a = 1; $ let b = \"open");
        let lex: Vec<_> = diags.iter().filter(|d| d.kind == DiagnosticKind::Lex).collect();
        assert_eq!(lex.len(), 2);
        assert_eq!(lex[0].code, Code::UnexpectedChar);
        assert_eq!(lex[1].code, Code::UnterminatedString);
    }

    #[test]
    fn test_diagnostics_sorted_by_position() {
        let (_, diags) = parse_source("a := {}\nb := (1,)\nc := [1 2]");
        let starts: Vec<_> = diags.iter().map(|d| d.span.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
        assert_eq!(diags.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let source = "player := { name := \"Notch\" pos := (1, 2) }\nlet x = player.pos[0] + 1;";
        assert_eq!(parse_source(source), parse_source(source));
    }

    #[test]
    fn test_nesting_limit() {
        let parse_limited = |source: &str| Parser::new(tokenize(source)).with_max_nesting(32).parse_program();

        let (_, diags) = parse_limited(&format!("let x = {}1{};", "(".repeat(20), ")".repeat(20)));
        assert!(diags.is_empty(), "{:?}", diags);

        let sources = [
            format!("let x = {}1{}; let y = 2;", "(".repeat(3000), ")".repeat(3000)),
            format!("let x = {}1; let y = 2;", "- ".repeat(3000)),
            format!("let x = 1{}; let y = 2;", " + 1".repeat(3000)),
            format!("let x = a{}; let y = 2;", ".b".repeat(3000)),
            format!("let x = {}1{}; let y = 2;", "[".repeat(3000), "]".repeat(3000)),
            format!("{}{} let y = 2;", "{".repeat(3000), "}".repeat(3000)),
            format!("if true {{ }}{} let y = 2;", " else if true { }".repeat(3000)),
        ];
        for source in &sources {
            let (program, diags) = parse_limited(source);
            let codes: Vec<_> = diags.iter().map(|d| d.code).collect();
            assert_eq!(codes, vec![Code::NestingTooDeep], "{}", &source[..24]);
            assert!(
                matches!(program.stmts.last(), Some(Stmt::Let { name, .. }) if name.name == "y"),
                "{}",
                &source[..24]
            );
        }
    }

    #[test]
    fn test_call_requires_named_callee() {
        assert_eq!(codes("a.b(1);"), vec![Code::UnexpectedToken]);
        assert!(codes("(f)(1);").is_empty());
        let program = parse_ok("print(1, \"a\");");
        assert!(matches!(&program.stmts[0], Stmt::Expr(Expr::Call { callee, args, .. }) if callee.name == "print" && args.len() == 2));
    }
}
