//! Lexer for Anvil sources
//!
//! Converts source text into a lazy stream of tokens. The stream is finite
//! and always ends with a single [`TokenKind::Eof`]; input that cannot be
//! lexed becomes a [`TokenKind::Error`] token instead of stopping the scan.

use crate::frontend::token::{LexError, Token, TokenKind};
use crate::utils::Span;

/// Start lexing `source`
pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer::new(source)
}

/// The lexer state
#[derive(Debug, Clone)]
pub struct Lexer<'src> {
    source: &'src str,
    /// Current byte offset
    pos: usize,
    line: usize,
    col: usize,
    /// Start of the current token
    start: usize,
    start_line: usize,
    start_col: usize,
    finished: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            col: 1,
            start: 0,
            start_line: 1,
            start_col: 1,
            finished: false,
        }
    }

    /// Rewind to the beginning of the source
    pub fn reset(&mut self) {
        *self = Self::new(self.source);
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn begin(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.pos],
            span: Span::new(self.start, self.pos),
            line: self.start_line,
            column: self.start_col,
        }
    }

    fn error(&self, error: LexError) -> Token<'src> {
        self.make_token(TokenKind::Error(error))
    }

    /// Skip whitespace and comments. An unterminated block comment is
    /// returned as an error token covering the rest of the input.
    fn skip_whitespace(&mut self) -> Option<Token<'src>> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.begin();
                    self.advance();
                    self.advance();
                    let mut depth = 1;
                    while depth > 0 {
                        match (self.peek(), self.peek_at(1)) {
                            (None, _) => return Some(self.error(LexError::UnterminatedComment)),
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                depth -= 1;
                            }
                            (Some('/'), Some('*')) => {
                                self.advance();
                                self.advance();
                                depth += 1;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        None
    }

    fn read_identifier(&mut self) -> Token<'src> {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let text = &self.source[self.start..self.pos];
        let kind = TokenKind::keyword_from_str(text)
            .unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        self.make_token(kind)
    }

    fn read_hex_digits(&mut self) -> Option<i64> {
        let digits_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit() || c == '_') {
            self.advance();
        }
        let digits: String = self.source[digits_start..self.pos]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        if digits.is_empty() {
            return None;
        }
        i64::from_str_radix(&digits, 16).ok()
    }

    /// Read a number literal; the first digit is already consumed
    fn read_number(&mut self, first: char) -> Token<'src> {
        if first == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            return match self.read_hex_digits() {
                Some(value) => self.make_token(TokenKind::IntLit(value)),
                None => self.error(LexError::InvalidHex),
            };
        }

        let mut is_float = false;
        self.skip_digits();

        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            self.skip_digits();
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let exponent_follows = match self.peek_at(1) {
                Some('+') | Some('-') => matches!(self.peek_at(2), Some(c) if c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_follows {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                self.skip_digits();
            }
        }

        let text: String = self.source[self.start..self.pos]
            .chars()
            .filter(|&c| c != '_')
            .collect();

        if is_float {
            // overflow to infinity is as invalid as an overflowing integer
            match text.parse::<f64>() {
                Ok(value) if value.is_finite() => self.make_token(TokenKind::FloatLit(value)),
                _ => self.error(LexError::InvalidNumber),
            }
        } else {
            match text.parse() {
                Ok(value) => self.make_token(TokenKind::IntLit(value)),
                Err(_) => self.error(LexError::InvalidNumber),
            }
        }
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.advance();
        }
    }

    /// Read a string literal; the opening quote is already consumed
    fn read_string(&mut self) -> Token<'src> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return self.error(LexError::UnterminatedString),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('0') => value.push('\0'),
                    Some(c) => value.push(c),
                    None => return self.error(LexError::UnterminatedString),
                },
                Some(c) => value.push(c),
            }
        }
        self.make_token(TokenKind::StringLit(value))
    }

    /// Read a blob body; the opening backtick is already consumed
    fn read_blob(&mut self, tag: Option<String>) -> Token<'src> {
        let mut content = String::new();
        loop {
            match self.advance() {
                None => return self.error(LexError::UnterminatedBlob),
                Some('`') => break,
                Some('\\') if self.peek() == Some('`') => {
                    self.advance();
                    content.push('`');
                }
                Some(c) => content.push(c),
            }
        }
        self.make_token(TokenKind::Blob { tag, content })
    }

    /// `@[`, or a tagged blob such as @md`...`
    fn read_at(&mut self) -> Token<'src> {
        if self.eat('[') {
            return self.make_token(TokenKind::AttrOpen);
        }
        let tag_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        if self.pos == tag_start {
            return self.error(LexError::UnexpectedChar('@'));
        }
        if self.eat('`') {
            let tag = self.source[tag_start..self.pos - 1].to_string();
            return self.read_blob(Some(tag));
        }
        self.error(LexError::ExpectedBlob)
    }

    /// `#!dialect` or a `#rrggbb` style hex literal
    fn read_hash(&mut self) -> Token<'src> {
        if self.eat('!') {
            while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                self.advance();
            }
            let text = self.source[self.start..self.pos].to_string();
            return self.make_token(TokenKind::Shebang(text));
        }
        if matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            return match self.read_hex_digits() {
                Some(value) => self.make_token(TokenKind::IntLit(value)),
                None => self.error(LexError::InvalidHex),
            };
        }
        self.error(LexError::UnexpectedChar('#'))
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Token<'src> {
        if let Some(error) = self.skip_whitespace() {
            return error;
        }
        self.begin();

        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof);
        };

        if c.is_alphabetic() || c == '_' {
            return self.read_identifier();
        }
        if c.is_ascii_digit() {
            return self.read_number(c);
        }

        let kind = match c {
            '"' => return self.read_string(),
            '`' => return self.read_blob(None),
            '@' => return self.read_at(),
            '#' => return self.read_hash(),
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => {
                if self.eat('*') {
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else if self.eat('>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.peek() == Some('&') => {
                self.advance();
                TokenKind::AndAnd
            }
            '|' if self.peek() == Some('|') => {
                self.advance();
                TokenKind::OrOr
            }
            ':' => {
                if self.eat('=') {
                    TokenKind::ColonEq
                } else {
                    TokenKind::Colon
                }
            }
            '.' => {
                if self.eat('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            other => TokenKind::Error(LexError::UnexpectedChar(other)),
        };

        self.make_token(kind)
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Token<'src>> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(token)
    }
}

impl std::iter::FusedIterator for Lexer<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_tokens() {
        let tokens = kinds("let x = 1 + 2;");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Let,
                TokenKind::Ident("x".into()),
                TokenKind::Eq,
                TokenKind::IntLit(1),
                TokenKind::Plus,
                TokenKind::IntLit(2),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_maximal_munch() {
        let tokens = kinds(":= : ** * == = => != ! .. . <= < @[");
        assert_eq!(
            tokens,
            vec![
                TokenKind::ColonEq,
                TokenKind::Colon,
                TokenKind::StarStar,
                TokenKind::Star,
                TokenKind::EqEq,
                TokenKind::Eq,
                TokenKind::FatArrow,
                TokenKind::Ne,
                TokenKind::Not,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::AttrOpen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 3.5 1_000 0xFF_FF #ff0000 2e3 1..5");
        assert!(matches!(tokens[0], TokenKind::IntLit(42)));
        assert!(matches!(tokens[1], TokenKind::FloatLit(f) if (f - 3.5).abs() < 1e-9));
        assert!(matches!(tokens[2], TokenKind::IntLit(1000)));
        assert!(matches!(tokens[3], TokenKind::IntLit(0xFFFF)));
        assert!(matches!(tokens[4], TokenKind::IntLit(16711680)));
        assert!(matches!(tokens[5], TokenKind::FloatLit(f) if (f - 2000.0).abs() < 1e-9));
        assert!(matches!(tokens[6], TokenKind::IntLit(1)));
        assert!(matches!(tokens[7], TokenKind::DotDot));
        assert!(matches!(tokens[8], TokenKind::IntLit(5)));
    }

    #[test]
    fn test_integer_overflow_is_error_token() {
        let tokens = kinds("99999999999999999999");
        assert_eq!(tokens[0], TokenKind::Error(LexError::InvalidNumber));
        assert_eq!(tokens[1], TokenKind::Eof);
    }

    #[test]
    fn test_float_overflow_is_error_token() {
        assert_eq!(kinds("1e400")[0], TokenKind::Error(LexError::InvalidNumber));
        assert_eq!(kinds("1.5e-400")[0], TokenKind::FloatLit(0.0));
        assert!(matches!(kinds("1.7e308")[0], TokenKind::FloatLit(f) if f.is_finite()));
    }

    #[test]
    fn test_tag_without_blob() {
        let tokens: Vec<_> = tokenize("@foo x").collect();
        assert_eq!(tokens[0].kind, TokenKind::Error(LexError::ExpectedBlob));
        assert_eq!(tokens[0].lexeme, "@foo");
        assert_eq!(tokens[1].kind, TokenKind::Ident("x".into()));
        assert_eq!(kinds("@ x")[0], TokenKind::Error(LexError::UnexpectedChar('@')));
    }

    #[test]
    fn test_bare_value_pieces_are_adjacent() {
        let tokens: Vec<_> = tokenize("minecraft:stone").collect();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("minecraft".into()),
                TokenKind::Colon,
                TokenKind::Ident("stone".into()),
                TokenKind::Eof,
            ]
        );
        assert!(tokens.windows(2).take(2).all(|pair| pair[0].span.end == pair[1].span.start));
    }

    #[test]
    fn test_strings_and_blobs() {
        let tokens = kinds(r#""hello\nworld" `raw \` tick` @md`**bold**`"#);
        assert_eq!(tokens[0], TokenKind::StringLit("hello\nworld".into()));
        assert_eq!(
            tokens[1],
            TokenKind::Blob { tag: None, content: "raw ` tick".into() }
        );
        assert_eq!(
            tokens[2],
            TokenKind::Blob { tag: Some("md".into()), content: "**bold**".into() }
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = kinds("a // line\n/* outer /* nested */ still */ b");
        assert_eq!(
            tokens,
            vec![TokenKind::Ident("a".into()), TokenKind::Ident("b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unrecognized_char_continues() {
        let tokens = kinds("a $ b");
        assert_eq!(tokens[1], TokenKind::Error(LexError::UnexpectedChar('$')));
        assert_eq!(tokens[2], TokenKind::Ident("b".into()));
        assert_eq!(tokens[3], TokenKind::Eof);
    }

    #[test]
    fn test_unterminated_literals() {
        assert_eq!(kinds("\"abc")[0], TokenKind::Error(LexError::UnterminatedString));
        assert_eq!(kinds("`abc")[0], TokenKind::Error(LexError::UnterminatedBlob));
        assert_eq!(kinds("/* abc")[0], TokenKind::Error(LexError::UnterminatedComment));
    }

    #[test]
    fn test_shebang() {
        let tokens: Vec<_> = tokenize("#!aml\nport := 1").collect();
        assert_eq!(tokens[0].kind, TokenKind::Shebang("#!aml".into()));
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_eof_exactly_once() {
        let mut lexer = tokenize("");
        assert_eq!(lexer.next().map(|t| t.kind), Some(TokenKind::Eof));
        assert!(lexer.next().is_none());
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_positions() {
        let tokens: Vec<_> = tokenize("a\n  bé c").collect();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!(tokens[1].lexeme, "bé");
        assert_eq!((tokens[2].line, tokens[2].column), (2, 6));
    }

    #[test]
    fn test_restart_from_start() {
        let mut lexer = tokenize("x y");
        let first: Vec<_> = lexer.by_ref().map(|t| t.kind).collect();
        lexer.reset();
        let second: Vec<_> = lexer.map(|t| t.kind).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_lossless_round_trip() {
        let source = "#!aml\n@[version=\"1.0\"]\n// player\nplayer := {\n  name := \"Notch\" /* c */\n  pos := (10, 64, -32)\n  desc := @md`**bold**`\n}\nlet x = 1 ** 2 $ 3;\n";
        let mut rebuilt = String::new();
        let mut last = 0;
        for token in tokenize(source) {
            rebuilt.push_str(&source[last..token.span.start]);
            rebuilt.push_str(token.lexeme);
            last = token.span.end;
        }
        rebuilt.push_str(&source[last..]);
        assert_eq!(rebuilt, source);

        let again: Vec<_> = tokenize(&rebuilt).map(|t| t.kind).collect();
        let original: Vec<_> = tokenize(source).map(|t| t.kind).collect();
        assert_eq!(again, original);
    }
}
