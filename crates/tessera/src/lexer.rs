//! The TessL lexer.
//!
//! Skips whitespace and `//`/`/*...*/` comments (block comments do not
//! nest), and produces spanned tokens for identifiers, numeric and string
//! literals, punctuation, and operators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Span};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Double(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dollar,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Assign,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Int(v) => write!(f, "integer {v}"),
            Self::Double(v) => write!(f, "number {v}"),
            Self::Str(_) => write!(f, "string literal"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBracket => write!(f, "'['"),
            Self::RBracket => write!(f, "']'"),
            Self::LBrace => write!(f, "'{{'"),
            Self::RBrace => write!(f, "'}}'"),
            Self::Comma => write!(f, "','"),
            Self::Dollar => write!(f, "'$'"),
            Self::Plus => write!(f, "'+'"),
            Self::Minus => write!(f, "'-'"),
            Self::Star => write!(f, "'*'"),
            Self::Slash => write!(f, "'/'"),
            Self::Percent => write!(f, "'%'"),
            Self::EqEq => write!(f, "'=='"),
            Self::NotEq => write!(f, "'!='"),
            Self::Lt => write!(f, "'<'"),
            Self::Le => write!(f, "'<='"),
            Self::Gt => write!(f, "'>'"),
            Self::Ge => write!(f, "'>='"),
            Self::AndAnd => write!(f, "'&&'"),
            Self::OrOr => write!(f, "'||'"),
            Self::Bang => write!(f, "'!'"),
            Self::Assign => write!(f, "'='"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

/// Tokenizes the whole source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let open = self.pos;
                    self.pos += 2;
                    loop {
                        match (self.peek(), self.peek2()) {
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(_), _) => self.pos += 1,
                            (None, _) => {
                                return Err(Error::parse(open, &["'*/'"], "end of input"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let single = |kind: TokenKind, lexer: &mut Self| {
            lexer.pos += 1;
            Some(Token {
                kind,
                span: Span::new(start, start + 1),
            })
        };

        let token = match c {
            b'(' => single(TokenKind::LParen, self),
            b')' => single(TokenKind::RParen, self),
            b'[' => single(TokenKind::LBracket, self),
            b']' => single(TokenKind::RBracket, self),
            b'{' => single(TokenKind::LBrace, self),
            b'}' => single(TokenKind::RBrace, self),
            b',' => single(TokenKind::Comma, self),
            b'$' => single(TokenKind::Dollar, self),
            b'+' => single(TokenKind::Plus, self),
            b'-' => single(TokenKind::Minus, self),
            b'*' => single(TokenKind::Star, self),
            b'/' => single(TokenKind::Slash, self),
            b'%' => single(TokenKind::Percent, self),
            b'=' if self.peek2() == Some(b'=') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::EqEq, span: Span::new(start, start + 2) })
            }
            b'=' => single(TokenKind::Assign, self),
            b'!' if self.peek2() == Some(b'=') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::NotEq, span: Span::new(start, start + 2) })
            }
            b'!' => single(TokenKind::Bang, self),
            b'<' if self.peek2() == Some(b'=') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::Le, span: Span::new(start, start + 2) })
            }
            b'<' => single(TokenKind::Lt, self),
            b'>' if self.peek2() == Some(b'=') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::Ge, span: Span::new(start, start + 2) })
            }
            b'>' => single(TokenKind::Gt, self),
            b'&' if self.peek2() == Some(b'&') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::AndAnd, span: Span::new(start, start + 2) })
            }
            b'|' if self.peek2() == Some(b'|') => {
                self.pos += 2;
                Some(Token { kind: TokenKind::OrOr, span: Span::new(start, start + 2) })
            }
            b'"' => Some(self.string_literal()?),
            c if c.is_ascii_digit() => Some(self.number_literal()?),
            c if c.is_ascii_alphabetic() || c == b'_' => Some(self.identifier()),
            other => {
                return Err(Error::parse(
                    start,
                    &["identifier", "literal", "operator", "punctuation"],
                    format!("'{}'", char::from(other)),
                ));
            }
        };
        Ok(token)
    }

    fn identifier(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        Token {
            kind: TokenKind::Ident(self.source[start..self.pos].to_owned()),
            span: Span::new(start, self.pos),
        }
    }

    fn number_literal(&mut self) -> Result<Token> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_double = false;
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_double = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                // Not an exponent after all: back off and let the 'e' lex
                // as the start of an identifier.
                self.pos = mark;
            }
        }
        let text = &self.source[start..self.pos];
        let kind = if is_double {
            TokenKind::Double(
                text.parse::<f64>()
                    .map_err(|_| Error::parse(start, &["numeric literal"], format!("'{text}'")))?,
            )
        } else {
            TokenKind::Int(
                text.parse::<i64>()
                    .map_err(|_| Error::parse(start, &["integer literal"], format!("'{text}' (out of range)")))?,
            )
        };
        Ok(Token { kind, span: Span::new(start, self.pos) })
    }

    fn string_literal(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let escape_pos = self.pos;
                    self.pos += 1;
                    match self.peek() {
                        Some(b'n') => text.push('\n'),
                        Some(b't') => text.push('\t'),
                        Some(b'r') => text.push('\r'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'"') => text.push('"'),
                        other => {
                            return Err(Error::parse(
                                escape_pos,
                                &["'\\n'", "'\\t'", "'\\r'", "'\\\\'", "'\\\"'"],
                                other.map_or_else(|| "end of input".to_owned(), |c| format!("'\\{}'", char::from(c))),
                            ));
                        }
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Keep multi-byte characters intact by consuming whole
                    // chars from the source slice.
                    let ch = self.source[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| Error::parse(self.pos, &["string character"], "invalid utf-8"))?;
                    text.push(ch);
                    self.pos += ch.len_utf8();
                }
                None => return Err(Error::parse(start, &["'\"'"], "end of input")),
            }
        }
        Ok(Token {
            kind: TokenKind::Str(text),
            span: Span::new(start, self.pos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(
            kinds("( ) , <= == && !"),
            vec![
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Comma,
                TokenKind::Le,
                TokenKind::EqEq,
                TokenKind::AndAnd,
                TokenKind::Bang,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 // trailing\n2 /* middle */ 3"), vec![
            TokenKind::Int(1),
            TokenKind::Int(2),
            TokenKind::Int(3),
        ]);
    }

    #[test]
    fn unterminated_block_comment_is_a_parse_error() {
        let err = tokenize("1 /* oops").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseError);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("42 3.5 1e3 2.5e-1"), vec![
            TokenKind::Int(42),
            TokenKind::Double(3.5),
            TokenKind::Double(1000.0),
            TokenKind::Double(0.25),
        ]);
    }

    #[test]
    fn number_followed_by_identifier() {
        // '2e' is not an exponent; the 'e' belongs to the next token.
        assert_eq!(kinds("2e"), vec![TokenKind::Int(2), TokenKind::Ident("e".to_owned())]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds(r#""a\nb\"c""#), vec![TokenKind::Str("a\nb\"c".to_owned())]);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let tokens = tokenize("ab + cd").unwrap();
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].span, Span::new(3, 4));
        assert_eq!(tokens[2].span, Span::new(5, 7));
    }
}
