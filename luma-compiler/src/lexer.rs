//! Tokenizer: Luma source text to a token stream (spec §4.6).
//!
//! Ported from the reference `Tokenizer.cpp`'s character-at-a-time scan;
//! the one-character-lookahead operators (`!= >= <= ==`) and the
//! keyword-vs-identifier resolution follow it exactly.

use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("{line}:{col}: unexpected character {ch:?}")]
    UnexpectedChar { line: usize, col: usize, ch: char },
    #[error("{line}:{col}: malformed number literal {text:?}")]
    MalformedNumber {
        line: usize,
        col: usize,
        text: String,
    },
}

pub struct Lexer<'a> {
    src: &'a [u8],
    index: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            index: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize_all(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.index + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.index += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let (line, col) = (self.line, self.col);

        let cur = match self.peek_byte() {
            None => return Ok(Token::new(TokenKind::Eof, line, col)),
            Some(b) => b,
        };

        if cur.is_ascii_alphabetic() || cur == b'_' {
            return Ok(self.scan_identifier_or_keyword(line, col));
        }

        if cur.is_ascii_digit() {
            return self.scan_number(line, col);
        }

        self.advance();
        let two_char = |lexer: &mut Self, second: u8, double: TokenKind, single: TokenKind| {
            if lexer.peek_byte() == Some(second) {
                lexer.advance();
                double
            } else {
                single
            }
        };

        let kind = match cur {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Mul,
            b'/' => TokenKind::Div,
            b'%' => TokenKind::Mod,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'.' => TokenKind::Dot,
            b'!' => two_char(self, b'=', TokenKind::Neq, TokenKind::Not),
            b'>' => two_char(self, b'=', TokenKind::Geq, TokenKind::Greater),
            b'<' => two_char(self, b'=', TokenKind::Leq, TokenKind::Less),
            b'=' => two_char(self, b'=', TokenKind::Eq, TokenKind::Assign),
            other => {
                return Err(LexError::UnexpectedChar {
                    line,
                    col,
                    ch: other as char,
                })
            }
        };

        Ok(Token::new(kind, line, col))
    }

    fn scan_identifier_or_keyword(&mut self, line: usize, col: usize) -> Token {
        let start = self.index;
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.index])
            .expect("identifier bytes are ASCII")
            .to_string();

        let kind = match text.as_str() {
            "require" => TokenKind::Require,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "return" => TokenKind::Return,
            "loop" => TokenKind::Loop,
            "let" => TokenKind::Let,
            "fn" => TokenKind::Fn,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            _ => TokenKind::Identifier,
        };

        if kind == TokenKind::Identifier {
            Token::with_text(kind, line, col, text)
        } else {
            Token::new(kind, line, col)
        }
    }

    fn scan_number(&mut self, line: usize, col: usize) -> Result<Token, LexError> {
        let start = self.index;
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        // A digit run directly followed by an identifier character is a
        // malformed literal (e.g. `12x`) rather than two adjacent tokens.
        if matches!(self.peek_at(0), Some(b) if b.is_ascii_alphabetic() || b == b'_') {
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_alphanumeric() || b == b'_' {
                    self.advance();
                } else {
                    break;
                }
            }
            let text = String::from_utf8_lossy(&self.src[start..self.index]).to_string();
            return Err(LexError::MalformedNumber { line, col, text });
        }
        let text = std::str::from_utf8(&self.src[start..self.index])
            .expect("digit bytes are ASCII")
            .to_string();
        Ok(Token::with_text(TokenKind::Number, line, col, text))
    }
}
