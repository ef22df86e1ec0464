// Lua 5.4 lexer. Operates on bytes; strings may carry arbitrary byte
// content via escapes. Long strings and long comments use matched
// bracket levels.

use smol_str::SmolStr;

use super::token::{Literal, Token, TokenKind};
use super::SyntaxError;
use crate::lua_value::number;
use crate::lua_value::LuaValue;

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        };
        lexer.skip_shebang();
        lexer
    }

    /// Tokenize the whole input, ending with an Eof token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn skip_shebang(&mut self) {
        if self.src.first() == Some(&b'#') {
            while let Some(&b) = self.src.get(self.pos) {
                if b == b'\n' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn error(&self, message: impl Into<String>, near: &str) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            near: near.to_string(),
            line: self.line,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.bump();
                    self.bump();
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_string(level, true)?;
                            continue;
                        }
                    }
                    // line comment
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If positioned at `[`=*`[`, returns the level without consuming.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) == Some(b'[') {
            Some(level)
        } else {
            None
        }
    }

    pub fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia()?;
        let line = self.line;
        let column = self.column;
        let start = self.pos;
        let b = match self.peek() {
            Some(b) => b,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    lexeme: SmolStr::new("<eof>"),
                    literal: None,
                    line,
                    column,
                });
            }
        };

        let make = |kind: TokenKind, lexeme: &str| Token {
            kind,
            lexeme: SmolStr::new(lexeme),
            literal: None,
            line,
            column,
        };

        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                    self.bump();
                }
                let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
                let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Name);
                Ok(make(kind, text))
            }
            b'0'..=b'9' => self.read_number(line, column),
            b'.' => {
                if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
                    return self.read_number(line, column);
                }
                self.bump();
                if self.peek() == Some(b'.') {
                    self.bump();
                    if self.peek() == Some(b'.') {
                        self.bump();
                        Ok(make(TokenKind::Ellipsis, "..."))
                    } else {
                        Ok(make(TokenKind::Concat, ".."))
                    }
                } else {
                    Ok(make(TokenKind::Dot, "."))
                }
            }
            b'"' | b'\'' => self.read_short_string(b, line, column),
            b'[' => {
                if let Some(level) = self.long_bracket_level() {
                    let bytes = self.read_long_string(level, false)?;
                    return Ok(Token {
                        kind: TokenKind::StringLit,
                        lexeme: SmolStr::new("<string>"),
                        literal: Some(Literal::Bytes(bytes)),
                        line,
                        column,
                    });
                }
                self.bump();
                Ok(make(TokenKind::LBracket, "["))
            }
            b'=' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(make(TokenKind::Eq, "=="))
                } else {
                    Ok(make(TokenKind::Assign, "="))
                }
            }
            b'~' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(make(TokenKind::NotEq, "~="))
                } else {
                    Ok(make(TokenKind::Tilde, "~"))
                }
            }
            b'<' => {
                self.bump();
                match self.peek() {
                    Some(b'=') => {
                        self.bump();
                        Ok(make(TokenKind::LtEq, "<="))
                    }
                    Some(b'<') => {
                        self.bump();
                        Ok(make(TokenKind::Shl, "<<"))
                    }
                    _ => Ok(make(TokenKind::Lt, "<")),
                }
            }
            b'>' => {
                self.bump();
                match self.peek() {
                    Some(b'=') => {
                        self.bump();
                        Ok(make(TokenKind::GtEq, ">="))
                    }
                    Some(b'>') => {
                        self.bump();
                        Ok(make(TokenKind::Shr, ">>"))
                    }
                    _ => Ok(make(TokenKind::Gt, ">")),
                }
            }
            b'/' => {
                self.bump();
                if self.peek() == Some(b'/') {
                    self.bump();
                    Ok(make(TokenKind::DoubleSlash, "//"))
                } else {
                    Ok(make(TokenKind::Slash, "/"))
                }
            }
            b':' => {
                self.bump();
                if self.peek() == Some(b':') {
                    self.bump();
                    Ok(make(TokenKind::DoubleColon, "::"))
                } else {
                    Ok(make(TokenKind::Colon, ":"))
                }
            }
            b'+' => {
                self.bump();
                Ok(make(TokenKind::Plus, "+"))
            }
            b'-' => {
                self.bump();
                Ok(make(TokenKind::Minus, "-"))
            }
            b'*' => {
                self.bump();
                Ok(make(TokenKind::Star, "*"))
            }
            b'%' => {
                self.bump();
                Ok(make(TokenKind::Percent, "%"))
            }
            b'^' => {
                self.bump();
                Ok(make(TokenKind::Caret, "^"))
            }
            b'#' => {
                self.bump();
                Ok(make(TokenKind::Hash, "#"))
            }
            b'&' => {
                self.bump();
                Ok(make(TokenKind::Ampersand, "&"))
            }
            b'|' => {
                self.bump();
                Ok(make(TokenKind::Pipe, "|"))
            }
            b'(' => {
                self.bump();
                Ok(make(TokenKind::LParen, "("))
            }
            b')' => {
                self.bump();
                Ok(make(TokenKind::RParen, ")"))
            }
            b'{' => {
                self.bump();
                Ok(make(TokenKind::LBrace, "{"))
            }
            b'}' => {
                self.bump();
                Ok(make(TokenKind::RBrace, "}"))
            }
            b']' => {
                self.bump();
                Ok(make(TokenKind::RBracket, "]"))
            }
            b';' => {
                self.bump();
                Ok(make(TokenKind::Semi, ";"))
            }
            b',' => {
                self.bump();
                Ok(make(TokenKind::Comma, ","))
            }
            other => {
                self.bump();
                let text = (other as char).to_string();
                Err(self.error("unexpected symbol", &format!("'{}'", text)))
            }
        }
    }

    /// Numeric literal in any of the four shapes. Consumes every character
    /// that could belong to a numeral, so a malformed literal surfaces as
    /// one error covering its trailing alphanumerics.
    fn read_number(&mut self, line: u32, column: u32) -> Result<Token, SyntaxError> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'));
        if hex {
            self.bump();
            self.bump();
        }
        let exp_chars: [u8; 2] = if hex { [b'p', b'P'] } else { [b'e', b'E'] };
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' {
                let was_exp = exp_chars.contains(&c);
                self.bump();
                if was_exp && matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        match number::parse_number(text) {
            Some(LuaValue::Integer(i)) => Ok(Token {
                kind: TokenKind::Number,
                lexeme: SmolStr::new(text),
                literal: Some(Literal::Integer(i)),
                line,
                column,
            }),
            Some(LuaValue::Float(f)) => Ok(Token {
                kind: TokenKind::Number,
                lexeme: SmolStr::new(text),
                literal: Some(Literal::Float(f)),
                line,
                column,
            }),
            _ => Err(self.error("malformed number", &format!("'{}'", text))),
        }
    }

    fn read_short_string(&mut self, quote: u8, line: u32, column: u32) -> Result<Token, SyntaxError> {
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            let b = match self.peek() {
                Some(b) => b,
                None => return Err(self.error("unfinished string", "<eof>")),
            };
            match b {
                b'\n' => return Err(self.error("unfinished string", "'\\n'")),
                b'\\' => {
                    self.bump();
                    self.read_escape(&mut bytes)?;
                }
                _ if b == quote => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::StringLit,
                        lexeme: SmolStr::new("<string>"),
                        literal: Some(Literal::Bytes(bytes)),
                        line,
                        column,
                    });
                }
                _ => {
                    self.bump();
                    bytes.push(b);
                }
            }
        }
    }

    fn read_escape(&mut self, out: &mut Vec<u8>) -> Result<(), SyntaxError> {
        let b = match self.bump() {
            Some(b) => b,
            None => return Err(self.error("unfinished string", "<eof>")),
        };
        match b {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0B),
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'\n' => out.push(b'\n'),
            b'\r' => {
                // \r or \r\n collapses to a single newline
                if self.peek() == Some(b'\n') {
                    self.bump();
                }
                out.push(b'\n');
            }
            b'x' => {
                let mut value: u32 = 0;
                for _ in 0..2 {
                    let d = self
                        .peek()
                        .and_then(|c| (c as char).to_digit(16))
                        .ok_or_else(|| self.error("hexadecimal digit expected", "'\\x'"))?;
                    self.bump();
                    value = value * 16 + d;
                }
                out.push(value as u8);
            }
            b'z' => {
                while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
                    self.bump();
                }
            }
            b'u' => {
                if self.peek() != Some(b'{') {
                    return Err(self.error("missing '{' in \\u{xxxx}", "'\\u'"));
                }
                self.bump();
                let mut value: u64 = 0;
                let mut digits = 0;
                while let Some(d) = self.peek().and_then(|c| (c as char).to_digit(16)) {
                    self.bump();
                    value = value * 16 + d as u64;
                    digits += 1;
                    if value > 0x7FFF_FFFF {
                        return Err(self.error("UTF-8 value too large", "'\\u'"));
                    }
                }
                if digits == 0 {
                    return Err(self.error("hexadecimal digit expected", "'\\u'"));
                }
                if self.peek() != Some(b'}') {
                    return Err(self.error("missing '}' in \\u{xxxx}", "'\\u'"));
                }
                self.bump();
                push_utf8_extended(out, value as u32);
            }
            b'0'..=b'9' => {
                let mut value: u32 = (b - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(c) if c.is_ascii_digit() => {
                            self.bump();
                            value = value * 10 + (c - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(self.error("decimal escape too large", &format!("'\\{}'", value)));
                }
                out.push(value as u8);
            }
            other => {
                return Err(self.error(
                    "invalid escape sequence",
                    &format!("'\\{}'", other as char),
                ));
            }
        }
        Ok(())
    }

    /// Long string or long comment body. The opener must be present; a
    /// newline immediately after it is skipped.
    fn read_long_string(&mut self, level: usize, comment: bool) -> Result<Vec<u8>, SyntaxError> {
        // consume [=*[
        for _ in 0..level + 2 {
            self.bump();
        }
        if self.peek() == Some(b'\r') {
            self.bump();
            if self.peek() == Some(b'\n') {
                self.bump();
            }
        } else if self.peek() == Some(b'\n') {
            self.bump();
        }
        let mut bytes = Vec::new();
        loop {
            let b = match self.peek() {
                Some(b) => b,
                None => {
                    let what = if comment { "comment" } else { "string" };
                    return Err(self.error(format!("unfinished long {}", what), "<eof>"));
                }
            };
            if b == b']' {
                let mut matched = 1;
                while matched <= level && self.peek_at(matched) == Some(b'=') {
                    matched += 1;
                }
                if matched == level + 1 && self.peek_at(matched) == Some(b']') {
                    for _ in 0..level + 2 {
                        self.bump();
                    }
                    return Ok(bytes);
                }
            }
            self.bump();
            bytes.push(b);
        }
    }
}

/// Extended UTF-8: up to 6 bytes, accepting code points to 0x7FFFFFFF.
fn push_utf8_extended(out: &mut Vec<u8>, cp: u32) {
    if cp < 0x80 {
        out.push(cp as u8);
    } else if cp < 0x800 {
        out.push(0xC0 | (cp >> 6) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x10000 {
        out.push(0xE0 | (cp >> 12) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x200000 {
        out.push(0xF0 | (cp >> 18) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x4000000 {
        out.push(0xF8 | (cp >> 24) as u8);
        out.push(0x80 | ((cp >> 18) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else {
        out.push(0xFC | (cp >> 30) as u8);
        out.push(0x80 | ((cp >> 24) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 18) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    }
}
