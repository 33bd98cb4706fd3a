//! Low-level KLARF tokenizer: raw text to `;`-terminated statements.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{KlarfError, Result};

/// Statement delimiter.
pub const DELIMITER: char = ';';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: identifiers, dates, times, enum values.
    Word,
    /// Double-quoted string; `text` holds the unquoted contents.
    Quoted,
    Number,
    Open,
    Close,
    Comma,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based source line.
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
        }
    }

    pub fn is_delimiter(&self) -> bool {
        matches!(self.kind, TokenKind::Open | TokenKind::Close | TokenKind::Comma)
    }
}

/// One logical statement: every token up to (not including) the `;`.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub tokens: Vec<Token>,
}

impl Statement {
    /// Leading token, as written.
    pub fn keyword(&self) -> &str {
        self.tokens.first().map_or("", |t| t.text.as_str())
    }

    /// Line of the leading token.
    pub fn line(&self) -> usize {
        self.tokens.first().map_or(0, |t| t.line)
    }

    /// Tokens following the keyword.
    pub fn args(&self) -> &[Token] {
        self.tokens.get(1..).unwrap_or(&[])
    }
}

/// True for signed integer / decimal / exponent literals. Dates such as
/// `03-15-21` and words like `inf` are not numbers.
pub fn is_number(s: &str) -> bool {
    let body = s.strip_prefix(&['+', '-'][..]).unwrap_or(s);
    let (mantissa, exponent) = match body.find(&['e', 'E'][..]) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let mut digits = 0;
    let mut dots = 0;
    for c in mantissa.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    if digits == 0 || dots > 1 {
        return false;
    }
    match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(&['+', '-'][..]).unwrap_or(e);
            !e.is_empty() && e.chars().all(|c| c.is_ascii_digit())
        }
    }
}

/// Lazy statement stream over in-memory KLARF text.
///
/// Yields `Err` once on malformed input and then stops.
pub struct StatementReader<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    done: bool,
}

impl<'a> StatementReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
            done: false,
        }
    }

    #[inline]
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn malformed(&mut self, line: usize, reason: &str) -> KlarfError {
        self.done = true;
        KlarfError::MalformedStatement {
            line,
            reason: reason.to_string(),
        }
    }

    /// Skip `//` and `/* */` comments. Returns false when the input is a
    /// lone `/` that should be read as part of a word.
    fn skip_comment(&mut self) -> Result<bool> {
        let mut ahead = self.chars.clone();
        ahead.next();
        match ahead.peek() {
            Some('/') => {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                Ok(true)
            }
            Some('*') => {
                let start = self.line;
                self.bump();
                self.bump();
                let mut prev = '\0';
                loop {
                    match self.bump() {
                        Some('/') if prev == '*' => return Ok(true),
                        Some(c) => prev = c,
                        None => return Err(self.malformed(start, "unterminated comment")),
                    }
                }
            }
            _ => Ok(false),
        }
    }

    fn read_quoted(&mut self) -> Result<Token> {
        let line = self.line;
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Token::new(TokenKind::Quoted, text, line)),
                Some('\n') | None => return Err(self.malformed(line, "unbalanced quote")),
                Some(c) => text.push(c),
            }
        }
    }

    fn read_word(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, DELIMITER | '"' | '{' | '}' | ',') {
                break;
            }
            text.push(c);
            self.bump();
        }
        let kind = if is_number(&text) {
            TokenKind::Number
        } else {
            TokenKind::Word
        };
        Token::new(kind, text, line)
    }
}

impl Iterator for StatementReader<'_> {
    type Item = Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let Some(&c) = self.chars.peek() else {
                self.done = true;
                return match tokens.first() {
                    None => None,
                    Some(first) => {
                        let line = first.line;
                        Some(Err(self.malformed(line, "statement not terminated by ';'")))
                    }
                };
            };
            match c {
                DELIMITER => {
                    self.bump();
                    if !tokens.is_empty() {
                        return Some(Ok(Statement { tokens }));
                    }
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' => match self.skip_comment() {
                    Ok(true) => {}
                    Ok(false) => tokens.push(self.read_word()),
                    Err(e) => return Some(Err(e)),
                },
                '"' => match self.read_quoted() {
                    Ok(token) => tokens.push(token),
                    Err(e) => return Some(Err(e)),
                },
                '{' | '}' | ',' => {
                    let kind = match c {
                        '{' => TokenKind::Open,
                        '}' => TokenKind::Close,
                        _ => TokenKind::Comma,
                    };
                    let line = self.line;
                    self.bump();
                    tokens.push(Token::new(kind, c.to_string(), line));
                }
                _ => tokens.push(self.read_word()),
            }
        }
    }
}

/// Tokenize eagerly, stopping at the first malformed statement.
pub fn statements(text: &str) -> Result<Vec<Statement>> {
    StatementReader::new(text).collect()
}
