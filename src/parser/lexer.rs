//! Lexer for ModSecurity/Apache configuration syntax.

use std::iter::Peekable;
use std::str::Chars;

/// Token produced by the lexer.
#[derive(Debug, Clone)]
pub struct Token {
    /// The type of token.
    pub kind: TokenKind,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

/// Types of tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A directive name (first word on a line, e.g. SecAuditLogParts).
    Directive(String),
    /// An unquoted word.
    Word(String),
    /// A quoted string (single or double quotes), quotes removed.
    QuotedString(String),
    /// A container line such as `<IfModule mod_security2.c>`.
    Section(String),
    /// A comment (starting with #).
    Comment,
    /// A newline.
    Newline,
}

/// Lexer for ModSecurity configuration.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// Peek at the next character without consuming it.
    pub fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    /// Consume the next character.
    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(ch) = c {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
                self.at_line_start = true;
            } else {
                self.column += 1;
                if !ch.is_whitespace() {
                    self.at_line_start = false;
                }
            }
        }
        c
    }

    /// Skip whitespace (but not newlines), including form feeds and NBSP.
    pub fn skip_whitespace(&mut self) {
        while let Some(&c) = self.input.peek() {
            if c != '\n' && c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        let kind = match self.peek()? {
            '\n' => {
                self.advance();
                TokenKind::Newline
            }
            '#' if self.at_line_start => {
                self.skip_line();
                TokenKind::Comment
            }
            '<' if self.at_line_start => {
                self.advance();
                let mut body = String::new();
                while let Some(c) = self.advance() {
                    if c == '>' || c == '\n' {
                        break;
                    }
                    body.push(c);
                }
                TokenKind::Section(body.trim().to_string())
            }
            '"' | '\'' => {
                let quote = self.advance()?;
                TokenKind::QuotedString(self.read_quoted_string(quote))
            }
            '\\' => {
                // Line continuation
                self.advance();
                if self.peek() == Some('\n') {
                    self.advance();
                    self.at_line_start = false;
                }
                return self.next_token();
            }
            _ => {
                let was_at_line_start = self.at_line_start;
                let word = self.read_word();
                if word.is_empty() {
                    // Skip the character rather than end the stream.
                    self.advance();
                    return self.next_token();
                }
                if was_at_line_start {
                    TokenKind::Directive(word)
                } else {
                    TokenKind::Word(word)
                }
            }
        };

        Some(Token { kind, line, column })
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Read a quoted string. Only an escaped quote is unescaped; other
    /// backslashes belong to the value (regexes rely on them).
    fn read_quoted_string(&mut self, quote: char) -> String {
        let mut s = String::new();

        while let Some(c) = self.advance() {
            if c == '\\' {
                match self.peek() {
                    Some(next) if next == quote => {
                        self.advance();
                        s.push(quote);
                    }
                    Some('\n') => {
                        self.advance();
                        self.at_line_start = false;
                    }
                    _ => s.push('\\'),
                }
            } else if c == quote {
                break;
            } else {
                s.push(c);
            }
        }

        s
    }

    /// Read an unquoted word, handling backslash-newline continuation.
    fn read_word(&mut self) -> String {
        let mut s = String::new();

        while let Some(&c) = self.input.peek() {
            if c == '\\' {
                self.advance();
                if self.peek() == Some('\n') {
                    self.advance();
                    self.at_line_start = false;
                    continue;
                }
                s.push('\\');
                continue;
            }
            if c.is_whitespace() || c == '"' || c == '\'' {
                break;
            }
            s.push(c);
            self.advance();
        }

        s
    }
}
