//! Indentation-aware tokenizer.
//!
//! The source is a sequence of physical lines. Outside brackets a newline
//! ends a statement; inside `()[]{}` newlines are swallowed so bracketed
//! expressions may continue across lines. Leading whitespace is measured
//! in spaces against an indent stack; tabs in indentation are fatal.

use ps_core::{PsError, PsResult};

use crate::token::{Keyword, Tok, Token};

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    bracket_depth: usize,
    indent_stack: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

pub fn tokenize(source: &str) -> PsResult<Vec<Token>> {
    let normalized = source.replace("\r\n", "\n");
    let mut lexer = Lexer {
        chars: normalized.chars().collect(),
        pos: 0,
        line: 1,
        bracket_depth: 0,
        indent_stack: vec![0],
        tokens: Vec::new(),
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn run(&mut self) -> PsResult<()> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if self.handle_line_start()? {
                    break;
                }
                continue;
            }
            let Some(ch) = self.peek() else {
                break;
            };
            match ch {
                '\n' => {
                    self.advance();
                    self.line += 1;
                    if self.bracket_depth == 0 {
                        self.emit(Tok::Newline, self.line - 1);
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '"' => self.read_quoted_string()?,
                '`' => self.read_raw_string()?,
                '0'..='9' => self.read_number()?,
                'A'..='Z' | 'a'..='z' | '_' => self.read_word(),
                _ => self.read_symbol()?,
            }
        }
        self.finish();
        Ok(())
    }

    /// Measure indentation of the next logical line. Returns true at EOF.
    fn handle_line_start(&mut self) -> PsResult<bool> {
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    self.advance();
                }
                Some('\t') => {
                    return Err(PsError::parse(
                        self.line,
                        "tab character in indentation (use spaces)",
                    ));
                }
                _ => break,
            }
        }

        match self.peek() {
            None => return Ok(true),
            // Blank lines and comment-only lines do not affect indentation.
            Some('\n') => {
                self.advance();
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(false);
            }
            Some(_) => {}
        }

        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            self.emit(Tok::Indent, self.line);
        } else if width < current {
            while let Some(&top) = self.indent_stack.last() {
                if top == width {
                    break;
                }
                if top < width {
                    return Err(PsError::parse(
                        self.line,
                        format!("unindent to {width} does not match any outer indentation level"),
                    ));
                }
                self.indent_stack.pop();
                self.emit(Tok::Dedent, self.line);
            }
            if self.indent_stack.last() != Some(&width) {
                return Err(PsError::parse(
                    self.line,
                    format!("unindent to {width} does not match any outer indentation level"),
                ));
            }
        }

        self.at_line_start = false;
        Ok(false)
    }

    fn read_quoted_string(&mut self) -> PsResult<()> {
        let start_line = self.line;
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(PsError::parse(start_line, "unclosed string literal"));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        None => return Err(PsError::parse(start_line, "unclosed string literal")),
                        Some('n') => {
                            text.push('\n');
                            self.advance();
                        }
                        Some('\\') => {
                            text.push('\\');
                            self.advance();
                        }
                        Some('"') => {
                            text.push('"');
                            self.advance();
                        }
                        // Unknown escape keeps the escaped character.
                        Some(other) => {
                            text.push(other);
                            self.advance();
                        }
                    }
                }
                Some(other) => {
                    text.push(other);
                    self.advance();
                }
            }
        }
        self.emit(Tok::Str(text), start_line);
        Ok(())
    }

    /// Back-tick strings span lines and preserve newlines verbatim.
    fn read_raw_string(&mut self) -> PsResult<()> {
        let start_line = self.line;
        self.advance(); // opening backtick
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(PsError::parse(start_line, "unclosed backtick string")),
                Some('`') => {
                    self.advance();
                    break;
                }
                Some('\n') => {
                    text.push('\n');
                    self.line += 1;
                    self.advance();
                }
                Some(other) => {
                    text.push(other);
                    self.advance();
                }
            }
        }
        self.emit(Tok::Str(text), start_line);
        Ok(())
    }

    fn read_number(&mut self) -> PsResult<()> {
        let start_line = self.line;
        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| PsError::parse(start_line, format!("integer literal too large: {digits}")))?;
        self.emit(Tok::Int(value), start_line);
        Ok(())
    }

    fn read_word(&mut self) {
        let start_line = self.line;
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match Keyword::from_ident(&word) {
            Some(kw) => self.emit(Tok::Kw(kw), start_line),
            None => self.emit(Tok::Ident(word), start_line),
        }
    }

    fn read_symbol(&mut self) -> PsResult<()> {
        let start_line = self.line;
        let ch = self.peek().unwrap_or('\0');
        let next = self.peek_ahead(1);

        // Two-character symbols take precedence.
        let two = match (ch, next) {
            ('=', Some('=')) => Some(Tok::EqEq),
            ('!', Some('=')) => Some(Tok::NotEq),
            ('<', Some('=')) => Some(Tok::Le),
            ('>', Some('=')) => Some(Tok::Ge),
            _ => None,
        };
        if let Some(tok) = two {
            self.advance();
            self.advance();
            self.emit(tok, start_line);
            return Ok(());
        }

        let tok = match ch {
            '(' => {
                self.bracket_depth += 1;
                Tok::LParen
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RParen
            }
            '{' => {
                self.bracket_depth += 1;
                Tok::LBrace
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBrace
            }
            '[' => {
                self.bracket_depth += 1;
                Tok::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBracket
            }
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            '.' => Tok::Dot,
            '=' => Tok::Assign,
            '+' => Tok::Plus,
            '<' => Tok::Lt,
            '>' => Tok::Gt,
            other => {
                return Err(PsError::parse(
                    start_line,
                    format!("unknown character `{other}`"),
                ));
            }
        };
        self.advance();
        self.emit(tok, start_line);
        Ok(())
    }

    fn finish(&mut self) {
        let needs_newline = !matches!(
            self.tokens.last().map(|token| &token.tok),
            None | Some(Tok::Newline | Tok::Indent | Tok::Dedent)
        );
        if needs_newline {
            self.emit(Tok::Newline, self.line);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.emit(Tok::Dedent, self.line);
        }
        self.emit(Tok::Eof, self.line);
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn emit(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token::new(tok, line));
    }
}
