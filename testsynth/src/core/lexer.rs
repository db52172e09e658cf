//! Indentation-aware tokenizer for the supported Python subset.
//!
//! Blank and comment-only lines produce no tokens. Leading whitespace of every
//! other line is turned into `Indent`/`Dedent` tokens; tabs advance to the next
//! multiple of [`TAB_WIDTH`].

use std::fmt;

use crate::core::grammar::GrammarViolation;

pub const TAB_WIDTH: usize = 4;

/// Python keywords outside the supported subset. They lex as
/// [`TokenKind::Reserved`] so the parser can reject them where they start.
const RESERVED: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "del", "elif",
    "except", "finally", "for", "from", "global", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "try", "while", "with", "yield",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Name(String),
    Number(String),
    Def,
    Return,
    If,
    Else,
    True,
    False,
    None,
    Reserved(String),
    LParen,
    RParen,
    Comma,
    Colon,
    Arrow,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Newline,
    Indent,
    Dedent,
    Eof,
    Unknown(char),
}

impl TokenKind {
    /// Syntactic category used in "expected ..." diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            TokenKind::Name(_) => "NAME",
            TokenKind::Number(_) => "NUMBER",
            TokenKind::Def => "'def'",
            TokenKind::Return => "'return'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::True => "'True'",
            TokenKind::False => "'False'",
            TokenKind::None => "'None'",
            TokenKind::Reserved(_) => "KEYWORD",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Arrow => "'->'",
            TokenKind::Assign => "'='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::LtEq => "'<='",
            TokenKind::GtEq => "'>='",
            TokenKind::Newline => "NEWLINE",
            TokenKind::Indent => "INDENT",
            TokenKind::Dedent => "DEDENT",
            TokenKind::Eof => "EOF",
            TokenKind::Unknown(_) => "CHARACTER",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Name(name) => write!(f, "name '{name}'"),
            TokenKind::Number(text) => write!(f, "number {text}"),
            TokenKind::Reserved(word) => write!(f, "unsupported keyword '{word}'"),
            TokenKind::Unknown(ch) => write!(f, "unsupported character {ch:?}"),
            other => f.write_str(other.category()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Split `code` into tokens, including synthetic `Newline`/`Indent`/`Dedent`/`Eof`.
pub fn tokenize(code: &str) -> Result<Vec<Token>, GrammarViolation> {
    let mut tokens = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut last_line = 0u32;

    for (idx, raw) in code.split('\n').enumerate() {
        let line_no = (idx + 1) as u32;
        last_line = line_no;
        let chars: Vec<char> = raw.strip_suffix('\r').unwrap_or(raw).chars().collect();

        let mut width = 0usize;
        let mut start = 0usize;
        while start < chars.len() {
            match chars[start] {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => {}
                _ => break,
            }
            start += 1;
        }
        if start == chars.len() || chars[start] == '#' {
            continue;
        }

        let column = (start + 1) as u32;
        let top = *indents.last().unwrap_or(&0);
        if width > top {
            indents.push(width);
            tokens.push(token(TokenKind::Indent, line_no, column));
        } else if width < top {
            while width < *indents.last().unwrap_or(&0) {
                indents.pop();
                tokens.push(token(TokenKind::Dedent, line_no, column));
            }
            if width != *indents.last().unwrap_or(&0) {
                return Err(GrammarViolation::new(
                    line_no,
                    column,
                    ["DEDENT"],
                    "indentation that does not match any outer block",
                ));
            }
        }

        lex_line(&chars, start, line_no, &mut tokens);
        tokens.push(token(
            TokenKind::Newline,
            line_no,
            (chars.len() + 1) as u32,
        ));
    }

    let end_line = last_line + 1;
    while indents.len() > 1 {
        indents.pop();
        tokens.push(token(TokenKind::Dedent, end_line, 1));
    }
    tokens.push(token(TokenKind::Eof, end_line, 1));
    Ok(tokens)
}

fn token(kind: TokenKind, line: u32, column: u32) -> Token {
    Token { kind, line, column }
}

fn lex_line(chars: &[char], start: usize, line: u32, tokens: &mut Vec<Token>) {
    let mut i = start;
    while i < chars.len() {
        let ch = chars[i];
        let column = (i + 1) as u32;
        let next = chars.get(i + 1).copied();

        if ch == ' ' || ch == '\t' || ch == '\x0c' {
            i += 1;
            continue;
        }
        if ch == '#' {
            break;
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            let end = scan_while(chars, i, |c| c.is_ascii_alphanumeric() || c == '_');
            let word: String = chars[i..end].iter().collect();
            tokens.push(token(keyword_or_name(word), line, column));
            i = end;
            continue;
        }
        if ch.is_ascii_digit() {
            let mut end = scan_while(chars, i, |c| c.is_ascii_digit() || c == '_');
            if chars.get(end) == Some(&'.') {
                end = scan_while(chars, end + 1, |c| c.is_ascii_digit() || c == '_');
            }
            let text: String = chars[i..end].iter().collect();
            tokens.push(token(TokenKind::Number(text), line, column));
            i = end;
            continue;
        }

        let (kind, width) = match (ch, next) {
            ('-', Some('>')) => (TokenKind::Arrow, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            (other, _) => (TokenKind::Unknown(other), 1),
        };
        tokens.push(token(kind, line, column));
        i += width;
    }
}

fn scan_while(chars: &[char], from: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = from;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

fn keyword_or_name(word: String) -> TokenKind {
    match word.as_str() {
        "def" => TokenKind::Def,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "True" => TokenKind::True,
        "False" => TokenKind::False,
        "None" => TokenKind::None,
        w if RESERVED.contains(&w) => TokenKind::Reserved(word),
        _ => TokenKind::Name(word),
    }
}
