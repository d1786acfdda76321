//! Static allow-list check over Python source, run before anything executes.
//!
//! The tokenizer understands enough Python to never mistake the inside of a
//! string or comment for code, while still scanning the expressions embedded
//! in f-strings.

use super::policy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub reason: String,
    pub line: usize,
}

impl Violation {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), line }
    }
}

/// What the validator learned about accepted source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Name(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Newline,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    tok: Tok,
    line: usize,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    out: &'a mut Vec<Token>,
}

fn tokenize(src: &str, first_line: usize, out: &mut Vec<Token>) -> Result<(), Violation> {
    let mut lx = Lexer { chars: src.chars().collect(), pos: 0, line: first_line, depth: 0, out };
    lx.run()
}

impl Lexer<'_> {
    fn peek(&self, off: usize) -> Option<char> {
        self.chars.get(self.pos + off).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.out.push(Token { tok, line: self.line });
    }

    fn run(&mut self) -> Result<(), Violation> {
        while let Some(c) = self.peek(0) {
            match c {
                '#' => {
                    while self.peek(0).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                '\n' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                ';' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.pos += 1;
                }
                '\'' | '"' => self.string("")?,
                c if c.is_alphabetic() || c == '_' => {
                    let start = self.pos;
                    while self.peek(0).is_some_and(|c| c.is_alphanumeric() || c == '_') {
                        self.pos += 1;
                    }
                    let word: String = self.chars[start..self.pos].iter().collect();
                    let lower = word.to_ascii_lowercase();
                    if matches!(self.peek(0), Some('\'' | '"'))
                        && STRING_PREFIXES.contains(&lower.as_str())
                    {
                        self.string(&lower)?;
                    } else {
                        self.push(Tok::Name(word));
                    }
                }
                c if c.is_ascii_digit() => {
                    while self
                        .peek(0)
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
                    {
                        // `1.e5` is a number but `1 .real` never shows up in plotting code
                        self.pos += 1;
                    }
                    self.push(Tok::Other);
                }
                '.' => {
                    self.push(Tok::Dot);
                    self.pos += 1;
                }
                ',' => {
                    self.push(Tok::Comma);
                    self.pos += 1;
                }
                '(' | '[' | '{' => {
                    if c == '(' {
                        self.push(Tok::LParen);
                    } else {
                        self.push(Tok::Other);
                    }
                    self.depth += 1;
                    self.pos += 1;
                }
                ')' | ']' | '}' => {
                    if c == ')' {
                        self.push(Tok::RParen);
                    } else {
                        self.push(Tok::Other);
                    }
                    self.depth = self.depth.saturating_sub(1);
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                _ => {
                    self.push(Tok::Other);
                    self.pos += 1;
                }
            }
        }
        Ok(())
    }

    /// Consume a string literal starting at the opening quote.
    fn string(&mut self, prefix: &str) -> Result<(), Violation> {
        let start_line = self.line;
        let quote = self.chars[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let body_start = self.pos;
        let body_line = self.line;
        loop {
            let Some(c) = self.peek(0) else {
                return Err(Violation::new(
                    start_line,
                    "unterminated string literal; source cannot be verified",
                ));
            };
            match c {
                '\\' => {
                    if self.peek(1) == Some('\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                '\n' if !triple => {
                    return Err(Violation::new(
                        start_line,
                        "unterminated string literal; source cannot be verified",
                    ));
                }
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c == quote
                    && (!triple
                        || (self.peek(1) == Some(quote) && self.peek(2) == Some(quote))) =>
                {
                    let body: String = self.chars[body_start..self.pos].iter().collect();
                    self.pos += if triple { 3 } else { 1 };
                    if prefix.contains('f') {
                        for (expr, line) in fstring_expressions(&body, body_line) {
                            tokenize(&expr, line, &mut *self.out)?;
                            self.out.push(Token { tok: Tok::Newline, line });
                        }
                    }
                    self.push(Tok::Other);
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
    }
}

/// The `{...}` replacement fields of an f-string body, with their starting line.
fn fstring_expressions(body: &str, first_line: usize) -> Vec<(String, usize)> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = first_line;
    while i < chars.len() {
        match chars[i] {
            '\n' => line += 1,
            '{' if chars.get(i + 1) == Some(&'{') => i += 1,
            '{' => {
                let start_line = line;
                let mut depth = 1;
                let mut expr = String::new();
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        '\n' => line += 1,
                        _ => {}
                    }
                    expr.push(c);
                    i += 1;
                }
                // drop a format spec or conversion; the spec itself may hold nested fields
                let cut = top_level_split(&expr);
                let (head, spec) = expr.split_at(cut);
                out.push((head.to_string(), start_line));
                if !spec.is_empty() {
                    out.extend(fstring_expressions(spec, start_line));
                }
            }
            _ => {}
        }
        i += 1;
    }
    out
}

/// Index of the first top-level `:` or `!` (not `!=`) in an f-string field, or its length.
fn top_level_split(expr: &str) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b':' if depth == 0 => return i,
            b'!' if depth == 0 && bytes.get(i + 1) != Some(&b'=') => return i,
            _ => {}
        }
    }
    expr.len()
}

/// Check `source` against the allow-lists in [`policy`].
pub fn validate(source: &str) -> Result<ValidationReport, Violation> {
    let mut toks = Vec::new();
    tokenize(source, 1, &mut toks)?;

    let mut report = ValidationReport::default();
    let mut i = 0;
    while i < toks.len() {
        let Token { tok, line } = &toks[i];
        let line = *line;
        let after_dot = i > 0 && toks[i - 1].tok == Tok::Dot;

        if let Tok::Name(name) = tok {
            match name.as_str() {
                "import" if !after_dot => {
                    i = check_import(&toks, i + 1, &mut report)?;
                    continue;
                }
                "from" if !after_dot => {
                    if let Some(next) = check_from_import(&toks, i + 1, line, &mut report)? {
                        i = next;
                        continue;
                    }
                }
                _ => check_name(name, after_dot, line)?,
            }
        }
        i += 1;
    }
    Ok(report)
}

fn check_name(name: &str, after_dot: bool, line: usize) -> Result<(), Violation> {
    if policy::is_dunder(name) && !policy::ALLOWED_DUNDERS.contains(&name) {
        return Err(Violation::new(line, format!("reflective access to `{name}` is not allowed")));
    }
    if policy::is_name_denied(name) {
        return Err(Violation::new(line, format!("`{name}` is not allowed")));
    }
    if after_dot {
        if policy::is_attribute_denied(name) {
            return Err(Violation::new(line, format!("attribute `.{name}` is not allowed")));
        }
    } else if policy::DENIED_BUILTINS.contains(&name) {
        return Err(Violation::new(line, format!("builtin `{name}` is not allowed")));
    }
    Ok(())
}

/// Read `a.b.c` starting at `i`; returns the path and the index after it.
fn dotted_name(toks: &[Token], mut i: usize) -> Option<(String, usize)> {
    let mut parts = Vec::new();
    loop {
        match toks.get(i).map(|t| &t.tok) {
            Some(Tok::Name(n)) if !KEYWORDS.contains(&n.as_str()) => {
                parts.push(n.clone());
                i += 1;
            }
            _ => return None,
        }
        if toks.get(i).map(|t| &t.tok) == Some(&Tok::Dot) {
            i += 1;
        } else {
            return Some((parts.join("."), i));
        }
    }
}

fn is_name(toks: &[Token], i: usize, want: &str) -> bool {
    matches!(toks.get(i).map(|t| &t.tok), Some(Tok::Name(n)) if n == want)
}

fn line_at(toks: &[Token], i: usize, fallback: usize) -> usize {
    toks.get(i).map(|t| t.line).unwrap_or(fallback)
}

/// `import a.b [as c], d ...`
fn check_import(
    toks: &[Token],
    mut i: usize,
    report: &mut ValidationReport,
) -> Result<usize, Violation> {
    let line = line_at(toks, i.saturating_sub(1), 1);
    loop {
        let Some((module, next)) = dotted_name(toks, i) else {
            return Err(Violation::new(line, "malformed import statement"));
        };
        if !policy::is_import_allowed(&module) {
            return Err(Violation::new(line, format!("import of `{module}` is not allowed")));
        }
        report.imports.push(module);
        i = next;
        if is_name(toks, i, "as") {
            let alias_line = line_at(toks, i, line);
            match toks.get(i + 1).map(|t| &t.tok) {
                Some(Tok::Name(alias)) => check_name(alias, false, alias_line)?,
                _ => return Err(Violation::new(line, "malformed import statement")),
            }
            i += 2;
        }
        if toks.get(i).map(|t| &t.tok) == Some(&Tok::Comma) {
            i += 1;
        } else {
            return Ok(i);
        }
    }
}

/// `from a.b import x [as y], ...`. Returns `None` when this `from` is not an import
/// (`raise e from None`, `yield from g()`).
fn check_from_import(
    toks: &[Token],
    i: usize,
    line: usize,
    report: &mut ValidationReport,
) -> Result<Option<usize>, Violation> {
    if toks.get(i).map(|t| &t.tok) == Some(&Tok::Dot) {
        return Err(Violation::new(line, "relative imports are not allowed"));
    }
    let Some((module, mut i)) = dotted_name(toks, i) else {
        return Ok(None);
    };
    if !is_name(toks, i, "import") {
        return Ok(None);
    }
    if !policy::is_import_allowed(&module) {
        return Err(Violation::new(line, format!("import from `{module}` is not allowed")));
    }
    i += 1;
    let parenthesized = toks.get(i).map(|t| &t.tok) == Some(&Tok::LParen);
    if parenthesized {
        i += 1;
    }
    loop {
        match toks.get(i).map(|t| &t.tok) {
            Some(Tok::Name(n)) => {
                let item_line = line_at(toks, i, line);
                if policy::is_attribute_denied(n) || policy::DENIED_BUILTINS.contains(&n.as_str())
                {
                    return Err(Violation::new(
                        item_line,
                        format!("importing `{n}` from `{module}` is not allowed"),
                    ));
                }
                check_name(n, false, item_line)?;
                if policy::is_import_allowed(&format!("{module}.{n}")) {
                    report.imports.push(format!("{module}.{n}"));
                }
                i += 1;
                if is_name(toks, i, "as") {
                    if let Some(Tok::Name(alias)) = toks.get(i + 1).map(|t| &t.tok) {
                        check_name(alias, false, item_line)?;
                    }
                    i += 2;
                }
            }
            // `from math import *`
            Some(Tok::Other) if !parenthesized => {
                if !policy::is_star_import_allowed(&module) {
                    return Err(Violation::new(
                        line,
                        format!("`from {module} import *` is not allowed; import names explicitly"),
                    ));
                }
                report.imports.push(module.clone());
                return Ok(Some(i + 1));
            }
            _ => return Err(Violation::new(line, "malformed import statement")),
        }
        match toks.get(i).map(|t| &t.tok) {
            Some(Tok::Comma) => {
                i += 1;
                if parenthesized && toks.get(i).map(|t| &t.tok) == Some(&Tok::RParen) {
                    return Ok(Some(i + 1));
                }
            }
            Some(Tok::RParen) if parenthesized => return Ok(Some(i + 1)),
            _ if !parenthesized => return Ok(Some(i)),
            _ => return Err(Violation::new(line, "malformed import statement")),
        }
    }
}
