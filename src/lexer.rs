//! The hand-written lexer: turns source text into a flat token stream, with
//! enough special handling for strings and paths (whose internal structure
//! the parser can't re-derive from a flat character scan alone) that the
//! parser never has to look at raw bytes itself.
//!
//! No parser-generator or lexer-generator crate is used here — grounded in
//! `lix`'s own hand-written lexer/parser split (`lix/libexpr/parser/`):
//! this crate's dependency list carries nothing from that family either, so
//! a hand-rolled scanner is the aligned choice, not just a stylistic one.
//!
//! String literals are lexed eagerly into their constituent pieces
//! ([`StringPiece::Literal`]/[`StringPiece::Interp`]) rather than emitted as
//! raw text for the parser to re-scan: an interpolation's contents are
//! tokenized right here, recursively, by tracking brace depth the same way
//! `lix`'s own lexer does with its `{`/`}` start-condition stack — the
//! difference is that stack is plain Rust state here instead of a flex
//! scanner's start-condition mechanism.

use std::rc::Rc;

/// One piece of a string literal's contents.
#[derive(Debug, Clone)]
pub enum StringPiece {
    Literal(Rc<str>),
    /// `${expr}`: the interpolated expression's own token stream, each
    /// token paired with its byte offset in the original source so the
    /// parser can register positions for it exactly as it would for any
    /// other token.
    Interp(Vec<(Token, u32)>),
}

/// A lexical token. Keywords and multi-character operators are their own
/// variants rather than `Identifier`/punctuation combinations so the parser
/// never has to compare strings at all once lexing is done.
#[derive(Debug, Clone)]
pub enum Token {
    Int(i64),
    Float(f64),
    Identifier(Rc<str>),
    /// A `"..."` or `''...''` string literal, already split into literal
    /// and interpolated pieces with indentation stripped (for the indented
    /// form) and escapes resolved.
    Str(Vec<StringPiece>),
    /// `./foo`, `/foo/bar`, `~/foo` — stored as written, resolution
    /// relative to the originating file is the parser's job (it knows the
    /// file's directory; the lexer doesn't track that).
    Path(Rc<str>),
    /// `<nixpkgs>`, `<nixpkgs/pkgs>` — the text between the angle brackets.
    SearchPath(Rc<str>),
    /// A bare `${expr}` in attribute-name position (`${x} = 1;`, `a.${x}`) —
    /// distinct from the interpolation pieces inside a [`Token::Str`], which
    /// never reach the parser as a standalone token.
    DollarBrace(Vec<(Token, u32)>),

    If,
    Then,
    Else,
    Assert,
    With,
    Let,
    In,
    Rec,
    Inherit,
    True,
    False,
    Null,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Colon,
    At,
    Question,
    Eq,
    Ellipsis,

    Plus,
    Minus,
    Star,
    Slash,
    Concat,
    Update,
    AndAnd,
    OrOr,
    Impl,
    Not,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    PipeRight,
    PipeLeft,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub pos: u32,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.pos)
    }
}

impl std::error::Error for LexError {}

type LexResult<T> = Result<T, LexError>;

/// Tokenizes an entire source string, top to bottom.
pub fn tokenize(src: &str) -> LexResult<Vec<(Token, u32)>> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    while let Some(spanned) = lexer.next_raw_token()? {
        out.push(spanned);
    }
    Ok(out)
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

const PATH_CHAR_EXTRA: &[u8] = b"._+-";

fn is_path_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || PATH_CHAR_EXTRA.contains(&b)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'\'' || b == b'-'
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> LexError {
        LexError { message: message.into(), pos: pos as u32 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while !self.starts_with("*/") {
                        if self.bump().is_none() {
                            break;
                        }
                    }
                    if self.starts_with("*/") {
                        self.pos += 2;
                    }
                }
                _ => break,
            }
        }
    }

    /// Produces the next token, or `None` at end of input. Shared by the
    /// top-level [`tokenize`] loop and [`Self::tokenize_balanced`] (used
    /// while scanning a string interpolation's contents).
    fn next_raw_token(&mut self) -> LexResult<Option<(Token, u32)>> {
        self.skip_trivia();
        let start = self.pos;
        let Some(b) = self.peek() else { return Ok(None) };

        if b.is_ascii_digit() {
            return Ok(Some((self.lex_number()?, start as u32)));
        }

        if b == b'"' {
            self.pos += 1;
            return Ok(Some((self.lex_simple_string(start)?, start as u32)));
        }
        if self.starts_with("''") {
            self.pos += 2;
            return Ok(Some((self.lex_indented_string(start)?, start as u32)));
        }

        if self.starts_with("...") {
            self.pos += 3;
            return Ok(Some((Token::Ellipsis, start as u32)));
        }

        if b == b'.' && matches!(self.peek_at(1), Some(b'/')) {
            return Ok(Some((self.lex_path()?, start as u32)));
        }
        if b == b'.' && self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'/') {
            return Ok(Some((self.lex_path()?, start as u32)));
        }
        if b == b'~' && self.peek_at(1) == Some(b'/') {
            return Ok(Some((self.lex_path()?, start as u32)));
        }
        if b == b'/' && matches!(self.peek_at(1), Some(c) if is_path_char(c)) {
            return Ok(Some((self.lex_path()?, start as u32)));
        }
        if b == b'<' {
            if let Some(tok) = self.try_lex_search_path()? {
                return Ok(Some((tok, start as u32)));
            }
        }

        if b == b'$' && self.peek_at(1) == Some(b'{') {
            self.pos += 2;
            let tokens = self.tokenize_balanced()?;
            return Ok(Some((Token::DollarBrace(tokens), start as u32)));
        }

        if is_ident_start(b) {
            return Ok(Some((self.lex_ident_or_keyword(), start as u32)));
        }

        macro_rules! op {
            ($len:expr, $tok:expr) => {{
                self.pos += $len;
                return Ok(Some(($tok, start as u32)));
            }};
        }

        match b {
            b'(' => op!(1, Token::LParen),
            b')' => op!(1, Token::RParen),
            b'{' => op!(1, Token::LBrace),
            b'}' => op!(1, Token::RBrace),
            b'[' => op!(1, Token::LBracket),
            b']' => op!(1, Token::RBracket),
            b';' => op!(1, Token::Semi),
            b',' => op!(1, Token::Comma),
            b'.' => op!(1, Token::Dot),
            b':' => op!(1, Token::Colon),
            b'@' => op!(1, Token::At),
            b'?' => op!(1, Token::Question),
            b'+' if self.peek_at(1) == Some(b'+') => op!(2, Token::Concat),
            b'+' => op!(1, Token::Plus),
            b'-' if self.peek_at(1) == Some(b'>') => op!(2, Token::Impl),
            b'-' => op!(1, Token::Minus),
            b'*' => op!(1, Token::Star),
            b'/' if self.peek_at(1) == Some(b'/') => op!(2, Token::Update),
            b'/' => op!(1, Token::Slash),
            b'=' if self.peek_at(1) == Some(b'=') => op!(2, Token::EqEq),
            b'=' => op!(1, Token::Eq),
            b'!' if self.peek_at(1) == Some(b'=') => op!(2, Token::NotEq),
            b'!' => op!(1, Token::Not),
            b'<' if self.peek_at(1) == Some(b'=') => op!(2, Token::Le),
            b'<' if self.peek_at(1) == Some(b'|') => op!(2, Token::PipeLeft),
            b'<' => op!(1, Token::Lt),
            b'>' if self.peek_at(1) == Some(b'=') => op!(2, Token::Ge),
            b'>' => op!(1, Token::Gt),
            b'&' if self.peek_at(1) == Some(b'&') => op!(2, Token::AndAnd),
            b'|' if self.peek_at(1) == Some(b'|') => op!(2, Token::OrOr),
            b'|' if self.peek_at(1) == Some(b'>') => op!(2, Token::PipeRight),
            _ => Err(self.error(start, format!("unexpected character '{}'", b as char))),
        }
    }

    fn lex_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = self.pos + 1;
            if matches!(self.bytes.get(lookahead), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if matches!(self.bytes.get(lookahead), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                self.pos = lookahead;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>().map(Token::Float).map_err(|_| self.error(start, "invalid float literal"))
        } else {
            text.parse::<i64>().map(Token::Int).map_err(|_| self.error(start, "integer literal out of range"))
        }
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start = self.pos;
        self.pos += 1;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        match text {
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "assert" => Token::Assert,
            "with" => Token::With,
            "let" => Token::Let,
            "in" => Token::In,
            "rec" => Token::Rec,
            "inherit" => Token::Inherit,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Identifier(Rc::from(text)),
        }
    }

    fn lex_path(&mut self) -> LexResult<Token> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_path_char(c) || c == b'/') {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if text.ends_with('/') {
            return Err(self.error(start, "path literal cannot end with '/'"));
        }
        Ok(Token::Path(Rc::from(text)))
    }

    /// `<nixpkgs>`/`<nixpkgs/pkgs>`. Returns `Ok(None)` (not an error) when
    /// `<` doesn't actually open a search path, so the caller falls back to
    /// ordinary `<`/`<=`/`<|` lexing.
    fn try_lex_search_path(&mut self) -> LexResult<Option<Token>> {
        let save = self.pos;
        self.pos += 1;
        let content_start = self.pos;
        while matches!(self.peek(), Some(c) if is_path_char(c) || c == b'/') {
            self.pos += 1;
        }
        if self.peek() == Some(b'>') && self.pos > content_start {
            let text = &self.src[content_start..self.pos];
            self.pos += 1;
            Ok(Some(Token::SearchPath(Rc::from(text))))
        } else {
            self.pos = save;
            Ok(None)
        }
    }

    fn lex_simple_string(&mut self, _string_start: usize) -> LexResult<Token> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(self.pos, "unterminated string literal")),
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc_pos = self.pos;
                    match self.bump() {
                        Some(b'n') => literal.push('\n'),
                        Some(b'r') => literal.push('\r'),
                        Some(b't') => literal.push('\t'),
                        Some(b'\\') => literal.push('\\'),
                        Some(b'$') => literal.push('$'),
                        Some(b'"') => literal.push('"'),
                        Some(other) => literal.push(other as char),
                        None => return Err(self.error(esc_pos, "unterminated escape sequence")),
                    }
                }
                Some(b'$') if self.peek() == Some(b'{') => {
                    self.pos += 1;
                    if !literal.is_empty() {
                        pieces.push(StringPiece::Literal(Rc::from(literal.as_str())));
                        literal.clear();
                    }
                    let tokens = self.tokenize_balanced()?;
                    pieces.push(StringPiece::Interp(tokens));
                }
                Some(other) => literal.push(other as char),
            }
        }
        if !literal.is_empty() || pieces.is_empty() {
            pieces.push(StringPiece::Literal(Rc::from(literal.as_str())));
        }
        Ok(Token::Str(pieces))
    }

    /// Lexes an indented (`''...''`) string's raw contents (escapes
    /// resolved, interpolations recursively tokenized, but indentation not
    /// yet stripped), then strips common leading whitespace per
    /// [`strip_indentation`].
    fn lex_indented_string(&mut self, _string_start: usize) -> LexResult<Token> {
        let mut raw = Vec::new();
        let mut literal = String::new();
        loop {
            if self.starts_with("'''") {
                self.pos += 3;
                literal.push_str("''");
                continue;
            }
            if self.starts_with("''\\") {
                self.pos += 3;
                let esc_pos = self.pos;
                match self.bump() {
                    Some(b'n') => literal.push('\n'),
                    Some(b'r') => literal.push('\r'),
                    Some(b't') => literal.push('\t'),
                    Some(b'\\') => literal.push('\\'),
                    Some(b'$') => literal.push('$'),
                    Some(other) => literal.push(other as char),
                    None => return Err(self.error(esc_pos, "unterminated escape in indented string")),
                }
                continue;
            }
            if self.starts_with("''$") {
                self.pos += 3;
                literal.push('$');
                continue;
            }
            if self.starts_with("''") {
                self.pos += 2;
                break;
            }
            if self.starts_with("${") {
                self.pos += 2;
                if !literal.is_empty() {
                    raw.push(StringPiece::Literal(Rc::from(literal.as_str())));
                    literal.clear();
                }
                let tokens = self.tokenize_balanced()?;
                raw.push(StringPiece::Interp(tokens));
                continue;
            }
            match self.bump() {
                None => return Err(self.error(self.pos, "unterminated indented string literal")),
                Some(other) => literal.push(other as char),
            }
        }
        if !literal.is_empty() || raw.is_empty() {
            raw.push(StringPiece::Literal(Rc::from(literal.as_str())));
        }
        Ok(Token::Str(strip_indentation(raw)))
    }

    /// Scans tokens (recursively lexing nested strings as needed) until a
    /// `}` is found at brace depth zero, which closes the `${` that invoked
    /// this call. Every `{`/`}` encountered along the way is tracked so an
    /// attribute set literal inside the interpolation doesn't prematurely
    /// end it.
    fn tokenize_balanced(&mut self) -> LexResult<Vec<(Token, u32)>> {
        let mut out = Vec::new();
        let mut depth: i32 = 0;
        loop {
            let start = self.pos;
            match self.next_raw_token()? {
                None => return Err(self.error(start, "unterminated interpolation")),
                Some((Token::LBrace, p)) => {
                    depth += 1;
                    out.push((Token::LBrace, p));
                }
                Some((Token::RBrace, p)) => {
                    if depth == 0 {
                        return Ok(out);
                    }
                    depth -= 1;
                    out.push((Token::RBrace, p));
                }
                Some(tok) => out.push(tok),
            }
        }
    }
}

/// One physical line of an indented string's raw content: a run of pieces
/// with no embedded newline, bracketed by the string's own start/end or by
/// `\n` characters split out of literal pieces.
struct Line {
    pieces: Vec<StringPiece>,
}

impl Line {
    fn leading_whitespace(&self) -> usize {
        match self.pieces.first() {
            Some(StringPiece::Literal(s)) => s.chars().take_while(|c| *c == ' ' || *c == '\t').count(),
            _ => 0,
        }
    }

    fn is_blank(&self) -> bool {
        self.pieces.iter().all(|p| match p {
            StringPiece::Literal(s) => s.chars().all(|c| c == ' ' || c == '\t'),
            StringPiece::Interp(_) => false,
        })
    }

    fn strip_prefix_chars(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(StringPiece::Literal(s)) = self.pieces.first() {
            let take = s.chars().take(n.min(s.chars().count())).count();
            let rest: String = s.chars().skip(take).collect();
            self.pieces[0] = StringPiece::Literal(Rc::from(rest.as_str()));
        }
    }
}

/// Splits a flat `Vec<StringPiece>` on `\n` boundaries inside `Literal`
/// pieces into per-line groups, preserving `Interp` pieces in place.
fn split_into_lines(pieces: Vec<StringPiece>) -> Vec<Line> {
    let mut lines = vec![Vec::new()];
    for piece in pieces {
        match piece {
            StringPiece::Interp(_) => lines.last_mut().unwrap().push(piece),
            StringPiece::Literal(s) => {
                let mut chunks = s.split('\n');
                if let Some(first) = chunks.next() {
                    if !first.is_empty() {
                        lines.last_mut().unwrap().push(StringPiece::Literal(Rc::from(first)));
                    }
                }
                for chunk in chunks {
                    lines.push(Vec::new());
                    if !chunk.is_empty() {
                        lines.last_mut().unwrap().push(StringPiece::Literal(Rc::from(chunk)));
                    }
                }
            }
        }
    }
    lines.into_iter().map(|pieces| Line { pieces }).collect()
}

/// Implements Nix's indented-string (`''...''`) dedentation: the minimum
/// leading-whitespace run across every non-blank line is stripped from
/// every line, and a final all-whitespace line is dropped outright. Blank
/// lines (no content at all, not even whitespace) don't constrain the
/// minimum.
fn strip_indentation(pieces: Vec<StringPiece>) -> Vec<StringPiece> {
    let mut lines = split_into_lines(pieces);

    let min_indent = lines
        .iter()
        .filter(|l| !l.is_blank())
        .map(Line::leading_whitespace)
        .min()
        .unwrap_or(0);

    for line in &mut lines {
        let strip = min_indent.min(line.leading_whitespace());
        line.strip_prefix_chars(strip);
    }

    if let Some(last) = lines.last() {
        if last.is_blank() {
            lines.pop();
        }
    }

    let mut out: Vec<StringPiece> = Vec::new();
    for (i, line) in lines.into_iter().enumerate() {
        if i > 0 {
            push_literal(&mut out, "\n");
        }
        for piece in line.pieces {
            match piece {
                StringPiece::Literal(s) => push_literal(&mut out, &s),
                interp @ StringPiece::Interp(_) => out.push(interp),
            }
        }
    }
    out
}

fn push_literal(out: &mut Vec<StringPiece>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(StringPiece::Literal(last)) = out.last_mut() {
        let mut combined = last.to_string();
        combined.push_str(text);
        *last = Rc::from(combined.as_str());
    } else {
        out.push(StringPiece::Literal(Rc::from(text)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_kinds(src: &str) -> Vec<&'static str> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|(t, _)| match t {
                Token::Int(_) => "int",
                Token::Float(_) => "float",
                Token::Identifier(_) => "ident",
                Token::Str(_) => "str",
                Token::Path(_) => "path",
                Token::SearchPath(_) => "searchpath",
                Token::Let => "let",
                Token::In => "in",
                Token::Eq => "eq",
                Token::Semi => "semi",
                Token::Plus => "plus",
                _ => "other",
            })
            .collect()
    }

    #[test]
    fn lexes_let_in_binding() {
        assert_eq!(token_kinds("let x = 1; in x"), vec!["let", "ident", "eq", "int", "semi", "in", "ident"]);
    }

    #[test]
    fn lexes_float_vs_int() {
        assert_eq!(token_kinds("1 1.5 1e3"), vec!["int", "float", "float"]);
    }

    #[test]
    fn lexes_absolute_path() {
        assert_eq!(token_kinds("/foo/bar"), vec!["path"]);
    }

    #[test]
    fn lexes_search_path() {
        assert_eq!(token_kinds("<nixpkgs>"), vec!["searchpath"]);
    }

    #[test]
    fn simple_string_resolves_escapes() {
        let tokens = tokenize(r#""a\nb""#).unwrap();
        let Token::Str(pieces) = &tokens[0].0 else { panic!("expected string") };
        let StringPiece::Literal(s) = &pieces[0] else { panic!("expected literal") };
        assert_eq!(s.as_ref(), "a\nb");
    }

    #[test]
    fn indented_string_strips_common_indentation() {
        let src = "''\n  a\n  b\n''";
        let tokens = tokenize(src).unwrap();
        let Token::Str(pieces) = &tokens[0].0 else { panic!("expected string") };
        let joined: String = pieces
            .iter()
            .map(|p| match p {
                StringPiece::Literal(s) => s.to_string(),
                StringPiece::Interp(_) => String::new(),
            })
            .collect();
        assert_eq!(joined, "a\nb");
    }

    #[test]
    fn string_interpolation_is_tokenized_recursively() {
        let tokens = tokenize(r#""a${1}b""#).unwrap();
        let Token::Str(pieces) = &tokens[0].0 else { panic!("expected string") };
        assert_eq!(pieces.len(), 3);
        assert!(matches!(&pieces[0], StringPiece::Literal(s) if s.as_ref() == "a"));
        assert!(matches!(&pieces[1], StringPiece::Interp(toks) if matches!(toks[0].0, Token::Int(1))));
        assert!(matches!(&pieces[2], StringPiece::Literal(s) if s.as_ref() == "b"));
    }
}
