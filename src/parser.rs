//! The hand-written recursive-descent/precedence-climbing parser: turns a
//! token stream into the [`crate::expr`] AST.
//!
//! Grounded in `lix`'s own hand-written parser split
//! (`lix/libexpr/parser/state.hh`, `parser-impl1.inc.cc`): no
//! parser-generator crate is used, matching the lexer. Arithmetic and
//! comparison operators are desugared into [`Expr::Call`] nodes invoking the
//! matching builtin right here, at parse time — see `expr.rs`'s module doc
//! comment for why.
//!
//! Static scoping (variable resolution, lambda frame sizes, `with` levels)
//! is deliberately *not* this module's job: the parser only shapes the tree
//! and fills in everything it can compute without scope information
//! (`inherit_from_slots`, attrpath desugaring, operator desugaring). Cells
//! that depend on lexical context (`VarResolution`, `ExprWith::level`)
//! are left at their default and filled in by `resolve.rs`.

use std::cell::Cell;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use crate::expr::{
    AttrDef, AttrDefKind, AttrPathSegment, BinOp, DynamicAttrDef, Expr, ExprAssert, ExprAttrs,
    ExprBinOp, ExprCall, ExprConcatStrings, ExprIf, ExprInheritFrom, ExprLambda, ExprLet,
    ExprList, ExprOpHasAttr, ExprOpNot, ExprPos, ExprSelect, ExprVar, ExprWith, Formal, Pattern,
    StringPart, VarResolution,
};
use crate::intern::{Symbol, SymbolTable};
use crate::lexer::{StringPiece, Token};
use crate::pos::PosIdx;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: PosIdx,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

/// Parses one origin's full token stream into a single root expression.
///
/// `origin_idx`/`base_dir` are used to register source positions and to
/// resolve relative path literals the same way `lix` does: lexically,
/// against the directory the expression was loaded from, with no
/// filesystem access.
pub fn parse(
    tokens: &[(Token, u32)],
    origin_idx: u32,
    base_dir: &Path,
    positions: &mut crate::pos::PosTable,
    symbols: &mut SymbolTable,
) -> PResult<Rc<Expr>> {
    let mut parser = Parser { tokens, pos: 0, origin_idx, base_dir, positions, symbols };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        let at = parser.current_offset();
        return Err(parser.err_at(at, "unexpected trailing tokens after expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [(Token, u32)],
    pos: usize,
    origin_idx: u32,
    base_dir: &'a Path,
    positions: &'a mut crate::pos::PosTable,
    symbols: &'a mut SymbolTable,
}

/// The result of parsing one attribute name: either resolved to a `Symbol`
/// at parse time (identifiers and non-interpolated string literals) or a
/// genuinely dynamic expression (`${...}` or an interpolated string key).
enum AttrName {
    Static(Symbol),
    Dynamic(Rc<Expr>),
}

/// One binding collected while scanning an attrset/`let` body, before the
/// final `inherit (expr) ...` displacement offsets are known (they depend on
/// the total named-binding count, only known once the whole body has been
/// read).
enum RawEntry {
    Plain { name: Symbol, value: Rc<Expr>, pos: PosIdx },
    Inherited { name: Symbol, pos: PosIdx },
    InheritFrom { clause: u16, name: Symbol, pos: PosIdx },
}

impl<'a> Parser<'a> {
    fn peek_tok(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at_tok(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn current_offset(&self) -> u32 {
        self.tokens.get(self.pos).map_or_else(
            || self.tokens.last().map_or(0, |(_, o)| *o + 1),
            |(_, o)| *o,
        )
    }

    fn bump(&mut self) -> Token {
        let (tok, _) = &self.tokens[self.pos];
        self.pos += 1;
        tok.clone()
    }

    fn mark_pos(&mut self) -> PosIdx {
        let offset = self.current_offset();
        self.positions.add(self.origin_idx, offset)
    }

    fn pos_at(&mut self, offset: u32) -> PosIdx {
        self.positions.add(self.origin_idx, offset)
    }

    fn err_at(&mut self, offset: u32, message: impl Into<String>) -> ParseError {
        let pos = self.pos_at(offset);
        ParseError { message: message.into(), pos }
    }

    fn err_here(&mut self, message: impl Into<String>) -> ParseError {
        let offset = self.current_offset();
        self.err_at(offset, message)
    }

    fn expect(&mut self, wanted: &Token, what: &str) -> PResult<PosIdx> {
        let pos = self.mark_pos();
        if std::mem::discriminant(self.peek_tok().unwrap_or(wanted)) == std::mem::discriminant(wanted)
            && self.peek_tok().is_some()
        {
            self.pos += 1;
            Ok(pos)
        } else {
            Err(self.err_here(format!("expected {what}")))
        }
    }

    fn eat(&mut self, want: impl Fn(&Token) -> bool) -> bool {
        if self.peek_tok().is_some_and(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn intern(&mut self, s: &str) -> Symbol {
        self.symbols.intern(s)
    }

    fn new_var(&self, name: Symbol, pos: PosIdx) -> Rc<Expr> {
        Rc::new(Expr::Var(ExprVar { name, pos, resolution: Cell::new(VarResolution::Unresolved) }))
    }

    fn builtin_call(&mut self, name: &str, args: Vec<Rc<Expr>>, pos: PosIdx) -> Rc<Expr> {
        let sym = self.intern(name);
        Rc::new(Expr::Call(ExprCall { function: self.new_var(sym, pos), args, pos }))
    }

    // ----------------------------------------------------------------
    // Top level: constructs with their own keyword, plus lambda lookahead.
    // ----------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Rc<Expr>> {
        match self.peek_tok() {
            Some(Token::If) => self.parse_if(),
            Some(Token::Assert) => self.parse_assert(),
            Some(Token::With) => self.parse_with(),
            Some(Token::Let) => self.parse_let(),
            _ => {
                if self.looks_like_lambda() {
                    self.parse_lambda()
                } else {
                    self.parse_impl()
                }
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Rc<Expr>> {
        self.bump(); // if
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "`then`")?;
        let then = self.parse_expr()?;
        self.expect(&Token::Else, "`else`")?;
        let else_ = self.parse_expr()?;
        Ok(Rc::new(Expr::If(ExprIf { cond, then, else_ })))
    }

    fn parse_assert(&mut self) -> PResult<Rc<Expr>> {
        let pos = self.mark_pos();
        self.bump(); // assert
        let cond = self.parse_expr()?;
        self.expect(&Token::Semi, "`;`")?;
        let body = self.parse_expr()?;
        Ok(Rc::new(Expr::Assert(ExprAssert { cond, body, pos })))
    }

    fn parse_with(&mut self) -> PResult<Rc<Expr>> {
        let pos = self.mark_pos();
        self.bump(); // with
        let attrs = self.parse_expr()?;
        self.expect(&Token::Semi, "`;`")?;
        let body = self.parse_expr()?;
        Ok(Rc::new(Expr::With(ExprWith { attrs, body, pos, level: Cell::new(0) })))
    }

    /// `let a = 1; in body` and the legacy `let { a = 1; body = ...; }` form
    /// (desugared unconditionally to `(rec { ... }).body`, since this crate
    /// has no dedicated settings flag for the deprecation — see `DESIGN.md`).
    fn parse_let(&mut self) -> PResult<Rc<Expr>> {
        self.bump(); // let
        if self.peek_tok().is_some_and(|t| matches!(t, Token::LBrace)) {
            let pos = self.mark_pos();
            let attrs_expr = self.parse_attrset_body(true, pos)?;
            let body_sym = self.intern("body");
            return Ok(Rc::new(Expr::Select(ExprSelect {
                expr: attrs_expr,
                path: vec![AttrPathSegment::Symbol(body_sym)],
                default: None,
                pos,
            })));
        }

        let (entries, inherit_from_exprs) = self.parse_bindings(false)?;
        self.expect(&Token::In, "`in`")?;
        let body = self.parse_expr()?;
        let (attrs, inherit_from_slots) = finalize_entries(entries, true, inherit_from_exprs.len());
        let frame_size = attrs.len() as u16 + inherit_from_slots;
        Ok(Rc::new(Expr::Let(ExprLet {
            attrs,
            body,
            inherit_from_exprs,
            inherit_from_slots: Cell::new(inherit_from_slots),
            frame_size: Cell::new(frame_size),
        })))
    }

    /// Whether the tokens starting here form a lambda pattern (`x: ...`,
    /// `{ ... }: ...`, `{ ... } @ name: ...`, `name @ { ... }: ...`) rather
    /// than some other expression (a bare variable, an attrset literal).
    fn looks_like_lambda(&self) -> bool {
        match self.peek_tok() {
            Some(Token::Identifier(_)) => matches!(
                self.peek_at_tok(1),
                Some(Token::Colon) | Some(Token::At)
            ),
            Some(Token::LBrace) => self.scan_past_attrs_pattern().is_some(),
            _ => false,
        }
    }

    /// From a `{` at the current position, scans forward past the balanced
    /// `}` and returns the index just after it if what follows makes this a
    /// lambda pattern (`:` or `@ name :`), or `None` if it's an ordinary
    /// attrset literal.
    fn scan_past_attrs_pattern(&self) -> Option<usize> {
        let mut i = self.pos;
        debug_assert!(matches!(self.tokens.get(i).map(|(t, _)| t), Some(Token::LBrace)));
        let mut depth = 0i32;
        loop {
            match self.tokens.get(i).map(|(t, _)| t) {
                Some(Token::LBrace) => depth += 1,
                Some(Token::RBrace) => {
                    depth -= 1;
                    if depth == 0 {
                        i += 1;
                        break;
                    }
                }
                None => return None,
                _ => {}
            }
            i += 1;
        }
        match self.tokens.get(i).map(|(t, _)| t) {
            Some(Token::Colon) => Some(i),
            Some(Token::At) => Some(i),
            _ => None,
        }
    }

    fn parse_lambda(&mut self) -> PResult<Rc<Expr>> {
        let pos = self.mark_pos();
        let pattern = self.parse_pattern()?;
        self.expect(&Token::Colon, "`:`")?;
        let body = self.parse_expr()?;
        let frame_size = match &pattern {
            Pattern::Simple { .. } => 1,
            Pattern::Attrs { formals, alias, .. } => {
                formals.len() as u16 + u16::from(alias.is_some())
            }
        };
        Ok(Rc::new(Expr::Lambda(ExprLambda {
            pattern,
            body,
            pos,
            frame_size: Cell::new(frame_size),
            name: Cell::new(Symbol::ABSENT),
        })))
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        match self.peek_tok() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                let pos = self.mark_pos();
                self.bump();
                let sym = self.intern(&name);
                if self.eat(|t| matches!(t, Token::At)) {
                    self.expect(&Token::LBrace, "`{`")?;
                    let (formals, ellipsis) = self.parse_formals()?;
                    return Ok(Pattern::Attrs { formals, ellipsis, alias: Some(sym) });
                }
                Ok(Pattern::Simple { name: sym, pos })
            }
            Some(Token::LBrace) => {
                self.bump();
                let (formals, ellipsis) = self.parse_formals()?;
                let alias = if self.eat(|t| matches!(t, Token::At)) {
                    match self.bump() {
                        Token::Identifier(name) => Some(self.intern(&name)),
                        _ => return Err(self.err_here("expected identifier after `@`")),
                    }
                } else {
                    None
                };
                Ok(Pattern::Attrs { formals, ellipsis, alias })
            }
            _ => Err(self.err_here("expected a lambda pattern")),
        }
    }

    /// Parses `a, b ? default, ...` up to (and consuming) the closing `}`.
    /// The opening `{` has already been consumed by the caller. Formals are
    /// sorted by `Symbol` id and checked for duplicates, per
    /// `StaticEnv`/`Pattern::Attrs`'s documented invariant.
    fn parse_formals(&mut self) -> PResult<(Vec<Formal>, bool)> {
        let mut formals = Vec::new();
        let mut ellipsis = false;
        if self.eat(|t| matches!(t, Token::RBrace)) {
            return Ok((formals, ellipsis));
        }
        loop {
            if self.eat(|t| matches!(t, Token::Ellipsis)) {
                ellipsis = true;
                self.expect(&Token::RBrace, "`}`")?;
                break;
            }
            let pos = self.mark_pos();
            let name = match self.bump() {
                Token::Identifier(name) => self.intern(&name),
                _ => return Err(self.err_here("expected a formal argument name")),
            };
            let default = if self.eat(|t| matches!(t, Token::Question)) {
                Some(self.parse_impl()?)
            } else {
                None
            };
            formals.push(Formal { name, default, pos });
            if self.eat(|t| matches!(t, Token::Comma)) {
                continue;
            }
            self.expect(&Token::RBrace, "`}` or `,`")?;
            break;
        }
        formals.sort_by_key(|f| f.name);
        for pair in formals.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(self.err_at(0, format!("duplicate formal argument `{}`", self.symbols.get(pair[0].name))));
            }
        }
        Ok((formals, ellipsis))
    }

    // ----------------------------------------------------------------
    // Operator precedence chain, loosest to tightest (spec.md 4.3):
    // `->`, `||`, `&&`, `== !=`, `< > <= >=`, `//`, `!`, `+ -`, `* /`,
    // `++`, `?`, `|> <|`, unary `-`, application, `.`.
    // ----------------------------------------------------------------

    fn parse_impl(&mut self) -> PResult<Rc<Expr>> {
        let lhs = self.parse_or()?;
        if self.peek_tok().is_some_and(|t| matches!(t, Token::Impl)) {
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_impl()?; // right-assoc
            return Ok(Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Impl, lhs, rhs, pos })));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> PResult<Rc<Expr>> {
        let mut lhs = self.parse_and()?;
        while self.peek_tok().is_some_and(|t| matches!(t, Token::OrOr)) {
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Or, lhs, rhs, pos }));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Rc<Expr>> {
        let mut lhs = self.parse_eq()?;
        while self.peek_tok().is_some_and(|t| matches!(t, Token::AndAnd)) {
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_eq()?;
            lhs = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::And, lhs, rhs, pos }));
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> PResult<Rc<Expr>> {
        let lhs = self.parse_cmp()?;
        match self.peek_tok() {
            Some(Token::EqEq) => {
                let pos = self.mark_pos();
                self.bump();
                let rhs = self.parse_cmp()?;
                Ok(Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Eq, lhs, rhs, pos })))
            }
            Some(Token::NotEq) => {
                let pos = self.mark_pos();
                self.bump();
                let rhs = self.parse_cmp()?;
                Ok(Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::NotEq, lhs, rhs, pos })))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_cmp(&mut self) -> PResult<Rc<Expr>> {
        let lhs = self.parse_update()?;
        let (op_tok, builtin) = match self.peek_tok() {
            Some(Token::Lt) => (Token::Lt, "lt"),
            Some(Token::Gt) => (Token::Gt, "gt"),
            Some(Token::Le) => (Token::Le, "le"),
            Some(Token::Ge) => (Token::Ge, "ge"),
            _ => return Ok(lhs),
        };
        let pos = self.mark_pos();
        self.bump();
        let rhs = self.parse_update()?;
        let less_than = self.intern("__lessThan");
        let less_call = |p: &mut Self, a: Rc<Expr>, b: Rc<Expr>| {
            Rc::new(Expr::Call(ExprCall { function: p.new_var(less_than, pos), args: vec![a, b], pos }))
        };
        Ok(match op_tok {
            Token::Lt => less_call(self, lhs, rhs),
            Token::Gt => less_call(self, rhs, lhs),
            Token::Le => Rc::new(Expr::OpNot(ExprOpNot { expr: less_call(self, rhs, lhs) })),
            Token::Ge => Rc::new(Expr::OpNot(ExprOpNot { expr: less_call(self, lhs, rhs) })),
            _ => unreachable!("{builtin}"),
        })
    }

    fn parse_update(&mut self) -> PResult<Rc<Expr>> {
        let lhs = self.parse_not()?;
        if self.peek_tok().is_some_and(|t| matches!(t, Token::Update)) {
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_update()?; // right-assoc
            return Ok(Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Update, lhs, rhs, pos })));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<Rc<Expr>> {
        if self.peek_tok().is_some_and(|t| matches!(t, Token::Not)) {
            self.bump();
            let expr = self.parse_not()?;
            return Ok(Rc::new(Expr::OpNot(ExprOpNot { expr })));
        }
        self.parse_add()
    }

    fn parse_add(&mut self) -> PResult<Rc<Expr>> {
        let mut lhs = self.parse_mul()?;
        loop {
            match self.peek_tok() {
                Some(Token::Plus) => {
                    let pos = self.mark_pos();
                    self.bump();
                    let rhs = self.parse_mul()?;
                    lhs = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Add, lhs, rhs, pos }));
                }
                Some(Token::Minus) => {
                    let pos = self.mark_pos();
                    self.bump();
                    let rhs = self.parse_mul()?;
                    lhs = self.builtin_call("__sub", vec![lhs, rhs], pos);
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> PResult<Rc<Expr>> {
        let mut lhs = self.parse_concat()?;
        loop {
            let name = match self.peek_tok() {
                Some(Token::Star) => "__mul",
                Some(Token::Slash) => "__div",
                _ => break,
            };
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_concat()?;
            lhs = self.builtin_call(name, vec![lhs, rhs], pos);
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> PResult<Rc<Expr>> {
        let lhs = self.parse_has_attr()?;
        if self.peek_tok().is_some_and(|t| matches!(t, Token::Concat)) {
            let pos = self.mark_pos();
            self.bump();
            let rhs = self.parse_concat()?; // right-assoc
            return Ok(Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::ConcatLists, lhs, rhs, pos })));
        }
        Ok(lhs)
    }

    fn parse_has_attr(&mut self) -> PResult<Rc<Expr>> {
        let expr = self.parse_pipe()?;
        if self.eat(|t| matches!(t, Token::Question)) {
            let path = self.parse_attr_path()?;
            return Ok(Rc::new(Expr::OpHasAttr(ExprOpHasAttr { expr, path })));
        }
        Ok(expr)
    }

    fn parse_pipe(&mut self) -> PResult<Rc<Expr>> {
        let mut lhs = self.parse_unary_minus()?;
        loop {
            match self.peek_tok() {
                Some(Token::PipeRight) => {
                    let pos = self.mark_pos();
                    self.bump();
                    let rhs = self.parse_unary_minus()?;
                    lhs = Rc::new(Expr::Call(ExprCall { function: rhs, args: vec![lhs], pos }));
                }
                Some(Token::PipeLeft) => {
                    let pos = self.mark_pos();
                    self.bump();
                    let rhs = self.parse_pipe()?; // right-assoc
                    return Ok(Rc::new(Expr::Call(ExprCall { function: lhs, args: vec![rhs], pos })));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_unary_minus(&mut self) -> PResult<Rc<Expr>> {
        if self.peek_tok().is_some_and(|t| matches!(t, Token::Minus)) {
            let pos = self.mark_pos();
            self.bump();
            let operand = self.parse_unary_minus()?;
            return Ok(self.builtin_call("__sub", vec![Rc::new(Expr::Int(0)), operand], pos));
        }
        self.parse_app()
    }

    fn parse_app(&mut self) -> PResult<Rc<Expr>> {
        let mut func = self.parse_select()?;
        let pos = func.pos();
        let mut args = Vec::new();
        while self.can_start_atom() {
            args.push(self.parse_select()?);
        }
        if args.is_empty() {
            return Ok(func);
        }
        func = Rc::new(Expr::Call(ExprCall { function: func, args, pos }));
        Ok(func)
    }

    fn can_start_atom(&self) -> bool {
        matches!(
            self.peek_tok(),
            Some(
                Token::Int(_)
                    | Token::Float(_)
                    | Token::Identifier(_)
                    | Token::Str(_)
                    | Token::Path(_)
                    | Token::SearchPath(_)
                    | Token::True
                    | Token::False
                    | Token::Null
                    | Token::LParen
                    | Token::LBrace
                    | Token::LBracket
                    | Token::Rec
            )
        )
    }

    fn parse_select(&mut self) -> PResult<Rc<Expr>> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(|t| matches!(t, Token::Dot)) {
                let pos = expr.pos();
                let path = self.parse_attr_path()?;
                let default = if self.is_or_keyword() {
                    self.bump();
                    Some(self.parse_select()?)
                } else {
                    None
                };
                expr = Rc::new(Expr::Select(ExprSelect { expr, path, default, pos }));
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn is_or_keyword(&self) -> bool {
        matches!(self.peek_tok(), Some(Token::Identifier(s)) if s.as_ref() == "or")
    }

    fn parse_attr_path(&mut self) -> PResult<Vec<AttrPathSegment>> {
        let mut path = vec![self.parse_attr_path_segment()?];
        while self.peek_tok().is_some_and(|t| matches!(t, Token::Dot)) {
            self.bump();
            path.push(self.parse_attr_path_segment()?);
        }
        Ok(path)
    }

    fn parse_attr_path_segment(&mut self) -> PResult<AttrPathSegment> {
        match self.parse_attr_name()? {
            AttrName::Static(sym) => Ok(AttrPathSegment::Symbol(sym)),
            AttrName::Dynamic(e) => Ok(AttrPathSegment::Dynamic(e)),
        }
    }

    /// Parses one attribute name, used both in `attrpath` position (select,
    /// has-attr) and in binding-key position (attrset/`let` entries).
    /// A plain, non-interpolated string literal resolves to a `Symbol` at
    /// parse time, same as a bare identifier; only `${...}` and interpolated
    /// strings are genuinely dynamic.
    fn parse_attr_name(&mut self) -> PResult<AttrName> {
        match self.peek_tok() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.bump();
                Ok(AttrName::Static(self.intern(&name)))
            }
            Some(Token::Str(_)) => {
                let pos = self.mark_pos();
                let Token::Str(pieces) = self.bump() else { unreachable!() };
                match self.string_pieces_to_static(&pieces) {
                    Some(text) => Ok(AttrName::Static(self.intern(&text))),
                    None => {
                        let parts = self.convert_string_pieces(pieces, pos)?;
                        Ok(AttrName::Dynamic(self.finish_string(parts, pos)))
                    }
                }
            }
            Some(Token::DollarBrace(_)) => {
                let pos = self.mark_pos();
                let Token::DollarBrace(tokens) = self.bump() else { unreachable!() };
                let expr = self.parse_sub_tokens(&tokens)?;
                Ok(AttrName::Dynamic(expr))
            }
            _ => Err(self.err_here("expected an attribute name")),
        }
    }

    fn string_pieces_to_static(&self, pieces: &[StringPiece]) -> Option<String> {
        if pieces.iter().any(|p| matches!(p, StringPiece::Interp(_))) {
            return None;
        }
        let mut out = String::new();
        for p in pieces {
            if let StringPiece::Literal(s) = p {
                out.push_str(s);
            }
        }
        Some(out)
    }

    // ----------------------------------------------------------------
    // Atoms
    // ----------------------------------------------------------------

    fn parse_atom(&mut self) -> PResult<Rc<Expr>> {
        let pos = self.mark_pos();
        match self.peek_tok() {
            Some(Token::Int(n)) => {
                let n = *n;
                self.bump();
                Ok(Rc::new(Expr::Int(n)))
            }
            Some(Token::Float(n)) => {
                let n = *n;
                self.bump();
                Ok(Rc::new(Expr::Float(n)))
            }
            Some(Token::True) => {
                self.bump();
                Ok(Rc::new(Expr::Bool(true)))
            }
            Some(Token::False) => {
                self.bump();
                Ok(Rc::new(Expr::Bool(false)))
            }
            Some(Token::Null) => {
                self.bump();
                Ok(Rc::new(Expr::Null))
            }
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.bump();
                if name.as_ref() == "__curPos" {
                    return Ok(Rc::new(Expr::Pos(ExprPos { pos })));
                }
                let sym = self.intern(&name);
                Ok(self.new_var(sym, pos))
            }
            Some(Token::Str(_)) => {
                let Token::Str(pieces) = self.bump() else { unreachable!() };
                let parts = self.convert_string_pieces(pieces, pos)?;
                Ok(self.finish_string(parts, pos))
            }
            Some(Token::Path(text)) => {
                let text = text.clone();
                self.bump();
                Ok(Rc::new(Expr::Path(Rc::from(self.resolve_path(&text).as_path()))))
            }
            Some(Token::SearchPath(name)) => {
                let name = name.clone();
                self.bump();
                let find_file = self.intern("__findFile");
                let nix_path = self.intern("__nixPath");
                Ok(Rc::new(Expr::Call(ExprCall {
                    function: self.new_var(find_file, pos),
                    args: vec![self.new_var(nix_path, pos), Rc::new(Expr::String(Rc::from(name.as_ref())))],
                    pos,
                })))
            }
            Some(Token::LParen) => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                self.bump();
                let mut elems = Vec::new();
                while !self.peek_tok().is_some_and(|t| matches!(t, Token::RBracket)) {
                    elems.push(self.parse_select_or_app_elem()?);
                }
                self.bump();
                Ok(Rc::new(Expr::List(ExprList { elems })))
            }
            Some(Token::LBrace) => {
                let pos = self.mark_pos();
                self.parse_attrset_body(false, pos)
            }
            Some(Token::Rec) => {
                self.bump();
                let pos = self.mark_pos();
                self.expect(&Token::LBrace, "`{`")?;
                self.parse_attrset_body(true, pos)
            }
            _ => Err(self.err_here("expected an expression")),
        }
    }

    /// List elements bind tighter than application (`[ f a b ]` is a list of
    /// three elements, not `f` applied to `a b`), so each element is parsed
    /// at the `select` level, one atom (plus its postfix path) at a time.
    fn parse_select_or_app_elem(&mut self) -> PResult<Rc<Expr>> {
        self.parse_select()
    }

    fn resolve_path(&self, text: &str) -> PathBuf {
        if let Some(rest) = text.strip_prefix('~') {
            return PathBuf::from(format!("~{rest}"));
        }
        let joined = if text.starts_with('/') {
            PathBuf::from(text)
        } else {
            self.base_dir.join(text)
        };
        normalize_lexically(&joined)
    }

    fn convert_string_pieces(&mut self, pieces: Vec<StringPiece>, pos: PosIdx) -> PResult<Vec<StringPart>> {
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                StringPiece::Literal(s) => parts.push(StringPart::Literal(s)),
                StringPiece::Interp(tokens) => {
                    let expr = self.parse_sub_tokens(&tokens)?;
                    parts.push(StringPart::Interpolation(expr));
                }
            }
        }
        let _ = pos;
        Ok(parts)
    }

    /// Builds the final expression for a string literal: a bare
    /// [`Expr::String`] when there's exactly one literal piece (or none at
    /// all, the empty string), [`Expr::ConcatStrings`] otherwise.
    fn finish_string(&mut self, mut parts: Vec<StringPart>, pos: PosIdx) -> Rc<Expr> {
        if parts.is_empty() {
            return Rc::new(Expr::String(Rc::from("")));
        }
        if parts.len() == 1 {
            if let StringPart::Literal(s) = &parts[0] {
                return Rc::new(Expr::String(Rc::clone(s)));
            }
        }
        if parts.is_empty() {
            parts.push(StringPart::Literal(Rc::from("")));
        }
        Rc::new(Expr::ConcatStrings(ExprConcatStrings { parts, pos }))
    }

    fn parse_sub_tokens(&mut self, tokens: &[(Token, u32)]) -> PResult<Rc<Expr>> {
        let mut sub = Parser {
            tokens,
            pos: 0,
            origin_idx: self.origin_idx,
            base_dir: self.base_dir,
            positions: self.positions,
            symbols: self.symbols,
        };
        let expr = sub.parse_expr()?;
        if sub.pos != sub.tokens.len() {
            let at = sub.current_offset();
            return Err(sub.err_at(at, "unexpected trailing tokens in interpolation"));
        }
        Ok(expr)
    }

    // ----------------------------------------------------------------
    // Attribute sets and bindings (shared by `{ }`, `rec { }`, and `let`).
    // ----------------------------------------------------------------

    /// Parses `{ ... }` starting at the already-marked `{` (consumes it),
    /// through the closing `}`.
    fn parse_attrset_body(&mut self, recursive: bool, pos: PosIdx) -> PResult<Rc<Expr>> {
        self.expect(&Token::LBrace, "`{`")?;
        let (entries, inherit_from_exprs) = self.parse_bindings(true)?;
        self.expect(&Token::RBrace, "`}`")?;

        let mut dynamic_attrs = Vec::new();
        let entries: Vec<RawEntry> = entries
            .into_iter()
            .filter_map(|e| match e {
                RawEntry::Dynamic { name_expr, value_expr, pos } => {
                    dynamic_attrs.push(DynamicAttrDef { name_expr, value_expr, pos });
                    None
                }
                other => Some(other.into_plain()),
            })
            .collect();

        let (attrs, inherit_from_slots) = finalize_entries(entries, recursive, inherit_from_exprs.len());
        Ok(Rc::new(Expr::Attrs(ExprAttrs {
            attrs,
            dynamic_attrs,
            recursive,
            inherit_from_exprs,
            inherit_from_slots: Cell::new(inherit_from_slots),
            pos,
        })))
    }

    /// Parses zero or more bindings (`name = expr;`, `inherit ...;`,
    /// `inherit (expr) ...;`, and — only when `allow_dynamic` — `${e} =
    /// expr;`/`"interp${x}" = expr;`) up to (not including) the terminating
    /// `}`/`in`. Returns the raw entries in textual order alongside the
    /// `inherit (expr)` clause expressions collected along the way.
    fn parse_bindings(&mut self, allow_dynamic: bool) -> PResult<(Vec<RawRecord>, Vec<Rc<Expr>>)> {
        let mut entries = Vec::new();
        let mut inherit_from_exprs: Vec<Rc<Expr>> = Vec::new();
        loop {
            match self.peek_tok() {
                Some(Token::Inherit) => {
                    let pos = self.mark_pos();
                    self.bump();
                    if self.peek_tok().is_some_and(|t| matches!(t, Token::LParen)) {
                        self.bump();
                        let source = self.parse_expr()?;
                        self.expect(&Token::RParen, "`)`")?;
                        let clause = inherit_from_exprs.len() as u16;
                        inherit_from_exprs.push(source);
                        loop {
                            let Some(Token::Identifier(_)) = self.peek_tok() else { break };
                            let npos = self.mark_pos();
                            let Token::Identifier(name) = self.bump() else { unreachable!() };
                            let sym = self.intern(&name);
                            entries.push(RawRecord::InheritFrom { clause, name: sym, pos: npos });
                        }
                    } else {
                        loop {
                            let Some(Token::Identifier(_)) = self.peek_tok() else { break };
                            let npos = self.mark_pos();
                            let Token::Identifier(name) = self.bump() else { unreachable!() };
                            let sym = self.intern(&name);
                            entries.push(RawRecord::Inherited { name: sym, pos: npos });
                        }
                    }
                    let _ = pos;
                    self.expect(&Token::Semi, "`;`")?;
                }
                Some(Token::Identifier(_) | Token::Str(_) | Token::DollarBrace(_)) => {
                    let pos = self.mark_pos();
                    let name = self.parse_attr_name()?;
                    match name {
                        AttrName::Static(sym) => {
                            let value = self.parse_binding_value_path(sym, pos)?;
                            entries.push(RawRecord::Plain { name: sym, value, pos });
                        }
                        AttrName::Dynamic(name_expr) => {
                            if !allow_dynamic {
                                return Err(self.err_at(0, "dynamic attribute names are not allowed in `let`"));
                            }
                            self.expect(&Token::Eq, "`=`")?;
                            let value_expr = self.parse_expr()?;
                            self.expect(&Token::Semi, "`;`")?;
                            entries.push(RawRecord::Dynamic { name_expr, value_expr, pos });
                        }
                    }
                }
                _ => break,
            }
        }
        Ok((entries, inherit_from_exprs))
    }

    /// After `name` in `name = value;` or `name.sub.path = value;`: handles
    /// the dotted-path sugar by nesting a fresh (non-recursive) attrset
    /// literal for every extra path segment, leaving duplicate top-level
    /// names for the resolver to merge (spec.md 4.4).
    fn parse_binding_value_path(&mut self, _first: Symbol, pos: PosIdx) -> PResult<Rc<Expr>> {
        let mut rest_segments = Vec::new();
        while self.peek_tok().is_some_and(|t| matches!(t, Token::Dot)) {
            self.bump();
            rest_segments.push(self.parse_attr_name()?);
        }
        self.expect(&Token::Eq, "`=`")?;
        let value = self.parse_expr()?;
        self.expect(&Token::Semi, "`;`")?;
        if rest_segments.is_empty() {
            return Ok(value);
        }
        let mut built = value;
        for seg in rest_segments.into_iter().rev() {
            built = match seg {
                AttrName::Static(sym) => Rc::new(Expr::Attrs(ExprAttrs {
                    attrs: vec![(sym, AttrDef { kind: AttrDefKind::Plain, value: built, pos, recursive: false })],
                    dynamic_attrs: Vec::new(),
                    recursive: false,
                    inherit_from_exprs: Vec::new(),
                    inherit_from_slots: Cell::new(0),
                    pos,
                })),
                AttrName::Dynamic(name_expr) => Rc::new(Expr::Attrs(ExprAttrs {
                    attrs: Vec::new(),
                    dynamic_attrs: vec![DynamicAttrDef { name_expr, value_expr: built, pos }],
                    recursive: false,
                    inherit_from_exprs: Vec::new(),
                    inherit_from_slots: Cell::new(0),
                    pos,
                })),
            };
        }
        Ok(built)
    }
}

/// A binding collected by [`Parser::parse_bindings`], before dynamic entries
/// are split out by the attrset-only caller.
enum RawRecord {
    Plain { name: Symbol, value: Rc<Expr>, pos: PosIdx },
    Inherited { name: Symbol, pos: PosIdx },
    InheritFrom { clause: u16, name: Symbol, pos: PosIdx },
    Dynamic { name_expr: Rc<Expr>, value_expr: Rc<Expr>, pos: PosIdx },
}

impl RawRecord {
    fn into_plain(self) -> RawEntry {
        match self {
            RawRecord::Plain { name, value, pos } => RawEntry::Plain { name, value, pos },
            RawRecord::Inherited { name, pos } => RawEntry::Inherited { name, pos },
            RawRecord::InheritFrom { clause, name, pos } => RawEntry::InheritFrom { clause, name, pos },
            RawRecord::Dynamic { .. } => unreachable!("dynamic entries are filtered out before this call"),
        }
    }
}

/// Turns the entries collected while scanning an attrset/`let` body into the
/// final `(Symbol, AttrDef)` list plus the inherit-from hidden-frame slot
/// count, now that the total named-binding count (needed to offset
/// `inherit (expr)` displacements) is known.
fn finalize_entries(entries: Vec<RawEntry>, recursive: bool, clause_count: usize) -> (Vec<(Symbol, AttrDef)>, u16) {
    let total_named = entries.len() as u16;
    let base = if recursive { total_named } else { 0 };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let (name, def) = match entry {
            RawEntry::Plain { name, value, pos } => {
                (name, AttrDef { kind: AttrDefKind::Plain, value, pos, recursive })
            }
            RawEntry::Inherited { name, pos } => {
                let var = Rc::new(Expr::Var(ExprVar { name, pos, resolution: Cell::new(VarResolution::Unresolved) }));
                (name, AttrDef { kind: AttrDefKind::Inherited, value: var, pos, recursive })
            }
            RawEntry::InheritFrom { clause, name, pos } => {
                let displacement = base + clause;
                let inherit_expr = Rc::new(Expr::InheritFrom(ExprInheritFrom { displacement, pos }));
                let select = Rc::new(Expr::Select(ExprSelect {
                    expr: inherit_expr,
                    path: vec![AttrPathSegment::Symbol(name)],
                    default: None,
                    pos,
                }));
                (name, AttrDef { kind: AttrDefKind::InheritedFrom, value: select, pos, recursive })
            }
        };
        out.push((name, def));
    }
    (out, clause_count as u16)
}

/// Collapses `.`/`..` components lexically (no filesystem access, no
/// symlink resolution) — `lix` canonicalizes path literals eagerly at parse
/// time, but without a `realpath` syscall here, this crate can only do the
/// lexical half of that (documented in `DESIGN.md`).
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::pos::{Origin, PosTable};

    fn parse_str(src: &str) -> PResult<Rc<Expr>> {
        let tokens = tokenize(src).expect("lex ok");
        let mut positions = PosTable::new();
        let mut symbols = SymbolTable::new();
        let origin = positions.add_origin(Origin::String, Rc::from(src));
        parse(&tokens, origin, Path::new("/"), &mut positions, &mut symbols)
    }

    #[test]
    fn parses_let_in() {
        let expr = parse_str("let x = 1; in x").unwrap();
        assert!(matches!(expr.as_ref(), Expr::Let(_)));
    }

    #[test]
    fn parses_arithmetic_as_builtin_calls() {
        let expr = parse_str("1 + 2 * 3").unwrap();
        let Expr::Call(call) = expr.as_ref() else { panic!("expected call (the + desugars)") };
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn select_or_binds_to_whole_chain() {
        let expr = parse_str("a.b.c or 0").unwrap();
        let Expr::Select(sel) = expr.as_ref() else { panic!("expected select") };
        assert_eq!(sel.path.len(), 3);
        assert!(sel.default.is_some());
    }

    #[test]
    fn parses_simple_lambda() {
        let expr = parse_str("x: x").unwrap();
        assert!(matches!(expr.as_ref(), Expr::Lambda(_)));
    }

    #[test]
    fn parses_attrs_pattern_lambda_vs_attrset_literal() {
        assert!(matches!(parse_str("{ a, b }: a").unwrap().as_ref(), Expr::Lambda(_)));
        assert!(matches!(parse_str("{ a = 1; }").unwrap().as_ref(), Expr::Attrs(_)));
    }

    #[test]
    fn inherit_from_produces_select_over_inherit_from_node() {
        let expr = parse_str("rec { inherit (a) b; }").unwrap();
        let Expr::Attrs(attrs) = expr.as_ref() else { panic!("expected attrs") };
        assert_eq!(attrs.inherit_from_exprs.len(), 1);
        let (_, def) = &attrs.attrs[0];
        assert!(matches!(def.kind, AttrDefKind::InheritedFrom));
    }

    #[test]
    fn dotted_path_binding_desugars_to_nested_attrs() {
        let expr = parse_str("{ a.b = 1; }").unwrap();
        let Expr::Attrs(attrs) = expr.as_ref() else { panic!("expected attrs") };
        let (_, def) = &attrs.attrs[0];
        assert!(matches!(def.value.as_ref(), Expr::Attrs(_)));
    }
}
