//! String primops, plus `toString` (dispatched separately since it takes
//! any value, not just strings).

use crate::context::StringContext;
use crate::eval::{CoercionMode, Evaluator};
use crate::exception::{EvalError, EvalResult};
use crate::pos::PosIdx;
use crate::value::{NixString, Value};

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::StringLength => string_length(ev, args[0].clone(), pos),
        PrimOp::Substring => substring(ev, args[0].clone(), args[1].clone(), args[2].clone(), pos),
        PrimOp::ConcatStringsSep => concat_strings_sep(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::ReplaceStrings => replace_strings(ev, args[0].clone(), args[1].clone(), args[2].clone(), pos),
        PrimOp::Split => split(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Match => match_(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::HashString => hash_string(ev, args[0].clone(), args[1].clone(), pos),
        _ => unreachable!("strings::call only handles its own PrimOp variants"),
    }
}

pub fn to_string_builtin(ev: &mut Evaluator, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.coerce_to_string(args[0].clone(), CoercionMode::ToString, pos)?;
    Ok(Value::String(s))
}

fn string_length(ev: &mut Evaluator, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.coerce_to_string(s, CoercionMode::ToString, pos)?;
    Ok(Value::Int(s.as_str().len() as i64))
}

/// `substring start len s`: a negative or overlong `len` means "to the end
/// of the string", and `start` past the end yields an empty string rather
/// than erroring, matching Nix's own tolerant `substring`.
fn substring(ev: &mut Evaluator, start: Value, len: Value, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let start = ev.force_int(start, pos)?;
    let len = ev.force_int(len, pos)?;
    let s = ev.force_string(s, pos)?;
    let text = s.as_str();
    if start < 0 {
        return Err(EvalError::custom(pos, "substring: start must not be negative"));
    }
    let start = (start as usize).min(text.len());
    let end = if len < 0 { text.len() } else { start.saturating_add(len as usize).min(text.len()) };
    let sliced = char_boundary_slice(text, start, end);
    Ok(Value::String(NixString::new(sliced, s.context().clone())))
}

/// Clamps `start`/`end` to the nearest char boundary rather than panicking,
/// since `substring` operates on Nix strings which may be arbitrary UTF-8
/// and the byte offsets a caller passes need not land on a boundary.
fn char_boundary_slice(text: &str, start: usize, end: usize) -> String {
    let mut start = start.min(text.len());
    let mut end = end.min(text.len());
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    if start > end {
        return String::new();
    }
    text[start..end].to_string()
}

fn concat_strings_sep(ev: &mut Evaluator, sep: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let sep = ev.coerce_to_string(sep, CoercionMode::ToString, pos)?;
    let items = ev.force_list(list, pos)?;
    let mut parts = Vec::with_capacity(items.len());
    let mut context = StringContext::new();
    for item in items.iter() {
        let s = ev.coerce_to_string(item.clone(), CoercionMode::ToString, pos)?;
        context = context.union(s.context());
        parts.push(s.as_str().to_string());
    }
    Ok(Value::String(NixString::new(parts.join(sep.as_str()), context)))
}

fn replace_strings(ev: &mut Evaluator, from: Value, to: Value, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let from_list = ev.force_list(from, pos)?;
    let to_list = ev.force_list(to, pos)?;
    let s = ev.force_string(s, pos)?;
    let mut patterns = Vec::with_capacity(from_list.len());
    let mut context = s.context().clone();
    for (f, t) in from_list.iter().zip(to_list.iter()) {
        let f = ev.force_string(f.clone(), pos)?;
        let t = ev.coerce_to_string(t.clone(), CoercionMode::ToString, pos)?;
        context = context.union(t.context());
        patterns.push((f.as_str().to_string(), t.as_str().to_string()));
    }
    let text = s.as_str();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    'outer: while i <= text.len() {
        for (pat, replacement) in &patterns {
            if pat.is_empty() {
                continue;
            }
            if text[i..].starts_with(pat.as_str()) {
                out.push_str(replacement);
                i += pat.len();
                continue 'outer;
            }
        }
        // An empty pattern in `from` matches at every position, including
        // between every other match, the way Nix's replaceStrings does.
        if let Some((_, replacement)) = patterns.iter().find(|(pat, _)| pat.is_empty()) {
            out.push_str(replacement);
        }
        if i == text.len() {
            break;
        }
        let ch = text[i..].chars().next().expect("i < text.len()");
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(Value::String(NixString::new(out, context)))
}

/// `builtins.match` anchors its pattern at both ends, unlike `split`, which
/// searches anywhere in the string.
fn compile_anchored_regex(pattern: &NixString, pos: PosIdx) -> EvalResult<regex::Regex> {
    regex::Regex::new(&format!("^(?:{})$", pattern.as_str()))
        .map_err(|e| EvalError::custom(pos, format!("invalid regex '{}': {e}", pattern.as_str())))
}

/// Splits `s` on every match of `regex`, returning a list that alternates
/// literal segments (strings) with the capture groups of each match (a list
/// of strings, or `null` for a group that didn't participate) — the exact
/// odd/even shape Nix's `builtins.split` returns.
fn split(ev: &mut Evaluator, s: Value, pattern: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(s, pos)?;
    let pattern = ev.force_string(pattern, pos)?;
    let re = regex::Regex::new(pattern.as_str())
        .map_err(|e| EvalError::custom(pos, format!("invalid regex '{}': {e}", pattern.as_str())))?;
    let text = s.as_str();
    let mut out = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always matches");
        out.push(Value::string(&text[last..whole.start()]));
        let groups: Vec<Value> = caps
            .iter()
            .skip(1)
            .map(|g| match g {
                Some(m) => Value::string(m.as_str()),
                None => Value::Null,
            })
            .collect();
        out.push(Value::list(groups));
        last = whole.end();
    }
    out.push(Value::string(&text[last..]));
    Ok(Value::list(out))
}

/// `null` if `regex` (anchored at both ends) doesn't match the whole
/// string; otherwise the list of capture groups, same `null`-for-absent
/// convention as `split`.
fn match_(ev: &mut Evaluator, s: Value, pattern: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(s, pos)?;
    let pattern = ev.force_string(pattern, pos)?;
    let re = compile_anchored_regex(&pattern, pos)?;
    match re.captures(s.as_str()) {
        Some(caps) => {
            let groups: Vec<Value> = caps
                .iter()
                .skip(1)
                .map(|g| match g {
                    Some(m) => Value::string(m.as_str()),
                    None => Value::Null,
                })
                .collect();
            Ok(Value::list(groups))
        }
        None => Ok(Value::Null),
    }
}

fn hash_string(ev: &mut Evaluator, algo: Value, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let algo = ev.force_string(algo, pos)?;
    let s = ev.force_string(s, pos)?;
    match hash_bytes(algo.as_str(), s.as_str().as_bytes()) {
        Some(digest) => Ok(Value::string(digest)),
        None => Err(EvalError::custom(pos, format!("unknown hash algorithm '{}'", algo.as_str()))),
    }
}

/// Shared by `builtins.hashString` and `builtins.hashFile`: both just need
/// a name-to-algorithm lookup over already-in-hand bytes.
pub(super) fn hash_bytes(algo: &str, bytes: &[u8]) -> Option<String> {
    use md5::Digest as _;
    match algo {
        "md5" => Some(hex(&md5::Md5::digest(bytes))),
        "sha1" => Some(hex(&sha1::Sha1::digest(bytes))),
        "sha256" => Some(hex(&sha2::Sha256::digest(bytes))),
        "sha512" => Some(hex(&sha2::Sha512::digest(bytes))),
        _ => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EvalSettings;
    use crate::source::MemorySourceResolver;
    use crate::store::NullStore;

    fn new_evaluator() -> Evaluator {
        Evaluator::new(EvalSettings::unrestricted(), NullStore, MemorySourceResolver::new())
    }

    #[test]
    fn string_length_counts_bytes() {
        let mut ev = new_evaluator();
        let v = string_length(&mut ev, Value::string("hello"), PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn substring_clamps_overlong_length() {
        let mut ev = new_evaluator();
        let v = substring(&mut ev, Value::Int(1), Value::Int(100), Value::string("abcdef"), PosIdx::NONE).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_str() == "bcdef"));
    }

    #[test]
    fn concat_strings_sep_joins_with_separator() {
        let mut ev = new_evaluator();
        let list = Value::list(vec![Value::string("a"), Value::string("b")]);
        let v = concat_strings_sep(&mut ev, Value::string(","), list, PosIdx::NONE).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_str() == "a,b"));
    }

    #[test]
    fn replace_strings_substitutes_all_occurrences() {
        let mut ev = new_evaluator();
        let from = Value::list(vec![Value::string("a")]);
        let to = Value::list(vec![Value::string("b")]);
        let v = replace_strings(&mut ev, from, to, Value::string("banana"), PosIdx::NONE).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_str() == "bbnbnb"));
    }

    #[test]
    fn match_returns_null_when_not_fully_matched() {
        let mut ev = new_evaluator();
        let v = match_(&mut ev, Value::string("xfoo"), Value::string("foo"), PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Null));
    }

    #[test]
    fn hash_string_sha256_matches_known_digest() {
        let mut ev = new_evaluator();
        let v = hash_string(&mut ev, Value::string("sha256"), Value::string(""), PosIdx::NONE).unwrap();
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert!(matches!(&v, Value::String(s) if s.as_str() == expected));
    }
}
