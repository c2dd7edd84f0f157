//! Version-string comparison: `compareVersions`, `splitVersion`, and
//! `parseDrvName`, the trio Nixpkgs uses to implement its own `lib.versions`
//! helpers and derivation-name parsing.

use crate::eval::Evaluator;
use crate::exception::EvalResult;
use crate::heap::{Binding, Bindings};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::CompareVersions => compare_versions(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::SplitVersion => split_version(ev, args[0].clone(), pos),
        PrimOp::ParseDrvName => parse_drv_name(ev, args[0].clone(), pos),
        _ => unreachable!("compare::call only handles its own PrimOp variants"),
    }
}

/// Breaks a version string into components the way Nix's own
/// `splitVersion` does: `.` and `-` are separators (dropped), and a run of
/// digits and a run of non-digits are always split apart even without a
/// separator between them (`"1.09a"` -> `["1", "09a"]` but `"2c"` stays
/// split into `["2", "c"]`).
fn split_version_components(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_is_digit: Option<bool> = None;
    for ch in s.chars() {
        if ch == '.' || ch == '-' {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current_is_digit = None;
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        if let Some(prev) = current_is_digit {
            if prev != is_digit {
                out.push(std::mem::take(&mut current));
            }
        }
        current.push(ch);
        current_is_digit = Some(is_digit);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_version(ev: &mut Evaluator, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(s, pos)?;
    let parts = split_version_components(s.as_str());
    Ok(Value::list(parts.into_iter().map(Value::string).collect::<Vec<_>>()))
}

/// Compares two version components the way Nix does: both fully numeric
/// compare as integers, otherwise lexicographically, with a handful of
/// special tokens (`""`, `"pre"`) sorting below everything else to let
/// `"1.0pre1" < "1.0"` hold.
fn compare_component(a: &str, b: &str) -> std::cmp::Ordering {
    fn rank(s: &str) -> i32 {
        match s {
            "" => -2,
            "pre" => -1,
            _ => 0,
        }
    }
    let (ra, rb) = (rank(a), rank(b));
    if ra != 0 || rb != 0 {
        return ra.cmp(&rb);
    }
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn compare_versions(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    let a = ev.force_string(a, pos)?;
    let b = ev.force_string(b, pos)?;
    let pa = split_version_components(a.as_str());
    let pb = split_version_components(b.as_str());
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let ca = pa.get(i).map(String::as_str).unwrap_or("");
        let cb = pb.get(i).map(String::as_str).unwrap_or("");
        match compare_component(ca, cb) {
            std::cmp::Ordering::Less => return Ok(Value::Int(-1)),
            std::cmp::Ordering::Greater => return Ok(Value::Int(1)),
            std::cmp::Ordering::Equal => continue,
        }
    }
    Ok(Value::Int(0))
}

/// Splits a derivation name like `"nix-2.18.1"` into `{ name = "nix";
/// version = "2.18.1"; }`, cutting at the first `-` that is immediately
/// followed by a digit, mirroring `lix`'s `DrvName` parser (a name like
/// `"nix-unstable-2-2.18.1"` splits into `name = "nix-unstable"` at the
/// `-2` boundary, not at the last dash).
fn parse_drv_name(ev: &mut Evaluator, s: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(s, pos)?;
    let text = s.as_str();
    let mut split_at = None;
    for (idx, _) in text.match_indices('-') {
        if let Some(next) = text[idx + 1..].chars().next() {
            if next.is_ascii_digit() {
                split_at = Some(idx);
                break;
            }
        }
    }
    let (name, version) = match split_at {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    };
    let name_sym = ev.symbols.intern("name");
    let version_sym = ev.symbols.intern("version");
    let bindings = vec![
        Binding { name: name_sym, pos, value: Value::string(name) },
        Binding { name: version_sym, pos, value: Value::string(version) },
    ];
    Ok(Value::Attrs(Bindings::build(bindings)))
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
    fn compare_versions_orders_numeric_components() {
        let mut ev = new_evaluator();
        let v = compare_versions(&mut ev, Value::string("1.9"), Value::string("1.10"), PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(-1)));
    }

    #[test]
    fn compare_versions_equal_strings_are_equal() {
        let mut ev = new_evaluator();
        let v = compare_versions(&mut ev, Value::string("1.0"), Value::string("1.0"), PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(0)));
    }

    #[test]
    fn split_version_separates_digit_and_alpha_runs() {
        let mut ev = new_evaluator();
        let v = split_version(&mut ev, Value::string("2.3.1test"), PosIdx::NONE).unwrap();
        let Value::List(items) = v else { panic!("expected list") };
        let parts: Vec<&str> =
            items.iter().map(|v| if let Value::String(s) = v { s.as_str() } else { "" }).collect();
        assert_eq!(parts, vec!["2", "3", "1", "test"]);
    }

    #[test]
    fn parse_drv_name_splits_at_version_dash() {
        let mut ev = new_evaluator();
        let v = parse_drv_name(&mut ev, Value::string("nix-2.18.1"), PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let name_sym = ev.symbols.intern("name");
        assert!(matches!(&a.get(name_sym).unwrap().value, Value::String(s) if s.as_str() == "nix"));
    }
}
