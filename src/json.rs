//! Structured-data conversions: the shared machinery behind
//! `builtins.toJSON`/`fromJSON`/`toXML`/`fromTOML`.
//!
//! None of these need an `Evaluator` — by the time a builtin calls into
//! here, the argument has already been deep-forced (`toJSON`/`toXML`) or is
//! plain host data being turned into a fresh `Value` tree (`fromJSON`,
//! `fromTOML`). Keeping the conversions in one file mirrors the teacher's
//! `json.rs`, which held the same role for its host's `json`/`pickle`
//! interop: one module per wire format, all operating on the same
//! fully-materialized value tree.

use std::rc::Rc;

use serde_json::Value as Json;

use crate::exception::{EvalError, EvalResult};
use crate::heap::{Binding, Bindings};
use crate::intern::SymbolTable;
use crate::pos::PosIdx;
use crate::value::{CanonPath, NixString, Value};

/// Converts a fully-forced `Value` tree into a `serde_json::Value`, the
/// backing implementation of `builtins.toJSON` (stringified by the caller)
/// and the shared representation `toXML` walks as well.
///
/// `value` must not contain any `Value::Thunk` — the caller is responsible
/// for deep-forcing first, the same contract `lix`'s `printValueAsJSON`
/// places on its own caller.
pub fn to_json(value: &Value, symbols: &SymbolTable, pos: PosIdx) -> EvalResult<Json> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => Ok(Json::Number((*i).into())),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| EvalError::custom(pos, "cannot convert NaN or infinite float to JSON")),
        Value::String(s) => Ok(Json::String(s.as_str().to_string())),
        Value::Path(p) => Ok(Json::String(p.as_path().display().to_string())),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(to_json(item, symbols, pos)?);
            }
            Ok(Json::Array(out))
        }
        Value::Attrs(attrs) => {
            let mut map = serde_json::Map::with_capacity(attrs.len());
            for binding in attrs.iter() {
                map.insert(symbols.get(binding.name).to_string(), to_json(&binding.value, symbols, pos)?);
            }
            Ok(Json::Object(map))
        }
        Value::Lambda(_) | Value::PrimOp(_) => {
            Err(EvalError::custom(pos, "cannot convert a function to JSON"))
        }
        Value::External(ext) => ext
            .coerce_to_string()
            .map(|s| Json::String(s.as_str().to_string()))
            .ok_or_else(|| EvalError::custom(pos, format!("cannot convert a {} to JSON", ext.type_name()))),
        Value::Thunk(_) => unreachable!("to_json called on an unforced thunk"),
    }
}

/// Converts a `serde_json::Value` into a `Value` tree, the backing
/// implementation of `builtins.fromJSON`. Interns every object key into
/// `symbols`, since an attrset's bindings are addressed by `Symbol`.
pub fn from_json(json: &Json, symbols: &mut SymbolTable) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::string(s.as_str()),
        Json::Array(items) => {
            let values: Vec<Value> = items.iter().map(|item| from_json(item, symbols)).collect();
            Value::list(values)
        }
        Json::Object(map) => {
            let mut bindings = Vec::with_capacity(map.len());
            for (key, val) in map {
                bindings.push(Binding {
                    name: symbols.intern(key),
                    pos: PosIdx::NONE,
                    value: from_json(val, symbols),
                });
            }
            Value::Attrs(Bindings::build(bindings))
        }
    }
}

/// Renders a fully-forced `Value` tree as the XML document
/// `builtins.toXML` produces, used (historically, in real Nix) to feed
/// `nix-instantiate`'s XML frontend. The element shapes mirror `lix`'s
/// `printValueAsXML`: `<int value="1" />`, `<string value="a" />`,
/// `<list>...</list>`, `<attrs>...</attrs>`, `<function>` for anything
/// uncoercible.
pub fn to_xml(value: &Value, symbols: &SymbolTable) -> String {
    let mut out = String::from("<?xml version='1.0' encoding='utf-8'?>\n<expr>\n");
    write_xml_node(value, symbols, 1, &mut out);
    out.push_str("</expr>\n");
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn write_xml_node(value: &Value, symbols: &SymbolTable, depth: usize, out: &mut String) {
    indent(depth, out);
    match value {
        Value::Null => out.push_str("<null />\n"),
        Value::Bool(b) => out.push_str(&format!("<bool value=\"{b}\" />\n")),
        Value::Int(i) => out.push_str(&format!("<int value=\"{i}\" />\n")),
        Value::Float(f) => out.push_str(&format!("<float value=\"{f}\" />\n")),
        Value::String(s) => out.push_str(&format!("<string value=\"{}\" />\n", xml_escape(s.as_str()))),
        Value::Path(p) => out.push_str(&format!("<path>{}</path>\n", xml_escape(&p.as_path().display().to_string()))),
        Value::List(items) => {
            out.push_str("<list>\n");
            for item in items.iter() {
                write_xml_node(item, symbols, depth + 1, out);
            }
            indent(depth, out);
            out.push_str("</list>\n");
        }
        Value::Attrs(attrs) => {
            out.push_str("<attrs>\n");
            for binding in attrs.iter() {
                indent(depth + 1, out);
                out.push_str(&format!("<attr name=\"{}\">\n", xml_escape(symbols.get(binding.name))));
                write_xml_node(&binding.value, symbols, depth + 2, out);
                indent(depth + 1, out);
                out.push_str("</attr>\n");
            }
            indent(depth, out);
            out.push_str("</attrs>\n");
        }
        Value::Lambda(_) | Value::PrimOp(_) => out.push_str("<function />\n"),
        Value::External(ext) => match ext.coerce_to_string() {
            Some(s) => out.push_str(&format!("<string value=\"{}\" />\n", xml_escape(s.as_str()))),
            None => out.push_str("<unevaluated />\n"),
        },
        Value::Thunk(_) => unreachable!("to_xml called on an unforced thunk"),
    }
}

/// Parses TOML source, the backing implementation of `builtins.fromTOML`.
///
/// Dates and datetimes have no corresponding Nix value and are rejected
/// outright rather than silently downgraded to strings, matching the
/// "dates rejected" rule: a config author relying on a date round-tripping
/// through Nix should see an error, not silent truncation to its text form.
pub fn from_toml(input: &str, symbols: &mut SymbolTable, pos: PosIdx) -> EvalResult<Value> {
    let document: toml_edit::DocumentMut = input
        .parse()
        .map_err(|e: toml_edit::TomlError| EvalError::custom(pos, format!("failed to parse TOML: {e}")))?;
    toml_item_to_value(document.as_item(), symbols, pos)
}

fn toml_item_to_value(item: &toml_edit::Item, symbols: &mut SymbolTable, pos: PosIdx) -> EvalResult<Value> {
    use toml_edit::Item;
    match item {
        Item::None => Ok(Value::Null),
        Item::Value(v) => toml_value_to_value(v, symbols, pos),
        Item::Table(table) => {
            let mut bindings = Vec::with_capacity(table.len());
            for (key, value) in table.iter() {
                bindings.push(Binding {
                    name: symbols.intern(key),
                    pos,
                    value: toml_item_to_value(value, symbols, pos)?,
                });
            }
            Ok(Value::Attrs(Bindings::build(bindings)))
        }
        Item::ArrayOfTables(array) => {
            let mut items = Vec::with_capacity(array.len());
            for table in array.iter() {
                let mut bindings = Vec::with_capacity(table.len());
                for (key, value) in table.iter() {
                    bindings.push(Binding {
                        name: symbols.intern(key),
                        pos,
                        value: toml_item_to_value(value, symbols, pos)?,
                    });
                }
                items.push(Value::Attrs(Bindings::build(bindings)));
            }
            Ok(Value::list(items))
        }
    }
}

fn toml_value_to_value(value: &toml_edit::Value, symbols: &mut SymbolTable, pos: PosIdx) -> EvalResult<Value> {
    use toml_edit::Value as T;
    match value {
        T::String(s) => Ok(Value::string(s.value().as_str())),
        T::Integer(i) => Ok(Value::Int(*i.value())),
        T::Float(f) => Ok(Value::Float(*f.value())),
        T::Boolean(b) => Ok(Value::Bool(*b.value())),
        T::Datetime(_) => Err(EvalError::custom(pos, "TOML dates are not representable as Nix values")),
        T::Array(array) => {
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter() {
                items.push(toml_value_to_value(item, symbols, pos)?);
            }
            Ok(Value::list(items))
        }
        T::InlineTable(table) => {
            let mut bindings = Vec::with_capacity(table.len());
            for (key, value) in table.iter() {
                bindings.push(Binding {
                    name: symbols.intern(key),
                    pos,
                    value: toml_value_to_value(value, symbols, pos)?,
                });
            }
            Ok(Value::Attrs(Bindings::build(bindings)))
        }
    }
}

/// Builds a plain `Value::Path` from a host path string — a small shared
/// helper so `from_json`/`from_toml` callers that need `path`-typed results
/// (none of the wire formats above have a native path type, but a builtin
/// wrapping these conversions sometimes re-tags a string result as a path)
/// don't duplicate the `Rc`/`CanonPath` construction.
pub fn plain_path(s: &str) -> Value {
    Value::Path(CanonPath::new(std::path::Path::new(s)))
}

/// Re-tags a `NixString`, dropping its context — used when a structured-data
/// conversion intentionally discards context (JSON/XML/TOML have no concept
/// of a string's store-path dependencies).
pub fn strip_context(s: &NixString) -> NixString {
    NixString::plain(s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_json_scalars() {
        let mut symbols = SymbolTable::new();
        let value = Value::Int(42);
        let json = to_json(&value, &symbols, PosIdx::NONE).unwrap();
        assert_eq!(json, Json::Number(42.into()));
        let back = from_json(&json, &mut symbols);
        assert!(matches!(back, Value::Int(42)));
    }

    #[test]
    fn json_object_round_trips_through_attrs() {
        let mut symbols = SymbolTable::new();
        let json: Json = serde_json::json!({"a": 1, "b": [true, null]});
        let value = from_json(&json, &mut symbols);
        let back = to_json(&value, &symbols, PosIdx::NONE).unwrap();
        assert_eq!(json, back);
    }

    #[test]
    fn to_json_rejects_functions() {
        use crate::expr::{Expr, ExprLambda, Pattern};
        use crate::namespace::Env;
        use crate::value::LambdaValue;
        use std::cell::Cell;

        let pattern = Pattern::Simple { name: crate::intern::Symbol::ABSENT, pos: PosIdx::NONE };
        let body = Rc::new(Expr::Null);
        let lambda_expr = Rc::new(Expr::Lambda(ExprLambda {
            pattern,
            body,
            pos: PosIdx::NONE,
            frame_size: Cell::new(1),
            name: Cell::new(crate::intern::Symbol::ABSENT),
        }));
        let lambda_like = Value::Lambda(Rc::new(LambdaValue { env: Env::root(), lambda: lambda_expr }));
        let symbols = SymbolTable::new();
        assert!(to_json(&lambda_like, &symbols, PosIdx::NONE).is_err());
    }

    #[test]
    fn from_toml_rejects_dates() {
        let mut symbols = SymbolTable::new();
        let err = from_toml("d = 1979-05-27T07:32:00Z\n", &mut symbols, PosIdx::NONE).unwrap_err();
        assert!(err.message(&symbols).contains("date"));
    }

    #[test]
    fn to_xml_wraps_scalars_in_expr() {
        let symbols = SymbolTable::new();
        let xml = to_xml(&Value::Bool(true), &symbols);
        assert!(xml.contains("<expr>"));
        assert!(xml.contains("<bool value=\"true\" />"));
    }
}
