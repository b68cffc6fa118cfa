//! Conversions between `serde_json` values and interpreter values

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use super::interpreter::{Abrupt, Interpreter};
use super::value::{ErrorKind, ObjectId, ObjectKind, PropertyMap, Value};

/// Nesting bound for `JSON.stringify` on script-built structures.
const MAX_STRINGIFY_DEPTH: usize = 1000;

/// `serde_json` number for a finite f64; integral values serialize as integers.
pub fn json_number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9007199254740992.0 {
        // -0 serializes as 0
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl Interpreter {
    /// Copy a JSON document into the heap.
    pub fn import_json(&mut self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s.as_str()),
            serde_json::Value::Array(items) => {
                let items = items.iter().map(|item| self.import_json(item)).collect();
                self.new_array(items)
            }
            serde_json::Value::Object(map) => {
                let mut props = PropertyMap::new();
                for (key, value) in map {
                    let value = self.import_json(value);
                    props.insert(key.as_str().into(), value);
                }
                self.new_object(props)
            }
        }
    }

    /// `JSON.stringify` semantics; `None` when the value itself is not serializable.
    pub(crate) fn to_json(&mut self, value: &Value) -> Result<Option<serde_json::Value>, Abrupt> {
        let mut stack = Vec::new();
        self.to_json_inner(value, &mut stack)
    }

    fn to_json_inner(&mut self, value: &Value, stack: &mut Vec<ObjectId>) -> Result<Option<serde_json::Value>, Abrupt> {
        self.tick()?;
        let id = match value {
            Value::Undefined => return Ok(None),
            Value::Null => return Ok(Some(serde_json::Value::Null)),
            Value::Bool(b) => return Ok(Some(serde_json::Value::Bool(*b))),
            Value::Number(n) if n.is_finite() => return Ok(Some(json_number(*n))),
            Value::Number(_) => return Ok(Some(serde_json::Value::Null)),
            Value::String(s) => return Ok(Some(serde_json::Value::String(s.to_string()))),
            Value::Object(id) => *id,
        };
        if stack.contains(&id) {
            return Err(self.type_error("Converting circular structure to JSON"));
        }
        if stack.len() >= MAX_STRINGIFY_DEPTH {
            return Err(self.error(ErrorKind::RangeError, "Maximum call stack size exceeded"));
        }

        let object = self.heap.get(id);
        let items = match &object.kind {
            ObjectKind::Function(_) => return Ok(None),
            ObjectKind::Array(items) => Some(items.clone()),
            _ => None,
        };
        let props: Vec<_> = object.props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        stack.push(id);
        let result = match items {
            Some(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(self.to_json_inner(item, stack)?.unwrap_or(serde_json::Value::Null));
                }
                serde_json::Value::Array(out)
            }
            None => {
                let mut out = serde_json::Map::new();
                for (key, item) in &props {
                    if let Some(json) = self.to_json_inner(item, stack)? {
                        out.insert(key.to_string(), json);
                    }
                }
                serde_json::Value::Object(out)
            }
        };
        stack.pop();
        Ok(Some(result))
    }

    pub(crate) fn json_stringify(&mut self, value: &Value, indent: Option<&str>) -> Result<Value, Abrupt> {
        let Some(json) = self.to_json(value)? else {
            return Ok(Value::Undefined);
        };
        let text = match indent {
            None => serde_json::to_string(&json),
            Some(indent) => {
                let mut buf = Vec::new();
                let mut serializer =
                    serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent.as_bytes()));
                json.serialize(&mut serializer)
                    .map(|()| String::from_utf8_lossy(&buf).into_owned())
            }
        };
        match text {
            Ok(text) => {
                self.check_string_len(text.len())?;
                Ok(Value::string(text))
            }
            Err(e) => Err(self.type_error(e.to_string())),
        }
    }

    pub(crate) fn json_parse(&mut self, text: &str) -> Result<Value, Abrupt> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => Ok(self.import_json(&json)),
            Err(e) => Err(self.error(
                ErrorKind::SyntaxError,
                format!("Unexpected token in JSON at line {} column {}", e.line(), e.column()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::script::error::EvalError;
    use crate::script::interpreter::Budget;
    use crate::script::parser::parse_statement_program;

    fn run(source: &str) -> Result<Value, EvalError> {
        let program = parse_statement_program(source)?;
        Interpreter::new(Budget::unbounded()).run(&program)
    }

    #[test]
    fn test_import_then_export_preserves_key_order() {
        let mut interp = Interpreter::new(Budget::unbounded());
        let doc = json!({"z": 1, "a": [true, null, "x"], "m": {"n": 1.5}});
        let value = interp.import_json(&doc);
        assert_eq!(interp.to_json(&value).unwrap(), Some(doc));
    }

    #[test]
    fn test_stringify_follows_javascript_rules() {
        let result = run(
            "return JSON.stringify({ a: undefined, b: [undefined, () => 1, NaN], c: new Set([1]), d: 2 });",
        );
        assert!(matches!(result, Ok(Value::String(s)) if &*s == r#"{"b":[null,null,null],"c":{},"d":2}"#));
    }

    #[test]
    fn test_stringify_with_indent() {
        let result = run("return JSON.stringify({ a: [1] }, null, 2);");
        assert!(matches!(result, Ok(Value::String(s)) if &*s == "{\n  \"a\": [\n    1\n  ]\n}"));
    }

    #[test]
    fn test_stringify_detects_cycles() {
        let result = run("const a = {}; a.self = a; return JSON.stringify(a);");
        assert!(matches!(result, Err(EvalError::Runtime(m)) if m == "Converting circular structure to JSON"));
    }

    #[test]
    fn test_parse_round_trip_and_errors() {
        assert!(matches!(run("return JSON.parse('{\"k\": [1, 2]}').k[1];"), Ok(Value::Number(n)) if n == 2.0));
        assert!(matches!(run("return JSON.parse('{oops');"), Err(EvalError::Runtime(m)) if m.starts_with("Unexpected token in JSON")));
    }

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(3.0), json!(3));
        assert_eq!(json_number(-0.0), json!(0));
        assert_eq!(json_number(0.5), json!(0.5));
    }
}
