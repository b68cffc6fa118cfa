//! Oversized-payload mitigation for query results

use crate::script::{json_number, Abrupt, Interpreter, ObjectKind, Value};

pub const MAX_DEPTH_PLACEHOLDER: &str = "[Max depth reached]";
pub const GEOMETRY_PLACEHOLDER: &str = "[Geometry data removed]";

const GEOMETRY_KEYS: [&str; 2] = ["fillGeometry", "strokeGeometry"];

fn is_geometry_key(key: &str) -> bool {
    GEOMETRY_KEYS.contains(&key)
}

/// Replace geometry payloads and cut nesting beyond `max_depth`.
pub fn strip_heavy_data(value: &serde_json::Value, max_depth: usize) -> serde_json::Value {
    strip_json(value, max_depth, 0)
}

fn strip_json(value: &serde_json::Value, max_depth: usize, depth: usize) -> serde_json::Value {
    if depth > max_depth {
        return serde_json::Value::String(MAX_DEPTH_PLACEHOLDER.into());
    }
    match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| strip_json(item, max_depth, depth + 1)).collect(),
        ),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                let stripped = if is_geometry_key(key) {
                    serde_json::Value::String(GEOMETRY_PLACEHOLDER.into())
                } else {
                    strip_json(item, max_depth, depth + 1)
                };
                out.insert(key.clone(), stripped);
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Convert an evaluation result to JSON, applying the stripping rules on the way.
///
/// Follows `JSON.stringify` for what cannot be represented: `undefined` and functions are
/// dropped from objects and become `null` in arrays, non-finite numbers become `null`.
/// Returns `None` when the top-level value itself is `undefined` or a function. Nesting
/// is bounded by `max_depth`, so shared or cyclic structures always terminate.
pub fn export_stripped(
    interp: &mut Interpreter,
    value: &Value,
    max_depth: usize,
) -> Result<Option<serde_json::Value>, Abrupt> {
    export_value(interp, value, max_depth, 0)
}

fn export_value(
    interp: &mut Interpreter,
    value: &Value,
    max_depth: usize,
    depth: usize,
) -> Result<Option<serde_json::Value>, Abrupt> {
    interp.tick()?;
    if depth > max_depth {
        return Ok(Some(serde_json::Value::String(MAX_DEPTH_PLACEHOLDER.into())));
    }

    let id = match value {
        Value::Undefined => return Ok(None),
        Value::Null => return Ok(Some(serde_json::Value::Null)),
        Value::Bool(b) => return Ok(Some(serde_json::Value::Bool(*b))),
        Value::Number(n) if n.is_finite() => return Ok(Some(json_number(*n))),
        Value::Number(_) => return Ok(Some(serde_json::Value::Null)),
        Value::String(s) => return Ok(Some(serde_json::Value::String(s.to_string()))),
        Value::Object(id) => *id,
    };

    let object = interp.heap().get(id);
    let items = match &object.kind {
        ObjectKind::Function(_) => return Ok(None),
        ObjectKind::Array(items) => Some(items.clone()),
        _ => None,
    };

    if let Some(items) = items {
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            let exported = export_value(interp, item, max_depth, depth + 1)?;
            out.push(exported.unwrap_or(serde_json::Value::Null));
        }
        return Ok(Some(serde_json::Value::Array(out)));
    }

    let props: Vec<_> = object.props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let mut out = serde_json::Map::with_capacity(props.len());
    for (key, item) in &props {
        if is_geometry_key(key) {
            out.insert(key.to_string(), serde_json::Value::String(GEOMETRY_PLACEHOLDER.into()));
            continue;
        }
        if let Some(exported) = export_value(interp, item, max_depth, depth + 1)? {
            out.insert(key.to_string(), exported);
        }
    }
    Ok(Some(serde_json::Value::Object(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{parse_statement_program, Budget};
    use serde_json::json;

    fn nested(depth: usize) -> serde_json::Value {
        let mut value = json!("leaf");
        for _ in 0..depth {
            value = json!([value]);
        }
        value
    }

    fn leaf_at(value: &serde_json::Value) -> &serde_json::Value {
        let mut current = value;
        while let serde_json::Value::Array(items) = current {
            current = &items[0];
        }
        current
    }

    #[test]
    fn test_geometry_is_replaced() {
        let input = json!({"fillGeometry": [{"path": "M0 0"}], "name": "x", "strokeGeometry": null});
        let stripped = strip_heavy_data(&input, 50);
        assert_eq!(
            stripped,
            json!({"fillGeometry": GEOMETRY_PLACEHOLDER, "name": "x", "strokeGeometry": GEOMETRY_PLACEHOLDER})
        );
    }

    #[test]
    fn test_depth_bound() {
        // leaf sits at depth 49: untouched
        assert_eq!(leaf_at(&strip_heavy_data(&nested(49), 50)), &json!("leaf"));
        // leaf at depth 50 is still within bounds
        assert_eq!(leaf_at(&strip_heavy_data(&nested(50), 50)), &json!("leaf"));
        // depth 51 is replaced
        assert_eq!(leaf_at(&strip_heavy_data(&nested(51), 50)), &json!(MAX_DEPTH_PLACEHOLDER));
    }

    #[test]
    fn test_idempotent() {
        let input = json!({
            "a": [1, {"fillGeometry": [1, 2]}, null],
            "deep": nested(60),
        });
        let once = strip_heavy_data(&input, 50);
        assert_eq!(strip_heavy_data(&once, 50), once);
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(strip_heavy_data(&json!(null), 50), json!(null));
        assert_eq!(strip_heavy_data(&json!(3.5), 50), json!(3.5));
        assert_eq!(strip_heavy_data(&json!("s"), 0), json!("s"));
        assert_eq!(strip_heavy_data(&json!([1]), 0), json!([MAX_DEPTH_PLACEHOLDER]));
    }

    fn export(source: &str, max_depth: usize) -> Option<serde_json::Value> {
        let program = parse_statement_program(source).unwrap();
        let mut interp = Interpreter::new(Budget::unbounded());
        let value = interp.run(&program).unwrap();
        export_stripped(&mut interp, &value, max_depth).unwrap()
    }

    #[test]
    fn test_export_follows_stringify_rules() {
        let result = export(
            "return { a: undefined, f: () => 1, list: [undefined, () => 1, NaN, 2], s: new Set([1]), fillGeometry: undefined };",
            50,
        );
        assert_eq!(
            result,
            Some(json!({"list": [null, null, null, 2], "s": {}, "fillGeometry": GEOMETRY_PLACEHOLDER}))
        );
        assert_eq!(export("return undefined;", 50), None);
        assert_eq!(export("return 1.0;", 50), Some(json!(1)));
    }

    #[test]
    fn test_export_terminates_on_cycles() {
        let result = export("const a = { name: 'a' }; a.self = a; return a;", 2).unwrap();
        assert_eq!(
            result,
            json!({"name": "a", "self": {"name": "a", "self": {
                "name": MAX_DEPTH_PLACEHOLDER,
                "self": MAX_DEPTH_PLACEHOLDER
            }}})
        );
    }

    #[test]
    fn test_export_matches_json_stripping() {
        let source = "return { name: 'n', fillGeometry: [1], children: [{ id: '1', strokeGeometry: 'x' }] };";
        let program = parse_statement_program(source).unwrap();
        let mut interp = Interpreter::new(Budget::unbounded());
        let value = interp.run(&program).unwrap();
        let direct = export_stripped(&mut interp, &value, 50).unwrap().unwrap();
        let plain = interp.to_json(&value).unwrap().unwrap();
        assert_eq!(direct, strip_heavy_data(&plain, 50));
    }
}
