//! Values and the per-evaluation object heap

use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;

use super::ast::FunctionDef;

/// Handle of an object living in a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// Handle of a lexical scope living in the interpreter's scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvId(pub(crate) usize);

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectId),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// SameValueZero: like `===` but NaN equals NaN (used by `includes`, Set and Map).
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

/// Hashable identity of a value under SameValueZero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Rc<str>),
    Object(ObjectId),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => ValueKey::Undefined,
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Number(n) => {
                let normalized = if *n == 0.0 {
                    0.0f64
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                ValueKey::Number(normalized.to_bits())
            }
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Object(id) => ValueKey::Object(*id),
        }
    }
}

/// Insertion-ordered string-keyed properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: Rc<str>, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// Insertion-ordered table backing `Set` and `Map`.
#[derive(Debug, Clone, Default)]
pub struct OrderedTable {
    entries: Vec<Option<(Value, Value)>>,
    index: HashMap<ValueKey, usize>,
}

impl OrderedTable {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        let i = *self.index.get(&ValueKey::from(key))?;
        self.entries[i].as_ref().map(|(_, v)| v)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.index.contains_key(&ValueKey::from(key))
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        let hashed = ValueKey::from(&key);
        match self.index.get(&hashed) {
            Some(&i) => {
                if let Some(entry) = self.entries[i].as_mut() {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push(Some((key, value)));
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> bool {
        match self.index.remove(&ValueKey::from(key)) {
            Some(i) => {
                self.entries[i] = None;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().flatten().map(|(k, v)| (k, v))
    }
}

#[derive(Debug, Clone)]
pub struct RegExpData {
    pub regex: Rc<Regex>,
    pub source: Rc<str>,
    pub flags: Rc<str>,
}

impl RegExpData {
    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

/// Native functions reachable from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    ConsoleLog,
    StringCtor,
    NumberCtor,
    BooleanCtor,
    ArrayCtor,
    ObjectCtor,
    SetCtor,
    MapCtor,
    ErrorCtor(ErrorKind),
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ObjectFromEntries,
    ObjectFreeze,
    ArrayIsArray,
    ArrayFrom,
    ArrayOf,
    NumberIsInteger,
    NumberIsFinite,
    NumberIsNaN,
    JsonStringify,
    JsonParse,
    Math(MathFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Floor,
    Ceil,
    Round,
    Abs,
    Min,
    Max,
    Pow,
    Sqrt,
    Trunc,
    Sign,
    Log,
    Log10,
    Log2,
    Exp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    SyntaxError,
    ReferenceError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ReferenceError => "ReferenceError",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Closure { def: Rc<FunctionDef>, env: EnvId },
    Native(Native),
    /// Function supplied by the embedding host, identified by its slot.
    Host(usize),
    /// Built-in method detached from its receiver (`const f = arr.map`).
    Method { receiver: Value, name: Rc<str> },
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(Callable),
    Set(OrderedTable),
    Map(OrderedTable),
    RegExp(RegExpData),
    Error { kind: ErrorKind, message: Rc<str> },
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub props: PropertyMap,
}

/// Arena owning every object created during one evaluation. Dropping the heap frees
/// everything at once, including reference cycles built by scripts.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, kind: ObjectKind, props: PropertyMap) -> ObjectId {
        self.objects.push(HeapObject { kind, props });
        ObjectId(self.objects.len() - 1)
    }

    pub fn get(&self, id: ObjectId) -> &HeapObject {
        &self.objects[id.0]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        &mut self.objects[id.0]
    }

    /// Own property lookup (array indices and `length` included).
    pub fn get_property(&self, id: ObjectId, key: &str) -> Option<Value> {
        let object = self.get(id);
        if let ObjectKind::Array(items) = &object.kind {
            if key == "length" {
                return Some(Value::Number(items.len() as f64));
            }
            if let Some(index) = array_index(key) {
                return items.get(index).cloned();
            }
        }
        object.props.get(key).cloned()
    }

    pub fn array_items(&self, id: ObjectId) -> Option<&[Value]> {
        match &self.get(id).kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_array(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| matches!(self.get(id).kind, ObjectKind::Array(_)))
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| matches!(self.get(id).kind, ObjectKind::Function(_)))
    }
}

/// Canonical array index (`"0"`, `"12"`, not `"01"`).
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Number-to-string conversion following JavaScript's output for common values.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i128);
    }
    let abs = n.abs();
    if !(1e-7..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        // Rust prints `1e-7`; JavaScript prints `1e-7` and `1e+21`
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
    }

    #[test]
    fn test_array_index() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("17"), Some(17));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }

    #[test]
    fn test_property_map_preserves_order() {
        let mut props = PropertyMap::new();
        props.insert("b".into(), Value::Number(1.0));
        props.insert("a".into(), Value::Number(2.0));
        props.insert("b".into(), Value::Number(3.0));
        let keys: Vec<&str> = props.keys().map(|k| &**k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(matches!(props.get("b"), Some(Value::Number(n)) if *n == 3.0));

        props.remove("b");
        assert_eq!(props.len(), 1);
        assert!(matches!(props.get("a"), Some(Value::Number(n)) if *n == 2.0));
    }

    #[test]
    fn test_ordered_table_same_value_zero() {
        let mut table = OrderedTable::default();
        table.insert(Value::Number(f64::NAN), Value::Undefined);
        table.insert(Value::Number(0.0), Value::Undefined);
        table.insert(Value::Number(-0.0), Value::Undefined);
        table.insert(Value::string("a"), Value::Undefined);
        assert_eq!(table.len(), 3);
        assert!(table.contains(&Value::Number(f64::NAN)));
        assert!(table.remove(&Value::string("a")));
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::string("").truthy());
        assert!(Value::string("0").truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::Null.truthy());
    }
}
