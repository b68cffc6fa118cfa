//! Built-in globals and methods available to query programs

use std::cmp::Ordering;
use std::rc::Rc;

use regex::{Captures, Regex};

use super::ast::Expr;
use super::interpreter::{Abrupt, Interpreter, PropertyKey};
use super::value::{
    number_to_string, Callable, ErrorKind, MathFn, Native, ObjectId, ObjectKind, OrderedTable,
    PropertyMap, RegExpData, Value,
};

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "join", "reverse", "indexOf",
    "lastIndexOf", "includes", "find", "findIndex", "findLast", "findLastIndex", "filter", "map",
    "forEach", "some", "every", "reduce", "reduceRight", "sort", "flat", "flatMap", "fill", "keys",
    "values", "entries", "at", "toString",
];

const STRING_METHODS: &[&str] = &[
    "charAt", "charCodeAt", "codePointAt", "indexOf", "lastIndexOf", "includes", "startsWith",
    "endsWith", "slice", "substring", "substr", "toLowerCase", "toUpperCase", "trim", "trimStart",
    "trimEnd", "padStart", "padEnd", "repeat", "split", "replace", "replaceAll", "match", "search",
    "concat", "at", "localeCompare", "normalize", "toString", "valueOf",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toPrecision", "toString", "toLocaleString", "valueOf"];
const SET_METHODS: &[&str] = &["add", "has", "delete", "clear", "forEach", "values", "keys", "entries"];
const MAP_METHODS: &[&str] = &["get", "set", "has", "delete", "clear", "forEach", "values", "keys", "entries"];
const REGEXP_METHODS: &[&str] = &["test", "exec", "toString"];

pub(crate) fn is_string_method(name: &str) -> bool {
    STRING_METHODS.contains(&name)
}

pub(crate) fn is_number_method(name: &str) -> bool {
    NUMBER_METHODS.contains(&name)
}

/// Whether objects of this kind respond to the named built-in method.
pub(crate) fn has_method(kind: &ObjectKind, name: &str) -> bool {
    match kind {
        ObjectKind::Array(_) => ARRAY_METHODS.contains(&name),
        ObjectKind::Set(_) => SET_METHODS.contains(&name),
        ObjectKind::Map(_) => MAP_METHODS.contains(&name),
        ObjectKind::RegExp(_) => REGEXP_METHODS.contains(&name),
        ObjectKind::Ordinary => matches!(name, "hasOwnProperty" | "toString"),
        ObjectKind::Error { .. } | ObjectKind::Function(_) => name == "toString",
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

impl Interpreter {
    pub(crate) fn install_globals(&mut self) {
        self.define_global("undefined", Value::Undefined);
        self.define_global("NaN", Value::Number(f64::NAN));
        self.define_global("Infinity", Value::Number(f64::INFINITY));

        for (name, native) in [
            ("parseInt", Native::ParseInt),
            ("parseFloat", Native::ParseFloat),
            ("isNaN", Native::IsNaN),
            ("isFinite", Native::IsFinite),
            ("Boolean", Native::BooleanCtor),
            ("String", Native::StringCtor),
            ("Set", Native::SetCtor),
            ("Map", Native::MapCtor),
        ] {
            let function = self.new_function(Callable::Native(native));
            self.define_global(name, function);
        }

        for kind in [
            ErrorKind::Error,
            ErrorKind::TypeError,
            ErrorKind::RangeError,
            ErrorKind::SyntaxError,
            ErrorKind::ReferenceError,
        ] {
            let function = self.new_function(Callable::Native(Native::ErrorCtor(kind)));
            self.define_global(kind.name(), function);
        }

        let console = self.namespace(
            None,
            &[
                ("log", Native::ConsoleLog),
                ("info", Native::ConsoleLog),
                ("warn", Native::ConsoleLog),
                ("error", Native::ConsoleLog),
                ("debug", Native::ConsoleLog),
            ],
            &[],
        );
        self.define_global("console", console);

        let json = self.namespace(
            None,
            &[("stringify", Native::JsonStringify), ("parse", Native::JsonParse)],
            &[],
        );
        self.define_global("JSON", json);

        let math = self.namespace(
            None,
            &[
                ("floor", Native::Math(MathFn::Floor)),
                ("ceil", Native::Math(MathFn::Ceil)),
                ("round", Native::Math(MathFn::Round)),
                ("abs", Native::Math(MathFn::Abs)),
                ("min", Native::Math(MathFn::Min)),
                ("max", Native::Math(MathFn::Max)),
                ("pow", Native::Math(MathFn::Pow)),
                ("sqrt", Native::Math(MathFn::Sqrt)),
                ("trunc", Native::Math(MathFn::Trunc)),
                ("sign", Native::Math(MathFn::Sign)),
                ("log", Native::Math(MathFn::Log)),
                ("log10", Native::Math(MathFn::Log10)),
                ("log2", Native::Math(MathFn::Log2)),
                ("exp", Native::Math(MathFn::Exp)),
            ],
            &[
                ("PI", std::f64::consts::PI),
                ("E", std::f64::consts::E),
                ("LN2", std::f64::consts::LN_2),
                ("LN10", std::f64::consts::LN_10),
                ("SQRT2", std::f64::consts::SQRT_2),
            ],
        );
        self.define_global("Math", math);

        let object = self.namespace(
            Some(Native::ObjectCtor),
            &[
                ("keys", Native::ObjectKeys),
                ("values", Native::ObjectValues),
                ("entries", Native::ObjectEntries),
                ("assign", Native::ObjectAssign),
                ("fromEntries", Native::ObjectFromEntries),
                ("freeze", Native::ObjectFreeze),
            ],
            &[],
        );
        self.define_global("Object", object);

        let array = self.namespace(
            Some(Native::ArrayCtor),
            &[
                ("isArray", Native::ArrayIsArray),
                ("from", Native::ArrayFrom),
                ("of", Native::ArrayOf),
            ],
            &[],
        );
        self.define_global("Array", array);

        let number = self.namespace(
            Some(Native::NumberCtor),
            &[
                ("isInteger", Native::NumberIsInteger),
                ("isFinite", Native::NumberIsFinite),
                ("isNaN", Native::NumberIsNaN),
                ("parseFloat", Native::ParseFloat),
                ("parseInt", Native::ParseInt),
            ],
            &[
                ("MAX_SAFE_INTEGER", 9007199254740991.0),
                ("MIN_SAFE_INTEGER", -9007199254740991.0),
                ("EPSILON", f64::EPSILON),
                ("MAX_VALUE", f64::MAX),
                ("POSITIVE_INFINITY", f64::INFINITY),
                ("NEGATIVE_INFINITY", f64::NEG_INFINITY),
            ],
        );
        self.define_global("Number", number);
    }

    /// A plain object (or a callable one, when `callable` is set) holding native functions.
    fn namespace(&mut self, callable: Option<Native>, functions: &[(&str, Native)], constants: &[(&str, f64)]) -> Value {
        let mut props = PropertyMap::new();
        for (name, native) in functions {
            let function = self.new_function(Callable::Native(*native));
            props.insert((*name).into(), function);
        }
        for (name, value) in constants {
            props.insert((*name).into(), Value::Number(*value));
        }
        let kind = match callable {
            Some(native) => ObjectKind::Function(Callable::Native(native)),
            None => ObjectKind::Ordinary,
        };
        Value::Object(self.heap.alloc(kind, props))
    }

    fn require_callable(&mut self, value: &Value) -> Result<(), Abrupt> {
        if self.heap.is_callable(value) {
            return Ok(());
        }
        let shown = self.to_js_string(value);
        Err(self.type_error(format!("{} is not a function", shown)))
    }

    fn to_integer(&self, value: &Value) -> f64 {
        let n = self.to_number(value);
        if n.is_nan() {
            0.0
        } else {
            n.trunc()
        }
    }

    /// Resolve a possibly negative position argument against `len`.
    fn relative_index(&self, value: &Value, len: usize, default: usize) -> usize {
        if matches!(value, Value::Undefined) {
            return default;
        }
        let n = self.to_integer(value);
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            n.min(len as f64) as usize
        }
    }

    fn object_argument(&mut self, value: &Value) -> Result<(), Abrupt> {
        if value.is_nullish() {
            return Err(self.type_error("Cannot convert undefined or null to object"));
        }
        Ok(())
    }

    // ----- global functions -----

    pub(crate) fn call_native(&mut self, native: Native, args: Vec<Value>) -> Result<Value, Abrupt> {
        let first = arg(&args, 0);
        Ok(match native {
            Native::ParseInt => {
                let text = self.to_js_string(&first);
                let radix = self.to_integer(&arg(&args, 1));
                Value::Number(parse_int(&text, radix as u32))
            }
            Native::ParseFloat => Value::Number(parse_float(&self.to_js_string(&first))),
            Native::IsNaN => Value::Bool(self.to_number(&first).is_nan()),
            Native::IsFinite => Value::Bool(self.to_number(&first).is_finite()),
            Native::ConsoleLog => {
                let line = args
                    .iter()
                    .map(|value| self.inspect(value))
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::info!(target: "query", "{}", line);
                Value::Undefined
            }
            Native::StringCtor => match args.first() {
                Some(value) => Value::String(self.to_js_string(value)),
                None => Value::string(""),
            },
            Native::NumberCtor => match args.first() {
                Some(value) => Value::Number(self.to_number(value)),
                None => Value::Number(0.0),
            },
            Native::BooleanCtor => Value::Bool(first.truthy()),
            Native::ArrayCtor | Native::ErrorCtor(_) => return self.construct_native(native, args, &Expr::Null),
            Native::ObjectCtor => match first {
                Value::Object(_) => first,
                _ => self.new_object(PropertyMap::new()),
            },
            Native::SetCtor | Native::MapCtor => {
                let name = if native == Native::SetCtor { "Set" } else { "Map" };
                return Err(self.type_error(format!("Constructor {} requires 'new'", name)));
            }
            Native::ObjectKeys | Native::ObjectValues | Native::ObjectEntries => {
                self.object_argument(&first)?;
                let entries = self.own_entries(&first);
                let items = entries
                    .into_iter()
                    .map(|(key, value)| match native {
                        Native::ObjectKeys => Value::String(key),
                        Native::ObjectValues => value,
                        _ => self.new_array(vec![Value::String(key), value]),
                    })
                    .collect();
                self.new_array(items)
            }
            Native::ObjectAssign => {
                self.object_argument(&first)?;
                for source in args.iter().skip(1) {
                    for (key, value) in self.own_entries(source) {
                        self.set_member(&first, &PropertyKey::named(key), value)?;
                    }
                }
                first
            }
            Native::ObjectFromEntries => {
                let mut props = PropertyMap::new();
                for entry in self.iterate(&first)? {
                    let key = self.get_member(&entry, &PropertyKey::Index(0))?;
                    let value = self.get_member(&entry, &PropertyKey::Index(1))?;
                    props.insert(self.to_js_string(&key), value);
                }
                self.new_object(props)
            }
            Native::ObjectFreeze => first,
            Native::ArrayIsArray => Value::Bool(self.heap.is_array(&first)),
            Native::ArrayFrom => {
                let mapper = arg(&args, 1);
                let items = match &first {
                    Value::Object(id) if !self.heap.is_array(&first) && self.heap.get(*id).props.contains_key("length") => {
                        let len = self.get_member(&first, &PropertyKey::Name("length".into()))?;
                        let len = self.to_integer(&len).max(0.0);
                        if len > super::interpreter::MAX_ARRAY_LEN as f64 {
                            return Err(self.range_error("Invalid array length"));
                        }
                        let mut items = Vec::with_capacity(len as usize);
                        for i in 0..len as usize {
                            items.push(self.get_member(&first, &PropertyKey::Index(i))?);
                        }
                        items
                    }
                    Value::Undefined | Value::Null => {
                        return Err(self.type_error("undefined is not iterable"));
                    }
                    Value::Number(_) | Value::Bool(_) => Vec::new(),
                    _ => self.iterate(&first)?,
                };
                let items = if mapper.is_nullish() {
                    items
                } else {
                    self.require_callable(&mapper)?;
                    let mut mapped = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        mapped.push(self.call_function(&mapper, vec![item, Value::Number(i as f64)])?);
                    }
                    mapped
                };
                self.new_array(items)
            }
            Native::ArrayOf => self.new_array(args),
            Native::NumberIsInteger => {
                Value::Bool(matches!(first, Value::Number(n) if n.is_finite() && n.fract() == 0.0))
            }
            Native::NumberIsFinite => Value::Bool(matches!(first, Value::Number(n) if n.is_finite())),
            Native::NumberIsNaN => Value::Bool(matches!(first, Value::Number(n) if n.is_nan())),
            Native::JsonStringify => {
                let indent = self.json_indent(&arg(&args, 2));
                self.json_stringify(&first, indent.as_deref())?
            }
            Native::JsonParse => {
                let text = self.to_js_string(&first);
                self.json_parse(&text)?
            }
            Native::Math(function) => Value::Number(self.math(function, &args)),
        })
    }

    fn json_indent(&self, space: &Value) -> Option<String> {
        match space {
            Value::Number(n) if *n >= 1.0 => Some(" ".repeat(n.min(10.0) as usize)),
            Value::String(s) if !s.is_empty() => Some(s.chars().take(10).collect()),
            _ => None,
        }
    }

    fn math(&self, function: MathFn, args: &[Value]) -> f64 {
        let x = self.to_number(&arg(args, 0));
        match function {
            MathFn::Floor => x.floor(),
            MathFn::Ceil => x.ceil(),
            MathFn::Round => {
                if !x.is_finite() {
                    return x;
                }
                let floor = x.floor();
                if x - floor >= 0.5 {
                    floor + 1.0
                } else {
                    floor
                }
            }
            MathFn::Abs => x.abs(),
            MathFn::Min | MathFn::Max => {
                let mut result = if function == MathFn::Min {
                    f64::INFINITY
                } else {
                    f64::NEG_INFINITY
                };
                for value in args {
                    let n = self.to_number(value);
                    if n.is_nan() {
                        return f64::NAN;
                    }
                    result = if function == MathFn::Min { result.min(n) } else { result.max(n) };
                }
                result
            }
            MathFn::Pow => {
                let exponent = self.to_number(&arg(args, 1));
                if exponent.is_nan() {
                    f64::NAN
                } else {
                    x.powf(exponent)
                }
            }
            MathFn::Sqrt => x.sqrt(),
            MathFn::Trunc => x.trunc(),
            MathFn::Sign => {
                if x.is_nan() || x == 0.0 {
                    x
                } else {
                    x.signum()
                }
            }
            MathFn::Log => x.ln(),
            MathFn::Log10 => x.log10(),
            MathFn::Log2 => x.log2(),
            MathFn::Exp => x.exp(),
        }
    }

    /// Rendering used by `console.log`.
    fn inspect(&mut self, value: &Value) -> String {
        match value {
            Value::String(s) => s.to_string(),
            Value::Object(_) if self.heap.is_callable(value) => "[Function]".to_string(),
            Value::Object(_) => match self.to_json(value) {
                Ok(Some(json)) => json.to_string(),
                _ => self.to_js_string(value).to_string(),
            },
            other => self.to_js_string(other).to_string(),
        }
    }

    pub(crate) fn construct_native(&mut self, native: Native, args: Vec<Value>, callee: &Expr) -> Result<Value, Abrupt> {
        let first = arg(&args, 0);
        match native {
            Native::SetCtor => {
                let mut table = OrderedTable::default();
                if !first.is_nullish() {
                    for item in self.iterate(&first)? {
                        table.insert(item, Value::Undefined);
                    }
                }
                Ok(Value::Object(self.heap.alloc(ObjectKind::Set(table), PropertyMap::new())))
            }
            Native::MapCtor => {
                let mut table = OrderedTable::default();
                if !first.is_nullish() {
                    for entry in self.iterate(&first)? {
                        if entry.as_object().is_none() {
                            let shown = self.to_js_string(&entry);
                            return Err(self.type_error(format!("Iterator value {} is not an entry object", shown)));
                        }
                        let key = self.get_member(&entry, &PropertyKey::Index(0))?;
                        let value = self.get_member(&entry, &PropertyKey::Index(1))?;
                        table.insert(key, value);
                    }
                }
                Ok(Value::Object(self.heap.alloc(ObjectKind::Map(table), PropertyMap::new())))
            }
            Native::ErrorCtor(kind) => {
                let message = match first {
                    Value::Undefined => Rc::from(""),
                    other => self.to_js_string(&other),
                };
                Ok(self.new_error(kind, message))
            }
            Native::ArrayCtor => match (&first, args.len()) {
                (Value::Number(n), 1) => {
                    if *n < 0.0 || n.fract() != 0.0 || *n > super::interpreter::MAX_ARRAY_LEN as f64 {
                        return Err(self.range_error("Invalid array length"));
                    }
                    Ok(self.new_array(vec![Value::Undefined; *n as usize]))
                }
                _ => Ok(self.new_array(args)),
            },
            Native::ObjectCtor => match first {
                Value::Object(_) => Ok(first),
                _ => Ok(self.new_object(PropertyMap::new())),
            },
            Native::StringCtor | Native::NumberCtor | Native::BooleanCtor => self.call_native(native, args),
            _ => {
                let name = match callee {
                    Expr::Ident(name) => name.to_string(),
                    _ => "value".to_string(),
                };
                Err(self.type_error(format!("{} is not a constructor", name)))
            }
        }
    }

    // ----- methods -----

    /// Dispatch a built-in method on a receiver; `None` when the receiver has no such method.
    pub(crate) fn call_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        match receiver {
            Value::String(s) => self.string_method(s.clone(), name, args),
            Value::Number(n) => self.number_method(*n, name, args),
            Value::Bool(b) => Ok((name == "toString").then(|| Value::string(if *b { "true" } else { "false" }))),
            Value::Object(id) => {
                let id = *id;
                match &self.heap.get(id).kind {
                    ObjectKind::Array(_) => self.array_method(id, name, args),
                    ObjectKind::Set(_) => self.set_method(id, name, args),
                    ObjectKind::Map(_) => self.map_method(id, name, args),
                    ObjectKind::RegExp(data) => {
                        let data = data.clone();
                        self.regexp_method(&data, name, args)
                    }
                    ObjectKind::Ordinary if name == "hasOwnProperty" => {
                        let key = self.to_property_key(&arg(&args, 0));
                        Ok(Some(Value::Bool(self.own_property(receiver, &key).is_some())))
                    }
                    _ if name == "toString" => Ok(Some(Value::String(self.to_js_string(receiver)))),
                    _ => Ok(None),
                }
            }
            Value::Undefined | Value::Null => Ok(None),
        }
    }

    fn with_items<R>(&mut self, id: ObjectId, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        match &mut self.heap.get_mut(id).kind {
            ObjectKind::Array(items) => Some(f(items)),
            _ => None,
        }
    }

    fn items_snapshot(&self, id: ObjectId) -> Vec<Value> {
        self.heap.array_items(id).map(<[Value]>::to_vec).unwrap_or_default()
    }

    fn array_method(&mut self, id: ObjectId, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let this = Value::Object(id);
        let len = self.heap.array_items(id).map_or(0, <[Value]>::len);
        let value = match name {
            "push" => {
                let new_len = len + args.len();
                self.check_array_len(new_len)?;
                self.with_items(id, |items| items.extend(args));
                Value::Number(new_len as f64)
            }
            "pop" => self.with_items(id, |items| items.pop()).flatten().unwrap_or(Value::Undefined),
            "shift" => self
                .with_items(id, |items| (!items.is_empty()).then(|| items.remove(0)))
                .flatten()
                .unwrap_or(Value::Undefined),
            "unshift" => {
                let new_len = len + args.len();
                self.check_array_len(new_len)?;
                self.with_items(id, |items| {
                    items.splice(0..0, args);
                });
                Value::Number(new_len as f64)
            }
            "slice" => {
                let start = self.relative_index(&arg(&args, 0), len, 0);
                let end = self.relative_index(&arg(&args, 1), len, len).max(start);
                let items = self.heap.array_items(id).map(|items| items[start..end].to_vec()).unwrap_or_default();
                self.new_array(items)
            }
            "splice" => {
                let start = self.relative_index(&arg(&args, 0), len, 0);
                let delete_count = match args.len() {
                    0 => 0,
                    1 => len - start,
                    _ => (self.to_integer(&args[1]).max(0.0) as usize).min(len - start),
                };
                let inserted: Vec<Value> = args.into_iter().skip(2).collect();
                self.check_array_len(len - delete_count + inserted.len())?;
                let removed = self
                    .with_items(id, |items| items.splice(start..start + delete_count, inserted).collect())
                    .unwrap_or_default();
                self.new_array(removed)
            }
            "concat" => {
                let mut out = self.items_snapshot(id);
                for value in args {
                    match value.as_object().and_then(|other| self.heap.array_items(other)) {
                        Some(items) => out.extend_from_slice(items),
                        None => out.push(value),
                    }
                    self.check_array_len(out.len())?;
                }
                self.new_array(out)
            }
            "join" | "toString" => {
                let separator = match args.first() {
                    Some(value) if name == "join" && !matches!(value, Value::Undefined) => self.to_js_string(value),
                    _ => Rc::from(","),
                };
                let mut out = String::new();
                for (i, item) in self.items_snapshot(id).iter().enumerate() {
                    if i > 0 {
                        out.push_str(&separator);
                    }
                    if !item.is_nullish() {
                        out.push_str(&self.to_js_string(item));
                    }
                    self.check_string_len(out.len())?;
                }
                Value::string(out)
            }
            "reverse" => {
                self.with_items(id, |items| items.reverse());
                this
            }
            "indexOf" | "lastIndexOf" | "includes" => {
                let needle = arg(&args, 0);
                let items = self.items_snapshot(id);
                match name {
                    "includes" => Value::Bool(items.iter().any(|item| item.same_value_zero(&needle))),
                    "indexOf" => {
                        let from = self.relative_index(&arg(&args, 1), len, 0);
                        let found = items[from..].iter().position(|item| item.strict_equals(&needle));
                        Value::Number(found.map_or(-1.0, |i| (i + from) as f64))
                    }
                    _ => {
                        let found = items.iter().rposition(|item| item.strict_equals(&needle));
                        Value::Number(found.map_or(-1.0, |i| i as f64))
                    }
                }
            }
            "at" => {
                let n = self.to_integer(&arg(&args, 0));
                let index = if n < 0.0 { len as f64 + n } else { n };
                if index < 0.0 {
                    Value::Undefined
                } else {
                    self.own_property(&this, &PropertyKey::Index(index as usize))
                        .unwrap_or(Value::Undefined)
                }
            }
            "fill" => {
                let value = arg(&args, 0);
                let start = self.relative_index(&arg(&args, 1), len, 0);
                let end = self.relative_index(&arg(&args, 2), len, len).max(start);
                self.with_items(id, |items| items[start..end].fill(value));
                this
            }
            "keys" => {
                let keys = (0..len).map(|i| Value::Number(i as f64)).collect();
                self.new_array(keys)
            }
            "values" => {
                let items = self.items_snapshot(id);
                self.new_array(items)
            }
            "entries" => {
                let entries = self
                    .items_snapshot(id)
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.new_array(vec![Value::Number(i as f64), item]))
                    .collect();
                self.new_array(entries)
            }
            "sort" => {
                let comparator = arg(&args, 0);
                if !matches!(comparator, Value::Undefined) {
                    self.require_callable(&comparator)?;
                }
                let sorted = self.sort_values(self.items_snapshot(id), &comparator)?;
                self.with_items(id, |items| *items = sorted);
                this
            }
            "flat" => {
                let depth = match arg(&args, 0) {
                    Value::Undefined => 1.0,
                    other => self.to_integer(&other),
                };
                let mut out = Vec::new();
                self.flatten_into(self.items_snapshot(id), depth, &mut out)?;
                self.new_array(out)
            }
            "reduce" | "reduceRight" => {
                let callback = arg(&args, 0);
                self.require_callable(&callback)?;
                let mut indexed: Vec<(usize, Value)> = self.items_snapshot(id).into_iter().enumerate().collect();
                if name == "reduceRight" {
                    indexed.reverse();
                }
                let mut indexed = indexed.into_iter();
                let mut accumulator = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match indexed.next() {
                        Some((_, first)) => first,
                        None => return Err(self.type_error("Reduce of empty array with no initial value")),
                    },
                };
                for (i, item) in indexed {
                    accumulator = self.call_function(
                        &callback,
                        vec![accumulator, item, Value::Number(i as f64), this.clone()],
                    )?;
                }
                accumulator
            }
            "find" | "findIndex" | "findLast" | "findLastIndex" | "filter" | "map" | "forEach" | "some"
            | "every" | "flatMap" => return self.array_iteration(id, name, args).map(Some),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn array_iteration(&mut self, id: ObjectId, name: &str, args: Vec<Value>) -> Result<Value, Abrupt> {
        let this = Value::Object(id);
        let callback = arg(&args, 0);
        self.require_callable(&callback)?;
        let items = self.items_snapshot(id);
        let call = |interp: &mut Self, i: usize, item: &Value| {
            interp.call_function(&callback, vec![item.clone(), Value::Number(i as f64), this.clone()])
        };

        Ok(match name {
            "forEach" => {
                for (i, item) in items.iter().enumerate() {
                    call(self, i, item)?;
                }
                Value::Undefined
            }
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(call(self, i, item)?);
                }
                self.new_array(out)
            }
            "filter" => {
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if call(self, i, item)?.truthy() {
                        out.push(item.clone());
                    }
                }
                self.new_array(out)
            }
            "flatMap" => {
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let result = call(self, i, item)?;
                    match result.as_object().and_then(|inner| self.heap.array_items(inner)) {
                        Some(inner) => out.extend_from_slice(inner),
                        None => out.push(result),
                    }
                    self.check_array_len(out.len())?;
                }
                self.new_array(out)
            }
            "some" | "every" => {
                let want = name == "some";
                for (i, item) in items.iter().enumerate() {
                    if call(self, i, item)?.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Value::Bool(!want)
            }
            _ => {
                let backwards = name.starts_with("findLast");
                let wants_index = name.ends_with("Index");
                let order: Box<dyn Iterator<Item = usize>> = if backwards {
                    Box::new((0..items.len()).rev())
                } else {
                    Box::new(0..items.len())
                };
                for i in order {
                    if call(self, i, &items[i])?.truthy() {
                        return Ok(if wants_index {
                            Value::Number(i as f64)
                        } else {
                            items[i].clone()
                        });
                    }
                }
                if wants_index {
                    Value::Number(-1.0)
                } else {
                    Value::Undefined
                }
            }
        })
    }

    fn flatten_into(&mut self, items: Vec<Value>, depth: f64, out: &mut Vec<Value>) -> Result<(), Abrupt> {
        for item in items {
            self.tick()?;
            let nested = match item.as_object() {
                Some(inner) if depth >= 1.0 => self.heap.array_items(inner).map(<[Value]>::to_vec),
                _ => None,
            };
            match nested {
                Some(nested) => self.flatten_into(nested, depth - 1.0, out)?,
                None => out.push(item),
            }
            self.check_array_len(out.len())?;
        }
        Ok(())
    }

    /// Stable merge sort; a user comparator may be inconsistent or throw.
    fn sort_values(&mut self, items: Vec<Value>, comparator: &Value) -> Result<Vec<Value>, Abrupt> {
        let undefined_count = items.iter().filter(|v| matches!(v, Value::Undefined)).count();
        let mut run: Vec<Value> = items.into_iter().filter(|v| !matches!(v, Value::Undefined)).collect();
        let n = run.len();
        let mut merged = Vec::with_capacity(n);
        let mut width = 1;
        while width < n {
            merged.clear();
            let mut start = 0;
            while start < n {
                let mid = (start + width).min(n);
                let end = (start + 2 * width).min(n);
                let (mut i, mut j) = (start, mid);
                while i < mid && j < end {
                    if self.sort_compare(&run[j], &run[i], comparator)? == Ordering::Less {
                        merged.push(run[j].clone());
                        j += 1;
                    } else {
                        merged.push(run[i].clone());
                        i += 1;
                    }
                }
                merged.extend_from_slice(&run[i..mid]);
                merged.extend_from_slice(&run[j..end]);
                start = end;
            }
            std::mem::swap(&mut run, &mut merged);
            width *= 2;
        }
        run.extend(std::iter::repeat(Value::Undefined).take(undefined_count));
        Ok(run)
    }

    fn sort_compare(&mut self, a: &Value, b: &Value, comparator: &Value) -> Result<Ordering, Abrupt> {
        self.tick()?;
        if matches!(comparator, Value::Undefined) {
            return Ok(self.to_js_string(a).cmp(&self.to_js_string(b)));
        }
        let result = self.call_function(comparator, vec![a.clone(), b.clone()])?;
        let n = self.to_number(&result);
        Ok(if n < 0.0 {
            Ordering::Less
        } else if n > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        })
    }

    fn string_method(&mut self, s: Rc<str>, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let first = arg(&args, 0);
        let len = s.chars().count();
        let value = match name {
            "charAt" | "at" => {
                let n = self.to_integer(&first);
                let index = if name == "at" && n < 0.0 { len as f64 + n } else { n };
                let found = (index >= 0.0)
                    .then(|| s.chars().nth(index as usize))
                    .flatten()
                    .map(|c| Value::string(c.to_string()));
                match (found, name) {
                    (Some(value), _) => value,
                    (None, "at") => Value::Undefined,
                    (None, _) => Value::string(""),
                }
            }
            "charCodeAt" | "codePointAt" => {
                let n = self.to_integer(&first);
                match (n >= 0.0).then(|| s.chars().nth(n as usize)).flatten() {
                    Some(c) => Value::Number(f64::from(u32::from(c))),
                    None if name == "charCodeAt" => Value::Number(f64::NAN),
                    None => Value::Undefined,
                }
            }
            "indexOf" => {
                let needle = self.to_js_string(&first);
                let from = self.relative_index(&arg(&args, 1), len, 0);
                let start = byte_offset(&s, from);
                let found = s[start..].find(&*needle).map(|b| from + s[start..start + b].chars().count());
                Value::Number(found.map_or(-1.0, |i| i as f64))
            }
            "lastIndexOf" => {
                let needle = self.to_js_string(&first);
                let found = s.rfind(&*needle).map(|b| s[..b].chars().count());
                Value::Number(found.map_or(-1.0, |i| i as f64))
            }
            "includes" => Value::Bool(s.contains(&*self.to_js_string(&first))),
            "startsWith" => {
                let needle = self.to_js_string(&first);
                let from = self.relative_index(&arg(&args, 1), len, 0);
                Value::Bool(s[byte_offset(&s, from)..].starts_with(&*needle))
            }
            "endsWith" => {
                let needle = self.to_js_string(&first);
                let end = self.relative_index(&arg(&args, 1), len, len);
                Value::Bool(s[..byte_offset(&s, end)].ends_with(&*needle))
            }
            "slice" => {
                let start = self.relative_index(&first, len, 0);
                let end = self.relative_index(&arg(&args, 1), len, len).max(start);
                Value::string(char_range(&s, start, end))
            }
            "substring" => {
                let clamp = |interp: &Self, value: &Value, default: usize| match value {
                    Value::Undefined => default,
                    other => interp.to_integer(other).clamp(0.0, len as f64) as usize,
                };
                let a = clamp(self, &first, 0);
                let b = clamp(self, &arg(&args, 1), len);
                Value::string(char_range(&s, a.min(b), a.max(b)))
            }
            "substr" => {
                let start = self.relative_index(&first, len, 0);
                let count = match arg(&args, 1) {
                    Value::Undefined => len - start,
                    other => self.to_integer(&other).clamp(0.0, (len - start) as f64) as usize,
                };
                Value::string(char_range(&s, start, start + count))
            }
            "toLowerCase" => Value::string(s.to_lowercase()),
            "toUpperCase" => Value::string(s.to_uppercase()),
            "trim" => Value::string(s.trim()),
            "trimStart" => Value::string(s.trim_start()),
            "trimEnd" => Value::string(s.trim_end()),
            "padStart" | "padEnd" => {
                let target = self.to_integer(&first).max(0.0) as usize;
                let filler: Vec<char> = match arg(&args, 1) {
                    Value::Undefined => vec![' '],
                    other => self.to_js_string(&other).chars().collect(),
                };
                if target <= len || filler.is_empty() {
                    Value::String(s.clone())
                } else {
                    self.check_string_len(target)?;
                    let padding: String = filler.iter().cycle().take(target - len).collect();
                    if name == "padStart" {
                        Value::string(format!("{}{}", padding, s))
                    } else {
                        Value::string(format!("{}{}", s, padding))
                    }
                }
            }
            "repeat" => {
                let n = self.to_integer(&first);
                if n < 0.0 || n.is_infinite() {
                    return Err(self.range_error(format!("Invalid count value: {}", number_to_string(n))));
                }
                self.check_string_len(s.len().saturating_mul(n as usize))?;
                Value::string(s.repeat(n as usize))
            }
            "concat" => {
                let mut out = s.to_string();
                for value in &args {
                    out.push_str(&self.to_js_string(value));
                    self.check_string_len(out.len())?;
                }
                Value::string(out)
            }
            "split" => self.split_string(&s, &first, &arg(&args, 1))?,
            "replace" | "replaceAll" => {
                let replacement = arg(&args, 1);
                let (regex, global) = match self.regexp_of(&first) {
                    Some(data) => {
                        if name == "replaceAll" && !data.is_global() {
                            return Err(self.type_error("replaceAll must be called with a global RegExp"));
                        }
                        (data.regex.clone(), data.is_global())
                    }
                    None => {
                        let pattern = regex::escape(&self.to_js_string(&first));
                        let regex = self.new_regexp(&pattern, "")?;
                        let data = self.regexp_of(&regex);
                        match data {
                            Some(data) => (data.regex, name == "replaceAll"),
                            None => return Ok(None),
                        }
                    }
                };
                Value::string(self.replace_matches(&s, &regex, global, &replacement)?)
            }
            "match" => {
                let data = match self.regexp_of(&first) {
                    Some(data) => data,
                    None => {
                        let source = match &first {
                            Value::Undefined => Rc::from(""),
                            other => self.to_js_string(other),
                        };
                        let regex = self.new_regexp(&source, "")?;
                        match self.regexp_of(&regex) {
                            Some(data) => data,
                            None => return Ok(None),
                        }
                    }
                };
                if data.is_global() {
                    let matches: Vec<Value> = data
                        .regex
                        .find_iter(&s)
                        .map(|m| Value::string(m.as_str()))
                        .collect();
                    if matches.is_empty() {
                        Value::Null
                    } else {
                        self.new_array(matches)
                    }
                } else {
                    self.exec_regexp(&data, &s)
                }
            }
            "search" => {
                let data = match self.regexp_of(&first) {
                    Some(data) => data,
                    None => {
                        let source = self.to_js_string(&first);
                        let regex = self.new_regexp(&source, "")?;
                        match self.regexp_of(&regex) {
                            Some(data) => data,
                            None => return Ok(None),
                        }
                    }
                };
                let found = data.regex.find(&s).map(|m| s[..m.start()].chars().count());
                Value::Number(found.map_or(-1.0, |i| i as f64))
            }
            "localeCompare" => Value::Number(locale_compare(&s, &self.to_js_string(&first))),
            "normalize" | "toString" | "valueOf" => Value::String(s.clone()),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn regexp_of(&self, value: &Value) -> Option<RegExpData> {
        match &self.heap.get(value.as_object()?).kind {
            ObjectKind::RegExp(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn split_string(&mut self, s: &str, separator: &Value, limit: &Value) -> Result<Value, Abrupt> {
        let limit = match limit {
            Value::Undefined => usize::MAX,
            other => self.to_integer(other).max(0.0) as usize,
        };
        let parts: Vec<Value> = match separator {
            Value::Undefined => vec![Value::string(s)],
            other => match self.regexp_of(other) {
                Some(data) => data.regex.split(s).take(limit).map(Value::string).collect(),
                None => {
                    let separator = self.to_js_string(other);
                    if separator.is_empty() {
                        s.chars().take(limit).map(|c| Value::string(c.to_string())).collect()
                    } else {
                        s.split(&*separator).take(limit).map(Value::string).collect()
                    }
                }
            },
        };
        self.check_array_len(parts.len())?;
        Ok(self.new_array(parts))
    }

    fn replace_matches(&mut self, s: &str, regex: &Regex, global: bool, replacement: &Value) -> Result<String, Abrupt> {
        let all: Vec<Captures> = if global {
            regex.captures_iter(s).collect()
        } else {
            regex.captures(s).into_iter().collect()
        };
        let callable = self.heap.is_callable(replacement);
        let template = if callable {
            Rc::from("")
        } else {
            self.to_js_string(replacement)
        };
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in &all {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            if callable {
                let mut call_args = vec![Value::string(whole.as_str())];
                for group in caps.iter().skip(1) {
                    call_args.push(group.map_or(Value::Undefined, |m| Value::string(m.as_str())));
                }
                call_args.push(Value::Number(s[..whole.start()].chars().count() as f64));
                call_args.push(Value::string(s));
                let result = self.call_function(replacement, call_args)?;
                out.push_str(&self.to_js_string(&result));
            } else {
                expand_replacement(&template, caps, &mut out);
            }
            last = whole.end();
            self.check_string_len(out.len())?;
        }
        out.push_str(&s[last..]);
        Ok(out)
    }

    fn exec_regexp(&mut self, data: &RegExpData, s: &str) -> Value {
        let Some(caps) = data.regex.captures(s) else {
            return Value::Null;
        };
        let items = caps
            .iter()
            .map(|group| group.map_or(Value::Undefined, |m| Value::string(m.as_str())))
            .collect();
        let result = self.new_array(items);
        let start = caps.get(0).map_or(0, |m| m.start());
        let mut groups = PropertyMap::new();
        for name in data.regex.capture_names().flatten() {
            let value = caps.name(name).map_or(Value::Undefined, |m| Value::string(m.as_str()));
            groups.insert(name.into(), value);
        }
        let groups = if groups.is_empty() {
            Value::Undefined
        } else {
            self.new_object(groups)
        };
        if let Some(id) = result.as_object() {
            let props = &mut self.heap.get_mut(id).props;
            props.insert("index".into(), Value::Number(s[..start].chars().count() as f64));
            props.insert("input".into(), Value::string(s));
            props.insert("groups".into(), groups);
        }
        result
    }

    fn regexp_method(&mut self, data: &RegExpData, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let input = self.to_js_string(&arg(&args, 0));
        Ok(Some(match name {
            "test" => Value::Bool(data.regex.is_match(&input)),
            "exec" => self.exec_regexp(data, &input),
            "toString" => Value::string(format!("/{}/{}", data.source, data.flags)),
            _ => return Ok(None),
        }))
    }

    fn number_method(&mut self, n: f64, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let first = arg(&args, 0);
        let text = match name {
            "toFixed" => {
                let digits = self.to_integer(&first);
                if !(0.0..=100.0).contains(&digits) {
                    return Err(self.range_error("toFixed() digits argument must be between 0 and 100"));
                }
                if !n.is_finite() || n.abs() >= 1e21 {
                    number_to_string(n)
                } else {
                    let n = if n == 0.0 { 0.0 } else { n };
                    format!("{:.*}", digits as usize, n)
                }
            }
            "toPrecision" => match first {
                Value::Undefined => number_to_string(n),
                other => {
                    let precision = self.to_integer(&other);
                    if !(1.0..=100.0).contains(&precision) {
                        return Err(self.range_error("toPrecision() argument must be between 1 and 100"));
                    }
                    to_precision(n, precision as usize)
                }
            },
            "toString" => match first {
                Value::Undefined => number_to_string(n),
                other => {
                    let radix = self.to_integer(&other);
                    if !(2.0..=36.0).contains(&radix) {
                        return Err(self.range_error("toString() radix must be between 2 and 36"));
                    }
                    to_radix_string(n, radix as u32)
                }
            },
            "toLocaleString" => to_locale_string(n),
            "valueOf" => return Ok(Some(Value::Number(n))),
            _ => return Ok(None),
        };
        Ok(Some(Value::string(text)))
    }

    fn set_method(&mut self, id: ObjectId, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let this = Value::Object(id);
        let first = arg(&args, 0);
        let value = match name {
            "add" => {
                self.with_table(id, |table| table.insert(first, Value::Undefined));
                this
            }
            "has" => Value::Bool(self.with_table(id, |table| table.contains(&first)).unwrap_or(false)),
            "delete" => Value::Bool(self.with_table(id, |table| table.remove(&first)).unwrap_or(false)),
            "clear" => {
                self.with_table(id, OrderedTable::clear);
                Value::Undefined
            }
            "forEach" => {
                self.require_callable(&first)?;
                for (key, _) in self.table_entries(id) {
                    self.call_function(&first, vec![key.clone(), key, this.clone()])?;
                }
                Value::Undefined
            }
            "values" | "keys" => {
                let keys = self.table_entries(id).into_iter().map(|(k, _)| k).collect();
                self.new_array(keys)
            }
            "entries" => {
                let entries = self
                    .table_entries(id)
                    .into_iter()
                    .map(|(k, _)| self.new_array(vec![k.clone(), k]))
                    .collect();
                self.new_array(entries)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn map_method(&mut self, id: ObjectId, name: &str, args: Vec<Value>) -> Result<Option<Value>, Abrupt> {
        let this = Value::Object(id);
        let first = arg(&args, 0);
        let value = match name {
            "get" => self
                .with_table(id, |table| table.get(&first).cloned())
                .flatten()
                .unwrap_or(Value::Undefined),
            "set" => {
                let value = arg(&args, 1);
                self.with_table(id, |table| table.insert(first, value));
                this
            }
            "has" => Value::Bool(self.with_table(id, |table| table.contains(&first)).unwrap_or(false)),
            "delete" => Value::Bool(self.with_table(id, |table| table.remove(&first)).unwrap_or(false)),
            "clear" => {
                self.with_table(id, OrderedTable::clear);
                Value::Undefined
            }
            "forEach" => {
                self.require_callable(&first)?;
                for (key, value) in self.table_entries(id) {
                    self.call_function(&first, vec![value, key, this.clone()])?;
                }
                Value::Undefined
            }
            "keys" | "values" => {
                let keys = name == "keys";
                let items = self
                    .table_entries(id)
                    .into_iter()
                    .map(|(k, v)| if keys { k } else { v })
                    .collect();
                self.new_array(items)
            }
            "entries" => {
                let entries = self
                    .table_entries(id)
                    .into_iter()
                    .map(|(k, v)| self.new_array(vec![k, v]))
                    .collect();
                self.new_array(entries)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn with_table<R>(&mut self, id: ObjectId, f: impl FnOnce(&mut OrderedTable) -> R) -> Option<R> {
        match &mut self.heap.get_mut(id).kind {
            ObjectKind::Set(table) | ObjectKind::Map(table) => Some(f(table)),
            _ => None,
        }
    }

    fn table_entries(&self, id: ObjectId) -> Vec<(Value, Value)> {
        match &self.heap.get(id).kind {
            ObjectKind::Set(table) | ObjectKind::Map(table) => {
                table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Byte offset of the `index`-th character (or the end of the string).
fn byte_offset(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(b, _)| b)
}

fn char_range(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Expand `$&`, `$n`, `$<name>` and `$$` in a replacement template.
fn expand_replacement(template: &str, caps: &Captures, out: &mut String) {
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(caps.get(0).map_or("", |m| m.as_str()));
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    if digits.len() == 2 {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                match digits.parse::<usize>() {
                    Ok(group) if group > 0 && group < caps.len() => {
                        out.push_str(caps.get(group).map_or("", |m| m.as_str()));
                    }
                    _ => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            Some('<') => {
                let rest: String = chars.clone().collect();
                match rest.find('>') {
                    Some(close) => {
                        let name = &rest[1..close];
                        out.push_str(caps.name(name).map_or("", |m| m.as_str()));
                        for _ in 0..rest[..=close].chars().count() {
                            chars.next();
                        }
                    }
                    None => out.push('$'),
                }
            }
            _ => out.push('$'),
        }
    }
}

/// `parseInt`; a radix of 0 means "not given" (hex prefix detection applies).
fn parse_int(text: &str, radix: u32) -> f64 {
    let s = text.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let unspecified = radix == 0;
    let mut radix = if unspecified { 10 } else { radix };
    let mut digits = s;
    if (unspecified || radix == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        digits = &s[2..];
        radix = 16;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut any = false;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        value = value * f64::from(radix) + f64::from(d);
        any = true;
    }
    if !any {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// `parseFloat`: the longest decimal-literal prefix.
fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if s.starts_with(prefix) {
            return value;
        }
    }
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

fn to_precision(n: f64, precision: usize) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    let formatted = format!("{:.*e}", precision - 1, n);
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -6 || exponent >= precision as i32 {
        let sign = if exponent >= 0 { "+" } else { "-" };
        format!("{}e{}{}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, n)
    }
}

fn to_radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return number_to_string(n);
    }
    let base = f64::from(radix);
    let mut int = n.abs().trunc();
    let mut frac = n.abs().fract();
    let mut digits = Vec::new();
    loop {
        let d = (int % base) as u32;
        digits.push(char::from_digit(d, radix).unwrap_or('0'));
        int = (int / base).trunc();
        if int == 0.0 {
            break;
        }
    }
    if n < 0.0 {
        digits.push('-');
    }
    let mut out: String = digits.into_iter().rev().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= base;
            let d = frac.trunc();
            out.push(char::from_digit(d as u32, radix).unwrap_or('0'));
            frac -= d;
            if frac == 0.0 {
                break;
            }
        }
    }
    out
}

/// `en-US` style grouping with at most three fraction digits.
fn to_locale_string(n: f64) -> String {
    if !n.is_finite() {
        return if n.is_nan() { "NaN".to_string() } else if n > 0.0 { "∞".to_string() } else { "-∞".to_string() };
    }
    let fixed = format!("{:.3}", n.abs());
    let (int, frac) = fixed.split_once('.').unwrap_or((&fixed, ""));
    let mut grouped = String::new();
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let frac = frac.trim_end_matches('0');
    let sign = if n < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

/// Approximation of the default collation: case-insensitive first, lowercase before uppercase.
fn locale_compare(a: &str, b: &str) -> f64 {
    let ordering = match a.to_lowercase().cmp(&b.to_lowercase()) {
        Ordering::Equal => b.cmp(a),
        other => other,
    };
    match ordering {
        Ordering::Less => -1.0,
        Ordering::Equal => 0.0,
        Ordering::Greater => 1.0,
    }
}
