//! Tree-walking evaluator for parsed query programs

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};

use super::ast::*;
use super::error::EvalError;
use super::value::{
    array_index, number_to_string, Callable, EnvId, ErrorKind, Heap, Native, ObjectId, ObjectKind,
    PropertyMap, RegExpData, Value,
};

/// Deepest chain of script-level calls before a RangeError.
pub const MAX_CALL_DEPTH: usize = 300;
/// Longest string a script may build, in bytes.
pub const MAX_STRING_LEN: usize = 1 << 26;
/// Largest array a script may build.
pub const MAX_ARRAY_LEN: usize = 1 << 24;

/// Deepest expression nesting during evaluation (long operator chains included).
pub const MAX_EVAL_DEPTH: usize = 10_000;

const MAX_OBJECTS: usize = 8_000_000;
const MAX_SCOPES: usize = 8_000_000;
const CHECK_INTERVAL: u64 = 256;

/// Wall-clock budget shared between the evaluating thread and its watchdog.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Option<Instant>,
    abort: Arc<AtomicBool>,
}

impl Budget {
    pub fn new(timeout: Duration, abort: Arc<AtomicBool>) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            abort,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn exhausted(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Non-local exit of an evaluation step.
#[derive(Debug, Clone)]
pub enum Abrupt {
    /// A script-level exception, catchable by `try`.
    Throw(Value),
    /// The budget ran out; never catchable.
    Timeout,
    /// An optional chain met a nullish link; resolved at the chain boundary.
    Nullish,
}

/// Functions provided by the embedder, dispatched by slot number.
pub trait HostFunctions {
    fn call(&self, interp: &mut Interpreter, slot: usize, args: Vec<Value>) -> Result<Value, Abrupt>;
}

/// Property key after conversion: array index or name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PropertyKey {
    Index(usize),
    Name(Rc<str>),
}

impl PropertyKey {
    pub(crate) fn named(name: Rc<str>) -> Self {
        match array_index(&name) {
            Some(i) => PropertyKey::Index(i),
            None => PropertyKey::Name(name),
        }
    }

    pub(crate) fn to_name(&self) -> Rc<str> {
        match self {
            PropertyKey::Index(i) => i.to_string().into(),
            PropertyKey::Name(name) => name.clone(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
    lexical: bool,
}

#[derive(Debug)]
struct Scope {
    parent: Option<EnvId>,
    bindings: HashMap<Rc<str>, Binding>,
    function: bool,
}

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindMode {
    Const,
    Let,
    Var,
    Assign,
}

impl From<DeclKind> for BindMode {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Const => BindMode::Const,
            DeclKind::Let => BindMode::Let,
            DeclKind::Var => BindMode::Var,
        }
    }
}

enum Reference {
    Var(Rc<str>),
    Member(Value, PropertyKey),
}

pub struct Interpreter {
    pub(crate) heap: Heap,
    scopes: Vec<Scope>,
    global: EnvId,
    budget: Budget,
    steps: u64,
    call_depth: usize,
    eval_depth: usize,
    host: Option<Rc<dyn HostFunctions>>,
    regex_cache: HashMap<(Rc<str>, Rc<str>), Rc<Regex>>,
}

impl Interpreter {
    /// Create an interpreter whose global scope holds only the built-in allow-list.
    pub fn new(budget: Budget) -> Self {
        let mut interp = Self {
            heap: Heap::new(),
            scopes: vec![Scope {
                parent: None,
                bindings: HashMap::new(),
                function: true,
            }],
            global: EnvId(0),
            budget,
            steps: 0,
            call_depth: 0,
            eval_depth: 0,
            host: None,
            regex_cache: HashMap::new(),
        };
        interp.install_globals();
        interp
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn set_host(&mut self, host: Rc<dyn HostFunctions>) {
        self.host = Some(host);
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        let global = self.global;
        self.scopes[global.0].bindings.insert(
            name.into(),
            Binding {
                value,
                mutable: true,
                lexical: false,
            },
        );
    }

    pub fn define_host_function(&mut self, name: &str, slot: usize) {
        let function = self.new_function(Callable::Host(slot));
        self.define_global(name, function);
    }

    /// Evaluate a program to completion. Statement programs yield what they `return`.
    pub fn run(&mut self, program: &Program) -> Result<Value, EvalError> {
        let env = self.new_scope(Some(self.global), true);
        let result = match program {
            Program::Expression(expr) => self.eval(expr, env),
            Program::Statements(body) => {
                self.hoist_vars(body, env);
                self.exec_block(body, env).map(|completion| match completion {
                    Completion::Return(value) => value,
                    _ => Value::Undefined,
                })
            }
        };
        match result {
            Ok(value) => Ok(value),
            Err(Abrupt::Nullish) => Ok(Value::Undefined),
            Err(abrupt) => Err(self.to_eval_error(abrupt)),
        }
    }

    /// Describe an abrupt exit for callers outside the interpreter.
    pub fn to_eval_error(&self, abrupt: Abrupt) -> EvalError {
        match abrupt {
            Abrupt::Timeout => EvalError::Timeout,
            Abrupt::Throw(exception) => EvalError::Runtime(self.exception_message(&exception)),
            Abrupt::Nullish => EvalError::Runtime("Cannot read properties of undefined".into()),
        }
    }

    fn exception_message(&self, exception: &Value) -> String {
        if let Some(id) = exception.as_object() {
            if let ObjectKind::Error { message, .. } = &self.heap.get(id).kind {
                return message.to_string();
            }
        }
        self.to_js_string(exception).to_string()
    }

    // ----- allocation helpers -----

    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.heap.alloc(ObjectKind::Array(items), PropertyMap::new()))
    }

    pub fn new_object(&mut self, props: PropertyMap) -> Value {
        Value::Object(self.heap.alloc(ObjectKind::Ordinary, props))
    }

    pub(crate) fn new_function(&mut self, callable: Callable) -> Value {
        Value::Object(self.heap.alloc(ObjectKind::Function(callable), PropertyMap::new()))
    }

    /// Allocate an error object and wrap it as a throw.
    pub fn error(&mut self, kind: ErrorKind, message: impl Into<Rc<str>>) -> Abrupt {
        Abrupt::Throw(self.new_error(kind, message.into()))
    }

    pub(crate) fn new_error(&mut self, kind: ErrorKind, message: Rc<str>) -> Value {
        Value::Object(
            self.heap
                .alloc(ObjectKind::Error { kind, message }, PropertyMap::new()),
        )
    }

    pub fn type_error(&mut self, message: impl Into<Rc<str>>) -> Abrupt {
        self.error(ErrorKind::TypeError, message)
    }

    pub(crate) fn range_error(&mut self, message: impl Into<Rc<str>>) -> Abrupt {
        self.error(ErrorKind::RangeError, message)
    }

    pub(crate) fn new_regexp(&mut self, source: &str, flags: &str) -> Result<Value, Abrupt> {
        let key: (Rc<str>, Rc<str>) = (source.into(), flags.into());
        let regex = match self.regex_cache.get(&key) {
            Some(regex) => regex.clone(),
            None => {
                let regex = Rc::new(self.compile_regex(source, flags)?);
                self.regex_cache.insert(key.clone(), regex.clone());
                regex
            }
        };
        let data = RegExpData {
            regex,
            source: key.0,
            flags: key.1,
        };
        Ok(Value::Object(self.heap.alloc(ObjectKind::RegExp(data), PropertyMap::new())))
    }

    fn compile_regex(&mut self, source: &str, flags: &str) -> Result<Regex, Abrupt> {
        if let Some(bad) = flags.chars().find(|c| !"gimsuy".contains(*c)) {
            return Err(self.error(
                ErrorKind::SyntaxError,
                format!("Invalid flags supplied to RegExp constructor '{}'", bad),
            ));
        }
        RegexBuilder::new(source)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .size_limit(1 << 20)
            .build()
            .map_err(|e| {
                let detail = e.to_string();
                let detail = detail.lines().last().unwrap_or_default().trim().to_string();
                self.error(
                    ErrorKind::SyntaxError,
                    format!("Invalid regular expression: /{}/: {}", source, detail),
                )
            })
    }

    // ----- budget -----

    /// Count one evaluation step; periodically checks the deadline and allocation caps.
    pub(crate) fn tick(&mut self) -> Result<(), Abrupt> {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % CHECK_INTERVAL != 0 {
            return Ok(());
        }
        if self.budget.exhausted() {
            return Err(Abrupt::Timeout);
        }
        if self.heap.len() > MAX_OBJECTS || self.scopes.len() > MAX_SCOPES {
            return Err(self.range_error("Allocation limit exceeded"));
        }
        Ok(())
    }

    pub(crate) fn check_string_len(&mut self, len: usize) -> Result<(), Abrupt> {
        if len > MAX_STRING_LEN {
            return Err(self.range_error("Invalid string length"));
        }
        Ok(())
    }

    pub(crate) fn check_array_len(&mut self, len: usize) -> Result<(), Abrupt> {
        if len > MAX_ARRAY_LEN {
            return Err(self.range_error("Invalid array length"));
        }
        Ok(())
    }

    // ----- scopes -----

    fn new_scope(&mut self, parent: Option<EnvId>, function: bool) -> EnvId {
        self.scopes.push(Scope {
            parent,
            bindings: HashMap::new(),
            function,
        });
        EnvId(self.scopes.len() - 1)
    }

    fn find_binding(&self, name: &str, env: EnvId) -> Option<EnvId> {
        let mut current = Some(env);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if scope.bindings.contains_key(name) {
                return Some(id);
            }
            current = scope.parent;
        }
        None
    }

    fn lookup(&mut self, name: &str, env: EnvId) -> Result<Value, Abrupt> {
        match self.find_binding(name, env) {
            Some(id) => Ok(self.scopes[id.0].bindings[name].value.clone()),
            None => Err(self.error(ErrorKind::ReferenceError, format!("{} is not defined", name))),
        }
    }

    fn assign_var(&mut self, name: &Rc<str>, value: Value, env: EnvId) -> Result<(), Abrupt> {
        let Some(id) = self.find_binding(name, env) else {
            // sloppy-mode assignment to an undeclared name creates a global
            self.define_global(name, value);
            return Ok(());
        };
        let immutable = self.scopes[id.0]
            .bindings
            .get(name)
            .is_some_and(|binding| !binding.mutable);
        if immutable {
            return Err(self.type_error("Assignment to constant variable."));
        }
        if let Some(binding) = self.scopes[id.0].bindings.get_mut(name) {
            binding.value = value;
        }
        Ok(())
    }

    fn declare_lexical(&mut self, name: &Rc<str>, value: Value, env: EnvId, mutable: bool) -> Result<(), Abrupt> {
        if self.scopes[env.0].bindings.contains_key(name) {
            return Err(self.error(
                ErrorKind::SyntaxError,
                format!("Identifier '{}' has already been declared", name),
            ));
        }
        self.scopes[env.0].bindings.insert(
            name.clone(),
            Binding {
                value,
                mutable,
                lexical: true,
            },
        );
        Ok(())
    }

    fn function_scope(&self, env: EnvId) -> EnvId {
        let mut current = env;
        loop {
            let scope = &self.scopes[current.0];
            match scope.parent {
                Some(parent) if !scope.function => current = parent,
                _ => return current,
            }
        }
    }

    fn declare_var(&mut self, name: &Rc<str>, value: Option<Value>, env: EnvId) -> Result<(), Abrupt> {
        let target = self.function_scope(env);
        let existing = self.scopes[target.0].bindings.get(name).map(|b| b.lexical);
        match existing {
            Some(true) => Err(self.error(
                ErrorKind::SyntaxError,
                format!("Identifier '{}' has already been declared", name),
            )),
            Some(false) => {
                if let (Some(value), Some(binding)) = (value, self.scopes[target.0].bindings.get_mut(name)) {
                    binding.value = value;
                }
                Ok(())
            }
            None => {
                self.scopes[target.0].bindings.insert(
                    name.clone(),
                    Binding {
                        value: value.unwrap_or(Value::Undefined),
                        mutable: true,
                        lexical: false,
                    },
                );
                Ok(())
            }
        }
    }

    fn hoist_vars(&mut self, body: &[Stmt], env: EnvId) {
        let mut names = Vec::new();
        for stmt in body {
            collect_var_names(stmt, &mut names);
        }
        let scope = &mut self.scopes[env.0];
        for name in names {
            scope.bindings.entry(name).or_insert(Binding {
                value: Value::Undefined,
                mutable: true,
                lexical: false,
            });
        }
    }

    fn bind_name(&mut self, name: &Rc<str>, value: Value, env: EnvId, mode: BindMode) -> Result<(), Abrupt> {
        match mode {
            BindMode::Const => self.declare_lexical(name, value, env, false),
            BindMode::Let => self.declare_lexical(name, value, env, true),
            BindMode::Var => self.declare_var(name, Some(value), env),
            BindMode::Assign => self.assign_var(name, value, env),
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, env: EnvId, mode: BindMode) -> Result<(), Abrupt> {
        match pattern {
            Pattern::Ident(name) => self.bind_name(name, value, env, mode),
            Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    let shown = self.to_js_string(&value);
                    return Err(self.type_error(format!("Cannot destructure '{}' as it is {}.", shown, shown)));
                }
                let mut used = Vec::with_capacity(props.len());
                for prop in props {
                    let key = match &prop.key {
                        PropKey::Static(name) => name.clone(),
                        PropKey::Computed(expr) => {
                            let key = self.eval(expr, env)?;
                            self.to_js_string(&key)
                        }
                    };
                    let mut item = self.get_member(&value, &PropertyKey::named(key.clone()))?;
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &prop.default {
                            item = self.eval(default, env)?;
                        }
                    }
                    used.push(key);
                    self.bind_pattern(&prop.value, item, env, mode)?;
                }
                if let Some(rest) = rest {
                    let mut remaining = PropertyMap::new();
                    for (key, item) in self.own_entries(&value) {
                        if !used.contains(&key) {
                            remaining.insert(key, item);
                        }
                    }
                    let object = self.new_object(remaining);
                    self.bind_name(rest, object, env, mode)?;
                }
                Ok(())
            }
            Pattern::Array { elems, rest } => {
                let items = self.iterate(&value)?;
                for (i, elem) in elems.iter().enumerate() {
                    let Some(elem) = elem else { continue };
                    let mut item = items.get(i).cloned().unwrap_or(Value::Undefined);
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &elem.default {
                            item = self.eval(default, env)?;
                        }
                    }
                    self.bind_pattern(&elem.pattern, item, env, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = items.get(elems.len()..).map(<[Value]>::to_vec).unwrap_or_default();
                    let array = self.new_array(remaining);
                    self.bind_pattern(rest, array, env, mode)?;
                }
                Ok(())
            }
        }
    }

    // ----- statements -----

    fn exec_block(&mut self, body: &[Stmt], env: EnvId) -> Result<Completion, Abrupt> {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let function = self.closure(def, env);
                    self.scopes[env.0].bindings.insert(
                        name.clone(),
                        Binding {
                            value: function,
                            mutable: true,
                            lexical: false,
                        },
                    );
                }
            }
        }
        for stmt in body {
            match self.exec(stmt, env)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: EnvId) -> Result<Completion, Abrupt> {
        self.tick()?;
        match stmt {
            Stmt::Empty | Stmt::Function(_) => Ok(Completion::Normal),
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Completion::Normal)
            }
            Stmt::Decl { kind, decls } => {
                for (pattern, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, env)?,
                        None => Value::Undefined,
                    };
                    if init.is_none() && *kind == DeclKind::Var {
                        // `var x;` keeps a hoisted value
                        if let Pattern::Ident(name) = pattern {
                            self.declare_var(name, None, env)?;
                            continue;
                        }
                    }
                    self.bind_pattern(pattern, value, env, BindMode::from(*kind))?;
                }
                Ok(Completion::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::If { test, then, otherwise } => {
                if self.eval(test, env)?.truthy() {
                    self.exec(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, env)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::Block(body) => {
                let scope = if needs_scope(body) {
                    self.new_scope(Some(env), false)
                } else {
                    env
                };
                self.exec_block(body, scope)
            }
            Stmt::For { init, test, update, body } => {
                let scope = self.new_scope(Some(env), false);
                if let Some(init) = init {
                    self.exec(init, scope)?;
                }
                loop {
                    self.tick()?;
                    if let Some(test) = test {
                        if !self.eval(test, scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, scope)?;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::ForOf { kind, target, iterable, body } => {
                let iterable = self.eval(iterable, env)?;
                let items = self.iterate(&iterable)?;
                self.run_loop_over(items, *kind, target, body, env)
            }
            Stmt::ForIn { kind, target, object, body } => {
                let object = self.eval(object, env)?;
                let keys = self
                    .own_entries(&object)
                    .into_iter()
                    .map(|(key, _)| Value::String(key))
                    .collect();
                self.run_loop_over(keys, *kind, target, body, env)
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, env)?.truthy() {
                        break;
                    }
                    match self.exec(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    self.tick()?;
                    match self.exec(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, env)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(Abrupt::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let scope = self.new_scope(Some(env), false);
                let mut result = self.exec_block(block, scope);
                if let (Err(Abrupt::Throw(exception)), Some(handler)) = (&result, handler) {
                    let exception = exception.clone();
                    let scope = self.new_scope(Some(env), false);
                    result = match param {
                        Some(param) => self
                            .bind_pattern(param, exception, scope, BindMode::Let)
                            .and_then(|()| self.exec_block(handler, scope)),
                        None => self.exec_block(handler, scope),
                    };
                }
                if matches!(result, Err(Abrupt::Timeout)) {
                    return result;
                }
                if let Some(finalizer) = finalizer {
                    let scope = self.new_scope(Some(env), false);
                    match self.exec_block(finalizer, scope)? {
                        Completion::Normal => {}
                        other => return Ok(other),
                    }
                }
                result
            }
        }
    }

    fn run_loop_over(
        &mut self,
        items: Vec<Value>,
        kind: Option<DeclKind>,
        target: &Pattern,
        body: &Stmt,
        env: EnvId,
    ) -> Result<Completion, Abrupt> {
        for item in items {
            self.tick()?;
            let (scope, mode) = match kind {
                Some(DeclKind::Var) => (env, BindMode::Var),
                Some(kind) => (self.new_scope(Some(env), false), BindMode::from(kind)),
                None => (env, BindMode::Assign),
            };
            self.bind_pattern(target, item, scope, mode)?;
            match self.exec(body, scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    // ----- expressions -----

    fn eval(&mut self, expr: &Expr, env: EnvId) -> Result<Value, Abrupt> {
        self.tick()?;
        if self.eval_depth >= MAX_EVAL_DEPTH {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        self.eval_depth += 1;
        let result = self.eval_inner(expr, env);
        self.eval_depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, env: EnvId) -> Result<Value, Abrupt> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Template(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    match piece {
                        TemplatePiece::Str(s) => out.push_str(s),
                        TemplatePiece::Expr(expr) => {
                            let value = self.eval(expr, env)?;
                            out.push_str(&self.to_js_string(&value));
                        }
                    }
                    self.check_string_len(out.len())?;
                }
                Ok(Value::string(out))
            }
            Expr::Regex { pattern, flags } => self.new_regexp(pattern, flags),
            Expr::Ident(name) => self.lookup(name, env),
            Expr::Array(elems) => {
                let mut items = Vec::with_capacity(elems.len());
                for elem in elems {
                    match elem {
                        ArrayElem::Item(expr) => items.push(self.eval(expr, env)?),
                        ArrayElem::Spread(expr) => {
                            let value = self.eval(expr, env)?;
                            items.extend(self.iterate(&value)?);
                        }
                        ArrayElem::Hole => items.push(Value::Undefined),
                    }
                    self.check_array_len(items.len())?;
                }
                Ok(self.new_array(items))
            }
            Expr::Object(props) => {
                let mut map = PropertyMap::new();
                for prop in props {
                    match prop {
                        ObjectProp::KeyValue(key, value) => {
                            let key = match key {
                                PropKey::Static(name) => name.clone(),
                                PropKey::Computed(expr) => {
                                    let key = self.eval(expr, env)?;
                                    self.to_js_string(&key)
                                }
                            };
                            let value = self.eval(value, env)?;
                            map.insert(key, value);
                        }
                        ObjectProp::Spread(expr) => {
                            let value = self.eval(expr, env)?;
                            for (key, item) in self.own_entries(&value) {
                                map.insert(key, item);
                            }
                        }
                    }
                }
                Ok(self.new_object(map))
            }
            Expr::Function(def) => Ok(self.closure(def, env)),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, env),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.eval_reference(target, env)?;
                let current = self.get_reference(&reference, env)?;
                let old = self.to_number(&current);
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.put_reference(&reference, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional(test, consequent, alternate) => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, env),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, env)?;
                if *optional && object.is_nullish() {
                    return Err(Abrupt::Nullish);
                }
                let key = self.member_key(property, env)?;
                self.get_member(&object, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, env),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.construct(&constructor, args, callee)
            }
            Expr::OptionalChain(inner) => match self.eval(inner, env) {
                Err(Abrupt::Nullish) => Ok(Value::Undefined),
                other => other,
            },
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, env)?;
                }
                Ok(last)
            }
        }
    }

    fn closure(&mut self, def: &Rc<FunctionDef>, env: EnvId) -> Value {
        self.new_function(Callable::Closure {
            def: def.clone(),
            env,
        })
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: EnvId) -> Result<Value, Abrupt> {
        if op == UnaryOp::TypeOf {
            if let Expr::Ident(name) = operand {
                if self.find_binding(name, env).is_none() {
                    return Ok(Value::string("undefined"));
                }
            }
        }
        let value = self.eval(operand, env)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-self.to_number(&value)),
            UnaryOp::Plus => Value::Number(self.to_number(&value)),
            UnaryOp::TypeOf => Value::string(self.type_of(&value)),
            UnaryOp::Void => Value::Undefined,
        })
    }

    fn eval_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, env: EnvId) -> Result<Value, Abrupt> {
        let reference = self.eval_reference(target, env)?;
        let result = match op {
            AssignOp::Assign => self.eval(value, env)?,
            AssignOp::Arith(op) => {
                let current = self.get_reference(&reference, env)?;
                let right = self.eval(value, env)?;
                self.binary(op, &current, &right)?
            }
            AssignOp::Logical(op) => {
                let current = self.get_reference(&reference, env)?;
                let keep = match op {
                    LogicalOp::And => !current.truthy(),
                    LogicalOp::Or => current.truthy(),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value, env)?
            }
        };
        self.put_reference(&reference, result.clone(), env)?;
        Ok(result)
    }

    fn eval_reference(&mut self, target: &Expr, env: EnvId) -> Result<Reference, Abrupt> {
        match target {
            Expr::Ident(name) => Ok(Reference::Var(name.clone())),
            Expr::Member { object, property, .. } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                Ok(Reference::Member(object, key))
            }
            _ => Err(self.error(ErrorKind::SyntaxError, "Invalid left-hand side in assignment")),
        }
    }

    fn get_reference(&mut self, reference: &Reference, env: EnvId) -> Result<Value, Abrupt> {
        match reference {
            Reference::Var(name) => self.lookup(name, env),
            Reference::Member(object, key) => self.get_member(object, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value, env: EnvId) -> Result<(), Abrupt> {
        match reference {
            Reference::Var(name) => self.assign_var(name, value, env),
            Reference::Member(object, key) => self.set_member(object, key, value),
        }
    }

    fn member_key(&mut self, property: &MemberProp, env: EnvId) -> Result<PropertyKey, Abrupt> {
        match property {
            MemberProp::Static(name) => Ok(PropertyKey::Name(name.clone())),
            MemberProp::Computed(expr) => {
                let key = self.eval(expr, env)?;
                Ok(self.to_property_key(&key))
            }
        }
    }

    pub(crate) fn to_property_key(&self, value: &Value) -> PropertyKey {
        match value {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
                PropertyKey::Index(*n as usize)
            }
            Value::String(s) => PropertyKey::named(s.clone()),
            other => PropertyKey::Name(self.to_js_string(other)),
        }
    }

    fn eval_args(&mut self, args: &[Arg], env: EnvId) -> Result<Vec<Value>, Abrupt> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Item(expr) => values.push(self.eval(expr, env)?),
                Arg::Spread(expr) => {
                    let value = self.eval(expr, env)?;
                    values.extend(self.iterate(&value)?);
                    self.check_array_len(values.len())?;
                }
            }
        }
        Ok(values)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Arg], optional: bool, env: EnvId) -> Result<Value, Abrupt> {
        let Expr::Member {
            object,
            property,
            optional: member_optional,
        } = callee
        else {
            let function = self.eval(callee, env)?;
            if optional && function.is_nullish() {
                return Err(Abrupt::Nullish);
            }
            let args = self.eval_args(args, env)?;
            return self.call_described(&function, args, callee);
        };

        let receiver = self.eval(object, env)?;
        if *member_optional && receiver.is_nullish() {
            return Err(Abrupt::Nullish);
        }
        let key = self.member_key(property, env)?;
        if receiver.is_nullish() {
            return Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                self.to_js_string(&receiver),
                key
            )));
        }
        let own = self.own_property(&receiver, &key);
        if optional && own.as_ref().is_some_and(Value::is_nullish) {
            return Err(Abrupt::Nullish);
        }
        let args = self.eval_args(args, env)?;
        if let Some(function) = own {
            return self.call_described(&function, args, callee);
        }
        let name = key.to_name();
        match self.call_method(&receiver, &name, args)? {
            Some(value) => Ok(value),
            None if optional => Err(Abrupt::Nullish),
            None => Err(self.type_error(format!("{} is not a function", describe_expr(callee)))),
        }
    }

    fn call_described(&mut self, function: &Value, args: Vec<Value>, callee: &Expr) -> Result<Value, Abrupt> {
        if !self.heap.is_callable(function) {
            return Err(self.type_error(format!("{} is not a function", describe_expr(callee))));
        }
        self.call_function(function, args)
    }

    /// Call a script-visible function value.
    pub fn call_function(&mut self, function: &Value, args: Vec<Value>) -> Result<Value, Abrupt> {
        let callable = match function.as_object().map(|id| &self.heap.get(id).kind) {
            Some(ObjectKind::Function(callable)) => callable.clone(),
            _ => {
                let shown = self.to_js_string(function);
                return Err(self.type_error(format!("{} is not a function", shown)));
            }
        };
        match callable {
            Callable::Closure { def, env } => self.call_closure(&def, env, function, args),
            Callable::Native(native) => self.call_native(native, args),
            Callable::Host(slot) => match self.host.clone() {
                Some(host) => host.call(self, slot, args),
                None => Err(self.type_error("host function is not available")),
            },
            Callable::Method { receiver, name } => match self.call_method(&receiver, &name, args)? {
                Some(value) => Ok(value),
                None => Err(self.type_error(format!("{} is not a function", name))),
            },
        }
    }

    fn call_closure(
        &mut self,
        def: &Rc<FunctionDef>,
        env: EnvId,
        function: &Value,
        args: Vec<Value>,
    ) -> Result<Value, Abrupt> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        self.call_depth += 1;
        let result = self.run_closure(def, env, function, args);
        self.call_depth -= 1;
        result
    }

    fn run_closure(
        &mut self,
        def: &Rc<FunctionDef>,
        env: EnvId,
        function: &Value,
        args: Vec<Value>,
    ) -> Result<Value, Abrupt> {
        let scope = self.new_scope(Some(env), true);
        if !def.is_arrow {
            if let Some(name) = &def.name {
                self.scopes[scope.0].bindings.insert(
                    name.clone(),
                    Binding {
                        value: function.clone(),
                        mutable: true,
                        lexical: false,
                    },
                );
            }
        }
        let mut args = args.into_iter();
        for param in &def.params {
            let mut value = args.next().unwrap_or(Value::Undefined);
            if matches!(value, Value::Undefined) {
                if let Some(default) = &param.default {
                    value = self.eval(default, scope)?;
                }
            }
            self.bind_pattern(&param.pattern, value, scope, BindMode::Var)?;
        }
        if let Some(rest) = &def.rest {
            let remaining = self.new_array(args.collect());
            self.bind_pattern(rest, remaining, scope, BindMode::Var)?;
        }
        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, scope),
            FunctionBody::Block(body) => {
                self.hoist_vars(body, scope);
                match self.exec_block(body, scope)? {
                    Completion::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn construct(&mut self, constructor: &Value, args: Vec<Value>, callee: &Expr) -> Result<Value, Abrupt> {
        let native = match constructor.as_object().map(|id| &self.heap.get(id).kind) {
            Some(ObjectKind::Function(Callable::Native(native))) => Some(*native),
            _ => None,
        };
        match native {
            Some(native) => self.construct_native(native, args, callee),
            None => Err(self.type_error(format!("{} is not a constructor", describe_expr(callee)))),
        }
    }

    // ----- properties -----

    /// Own data property of an object (array elements and `length` included).
    pub(crate) fn own_property(&self, value: &Value, key: &PropertyKey) -> Option<Value> {
        let id = value.as_object()?;
        let object = self.heap.get(id);
        if let ObjectKind::Array(items) = &object.kind {
            match key {
                PropertyKey::Index(i) => return items.get(*i).cloned(),
                PropertyKey::Name(name) if &**name == "length" => {
                    return Some(Value::Number(items.len() as f64))
                }
                _ => {}
            }
        }
        object.props.get(&key.to_name()).cloned()
    }

    /// Property read with JavaScript semantics for primitives and built-in objects.
    pub(crate) fn get_member(&mut self, object: &Value, key: &PropertyKey) -> Result<Value, Abrupt> {
        match object {
            Value::Undefined | Value::Null => {
                let shown = self.to_js_string(object);
                Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    shown, key
                )))
            }
            Value::String(s) => Ok(match key {
                PropertyKey::Index(i) => s
                    .chars()
                    .nth(*i)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined),
                PropertyKey::Name(name) if &**name == "length" => Value::Number(s.chars().count() as f64),
                PropertyKey::Name(name) if super::builtins::is_string_method(name) => {
                    self.method_value(object.clone(), name.clone())
                }
                _ => Value::Undefined,
            }),
            Value::Number(_) => Ok(match key {
                PropertyKey::Name(name) if super::builtins::is_number_method(name) => {
                    self.method_value(object.clone(), name.clone())
                }
                _ => Value::Undefined,
            }),
            Value::Bool(_) => Ok(match key {
                PropertyKey::Name(name) if &**name == "toString" => self.method_value(object.clone(), name.clone()),
                _ => Value::Undefined,
            }),
            Value::Object(id) => {
                if let Some(value) = self.own_property(object, key) {
                    return Ok(value);
                }
                let name = key.to_name();
                if let Some(value) = self.intrinsic_property(*id, &name) {
                    return Ok(value);
                }
                if super::builtins::has_method(&self.heap.get(*id).kind, &name) {
                    return Ok(self.method_value(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
        }
    }

    /// Properties computed from an object's internal state rather than stored.
    fn intrinsic_property(&self, id: ObjectId, name: &str) -> Option<Value> {
        match &self.heap.get(id).kind {
            ObjectKind::Set(table) | ObjectKind::Map(table) if name == "size" => {
                Some(Value::Number(table.len() as f64))
            }
            ObjectKind::RegExp(data) => match name {
                "source" => Some(Value::String(data.source.clone())),
                "flags" => Some(Value::String(data.flags.clone())),
                "global" => Some(Value::Bool(data.is_global())),
                "ignoreCase" => Some(Value::Bool(data.flags.contains('i'))),
                "multiline" => Some(Value::Bool(data.flags.contains('m'))),
                _ => None,
            },
            ObjectKind::Error { kind, message } => match name {
                "message" => Some(Value::String(message.clone())),
                "name" => Some(Value::string(kind.name())),
                "stack" => Some(Value::string(format!("{}: {}\n    at <query>", kind.name(), message))),
                _ => None,
            },
            _ => None,
        }
    }

    fn method_value(&mut self, receiver: Value, name: Rc<str>) -> Value {
        self.new_function(Callable::Method { receiver, name })
    }

    pub(crate) fn set_member(&mut self, object: &Value, key: &PropertyKey, value: Value) -> Result<(), Abrupt> {
        let id = match object {
            Value::Undefined | Value::Null => {
                let shown = self.to_js_string(object);
                return Err(self.type_error(format!(
                    "Cannot set properties of {} (setting '{}')",
                    shown, key
                )));
            }
            Value::Object(id) => *id,
            // writes to primitives are dropped
            _ => return Ok(()),
        };
        let is_array = matches!(self.heap.get(id).kind, ObjectKind::Array(_));
        match key {
            PropertyKey::Index(i) if is_array => {
                self.check_array_len(i + 1)?;
                if let ObjectKind::Array(items) = &mut self.heap.get_mut(id).kind {
                    if *i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[*i] = value;
                }
            }
            PropertyKey::Name(name) if is_array && &**name == "length" => {
                let n = self.to_number(&value);
                if n < 0.0 || n.fract() != 0.0 || n > MAX_ARRAY_LEN as f64 {
                    return Err(self.range_error("Invalid array length"));
                }
                if let ObjectKind::Array(items) = &mut self.heap.get_mut(id).kind {
                    items.resize(n as usize, Value::Undefined);
                }
            }
            _ => self.heap.get_mut(id).props.insert(key.to_name(), value),
        }
        Ok(())
    }

    pub(crate) fn has_property(&self, id: ObjectId, key: &PropertyKey) -> bool {
        let object = self.heap.get(id);
        if let ObjectKind::Array(items) = &object.kind {
            match key {
                PropertyKey::Index(i) => return *i < items.len(),
                PropertyKey::Name(name) if &**name == "length" => return true,
                _ => {}
            }
        }
        let name = key.to_name();
        object.props.contains_key(&name)
            || self.intrinsic_property(id, &name).is_some()
            || super::builtins::has_method(&object.kind, &name)
    }

    /// Own enumerable string-keyed entries, in property order.
    pub(crate) fn own_entries(&self, value: &Value) -> Vec<(Rc<str>, Value)> {
        match value {
            Value::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Rc::from(i.to_string()), Value::string(c.to_string())))
                .collect(),
            Value::Object(id) => {
                let object = self.heap.get(*id);
                let mut entries = Vec::new();
                if let ObjectKind::Array(items) = &object.kind {
                    entries.extend(
                        items
                            .iter()
                            .enumerate()
                            .map(|(i, item)| (Rc::from(i.to_string()), item.clone())),
                    );
                }
                entries.extend(object.props.iter().map(|(k, v)| (k.clone(), v.clone())));
                entries
            }
            _ => Vec::new(),
        }
    }

    /// Collect the values produced by iterating an iterable.
    pub(crate) fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, Abrupt> {
        match value {
            Value::String(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            Value::Object(id) => match &self.heap.get(*id).kind {
                ObjectKind::Array(items) => Ok(items.clone()),
                ObjectKind::Set(table) => Ok(table.iter().map(|(k, _)| k.clone()).collect()),
                ObjectKind::Map(table) => {
                    let pairs: Vec<(Value, Value)> =
                        table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    Ok(pairs
                        .into_iter()
                        .map(|(k, v)| self.new_array(vec![k, v]))
                        .collect())
                }
                _ => Err(self.type_error("object is not iterable")),
            },
            other => {
                let shown = self.to_js_string(other);
                Err(self.type_error(format!("{} is not iterable", shown)))
            }
        }
    }

    // ----- conversions and operators -----

    pub(crate) fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) if self.heap.is_callable(value) => "function",
            Value::Object(_) => "object",
        }
    }

    pub fn to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(_) => string_to_number(&self.to_js_string(value)),
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self, value: &Value) -> Rc<str> {
        match value {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => (if *b { "true" } else { "false" }).into(),
            Value::Number(n) => number_to_string(*n).into(),
            Value::String(s) => s.clone(),
            Value::Object(id) => {
                let mut seen = Vec::new();
                self.object_to_string(*id, &mut seen).into()
            }
        }
    }

    fn object_to_string(&self, id: ObjectId, seen: &mut Vec<ObjectId>) -> String {
        if seen.contains(&id) || seen.len() > 64 {
            return String::new();
        }
        match &self.heap.get(id).kind {
            ObjectKind::Array(items) => {
                seen.push(id);
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        Value::Object(inner) => self.object_to_string(*inner, seen),
                        other => self.to_js_string(other).to_string(),
                    })
                    .collect();
                seen.pop();
                parts.join(",")
            }
            ObjectKind::Function(Callable::Closure { def, .. }) => {
                format!("function {}() {{ [code] }}", def.name.as_deref().unwrap_or(""))
            }
            ObjectKind::Function(_) => "function () { [native code] }".to_string(),
            ObjectKind::Set(_) => "[object Set]".to_string(),
            ObjectKind::Map(_) => "[object Map]".to_string(),
            ObjectKind::RegExp(data) => format!("/{}/{}", data.source, data.flags),
            ObjectKind::Error { kind, message } if message.is_empty() => kind.name().to_string(),
            ObjectKind::Error { kind, message } => format!("{}: {}", kind.name(), message),
            ObjectKind::Ordinary => "[object Object]".to_string(),
        }
    }

    fn to_primitive(&self, value: &Value) -> Value {
        match value {
            Value::Object(_) => Value::String(self.to_js_string(value)),
            other => other.clone(),
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Abrupt> {
        use std::cmp::Ordering::*;

        Ok(match op {
            BinaryOp::Add => return self.add(left, right),
            BinaryOp::Sub => Value::Number(self.to_number(left) - self.to_number(right)),
            BinaryOp::Mul => Value::Number(self.to_number(left) * self.to_number(right)),
            BinaryOp::Div => Value::Number(self.to_number(left) / self.to_number(right)),
            BinaryOp::Rem => Value::Number(self.to_number(left) % self.to_number(right)),
            BinaryOp::Pow => {
                let exponent = self.to_number(right);
                if exponent.is_nan() {
                    Value::Number(f64::NAN)
                } else {
                    Value::Number(self.to_number(left).powf(exponent))
                }
            }
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)),
            BinaryOp::NotEq => Value::Bool(!self.loose_equals(left, right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt => Value::Bool(self.compare(left, right) == Some(Less)),
            BinaryOp::Gt => Value::Bool(self.compare(left, right) == Some(Greater)),
            BinaryOp::LtEq => Value::Bool(matches!(self.compare(left, right), Some(Less | Equal))),
            BinaryOp::GtEq => Value::Bool(matches!(self.compare(left, right), Some(Greater | Equal))),
            BinaryOp::In => {
                let Some(id) = right.as_object() else {
                    let key = self.to_js_string(left);
                    let target = self.to_js_string(right);
                    return Err(self.type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key, target
                    )));
                };
                let key = self.to_property_key(left);
                Value::Bool(self.has_property(id, &key))
            }
            BinaryOp::InstanceOf => Value::Bool(self.instance_of(left, right)?),
        })
    }

    fn add(&mut self, left: &Value, right: &Value) -> Result<Value, Abrupt> {
        let left = self.to_primitive(left);
        let right = self.to_primitive(right);
        if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
            let l = self.to_js_string(&left);
            let r = self.to_js_string(&right);
            self.check_string_len(l.len() + r.len())?;
            let mut out = String::with_capacity(l.len() + r.len());
            out.push_str(&l);
            out.push_str(&r);
            return Ok(Value::string(out));
        }
        Ok(Value::Number(self.to_number(&left) + self.to_number(&right)))
    }

    fn compare(&self, left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
        let left = self.to_primitive(left);
        let right = self.to_primitive(right);
        if let (Value::String(a), Value::String(b)) = (&left, &right) {
            return Some(a.cmp(b));
        }
        self.to_number(&left).partial_cmp(&self.to_number(&right))
    }

    pub(crate) fn loose_equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
                *n == string_to_number(s)
            }
            (Value::Bool(b), other) | (other, Value::Bool(b)) => {
                self.loose_equals(&Value::Number(f64::from(u8::from(*b))), other)
            }
            (Value::Object(_), Value::Object(_)) => left.strict_equals(right),
            (Value::Object(_), other) | (other, Value::Object(_)) => {
                let object = if matches!(left, Value::Object(_)) { left } else { right };
                let primitive = self.to_primitive(object);
                self.loose_equals(&primitive, other)
            }
            _ => left.strict_equals(right),
        }
    }

    fn instance_of(&mut self, value: &Value, constructor: &Value) -> Result<bool, Abrupt> {
        let native = match constructor.as_object().map(|id| &self.heap.get(id).kind) {
            Some(ObjectKind::Function(Callable::Native(native))) => Some(*native),
            Some(ObjectKind::Function(_)) => None,
            _ => return Err(self.type_error("Right-hand side of 'instanceof' is not callable")),
        };
        let Some(id) = value.as_object() else {
            return Ok(false);
        };
        let kind = &self.heap.get(id).kind;
        Ok(match native {
            Some(Native::ArrayCtor) => matches!(kind, ObjectKind::Array(_)),
            Some(Native::SetCtor) => matches!(kind, ObjectKind::Set(_)),
            Some(Native::MapCtor) => matches!(kind, ObjectKind::Map(_)),
            Some(Native::ObjectCtor) => true,
            Some(Native::ErrorCtor(expected)) => match kind {
                ObjectKind::Error { kind, .. } => expected == ErrorKind::Error || *kind == expected,
                _ => false,
            },
            _ => false,
        })
    }
}

/// JavaScript `Number(string)` conversion.
pub(crate) fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

fn needs_scope(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| {
        matches!(
            stmt,
            Stmt::Function(_)
                | Stmt::Decl {
                    kind: DeclKind::Let | DeclKind::Const,
                    ..
                }
        )
    })
}

fn collect_var_names(stmt: &Stmt, names: &mut Vec<Rc<str>>) {
    match stmt {
        Stmt::Decl {
            kind: DeclKind::Var,
            decls,
        } => {
            for (pattern, _) in decls {
                collect_pattern_names(pattern, names);
            }
        }
        Stmt::If { then, otherwise, .. } => {
            collect_var_names(then, names);
            if let Some(otherwise) = otherwise {
                collect_var_names(otherwise, names);
            }
        }
        Stmt::Block(body) => body.iter().for_each(|s| collect_var_names(s, names)),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_var_names(init, names);
            }
            collect_var_names(body, names);
        }
        Stmt::ForOf { kind, target, body, .. } | Stmt::ForIn { kind, target, body, .. } => {
            if *kind == Some(DeclKind::Var) {
                collect_pattern_names(target, names);
            }
            collect_var_names(body, names);
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_var_names(body, names),
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            for body in [Some(block), handler.as_ref(), finalizer.as_ref()].into_iter().flatten() {
                body.iter().for_each(|s| collect_var_names(s, names));
            }
        }
        _ => {}
    }
}

fn collect_pattern_names(pattern: &Pattern, names: &mut Vec<Rc<str>>) {
    match pattern {
        Pattern::Ident(name) => names.push(name.clone()),
        Pattern::Object { props, rest } => {
            for prop in props {
                collect_pattern_names(&prop.value, names);
            }
            if let Some(rest) = rest {
                names.push(rest.clone());
            }
        }
        Pattern::Array { elems, rest } => {
            for elem in elems.iter().flatten() {
                collect_pattern_names(&elem.pattern, names);
            }
            if let Some(rest) = rest {
                collect_pattern_names(rest, names);
            }
        }
    }
}

/// Source-like rendering of a callee for error messages (`n.name.toLowerCase`).
fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member {
            object, property, ..
        } => match property {
            MemberProp::Static(name) => format!("{}.{}", describe_expr(object), name),
            MemberProp::Computed(_) => format!("{}[...]", describe_expr(object)),
        },
        Expr::Call { callee, .. } => format!("{}(...)", describe_expr(callee)),
        Expr::OptionalChain(inner) => describe_expr(inner),
        _ => "(intermediate value)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expression_program, parse_statement_program};

    fn run_statements(source: &str) -> Result<Value, EvalError> {
        let program = parse_statement_program(source)?;
        let mut interp = Interpreter::new(Budget::unbounded());
        interp.run(&program)
    }

    fn number(source: &str) -> f64 {
        match run_statements(source) {
            Ok(Value::Number(n)) => n,
            other => panic!("expected number from {:?}, got {:?}", source, other),
        }
    }

    fn string(source: &str) -> String {
        match run_statements(source) {
            Ok(Value::String(s)) => s.to_string(),
            other => panic!("expected string from {:?}, got {:?}", source, other),
        }
    }

    fn error(source: &str) -> String {
        match run_statements(source) {
            Err(EvalError::Runtime(message)) | Err(EvalError::Syntax(message)) => message,
            other => panic!("expected error from {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(number("return 1 + 2 * 3 ** 2;"), 19.0);
        assert_eq!(number("return 7 % 3 - -1;"), 2.0);
        assert_eq!(string("return 1 + '2';"), "12");
        assert_eq!(number("return '6' * '7';"), 42.0);
    }

    #[test]
    fn test_expression_program() {
        let program = parse_expression_program("[1, 2, 3].length").unwrap();
        let mut interp = Interpreter::new(Budget::unbounded());
        assert!(matches!(interp.run(&program), Ok(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn test_closures_and_recursion() {
        assert_eq!(
            number("function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } return fib(10);"),
            55.0
        );
        assert_eq!(
            number("const make = () => { let c = 0; return () => ++c; }; const inc = make(); inc(); inc(); return inc();"),
            3.0
        );
    }

    #[test]
    fn test_function_declarations_are_hoisted() {
        assert_eq!(number("return twice(4); function twice(x) { return x * 2 }"), 8.0);
    }

    #[test]
    fn test_var_is_hoisted() {
        assert!(matches!(run_statements("const a = x; var x = 1; return a;"), Ok(Value::Undefined)));
    }

    #[test]
    fn test_destructuring() {
        assert_eq!(
            number("const { a, b: { c = 5 } = {}, ...rest } = { a: 1, d: 2, e: 3 }; return a + c + Object.keys(rest).length;"),
            8.0
        );
        assert_eq!(number("const [x, , y = 10, ...zs] = [1, 2, undefined, 4, 5]; return x + y + zs.length;"), 13.0);
        assert_eq!(number("const f = ({ w, h }) => w * h; return f({ w: 3, h: 4 });"), 12.0);
    }

    #[test]
    fn test_loops_with_break_and_continue() {
        assert_eq!(
            number("let s = 0; for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; s += i; } return s;"),
            12.0
        );
        assert_eq!(number("let n = 0; for (const x of [1, 2, 3]) n += x; return n;"), 6.0);
        assert_eq!(string("let k = ''; for (const key in { a: 1, b: 2 }) k += key; return k;"), "ab");
        assert_eq!(number("let i = 0; do { i++ } while (i < 5); return i;"), 5.0);
    }

    #[test]
    fn test_closures_capture_per_iteration_binding() {
        assert_eq!(
            string("const fs = []; for (const x of ['a', 'b']) fs.push(() => x); return fs.map(f => f()).join('');"),
            "ab"
        );
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        assert!(matches!(run_statements("const o = null; return o?.a.b.c;"), Ok(Value::Undefined)));
        assert!(matches!(run_statements("const o = {}; return o.f?.();"), Ok(Value::Undefined)));
        assert_eq!(number("const o = { a: 0 }; return o.a ?? 5;"), 0.0);
        assert_eq!(number("let v; v ??= 4; v ||= 9; return v;"), 4.0);
    }

    #[test]
    fn test_reference_errors_use_javascript_wording() {
        assert_eq!(error("return missing + 1;"), "missing is not defined");
        assert_eq!(
            error("const n = undefined; return n.name;"),
            "Cannot read properties of undefined (reading 'name')"
        );
        assert_eq!(error("const n = { name: 1 }; return n.name.toLowerCase();"), "n.name.toLowerCase is not a function");
        assert_eq!(error("const x = 1; x = 2;"), "Assignment to constant variable.");
    }

    #[test]
    fn test_try_catch_finally() {
        assert_eq!(
            string("try { null.x } catch (e) { return e.name + ': ' + (e instanceof TypeError); }"),
            "TypeError: true"
        );
        assert_eq!(number("let n = 0; try { throw new Error('boom') } catch { n = 1 } finally { n += 10 } return n;"), 11.0);
        assert_eq!(error("throw new RangeError('too far');"), "too far");
        assert_eq!(error("throw 'plain';"), "plain");
    }

    #[test]
    fn test_call_depth_limit() {
        let message = std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(|| error("function f(n) { return n === 0 ? 0 : f(n - 1); } return f(100000);"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(message, "Maximum call stack size exceeded");
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let program = parse_statement_program("while (true) {}").unwrap();
        let budget = Budget::new(Duration::from_millis(50), Arc::new(AtomicBool::new(false)));
        let mut interp = Interpreter::new(budget);
        assert!(matches!(interp.run(&program), Err(EvalError::Timeout)));
    }

    #[test]
    fn test_abort_flag_stops_evaluation() {
        let abort = Arc::new(AtomicBool::new(true));
        let program = parse_statement_program("for (;;) {}").unwrap();
        let mut interp = Interpreter::new(Budget::new(Duration::from_secs(60), abort));
        assert!(matches!(interp.run(&program), Err(EvalError::Timeout)));
    }

    #[test]
    fn test_timeout_is_not_catchable() {
        let program = parse_statement_program("try { while (true) {} } catch (e) { return 1 }").unwrap();
        let budget = Budget::new(Duration::from_millis(20), Arc::new(AtomicBool::new(false)));
        let mut interp = Interpreter::new(budget);
        assert!(matches!(interp.run(&program), Err(EvalError::Timeout)));
    }

    #[test]
    fn test_loose_equality() {
        assert!(matches!(run_statements("return null == undefined && 1 == '1' && 0 == false && !(null == 0);"), Ok(Value::Bool(true))));
        assert!(matches!(run_statements("return typeof undeclared === 'undefined';"), Ok(Value::Bool(true))));
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }
}
