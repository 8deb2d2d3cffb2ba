//! Tree-walking interpreter over the `script` syntax tree.
//!
//! Code runs against an explicit scope chain of [`Env`] links. Declarative
//! links hold local bindings; object links resolve names as properties of a
//! heap object (a global object, or an endowment object placed in front of
//! one). Declarations are function-scoped: blocks do not open new scopes,
//! `catch` clauses do.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::builtins;
use crate::error::{ErrorName, RealmError};
use crate::host::Host;
use crate::object_model::{
    CallTarget, ClosureId, JsValue, ObjectError, ObjectHandle, PropertyDescriptor, PropertyKey,
};
use crate::script::{
    self, AssignOp, BinaryOp, DeclKind, Expr, FunctionDef, LogicalOp, MemberProperty, Stmt,
    UnaryOp,
};

/// Abrupt completion. `Value` is a thrown script value and can be caught;
/// `Fault` is a pipeline failure that unwinds straight to the caller.
#[derive(Debug)]
pub enum Throw {
    Value(JsValue),
    Fault(Box<RealmError>),
}

impl From<ObjectError> for Throw {
    fn from(err: ObjectError) -> Self {
        Self::Fault(Box::new(RealmError::Object(err)))
    }
}

impl From<RealmError> for Throw {
    fn from(err: RealmError) -> Self {
        Self::Fault(Box::new(err))
    }
}

pub type Completion<T = JsValue> = Result<T, Throw>;

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Binding {
    value: JsValue,
    mutable: bool,
}

#[derive(Debug)]
enum Scope {
    Declarative(RefCell<BTreeMap<String, Binding>>),
    Object(ObjectHandle),
}

/// One link of a scope chain.
#[derive(Debug)]
pub struct Env {
    scope: Scope,
    parent: Option<Rc<Env>>,
}

impl Env {
    pub fn object(handle: ObjectHandle, parent: Option<Rc<Env>>) -> Rc<Self> {
        Rc::new(Self {
            scope: Scope::Object(handle),
            parent,
        })
    }

    pub fn declarative(parent: Option<Rc<Env>>) -> Rc<Self> {
        Rc::new(Self {
            scope: Scope::Declarative(RefCell::new(BTreeMap::new())),
            parent,
        })
    }

    /// Objects consulted by this chain, innermost first.
    pub fn object_links(&self) -> Vec<ObjectHandle> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(env) = current {
            if let Scope::Object(handle) = env.scope {
                out.push(handle);
            }
            current = env.parent.as_deref();
        }
        out
    }
}

/// How code treats `this` and undeclared assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMode {
    pub strict: bool,
    /// Where an assignment to an undeclared name lands; `None` throws.
    pub unresolved_target: Option<ObjectHandle>,
}

impl CodeMode {
    pub fn sloppy(global: ObjectHandle) -> Self {
        Self {
            strict: false,
            unresolved_target: Some(global),
        }
    }

    pub fn strict(unresolved_target: Option<ObjectHandle>) -> Self {
        Self {
            strict: true,
            unresolved_target,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Env>,
    pub mode: CodeMode,
}

struct Ctx {
    env: Rc<Env>,
    this: JsValue,
    mode: CodeMode,
}

enum Flow {
    Normal,
    Return(JsValue),
}

enum Reference {
    Declarative(Rc<Env>),
    Object(ObjectHandle),
    Unresolved,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Execute statements with `env` as the variable scope and return the value
/// of the last expression statement.
pub fn run_program(
    host: &mut Host,
    body: &[Stmt],
    env: Rc<Env>,
    this: JsValue,
    mode: CodeMode,
) -> Completion {
    let ctx = Ctx { env, this, mode };
    hoist(host, &ctx, body)?;
    let mut last = JsValue::Undefined;
    exec_block(host, &ctx, body, &mut last)?;
    Ok(last)
}

/// Sloppy global code of the host: declarations land on the host global.
pub fn run_host_program(host: &mut Host, program: &script::Program) -> Completion {
    let global = host.global();
    run_program(
        host,
        &program.body,
        Env::object(global, None),
        JsValue::Object(global),
        CodeMode::sloppy(global),
    )
}

/// The host's raw `Function(p1, ..., body)`: sloppy, closed over the host
/// global.
pub fn create_host_function(host: &mut Host, args: &[JsValue]) -> Completion {
    let (params, body) = split_function_args(host, args);
    let params = match script::parse_formal_parameters(&params) {
        Ok(params) => params,
        Err(err) => return Err(host.throw_error(ErrorName::SyntaxError, err.to_string())),
    };
    let body = match script::parse_function_body(&body) {
        Ok(body) => body,
        Err(err) => return Err(host.throw_error(ErrorName::SyntaxError, err.to_string())),
    };
    let global = host.global();
    let def = Rc::new(FunctionDef {
        name: Some("anonymous".to_string()),
        params,
        body,
    });
    make_closure(host, def, Env::object(global, None), CodeMode::sloppy(global))
}

/// Split dynamic-constructor arguments into joined parameter text and body
/// text.
pub fn split_function_args(host: &Host, args: &[JsValue]) -> (String, String) {
    match args.split_last() {
        None => (String::new(), String::new()),
        Some((body, params)) => (
            params
                .iter()
                .map(|p| to_string(host, p))
                .collect::<Vec<_>>()
                .join(","),
            to_string(host, body),
        ),
    }
}

/// Allocate a function object for `def` closed over `env`.
pub fn make_closure(
    host: &mut Host,
    def: Rc<FunctionDef>,
    env: Rc<Env>,
    mode: CodeMode,
) -> Completion {
    let name = def.name.clone().unwrap_or_default();
    let id = host.add_closure(Closure { def, env, mode });
    let function_prototype = host.intrinsics().function_prototype;
    let object_prototype = host.intrinsics().object_prototype;
    let heap = host.heap_mut();
    let function = heap.alloc_callable(Some(function_prototype), CallTarget::Closure(id), true);
    let prototype = heap.alloc(Some(object_prototype));
    heap.define_property(
        prototype,
        PropertyKey::from("constructor"),
        PropertyDescriptor::data_hidden(JsValue::Object(function)),
    )?;
    heap.define_property(
        function,
        PropertyKey::from("prototype"),
        PropertyDescriptor::data_with(JsValue::Object(prototype), true, false, false),
    )?;
    heap.define_property(
        function,
        PropertyKey::from("name"),
        PropertyDescriptor::data_with(JsValue::Str(name), false, false, true),
    )?;
    Ok(JsValue::Object(function))
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

pub fn call(host: &mut Host, callee: &JsValue, this: JsValue, args: Vec<JsValue>) -> Completion {
    let target = match callee.as_object() {
        Some(handle) => host.heap().call_target(handle)?.map(|t| (handle, t)),
        None => None,
    };
    let Some((handle, target)) = target else {
        let shown = to_string(host, callee);
        return Err(host.type_error(format!("{shown} is not a function")));
    };
    host.enter_call()?;
    let result = match target {
        CallTarget::Native(native) => {
            builtins::call_native(host, handle, native, this, &args, None)
        }
        CallTarget::Closure(id) => call_closure(host, handle, id, this, args),
    };
    host.exit_call();
    result
}

pub fn construct(host: &mut Host, callee: &JsValue, args: Vec<JsValue>) -> Completion {
    let target = match callee.as_object() {
        Some(handle) => {
            let object = host.heap().get(handle)?;
            match object.call {
                Some(target) if object.constructable => Some((handle, target)),
                _ => None,
            }
        }
        None => None,
    };
    let Some((handle, target)) = target else {
        let shown = to_string(host, callee);
        return Err(host.type_error(format!("{shown} is not a constructor")));
    };
    host.enter_call()?;
    let result = match target {
        CallTarget::Native(native) => builtins::call_native(
            host,
            handle,
            native,
            JsValue::Undefined,
            &args,
            Some(handle),
        ),
        CallTarget::Closure(id) => construct_closure(host, handle, id, args),
    };
    host.exit_call();
    result
}

fn construct_closure(
    host: &mut Host,
    handle: ObjectHandle,
    id: ClosureId,
    args: Vec<JsValue>,
) -> Completion {
    let proto = match host.heap().get_property(handle, &PropertyKey::from("prototype"))? {
        JsValue::Object(proto) => proto,
        _ => host.intrinsics().object_prototype,
    };
    let instance = JsValue::Object(host.heap_mut().alloc(Some(proto)));
    let result = call_closure(host, handle, id, instance.clone(), args)?;
    Ok(if result.is_object() { result } else { instance })
}

fn call_closure(
    host: &mut Host,
    callee: ObjectHandle,
    id: ClosureId,
    this: JsValue,
    args: Vec<JsValue>,
) -> Completion {
    let Some(closure) = host.closure(id).cloned() else {
        return Err(RealmError::host_shape(format!("closure #{} is not registered", id.0)).into());
    };
    let this = if !closure.mode.strict && this.is_nullish() {
        JsValue::Object(host.global())
    } else {
        this
    };
    let env = Env::declarative(Some(closure.env.clone()));
    let ctx = Ctx {
        env,
        this,
        mode: closure.mode,
    };
    if let Some(name) = &closure.def.name {
        declare(host, &ctx.env, name, Some(JsValue::Object(callee)), true)?;
    }
    let mut args = args.into_iter();
    for param in &closure.def.params {
        let value = args.next().unwrap_or(JsValue::Undefined);
        declare(host, &ctx.env, param, Some(value), true)?;
    }
    hoist(host, &ctx, &closure.def.body)?;
    let mut last = JsValue::Undefined;
    match exec_block(host, &ctx, &closure.def.body, &mut last)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => Ok(JsValue::Undefined),
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

fn collect_declarations<'a>(
    body: &'a [Stmt],
    vars: &mut Vec<&'a str>,
    functions: &mut Vec<&'a Rc<FunctionDef>>,
) {
    for stmt in body {
        match stmt {
            Stmt::Declaration {
                kind: DeclKind::Var,
                declarations,
            } => vars.extend(declarations.iter().map(|(name, _)| name.as_str())),
            Stmt::Function(def) => functions.push(def),
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                collect_declarations(std::slice::from_ref(consequent.as_ref()), vars, functions);
                if let Some(alternate) = alternate {
                    collect_declarations(std::slice::from_ref(alternate.as_ref()), vars, functions);
                }
            }
            Stmt::Block(stmts) => collect_declarations(stmts, vars, functions),
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                collect_declarations(block, vars, functions);
                if let Some(handler) = handler {
                    collect_declarations(handler, vars, functions);
                }
                if let Some(finalizer) = finalizer {
                    collect_declarations(finalizer, vars, functions);
                }
            }
            _ => {}
        }
    }
}

/// Create `var` bindings and initialize function declarations up front.
fn hoist(host: &mut Host, ctx: &Ctx, body: &[Stmt]) -> Completion<()> {
    let mut vars = Vec::new();
    let mut functions = Vec::new();
    collect_declarations(body, &mut vars, &mut functions);
    for name in vars {
        declare(host, &ctx.env, name, None, true)?;
    }
    for def in functions {
        let Some(name) = def.name.as_deref() else {
            continue;
        };
        let function = make_closure(host, def.clone(), ctx.env.clone(), ctx.mode)?;
        declare(host, &ctx.env, name, Some(function), true)?;
    }
    Ok(())
}

/// Declare `name` in the innermost link of `env`. `None` leaves an existing
/// binding alone.
fn declare(
    host: &mut Host,
    env: &Env,
    name: &str,
    value: Option<JsValue>,
    mutable: bool,
) -> Completion<()> {
    match &env.scope {
        Scope::Declarative(bindings) => {
            let mut bindings = bindings.borrow_mut();
            match (bindings.get_mut(name), value) {
                (Some(binding), Some(value)) => {
                    binding.value = value;
                    binding.mutable = mutable;
                }
                (Some(_), None) => {}
                (None, value) => {
                    bindings.insert(
                        name.to_string(),
                        Binding {
                            value: value.unwrap_or(JsValue::Undefined),
                            mutable,
                        },
                    );
                }
            }
        }
        Scope::Object(handle) => {
            let key = PropertyKey::from(name);
            match value {
                Some(value) => put_value(host, &JsValue::Object(*handle), key, value, false)?,
                None => {
                    if !host.heap().has_own(*handle, &key)? {
                        host.heap_mut().define_property(
                            *handle,
                            key,
                            PropertyDescriptor::data_with(JsValue::Undefined, true, true, false),
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn resolve(host: &Host, env: &Rc<Env>, name: &str) -> Completion<Reference> {
    let key = PropertyKey::from(name);
    let mut current = Some(env.clone());
    while let Some(link) = current {
        match &link.scope {
            Scope::Declarative(bindings) => {
                if bindings.borrow().contains_key(name) {
                    return Ok(Reference::Declarative(link));
                }
            }
            Scope::Object(handle) => {
                if host.heap().has_property(*handle, &key)? {
                    return Ok(Reference::Object(*handle));
                }
            }
        }
        current = link.parent.clone();
    }
    Ok(Reference::Unresolved)
}

fn read_reference(host: &mut Host, reference: &Reference, name: &str) -> Completion {
    match reference {
        Reference::Declarative(env) => match &env.scope {
            Scope::Declarative(bindings) => Ok(bindings
                .borrow()
                .get(name)
                .map_or(JsValue::Undefined, |b| b.value.clone())),
            Scope::Object(_) => Ok(JsValue::Undefined),
        },
        Reference::Object(handle) => {
            get_value(host, &JsValue::Object(*handle), &PropertyKey::from(name))
        }
        Reference::Unresolved => {
            Err(host.throw_error(ErrorName::ReferenceError, format!("{name} is not defined")))
        }
    }
}

fn write_reference(
    host: &mut Host,
    ctx: &Ctx,
    reference: &Reference,
    name: &str,
    value: JsValue,
) -> Completion<()> {
    match reference {
        Reference::Declarative(env) => {
            if let Scope::Declarative(bindings) = &env.scope {
                let mut bindings = bindings.borrow_mut();
                if let Some(binding) = bindings.get_mut(name) {
                    if !binding.mutable {
                        drop(bindings);
                        return Err(host.type_error("Assignment to constant variable."));
                    }
                    binding.value = value;
                }
            }
            Ok(())
        }
        Reference::Object(handle) => put_value(
            host,
            &JsValue::Object(*handle),
            PropertyKey::from(name),
            value,
            ctx.mode.strict,
        ),
        Reference::Unresolved => match ctx.mode.unresolved_target {
            Some(target) => put_value(
                host,
                &JsValue::Object(target),
                PropertyKey::from(name),
                value,
                ctx.mode.strict,
            ),
            None => Err(host.throw_error(ErrorName::ReferenceError, format!("{name} is not defined"))),
        },
    }
}

// ---------------------------------------------------------------------------
// Property access
// ---------------------------------------------------------------------------

/// `[[Get]]` with getter invocation; primitives read through their
/// prototype.
pub fn get_value(host: &mut Host, base: &JsValue, key: &PropertyKey) -> Completion {
    let holder = match base {
        JsValue::Object(handle) => *handle,
        JsValue::Undefined | JsValue::Null => {
            return Err(host.type_error(format!(
                "Cannot read properties of {base} (reading '{key}')"
            )));
        }
        JsValue::Str(s) => {
            if key.as_str() == "length" {
                return Ok(JsValue::number(s.encode_utf16().count() as f64));
            }
            if let Ok(index) = key.as_str().parse::<usize>() {
                return Ok(s
                    .chars()
                    .nth(index)
                    .map_or(JsValue::Undefined, |c| JsValue::Str(c.to_string())));
            }
            host.intrinsics().string_prototype
        }
        JsValue::Int(_) | JsValue::Number(_) => host.intrinsics().number_prototype,
        JsValue::Bool(_) => host.intrinsics().boolean_prototype,
    };
    match host.heap().find_property(holder, key)? {
        Some((_, PropertyDescriptor::Data { value, .. })) => Ok(value),
        Some((_, PropertyDescriptor::Accessor { get: Some(getter), .. })) => {
            call(host, &JsValue::Object(getter), base.clone(), Vec::new())
        }
        _ => Ok(JsValue::Undefined),
    }
}

/// `[[Set]]` with setter invocation. Refused writes throw in strict code.
pub fn put_value(
    host: &mut Host,
    base: &JsValue,
    key: PropertyKey,
    value: JsValue,
    strict: bool,
) -> Completion<()> {
    let handle = match base {
        JsValue::Object(handle) => *handle,
        JsValue::Undefined | JsValue::Null => {
            return Err(host.type_error(format!(
                "Cannot set properties of {base} (setting '{key}')"
            )));
        }
        primitive => {
            if strict {
                let kind = primitive.type_name();
                return Err(host.type_error(format!(
                    "Cannot create property '{key}' on {kind} '{primitive}'"
                )));
            }
            return Ok(());
        }
    };
    match host.heap().find_property(handle, &key)? {
        Some((_, PropertyDescriptor::Accessor { set: Some(setter), .. })) => {
            call(host, &JsValue::Object(setter), base.clone(), vec![value])?;
            Ok(())
        }
        Some((_, PropertyDescriptor::Accessor { set: None, .. })) => {
            if strict {
                return Err(host.type_error(format!(
                    "Cannot set property {key} of object which has only a getter"
                )));
            }
            Ok(())
        }
        _ => {
            let value = if key.as_str() == "length" && is_array(host, handle) {
                array_length(host, &value)?
            } else {
                value
            };
            if !host.heap_mut().set_property(handle, key.clone(), value)? && strict {
                return Err(host.type_error(format!(
                    "Cannot assign to read only property '{key}' of object"
                )));
            }
            Ok(())
        }
    }
}

fn is_array(host: &Host, handle: ObjectHandle) -> bool {
    host.heap()
        .get(handle)
        .is_ok_and(|object| object.class_tag.as_deref() == Some("Array"))
}

/// An array `length` must be an integer in `0..=u32::MAX`.
fn array_length(host: &mut Host, value: &JsValue) -> Completion {
    let length = to_number(host, value);
    if length < 0.0 || length.fract() != 0.0 || length > f64::from(u32::MAX) {
        return Err(host.throw_error(ErrorName::RangeError, "Invalid array length"));
    }
    Ok(JsValue::number(length))
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

const MAX_TO_STRING_DEPTH: usize = 16;
/// Array slots one ToString may visit, summed over nested arrays.
const MAX_JOINED_SLOTS: usize = 1 << 16;

/// Objects on the current rendering path and the slot budget left.
struct Rendering {
    visiting: Vec<ObjectHandle>,
    slots_left: usize,
}

/// ToString. Objects are rendered from their data properties without
/// running user code. An object already being rendered further up renders
/// as the empty string.
pub fn to_string(host: &Host, value: &JsValue) -> String {
    let mut rendering = Rendering {
        visiting: Vec::new(),
        slots_left: MAX_JOINED_SLOTS,
    };
    render(host, value, &mut rendering)
}

fn render(host: &Host, value: &JsValue, rendering: &mut Rendering) -> String {
    match value {
        JsValue::Object(handle) => object_to_string(host, *handle, rendering),
        other => other.to_string(),
    }
}

fn object_to_string(host: &Host, handle: ObjectHandle, rendering: &mut Rendering) -> String {
    let heap = host.heap();
    let Ok(object) = heap.get(handle) else {
        return "[object Object]".to_string();
    };
    let read = |name: &str| heap.get_property(handle, &PropertyKey::from(name)).ok();
    if object.is_callable() {
        let name = match read("name") {
            Some(JsValue::Str(name)) => name,
            _ => String::new(),
        };
        return format!("function {name}() {{ [native code] }}");
    }
    if rendering.visiting.contains(&handle) {
        return String::new();
    }
    if rendering.visiting.len() >= MAX_TO_STRING_DEPTH {
        return "[object Object]".to_string();
    }
    rendering.visiting.push(handle);
    let text = match object.class_tag.as_deref() {
        Some("Error") => {
            let name = match read("name") {
                Some(JsValue::Undefined) | None => "Error".to_string(),
                Some(other) => render(host, &other, rendering),
            };
            let message = match read("message") {
                Some(JsValue::Undefined) | None => String::new(),
                Some(other) => render(host, &other, rendering),
            };
            match (name.is_empty(), message.is_empty()) {
                (true, _) => message,
                (_, true) => name,
                _ => format!("{name}: {message}"),
            }
        }
        Some("Array") => {
            // `as` saturates, so NaN and negatives join nothing.
            let length = read("length").map_or(0.0, |v| v.to_number()) as usize;
            let slots = length.min(rendering.slots_left);
            rendering.slots_left -= slots;
            (0..slots)
                .map(|i| match read(&i.to_string()) {
                    Some(JsValue::Undefined | JsValue::Null) | None => String::new(),
                    Some(other) => render(host, &other, rendering),
                })
                .collect::<Vec<_>>()
                .join(",")
        }
        _ => "[object Object]".to_string(),
    };
    rendering.visiting.pop();
    text
}

/// ToPrimitive with the string hint.
fn to_primitive(host: &Host, value: &JsValue) -> JsValue {
    match value {
        JsValue::Object(_) => JsValue::Str(to_string(host, value)),
        other => other.clone(),
    }
}

fn to_number(host: &Host, value: &JsValue) -> f64 {
    to_primitive(host, value).to_number()
}

pub fn type_of(host: &Host, value: &JsValue) -> &'static str {
    if host.heap().is_callable(value) {
        return "function";
    }
    value.type_name()
}

/// ToObject: primitives get a wrapper, `undefined`/`null` throw.
pub fn to_object(host: &mut Host, value: &JsValue) -> Completion<ObjectHandle> {
    let (proto, tag) = match value {
        JsValue::Object(handle) => return Ok(*handle),
        JsValue::Undefined | JsValue::Null => {
            return Err(host.type_error("Cannot convert undefined or null to object"));
        }
        JsValue::Str(_) => (host.intrinsics().string_prototype, "String"),
        JsValue::Int(_) | JsValue::Number(_) => (host.intrinsics().number_prototype, "Number"),
        JsValue::Bool(_) => (host.intrinsics().boolean_prototype, "Boolean"),
    };
    let heap = host.heap_mut();
    let handle = heap.alloc(Some(proto));
    heap.get_mut(handle)?.class_tag = Some(tag.to_string());
    if let JsValue::Str(s) = value {
        heap.define_property(
            handle,
            PropertyKey::from("length"),
            PropertyDescriptor::data_frozen(JsValue::number(s.encode_utf16().count() as f64)),
        )?;
    }
    Ok(handle)
}

fn strict_equals(left: &JsValue, right: &JsValue) -> bool {
    match (left, right) {
        (JsValue::Int(_) | JsValue::Number(_), JsValue::Int(_) | JsValue::Number(_)) => {
            left.to_number() == right.to_number()
        }
        _ => left == right,
    }
}

fn loose_equals(host: &Host, left: &JsValue, right: &JsValue) -> bool {
    use JsValue as V;
    match (left, right) {
        (V::Undefined | V::Null, V::Undefined | V::Null) => true,
        (V::Undefined | V::Null, _) | (_, V::Undefined | V::Null) => false,
        (V::Object(a), V::Object(b)) => a == b,
        (V::Object(_), _) => loose_equals(host, &to_primitive(host, left), right),
        (_, V::Object(_)) => loose_equals(host, left, &to_primitive(host, right)),
        (V::Str(a), V::Str(b)) => a == b,
        (V::Bool(a), V::Bool(b)) => a == b,
        _ => left.to_number() == right.to_number(),
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn exec_block(host: &mut Host, ctx: &Ctx, body: &[Stmt], last: &mut JsValue) -> Completion<Flow> {
    for stmt in body {
        if let Flow::Return(value) = exec_stmt(host, ctx, stmt, last)? {
            return Ok(Flow::Return(value));
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt(host: &mut Host, ctx: &Ctx, stmt: &Stmt, last: &mut JsValue) -> Completion<Flow> {
    host.enter_nested()?;
    let flow = exec_stmt_nested(host, ctx, stmt, last);
    host.exit_nested();
    flow
}

fn exec_stmt_nested(host: &mut Host, ctx: &Ctx, stmt: &Stmt, last: &mut JsValue) -> Completion<Flow> {
    match stmt {
        Stmt::Expr(expr) => {
            *last = eval_expr(host, ctx, expr)?;
        }
        Stmt::Declaration { kind, declarations } => {
            for (name, init) in declarations {
                match kind {
                    DeclKind::Var => {
                        if let Some(init) = init {
                            let value = eval_expr(host, ctx, init)?;
                            let reference = resolve(host, &ctx.env, name)?;
                            write_reference(host, ctx, &reference, name, value)?;
                        }
                    }
                    DeclKind::Let | DeclKind::Const => {
                        let value = match init {
                            Some(init) => eval_expr(host, ctx, init)?,
                            None => JsValue::Undefined,
                        };
                        declare(host, &ctx.env, name, Some(value), *kind == DeclKind::Let)?;
                    }
                }
            }
        }
        Stmt::Function(_) | Stmt::Empty => {}
        Stmt::Return(argument) => {
            let value = match argument {
                Some(expr) => eval_expr(host, ctx, expr)?,
                None => JsValue::Undefined,
            };
            return Ok(Flow::Return(value));
        }
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            if eval_expr(host, ctx, test)?.truthy() {
                return exec_stmt(host, ctx, consequent, last);
            }
            if let Some(alternate) = alternate {
                return exec_stmt(host, ctx, alternate, last);
            }
        }
        Stmt::Block(body) => return exec_block(host, ctx, body, last),
        Stmt::Throw(expr) => {
            let value = eval_expr(host, ctx, expr)?;
            return Err(Throw::Value(value));
        }
        Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        } => {
            let mut result = exec_block(host, ctx, block, last);
            if let Some(handler) = handler
                && let Err(Throw::Value(thrown)) = result
            {
                let catch_ctx = Ctx {
                    env: Env::declarative(Some(ctx.env.clone())),
                    this: ctx.this.clone(),
                    mode: ctx.mode,
                };
                if let Some(param) = param {
                    declare(host, &catch_ctx.env, param, Some(thrown), true)?;
                }
                result = exec_block(host, &catch_ctx, handler, last);
            }
            if let Some(finalizer) = finalizer {
                let mut scratch = JsValue::Undefined;
                if let Flow::Return(value) = exec_block(host, ctx, finalizer, &mut scratch)? {
                    return Ok(Flow::Return(value));
                }
            }
            return result;
        }
    }
    Ok(Flow::Normal)
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Short source-ish rendering of an expression for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object,
            property: MemberProperty::Named(name),
        } => format!("{}.{name}", describe(object)),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

fn property_key(host: &mut Host, ctx: &Ctx, property: &MemberProperty) -> Completion<PropertyKey> {
    match property {
        MemberProperty::Named(name) => Ok(PropertyKey::from(name.as_str())),
        MemberProperty::Computed(expr) => {
            let value = eval_expr(host, ctx, expr)?;
            Ok(PropertyKey(to_string(host, &value)))
        }
    }
}

fn eval_args(host: &mut Host, ctx: &Ctx, args: &[Expr]) -> Completion<Vec<JsValue>> {
    args.iter().map(|arg| eval_expr(host, ctx, arg)).collect()
}

fn eval_expr(host: &mut Host, ctx: &Ctx, expr: &Expr) -> Completion {
    host.enter_nested()?;
    let value = eval_expr_nested(host, ctx, expr);
    host.exit_nested();
    value
}

fn eval_expr_nested(host: &mut Host, ctx: &Ctx, expr: &Expr) -> Completion {
    match expr {
        Expr::Number(n) => Ok(JsValue::number(*n)),
        Expr::Str(s) => Ok(JsValue::Str(s.clone())),
        Expr::Bool(b) => Ok(JsValue::Bool(*b)),
        Expr::Null => Ok(JsValue::Null),
        Expr::This => Ok(ctx.this.clone()),
        Expr::Ident(name) => {
            let reference = resolve(host, &ctx.env, name)?;
            read_reference(host, &reference, name)
        }
        Expr::Object(properties) => {
            let proto = host.intrinsics().object_prototype;
            let handle = host.heap_mut().alloc(Some(proto));
            for (key, value) in properties {
                let value = eval_expr(host, ctx, value)?;
                host.heap_mut().define_property(
                    handle,
                    PropertyKey::from(key.as_str()),
                    PropertyDescriptor::data(value),
                )?;
            }
            Ok(JsValue::Object(handle))
        }
        Expr::Function(def) => make_closure(host, def.clone(), ctx.env.clone(), ctx.mode),
        Expr::Member { object, property } => {
            let base = eval_expr(host, ctx, object)?;
            let key = property_key(host, ctx, property)?;
            get_value(host, &base, &key)
        }
        Expr::Call { callee, args } => {
            let (function, this) = match callee.as_ref() {
                Expr::Member { object, property } => {
                    let base = eval_expr(host, ctx, object)?;
                    let key = property_key(host, ctx, property)?;
                    (get_value(host, &base, &key)?, base)
                }
                other => (eval_expr(host, ctx, other)?, JsValue::Undefined),
            };
            let args = eval_args(host, ctx, args)?;
            if !host.heap().is_callable(&function) {
                return Err(host.type_error(format!("{} is not a function", describe(callee))));
            }
            call(host, &function, this, args)
        }
        Expr::New { callee, args } => {
            let constructor = eval_expr(host, ctx, callee)?;
            let args = eval_args(host, ctx, args)?;
            let constructable = match constructor.as_object() {
                Some(handle) => {
                    let object = host.heap().get(handle)?;
                    object.is_callable() && object.constructable
                }
                None => false,
            };
            if !constructable {
                return Err(host.type_error(format!("{} is not a constructor", describe(callee))));
            }
            construct(host, &constructor, args)
        }
        Expr::Assign { op, target, value } => eval_assign(host, ctx, *op, target, value),
        Expr::Unary { op, operand } => eval_unary(host, ctx, *op, operand),
        Expr::Binary { op, left, right } => {
            let left = eval_expr(host, ctx, left)?;
            let right = eval_expr(host, ctx, right)?;
            binary_op(host, *op, &left, &right)
        }
        Expr::Logical { op, left, right } => {
            let left = eval_expr(host, ctx, left)?;
            match (op, left.truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => eval_expr(host, ctx, right),
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if eval_expr(host, ctx, test)?.truthy() {
                eval_expr(host, ctx, consequent)
            } else {
                eval_expr(host, ctx, alternate)
            }
        }
        Expr::Sequence(items) => {
            let mut value = JsValue::Undefined;
            for item in items {
                value = eval_expr(host, ctx, item)?;
            }
            Ok(value)
        }
    }
}

fn compound(host: &mut Host, op: AssignOp, old: &JsValue, rhs: &JsValue) -> Completion {
    match op {
        AssignOp::Assign => Ok(rhs.clone()),
        AssignOp::AddAssign => binary_op(host, BinaryOp::Add, old, rhs),
        AssignOp::SubAssign => binary_op(host, BinaryOp::Sub, old, rhs),
    }
}

fn eval_assign(host: &mut Host, ctx: &Ctx, op: AssignOp, target: &Expr, value: &Expr) -> Completion {
    match target {
        Expr::Ident(name) => {
            let reference = resolve(host, &ctx.env, name)?;
            let new_value = if op == AssignOp::Assign {
                eval_expr(host, ctx, value)?
            } else {
                let old = read_reference(host, &reference, name)?;
                let rhs = eval_expr(host, ctx, value)?;
                compound(host, op, &old, &rhs)?
            };
            write_reference(host, ctx, &reference, name, new_value.clone())?;
            Ok(new_value)
        }
        Expr::Member { object, property } => {
            let base = eval_expr(host, ctx, object)?;
            let key = property_key(host, ctx, property)?;
            let new_value = if op == AssignOp::Assign {
                eval_expr(host, ctx, value)?
            } else {
                let old = get_value(host, &base, &key)?;
                let rhs = eval_expr(host, ctx, value)?;
                compound(host, op, &old, &rhs)?
            };
            put_value(host, &base, key, new_value.clone(), ctx.mode.strict)?;
            Ok(new_value)
        }
        _ => Err(host.throw_error(
            ErrorName::SyntaxError,
            "Invalid left-hand side in assignment",
        )),
    }
}

fn eval_unary(host: &mut Host, ctx: &Ctx, op: UnaryOp, operand: &Expr) -> Completion {
    match op {
        UnaryOp::TypeOf => {
            if let Expr::Ident(name) = operand {
                let reference = resolve(host, &ctx.env, name)?;
                if matches!(reference, Reference::Unresolved) {
                    return Ok(JsValue::str("undefined"));
                }
                let value = read_reference(host, &reference, name)?;
                return Ok(JsValue::str(type_of(host, &value)));
            }
            let value = eval_expr(host, ctx, operand)?;
            Ok(JsValue::str(type_of(host, &value)))
        }
        UnaryOp::Delete => match operand {
            Expr::Member { object, property } => {
                let base = eval_expr(host, ctx, object)?;
                let key = property_key(host, ctx, property)?;
                let handle = to_object(host, &base)?;
                let deleted = host.heap_mut().delete_property(handle, &key)?;
                if !deleted && ctx.mode.strict {
                    return Err(host.type_error(format!("Cannot delete property '{key}' of object")));
                }
                Ok(JsValue::Bool(deleted))
            }
            Expr::Ident(_) => Ok(JsValue::Bool(false)),
            other => {
                eval_expr(host, ctx, other)?;
                Ok(JsValue::Bool(true))
            }
        },
        UnaryOp::Void => {
            eval_expr(host, ctx, operand)?;
            Ok(JsValue::Undefined)
        }
        UnaryOp::Not => Ok(JsValue::Bool(!eval_expr(host, ctx, operand)?.truthy())),
        UnaryOp::Minus => {
            let value = eval_expr(host, ctx, operand)?;
            Ok(JsValue::number(-to_number(host, &value)))
        }
        UnaryOp::Plus => {
            let value = eval_expr(host, ctx, operand)?;
            Ok(JsValue::number(to_number(host, &value)))
        }
    }
}

fn arithmetic(host: &Host, left: &JsValue, right: &JsValue, f: fn(f64, f64) -> f64) -> JsValue {
    JsValue::number(f(to_number(host, left), to_number(host, right)))
}

fn binary_op(host: &mut Host, op: BinaryOp, left: &JsValue, right: &JsValue) -> Completion {
    Ok(match op {
        BinaryOp::Add => {
            let (l, r) = (to_primitive(host, left), to_primitive(host, right));
            if matches!(l, JsValue::Str(_)) || matches!(r, JsValue::Str(_)) {
                JsValue::Str(format!("{l}{r}"))
            } else {
                JsValue::number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => arithmetic(host, left, right, |a, b| a - b),
        BinaryOp::Mul => arithmetic(host, left, right, |a, b| a * b),
        BinaryOp::Div => arithmetic(host, left, right, |a, b| a / b),
        BinaryOp::Rem => arithmetic(host, left, right, |a, b| a % b),
        BinaryOp::StrictEq => JsValue::Bool(strict_equals(left, right)),
        BinaryOp::StrictNotEq => JsValue::Bool(!strict_equals(left, right)),
        BinaryOp::Eq => JsValue::Bool(loose_equals(host, left, right)),
        BinaryOp::NotEq => JsValue::Bool(!loose_equals(host, left, right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            let (l, r) = (to_primitive(host, left), to_primitive(host, right));
            let ordering = match (&l, &r) {
                (JsValue::Str(a), JsValue::Str(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            JsValue::Bool(match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o.is_lt(),
                (BinaryOp::Gt, Some(o)) => o.is_gt(),
                (BinaryOp::LtEq, Some(o)) => o.is_le(),
                (_, Some(o)) => o.is_ge(),
            })
        }
        BinaryOp::In => {
            let key = PropertyKey(to_string(host, left));
            let Some(handle) = right.as_object() else {
                let shown = to_string(host, right);
                return Err(host.type_error(format!(
                    "Cannot use 'in' operator to search for '{key}' in {shown}"
                )));
            };
            JsValue::Bool(host.heap().has_property(handle, &key)?)
        }
        BinaryOp::InstanceOf => {
            if !host.heap().is_callable(right) {
                return Err(host.type_error("Right-hand side of 'instanceof' is not callable"));
            }
            let prototype = get_value(host, right, &PropertyKey::from("prototype"))?;
            let Some(prototype) = prototype.as_object() else {
                return Err(host.type_error("Function has non-object prototype in instanceof check"));
            };
            let Some(mut current) = left.as_object() else {
                return Ok(JsValue::Bool(false));
            };
            loop {
                match host.heap().get_prototype_of(current)? {
                    Some(proto) if proto == prototype => return Ok(JsValue::Bool(true)),
                    Some(proto) => current = proto,
                    None => return Ok(JsValue::Bool(false)),
                }
            }
        }
    })
}
