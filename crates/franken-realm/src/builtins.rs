//! Native built-ins of the host runtime and the installer that lays them out
//! on a fresh heap.

use serde::{Deserialize, Serialize};

use crate::error::ErrorName;
use crate::evaluators::{self, EvaluatorId};
use crate::host::{Host, HostProfile, Intrinsics};
use crate::interpreter::{self, Completion, Throw};
use crate::object_model::{
    CallTarget, JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey,
};

/// Every native function a host can expose. Stored in a callable object's
/// `[[Call]]` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeFunction {
    ObjectConstructor,
    ObjectGetPrototypeOf,
    ObjectKeys,
    ObjectFreeze,
    ObjectIsFrozen,
    ObjectDefineProperty,
    ObjectGetOwnPropertyDescriptor,
    ObjectPrototypeHasOwnProperty,
    ObjectPrototypeToString,
    ObjectPrototypeValueOf,
    FunctionConstructor,
    FunctionPrototypeCall,
    Eval,
    ErrorConstructor(ErrorName),
    ErrorPrototypeToString,
    IsNaN,
    IsFinite,
    ParseInt,
    ParseFloat,
    StringConstructor,
    NumberConstructor,
    BooleanConstructor,
    ArrayConstructor,
    MathMax,
    MathMin,
    MathAbs,
    MathFloor,
    JsonStringify,
    PromiseConstructor,
    PromiseResolve,
    PromisePrototypeThen,
    PromiseSettle,
    DateConstructor,
    DateNow,
    RegExpConstructor,
    SetTimeout,
    SetInterval,
    ConsoleLog,
    LegacyDefineGetter,
    LegacyDefineSetter,
    LegacyLookupGetter,
    LegacyLookupSetter,
    StrictDefineGetter,
    StrictDefineSetter,
    StrictLookupGetter,
    StrictLookupSetter,
    TameFunctionConstructor,
    SafeEval(EvaluatorId),
    SafeFunction(EvaluatorId),
}

/// Names of the legacy accessor-introspection methods on `Object.prototype`.
pub const ACCESSOR_METHODS: [&str; 4] = [
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

pub(crate) const LEGACY_ACCESSOR_NATIVES: [NativeFunction; 4] = [
    NativeFunction::LegacyDefineGetter,
    NativeFunction::LegacyDefineSetter,
    NativeFunction::LegacyLookupGetter,
    NativeFunction::LegacyLookupSetter,
];

pub(crate) const STRICT_ACCESSOR_NATIVES: [NativeFunction; 4] = [
    NativeFunction::StrictDefineGetter,
    NativeFunction::StrictDefineSetter,
    NativeFunction::StrictLookupGetter,
    NativeFunction::StrictLookupSetter,
];

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

struct Installer<'a> {
    heap: &'a mut ObjectHeap,
    function_prototype: ObjectHandle,
}

impl Installer<'_> {
    fn function(
        &mut self,
        name: &str,
        native: NativeFunction,
        constructable: bool,
    ) -> Result<ObjectHandle, ObjectError> {
        new_native_function(self.heap, self.function_prototype, name, native, constructable)
    }

    fn hidden(&mut self, target: ObjectHandle, name: &str, value: JsValue) -> Result<(), ObjectError> {
        self.heap.define_property(
            target,
            PropertyKey::from(name),
            PropertyDescriptor::data_hidden(value),
        )?;
        Ok(())
    }

    fn method(
        &mut self,
        target: ObjectHandle,
        name: &str,
        native: NativeFunction,
    ) -> Result<ObjectHandle, ObjectError> {
        let f = self.function(name, native, false)?;
        self.hidden(target, name, JsValue::Object(f))?;
        Ok(f)
    }

    fn constructor(
        &mut self,
        name: &str,
        native: NativeFunction,
        prototype: ObjectHandle,
    ) -> Result<ObjectHandle, ObjectError> {
        let ctor = self.function(name, native, true)?;
        self.heap.define_property(
            ctor,
            PropertyKey::from("prototype"),
            PropertyDescriptor::data_with(JsValue::Object(prototype), false, false, false),
        )?;
        self.hidden(prototype, "constructor", JsValue::Object(ctor))?;
        Ok(ctor)
    }

    fn plain(&mut self, proto: ObjectHandle) -> ObjectHandle {
        self.heap.alloc(Some(proto))
    }
}

/// Allocate a native function object with the usual `name` property.
pub(crate) fn new_native_function(
    heap: &mut ObjectHeap,
    function_prototype: ObjectHandle,
    name: &str,
    native: NativeFunction,
    constructable: bool,
) -> Result<ObjectHandle, ObjectError> {
    let f = heap.alloc_callable(
        Some(function_prototype),
        CallTarget::Native(native),
        constructable,
    );
    heap.define_property(
        f,
        PropertyKey::from("name"),
        PropertyDescriptor::data_with(JsValue::str(name), false, false, true),
    )?;
    Ok(f)
}

/// Build the intrinsics and the global object of a new host.
pub(crate) fn install(
    heap: &mut ObjectHeap,
    profile: HostProfile,
) -> Result<(ObjectHandle, Intrinsics), ObjectError> {
    use NativeFunction as N;

    let object_prototype = heap.alloc(None);
    let function_prototype = heap.alloc(Some(object_prototype));
    let mut ins = Installer {
        heap,
        function_prototype,
    };
    let global = ins.plain(object_prototype);

    let object = ins.constructor("Object", N::ObjectConstructor, object_prototype)?;
    ins.method(object, "getPrototypeOf", N::ObjectGetPrototypeOf)?;
    ins.method(object, "keys", N::ObjectKeys)?;
    ins.method(object, "freeze", N::ObjectFreeze)?;
    ins.method(object, "isFrozen", N::ObjectIsFrozen)?;
    ins.method(object, "defineProperty", N::ObjectDefineProperty)?;
    ins.method(
        object,
        "getOwnPropertyDescriptor",
        N::ObjectGetOwnPropertyDescriptor,
    )?;
    ins.method(object_prototype, "hasOwnProperty", N::ObjectPrototypeHasOwnProperty)?;
    ins.method(object_prototype, "toString", N::ObjectPrototypeToString)?;
    ins.method(object_prototype, "valueOf", N::ObjectPrototypeValueOf)?;
    let accessor_natives = match profile {
        HostProfile::Legacy => LEGACY_ACCESSOR_NATIVES,
        HostProfile::Hardened => STRICT_ACCESSOR_NATIVES,
    };
    for (name, native) in ACCESSOR_METHODS.into_iter().zip(accessor_natives) {
        ins.method(object_prototype, name, native)?;
    }

    let function = ins.constructor("Function", N::FunctionConstructor, function_prototype)?;
    ins.method(function_prototype, "call", N::FunctionPrototypeCall)?;
    let eval = ins.function("eval", N::Eval, false)?;

    let error_prototype = ins.plain(object_prototype);
    let mut error_prototypes = std::collections::BTreeMap::new();
    let mut error_constructors = std::collections::BTreeMap::new();
    for name in ErrorName::ALL {
        let proto = if name == ErrorName::Error {
            error_prototype
        } else {
            ins.plain(error_prototype)
        };
        let ctor = ins.constructor(name.as_str(), N::ErrorConstructor(name), proto)?;
        ins.hidden(proto, "name", JsValue::str(name.as_str()))?;
        ins.hidden(proto, "message", JsValue::str(""))?;
        error_prototypes.insert(name, proto);
        error_constructors.insert(name, ctor);
    }
    ins.method(error_prototype, "toString", N::ErrorPrototypeToString)?;

    let string_prototype = ins.plain(object_prototype);
    let string = ins.constructor("String", N::StringConstructor, string_prototype)?;
    let number_prototype = ins.plain(object_prototype);
    let number = ins.constructor("Number", N::NumberConstructor, number_prototype)?;
    let boolean_prototype = ins.plain(object_prototype);
    let boolean = ins.constructor("Boolean", N::BooleanConstructor, boolean_prototype)?;
    let array_prototype = ins.plain(object_prototype);
    let array = ins.constructor("Array", N::ArrayConstructor, array_prototype)?;

    let math = ins.plain(object_prototype);
    ins.method(math, "max", N::MathMax)?;
    ins.method(math, "min", N::MathMin)?;
    ins.method(math, "abs", N::MathAbs)?;
    ins.method(math, "floor", N::MathFloor)?;
    ins.hidden(math, "PI", JsValue::number(std::f64::consts::PI))?;

    let json = ins.plain(object_prototype);
    ins.method(json, "stringify", N::JsonStringify)?;

    let promise_prototype = ins.plain(object_prototype);
    let promise = ins.constructor("Promise", N::PromiseConstructor, promise_prototype)?;
    ins.method(promise, "resolve", N::PromiseResolve)?;
    ins.method(promise_prototype, "then", N::PromisePrototypeThen)?;

    let date_prototype = ins.plain(object_prototype);
    let date = ins.constructor("Date", N::DateConstructor, date_prototype)?;
    ins.method(date, "now", N::DateNow)?;
    let regexp_prototype = ins.plain(object_prototype);
    let regexp = ins.constructor("RegExp", N::RegExpConstructor, regexp_prototype)?;

    let console = ins.plain(object_prototype);
    ins.method(console, "log", N::ConsoleLog)?;
    let process = ins.plain(object_prototype);
    let env = ins.plain(object_prototype);
    ins.hidden(process, "env", JsValue::Object(env))?;
    ins.hidden(process, "platform", JsValue::str("franken"))?;

    let globals = [
        ("Object", object),
        ("Function", function),
        ("eval", eval),
        ("String", string),
        ("Number", number),
        ("Boolean", boolean),
        ("Array", array),
        ("Math", math),
        ("JSON", json),
        ("Promise", promise),
        ("Date", date),
        ("RegExp", regexp),
        ("console", console),
        ("process", process),
        ("globalThis", global),
    ];
    for (name, handle) in globals {
        ins.hidden(global, name, JsValue::Object(handle))?;
    }
    for (name, ctor) in &error_constructors {
        ins.hidden(global, name.as_str(), JsValue::Object(*ctor))?;
    }
    let global_functions = [
        ("isNaN", N::IsNaN),
        ("isFinite", N::IsFinite),
        ("parseInt", N::ParseInt),
        ("parseFloat", N::ParseFloat),
        ("setTimeout", N::SetTimeout),
        ("setInterval", N::SetInterval),
    ];
    for (name, native) in global_functions {
        ins.method(global, name, native)?;
    }
    let frozen_values = [
        ("Infinity", JsValue::number(f64::INFINITY)),
        ("NaN", JsValue::number(f64::NAN)),
        ("undefined", JsValue::Undefined),
    ];
    for (name, value) in frozen_values {
        ins.heap.define_property(
            global,
            PropertyKey::from(name),
            PropertyDescriptor::data_frozen(value),
        )?;
    }

    Ok((
        global,
        Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            promise_prototype,
            object,
            function,
            eval,
            error_prototypes,
            error_constructors,
        },
    ))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).cloned().unwrap_or(JsValue::Undefined)
}

/// Invoke a native. `new_target` is set when called through `new`.
pub(crate) fn call_native(
    host: &mut Host,
    callee: ObjectHandle,
    native: NativeFunction,
    this: JsValue,
    args: &[JsValue],
    new_target: Option<ObjectHandle>,
) -> Completion {
    use NativeFunction as N;
    match native {
        N::ObjectConstructor => {
            let value = arg(args, 0);
            if value.is_nullish() {
                let proto = host.intrinsics().object_prototype;
                return Ok(JsValue::Object(host.heap_mut().alloc(Some(proto))));
            }
            Ok(JsValue::Object(interpreter::to_object(host, &value)?))
        }
        N::ObjectGetPrototypeOf => {
            let handle = interpreter::to_object(host, &arg(args, 0))?;
            Ok(match host.heap().get_prototype_of(handle)? {
                Some(proto) => JsValue::Object(proto),
                None => JsValue::Null,
            })
        }
        N::ObjectKeys => {
            let handle = interpreter::to_object(host, &arg(args, 0))?;
            let keys = host.heap().keys(handle)?;
            Ok(make_array(host, keys.into_iter().map(JsValue::Str).collect()))
        }
        N::ObjectFreeze => {
            let value = arg(args, 0);
            if let Some(handle) = value.as_object() {
                host.heap_mut().freeze(handle)?;
            }
            Ok(value)
        }
        N::ObjectIsFrozen => Ok(JsValue::Bool(match arg(args, 0).as_object() {
            Some(handle) => host.heap().is_frozen(handle)?,
            None => true,
        })),
        N::ObjectDefineProperty => object_define_property(host, args),
        N::ObjectGetOwnPropertyDescriptor => {
            let handle = interpreter::to_object(host, &arg(args, 0))?;
            let key = PropertyKey::from(interpreter::to_string(host, &arg(args, 1)));
            match host.heap().get_own_property_descriptor(handle, &key)? {
                Some(desc) => from_property_descriptor(host, &desc),
                None => Ok(JsValue::Undefined),
            }
        }
        N::ObjectPrototypeHasOwnProperty => {
            let handle = interpreter::to_object(host, &this)?;
            let key = PropertyKey::from(interpreter::to_string(host, &arg(args, 0)));
            Ok(JsValue::Bool(host.heap().has_own(handle, &key)?))
        }
        N::ObjectPrototypeToString => {
            let tag = match &this {
                JsValue::Undefined => "Undefined".to_string(),
                JsValue::Null => "Null".to_string(),
                other => {
                    let handle = interpreter::to_object(host, other)?;
                    let object = host.heap().get(handle)?;
                    match &object.class_tag {
                        Some(tag) => tag.clone(),
                        None if object.is_callable() => "Function".to_string(),
                        None => "Object".to_string(),
                    }
                }
            };
            Ok(JsValue::str(format!("[object {tag}]")))
        }
        N::ObjectPrototypeValueOf => Ok(JsValue::Object(interpreter::to_object(host, &this)?)),
        N::FunctionConstructor => interpreter::create_host_function(host, args),
        N::FunctionPrototypeCall => {
            let rest = args.get(1..).unwrap_or_default().to_vec();
            interpreter::call(host, &this, arg(args, 0), rest)
        }
        N::Eval => match arg(args, 0) {
            JsValue::Str(source) => host.evaluate_script(&source),
            other => Ok(other),
        },
        N::ErrorConstructor(name) => {
            let message = arg(args, 0);
            let error = host.make_error(name, "");
            if let Some(handle) = error.as_object() {
                let key = PropertyKey::from("message");
                if message == JsValue::Undefined {
                    host.heap_mut().delete_property(handle, &key)?;
                } else {
                    let text = interpreter::to_string(host, &message);
                    host.heap_mut().define_property(
                        handle,
                        key,
                        PropertyDescriptor::data_hidden(JsValue::Str(text)),
                    )?;
                }
            }
            Ok(error)
        }
        N::ErrorPrototypeToString => {
            if !this.is_object() {
                return Err(host.type_error("Error.prototype.toString requires an object"));
            }
            let name = interpreter::get_value(host, &this, &PropertyKey::from("name"))?;
            let message = interpreter::get_value(host, &this, &PropertyKey::from("message"))?;
            let name = match name {
                JsValue::Undefined => "Error".to_string(),
                other => interpreter::to_string(host, &other),
            };
            let message = match message {
                JsValue::Undefined => String::new(),
                other => interpreter::to_string(host, &other),
            };
            Ok(JsValue::Str(match (name.is_empty(), message.is_empty()) {
                (true, _) => message,
                (_, true) => name,
                _ => format!("{name}: {message}"),
            }))
        }
        N::IsNaN => Ok(JsValue::Bool(arg(args, 0).to_number().is_nan())),
        N::IsFinite => Ok(JsValue::Bool(arg(args, 0).to_number().is_finite())),
        N::ParseInt => {
            let text = interpreter::to_string(host, &arg(args, 0));
            Ok(JsValue::number(parse_int(&text, arg(args, 1).to_number())))
        }
        N::ParseFloat => {
            let text = interpreter::to_string(host, &arg(args, 0));
            Ok(JsValue::number(parse_float(&text)))
        }
        N::StringConstructor => {
            let value = match args.first() {
                Some(v) => JsValue::Str(interpreter::to_string(host, v)),
                None => JsValue::str(""),
            };
            wrap_if_constructing(host, value, new_target)
        }
        N::NumberConstructor => {
            let value = JsValue::number(args.first().map_or(0.0, JsValue::to_number));
            wrap_if_constructing(host, value, new_target)
        }
        N::BooleanConstructor => {
            let value = JsValue::Bool(arg(args, 0).truthy());
            wrap_if_constructing(host, value, new_target)
        }
        N::ArrayConstructor => Ok(make_array(host, args.to_vec())),
        N::MathMax => Ok(JsValue::number(args.iter().map(JsValue::to_number).fold(
            f64::NEG_INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) },
        ))),
        N::MathMin => Ok(JsValue::number(args.iter().map(JsValue::to_number).fold(
            f64::INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) },
        ))),
        N::MathAbs => Ok(JsValue::number(arg(args, 0).to_number().abs())),
        N::MathFloor => Ok(JsValue::number(arg(args, 0).to_number().floor())),
        N::JsonStringify => match to_json(host, &arg(args, 0), 0)? {
            Some(json) => Ok(JsValue::Str(json.to_string())),
            None => Ok(JsValue::Undefined),
        },
        N::PromiseConstructor => {
            if new_target.is_none() {
                return Err(host.type_error("Promise constructor cannot be invoked without 'new'"));
            }
            let executor = arg(args, 0);
            if !host.heap().is_callable(&executor) {
                return Err(host.type_error("Promise resolver is not a function"));
            }
            let promise = new_promise(host);
            let function_prototype = host.intrinsics().function_prototype;
            let resolve = new_native_function(
                host.heap_mut(),
                function_prototype,
                "resolve",
                N::PromiseSettle,
                false,
            )?;
            let reject = new_native_function(
                host.heap_mut(),
                function_prototype,
                "reject",
                N::PromiseSettle,
                false,
            )?;
            let outcome = interpreter::call(
                host,
                &executor,
                JsValue::Undefined,
                vec![JsValue::Object(resolve), JsValue::Object(reject)],
            );
            // A throwing executor rejects the promise; there is no job queue
            // to observe the rejection.
            if let Err(Throw::Fault(fault)) = outcome {
                return Err(Throw::Fault(fault));
            }
            Ok(promise)
        }
        N::PromiseResolve => {
            let value = arg(args, 0);
            if let Some(handle) = value.as_object()
                && host.heap().get(handle)?.class_tag.as_deref() == Some("Promise")
            {
                return Ok(value);
            }
            Ok(new_promise(host))
        }
        N::PromisePrototypeThen => Ok(new_promise(host)),
        N::PromiseSettle => Ok(JsValue::Undefined),
        // No event loop: timers are accepted and never fire.
        N::SetTimeout | N::SetInterval => Ok(JsValue::Int(0)),
        N::DateConstructor => {
            let now = epoch_millis();
            let date = tagged_instance(host, callee, "Date")?;
            if let Some(handle) = date.as_object() {
                host.heap_mut().define_property(
                    handle,
                    PropertyKey::from("time"),
                    PropertyDescriptor::data_hidden(JsValue::number(now)),
                )?;
            }
            Ok(date)
        }
        N::DateNow => Ok(JsValue::number(epoch_millis())),
        N::RegExpConstructor => {
            let source = match arg(args, 0) {
                JsValue::Undefined => "(?:)".to_string(),
                other => interpreter::to_string(host, &other),
            };
            let flags = match arg(args, 1) {
                JsValue::Undefined => String::new(),
                other => interpreter::to_string(host, &other),
            };
            let regexp = tagged_instance(host, callee, "RegExp")?;
            if let Some(handle) = regexp.as_object() {
                let heap = host.heap_mut();
                heap.define_property(
                    handle,
                    PropertyKey::from("source"),
                    PropertyDescriptor::data_hidden(JsValue::Str(source)),
                )?;
                heap.define_property(
                    handle,
                    PropertyKey::from("flags"),
                    PropertyDescriptor::data_hidden(JsValue::Str(flags)),
                )?;
            }
            Ok(regexp)
        }
        N::ConsoleLog => {
            let line = args
                .iter()
                .map(|v| interpreter::to_string(host, v))
                .collect::<Vec<_>>()
                .join(" ");
            host.console_push(line);
            Ok(JsValue::Undefined)
        }
        N::LegacyDefineGetter | N::LegacyDefineSetter => {
            let receiver = legacy_receiver(host, &this)?;
            let accessor = arg(args, 1).as_object();
            define_accessor_half(
                host,
                receiver,
                &arg(args, 0),
                accessor,
                native == N::LegacyDefineGetter,
            )
        }
        N::LegacyLookupGetter | N::LegacyLookupSetter => {
            let receiver = legacy_receiver(host, &this)?;
            let key = PropertyKey::from(interpreter::to_string(host, &arg(args, 0)));
            let found = host.heap().find_property(receiver, &key)?;
            let half = found.and_then(|(_, desc)| {
                if native == N::LegacyLookupGetter {
                    desc.getter()
                } else {
                    desc.setter()
                }
            });
            Ok(half.map_or(JsValue::Undefined, JsValue::Object))
        }
        N::StrictDefineGetter | N::StrictDefineSetter => {
            let receiver = interpreter::to_object(host, &this)?;
            let accessor = arg(args, 1);
            let is_getter = native == N::StrictDefineGetter;
            if !host.heap().is_callable(&accessor) {
                return Err(host.type_error(if is_getter {
                    "invalid getter usage"
                } else {
                    "invalid setter usage"
                }));
            }
            define_accessor_half(host, receiver, &arg(args, 0), accessor.as_object(), is_getter)
        }
        N::StrictLookupGetter | N::StrictLookupSetter => {
            let receiver = interpreter::to_object(host, &this)?;
            let key = PropertyKey::from(interpreter::to_string(host, &arg(args, 0)));
            let mut current = Some(receiver);
            while let Some(handle) = current {
                if let Some(desc) = host.heap().get_own_property_descriptor(handle, &key)? {
                    let half = if native == N::StrictLookupGetter {
                        desc.getter()
                    } else {
                        desc.setter()
                    };
                    return Ok(half.map_or(JsValue::Undefined, JsValue::Object));
                }
                current = host.heap().get_prototype_of(handle)?;
            }
            Ok(JsValue::Undefined)
        }
        N::TameFunctionConstructor => Err(host.type_error("Not available")),
        N::SafeEval(id) => evaluators::safe_eval_native(host, id, args),
        N::SafeFunction(id) => evaluators::safe_function_native(host, id, args),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The legacy methods treat a missing receiver as the host global.
fn legacy_receiver(host: &mut Host, this: &JsValue) -> Completion<ObjectHandle> {
    if this.is_nullish() {
        return Ok(host.global());
    }
    interpreter::to_object(host, this)
}

fn define_accessor_half(
    host: &mut Host,
    receiver: ObjectHandle,
    key: &JsValue,
    accessor: Option<ObjectHandle>,
    is_getter: bool,
) -> Completion {
    let key = PropertyKey::from(interpreter::to_string(host, key));
    let existing = host.heap().get_own_property_descriptor(receiver, &key)?;
    let (get, set) = match (existing, is_getter) {
        (Some(PropertyDescriptor::Accessor { set, .. }), true) => (accessor, set),
        (Some(PropertyDescriptor::Accessor { get, .. }), false) => (get, accessor),
        (_, true) => (accessor, None),
        (_, false) => (None, accessor),
    };
    let desc = PropertyDescriptor::Accessor {
        get,
        set,
        enumerable: true,
        configurable: true,
    };
    if !host.heap_mut().define_property(receiver, key.clone(), desc)? {
        return Err(host.type_error(format!("Cannot redefine property: {key}")));
    }
    Ok(JsValue::Undefined)
}

fn object_define_property(host: &mut Host, args: &[JsValue]) -> Completion {
    let target = arg(args, 0);
    let Some(handle) = target.as_object() else {
        return Err(host.type_error("Object.defineProperty called on non-object"));
    };
    let key = PropertyKey::from(interpreter::to_string(host, &arg(args, 1)));
    let Some(attributes) = arg(args, 2).as_object() else {
        return Err(host.type_error("Property description must be an object"));
    };
    let desc = to_property_descriptor(host, attributes)?;
    if !host.heap_mut().define_property(handle, key.clone(), desc)? {
        return Err(host.type_error(format!("Cannot redefine property: {key}")));
    }
    Ok(target)
}

fn to_property_descriptor(host: &mut Host, attributes: ObjectHandle) -> Completion<PropertyDescriptor> {
    let source = JsValue::Object(attributes);
    let field = |host: &mut Host, name: &str| -> Completion<Option<JsValue>> {
        let key = PropertyKey::from(name);
        if !host.heap().has_property(attributes, &key)? {
            return Ok(None);
        }
        interpreter::get_value(host, &source, &key).map(Some)
    };
    let enumerable = field(host, "enumerable")?.is_some_and(|v| v.truthy());
    let configurable = field(host, "configurable")?.is_some_and(|v| v.truthy());
    let get = field(host, "get")?;
    let set = field(host, "set")?;
    if get.is_some() || set.is_some() {
        let mut accessor_half = |value: Option<JsValue>, what: &str| match value {
            None | Some(JsValue::Undefined) => Ok(None),
            Some(v) if host.heap().is_callable(&v) => Ok(v.as_object()),
            Some(v) => {
                let shown = interpreter::to_string(host, &v);
                Err(host.type_error(format!("{what} must be a function: {shown}")))
            }
        };
        let get = accessor_half(get, "Getter")?;
        let set = accessor_half(set, "Setter")?;
        return Ok(PropertyDescriptor::Accessor {
            get,
            set,
            enumerable,
            configurable,
        });
    }
    let value = field(host, "value")?.unwrap_or(JsValue::Undefined);
    let writable = field(host, "writable")?.is_some_and(|v| v.truthy());
    Ok(PropertyDescriptor::data_with(
        value,
        writable,
        enumerable,
        configurable,
    ))
}

fn from_property_descriptor(host: &mut Host, desc: &PropertyDescriptor) -> Completion {
    let proto = host.intrinsics().object_prototype;
    let mut fields: Vec<(&str, JsValue)> = Vec::new();
    match desc {
        PropertyDescriptor::Data {
            value, writable, ..
        } => {
            fields.push(("value", value.clone()));
            fields.push(("writable", JsValue::Bool(*writable)));
        }
        PropertyDescriptor::Accessor { get, set, .. } => {
            fields.push(("get", get.map_or(JsValue::Undefined, JsValue::Object)));
            fields.push(("set", set.map_or(JsValue::Undefined, JsValue::Object)));
        }
    }
    fields.push(("enumerable", JsValue::Bool(desc.is_enumerable())));
    fields.push(("configurable", JsValue::Bool(desc.is_configurable())));
    let handle = host.heap_mut().create(
        Some(proto),
        fields
            .into_iter()
            .map(|(k, v)| (PropertyKey::from(k), PropertyDescriptor::data(v))),
    )?;
    Ok(JsValue::Object(handle))
}

fn wrap_if_constructing(
    host: &mut Host,
    value: JsValue,
    new_target: Option<ObjectHandle>,
) -> Completion {
    if new_target.is_none() {
        return Ok(value);
    }
    Ok(JsValue::Object(interpreter::to_object(host, &value)?))
}

/// An array-like object with indexed elements and `length`.
pub(crate) fn make_array(host: &mut Host, values: Vec<JsValue>) -> JsValue {
    let proto = host.intrinsics().array_prototype;
    let heap = host.heap_mut();
    let handle = heap.alloc(Some(proto));
    if let Ok(object) = heap.get_mut(handle) {
        object.class_tag = Some("Array".to_string());
        let length = values.len();
        for (index, value) in values.into_iter().enumerate() {
            object
                .properties
                .insert(PropertyKey(index.to_string()), PropertyDescriptor::data(value));
        }
        object.properties.insert(
            PropertyKey::from("length"),
            PropertyDescriptor::data_with(JsValue::number(length as f64), true, false, false),
        );
    }
    JsValue::Object(handle)
}

fn new_promise(host: &mut Host) -> JsValue {
    let proto = host.intrinsics().promise_prototype;
    let heap = host.heap_mut();
    let handle = heap.alloc(Some(proto));
    if let Ok(object) = heap.get_mut(handle) {
        object.class_tag = Some("Promise".to_string());
    }
    JsValue::Object(handle)
}

/// Instance whose prototype is `ctor.prototype`.
fn tagged_instance(host: &mut Host, ctor: ObjectHandle, tag: &str) -> Completion {
    let proto = match host.heap().get_property(ctor, &PropertyKey::from("prototype"))? {
        JsValue::Object(proto) => proto,
        _ => host.intrinsics().object_prototype,
    };
    let heap = host.heap_mut();
    let handle = heap.alloc(Some(proto));
    heap.get_mut(handle)?.class_tag = Some(tag.to_string());
    Ok(JsValue::Object(handle))
}

fn epoch_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_millis() as f64)
}

const MAX_JSON_DEPTH: usize = 64;

fn to_json(host: &mut Host, value: &JsValue, depth: usize) -> Completion<Option<serde_json::Value>> {
    use serde_json::Value;
    Ok(Some(match value {
        JsValue::Undefined => return Ok(None),
        JsValue::Null => Value::Null,
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Int(n) => Value::from(*n),
        JsValue::Number(bits) => serde_json::Number::from_f64(bits.value())
            .map_or(Value::Null, Value::Number),
        JsValue::Str(s) => Value::String(s.clone()),
        JsValue::Object(handle) => {
            if depth >= MAX_JSON_DEPTH {
                return Err(host.type_error("Converting circular structure to JSON"));
            }
            let object = host.heap().get(*handle)?;
            if object.is_callable() {
                return Ok(None);
            }
            let is_array = object.class_tag.as_deref() == Some("Array");
            let entries: Vec<(String, JsValue)> = object
                .own_property_keys()
                .into_iter()
                .filter_map(|k| match object.get_own_property(&k) {
                    Some(PropertyDescriptor::Data {
                        value,
                        enumerable: true,
                        ..
                    }) => Some((k.0, value.clone())),
                    _ => None,
                })
                .collect();
            if is_array {
                let mut items = Vec::with_capacity(entries.len());
                for (_, item) in entries {
                    items.push(to_json(host, &item, depth + 1)?.unwrap_or(Value::Null));
                }
                Value::Array(items)
            } else {
                let mut map = serde_json::Map::new();
                for (key, item) in entries {
                    if let Some(json) = to_json(host, &item, depth + 1)? {
                        map.insert(key, json);
                    }
                }
                Value::Object(map)
            }
        }
    }))
}

fn strip_sign(text: &str) -> (f64, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (-1.0, rest)
    } else {
        (1.0, text.strip_prefix('+').unwrap_or(text))
    }
}

fn trim_leading(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}

pub(crate) fn parse_int(text: &str, radix: f64) -> f64 {
    let (sign, mut rest) = strip_sign(trim_leading(text));
    let mut radix = if radix.is_nan() || radix.trunc() == 0.0 {
        0
    } else {
        radix.trunc() as i64
    };
    if (radix == 0 || radix == 16)
        && let Some(stripped) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
    {
        rest = stripped;
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut any = false;
    for c in rest.chars() {
        let Some(digit) = c.to_digit(radix as u32) else {
            break;
        };
        value = value * radix as f64 + f64::from(digit);
        any = true;
    }
    if any { sign * value } else { f64::NAN }
}

pub(crate) fn parse_float(text: &str) -> f64 {
    let (sign, rest) = strip_sign(trim_leading(text));
    if rest.starts_with("Infinity") {
        return sign * f64::INFINITY;
    }
    let bytes = rest.as_bytes();
    let mut end = 0;
    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    rest[..end].parse::<f64>().map_or(f64::NAN, |v| sign * v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOptions;

    #[test]
    fn parse_int_follows_radix_rules() {
        assert_eq!(parse_int("  42px", f64::NAN), 42.0);
        assert_eq!(parse_int("-0x1f", f64::NAN), -31.0);
        assert_eq!(parse_int("101", 2.0), 5.0);
        assert!(parse_int("zz", 10.0).is_nan());
        assert!(parse_int("1", 37.0).is_nan());
    }

    #[test]
    fn parse_float_takes_longest_prefix() {
        assert_eq!(parse_float("3.5e2x"), 350.0);
        assert_eq!(parse_float(" -.5"), -0.5);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(parse_float("-Infinityx"), f64::NEG_INFINITY);
        assert!(parse_float("inf").is_nan());
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn legacy_profile_installs_sloppy_accessor_methods() {
        let host = Host::new(HostOptions::default()).unwrap();
        let proto = host.intrinsics().object_prototype;
        let value = host
            .heap()
            .get_property(proto, &PropertyKey::from("__lookupGetter__"))
            .unwrap();
        let handle = value.as_object().unwrap();
        assert_eq!(
            host.heap().call_target(handle).unwrap(),
            Some(CallTarget::Native(NativeFunction::LegacyLookupGetter))
        );
    }

    #[test]
    fn hardened_profile_installs_strict_accessor_methods() {
        let mut host = Host::new(HostOptions {
            profile: HostProfile::Hardened,
            ..HostOptions::default()
        })
        .unwrap();
        let err = host
            .evaluate("(0, Object.prototype.__lookupGetter__)('x')")
            .unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
    }

    #[test]
    fn accessor_methods_define_and_look_up() {
        let mut host = Host::new(HostOptions::default()).unwrap();
        let value = host
            .evaluate(
                "var o = {}; \
                 o.__defineGetter__('v', function () { return 7 }); \
                 o.__lookupGetter__('v') !== undefined && o.v",
            )
            .unwrap();
        assert_eq!(value, JsValue::Int(7));
    }

    #[test]
    fn json_stringify_of_objects_and_primitives() {
        let mut host = Host::new(HostOptions::default()).unwrap();
        assert_eq!(
            host.evaluate("JSON.stringify({a: 1, b: 'x', c: [true, null], f: function () {}})")
                .unwrap(),
            JsValue::str(r#"{"a":1,"b":"x","c":[true,null]}"#)
        );
        assert_eq!(host.evaluate("JSON.stringify(undefined)").unwrap(), JsValue::Undefined);
        assert_eq!(host.evaluate("JSON.stringify(0.5)").unwrap(), JsValue::str("0.5"));
    }

    #[test]
    fn error_constructors_build_named_errors() {
        let mut host = Host::new(HostOptions::default()).unwrap();
        assert_eq!(
            host.evaluate("String(new TypeError('bad'))").unwrap(),
            JsValue::str("TypeError: bad")
        );
        assert_eq!(
            host.evaluate("new RangeError('r') instanceof Error").unwrap(),
            JsValue::Bool(true)
        );
        assert_eq!(
            host.evaluate("Error().hasOwnProperty('message')").unwrap(),
            JsValue::Bool(false)
        );
    }

    #[test]
    fn promise_resolve_has_then() {
        let mut host = Host::new(HostOptions::default()).unwrap();
        assert_eq!(
            host.evaluate("'then' in Promise.resolve(1)").unwrap(),
            JsValue::Bool(true)
        );
    }

    #[test]
    fn console_log_is_captured() {
        let mut host = Host::new(HostOptions::default()).unwrap();
        host.evaluate("console.log('a', 1, true)").unwrap();
        assert_eq!(host.console_output(), ["a 1 true".to_string()]);
    }
}
