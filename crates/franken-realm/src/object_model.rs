//! Object model for the host runtime: values, property descriptors, ordinary
//! objects with prototype chains, and the heap that owns them.
//!
//! Every realm built from one host shares this heap, so handles are only
//! meaningful against the heap of the host that allocated them.
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builtins::NativeFunction;

// ---------------------------------------------------------------------------
// PropertyKey
// ---------------------------------------------------------------------------

/// A string property key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyKey(pub String);

impl PropertyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

/// Index into the host's closure table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClosureId(pub u32);

// ---------------------------------------------------------------------------
// JsValue
// ---------------------------------------------------------------------------

/// IEEE-754 double stored by bit pattern so values stay `Eq`/`Ord`.
///
/// Only non-integral, non-finite or negative-zero numbers are stored this
/// way; integral values live in `JsValue::Int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NumberBits(pub u64);

impl NumberBits {
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            // One canonical NaN so SameValue(NaN, NaN) holds structurally.
            return Self(f64::NAN.to_bits());
        }
        Self(value.to_bits())
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Runtime value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Number(NumberBits),
    Str(String),
    Object(ObjectHandle),
}

/// Largest integer magnitude kept in the `Int` representation (2^53).
const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0;

impl JsValue {
    /// Build a numeric value, preferring the integer representation.
    pub fn number(value: f64) -> Self {
        if value.is_finite()
            && value.fract() == 0.0
            && value.abs() <= MAX_SAFE_INT
            && !(value == 0.0 && value.is_sign_negative())
        {
            return Self::Int(value as i64);
        }
        Self::Number(NumberBits::from_f64(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    /// `typeof` for everything except callable objects, which need the heap.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(_) => "object",
        }
    }

    /// ToBoolean.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Number(bits) => {
                let n = bits.value();
                !(n == 0.0 || n.is_nan())
            }
            Self::Str(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// ToNumber for primitives. Objects convert to NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Int(n) => *n as f64,
            Self::Number(bits) => bits.value(),
            Self::Str(s) => string_to_number(s),
            Self::Object(_) => f64::NAN,
        }
    }

    /// SameValue comparison.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Number(bits) => f.write_str(&format_number(bits.value())),
            Self::Str(s) => write!(f, "{s}"),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor: data or accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: has `get` and/or `set`.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Writable and configurable but hidden from enumeration, the shape of
    /// built-in methods and constructors.
    pub fn data_hidden(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn data_with(value: JsValue, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self::Data {
            value,
            writable,
            enumerable,
            configurable,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn getter(&self) -> Option<ObjectHandle> {
        match self {
            Self::Accessor { get, .. } => *get,
            Self::Data { .. } => None,
        }
    }

    pub fn setter(&self) -> Option<ObjectHandle> {
        match self {
            Self::Accessor { set, .. } => *set,
            Self::Data { .. } => None,
        }
    }

    /// Same attributes, new value. Accessors become data properties that
    /// keep their enumerable/configurable bits.
    pub fn with_value(&self, value: JsValue) -> Self {
        match self {
            Self::Data {
                writable,
                enumerable,
                configurable,
                ..
            } => Self::data_with(value, *writable, *enumerable, *configurable),
            Self::Accessor {
                enumerable,
                configurable,
                ..
            } => Self::data_with(value, true, *enumerable, *configurable),
        }
    }

    pub fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = false;
            }
        }
    }

    /// Make this data descriptor non-writable (no-op for accessors).
    pub fn set_non_writable(&mut self) {
        if let Self::Data { writable, .. } = self {
            *writable = false;
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    /// TypeError raised by an object operation.
    TypeError(String),
    /// Object not found in the heap.
    ObjectNotFound(ObjectHandle),
    /// Prototype chain cycle detected.
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::ObjectNotFound(h) => write!(f, "object#{} not found", h.0),
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth to prevent infinite loops.
const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// What happens when a callable object is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    Native(NativeFunction),
    Closure(ClosureId),
}

/// An ordinary object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Class]]` tag for intrinsic identification.
    pub class_tag: Option<String>,
    /// `[[Call]]`; `None` for non-callable objects.
    pub call: Option<CallTarget>,
    /// Is this object a constructor?
    pub constructable: bool,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            call: None,
            constructable: false,
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn is_callable(&self) -> bool {
        self.call.is_some()
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)`.
    ///
    /// Returns `Ok(true)` if the property was defined, `Ok(false)` if
    /// rejected (non-configurable conflict or non-extensible object).
    pub fn define_own_property(
        &mut self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if let Some(current) = self.properties.get(&key) {
            if !current.is_configurable() {
                if desc.is_configurable() {
                    return Ok(false);
                }
                if desc.is_enumerable() != current.is_enumerable() {
                    return Ok(false);
                }
                if current.is_data() != desc.is_data() {
                    return Ok(false);
                }
                if let (
                    PropertyDescriptor::Data {
                        writable: current_w,
                        value: current_v,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) = (current, &desc)
                    && !current_w
                {
                    if *new_w {
                        return Ok(false);
                    }
                    if !current_v.same_value(new_v) {
                        return Ok(false);
                    }
                }
                if let (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) = (current, &desc)
                    && (cur_get != new_get || cur_set != new_set)
                {
                    return Ok(false);
                }
            }
            self.properties.insert(key, desc);
            Ok(true)
        } else {
            if !self.extensible {
                return Ok(false);
            }
            self.properties.insert(key, desc);
            Ok(true)
        }
    }

    /// `[[Delete]](P)`. Returns `false` if non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    /// Own keys: integer indices first (numeric order), then the rest.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        for key in self.properties.keys() {
            match key.as_str().parse::<u64>() {
                Ok(n) => int_keys.push((n, key.clone())),
                Err(_) => str_keys.push(key.clone()),
            }
        }
        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result
    }

    /// `Object.freeze` semantics: make all own properties non-configurable
    /// and data properties non-writable.
    pub fn freeze(&mut self) {
        self.extensible = false;
        for desc in self.properties.values_mut() {
            desc.set_non_configurable();
            desc.set_non_writable();
        }
    }

    /// Non-extensible, every own property non-configurable, every data
    /// property non-writable.
    pub fn is_frozen(&self) -> bool {
        if self.extensible {
            return false;
        }
        self.properties
            .values()
            .all(|d| !d.is_configurable() && !d.is_writable())
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap
// ---------------------------------------------------------------------------

/// Arena of managed objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<OrdinaryObject>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.insert(OrdinaryObject::with_prototype(proto))
    }

    /// Allocate a callable object.
    pub fn alloc_callable(
        &mut self,
        proto: Option<ObjectHandle>,
        call: CallTarget,
        constructable: bool,
    ) -> ObjectHandle {
        self.insert(OrdinaryObject {
            prototype: proto,
            call: Some(call),
            constructable,
            ..OrdinaryObject::default()
        })
    }

    fn insert(&mut self, object: OrdinaryObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn call_target(&self, handle: ObjectHandle) -> Result<Option<CallTarget>, ObjectError> {
        Ok(self.get(handle)?.call)
    }

    pub fn is_callable(&self, value: &JsValue) -> bool {
        match value {
            JsValue::Object(h) => self.get(*h).map(|o| o.is_callable()).unwrap_or(false),
            _ => false,
        }
    }

    /// Walk the prototype chain and return the first object holding `key`
    /// together with its descriptor.
    pub fn find_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<(ObjectHandle, PropertyDescriptor)>, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            let obj = self.get(h)?;
            if let Some(desc) = obj.get_own_property(key) {
                return Ok(Some((h, desc.clone())));
            }
            current = obj.prototype;
            depth += 1;
        }
        Ok(None)
    }

    /// `[[Get]]` for data properties. Accessors yield `undefined` here; the
    /// interpreter invokes getters itself.
    pub fn get_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        Ok(match self.find_property(handle, key)? {
            Some((_, PropertyDescriptor::Data { value, .. })) => value,
            _ => JsValue::Undefined,
        })
    }

    /// `[[Set]]` for data properties. Returns `Ok(false)` when the write is
    /// refused (non-writable own or inherited data property, accessor, or
    /// non-extensible receiver).
    pub fn set_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        match self.find_property(handle, &key)? {
            Some((_, PropertyDescriptor::Accessor { .. })) => return Ok(false),
            Some((_, desc)) if !desc.is_writable() => return Ok(false),
            _ => {}
        }
        let obj = self.get_mut(handle)?;
        if let Some(PropertyDescriptor::Data { value: v, .. }) = obj.properties.get_mut(&key) {
            *v = value;
            return Ok(true);
        }
        if !obj.extensible {
            return Ok(false);
        }
        obj.properties.insert(key, PropertyDescriptor::data(value));
        Ok(true)
    }

    /// `[[HasProperty]]` (walks prototype chain).
    pub fn has_property(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.find_property(handle, key)?.is_some())
    }

    pub fn has_own(&self, handle: ObjectHandle, key: &PropertyKey) -> Result<bool, ObjectError> {
        Ok(self.get(handle)?.has_own_property(key))
    }

    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Ok(self.get_mut(handle)?.delete(key))
    }

    pub fn get_prototype_of(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.get(handle)?.prototype)
    }

    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        self.get_mut(handle)?.define_own_property(key, desc)
    }

    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.get(handle)?.get_own_property(key).cloned())
    }

    /// `Object.defineProperties(O, props)`. The first rejected descriptor is a
    /// TypeError; earlier ones stay defined.
    pub fn define_properties(
        &mut self,
        handle: ObjectHandle,
        props: impl IntoIterator<Item = (PropertyKey, PropertyDescriptor)>,
    ) -> Result<(), ObjectError> {
        for (key, desc) in props {
            if !self.define_property(handle, key.clone(), desc)? {
                return Err(ObjectError::TypeError(format!(
                    "Cannot redefine property: {key}"
                )));
            }
        }
        Ok(())
    }

    /// `Object.keys(O)`: enumerable own keys.
    pub fn keys(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        let o = self.get(handle)?;
        Ok(o.own_property_keys()
            .into_iter()
            .filter(|k| o.properties.get(k).is_some_and(|d| d.is_enumerable()))
            .map(|k| k.0)
            .collect())
    }

    pub fn own_property_names(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        Ok(self
            .get(handle)?
            .own_property_keys()
            .into_iter()
            .map(|k| k.0)
            .collect())
    }

    pub fn freeze(&mut self, handle: ObjectHandle) -> Result<(), ObjectError> {
        self.get_mut(handle)?.freeze();
        Ok(())
    }

    pub fn is_frozen(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        Ok(self.get(handle)?.is_frozen())
    }

    /// `Object.create(proto, descriptors)`.
    pub fn create(
        &mut self,
        proto: Option<ObjectHandle>,
        descriptors: impl IntoIterator<Item = (PropertyKey, PropertyDescriptor)>,
    ) -> Result<ObjectHandle, ObjectError> {
        let handle = self.alloc(proto);
        self.define_properties(handle, descriptors)?;
        Ok(handle)
    }
}
