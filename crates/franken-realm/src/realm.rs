//! Realm assembly and the evaluation surface handed to embedders.
//!
//! A realm record owns a fresh namespace object (prototype: the host's
//! `Object.prototype`) populated with the classified shared globals plus its
//! own `eval` and `Function`. Nothing reachable from a [`RealmRec`] hands out
//! the host global or the raw primitives.

use std::ops::Deref;
use std::rc::Rc;

use crate::builtins::{self, NativeFunction};
use crate::config::{ConfigError, RealmConfig};
use crate::error::RealmError;
use crate::evaluators::{self, EvaluatorBinding, EvaluatorId};
use crate::events::EventLog;
use crate::host::{Host, HostRef};
use crate::interpreter::{self, Completion};
use crate::object_model::{JsValue, ObjectHandle, PropertyDescriptor, PropertyKey};
use crate::source_filter::RejectDangerousSources;
use crate::transforms::{Endowments, SourceTransform};
use crate::unsafe_rec::{UnsafeRec, create_new_unsafe_rec};

const COMPONENT: &str = "realm";

#[derive(Debug)]
pub struct RealmRec {
    unsafe_rec: Rc<UnsafeRec>,
    safe_global: ObjectHandle,
    evaluator: EvaluatorId,
    safe_eval: ObjectHandle,
    safe_function: ObjectHandle,
}

/// Build a realm over the intrinsics captured in `unsafe_rec`.
///
/// `transforms` run in order in front of every evaluation in the realm.
/// With `sloppy_globals`, assigning an undeclared name creates a namespace
/// property instead of throwing.
pub fn create_realm_rec(
    unsafe_rec: &Rc<UnsafeRec>,
    transforms: Vec<Rc<dyn SourceTransform>>,
    sloppy_globals: bool,
) -> Result<RealmRec, RealmError> {
    let mut host = borrow_host(unsafe_rec.host())?;
    let result = assemble(&mut host, unsafe_rec, transforms, sloppy_globals);
    match &result {
        Ok(_) => host.events_mut().pass(COMPONENT, "create"),
        Err(err) => host
            .events_mut()
            .fail(COMPONENT, "create", err.error_code(), err.to_string()),
    }
    result
}

fn assemble(
    host: &mut Host,
    unsafe_rec: &Rc<UnsafeRec>,
    transforms: Vec<Rc<dyn SourceTransform>>,
    sloppy_globals: bool,
) -> Result<RealmRec, RealmError> {
    let object_prototype = host.intrinsics().object_prototype;
    let function_prototype = host.intrinsics().function_prototype;
    let safe_global = host.heap_mut().create(
        Some(object_prototype),
        unsafe_rec
            .shared_global_descs()
            .iter()
            .map(|(name, desc)| (PropertyKey::from(name.as_str()), desc.clone())),
    )?;

    let evaluator = host.add_evaluator(EvaluatorBinding {
        global: safe_global,
        transforms: transforms.into(),
        sloppy_globals,
    });

    let heap = host.heap_mut();
    let safe_eval = builtins::new_native_function(
        heap,
        function_prototype,
        "eval",
        NativeFunction::SafeEval(evaluator),
        false,
    )?;
    let safe_function = builtins::new_native_function(
        heap,
        function_prototype,
        "Function",
        NativeFunction::SafeFunction(evaluator),
        true,
    )?;
    // `fn instanceof Function` holds inside the realm.
    heap.define_property(
        safe_function,
        PropertyKey::from("prototype"),
        PropertyDescriptor::data_with(JsValue::Object(function_prototype), false, false, false),
    )?;
    for (name, value) in [("eval", safe_eval), ("Function", safe_function)] {
        heap.define_property(
            safe_global,
            PropertyKey::from(name),
            PropertyDescriptor::data_with(JsValue::Object(value), true, false, true),
        )?;
    }

    Ok(RealmRec {
        unsafe_rec: Rc::clone(unsafe_rec),
        safe_global,
        evaluator,
        safe_eval,
        safe_function,
    })
}

fn borrow_host(host: &HostRef) -> Result<std::cell::RefMut<'_, Host>, RealmError> {
    host.try_borrow_mut()
        .map_err(|_| RealmError::host_shape("host is already in use"))
}

impl RealmRec {
    /// The realm's namespace object.
    pub fn safe_global(&self) -> ObjectHandle {
        self.safe_global
    }

    /// The realm's `eval` function object.
    pub fn safe_eval_function(&self) -> ObjectHandle {
        self.safe_eval
    }

    /// The realm's `Function` constructor object.
    pub fn safe_function_constructor(&self) -> ObjectHandle {
        self.safe_function
    }

    /// Run `f` against the host, wrapping thrown values and logging the
    /// outcome under `event`.
    fn run<T>(
        &self,
        event: &str,
        f: impl FnOnce(&mut Host) -> Completion<T>,
    ) -> Result<T, RealmError> {
        let mut host = borrow_host(self.unsafe_rec.host())?;
        let result = self.unsafe_rec.call_and_wrap_error().call(&mut host, f);
        match &result {
            Ok(_) => host.events_mut().pass(COMPONENT, event),
            Err(err) => host
                .events_mut()
                .fail(COMPONENT, event, err.error_code(), err.to_string()),
        }
        result
    }

    pub fn safe_eval(&self, src: &str) -> Result<JsValue, RealmError> {
        self.safe_eval_with_endowments(src, &Endowments::new())
    }

    /// Evaluate with `endowments` visible as bindings for this call only.
    pub fn safe_eval_with_endowments(
        &self,
        src: &str,
        endowments: &Endowments,
    ) -> Result<JsValue, RealmError> {
        let id = self.evaluator;
        self.run("evaluate", |host| {
            evaluators::safe_evaluate(host, id, src, endowments)
        })
    }

    /// `Function(p1, ..., body)` in this realm.
    pub fn safe_function(&self, args: &[&str]) -> Result<JsValue, RealmError> {
        let callee = JsValue::Object(self.safe_function);
        let args = args.iter().map(|a| JsValue::str(*a)).collect();
        self.run("function", |host| {
            interpreter::call(host, &callee, JsValue::Undefined, args)
        })
    }

    /// Call a function value obtained from this realm.
    pub fn call(&self, callee: &JsValue, args: Vec<JsValue>) -> Result<JsValue, RealmError> {
        self.run("call", |host| {
            interpreter::call(host, callee, JsValue::Undefined, args)
        })
    }

    pub fn get_global(&self, name: &str) -> Result<JsValue, RealmError> {
        let global = JsValue::Object(self.safe_global);
        let key = PropertyKey::from(name);
        self.run("get_global", |host| interpreter::get_value(host, &global, &key))
    }

    /// Assign a namespace property. Read-only globals refuse the write.
    pub fn set_global(&self, name: &str, value: JsValue) -> Result<(), RealmError> {
        let global = JsValue::Object(self.safe_global);
        let key = PropertyKey::from(name);
        self.run("set_global", |host| {
            interpreter::put_value(host, &global, key, value, true)
        })
    }

    /// Own property names of the namespace.
    pub fn global_names(&self) -> Result<Vec<String>, RealmError> {
        let host = self
            .unsafe_rec
            .host()
            .try_borrow()
            .map_err(|_| RealmError::host_shape("host is already in use"))?;
        Ok(host.heap().own_property_names(self.safe_global)?)
    }

    /// Descriptor of a namespace property.
    pub fn global_descriptor(&self, name: &str) -> Result<Option<PropertyDescriptor>, RealmError> {
        let host = self
            .unsafe_rec
            .host()
            .try_borrow()
            .map_err(|_| RealmError::host_shape("host is already in use"))?;
        Ok(host
            .heap()
            .get_own_property_descriptor(self.safe_global, &PropertyKey::from(name))?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RealmSetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Realm(#[from] RealmError),
}

/// A host, its repaired capability record and one realm built from a
/// [`RealmConfig`].
#[derive(Debug)]
pub struct Realm {
    host: HostRef,
    unsafe_rec: Rc<UnsafeRec>,
    rec: RealmRec,
}

impl Realm {
    pub fn from_config(config: &RealmConfig) -> Result<Self, RealmSetupError> {
        Self::from_config_with_transforms(config, Vec::new())
    }

    /// As [`Realm::from_config`], with `extra` passes run after the
    /// rejection filter.
    pub fn from_config_with_transforms(
        config: &RealmConfig,
        extra: Vec<Rc<dyn SourceTransform>>,
    ) -> Result<Self, RealmSetupError> {
        config.validate()?;
        let host = Host::new_ref(config.host_options()).map_err(RealmError::from)?;
        let unsafe_rec = Rc::new(create_new_unsafe_rec(
            &host,
            config.shims.clone(),
            config.configurable_globals,
        )?);
        let mut transforms: Vec<Rc<dyn SourceTransform>> = Vec::new();
        if config.reject_dangerous_sources {
            transforms.push(Rc::new(RejectDangerousSources));
        }
        transforms.extend(extra);
        let rec = create_realm_rec(&unsafe_rec, transforms, config.sloppy_globals)?;
        Ok(Self {
            host,
            unsafe_rec,
            rec,
        })
    }

    pub fn host(&self) -> &HostRef {
        &self.host
    }

    pub fn unsafe_rec(&self) -> &Rc<UnsafeRec> {
        &self.unsafe_rec
    }

    pub fn rec(&self) -> &RealmRec {
        &self.rec
    }

    pub fn events(&self) -> EventLog {
        self.host.borrow().events().clone()
    }

    pub fn console_output(&self) -> Vec<String> {
        self.host.borrow().console_output().to_vec()
    }
}

impl Deref for Realm {
    type Target = RealmRec;

    fn deref(&self) -> &RealmRec {
        &self.rec
    }
}
