//! Host environment: one heap, one set of intrinsics, one global object.
//!
//! A host is what the realm pipeline captures from. It can run in a legacy
//! profile that keeps the historical leakage points (sloppy accessor
//! introspection on `Object.prototype`, a reachable raw `Function` through
//! `Function.prototype.constructor`) or in a hardened profile where the
//! accessor methods already reject missing receivers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::builtins;
use crate::call_and_wrap_error::describe_thrown;
use crate::config::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_TRACE_ID, MAX_CALL_DEPTH_LIMIT};
use crate::error::{ErrorName, RealmError};
use crate::evaluators::EvaluatorBinding;
use crate::events::EventLog;
use crate::interpreter::{self, Closure, Completion, Throw};
use crate::object_model::{
    ClosureId, JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey,
};
use crate::script;

pub type HostRef = Rc<RefCell<Host>>;

/// Statement and expression levels the evaluator may stack, summed over all
/// active calls. Sized with `MAX_CALL_DEPTH_LIMIT` to fit a 2 MiB thread.
pub const MAX_EVALUATION_DEPTH: usize = 256;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostProfile {
    #[default]
    Legacy,
    Hardened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    pub profile: HostProfile,
    pub max_call_depth: usize,
    pub trace_id: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            profile: HostProfile::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace_id: DEFAULT_TRACE_ID.to_string(),
        }
    }
}

/// An object handle tagged with the host whose heap it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostObject {
    pub host: HostId,
    pub handle: ObjectHandle,
}

/// Built-in objects every piece of host code shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub object_prototype: ObjectHandle,
    pub function_prototype: ObjectHandle,
    pub array_prototype: ObjectHandle,
    pub string_prototype: ObjectHandle,
    pub number_prototype: ObjectHandle,
    pub boolean_prototype: ObjectHandle,
    pub promise_prototype: ObjectHandle,
    pub object: ObjectHandle,
    pub function: ObjectHandle,
    pub eval: ObjectHandle,
    pub error_prototypes: BTreeMap<ErrorName, ObjectHandle>,
    pub error_constructors: BTreeMap<ErrorName, ObjectHandle>,
}

/// A self-contained routine run by a host's own evaluation primitive.
///
/// `body` is a plain function pointer, so it cannot close over anything from
/// the caller; whatever it needs it has to look up on the host it runs in.
pub struct HostRoutine<T> {
    pub name: &'static str,
    pub body: fn(&mut Host) -> Completion<T>,
}

#[derive(Debug)]
pub struct Host {
    id: HostId,
    profile: HostProfile,
    heap: ObjectHeap,
    global: ObjectHandle,
    intrinsics: Intrinsics,
    closures: Vec<Closure>,
    evaluators: Vec<EvaluatorBinding>,
    call_depth: usize,
    max_call_depth: usize,
    nesting: usize,
    console: Vec<String>,
    events: EventLog,
}

impl Host {
    pub fn new(options: HostOptions) -> Result<Self, ObjectError> {
        let mut heap = ObjectHeap::new();
        let (global, intrinsics) = builtins::install(&mut heap, options.profile)?;
        let id = HostId(NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed));
        let mut events = EventLog::new(options.trace_id);
        events.pass("host", "create");
        Ok(Self {
            id,
            profile: options.profile,
            heap,
            global,
            intrinsics,
            closures: Vec::new(),
            evaluators: Vec::new(),
            call_depth: 0,
            max_call_depth: options.max_call_depth.min(MAX_CALL_DEPTH_LIMIT),
            nesting: 0,
            console: Vec::new(),
            events,
        })
    }

    pub fn new_ref(options: HostOptions) -> Result<HostRef, ObjectError> {
        Ok(Rc::new(RefCell::new(Self::new(options)?)))
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn profile(&self) -> HostProfile {
        self.profile
    }

    pub fn global(&self) -> ObjectHandle {
        self.global
    }

    pub fn tag(&self, handle: ObjectHandle) -> HostObject {
        HostObject {
            host: self.id,
            handle,
        }
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    /// Lines written through `console.log`.
    pub fn console_output(&self) -> &[String] {
        &self.console
    }

    pub(crate) fn console_push(&mut self, line: String) {
        self.console.push(line);
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub(crate) fn enter_call(&mut self) -> Completion<()> {
        if self.call_depth >= self.max_call_depth {
            return Err(self.throw_error(ErrorName::RangeError, "Maximum call stack size exceeded"));
        }
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    /// Charges one statement or expression level against the native stack,
    /// across every active call.
    pub(crate) fn enter_nested(&mut self) -> Completion<()> {
        if self.nesting >= MAX_EVALUATION_DEPTH {
            return Err(self.throw_error(ErrorName::RangeError, "Maximum call stack size exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    pub(crate) fn exit_nested(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    pub(crate) fn add_closure(&mut self, closure: Closure) -> ClosureId {
        self.closures.push(closure);
        ClosureId((self.closures.len() - 1) as u32)
    }

    pub(crate) fn closure(&self, id: ClosureId) -> Option<&Closure> {
        self.closures.get(id.0 as usize)
    }

    pub(crate) fn add_evaluator(&mut self, binding: EvaluatorBinding) -> crate::evaluators::EvaluatorId {
        self.evaluators.push(binding);
        crate::evaluators::EvaluatorId((self.evaluators.len() - 1) as u32)
    }

    pub(crate) fn evaluator(&self, id: crate::evaluators::EvaluatorId) -> Option<&EvaluatorBinding> {
        self.evaluators.get(id.0 as usize)
    }

    /// Allocate an error object whose prototype is this host's
    /// `name.prototype`.
    pub fn make_error(&mut self, name: ErrorName, message: &str) -> JsValue {
        let proto = self
            .intrinsics
            .error_prototypes
            .get(&name)
            .copied()
            .unwrap_or(self.intrinsics.object_prototype);
        let handle = self.heap.alloc(Some(proto));
        if let Ok(object) = self.heap.get_mut(handle) {
            object.class_tag = Some("Error".to_string());
            object.properties.insert(
                PropertyKey::from("message"),
                PropertyDescriptor::data_hidden(JsValue::str(message)),
            );
        }
        JsValue::Object(handle)
    }

    pub fn throw_error(&mut self, name: ErrorName, message: impl AsRef<str>) -> Throw {
        Throw::Value(self.make_error(name, message.as_ref()))
    }

    pub fn type_error(&mut self, message: impl AsRef<str>) -> Throw {
        self.throw_error(ErrorName::TypeError, message)
    }

    /// Run a routine through the host's evaluation primitive. The primitive
    /// must be this host's own raw `eval`; anything else is refused.
    pub fn evaluate_routine<T>(
        &mut self,
        eval_primitive: HostObject,
        routine: &HostRoutine<T>,
    ) -> Result<T, RealmError> {
        if eval_primitive != self.tag(self.intrinsics.eval) {
            let err = RealmError::host_shape(format!(
                "routine `{}` offered a foreign evaluation primitive",
                routine.name
            ));
            self.events
                .fail("host", "evaluate_routine", err.error_code(), routine.name);
            return Err(err);
        }
        let result = (routine.body)(self);
        match result {
            Ok(value) => {
                self.events.pass("host", "evaluate_routine");
                Ok(value)
            }
            Err(thrown) => {
                let err = self.thrown_to_error(thrown);
                self.events
                    .fail("host", "evaluate_routine", err.error_code(), routine.name);
                Err(err)
            }
        }
    }

    /// Run program text as sloppy global code of this host, the way the raw
    /// `eval` primitive does.
    pub fn evaluate_script(&mut self, source: &str) -> Completion {
        let program = match script::parse_program(source) {
            Ok(program) => program,
            Err(err) => return Err(self.throw_error(ErrorName::SyntaxError, err.to_string())),
        };
        interpreter::run_host_program(self, &program)
    }

    /// [`Host::evaluate_script`] with thrown values turned into typed errors.
    pub fn evaluate(&mut self, source: &str) -> Result<JsValue, RealmError> {
        self.evaluate_script(source)
            .map_err(|thrown| self.thrown_to_error(thrown))
    }

    fn thrown_to_error(&self, thrown: Throw) -> RealmError {
        match thrown {
            Throw::Value(value) => RealmError::Evaluation(describe_thrown(
                self,
                &self.intrinsics.error_prototypes,
                &value,
            )),
            Throw::Fault(err) => *err,
        }
    }

    pub fn get_global(&self, name: &str) -> Result<JsValue, ObjectError> {
        self.heap.get_property(self.global, &PropertyKey::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(profile: HostProfile) -> Host {
        Host::new(HostOptions {
            profile,
            ..HostOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn hosts_get_distinct_ids() {
        let a = host(HostProfile::Legacy);
        let b = host(HostProfile::Legacy);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn global_exposes_ambient_and_shared_names() {
        let h = host(HostProfile::Legacy);
        for name in ["setTimeout", "setInterval", "process", "console", "Object", "eval"] {
            assert!(
                h.heap().has_own(h.global(), &PropertyKey::from(name)).unwrap(),
                "missing {name}"
            );
        }
        assert_eq!(h.get_global("eval").unwrap(), JsValue::Object(h.intrinsics().eval));
    }

    #[test]
    fn evaluate_runs_sloppy_global_code() {
        let mut h = host(HostProfile::Legacy);
        assert_eq!(h.evaluate("var answer = 40 + 2; answer").unwrap(), JsValue::Int(42));
        assert_eq!(h.get_global("answer").unwrap(), JsValue::Int(42));
        assert_eq!(h.evaluate("typeof setTimeout").unwrap(), JsValue::str("function"));
    }

    #[test]
    fn legacy_function_constructor_reaches_global() {
        let mut h = host(HostProfile::Legacy);
        let value = h
            .evaluate("(function(){}).constructor('return this')()")
            .unwrap();
        assert_eq!(value, JsValue::Object(h.global()));
    }

    #[test]
    fn thrown_errors_keep_their_constructor_name() {
        let mut h = host(HostProfile::Legacy);
        let err = h.evaluate("missing + 1").unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::ReferenceError));
        let err = h.evaluate("var = 1").unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::SyntaxError));
    }

    fn read_global(host: &mut Host) -> Completion<JsValue> {
        let global = host.global();
        Ok(JsValue::Object(global))
    }

    #[test]
    fn routines_require_the_hosts_own_eval() {
        let mut a = host(HostProfile::Legacy);
        let b = host(HostProfile::Legacy);
        let routine = HostRoutine {
            name: "read_global",
            body: read_global,
        };
        let own_eval = a.tag(a.intrinsics().eval);
        assert_eq!(
            a.evaluate_routine(own_eval, &routine).unwrap(),
            JsValue::Object(a.global())
        );

        let own_function = a.tag(a.intrinsics().function);
        let err = a.evaluate_routine(own_function, &routine).unwrap_err();
        assert_eq!(err.error_code(), "FE-REALM-0001");

        // Same handle index, different heap.
        let foreign_eval = b.tag(b.intrinsics().eval);
        assert_eq!(foreign_eval.handle, own_eval.handle);
        assert!(a.evaluate_routine(foreign_eval, &routine).is_err());
    }

    #[test]
    fn call_depth_is_bounded() {
        let mut h = Host::new(HostOptions {
            max_call_depth: 8,
            ..HostOptions::default()
        })
        .unwrap();
        let err = h
            .evaluate("function f(n) { return f(n + 1) } f(0)")
            .unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
        assert_eq!(h.evaluate("1").unwrap(), JsValue::Int(1));
    }

    #[test]
    fn evaluation_nesting_is_bounded_across_calls() {
        let mut h = Host::new(HostOptions::default()).unwrap();
        let body = format!("{}g(n - 1){}", "1 + (".repeat(30), ")".repeat(30));
        let program = |n: u32| format!("function g(n) {{ return n ? {body} : 0 }} g({n})");
        assert_eq!(h.evaluate(&program(3)).unwrap(), JsValue::Int(90));
        let err = h.evaluate(&program(50)).unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
        assert_eq!(h.evaluate(&program(2)).unwrap(), JsValue::Int(60));
    }

    #[test]
    fn deep_recursion_at_the_call_limit_is_a_range_error() {
        let mut h = Host::new(HostOptions {
            max_call_depth: MAX_CALL_DEPTH_LIMIT,
            ..HostOptions::default()
        })
        .unwrap();
        let recurse = "function f(n) { return n ? f(n - 1) : 0 } ";
        let err = h.evaluate(&format!("{recurse}f(2000)")).unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
        let deepest = MAX_CALL_DEPTH_LIMIT - 1;
        assert_eq!(
            h.evaluate(&format!("{recurse}f({deepest})")).unwrap(),
            JsValue::Int(0)
        );
    }
}
