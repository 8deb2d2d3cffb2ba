//! The unsafe capability record: a matched set of a host's undeniable
//! intrinsics, captured once and used to build any number of realms.
//!
//! Everything in the record belongs to one host. The raw evaluation
//! primitive is only ever used with that host's own intrinsics, which is why
//! the record keeps the host itself rather than loose handles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::call_and_wrap_error::{BUILD_CALL_AND_WRAP_ERROR, CallAndWrapError};
use crate::error::RealmError;
use crate::host::{Host, HostId, HostObject, HostRef, HostRoutine};
use crate::object_model::{JsValue, PropertyDescriptor, PropertyKey};
use crate::repair::{REPAIR_ACCESSORS, REPAIR_FUNCTIONS};
use crate::stdlib::get_shared_global_descs;

const COMPONENT: &str = "unsafe_rec";

/// Identity of the captured intrinsics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host_id: HostId,
    /// `sha256:<hex>` over the canonical JSON of the global and intrinsic
    /// handles.
    pub fingerprint: String,
}

impl HostSnapshot {
    fn capture(host: &Host) -> Result<Self, RealmError> {
        let canonical = serde_json::to_vec(&(host.global(), host.intrinsics()))
            .map_err(|err| RealmError::host_shape(format!("intrinsics not serializable: {err}")))?;
        let digest = Sha256::digest(&canonical);
        Ok(Self {
            host_id: host.id(),
            fingerprint: format!("sha256:{}", hex::encode(digest)),
        })
    }
}

/// Read-only after construction.
#[derive(Debug)]
pub struct UnsafeRec {
    host: HostRef,
    global: HostObject,
    shared_global_descs: BTreeMap<String, PropertyDescriptor>,
    unsafe_eval: HostObject,
    unsafe_function: HostObject,
    call_and_wrap_error: CallAndWrapError,
    all_shims: Vec<String>,
    snapshot: HostSnapshot,
}

impl UnsafeRec {
    pub fn host(&self) -> &HostRef {
        &self.host
    }

    pub fn unsafe_global(&self) -> HostObject {
        self.global
    }

    pub fn shared_global_descs(&self) -> &BTreeMap<String, PropertyDescriptor> {
        &self.shared_global_descs
    }

    pub fn unsafe_eval(&self) -> HostObject {
        self.unsafe_eval
    }

    pub fn unsafe_function(&self) -> HostObject {
        self.unsafe_function
    }

    pub fn call_and_wrap_error(&self) -> &CallAndWrapError {
        &self.call_and_wrap_error
    }

    pub fn all_shims(&self) -> &[String] {
        &self.all_shims
    }

    pub fn snapshot(&self) -> &HostSnapshot {
        &self.snapshot
    }

    /// Run `routine` through the captured raw evaluation primitive.
    pub fn evaluate_routine<T>(&self, routine: &HostRoutine<T>) -> Result<T, RealmError> {
        let mut host = borrow_host(&self.host)?;
        host.evaluate_routine(self.unsafe_eval, routine)
    }
}

fn borrow_host(host: &HostRef) -> Result<std::cell::RefMut<'_, Host>, RealmError> {
    host.try_borrow_mut()
        .map_err(|_| RealmError::host_shape("host is already in use"))
}

/// The callable object held by the global's own data property `name`.
fn read_primitive(host: &Host, name: &str) -> Result<HostObject, RealmError> {
    let desc = host
        .heap()
        .get_own_property_descriptor(host.global(), &PropertyKey::from(name))?;
    match desc {
        Some(PropertyDescriptor::Data {
            value: JsValue::Object(handle),
            ..
        }) if host.heap().is_callable(&JsValue::Object(handle)) => Ok(host.tag(handle)),
        _ => Err(RealmError::host_shape(format!(
            "global `{name}` is not a callable data property"
        ))),
    }
}

fn capture(
    host_ref: &HostRef,
    host: &mut Host,
    all_shims: Vec<String>,
    configurable_globals: bool,
) -> Result<UnsafeRec, RealmError> {
    let global = host.global();
    let shared_global_descs =
        get_shared_global_descs(host.heap(), global, configurable_globals)?;
    let unsafe_eval = read_primitive(host, "eval")?;
    let unsafe_function = read_primitive(host, "Function")?;
    let call_and_wrap_error = host.evaluate_routine(unsafe_eval, &BUILD_CALL_AND_WRAP_ERROR)?;
    let snapshot = HostSnapshot::capture(host)?;
    Ok(UnsafeRec {
        host: HostRef::clone(host_ref),
        global: host.tag(global),
        shared_global_descs,
        unsafe_eval,
        unsafe_function,
        call_and_wrap_error,
        all_shims,
        snapshot,
    })
}

/// Capture the undeniables of `host` without touching it.
pub fn create_unsafe_rec(
    host: &HostRef,
    all_shims: Vec<String>,
    configurable_globals: bool,
) -> Result<UnsafeRec, RealmError> {
    let mut guard = borrow_host(host)?;
    match capture(host, &mut guard, all_shims, configurable_globals) {
        Ok(rec) => {
            guard.events_mut().pass(COMPONENT, "capture");
            Ok(rec)
        }
        Err(err) => {
            guard
                .events_mut()
                .fail(COMPONENT, "capture", err.error_code(), err.to_string());
            Err(err)
        }
    }
}

/// Capture, then repair the host's accessor methods and constructor links
/// through its own evaluation primitive. Safe to run more than once against
/// one host.
pub fn create_new_unsafe_rec(
    host: &HostRef,
    all_shims: Vec<String>,
    configurable_globals: bool,
) -> Result<UnsafeRec, RealmError> {
    let rec = create_unsafe_rec(host, all_shims, configurable_globals)?;
    rec.evaluate_routine(&REPAIR_ACCESSORS)?;
    rec.evaluate_routine(&REPAIR_FUNCTIONS)?;
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventOutcome::{Pass, Skipped};
    use crate::host::HostOptions;

    fn host() -> HostRef {
        Host::new_ref(HostOptions::default()).unwrap()
    }

    #[test]
    fn captures_the_hosts_own_primitives() {
        let host = host();
        let rec = create_unsafe_rec(&host, Vec::new(), false).unwrap();
        let h = host.borrow();
        assert_eq!(rec.unsafe_global(), h.tag(h.global()));
        assert_eq!(rec.unsafe_eval(), h.tag(h.intrinsics().eval));
        assert_eq!(rec.unsafe_function(), h.tag(h.intrinsics().function));
        assert_eq!(rec.call_and_wrap_error().host(), h.id());
        assert!(rec.all_shims().is_empty());
        assert_eq!(
            rec.shared_global_descs()["Object"],
            PropertyDescriptor::data_with(JsValue::Object(h.intrinsics().object), false, false, false)
        );
    }

    #[test]
    fn capture_does_not_repair() {
        let host = host();
        create_unsafe_rec(&host, Vec::new(), false).unwrap();
        let value = host
            .borrow_mut()
            .evaluate("(function(){}).constructor === Function")
            .unwrap();
        assert_eq!(value, JsValue::Bool(true));
    }

    #[test]
    fn promise_works_through_unsafe_eval() {
        let host = host();
        let _rec = create_unsafe_rec(&host, Vec::new(), false).unwrap();
        assert_eq!(
            host.borrow_mut().evaluate("'then' in Promise.resolve(1)").unwrap(),
            JsValue::Bool(true)
        );
    }

    #[test]
    fn shims_are_recorded() {
        let rec = create_unsafe_rec(&host(), vec!["ses".into(), "ext".into()], false).unwrap();
        assert_eq!(rec.all_shims(), ["ses".to_string(), "ext".to_string()]);
    }

    #[test]
    fn snapshot_identifies_host_and_intrinsics() {
        let a = create_unsafe_rec(&host(), Vec::new(), false).unwrap();
        let b = create_unsafe_rec(&host(), Vec::new(), false).unwrap();
        assert!(a.snapshot().fingerprint.starts_with("sha256:"));
        assert_eq!(a.snapshot().fingerprint.len(), "sha256:".len() + 64);
        // Fresh hosts lay out their intrinsics identically.
        assert_eq!(a.snapshot().fingerprint, b.snapshot().fingerprint);
        assert_ne!(a.snapshot().host_id, b.snapshot().host_id);
        let json = serde_json::to_string(a.snapshot()).unwrap();
        let back: HostSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, a.snapshot());
    }

    #[test]
    fn replaced_eval_is_a_host_shape_error() {
        let host = host();
        host.borrow_mut().evaluate("eval = 1").unwrap();
        let err = create_unsafe_rec(&host, Vec::new(), false).unwrap_err();
        assert_eq!(err.error_code(), "FE-REALM-0001");
        let events = host.borrow().events().clone();
        let last = events.events().last().cloned().unwrap();
        assert_eq!(last.component, COMPONENT);
        assert_eq!(last.error_code.as_deref(), Some("FE-REALM-0001"));
    }

    #[test]
    fn eval_swapped_for_another_function_is_refused() {
        let host = host();
        host.borrow_mut()
            .evaluate("eval = function (s) { return s }")
            .unwrap();
        let err = create_unsafe_rec(&host, Vec::new(), false).unwrap_err();
        assert_eq!(err.error_code(), "FE-REALM-0001");
    }

    #[test]
    fn repairs_run_once_and_are_idempotent() {
        let host = host();
        create_new_unsafe_rec(&host, Vec::new(), false).unwrap();
        create_new_unsafe_rec(&host, Vec::new(), false).unwrap();
        let h = host.borrow();
        let outcomes: Vec<_> = h
            .events()
            .events()
            .iter()
            .filter(|e| e.component.starts_with("repair_"))
            .map(|e| (e.component.clone(), e.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("repair_accessors".to_string(), Pass),
                ("repair_functions".to_string(), Pass),
                ("repair_accessors".to_string(), Skipped),
                ("repair_functions".to_string(), Skipped),
            ]
        );
    }

    #[test]
    fn busy_host_is_reported_not_panicked() {
        let host = host();
        let _guard = host.borrow_mut();
        let err = create_unsafe_rec(&host, Vec::new(), false).unwrap_err();
        assert_eq!(err, RealmError::host_shape("host is already in use"));
    }
}
