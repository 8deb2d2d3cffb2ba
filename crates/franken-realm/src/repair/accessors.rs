//! Replace sloppy legacy accessor-introspection methods on
//! `Object.prototype`.
//!
//! On a legacy host, `(0, Object.prototype.__lookupGetter__)("x")` treats the
//! missing receiver as the global object, which hands the host global to any
//! code that can reach the method. The replacements coerce the receiver with
//! ToObject, insist on callable accessors and walk prototype chains
//! themselves.

use crate::builtins::{self, ACCESSOR_METHODS, STRICT_ACCESSOR_NATIVES};
use crate::host::{Host, HostRoutine};
use crate::interpreter::{self, Completion, Throw};
use crate::object_model::{JsValue, PropertyDescriptor, PropertyKey};

use super::RepairOutcome;

const COMPONENT: &str = "repair_accessors";

pub const REPAIR_ACCESSORS: HostRoutine<RepairOutcome> = HostRoutine {
    name: "repair_accessors",
    body: repair_accessors,
};

/// Does `__lookupGetter__` already refuse to run without a receiver?
fn already_safe(host: &mut Host) -> Completion<bool> {
    let object_prototype = host.intrinsics().object_prototype;
    let lookup_getter = host
        .heap()
        .get_property(object_prototype, &PropertyKey::from("__lookupGetter__"))?;
    match interpreter::call(host, &lookup_getter, JsValue::Undefined, vec![JsValue::str("x")]) {
        Ok(_) => Ok(false),
        Err(Throw::Value(_)) => Ok(true),
        Err(fault) => Err(fault),
    }
}

pub fn repair_accessors(host: &mut Host) -> Completion<RepairOutcome> {
    if already_safe(host)? {
        host.events_mut()
            .skipped(COMPONENT, "repair", "accessor methods already reject a missing receiver");
        return Ok(RepairOutcome::AlreadySafe);
    }

    let object_prototype = host.intrinsics().object_prototype;
    let function_prototype = host.intrinsics().function_prototype;
    for (name, native) in ACCESSOR_METHODS.into_iter().zip(STRICT_ACCESSOR_NATIVES) {
        let key = PropertyKey::from(name);
        let replacement = builtins::new_native_function(
            host.heap_mut(),
            function_prototype,
            name,
            native,
            false,
        )?;
        let value = JsValue::Object(replacement);
        let desc = match host.heap().get_own_property_descriptor(object_prototype, &key)? {
            Some(existing) => existing.with_value(value),
            None => PropertyDescriptor::data_hidden(value),
        };
        if !host.heap_mut().define_property(object_prototype, key, desc)? {
            return Err(host.type_error(format!("Cannot redefine property: {name}")));
        }
    }
    host.events_mut().pass(COMPONENT, "repair");
    Ok(RepairOutcome::Repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorName;
    use crate::events::EventOutcome;
    use crate::host::{HostOptions, HostProfile};

    fn host(profile: HostProfile) -> Host {
        Host::new(HostOptions {
            profile,
            ..HostOptions::default()
        })
        .unwrap()
    }

    const LEAK: &str =
        "(0, Object.prototype.__defineGetter__)('leak', function () { return 1 }); typeof leak";

    #[test]
    fn legacy_methods_reach_the_global_before_repair() {
        let mut h = host(HostProfile::Legacy);
        assert_eq!(h.evaluate(LEAK).unwrap(), JsValue::str("number"));
    }

    #[test]
    fn repaired_methods_reject_missing_receivers() {
        let mut h = host(HostProfile::Legacy);
        assert_eq!(repair_accessors(&mut h).unwrap(), RepairOutcome::Repaired);
        let err = h
            .evaluate("(0, Object.prototype.__lookupGetter__)('x')")
            .unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
        let err = h.evaluate(LEAK).unwrap_err();
        assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
    }

    #[test]
    fn repaired_methods_still_work_on_objects() {
        let mut h = host(HostProfile::Legacy);
        repair_accessors(&mut h).unwrap();
        assert_eq!(
            h.evaluate("var o = {}; o.__defineGetter__('five', function () { return 5 }); o.five")
                .unwrap(),
            JsValue::Int(5)
        );
        assert_eq!(
            h.evaluate("var f = function () {}; o.__defineSetter__('s', f); o.__lookupSetter__('s') === f")
                .unwrap(),
            JsValue::Bool(true)
        );
        assert_eq!(
            h.evaluate("({}).__lookupGetter__('toString')").unwrap(),
            JsValue::Undefined
        );
        let err = h.evaluate("o.__defineGetter__('bad', 1)").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: invalid getter usage");
    }

    #[test]
    fn attributes_are_preserved() {
        let mut h = host(HostProfile::Legacy);
        let proto = h.intrinsics().object_prototype;
        let key = PropertyKey::from("__lookupSetter__");
        let before = h
            .heap()
            .get_own_property_descriptor(proto, &key)
            .unwrap()
            .unwrap();
        repair_accessors(&mut h).unwrap();
        let after = h
            .heap()
            .get_own_property_descriptor(proto, &key)
            .unwrap()
            .unwrap();
        assert_ne!(before.value(), after.value());
        assert_eq!(before.is_writable(), after.is_writable());
        assert_eq!(before.is_enumerable(), after.is_enumerable());
        assert_eq!(before.is_configurable(), after.is_configurable());
    }

    #[test]
    fn second_run_and_hardened_hosts_are_skipped() {
        let mut h = host(HostProfile::Legacy);
        assert_eq!(repair_accessors(&mut h).unwrap(), RepairOutcome::Repaired);
        assert_eq!(repair_accessors(&mut h).unwrap(), RepairOutcome::AlreadySafe);

        let mut hardened = host(HostProfile::Hardened);
        assert_eq!(
            repair_accessors(&mut hardened).unwrap(),
            RepairOutcome::AlreadySafe
        );
        let event = hardened
            .events()
            .for_component(COMPONENT)
            .last()
            .cloned()
            .unwrap();
        assert_eq!(event.outcome, EventOutcome::Skipped);
    }
}
