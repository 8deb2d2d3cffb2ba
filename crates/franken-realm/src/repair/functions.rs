//! Cut the path from any function value to the host's raw `Function`.
//!
//! `Function.prototype.constructor` is the raw dynamic constructor, which
//! compiles code in the host's global scope. After repair it is a tame
//! constructor that throws whether called or constructed.

use crate::builtins::{self, NativeFunction};
use crate::host::{Host, HostRoutine};
use crate::interpreter::Completion;
use crate::object_model::{CallTarget, JsValue, PropertyDescriptor, PropertyKey};

use super::RepairOutcome;

const COMPONENT: &str = "repair_functions";

pub const REPAIR_FUNCTIONS: HostRoutine<RepairOutcome> = HostRoutine {
    name: "repair_functions",
    body: repair_functions,
};

pub fn repair_functions(host: &mut Host) -> Completion<RepairOutcome> {
    let function_prototype = host.intrinsics().function_prototype;
    let key = PropertyKey::from("constructor");
    let current = host
        .heap()
        .get_own_property_descriptor(function_prototype, &key)?;

    let current_target = match current.as_ref().and_then(|d| d.value()) {
        Some(JsValue::Object(handle)) => host.heap().call_target(*handle)?,
        _ => None,
    };
    if current_target == Some(CallTarget::Native(NativeFunction::TameFunctionConstructor)) {
        host.events_mut()
            .skipped(COMPONENT, "repair", "constructor already tamed");
        return Ok(RepairOutcome::AlreadySafe);
    }

    let tame = builtins::new_native_function(
        host.heap_mut(),
        function_prototype,
        "Function",
        NativeFunction::TameFunctionConstructor,
        true,
    )?;
    host.heap_mut().define_property(
        tame,
        PropertyKey::from("prototype"),
        PropertyDescriptor::data_with(JsValue::Object(function_prototype), false, false, false),
    )?;
    let value = JsValue::Object(tame);
    let desc = match current {
        Some(existing) => existing.with_value(value),
        None => PropertyDescriptor::data_hidden(value),
    };
    if !host.heap_mut().define_property(function_prototype, key, desc)? {
        return Err(host.type_error("Cannot redefine property: constructor"));
    }
    host.events_mut().pass(COMPONENT, "repair");
    Ok(RepairOutcome::Repaired)
}
