//! Turns script exceptions into [`RealmError`]s on the caller's side of the
//! host boundary.
//!
//! The helper is built inside the host it serves (by a routine run through
//! that host's own evaluation primitive) and remembers that host's error
//! prototypes. Error names are resolved against those, never against
//! whatever the thrown object claims its constructor is.

use std::collections::BTreeMap;

use crate::error::{ErrorName, EvaluationError, RealmError};
use crate::host::{Host, HostId, HostRoutine};
use crate::interpreter::{self, Completion, Throw};
use crate::object_model::{JsValue, ObjectHandle, PropertyKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAndWrapError {
    host: HostId,
    error_prototypes: BTreeMap<ErrorName, ObjectHandle>,
}

impl CallAndWrapError {
    pub fn host(&self) -> HostId {
        self.host
    }

    /// Run `f` against `host` and rebuild anything it throws as an
    /// [`EvaluationError`]. Faults pass through unchanged.
    pub fn call<T>(
        &self,
        host: &mut Host,
        f: impl FnOnce(&mut Host) -> Completion<T>,
    ) -> Result<T, RealmError> {
        if host.id() != self.host {
            return Err(RealmError::host_shape(
                "error wrapper used with a host other than the one it was built in",
            ));
        }
        match f(host) {
            Ok(value) => Ok(value),
            Err(Throw::Value(value)) => Err(RealmError::Evaluation(describe_thrown(
                host,
                &self.error_prototypes,
                &value,
            ))),
            Err(Throw::Fault(err)) => Err(*err),
        }
    }
}

fn build(host: &mut Host) -> Completion<CallAndWrapError> {
    Ok(CallAndWrapError {
        host: host.id(),
        error_prototypes: host.intrinsics().error_prototypes.clone(),
    })
}

/// Routine that builds the helper from inside the host it will serve.
pub const BUILD_CALL_AND_WRAP_ERROR: HostRoutine<CallAndWrapError> = HostRoutine {
    name: "build_call_and_wrap_error",
    body: build,
};

/// Describe a thrown value without handing out any heap handle.
///
/// Values inheriting from `Error.prototype` keep their `name` when it is one
/// of the native error names, and their `message`. Everything else becomes a
/// plain `Error` carrying the value's string form.
pub(crate) fn describe_thrown(
    host: &Host,
    error_prototypes: &BTreeMap<ErrorName, ObjectHandle>,
    value: &JsValue,
) -> EvaluationError {
    let heap = host.heap();
    let error_root = error_prototypes.get(&ErrorName::Error).copied();
    if let (Some(handle), Some(root)) = (value.as_object(), error_root)
        && inherits_from(host, handle, root)
    {
        let read = |key: &str| {
            heap.get_property(handle, &PropertyKey::from(key))
                .unwrap_or(JsValue::Undefined)
        };
        let name = match read("name") {
            JsValue::Str(name) => ErrorName::from_name(&name).unwrap_or(ErrorName::Error),
            _ => ErrorName::Error,
        };
        let message = match read("message") {
            JsValue::Undefined => String::new(),
            other => interpreter::to_string(host, &other),
        };
        return EvaluationError::new(name, message);
    }
    EvaluationError::new(ErrorName::Error, interpreter::to_string(host, value))
}

fn inherits_from(host: &Host, handle: ObjectHandle, ancestor: ObjectHandle) -> bool {
    let mut current = host.heap().get_prototype_of(handle).ok().flatten();
    let mut steps = 0;
    while let Some(proto) = current {
        if proto == ancestor {
            return true;
        }
        steps += 1;
        if steps > 1024 {
            return false;
        }
        current = host.heap().get_prototype_of(proto).ok().flatten();
    }
    false
}
