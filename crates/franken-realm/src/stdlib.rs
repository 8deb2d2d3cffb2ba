//! Which host globals a realm shares, and with what mutability.
//!
//! Three disjoint tiers. `eval` and `Function` are absent on purpose: every
//! realm installs its own.

use std::collections::BTreeMap;

use crate::error::RealmError;
use crate::object_model::{ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey};

/// Value properties that are read-only in every realm.
pub const FROZEN_GLOBALS: [&str; 3] = ["Infinity", "NaN", "undefined"];

/// Shared globals whose values do not change between realms.
pub const STABLE_GLOBALS: [&str; 34] = [
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
    "decodeURI",
    "decodeURIComponent",
    "encodeURI",
    "encodeURIComponent",
    "Array",
    "ArrayBuffer",
    "Boolean",
    "DataView",
    "EvalError",
    "Float32Array",
    "Float64Array",
    "Int8Array",
    "Int16Array",
    "Int32Array",
    "Number",
    "Object",
    "RangeError",
    "ReferenceError",
    "String",
    "SyntaxError",
    "TypeError",
    "Uint8Array",
    "Uint8ClampedArray",
    "Uint16Array",
    "Uint32Array",
    "URIError",
    "JSON",
    "Math",
    "escape",
    "unescape",
];

/// Globals that embedders commonly replace, so they stay configurable.
pub const UNSTABLE_GLOBALS: [&str; 5] = ["Date", "Error", "Promise", "RegExp", "Intl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalTier {
    Frozen,
    Stable,
    Unstable,
}

impl GlobalTier {
    pub fn names(self) -> &'static [&'static str] {
        match self {
            Self::Frozen => &FROZEN_GLOBALS,
            Self::Stable => &STABLE_GLOBALS,
            Self::Unstable => &UNSTABLE_GLOBALS,
        }
    }

    /// `(writable, configurable)` for this tier. Never enumerable.
    fn attributes(self, configurable_globals: bool) -> (bool, bool) {
        match self {
            Self::Frozen => (false, false),
            Self::Stable => (configurable_globals, configurable_globals),
            Self::Unstable => (true, true),
        }
    }
}

pub fn tier_of(name: &str) -> Option<GlobalTier> {
    [GlobalTier::Frozen, GlobalTier::Stable, GlobalTier::Unstable]
        .into_iter()
        .find(|tier| tier.names().contains(&name))
}

/// Descriptors for every tiered name present as an own property of `global`.
///
/// Missing names are skipped. An accessor is a host shape error: its value
/// cannot be copied without running host code.
pub fn get_shared_global_descs(
    heap: &ObjectHeap,
    global: ObjectHandle,
    configurable_globals: bool,
) -> Result<BTreeMap<String, PropertyDescriptor>, RealmError> {
    let mut descs = BTreeMap::new();
    for tier in [GlobalTier::Frozen, GlobalTier::Stable, GlobalTier::Unstable] {
        let (writable, configurable) = tier.attributes(configurable_globals);
        for name in tier.names() {
            let Some(desc) = heap.get_own_property_descriptor(global, &PropertyKey::from(*name))?
            else {
                continue;
            };
            let Some(value) = desc.value() else {
                return Err(RealmError::host_shape(format!(
                    "unexpected accessor on global property: {name}"
                )));
            };
            descs.insert(
                (*name).to_string(),
                PropertyDescriptor::data_with(value.clone(), writable, false, configurable),
            );
        }
    }
    Ok(descs)
}
