#![forbid(unsafe_code)]

//! Realm construction for the franken engine.
//!
//! A host environment is captured once into an [`UnsafeRec`], its legacy
//! leakage points are repaired in place, and any number of realms are then
//! assembled from it. Each realm has its own namespace object and its own
//! `eval`/`Function`, and every evaluation passes through an ordered
//! transform pipeline (by default led by the dangerous-source filter) before
//! the interpreter sees the text.

pub mod builtins;
pub mod call_and_wrap_error;
pub mod config;
pub mod error;
pub mod evaluators;
pub mod events;
pub mod host;
pub mod interpreter;
pub mod object_model;
pub mod realm;
pub mod repair;
pub mod script;
pub mod source_filter;
pub mod stdlib;
pub mod transforms;
pub mod unsafe_rec;

pub use config::RealmConfig;
pub use error::{ErrorName, EvaluationError, RealmError};
pub use events::{EventLog, EventOutcome, RealmEvent};
pub use host::{Host, HostOptions, HostProfile, HostRef};
pub use object_model::{JsValue, PropertyDescriptor};
pub use realm::{Realm, RealmRec, RealmSetupError, create_realm_rec};
pub use source_filter::{RejectDangerousSources, SourceRejection, reject_dangerous_sources};
pub use stdlib::get_shared_global_descs;
pub use transforms::{Endowments, RewriteFn, RewriterState, SourceTransform, apply_transforms};
pub use unsafe_rec::{HostSnapshot, UnsafeRec, create_new_unsafe_rec, create_unsafe_rec};
