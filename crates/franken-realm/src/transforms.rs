//! Ordered source-and-endowment rewriting run in front of every realm
//! evaluation.
//!
//! The pipeline takes a [`RewriterState`], copies it, folds the passes over
//! the copy left to right and copies the result once more before handing it
//! back, so neither the caller's state nor anything a pass kept a reference
//! to is shared with the evaluator.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::RealmError;
use crate::object_model::PropertyDescriptor;

/// Binding name to descriptor, defined on a per-call scope object.
pub type Endowments = BTreeMap<String, PropertyDescriptor>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriterState {
    pub src: String,
    pub endowments: Endowments,
}

impl RewriterState {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            endowments: Endowments::new(),
        }
    }

    pub fn with_endowments(src: impl Into<String>, endowments: Endowments) -> Self {
        Self {
            src: src.into(),
            endowments,
        }
    }
}

/// One pipeline pass. The default rewrite is the identity.
pub trait SourceTransform {
    fn name(&self) -> &str;

    fn rewrite(&self, state: RewriterState) -> Result<RewriterState, RealmError> {
        Ok(state)
    }
}

/// Adapts a closure into a pass. A returned message becomes
/// [`RealmError::Transform`] tagged with the pass name.
pub struct RewriteFn<F> {
    name: String,
    rewrite: F,
}

impl<F> RewriteFn<F>
where
    F: Fn(RewriterState) -> Result<RewriterState, String>,
{
    pub fn new(name: impl Into<String>, rewrite: F) -> Self {
        Self {
            name: name.into(),
            rewrite,
        }
    }
}

impl<F> fmt::Debug for RewriteFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteFn").field("name", &self.name).finish()
    }
}

impl<F> SourceTransform for RewriteFn<F>
where
    F: Fn(RewriterState) -> Result<RewriterState, String>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, state: RewriterState) -> Result<RewriterState, RealmError> {
        (self.rewrite)(state).map_err(|message| RealmError::Transform {
            pass: self.name.clone(),
            message,
        })
    }
}

/// A pass that leaves the state alone.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    name: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SourceTransform for Identity {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Run `transforms` in order over a copy of `state`.
///
/// A failing pass stops the pipeline and its error is returned as is.
pub fn apply_transforms(
    state: &RewriterState,
    transforms: &[Rc<dyn SourceTransform>],
) -> Result<RewriterState, RealmError> {
    let mut current = state.clone();
    for transform in transforms {
        current = transform.rewrite(current)?;
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::JsValue;

    fn pass<F>(name: &str, f: F) -> Rc<dyn SourceTransform>
    where
        F: Fn(RewriterState) -> Result<RewriterState, String> + 'static,
    {
        Rc::new(RewriteFn::new(name, f))
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let state = RewriterState::new("1 + 1");
        assert_eq!(apply_transforms(&state, &[]).unwrap(), state);
    }

    #[test]
    fn default_rewrite_is_identity() {
        let state = RewriterState::new("x");
        let passes: Vec<Rc<dyn SourceTransform>> = vec![Rc::new(Identity::new("noop"))];
        assert_eq!(apply_transforms(&state, &passes).unwrap(), state);
        assert_eq!(passes[0].name(), "noop");
    }

    #[test]
    fn passes_run_in_order() {
        let passes = vec![
            pass("append_a", |mut s| {
                s.src.push('a');
                Ok(s)
            }),
            pass("append_b", |mut s| {
                s.src.push('b');
                Ok(s)
            }),
        ];
        let out = apply_transforms(&RewriterState::new(""), &passes).unwrap();
        assert_eq!(out.src, "ab");
    }

    #[test]
    fn passes_can_add_endowments() {
        let passes = vec![pass("endow", |mut s| {
            s.endowments
                .insert("y".into(), PropertyDescriptor::data(JsValue::Int(7)));
            Ok(s)
        })];
        let input = RewriterState::new("y + 1");
        let out = apply_transforms(&input, &passes).unwrap();
        assert!(input.endowments.is_empty());
        assert_eq!(
            out.endowments.get("y").and_then(|d| d.value().cloned()),
            Some(JsValue::Int(7))
        );
    }

    #[test]
    fn failure_stops_the_pipeline() {
        let passes = vec![
            pass("fails", |_| Err("nope".to_string())),
            pass("never", |_| panic!("ran after a failure")),
        ];
        let err = apply_transforms(&RewriterState::new("1"), &passes).unwrap_err();
        assert_eq!(
            err,
            RealmError::Transform {
                pass: "fails".into(),
                message: "nope".into()
            }
        );
        assert_eq!(err.error_code(), "FE-REALM-0004");
    }

    #[test]
    fn state_serializes() {
        let mut endowments = Endowments::new();
        endowments.insert("y".into(), PropertyDescriptor::data(JsValue::Int(7)));
        let state = RewriterState::with_endowments("y", endowments);
        let json = serde_json::to_string(&state).unwrap();
        let back: RewriterState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
