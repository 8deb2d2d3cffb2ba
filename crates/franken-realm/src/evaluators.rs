//! Safe evaluation primitives bound to one realm namespace.
//!
//! A realm registers an [`EvaluatorBinding`] with its host. The `eval` and
//! `Function` objects installed on the namespace carry the binding's
//! [`EvaluatorId`], so calls made from inside realm code land here rather
//! than in the host's raw primitives.
//!
//! Every evaluation runs the realm's transform pipeline first, then parses
//! the rewritten text and executes it as strict code with the scope chain
//! `[locals, endowments?, namespace]` and `this` bound to the namespace.
//! Rejected sources and failing passes unwind as faults: script code cannot
//! catch them.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorName, RealmError};
use crate::host::Host;
use crate::interpreter::{self, CodeMode, Completion, Env};
use crate::object_model::{JsValue, ObjectHandle, PropertyKey};
use crate::script;
use crate::transforms::{Endowments, RewriterState, SourceTransform, apply_transforms};

const COMPONENT: &str = "evaluators";

/// Index of an evaluator binding in its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvaluatorId(pub u32);

/// What a realm's safe evaluator needs at call time.
#[derive(Clone)]
pub struct EvaluatorBinding {
    pub global: ObjectHandle,
    pub transforms: Rc<[Rc<dyn SourceTransform>]>,
    pub sloppy_globals: bool,
}

impl fmt::Debug for EvaluatorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passes: Vec<&str> = self.transforms.iter().map(|t| t.name()).collect();
        f.debug_struct("EvaluatorBinding")
            .field("global", &self.global)
            .field("transforms", &passes)
            .field("sloppy_globals", &self.sloppy_globals)
            .finish()
    }
}

fn binding(host: &Host, id: EvaluatorId) -> Completion<EvaluatorBinding> {
    host.evaluator(id).cloned().ok_or_else(|| {
        RealmError::host_shape(format!("no evaluator registered as {}", id.0)).into()
    })
}

/// Rewrite, parse and run `src` in the realm bound to `id`.
pub fn safe_evaluate(
    host: &mut Host,
    id: EvaluatorId,
    src: &str,
    endowments: &Endowments,
) -> Completion {
    let binding = binding(host, id)?;
    let state = RewriterState::with_endowments(src, endowments.clone());
    let rewritten = match apply_transforms(&state, &binding.transforms) {
        Ok(state) => state,
        Err(err) => {
            host.events_mut()
                .fail(COMPONENT, "rewrite", err.error_code(), err.to_string());
            return Err(err.into());
        }
    };

    let program = match script::parse_program(&rewritten.src) {
        Ok(program) => program,
        Err(err) => return Err(host.throw_error(ErrorName::SyntaxError, err.to_string())),
    };

    let global = binding.global;
    let mut scope = Env::object(global, None);
    if !rewritten.endowments.is_empty() {
        let endowment_scope = host.heap_mut().create(
            None,
            rewritten
                .endowments
                .into_iter()
                .map(|(name, desc)| (PropertyKey::from(name), desc)),
        )?;
        scope = Env::object(endowment_scope, Some(scope));
    }
    let locals = Env::declarative(Some(scope));
    let mode = CodeMode::strict(binding.sloppy_globals.then_some(global));
    interpreter::run_program(host, &program.body, locals, JsValue::Object(global), mode)
}

/// The namespace's `eval`: strings are evaluated, anything else comes back
/// unchanged.
pub(crate) fn safe_eval_native(host: &mut Host, id: EvaluatorId, args: &[JsValue]) -> Completion {
    match args.first() {
        Some(JsValue::Str(src)) => safe_evaluate(host, id, src, &Endowments::new()),
        Some(other) => Ok(other.clone()),
        None => Ok(JsValue::Undefined),
    }
}

/// The namespace's `Function(p1, ..., body)`.
///
/// Parameters and body are each parsed on their own first, so neither can
/// close the synthesized function early and smuggle in code of its own.
pub(crate) fn safe_function_native(
    host: &mut Host,
    id: EvaluatorId,
    args: &[JsValue],
) -> Completion {
    let (params, body) = interpreter::split_function_args(host, args);
    if let Err(err) = script::parse_formal_parameters(&params) {
        return Err(host.throw_error(ErrorName::SyntaxError, err.to_string()));
    }
    if let Err(err) = script::parse_function_body(&body) {
        return Err(host.throw_error(ErrorName::SyntaxError, err.to_string()));
    }
    let src = format!("(function anonymous({params}\n) {{\n{body}\n}})");
    safe_evaluate(host, id, &src, &Endowments::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::NativeFunction;
    use crate::host::HostOptions;
    use crate::interpreter::Throw;
    use crate::object_model::{CallTarget, PropertyDescriptor};
    use crate::source_filter::RejectDangerousSources;

    fn setup(sloppy_globals: bool, transforms: Vec<Rc<dyn SourceTransform>>) -> (Host, EvaluatorId) {
        let mut host = Host::new(HostOptions::default()).unwrap();
        let proto = host.intrinsics().object_prototype;
        let global = host.heap_mut().alloc(Some(proto));
        let id = host.add_evaluator(EvaluatorBinding {
            global,
            transforms: transforms.into(),
            sloppy_globals,
        });
        (host, id)
    }

    fn eval(host: &mut Host, id: EvaluatorId, src: &str) -> Completion {
        safe_evaluate(host, id, src, &Endowments::new())
    }

    fn thrown_name(host: &Host, thrown: Throw) -> String {
        match thrown {
            Throw::Value(value) => interpreter::to_string(host, &value),
            Throw::Fault(err) => format!("fault: {err}"),
        }
    }

    #[test]
    fn top_level_declarations_stay_local() {
        let (mut host, id) = setup(false, Vec::new());
        assert_eq!(eval(&mut host, id, "var a = 1; a + 1").unwrap(), JsValue::Int(2));
        let err = eval(&mut host, id, "a").unwrap_err();
        assert!(thrown_name(&host, err).starts_with("ReferenceError"));
    }

    #[test]
    fn this_is_the_namespace() {
        let (mut host, id) = setup(false, Vec::new());
        eval(&mut host, id, "this.x = 5").unwrap();
        let global = host.evaluator(id).unwrap().global;
        assert_eq!(
            host.heap().get_property(global, &PropertyKey::from("x")).unwrap(),
            JsValue::Int(5)
        );
        assert_eq!(eval(&mut host, id, "x").unwrap(), JsValue::Int(5));
    }

    #[test]
    fn undeclared_assignment_depends_on_sloppy_globals() {
        let (mut host, id) = setup(false, Vec::new());
        let err = eval(&mut host, id, "z = 1").unwrap_err();
        assert!(thrown_name(&host, err).starts_with("ReferenceError"));

        let (mut host, id) = setup(true, Vec::new());
        eval(&mut host, id, "z = 1").unwrap();
        assert_eq!(eval(&mut host, id, "z").unwrap(), JsValue::Int(1));
    }

    #[test]
    fn endowments_shadow_for_one_call() {
        let (mut host, id) = setup(false, Vec::new());
        let mut endowments = Endowments::new();
        endowments.insert("y".into(), PropertyDescriptor::data(JsValue::Int(7)));
        assert_eq!(
            safe_evaluate(&mut host, id, "y + 1", &endowments).unwrap(),
            JsValue::Int(8)
        );
        assert_eq!(eval(&mut host, id, "typeof y").unwrap(), JsValue::str("undefined"));
    }

    #[test]
    fn eval_native_passes_non_strings_through() {
        let (mut host, id) = setup(false, Vec::new());
        assert_eq!(
            safe_eval_native(&mut host, id, &[JsValue::Int(3)]).unwrap(),
            JsValue::Int(3)
        );
        assert_eq!(safe_eval_native(&mut host, id, &[]).unwrap(), JsValue::Undefined);
        assert_eq!(
            safe_eval_native(&mut host, id, &[JsValue::str("2 * 3")]).unwrap(),
            JsValue::Int(6)
        );
    }

    #[test]
    fn function_native_builds_strict_functions() {
        let (mut host, id) = setup(false, Vec::new());
        let add = safe_function_native(
            &mut host,
            id,
            &[JsValue::str("a, b"), JsValue::str("return a + b")],
        )
        .unwrap();
        let sum = interpreter::call(
            &mut host,
            &add,
            JsValue::Undefined,
            vec![JsValue::Int(2), JsValue::Int(3)],
        )
        .unwrap();
        assert_eq!(sum, JsValue::Int(5));

        let this_of = safe_function_native(&mut host, id, &[JsValue::str("return this")]).unwrap();
        assert_eq!(
            interpreter::call(&mut host, &this_of, JsValue::Undefined, Vec::new()).unwrap(),
            JsValue::Undefined
        );
    }

    #[test]
    fn function_native_rejects_early_close() {
        let (mut host, id) = setup(false, Vec::new());
        let err = safe_function_native(
            &mut host,
            id,
            &[JsValue::str("a) { return this }; (function (b"), JsValue::str("")],
        )
        .unwrap_err();
        assert!(thrown_name(&host, err).starts_with("SyntaxError"));

        let err = safe_function_native(
            &mut host,
            id,
            &[JsValue::str("}); this.leaked = 1; (function () {")],
        )
        .unwrap_err();
        assert!(thrown_name(&host, err).starts_with("SyntaxError"));
    }

    fn install_eval(host: &mut Host, id: EvaluatorId) {
        let global = host.evaluator(id).unwrap().global;
        let function_prototype = host.intrinsics().function_prototype;
        let eval_fn = host.heap_mut().alloc_callable(
            Some(function_prototype),
            CallTarget::Native(NativeFunction::SafeEval(id)),
            false,
        );
        host.heap_mut()
            .define_property(
                global,
                PropertyKey::from("eval"),
                PropertyDescriptor::data_hidden(JsValue::Object(eval_fn)),
            )
            .unwrap();
    }

    #[test]
    fn rejection_cannot_be_caught() {
        let (mut host, id) = setup(false, vec![Rc::new(RejectDangerousSources)]);
        install_eval(&mut host, id);
        let err = eval(
            &mut host,
            id,
            "try { eval('imp' + 'ort(1)') } catch (e) { 'caught' }",
        )
        .unwrap_err();
        assert!(matches!(err, Throw::Fault(ref e) if e.error_code() == "FE-REALM-0002"));
        assert_eq!(host.events().for_component(COMPONENT).count(), 1);
    }

    #[test]
    fn syntax_errors_are_catchable() {
        let (mut host, id) = setup(false, Vec::new());
        install_eval(&mut host, id);
        assert_eq!(
            eval(&mut host, id, "try { eval('1 +') } catch (e) { e.name }").unwrap(),
            JsValue::str("SyntaxError")
        );
    }
}
