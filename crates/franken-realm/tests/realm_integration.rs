//! End-to-end tests for realm assembly and safe evaluation.

#![forbid(unsafe_code)]

use frankenengine_realm::config::MAX_CALL_DEPTH_LIMIT;
use frankenengine_realm::object_model::PropertyKey;
use frankenengine_realm::{
    Endowments, ErrorName, EvaluationError, HostProfile, JsValue, PropertyDescriptor, Realm,
    RealmConfig, RealmError,
};

fn realm() -> Realm {
    Realm::from_config(&RealmConfig::default()).unwrap()
}

fn realm_with(config: RealmConfig) -> Realm {
    Realm::from_config(&config).unwrap()
}

fn endow(name: &str, value: JsValue) -> Endowments {
    let mut endowments = Endowments::new();
    endowments.insert(name.to_string(), PropertyDescriptor::data(value));
    endowments
}

// ---------------------------------------------------------------------------
// Basic evaluation
// ---------------------------------------------------------------------------

#[test]
fn arithmetic_evaluates() {
    assert_eq!(realm().safe_eval("1+1").unwrap(), JsValue::Int(2));
}

#[test]
fn host_only_globals_are_absent() {
    let r = realm();
    for name in ["setTimeout", "setInterval", "process", "console"] {
        assert_eq!(
            r.safe_eval(&format!("typeof {name}")).unwrap(),
            JsValue::str("undefined"),
            "{name} visible in realm"
        );
    }
}

#[test]
fn this_writes_land_on_the_namespace() {
    let r = realm();
    r.safe_eval("this.x=5").unwrap();
    assert_eq!(r.get_global("x").unwrap(), JsValue::Int(5));
    assert_eq!(r.safe_eval("x").unwrap(), JsValue::Int(5));
}

#[test]
fn endowments_are_visible_for_one_call_only() {
    let r = realm();
    assert_eq!(
        r.safe_eval_with_endowments("y+1", &endow("y", JsValue::Int(7)))
            .unwrap(),
        JsValue::Int(8)
    );
    assert_eq!(r.safe_eval("typeof y").unwrap(), JsValue::str("undefined"));
    assert!(!r.global_names().unwrap().iter().any(|n| n == "y"));
}

#[test]
fn endowments_shadow_namespace_properties() {
    let r = realm();
    r.safe_eval("this.y = 1").unwrap();
    assert_eq!(
        r.safe_eval_with_endowments("y", &endow("y", JsValue::Int(2)))
            .unwrap(),
        JsValue::Int(2)
    );
    assert_eq!(r.safe_eval("y").unwrap(), JsValue::Int(1));
}

#[test]
fn top_level_declarations_do_not_persist() {
    let r = realm();
    assert_eq!(
        r.safe_eval("var a = 1; let b = 2; function c() { return 3 } a + b + c()")
            .unwrap(),
        JsValue::Int(6)
    );
    assert_eq!(
        r.safe_eval("typeof a + typeof b + typeof c").unwrap(),
        JsValue::str("undefinedundefinedundefined")
    );
}

#[test]
fn shared_globals_are_the_hosts_intrinsics() {
    let r = realm();
    let object = r.host().borrow().intrinsics().object;
    assert_eq!(r.safe_eval("Object").unwrap(), JsValue::Object(object));
    assert_eq!(
        r.safe_eval("Object.getPrototypeOf(this) === Object.prototype")
            .unwrap(),
        JsValue::Bool(true)
    );
    assert_eq!(r.safe_eval("parseInt('42px')").unwrap(), JsValue::Int(42));
    assert_eq!(r.safe_eval("Math.max(1, 9, 3)").unwrap(), JsValue::Int(9));
}

// ---------------------------------------------------------------------------
// No escape to the host global
// ---------------------------------------------------------------------------

#[test]
fn strict_functions_see_undefined_this() {
    let r = realm();
    assert_eq!(
        r.safe_eval("(function () { return this })()").unwrap(),
        JsValue::Undefined
    );
    assert_eq!(
        r.safe_eval("Function('return this')()").unwrap(),
        JsValue::Undefined
    );
}

#[test]
fn eval_and_function_are_the_realms_own() {
    let r = realm();
    assert_eq!(r.safe_eval("eval('this') === this").unwrap(), JsValue::Bool(true));
    assert_eq!(r.safe_eval("eval(5)").unwrap(), JsValue::Int(5));
    assert_eq!(
        r.safe_eval("(function () {}) instanceof Function").unwrap(),
        JsValue::Bool(true)
    );
    let host_eval = r.host().borrow().intrinsics().eval;
    assert_ne!(r.get_global("eval").unwrap(), JsValue::Object(host_eval));
}

#[test]
fn constructor_chains_are_tamed() {
    let r = realm();
    let err = r
        .safe_eval("(function () {}).constructor('return this')")
        .unwrap_err();
    assert_eq!(
        err,
        RealmError::Evaluation(EvaluationError::new(ErrorName::TypeError, "Not available"))
    );
    let err = r.safe_eval("Object.constructor('return this')").unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
    assert_eq!(
        r.safe_eval("Object.constructor === Function").unwrap(),
        JsValue::Bool(false)
    );
}

#[test]
fn accessor_methods_reject_missing_receivers() {
    let r = realm();
    let err = r
        .safe_eval("Object.prototype.__lookupGetter__.call(undefined, 'x')")
        .unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
    let err = r
        .safe_eval("Object.prototype.__defineGetter__.call(null, 'x', function () {})")
        .unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
}

#[test]
fn realm_code_cannot_plant_host_globals() {
    let r = realm();
    let err = r.safe_eval("leaked = 1").unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::ReferenceError));
    r.safe_eval("this.leaked = 1").unwrap();
    let host = r.host().borrow();
    let global = host.global();
    assert!(
        !host
            .heap()
            .has_own(global, &PropertyKey::from("leaked"))
            .unwrap()
    );
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn errors_keep_their_constructor_name() {
    let r = realm();
    let cases = [
        ("null.x", ErrorName::TypeError),
        ("notDefined", ErrorName::ReferenceError),
        ("1 +", ErrorName::SyntaxError),
        ("throw new RangeError('r')", ErrorName::RangeError),
        ("throw new Error('custom')", ErrorName::Error),
    ];
    for (src, name) in cases {
        let err = r.safe_eval(src).unwrap_err();
        assert_eq!(err.evaluation_name(), Some(name), "{src}");
        assert_eq!(err.error_code(), "FE-REALM-0003");
    }
    assert_eq!(
        r.safe_eval("throw new Error('custom')").unwrap_err().to_string(),
        "Error: custom"
    );
}

#[test]
fn thrown_errors_are_catchable_inside_the_realm() {
    let r = realm();
    assert_eq!(
        r.safe_eval("try { null.x } catch (e) { e instanceof TypeError }")
            .unwrap(),
        JsValue::Bool(true)
    );
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[test]
fn sloppy_globals_create_namespace_properties() {
    let r = realm_with(RealmConfig {
        sloppy_globals: true,
        ..RealmConfig::default()
    });
    r.safe_eval("z = 3").unwrap();
    assert_eq!(r.get_global("z").unwrap(), JsValue::Int(3));
    assert_eq!(r.safe_eval("z * 2").unwrap(), JsValue::Int(6));
}

#[test]
fn stable_globals_are_locked_by_default() {
    let r = realm();
    let desc = r.global_descriptor("Object").unwrap().unwrap();
    assert!(!desc.is_writable() && !desc.is_configurable() && !desc.is_enumerable());
    let err = r.safe_eval("Object = 1").unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
    let date = r.global_descriptor("Date").unwrap().unwrap();
    assert!(date.is_writable() && date.is_configurable());
}

#[test]
fn configurable_globals_unlock_the_stable_tier() {
    let r = realm_with(RealmConfig {
        configurable_globals: true,
        ..RealmConfig::default()
    });
    let desc = r.global_descriptor("Object").unwrap().unwrap();
    assert!(desc.is_writable() && desc.is_configurable());
    r.safe_eval("Object = 1").unwrap();
    assert_eq!(r.get_global("Object").unwrap(), JsValue::Int(1));

    for frozen in ["Infinity", "NaN", "undefined"] {
        let desc = r.global_descriptor(frozen).unwrap().unwrap();
        assert!(!desc.is_writable() && !desc.is_configurable(), "{frozen}");
    }
    let err = r.safe_eval("NaN = 1").unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::TypeError));
}

#[test]
fn hardened_hosts_build_working_realms() {
    let r = realm_with(RealmConfig {
        host_profile: HostProfile::Hardened,
        ..RealmConfig::default()
    });
    assert_eq!(r.safe_eval("1+1").unwrap(), JsValue::Int(2));
    let skipped = r
        .events()
        .events()
        .iter()
        .any(|e| e.component == "repair_accessors" && e.outcome.as_str() == "skipped");
    assert!(skipped);
}

#[test]
fn call_depth_limit_applies_inside_realms() {
    let r = realm_with(RealmConfig {
        max_call_depth: 16,
        ..RealmConfig::default()
    });
    let err = r
        .safe_eval("function f() { return f() } f()")
        .unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
    assert_eq!(r.safe_eval("1").unwrap(), JsValue::Int(1));
}

#[test]
fn runaway_recursion_at_the_call_limit_is_a_range_error() {
    let r = realm_with(RealmConfig {
        max_call_depth: MAX_CALL_DEPTH_LIMIT,
        ..RealmConfig::default()
    });
    let err = r
        .safe_eval("function f(n) { return n ? f(n - 1) : 0 } f(2000)")
        .unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
    assert_eq!(
        r.safe_eval("try { eval('function g() { return g() } g()') } catch (e) { e.name }")
            .unwrap(),
        JsValue::str("RangeError")
    );
}

#[test]
fn deeply_nested_sources_are_syntax_errors() {
    let r = realm();
    let parens = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
    let err = r.safe_eval(&parens).unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::SyntaxError));
    let unary = format!("{}1", "-".repeat(500));
    let err = r.safe_eval(&unary).unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::SyntaxError));
    let caught = r
        .safe_eval_with_endowments(
            "try { eval(src) } catch (e) { e.name }",
            &endow("src", JsValue::str(parens)),
        )
        .unwrap();
    assert_eq!(caught, JsValue::str("SyntaxError"));
}

#[test]
fn huge_array_lengths_are_refused_or_rendered_in_bounds() {
    let r = realm();
    let err = r
        .safe_eval("var a = Array(); a.length = 1e12")
        .unwrap_err();
    assert_eq!(err.evaluation_name(), Some(ErrorName::RangeError));
    assert_eq!(
        r.safe_eval("var a = Array(); a.length = 3e6; ('' + a).length")
            .unwrap(),
        JsValue::Int(65535)
    );
}
