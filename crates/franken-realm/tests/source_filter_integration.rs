//! The dangerous-source filter as seen through realm evaluation.

#![forbid(unsafe_code)]

use frankenengine_realm::{
    EventOutcome, JsValue, Realm, RealmConfig, RealmError, SourceRejection,
    reject_dangerous_sources,
};

fn realm(reject: bool) -> Realm {
    Realm::from_config(&RealmConfig {
        reject_dangerous_sources: reject,
        ..RealmConfig::default()
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Standalone checks
// ---------------------------------------------------------------------------

#[test]
fn plain_sources_pass() {
    for src in ["1 + 1", "var imported = 1", "important(1)", "'< !--'", "x - -> y"] {
        assert_eq!(reject_dangerous_sources(src), Ok(()), "{src}");
    }
    assert!(reject_dangerous_sources("/** @param {import('m').T} t */ f").is_ok());
}

#[test]
fn rejection_reports_the_line() {
    let err = reject_dangerous_sources("1;\n2;\nimport('m')").unwrap_err();
    assert_eq!(err, SourceRejection::ImportExpression { line: 3 });
    assert_eq!(err.line(), 3);
    let err = reject_dangerous_sources("\n<!-- hidden").unwrap_err();
    assert_eq!(err, SourceRejection::HtmlComment { line: 2 });
}

// ---------------------------------------------------------------------------
// Through a realm
// ---------------------------------------------------------------------------

#[test]
fn realm_rejects_html_comment_markers() {
    let r = realm(true);
    let err = r.safe_eval("var s = '<!--'; s").unwrap_err();
    assert_eq!(
        err,
        RealmError::RejectedSource(SourceRejection::HtmlComment { line: 1 })
    );
    assert_eq!(err.error_code(), "FE-REALM-0002");
}

#[test]
fn realm_rejects_import_expressions() {
    let r = realm(true);
    let err = r.safe_eval("import('fs')").unwrap_err();
    assert!(matches!(
        err,
        RealmError::RejectedSource(SourceRejection::ImportExpression { line: 1 })
    ));
}

#[test]
fn rejection_applies_to_nested_eval() {
    let r = realm(true);
    let err = r
        .safe_eval("try { eval('<' + '!-- x') } catch (e) { 'caught' }")
        .unwrap_err();
    assert_eq!(err.error_code(), "FE-REALM-0002");
}

#[test]
fn rejections_are_recorded_as_failed_events() {
    let r = realm(true);
    r.safe_eval("'-->'").unwrap_err();
    let failed = r
        .events()
        .events()
        .iter()
        .any(|e| e.outcome == EventOutcome::Fail && e.error_code.as_deref() == Some("FE-REALM-0002"));
    assert!(failed);
}

#[test]
fn filter_can_be_disabled() {
    let r = realm(false);
    assert_eq!(
        r.safe_eval("var s = '<!--'; s").unwrap(),
        JsValue::str("<!--")
    );
}
