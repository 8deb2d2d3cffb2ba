#![no_main]

use frankenengine_realm::source_filter::{
    SourceRejection, reject_dangerous_sources, reject_html_comments, reject_import_expressions,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    let combined = reject_dangerous_sources(source);
    let html = reject_html_comments(source);
    let import = reject_import_expressions(source);

    // The combined check is the html check followed by the import check.
    match (&html, &import) {
        (Err(err), _) => assert_eq!(combined.as_ref(), Err(err)),
        (Ok(()), Err(err)) => assert_eq!(combined.as_ref(), Err(err)),
        (Ok(()), Ok(())) => assert!(combined.is_ok()),
    }

    if let Err(err) = combined {
        let lines = source.bytes().filter(|b| *b == b'\n').count() + 1;
        assert!(err.line() >= 1 && err.line() <= lines);
        if matches!(err, SourceRejection::HtmlComment { .. }) {
            assert!(source.contains("<!--") || source.contains("-->"));
        } else {
            assert!(source.contains("import"));
        }
    } else {
        assert!(!source.contains("<!--") && !source.contains("-->"));
    }
});
