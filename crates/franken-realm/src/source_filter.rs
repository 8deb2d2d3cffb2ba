//! Pre-evaluation rejection of source text that could parse differently on
//! different engines or reach outside the realm without going through any
//! binding the realm controls.
//!
//! Two checks, run in order:
//!
//! - html-like comment tokens (`<!--`, `-->`) anywhere in the text;
//! - the identifier `import` followed by optional whitespace and either `(`
//!   or the start of a comment, unless the text before it ends in a doc
//!   annotation such as `@param {` or `@type {typeof `.
//!
//! Neither check parses. Occurrences inside string literals and comments are
//! rejected too.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RealmError;
use crate::transforms::{RewriterState, SourceTransform};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRejection {
    #[error("possible html comment syntax rejected around line {line}")]
    HtmlComment { line: usize },
    #[error("possible import expression rejected around line {line}")]
    ImportExpression { line: usize },
}

impl SourceRejection {
    pub fn line(&self) -> usize {
        match self {
            Self::HtmlComment { line } | Self::ImportExpression { line } => *line,
        }
    }
}

fn html_comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("<!--|-->").expect("html comment pattern is valid"))
}

/// `\s` covers the Unicode White_Space set, including U+2028/U+2029; U+FEFF
/// is whitespace to the script grammar but not to that set.
fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"import[\s\x{FEFF}]*(?:\(|/[/*])").expect("import pattern is valid")
    })
}

/// Spaces only between the pieces: a newline must not be tolerated.
fn allowed_import_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@[a-z]+ +\{(?:(?:type|key)of +)?$").expect("import prefix pattern is valid")
    })
}

/// 1-based line of `index`: newlines before it, plus one.
fn line_number(source: &str, index: usize) -> usize {
    source[..index].bytes().filter(|b| *b == b'\n').count() + 1
}

fn is_ascii_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

pub fn reject_html_comments(source: &str) -> Result<(), SourceRejection> {
    match html_comment_pattern().find(source) {
        Some(found) => Err(SourceRejection::HtmlComment {
            line: line_number(source, found.start()),
        }),
        None => Ok(()),
    }
}

pub fn reject_import_expressions(source: &str) -> Result<(), SourceRejection> {
    let mut from = 0;
    while let Some(found) = import_pattern().find_at(source, from) {
        let index = found.start();
        // Word boundary in the ASCII sense: `ximport(` is an ordinary call.
        if index > 0 && is_ascii_word_byte(source.as_bytes()[index - 1]) {
            from = index + 1;
            continue;
        }
        if allowed_import_prefix().is_match(&source[..index]) {
            from = index + 1;
            continue;
        }
        return Err(SourceRejection::ImportExpression {
            line: line_number(source, index),
        });
    }
    Ok(())
}

pub fn reject_dangerous_sources(source: &str) -> Result<(), SourceRejection> {
    reject_html_comments(source)?;
    reject_import_expressions(source)
}

/// Pipeline pass running [`reject_dangerous_sources`] on the source and
/// passing the state through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectDangerousSources;

impl SourceTransform for RejectDangerousSources {
    fn name(&self) -> &str {
        "reject_dangerous_sources"
    }

    fn rewrite(&self, state: RewriterState) -> Result<RewriterState, RealmError> {
        reject_dangerous_sources(&state.src)?;
        Ok(state)
    }
}
