use std::fs;

use anyhow::{Context, Result, bail};
use frankenengine_realm::interpreter::{to_string, type_of};
use frankenengine_realm::{JsValue, Realm, RealmConfig, RealmError};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct EvalReport {
    ok: bool,
    value: Option<String>,
    value_type: Option<&'static str>,
    error_code: Option<&'static str>,
    error: Option<String>,
    console: Vec<String>,
}

struct Args {
    source: String,
    config: Option<String>,
    json: bool,
}

fn main() {
    match run(std::env::args().skip(1).collect()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("{error:#}");
            std::process::exit(2);
        }
    }
}

fn usage() -> String {
    [
        "franken_realm_eval usage:",
        "  franken_realm_eval --source <path> [--config <path>] [--json]",
    ]
    .join("\n")
}

/// `None` when help was requested.
fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut source = None;
    let mut config = None;
    let mut json = false;
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--source" => {
                index += 1;
                source = Some(args.get(index).context("--source requires a path")?.clone());
            }
            "--config" => {
                index += 1;
                config = Some(args.get(index).context("--config requires a path")?.clone());
            }
            "--json" => json = true,
            "help" | "--help" | "-h" => return Ok(None),
            flag => bail!("unknown flag: {flag}\n\n{}", usage()),
        }
        index += 1;
    }
    let source = source.with_context(|| format!("missing required --source <path>\n\n{}", usage()))?;
    Ok(Some(Args {
        source,
        config,
        json,
    }))
}

/// Returns whether the evaluation succeeded.
fn run(args: Vec<String>) -> Result<bool> {
    let Some(args) = parse_args(&args)? else {
        println!("{}", usage());
        return Ok(true);
    };
    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {path}"))?;
            RealmConfig::from_json_str(&text)?
        }
        None => RealmConfig::default(),
    };
    let source = fs::read_to_string(&args.source)
        .with_context(|| format!("failed to read source {}", args.source))?;

    let realm = Realm::from_config(&config)?;
    let outcome = realm.safe_eval(&source);
    let report = report(&realm, outcome);

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
        print!("{}", realm.events().to_json_lines()?);
    } else {
        for line in &report.console {
            println!("{line}");
        }
        match (&report.value, &report.error) {
            (Some(value), _) => println!("{value}"),
            (None, Some(error)) => eprintln!("{}: {error}", report.error_code.unwrap_or("")),
            (None, None) => {}
        }
    }
    Ok(report.ok)
}

fn report(realm: &Realm, outcome: Result<JsValue, RealmError>) -> EvalReport {
    let console = realm.console_output();
    match outcome {
        Ok(value) => {
            let host = realm.host().borrow();
            EvalReport {
                ok: true,
                value: Some(to_string(&host, &value)),
                value_type: Some(type_of(&host, &value)),
                error_code: None,
                error: None,
                console,
            }
        }
        Err(err) => EvalReport {
            ok: false,
            value: None,
            value_type: None,
            error_code: Some(err.error_code()),
            error: Some(err.to_string()),
            console,
        },
    }
}
