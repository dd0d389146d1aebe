use std::{collections::HashMap, env, fs, path::Path, process::ExitCode};

use media_migrate::config::parse_upload_url;

const REQUIRED: &[&str] = &["UPLOAD_URL", "API_KEY"];
const DATABASE: &[&str] = &["DB_SERVER", "DB_DATABASE", "DB_USERNAME", "DB_PASSWORD"];
const INTEGERS: &[&str] = &[
    "DB_PORT",
    "MAX_CONCURRENCY",
    "MAX_ATTEMPTS",
    "REQUEST_TIMEOUT_MS",
    "BASE_BACKOFF_MS",
    "RECORD_LIMIT",
];

fn parse_env_lines(contents: &str) -> Vec<(usize, String, String)> {
    let mut out = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim();
        }
        let Some(eq) = line.find('=') else {
            continue;
        };
        let key = line[..eq].trim().to_string();
        let mut val = line[eq + 1..].trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        } else if let Some(hash_pos) = val.find('#') {
            // Inline comment only when whitespace precedes '#'.
            let prefix = &val[..hash_pos];
            if prefix.ends_with(' ') || prefix.ends_with('\t') {
                val = prefix.trim_end().to_string();
            }
        }
        if key.is_empty() {
            continue;
        }
        out.push((line_no, key, val));
    }
    out
}

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn check(contents: &str, database: bool) -> Findings {
    let mut findings = Findings::default();
    let mut first_seen: HashMap<String, (usize, String)> = HashMap::new();

    for (line, key, val) in parse_env_lines(contents) {
        match first_seen.get(&key) {
            Some((first_line, first_val)) => {
                let conflict = if *first_val == val { "same" } else { "different" };
                findings.warnings.push(format!(
                    "{key}: duplicate at line {line} (first at line {first_line}, {conflict} value; first wins)"
                ));
            }
            None => {
                first_seen.insert(key, (line, val));
            }
        }
    }

    let present = |k: &str| first_seen.get(k).filter(|(_, v)| !v.trim().is_empty());
    let database_keys: &[&str] = if database { DATABASE } else { &[] };
    for key in REQUIRED.iter().chain(database_keys) {
        if present(*key).is_none() {
            findings.errors.push(format!("{key}: missing"));
        }
    }

    if let Some((line, val)) = present("UPLOAD_URL") {
        if let Err(e) = parse_upload_url(val) {
            findings.errors.push(format!("UPLOAD_URL (line {line}): {e}"));
        }
    }
    for key in INTEGERS {
        if let Some((line, val)) = present(*key) {
            if val.trim().parse::<u64>().is_err() {
                findings
                    .errors
                    .push(format!("{key} (line {line}): {val:?} is not a non-negative integer"));
            }
        }
    }
    if let Some((line, val)) = present("REQUEST_DELAY") {
        match val.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => {}
            _ => findings.errors.push(format!(
                "REQUEST_DELAY (line {line}): {val:?} is not a non-negative number of seconds"
            )),
        }
    }
    findings
}

fn main() -> ExitCode {
    // Usage: validate_env [path] [--csv]; --csv skips SQL Server keys.
    let args: Vec<String> = env::args().skip(1).collect();
    let database = !args.iter().any(|a| a == "--csv");
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| ".env".to_string());

    if !Path::new(&path).exists() {
        eprintln!("No .env found at {path}");
        return ExitCode::from(2);
    }
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read {path}: {e}");
            return ExitCode::from(2);
        }
    };

    let findings = check(&contents, database);
    for w in &findings.warnings {
        println!("[WARN] {w}");
    }
    for e in &findings.errors {
        eprintln!("[ERROR] {e}");
    }
    if findings.errors.is_empty() {
        println!("Validation: PASS");
        ExitCode::SUCCESS
    } else {
        println!("Validation: FAIL");
        ExitCode::from(2)
    }
}
