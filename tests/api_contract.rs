#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! API Contract Tests
//!
//! Ensures API routes don't change without explicit approval.
//! The golden file at tests/fixtures/api_routes.txt is the source of truth.
//!
//! If this test fails:
//! 1. Review the route changes carefully
//! 2. Update api_routes.txt if the change is intentional
//!
//! Run with: cargo test --test api_contract

use std::collections::BTreeSet;
use std::fs;

const METHODS: &[(&str, &str)] = &[
    ("get(", "GET"),
    ("post(", "POST"),
    ("put(", "PUT"),
    ("delete(", "DELETE"),
];

fn golden_lines() -> Vec<String> {
    let content =
        fs::read_to_string("tests/fixtures/api_routes.txt").expect("Failed to read api_routes.txt");

    content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .collect()
}

/// Methods routed in a `.route(...)` handler expression.
///
/// Handlers may be chained (`get(a).put(b)`), so every method router call
/// counts, matched at a word boundary so `post(` never matches `upsert(`.
fn methods_in(handlers: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    for (needle, method) in METHODS {
        let mut rest = handlers;
        while let Some(idx) = rest.find(needle) {
            let boundary = rest[..idx]
                .chars()
                .last()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
            if boundary {
                found.push(*method);
                break;
            }
            rest = &rest[idx + needle.len()..];
        }
    }
    found
}

/// Extract routes from the router source
fn extract_routes_from_source() -> BTreeSet<String> {
    let content = fs::read_to_string("src/api/mod.rs").expect("Failed to read src/api/mod.rs");

    let mut routes = BTreeSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("//") {
            continue;
        }

        // .route("/path", method(handler)...)
        if let Some(start) = line.find(".route(\"") {
            let rest = &line[start + 8..];
            if let Some(end) = rest.find('"') {
                let path = &rest[..end];
                for method in methods_in(&rest[end + 1..]) {
                    routes.insert(format!("{} {}", method, path));
                }
            }
        }
    }

    routes
}

#[test]
fn api_routes_match_contract() {
    let golden: BTreeSet<String> = golden_lines().into_iter().collect();
    let actual = extract_routes_from_source();

    let added: Vec<_> = actual.difference(&golden).collect();
    let removed: Vec<_> = golden.difference(&actual).collect();

    if !added.is_empty() || !removed.is_empty() {
        let mut msg = String::from("\n\nAPI CONTRACT VIOLATION!\n\n");

        if !added.is_empty() {
            msg.push_str("Routes ADDED (not in contract):\n");
            for route in &added {
                msg.push_str(&format!("  + {}\n", route));
            }
            msg.push('\n');
        }

        if !removed.is_empty() {
            msg.push_str("Routes REMOVED (missing from implementation):\n");
            for route in &removed {
                msg.push_str(&format!("  - {}\n", route));
            }
            msg.push('\n');
        }

        msg.push_str("If intentional, update tests/fixtures/api_routes.txt\n");
        panic!("{}", msg);
    }
}

#[test]
fn golden_file_is_sorted() {
    let routes = golden_lines();
    let mut sorted = routes.clone();
    sorted.sort();

    assert_eq!(
        routes, sorted,
        "api_routes.txt is not sorted! Please sort alphabetically."
    );
}

#[test]
fn chained_handlers_are_all_counted() {
    assert_eq!(
        methods_in(", get(device_handler).put(upsert_device_handler).delete(remove))"),
        vec!["GET", "PUT", "DELETE"]
    );
    assert_eq!(methods_in(", post(upsert_handler))"), vec!["POST"]);
}
