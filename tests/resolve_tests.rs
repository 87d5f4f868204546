//! # URI resolution integration tests
//!
//! Round-trip and composition properties over the public API, plus the
//! alias-rewrite scenarios.

use std::collections::BTreeMap;

use weft::uri::{resolve_relative, Uri};
use weft::workflow::{Alias, AliasKind};

fn aliases() -> BTreeMap<String, Alias> {
    let mut map = BTreeMap::new();
    map.insert(
        "gh".to_string(),
        Alias::Remote {
            kind: AliasKind::Github,
            base_url: Some("https://api.github.com".to_string()),
            token_from_env: Some("GITHUB_TOKEN".to_string()),
        },
    );
    map.insert(
        "tools".to_string(),
        Alias::Local {
            path: "tools/tasks.yaml".to_string(),
        },
    );
    map
}

// ============================================================================
// ROUND TRIPS
// ============================================================================

#[test]
fn test_parse_display_round_trip() {
    for raw in [
        "file:tasks.yaml",
        "file:ci/lint.yaml?task=all",
        "https://example.com/wf.yaml?task=go",
        "pkg:github/owner/repo@main#tasks.yaml",
        "pkg:gitlab/group/sub/repo@v2?task=build#ci/tasks.yaml",
        "oci:ghcr.io/acme/tasks:v1#file:tasks.yaml",
        "oci:localhost:5000/tasks:latest?plain-http=true#file:ci.yaml",
        "builtin:echo",
    ] {
        let uri = Uri::parse(raw).unwrap();
        let reparsed = Uri::parse(&uri.to_string()).unwrap();
        assert_eq!(uri, reparsed, "round trip failed for {raw}");
    }
}

#[test]
fn test_resolution_idempotent_on_output() {
    let none = BTreeMap::new();
    let cases = [
        (Some("file:ci/tasks.yaml"), "file:lint.yaml"),
        (Some("file:tasks.yaml"), "pkg:github/o/r"),
        (Some("https://example.com/a/tasks.yaml"), "file:b.yaml"),
        (Some("pkg:github/o/r@v1#ci/tasks.yaml"), "file:../x.yaml"),
        (None, "oci:ghcr.io/a/t:v1#file:tasks.yaml"),
    ];
    for (previous, raw) in cases {
        let previous = previous.map(|p| Uri::parse(p).unwrap());
        let resolved = resolve_relative(previous.as_ref(), raw, &none).unwrap();
        let again = resolve_relative(None, &resolved.to_string(), &none).unwrap();
        assert_eq!(resolved, again, "not stable for {raw}");
    }
}

// ============================================================================
// COMPOSITION TABLE
// ============================================================================

#[test]
fn test_pkg_defaults_applied() {
    let uri = resolve_relative(None, "pkg:github/owner/repo", &BTreeMap::new()).unwrap();
    assert_eq!(uri.to_string(), "pkg:github/owner/repo@main#tasks.yaml");
}

#[test]
fn test_file_chain_across_directories() {
    let root = Uri::parse("file:tasks.yaml").unwrap();
    let sub = resolve_relative(Some(&root), "file:ci/tasks.yaml", &BTreeMap::new()).unwrap();
    assert_eq!(sub.to_string(), "file:ci/tasks.yaml");

    let deeper = resolve_relative(Some(&sub), "file:release/go.yaml", &BTreeMap::new()).unwrap();
    assert_eq!(deeper.to_string(), "file:ci/release/go.yaml");

    let back = resolve_relative(Some(&deeper), "file:..", &BTreeMap::new()).unwrap();
    assert_eq!(back.to_string(), "file:ci/tasks.yaml");
}

#[test]
fn test_http_previous_rebases_files() {
    let prev = Uri::parse("https://example.com/flows/tasks.yaml").unwrap();
    let uri = resolve_relative(Some(&prev), "file:lint.yaml?task=fast", &BTreeMap::new()).unwrap();
    assert_eq!(
        uri.to_string(),
        "https://example.com/flows/lint.yaml?task=fast"
    );
}

#[test]
fn test_pkg_previous_rewrites_subpath() {
    let prev = Uri::parse("pkg:github/o/r@v1?token-from-env=T#ci/tasks.yaml").unwrap();
    let uri = resolve_relative(Some(&prev), "file:lint.yaml?task=x", &BTreeMap::new()).unwrap();
    let Uri::Pkg(purl) = &uri else { panic!() };
    assert_eq!(purl.subpath(), "ci/lint.yaml");
    assert_eq!(purl.qualifier("task"), Some("x"));
    // Credentials travel with the rewritten reference.
    assert_eq!(purl.qualifier("token-from-env"), Some("T"));
}

// ============================================================================
// ALIASES
// ============================================================================

#[test]
fn test_alias_rewrite_scenario() {
    let uri = resolve_relative(None, "pkg:gh/owner/repo@main#f.yaml", &aliases()).unwrap();
    assert_eq!(
        uri.to_string(),
        "pkg:github/owner/repo@main?base-url=https%3A%2F%2Fapi.github.com&token-from-env=GITHUB_TOKEN#f.yaml"
    );
}

#[test]
fn test_local_alias_shorthand() {
    let prev = Uri::parse("file:tasks.yaml").unwrap();
    let uri = resolve_relative(Some(&prev), "tools:fmt", &aliases()).unwrap();
    assert_eq!(uri.to_string(), "file:tools/tasks.yaml?task=fmt");
}

#[test]
fn test_unknown_alias_is_unsupported_scheme() {
    assert!(resolve_relative(None, "nope:thing", &aliases()).is_err());
}
