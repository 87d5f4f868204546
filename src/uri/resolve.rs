//! Relative reference resolution
//!
//! A `uses:` reference is composed against the URI of the workflow that
//! issued it. The composition table is total over the supported scheme
//! pairs; anything outside it is an error, never a silent pass-through.
//!
//! | previous \ raw | file | http(s) | pkg | oci |
//! |---|---|---|---|---|
//! | none | promote/as-is | pass | normalize + alias | pass |
//! | file | sibling join | pass | normalize + alias | error |
//! | http(s) | rebase onto host | pass | normalize + alias | error |
//! | pkg | rewrite subpath | pass | normalize + alias | error |
//! | oci | join member names | stored in fragment | stored in fragment | pass |

use std::collections::BTreeMap;

use crate::workflow::{Alias, NAME_RE};

use super::{FileRef, OciRef, Purl, Uri, UriError};

/// Compose an absolute reference from `raw`, issued by the workflow at
/// `previous`. `aliases` is the issuing workflow's alias map (persistent
/// config aliases already merged underneath).
pub fn resolve_relative(
    previous: Option<&Uri>,
    raw: &str,
    aliases: &BTreeMap<String, Alias>,
) -> Result<Uri, UriError> {
    let parsed = match Uri::parse(raw) {
        Ok(uri) => uri,
        // A scheme outside the fixed set may be an alias shorthand:
        // `lib:build` for a local alias, `gh:owner/repo` for a remote one.
        Err(UriError::UnsupportedScheme(scheme)) => {
            let opaque = raw
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .split_once(':')
                .map(|(_, rest)| rest)
                .unwrap_or("");
            match aliases.get(&scheme) {
                Some(Alias::Local { path }) => {
                    if !NAME_RE.is_match(opaque) {
                        return Err(UriError::InvalidTaskName(opaque.to_string()));
                    }
                    Uri::File(FileRef {
                        path: path.clone(),
                        task: Some(opaque.to_string()),
                    })
                }
                Some(Alias::Remote { .. }) => Uri::Pkg(Purl::parse(&format!(
                    "{scheme}/{}",
                    opaque.trim_start_matches('/')
                ))?),
                None => return Err(UriError::UnsupportedScheme(scheme)),
            }
        }
        Err(err) => return Err(err),
    };

    compose(previous, parsed, aliases)
}

fn compose(
    previous: Option<&Uri>,
    raw: Uri,
    aliases: &BTreeMap<String, Alias>,
) -> Result<Uri, UriError> {
    match raw {
        Uri::Builtin(name) => Ok(Uri::Builtin(name)),

        Uri::Pkg(purl) => match previous {
            Some(Uri::Oci(prev)) => Ok(store_in_fragment(prev, &Uri::Pkg(purl))),
            _ => {
                let (purl, _) = resolve_pkg_alias(purl.normalize(), aliases);
                Ok(Uri::Pkg(purl))
            }
        },

        Uri::Http(url) => match previous {
            Some(Uri::Oci(prev)) => Ok(store_in_fragment(prev, &Uri::Http(url))),
            _ => Ok(Uri::Http(url)),
        },

        Uri::Oci(oci) => match previous {
            None | Some(Uri::Oci(_)) | Some(Uri::Builtin(_)) => Ok(Uri::Oci(oci)),
            Some(prev) => Err(UriError::Unresolvable {
                previous: prev.to_string(),
                raw: Uri::Oci(oci).to_string(),
            }),
        },

        Uri::File(file) => {
            if file.path == "." {
                return Err(UriError::SelfReference);
            }
            match previous {
                None | Some(Uri::Builtin(_)) => Ok(Uri::File(file)),

                Some(Uri::File(prev)) => {
                    let path = if file.path.starts_with('/') {
                        file.path
                    } else {
                        let joined = sibling_join(parent_dir(&prev.path), &file.path);
                        // An absolute previous keeps its root.
                        if prev.path.starts_with('/') {
                            format!("/{joined}")
                        } else {
                            joined
                        }
                    };
                    Ok(Uri::File(FileRef {
                        path,
                        task: file.task,
                    }))
                }

                Some(Uri::Http(prev)) => {
                    let mut url = prev.join(&file.path).map_err(|source| UriError::InvalidUrl {
                        raw: file.path.clone(),
                        source,
                    })?;
                    url.set_query(None);
                    if let Some(task) = &file.task {
                        url.query_pairs_mut().append_pair("task", task);
                    }
                    Ok(Uri::Http(url))
                }

                Some(Uri::Pkg(prev)) => {
                    let mut purl = prev.clone().normalize();
                    let subpath = sibling_join(parent_dir(purl.subpath()), &file.path);
                    purl.subpath = Some(if subpath.is_empty() {
                        super::DEFAULT_SUBPATH.to_string()
                    } else {
                        subpath
                    });
                    purl.qualifiers.remove("task");
                    if let Some(task) = &file.task {
                        purl.qualifiers.insert("task".to_string(), task.clone());
                    }
                    Ok(Uri::Pkg(purl))
                }

                Some(Uri::Oci(prev)) => {
                    let current = prev
                        .member()
                        .strip_prefix("file:")
                        .unwrap_or(prev.member())
                        .to_string();
                    let joined = sibling_join(parent_dir(&current), &file.path);
                    let mut query = prev.query.clone();
                    query.remove("task");
                    if let Some(task) = &file.task {
                        query.insert("task".to_string(), task.clone());
                    }
                    Ok(Uri::Oci(OciRef {
                        repository: prev.repository.clone(),
                        member: Some(format!("file:{joined}")),
                        query,
                    }))
                }
            }
        }
    }
}

/// Substitute a remote alias in a purl's type position and merge its
/// `base-url` / `token-from-env` without overriding qualifiers already on
/// the request. Returns the (possibly rewritten) purl and whether an alias
/// applied.
pub fn resolve_pkg_alias(mut purl: Purl, aliases: &BTreeMap<String, Alias>) -> (Purl, bool) {
    let Some(Alias::Remote {
        kind,
        base_url,
        token_from_env,
    }) = aliases.get(&purl.ptype)
    else {
        return (purl, false);
    };

    purl.ptype = kind.to_string();
    if let Some(base_url) = base_url {
        purl.merge_qualifier("base-url", base_url);
    }
    if let Some(token_env) = token_from_env {
        purl.merge_qualifier("token-from-env", token_env);
    }
    (purl, true)
}

/// A foreign reference issued from inside an OCI artifact stays addressed
/// through the artifact; the reference itself rides in the fragment.
fn store_in_fragment(prev: &OciRef, raw: &Uri) -> Uri {
    Uri::Oci(OciRef {
        repository: prev.repository.clone(),
        member: Some(raw.to_string()),
        query: prev.query.clone(),
    })
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Lexically join `rel` onto `dir`, resolving `.` and `..` segments.
///
/// An empty or `..`-terminated result names a directory and falls back to
/// its `tasks.yaml`.
fn sibling_join(dir: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in dir.split('/').chain(rel.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&p) if p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            seg => parts.push(seg),
        }
    }
    if parts.is_empty() {
        return super::DEFAULT_SUBPATH.to_string();
    }
    let names_dir = parts.last() == Some(&"..");
    let mut joined = parts.join("/");
    if names_dir {
        joined.push('/');
        joined.push_str(super::DEFAULT_SUBPATH);
    }
    joined
}
