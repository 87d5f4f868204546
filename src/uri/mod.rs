//! # Workflow reference URIs
//!
//! Every workflow location is addressed by a URI in one of five schemes:
//!
//! | Scheme | Shape | Backed by |
//! |--------|-------|-----------|
//! | `file` | `file:<path>?task=<name>` | local filesystem |
//! | `http(s)` | `https://host/path?task=<name>` | raw HTTP document |
//! | `pkg` | `pkg:<type>/<ns>/<name>@<ver>?<quals>#<subpath>` | Git forge raw files |
//! | `oci` | `oci:<registry>/<repo>:<tag>#<member>` | OCI artifact layer |
//! | `builtin` | `builtin:<name>` | in-process registry |
//!
//! Parsing strips stray shell-completion quotes, `Display` round-trips the
//! normalized form, and [`Uri::canonical`] produces the cache identity (user
//! info and query stripped, fragment kept).

mod purl;
mod resolve;

pub use purl::{Purl, PurlError, DEFAULT_SUBPATH, DEFAULT_VERSION};
pub use resolve::{resolve_pkg_alias, resolve_relative};

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use url::Url;

/// Schemes with a fixed meaning; alias names must not shadow these.
pub const RESERVED_SCHEMES: &[&str] = &["file", "http", "https", "pkg", "oci"];

#[derive(Error, Debug)]
pub enum UriError {
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Purl(#[from] PurlError),

    #[error("invalid URL '{raw}': {source}")]
    InvalidUrl {
        raw: String,
        source: url::ParseError,
    },

    #[error("'{0}' does not name a task (expected [_A-Za-z][A-Za-z0-9_-]*)")]
    InvalidTaskName(String),

    #[error("'file:.' is not a valid self reference")]
    SelfReference,

    #[error("empty reference")]
    Empty,

    #[error("cannot resolve '{raw}' relative to '{previous}'")]
    Unresolvable { previous: String, raw: String },
}

/// A local workflow file reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Relative or absolute path to the workflow document.
    pub path: String,
    /// Requested task, from the `task` query parameter.
    pub task: Option<String>,
}

/// An OCI artifact reference: `<registry>/<repo>:<tag>` plus the member
/// fragment naming a layer by its title annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciRef {
    pub repository: String,
    /// Layer title, e.g. `file:tasks.yaml`. `None` means the default member.
    pub member: Option<String>,
    /// Query flags (`plain-http`, `insecure-skip-tls-verify`, `task`).
    pub query: BTreeMap<String, String>,
}

impl OciRef {
    pub fn member(&self) -> &str {
        self.member.as_deref().unwrap_or("file:tasks.yaml")
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.query.get(key).map(String::as_str), Some("true" | "1" | ""))
    }
}

/// A parsed workflow reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Uri {
    File(FileRef),
    Http(Url),
    Pkg(Purl),
    Oci(OciRef),
    Builtin(String),
}

impl Uri {
    /// Parse a raw reference string.
    ///
    /// Leading/trailing quotes are stripped first; shell completion scripts
    /// hand them to us verbatim.
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if raw.is_empty() {
            return Err(UriError::Empty);
        }

        match split_scheme(raw) {
            Some(("file", rest)) => Ok(Uri::File(parse_file_ref(rest))),
            Some(("http" | "https", _)) => {
                let url = Url::parse(raw).map_err(|source| UriError::InvalidUrl {
                    raw: raw.to_string(),
                    source,
                })?;
                Ok(Uri::Http(url))
            }
            Some(("pkg", rest)) => Ok(Uri::Pkg(Purl::parse(rest)?)),
            Some(("oci", rest)) => Ok(Uri::Oci(parse_oci_ref(rest))),
            Some(("builtin", rest)) => Ok(Uri::Builtin(rest.to_string())),
            Some((scheme, _)) => Err(UriError::UnsupportedScheme(scheme.to_string())),
            // No scheme: a bare path is a local file reference.
            None => Ok(Uri::File(parse_file_ref(raw))),
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            Uri::File(_) => "file",
            Uri::Http(url) => url.scheme(),
            Uri::Pkg(_) => "pkg",
            Uri::Oci(_) => "oci",
            Uri::Builtin(_) => "builtin",
        }
    }

    /// The task selected by this reference, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            Uri::File(f) => f.task.as_deref(),
            Uri::Http(url) => url
                .query()
                .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("task="))),
            Uri::Pkg(purl) => purl.qualifier("task"),
            Uri::Oci(oci) => oci.query.get("task").map(String::as_str),
            Uri::Builtin(_) => None,
        }
    }

    /// The cache identity: user info and query stripped, fragment kept.
    pub fn canonical(&self) -> String {
        match self {
            Uri::File(f) => format!("file:{}", f.path),
            Uri::Http(url) => {
                let mut url = url.clone();
                let _ = url.set_username("");
                let _ = url.set_password(None);
                url.set_query(None);
                url.to_string()
            }
            Uri::Pkg(purl) => purl.canonical().to_string(),
            Uri::Oci(oci) => {
                let mut stripped = oci.clone();
                stripped.query.clear();
                stripped.to_string()
            }
            Uri::Builtin(name) => format!("builtin:{name}"),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::File(file) => {
                write!(f, "file:{}", file.path)?;
                if let Some(task) = &file.task {
                    write!(f, "?task={task}")?;
                }
                Ok(())
            }
            Uri::Http(url) => write!(f, "{url}"),
            Uri::Pkg(purl) => write!(f, "{purl}"),
            Uri::Oci(oci) => write!(f, "{oci}"),
            Uri::Builtin(name) => write!(f, "builtin:{name}"),
        }
    }
}

impl fmt::Display for OciRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oci:{}", self.repository)?;
        if !self.query.is_empty() {
            let query = self
                .query
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={}", urlencoding::encode(v))
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            write!(f, "?{query}")?;
        }
        if let Some(member) = &self.member {
            write!(f, "#{member}")?;
        }
        Ok(())
    }
}

/// Split `scheme:rest`, returning `None` for schemeless references.
///
/// A single-letter prefix is left alone so Windows-style `C:` paths keep
/// parsing as file paths.
fn split_scheme(raw: &str) -> Option<(&str, &str)> {
    let idx = raw.find(':')?;
    let scheme = &raw[..idx];
    if scheme.len() < 2
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some((scheme, &raw[idx + 1..]))
}

fn parse_file_ref(rest: &str) -> FileRef {
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    let task = query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == "task").then(|| v.to_string())
        })
    });
    FileRef {
        path: path.to_string(),
        task,
    }
}

fn parse_oci_ref(rest: &str) -> OciRef {
    let mut rest = rest.trim_start_matches('/');
    let member = match rest.split_once('#') {
        Some((head, member)) => {
            rest = head;
            if member.is_empty() {
                None
            } else {
                Some(member.to_string())
            }
        }
        None => None,
    };
    let mut query = BTreeMap::new();
    if let Some((head, q)) = rest.split_once('?') {
        rest = head;
        for pair in q.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => {
                    query.insert(
                        k.to_ascii_lowercase(),
                        urlencoding::decode(v)
                            .map(|c| c.into_owned())
                            .unwrap_or_else(|_| v.to_string()),
                    );
                }
                None => {
                    query.insert(pair.to_ascii_lowercase(), String::new());
                }
            }
        }
    }
    OciRef {
        repository: rest.to_string(),
        member,
        query,
    }
}
