//! Package URL (purl) encoding for `pkg:` references
//!
//! A purl is `pkg:<type>/<namespace>/<name>@<version>?<qualifiers>#<subpath>`.
//! Weft uses the type position for the forge kind (`github`, `gitlab`) or an
//! alias name, the namespace/name pair for owner/repo, the version for a git
//! ref, and the subpath for the workflow file inside the repository.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Default git ref when a purl omits `@version`.
pub const DEFAULT_VERSION: &str = "main";

/// Default workflow file when a purl omits the subpath.
pub const DEFAULT_SUBPATH: &str = "tasks.yaml";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurlError {
    #[error("malformed purl '{0}': missing type")]
    MissingType(String),

    #[error("malformed purl '{0}': missing name")]
    MissingName(String),

    #[error("malformed purl '{0}': empty qualifier key")]
    EmptyQualifierKey(String),
}

/// A parsed package URL.
///
/// Qualifiers are kept sorted so `to_string` is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purl {
    pub ptype: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub qualifiers: BTreeMap<String, String>,
    pub subpath: Option<String>,
}

impl Purl {
    /// Parse the part after the `pkg:` scheme.
    pub fn parse(raw: &str) -> Result<Self, PurlError> {
        let original = format!("pkg:{raw}");
        // Leading slashes after the scheme are tolerated (`pkg://github/...`).
        let mut rest = raw.trim_start_matches('/');

        let subpath = match rest.split_once('#') {
            Some((head, sub)) => {
                rest = head;
                let sub = sub.trim_matches('/');
                if sub.is_empty() {
                    None
                } else {
                    Some(decode(sub))
                }
            }
            None => None,
        };

        let mut qualifiers = BTreeMap::new();
        if let Some((head, query)) = rest.split_once('?') {
            rest = head;
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                if k.is_empty() {
                    return Err(PurlError::EmptyQualifierKey(original));
                }
                qualifiers.insert(k.to_ascii_lowercase(), decode(v));
            }
        }

        let version = match rest.rsplit_once('@') {
            Some((head, ver)) => {
                rest = head;
                if ver.is_empty() {
                    None
                } else {
                    Some(decode(ver))
                }
            }
            None => None,
        };

        let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(PurlError::MissingType(original));
        }
        let ptype = segments.remove(0).to_ascii_lowercase();
        let name = match segments.pop() {
            Some(name) => decode(name),
            None => return Err(PurlError::MissingName(original)),
        };
        let namespace = if segments.is_empty() {
            None
        } else {
            Some(
                segments
                    .iter()
                    .map(|s| decode(s))
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        };

        Ok(Purl {
            ptype,
            namespace,
            name,
            version,
            qualifiers,
            subpath,
        })
    }

    /// Apply the weft defaults: version `main`, subpath `tasks.yaml`.
    pub fn normalize(mut self) -> Self {
        if self.version.as_deref().unwrap_or("").is_empty() {
            self.version = Some(DEFAULT_VERSION.to_string());
        }
        if self.subpath.as_deref().unwrap_or("").is_empty() {
            self.subpath = Some(DEFAULT_SUBPATH.to_string());
        }
        self
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    pub fn subpath(&self) -> &str {
        self.subpath.as_deref().unwrap_or(DEFAULT_SUBPATH)
    }

    pub fn qualifier(&self, key: &str) -> Option<&str> {
        self.qualifiers.get(key).map(String::as_str)
    }

    /// Insert a qualifier only when the key is not already present.
    pub fn merge_qualifier(&mut self, key: &str, value: &str) -> bool {
        if self.qualifiers.contains_key(key) {
            return false;
        }
        self.qualifiers.insert(key.to_string(), value.to_string());
        true
    }

    /// The purl without qualifiers, used as the cache identity.
    pub fn canonical(&self) -> Purl {
        Purl {
            qualifiers: BTreeMap::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Purl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}", self.ptype)?;
        if let Some(ns) = &self.namespace {
            for segment in ns.split('/') {
                write!(f, "/{}", encode(segment))?;
            }
        }
        write!(f, "/{}", encode(&self.name))?;
        if let Some(version) = &self.version {
            write!(f, "@{}", encode(version))?;
        }
        if !self.qualifiers.is_empty() {
            let query = self
                .qualifiers
                .iter()
                .map(|(k, v)| format!("{k}={}", encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            write!(f, "?{query}")?;
        }
        if let Some(subpath) = &self.subpath {
            let encoded = subpath
                .split('/')
                .map(encode)
                .collect::<Vec<_>>()
                .join("/");
            write!(f, "#{encoded}")?;
        }
        Ok(())
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let purl = Purl::parse("github/acme/flows@v1.2?base-url=https%3A%2F%2Fgh.example#sub/tasks.yaml").unwrap();
        assert_eq!(purl.ptype, "github");
        assert_eq!(purl.namespace.as_deref(), Some("acme"));
        assert_eq!(purl.name, "flows");
        assert_eq!(purl.version.as_deref(), Some("v1.2"));
        assert_eq!(purl.qualifier("base-url"), Some("https://gh.example"));
        assert_eq!(purl.subpath.as_deref(), Some("sub/tasks.yaml"));
    }

    #[test]
    fn test_parse_minimal() {
        let purl = Purl::parse("github/owner/repo").unwrap();
        assert_eq!(purl.version, None);
        assert_eq!(purl.subpath, None);
        let purl = purl.normalize();
        assert_eq!(purl.version(), "main");
        assert_eq!(purl.subpath(), "tasks.yaml");
    }

    #[test]
    fn test_parse_multi_segment_namespace() {
        let purl = Purl::parse("gitlab/group/subgroup/repo@main").unwrap();
        assert_eq!(purl.namespace.as_deref(), Some("group/subgroup"));
        assert_eq!(purl.name, "repo");
    }

    #[test]
    fn test_parse_missing_name() {
        assert!(matches!(
            Purl::parse("github"),
            Err(PurlError::MissingName(_))
        ));
        assert!(matches!(Purl::parse(""), Err(PurlError::MissingType(_))));
    }

    #[test]
    fn test_display_round_trip() {
        let raw = "github/owner/repo@main?base-url=https%3A%2F%2Fapi.github.com&token-from-env=GITHUB_TOKEN#f.yaml";
        let purl = Purl::parse(raw).unwrap();
        assert_eq!(purl.to_string(), format!("pkg:{raw}"));
        let again = Purl::parse(purl.to_string().strip_prefix("pkg:").unwrap()).unwrap();
        assert_eq!(purl, again);
    }

    #[test]
    fn test_qualifier_merge_does_not_override() {
        let mut purl = Purl::parse("github/o/r?base-url=custom").unwrap();
        assert!(!purl.merge_qualifier("base-url", "other"));
        assert_eq!(purl.qualifier("base-url"), Some("custom"));
        assert!(purl.merge_qualifier("token-from-env", "TOKEN"));
    }

    #[test]
    fn test_canonical_strips_qualifiers() {
        let purl = Purl::parse("github/o/r@v1?task=build#f.yaml").unwrap();
        let canonical = purl.canonical();
        assert!(canonical.qualifiers.is_empty());
        assert_eq!(canonical.subpath.as_deref(), Some("f.yaml"));
    }
}
