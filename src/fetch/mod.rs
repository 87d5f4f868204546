//! # Fetcher service
//!
//! One backend per URI scheme, a policy-driven store wrapper, and a
//! per-process service that picks the right fetcher for each reference:
//!
//! | Scheme | Backend |
//! |--------|---------|
//! | `file` (or none) | [`LocalFetcher`], never store-cached |
//! | `http` / `https` | [`HttpFetcher`] |
//! | `pkg` (`github`) | [`GithubFetcher`] |
//! | `pkg` (`gitlab`) | [`GitlabFetcher`] |
//! | `oci` | [`OciFetcher`] |
//! | `builtin` | handled by the orchestrator, never enters the service |
//!
//! Fetcher objects are cached per URI string in a concurrent map; the
//! cancellation token passed into [`Fetcher::fetch`] aborts in-flight I/O.

mod cached;
mod github;
mod gitlab;
mod http;
mod local;
mod oci;

pub use cached::CachedFetcher;
pub use github::GithubFetcher;
pub use gitlab::GitlabFetcher;
pub use http::HttpFetcher;
pub use local::LocalFetcher;
pub use oci::OciFetcher;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::{Store, StoreError};
use crate::uri::Uri;

/// User agent sent by every HTTP-backed fetcher.
pub const USER_AGENT: &str = "weft";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no fetcher for scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("{fetcher} fetcher cannot serve '{uri}'")]
    WrongFetcher { fetcher: &'static str, uri: String },

    #[error("'{0}' is a directory, not a workflow file")]
    IsADirectory(String),

    #[error("I/O error reading '{uri}': {source}")]
    Io {
        uri: String,
        source: std::io::Error,
    },

    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("token environment variable '{0}' is not set")]
    MissingToken(String),

    #[error("no layer titled '{member}' in '{reference}'")]
    LayerNotFound { member: String, reference: String },

    #[error("malformed OCI manifest for '{reference}': {reason}")]
    Manifest { reference: String, reason: String },

    #[error("fetch cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fetch policy 'never' requires a store")]
    NeverWithoutStore,

    #[error("unknown fetch policy '{0}' (expected always, if-not-present, never)")]
    UnknownPolicy(String),
}

/// A backend that produces workflow bytes for a URI.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError>;
}

// ============================================================================
// POLICY
// ============================================================================

/// Governs how fetchers interact with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Always hit the backend; write-through when a store is attached.
    Always,
    /// Serve valid store entries; fetch and store otherwise.
    #[default]
    IfNotPresent,
    /// Serve exclusively from the store.
    Never,
}

impl FromStr for FetchPolicy {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(FetchPolicy::Always),
            "if-not-present" => Ok(FetchPolicy::IfNotPresent),
            "never" => Ok(FetchPolicy::Never),
            other => Err(FetchError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPolicy::Always => write!(f, "always"),
            FetchPolicy::IfNotPresent => write!(f, "if-not-present"),
            FetchPolicy::Never => write!(f, "never"),
        }
    }
}

impl<'de> serde::Deserialize<'de> for FetchPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for FetchPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Per-process fetcher selection and caching.
///
/// Created once per invocation; outlives every orchestrator call within it.
pub struct FetcherService {
    store: Option<Arc<Store>>,
    policy: FetchPolicy,
    client: reqwest::Client,
    fetchers: DashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherService {
    pub fn new(store: Option<Arc<Store>>, policy: FetchPolicy) -> Result<FetcherService, FetchError> {
        if policy == FetchPolicy::Never && store.is_none() {
            return Err(FetchError::NeverWithoutStore);
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("default TLS backend");
        Ok(FetcherService {
            store,
            policy,
            client,
            fetchers: DashMap::new(),
        })
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn store(&self) -> Option<&Arc<Store>> {
        self.store.as_ref()
    }

    /// Fetch the bytes behind `uri`, honoring the cache policy.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        uri: &Uri,
    ) -> Result<Vec<u8>, FetchError> {
        let fetcher = self.fetcher_for(uri)?;
        fetcher.fetch(cancel, uri).await
    }

    /// Select (and memoize) the fetcher for a URI.
    fn fetcher_for(&self, uri: &Uri) -> Result<Arc<dyn Fetcher>, FetchError> {
        let key = uri.to_string();
        if let Some(hit) = self.fetchers.get(&key) {
            return Ok(hit.clone());
        }

        let backend: Arc<dyn Fetcher> = match uri {
            // Local reads are never store-cached.
            Uri::File(_) => {
                let fetcher: Arc<dyn Fetcher> = Arc::new(LocalFetcher::new());
                self.fetchers.insert(key, fetcher.clone());
                return Ok(fetcher);
            }
            Uri::Http(_) => Arc::new(HttpFetcher::new(self.client.clone())),
            Uri::Pkg(purl) => match purl.ptype.as_str() {
                "github" => Arc::new(GithubFetcher::new(
                    self.client.clone(),
                    purl.qualifier("base-url"),
                    purl.qualifier("token-from-env"),
                )?),
                "gitlab" => Arc::new(GitlabFetcher::new(
                    self.client.clone(),
                    purl.qualifier("base-url"),
                    purl.qualifier("token-from-env"),
                )?),
                other => return Err(FetchError::UnsupportedScheme(format!("pkg:{other}"))),
            },
            Uri::Oci(oci) => Arc::new(OciFetcher::new(
                oci.flag("plain-http"),
                oci.flag("insecure-skip-tls-verify"),
            )),
            Uri::Builtin(name) => {
                return Err(FetchError::UnsupportedScheme(format!("builtin:{name}")))
            }
        };

        let fetcher: Arc<dyn Fetcher> = match &self.store {
            Some(store) => Arc::new(CachedFetcher::new(backend, store.clone(), self.policy)),
            None => backend,
        };
        self.fetchers.insert(key, fetcher.clone());
        Ok(fetcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("always".parse::<FetchPolicy>().unwrap(), FetchPolicy::Always);
        assert_eq!(
            "if-not-present".parse::<FetchPolicy>().unwrap(),
            FetchPolicy::IfNotPresent
        );
        assert_eq!("never".parse::<FetchPolicy>().unwrap(), FetchPolicy::Never);
        assert!(matches!(
            "sometimes".parse::<FetchPolicy>(),
            Err(FetchError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn test_never_requires_store() {
        assert!(matches!(
            FetcherService::new(None, FetchPolicy::Never),
            Err(FetchError::NeverWithoutStore)
        ));
        assert!(FetcherService::new(None, FetchPolicy::IfNotPresent).is_ok());
    }

    #[test]
    fn test_builtin_never_enters_service() {
        let service = FetcherService::new(None, FetchPolicy::Always).unwrap();
        let uri = Uri::parse("builtin:echo").unwrap();
        assert!(matches!(
            service.fetcher_for(&uri),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_unknown_pkg_type() {
        let service = FetcherService::new(None, FetchPolicy::Always).unwrap();
        let uri = Uri::parse("pkg:bitbucket/o/r").unwrap();
        assert!(matches!(
            service.fetcher_for(&uri),
            Err(FetchError::UnsupportedScheme(s)) if s == "pkg:bitbucket"
        ));
    }

    #[test]
    fn test_fetcher_objects_are_memoized() {
        let service = FetcherService::new(None, FetchPolicy::Always).unwrap();
        let uri = Uri::parse("https://example.com/wf.yaml").unwrap();
        let a = service.fetcher_for(&uri).unwrap();
        let b = service.fetcher_for(&uri).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
