//! GitHub raw-file fetcher
//!
//! A very small client over the contents API; intentionally nothing like a
//! full API binding. Serves `pkg:github/...` references by mapping
//! namespace/name/subpath/version onto
//! `{base}/repos/{ns}/{name}/contents/{subpath}?ref={version}` with the raw
//! media type.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tokio_util::sync::CancellationToken;

use crate::uri::Uri;

use super::{FetchError, Fetcher};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

pub struct GithubFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubFetcher {
    /// A non-default `token_env` that is unset is a construction error; the
    /// default env being unset just means anonymous access.
    pub fn new(
        client: reqwest::Client,
        base_url: Option<&str>,
        token_env: Option<&str>,
    ) -> Result<GithubFetcher, FetchError> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let token = resolve_token(token_env, DEFAULT_TOKEN_ENV)?;
        Ok(GithubFetcher {
            client,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        let Uri::Pkg(purl) = uri else {
            return Err(FetchError::WrongFetcher {
                fetcher: "github",
                uri: uri.to_string(),
            });
        };
        if purl.ptype != "github" {
            return Err(FetchError::WrongFetcher {
                fetcher: "github",
                uri: uri.to_string(),
            });
        }

        let namespace = purl.namespace.as_deref().unwrap_or_default();
        let url = format!(
            "{base}/repos/{namespace}/{name}/contents/{subpath}?ref={version}",
            base = self.base_url,
            name = purl.name,
            subpath = purl.subpath(),
            version = urlencoding::encode(purl.version()),
        );

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.raw+json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let request = async {
            let response = self
                .client
                .get(&url)
                .headers(headers)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.clone(),
                    source,
                })?;
            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Err(FetchError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|source| FetchError::Request {
                    url: url.clone(),
                    source,
                })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result,
        }
    }
}

/// Resolve the credential for a forge fetcher from the environment.
pub(super) fn resolve_token(
    token_env: Option<&str>,
    default_env: &str,
) -> Result<Option<String>, FetchError> {
    match token_env {
        Some(env) if env != default_env => match std::env::var(env) {
            Ok(token) => Ok(Some(token)),
            Err(_) => Err(FetchError::MissingToken(env.to_string())),
        },
        _ => Ok(std::env::var(default_env).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_token_env_must_be_set() {
        std::env::remove_var("WEFT_TEST_UNSET_TOKEN");
        let client = reqwest::Client::new();
        assert!(matches!(
            GithubFetcher::new(client, None, Some("WEFT_TEST_UNSET_TOKEN")),
            Err(FetchError::MissingToken(env)) if env == "WEFT_TEST_UNSET_TOKEN"
        ));
    }

    #[test]
    fn test_default_token_env_may_be_unset() {
        let client = reqwest::Client::new();
        let fetcher = GithubFetcher::new(client, Some("https://gh.example/"), None).unwrap();
        // Trailing slash is normalized away.
        assert_eq!(fetcher.base_url, "https://gh.example");
    }

    #[tokio::test]
    async fn test_wrong_purl_type_rejected() {
        let fetcher = GithubFetcher::new(reqwest::Client::new(), None, None).unwrap();
        let uri = Uri::parse("pkg:gitlab/o/r").unwrap();
        assert!(matches!(
            fetcher.fetch(&CancellationToken::new(), &uri).await,
            Err(FetchError::WrongFetcher { fetcher: "github", .. })
        ));
    }
}
