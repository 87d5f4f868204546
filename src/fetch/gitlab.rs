//! GitLab raw-file fetcher
//!
//! Serves `pkg:gitlab/...` references through the v4 repository files API:
//! `{base}/api/v4/projects/{ns%2Fname}/repository/files/{subpath}/raw?ref={version}`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::uri::Uri;

use super::github::resolve_token;
use super::{FetchError, Fetcher};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const DEFAULT_TOKEN_ENV: &str = "GITLAB_TOKEN";

pub struct GitlabFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitlabFetcher {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<&str>,
        token_env: Option<&str>,
    ) -> Result<GitlabFetcher, FetchError> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let token = resolve_token(token_env, DEFAULT_TOKEN_ENV)?;
        Ok(GitlabFetcher {
            client,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl Fetcher for GitlabFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        let Uri::Pkg(purl) = uri else {
            return Err(FetchError::WrongFetcher {
                fetcher: "gitlab",
                uri: uri.to_string(),
            });
        };
        if purl.ptype != "gitlab" {
            return Err(FetchError::WrongFetcher {
                fetcher: "gitlab",
                uri: uri.to_string(),
            });
        }

        // Project path and file path are single URL-encoded path segments.
        let project = match &purl.namespace {
            Some(ns) => format!("{ns}/{}", purl.name),
            None => purl.name.clone(),
        };
        let url = format!(
            "{base}/api/v4/projects/{project}/repository/files/{file}/raw?ref={version}",
            base = self.base_url,
            project = urlencoding::encode(&project),
            file = urlencoding::encode(purl.subpath()),
            version = urlencoding::encode(purl.version()),
        );

        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert("PRIVATE-TOKEN", value);
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
