//! OCI artifact fetcher
//!
//! Pulls a single workflow member out of an OCI artifact. The artifact is a
//! standard image manifest whose layers are individual workflow files, each
//! annotated with `org.opencontainers.image.title` = `file:<name>`.
//!
//! The registry protocol is the distribution v2 pull flow: resolve the
//! manifest for the tag, pick the layer whose title matches the member
//! fragment, fetch its blob. Anonymous Bearer-token challenges are honored;
//! static credentials are discovered from `~/.docker/config.json`.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::uri::{OciRef, Uri};

use super::{FetchError, Fetcher, USER_AGENT};

const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

pub struct OciFetcher {
    client: reqwest::Client,
    plain_http: bool,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<LayerDescriptor>,
    /// Present when the reference resolves to an image index instead.
    #[serde(default)]
    manifests: Vec<LayerDescriptor>,
}

#[derive(Debug, Deserialize)]
struct LayerDescriptor {
    digest: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl OciFetcher {
    pub fn new(plain_http: bool, insecure_skip_tls_verify: bool) -> OciFetcher {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .expect("default TLS backend");
        OciFetcher { client, plain_http }
    }

    fn scheme(&self) -> &'static str {
        if self.plain_http {
            "http"
        } else {
            "https"
        }
    }

    async fn pull(&self, oci: &OciRef) -> Result<Vec<u8>, FetchError> {
        let reference = oci.repository.clone();
        let (registry, repo, tag) = split_reference(&reference).ok_or_else(|| {
            FetchError::Manifest {
                reference: reference.clone(),
                reason: "expected <registry>/<repository>:<tag>".to_string(),
            }
        })?;

        let token = self.authenticate(&registry, &repo).await?;

        let manifest_url = format!(
            "{}://{registry}/v2/{repo}/manifests/{tag}",
            self.scheme()
        );
        let mut manifest: Manifest = self
            .get_json(&manifest_url, MANIFEST_ACCEPT, token.as_deref())
            .await?;

        // An index points at per-platform manifests; workflow artifacts
        // carry a single one.
        if manifest.layers.is_empty() && !manifest.manifests.is_empty() {
            let digest = manifest.manifests.remove(0).digest;
            let url = format!("{}://{registry}/v2/{repo}/manifests/{digest}", self.scheme());
            manifest = self
                .get_json(&url, MANIFEST_ACCEPT, token.as_deref())
                .await?;
        }

        let member = oci.member();
        let layer = manifest
            .layers
            .into_iter()
            .find(|layer| layer.annotations.get(TITLE_ANNOTATION).map(String::as_str) == Some(member))
            .ok_or_else(|| FetchError::LayerNotFound {
                member: member.to_string(),
                reference: reference.clone(),
            })?;

        debug!(%reference, member, digest = %layer.digest, "resolved OCI layer");

        let blob_url = format!(
            "{}://{registry}/v2/{repo}/blobs/{digest}",
            self.scheme(),
            digest = layer.digest
        );
        self.get_bytes(&blob_url, token.as_deref()).await
    }

    /// Probe the registry and run the Bearer-token flow if challenged.
    async fn authenticate(
        &self,
        registry: &str,
        repo: &str,
    ) -> Result<Option<String>, FetchError> {
        let probe_url = format!("{}://{registry}/v2/", self.scheme());
        let response = self
            .client
            .get(&probe_url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: probe_url.clone(),
                source,
            })?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let challenge = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .map(parse_bearer_challenge)
            .unwrap_or_default();
        let Some(realm) = challenge.get("realm") else {
            return Ok(None);
        };

        let mut token_request = self.client.get(realm.as_str()).query(&[
            ("scope", format!("repository:{repo}:pull")),
        ]);
        if let Some(service) = challenge.get("service") {
            token_request = token_request.query(&[("service", service.as_str())]);
        }
        if let Some((user, pass)) = docker_credentials(registry) {
            token_request = token_request.basic_auth(user, Some(pass));
        }

        let response = token_request
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: realm.clone(),
                source,
            })?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                url: realm.clone(),
                status: response.status().as_u16(),
            });
        }
        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|source| FetchError::Request {
                    url: realm.clone(),
                    source,
                })?;
        Ok(token.token.or(token.access_token))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        accept: &str,
        token: Option<&str>,
    ) -> Result<T, FetchError> {
        let bytes = self.request(url, Some(accept), token).await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Manifest {
            reference: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_bytes(&self, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
        self.request(url, None, token).await
    }

    async fn request(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Fetcher for OciFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        let Uri::Oci(oci) = uri else {
            return Err(FetchError::WrongFetcher {
                fetcher: "oci",
                uri: uri.to_string(),
            });
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.pull(oci) => result,
        }
    }
}

/// Split `registry/repo/path:tag`; the tag defaults to `latest`.
fn split_reference(reference: &str) -> Option<(String, String, String)> {
    let (registry, rest) = reference.split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    // A colon after the last slash is the tag separator; earlier colons
    // belong to the registry port.
    let (repo, tag) = match rest.rfind(':') {
        Some(idx) if idx > rest.rfind('/').unwrap_or(0) => {
            (&rest[..idx], rest[idx + 1..].to_string())
        }
        _ => (rest, "latest".to_string()),
    };
    if repo.is_empty() || tag.is_empty() {
        return None;
    }
    Some((registry.to_string(), repo.to_string(), tag))
}

/// Parse `Bearer realm="…",service="…"` into its key/value pairs.
fn parse_bearer_challenge(header: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let Some(rest) = header.strip_prefix("Bearer ") else {
        return fields;
    };
    for part in rest.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            fields.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    fields
}

/// Static credential discovery from the standard Docker config file.
fn docker_credentials(registry: &str) -> Option<(String, String)> {
    #[derive(Deserialize)]
    struct DockerConfig {
        #[serde(default)]
        auths: HashMap<String, DockerAuth>,
    }
    #[derive(Deserialize)]
    struct DockerAuth {
        #[serde(default)]
        auth: Option<String>,
    }

    let path = dirs::home_dir()?.join(".docker").join("config.json");
    let config: DockerConfig = serde_json::from_slice(&std::fs::read(path).ok()?).ok()?;
    let auth = config.auths.get(registry)?.auth.as_ref()?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(auth).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
