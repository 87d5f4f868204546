//! `builtin:fetch`

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::runner::parse_duration;

use super::{Builtin, BuiltinError, Outputs};

/// Performs an HTTP request and returns the body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fetch {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-call client timeout, e.g. `30s`.
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub(super) fn construct(config: serde_json::Value) -> Result<Box<dyn Builtin>, BuiltinError> {
    let fetch: Fetch = serde_json::from_value(config)?;
    Ok(Box::new(fetch))
}

impl Fetch {
    async fn request(&self) -> Result<Outputs, BuiltinError> {
        let mut builder = reqwest::Client::builder().user_agent(crate::fetch::USER_AGENT);
        if let Some(timeout) = &self.timeout {
            let duration = parse_duration(timeout)
                .ok_or_else(|| BuiltinError::InvalidTimeout(timeout.clone()))?;
            builder = builder.timeout(duration);
        }
        let client = builder.build().map_err(|source| BuiltinError::Request {
            url: self.url.clone(),
            source,
        })?;

        let method: reqwest::Method = self
            .method
            .to_ascii_uppercase()
            .parse()
            .unwrap_or(reqwest::Method::GET);
        let mut request = client.request(method, &self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|source| BuiltinError::Request {
            url: self.url.clone(),
            source,
        })?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(BuiltinError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| BuiltinError::Request {
                url: self.url.clone(),
                source,
            })?;
        if body.is_empty() {
            return Err(BuiltinError::Partial(self.url.clone()));
        }

        let mut outputs = Outputs::new();
        outputs.insert("body".to_string(), serde_json::Value::String(body));
        Ok(outputs)
    }
}

#[async_trait]
impl Builtin for Fetch {
    async fn execute(&self, cancel: &CancellationToken) -> Result<Outputs, BuiltinError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuiltinError::Cancelled),
            result = self.request() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let fetch: Fetch = serde_json::from_value(serde_json::json!({
            "url": "https://example.com"
        }))
        .unwrap();
        assert_eq!(fetch.method, "GET");
        assert!(fetch.headers.is_empty());
        assert!(fetch.timeout.is_none());
    }

    #[test]
    fn test_config_requires_url() {
        assert!(construct(serde_json::json!({"method": "POST"})).is_err());
    }

    #[test]
    fn test_config_full() {
        let fetch: Fetch = serde_json::from_value(serde_json::json!({
            "url": "https://example.com/data",
            "method": "post",
            "headers": {"Accept": "application/json"},
            "timeout": "5s"
        }))
        .unwrap();
        assert_eq!(fetch.method, "post");
        assert_eq!(fetch.headers["Accept"], "application/json");
        assert_eq!(fetch.timeout.as_deref(), Some("5s"));
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_error() {
        let fetch = Fetch {
            url: "https://example.com".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            timeout: Some("soon".to_string()),
        };
        assert!(matches!(
            fetch.execute(&CancellationToken::new()).await,
            Err(BuiltinError::InvalidTimeout(_))
        ));
    }
}
