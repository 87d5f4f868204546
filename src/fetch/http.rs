//! Raw HTTP(S) document fetcher

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::uri::Uri;

use super::{FetchError, Fetcher};

/// Fetches a workflow document with a plain GET. Any non-200 response is an
/// error carrying the status.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> HttpFetcher {
        HttpFetcher { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        let Uri::Http(url) = uri else {
            return Err(FetchError::WrongFetcher {
                fetcher: "http",
                uri: uri.to_string(),
            });
        };

        let request = get_bytes(&self.client, url.clone());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result,
        }
    }
}

pub(super) async fn get_bytes(
    client: &reqwest::Client,
    url: url::Url,
) -> Result<Vec<u8>, FetchError> {
    let display = url.to_string();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: display.clone(),
            source,
        })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FetchError::Status {
            url: display,
            status: status.as_u16(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| FetchError::Request {
            url: display,
            source,
        })?;
    Ok(bytes.to_vec())
}
