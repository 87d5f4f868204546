//! Store-wrapping fetcher
//!
//! Applies a [`FetchPolicy`](super::FetchPolicy) around a source fetcher
//! and the content-addressed store. After any write the bytes are re-read
//! from the store, so the store is always the canonical source of what the
//! caller receives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::Store;
use crate::uri::Uri;

use super::{FetchError, FetchPolicy, Fetcher};

pub struct CachedFetcher {
    source: Arc<dyn Fetcher>,
    store: Arc<Store>,
    policy: FetchPolicy,
}

impl CachedFetcher {
    pub fn new(source: Arc<dyn Fetcher>, store: Arc<Store>, policy: FetchPolicy) -> CachedFetcher {
        CachedFetcher {
            source,
            store,
            policy,
        }
    }

    async fn fetch_and_store(
        &self,
        cancel: &CancellationToken,
        uri: &Uri,
    ) -> Result<Vec<u8>, FetchError> {
        // Source errors surface before any store mutation.
        let bytes = self.source.fetch(cancel, uri).await?;
        self.store.store(&bytes, uri)?;
        Ok(self.store.fetch(uri)?)
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        match self.policy {
            FetchPolicy::Never => Ok(self.store.fetch(uri)?),

            FetchPolicy::Always => self.fetch_and_store(cancel, uri).await,

            FetchPolicy::IfNotPresent => match self.store.exists(uri) {
                Ok(true) => {
                    debug!(uri = %uri, "serving from store");
                    Ok(self.store.fetch(uri)?)
                }
                Ok(false) => self.fetch_and_store(cancel, uri).await,
                // A corrupt entry counts as a miss; the re-fetch overwrites
                // it rather than failing the caller.
                Err(err) => {
                    warn!(uri = %uri, error = %err, "store entry invalid, refetching");
                    self.fetch_and_store(cancel, uri).await
                }
            },
        }
    }
}
