//! Local filesystem fetcher

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::uri::Uri;

use super::{FetchError, Fetcher};

/// Reads workflow files off the local filesystem. Only serves `file` (or
/// schemeless) references; directories are rejected with a typed error.
#[derive(Debug, Default)]
pub struct LocalFetcher {}

impl LocalFetcher {
    pub fn new() -> LocalFetcher {
        LocalFetcher {}
    }
}

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uri: &Uri) -> Result<Vec<u8>, FetchError> {
        let Uri::File(file) = uri else {
            return Err(FetchError::WrongFetcher {
                fetcher: "local",
                uri: uri.to_string(),
            });
        };

        let path = file.path.clone();
        let read = async {
            let meta = tokio::fs::metadata(&path).await.map_err(|source| {
                FetchError::Io {
                    uri: uri.to_string(),
                    source,
                }
            })?;
            if meta.is_dir() {
                return Err(FetchError::IsADirectory(path.clone()));
            }
            tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                uri: uri.to_string(),
                source,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = read => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        std::fs::write(&path, b"schema-version: v1").unwrap();

        let fetcher = LocalFetcher::new();
        let uri = Uri::parse(&format!("file:{}", path.display())).unwrap();
        let bytes = fetcher.fetch(&CancellationToken::new(), &uri).await.unwrap();
        assert_eq!(bytes, b"schema-version: v1");
    }

    #[tokio::test]
    async fn test_fetch_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = LocalFetcher::new();
        let uri = Uri::parse(&format!("file:{}", dir.path().display())).unwrap();
        assert!(matches!(
            fetcher.fetch(&CancellationToken::new(), &uri).await,
            Err(FetchError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_wrong_scheme() {
        let fetcher = LocalFetcher::new();
        let uri = Uri::parse("https://example.com/x").unwrap();
        assert!(matches!(
            fetcher.fetch(&CancellationToken::new(), &uri).await,
            Err(FetchError::WrongFetcher { fetcher: "local", .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_cancelled() {
        let fetcher = LocalFetcher::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let uri = Uri::parse("file:does-not-matter.yaml").unwrap();
        assert!(matches!(
            fetcher.fetch(&cancel, &uri).await,
            Err(FetchError::Cancelled)
        ));
    }
}
