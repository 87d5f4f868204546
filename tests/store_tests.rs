//! # Store integration tests
//!
//! The content-addressed store against a real directory: round-trips,
//! digest verification, index format, corruption recovery through the
//! policy wrapper.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use weft::store::{Store, StoreError, INDEX_FILE};
use weft::uri::Uri;

fn uri(raw: &str) -> Uri {
    Uri::parse(raw).unwrap()
}

// ============================================================================
// ROUND TRIPS AND DIGESTS
// ============================================================================

#[test]
fn test_store_then_exists_then_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let u = uri("pkg:github/owner/repo@v1#tasks.yaml");
    let body = b"schema-version: v1\ntasks: {}\n";

    store.store(body, &u).unwrap();
    assert!(store.exists(&u).unwrap());
    assert_eq!(store.fetch(&u).unwrap(), body);
}

#[test]
fn test_index_hex_matches_recomputed_sha256() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let body = b"some workflow bytes";
    let u = uri("https://example.com/wf.yaml");

    let descriptor = store.store(body, &u).unwrap();
    assert_eq!(descriptor.hex, hex::encode(Sha256::digest(body)));
    assert_eq!(descriptor.size, body.len() as u64);

    // And the blob on disk matches its own name.
    let blob = std::fs::read(dir.path().join(&descriptor.hex)).unwrap();
    assert_eq!(hex::encode(Sha256::digest(&blob)), descriptor.hex);
}

#[test]
fn test_index_is_sorted_and_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.store(b"z", &uri("pkg:github/z/z@v1#tasks.yaml")).unwrap();
        store.store(b"a", &uri("file:a.yaml")).unwrap();
        store.store(b"m", &uri("https://m.example/wf.yaml")).unwrap();
    }

    let text = std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
    let uris: Vec<&str> = text
        .lines()
        .map(|l| l.split_whitespace().next().unwrap())
        .collect();
    let mut sorted = uris.clone();
    sorted.sort();
    assert_eq!(uris, sorted);

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.list().len(), 3);
    assert_eq!(store.fetch(&uri("file:a.yaml")).unwrap(), b"a");
}

#[test]
fn test_query_never_affects_cache_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    store
        .store(b"wf", &uri("pkg:github/o/r@v1?task=build&token-from-env=T#f.yaml"))
        .unwrap();
    assert!(store
        .exists(&uri("pkg:github/o/r@v1?task=test#f.yaml"))
        .unwrap());
    assert_eq!(store.list().len(), 1);
    assert_eq!(store.list()[0].0, "pkg:github/o/r@v1#f.yaml");
}

// ============================================================================
// CORRUPTION
// ============================================================================

#[test]
fn test_truncated_blob_is_typed_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let u = uri("https://example.com/wf.yaml");
    let descriptor = store.store(b"twelve bytes", &u).unwrap();

    std::fs::write(dir.path().join(&descriptor.hex), b"8 bytes!").unwrap();
    let err = store.exists(&u).unwrap_err();
    assert!(matches!(err, StoreError::SizeMismatch { expected: 12, got: 8 }));
    assert_eq!(err.to_string(), "size mismatch, expected 12, got 8");
}

#[test]
fn test_malformed_index_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(INDEX_FILE), "one two\n").unwrap();
    assert!(matches!(
        Store::open(dir.path()),
        Err(StoreError::MalformedIndex { .. })
    ));
}

// ============================================================================
// POLICY WRAPPER END TO END
// ============================================================================

mod policy {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;
    use weft::fetch::{CachedFetcher, FetchError, FetchPolicy, Fetcher};

    struct Backend {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Backend {
        async fn fetch(&self, _: &CancellationToken, _: &Uri) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    /// The remote-cache-hit scenario: first fetch hits the backend and
    /// stores, second is served from the store with identical bytes.
    #[tokio::test]
    async fn test_remote_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let body = b"schema-version: v1\ntasks: {}\n".to_vec();
        let backend = Arc::new(Backend {
            bytes: body.clone(),
            calls: AtomicUsize::new(0),
        });
        let cached =
            CachedFetcher::new(backend.clone(), store.clone(), FetchPolicy::IfNotPresent);

        let u = uri("pkg:github/owner/repo@v1#tasks.yaml");
        let cancel = CancellationToken::new();

        let first = cached.fetch(&cancel, &u).await.unwrap();
        assert_eq!(first, body);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let second = cached.fetch(&cancel, &u).await.unwrap();
        assert_eq!(second, body);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.hex, hex::encode(Sha256::digest(&body)));
    }

    /// The corruption-recovery scenario: a truncated blob is refetched,
    /// overwritten, and the index reflects the new digest.
    #[tokio::test]
    async fn test_corruption_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let body = b"twelve bytes".to_vec();
        let backend = Arc::new(Backend {
            bytes: body.clone(),
            calls: AtomicUsize::new(0),
        });
        let cached =
            CachedFetcher::new(backend.clone(), store.clone(), FetchPolicy::IfNotPresent);

        let u = uri("https://example.com/wf.yaml");
        let descriptor = store.store(&body, &u).unwrap();
        std::fs::write(dir.path().join(&descriptor.hex), b"8 bytes!").unwrap();
        assert_eq!(
            store.exists(&u).unwrap_err().to_string(),
            "size mismatch, expected 12, got 8"
        );

        let bytes = cached.fetch(&CancellationToken::new(), &u).await.unwrap();
        assert_eq!(bytes, body);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(store.exists(&u).unwrap());
        assert_eq!(store.list()[0].1.hex, hex::encode(Sha256::digest(&body)));
    }
}
