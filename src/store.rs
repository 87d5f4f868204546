//! # Content-addressed workflow store
//!
//! A single directory holding `index.txt` plus one blob per entry, named by
//! the lowercase SHA-256 hex of its contents. The index maps canonical URIs
//! to descriptors, one per line:
//!
//! ```text
//! <uri> h1:<64-lower-hex> <size>\n
//! ```
//!
//! Lines are sorted lexicographically by URI and the file is rewritten
//! whole on every store, so readers never observe a partial index. Blobs
//! are written before the index entry referencing them; an interrupted
//! store leaves an orphan blob for [`Store::gc`] to collect, never a
//! dangling descriptor.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::uri::Uri;

/// Name of the index file inside the store root.
pub const INDEX_FILE: &str = "index.txt";

static DIGEST_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^h1:[0-9a-fA-F]{64}$").expect("digest pattern"));

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("descriptor not found for '{0}'")]
    DescriptorNotFound(String),

    #[error("blob {hex} missing for '{uri}'")]
    MissingBlob { uri: String, hex: String },

    #[error("size mismatch, expected {expected}, got {got}")]
    SizeMismatch { expected: u64, got: u64 },

    #[error("digest mismatch, expected {expected}, got {got}")]
    DigestMismatch { expected: String, got: String },

    #[error("malformed index line {line}: {reason}")]
    MalformedIndex { line: usize, reason: String },
}

/// `(size, SHA-256 hex)` of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub size: u64,
    pub hex: String,
}

impl Descriptor {
    fn of(bytes: &[u8]) -> Descriptor {
        Descriptor {
            size: bytes.len() as u64,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }
}

/// Durable cache of workflow bytes keyed by canonical URI.
///
/// Readers take the shared lock, writers the exclusive lock for the whole
/// blob-then-index update.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    index: RwLock<BTreeMap<String, Descriptor>>,
}

impl Store {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Store, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            parse_index(&fs::read_to_string(&index_path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Store {
            root,
            index: RwLock::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the cached bytes for `uri`.
    pub fn fetch(&self, uri: &Uri) -> Result<Vec<u8>, StoreError> {
        let key = uri.canonical();
        let index = self.index.read().expect("store lock");
        let descriptor = index
            .get(&key)
            .ok_or_else(|| StoreError::DescriptorNotFound(key.clone()))?;
        Ok(fs::read(self.root.join(&descriptor.hex))?)
    }

    /// Store `bytes` under `uri`, replacing any previous entry.
    pub fn store(&self, bytes: &[u8], uri: &Uri) -> Result<Descriptor, StoreError> {
        let key = uri.canonical();
        let descriptor = Descriptor::of(bytes);
        let mut index = self.index.write().expect("store lock");

        // Blob first; the index only ever references blobs that exist.
        fs::write(self.root.join(&descriptor.hex), bytes)?;
        index.insert(key.clone(), descriptor.clone());
        self.write_index(&index)?;

        debug!(uri = %key, hex = %descriptor.hex, size = descriptor.size, "stored blob");
        Ok(descriptor)
    }

    /// Whether a fully valid entry exists for `uri`.
    ///
    /// `Ok(false)` means no entry. A present entry whose blob is missing,
    /// has the wrong size, or the wrong digest is corruption and comes back
    /// as an error, never as `false`.
    pub fn exists(&self, uri: &Uri) -> Result<bool, StoreError> {
        let key = uri.canonical();
        let index = self.index.read().expect("store lock");
        let Some(descriptor) = index.get(&key) else {
            return Ok(false);
        };

        let blob_path = self.root.join(&descriptor.hex);
        if !blob_path.exists() {
            return Err(StoreError::MissingBlob {
                uri: key,
                hex: descriptor.hex.clone(),
            });
        }
        let bytes = fs::read(&blob_path)?;
        if bytes.len() as u64 != descriptor.size {
            return Err(StoreError::SizeMismatch {
                expected: descriptor.size,
                got: bytes.len() as u64,
            });
        }
        let got = hex::encode(Sha256::digest(&bytes));
        if got != descriptor.hex.to_ascii_lowercase() {
            return Err(StoreError::DigestMismatch {
                expected: descriptor.hex.clone(),
                got,
            });
        }
        Ok(true)
    }

    /// Snapshot of the current index.
    pub fn list(&self) -> Vec<(String, Descriptor)> {
        self.index
            .read()
            .expect("store lock")
            .iter()
            .map(|(uri, descriptor)| (uri.clone(), descriptor.clone()))
            .collect()
    }

    /// Remove every regular file in the root that is neither the index nor
    /// a live blob. Directories are left untouched.
    pub fn gc(&self) -> Result<usize, StoreError> {
        let index = self.index.write().expect("store lock");
        let live: std::collections::HashSet<&str> =
            index.values().map(|d| d.hex.as_str()).collect();

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == INDEX_FILE || live.contains(name.as_ref()) {
                continue;
            }
            fs::remove_file(entry.path())?;
            removed += 1;
        }
        debug!(removed, "store gc");
        Ok(removed)
    }

    /// Rewrite the index file whole, sorted lexicographically by URI.
    fn write_index(&self, index: &BTreeMap<String, Descriptor>) -> Result<(), StoreError> {
        let mut text = String::new();
        for (uri, descriptor) in index {
            text.push_str(uri);
            text.push_str(" h1:");
            text.push_str(&descriptor.hex);
            text.push(' ');
            text.push_str(&descriptor.size.to_string());
            text.push('\n');
        }

        let tmp = self.root.join(".index.txt.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.root.join(INDEX_FILE))?;
        Ok(())
    }
}

fn parse_index(text: &str) -> Result<BTreeMap<String, Descriptor>, StoreError> {
    let mut index = BTreeMap::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(StoreError::MalformedIndex {
                line: line_no + 1,
                reason: format!("expected 3 fields, got {}", fields.len()),
            });
        }
        if !DIGEST_FIELD_RE.is_match(fields[1]) {
            return Err(StoreError::MalformedIndex {
                line: line_no + 1,
                reason: format!("bad digest field '{}'", fields[1]),
            });
        }
        let size: u64 = fields[2].parse().map_err(|_| StoreError::MalformedIndex {
            line: line_no + 1,
            reason: format!("bad size field '{}'", fields[2]),
        })?;
        index.insert(
            fields[0].to_string(),
            Descriptor {
                size,
                hex: fields[1]["h1:".len()..].to_ascii_lowercase(),
            },
        );
    }
    Ok(index)
}
