//! # Builtin registry
//!
//! In-process step implementations, invoked as `uses: builtin:<name>`. Each
//! builtin is a configuration struct hydrated from the step's interpolated
//! `with` map (field-name mapping through serde) plus an `execute` method
//! returning an output map.
//!
//! The process-wide registry is a closed set behind a construction seam:
//! [`Registry::builtin`] carries the shipped builtins, [`Registry::empty`]
//! lets tests start from nothing. Every lookup hydrates a fresh instance,
//! so concurrent steps never share mutable configuration.

mod echo;
mod fetch;

pub use echo::Echo;
pub use fetch::Fetch;

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Outputs produced by a builtin invocation.
pub type Outputs = BTreeMap<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum BuiltinError {
    #[error("no builtin named '{0}'")]
    Unknown(String),

    #[error("builtin name cannot be empty")]
    EmptyName,

    #[error("builtin '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid 'with' configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("partial response from {0}: empty body")]
    Partial(String),

    #[error("invalid timeout '{0}'")]
    InvalidTimeout(String),

    #[error("builtin cancelled")]
    Cancelled,
}

/// A hydrated builtin, ready to run once.
#[async_trait]
pub trait Builtin: Send + Sync {
    async fn execute(&self, cancel: &CancellationToken) -> Result<Outputs, BuiltinError>;
}

/// Hydrates a fresh builtin from a `with` map.
pub type Constructor = fn(serde_json::Value) -> Result<Box<dyn Builtin>, BuiltinError>;

static BUILTINS: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::empty();
    registry
        .register("echo", echo::construct)
        .expect("register echo");
    registry
        .register("fetch", fetch::construct)
        .expect("register fetch");
    registry
});

/// A name → constructor map guarded for concurrent use.
pub struct Registry {
    inner: RwLock<HashMap<String, Constructor>>,
}

impl Registry {
    /// The process-wide registry with the shipped builtins.
    pub fn builtin() -> &'static Registry {
        &BUILTINS
    }

    /// An empty registry, for tests and embedders.
    pub fn empty() -> Registry {
        Registry {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: &str, constructor: Constructor) -> Result<(), BuiltinError> {
        if name.is_empty() {
            return Err(BuiltinError::EmptyName);
        }
        let mut inner = self.inner.write().expect("registry lock");
        if inner.contains_key(name) {
            return Err(BuiltinError::Duplicate(name.to_string()));
        }
        inner.insert(name.to_string(), constructor);
        Ok(())
    }

    /// Hydrate a fresh instance of `name` from a `with` map.
    pub fn get(&self, name: &str, with: &Outputs) -> Result<Box<dyn Builtin>, BuiltinError> {
        let constructor = {
            let inner = self.inner.read().expect("registry lock");
            *inner
                .get(name)
                .ok_or_else(|| BuiltinError::Unknown(name.to_string()))?
        };
        let config = serde_json::Value::Object(
            with.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        constructor(config)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
