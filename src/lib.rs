//! # Weft
//!
//! A declarative task runner. Workflows are YAML documents of named tasks;
//! each task is an ordered list of steps that run shell scripts, invoke
//! builtins, or call other tasks and workflows (local or remote) with
//! parameters, outputs, and conditional control.
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`uri`] | Parse, normalize, and compose workflow locations |
//! | [`store`] | Digest-indexed cache of fetched workflow bytes |
//! | [`fetch`] | Per-scheme backends + cache-policy service |
//! | [`workflow`] | Typed model, versioned read, validation |
//! | [`expr`] | The `${{ … }}` expression language |
//! | [`builtin`] | In-process step implementations (`echo`, `fetch`) |
//! | [`runner`] | Input binding, step loop, recursion, traceback |
//! | [`config`] | Persistent alias map and fetch-policy defaults |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use weft::fetch::{FetcherService, FetchPolicy};
//! use weft::runner::{RunContext, Runner};
//! use weft::uri::Uri;
//! use weft::workflow::{read_workflow, validate};
//!
//! # async fn example() -> Result<(), weft::WeftError> {
//! let service = Arc::new(FetcherService::new(None, FetchPolicy::IfNotPresent)?);
//! let origin = Uri::parse("file:tasks.yaml")?;
//! let bytes = service.fetch(&CancellationToken::new(), &origin).await?;
//! let workflow = read_workflow(&bytes)?;
//! validate(&workflow)?;
//!
//! let runner = Runner::new(service, false);
//! let ctx = RunContext::new(CancellationToken::new(), None);
//! let outputs = runner
//!     .run(&ctx, &workflow, "default", Default::default(), &origin)
//!     .await?;
//! # let _ = outputs;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod config;
pub mod error;
pub mod expr;
pub mod fetch;
pub mod runner;
pub mod store;
pub mod uri;
pub mod workflow;

pub use error::WeftError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_validate() {
        let yaml = br#"
schema-version: v1
aliases:
  gh:
    type: github
    token-from-env: GITHUB_TOKEN
tasks:
  default:
    steps:
      - run: echo hi
  greet:
    inputs:
      name:
        validate: "^[A-Z][a-z]+$"
    steps:
      - uses: builtin:echo
        id: hello
        with:
          text: "hello ${{ input(\"name\") }}"
      - run: "echo ${{ from(\"hello\", \"stdout\") }}-world"
"#;
        let wf = workflow::read_workflow(yaml).unwrap();
        assert!(workflow::validate(&wf).is_ok());
        assert_eq!(wf.tasks.len(), 2);
    }
}
