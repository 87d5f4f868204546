//! Versioned workflow reading
//!
//! `read_workflow` peeks the `schema-version` field, picks the strict
//! deserializer for that version, and auto-migrates legacy v0 documents to
//! the v1 model. v1 documents are structurally checked against the
//! generated JSON Schema before deserialization.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use super::{schema, SchemaVersion, Step, Task, Workflow};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing schema-version (expected one of: v0, v1)")]
    MissingVersion,

    #[error("unsupported schema-version '{0}' (expected one of: v0, v1)")]
    UnsupportedVersion(String),

    #[error("document does not match the workflow schema:\n{}", .0.join("\n"))]
    Schema(Vec<String>),
}

/// Legacy v0 document: tasks are bare step lists, no inputs or aliases.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowV0 {
    #[serde(rename = "schema-version")]
    #[allow(dead_code)]
    schema_version: SchemaVersion,

    #[serde(default)]
    tasks: BTreeMap<String, Vec<Step>>,
}

impl WorkflowV0 {
    fn migrate(self) -> Workflow {
        Workflow {
            schema_version: SchemaVersion::V1,
            aliases: BTreeMap::new(),
            tasks: self
                .tasks
                .into_iter()
                .map(|(name, steps)| {
                    (
                        name,
                        Task {
                            steps,
                            ..Task::default()
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Read a workflow document from raw bytes.
pub fn read_workflow(bytes: &[u8]) -> Result<Workflow, ReadError> {
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes)?;

    let version = value
        .get("schema-version")
        .ok_or(ReadError::MissingVersion)?;
    let version = version.as_str().ok_or(ReadError::MissingVersion)?;

    match version {
        "v0" => {
            let legacy: WorkflowV0 = serde_yaml::from_value(value)?;
            Ok(legacy.migrate())
        }
        "v1" => {
            let json: serde_json::Value =
                serde_yaml::from_value(value.clone()).map_err(ReadError::Yaml)?;
            schema::check_document(&json).map_err(ReadError::Schema)?;
            Ok(serde_yaml::from_value(value)?)
        }
        other => Err(ReadError::UnsupportedVersion(other.to_string())),
    }
}
