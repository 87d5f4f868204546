//! # Workflow document model
//!
//! The typed form of a `tasks.yaml` document: a schema version, an alias
//! map, and named tasks made of ordered steps. Values are read-only once
//! they pass [`validate`](crate::workflow::validate).
//!
//! Name rules:
//! - task and step-id names match `^[_A-Za-z][A-Za-z0-9_-]*$`
//! - environment variable names match `^[A-Za-z_][A-Za-z0-9_]*$`

mod read;
mod schema;
mod validate;

pub use read::{read_workflow, ReadError};
pub use schema::check_document;
pub use validate::{validate, validate_all, ValidationError};

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Task, step-id, input and alias name pattern.
pub static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[_A-Za-z][A-Za-z0-9_-]*$").expect("name pattern"));

/// Environment variable name pattern.
pub static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env pattern"));

/// The task run when none is requested.
pub const DEFAULT_TASK: &str = "default";

// ============================================================================
// DOCUMENT
// ============================================================================

/// Supported document versions. v0 is legacy and auto-migrates on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SchemaVersion {
    #[serde(rename = "v0")]
    V0,
    #[serde(rename = "v1")]
    V1,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::V0 => write!(f, "v0"),
            SchemaVersion::V1 => write!(f, "v1"),
        }
    }
}

/// A validated workflow document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(rename = "schema-version")]
    pub schema_version: SchemaVersion,

    /// Named shortcuts for workflow references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, Alias>,

    /// Named tasks. The `default` task is implicit when none is requested.
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
}

impl Workflow {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }
}

// ============================================================================
// TASK
// ============================================================================

/// A named, ordered sequence of steps with its own inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// CI grouping hint; has no effect on execution.
    #[serde(default)]
    pub collapse: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputParameter>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A declared task input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct InputParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When set, using the input logs this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_message: Option<String>,

    /// Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    /// Literal default. Mutually exclusive with `default-from-env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ScalarValue>,

    /// Environment variable supplying the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_from_env: Option<String>,

    /// Regular expression applied to the final string form of the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
}

impl InputParameter {
    pub fn required(&self) -> bool {
        self.required.unwrap_or(true)
    }
}

// ============================================================================
// STEP
// ============================================================================

/// One action in a task: exactly one of `run` or `uses`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Shell text to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Reference to a sibling task, a builtin, or another workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Unique within the task; keys this step's outputs for `from()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Condition expression; the step is skipped when it evaluates false.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_: Option<String>,

    /// Working directory, relative to the process working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Shell>,

    /// Duration string, e.g. `30s`, `5m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Suppress stdout/stderr.
    #[serde(default)]
    pub mute: bool,

    /// Parameters passed to `uses` targets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, ScalarValue>,

    /// Extra environment for this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, ScalarValue>,
}

impl Step {
    /// Display label: explicit name, id, or a positional fallback.
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| format!("step {index}"))
    }
}

/// The fixed shell table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Sh,
    Bash,
    Pwsh,
    Powershell,
}

impl Default for Shell {
    fn default() -> Self {
        Shell::Sh
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shell::Sh => write!(f, "sh"),
            Shell::Bash => write!(f, "bash"),
            Shell::Pwsh => write!(f, "pwsh"),
            Shell::Powershell => write!(f, "powershell"),
        }
    }
}

// ============================================================================
// SCALARS
// ============================================================================

/// A YAML scalar as it appears in `default`, `with` and `env` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl ScalarValue {
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Bool(b) => serde_json::Value::Bool(*b),
            ScalarValue::Int(i) => serde_json::Value::Number((*i).into()),
            ScalarValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::String(s) => write!(f, "{s}"),
        }
    }
}

// ============================================================================
// ALIASES
// ============================================================================

/// Forge kinds a remote alias can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AliasKind {
    Github,
    Gitlab,
}

impl fmt::Display for AliasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasKind::Github => write!(f, "github"),
            AliasKind::Gitlab => write!(f, "gitlab"),
        }
    }
}

/// A named reference shortcut: either a local path to another workflow or a
/// remote forge descriptor. Exactly one form per alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Alias {
    Local {
        path: String,
    },
    Remote {
        kind: AliasKind,
        base_url: Option<String>,
        token_from_env: Option<String>,
    },
}

/// Wire shape for [`Alias`]; enforces the local/remote exclusivity on read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct AliasRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<AliasKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_from_env: Option<String>,
}

impl TryFrom<AliasRaw> for Alias {
    type Error = String;

    fn try_from(raw: AliasRaw) -> Result<Self, Self::Error> {
        match (raw.path, raw.kind) {
            (Some(_), Some(_)) => Err("alias has both 'path' and 'type'".to_string()),
            (None, None) => Err("alias needs either 'path' or 'type'".to_string()),
            (Some(path), None) => {
                if raw.base_url.is_some() || raw.token_from_env.is_some() {
                    return Err("local alias only takes 'path'".to_string());
                }
                Ok(Alias::Local { path })
            }
            (None, Some(kind)) => Ok(Alias::Remote {
                kind,
                base_url: raw.base_url,
                token_from_env: raw.token_from_env,
            }),
        }
    }
}

impl From<&Alias> for AliasRaw {
    fn from(alias: &Alias) -> Self {
        match alias {
            Alias::Local { path } => AliasRaw {
                path: Some(path.clone()),
                kind: None,
                base_url: None,
                token_from_env: None,
            },
            Alias::Remote {
                kind,
                base_url,
                token_from_env,
            } => AliasRaw {
                path: None,
                kind: Some(*kind),
                base_url: base_url.clone(),
                token_from_env: token_from_env.clone(),
            },
        }
    }
}

impl<'de> Deserialize<'de> for Alias {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = AliasRaw::deserialize(deserializer)?;
        Alias::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Alias {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        AliasRaw::from(self).serialize(serializer)
    }
}

impl JsonSchema for Alias {
    fn schema_name() -> String {
        "Alias".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        AliasRaw::json_schema(gen)
    }
}
