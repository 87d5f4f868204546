//! Bespoke workflow validation
//!
//! Structural shape is already guaranteed by the strict deserializers and
//! the JSON Schema check; this layer enforces the rules the schema cannot
//! express: name patterns, step exclusivity, sibling references, relative
//! paths, duration strings, and alias hygiene.

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::runner::parse_duration;
use crate::uri::RESERVED_SCHEMES;

use super::{Alias, Workflow, ENV_NAME_RE, NAME_RE};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("workflow has no tasks")]
    NoTasks,

    #[error("invalid task name '{0}'")]
    InvalidTaskName(String),

    #[error("task '{task}': invalid input name '{input}'")]
    InvalidInputName { task: String, input: String },

    #[error("task '{task}' input '{input}': has both 'default' and 'default-from-env'")]
    InputDefaultConflict { task: String, input: String },

    #[error("task '{task}' input '{input}': '{env}' is not an environment variable name")]
    InvalidInputEnvName {
        task: String,
        input: String,
        env: String,
    },

    #[error("task '{task}' input '{input}': invalid validate pattern: {source}")]
    InvalidInputPattern {
        task: String,
        input: String,
        source: regex::Error,
    },

    #[error("task '{task}' step {index}: has both 'run' and 'uses'")]
    RunUsesConflict { task: String, index: usize },

    #[error("task '{task}' step {index}: needs either 'run' or 'uses'")]
    RunUsesMissing { task: String, index: usize },

    #[error("task '{task}' step {index}: invalid step id '{id}'")]
    InvalidStepId {
        task: String,
        index: usize,
        id: String,
    },

    #[error("task '{task}': duplicate step id '{id}'")]
    DuplicateStepId { task: String, id: String },

    #[error("task '{task}' step {index}: 'uses: {uses}' does not name a sibling task")]
    UnknownSiblingTask {
        task: String,
        index: usize,
        uses: String,
    },

    #[error("task '{task}' step {index}: a step cannot use its own task")]
    SelfUses { task: String, index: usize },

    #[error("task '{task}' step {index}: unknown scheme or alias '{scheme}'")]
    UnknownUsesScheme {
        task: String,
        index: usize,
        scheme: String,
    },

    #[error("task '{task}' step {index}: 'dir' must be relative, got '{dir}'")]
    AbsoluteDir {
        task: String,
        index: usize,
        dir: String,
    },

    #[error("task '{task}' step {index}: invalid timeout '{timeout}'")]
    InvalidTimeout {
        task: String,
        index: usize,
        timeout: String,
    },

    #[error("task '{task}' step {index}: '{key}' is not an environment variable name")]
    InvalidEnvKey {
        task: String,
        index: usize,
        key: String,
    },

    #[error("alias '{0}' is not a valid name")]
    InvalidAliasName(String),

    #[error("alias '{0}' collides with a reserved scheme")]
    ReservedAliasName(String),

    #[error("alias '{alias}': path must be relative, got '{path}'")]
    AbsoluteAliasPath { alias: String, path: String },
}

/// Validate a workflow, stopping at the first violation.
pub fn validate(workflow: &Workflow) -> Result<(), ValidationError> {
    match validate_all(workflow).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a workflow, collecting every violation.
pub fn validate_all(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.tasks.is_empty() {
        errors.push(ValidationError::NoTasks);
    }

    for (name, alias) in &workflow.aliases {
        if !NAME_RE.is_match(name) {
            errors.push(ValidationError::InvalidAliasName(name.clone()));
        }
        if RESERVED_SCHEMES.contains(&name.as_str()) {
            errors.push(ValidationError::ReservedAliasName(name.clone()));
        }
        if let Alias::Local { path } = alias {
            if path.starts_with('/') {
                errors.push(ValidationError::AbsoluteAliasPath {
                    alias: name.clone(),
                    path: path.clone(),
                });
            }
        }
    }

    for (task_name, task) in &workflow.tasks {
        if !NAME_RE.is_match(task_name) {
            errors.push(ValidationError::InvalidTaskName(task_name.clone()));
        }

        for (input_name, input) in &task.inputs {
            if !NAME_RE.is_match(input_name) {
                errors.push(ValidationError::InvalidInputName {
                    task: task_name.clone(),
                    input: input_name.clone(),
                });
            }
            if input.default.is_some() && input.default_from_env.is_some() {
                errors.push(ValidationError::InputDefaultConflict {
                    task: task_name.clone(),
                    input: input_name.clone(),
                });
            }
            if let Some(env) = &input.default_from_env {
                if !ENV_NAME_RE.is_match(env) {
                    errors.push(ValidationError::InvalidInputEnvName {
                        task: task_name.clone(),
                        input: input_name.clone(),
                        env: env.clone(),
                    });
                }
            }
            if let Some(pattern) = &input.validate {
                if let Err(source) = Regex::new(pattern) {
                    errors.push(ValidationError::InvalidInputPattern {
                        task: task_name.clone(),
                        input: input_name.clone(),
                        source,
                    });
                }
            }
        }

        let mut seen_ids = HashSet::new();
        for (index, step) in task.steps.iter().enumerate() {
            match (&step.run, &step.uses) {
                (Some(_), Some(_)) => errors.push(ValidationError::RunUsesConflict {
                    task: task_name.clone(),
                    index,
                }),
                (None, None) => errors.push(ValidationError::RunUsesMissing {
                    task: task_name.clone(),
                    index,
                }),
                _ => {}
            }

            if let Some(id) = &step.id {
                if !NAME_RE.is_match(id) {
                    errors.push(ValidationError::InvalidStepId {
                        task: task_name.clone(),
                        index,
                        id: id.clone(),
                    });
                }
                if !seen_ids.insert(id.clone()) {
                    errors.push(ValidationError::DuplicateStepId {
                        task: task_name.clone(),
                        id: id.clone(),
                    });
                }
            }

            if let Some(uses) = &step.uses {
                errors.extend(check_uses(workflow, task_name, index, uses));
            }

            if let Some(dir) = &step.dir {
                if dir.starts_with('/') {
                    errors.push(ValidationError::AbsoluteDir {
                        task: task_name.clone(),
                        index,
                        dir: dir.clone(),
                    });
                }
            }

            if let Some(timeout) = &step.timeout {
                if parse_duration(timeout).is_none() {
                    errors.push(ValidationError::InvalidTimeout {
                        task: task_name.clone(),
                        index,
                        timeout: timeout.clone(),
                    });
                }
            }

            for key in step.env.keys() {
                if !ENV_NAME_RE.is_match(key) {
                    errors.push(ValidationError::InvalidEnvKey {
                        task: task_name.clone(),
                        index,
                        key: key.clone(),
                    });
                }
            }
        }
    }

    errors
}

fn check_uses(
    workflow: &Workflow,
    task_name: &str,
    index: usize,
    uses: &str,
) -> Option<ValidationError> {
    match uses.split_once(':') {
        // Schemeless: a sibling task reference.
        None => {
            if uses == task_name {
                return Some(ValidationError::SelfUses {
                    task: task_name.to_string(),
                    index,
                });
            }
            if !NAME_RE.is_match(uses) || !workflow.tasks.contains_key(uses) {
                return Some(ValidationError::UnknownSiblingTask {
                    task: task_name.to_string(),
                    index,
                    uses: uses.to_string(),
                });
            }
            None
        }
        Some((scheme, _)) => {
            let known = matches!(
                scheme,
                "file" | "http" | "https" | "pkg" | "oci" | "builtin"
            ) || workflow.aliases.contains_key(scheme);
            // Single letters are drive prefixes, not schemes; the URI
            // parser treats them as paths, so accept them here.
            if known || scheme.len() < 2 {
                None
            } else {
                Some(ValidationError::UnknownUsesScheme {
                    task: task_name.to_string(),
                    index,
                    scheme: scheme.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::read_workflow;

    fn wf(yaml: &str) -> Workflow {
        read_workflow(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn test_valid_workflow() {
        let wf = wf(r#"
schema-version: v1
aliases:
  gh:
    type: github
tasks:
  default:
    steps:
      - run: echo hi
  lint:
    steps:
      - uses: default
      - uses: builtin:echo
        with:
          text: hello
"#);
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn test_no_tasks() {
        let wf = wf("schema-version: v1\ntasks: {}\n");
        assert!(matches!(validate(&wf), Err(ValidationError::NoTasks)));
    }

    #[test]
    fn test_run_uses_conflict() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - run: echo hi
        uses: other
  other:
    steps:
      - run: echo there
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::RunUsesConflict { .. })
        ));
    }

    #[test]
    fn test_duplicate_step_id() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - run: echo a
        id: x
      - run: echo b
        id: x
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::DuplicateStepId { .. })
        ));
    }

    #[test]
    fn test_self_uses() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - uses: default
"#);
        assert!(matches!(validate(&wf), Err(ValidationError::SelfUses { .. })));
    }

    #[test]
    fn test_unknown_sibling() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - uses: missing
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::UnknownSiblingTask { .. })
        ));
    }

    #[test]
    fn test_uses_alias_scheme_accepted() {
        let wf = wf(r#"
schema-version: v1
aliases:
  lib:
    path: lib/tasks.yaml
tasks:
  default:
    steps:
      - uses: lib:build
"#);
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn test_uses_unknown_scheme_rejected() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - uses: svn:whatever
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::UnknownUsesScheme { .. })
        ));
    }

    #[test]
    fn test_absolute_dir_rejected() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - run: pwd
        dir: /tmp
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::AbsoluteDir { .. })
        ));
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    steps:
      - run: sleep 1
        timeout: soon
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_reserved_alias_rejected() {
        let wf = wf(r#"
schema-version: v1
aliases:
  pkg:
    type: github
tasks:
  default:
    steps:
      - run: echo hi
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::ReservedAliasName(name)) if name == "pkg"
        ));
    }

    #[test]
    fn test_input_default_conflict() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    inputs:
      who:
        default: world
        default-from-env: WHO
    steps:
      - run: echo hi
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::InputDefaultConflict { .. })
        ));
    }

    #[test]
    fn test_bad_validate_pattern() {
        let wf = wf(r#"
schema-version: v1
tasks:
  default:
    inputs:
      who:
        validate: "["
    steps:
      - run: echo hi
"#);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::InvalidInputPattern { .. })
        ));
    }
}
