//! # Task orchestrator
//!
//! Binds a task's inputs, runs its steps in order, and recurses across
//! workflows for `uses` references. A step is a shell command, a builtin
//! invocation, a sibling-task call, or a cross-workflow call resolved
//! through the fetcher service.
//!
//! Failure discipline: the first step error is recorded and wrapped with a
//! traceback frame; later steps only run when their `if` leans on
//! `always()` or `failure()`. Cancellation narrows that further to
//! `always()` alone. Outputs of a task are the outputs of its last
//! executed step.

mod context;
mod shell;
mod trace;

pub use context::{RunContext, MAX_DEPTH};
pub use shell::{exec_shell, shell_invocation, OUTPUT_ENV};
pub use trace::RunError;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::builtin::{Outputs, Registry};
use crate::expr::{self, EvalContext};
use crate::fetch::FetcherService;
use crate::uri::{resolve_relative, Uri};
use crate::workflow::{
    read_workflow, validate, Alias, ScalarValue, Step, Task, Workflow, DEFAULT_TASK,
};

/// Parse a duration string like `500ms`, `30s`, `5m`, `1h`.
///
/// A bare number is seconds.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let s = duration_str.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600));
    }

    s.parse::<u64>().ok().map(Duration::from_secs)
}

/// What became of one step.
enum StepOutcome {
    Skipped,
    Completed(Outputs),
}

/// Executes tasks against a fetcher service.
pub struct Runner {
    service: Arc<FetcherService>,
    registry: &'static Registry,
    global_aliases: BTreeMap<String, Alias>,
    dry_run: bool,
}

impl Runner {
    pub fn new(service: Arc<FetcherService>, dry_run: bool) -> Runner {
        Runner {
            service,
            registry: Registry::builtin(),
            global_aliases: BTreeMap::new(),
            dry_run,
        }
    }

    /// Aliases from persistent config, merged under each workflow's own.
    pub fn with_global_aliases(mut self, aliases: BTreeMap<String, Alias>) -> Runner {
        self.global_aliases = aliases;
        self
    }

    /// Swap the builtin registry; tests inject empty ones here.
    pub fn with_registry(mut self, registry: &'static Registry) -> Runner {
        self.registry = registry;
        self
    }

    /// Run `task_name` from `workflow`, bound against `with`.
    ///
    /// `origin` is the URI the workflow was loaded from; relative `uses`
    /// references resolve against it and it names the workflow in
    /// traceback frames.
    pub async fn run(
        &self,
        ctx: &RunContext,
        workflow: &Workflow,
        task_name: &str,
        with: Outputs,
        origin: &Uri,
    ) -> Result<Outputs, RunError> {
        self.run_task(ctx.clone(), workflow, task_name, with, origin)
            .await
    }

    /// Boxed recursion point: cross-workflow and sibling calls re-enter
    /// here with a deeper context.
    fn run_task<'a>(
        &'a self,
        ctx: RunContext,
        workflow: &'a Workflow,
        task_name: &'a str,
        with: Outputs,
        origin: &'a Uri,
    ) -> Pin<Box<dyn Future<Output = Result<Outputs, RunError>> + Send + 'a>> {
        Box::pin(async move {
            if ctx.depth >= MAX_DEPTH {
                return Err(RunError::DepthLimit(MAX_DEPTH));
            }
            let task = workflow
                .task(task_name)
                .ok_or_else(|| RunError::UnknownTask(task_name.to_string()))?;

            let mut eval = EvalContext {
                inputs: bind_inputs(task_name, task, &with)?,
                validators: task
                    .inputs
                    .iter()
                    .filter_map(|(name, p)| p.validate.clone().map(|v| (name.clone(), v)))
                    .collect(),
                ..EvalContext::default()
            };

            let aliases = self.merged_aliases(workflow);
            let origin_str = origin.to_string();
            let mut first_error: Option<RunError> = None;
            let mut last_outputs = Outputs::new();

            for (index, step) in task.steps.iter().enumerate() {
                eval.cancelled = ctx.cancel.is_cancelled();
                if eval.cancelled && first_error.is_none() {
                    first_error =
                        Some(RunError::Cancelled.framed(task_name, index, &origin_str));
                    eval.failed = true;
                }
                if first_error.is_none() && ctx.expired() {
                    first_error = Some(
                        RunError::Timeout("task deadline".to_string())
                            .framed(task_name, index, &origin_str),
                    );
                    eval.failed = true;
                }

                // Short-circuit: a failed task only runs steps leaning on
                // always()/failure(); a cancelled one, always() alone.
                if eval.cancelled {
                    let guarded = step
                        .if_
                        .as_deref()
                        .map(expr::condition_wants_always)
                        .unwrap_or(false);
                    if !guarded {
                        continue;
                    }
                } else if eval.failed {
                    let guarded = step
                        .if_
                        .as_deref()
                        .map(expr::condition_wants_failed_task)
                        .unwrap_or(false);
                    if !guarded {
                        continue;
                    }
                }

                match self
                    .exec_step(&ctx, &mut eval, workflow, task_name, index, step, origin, &aliases)
                    .await
                {
                    Ok(StepOutcome::Skipped) => {
                        debug!(task = task_name, index, "step skipped");
                    }
                    Ok(StepOutcome::Completed(outputs)) => {
                        if let Some(id) = &step.id {
                            eval.steps.insert(id.clone(), outputs.clone());
                        }
                        last_outputs = outputs;
                    }
                    Err(err) => {
                        let framed = err.framed(task_name, index, &origin_str);
                        if first_error.is_none() {
                            first_error = Some(framed);
                        } else {
                            warn!(task = task_name, index, error = %framed, "further step failed");
                        }
                        eval.failed = true;
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(last_outputs),
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn exec_step(
        &self,
        ctx: &RunContext,
        eval: &mut EvalContext,
        workflow: &Workflow,
        task_name: &str,
        index: usize,
        step: &Step,
        origin: &Uri,
        aliases: &BTreeMap<String, Alias>,
    ) -> Result<StepOutcome, RunError> {
        // Effective environment: process env with the step overlay, values
        // interpolated against the pre-overlay environment.
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        eval.env = env.clone();
        for (key, value) in &step.env {
            let value = match value {
                ScalarValue::String(s) => expr::interpolate(s, eval)?,
                other => other.to_string(),
            };
            env.insert(key.clone(), value);
        }
        eval.env = env;

        if let Some(condition) = &step.if_ {
            if !expr::evaluate_condition(condition, eval)? {
                return Ok(StepOutcome::Skipped);
            }
        }

        let timeout = step.timeout.as_deref().and_then(parse_duration);
        let deadline = ctx.step_deadline(timeout);
        let timeout_label = step.timeout.clone().unwrap_or_else(|| "deadline".to_string());

        // An always()-guarded step still runs after cancellation; give it a
        // token the cancelled run cannot abort.
        let cancel = if ctx.cancel.is_cancelled() {
            tokio_util::sync::CancellationToken::new()
        } else {
            ctx.cancel.clone()
        };

        if let Some(run) = &step.run {
            return self
                .exec_run_step(&cancel, eval, step, run, deadline, &timeout_label)
                .await
                .map(StepOutcome::Completed);
        }

        // Validation guarantees `uses` is present when `run` is not.
        let Some(uses) = &step.uses else {
            return Ok(StepOutcome::Skipped);
        };
        let with = interpolate_with(&step.with, eval)?;

        // Schemeless: a sibling task in the same workflow.
        if !uses.contains(':') {
            let child = ctx.child_with_deadline(deadline);
            let outputs = self.run_task(child, workflow, uses, with, origin).await?;
            return Ok(StepOutcome::Completed(outputs));
        }

        if let Some(name) = uses.strip_prefix("builtin:") {
            let builtin = self.registry.get(name, &with)?;
            if self.dry_run {
                info!(step = %step.label(index), "dry run: would invoke builtin:{name}");
                return Ok(StepOutcome::Completed(Outputs::new()));
            }
            let outputs = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, builtin.execute(&cancel))
                    .await
                    .map_err(|_| RunError::Timeout(timeout_label.clone()))??,
                None => builtin.execute(&cancel).await?,
            };
            return Ok(StepOutcome::Completed(outputs));
        }

        // Cross-workflow call: resolve, fetch, validate, recurse.
        let resolved = resolve_relative(Some(origin), uses, aliases)?;
        debug!(task = task_name, %resolved, "calling workflow");
        let bytes = match deadline {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, self.service.fetch(&cancel, &resolved))
                    .await
                    .map_err(|_| RunError::Timeout(timeout_label.clone()))??
            }
            None => self.service.fetch(&cancel, &resolved).await?,
        };
        let called = read_workflow(&bytes)?;
        validate(&called)?;

        let called_task = resolved.task().unwrap_or(DEFAULT_TASK).to_string();
        let child = ctx.child_with_deadline(deadline);
        let outputs = self
            .run_task(child, &called, &called_task, with, &resolved)
            .await?;
        Ok(StepOutcome::Completed(outputs))
    }

    async fn exec_run_step(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        eval: &EvalContext,
        step: &Step,
        run: &str,
        deadline: Option<Instant>,
        timeout_label: &str,
    ) -> Result<Outputs, RunError> {
        if self.dry_run {
            // Best effort: show the interpolated script, fall back to the
            // raw text when references cannot resolve yet.
            let script = expr::interpolate(run, eval).unwrap_or_else(|_| run.to_string());
            info!(shell = %step.shell.unwrap_or_default(), "dry run:\n{script}");
            return Ok(Outputs::new());
        }

        let script = expr::interpolate(run, eval)?;
        shell::exec_shell(
            cancel,
            deadline,
            timeout_label,
            step.shell.unwrap_or_default(),
            &script,
            &eval.env,
            step.dir.as_deref(),
            step.mute,
        )
        .await
    }

    fn merged_aliases(&self, workflow: &Workflow) -> BTreeMap<String, Alias> {
        let mut aliases = self.global_aliases.clone();
        aliases.extend(
            workflow
                .aliases
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        aliases
    }
}

/// Bind a task's declared inputs: caller's `with`, then `default-from-env`,
/// then `default`; missing required inputs fail. Unknown keys warn.
fn bind_inputs(
    task_name: &str,
    task: &Task,
    with: &Outputs,
) -> Result<BTreeMap<String, serde_json::Value>, RunError> {
    let mut bound = BTreeMap::new();

    for (name, param) in &task.inputs {
        let value = with
            .get(name)
            .cloned()
            .or_else(|| {
                param
                    .default_from_env
                    .as_ref()
                    .and_then(|env| std::env::var(env).ok())
                    .map(serde_json::Value::String)
            })
            .or_else(|| param.default.as_ref().map(ScalarValue::as_json));

        let Some(value) = value else {
            if param.required() {
                return Err(RunError::MissingInput {
                    task: task_name.to_string(),
                    input: name.clone(),
                });
            }
            continue;
        };

        if let Some(message) = &param.deprecated_message {
            warn!(task = task_name, input = %name, "deprecated: {message}");
        }

        if let Some(pattern) = &param.validate {
            let text = crate::expr::Value::from_json(&value).stringify();
            let matched = Regex::new(pattern)
                .map(|re| re.is_match(&text))
                .unwrap_or(false);
            if !matched {
                return Err(RunError::InputValidation {
                    task: task_name.to_string(),
                    input: name.clone(),
                    value: text,
                    pattern: pattern.clone(),
                });
            }
        }

        bound.insert(name.clone(), value);
    }

    for key in with.keys() {
        if !task.inputs.contains_key(key) {
            warn!(task = task_name, input = %key, "ignoring unknown input");
        }
    }

    Ok(bound)
}

/// Interpolate a step's `with` map into a fresh parameter map for the
/// callee. Never shared with the caller's own map.
fn interpolate_with(
    with: &BTreeMap<String, ScalarValue>,
    eval: &EvalContext,
) -> Result<Outputs, RunError> {
    let mut out = Outputs::new();
    for (key, value) in with {
        let value = match value {
            ScalarValue::String(s) => serde_json::Value::String(expr::interpolate(s, eval)?),
            other => other.as_json(),
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::InputParameter;

    fn param(yaml: &str) -> InputParameter {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn task_with_input(name: &str, input: InputParameter) -> Task {
        let mut task = Task::default();
        task.inputs.insert(name.to_string(), input);
        task
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_bind_inputs_precedence() {
        let task = task_with_input("who", param("default: world"));

        // Caller value wins over the default.
        let mut with = Outputs::new();
        with.insert("who".to_string(), serde_json::json!("caller"));
        let bound = bind_inputs("t", &task, &with).unwrap();
        assert_eq!(bound["who"], serde_json::json!("caller"));

        let bound = bind_inputs("t", &task, &Outputs::new()).unwrap();
        assert_eq!(bound["who"], serde_json::json!("world"));
    }

    #[test]
    fn test_bind_inputs_from_env() {
        std::env::set_var("WEFT_TEST_BIND_ENV", "from-env");
        let task = task_with_input("who", param("default-from-env: WEFT_TEST_BIND_ENV"));
        let bound = bind_inputs("t", &task, &Outputs::new()).unwrap();
        assert_eq!(bound["who"], serde_json::json!("from-env"));
    }

    #[test]
    fn test_bind_inputs_missing_required() {
        let task = task_with_input("who", param("description: someone"));
        assert!(matches!(
            bind_inputs("t", &task, &Outputs::new()),
            Err(RunError::MissingInput { .. })
        ));

        let task = task_with_input("who", param("required: false"));
        let bound = bind_inputs("t", &task, &Outputs::new()).unwrap();
        assert!(bound.is_empty());
    }

    #[test]
    fn test_bind_inputs_validation() {
        let task = task_with_input("name", param("validate: \"^[A-Z][a-z]+$\""));

        let mut with = Outputs::new();
        with.insert("name".to_string(), serde_json::json!("Alice"));
        assert!(bind_inputs("t", &task, &with).is_ok());

        with.insert("name".to_string(), serde_json::json!("bob"));
        assert!(matches!(
            bind_inputs("t", &task, &with),
            Err(RunError::InputValidation { .. })
        ));
    }
}
