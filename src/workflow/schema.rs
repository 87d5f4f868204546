//! JSON Schema structural check
//!
//! The schema is generated from the type definitions with `schemars` and
//! compiled once. It backstops the bespoke rules in `validate`: anything
//! the hand-written checks miss still has to fit the declared shapes.

use std::sync::OnceLock;

use jsonschema::JSONSchema;
use serde_json::Value;

use super::Workflow;

static VALIDATOR: OnceLock<Result<JSONSchema, String>> = OnceLock::new();

fn validator() -> Result<&'static JSONSchema, Vec<String>> {
    let compiled = VALIDATOR.get_or_init(|| {
        let schema = serde_json::to_value(schemars::schema_for!(Workflow))
            .map_err(|e| format!("failed to serialize workflow schema: {e}"))?;
        JSONSchema::compile(&schema).map_err(|e| format!("failed to compile workflow schema: {e}"))
    });
    compiled.as_ref().map_err(|e| vec![e.clone()])
}

/// Check a raw document value against the generated workflow schema.
///
/// Returns one line per violation, `<path>: <message>`.
pub fn check_document(doc: &Value) -> Result<(), Vec<String>> {
    let validator = validator()?;
    let errors: Vec<String> = match validator.validate(doc) {
        Ok(()) => Vec::new(),
        Err(iter) => iter
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect(),
    };
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
