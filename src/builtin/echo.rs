//! `builtin:echo`

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Builtin, BuiltinError, Outputs};

/// Logs its text and hands it on as `stdout`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Echo {
    #[serde(default)]
    pub text: String,
}

pub(super) fn construct(config: serde_json::Value) -> Result<Box<dyn Builtin>, BuiltinError> {
    let echo: Echo = serde_json::from_value(config)?;
    Ok(Box::new(echo))
}

#[async_trait]
impl Builtin for Echo {
    async fn execute(&self, _cancel: &CancellationToken) -> Result<Outputs, BuiltinError> {
        info!("{}", self.text);
        let mut outputs = Outputs::new();
        outputs.insert(
            "stdout".to_string(),
            serde_json::Value::String(self.text.clone()),
        );
        Ok(outputs)
    }
}
