pub mod executor;

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-authored workflow definition: an ordered list of module calls.
/// Immutable during a single execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Optional handle other steps can bind to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Dotted `category.module.function` path.
    pub module: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamValue>,
    /// Overrides the handler's own credential scope when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "ErrorPolicy::is_default")]
    pub on_error: ErrorPolicy,
}

impl WorkflowStep {
    pub fn new(module: &str) -> Self {
        Self {
            id: None,
            module: module.to_string(),
            params: BTreeMap::new(),
            platform: None,
            on_error: ErrorPolicy::Abort,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn literal(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params
            .insert(key.to_string(), ParamValue::Literal(value));
        self
    }

    pub fn binding(mut self, key: &str, step: &str, output: Option<&str>) -> Self {
        self.params.insert(
            key.to_string(),
            ParamValue::Binding(Binding {
                step: step.to_string(),
                output: output.map(str::to_string),
            }),
        );
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.on_error = ErrorPolicy::Continue;
        self
    }

    /// Display handle for reports: the declared id, or the module path.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.module)
    }
}

/// A parameter is either a literal JSON value or a reference to a prior
/// step's output. In JSON, a binding is an object carrying `$from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Binding(Binding),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    #[serde(rename = "$from")]
    pub step: String,
    /// Named output key within the referenced step's result; the whole
    /// result when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the whole run on failure (the default).
    #[default]
    Abort,
    /// Record the failure and keep going; this step's output stays absent.
    Continue,
}

impl ErrorPolicy {
    fn is_default(&self) -> bool {
        *self == ErrorPolicy::Abort
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Completed {
        output: serde_json::Value,
        /// True when the output is a dry-run synthetic result.
        synthetic: bool,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: String,
    pub module: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// At least one `continue` step failed but the run finished.
    Partial,
    /// The run aborted at a step with the default policy.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub outcomes: Vec<StepOutcome>,
    /// The failure that aborted the run, when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn output_of(&self, step: &str) -> Option<&serde_json::Value> {
        self.outcomes.iter().find_map(|o| match &o.status {
            StepStatus::Completed { output, .. } if o.step == step => Some(output),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_and_literal_deserialize_distinctly() {
        let config: WorkflowConfig = serde_json::from_str(
            r#"{
                "steps": [
                    { "id": "search", "module": "twitter.tweets.search",
                      "params": { "query": "rustlang" } },
                    { "module": "ai.text.generate",
                      "params": { "prompt": { "$from": "search", "output": "tweets" } },
                      "on_error": "continue" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.steps.len(), 2);
        assert!(matches!(
            config.steps[0].params["query"],
            ParamValue::Literal(_)
        ));
        match &config.steps[1].params["prompt"] {
            ParamValue::Binding(binding) => {
                assert_eq!(binding.step, "search");
                assert_eq!(binding.output.as_deref(), Some("tweets"));
            }
            other => panic!("expected binding, got {other:?}"),
        }
        assert_eq!(config.steps[0].on_error, ErrorPolicy::Abort);
        assert_eq!(config.steps[1].on_error, ErrorPolicy::Continue);
    }

    #[test]
    fn object_literal_without_from_stays_literal() {
        let step: WorkflowStep = serde_json::from_str(
            r#"{ "module": "ai.text.generate",
                 "params": { "options": { "temperature": 0.2 } } }"#,
        )
        .unwrap();
        assert!(matches!(
            step.params["options"],
            ParamValue::Literal(_)
        ));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("twitter.tweets.search")
                    .with_id("search")
                    .literal("query", serde_json::json!("rustlang")),
                WorkflowStep::new("twitter.tweets.post")
                    .binding("text", "search", Some("top"))
                    .continue_on_error(),
            ],
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: WorkflowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps[1].on_error, ErrorPolicy::Continue);
        assert_eq!(back.steps[0].label(), "search");
        assert_eq!(back.steps[1].label(), "twitter.tweets.post");
    }
}
