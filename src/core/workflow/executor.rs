use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::credentials::{CredentialResolver, Platform};
use crate::core::error::EngineError;
use crate::core::registry::{Invocation, ModuleRegistry};
use crate::core::workflow::{
    ErrorPolicy, ParamValue, RunReport, RunStatus, StepOutcome, StepStatus, WorkflowConfig,
    WorkflowStep,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replace side-effecting module calls with synthetic results.
    pub dry_run: bool,
    /// Free-form run context forwarded to every handler (e.g. the raw chat
    /// input that triggered the run).
    pub context: Option<String>,
}

/// Runs workflow configurations step by step. Holds no cross-run mutable
/// state; concurrent runs only share the read-only registry and the
/// resolver, so they are safe by construction.
pub struct WorkflowExecutor {
    registry: Arc<ModuleRegistry>,
    resolver: CredentialResolver,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ModuleRegistry>, resolver: CredentialResolver) -> Self {
        Self { registry, resolver }
    }

    pub async fn run(
        &self,
        config: &WorkflowConfig,
        user_id: &str,
        options: &RunOptions,
    ) -> RunReport {
        let mut outcomes = Vec::with_capacity(config.steps.len());
        // Outputs of completed steps, keyed by declared step id. Only steps
        // that already finished successfully are visible to bindings, which
        // is what makes forward references fail.
        let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut any_continue_failure = false;

        for (index, step) in config.steps.iter().enumerate() {
            match self.execute_step(step, user_id, options, &outputs).await {
                Ok((output, synthetic)) => {
                    if let Some(id) = &step.id {
                        outputs.insert(id.clone(), output.clone());
                    }
                    outcomes.push(StepOutcome {
                        index,
                        step: step.label().to_string(),
                        module: step.module.clone(),
                        status: StepStatus::Completed { output, synthetic },
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    outcomes.push(StepOutcome {
                        index,
                        step: step.label().to_string(),
                        module: step.module.clone(),
                        status: StepStatus::Failed {
                            error: message.clone(),
                        },
                    });

                    match step.on_error {
                        ErrorPolicy::Abort => {
                            warn!(step = step.label(), index, "workflow run aborted: {message}");
                            return RunReport {
                                status: RunStatus::Failed,
                                outcomes,
                                error: Some(format!(
                                    "step {} ({}): {}",
                                    index,
                                    step.module,
                                    message
                                )),
                            };
                        }
                        ErrorPolicy::Continue => {
                            info!(step = step.label(), index, "step failed, continuing: {message}");
                            any_continue_failure = true;
                        }
                    }
                }
            }
        }

        RunReport {
            status: if any_continue_failure {
                RunStatus::Partial
            } else {
                RunStatus::Success
            },
            outcomes,
            error: None,
        }
    }

    async fn execute_step(
        &self,
        step: &WorkflowStep,
        user_id: &str,
        options: &RunOptions,
        outputs: &HashMap<String, serde_json::Value>,
    ) -> Result<(serde_json::Value, bool), EngineError> {
        let (_, handler) = self.registry.resolve(&step.module)?;

        let mut params = serde_json::Map::new();
        for (key, value) in &step.params {
            let resolved = match value {
                ParamValue::Literal(literal) => literal.clone(),
                ParamValue::Binding(binding) => {
                    let source = outputs.get(&binding.step).ok_or_else(|| {
                        EngineError::InvalidBinding {
                            step: step.label().to_string(),
                            reference: binding.step.clone(),
                        }
                    })?;
                    match &binding.output {
                        Some(output_key) => source
                            .get(output_key)
                            .cloned()
                            .ok_or_else(|| EngineError::InvalidBinding {
                                step: step.label().to_string(),
                                reference: format!("{}.{}", binding.step, output_key),
                            })?,
                        None => source.clone(),
                    }
                }
            };
            params.insert(key.clone(), resolved);
        }

        let platform = match &step.platform {
            Some(id) => Some(
                Platform::parse(id)
                    .ok_or_else(|| EngineError::NotFound(format!("platform '{}'", id)))?,
            ),
            None => handler.platform(),
        };

        let credentials = match platform {
            Some(platform) => self.resolver.resolve(user_id, platform, None).await?,
            None => HashMap::new(),
        };

        let invocation = Invocation {
            params,
            credentials,
            context: options.context.clone(),
        };

        if options.dry_run && handler.side_effecting() {
            let output = handler
                .dry_run(&invocation)
                .await
                .map_err(|e| EngineError::step_failed(step.label(), e))?;
            return Ok((output, true));
        }

        let output = handler
            .invoke(&invocation)
            .await
            .map_err(|e| EngineError::step_failed(step.label(), e))?;
        Ok((output, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{ModuleDescriptor, ModuleHandler};
    use crate::core::storage::Storage;
    use crate::core::vault::CredentialVault;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl ModuleHandler for Echo {
        async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Object(invocation.params.clone()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ModuleHandler for AlwaysFails {
        async fn invoke(&self, _: &Invocation) -> Result<serde_json::Value> {
            Err(anyhow::anyhow!("upstream timed out"))
        }
    }

    struct Poster {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModuleHandler for Poster {
        fn side_effecting(&self) -> bool {
            true
        }

        async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "id": "real-123", "text": invocation.params.get("text") }))
        }

        async fn dry_run(&self, invocation: &Invocation) -> Result<serde_json::Value> {
            Ok(json!({ "id": "dry-run", "text": invocation.params.get("text") }))
        }
    }

    struct NeedsOpenAi;

    #[async_trait]
    impl ModuleHandler for NeedsOpenAi {
        fn platform(&self) -> Option<Platform> {
            Some(Platform::OpenAi)
        }

        async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
            Ok(json!({ "key_seen": invocation.credential("api_key")? }))
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn executor(registry: ModuleRegistry) -> WorkflowExecutor {
        let vault = CredentialVault::new(Storage::open_in_memory().unwrap());
        WorkflowExecutor::new(
            Arc::new(registry),
            CredentialResolver::with_env_lookup(vault, no_env),
        )
    }

    fn registry_with(entries: Vec<(&str, Arc<dyn ModuleHandler>)>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for (path, handler) in entries {
            let mut parts = path.splitn(3, '.');
            let descriptor = ModuleDescriptor::new(
                parts.next().unwrap(),
                parts.next().unwrap(),
                parts.next().unwrap(),
                "test module",
                "()",
            );
            registry.register(descriptor, handler);
        }
        registry
    }

    #[tokio::test]
    async fn binds_outputs_of_completed_steps() {
        let executor = executor(registry_with(vec![("t.m.echo", Arc::new(Echo))]));
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.echo")
                    .with_id("first")
                    .literal("value", json!(41)),
                WorkflowStep::new("t.m.echo").binding("carried", "first", Some("value")),
            ],
        };

        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Success);
        match &report.outcomes[1].status {
            StepStatus::Completed { output, .. } => assert_eq!(output["carried"], json!(41)),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_reference_is_invalid_binding() {
        let executor = executor(registry_with(vec![("t.m.echo", Arc::new(Echo))]));
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.echo").binding("early", "later", None),
                WorkflowStep::new("t.m.echo").with_id("later"),
            ],
        };

        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.outcomes.len(), 1);
        let error = report.error.unwrap();
        assert!(error.contains("unresolvable binding"), "{error}");
        assert!(error.contains("later"), "{error}");
    }

    #[tokio::test]
    async fn continue_step_failure_yields_partial_run() {
        let executor = executor(registry_with(vec![
            ("t.m.echo", Arc::new(Echo)),
            ("t.m.fail", Arc::new(AlwaysFails)),
        ]));
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.fail")
                    .with_id("flaky")
                    .continue_on_error(),
                WorkflowStep::new("t.m.echo").literal("value", json!("after")),
            ],
        };

        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcomes[1].status,
            StepStatus::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn binding_to_failed_continue_step_is_invalid_binding() {
        let executor = executor(registry_with(vec![
            ("t.m.echo", Arc::new(Echo)),
            ("t.m.fail", Arc::new(AlwaysFails)),
        ]));

        // Downstream step aborts: the whole run fails with InvalidBinding.
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.fail")
                    .with_id("flaky")
                    .continue_on_error(),
                WorkflowStep::new("t.m.echo").binding("value", "flaky", None),
            ],
        };
        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("unresolvable binding"));

        // Downstream step also declares continue: recorded, run is partial.
        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.fail")
                    .with_id("flaky")
                    .continue_on_error(),
                WorkflowStep::new("t.m.echo")
                    .binding("value", "flaky", None)
                    .continue_on_error(),
                WorkflowStep::new("t.m.echo").literal("value", json!("tail")),
            ],
        };
        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(
            report.outcomes[2].status,
            StepStatus::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn dry_run_replaces_side_effects_and_keeps_bindings_working() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let executor = executor(registry_with(vec![
            (
                "t.m.post",
                Arc::new(Poster {
                    invocations: Arc::clone(&invocations),
                }) as Arc<dyn ModuleHandler>,
            ),
            ("t.m.echo", Arc::new(Echo)),
        ]));

        let config = WorkflowConfig {
            steps: vec![
                WorkflowStep::new("t.m.post")
                    .with_id("post")
                    .literal("text", json!("hello")),
                WorkflowStep::new("t.m.echo").binding("posted_id", "post", Some("id")),
            ],
        };

        let report = executor
            .run(
                &config,
                "u1",
                &RunOptions {
                    dry_run: true,
                    context: None,
                },
            )
            .await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(invocations.load(Ordering::SeqCst), 0, "no external call");
        match &report.outcomes[0].status {
            StepStatus::Completed { output, synthetic } => {
                assert!(synthetic);
                assert_eq!(output["id"], json!("dry-run"));
            }
            other => panic!("expected synthetic completion, got {other:?}"),
        }
        match &report.outcomes[1].status {
            StepStatus::Completed { output, .. } => {
                assert_eq!(output["posted_id"], json!("dry-run"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_leaves_read_only_steps_alone() {
        let executor = executor(registry_with(vec![("t.m.echo", Arc::new(Echo))]));
        let config = WorkflowConfig {
            steps: vec![WorkflowStep::new("t.m.echo").literal("q", json!("x"))],
        };
        let report = executor
            .run(
                &config,
                "u1",
                &RunOptions {
                    dry_run: true,
                    context: None,
                },
            )
            .await;
        match &report.outcomes[0].status {
            StepStatus::Completed { synthetic, .. } => assert!(!synthetic),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_configuration_error() {
        let executor = executor(registry_with(vec![(
            "ai.text.generate",
            Arc::new(NeedsOpenAi) as Arc<dyn ModuleHandler>,
        )]));
        let config = WorkflowConfig {
            steps: vec![WorkflowStep::new("ai.text.generate")],
        };

        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.unwrap();
        assert!(error.contains("'openai' is not configured"), "{error}");
        assert!(error.contains("api_key"), "{error}");
    }

    #[tokio::test]
    async fn unknown_module_path_fails_the_run() {
        let executor = executor(registry_with(vec![("t.m.echo", Arc::new(Echo))]));
        let config = WorkflowConfig {
            steps: vec![WorkflowStep::new("t.m.vanish")],
        };
        let report = executor.run(&config, "u1", &RunOptions::default()).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("t.m.vanish"));
    }
}
