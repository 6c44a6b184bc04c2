//! Task unit contract
//!
//! A unit declares what it reads (`required_inputs`, `optional_inputs`,
//! `depends_on`) and what it writes (`outputs`). The scheduler only ever calls
//! `execute` or `refine`; both always hand back a `TaskOutput`, folding
//! validation errors, unit errors, panics and timeouts into a failed output.

pub mod catalog;
mod clusters;
mod null;
mod prompt;
mod registry;
mod types;
mod weather;

pub use clusters::ClusterUnit;
pub use null::NullUnit;
pub use prompt::PromptUnit;
pub use registry::UnitRegistry;
pub use types::*;
pub use weather::WeatherUnit;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::UnitError;

/// Static declaration of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub name: String,
    pub description: String,
    pub required_inputs: Vec<String>,
    pub optional_inputs: Vec<String>,
    /// Output slots this unit may write
    pub outputs: Vec<String>,
    /// Units whose outputs this unit may read
    pub depends_on: Vec<String>,
    pub supports_refinement: bool,
}

#[async_trait]
pub trait TaskUnit: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;

    /// Unit-specific work. Errors are caught by `execute`.
    async fn run(&self, input: &UnitInput, ctx: &UnitContext) -> Result<UnitResult, UnitError>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn supports_refinement(&self) -> bool {
        self.descriptor().supports_refinement
    }

    fn validate_inputs(&self, input: &UnitInput) -> ValidationResult {
        let missing_fields: Vec<String> = self
            .descriptor()
            .required_inputs
            .iter()
            .filter(|field| !input.has_field(field))
            .cloned()
            .collect();

        ValidationResult {
            valid: missing_fields.is_empty(),
            missing_fields,
        }
    }

    async fn execute(&self, input: &UnitInput, ctx: &UnitContext) -> TaskOutput {
        let start = Instant::now();
        ctx.report_progress(0);

        let validation = self.validate_inputs(input);
        let output = if !validation.valid {
            let err = UnitError::Validation(validation.missing_fields);
            debug!("Unit {} rejected input: {}", self.name(), err);
            TaskOutput::failed(err.to_string())
        } else {
            let guarded = AssertUnwindSafe(self.run(input, ctx)).catch_unwind();
            match tokio::time::timeout(ctx.timeout, guarded).await {
                Ok(Ok(Ok(result))) => keep_declared_slots(self.descriptor(), result),
                Ok(Ok(Err(e))) => {
                    warn!("Unit {} failed: {}", self.name(), e);
                    TaskOutput::failed(e.to_string())
                }
                Ok(Err(_)) => {
                    warn!("Unit {} panicked", self.name());
                    TaskOutput::failed(
                        UnitError::Execution(format!("unit {} panicked", self.name()))
                            .to_string(),
                    )
                }
                Err(_) => {
                    warn!("Unit {} timed out after {:?}", self.name(), ctx.timeout);
                    TaskOutput::failed(UnitError::Timeout(ctx.timeout).to_string())
                }
            }
        };

        ctx.report_progress(100);
        output.with_elapsed(start.elapsed())
    }

    /// Re-run with feedback placed in `refinementInstructions`. Units that do
    /// not support refinement reject the call.
    async fn refine(
        &self,
        feedback: &str,
        previous: &TaskOutput,
        input: &UnitInput,
        ctx: &UnitContext,
    ) -> Result<TaskOutput, UnitError> {
        if !self.supports_refinement() {
            return Err(UnitError::RefinementUnsupported(self.name().to_string()));
        }

        debug!(
            "Refining {} (previous confidence {:.0})",
            self.name(),
            previous.confidence
        );
        let refined_input = input.clone().with_instructions(feedback);
        Ok(self.execute(&refined_input, ctx).await)
    }
}

fn keep_declared_slots(descriptor: &UnitDescriptor, mut result: UnitResult) -> TaskOutput {
    result.data.retain(|slot, _| {
        let declared = descriptor.outputs.iter().any(|o| o == slot);
        if !declared {
            warn!(
                "Unit {} produced undeclared slot '{}', dropping it",
                descriptor.name, slot
            );
        }
        declared
    });
    TaskOutput::from_result(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{City, Preferences};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct ScriptedUnit {
        descriptor: UnitDescriptor,
        behaviour: Behaviour,
        calls: AtomicU32,
        last_instructions: Mutex<Option<String>>,
    }

    impl ScriptedUnit {
        fn new(behaviour: Behaviour, refinable: bool) -> Self {
            Self {
                descriptor: UnitDescriptor {
                    name: "hidden_gems".to_string(),
                    description: "test unit".to_string(),
                    required_inputs: vec![fields::CITY.to_string(), fields::NIGHTS.to_string()],
                    optional_inputs: vec![fields::dependency("preference_matcher")],
                    outputs: vec![slots::HIDDEN_GEMS.to_string()],
                    depends_on: vec!["preference_matcher".to_string()],
                    supports_refinement: refinable,
                },
                behaviour,
                calls: AtomicU32::new(0),
                last_instructions: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TaskUnit for ScriptedUnit {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.descriptor
        }

        async fn run(
            &self,
            input: &UnitInput,
            _ctx: &UnitContext,
        ) -> Result<UnitResult, UnitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_instructions.lock().unwrap() = input.refinement_instructions.clone();
            match &self.behaviour {
                Behaviour::Succeed => Ok(UnitResult::new(82.0)
                    .with_slot(slots::HIDDEN_GEMS, json!([{"name": "Tasca"}]))
                    .with_slot("undeclared", json!(true))),
                Behaviour::Fail => Err(UnitError::Execution("places service down".to_string())),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(UnitResult::new(50.0))
                }
            }
        }
    }

    fn input() -> UnitInput {
        UnitInput::new(
            City {
                id: "porto".to_string(),
                name: "Porto".to_string(),
                country: Some("PT".to_string()),
                description: None,
                latitude: None,
                longitude: None,
            },
            2,
            Preferences::default(),
        )
    }

    fn recording_ctx() -> (UnitContext, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(5))
            .with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));
        (ctx, seen)
    }

    #[tokio::test]
    async fn test_execute_success_keeps_declared_slots() {
        let unit = ScriptedUnit::new(Behaviour::Succeed, true);
        let (ctx, seen) = recording_ctx();

        let out = unit.execute(&input(), &ctx).await;

        assert!(out.success);
        assert_eq!(out.confidence, 82.0);
        assert!(out.data.contains_key(slots::HIDDEN_GEMS));
        assert!(!out.data.contains_key("undeclared"));
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[tokio::test]
    async fn test_execute_wraps_run_error() {
        let unit = ScriptedUnit::new(Behaviour::Fail, true);
        let (ctx, seen) = recording_ctx();

        let out = unit.execute(&input(), &ctx).await;

        assert!(!out.success);
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.gaps, vec!["places service down".to_string()]);
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[tokio::test]
    async fn test_execute_wraps_panic() {
        let unit = ScriptedUnit::new(Behaviour::Panic, true);
        let (ctx, _) = recording_ctx();

        let out = unit.execute(&input(), &ctx).await;

        assert!(!out.success);
        assert_eq!(out.confidence, 0.0);
        assert!(out.gaps[0].contains("panicked"));
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_required_input() {
        let unit = ScriptedUnit::new(Behaviour::Succeed, true);
        let (ctx, seen) = recording_ctx();
        let mut bad = input();
        bad.nights = 0;

        let out = unit.execute(&bad, &ctx).await;

        assert!(!out.success);
        assert!(out.gaps[0].contains("nights"));
        assert_eq!(unit.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[test]
    fn test_missing_optional_dependency_is_valid() {
        let unit = ScriptedUnit::new(Behaviour::Succeed, true);
        let validation = unit.validate_inputs(&input());
        assert!(validation.valid);
        assert!(validation.missing_fields.is_empty());
    }

    #[test]
    fn test_failed_dependency_does_not_count_as_present() {
        let mut previous = BTreeMap::new();
        previous.insert(
            "preference_matcher".to_string(),
            TaskOutput::failed("backend down"),
        );
        let with_failed = input().with_previous_outputs(previous);
        assert!(!with_failed.has_field(&fields::dependency("preference_matcher")));
    }

    #[tokio::test]
    async fn test_execute_times_out_slow_unit() {
        let unit = ScriptedUnit::new(Behaviour::Sleep(Duration::from_secs(30)), true);
        let ctx = UnitContext::new("s1", 1, Duration::from_millis(20));

        let out = unit.execute(&input(), &ctx).await;

        assert!(!out.success);
        assert!(out.gaps[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_refine_rejected_when_unsupported() {
        let unit = ScriptedUnit::new(Behaviour::Succeed, false);
        let (ctx, _) = recording_ctx();
        let previous = unit.execute(&input(), &ctx).await;

        let result = unit.refine("add more cafes", &previous, &input(), &ctx).await;

        assert!(matches!(result, Err(UnitError::RefinementUnsupported(name)) if name == "hidden_gems"));
        assert_eq!(unit.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refine_passes_instructions_and_returns_fresh_output() {
        let unit = ScriptedUnit::new(Behaviour::Succeed, true);
        let (ctx, _) = recording_ctx();
        let previous = TaskOutput::failed("earlier attempt failed");

        let refined = unit
            .refine("include a vegetarian market", &previous, &input(), &ctx)
            .await
            .unwrap();

        assert!(refined.success);
        assert!(!refined.gaps.contains(&"earlier attempt failed".to_string()));
        assert_eq!(
            unit.last_instructions.lock().unwrap().as_deref(),
            Some("include a vegetarian market")
        );
    }

    #[tokio::test]
    async fn test_refine_with_identical_previous_sets_elapsed_time() {
        let unit = ScriptedUnit::new(Behaviour::Sleep(Duration::from_millis(5)), true);
        let (ctx, _) = recording_ctx();
        let previous = unit.execute(&input(), &ctx).await;

        let first = unit.refine("tighten", &previous, &input(), &ctx).await.unwrap();
        let second = unit.refine("tighten", &previous, &input(), &ctx).await.unwrap();

        assert!(first.execution_time_ms >= 5);
        assert!(second.execution_time_ms >= 5);
        assert_eq!(first.success, second.success);
    }
}
