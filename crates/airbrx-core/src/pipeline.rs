//! Dependency-ordered orchestrator
//!
//! A pipeline is a fixed list of phases; a phase is an ordered list of steps.
//! Every step declares the artifact keys it reads (`requires`) and writes
//! (`produces`). Phases and steps run strictly in order, one at a time.
//!
//! ```text
//! Pipeline::validate     static: each required key has an earlier producer
//!        │
//! Orchestrator::run
//!   for phase:
//!     for step:
//!       requires ⊆ registry ?  ── no ──▶ MissingArtifact (always fatal)
//!       execute(ctx, &registry)
//!         ├─ Ok(output)  → produces == output keys → registry.merge
//!         └─ Err(e)      → fatal phase: abort / non-fatal phase: warning
//!     snapshot RunState (optional)
//! ```

use crate::error::{DeployError, Result};
use crate::health::HealthReport;
use crate::registry::{ArtifactKey, ArtifactRecord, ArtifactRegistry};
use airbrx_cloud::{Action, ActionSummary, RunOutcome, RunState, StateManager};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

/// One idempotent unit of work
#[async_trait]
pub trait Step<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    fn requires(&self) -> &[ArtifactKey] {
        &[]
    }

    fn produces(&self) -> &[ArtifactKey] {
        &[]
    }

    async fn execute(&self, ctx: &C, registry: &ArtifactRegistry) -> Result<StepOutput>;
}

/// What a step hands back to the orchestrator
#[derive(Debug, Default)]
pub struct StepOutput {
    pub record: ArtifactRecord,
    pub actions: Vec<Action>,
    pub warnings: Vec<String>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifact(mut self, key: ArtifactKey, value: impl Into<String>) -> Self {
        self.record.insert(key, value);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub struct Phase<C> {
    pub name: String,
    pub steps: Vec<Box<dyn Step<C>>>,
    /// Non-fatal phases turn step errors into warnings
    pub fatal: bool,
}

impl<C: Send + Sync> Phase<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            fatal: true,
        }
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn step(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }
}

pub struct Pipeline<C> {
    phases: Vec<Phase<C>>,
}

impl<C: Send + Sync> Pipeline<C> {
    pub fn new(phases: Vec<Phase<C>>) -> Self {
        Self { phases }
    }

    pub fn phases(&self) -> &[Phase<C>] {
        &self.phases
    }

    /// Check the dependency graph without touching any provider: every
    /// required key must be produced by an earlier step, and no key may have
    /// two producers.
    pub fn validate(&self) -> Result<()> {
        let mut available: BTreeSet<ArtifactKey> = BTreeSet::new();
        let mut step_names: BTreeSet<&str> = BTreeSet::new();

        for phase in &self.phases {
            for step in &phase.steps {
                if !step_names.insert(step.name()) {
                    return Err(DeployError::InvalidPipeline(format!(
                        "step name '{}' is used twice",
                        step.name()
                    )));
                }
                for key in step.requires() {
                    if !available.contains(key) {
                        return Err(DeployError::MissingArtifact {
                            step: step.name().to_string(),
                            key: *key,
                        });
                    }
                }
                for key in step.produces() {
                    if !available.insert(*key) {
                        return Err(DeployError::InvalidPipeline(format!(
                            "{} is produced by more than one step (again in '{}')",
                            key,
                            step.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Progress callbacks, used by the CLI spinner
pub trait ProgressObserver: Send + Sync {
    fn phase_started(&self, _index: usize, _total: usize, _phase: &str) {}
    fn step_started(&self, _phase: &str, _step: &str) {}
    fn phase_finished(&self, _report: &PhaseReport) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    CompletedWithWarnings,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub name: String,
    pub status: PhaseStatus,
    pub actions: Vec<Action>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// Outcome of a completed pipeline run
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    pub phases: Vec<PhaseReport>,
    pub registry: ArtifactRegistry,
    pub health: Option<HealthReport>,
    pub duration_ms: u64,
}

impl DeploymentResult {
    pub fn summary(&self) -> ActionSummary {
        ActionSummary::from_actions(self.phases.iter().flat_map(|p| p.actions.iter()))
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.phases
            .iter()
            .flat_map(|p| p.warnings.iter().map(String::as_str))
            .collect()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.phases.iter().flat_map(|p| p.actions.iter())
    }
}

/// Snapshot target for `RunState`
struct Snapshot {
    manager: StateManager,
    state: RunState,
}

pub struct Orchestrator<C> {
    pipeline: Pipeline<C>,
    snapshot: Option<Snapshot>,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl<C: Send + Sync> Orchestrator<C> {
    pub fn new(pipeline: Pipeline<C>) -> Self {
        Self {
            pipeline,
            snapshot: None,
            observer: None,
        }
    }

    /// Write a `RunState` snapshot after every phase
    pub fn with_state(mut self, manager: StateManager, prefix: &str) -> Self {
        self.snapshot = Some(Snapshot {
            manager,
            state: RunState::new(prefix),
        });
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn pipeline(&self) -> &Pipeline<C> {
        &self.pipeline
    }

    pub async fn run(mut self, ctx: &C) -> Result<DeploymentResult> {
        self.pipeline.validate()?;

        let started = Instant::now();
        let mut registry = ArtifactRegistry::new();
        let mut reports = Vec::new();
        let total = self.pipeline.phases.len();

        for (index, phase) in self.pipeline.phases.iter().enumerate() {
            if let Some(observer) = &self.observer {
                observer.phase_started(index + 1, total, &phase.name);
            }
            tracing::info!("Phase {}/{}: {}", index + 1, total, phase.name);

            match run_phase(phase, ctx, &mut registry, self.observer.as_deref()).await {
                Ok(report) => {
                    if let Some(observer) = &self.observer {
                        observer.phase_finished(&report);
                    }
                    if let Some(snapshot) = &mut self.snapshot {
                        snapshot.state.complete_phase(&phase.name);
                        snapshot.state.set_artifacts(registry.iter());
                        snapshot.manager.save(&snapshot.state).await?;
                    }
                    reports.push(report);
                }
                Err(err) => {
                    tracing::error!("Phase {} failed: {}", phase.name, err);
                    if let Some(snapshot) = &mut self.snapshot {
                        snapshot.state.set_artifacts(registry.iter());
                        snapshot.state.finish(RunOutcome::Failed {
                            phase: phase.name.clone(),
                            error: err.to_string(),
                        });
                        if let Err(save_err) = snapshot.manager.save(&snapshot.state).await {
                            tracing::warn!("Could not save run state: {}", save_err);
                        }
                    }
                    return Err(err);
                }
            }
        }

        if let Some(snapshot) = &mut self.snapshot {
            snapshot.state.finish(RunOutcome::Succeeded);
            snapshot.manager.save(&snapshot.state).await?;
        }

        Ok(DeploymentResult {
            phases: reports,
            registry,
            health: None,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

async fn run_phase<C: Send + Sync>(
    phase: &Phase<C>,
    ctx: &C,
    registry: &mut ArtifactRegistry,
    observer: Option<&dyn ProgressObserver>,
) -> Result<PhaseReport> {
    let started = Instant::now();
    let mut actions = Vec::new();
    let mut warnings = Vec::new();

    let fail = |step: &str, source: DeployError| DeployError::PhaseFailed {
        phase: phase.name.clone(),
        step: step.to_string(),
        source: Box::new(source),
    };

    for step in &phase.steps {
        let name = step.name();

        // Dependency errors abort even in non-fatal phases
        for key in step.requires() {
            if !registry.contains(*key) {
                return Err(fail(
                    name,
                    DeployError::MissingArtifact {
                        step: name.to_string(),
                        key: *key,
                    },
                ));
            }
        }

        if let Some(observer) = observer {
            observer.step_started(&phase.name, name);
        }
        tracing::debug!("Step {} / {}", phase.name, name);

        match step.execute(ctx, registry).await {
            Ok(output) => {
                check_outputs(name, step.produces(), &output.record)
                    .map_err(|e| fail(name, e))?;
                registry.merge(output.record).map_err(|e| fail(name, e))?;
                actions.extend(output.actions);
                warnings.extend(output.warnings);
            }
            Err(err) if !phase.fatal => {
                tracing::warn!("{} / {}: {}", phase.name, name, err);
                warnings.push(format!("{}: {}", name, err));
            }
            Err(err) => return Err(fail(name, err)),
        }
    }

    Ok(PhaseReport {
        name: phase.name.clone(),
        status: if warnings.is_empty() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::CompletedWithWarnings
        },
        actions,
        warnings,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn check_outputs(step: &str, declared: &[ArtifactKey], record: &ArtifactRecord) -> Result<()> {
    for key in declared {
        if !record.contains(*key) {
            return Err(DeployError::MissingOutput {
                step: step.to_string(),
                key: *key,
            });
        }
    }
    for key in record.keys() {
        if !declared.contains(&key) {
            return Err(DeployError::UndeclaredOutput {
                step: step.to_string(),
                key,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the order in which steps ran
    #[derive(Default)]
    struct Journal {
        ran: Mutex<Vec<String>>,
    }

    struct FakeStep {
        name: &'static str,
        requires: Vec<ArtifactKey>,
        produces: Vec<ArtifactKey>,
        output: Vec<(ArtifactKey, &'static str)>,
        fail: bool,
    }

    impl FakeStep {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                requires: Vec::new(),
                produces: Vec::new(),
                output: Vec::new(),
                fail: false,
            }
        }

        fn requires(mut self, key: ArtifactKey) -> Self {
            self.requires.push(key);
            self
        }

        fn produces(mut self, key: ArtifactKey, value: &'static str) -> Self {
            self.produces.push(key);
            self.output.push((key, value));
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Step<Journal> for FakeStep {
        fn name(&self) -> &str {
            self.name
        }

        fn requires(&self) -> &[ArtifactKey] {
            &self.requires
        }

        fn produces(&self) -> &[ArtifactKey] {
            &self.produces
        }

        async fn execute(&self, ctx: &Journal, _registry: &ArtifactRegistry) -> Result<StepOutput> {
            ctx.ran.lock().unwrap().push(self.name.to_string());
            if self.fail {
                return Err(DeployError::Source(format!("{} failed", self.name)));
            }
            let mut output = StepOutput::new();
            for (key, value) in &self.output {
                output = output.artifact(*key, *value);
            }
            Ok(output)
        }
    }

    #[tokio::test]
    async fn test_runs_in_declaration_order() {
        let pipeline = Pipeline::new(vec![
            Phase::new("one")
                .step(FakeStep::new("a").produces(ArtifactKey::ApiFunctionUrl, "https://a/"))
                .step(FakeStep::new("b").requires(ArtifactKey::ApiFunctionUrl)),
            Phase::new("two").step(FakeStep::new("c").requires(ArtifactKey::ApiFunctionUrl)),
        ]);
        let journal = Journal::default();

        let result = Orchestrator::new(pipeline).run(&journal).await.unwrap();
        assert_eq!(*journal.ran.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(result.phases.len(), 2);
        assert_eq!(
            result.registry.get(ArtifactKey::ApiFunctionUrl),
            Some("https://a/")
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_missing_producer() {
        let pipeline: Pipeline<Journal> = Pipeline::new(vec![
            Phase::new("one").step(FakeStep::new("a").requires(ArtifactKey::GatewayFqdn)),
        ]);
        let journal = Journal::default();

        let err = Orchestrator::new(pipeline).run(&journal).await.unwrap_err();
        assert!(matches!(err, DeployError::MissingArtifact { .. }));
        // Nothing ran
        assert!(journal.ran.lock().unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_producer_after_consumer() {
        let pipeline: Pipeline<Journal> = Pipeline::new(vec![
            Phase::new("one").step(FakeStep::new("a").requires(ArtifactKey::GatewayFqdn)),
            Phase::new("two").step(FakeStep::new("b").produces(ArtifactKey::GatewayFqdn, "x")),
        ]);
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_producer() {
        let pipeline: Pipeline<Journal> = Pipeline::new(vec![Phase::new("one")
            .step(FakeStep::new("a").produces(ArtifactKey::TenantId, "x"))
            .step(FakeStep::new("b").produces(ArtifactKey::TenantId, "x"))]);
        assert!(matches!(
            pipeline.validate(),
            Err(DeployError::InvalidPipeline(_))
        ));
    }

    #[tokio::test]
    async fn test_fatal_phase_aborts() {
        let pipeline = Pipeline::new(vec![
            Phase::new("one")
                .step(FakeStep::new("a").failing())
                .step(FakeStep::new("b")),
            Phase::new("two").step(FakeStep::new("c")),
        ]);
        let journal = Journal::default();

        let err = Orchestrator::new(pipeline).run(&journal).await.unwrap_err();
        match err {
            DeployError::PhaseFailed { phase, step, .. } => {
                assert_eq!(phase, "one");
                assert_eq!(step, "a");
            }
            other => panic!("Expected PhaseFailed, got {:?}", other),
        }
        assert_eq!(*journal.ran.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_non_fatal_phase_downgrades_errors() {
        let pipeline = Pipeline::new(vec![Phase::new("validation")
            .non_fatal()
            .step(FakeStep::new("a").failing())
            .step(FakeStep::new("b"))]);
        let journal = Journal::default();

        let result = Orchestrator::new(pipeline).run(&journal).await.unwrap();
        assert_eq!(result.phases[0].status, PhaseStatus::CompletedWithWarnings);
        assert_eq!(result.warnings().len(), 1);
        assert_eq!(*journal.ran.lock().unwrap(), vec!["a", "b"]);
    }

    struct Liar;

    #[async_trait]
    impl Step<Journal> for Liar {
        fn name(&self) -> &str {
            "liar"
        }

        fn produces(&self) -> &[ArtifactKey] {
            &[ArtifactKey::AppCdnDomain]
        }

        async fn execute(&self, _ctx: &Journal, _registry: &ArtifactRegistry) -> Result<StepOutput> {
            Ok(StepOutput::new().artifact(ArtifactKey::AppBucket, "x"))
        }
    }

    #[tokio::test]
    async fn test_output_must_match_declaration() {
        let pipeline = Pipeline::new(vec![Phase::new("one").step(Liar)]);
        let err = Orchestrator::new(pipeline)
            .run(&Journal::default())
            .await
            .unwrap_err();
        assert!(matches!(err.root(), DeployError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_written_per_phase() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(vec![
            Phase::new("one").step(FakeStep::new("a").produces(ArtifactKey::AdminBucket, "b1")),
            Phase::new("two").step(FakeStep::new("b").failing()),
        ]);

        let result = Orchestrator::new(pipeline)
            .with_state(StateManager::new(dir.path()), "acme-dev")
            .run(&Journal::default())
            .await;
        assert!(result.is_err());

        let state = StateManager::new(dir.path()).load().await.unwrap().unwrap();
        assert_eq!(state.last_phase(), Some("one"));
        assert_eq!(
            state.artifacts.get("adminStorage.bucket").map(String::as_str),
            Some("b1")
        );
        assert!(matches!(state.outcome, RunOutcome::Failed { ref phase, .. } if phase == "two"));
    }
}
