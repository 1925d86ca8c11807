//! Orchestration engine.
//!
//! Drives one request through RESEARCH, GENERATE and the CRITIQUE/OPTIMIZE
//! loop until the [`TerminationPolicy`] accepts a draft or a stage fails.
//!
//! # Run lifecycle
//!
//! 1. Empty requests abort at RESEARCH with `InvalidRequest`.
//! 2. Feedback history is loaded once; an unreadable store annotates the run
//!    with `FeedbackUnavailable` and the run continues without history.
//! 3. Each stage gets one re-attempt with a corrective instruction when it
//!    fails on content (`GenerationIncomplete`, `ParseFailure`). Model
//!    failures abort at once since the fallback chain already absorbed them.
//! 4. The cancellation token is checked before every stage.
//! 5. Finished runs (accepted or failed, never cancelled) are appended to
//!    the feedback store.
//!
//! An [`Orchestrator`] is `Send + Sync`; concurrent runs share only the
//! framework repository, the model layer and the feedback store.

mod cancel;
mod state;

pub use cancel::CancellationToken;
pub use state::{
    Decision, Event, Machine, PipelineState, StagnationTracker, TRANSITIONS, TerminationPolicy,
    transition,
};

use crate::agents::{
    AgentError, Critic, CriticInput, Generator, GeneratorInput, Optimizer, OptimizerInput,
    ResearchInput, Researcher, RoleAgent, Rubric, classify_request,
};
use crate::config::NeuropromptConfig;
use crate::feedback::{FeedbackQuery, FeedbackStore, UnavailableFeedbackStore, open_store};
use crate::frameworks::FrameworkRepository;
use crate::llm::{AvailabilityTable, GenerateOptions, TextGenerator, build_access_layer};
use crate::models::{
    Annotation, Critique, FailureKind, Iteration, PromptDraft, RunFailure, RunOutcome, RunRecord,
    RunRecorder, RunResult, Stage,
};
use std::sync::Arc;
use std::time::Instant;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Score at or above which a draft is accepted.
    pub acceptance_threshold: f64,
    /// Cap on critiques per run.
    pub max_iterations: u32,
    /// Consecutive optimizations a high-severity finding may stay
    /// unaddressed before the run stops early.
    pub stagnation_limit: u32,
    /// Cap on technique notes from research.
    pub max_techniques: usize,
    /// Cap on past runs loaded from the feedback store.
    pub history_limit: usize,
    /// Base generation options for every agent.
    pub generate: GenerateOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 80.0,
            max_iterations: 3,
            stagnation_limit: 2,
            max_techniques: Researcher::DEFAULT_MAX_TECHNIQUES,
            history_limit: crate::feedback::DEFAULT_QUERY_LIMIT,
            generate: GenerateOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// The termination policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            threshold: self.acceptance_threshold,
            max_iterations: self.max_iterations,
            stagnation_limit: self.stagnation_limit,
        }
    }
}

/// Why [`Orchestrator::drive`] stopped short of acceptance.
enum Stop {
    Failed { stage: Stage, error: AgentError },
    Cancelled { stage: Stage },
}

/// A policy-accepted run.
struct Accepted {
    outcome: RunOutcome,
    framework: String,
    techniques: Vec<String>,
    latest: Iteration,
}

/// Runs requests through the role agents.
pub struct Orchestrator {
    config: PipelineConfig,
    repository: Arc<FrameworkRepository>,
    feedback: Option<Arc<dyn FeedbackStore>>,
    researcher: Researcher,
    generator: Generator,
    critic: Critic,
    optimizer: Optimizer,
}

impl Orchestrator {
    /// Creates an orchestrator whose agents all call `model`.
    #[must_use]
    pub fn new(
        model: Arc<dyn TextGenerator>,
        repository: Arc<FrameworkRepository>,
        config: PipelineConfig,
    ) -> Self {
        let options = config.generate.clone();
        Self {
            researcher: Researcher::new(Arc::clone(&model), options.clone())
                .with_max_techniques(config.max_techniques)
                .with_acceptance_threshold(config.acceptance_threshold),
            generator: Generator::new(Arc::clone(&model), options.clone()),
            critic: Critic::new(Arc::clone(&model), options.clone()),
            optimizer: Optimizer::new(model, options),
            config,
            repository,
            feedback: None,
        }
    }

    /// Builds the model chain, catalog, rubric and feedback store from
    /// configuration.
    ///
    /// A feedback store that cannot be opened does not fail construction;
    /// runs are annotated `FeedbackUnavailable` instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the model chain is invalid or the configured
    /// rubric cannot be loaded.
    pub fn from_config(config: &NeuropromptConfig) -> crate::Result<Self> {
        let availability = Arc::new(AvailabilityTable::new(config.availability));
        let layer = build_access_layer(
            &config.models,
            availability,
            config.bulkhead.as_ref(),
            config.http,
        )?;

        let repository = config.frameworks_dir.as_deref().map_or_else(
            FrameworkRepository::embedded,
            FrameworkRepository::load,
        );

        let mut orchestrator = Self::new(Arc::new(layer), Arc::new(repository), config.pipeline.clone());

        if let Some(path) = &config.rubric_path {
            orchestrator = orchestrator.with_rubric(Rubric::load(path)?);
        }

        match open_store(&config.feedback) {
            Ok(Some(store)) => orchestrator = orchestrator.with_feedback_store(store),
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(error = %e, "Feedback store unavailable, runs will not use history");
                orchestrator = orchestrator
                    .with_feedback_store(Arc::new(UnavailableFeedbackStore::new(e.to_string())));
            },
        }

        Ok(orchestrator)
    }

    /// Attaches a feedback store.
    #[must_use]
    pub fn with_feedback_store(mut self, store: Arc<dyn FeedbackStore>) -> Self {
        self.feedback = Some(store);
        self
    }

    /// Replaces the critic's rubric.
    #[must_use]
    pub fn with_rubric(mut self, rubric: Rubric) -> Self {
        self.critic = self.critic.with_rubric(rubric);
        self
    }

    /// Pipeline settings.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Framework catalog.
    #[must_use]
    pub const fn repository(&self) -> &Arc<FrameworkRepository> {
        &self.repository
    }

    /// Feedback store, if any.
    #[must_use]
    pub const fn feedback_store(&self) -> Option<&Arc<dyn FeedbackStore>> {
        self.feedback.as_ref()
    }

    /// Rubric the critic scores with.
    #[must_use]
    pub const fn rubric(&self) -> &Rubric {
        self.critic.rubric()
    }

    /// Runs a request to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] naming the failure kind and stage.
    pub fn run(&self, request: &str) -> Result<RunResult, RunFailure> {
        self.run_with_cancellation(request, &CancellationToken::new())
    }

    /// Runs a request, stopping before the next stage once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] naming the failure kind and stage; a
    /// cancelled run reports [`FailureKind::Cancelled`] and the stage that
    /// was about to start.
    pub fn run_with_cancellation(
        &self,
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunFailure> {
        let start = Instant::now();
        let mut recorder = RunRecorder::start(request);
        let mut machine = Machine::new();
        let run_id = recorder.run_id().to_string();

        let span = tracing::info_span!(
            "pipeline.run",
            run_id = %run_id,
            outcome = tracing::field::Empty
        );
        let _enter = span.enter();
        tracing::info!(chars = request.len(), "Pipeline run started");

        let driven = self.drive(request, cancel, &mut recorder, &mut machine);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(trail = ?machine.trail(), "Pipeline path");

        match driven {
            Ok(accepted) => {
                let best = recorder.best().cloned().unwrap_or(accepted.latest);
                let record = recorder.finish(accepted.outcome);
                span.record("outcome", accepted.outcome.as_str());
                self.persist(&record);
                record_run_metrics(accepted.outcome.as_str(), elapsed_ms, record.iterations.len());
                tracing::info!(
                    outcome = %accepted.outcome,
                    score = best.critique.score,
                    iterations = record.iterations.len(),
                    framework = %accepted.framework,
                    "Pipeline run finished"
                );

                let prompt = best.draft.full_text().to_string();
                Ok(RunResult {
                    run_id,
                    prompt,
                    draft: best.draft,
                    framework: accepted.framework,
                    iterations: record.iterations.len(),
                    final_score: best.critique.score,
                    outcome: accepted.outcome,
                    annotations: record.annotations,
                    techniques: accepted.techniques,
                })
            },
            Err(Stop::Failed { stage, error }) => {
                let kind = error.kind();
                let record = recorder.finish(RunOutcome::Failed { kind, stage });
                span.record("outcome", "failed");
                self.persist(&record);
                record_run_metrics("failed", elapsed_ms, record.iterations.len());
                metrics::counter!(
                    "pipeline_failures_total",
                    "kind" => kind.as_str(),
                    "stage" => stage.as_str()
                )
                .increment(1);
                tracing::error!(kind = %kind, stage = %stage, error = %error, "Pipeline run failed");

                Err(RunFailure {
                    kind,
                    stage,
                    message: error.to_string(),
                    run_id,
                })
            },
            Err(Stop::Cancelled { stage }) => {
                span.record("outcome", "cancelled");
                record_run_metrics("cancelled", elapsed_ms, recorder.iterations().len());
                tracing::warn!(stage = %stage, "Pipeline run cancelled");

                Err(RunFailure {
                    kind: FailureKind::Cancelled,
                    stage,
                    message: "run cancelled".to_string(),
                    run_id,
                })
            },
        }
    }

    fn drive(
        &self,
        request: &str,
        cancel: &CancellationToken,
        recorder: &mut RunRecorder,
        machine: &mut Machine,
    ) -> Result<Accepted, Stop> {
        if request.trim().is_empty() {
            machine.fire(Event::Failed);
            return Err(Stop::Failed {
                stage: Stage::Research,
                error: AgentError::InvalidRequest("request is empty".to_string()),
            });
        }

        if self.repository.is_degraded() {
            tracing::warn!("Framework catalog degraded, using embedded frameworks");
            recorder.annotate(Annotation::CatalogDegraded);
        }
        let history = self.load_history(request, recorder);

        Self::checkpoint(cancel, machine)?;
        let research = self.attempt(Stage::Research, |correction| {
            self.researcher.invoke(ResearchInput {
                request,
                repository: &self.repository,
                history: &history,
                correction,
            })
        });
        let research = Self::settle(machine, Stage::Research, research)?;
        if research.degraded {
            recorder.annotate(Annotation::ResearchDegraded);
        }
        recorder.set_tags(research.tags.clone());
        recorder.set_framework(research.framework.name());
        machine.fire(Event::Completed);

        let framework = &research.framework;
        Self::checkpoint(cancel, machine)?;
        let generated = self.attempt(Stage::Generate, |correction| {
            self.generator.invoke(GeneratorInput {
                request,
                framework,
                techniques: &research.techniques,
                correction,
            })
        });
        let mut draft = Self::settle(machine, Stage::Generate, generated)?;
        machine.fire(Event::Completed);

        let policy = self.config.policy();
        let mut stagnation = StagnationTracker::new(self.config.stagnation_limit);
        loop {
            Self::checkpoint(cancel, machine)?;
            let critiqued = self.attempt(Stage::Critique, |correction| {
                self.critic.invoke(CriticInput {
                    draft: &draft,
                    request,
                    correction,
                })
            });
            let critique = Self::settle(machine, Stage::Critique, critiqued)?;

            let decision = policy.decide(critique.score, draft.iteration(), stagnation.is_stalled());
            Self::record_iteration(recorder, machine, &draft, &critique)?;

            if let Some(outcome) = decision.outcome() {
                if decision == Decision::EarlyStop {
                    let targets: Vec<String> = stagnation
                        .stalled_targets()
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    tracing::warn!(
                        targets = ?targets,
                        "High-severity findings left unaddressed, stopping early"
                    );
                    recorder.set_stalled_targets(targets);
                }
                machine.fire(Event::Accept);
                return Ok(Accepted {
                    outcome,
                    framework: framework.name().to_string(),
                    techniques: research.techniques.clone(),
                    latest: Iteration { draft, critique },
                });
            }
            machine.fire(Event::Refine);

            Self::checkpoint(cancel, machine)?;
            let optimized = self.attempt(Stage::Optimize, |correction| {
                self.optimizer.invoke(OptimizerInput {
                    draft: &draft,
                    critique: &critique,
                    request,
                    history: &history,
                    correction,
                })
            });
            let revision = Self::settle(machine, Stage::Optimize, optimized)?;
            stagnation.record(&revision.unaddressed);
            draft = revision.draft;
            machine.fire(Event::Completed);
        }
    }

    /// Runs one stage, re-attempting once with a corrective instruction on
    /// content failures.
    fn attempt<T>(
        &self,
        stage: Stage,
        mut invoke: impl FnMut(Option<&str>) -> Result<T, AgentError>,
    ) -> Result<T, AgentError> {
        let span = tracing::info_span!("pipeline.stage", stage = stage.as_str());
        let _enter = span.enter();
        let start = Instant::now();

        let mut result = invoke(None);
        let correction = match &result {
            Err(e) if e.is_stage_retriable() => Some(e.corrective_instruction()),
            _ => None,
        };
        if let Some(correction) = correction {
            tracing::warn!(stage = stage.as_str(), "Stage output rejected, re-attempting");
            metrics::counter!("pipeline_stage_retries_total", "stage" => stage.as_str())
                .increment(1);
            result = invoke(Some(&correction));
        }

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!(
            "pipeline_stage_total",
            "stage" => stage.as_str(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!("pipeline_stage_duration_ms", "stage" => stage.as_str())
            .record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Appends a scored iteration; a record that refuses it aborts the run.
    fn record_iteration(
        recorder: &mut RunRecorder,
        machine: &mut Machine,
        draft: &PromptDraft,
        critique: &Critique,
    ) -> Result<(), Stop> {
        recorder
            .push_iteration(draft.clone(), critique.clone())
            .map_err(|e| {
                tracing::error!(error = %e, "Iteration not recorded");
                machine.fire(Event::Failed);
                Stop::Failed {
                    stage: Stage::Critique,
                    error: AgentError::Internal(e.to_string()),
                }
            })
    }

    fn settle<T>(
        machine: &mut Machine,
        stage: Stage,
        result: Result<T, AgentError>,
    ) -> Result<T, Stop> {
        result.map_err(|error| {
            machine.fire(Event::Failed);
            Stop::Failed { stage, error }
        })
    }

    fn checkpoint(cancel: &CancellationToken, machine: &mut Machine) -> Result<(), Stop> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        let stage = machine.state().stage().unwrap_or(Stage::Research);
        machine.fire(Event::Cancelled);
        Err(Stop::Cancelled { stage })
    }

    fn load_history(&self, request: &str, recorder: &mut RunRecorder) -> Vec<RunRecord> {
        let Some(store) = &self.feedback else {
            return Vec::new();
        };
        let query = FeedbackQuery::for_request(request, classify_request(request))
            .with_limit(self.config.history_limit);
        match store.query(&query) {
            Ok(history) => {
                tracing::debug!(records = history.len(), store = store.name(), "Loaded run history");
                history
            },
            Err(e) => {
                tracing::warn!(error = %e, store = store.name(), "Feedback store unreadable, continuing without history");
                metrics::counter!("feedback_unavailable_total").increment(1);
                recorder.annotate(Annotation::FeedbackUnavailable);
                Vec::new()
            },
        }
    }

    fn persist(&self, record: &RunRecord) {
        let Some(store) = &self.feedback else {
            return;
        };
        if let Err(e) = store.append(record) {
            tracing::warn!(error = %e, run_id = %record.run_id, "Run record not persisted");
            metrics::counter!("feedback_append_failures_total").increment(1);
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_run_metrics(outcome: &'static str, duration_ms: f64, iterations: usize) {
    metrics::counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("pipeline_run_duration_ms", "outcome" => outcome).record(duration_ms);
    metrics::histogram!("pipeline_run_iterations").record(iterations as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedGenerator;
    use crate::feedback::InMemoryFeedbackStore;
    use crate::llm::CallFailureKind;

    const RESEARCH: &str = r#"{"techniques": ["Lead with the conclusion"], "rationale": "executive audience"}"#;
    const DRAFT: &str = r#"{"sections": {"Situation": "A long technical report exists.", "Complication": "Executives lack time.", "Question": "What matters?", "Answer": "Three bullet summary."}}"#;
    const REVISED: &str = r#"{"sections": {"Situation": "A 40 page report on the data platform migration.", "Answer": "Three bullets, under 120 words, ending with a decision."}}"#;
    const REQUEST: &str = "summarize a technical document for executives";

    fn critique(score: u32) -> String {
        format!(
            r#"{{"score": {score}, "findings": [
                {{"severity": "high", "section": "Situation", "suggestion": "Name the document"}},
                {{"severity": "high", "section": "Answer", "suggestion": "Bound the length"}}
            ], "summary": "needs specifics"}}"#
        )
    }

    fn orchestrator(replies: Vec<String>) -> (Orchestrator, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator::new(replies));
        let orchestrator = Orchestrator::new(
            Arc::clone(&generator) as Arc<dyn TextGenerator>,
            Arc::new(FrameworkRepository::embedded()),
            PipelineConfig::default(),
        );
        (orchestrator, generator)
    }

    #[test]
    fn test_orchestrator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Orchestrator>();
    }

    #[test]
    fn test_accepts_after_one_revision() {
        let (orchestrator, _) = orchestrator(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            critique(55),
            REVISED.to_string(),
            critique(88),
        ]);
        let result = orchestrator.run(REQUEST).unwrap();
        assert_eq!(result.framework, "SCQA");
        assert_eq!(result.outcome, RunOutcome::Accepted);
        assert_eq!(result.iterations, 2);
        assert!((result.final_score - 88.0).abs() < f64::EPSILON);
        assert_eq!(result.draft.iteration(), 2);
        assert!(result.prompt.contains("data platform migration"));
        assert_eq!(result.techniques, ["Lead with the conclusion"]);
    }

    #[test]
    fn test_budget_exhaustion_returns_best_draft() {
        let mut config = PipelineConfig::default();
        config.max_iterations = 2;
        let generator = Arc::new(ScriptedGenerator::new(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            r#"{"score": 70}"#.to_string(),
            REVISED.to_string(),
            r#"{"score": 60}"#.to_string(),
        ]));
        let orchestrator = Orchestrator::new(
            generator,
            Arc::new(FrameworkRepository::embedded()),
            config,
        );
        let result = orchestrator.run(REQUEST).unwrap();
        assert_eq!(result.outcome, RunOutcome::ExhaustedBudget);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.draft.iteration(), 1);
        assert!((result.final_score - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_failure_gets_one_corrective_retry() {
        let (orchestrator, generator) = orchestrator(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            "I think it is fine.".to_string(),
            r#"{"score": 91}"#.to_string(),
        ]);
        let result = orchestrator.run(REQUEST).unwrap();
        assert_eq!(result.outcome, RunOutcome::Accepted);
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[3].0.contains("<correction>"));
    }

    #[test]
    fn test_second_parse_failure_aborts() {
        let (orchestrator, _) = orchestrator(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            "no".to_string(),
            "still no".to_string(),
        ]);
        let failure = orchestrator.run(REQUEST).unwrap_err();
        assert_eq!(failure.kind, FailureKind::ParseFailure);
        assert_eq!(failure.stage, Stage::Critique);
    }

    #[test]
    fn test_auth_failure_aborts_without_retry() {
        let generator = Arc::new(ScriptedGenerator::failing(CallFailureKind::Authentication));
        let orchestrator = Orchestrator::new(
            Arc::clone(&generator) as Arc<dyn TextGenerator>,
            Arc::new(FrameworkRepository::embedded()),
            PipelineConfig::default(),
        );
        let failure = orchestrator.run(REQUEST).unwrap_err();
        assert_eq!(failure.kind, FailureKind::AuthFailure);
        assert_eq!(failure.stage, Stage::Research);
        assert_eq!(generator.prompts().len(), 1);
    }

    #[test]
    fn test_empty_request_is_invalid_and_persisted() {
        let store = Arc::new(InMemoryFeedbackStore::new());
        let (orchestrator, generator) = orchestrator(vec![]);
        let orchestrator = orchestrator.with_feedback_store(Arc::clone(&store) as Arc<dyn FeedbackStore>);
        let failure = orchestrator.run("   ").unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidRequest);
        assert_eq!(failure.stage, Stage::Research);
        assert!(generator.prompts().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cancelled_run_is_not_persisted() {
        let store = Arc::new(InMemoryFeedbackStore::new());
        let (orchestrator, generator) = orchestrator(vec![RESEARCH.to_string()]);
        let orchestrator = orchestrator.with_feedback_store(Arc::clone(&store) as Arc<dyn FeedbackStore>);
        let token = CancellationToken::new();
        token.cancel();
        let failure = orchestrator.run_with_cancellation(REQUEST, &token).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.stage, Stage::Research);
        assert!(generator.prompts().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unreadable_feedback_annotates_and_continues() {
        let (orchestrator, _) = orchestrator(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            r#"{"score": 95}"#.to_string(),
        ]);
        let orchestrator =
            orchestrator.with_feedback_store(Arc::new(UnavailableFeedbackStore::new("gone")));
        let result = orchestrator.run(REQUEST).unwrap();
        assert!(result.has_annotation(Annotation::FeedbackUnavailable));
    }

    #[test]
    fn test_accepted_run_is_recorded() {
        let store = Arc::new(InMemoryFeedbackStore::new());
        let (orchestrator, _) = orchestrator(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            r#"{"score": 95}"#.to_string(),
        ]);
        let orchestrator = orchestrator.with_feedback_store(Arc::clone(&store) as Arc<dyn FeedbackStore>);
        let result = orchestrator.run(REQUEST).unwrap();

        let history = store.query(&FeedbackQuery::all()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].run_id, result.run_id);
        assert_eq!(history[0].framework.as_deref(), Some("SCQA"));
        assert_eq!(history[0].final_score, Some(95.0));
    }

    fn flag_question(score: u32) -> String {
        format!(
            r#"{{"score": {score}, "findings": [
                {{"severity": "high", "section": "Question", "suggestion": "Name the decision"}}
            ], "summary": "question is vague"}}"#
        )
    }

    #[test]
    fn test_unaddressed_finding_stops_early_with_best_draft() {
        let store = Arc::new(InMemoryFeedbackStore::new());
        let mut config = PipelineConfig::default();
        config.max_iterations = 5;
        let generator = Arc::new(ScriptedGenerator::new(vec![
            RESEARCH.to_string(),
            DRAFT.to_string(),
            flag_question(60),
            r#"{"sections": {"Situation": "A 40 page migration report."}}"#.to_string(),
            flag_question(72),
            r#"{"sections": {"Situation": "A 40 page report on moving to the new platform."}}"#
                .to_string(),
            flag_question(65),
        ]));
        let orchestrator = Orchestrator::new(
            Arc::clone(&generator) as Arc<dyn TextGenerator>,
            Arc::new(FrameworkRepository::embedded()),
            config,
        )
        .with_feedback_store(Arc::clone(&store) as Arc<dyn FeedbackStore>);

        let result = orchestrator.run(REQUEST).unwrap();

        assert_eq!(result.outcome, RunOutcome::EarlyStopped);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.draft.iteration(), 2);
        assert!((result.final_score - 72.0).abs() < f64::EPSILON);
        assert!(result.prompt.contains("40 page migration report"));
        assert_eq!(generator.prompts().len(), 7);

        let records = store.query(&FeedbackQuery::all()).unwrap();
        assert_eq!(records[0].outcome, RunOutcome::EarlyStopped);
        assert_eq!(records[0].stalled_targets, ["question"]);
        assert_eq!(records[0].final_score, Some(72.0));
    }

    #[test]
    fn test_out_of_order_iteration_aborts_run() {
        let mut recorder = RunRecorder::start(REQUEST);
        let mut machine = Machine::new();
        let first = PromptDraft::new(
            "SCQA",
            vec![crate::models::DraftSection::new("Situation", "x")],
        );
        let second = first.revise(vec![crate::models::DraftSection::new("Situation", "y")]);
        let critique = Critique::new(50.0, vec![], vec![], "");

        let stopped =
            Orchestrator::record_iteration(&mut recorder, &mut machine, &second, &critique);

        match stopped {
            Err(Stop::Failed { stage, error }) => {
                assert_eq!(stage, Stage::Critique);
                assert_eq!(error.kind(), FailureKind::Internal);
            },
            _ => panic!("out-of-order iteration must abort"),
        }
        assert!(recorder.iterations().is_empty());
        assert_eq!(machine.state(), PipelineState::Abort);
    }

    #[test]
    fn test_policy_from_config() {
        let config = PipelineConfig {
            acceptance_threshold: 70.0,
            max_iterations: 5,
            ..PipelineConfig::default()
        };
        let policy = config.policy();
        assert!((policy.threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(policy.max_iterations, 5);
        assert_eq!(policy.stagnation_limit, 2);
    }
}
