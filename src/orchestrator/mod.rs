//! Plan, execute, reflect and refine, one city at a time
//!
//! Phases run in order. Units inside a parallel phase are spawned together,
//! bounded by the semaphore, and joined before the next phase starts. A failed
//! unit only costs its own output; the loop for that city carries on.

pub mod events;
mod insights;

pub use events::{event_stream, Event, EventKind, EventSink, EventStream, Frame};
pub use insights::{derive as derive_insights, CrossCityInsights};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{OrchestratorError, StoreError};
use crate::reflection::{RefinementPlanner, ReflectionEngine, Verdict};
use crate::scheduler::{ExecutionPlan, PhaseScheduler};
use crate::store::{
    City, CityStatus, OrchestratorPhase, Session, SharedMemory, TaskStatePatch, TaskStatus,
};
use crate::unit::{TaskOutput, TaskUnit, UnitContext, UnitInput, UnitRegistry};

/// A city on the route with its assigned nights
#[derive(Debug, Clone)]
pub struct RouteStop {
    pub city: City,
    pub nights: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_cities: usize,
    pub completed_cities: usize,
    pub average_quality: f64,
    pub total_iterations: u32,
    pub duration_ms: u64,
    /// Cities that stopped below the quality threshold
    pub below_threshold: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Cancelled,
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<UnitRegistry>,
    scheduler: PhaseScheduler,
    reflection: ReflectionEngine,
    refiner: RefinementPlanner,
    semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(config: Config, registry: Arc<UnitRegistry>) -> Result<Self, OrchestratorError> {
        let scheduler = PhaseScheduler::new(&registry)?;
        let reflection = ReflectionEngine::new(config.gap_threshold);
        let refiner = RefinementPlanner::new(registry.names());
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));

        Ok(Self {
            config,
            registry,
            scheduler,
            reflection,
            refiner,
            semaphore,
        })
    }

    pub fn scheduler(&self) -> &PhaseScheduler {
        &self.scheduler
    }

    /// Run the whole route and finish the stream with exactly one terminal event
    pub async fn drive(
        &self,
        memory: Arc<SharedMemory>,
        route: Vec<RouteStop>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Option<RunSummary> {
        let session_id = memory.session_id().unwrap_or_default();

        match self.run(memory, &route, &events, &cancel).await {
            Ok(RunOutcome::Completed(summary)) => {
                events.emit(EventKind::Done { session_id });
                Some(summary)
            }
            Ok(RunOutcome::Cancelled) => {
                info!("Session {} cancelled", session_id);
                events.emit(EventKind::Cancelled { session_id });
                None
            }
            Err(e) => {
                error!("Session {} failed: {}", session_id, e);
                events.emit(EventKind::Error {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    pub async fn run(
        &self,
        memory: Arc<SharedMemory>,
        route: &[RouteStop],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let start = Instant::now();
        let session = memory.session()?;

        events.emit(EventKind::OrchestratorGoal {
            session_id: session.id.clone(),
            goal: format!(
                "Build travel intelligence for {} cities from {} to {}",
                route.len(),
                session.trip.origin,
                session.trip.destination
            ),
            cities: route.iter().map(|s| s.city.id.clone()).collect(),
            max_iterations: self.config.max_iterations,
            quality_threshold: self.config.quality_threshold,
        });

        for stop in route {
            memory.initialize_city_intelligence(stop.city.clone(), stop.nights)?;
        }

        info!(
            "Processing {} cities with concurrency {}",
            route.len(),
            self.config.concurrency
        );

        let mut total_iterations = 0;
        for stop in route {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            match self
                .process_city(&memory, &session, stop, events, cancel)
                .await?
            {
                Some(iterations) => total_iterations += iterations,
                None => return Ok(RunOutcome::Cancelled),
            }
        }

        memory.set_phase(OrchestratorPhase::Complete, None)?;
        let cities = memory.cities()?;
        memory.set_insights(derive_insights(
            &cities,
            &session.preferences,
            self.config.quality_threshold,
        ))?;

        let completed_cities = cities
            .iter()
            .filter(|c| c.status == CityStatus::Complete)
            .count();
        let average_quality = if cities.is_empty() {
            0.0
        } else {
            cities.iter().map(|c| c.quality).sum::<f64>() / cities.len() as f64
        };
        let summary = RunSummary {
            total_cities: cities.len(),
            completed_cities,
            average_quality,
            total_iterations,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            below_threshold: cities
                .iter()
                .filter(|c| c.quality < self.config.quality_threshold)
                .map(|c| c.city.id.clone())
                .collect(),
        };

        info!(
            "Completed {} cities: average quality {:.1} over {} iterations",
            summary.completed_cities, summary.average_quality, summary.total_iterations
        );
        events.emit(EventKind::AllComplete {
            summary: summary.clone(),
        });
        Ok(RunOutcome::Completed(summary))
    }

    /// Returns the number of iterations run, or `None` when cancelled
    async fn process_city(
        &self,
        memory: &Arc<SharedMemory>,
        session: &Session,
        stop: &RouteStop,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, OrchestratorError> {
        let city_id = stop.city.id.as_str();
        memory.update_city_status(city_id, CityStatus::Processing)?;
        memory.set_phase(OrchestratorPhase::Planning, Some(city_id))?;
        info!("Processing {} ({} nights)", stop.city.name, stop.nights);

        let max_iterations = self.config.max_iterations.max(1);
        let mut outputs: BTreeMap<String, TaskOutput> = BTreeMap::new();
        let mut plan = self.scheduler.plan(1);
        let mut iterations = 0;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            iterations = iteration;

            events.emit(EventKind::OrchestratorPlan {
                city_id: city_id.to_string(),
                iteration,
                phases: plan.phases.clone(),
                units: plan
                    .phases
                    .iter()
                    .flat_map(|p| plan.runnable(p))
                    .map(str::to_string)
                    .collect(),
            });

            memory.set_phase(OrchestratorPhase::Executing, Some(city_id))?;
            let finished = self
                .execute_plan(memory, session, stop, &plan, &mut outputs, events, cancel)
                .await?;
            if !finished {
                return Ok(None);
            }

            memory.set_phase(OrchestratorPhase::Reflecting, Some(city_id))?;
            let snapshot = memory.city(city_id)?;
            let reflection = self
                .reflection
                .reflect(&snapshot, &session.preferences, iteration);
            memory.update_city_quality(city_id, reflection.quality, iteration)?;
            memory.add_reflection(city_id, reflection.clone())?;

            info!(
                "{} iteration {}: quality {:.1} ({})",
                city_id, iteration, reflection.quality, reflection.verdict
            );
            events.emit(EventKind::Reflection {
                city_id: city_id.to_string(),
                iteration,
                quality: reflection.quality,
                verdict: reflection.verdict,
                strengths: reflection.strengths.clone(),
                gaps: reflection.gaps.iter().map(|g| g.description.clone()).collect(),
            });

            if reflection.quality >= self.config.quality_threshold
                || reflection.verdict == Verdict::Complete
            {
                break;
            }
            if iteration == max_iterations {
                info!(
                    "{} stopped at quality {:.1} after {} iterations",
                    city_id, reflection.quality, iteration
                );
                break;
            }

            let refinement = self.refiner.plan(&reflection, iteration + 1);
            if refinement.is_empty() {
                debug!("No unit can address the gaps for {}, stopping", city_id);
                break;
            }

            memory.set_phase(OrchestratorPhase::Refining, Some(city_id))?;
            events.emit(EventKind::RefinementStarted {
                city_id: city_id.to_string(),
                iteration: iteration + 1,
                units: refinement.units.clone(),
                instructions: refinement.instructions.clone(),
            });
            plan = self
                .scheduler
                .refinement_plan(iteration + 1, refinement.instructions);
        }

        memory.update_city_status(city_id, CityStatus::Complete)?;
        let snapshot = memory.city(city_id)?;
        events.emit(EventKind::CityComplete {
            city_id: city_id.to_string(),
            quality: snapshot.quality,
            iterations,
        });
        Ok(Some(iterations))
    }

    /// Run every phase of `plan`; `false` when cancelled between phases
    #[allow(clippy::too_many_arguments)]
    async fn execute_plan(
        &self,
        memory: &Arc<SharedMemory>,
        session: &Session,
        stop: &RouteStop,
        plan: &ExecutionPlan,
        outputs: &mut BTreeMap<String, TaskOutput>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<bool, OrchestratorError> {
        let city_id = stop.city.id.as_str();

        for phase in &plan.phases {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let units = plan.runnable(phase);
            if units.is_empty() {
                continue;
            }

            for name in &units {
                memory.initialize_task_state(city_id, name)?;
            }
            debug!(
                "{} phase {}: {}",
                city_id,
                phase.number,
                units.join(", ")
            );

            let input = UnitInput::new(
                stop.city.clone(),
                stop.nights,
                session.preferences.clone(),
            )
            .with_trip(session.trip.clone())
            .with_previous_outputs(outputs.clone());

            let jobs: Vec<UnitJob> = units
                .iter()
                .map(|name| UnitJob {
                    name: name.to_string(),
                    unit: self.registry.resolve(name),
                    memory: memory.clone(),
                    events: events.clone(),
                    city_id: city_id.to_string(),
                    input: input.clone(),
                    ctx: UnitContext::new(
                        session.id.clone(),
                        plan.iteration,
                        self.config.unit_timeout(),
                    ),
                    phase: phase.number,
                    instructions: plan.instructions_for(name).map(str::to_string),
                    previous: outputs.get(*name).cloned(),
                })
                .collect();

            let results = if phase.parallel {
                self.run_parallel(jobs).await?
            } else {
                let mut results = Vec::with_capacity(jobs.len());
                for job in jobs {
                    results.push(job.run().await?);
                }
                results
            };

            for (name, output) in results {
                // A failed re-run keeps the last good output visible to dependents
                let keep_previous = !output.success
                    && outputs.get(&name).map(|o| o.success).unwrap_or(false);
                if !keep_previous {
                    outputs.insert(name, output);
                }
            }
        }
        Ok(true)
    }

    async fn run_parallel(
        &self,
        jobs: Vec<UnitJob>,
    ) -> Result<Vec<(String, TaskOutput)>, OrchestratorError> {
        let mut futures = FuturesUnordered::new();

        for job in jobs {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let name = job.name.clone();
            let memory = job.memory.clone();
            let events = job.events.clone();
            let city_id = job.city_id.clone();
            let iteration = job.ctx.iteration;

            let handle = tokio::spawn(async move {
                let _permit = permit; // hold until done
                job.run().await
            });
            futures.push(async move { (name, memory, events, city_id, iteration, handle.await) });
        }

        let mut results = Vec::new();
        while let Some((name, memory, events, city_id, iteration, joined)) = futures.next().await {
            match joined {
                Ok(result) => results.push(result?),
                Err(e) => {
                    warn!("Unit task {} aborted: {}", name, e);
                    let output = TaskOutput::failed(format!("unit task aborted: {}", e));
                    memory.update_task_state(
                        &city_id,
                        &name,
                        TaskStatePatch {
                            status: Some(TaskStatus::Failed),
                            progress: Some(100),
                            output: Some(output.clone()),
                            error: output.error_message(),
                        },
                    )?;
                    events.emit(EventKind::AgentError {
                        city_id,
                        agent: name.clone(),
                        iteration,
                        error: output.error_message().unwrap_or_default(),
                    });
                    results.push((name, output));
                }
            }
        }
        Ok(results)
    }
}

/// One unit execution for one city, owning everything it touches
struct UnitJob {
    name: String,
    unit: Option<Arc<dyn TaskUnit>>,
    memory: Arc<SharedMemory>,
    events: EventSink,
    city_id: String,
    input: UnitInput,
    ctx: UnitContext,
    phase: usize,
    instructions: Option<String>,
    previous: Option<TaskOutput>,
}

impl UnitJob {
    async fn run(self) -> Result<(String, TaskOutput), StoreError> {
        let UnitJob {
            name,
            unit,
            memory,
            events,
            city_id,
            input,
            ctx,
            phase,
            instructions,
            previous,
        } = self;
        let iteration = ctx.iteration;

        memory.update_task_state(&city_id, &name, TaskStatePatch::status(TaskStatus::Running))?;
        events.emit(EventKind::AgentStarted {
            city_id: city_id.clone(),
            agent: name.clone(),
            phase,
            iteration,
        });

        let progress_memory = memory.clone();
        let progress_events = events.clone();
        let progress_city = city_id.clone();
        let progress_name = name.clone();
        let ctx = ctx.with_progress(Arc::new(move |percent| {
            if let Err(e) = progress_memory.update_task_state(
                &progress_city,
                &progress_name,
                TaskStatePatch::progress(percent),
            ) {
                warn!("Progress update for {} failed: {}", progress_name, e);
            }
            progress_events.emit(EventKind::AgentProgress {
                city_id: progress_city.clone(),
                agent: progress_name.clone(),
                progress: percent,
            });
        }));

        let output = match (unit, instructions) {
            (None, _) => TaskOutput::failed(format!("unit {} is not registered", name)),
            (Some(unit), Some(feedback)) if unit.supports_refinement() => {
                let previous = previous.unwrap_or_default();
                match unit.refine(&feedback, &previous, &input, &ctx).await {
                    Ok(output) => output,
                    Err(e) => TaskOutput::failed(e.to_string()),
                }
            }
            (Some(unit), Some(feedback)) => {
                // Not refinable: a fresh run that still sees the feedback
                unit.execute(&input.with_instructions(feedback), &ctx).await
            }
            (Some(unit), None) => unit.execute(&input, &ctx).await,
        };

        if output.success {
            memory.set_task_output(&city_id, &name, &output)?;
            memory.update_task_state(
                &city_id,
                &name,
                TaskStatePatch {
                    status: Some(TaskStatus::Completed),
                    progress: Some(100),
                    ..TaskStatePatch::default()
                },
            )?;
            debug!(
                "Completed {}: confidence {:.0} ({}ms)",
                name, output.confidence, output.execution_time_ms
            );
            events.emit(EventKind::AgentComplete {
                city_id,
                agent: name.clone(),
                iteration,
                confidence: output.confidence,
                execution_time_ms: output.execution_time_ms,
            });
        } else {
            let error = output.error_message().unwrap_or_default();
            memory.update_task_state(
                &city_id,
                &name,
                TaskStatePatch {
                    status: Some(TaskStatus::Failed),
                    progress: Some(100),
                    output: Some(output.clone()),
                    error: Some(error.clone()),
                },
            )?;
            warn!("{} failed for {}: {}", name, city_id, error);
            events.emit(EventKind::AgentError {
                city_id,
                agent: name.clone(),
                iteration,
                error,
            });
        }

        Ok((name, output))
    }
}
