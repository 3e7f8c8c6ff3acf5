// src/orchestrator.rs
//! The state machine driving one discovery run through
//! Plan -> Discover -> Analyze -> Deduplicate -> Persist -> Reconcile.
//!
//! Phases run strictly sequentially; pause/cancel flags are checked
//! cooperatively at phase boundaries. Per-item failures in Analyze and
//! Persist are tolerated; only unrecoverable Plan/Discover errors fail
//! a run.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::analysis::{used_fallback, JobAnalyzer};
use crate::dedup::Deduplicator;
use crate::error::{PipelineError, PipelineResult};
use crate::provider::{build_search_query, JobProvider};
use crate::quota::{QuotaLedger, WeeklyCapacity};
use crate::store::jobs::JobStore;
use crate::store::profile::{ResumeStore, SubscriptionLookup};
use crate::store::runs::SearchRunRepository;
use crate::types::analysis::AnalysisPath;
use crate::types::posting::PersistedJob;
use crate::types::run::{Phase, PhaseEvent, RunStatus, SearchRun, SearchTarget};
use crate::types::StructuredAnalysis;

const WEEKLY_CADENCE_DAYS: i64 = 7;
const ANALYZE_BATCH_SIZE: usize = 3;
const PER_QUERY_RESULT_LIMIT: usize = 10;
const DISCOVERY_METHOD: &str = "weekly_search";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReceipt {
    pub run_id: String,
    pub remaining_this_week: i64,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyStatus {
    pub tier: String,
    pub used: i64,
    pub remaining: i64,
    pub limit: i64,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SearchOrchestrator {
    pool: SqlitePool,
    provider: Arc<dyn JobProvider>,
    analyzer: Arc<JobAnalyzer>,
    jobs: Arc<dyn JobStore>,
    plans: Arc<dyn SubscriptionLookup>,
    resumes: Arc<dyn ResumeStore>,
}

impl SearchOrchestrator {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn JobProvider>,
        analyzer: Arc<JobAnalyzer>,
        jobs: Arc<dyn JobStore>,
        plans: Arc<dyn SubscriptionLookup>,
        resumes: Arc<dyn ResumeStore>,
    ) -> Self {
        Self {
            pool,
            provider,
            analyzer,
            jobs,
            plans,
            resumes,
        }
    }

    /// Validate the request, check weekly capacity, and persist a new
    /// run in `planned` state. Rejections happen here, before any run
    /// record exists.
    pub async fn create_run(
        &self,
        user_id: &str,
        resume_id: Option<&str>,
        mut target: SearchTarget,
    ) -> PipelineResult<(SearchRun, WeeklyCapacity)> {
        if target.job_titles.is_empty() {
            let resume_id = resume_id.ok_or_else(|| {
                PipelineError::Validation(
                    "At least one job title or a resume is required".to_string(),
                )
            })?;
            let profile = self.resumes.get(resume_id).await?;
            target.job_titles = profile.derived_titles();
            if target.job_titles.is_empty() {
                return Err(PipelineError::Validation(
                    "Resume has no usable experience to derive job titles from".to_string(),
                ));
            }
        }
        target.validate()?;

        let plan = self.plans.get_plan(user_id).await?;
        if target.locations.len() > plan.max_locations {
            return Err(PipelineError::Validation(format!(
                "Too many search locations: {} (plan allows {})",
                target.locations.len(),
                plan.max_locations
            )));
        }

        let ledger = QuotaLedger::new(&self.pool);
        let capacity = ledger
            .capacity(user_id, &plan.tier, plan.weekly_job_limit)
            .await?;
        if capacity.remaining <= 0 {
            return Err(PipelineError::QuotaExhausted {
                used: capacity.used,
                limit: capacity.limit,
            });
        }

        let search_name = target
            .job_titles
            .first()
            .cloned()
            .unwrap_or_else(|| "Weekly job search".to_string());
        let run = SearchRun::new(
            user_id,
            resume_id,
            &search_name,
            target,
            capacity.remaining,
        );
        SearchRunRepository::new(&self.pool).create(&run).await?;

        Ok((run, capacity))
    }

    /// Create a run and begin the phase sequence asynchronously.
    pub async fn start_weekly_search(
        &self,
        user_id: &str,
        resume_id: Option<&str>,
        target: SearchTarget,
    ) -> PipelineResult<StartReceipt> {
        let (run, capacity) = self.create_run(user_id, resume_id, target).await?;

        let run_id = run.id.clone();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.execute_run(&run_id).await {
                error!("Search run {} aborted: {:#}", run_id, e);
            }
        });

        Ok(StartReceipt {
            run_id: run.id,
            remaining_this_week: capacity.remaining,
            next_run_at: Utc::now() + ChronoDuration::days(WEEKLY_CADENCE_DAYS),
        })
    }

    /// Execute the phase loop for one run. Idempotent for runs that are
    /// paused or terminal: those return without doing phase work.
    pub async fn execute_run(&self, run_id: &str) -> Result<()> {
        let repo = SearchRunRepository::new(&self.pool);
        let mut run = repo
            .get(run_id)
            .await?
            .with_context(|| format!("Search run not found: {}", run_id))?;

        match run.status {
            RunStatus::Planned => {
                // Compare-and-set so a cancel that raced the spawn wins.
                if !repo
                    .transition(&run.id, RunStatus::Running, RunStatus::Planned, None)
                    .await?
                {
                    info!("Run {} changed state before starting, skipping", run.id);
                    return Ok(());
                }
                run.status = RunStatus::Running;
            }
            // A resumed run executes when its scheduled trigger fires.
            RunStatus::Running => {}
            other => {
                info!("Run {} is {}, skipping execution", run.id, other.as_str());
                return Ok(());
            }
        }
        // Scheduling the next cadence up front keeps this run out of the
        // due list while it executes.
        run.next_run_at = Some(Utc::now() + ChronoDuration::days(WEEKLY_CADENCE_DAYS));
        repo.save_progress(&run).await?;

        let plan = self.plans.get_plan(&run.user_id).await?;
        let ledger = QuotaLedger::new(&self.pool);

        // Capacity was checked at creation, but a resumed run may enter
        // the loop much later: check again.
        let capacity = ledger
            .capacity(&run.user_id, &plan.tier, plan.weekly_job_limit)
            .await?;
        if capacity.remaining <= 0 {
            let message = format!(
                "Weekly job limit of {} already reached; no discovery performed.",
                capacity.limit
            );
            self.append_event(
                &repo,
                &mut run,
                PhaseEvent::new(
                    Phase::Plan,
                    message.clone(),
                    serde_json::json!({ "used": capacity.used, "limit": capacity.limit }),
                    true,
                    0,
                ),
            )
            .await?;
            return self.complete_run(&repo, &mut run, message).await;
        }

        // ---- Plan ----
        let started = Instant::now();
        let titles = run.target.unique_titles();
        let queries: Vec<String> = titles
            .iter()
            .map(|t| build_search_query(t))
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return self
                .fail_run(&repo, &mut run, Phase::Plan, "No usable job titles after query cleanup")
                .await;
        }
        let locations: Vec<Option<String>> = if run.target.locations.is_empty() {
            vec![None]
        } else {
            run.target
                .locations
                .iter()
                .take(plan.max_locations.max(1))
                .map(|l| Some(l.clone()))
                .collect()
        };
        let plan_event = PhaseEvent::new(
            Phase::Plan,
            format!(
                "Planned {} title quer{} across {} location{}",
                queries.len(),
                if queries.len() == 1 { "y" } else { "ies" },
                locations.len(),
                if locations.len() == 1 { "" } else { "s" }
            ),
            serde_json::json!({ "queries": queries, "locations": run.target.locations }),
            true,
            started.elapsed().as_millis() as i64,
        );
        self.append_event(&repo, &mut run, plan_event).await?;

        if self.should_stop(&repo, &mut run, Phase::Discover).await? {
            return Ok(());
        }

        // ---- Discover ----
        let started = Instant::now();
        if let Err(e) = self.provider.health_check().await {
            return self
                .fail_run(
                    &repo,
                    &mut run,
                    Phase::Discover,
                    &format!("Provider health check failed: {}", e),
                )
                .await;
        }

        let mut discovered = Vec::new();
        let mut skipped_incomplete = 0usize;
        for query in &queries {
            for location in &locations {
                let result = self
                    .provider
                    .search(query, location.as_deref(), PER_QUERY_RESULT_LIMIT)
                    .await;
                match result {
                    Ok(found) => {
                        for posting in found.postings {
                            if posting.is_analyzable() {
                                discovered.push(posting);
                            } else {
                                skipped_incomplete += 1;
                            }
                        }
                    }
                    Err(e) => {
                        // Transient errors were already retried once by
                        // the client; anything surfacing here aborts
                        // Discover with the classified reason verbatim.
                        return self
                            .fail_run(&repo, &mut run, Phase::Discover, &e.to_string())
                            .await;
                    }
                }
            }
        }
        let budget = self.provider.budget();
        self.append_event(
            &repo,
            &mut run,
            PhaseEvent::new(
                Phase::Discover,
                format!("Discovered {} candidate postings", discovered.len()),
                serde_json::json!({
                    "candidates": discovered.len(),
                    "skipped_incomplete": skipped_incomplete,
                    "provider_calls": budget.calls_made,
                    "budget_degraded": budget.degraded,
                }),
                true,
                started.elapsed().as_millis() as i64,
            ),
        )
        .await?;

        if discovered.is_empty() {
            let message = format!(
                "No new postings discovered this week. {} of {} weekly slots remaining.",
                capacity.remaining, capacity.limit
            );
            return self.complete_run(&repo, &mut run, message).await;
        }

        if self.should_stop(&repo, &mut run, Phase::Analyze).await? {
            return Ok(());
        }

        // ---- Analyze ----
        let started = Instant::now();
        let mut analyses: HashMap<String, StructuredAnalysis> = HashMap::new();
        let mut fallback_count = 0usize;
        for chunk in discovered.chunks(ANALYZE_BATCH_SIZE) {
            let batch = chunk.iter().map(|p| self.analyzer.analyze(p));
            let results = futures::future::join_all(batch).await;
            for (posting, analysis) in chunk.iter().zip(results) {
                if used_fallback(&analysis) {
                    fallback_count += 1;
                }
                analyses.insert(posting.provider_id.clone(), analysis);
            }
        }
        self.append_event(
            &repo,
            &mut run,
            PhaseEvent::new(
                Phase::Analyze,
                format!(
                    "Analyzed {} postings ({} via fallback extraction)",
                    discovered.len(),
                    fallback_count
                ),
                serde_json::json!({
                    "analyzed": discovered.len(),
                    "fallback": fallback_count,
                }),
                true,
                started.elapsed().as_millis() as i64,
            ),
        )
        .await?;

        if self.should_stop(&repo, &mut run, Phase::Deduplicate).await? {
            return Ok(());
        }

        // ---- Deduplicate ----
        let started = Instant::now();
        let candidate_count = discovered.len();
        let unique = Deduplicator::filter(&run.user_id, discovered, self.jobs.as_ref()).await;
        let duplicates = candidate_count - unique.len();
        self.append_event(
            &repo,
            &mut run,
            PhaseEvent::new(
                Phase::Deduplicate,
                format!("Removed {} duplicates, {} unique postings remain", duplicates, unique.len()),
                serde_json::json!({ "duplicates": duplicates, "unique": unique.len() }),
                true,
                started.elapsed().as_millis() as i64,
            ),
        )
        .await?;

        if self.should_stop(&repo, &mut run, Phase::Persist).await? {
            return Ok(());
        }

        // ---- Persist ----
        let started = Instant::now();
        let attempted = unique.len();
        let mut saved: i64 = 0;
        let mut write_failures = 0usize;
        let mut stopped_at_limit = false;
        for posting in unique {
            // Re-check remaining capacity before every write so a run
            // that discovered more than the week allows stops at the
            // limit instead of overshooting it.
            let current = ledger
                .capacity(&run.user_id, &plan.tier, plan.weekly_job_limit)
                .await?;
            if current.remaining - saved <= 0 {
                stopped_at_limit = true;
                break;
            }

            let analysis = analyses
                .remove(&posting.provider_id)
                .unwrap_or_else(|| StructuredAnalysis::empty(AnalysisPath::Fallback));
            let via_fallback = used_fallback(&analysis);
            let salary = analysis.salary.clone();
            let job = PersistedJob {
                user_id: run.user_id.clone(),
                run_id: run.id.clone(),
                posting,
                analysis,
                salary,
                discovery_method: DISCOVERY_METHOD.to_string(),
                used_fallback_analysis: via_fallback,
                created_at: Utc::now(),
            };

            match self.jobs.save(&job).await {
                Ok(_) => saved += 1,
                Err(e) => {
                    write_failures += 1;
                    warn!(
                        "Failed to save job '{}' at {}: {:#}",
                        job.posting.title, job.posting.company, e
                    );
                }
            }
        }
        self.append_event(
            &repo,
            &mut run,
            PhaseEvent::new(
                Phase::Persist,
                format!("Saved {} of {} postings", saved, attempted),
                serde_json::json!({
                    "saved": saved,
                    "attempted": attempted,
                    "write_failures": write_failures,
                    "stopped_at_limit": stopped_at_limit,
                }),
                write_failures == 0,
                started.elapsed().as_millis() as i64,
            ),
        )
        .await?;

        // ---- Reconcile ----
        // A pause or cancel landing during Persist still charges the
        // jobs that were saved; only the completion transition is
        // skipped.
        let halted = matches!(
            repo.get_status(&run.id).await?,
            Some(RunStatus::Paused) | Some(RunStatus::Cancelled)
        );

        // Ledger trouble past this point never unwinds saved jobs: the
        // discrepancy is logged for reconciliation instead.
        let started = Instant::now();
        let mut ledger_note = None;
        match ledger.commit(&run.user_id, &run.id, saved, &run.search_name).await {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "commit rejected".to_string());
                error!(
                    "Quota commit rejected after saving {} jobs for run {}: {}",
                    saved, run.id, reason
                );
                ledger_note = Some(reason);
            }
            Err(e) => {
                error!(
                    "Quota commit failed after saving {} jobs for run {}: {:#}",
                    saved, run.id, e
                );
                ledger_note = Some(e.to_string());
            }
        }
        let final_capacity = ledger
            .capacity(&run.user_id, &plan.tier, plan.weekly_job_limit)
            .await?;
        run.jobs_found_this_run = saved;
        run.total_jobs_found += saved;
        self.append_event(
            &repo,
            &mut run,
            PhaseEvent::new(
                Phase::Reconcile,
                format!(
                    "Committed {} jobs to the weekly ledger ({} of {} used)",
                    saved, final_capacity.used, final_capacity.limit
                ),
                serde_json::json!({
                    "committed": saved,
                    "used": final_capacity.used,
                    "limit": final_capacity.limit,
                    "ledger_error": ledger_note,
                }),
                ledger_note.is_none(),
                started.elapsed().as_millis() as i64,
            ),
        )
        .await?;

        if halted {
            info!(
                "Run {} was stopped during persistence; {} saved jobs committed",
                run.id, saved
            );
            return Ok(());
        }

        let message = format!(
            "Found and saved {} new job{} ({} discovered, {} attempted). {} of {} weekly slots remaining.",
            saved,
            if saved == 1 { "" } else { "s" },
            candidate_count,
            attempted,
            final_capacity.remaining,
            final_capacity.limit
        );
        self.complete_run(&repo, &mut run, message).await
    }

    /// Pause a running run. Idempotent for already-paused runs.
    pub async fn pause(&self, user_id: &str, run_id: &str) -> PipelineResult<()> {
        let repo = SearchRunRepository::new(&self.pool);
        let mut run = self.load_owned(&repo, user_id, run_id).await?;

        match run.status {
            RunStatus::Paused => Ok(()),
            RunStatus::Running => {
                if repo
                    .transition(run_id, RunStatus::Paused, RunStatus::Running, None)
                    .await?
                {
                    info!("Paused run {} for user {}", run_id, user_id);
                }
                Ok(())
            }
            other => Err(PipelineError::Validation(format!(
                "Cannot pause a run in status '{}'",
                other.as_str()
            ))),
        }
    }

    /// Resume a paused run. Only flips status: the phase loop restarts
    /// at the next scheduled trigger, never immediately, so a partially
    /// executed run is not double-counted.
    pub async fn resume(&self, user_id: &str, run_id: &str) -> PipelineResult<()> {
        let repo = SearchRunRepository::new(&self.pool);
        let mut run = self.load_owned(&repo, user_id, run_id).await?;

        match run.status {
            RunStatus::Running => Ok(()),
            RunStatus::Paused => {
                if repo
                    .transition(run_id, RunStatus::Running, RunStatus::Paused, None)
                    .await?
                {
                    info!("Resumed run {} for user {}", run_id, user_id);
                }
                Ok(())
            }
            other => Err(PipelineError::Validation(format!(
                "Cannot resume a run in status '{}'",
                other.as_str()
            ))),
        }
    }

    /// Cancel (soft-delete) a run. The run becomes terminal and its
    /// ledger contributions are flagged as deleted, but the quota those
    /// contributions consumed stays spent.
    pub async fn cancel(&self, user_id: &str, run_id: &str) -> PipelineResult<()> {
        let repo = SearchRunRepository::new(&self.pool);
        let run = self.load_owned(&repo, user_id, run_id).await?;

        if run.status == RunStatus::Cancelled {
            return Ok(());
        }

        repo.mark_cancelled(run_id, "Cancelled by user").await?;

        let ledger = QuotaLedger::new(&self.pool);
        if let Err(e) = ledger.mark_run_deleted(user_id, run_id).await {
            // Flagging is audit metadata; the cancel itself stands.
            error!("Failed to flag ledger contributions for run {}: {:#}", run_id, e);
        }

        info!("Cancelled run {} for user {}", run_id, user_id);
        Ok(())
    }

    pub async fn get_weekly_status(&self, user_id: &str) -> PipelineResult<WeeklyStatus> {
        let plan = self.plans.get_plan(user_id).await?;
        let capacity = QuotaLedger::new(&self.pool)
            .capacity(user_id, &plan.tier, plan.weekly_job_limit)
            .await?;

        Ok(WeeklyStatus {
            tier: plan.tier,
            used: capacity.used,
            remaining: capacity.remaining,
            limit: capacity.limit,
            week_start: capacity.week_start,
            week_end: capacity.week_end,
        })
    }

    /// Execute every run whose scheduled trigger has arrived. Completed
    /// runs get a fresh successor run for the new week; resumed runs
    /// re-enter the phase loop directly. Returns how many runs were
    /// executed.
    pub async fn run_due_searches(&self, now: DateTime<Utc>) -> Result<usize> {
        let repo = SearchRunRepository::new(&self.pool);
        let due = repo.list_due(now).await?;
        let mut executed = 0usize;

        for mut run in due {
            match run.status {
                RunStatus::Running => {
                    if let Err(e) = self.execute_run(&run.id).await {
                        error!("Scheduled execution of run {} failed: {:#}", run.id, e);
                    }
                    executed += 1;
                }
                RunStatus::Completed => {
                    // The completed run stays as history; the new week's
                    // discovery happens in a successor run.
                    run.next_run_at = None;
                    repo.save_progress(&run).await?;

                    match self
                        .create_run(&run.user_id, run.resume_id.as_deref(), run.target.clone())
                        .await
                    {
                        Ok((mut successor, _)) => {
                            successor.total_jobs_found = run.total_jobs_found;
                            repo.save_progress(&successor).await?;
                            if let Err(e) = self.execute_run(&successor.id).await {
                                error!(
                                    "Scheduled execution of run {} failed: {:#}",
                                    successor.id, e
                                );
                            }
                            executed += 1;
                        }
                        Err(PipelineError::QuotaExhausted { used, limit }) => {
                            info!(
                                "Skipping scheduled search for user {}: {} of {} used",
                                run.user_id, used, limit
                            );
                            run.next_run_at =
                                Some(now + ChronoDuration::days(WEEKLY_CADENCE_DAYS));
                            repo.save_progress(&run).await?;
                        }
                        Err(e) => {
                            error!(
                                "Could not schedule successor for run {}: {}",
                                run.id, e
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(executed)
    }

    async fn load_owned(
        &self,
        repo: &SearchRunRepository<'_>,
        user_id: &str,
        run_id: &str,
    ) -> PipelineResult<SearchRun> {
        repo.get_owned(user_id, run_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Search run not found: {}", run_id)))
    }

    /// Cooperative cancellation check at a phase boundary. Returns true
    /// if the loop must stop here.
    async fn should_stop(
        &self,
        repo: &SearchRunRepository<'_>,
        run: &mut SearchRun,
        next_phase: Phase,
    ) -> Result<bool> {
        let status = repo.get_status(&run.id).await?;
        match status {
            Some(RunStatus::Paused) => {
                self.append_event(
                    repo,
                    run,
                    PhaseEvent::new(
                        next_phase,
                        format!("Run paused; stopping before {}", next_phase.as_str()),
                        serde_json::json!({}),
                        true,
                        0,
                    ),
                )
                .await?;
                Ok(true)
            }
            Some(RunStatus::Cancelled) => {
                info!("Run {} cancelled; stopping phase loop", run.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_event(
        &self,
        repo: &SearchRunRepository<'_>,
        run: &mut SearchRun,
        event: PhaseEvent,
    ) -> Result<()> {
        info!(
            "Run {} [{}]: {}",
            run.id,
            event.phase.as_str(),
            event.message
        );
        run.audit_log.push(event);
        repo.save_progress(run).await
    }

    async fn complete_run(
        &self,
        repo: &SearchRunRepository<'_>,
        run: &mut SearchRun,
        message: String,
    ) -> Result<()> {
        repo.save_progress(run).await?;
        // Guarded: a pause or cancel that landed during the final phase
        // wins over completion.
        if repo
            .transition(&run.id, RunStatus::Completed, RunStatus::Running, Some(&message))
            .await?
        {
            info!("Run {} completed: {}", run.id, message);
        } else {
            info!("Run {} changed state before completion", run.id);
        }
        Ok(())
    }

    async fn fail_run(
        &self,
        repo: &SearchRunRepository<'_>,
        run: &mut SearchRun,
        phase: Phase,
        reason: &str,
    ) -> Result<()> {
        run.audit_log.push(PhaseEvent::new(
            phase,
            reason.to_string(),
            serde_json::json!({}),
            false,
            0,
        ));
        repo.save_progress(run).await?;
        let message = format!("Search failed during {}: {}", phase.as_str(), reason);
        if repo
            .transition(&run.id, RunStatus::Failed, RunStatus::Running, Some(&message))
            .await?
        {
            error!("Run {} failed: {}", run.id, message);
        } else {
            info!("Run {} changed state before the failure was recorded", run.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisApi;
    use crate::database::test_pool;
    use crate::error::{AnalysisError, ProviderError};
    use crate::provider::ProviderSearchResult;
    use crate::store::jobs::SqliteJobStore;
    use crate::store::profile::{
        ExperienceEntry, FixedPlanLookup, ResumeProfile, StaticResumeStore,
    };
    use crate::types::posting::{DiscoveredPosting, SalaryRange, SourcePlatform, WorkArrangement};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FakeProvider {
        postings: Vec<DiscoveredPosting>,
        fail: Option<ProviderError>,
        queries: Mutex<Vec<String>>,
        calls: AtomicU64,
    }

    impl FakeProvider {
        fn returning(postings: Vec<DiscoveredPosting>) -> Self {
            Self {
                postings,
                fail: None,
                queries: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        }

        fn failing(error: ProviderError) -> Self {
            Self {
                postings: Vec::new(),
                fail: Some(error),
                queries: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl JobProvider for FakeProvider {
        async fn search(
            &self,
            query: &str,
            _location: Option<&str>,
            _limit: usize,
        ) -> Result<ProviderSearchResult, ProviderError> {
            self.queries.lock().unwrap().push(query.to_string());
            self.calls.fetch_add(1, Ordering::Relaxed);
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            Ok(ProviderSearchResult {
                postings: self.postings.clone(),
                total_available: self.postings.len() as u64,
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn budget(&self) -> crate::provider::BudgetStatus {
            crate::provider::BudgetStatus {
                calls_made: self.calls.load(Ordering::Relaxed),
                soft_daily_limit: 100,
                degraded: false,
            }
        }
    }

    /// Primary that always fails, so every analysis takes the fallback
    /// path. Keeps orchestrator tests independent of HTTP.
    struct FailingPrimary;

    #[async_trait]
    impl AnalysisApi for FailingPrimary {
        async fn analyze(
            &self,
            _posting: &DiscoveredPosting,
        ) -> Result<StructuredAnalysis, AnalysisError> {
            Err(AnalysisError::Request("primary unavailable".to_string()))
        }
    }

    /// Provider that flips the run's status while Discover is in
    /// flight, like a user pressing pause or cancel mid-search.
    struct HaltingProvider {
        pool: SqlitePool,
        halt_as: RunStatus,
        postings: Vec<DiscoveredPosting>,
    }

    #[async_trait]
    impl JobProvider for HaltingProvider {
        async fn search(
            &self,
            _query: &str,
            _location: Option<&str>,
            _limit: usize,
        ) -> Result<ProviderSearchResult, ProviderError> {
            sqlx::query("UPDATE search_runs SET status = ?")
                .bind(self.halt_as.as_str())
                .execute(&self.pool)
                .await
                .unwrap();
            Ok(ProviderSearchResult {
                postings: self.postings.clone(),
                total_available: self.postings.len() as u64,
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn budget(&self) -> crate::provider::BudgetStatus {
            crate::provider::BudgetStatus {
                calls_made: 1,
                soft_daily_limit: 100,
                degraded: false,
            }
        }
    }

    /// Store whose writes fail for one specific title.
    struct RejectingStore {
        inner: SqliteJobStore,
        reject_title: String,
    }

    #[async_trait]
    impl JobStore for RejectingStore {
        async fn save(&self, job: &PersistedJob) -> Result<i64> {
            if job.posting.title == self.reject_title {
                return Err(anyhow::anyhow!("storage offline"));
            }
            self.inner.save(job).await
        }

        async fn exists_similar(
            &self,
            user_id: &str,
            title: &str,
            company: &str,
        ) -> Result<bool> {
            self.inner.exists_similar(user_id, title, company).await
        }
    }

    fn posting(title: &str, company: &str, id: &str) -> DiscoveredPosting {
        DiscoveredPosting {
            title: title.to_string(),
            company: company.to_string(),
            location_raw: "Remote".to_string(),
            location: None,
            source_url: format!("https://example.com/{}", id),
            description: "Requires 5 years of experience with Rust and SQL.".to_string(),
            provider_id: id.to_string(),
            platform: SourcePlatform::Other,
            work_arrangement: WorkArrangement::Remote,
            direct_employer: false,
        }
    }

    fn target(titles: &[&str]) -> SearchTarget {
        SearchTarget {
            job_titles: titles.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn orchestrator(
        pool: &SqlitePool,
        provider: Arc<dyn JobProvider>,
        weekly_limit: i64,
    ) -> SearchOrchestrator {
        orchestrator_with(
            pool,
            provider,
            Arc::new(SqliteJobStore::new(pool.clone())),
            weekly_limit,
        )
    }

    fn orchestrator_with(
        pool: &SqlitePool,
        provider: Arc<dyn JobProvider>,
        jobs: Arc<dyn JobStore>,
        weekly_limit: i64,
    ) -> SearchOrchestrator {
        let mut resumes = StaticResumeStore::new();
        resumes.insert(
            "resume-1",
            ResumeProfile {
                parsed_skills: vec![],
                parsed_experience: vec![ExperienceEntry {
                    title: "Platform Engineer".to_string(),
                    company: "Acme".to_string(),
                }],
            },
        );

        SearchOrchestrator::new(
            pool.clone(),
            provider,
            Arc::new(JobAnalyzer::new(Arc::new(FailingPrimary))),
            jobs,
            Arc::new(FixedPlanLookup::new("pro", weekly_limit, 3)),
            Arc::new(resumes),
        )
    }

    async fn job_count(pool: &SqlitePool, user_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_run_requires_titles_or_resume() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let err = orch
            .create_run("u1", None, target(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        // With a resume the titles come from experience history.
        let (run, _) = orch
            .create_run("u1", Some("resume-1"), target(&[]))
            .await
            .unwrap();
        assert_eq!(run.target.job_titles, vec!["Platform Engineer"]);
        assert_eq!(run.search_name, "Platform Engineer");
    }

    #[tokio::test]
    async fn test_create_run_rejects_when_quota_exhausted() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 5);

        let ledger = QuotaLedger::new(&pool);
        ledger.capacity("u1", "pro", 5).await.unwrap();
        ledger.commit("u1", "earlier-run", 5, "weekly").await.unwrap();

        let err = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::QuotaExhausted { used: 5, limit: 5 }
        ));
    }

    #[tokio::test]
    async fn test_create_run_rejects_excess_locations() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let mut t = target(&["Data Engineer"]);
        t.locations = vec![
            "Austin".to_string(),
            "Denver".to_string(),
            "Boston".to_string(),
            "Seattle".to_string(),
        ];
        let err = orch.create_run("u1", None, t).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_full_run_persists_and_commits() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![
            posting("Data Engineer", "Acme", "p1"),
            // In-batch duplicate of p1.
            posting("data engineer", "ACME", "p2"),
            posting("Data Engineer", "Beta", "p3"),
            posting("Analytics Engineer", "Gamma", "p4"),
        ]));
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let repo = SearchRunRepository::new(&pool);
        let done = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.jobs_found_this_run, 3);
        assert_eq!(done.total_jobs_found, 3);
        assert!(done.next_run_at.is_some());
        assert!(done.status_message.contains("3 new jobs"));

        let phases: Vec<Phase> = done.audit_log.iter().map(|e| e.phase).collect();
        for phase in [
            Phase::Plan,
            Phase::Discover,
            Phase::Analyze,
            Phase::Deduplicate,
            Phase::Persist,
            Phase::Reconcile,
        ] {
            assert!(phases.contains(&phase), "missing phase {:?}", phase);
        }

        assert_eq!(job_count(&pool, "u1").await, 3);
        let status = orch.get_weekly_status("u1").await.unwrap();
        assert_eq!(status.used, 3);
        assert_eq!(status.remaining, 47);
    }

    #[tokio::test]
    async fn test_run_stops_at_weekly_limit() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![
            posting("Data Engineer", "Acme", "p1"),
            posting("Backend Engineer", "Beta", "p2"),
            posting("Platform Engineer", "Gamma", "p3"),
            posting("Analytics Engineer", "Delta", "p4"),
        ]));
        let orch = orchestrator(&pool, provider, 2);

        let (run, _) = orch
            .create_run("u1", None, target(&["Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.jobs_found_this_run, 2);

        assert_eq!(job_count(&pool, "u1").await, 2);
        let status = orch.get_weekly_status("u1").await.unwrap();
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_run_with_classified_reason() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::failing(ProviderError::Auth(
            "HTTP 401: bad key".to_string(),
        )));
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.status_message.contains("authentication failed"));
        assert_eq!(job_count(&pool, "u1").await, 0);
    }

    #[tokio::test]
    async fn test_empty_discovery_completes_cleanly() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.status_message.contains("No new postings"));
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_duplicate_titles_searched_once() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![]));
        let orch = orchestrator(&pool, provider.clone(), 50);

        let (run, _) = orch
            .create_run(
                "u1",
                None,
                target(&["Data Engineer", "data engineer", "ML Engineer"]),
            )
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let queries = provider.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 2);
    }

    #[tokio::test]
    async fn test_pause_and_resume_do_not_retrigger_execution() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let (mut run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        let repo = SearchRunRepository::new(&pool);
        run.status = RunStatus::Running;
        repo.save(&run).await.unwrap();

        orch.pause("u1", &run.id).await.unwrap();
        let paused = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(paused.status, RunStatus::Paused);

        // A paused run skips the phase loop entirely.
        orch.execute_run(&run.id).await.unwrap();
        let still_paused = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(still_paused.status, RunStatus::Paused);
        assert!(still_paused.audit_log.is_empty());

        // Resume flips status only; no discovery happens until the next
        // scheduled trigger.
        orch.resume("u1", &run.id).await.unwrap();
        let resumed = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, RunStatus::Running);
        assert_eq!(job_count(&pool, "u1").await, 0);
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 0);

        // Pause and resume are idempotent.
        orch.resume("u1", &run.id).await.unwrap();
        orch.pause("u1", &run.id).await.unwrap();
        orch.pause("u1", &run.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_rejects_planned_run() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        let err = orch.pause("u1", &run.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ownership_enforced_on_controls() {
        let pool = test_pool().await;
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![])), 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();

        assert!(matches!(
            orch.pause("intruder", &run.id).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            orch.cancel("intruder", &run.id).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            orch.resume("intruder", "no-such-run").await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_preserves_quota_spend() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![
            posting("Data Engineer", "Acme", "p1"),
            posting("Backend Engineer", "Beta", "p2"),
        ]));
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 2);

        orch.cancel("u1", &run.id).await.unwrap();

        let cancelled = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.next_run_at.is_none());

        // The slots stay spent; the contribution is only flagged.
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 2);
        let contributions = QuotaLedger::new(&pool).contributions("u1").await.unwrap();
        assert_eq!(contributions.len(), 1);
        assert!(contributions[0].deleted);

        // Cancelling again is a no-op.
        orch.cancel("u1", &run.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_discovery_wins_over_run() {
        let pool = test_pool().await;
        let provider = Arc::new(HaltingProvider {
            pool: pool.clone(),
            halt_as: RunStatus::Cancelled,
            postings: vec![posting("Data Engineer", "Acme", "p1")],
        });
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        // The cancel that landed mid-search must not be overwritten by
        // later phase writes, and nothing past Discover may run.
        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Cancelled);
        let phases: Vec<Phase> = done.audit_log.iter().map(|e| e.phase).collect();
        assert!(!phases.contains(&Phase::Persist));
        assert!(!phases.contains(&Phase::Reconcile));

        assert_eq!(job_count(&pool, "u1").await, 0);
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_pause_during_discovery_stops_phase_loop() {
        let pool = test_pool().await;
        let provider = Arc::new(HaltingProvider {
            pool: pool.clone(),
            halt_as: RunStatus::Paused,
            postings: vec![posting("Data Engineer", "Acme", "p1")],
        });
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Paused);
        assert!(done
            .audit_log
            .last()
            .unwrap()
            .message
            .to_lowercase()
            .contains("paused"));
        assert_eq!(job_count(&pool, "u1").await, 0);
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_save_failures_are_isolated_and_commit_matches_saved() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![
            posting("Data Engineer", "Acme", "p1"),
            posting("Backend Engineer", "Beta", "p2"),
            posting("Platform Engineer", "Gamma", "p3"),
        ]));
        let store = Arc::new(RejectingStore {
            inner: SqliteJobStore::new(pool.clone()),
            reject_title: "Backend Engineer".to_string(),
        });
        let orch = orchestrator_with(&pool, provider, store, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        // One write failed; the run still completes and the ledger is
        // charged exactly the saved count.
        let done = SearchRunRepository::new(&pool)
            .get(&run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.jobs_found_this_run, 2);
        let persist = done
            .audit_log
            .iter()
            .find(|e| e.phase == Phase::Persist)
            .unwrap();
        assert!(!persist.success);

        assert_eq!(job_count(&pool, "u1").await, 2);
        assert_eq!(orch.get_weekly_status("u1").await.unwrap().used, 2);
    }

    #[tokio::test]
    async fn test_persisted_jobs_carry_extracted_salary() {
        let pool = test_pool().await;
        let mut offer = posting("Data Engineer", "Acme", "p1");
        offer.description = "Pays $120,000 - $150,000. Requires Python.".to_string();
        let orch = orchestrator(&pool, Arc::new(FakeProvider::returning(vec![offer])), 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let stored: Option<String> =
            sqlx::query_scalar("SELECT salary FROM jobs WHERE user_id = 'u1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        let salary: SalaryRange = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(salary.min, Some(120_000.0));
        assert_eq!(salary.max, Some(150_000.0));
        assert_eq!(salary.source, "posting_text");
    }

    #[tokio::test]
    async fn test_run_due_searches_spawns_successor_for_completed() {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::returning(vec![posting(
            "Data Engineer",
            "Acme",
            "p1",
        )]));
        let orch = orchestrator(&pool, provider, 50);

        let (run, _) = orch
            .create_run("u1", None, target(&["Data Engineer"]))
            .await
            .unwrap();
        orch.execute_run(&run.id).await.unwrap();

        let repo = SearchRunRepository::new(&pool);
        let mut done = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);

        // Nothing due yet: the next trigger is a week out.
        assert_eq!(orch.run_due_searches(Utc::now()).await.unwrap(), 0);

        // Force the trigger into the past.
        done.next_run_at = Some(Utc::now() - ChronoDuration::hours(1));
        repo.save(&done).await.unwrap();

        let executed = orch.run_due_searches(Utc::now()).await.unwrap();
        assert_eq!(executed, 1);

        // The original run is no longer scheduled and a completed
        // successor carries the lifetime total forward. The second
        // discovery of the same posting deduplicates to zero saves.
        let original = repo.get(&run.id).await.unwrap().unwrap();
        assert!(original.next_run_at.is_none());

        let completed = repo
            .list_by_status("u1", RunStatus::Completed)
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);
        let successor = completed.iter().find(|r| r.id != run.id).unwrap();
        assert_eq!(successor.jobs_found_this_run, 0);
        assert_eq!(successor.total_jobs_found, 1);
        assert_eq!(job_count(&pool, "u1").await, 1);
    }
}
