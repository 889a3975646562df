//! The build-run state machine.
//!
//! One [`Reconciler::reconcile`] call makes at most one state transition
//! for one run and returns whether the caller should come back. Every
//! invocation re-reads its inputs, so a crash between any two store
//! writes is repaired by the next invocation rather than handled inline.
//!
//! Status writes happen under optimistic concurrency: on conflict the run
//! is re-read and the computed status re-applied, a bounded number of
//! times. Transient failures are retried across invocations under a
//! per-run budget; exhausting it marks the run failed instead of looping
//! forever.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use kiln_compiler::{self as compiler, CompileError, CompilerConfig, DEFAULT_SOURCE_NAME};
use kiln_types::build::Build;
use kiln_types::buildrun::BuildRun;
use kiln_types::condition::ConditionStatus;
use kiln_types::now;
use kiln_types::strategy::Strategy;
use kiln_types::task::{TaskRun, TaskRunStatus};

use crate::service_account::{self, ServiceAccountError};
use crate::store::{ApiError, ResourceStore};

/// Condition reason for a run whose build no longer exists.
pub const REASON_BUILD_NOT_FOUND: &str = "BuildNotFound";
/// Condition reason for a run whose strategy no longer exists.
pub const REASON_STRATEGY_NOT_FOUND: &str = "StrategyNotFound";
/// Condition reason for a run submitted but not yet started.
pub const REASON_PENDING: &str = "Pending";
/// Condition reason for a successful run.
pub const REASON_SUCCEEDED: &str = "Succeeded";
/// Condition reason when transient failures outlast the retry budget.
pub const REASON_RETRY_EXHAUSTED: &str = "RetryBudgetExhausted";

/// Bounded re-read attempts for optimistic-concurrency conflicts.
const STATUS_CONFLICT_RETRIES: usize = 3;

/// What the caller should do after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The run is terminal (or gone); no further invocations needed.
    Done,
    /// Progress was made or a transient failure occurred; invoke again.
    Requeue,
}

/// How many transient failures a single run absorbs before it is marked
/// failed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Errors that escape a reconciliation invocation.
///
/// Terminal conditions (missing build, compile rejection, engine failure)
/// are not errors here; they are recorded on the run's status and the
/// invocation returns [`Outcome::Done`]. What escapes is transient store
/// trouble the retry budget governs.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    ServiceAccount(#[from] ServiceAccountError),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Api(_) => true,
            ReconcileError::ServiceAccount(err) => err.is_retryable(),
        }
    }
}

/// Drives build runs to a terminal condition against a [`ResourceStore`].
pub struct Reconciler<'a> {
    store: &'a dyn ResourceStore,
    config: CompilerConfig,
    retry: RetryPolicy,
    /// Consecutive transient-failure count per `namespace/name`.
    attempts: Mutex<BTreeMap<String, u32>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ResourceStore, config: CompilerConfig) -> Self {
        Self {
            store,
            config,
            retry: RetryPolicy::default(),
            attempts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One invocation for one run, with the retry budget applied.
    ///
    /// A transient failure consumes one attempt and asks for a requeue;
    /// the attempt that exhausts the budget marks the run failed with
    /// reason `RetryBudgetExhausted` instead. Any success resets the
    /// run's budget.
    pub fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError> {
        let key = format!("{namespace}/{name}");
        match self.reconcile_once(namespace, name) {
            Ok(outcome) => {
                self.attempts.lock().remove(&key);
                Ok(outcome)
            }
            Err(err) if err.is_retryable() => {
                let attempt = {
                    let mut attempts = self.attempts.lock();
                    let counter = attempts.entry(key.clone()).or_insert(0);
                    *counter += 1;
                    *counter
                };
                if attempt < self.retry.max_attempts {
                    warn!(
                        buildrun = %key,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "transient reconciliation failure, will retry"
                    );
                    return Ok(Outcome::Requeue);
                }
                self.attempts.lock().remove(&key);
                self.fail_exhausted(namespace, name, &err)?;
                Ok(Outcome::Done)
            }
            Err(err) => Err(err),
        }
    }

    /// A single pass of the state machine, without retry accounting.
    pub fn reconcile_once(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome, ReconcileError> {
        let mut run = match self.store.get_build_run(namespace, name) {
            Ok(run) => run,
            // deleted out from under us; owner references reap the rest
            Err(err) if err.is_not_found() => return Ok(Outcome::Done),
            Err(err) => return Err(err.into()),
        };

        if run.is_done() {
            self.cleanup_credentials(&run);
            return Ok(Outcome::Done);
        }

        let build = match self.store.get_build(namespace, &run.spec.build_ref) {
            Ok(build) => build,
            Err(err) if err.is_not_found() => {
                info!(buildrun = %name, build = %run.spec.build_ref, "referenced build not found");
                let message = format!("build {:?} not found", run.spec.build_ref);
                return self.finish_failed(&mut run, REASON_BUILD_NOT_FOUND, message);
            }
            Err(err) => return Err(err.into()),
        };

        let strategy = match self.store.get_strategy(
            namespace,
            &build.spec.strategy.name,
            build.spec.strategy.scope,
        ) {
            Ok(strategy) => strategy,
            Err(err) if err.is_not_found() => {
                info!(
                    buildrun = %name,
                    strategy = %build.spec.strategy.name,
                    "referenced strategy not found"
                );
                return self.finish_failed(
                    &mut run,
                    REASON_STRATEGY_NOT_FOUND,
                    format!("strategy {:?} not found", build.spec.strategy.name),
                );
            }
            Err(err) => return Err(err.into()),
        };

        // snapshot the resolved spec once, before anything derives from it
        if run.status.build_spec.is_none() {
            run.status.build_spec = Some(build.spec.clone());
        }

        let account = match service_account::retrieve(self.store, &build, &mut run) {
            Ok(account) => account,
            // already surfaced on the run's status by `retrieve`
            Err(ServiceAccountError::NotFound { .. }) => return Ok(Outcome::Done),
            Err(err) => return Err(err.into()),
        };

        let task_run = match self.ensure_task_run(&build, &mut run, &strategy, &account.metadata.name)? {
            Some(task_run) => task_run,
            // compile rejection, already terminal
            None => return Ok(Outcome::Done),
        };

        self.observe(&build, &mut run, task_run.status.as_ref())
    }

    /// Submit the run's task run if it has not been submitted, or fetch
    /// the one already submitted.
    ///
    /// The task-run name lands in status before the create call, so a
    /// crash between the two is repaired on the next invocation instead
    /// of producing a duplicate. Returns `None` on compile rejection.
    fn ensure_task_run(
        &self,
        build: &Build,
        run: &mut BuildRun,
        strategy: &Strategy,
        account_name: &str,
    ) -> Result<Option<TaskRun>, ReconcileError> {
        let task_run_name = run.task_run_name();

        if run.status.task_run_name.is_some() {
            match self.store.get_task_run(&run.metadata.namespace, &task_run_name) {
                Ok(existing) => return Ok(Some(existing)),
                // recorded but never created; fall through and create it
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        let task_run = match compiler::generate_task_run(
            &self.config,
            build,
            run,
            account_name,
            strategy,
        ) {
            Ok(task_run) => task_run,
            Err(err) => {
                self.reject(run, &err)?;
                return Ok(None);
            }
        };

        run.status.task_run_name = Some(task_run_name.clone());
        self.persist_status(run)?;

        match self.store.create_task_run(&task_run) {
            Ok(()) => {
                info!(
                    buildrun = %run.metadata.name,
                    task_run = %task_run_name,
                    "submitted task run"
                );
                Ok(Some(task_run))
            }
            // a concurrent invocation won the create race
            Err(ApiError::AlreadyExists { .. }) => {
                let existing = self
                    .store
                    .get_task_run(&run.metadata.namespace, &task_run_name)?;
                Ok(Some(existing))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Mirror the engine's view of the task run onto the run's status.
    fn observe(
        &self,
        build: &Build,
        run: &mut BuildRun,
        engine_status: Option<&TaskRunStatus>,
    ) -> Result<Outcome, ReconcileError> {
        let Some(status) = engine_status else {
            run.status
                .set_condition(ConditionStatus::Unknown, REASON_PENDING, "task run submitted");
            self.persist_status(run)?;
            return Ok(Outcome::Requeue);
        };

        if run.status.start_time.is_none() {
            run.status.start_time = status.start_time;
        }

        let Some(condition) = status.condition.as_ref().filter(|c| {
            matches!(c.status, ConditionStatus::True | ConditionStatus::False)
        }) else {
            let (reason, message) = status
                .condition
                .as_ref()
                .map(|c| (c.reason.clone(), c.message.clone()))
                .unwrap_or_else(|| (REASON_PENDING.to_string(), "task run submitted".to_string()));
            run.status
                .set_condition(ConditionStatus::Unknown, reason, message);
            self.persist_status(run)?;
            return Ok(Outcome::Requeue);
        };

        // terminal either way from here
        if let Some(result) =
            compiler::extract_source_result(&build.spec.source, DEFAULT_SOURCE_NAME, &status.results)
        {
            run.status.record_source_result(result);
        }
        run.status.completion_time = status.completion_time.or_else(|| Some(now()));

        match condition.status {
            ConditionStatus::True => {
                run.status.set_condition(
                    ConditionStatus::True,
                    REASON_SUCCEEDED,
                    condition.message.clone(),
                );
                info!(buildrun = %run.metadata.name, "build run succeeded");
            }
            _ => {
                // a failed source step leaves a structured reason behind
                let (reason, message) = compiler::extract_error_result(&status.results)
                    .unwrap_or_else(|| (condition.reason.clone(), condition.message.clone()));
                run.status
                    .set_condition(ConditionStatus::False, reason, message);
                info!(
                    buildrun = %run.metadata.name,
                    reason = %condition.reason,
                    "build run failed"
                );
            }
        }

        self.persist_status(run)?;
        self.cleanup_credentials(run);
        Ok(Outcome::Done)
    }

    /// Record a compile rejection as a terminal failure. The task run is
    /// never submitted.
    fn reject(&self, run: &mut BuildRun, err: &CompileError) -> Result<(), ReconcileError> {
        debug!(buildrun = %run.metadata.name, error = %err, "task run rejected at compile time");
        run.status.completion_time = Some(now());
        run.status
            .set_condition(ConditionStatus::False, err.reason(), err.to_string());
        self.persist_status(run)?;
        self.cleanup_credentials(run);
        Ok(())
    }

    /// Mark the run terminally failed with a reason, at a point where no
    /// task run exists yet.
    fn finish_failed(
        &self,
        run: &mut BuildRun,
        reason: &str,
        message: String,
    ) -> Result<Outcome, ReconcileError> {
        run.status.completion_time = Some(now());
        run.status
            .set_condition(ConditionStatus::False, reason, message);
        self.persist_status(run)?;
        self.cleanup_credentials(run);
        Ok(Outcome::Done)
    }

    /// Mark the run failed after its transient-failure budget ran out,
    /// unless something else already made it terminal.
    fn fail_exhausted(
        &self,
        namespace: &str,
        name: &str,
        last_error: &ReconcileError,
    ) -> Result<(), ReconcileError> {
        let mut run = match self.store.get_build_run(namespace, name) {
            Ok(run) => run,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if run.is_done() {
            return Ok(());
        }
        warn!(
            buildrun = %name,
            max_attempts = self.retry.max_attempts,
            error = %last_error,
            "retry budget exhausted, failing the run"
        );
        run.status.completion_time = Some(now());
        run.status.set_condition(
            ConditionStatus::False,
            REASON_RETRY_EXHAUSTED,
            format!(
                "giving up after {} attempts: {last_error}",
                self.retry.max_attempts
            ),
        );
        self.persist_status(&mut run)?;
        self.cleanup_credentials(&run);
        Ok(())
    }

    /// Best-effort removal of the run's generated service account.
    fn cleanup_credentials(&self, run: &BuildRun) {
        if let Err(err) = service_account::delete_generated(self.store, run) {
            warn!(
                buildrun = %run.metadata.name,
                error = %err,
                "failed to delete generated service account"
            );
        }
    }

    /// Conditional status write, re-reading and re-applying on conflict.
    fn persist_status(&self, run: &mut BuildRun) -> Result<(), ApiError> {
        let mut conflicts = 0;
        loop {
            match self.store.update_build_run_status(run) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() && conflicts < STATUS_CONFLICT_RETRIES => {
                    conflicts += 1;
                    let status = run.status.clone();
                    *run = self
                        .store
                        .get_build_run(&run.metadata.namespace, &run.metadata.name)?;
                    run.status = status;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
