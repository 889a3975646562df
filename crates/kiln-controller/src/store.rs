//! Store abstraction: the seam between the reconciliation core and the
//! remote resource store.
//!
//! The trait is the narrow capability surface the core needs — typed get,
//! create, update, delete — and [`MemoryStore`] is the in-memory
//! implementation used by tests. Error classification matters more than
//! error detail here: callers branch on not-found versus conflict versus
//! everything else.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;

use kiln_types::account::ServiceAccount;
use kiln_types::build::Build;
use kiln_types::buildrun::BuildRun;
use kiln_types::strategy::{Strategy, StrategyScope};
use kiln_types::task::{TaskRun, TaskRunStatus};

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Optimistic-concurrency conflict; re-read and re-apply.
    #[error("conflict writing {kind} {name:?}")]
    Conflict { kind: &'static str, name: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl ApiError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ApiError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

/// Typed access to the remote store.
///
/// Strategies, builds, and task-run statuses are read-only inputs here;
/// the core writes build-run status, task-run specs (create only), and
/// service accounts.
pub trait ResourceStore: Send + Sync {
    fn get_strategy(
        &self,
        namespace: &str,
        name: &str,
        scope: StrategyScope,
    ) -> Result<Strategy, ApiError>;

    fn get_build(&self, namespace: &str, name: &str) -> Result<Build, ApiError>;

    fn get_build_run(&self, namespace: &str, name: &str) -> Result<BuildRun, ApiError>;

    /// Conditional status write; fails with [`ApiError::Conflict`] when the
    /// stored object changed since it was read.
    fn update_build_run_status(&self, run: &BuildRun) -> Result<(), ApiError>;

    fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun, ApiError>;

    fn create_task_run(&self, task_run: &TaskRun) -> Result<(), ApiError>;

    fn get_service_account(&self, namespace: &str, name: &str)
    -> Result<ServiceAccount, ApiError>;

    fn create_service_account(&self, account: &ServiceAccount) -> Result<(), ApiError>;

    fn update_service_account(&self, account: &ServiceAccount) -> Result<(), ApiError>;

    fn delete_service_account(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory store for tests: one map per resource kind behind
/// non-poisoning locks, plus injectable failures and call counters.
#[derive(Default)]
pub struct MemoryStore {
    strategies: Mutex<BTreeMap<Key, Strategy>>,
    builds: Mutex<BTreeMap<Key, Build>>,
    build_runs: Mutex<BTreeMap<Key, BuildRun>>,
    task_runs: Mutex<BTreeMap<Key, TaskRun>>,
    service_accounts: Mutex<BTreeMap<Key, ServiceAccount>>,

    /// Counters for asserting idempotency in tests.
    service_account_creates: Mutex<usize>,
    task_run_creates: Mutex<usize>,

    /// Number of upcoming build-run status updates to fail with a conflict.
    status_conflicts: Mutex<usize>,
    /// Error returned by every service-account get until cleared.
    account_get_failure: Mutex<Option<ApiError>>,
    /// Error returned by every build-run status update until cleared.
    status_update_failure: Mutex<Option<ApiError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ─────────────────────────────────────────────────────

    pub fn put_strategy(&self, strategy: Strategy) {
        let k = key(&strategy.metadata.namespace, &strategy.metadata.name);
        self.strategies.lock().insert(k, strategy);
    }

    pub fn put_build(&self, build: Build) {
        let k = key(&build.metadata.namespace, &build.metadata.name);
        self.builds.lock().insert(k, build);
    }

    pub fn put_build_run(&self, run: BuildRun) {
        let k = key(&run.metadata.namespace, &run.metadata.name);
        self.build_runs.lock().insert(k, run);
    }

    pub fn put_service_account(&self, account: ServiceAccount) {
        let k = key(&account.metadata.namespace, &account.metadata.name);
        self.service_accounts.lock().insert(k, account);
    }

    /// Simulate the execution engine writing a task-run status.
    pub fn set_task_run_status(&self, namespace: &str, name: &str, status: TaskRunStatus) {
        if let Some(task_run) = self.task_runs.lock().get_mut(&key(namespace, name)) {
            task_run.status = Some(status);
        }
    }

    // ── Failure injection & counters ────────────────────────────────

    /// Fail the next `count` build-run status updates with a conflict.
    pub fn inject_status_conflicts(&self, count: usize) {
        *self.status_conflicts.lock() = count;
    }

    /// Fail every service-account get with the given error until cleared.
    pub fn inject_account_get_failure(&self, error: Option<ApiError>) {
        *self.account_get_failure.lock() = error;
    }

    /// Fail every build-run status update with the given error until
    /// cleared.
    pub fn inject_status_update_failure(&self, error: Option<ApiError>) {
        *self.status_update_failure.lock() = error;
    }

    pub fn service_account_create_count(&self) -> usize {
        *self.service_account_creates.lock()
    }

    pub fn task_run_create_count(&self) -> usize {
        *self.task_run_creates.lock()
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.service_accounts.lock().get(&key(namespace, name)).cloned()
    }

    pub fn task_run(&self, namespace: &str, name: &str) -> Option<TaskRun> {
        self.task_runs.lock().get(&key(namespace, name)).cloned()
    }
}

impl ResourceStore for MemoryStore {
    fn get_strategy(
        &self,
        namespace: &str,
        name: &str,
        _scope: StrategyScope,
    ) -> Result<Strategy, ApiError> {
        self.strategies
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found("Strategy", name))
    }

    fn get_build(&self, namespace: &str, name: &str) -> Result<Build, ApiError> {
        self.builds
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found("Build", name))
    }

    fn get_build_run(&self, namespace: &str, name: &str) -> Result<BuildRun, ApiError> {
        self.build_runs
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found("BuildRun", name))
    }

    fn update_build_run_status(&self, run: &BuildRun) -> Result<(), ApiError> {
        if let Some(error) = self.status_update_failure.lock().clone() {
            return Err(error);
        }
        {
            let mut conflicts = self.status_conflicts.lock();
            if *conflicts > 0 {
                *conflicts -= 1;
                return Err(ApiError::Conflict {
                    kind: "BuildRun",
                    name: run.metadata.name.clone(),
                });
            }
        }
        let mut runs = self.build_runs.lock();
        let k = key(&run.metadata.namespace, &run.metadata.name);
        match runs.get_mut(&k) {
            Some(stored) => {
                stored.status = run.status.clone();
                Ok(())
            }
            None => Err(ApiError::not_found("BuildRun", &run.metadata.name)),
        }
    }

    fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun, ApiError> {
        self.task_runs
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found("TaskRun", name))
    }

    fn create_task_run(&self, task_run: &TaskRun) -> Result<(), ApiError> {
        *self.task_run_creates.lock() += 1;
        let mut task_runs = self.task_runs.lock();
        let k = key(&task_run.metadata.namespace, &task_run.metadata.name);
        if task_runs.contains_key(&k) {
            return Err(ApiError::AlreadyExists {
                kind: "TaskRun",
                name: task_run.metadata.name.clone(),
            });
        }
        task_runs.insert(k, task_run.clone());
        Ok(())
    }

    fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, ApiError> {
        if let Some(error) = self.account_get_failure.lock().clone() {
            return Err(error);
        }
        self.service_accounts
            .lock()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found("ServiceAccount", name))
    }

    fn create_service_account(&self, account: &ServiceAccount) -> Result<(), ApiError> {
        *self.service_account_creates.lock() += 1;
        let mut accounts = self.service_accounts.lock();
        let k = key(&account.metadata.namespace, &account.metadata.name);
        if accounts.contains_key(&k) {
            return Err(ApiError::AlreadyExists {
                kind: "ServiceAccount",
                name: account.metadata.name.clone(),
            });
        }
        accounts.insert(k, account.clone());
        Ok(())
    }

    fn update_service_account(&self, account: &ServiceAccount) -> Result<(), ApiError> {
        let mut accounts = self.service_accounts.lock();
        let k = key(&account.metadata.namespace, &account.metadata.name);
        match accounts.get_mut(&k) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(ApiError::not_found("ServiceAccount", &account.metadata.name)),
        }
    }

    fn delete_service_account(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.service_accounts
            .lock()
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found("ServiceAccount", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::meta::ObjectMeta;

    fn account(name: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta::named(name, "default"),
            ..Default::default()
        }
    }

    #[test]
    fn test_error_classification() {
        let not_found = ApiError::not_found("Build", "x");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let conflict = ApiError::Conflict {
            kind: "BuildRun",
            name: "x".into(),
        };
        assert!(conflict.is_conflict());
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let store = MemoryStore::new();
        store.create_service_account(&account("sa")).unwrap();
        let err = store.create_service_account(&account("sa")).unwrap_err();
        assert!(matches!(err, ApiError::AlreadyExists { .. }));
        assert_eq!(store.service_account_create_count(), 2);
    }

    #[test]
    fn test_injected_status_conflicts_decrement() {
        let store = MemoryStore::new();
        let run = BuildRun {
            metadata: ObjectMeta::named("run", "default"),
            ..Default::default()
        };
        store.put_build_run(run.clone());
        store.inject_status_conflicts(1);

        assert!(store.update_build_run_status(&run).unwrap_err().is_conflict());
        store.update_build_run_status(&run).unwrap();
    }

    #[test]
    fn test_delete_missing_account_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_service_account("default", "gone").unwrap_err();
        assert!(err.is_not_found());
    }
}
