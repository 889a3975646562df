//! Service-account lifecycle: resolve, generate, and clean up the identity
//! a build run's task executes under.
//!
//! All three resolution paths (named, generated, namespace default)
//! converge on the same contract: return an account whose secret list
//! already contains the output push credential, or fail. Generation is
//! get-or-create so concurrent reconciliations of the same run never race
//! into duplicates.

use thiserror::Error;
use tracing::{debug, info, warn};

use kiln_types::account::ServiceAccount;
use kiln_types::build::Build;
use kiln_types::buildrun::{BuildRun, ServiceAccountSpec};
use kiln_types::condition::ConditionStatus;
use kiln_types::meta::{ObjectMeta, OwnerReference};
use kiln_types::names;

use crate::store::{ApiError, ResourceStore};

/// Name of the namespace default service account.
const DEFAULT_ACCOUNT: &str = "default";

/// Bounded re-read attempts for optimistic-concurrency conflicts.
const CONFLICT_RETRIES: usize = 3;

/// Condition reason recorded when a named account does not exist.
pub const REASON_ACCOUNT_NOT_FOUND: &str = "ServiceAccountNotFound";

/// Errors from service-account resolution.
#[derive(Debug, Error)]
pub enum ServiceAccountError {
    /// The requested account does not exist. Terminal for this
    /// reconciliation attempt; already surfaced to the run's status.
    #[error("service account {name:?} not found")]
    NotFound { name: String },

    /// Any other store failure; retryable.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The real problem, plus the failure to record it. Callers surface
    /// both.
    #[error("{original}; additionally, recording the failure in status failed: {update_error}")]
    StatusUpdate {
        original: Box<ServiceAccountError>,
        update_error: ApiError,
    },
}

impl ServiceAccountError {
    /// Whether a later reconciliation may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceAccountError::NotFound { .. } => false,
            ServiceAccountError::Api(_) => true,
            ServiceAccountError::StatusUpdate { .. } => true,
        }
    }
}

/// Resolve the service account a run's task executes under, with the
/// output push secret attached.
///
/// On a terminal not-found the failure is recorded into the run's status
/// before returning; a failure of that status write is reported as
/// [`ServiceAccountError::StatusUpdate`] wrapping the original problem.
pub fn retrieve(
    store: &dyn ResourceStore,
    build: &Build,
    buildrun: &mut BuildRun,
) -> Result<ServiceAccount, ServiceAccountError> {
    let push_secret = output_secret(build, buildrun);
    let namespace = buildrun.metadata.namespace.clone();

    match buildrun.spec.service_account.clone() {
        ServiceAccountSpec::Name(name) => match store.get_service_account(&namespace, &name) {
            Ok(account) => attach_and_persist(store, account, push_secret.as_deref())
                .map_err(ServiceAccountError::from),
            Err(err) if err.is_not_found() => {
                Err(record_not_found(store, buildrun, &name))
            }
            Err(err) => Err(err.into()),
        },
        ServiceAccountSpec::Generate => {
            get_or_generate(store, buildrun, push_secret.as_deref()).map_err(ServiceAccountError::from)
        }
        ServiceAccountSpec::Default => {
            match store.get_service_account(&namespace, DEFAULT_ACCOUNT) {
                Ok(account) => attach_and_persist(store, account, push_secret.as_deref())
                    .map_err(ServiceAccountError::from),
                Err(err) if err.is_not_found() => {
                    Err(record_not_found(store, buildrun, DEFAULT_ACCOUNT))
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

/// Delete this run's generated account, if it was generated.
///
/// Returns whether an account was actually deleted. A user-supplied
/// account is never touched; an already-gone generated account is
/// success, not an error.
pub fn delete_generated(
    store: &dyn ResourceStore,
    buildrun: &BuildRun,
) -> Result<bool, ApiError> {
    if buildrun.spec.service_account != ServiceAccountSpec::Generate {
        return Ok(false);
    }
    let name = buildrun.generated_account_name();
    match store.delete_service_account(&buildrun.metadata.namespace, name) {
        Ok(()) => {
            info!(
                buildrun = %buildrun.metadata.name,
                account = %name,
                "deleted generated service account"
            );
            Ok(true)
        }
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Get-or-create the deterministic generated account for a run.
fn get_or_generate(
    store: &dyn ResourceStore,
    buildrun: &BuildRun,
    push_secret: Option<&str>,
) -> Result<ServiceAccount, ApiError> {
    let namespace = &buildrun.metadata.namespace;
    let name = buildrun.generated_account_name();

    match store.get_service_account(namespace, name) {
        Ok(account) => {
            debug!(account = %name, "reusing existing generated service account");
            attach_and_persist(store, account, push_secret)
        }
        Err(err) if err.is_not_found() => {
            let account = generated_account(buildrun, push_secret);
            match store.create_service_account(&account) {
                Ok(()) => {
                    info!(
                        buildrun = %buildrun.metadata.name,
                        account = %name,
                        "generated service account"
                    );
                    Ok(account)
                }
                // lost the create race to a concurrent reconciliation
                Err(ApiError::AlreadyExists { .. }) => {
                    let existing = store.get_service_account(namespace, name)?;
                    attach_and_persist(store, existing, push_secret)
                }
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// The account generated for a run: labeled for reverse lookup, owned by
/// the run for cascading deletion, token automount disabled.
fn generated_account(buildrun: &BuildRun, push_secret: Option<&str>) -> ServiceAccount {
    let mut metadata = ObjectMeta::named(
        buildrun.generated_account_name(),
        &buildrun.metadata.namespace,
    );
    metadata.labels.insert(
        names::LABEL_BUILD_RUN.to_string(),
        buildrun.metadata.name.clone(),
    );
    metadata
        .owner_references
        .push(OwnerReference::new("BuildRun", &buildrun.metadata.name));

    ServiceAccount {
        metadata,
        secrets: push_secret.map(String::from).into_iter().collect(),
        automount_token: Some(false),
    }
}

/// Attach the push secret and persist the account when that changed it,
/// retrying conflicts by re-reading and re-applying.
fn attach_and_persist(
    store: &dyn ResourceStore,
    mut account: ServiceAccount,
    push_secret: Option<&str>,
) -> Result<ServiceAccount, ApiError> {
    let Some(secret) = push_secret else {
        return Ok(account);
    };
    if !account.attach_secret(secret) {
        return Ok(account);
    }

    for _ in 0..CONFLICT_RETRIES {
        match store.update_service_account(&account) {
            Ok(()) => return Ok(account),
            Err(err) if err.is_conflict() => {
                account =
                    store.get_service_account(&account.metadata.namespace, &account.metadata.name)?;
                account.attach_secret(secret);
            }
            Err(err) => return Err(err),
        }
    }
    store.update_service_account(&account)?;
    Ok(account)
}

/// Surface a not-found account on the run's status; a failing status
/// write is reported alongside the original problem.
fn record_not_found(
    store: &dyn ResourceStore,
    buildrun: &mut BuildRun,
    name: &str,
) -> ServiceAccountError {
    let original = ServiceAccountError::NotFound {
        name: name.to_string(),
    };

    buildrun.status.set_condition(
        ConditionStatus::False,
        REASON_ACCOUNT_NOT_FOUND,
        format!("service account {name} not found"),
    );

    if let Err(update_error) = store.update_build_run_status(buildrun) {
        warn!(
            buildrun = %buildrun.metadata.name,
            error = %update_error,
            "failed to record service-account failure in status"
        );
        return ServiceAccountError::StatusUpdate {
            original: Box::new(original),
            update_error,
        };
    }
    original
}

/// The push credential the compiled steps need.
fn output_secret(build: &Build, buildrun: &BuildRun) -> Option<String> {
    buildrun
        .spec
        .output
        .as_ref()
        .map(|o| o.credentials.clone())
        .unwrap_or_else(|| build.spec.output.credentials.clone())
}
