//! Source step builders and result extractors.
//!
//! Each source kind contributes a fetch step (plus declared result slots
//! and credential wiring) to the compiled task, and owns the matching
//! extractor that parses the engine's reported results back into a typed
//! [`SourceResult`]. Dispatch is a closed match over [`SourceKind`], so
//! adding a kind is a compile-checked change.

pub mod bundle;
pub mod git;
pub mod local;

use kiln_types::build::{Source, SourceKind};
use kiln_types::buildrun::SourceResult;
use kiln_types::names;
use kiln_types::strategy::{BuildStep, EnvVar, SecurityContext};
use kiln_types::task::{TaskRunResult, TaskSpec, Volume};

use crate::config::CompilerConfig;

/// Name used for a build's single source when emitting steps and results.
pub const DEFAULT_SOURCE_NAME: &str = "source";

/// Append the fetch step for the given source, if its kind needs one.
pub fn append_source_step(
    config: &CompilerConfig,
    task_spec: &mut TaskSpec,
    source: &Source,
    strategy_steps: &[BuildStep],
    name: &str,
) {
    match &source.kind {
        SourceKind::Git { url, revision } => git::append_step(
            config,
            task_spec,
            source,
            strategy_steps,
            name,
            url,
            revision.as_deref(),
        ),
        SourceKind::Bundle { image, prune } => bundle::append_step(
            config,
            task_spec,
            source,
            strategy_steps,
            name,
            image,
            *prune,
        ),
        SourceKind::Local => local::append_step(),
    }
}

/// Parse the engine's results into a typed fragment for the given source.
///
/// Returns `None` when every declared slot is blank; a source that
/// produced nothing is not recorded and not a failure.
pub fn extract_source_result(
    source: &Source,
    name: &str,
    results: &[TaskRunResult],
) -> Option<SourceResult> {
    match &source.kind {
        SourceKind::Git { .. } => git::extract_result(name, results),
        SourceKind::Bundle { .. } => bundle::extract_result(name, results),
        SourceKind::Local => local::extract_result(),
    }
}

/// Pull the error reason/message pair a failed source step reported.
pub fn extract_error_result(results: &[TaskRunResult]) -> Option<(String, String)> {
    let reason = find_result_value(results, &names::prefixed(names::RESULT_ERROR_REASON));
    let message = find_result_value(results, &names::prefixed(names::RESULT_ERROR_MESSAGE));
    if reason.is_empty() && message.is_empty() {
        return None;
    }
    Some((reason.to_string(), message.to_string()))
}

/// Look up a result value by name, trimmed; missing slots read as blank.
pub(crate) fn find_result_value<'a>(results: &'a [TaskRunResult], name: &str) -> &'a str {
    results
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.value.trim())
        .unwrap_or("")
}

/// Register a secret-backed volume for a credential, at most once per task
/// even when several sources reference the same secret.
pub(crate) fn append_secret_volume(task_spec: &mut TaskSpec, secret_name: &str) -> String {
    let volume_name = names::sanitize_volume_name(secret_name);
    if !task_spec.volumes.iter().any(|v| v.name == volume_name) {
        task_spec
            .volumes
            .push(Volume::for_secret(volume_name.clone(), secret_name));
    }
    volume_name
}

/// The run-as identity a source step should adopt: the first strategy step
/// that declares a security context wins.
pub(crate) fn effective_run_as(strategy_steps: &[BuildStep]) -> Option<SecurityContext> {
    strategy_steps.iter().find_map(|s| s.security_context)
}

/// Environment variables carrying the resolved run-as identity, consumed
/// by the fetch logic to initialize /etc/passwd and /etc/group.
pub(crate) fn run_as_env(security_context: &SecurityContext) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if let Some(user) = security_context.run_as_user {
        env.push(EnvVar::new(names::ENV_USER, user.to_string()));
    }
    if let Some(group) = security_context.run_as_group {
        env.push(EnvVar::new(names::ENV_GROUP, group.to_string()));
    }
    env
}
