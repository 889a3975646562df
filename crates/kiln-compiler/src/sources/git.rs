//! Git source: clone step emission and result extraction.

use kiln_types::build::Source;
use kiln_types::buildrun::{GitSourceResult, SourceResult};
use kiln_types::names;
use kiln_types::strategy::{BuildStep, VolumeMount};
use kiln_types::task::{ResultSpec, TaskRunResult, TaskSpec, TaskStep};

use crate::config::CompilerConfig;

const COMMIT_SHA: &str = "commit-sha";
const COMMIT_AUTHOR: &str = "commit-author";
const BRANCH_NAME: &str = "branch-name";

/// Mount path for git fetch credentials inside the clone container.
const SECRET_MOUNT_PATH: &str = "/workspace/shp-source-secret";

/// Append the git clone step, its result slots, and credential wiring.
#[allow(clippy::too_many_arguments)]
pub(super) fn append_step(
    config: &CompilerConfig,
    task_spec: &mut TaskSpec,
    source: &Source,
    strategy_steps: &[BuildStep],
    name: &str,
    url: &str,
    revision: Option<&str>,
) {
    task_spec.results.push(ResultSpec::new(
        names::source_result(name, COMMIT_SHA),
        "The commit SHA of the cloned source.",
    ));
    task_spec.results.push(ResultSpec::new(
        names::source_result(name, COMMIT_AUTHOR),
        "The author of the last commit of the cloned source.",
    ));
    task_spec.results.push(ResultSpec::new(
        names::source_result(name, BRANCH_NAME),
        "The name of the branch used of the cloned source.",
    ));

    let mut args = vec![
        "--url".to_string(),
        url.to_string(),
        "--target".to_string(),
        format!("$(params.{})", names::prefixed(names::PARAM_SOURCE_ROOT)),
        "--result-file-commit-sha".to_string(),
        format!("$(results.{}.path)", names::source_result(name, COMMIT_SHA)),
        "--result-file-commit-author".to_string(),
        format!(
            "$(results.{}.path)",
            names::source_result(name, COMMIT_AUTHOR)
        ),
        "--result-file-branch-name".to_string(),
        format!(
            "$(results.{}.path)",
            names::source_result(name, BRANCH_NAME)
        ),
        "--result-file-error-message".to_string(),
        format!(
            "$(results.{}.path)",
            names::prefixed(names::RESULT_ERROR_MESSAGE)
        ),
        "--result-file-error-reason".to_string(),
        format!(
            "$(results.{}.path)",
            names::prefixed(names::RESULT_ERROR_REASON)
        ),
    ];

    if let Some(revision) = revision {
        args.push("--revision".to_string());
        args.push(revision.to_string());
    }

    if config.git_url_rewrite {
        args.push("--git-url-rewrite".to_string());
    }

    let mut volume_mounts = Vec::new();
    if let Some(secret) = &source.credentials {
        let volume_name = super::append_secret_volume(task_spec, secret);
        volume_mounts.push(VolumeMount {
            name: volume_name,
            mount_path: SECRET_MOUNT_PATH.to_string(),
            read_only: true,
        });
        args.push("--secret-path".to_string());
        args.push(SECRET_MOUNT_PATH.to_string());
    }

    let security_context = super::effective_run_as(strategy_steps);
    let env = security_context
        .as_ref()
        .map(super::run_as_env)
        .unwrap_or_default();

    task_spec.steps.push(TaskStep {
        name: format!("source-{name}"),
        image: config.git_step.image.clone(),
        command: config.git_step.command.clone(),
        args,
        env,
        security_context,
        volume_mounts,
        ..Default::default()
    });
}

/// Record one source result when any git slot carries a non-blank value.
pub(super) fn extract_result(name: &str, results: &[TaskRunResult]) -> Option<SourceResult> {
    let commit_sha = super::find_result_value(results, &names::source_result(name, COMMIT_SHA));
    let commit_author =
        super::find_result_value(results, &names::source_result(name, COMMIT_AUTHOR));
    let branch_name = super::find_result_value(results, &names::source_result(name, BRANCH_NAME));

    if commit_sha.is_empty() && commit_author.is_empty() && branch_name.is_empty() {
        return None;
    }

    Some(SourceResult {
        name: name.to_string(),
        git: Some(GitSourceResult {
            commit_sha: commit_sha.to_string(),
            commit_author: commit_author.to_string(),
            branch_name: branch_name.to_string(),
        }),
        bundle: None,
    })
}
