//! Bundle source: OCI artifact unpack step emission and result extraction.

use kiln_types::build::{PruneOption, Source};
use kiln_types::buildrun::{BundleSourceResult, SourceResult};
use kiln_types::names;
use kiln_types::strategy::{BuildStep, VolumeMount};
use kiln_types::task::{ResultSpec, TaskRunResult, TaskSpec, TaskStep};

use crate::config::CompilerConfig;

const IMAGE_DIGEST: &str = "image-digest";

/// Mount path for registry pull credentials inside the unpack container.
const SECRET_MOUNT_PATH: &str = "/workspace/shp-pull-secret";

/// Append the bundle unpack step, its result slot, and credential wiring.
pub(super) fn append_step(
    config: &CompilerConfig,
    task_spec: &mut TaskSpec,
    source: &Source,
    strategy_steps: &[BuildStep],
    name: &str,
    image: &str,
    prune: Option<PruneOption>,
) {
    task_spec.results.push(ResultSpec::new(
        names::source_result(name, IMAGE_DIGEST),
        "The digest of the bundle image.",
    ));

    let mut args = vec![
        "--image".to_string(),
        image.to_string(),
        "--target".to_string(),
        format!("$(params.{})", names::prefixed(names::PARAM_SOURCE_ROOT)),
        "--result-file-image-digest".to_string(),
        format!(
            "$(results.{}.path)",
            names::source_result(name, IMAGE_DIGEST)
        ),
    ];

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

    if prune == Some(PruneOption::AfterPull) {
        args.push("--prune".to_string());
    }

    let security_context = super::effective_run_as(strategy_steps);
    let env = security_context
        .as_ref()
        .map(super::run_as_env)
        .unwrap_or_default();

    task_spec.steps.push(TaskStep {
        name: format!("source-{name}"),
        image: config.bundle_step.image.clone(),
        command: config.bundle_step.command.clone(),
        args,
        env,
        security_context,
        volume_mounts,
        ..Default::default()
    });
}

/// Record one source result when the digest slot carries a non-blank value.
pub(super) fn extract_result(name: &str, results: &[TaskRunResult]) -> Option<SourceResult> {
    let digest = super::find_result_value(results, &names::source_result(name, IMAGE_DIGEST));
    if digest.is_empty() {
        return None;
    }

    Some(SourceResult {
        name: name.to_string(),
        git: None,
        bundle: Some(BundleSourceResult {
            digest: digest.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::build::SourceKind;

    fn bundle_source(credentials: Option<&str>, prune: Option<PruneOption>) -> Source {
        Source {
            kind: SourceKind::Bundle {
                image: "registry.example.com/sources/app:latest".into(),
                prune,
            },
            context_dir: None,
            credentials: credentials.map(String::from),
        }
    }

    fn build_spec(source: &Source, prune: Option<PruneOption>) -> TaskSpec {
        let config = CompilerConfig::default();
        let mut spec = TaskSpec::default();
        append_step(
            &config,
            &mut spec,
            source,
            &[],
            "source",
            "registry.example.com/sources/app:latest",
            prune,
        );
        spec
    }

    #[test]
    fn test_declares_digest_result() {
        let spec = build_spec(&bundle_source(None, None), None);
        assert_eq!(spec.results.len(), 1);
        assert_eq!(spec.results[0].name, "shp-source-source-image-digest");
    }

    #[test]
    fn test_step_args() {
        let spec = build_spec(&bundle_source(None, None), None);
        let step = &spec.steps[0];
        assert_eq!(step.name, "source-source");
        assert!(step.args.contains(&"--image".to_string()));
        assert!(
            step.args
                .contains(&"$(results.shp-source-source-image-digest.path)".to_string())
        );
        assert!(!step.args.contains(&"--prune".to_string()));
    }

    #[test]
    fn test_prune_after_pull_adds_flag() {
        let spec = build_spec(
            &bundle_source(None, Some(PruneOption::AfterPull)),
            Some(PruneOption::AfterPull),
        );
        assert!(spec.steps[0].args.contains(&"--prune".to_string()));

        let spec = build_spec(
            &bundle_source(None, Some(PruneOption::Never)),
            Some(PruneOption::Never),
        );
        assert!(!spec.steps[0].args.contains(&"--prune".to_string()));
    }

    #[test]
    fn test_pull_secret_mounted() {
        let spec = build_spec(&bundle_source(Some("pull-creds"), None), None);
        let mount = &spec.steps[0].volume_mounts[0];
        assert_eq!(mount.mount_path, "/workspace/shp-pull-secret");
        assert!(mount.read_only);
    }

    #[test]
    fn test_extract_digest() {
        let results = vec![TaskRunResult::new(
            "shp-source-source-image-digest",
            "sha256:abcd",
        )];
        let result = extract_result("source", &results).unwrap();
        assert_eq!(result.bundle.unwrap().digest, "sha256:abcd");

        assert!(extract_result("source", &[]).is_none());
    }
}
