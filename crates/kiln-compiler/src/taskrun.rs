//! The task compiler: merges strategy steps, build, and run into one
//! submittable task run.
//!
//! Compilation is a pure function of its three inputs — no clock, no I/O —
//! so identical inputs always produce an identical task run. The reconciler
//! leans on this for idempotent re-submission.

use std::collections::BTreeMap;

use tracing::debug;

use kiln_types::build::{Build, Output};
use kiln_types::buildrun::BuildRun;
use kiln_types::names;
use kiln_types::strategy::{BuildStep, Parameter, Strategy};
use kiln_types::task::{
    ParamSpec, ParamValue, ResultSpec, TaskRun, TaskRunSpec, TaskSpec, TaskStep, Volume,
};
use kiln_types::meta::ObjectMeta;

use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::sources::DEFAULT_SOURCE_NAME;
use crate::{env, params, sources};

/// Build the task specification: declared parameters, result slots, source
/// steps, strategy steps with substitution and environment merging, and the
/// optional image-mutation step.
pub fn generate_task_spec(
    config: &CompilerConfig,
    build: &Build,
    buildrun: &BuildRun,
    strategy_steps: &[BuildStep],
    strategy_params: &[Parameter],
) -> Result<TaskSpec> {
    let mut task_spec = TaskSpec {
        params: vec![
            ParamSpec {
                name: names::INPUT_PARAM_DOCKERFILE.to_string(),
                description: "Path to the Dockerfile".to_string(),
                default: Some("Dockerfile".to_string()),
            },
            ParamSpec {
                name: names::INPUT_PARAM_CONTEXT_DIR.to_string(),
                description: "The root of the code".to_string(),
                default: Some(".".to_string()),
            },
            ParamSpec {
                name: names::prefixed(names::PARAM_OUTPUT_IMAGE),
                description: "The URL of the image that the build produces".to_string(),
                default: None,
            },
            ParamSpec {
                name: names::prefixed(names::PARAM_SOURCE_CONTEXT),
                description: "The context directory inside the source directory".to_string(),
                default: None,
            },
            ParamSpec {
                name: names::prefixed(names::PARAM_SOURCE_ROOT),
                description: "The source directory".to_string(),
                default: None,
            },
        ],
        results: vec![
            ResultSpec::new(
                names::prefixed(names::RESULT_ERROR_MESSAGE),
                "The error description of the task run, if any.",
            ),
            ResultSpec::new(
                names::prefixed(names::RESULT_ERROR_REASON),
                "The error reason of the task run, if any.",
            ),
        ],
        workspaces: vec![names::WORKSPACE_SOURCE.to_string()],
        ..Default::default()
    };

    if let Some(builder) = &build.spec.builder {
        task_spec.params.push(ParamSpec {
            name: names::INPUT_PARAM_BUILDER.to_string(),
            description: "Image containing the build tools/logic".to_string(),
            default: Some(builder.clone()),
        });
    }

    // source fetch step, its result slots, and credential volumes
    sources::append_source_step(
        config,
        &mut task_spec,
        &build.spec.source,
        strategy_steps,
        DEFAULT_SOURCE_NAME,
    );

    for parameter in strategy_params {
        task_spec.params.push(ParamSpec {
            name: parameter.name.clone(),
            description: parameter.description.clone(),
            default: parameter.default.clone(),
        });
    }

    // run-level env supersedes build-level env
    let combined_env = env::merge(&buildrun.spec.env, &build.spec.env, true)?;

    for step in strategy_steps {
        // a collision between user env and a step's own env fails the compile
        let step_env =
            env::merge(&combined_env, &step.env, false).map_err(|e| match e {
                CompileError::EnvironmentConflict { names, .. } => {
                    CompileError::EnvironmentConflict {
                        strategy: build.spec.strategy.name.clone(),
                        names,
                    }
                }
                other => other,
            })?;

        task_spec.steps.push(TaskStep {
            name: step.name.clone(),
            image: config.substitutions.apply(&step.image),
            command: config.substitutions.apply_all(&step.command),
            args: config.substitutions.apply_all(&step.args),
            env: step_env,
            working_dir: step.working_dir.clone(),
            image_pull_policy: step.image_pull_policy.clone(),
            resources: step.resources.clone(),
            security_context: step.security_context,
            volume_mounts: step.volume_mounts.clone(),
        });

        for mount in &step.volume_mounts {
            if !task_spec.volumes.iter().any(|v| v.name == mount.name) {
                task_spec.volumes.push(Volume::named(mount.name.clone()));
            }
        }
    }

    let output = effective_output(build, buildrun);
    if !output.annotations.is_empty() || !output.labels.is_empty() {
        append_image_mutate_step(config, &mut task_spec, output);
    }

    Ok(task_spec)
}

/// Compile the complete task run for a build run.
///
/// Returns the submittable object, or a validation error that the caller
/// must treat as "do not submit".
pub fn generate_task_run(
    config: &CompilerConfig,
    build: &Build,
    buildrun: &BuildRun,
    service_account_name: &str,
    strategy: &Strategy,
) -> Result<TaskRun> {
    let output = effective_output(build, buildrun);

    let task_spec = generate_task_spec(
        config,
        build,
        buildrun,
        &strategy.steps,
        &strategy.parameters,
    )?;

    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(names::LABEL_BUILD.to_string(), build.metadata.name.clone());
    labels.insert(
        names::LABEL_BUILD_GENERATION.to_string(),
        build.metadata.generation.to_string(),
    );
    labels.insert(
        names::LABEL_BUILD_RUN.to_string(),
        buildrun.metadata.name.clone(),
    );
    labels.insert(
        names::LABEL_BUILD_RUN_GENERATION.to_string(),
        buildrun.metadata.generation.to_string(),
    );
    for (key, value) in strategy.resource_labels() {
        labels.insert(key, value);
    }

    // strategy annotations meaningful on the execution object only
    let annotations: BTreeMap<String, String> = strategy
        .metadata
        .annotations
        .iter()
        .filter(|(key, _)| names::is_propagatable_annotation(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut param_values = vec![
        ParamValue::new(names::prefixed(names::PARAM_OUTPUT_IMAGE), &output.image),
        ParamValue::new(
            names::prefixed(names::PARAM_SOURCE_ROOT),
            names::SOURCE_ROOT_PATH,
        ),
    ];

    if let Some(builder) = &build.spec.builder {
        param_values.push(ParamValue::new(names::INPUT_PARAM_BUILDER, builder));
    }
    if let Some(dockerfile) = &build.spec.dockerfile {
        param_values.push(ParamValue::new(names::INPUT_PARAM_DOCKERFILE, dockerfile));
    }
    match &build.spec.source.context_dir {
        Some(context_dir) => {
            param_values.push(ParamValue::new(names::INPUT_PARAM_CONTEXT_DIR, context_dir));
            param_values.push(ParamValue::new(
                names::prefixed(names::PARAM_SOURCE_CONTEXT),
                join_source_path(context_dir),
            ));
        }
        None => {
            param_values.push(ParamValue::new(
                names::prefixed(names::PARAM_SOURCE_CONTEXT),
                names::SOURCE_ROOT_PATH,
            ));
        }
    }

    // a run may override a param only if the build defined it
    let user_params = params::override_params(&build.spec.param_values, &buildrun.spec.param_values);

    let reserved = params::reserved_violations(&user_params);
    if !reserved.is_empty() {
        return Err(CompileError::ReservedParameters { names: reserved });
    }

    let unresolved = params::unresolved_params(&strategy.parameters, &user_params);
    if !unresolved.is_empty() {
        return Err(CompileError::UnresolvedParameters { names: unresolved });
    }

    param_values.extend(user_params);

    let task_run = TaskRun {
        metadata: ObjectMeta {
            name: buildrun.task_run_name(),
            namespace: buildrun.metadata.namespace.clone(),
            labels,
            annotations,
            ..Default::default()
        },
        spec: TaskRunSpec {
            service_account_name: service_account_name.to_string(),
            task_spec,
            param_values,
            timeout_seconds: effective_timeout(build, buildrun),
        },
        status: None,
    };

    debug!(
        buildrun = %buildrun.metadata.name,
        steps = task_run.spec.task_spec.steps.len(),
        params = task_run.spec.param_values.len(),
        "compiled task run"
    );

    Ok(task_run)
}

/// Run-level timeout overrides build-level; absent both, the engine default
/// applies.
fn effective_timeout(build: &Build, buildrun: &BuildRun) -> Option<u64> {
    buildrun
        .spec
        .timeout_seconds
        .or(build.spec.timeout_seconds)
}

/// Run-level output overrides build-level output.
fn effective_output<'a>(build: &'a Build, buildrun: &'a BuildRun) -> &'a Output {
    buildrun.spec.output.as_ref().unwrap_or(&build.spec.output)
}

fn join_source_path(context_dir: &str) -> String {
    format!(
        "{}/{}",
        names::SOURCE_ROOT_PATH,
        context_dir.trim_matches('/')
    )
}

/// Append the step that writes output annotations and labels onto the
/// produced image after all strategy steps ran.
fn append_image_mutate_step(config: &CompilerConfig, task_spec: &mut TaskSpec, output: &Output) {
    let mut args = vec![
        "--image".to_string(),
        format!("$(params.{})", names::prefixed(names::PARAM_OUTPUT_IMAGE)),
    ];
    for (key, value) in &output.annotations {
        args.push("--annotation".to_string());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &output.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }

    task_spec.steps.push(TaskStep {
        name: names::IMAGE_MUTATE_STEP.to_string(),
        image: config.mutate_image_step.image.clone(),
        command: config.mutate_image_step.command.clone(),
        args,
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::build::{BuildSpec, SourceKind, StrategyRef};
    use kiln_types::buildrun::BuildRunSpec;
    use kiln_types::strategy::{EnvVar, SecurityContext, StrategyScope, VolumeMount};

    fn sample_strategy() -> Strategy {
        Strategy {
            metadata: ObjectMeta::named("buildah", "default"),
            scope: StrategyScope::Namespaced,
            steps: vec![BuildStep {
                name: "build-and-push".into(),
                image: "quay.io/containers/buildah:latest".into(),
                command: vec!["buildah".into()],
                args: vec![
                    "bud".into(),
                    "-t".into(),
                    "$(build.output.image)".into(),
                    "$(params.shp-source-context)".into(),
                ],
                security_context: Some(SecurityContext {
                    run_as_user: Some(1000),
                    run_as_group: Some(1000),
                }),
                ..Default::default()
            }],
            parameters: vec![],
        }
    }

    fn sample_build(name: &str) -> Build {
        Build {
            metadata: ObjectMeta::named(name, "default"),
            spec: BuildSpec {
                strategy: StrategyRef {
                    name: "buildah".into(),
                    scope: StrategyScope::Namespaced,
                },
                source: kiln_types::build::Source {
                    kind: SourceKind::Git {
                        url: "https://example.com/repo.git".into(),
                        revision: None,
                    },
                    context_dir: None,
                    credentials: None,
                },
                output: Output {
                    image: "registry.example.com/app:latest".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn sample_buildrun(name: &str, build: &str) -> BuildRun {
        BuildRun {
            metadata: ObjectMeta::named(name, "default"),
            spec: BuildRunSpec {
                build_ref: build.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn compile_default() -> TaskRun {
        let config = CompilerConfig::default();
        let build = sample_build("app");
        let buildrun = sample_buildrun("app-run-1", "app");
        let strategy = sample_strategy();
        generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap()
    }

    #[test]
    fn test_git_source_step_prepended_before_strategy_steps() {
        let task_run = compile_default();
        let steps = &task_run.spec.task_spec.steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "source-source");
        assert_eq!(steps[1].name, "build-and-push");
    }

    #[test]
    fn test_substitution_applied_to_strategy_step_text() {
        let task_run = compile_default();
        let build_step = &task_run.spec.task_spec.steps[1];
        assert!(
            build_step
                .args
                .contains(&"$(params.shp-output-image)".to_string())
        );
        assert!(!build_step.args.iter().any(|a| a.contains("$(build.")));
    }

    #[test]
    fn test_seeded_params_and_workspace() {
        let task_run = compile_default();
        let spec = &task_run.spec.task_spec;
        let param_names: Vec<_> = spec.params.iter().map(|p| p.name.as_str()).collect();
        assert!(param_names.contains(&"DOCKERFILE"));
        assert!(param_names.contains(&"CONTEXT_DIR"));
        assert!(param_names.contains(&"shp-output-image"));
        assert!(param_names.contains(&"shp-source-context"));
        assert!(param_names.contains(&"shp-source-root"));
        assert_eq!(spec.workspaces, vec!["source"]);
    }

    #[test]
    fn test_output_image_and_source_params_wired() {
        let task_run = compile_default();
        let values = &task_run.spec.param_values;
        assert!(values.contains(&ParamValue::new(
            "shp-output-image",
            "registry.example.com/app:latest"
        )));
        assert!(values.contains(&ParamValue::new("shp-source-root", "/workspace/source")));
        // no contextDir: source-context falls back to the source root
        assert!(values.contains(&ParamValue::new("shp-source-context", "/workspace/source")));
    }

    #[test]
    fn test_context_dir_joined_into_source_context() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build.spec.source.context_dir = Some("docker/".into());
        let buildrun = sample_buildrun("app-run-1", "app");
        let strategy = sample_strategy();

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let values = &task_run.spec.param_values;
        assert!(values.contains(&ParamValue::new("CONTEXT_DIR", "docker/")));
        assert!(values.contains(&ParamValue::new(
            "shp-source-context",
            "/workspace/source/docker"
        )));
    }

    #[test]
    fn test_run_output_overrides_build_output() {
        let config = CompilerConfig::default();
        let build = sample_build("app");
        let mut buildrun = sample_buildrun("app-run-1", "app");
        buildrun.spec.output = Some(Output {
            image: "registry.example.com/app:override".into(),
            ..Default::default()
        });
        let strategy = sample_strategy();

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        assert!(task_run.spec.param_values.contains(&ParamValue::new(
            "shp-output-image",
            "registry.example.com/app:override"
        )));
    }

    #[test]
    fn test_timeout_resolution() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        let mut buildrun = sample_buildrun("app-run-1", "app");
        let strategy = sample_strategy();

        let compiled =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        assert_eq!(compiled.spec.timeout_seconds, None);

        build.spec.timeout_seconds = Some(600);
        let compiled =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        assert_eq!(compiled.spec.timeout_seconds, Some(600));

        buildrun.spec.timeout_seconds = Some(120);
        let compiled =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        assert_eq!(compiled.spec.timeout_seconds, Some(120));
    }

    #[test]
    fn test_reserved_param_from_run_fails_compilation() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build
            .spec
            .param_values
            .push(ParamValue::new("shp-output-image", "x"));
        let mut buildrun = sample_buildrun("app-run-1", "app");
        buildrun
            .spec
            .param_values
            .push(ParamValue::new("shp-output-image", "y"));
        let strategy = sample_strategy();

        let err =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap_err();
        assert_eq!(
            err,
            CompileError::ReservedParameters {
                names: vec!["shp-output-image".into()]
            }
        );
    }

    #[test]
    fn test_unresolved_params_listed_exactly() {
        let config = CompilerConfig::default();
        let build = sample_build("app");
        let buildrun = sample_buildrun("app-run-1", "app");
        let mut strategy = sample_strategy();
        strategy.parameters = vec![
            Parameter {
                name: "registry".into(),
                description: String::new(),
                default: None,
            },
            Parameter {
                name: "tag".into(),
                description: String::new(),
                default: None,
            },
            Parameter {
                name: "verbose".into(),
                description: String::new(),
                default: Some("false".into()),
            },
        ];

        let err =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap_err();
        match err {
            CompileError::UnresolvedParameters { mut names } => {
                names.sort();
                assert_eq!(names, vec!["registry", "tag"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_env_conflict_with_step_env_fails() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build.spec.env.push(EnvVar::new("FOO", "1"));
        let buildrun = sample_buildrun("app-run-1", "app");
        let mut strategy = sample_strategy();
        strategy.steps[0].env.push(EnvVar::new("FOO", "2"));

        let err =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap_err();
        match err {
            CompileError::EnvironmentConflict { strategy, names } => {
                assert_eq!(strategy, "buildah");
                assert_eq!(names, vec!["FOO"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_env_overrides_build_env_into_steps() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build.spec.env.push(EnvVar::new("FOO", "1"));
        let mut buildrun = sample_buildrun("app-run-1", "app");
        buildrun.spec.env.push(EnvVar::new("FOO", "2"));
        let strategy = sample_strategy();

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let build_step = &task_run.spec.task_spec.steps[1];
        assert!(build_step.env.contains(&EnvVar::new("FOO", "2")));
    }

    #[test]
    fn test_step_volumes_deduplicated() {
        let config = CompilerConfig::default();
        let build = sample_build("app");
        let buildrun = sample_buildrun("app-run-1", "app");
        let mut strategy = sample_strategy();
        let mount = VolumeMount {
            name: "varlibcontainers".into(),
            mount_path: "/var/lib/containers".into(),
            read_only: false,
        };
        strategy.steps[0].volume_mounts.push(mount.clone());
        strategy.steps.push(BuildStep {
            name: "push".into(),
            image: "quay.io/containers/buildah:latest".into(),
            volume_mounts: vec![mount],
            ..Default::default()
        });

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let volumes: Vec<_> = task_run
            .spec
            .task_spec
            .volumes
            .iter()
            .filter(|v| v.name == "varlibcontainers")
            .collect();
        assert_eq!(volumes.len(), 1);
    }

    #[test]
    fn test_mutate_step_appended_for_output_annotations() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build
            .spec
            .output
            .annotations
            .insert("org.opencontainers.image.url".into(), "https://example.com".into());
        build
            .spec
            .output
            .labels
            .insert("maintainer".into(), "team".into());
        let buildrun = sample_buildrun("app-run-1", "app");
        let strategy = sample_strategy();

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let last = task_run.spec.task_spec.steps.last().unwrap();
        assert_eq!(last.name, "mutate-image");
        assert!(last.args.contains(&"--annotation".to_string()));
        assert!(
            last.args
                .contains(&"org.opencontainers.image.url=https://example.com".to_string())
        );
        assert!(last.args.contains(&"maintainer=team".to_string()));
    }

    #[test]
    fn test_annotation_propagation_filter() {
        let config = CompilerConfig::default();
        let build = sample_build("app");
        let buildrun = sample_buildrun("app-run-1", "app");
        let mut strategy = sample_strategy();
        strategy.metadata.annotations.insert(
            "kubectl.kubernetes.io/last-applied-configuration".into(),
            "{}".into(),
        );
        strategy
            .metadata
            .annotations
            .insert("build.shipwright.io/internal".into(), "x".into());
        strategy
            .metadata
            .annotations
            .insert("anything.else/key".into(), "kept".into());

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let annotations = &task_run.metadata.annotations;
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.get("anything.else/key").map(String::as_str), Some("kept"));
    }

    #[test]
    fn test_labels_carry_names_generations_and_strategy() {
        let config = CompilerConfig::default();
        let mut build = sample_build("app");
        build.metadata.generation = 2;
        let mut buildrun = sample_buildrun("app-run-1", "app");
        buildrun.metadata.generation = 1;
        let strategy = sample_strategy();

        let task_run =
            generate_task_run(&config, &build, &buildrun, "default", &strategy).unwrap();
        let labels = &task_run.metadata.labels;
        assert_eq!(labels["build.shipwright.io/name"], "app");
        assert_eq!(labels["build.shipwright.io/generation"], "2");
        assert_eq!(labels["buildrun.shipwright.io/name"], "app-run-1");
        assert_eq!(labels["buildrun.shipwright.io/generation"], "1");
        assert_eq!(labels["buildstrategy.shipwright.io/name"], "buildah");
    }

    #[test]
    fn test_deterministic_task_run_name_and_sa() {
        let task_run = compile_default();
        assert_eq!(task_run.metadata.name, "app-run-1-taskrun");
        assert_eq!(task_run.spec.service_account_name, "default");
        assert!(task_run.status.is_none());
    }

    #[test]
    fn test_compile_is_pure() {
        let first = compile_default();
        let second = compile_default();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
