//! The fixed naming table shared with build-strategy authors and the
//! execution engine.
//!
//! These names are a compatibility contract: strategies written against the
//! engine reference results, parameters, and environment variables by these
//! exact strings, so they must never drift.

/// Prefix for every infrastructure parameter, result, and volume name.
pub const PREFIX: &str = "shp";

/// Parameter carrying the image reference the build produces.
pub const PARAM_OUTPUT_IMAGE: &str = "output-image";
/// Parameter carrying the root of the checked-out source tree.
pub const PARAM_SOURCE_ROOT: &str = "source-root";
/// Parameter carrying the context directory inside the source tree.
pub const PARAM_SOURCE_CONTEXT: &str = "source-context";

/// Legacy parameter names predating the `shp-` namespace.
pub const INPUT_PARAM_BUILDER: &str = "BUILDER_IMAGE";
pub const INPUT_PARAM_DOCKERFILE: &str = "DOCKERFILE";
pub const INPUT_PARAM_CONTEXT_DIR: &str = "CONTEXT_DIR";

/// Name of the workspace holding the source files.
pub const WORKSPACE_SOURCE: &str = "source";

/// Filesystem path of the source workspace inside step containers.
pub const SOURCE_ROOT_PATH: &str = "/workspace/source";

/// Name of the step that mutates output image metadata.
pub const IMAGE_MUTATE_STEP: &str = "mutate-image";

/// Result slot names reported by source steps on failure.
pub const RESULT_ERROR_MESSAGE: &str = "error-message";
pub const RESULT_ERROR_REASON: &str = "error-reason";

/// Environment variables that carry the resolved run-as identity into
/// source steps so they can initialize /etc/passwd and /etc/group.
pub const ENV_USER: &str = "SHP_USER";
pub const ENV_GROUP: &str = "SHP_GROUP";

/// API-group domains for the four resource kinds. Annotations under these
/// domains are meaningful only on the high-level resources and are never
/// propagated to the compiled task run.
pub const CLUSTER_STRATEGY_DOMAIN: &str = "clusterbuildstrategy.shipwright.io";
pub const STRATEGY_DOMAIN: &str = "buildstrategy.shipwright.io";
pub const BUILD_DOMAIN: &str = "build.shipwright.io";
pub const BUILD_RUN_DOMAIN: &str = "buildrun.shipwright.io";

/// Labels stamped on generated task runs and service accounts.
pub const LABEL_BUILD: &str = "build.shipwright.io/name";
pub const LABEL_BUILD_GENERATION: &str = "build.shipwright.io/generation";
pub const LABEL_BUILD_RUN: &str = "buildrun.shipwright.io/name";
pub const LABEL_BUILD_RUN_GENERATION: &str = "buildrun.shipwright.io/generation";

/// Annotation kubectl applies client-side; filtered because its meaning
/// does not survive copying onto another object.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Infrastructure result name: `shp-<slot>`.
pub fn prefixed(slot: &str) -> String {
    format!("{PREFIX}-{slot}")
}

/// Result slot name for a named source: `shp-source-<name>-<slot>`.
pub fn source_result(source_name: &str, slot: &str) -> String {
    format!("{PREFIX}-source-{source_name}-{slot}")
}

/// Whether a strategy annotation may be copied onto the compiled task run.
pub fn is_propagatable_annotation(key: &str) -> bool {
    key != LAST_APPLIED_ANNOTATION
        && !key.starts_with(&format!("{CLUSTER_STRATEGY_DOMAIN}/"))
        && !key.starts_with(&format!("{STRATEGY_DOMAIN}/"))
        && !key.starts_with(&format!("{BUILD_DOMAIN}/"))
        && !key.starts_with(&format!("{BUILD_RUN_DOMAIN}/"))
}

/// Produce a valid volume name for a credential secret.
///
/// Volume names must be DNS-1123 labels: lowercase alphanumerics and `-`,
/// at most 63 characters. The `shp-` prefix keeps credential volumes from
/// colliding with strategy-declared ones.
pub fn sanitize_volume_name(secret_name: &str) -> String {
    let mut name = format!("{PREFIX}-");
    for c in secret_name.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else {
            name.push('-');
        }
    }
    name.truncate(63);
    while name.ends_with('-') && name.len() > PREFIX.len() + 1 {
        name.pop();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_result_naming() {
        assert_eq!(
            source_result("source", "commit-sha"),
            "shp-source-source-commit-sha"
        );
        assert_eq!(prefixed("output-image"), "shp-output-image");
    }

    #[test]
    fn test_annotation_filter() {
        assert!(!is_propagatable_annotation(LAST_APPLIED_ANNOTATION));
        assert!(!is_propagatable_annotation(
            "build.shipwright.io/some-setting"
        ));
        assert!(!is_propagatable_annotation(
            "clusterbuildstrategy.shipwright.io/hint"
        ));
        assert!(is_propagatable_annotation("anything.else/key"));
        // similar but not under the reserved domain
        assert!(is_propagatable_annotation("build.shipwright.io.sub/key"));
    }

    #[test]
    fn test_sanitize_volume_name() {
        assert_eq!(sanitize_volume_name("my-secret"), "shp-my-secret");
        assert_eq!(sanitize_volume_name("My.Secret_1"), "shp-my-secret-1");
        let long = "a".repeat(80);
        assert!(sanitize_volume_name(&long).len() <= 63);
        assert_eq!(sanitize_volume_name("dot."), "shp-dot");
    }
}
