//! Build strategies: reusable, author-maintained step templates.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A reusable build strategy: an ordered list of steps plus the parameters
/// those steps consume. Immutable once referenced by a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub metadata: ObjectMeta,
    pub scope: StrategyScope,
    #[serde(default)]
    pub steps: Vec<BuildStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

impl Strategy {
    /// Labels identifying this strategy on derived resources.
    pub fn resource_labels(&self) -> Vec<(String, String)> {
        let domain = match self.scope {
            StrategyScope::Cluster => crate::names::CLUSTER_STRATEGY_DOMAIN,
            StrategyScope::Namespaced => crate::names::STRATEGY_DOMAIN,
        };
        vec![
            (format!("{domain}/name"), self.metadata.name.clone()),
            (
                format!("{domain}/generation"),
                self.metadata.generation.to_string(),
            ),
        ]
    }
}

/// Whether a strategy is cluster-wide or namespace-scoped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyScope {
    Cluster,
    #[default]
    Namespaced,
}

/// A parameter a strategy declares for its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// When absent, a value must come from the build or the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One container step of a build strategy.
///
/// Image, command, and args may contain legacy placeholder tokens that the
/// compiler rewrites to parameter references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// A name/value environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// CPU/memory requests and limits, kept as opaque quantity strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
}

/// The identity a step container runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
}

/// A volume mounted into a step container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_labels_by_scope() {
        let mut strategy = Strategy {
            metadata: ObjectMeta::named("buildah", "default"),
            scope: StrategyScope::Namespaced,
            ..Default::default()
        };
        strategy.metadata.generation = 3;

        let labels = strategy.resource_labels();
        assert_eq!(
            labels[0],
            (
                "buildstrategy.shipwright.io/name".to_string(),
                "buildah".to_string()
            )
        );
        assert_eq!(labels[1].1, "3");

        strategy.scope = StrategyScope::Cluster;
        let labels = strategy.resource_labels();
        assert!(labels[0].0.starts_with("clusterbuildstrategy.shipwright.io/"));
    }
}
