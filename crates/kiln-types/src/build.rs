//! Build templates: persistent build configurations referencing a strategy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use crate::strategy::{EnvVar, StrategyScope};
use crate::task::ParamValue;

/// A named, persistent build configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub metadata: ObjectMeta,
    pub spec: BuildSpec,
}

/// The declarative part of a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    pub strategy: StrategyRef,
    pub source: Source,
    /// Image containing the build tooling, for strategies that take it as
    /// an input rather than baking it into their steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    pub output: Output,
    /// Build-level timeout in seconds. Absent means the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param_values: Vec<ParamValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Reference to the strategy a build uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRef {
    pub name: String,
    #[serde(default)]
    pub scope: StrategyScope,
}

/// Where the input source comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Directory inside the source tree the build operates on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    /// Name of the secret holding fetch credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// The closed set of supported source kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// A git repository, cloned by a dedicated task step.
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
    /// An OCI artifact image containing the source, unpacked by a task step.
    Bundle {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prune: Option<PruneOption>,
    },
    /// Source material staged out of band; no fetch step is emitted.
    Local,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Local
    }
}

/// Whether a bundle image is removed from the registry after pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneOption {
    Never,
    AfterPull,
}

/// The target the build pushes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub image: String,
    /// Name of the secret holding push credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}
