//! Build runs: one execution request against a build, with durable status.

use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::build::{BuildSpec, Output};
use crate::condition::{Condition, ConditionStatus, Conditions};
use crate::meta::ObjectMeta;
use crate::strategy::EnvVar;
use crate::task::ParamValue;

/// One instantiation of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRun {
    pub metadata: ObjectMeta,
    pub spec: BuildRunSpec,
    #[serde(default)]
    pub status: BuildRunStatus,
}

impl BuildRun {
    /// Deterministic name for this run's generated service account.
    pub fn generated_account_name(&self) -> &str {
        &self.metadata.name
    }

    /// Deterministic name for this run's submitted task run.
    pub fn task_run_name(&self) -> String {
        format!("{}-taskrun", self.metadata.name)
    }

    /// Whether the run has reached a terminal condition (True or False).
    pub fn is_done(&self) -> bool {
        matches!(
            self.status.conditions.succeeded().map(|c| c.status),
            Some(ConditionStatus::True) | Some(ConditionStatus::False)
        )
    }
}

/// The request part of a build run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunSpec {
    /// Name of the build this run instantiates.
    pub build_ref: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param_values: Vec<ParamValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,
    /// Run-level timeout in seconds, overriding the build's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub service_account: ServiceAccountSpec,
}

/// How the run's task acquires its identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAccountSpec {
    /// Use an existing, user-supplied service account.
    Name(String),
    /// Generate a scoped account owned by this run.
    Generate,
    /// Use the namespace default account.
    #[default]
    Default,
}

/// Durable status of a build run. The only object this core mutates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunStatus {
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
    /// Snapshot of the resolved build spec, for audit after the build
    /// changes or vanishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_spec: Option<BuildSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceResult>,
    /// Name of the submitted task run; the idempotent re-submission key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Timestamp>,
}

impl BuildRunStatus {
    /// Record a condition (insert-or-replace-by-type, idempotent).
    pub fn set_condition(
        &mut self,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.conditions.set(Condition::new(
            crate::condition::CONDITION_SUCCEEDED,
            status,
            reason,
            message,
        ));
    }

    /// Append a source result unless one for this source already exists.
    pub fn record_source_result(&mut self, result: SourceResult) {
        if self.sources.iter().any(|s| s.name == result.name) {
            return;
        }
        self.sources.push(result);
    }
}

/// Typed status fragment extracted from a source step's results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleSourceResult>,
}

/// Git source facts reported by the clone step.
///
/// Partial population is valid; blank slots stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceResult {
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub commit_author: String,
    #[serde(default)]
    pub branch_name: String,
}

/// Bundle source facts reported by the unpack step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSourceResult {
    #[serde(default)]
    pub digest: String,
}
