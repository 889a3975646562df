//! Shared resource types for the kiln build system.
//!
//! These are the wire-shaped documents the rest of the system operates on:
//! reusable build strategies, build templates, build runs and their status,
//! the compiled task-run specification handed to the execution engine, and
//! the auxiliary service-account resource.

pub mod account;
pub mod build;
pub mod buildrun;
pub mod condition;
pub mod meta;
pub mod names;
pub mod strategy;
pub mod task;

pub use account::ServiceAccount;
pub use build::{Build, BuildSpec, Output, PruneOption, Source, SourceKind, StrategyRef};
pub use buildrun::{
    BuildRun, BuildRunSpec, BuildRunStatus, BundleSourceResult, GitSourceResult,
    ServiceAccountSpec, SourceResult,
};
pub use condition::{Condition, ConditionStatus, Conditions};
pub use meta::{ObjectMeta, OwnerReference};
pub use strategy::{
    BuildStep, EnvVar, Parameter, ResourceRequirements, SecurityContext, Strategy, StrategyScope,
    VolumeMount,
};
pub use task::{
    ParamSpec, ParamValue, ResultSpec, TaskRun, TaskRunResult, TaskRunSpec, TaskRunStatus,
    TaskSpec, TaskStep, TerminalCondition, Volume,
};

/// Timestamp type used across all resources.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time, for status stamping.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
