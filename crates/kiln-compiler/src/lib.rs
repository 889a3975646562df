//! Compilation layer for kiln.
//!
//! This crate turns three independently authored resources — a build
//! strategy, a build, and a build run — into one executable task run. The
//! whole layer is pure: given identical inputs the compiled output is
//! byte-identical, which is what makes re-submission on reconciler retries
//! idempotent.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  taskrun::generate_task_run                            │
//! │  - seeds infrastructure params and the source workspace│
//! │  - applies the legacy substitution table to step text  │
//! │  - merges environment layers (override / reject modes) │
//! │  - emits source steps and their result slots           │
//! │  - resolves params, timeout, output, annotations       │
//! └───────────────┬────────────────────────────────────────┘
//!                 │
//!     ┌───────────┼─────────────┐
//!     ▼           ▼             ▼
//!   env::merge  params::*   sources::{git,bundle,local}
//! ```
//!
//! Behavior knobs (step container templates, the substitution table, the
//! git URL-rewrite toggle) are injected through [`CompilerConfig`] so tests
//! can swap them.

pub mod config;
pub mod env;
pub mod error;
pub mod params;
pub mod sources;
pub mod taskrun;

pub use config::{CompilerConfig, StepTemplate, SubstitutionTable};
pub use error::{CompileError, Result};
pub use sources::{DEFAULT_SOURCE_NAME, extract_error_result, extract_source_result};
pub use taskrun::{generate_task_run, generate_task_spec};
