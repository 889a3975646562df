//! Build-run reconciliation for kiln.
//!
//! This crate drives a build run from creation to terminal status: it
//! resolves the run's service account, compiles the task run through
//! `kiln-compiler`, submits it to the store, mirrors the engine's terminal
//! condition back as run conditions, extracts source results, and cleans up
//! generated credentials.
//!
//! The store is a narrow capability trait ([`ResourceStore`]) so the whole
//! state machine runs against the in-memory [`MemoryStore`] in tests.

pub mod reconcile;
pub mod service_account;
pub mod store;

pub use reconcile::{Outcome, ReconcileError, Reconciler, RetryPolicy};
pub use service_account::ServiceAccountError;
pub use store::{ApiError, MemoryStore, ResourceStore};
