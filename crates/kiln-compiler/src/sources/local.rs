//! Local source: staged out of band, nothing to fetch.
//!
//! A local source's material is placed into the workspace by something
//! outside the task (a CLI upload, a pre-populated volume), so no step is
//! emitted, no result slots are declared, and extraction records nothing.

use kiln_types::buildrun::SourceResult;

pub(super) fn append_step() {}

pub(super) fn extract_result() -> Option<SourceResult> {
    None
}
