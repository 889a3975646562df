//! Ordered environment merging with override and reject modes.

use kiln_types::EnvVar;

use crate::error::{CompileError, Result};

/// Merge `overrides` into `base`, producing a de-duplicated ordered list.
///
/// With `overwrite` set, a same-named override silently replaces the base
/// entry in place, preserving the insertion order of the first occurrence;
/// new names append after the base entries. This is how run-level user
/// environment supersedes build-level entries.
///
/// Without `overwrite`, any name collision between the two layers is a hard
/// error: a strategy step's own environment must never be shadowed by user
/// intent, or vice versa. All colliding names are collected before failing.
pub fn merge(overrides: &[EnvVar], base: &[EnvVar], overwrite: bool) -> Result<Vec<EnvVar>> {
    let mut merged: Vec<EnvVar> = base.to_vec();
    let mut conflicts: Vec<String> = Vec::new();

    for var in overrides {
        match merged.iter_mut().find(|m| m.name == var.name) {
            Some(existing) if overwrite => existing.value = var.value.clone(),
            Some(_) => conflicts.push(var.name.clone()),
            None => merged.push(var.clone()),
        }
    }

    if !conflicts.is_empty() {
        return Err(CompileError::EnvironmentConflict {
            strategy: String::new(),
            names: conflicts,
        });
    }

    Ok(merged)
}
