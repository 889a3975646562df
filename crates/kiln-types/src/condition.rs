//! Lifecycle conditions: an ordered set keyed by condition type.
//!
//! Conditions record the externally visible state of a run. The set is
//! insert-or-replace-by-type, and a condition's transition time only moves
//! when its status or reason actually changes, so repeated identical writes
//! are no-ops (idempotent status updates).

use serde::{Deserialize, Serialize};

use crate::{Timestamp, now};

/// Condition type for the overall run outcome.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One lifecycle condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    /// Machine-stable reason code.
    pub reason: String,
    /// Free-text detail for humans.
    #[serde(default)]
    pub message: String,
    pub last_transition_time: Timestamp,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now(),
        }
    }
}

/// Ordered set of conditions, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the condition of the same type.
    ///
    /// The transition time is preserved when neither status nor reason
    /// changed; the message may still be refreshed.
    pub fn set(&mut self, condition: Condition) {
        match self
            .0
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                let state_changed =
                    existing.status != condition.status || existing.reason != condition.reason;
                let transition_time = if state_changed {
                    condition.last_transition_time
                } else {
                    existing.last_transition_time
                };
                *existing = Condition {
                    last_transition_time: transition_time,
                    ..condition
                };
            }
            None => self.0.push(condition),
        }
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// The overall run outcome condition, if one has been recorded.
    pub fn succeeded(&self) -> Option<&Condition> {
        self.get(CONDITION_SUCCEEDED)
    }
}
