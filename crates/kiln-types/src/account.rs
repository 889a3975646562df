//! Service accounts: the identity a task's steps run as.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A service account carrying the secret references compiled steps need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub metadata: ObjectMeta,
    /// Names of secrets attached to this account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_token: Option<bool>,
}

impl ServiceAccount {
    /// Attach a secret reference unless one with the same name is present.
    ///
    /// Returns true when the account was modified.
    pub fn attach_secret(&mut self, secret_name: &str) -> bool {
        if self.secrets.iter().any(|s| s == secret_name) {
            return false;
        }
        self.secrets.push(secret_name.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_secret_dedups_by_name() {
        let mut account = ServiceAccount {
            metadata: ObjectMeta::named("default", "default"),
            ..Default::default()
        };
        assert!(account.attach_secret("push-secret"));
        assert!(!account.attach_secret("push-secret"));
        assert_eq!(account.secrets, vec!["push-secret"]);
    }
}
