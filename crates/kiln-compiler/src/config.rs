//! Compiler configuration: step container templates and the legacy
//! substitution table.
//!
//! Everything the compiler does beyond pure merging is driven by this
//! struct, injected by the caller. Tests swap in their own templates or
//! substitution tables; production uses [`CompilerConfig::default`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kiln_types::names;

/// Template for an injected step container (source fetch, image mutate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTemplate {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl StepTemplate {
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
        }
    }
}

/// Immutable table of legacy placeholder tokens.
///
/// Strategy authors who predate first-class parameters wrote tokens like
/// `$(build.output.image)` into step text. The compiler rewrites each to
/// the parameter reference that now carries the value. This is a plain
/// string-replace pass, not a templating language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionTable(BTreeMap<String, String>);

impl SubstitutionTable {
    /// An empty table (no rewriting).
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a table from explicit token/replacement pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    /// Rewrite every known token in the given text.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (token, replacement) in &self.0 {
            out = out.replace(token, replacement);
        }
        out
    }

    /// Rewrite a list of text fragments (command or args).
    pub fn apply_all(&self, parts: &[String]) -> Vec<String> {
        parts.iter().map(|p| self.apply(p)).collect()
    }
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            "$(build.output.image)".to_string(),
            format!("$(params.{})", names::prefixed(names::PARAM_OUTPUT_IMAGE)),
        );
        table.insert(
            "$(build.builder.image)".to_string(),
            format!("$(params.{})", names::INPUT_PARAM_BUILDER),
        );
        table.insert(
            "$(build.dockerfile)".to_string(),
            format!("$(params.{})", names::INPUT_PARAM_DOCKERFILE),
        );
        table.insert(
            "$(build.source.contextDir)".to_string(),
            format!("$(params.{})", names::INPUT_PARAM_CONTEXT_DIR),
        );
        Self(table)
    }
}

/// Configuration injected into the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Container template for the git clone step.
    pub git_step: StepTemplate,
    /// Container template for the bundle unpack step.
    pub bundle_step: StepTemplate,
    /// Container template for the image metadata mutation step.
    pub mutate_image_step: StepTemplate,
    /// Legacy token substitution table applied to strategy step text.
    pub substitutions: SubstitutionTable,
    /// When set, git steps receive the `--git-url-rewrite` flag.
    pub git_url_rewrite: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            git_step: StepTemplate::new(
                "ghcr.io/kiln-build/kiln-git:latest",
                vec!["/ko-app/git".to_string()],
            ),
            bundle_step: StepTemplate::new(
                "ghcr.io/kiln-build/kiln-bundle:latest",
                vec!["/ko-app/bundle".to_string()],
            ),
            mutate_image_step: StepTemplate::new(
                "ghcr.io/kiln-build/kiln-image-processing:latest",
                vec!["/ko-app/image-processing".to_string()],
            ),
            substitutions: SubstitutionTable::default(),
            git_url_rewrite: false,
        }
    }
}
