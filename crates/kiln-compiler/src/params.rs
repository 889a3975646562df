//! Parameter resolution: override precedence, reserved-name and
//! missing-default checks.
//!
//! Both checks run to completion and aggregate every offending name before
//! returning, trading a single error for a complete diagnostic.

use kiln_types::names;
use kiln_types::strategy::Parameter;
use kiln_types::task::ParamValue;

/// Merge run-level parameter values over build-level ones.
///
/// A run value replaces a same-named build value. A run value whose name
/// the build never mentioned is dropped here, not treated as an error; if
/// the strategy needed it, the missing-default check will surface it.
pub fn override_params(build_values: &[ParamValue], run_values: &[ParamValue]) -> Vec<ParamValue> {
    let mut merged: Vec<ParamValue> = build_values.to_vec();
    for run_value in run_values {
        if let Some(existing) = merged.iter_mut().find(|p| p.name == run_value.name) {
            existing.value = run_value.value.clone();
        }
    }
    merged
}

/// Whether a parameter name is reserved for the compiler itself.
///
/// Reserved are every `shp-` prefixed name plus the legacy input
/// parameters the compiler still injects.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(&format!("{}-", names::PREFIX))
        || name == names::INPUT_PARAM_BUILDER
        || name == names::INPUT_PARAM_DOCKERFILE
        || name == names::INPUT_PARAM_CONTEXT_DIR
}

/// Collect every user-supplied parameter that uses a reserved name.
pub fn reserved_violations(user_params: &[ParamValue]) -> Vec<String> {
    user_params
        .iter()
        .filter(|p| is_reserved(&p.name))
        .map(|p| p.name.clone())
        .collect()
}

/// Collect every strategy parameter that has no default and was never
/// given a value by build or run.
pub fn unresolved_params(strategy_params: &[Parameter], user_params: &[ParamValue]) -> Vec<String> {
    strategy_params
        .iter()
        .filter(|sp| sp.default.is_none())
        .filter(|sp| !user_params.iter().any(|up| up.name == sp.name))
        .map(|sp| sp.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, default: Option<&str>) -> Parameter {
        Parameter {
            name: name.into(),
            description: String::new(),
            default: default.map(String::from),
        }
    }

    #[test]
    fn test_run_overrides_build_value() {
        let build = vec![ParamValue::new("registry", "quay.io")];
        let run = vec![ParamValue::new("registry", "ghcr.io")];

        let merged = override_params(&build, &run);
        assert_eq!(merged, vec![ParamValue::new("registry", "ghcr.io")]);
    }

    #[test]
    fn test_run_cannot_introduce_new_params() {
        let build = vec![ParamValue::new("registry", "quay.io")];
        let run = vec![ParamValue::new("sneaky", "value")];

        let merged = override_params(&build, &run);
        assert_eq!(merged, vec![ParamValue::new("registry", "quay.io")]);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("shp-output-image"));
        assert!(is_reserved("shp-source-root"));
        assert!(is_reserved("shp-anything"));
        assert!(is_reserved("BUILDER_IMAGE"));
        assert!(is_reserved("DOCKERFILE"));
        assert!(is_reserved("CONTEXT_DIR"));
        assert!(!is_reserved("registry"));
        assert!(!is_reserved("shipmate"));
    }

    #[test]
    fn test_reserved_violations_aggregate() {
        let user = vec![
            ParamValue::new("shp-output-image", "x"),
            ParamValue::new("ok", "y"),
            ParamValue::new("DOCKERFILE", "z"),
        ];
        assert_eq!(
            reserved_violations(&user),
            vec!["shp-output-image", "DOCKERFILE"]
        );
    }

    #[test]
    fn test_unresolved_params_aggregate() {
        let strategy = vec![
            param("with-default", Some("d")),
            param("needs-value", None),
            param("also-needs-value", None),
            param("provided", None),
        ];
        let user = vec![ParamValue::new("provided", "v")];

        assert_eq!(
            unresolved_params(&strategy, &user),
            vec!["needs-value", "also-needs-value"]
        );
    }

    #[test]
    fn test_no_unresolved_when_all_covered() {
        let strategy = vec![param("a", Some("1")), param("b", None)];
        let user = vec![ParamValue::new("b", "2")];
        assert!(unresolved_params(&strategy, &user).is_empty());
    }
}
