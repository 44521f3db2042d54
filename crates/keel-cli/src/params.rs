//! Parameter collection.
//!
//! Precedence, highest first: `--param name=value`, `KEEL_PARAM_<NAME>`
//! environment variables, then whatever the deployment config and the
//! manifest's declared defaults provide during binding.

use std::collections::HashMap;

use keel_core::{Manifest, ParameterValues};

pub const ENV_PREFIX: &str = "KEEL_PARAM_";

pub fn env_var_name(parameter: &str) -> String {
    format!("{ENV_PREFIX}{}", parameter.to_ascii_uppercase())
}

/// Split a `name=value` flag. The value may itself contain `=`.
pub fn parse_flag(flag: &str) -> eyre::Result<(String, String)> {
    let (name, value) = flag
        .split_once('=')
        .ok_or_else(|| eyre::eyre!("--param `{flag}` must have the form name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(eyre::eyre!("--param `{flag}` has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Only declared parameters are looked up in the environment, so unrelated
/// `KEEL_PARAM_*` variables never trip the undeclared-parameter check.
pub fn collect(
    manifest: &Manifest,
    flags: &[String],
    env: impl IntoIterator<Item = (String, String)>,
) -> eyre::Result<ParameterValues> {
    let env: HashMap<String, String> = env
        .into_iter()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();

    let mut values = ParameterValues::new();
    for name in manifest.parameters.keys() {
        if let Some(value) = env.get(&env_var_name(name)) {
            tracing::debug!(parameter = %name, "parameter taken from environment");
            values.set(name.clone(), value.clone());
        }
    }
    for flag in flags {
        let (name, value) = parse_flag(flag)?;
        values.set(name, value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn flag_values_may_contain_equals() {
        assert_eq!(
            parse_flag("signing_seed=a=b=c").unwrap(),
            ("signing_seed".to_string(), "a=b=c".to_string())
        );
        assert!(parse_flag("no-value").is_err());
        assert!(parse_flag("=x").is_err());
    }

    #[test]
    fn flags_override_environment() {
        let manifest = Manifest::web_stack().unwrap();
        let values = collect(
            &manifest,
            &["image_tag=2.1.0".to_string()],
            env(&[
                ("KEEL_PARAM_IMAGE_TAG", "1.0.0"),
                ("KEEL_PARAM_ADMIN_PASSWORD", "from-env"),
                ("KEEL_PARAM_UNDECLARED", "ignored"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(values.get("image_tag"), Some(&serde_json::json!("2.1.0")));
        assert_eq!(values.get("admin_password"), Some(&serde_json::json!("from-env")));
        assert!(!values.contains("undeclared"));
        assert_eq!(values.names().count(), 2);
    }

    #[test]
    fn undeclared_flag_fails_binding() {
        let manifest = Manifest::web_stack().unwrap();
        let values = collect(&manifest, &["colour=blue".to_string()], env(&[])).unwrap();
        assert!(manifest.bind(&values).is_err());
    }
}
