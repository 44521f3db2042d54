mod common;

use std::time::Duration;

use keel_core::ParameterValues;
use keel_provisioner::{ACR_PULL_ROLE_ID, DeploymentConfig, ProvisionerError};
use serde_json::json;

#[test]
fn defaults_fill_optional_fields() {
    let config: DeploymentConfig = serde_json::from_value(json!({
        "environment": "prod",
        "region": "northeurope",
        "subscription_id": common::PRIMARY_SUBSCRIPTION,
        "resource_group": "rg-keel-prod",
    }))
    .unwrap();

    assert_eq!(config.naming_prefix, "keel");
    assert_eq!(config.parallelism, 4);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.roles.get("pull").map(String::as_str), Some(ACR_PULL_ROLE_ID));
    assert!(config.image_tag.is_none());
    config.validate().unwrap();
}

#[test]
fn validate_rejects_unusable_settings() {
    let mut zero_parallelism = common::config();
    zero_parallelism.parallelism = 0;

    let mut no_attempts = common::config();
    no_attempts.retry.max_attempts = 0;

    let mut bad_scope = common::config();
    bad_scope.subscription_id = "subscription-one".into();

    let mut no_environment = common::config();
    no_environment.environment.clear();

    let mut unusable = vec![zero_parallelism, no_attempts, bad_scope, no_environment];
    for multiplier in [-1.0, 0.5, f64::NAN, f64::INFINITY] {
        let mut config = common::config();
        config.retry.backoff_multiplier = multiplier;
        unusable.push(config);
    }
    let mut inverted_delays = common::config();
    inverted_delays.retry.initial_delay_ms = 10;
    inverted_delays.retry.max_delay_ms = 5;
    unusable.push(inverted_delays);

    for config in unusable {
        assert!(matches!(config.validate(), Err(ProvisionerError::Config(_))));
    }
    assert!(common::config().validate().is_ok());
}

#[test]
fn generated_names_include_prefix_and_environment() {
    let mut config = common::config();
    assert_eq!(config.resource_name("registry_pull"), "keel-dev-registry-pull");

    config.naming_prefix = "acme".into();
    config.environment = "staging".into();
    assert_eq!(config.resource_name("app"), "acme-staging-app");
}

#[test]
fn roles_resolve_by_name_or_id() {
    let mut config = common::config();
    config
        .roles
        .insert("reader".into(), "acdd72a7-3385-48ef-bd42-f606fba81ae7".into());

    assert_eq!(config.role_id("pull").as_deref(), Some(ACR_PULL_ROLE_ID));
    assert_eq!(
        config.role_id("reader").as_deref(),
        Some("acdd72a7-3385-48ef-bd42-f606fba81ae7")
    );
    assert_eq!(
        config.role_id("b24988ac-6180-42a0-ab88-20f7382dd24c").as_deref(),
        Some("b24988ac-6180-42a0-ab88-20f7382dd24c")
    );
    assert_eq!(config.role_id("owner"), None);
}

#[test]
fn parameter_defaults_never_override_supplied_values() {
    let mut config = common::config();
    config.image_tag = Some("2.0.1".into());

    let mut values = ParameterValues::new().with("location", "eastus");
    config.apply_parameter_defaults(&mut values, &["environment", "location", "image_tag"]);

    assert_eq!(values.get("location"), Some(&json!("eastus")));
    assert_eq!(values.get("environment"), Some(&json!("dev")));
    assert_eq!(values.get("image_tag"), Some(&json!("2.0.1")));
}

#[test]
fn parameter_defaults_skip_undeclared_names() {
    let config = common::config();
    let mut values = ParameterValues::new();
    config.apply_parameter_defaults(&mut values, &["location"]);

    assert!(values.contains("location"));
    assert!(!values.contains("environment"));
    assert!(!values.contains("image_tag"));
}

#[test]
fn retry_settings_convert_to_durations() {
    let retry = common::config().retry_config();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.initial_delay, Duration::from_millis(1));
    assert_eq!(retry.max_delay, Duration::from_millis(5));
}
