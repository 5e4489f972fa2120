//! Table-driven tests for configuration loading and validation.

use std::io::Write;

use evidence_ingest::config::{load_config, load_config_from_str};

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full_queue",
        config_json: r#"{
            "version": "1.0",
            "queue": {
                "global_concurrency": 6,
                "ocr_concurrency": 3,
                "daily_cost_cap": 250.0,
                "tick_interval_ms": 500,
                "default_max_retries": 1,
                "default_timeout_secs": 60,
                "costs": { "ocr_per_mb": 1.25, "compress_flat": 0.0 }
            },
            "storage": { "warn_ratio": 0.7, "cleanup_ratio": 0.95 }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "queue": {} }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "zero_global_concurrency",
        config_json: r#"{ "version": "1.0", "queue": { "global_concurrency": 0 } }"#,
        should_succeed: false,
        expected_error: Some("global_concurrency"),
    },
    ConfigTestCase {
        name: "ocr_cap_above_global_cap",
        config_json: r#"{ "version": "1.0", "queue": { "global_concurrency": 2, "ocr_concurrency": 3 } }"#,
        should_succeed: false,
        expected_error: Some("ocr_concurrency must be between 1 and queue.global_concurrency"),
    },
    ConfigTestCase {
        name: "non_positive_daily_cap",
        config_json: r#"{ "version": "1.0", "queue": { "daily_cost_cap": 0 } }"#,
        should_succeed: false,
        expected_error: Some("daily_cost_cap must be a positive number"),
    },
    ConfigTestCase {
        name: "negative_cost",
        config_json: r#"{ "version": "1.0", "queue": { "costs": { "storage_per_gb_day": -1 } } }"#,
        should_succeed: false,
        expected_error: Some("queue.costs.storage_per_gb_day"),
    },
    ConfigTestCase {
        name: "quality_threshold_out_of_range",
        config_json: r#"{ "version": "1.0", "transform": { "quality_threshold": 1.5 } }"#,
        should_succeed: false,
        expected_error: Some("quality_threshold must be within [0, 1]"),
    },
    ConfigTestCase {
        name: "warn_ratio_above_cleanup_ratio",
        config_json: r#"{ "version": "1.0", "storage": { "warn_ratio": 0.95, "cleanup_ratio": 0.9 } }"#,
        should_succeed: false,
        expected_error: Some("warn_ratio must not exceed"),
    },
    ConfigTestCase {
        name: "jpeg_quality_out_of_range",
        config_json: r#"{ "version": "1.0", "storage": { "jpeg_quality": 0 } }"#,
        should_succeed: false,
        expected_error: Some("jpeg_quality"),
    },
    ConfigTestCase {
        name: "wrong_type_for_size_limit",
        config_json: r#"{ "version": "1.0", "security": { "max_file_size_bytes": "large" } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_loading_cases() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);

        if case.should_succeed {
            assert!(
                result.is_ok(),
                "{}: expected success, got {:?}",
                case.name,
                result.err()
            );
        } else {
            let err = match result {
                Ok(_) => panic!("{}: expected failure, got success", case.name),
                Err(e) => e.to_string(),
            };
            if let Some(expected) = case.expected_error {
                assert!(
                    err.contains(expected),
                    "{}: error '{}' does not contain '{}'",
                    case.name,
                    err,
                    expected
                );
            }
        }
    }
}

#[test]
fn test_values_flow_through() {
    let config = load_config_from_str(CONFIG_TESTS[1].config_json).unwrap();
    assert_eq!(config.queue.global_concurrency, 6);
    assert_eq!(config.queue.ocr_concurrency, 3);
    assert_eq!(config.queue.daily_cost_cap, 250.0);
    assert_eq!(config.queue.costs.ocr_per_mb, 1.25);
    assert_eq!(config.queue.costs.compress_flat, 0.0);
    // Unset cost entries keep their defaults.
    assert_eq!(config.queue.costs.transform_per_table, 0.1);
    assert_eq!(config.storage.warn_ratio, 0.7);
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "version": "1.0", "queue": { "daily_cost_cap": 42.5 } }"#)
        .unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.queue.daily_cost_cap, 42.5);
}

#[test]
fn test_missing_file_is_reported() {
    let err = load_config("/nonexistent/evidence-ingest.json").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
