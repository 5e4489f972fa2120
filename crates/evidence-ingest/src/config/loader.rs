use std::path::Path;

use crate::config::schema::IngestConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: IngestConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let queue = &config.queue;
    if queue.global_concurrency == 0 {
        return Err(invalid("queue.global_concurrency must be > 0"));
    }
    if queue.ocr_concurrency == 0 || queue.ocr_concurrency > queue.global_concurrency {
        return Err(invalid(
            "queue.ocr_concurrency must be between 1 and queue.global_concurrency",
        ));
    }
    if !(queue.daily_cost_cap.is_finite() && queue.daily_cost_cap > 0.0) {
        return Err(invalid("queue.daily_cost_cap must be a positive number"));
    }
    if queue.tick_interval_ms == 0 {
        return Err(invalid("queue.tick_interval_ms must be > 0"));
    }

    let costs = &queue.costs;
    for (name, value) in [
        ("ocr_per_mb", costs.ocr_per_mb),
        ("transform_per_table", costs.transform_per_table),
        ("compress_flat", costs.compress_flat),
        ("storage_per_gb_day", costs.storage_per_gb_day),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(invalid(&format!(
                "queue.costs.{} must be a non-negative number",
                name
            )));
        }
    }

    let threshold = config.transform.quality_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid("transform.quality_threshold must be within [0, 1]"));
    }

    let storage = &config.storage;
    for (name, ratio) in [
        ("warn_ratio", storage.warn_ratio),
        ("cleanup_ratio", storage.cleanup_ratio),
    ] {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(&format!("storage.{} must be within (0, 1]", name)));
        }
    }
    if storage.warn_ratio > storage.cleanup_ratio {
        return Err(invalid(
            "storage.warn_ratio must not exceed storage.cleanup_ratio",
        ));
    }
    if storage.jpeg_quality == 0 || storage.jpeg_quality > 100 {
        return Err(invalid("storage.jpeg_quality must be within 1..=100"));
    }

    if config.ocr.batch_concurrency == 0 {
        return Err(invalid("ocr.batch_concurrency must be > 0"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
