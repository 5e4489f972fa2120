use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub version: String,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            security: SecurityConfig::default(),
            extraction: ExtractionConfig::default(),
            ocr: OcrConfig::default(),
            transform: TransformConfig::default(),
            queue: QueueConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ─── Security ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default)]
    pub antivirus: AntivirusConfig,
}

/// 50 MiB upload ceiling.
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_blocked_extensions() -> Vec<String> {
    [
        "exe", "bat", "cmd", "com", "scr", "pif", "vbs", "vbe", "js", "jse", "jar", "msi", "dll",
        "sh", "ps1", "app", "deb", "rpm", "wsf", "hta",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "text/csv",
        "text/plain",
        "text/html",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/pdf",
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            blocked_extensions: default_blocked_extensions(),
            allowed_mime_types: default_allowed_mime_types(),
            antivirus: AntivirusConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntivirusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_clamd_address")]
    pub address: String,
    #[serde(default = "default_antivirus_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_clamd_address() -> String {
    "127.0.0.1:3310".to_string()
}

fn default_antivirus_timeout_ms() -> u64 {
    10_000
}

impl Default for AntivirusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_clamd_address(),
            timeout_ms: default_antivirus_timeout_ms(),
        }
    }
}

// ─── Extraction ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    /// PDFs whose native text is shorter than this are re-read through OCR.
    #[serde(default = "default_sparse_text_threshold")]
    pub sparse_text_threshold: usize,
    #[serde(default = "default_dpi")]
    pub pdf_render_dpi: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_sparse_text_threshold() -> usize {
    100
}

fn default_dpi() -> u32 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_fetch_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("evidence-ingest/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            sparse_text_threshold: default_sparse_text_threshold(),
            pdf_render_dpi: default_dpi(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_fetch_bytes: default_max_fetch_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

// ─── OCR ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_true")]
    pub preprocess: bool,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_languages() -> Vec<String> {
    vec!["jpn".to_string(), "eng".to_string()]
}

fn default_max_dimension() -> u32 {
    4000
}

fn default_batch_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            preprocess: true,
            max_dimension: default_max_dimension(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

// ─── Transform ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Tables built from content below this quality carry a caveat footnote.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

fn default_quality_threshold() -> f64 {
    0.8
}

fn default_context_chars() -> usize {
    50
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            context_chars: default_context_chars(),
        }
    }
}

// ─── Queue ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    #[serde(default = "default_ocr_concurrency")]
    pub ocr_concurrency: usize,
    #[serde(default = "default_daily_cost_cap")]
    pub daily_cost_cap: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_job_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub costs: CostConfig,
}

fn default_global_concurrency() -> usize {
    3
}

fn default_ocr_concurrency() -> usize {
    2
}

fn default_daily_cost_cap() -> f64 {
    10_000.0
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_job_timeout_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            ocr_concurrency: default_ocr_concurrency(),
            daily_cost_cap: default_daily_cost_cap(),
            tick_interval_ms: default_tick_interval_ms(),
            default_max_retries: default_max_retries(),
            default_timeout_secs: default_job_timeout_secs(),
            costs: CostConfig::default(),
        }
    }
}

/// Governance cost figures, in currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_ocr_per_mb")]
    pub ocr_per_mb: f64,
    #[serde(default = "default_transform_per_table")]
    pub transform_per_table: f64,
    #[serde(default = "default_compress_flat")]
    pub compress_flat: f64,
    #[serde(default = "default_storage_per_gb_day")]
    pub storage_per_gb_day: f64,
}

fn default_ocr_per_mb() -> f64 {
    0.5
}

fn default_transform_per_table() -> f64 {
    0.1
}

fn default_compress_flat() -> f64 {
    0.05
}

fn default_storage_per_gb_day() -> f64 {
    0.02
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            ocr_per_mb: default_ocr_per_mb(),
            transform_per_table: default_transform_per_table(),
            compress_flat: default_compress_flat(),
            storage_per_gb_day: default_storage_per_gb_day(),
        }
    }
}

// ─── Storage ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root_directory: PathBuf,
    #[serde(default = "default_storage_limit")]
    pub limit_bytes: u64,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
    #[serde(default = "default_cleanup_ratio")]
    pub cleanup_ratio: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_unused_days")]
    pub unused_days: i64,
    #[serde(default = "default_cleanup_batch")]
    pub cleanup_batch: usize,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_cache_capacity: u64,
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".evidence-ingest").join("objects"))
        .unwrap_or_else(|| PathBuf::from("evidence-objects"))
}

fn default_storage_limit() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_max_image_dimension() -> u32 {
    2048
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_monitor_interval_secs() -> u64 {
    3_600
}

fn default_warn_ratio() -> f64 {
    0.8
}

fn default_cleanup_ratio() -> f64 {
    0.9
}

fn default_retention_days() -> i64 {
    30
}

fn default_unused_days() -> i64 {
    7
}

fn default_cleanup_batch() -> usize {
    100
}

fn default_dedup_capacity() -> u64 {
    10_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_directory: default_storage_root(),
            limit_bytes: default_storage_limit(),
            max_image_dimension: default_max_image_dimension(),
            jpeg_quality: default_jpeg_quality(),
            monitor_interval_secs: default_monitor_interval_secs(),
            warn_ratio: default_warn_ratio(),
            cleanup_ratio: default_cleanup_ratio(),
            retention_days: default_retention_days(),
            unused_days: default_unused_days(),
            cleanup_batch: default_cleanup_batch(),
            dedup_cache_capacity: default_dedup_capacity(),
        }
    }
}

// ─── Database ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.evidence-ingest/data/evidence.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How long a write waits on another process holding the file lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: IngestConfig = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.security.max_file_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.extraction.sparse_text_threshold, 100);
        assert_eq!(config.ocr.max_dimension, 4000);
        assert_eq!(config.storage.max_image_dimension, 2048);
        assert!((config.transform.quality_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.security.blocked_extensions.contains(&"exe".to_string()));
        assert!(config
            .security
            .allowed_mime_types
            .contains(&"application/pdf".to_string()));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: IngestConfig = serde_json::from_str(
            r#"{"version": "1.0", "queue": {"daily_cost_cap": 25.0, "costs": {"ocr_per_mb": 2.0}}}"#,
        )
        .unwrap();
        assert_eq!(config.queue.daily_cost_cap, 25.0);
        assert_eq!(config.queue.global_concurrency, 3);
        assert_eq!(config.queue.costs.ocr_per_mb, 2.0);
        assert_eq!(config.queue.costs.compress_flat, 0.05);
    }
}
