use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::{error, info, warn};
use moka::sync::Cache;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::info_span;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::ocr::preprocess::downscale;
use crate::sanitize::redact_filename;
use crate::security::normalize_mime;

use super::filesystem::{FileStorage, StoredObject};
use super::sha256_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Identical content was already stored; nothing was written.
    Deduplication,
    Recompressed,
    Gzip,
    /// Written as submitted.
    Stored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub original_size: u64,
    pub optimized_size: u64,
    /// `optimized_size / original_size`; 1.0 for deduplicated content.
    pub compression_ratio: f64,
    pub storage_url: String,
    /// SHA-256 of the submitted bytes.
    pub checksum: String,
    pub method: OptimizationMethod,
}

#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    /// Only objects created at least this long ago are candidates.
    pub older_than: chrono::Duration,
    /// ...and not read or re-submitted within this window.
    pub unused_for: chrono::Duration,
    pub max_items: usize,
}

impl CleanupPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            older_than: chrono::Duration::days(config.retention_days),
            unused_for: chrono::Duration::days(config.unused_days),
            max_items: config.cleanup_batch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UtilizationAction {
    None,
    Warned,
    Cleaned(CleanupReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationReport {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub utilization: f64,
    pub action: UtilizationAction,
}

/// Deduplicating, compressing front end to [`FileStorage`].
#[derive(Clone)]
pub struct StorageOptimizer {
    inner: Arc<OptimizerInner>,
}

struct OptimizerInner {
    config: StorageConfig,
    storage: FileStorage,
    /// Input checksum to object key.
    dedup: Cache<String, String>,
}

impl StorageOptimizer {
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        let storage = FileStorage::open(&config.root_directory)?;
        let dedup = Cache::new(config.dedup_cache_capacity);
        Ok(Self {
            inner: Arc::new(OptimizerInner {
                config,
                storage,
                dedup,
            }),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &FileStorage {
        &self.inner.storage
    }

    /// Stores an image, downscaled and re-encoded when that helps.
    pub fn optimize_image(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<OptimizationResult, StorageError> {
        let _span = info_span!(
            "storage.optimize",
            kind = "image",
            filename = %redact_filename(filename),
            bytes = bytes.len()
        )
        .entered();

        let checksum = sha256_hex(bytes);
        if let Some(hit) = self.deduplicate(&checksum, bytes.len() as u64) {
            return Ok(hit);
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| StorageError::Encode(format!("Failed to decode image: {}", e)))?;
        let (width, height) = img.dimensions();
        let img = downscale(img, self.inner.config.max_image_dimension);
        let resized = img.dimensions() != (width, height);

        let (encoded, extension) = if img.color().has_alpha() {
            (encode_png(&img)?, "png")
        } else {
            (encode_jpeg(&img, self.inner.config.jpeg_quality)?, "jpg")
        };

        let original_size = bytes.len() as u64;
        if resized || encoded.len() < bytes.len() {
            self.persist(
                &checksum,
                extension,
                &encoded,
                original_size,
                OptimizationMethod::Recompressed,
            )
        } else {
            let extension = extension_for(filename, mime_type);
            self.persist(&checksum, &extension, bytes, original_size, OptimizationMethod::Stored)
        }
    }

    /// Stores any file: images go through [`Self::optimize_image`], text-like
    /// content is gzipped, everything else is stored as is.
    pub fn optimize_file(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<OptimizationResult, StorageError> {
        let mime = normalize_mime(mime_type);
        if mime.starts_with("image/") {
            match self.optimize_image(bytes, filename, mime_type) {
                Ok(result) => return Ok(result),
                Err(StorageError::Encode(reason)) => {
                    warn!(
                        "Storing {} without recompression: {}",
                        redact_filename(filename),
                        reason
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let _span = info_span!(
            "storage.optimize",
            kind = "file",
            filename = %redact_filename(filename),
            bytes = bytes.len()
        )
        .entered();

        let checksum = sha256_hex(bytes);
        if let Some(hit) = self.deduplicate(&checksum, bytes.len() as u64) {
            return Ok(hit);
        }

        let extension = extension_for(filename, mime_type);
        if is_text_like(&mime) {
            let compressed = gzip(bytes)?;
            if compressed.len() < bytes.len() {
                return self.persist(
                    &checksum,
                    &format!("{}.gz", extension),
                    &compressed,
                    bytes.len() as u64,
                    OptimizationMethod::Gzip,
                );
            }
        }

        self.persist(&checksum, &extension, bytes, bytes.len() as u64, OptimizationMethod::Stored)
    }

    /// Looks up earlier content with the same checksum: the cache first, then
    /// the storage index for entries the cache has evicted or never held.
    fn deduplicate(&self, checksum: &str, original_size: u64) -> Option<OptimizationResult> {
        let cached = self.inner.dedup.get(checksum).and_then(|key| {
            let object = self.inner.storage.touch(&key);
            if object.is_none() {
                // Cleaned up since it was cached.
                self.inner.dedup.invalidate(checksum);
            }
            object
        });
        let object = match cached {
            Some(object) => object,
            None => {
                let object = self.inner.storage.find_by_checksum(checksum)?;
                self.inner
                    .dedup
                    .insert(checksum.to_string(), object.key.clone());
                object
            }
        };
        let key = &object.key;

        tracing::debug!(key = %key, "Deduplicated stored object");
        Some(OptimizationResult {
            original_size,
            optimized_size: object.size,
            compression_ratio: 1.0,
            storage_url: object.url(),
            checksum: checksum.to_string(),
            method: OptimizationMethod::Deduplication,
        })
    }

    fn persist(
        &self,
        checksum: &str,
        extension: &str,
        content: &[u8],
        original_size: u64,
        method: OptimizationMethod,
    ) -> Result<OptimizationResult, StorageError> {
        let key = FileStorage::object_key(checksum, extension);
        let object: StoredObject = self.inner.storage.put(&key, content)?;
        self.inner.dedup.insert(checksum.to_string(), key);

        let compression_ratio = if original_size == 0 {
            1.0
        } else {
            object.size as f64 / original_size as f64
        };
        Ok(OptimizationResult {
            original_size,
            optimized_size: object.size,
            compression_ratio,
            storage_url: object.url(),
            checksum: checksum.to_string(),
            method,
        })
    }

    /// Moves a stored object into the archive tier.
    pub fn migrate_to_archive(&self, key: &str) -> Result<StoredObject, StorageError> {
        self.inner.storage.archive(key)
    }

    /// Removes old, unused objects, oldest access first.
    pub fn cleanup(&self, policy: &CleanupPolicy) -> CleanupReport {
        let now = Utc::now();
        let created_before = now - policy.older_than;
        let accessed_before = now - policy.unused_for;

        let mut candidates: Vec<StoredObject> = self
            .inner
            .storage
            .objects()
            .into_iter()
            .filter(|o| o.created_at <= created_before && o.last_accessed <= accessed_before)
            .collect();
        candidates.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed).then(a.key.cmp(&b.key)));

        let mut report = CleanupReport::default();
        for object in candidates.into_iter().take(policy.max_items) {
            match self.inner.storage.remove(&object.key) {
                Ok(freed) => {
                    if let Some(checksum) = checksum_of_key(&object.key) {
                        self.inner.dedup.invalidate(checksum);
                    }
                    report.freed_bytes += freed;
                    report.removed.push(object.key);
                }
                Err(e) => error!("Failed to remove {}: {}", object.key, e),
            }
        }

        info!(
            "Storage cleanup removed {} objects ({} bytes)",
            report.removed.len(),
            report.freed_bytes
        );
        report
    }

    /// Computes utilization; warns above the warn ratio and cleans up above
    /// the cleanup ratio.
    pub fn check_utilization(&self) -> UtilizationReport {
        let config = &self.inner.config;
        let used_bytes = self.inner.storage.used_bytes();
        let utilization = if config.limit_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / config.limit_bytes as f64
        };

        let action = if utilization > config.cleanup_ratio {
            warn!(
                "Storage utilization {:.1}% above {:.0}%, starting cleanup",
                utilization * 100.0,
                config.cleanup_ratio * 100.0
            );
            UtilizationAction::Cleaned(self.cleanup(&CleanupPolicy::from_config(config)))
        } else if utilization > config.warn_ratio {
            warn!(
                "Storage utilization {:.1}% of {} bytes",
                utilization * 100.0,
                config.limit_bytes
            );
            UtilizationAction::Warned
        } else {
            UtilizationAction::None
        };

        UtilizationReport {
            used_bytes,
            limit_bytes: config.limit_bytes,
            utilization,
            action,
        }
    }

    /// Runs [`Self::check_utilization`] every `interval` until stopped.
    pub fn spawn_monitor(&self, interval: Duration) -> StorageMonitor {
        let optimizer = self.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let stop_flag = Arc::clone(&shutdown);
        let stop_wake = Arc::clone(&wake);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_wake.notified() => {}
                }
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }

                let check = optimizer.clone();
                match tokio::task::spawn_blocking(move || check.check_utilization()).await {
                    Ok(report) => log::debug!(
                        "Storage utilization {:.1}%",
                        report.utilization * 100.0
                    ),
                    Err(e) => error!("Storage monitor check failed: {}", e),
                }
            }
            info!("Storage monitor stopped");
        });

        StorageMonitor {
            shutdown,
            wake,
            handle,
        }
    }
}

pub struct StorageMonitor {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl StorageMonitor {
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
        if let Err(e) = self.handle.await {
            error!("Storage monitor task failed: {}", e);
        }
    }
}

fn checksum_of_key(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    name.split('.').next()
}

fn is_text_like(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/xhtml+xml"
        )
}

fn extension_for(filename: &str, mime_type: &str) -> String {
    let from_name = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });
    from_name
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&normalize_mime(mime_type))
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| StorageError::Encode(format!("PNG: {}", e)))?;
    Ok(out)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| StorageError::Encode(format!("JPEG: {}", e)))?;
    Ok(out)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| StorageError::Encode(format!("gzip: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::filesystem::key_from_url;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Read;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> StorageConfig {
        StorageConfig {
            root_directory: root.to_path_buf(),
            ..Default::default()
        }
    }

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn photo(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        png(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_dedup_returns_same_url() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        let bytes = photo(300, 200);

        let first = optimizer.optimize_image(&bytes, "a.png", "image/png").unwrap();
        let second = optimizer.optimize_image(&bytes, "copy.png", "image/png").unwrap();

        assert_ne!(first.method, OptimizationMethod::Deduplication);
        assert_eq!(second.method, OptimizationMethod::Deduplication);
        assert_eq!(second.storage_url, first.storage_url);
        assert_eq!(second.compression_ratio, 1.0);
        assert_eq!(second.checksum, first.checksum);
        assert_eq!(optimizer.storage().objects().len(), 1);
    }

    #[test]
    fn test_large_image_is_downscaled_to_jpeg() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_image_dimension = 256;
        let optimizer = StorageOptimizer::new(cfg).unwrap();

        let result = optimizer
            .optimize_image(&photo(1024, 512), "scan.png", "image/png")
            .unwrap();
        assert_eq!(result.method, OptimizationMethod::Recompressed);
        assert!(result.storage_url.ends_with(".jpg"));

        let key = key_from_url(&result.storage_url).unwrap();
        let stored = optimizer.storage().read(key).unwrap();
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!(decoded.dimensions(), (256, 128));
    }

    #[test]
    fn test_transparent_image_stays_png() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_image_dimension = 64;
        let optimizer = StorageOptimizer::new(cfg).unwrap();

        let img = RgbaImage::from_pixel(128, 128, Rgba([10, 20, 30, 128]));
        let result = optimizer
            .optimize_image(&png(DynamicImage::ImageRgba8(img)), "logo.png", "image/png")
            .unwrap();
        assert!(result.storage_url.ends_with(".png"));
    }

    #[test]
    fn test_text_is_gzipped() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        let text = "name,amount\nFoo,100\n".repeat(200);

        let result = optimizer
            .optimize_file(text.as_bytes(), "sales.csv", "text/csv")
            .unwrap();
        assert_eq!(result.method, OptimizationMethod::Gzip);
        assert!(result.compression_ratio < 0.5);
        assert!(result.storage_url.ends_with(".csv.gz"));

        let key = key_from_url(&result.storage_url).unwrap();
        let stored = optimizer.storage().read(key).unwrap();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&stored[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_binary_is_stored() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        let result = optimizer
            .optimize_file(b"%PDF-1.4 tiny", "report.pdf", "application/pdf")
            .unwrap();
        assert_eq!(result.method, OptimizationMethod::Stored);
        assert_eq!(result.compression_ratio, 1.0);
        assert!(result.storage_url.ends_with(".pdf"));
    }

    #[test]
    fn test_undecodable_image_file_is_stored() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        assert!(optimizer
            .optimize_image(b"not really a jpeg", "x.jpg", "image/jpeg")
            .is_err_and(|e| matches!(e, StorageError::Encode(_))));

        let result = optimizer
            .optimize_file(b"not really a jpeg", "x.jpg", "image/jpeg")
            .unwrap();
        assert_eq!(result.method, OptimizationMethod::Stored);
        assert!(result.storage_url.ends_with(".jpg"));
    }

    #[test]
    fn test_cleanup_invalidates_dedup() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.retention_days = 0;
        cfg.unused_days = 0;
        let optimizer = StorageOptimizer::new(cfg.clone()).unwrap();

        let first = optimizer
            .optimize_file(b"%PDF-1.4 one", "a.pdf", "application/pdf")
            .unwrap();
        let report = optimizer.cleanup(&CleanupPolicy::from_config(&cfg));
        assert_eq!(report.removed.len(), 1);
        assert_eq!(optimizer.storage().used_bytes(), 0);

        let again = optimizer
            .optimize_file(b"%PDF-1.4 one", "a.pdf", "application/pdf")
            .unwrap();
        assert_eq!(again.method, OptimizationMethod::Stored);
        assert_eq!(again.storage_url, first.storage_url);
    }

    #[test]
    fn test_dedup_after_restart_uses_storage_index() {
        let dir = TempDir::new().unwrap();
        let text = "region,revenue\nKanto,1200\n".repeat(100);

        let first = StorageOptimizer::new(config(dir.path()))
            .unwrap()
            .optimize_file(text.as_bytes(), "sales.csv", "text/csv")
            .unwrap();
        assert_eq!(first.method, OptimizationMethod::Gzip);

        let reopened = StorageOptimizer::new(config(dir.path())).unwrap();
        let again = reopened
            .optimize_file(text.as_bytes(), "copy.csv", "text/csv")
            .unwrap();
        assert_eq!(again.method, OptimizationMethod::Deduplication);
        assert_eq!(again.compression_ratio, 1.0);
        assert_eq!(again.storage_url, first.storage_url);
        assert_eq!(reopened.storage().objects().len(), 1);
    }

    #[test]
    fn test_cleanup_skips_recent_objects() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        optimizer
            .optimize_file(b"%PDF-1.4 fresh", "a.pdf", "application/pdf")
            .unwrap();

        let report = optimizer.cleanup(&CleanupPolicy::from_config(optimizer.config()));
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_utilization_thresholds() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.limit_bytes = 100;
        cfg.retention_days = 0;
        cfg.unused_days = 0;
        let optimizer = StorageOptimizer::new(cfg).unwrap();

        assert_eq!(optimizer.check_utilization().action, UtilizationAction::None);

        optimizer
            .optimize_file(&[7u8; 85], "blob.bin", "application/octet-stream")
            .unwrap();
        let report = optimizer.check_utilization();
        assert_eq!(report.action, UtilizationAction::Warned);
        assert!((report.utilization - 0.85).abs() < 1e-9);

        optimizer
            .optimize_file(&[8u8; 10], "more.bin", "application/octet-stream")
            .unwrap();
        let report = optimizer.check_utilization();
        match report.action {
            UtilizationAction::Cleaned(cleanup) => assert_eq!(cleanup.removed.len(), 2),
            other => panic!("expected cleanup, got {:?}", other),
        }
        assert_eq!(optimizer.storage().used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_monitor_stops() {
        let dir = TempDir::new().unwrap();
        let optimizer = StorageOptimizer::new(config(dir.path())).unwrap();
        let monitor = optimizer.spawn_monitor(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(35)).await;
        monitor.stop().await;
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("Report.PDF", "application/pdf"), "pdf");
        assert_eq!(extension_for("noext", "application/pdf"), "pdf");
        assert_eq!(extension_for("noext", "application/x-unknown-thing"), "bin");
    }
}
