//! Pre-processing validation of untrusted uploads.
//!
//! Every byte buffer passes through [`SecurityScanner::scan`] before any
//! extractor touches it. The scan never fails: problems are reported as
//! [`FailedCheck`]s on the result.

pub mod antivirus;
pub mod rules;
pub mod signature;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::config::SecurityConfig;
use crate::sanitize::redact_filename;

pub use antivirus::{AntivirusEngine, AntivirusError, AntivirusVerdict, ClamdScanner};
pub use rules::{Classification, PatternRule, RuleSet};
pub use signature::{normalize_mime, XLSX_MIME, XLS_MIME};

const HEURISTIC_ENGINE: &str = "heuristic";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Heuristics and an external antivirus engine both ran.
    Full,
    /// Only heuristics ran; `degraded_reason` says why.
    #[default]
    HeuristicOnly,
}

/// A single check that failed during a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum FailedCheck {
    SizeExceeded { size: u64, limit: u64 },
    BlockedExtension { extension: String },
    DisallowedMime { mime: String },
    SignatureMismatch { declared: String, detected: Option<String> },
    MalwareDetected { signatures: Vec<String> },
    VirusDetected { signatures: Vec<String> },
}

impl FailedCheck {
    /// Size, extension and MIME failures are input validation problems;
    /// the rest are security findings.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FailedCheck::SizeExceeded { .. }
                | FailedCheck::BlockedExtension { .. }
                | FailedCheck::DisallowedMime { .. }
        )
    }
}

impl fmt::Display for FailedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedCheck::SizeExceeded { size, limit } => {
                write!(f, "file size {} bytes exceeds limit of {} bytes", size, limit)
            }
            FailedCheck::BlockedExtension { extension } => {
                write!(f, "file extension '.{}' is not permitted", extension)
            }
            FailedCheck::DisallowedMime { mime } => {
                write!(f, "MIME type '{}' is not allowed", mime)
            }
            FailedCheck::SignatureMismatch { declared, detected } => write!(
                f,
                "file signature {} does not match declared type '{}'",
                detected.as_deref().unwrap_or("<unrecognized>"),
                declared
            ),
            FailedCheck::MalwareDetected { signatures } => {
                write!(f, "malware patterns detected: {}", signatures.join(", "))
            }
            FailedCheck::VirusDetected { signatures } => {
                write!(f, "antivirus detected: {}", signatures.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScanResult {
    pub is_safe: bool,
    pub file_signature_valid: bool,
    pub detected_signature: Option<String>,
    pub virus_signatures: Option<Vec<String>>,
    pub malware_signatures: Option<Vec<String>>,
    pub suspicious_patterns: Vec<String>,
    pub failed_checks: Vec<FailedCheck>,
    pub scan_mode: ScanMode,
    pub degraded_reason: Option<String>,
    pub engine: String,
    pub completed_at: DateTime<Utc>,
}

impl SecurityScanResult {
    pub fn reasons(&self) -> Vec<String> {
        self.failed_checks.iter().map(|c| c.to_string()).collect()
    }

    /// True when at least one failed check is a security finding rather
    /// than a validation problem.
    pub fn has_security_findings(&self) -> bool {
        self.failed_checks.iter().any(|c| !c.is_validation())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Do not consult the antivirus engine even if one is configured.
    pub skip_antivirus: bool,
    /// Skip the script/encoded-payload heuristics. Used for fetched web
    /// pages, whose scripts are expected and stripped before extraction.
    pub skip_content_heuristics: bool,
}

pub struct SecurityScanner {
    config: SecurityConfig,
    malware_rules: RuleSet,
    pdf_rules: RuleSet,
    spreadsheet_rules: RuleSet,
    antivirus: Option<Arc<dyn AntivirusEngine>>,
}

impl SecurityScanner {
    /// Builds a scanner with the default rule tables. A clamd client is
    /// attached when `config.antivirus.enabled` is set.
    pub fn new(config: SecurityConfig) -> Self {
        let antivirus: Option<Arc<dyn AntivirusEngine>> = if config.antivirus.enabled {
            Some(Arc::new(ClamdScanner::from_config(&config.antivirus)))
        } else {
            None
        };

        Self {
            config,
            malware_rules: RuleSet::malware_heuristics(),
            pdf_rules: RuleSet::pdf_advisories(),
            spreadsheet_rules: RuleSet::spreadsheet_advisories(),
            antivirus,
        }
    }

    pub fn with_antivirus(mut self, engine: Arc<dyn AntivirusEngine>) -> Self {
        self.antivirus = Some(engine);
        self
    }

    pub fn with_malware_rules(mut self, rules: RuleSet) -> Self {
        self.malware_rules = rules;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub async fn scan(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
        options: &ScanOptions,
    ) -> SecurityScanResult {
        let span = info_span!(
            "security.scan",
            file = %redact_filename(filename),
            size = bytes.len(),
        );
        self.scan_inner(bytes, filename, mime_type, options)
            .instrument(span)
            .await
    }

    async fn scan_inner(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
        options: &ScanOptions,
    ) -> SecurityScanResult {
        let mime = resolve_mime(filename, mime_type);
        let mut failed_checks = Vec::new();
        let mut suspicious_patterns = Vec::new();

        let size = bytes.len() as u64;
        if size > self.config.max_file_size_bytes {
            failed_checks.push(FailedCheck::SizeExceeded {
                size,
                limit: self.config.max_file_size_bytes,
            });
        }

        if let Some(extension) = file_extension(filename) {
            if self
                .config
                .blocked_extensions
                .iter()
                .any(|blocked| blocked.trim_start_matches('.').eq_ignore_ascii_case(&extension))
            {
                failed_checks.push(FailedCheck::BlockedExtension { extension });
            }
        }

        if !self.is_mime_allowed(&mime) {
            failed_checks.push(FailedCheck::DisallowedMime { mime: mime.clone() });
        }

        let signature_check = signature::verify(bytes, &mime);
        if !signature_check.valid {
            failed_checks.push(FailedCheck::SignatureMismatch {
                declared: mime.clone(),
                detected: signature_check.detected.map(str::to_string),
            });
        }

        let malware_signatures: Vec<String> = if options.skip_content_heuristics {
            Vec::new()
        } else {
            self.malware_rules
                .matches(bytes)
                .into_iter()
                .filter(|rule| rule.classification == Classification::Malware)
                .map(|rule| rule.name.clone())
                .collect()
        };
        if !malware_signatures.is_empty() {
            failed_checks.push(FailedCheck::MalwareDetected {
                signatures: malware_signatures.clone(),
            });
        }

        let (scan_mode, degraded_reason, virus_signatures, engine) =
            self.run_antivirus(bytes, options).await;
        if let Some(signatures) = virus_signatures.as_ref().filter(|s| !s.is_empty()) {
            failed_checks.push(FailedCheck::VirusDetected {
                signatures: signatures.clone(),
            });
        }

        for check in &failed_checks {
            suspicious_patterns.push(check.to_string());
        }
        for advisory in self.advisory_rules(&mime).matches(bytes) {
            suspicious_patterns.push(format!("advisory: {}", advisory.name));
        }

        let is_safe = failed_checks.is_empty();
        if !is_safe {
            tracing::warn!(checks = failed_checks.len(), "Upload failed security scan");
        } else if !suspicious_patterns.is_empty() {
            tracing::info!(
                advisories = suspicious_patterns.len(),
                "Upload passed scan with advisories"
            );
        }

        SecurityScanResult {
            is_safe,
            file_signature_valid: signature_check.valid,
            detected_signature: signature_check.detected.map(str::to_string),
            virus_signatures,
            malware_signatures: (!malware_signatures.is_empty()).then_some(malware_signatures),
            suspicious_patterns,
            failed_checks,
            scan_mode,
            degraded_reason,
            engine,
            completed_at: Utc::now(),
        }
    }

    async fn run_antivirus(
        &self,
        bytes: &[u8],
        options: &ScanOptions,
    ) -> (ScanMode, Option<String>, Option<Vec<String>>, String) {
        let engine = match (&self.antivirus, options.skip_antivirus) {
            (None, _) => {
                return (
                    ScanMode::HeuristicOnly,
                    Some("no antivirus engine configured".to_string()),
                    None,
                    HEURISTIC_ENGINE.to_string(),
                )
            }
            (Some(_), true) => {
                return (
                    ScanMode::HeuristicOnly,
                    Some("antivirus skipped by caller".to_string()),
                    None,
                    HEURISTIC_ENGINE.to_string(),
                )
            }
            (Some(engine), false) => engine,
        };

        match engine.scan(bytes).await {
            Ok(AntivirusVerdict::Clean) => (
                ScanMode::Full,
                None,
                Some(Vec::new()),
                format!("{}+{}", HEURISTIC_ENGINE, engine.name()),
            ),
            Ok(AntivirusVerdict::Infected(signatures)) => (
                ScanMode::Full,
                None,
                Some(signatures),
                format!("{}+{}", HEURISTIC_ENGINE, engine.name()),
            ),
            Err(e) => {
                tracing::warn!(
                    engine = engine.name(),
                    "Antivirus unavailable, using heuristic result only: {}",
                    e
                );
                (
                    ScanMode::HeuristicOnly,
                    Some(e.to_string()),
                    None,
                    HEURISTIC_ENGINE.to_string(),
                )
            }
        }
    }

    fn is_mime_allowed(&self, mime: &str) -> bool {
        self.config
            .allowed_mime_types
            .iter()
            .any(|allowed| normalize_mime(allowed) == mime)
    }

    fn advisory_rules(&self, mime: &str) -> &RuleSet {
        static EMPTY: RuleSet = RuleSet::empty();
        match mime {
            "application/pdf" => &self.pdf_rules,
            XLSX_MIME | XLS_MIME => &self.spreadsheet_rules,
            _ => &EMPTY,
        }
    }
}

/// Normalizes the declared MIME type, guessing from the filename when the
/// client sent nothing useful.
pub fn resolve_mime(filename: &str, declared: &str) -> String {
    let normalized = normalize_mime(declared);
    if normalized.is_empty() || normalized == "application/octet-stream" {
        if let Some(guess) = mime_guess::from_path(filename).first() {
            return normalize_mime(guess.essence_str());
        }
    }
    normalized
}

fn file_extension(filename: &str) -> Option<String> {
    let base = redact_filename(filename);
    base.rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}
