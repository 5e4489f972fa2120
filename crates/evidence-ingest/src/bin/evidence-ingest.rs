//! Ingests files and web pages from the command line and prints one JSON
//! summary line per input.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde_json::json;

use evidence_ingest::db::default_database_path;
use evidence_ingest::queue::{CompressJob, JobKind, JobOutput};
use evidence_ingest::telemetry::{init_tracing, DEFAULT_FILTER};
use evidence_ingest::{
    load_config, Database, EvidenceOrchestrator, IngestConfig, JobPriority, JobRequest, OcrEngine,
    UploadRequest,
};

#[derive(Parser, Debug)]
#[command(name = "evidence-ingest")]
#[command(about = "Scan, extract and store evidentiary documents")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "EVIDENCE_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long, env = "EVIDENCE_INGEST_DATABASE")]
    database: Option<PathBuf>,

    /// Also deduplicate and store uploaded files through the queue
    #[arg(long)]
    store: bool,

    /// Print the annotated tables for each completed input
    #[arg(long)]
    tables: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Files or http(s) URLs
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(DEFAULT_FILTER, args.json_logs);

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => IngestConfig::default(),
    };

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database.path.clone())
        .or_else(default_database_path)
        .context("No database path configured and no home directory found")?;
    let database = Database::open(&db_path, &config.database)
        .context("Failed to open evidence database")?;

    let ocr = config
        .extraction
        .ocr_enabled
        .then(|| OcrEngine::tesseract(&config.ocr));
    let orchestrator = EvidenceOrchestrator::from_config(&config, Arc::new(database), ocr)
        .context("Failed to initialize ingestion pipeline")?;

    info!("Ingesting {} input(s)", args.inputs.len());

    let mut failures = 0usize;
    for input in &args.inputs {
        if let Err(e) = ingest_one(&orchestrator, input, &args).await {
            failures += 1;
            warn!("{}: {:#}", input, e);
            println!("{}", json!({ "input": input, "error": format!("{:#}", e) }));
        }
    }

    orchestrator.queue().shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} of {} input(s) failed", failures, args.inputs.len());
    }
    Ok(())
}

async fn ingest_one(orchestrator: &EvidenceOrchestrator, input: &str, args: &Args) -> Result<()> {
    let is_url = input.starts_with("http://") || input.starts_with("https://");

    let (evidence, upload) = if is_url {
        (orchestrator.submit_url(input).await?, None)
    } else {
        let path = PathBuf::from(input);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string());
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let request = UploadRequest::new(bytes, filename, mime_type);
        (
            orchestrator.submit_upload(request.clone()).await?,
            Some(request),
        )
    };

    let mut summary = json!({
        "input": input,
        "id": evidence.id,
        "type": evidence.evidence_type,
        "status": evidence.status,
        "checksum": evidence.metadata.checksum,
        "language": evidence.metadata.language,
        "pageCount": evidence.metadata.page_count,
        "processingTimeMs": evidence.metadata.processing_time_ms,
    });

    if args.tables {
        summary["tables"] = serde_json::to_value(orchestrator.transform(&evidence.id)?)?;
    }

    if let (true, Some(upload)) = (args.store, upload) {
        let job_id = orchestrator.schedule(
            JobRequest::new(JobKind::Compress(CompressJob {
                bytes: upload.bytes,
                filename: upload.filename,
                mime_type: upload.mime_type,
            }))
            .with_priority(JobPriority::Low),
        )?;
        let job = orchestrator
            .queue()
            .wait_for(&job_id, Duration::from_millis(100))
            .await
            .context("Storage job disappeared from the queue")?;
        summary["storage"] = match job.output {
            Some(JobOutput::Compress(result)) => json!({
                "url": result.storage_url,
                "originalSize": result.original_size,
                "optimizedSize": result.optimized_size,
                "method": result.method,
            }),
            _ => json!({ "error": job.error }),
        };
    }

    println!("{}", summary);
    Ok(())
}
