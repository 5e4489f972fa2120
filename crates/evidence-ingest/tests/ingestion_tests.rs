//! End-to-end ingestion tests: scan, extract, persist, transform and
//! reprocess through the orchestrator.

mod common;

use common::{png, sample_csv, text_pdf, TestHarness};

use evidence_ingest::extract::CellValue;
use evidence_ingest::transform::FootnoteType;
use evidence_ingest::{
    EvidenceSource, EvidenceStatus, EvidenceType, IngestError, ProcessingError, ReprocessInput,
};

#[tokio::test]
async fn test_csv_upload_is_extracted_and_persisted() {
    let harness = TestHarness::new();

    let evidence = harness
        .upload(sample_csv(), "figures.csv", "text/csv")
        .await
        .unwrap();

    assert_eq!(evidence.status, EvidenceStatus::Completed);
    assert_eq!(evidence.evidence_type, EvidenceType::Csv);
    assert_eq!(evidence.source, EvidenceSource::Upload);
    assert_eq!(evidence.size_bytes, sample_csv().len() as u64);
    assert_eq!(evidence.metadata.checksum.len(), 64);
    assert!(evidence.security_scan.as_ref().unwrap().is_safe);

    let content = evidence.content.as_ref().unwrap();
    assert_eq!(content.tables.len(), 1);
    let table = &content.tables[0];
    assert_eq!(table.headers, vec!["name", "amount"]);
    assert_eq!(
        table.rows,
        vec![
            vec![CellValue::from("Foo"), CellValue::from(100.0)],
            vec![CellValue::from("Bar"), CellValue::from(200.0)],
        ]
    );

    let stored = harness.orchestrator.get(&evidence.id).unwrap();
    assert_eq!(stored.status, EvidenceStatus::Completed);
    assert_eq!(stored.metadata, evidence.metadata);
    assert_eq!(stored.content, evidence.content);
    assert_eq!(harness.count(EvidenceStatus::Completed), 1);

    harness.shutdown().await;
}

/// A submission that must be rejected before anything is recorded.
struct RejectionCase {
    name: &'static str,
    filename: &'static str,
    mime_type: &'static str,
    bytes: &'static [u8],
    /// Security findings rather than validation problems.
    security: bool,
    reason_contains: &'static str,
}

const REJECTION_CASES: &[RejectionCase] = &[
    RejectionCase {
        name: "blocked_extension",
        filename: "setup.exe",
        mime_type: "text/plain",
        bytes: b"not really a program",
        security: false,
        reason_contains: "'.exe' is not permitted",
    },
    RejectionCase {
        name: "disallowed_mime",
        filename: "bundle.zip",
        mime_type: "application/zip",
        bytes: b"PK\x03\x04rest-of-archive",
        security: false,
        reason_contains: "'application/zip' is not allowed",
    },
    RejectionCase {
        name: "oversized_upload",
        filename: "large.txt",
        mime_type: "text/plain",
        bytes: &[b'a'; 2048],
        security: false,
        reason_contains: "exceeds limit of 1024 bytes",
    },
    RejectionCase {
        name: "signature_mismatch",
        filename: "report.pdf",
        mime_type: "application/pdf",
        bytes: b"this is not a pdf",
        security: true,
        reason_contains: "does not match declared type 'application/pdf'",
    },
    RejectionCase {
        name: "script_injection",
        filename: "notes.txt",
        mime_type: "text/plain",
        bytes: b"Quarterly notes <script>fetch('//evil')</script>",
        security: true,
        reason_contains: "script-tag",
    },
];

#[tokio::test]
async fn test_rejected_uploads_are_not_recorded() {
    let harness = TestHarness::with_config(|c| c.max_file_size(1024));

    for case in REJECTION_CASES {
        let err = harness
            .upload(case.bytes.to_vec(), case.filename, case.mime_type)
            .await
            .expect_err(case.name);

        let reasons = match (&err, case.security) {
            (IngestError::Security { reasons }, true) => reasons,
            (IngestError::Validation { reasons }, false) => reasons,
            (other, _) => panic!("{}: unexpected error {:?}", case.name, other),
        };
        assert!(
            reasons.iter().any(|r| r.contains(case.reason_contains)),
            "{}: reasons {:?} do not mention '{}'",
            case.name,
            reasons,
            case.reason_contains
        );
    }

    assert_eq!(harness.total_records(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_extraction_failure_is_recorded_then_returned() {
    let harness = TestHarness::new();

    let err = harness
        .upload(b"name,amount\n\xff\xfe,1".to_vec(), "broken.csv", "text/csv")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Processing(ProcessingError::Csv(_))));

    let failed = harness.ids_with_status(EvidenceStatus::Failed);
    assert_eq!(failed.len(), 1);
    let record = harness.orchestrator.get(&failed[0]).unwrap();
    assert_eq!(record.evidence_type, EvidenceType::Csv);
    assert!(record.content.is_none());
    assert!(record.error.as_deref().unwrap().contains("UTF-8"));
    assert!(record.security_scan.is_some());
    assert!(!record.metadata.checksum.is_empty());
    assert_eq!(harness.count(EvidenceStatus::Pending), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_pdf_upload_reads_native_text() {
    let harness = TestHarness::new();
    let pdf = text_pdf("Market size reached 300 million yen in 2024");

    let evidence = harness
        .upload(pdf, "market.pdf", "application/pdf")
        .await
        .unwrap();

    assert_eq!(evidence.evidence_type, EvidenceType::Pdf);
    assert_eq!(evidence.metadata.page_count, Some(1));
    assert!(evidence.metadata.confidence.is_none());
    let content = evidence.content.as_ref().unwrap();
    assert!(content.text.contains("300 million yen"));
    assert!(content.ocr.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_image_upload_carries_ocr_metadata() {
    let harness = TestHarness::with_ocr("市場規模は約300億円", 72.0);

    let evidence = harness
        .upload(png(40, 20), "scan.png", "image/png")
        .await
        .unwrap();

    assert_eq!(evidence.evidence_type, EvidenceType::Image);
    assert_eq!(evidence.metadata.confidence, Some(72.0));
    assert_eq!(evidence.metadata.language.as_deref(), Some("ja"));
    let content = evidence.content.as_ref().unwrap();
    assert_eq!(content.images.len(), 1);
    assert_eq!(content.images[0].width, Some(40));
    assert!((evidence.quality_score() - 0.72).abs() < 1e-6);

    harness.shutdown().await;
}

/// OCR confidence against the default 0.8 quality threshold.
struct QualityCase {
    confidence: f32,
    expect_caveat: bool,
}

const QUALITY_CASES: &[QualityCase] = &[
    QualityCase { confidence: 40.0, expect_caveat: true },
    QualityCase { confidence: 79.0, expect_caveat: true },
    QualityCase { confidence: 80.0, expect_caveat: false },
    QualityCase { confidence: 96.0, expect_caveat: false },
];

#[tokio::test]
async fn test_low_quality_tables_carry_a_caveat() {
    for case in QUALITY_CASES {
        let harness = TestHarness::with_ocr("売上高は3億円、市場シェアは12%", case.confidence);
        let evidence = harness
            .upload(png(30, 30), "table.png", "image/png")
            .await
            .unwrap();

        let tables = harness.orchestrator.transform(&evidence.id).unwrap();
        assert!(!tables.is_empty(), "confidence {}", case.confidence);

        for table in &tables {
            let caveats: Vec<_> = table.caveats().collect();
            assert_eq!(
                !caveats.is_empty(),
                case.expect_caveat,
                "confidence {} table '{}'",
                case.confidence,
                table.title
            );
            if case.expect_caveat {
                assert_eq!(caveats.len(), 1);
                assert_eq!(caveats[0].footnote_type, FootnoteType::Caveat);
                assert!(caveats[0]
                    .text
                    .contains(&format!("{:.0}%", case.confidence)));
            }
        }
        harness.shutdown().await;
    }
}

#[tokio::test]
async fn test_transform_cites_the_uploaded_file() {
    let harness = TestHarness::new();
    let evidence = harness
        .upload(sample_csv(), "figures.csv", "text/csv")
        .await
        .unwrap();

    let tables = harness.orchestrator.transform(&evidence.id).unwrap();
    let enhanced = tables
        .iter()
        .find(|t| t.headers == vec!["name", "amount"])
        .expect("enhanced CSV table");
    assert_eq!(enhanced.quality_score, 1.0);
    assert_eq!(enhanced.caveats().count(), 0);
    assert!(enhanced
        .footnotes
        .iter()
        .any(|f| f.footnote_type == FootnoteType::Citation
            && f.source.as_deref() == Some("figures.csv")));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transform_requires_completed_evidence() {
    let harness = TestHarness::new();
    let _ = harness
        .upload(b"a,b\n\xff,1".to_vec(), "broken.csv", "text/csv")
        .await;
    let failed = harness.ids_with_status(EvidenceStatus::Failed);

    let err = harness.orchestrator.transform(&failed[0]).unwrap_err();
    assert!(matches!(err, IngestError::Validation { .. }));

    let err = harness.orchestrator.transform("missing").unwrap_err();
    assert!(matches!(err, IngestError::NotFound(id) if id == "missing"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_reprocess_links_attempts() {
    let harness = TestHarness::new();
    let first = harness
        .upload(b"a,b\n\xff,1".to_vec(), "figures.csv", "text/csv")
        .await;
    assert!(first.is_err());
    let first_id = harness.ids_with_status(EvidenceStatus::Failed).remove(0);

    let second = harness
        .orchestrator
        .reprocess(&first_id, ReprocessInput::Bytes(sample_csv()))
        .await
        .unwrap();

    assert_ne!(second.id, first_id);
    assert_eq!(second.previous_attempt_id.as_deref(), Some(first_id.as_str()));
    assert_eq!(second.status, EvidenceStatus::Completed);
    assert_eq!(second.original_filename, "figures.csv");

    // The earlier attempt keeps its terminal status.
    let original = harness.orchestrator.get(&first_id).unwrap();
    assert_eq!(original.status, EvidenceStatus::Failed);

    let attempts = harness.orchestrator.attempts(&first_id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].id, second.id);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_reprocess_upload_without_bytes_is_rejected() {
    let harness = TestHarness::new();
    let evidence = harness
        .upload(sample_csv(), "figures.csv", "text/csv")
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .reprocess(&evidence.id, ReprocessInput::Refetch)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Validation { .. }));

    let err = harness
        .orchestrator
        .reprocess("missing", ReprocessInput::Refetch)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
    assert_eq!(harness.total_records(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unfetchable_url_is_recorded_as_failed() {
    let harness = TestHarness::new();

    let err = harness
        .orchestrator
        .submit_url("ftp://example.com/report.html")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Processing(ProcessingError::Fetch { .. })
    ));

    let failed = harness.ids_with_status(EvidenceStatus::Failed);
    assert_eq!(failed.len(), 1);
    let record = harness.orchestrator.get(&failed[0]).unwrap();
    assert_eq!(record.source, EvidenceSource::UrlFetch);
    assert_eq!(record.evidence_type, EvidenceType::Url);
    assert_eq!(
        record.source_url.as_deref(),
        Some("ftp://example.com/report.html")
    );
    assert!(record.error.unwrap().contains("unsupported scheme"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_evidence() {
    let harness = TestHarness::new();
    let evidence = harness
        .upload(sample_csv(), "figures.csv", "text/csv")
        .await
        .unwrap();

    harness.orchestrator.delete(&evidence.id).unwrap();
    assert!(matches!(
        harness.orchestrator.get(&evidence.id),
        Err(IngestError::NotFound(_))
    ));
    assert!(matches!(
        harness.orchestrator.delete(&evidence.id),
        Err(IngestError::NotFound(_))
    ));
    assert_eq!(harness.total_records(), 0);

    harness.shutdown().await;
}
