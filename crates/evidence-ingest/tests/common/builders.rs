//! Builders for test configurations and fixture documents.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use evidence_ingest::config::IngestConfig;
use lopdf::{dictionary, Document, Object, Stream};

/// Fluent builder over [`IngestConfig`] with test-friendly defaults: fast
/// queue ticks, a short job timeout and no sparse-PDF OCR.
pub struct ConfigBuilder {
    config: IngestConfig,
}

impl ConfigBuilder {
    pub fn new(storage_root: &Path) -> Self {
        let mut config = IngestConfig::default();
        config.storage.root_directory = storage_root.to_path_buf();
        config.queue.tick_interval_ms = 20;
        config.queue.default_timeout_secs = 10;
        config.extraction.sparse_text_threshold = 0;
        config.ocr.batch_concurrency = 2;
        Self { config }
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.security.max_file_size_bytes = bytes;
        self
    }

    pub fn daily_cost_cap(mut self, cap: f64) -> Self {
        self.config.queue.daily_cost_cap = cap;
        self
    }

    pub fn concurrency(mut self, global: usize, ocr: usize) -> Self {
        self.config.queue.global_concurrency = global;
        self.config.queue.ocr_concurrency = ocr;
        self
    }

    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.config.transform.quality_threshold = threshold;
        self
    }

    pub fn build(self) -> IngestConfig {
        self.config
    }
}

/// The two-column CSV used throughout the ingestion tests.
pub fn sample_csv() -> Vec<u8> {
    b"name,amount\nFoo,100\nBar,200".to_vec()
}

/// A solid PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([240, 240, 240]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    out
}

/// A one-page PDF whose content stream draws `text` in Courier.
pub fn text_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::from(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to write PDF");
    bytes
}
