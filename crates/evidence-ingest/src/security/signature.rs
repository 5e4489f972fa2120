//! Magic-number verification for declared MIME types.

/// A known file signature and the MIME types it may legitimately carry.
#[derive(Debug, Clone, Copy)]
pub struct FileSignature {
    pub name: &'static str,
    pub magic: &'static [u8],
    pub mime_types: &'static [&'static str],
}

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLS_MIME: &str = "application/vnd.ms-excel";

pub const SIGNATURES: &[FileSignature] = &[
    FileSignature {
        name: "pdf",
        magic: &[0x25, 0x50, 0x44, 0x46],
        mime_types: &["application/pdf"],
    },
    FileSignature {
        name: "png",
        magic: &[0x89, 0x50, 0x4E, 0x47],
        mime_types: &["image/png"],
    },
    FileSignature {
        name: "jpeg",
        magic: &[0xFF, 0xD8, 0xFF],
        mime_types: &["image/jpeg"],
    },
    FileSignature {
        name: "zip",
        magic: &[0x50, 0x4B, 0x03, 0x04],
        mime_types: &[XLSX_MIME, "application/zip"],
    },
    FileSignature {
        name: "ole2",
        magic: &[0xD0, 0xCF, 0x11, 0xE0],
        mime_types: &[XLS_MIME],
    },
    FileSignature {
        name: "gif",
        magic: b"GIF8",
        mime_types: &["image/gif"],
    },
    FileSignature {
        name: "riff",
        magic: b"RIFF",
        mime_types: &["image/webp"],
    },
    FileSignature {
        name: "utf8-bom",
        magic: &[0xEF, 0xBB, 0xBF],
        mime_types: &["text/csv", "text/plain", "text/html"],
    },
];

/// Lowercases, drops parameters and folds common aliases.
pub fn normalize_mime(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "application/csv" | "text/comma-separated-values" => "text/csv".to_string(),
        "application/x-pdf" => "application/pdf".to_string(),
        _ => base,
    }
}

/// Text formats carry no reliable magic number.
pub fn is_signature_exempt(mime: &str) -> bool {
    normalize_mime(mime).starts_with("text/")
}

pub fn detect(bytes: &[u8]) -> Option<&'static FileSignature> {
    SIGNATURES.iter().find(|sig| bytes.starts_with(sig.magic))
}

fn expects_signature(mime: &str) -> bool {
    SIGNATURES
        .iter()
        .filter(|sig| sig.name != "utf8-bom")
        .any(|sig| sig.mime_types.contains(&mime))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureCheck {
    pub valid: bool,
    pub detected: Option<&'static str>,
}

/// Checks the leading bytes against the declared MIME type.
///
/// MIME types without a registered signature pass; the allowlist decides
/// whether they are accepted at all.
pub fn verify(bytes: &[u8], declared_mime: &str) -> SignatureCheck {
    let mime = normalize_mime(declared_mime);
    let detected = detect(bytes);
    let detected_name = detected.map(|sig| sig.name);

    if is_signature_exempt(&mime) || !expects_signature(&mime) {
        return SignatureCheck {
            valid: true,
            detected: detected_name,
        };
    }

    let valid = detected
        .map(|sig| sig.mime_types.contains(&mime.as_str()))
        .unwrap_or(false);

    SignatureCheck {
        valid,
        detected: detected_name,
    }
}
