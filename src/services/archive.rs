// src/services/archive.rs

//! Archive assembly.
//!
//! ## Container Layout
//!
//! ```text
//! {site}-archive-{stamp}.zip
//! ├── manifest.json         # Every page plus aggregate counts and notice
//! ├── README.md             # Human-readable index
//! └── pages/
//!     └── {path}.md         # Front-matter header + extracted text
//! ```
//!
//! Apart from embedded timestamps, the manifest and page headers depend
//! only on the input pages, so two builds of the same crawl can be
//! compared byte for byte.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Cursor, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::Result;
use crate::models::PageRecord;

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const INDEX_ENTRY: &str = "README.md";
pub const PAGES_DIR: &str = "pages";

/// Fixed notice embedded in every manifest and index.
pub const LEGAL_NOTICE: &str = "This archive contains publicly accessible content copied for \
personal offline reading at the request of the user who started it. All rights remain with \
the original authors. Do not redistribute. Site owners may request removal through the \
takedown form.";

/// Maximum deflate level.
const COMPRESSION_LEVEL: i64 = 9;

/// One page as listed in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPage {
    pub path: String,
    pub title: String,
    pub source_url: String,
    pub crawled_at: DateTime<Utc>,
    pub characters: usize,
    pub sha256: String,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub site_identifier: String,
    pub generated_at: DateTime<Utc>,
    pub page_count: usize,
    pub total_characters: usize,
    pub legal_notice: String,
    pub pages: Vec<ManifestPage>,
}

/// A finished archive.
#[derive(Debug, Clone)]
pub struct ArchiveArtifact {
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub page_count: usize,
    /// Suggested download file name
    pub filename: String,
}

/// Packages extracted pages into a single zip container.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the archive for `pages`.
    ///
    /// Pages sharing a path keep the position of the first and the content
    /// of the last. Any write failure aborts the whole build.
    pub fn build(
        &self,
        pages: &[PageRecord],
        site_identifier: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<ArchiveArtifact> {
        let pages = dedupe_by_path(pages);
        let manifest = Self::manifest(&pages, site_identifier, generated_at);

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(COMPRESSION_LEVEL));

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        writer.start_file(MANIFEST_ENTRY, options)?;
        writer.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

        writer.start_file(INDEX_ENTRY, options)?;
        writer.write_all(Self::index_document(&manifest).as_bytes())?;

        for page in &pages {
            writer.start_file(entry_name(&page.path), options)?;
            writer.write_all(Self::page_document(page, generated_at).as_bytes())?;
        }

        let bytes = writer.finish()?.into_inner();
        log::info!(
            "Built archive for {}: {} pages, {} bytes",
            site_identifier,
            manifest.page_count,
            bytes.len()
        );

        Ok(ArchiveArtifact {
            size_bytes: bytes.len() as u64,
            bytes,
            page_count: manifest.page_count,
            filename: archive_filename(site_identifier, generated_at),
        })
    }

    fn manifest(pages: &[&PageRecord], site_identifier: &str, generated_at: DateTime<Utc>) -> Manifest {
        let entries: Vec<ManifestPage> = pages
            .iter()
            .map(|page| ManifestPage {
                path: entry_name(&page.path),
                title: page.title.clone(),
                source_url: page.source_url.clone(),
                crawled_at: page.crawled_at,
                characters: page.text_content.chars().count(),
                sha256: hex::encode(Sha256::digest(page.text_content.as_bytes())),
            })
            .collect();

        Manifest {
            site_identifier: site_identifier.to_string(),
            generated_at,
            page_count: entries.len(),
            total_characters: entries.iter().map(|p| p.characters).sum(),
            legal_notice: LEGAL_NOTICE.to_string(),
            pages: entries,
        }
    }

    fn index_document(manifest: &Manifest) -> String {
        let mut doc = String::new();
        let _ = writeln!(doc, "# Archive of {}", manifest.site_identifier);
        let _ = writeln!(doc);
        let _ = writeln!(doc, "Generated: {}", timestamp(manifest.generated_at));
        let _ = writeln!(doc, "Pages: {}", manifest.page_count);
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## Contents");
        let _ = writeln!(doc);
        let _ = writeln!(
            doc,
            "- `{MANIFEST_ENTRY}`: machine-readable list of every page with its source URL, \
             crawl time and SHA-256 checksum"
        );
        let _ = writeln!(
            doc,
            "- `{PAGES_DIR}/`: one Markdown file per page, mirroring the site's URL structure"
        );
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## Pages");
        let _ = writeln!(doc);
        for page in &manifest.pages {
            let _ = writeln!(doc, "- [{}]({})", page.title, page.path);
        }
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## Usage");
        let _ = writeln!(doc);
        let _ = writeln!(
            doc,
            "Open any file under `{PAGES_DIR}/` in a text editor or Markdown viewer. Each file \
             starts with a short header naming the page title, the original URL and when it \
             was archived."
        );
        let _ = writeln!(doc);
        let _ = writeln!(doc, "## Notice");
        let _ = writeln!(doc);
        let _ = writeln!(doc, "{LEGAL_NOTICE}");
        doc
    }

    fn page_document(page: &PageRecord, archived_at: DateTime<Utc>) -> String {
        let title = serde_json::to_string(&page.title).unwrap_or_else(|_| "\"\"".to_string());
        format!(
            "---\ntitle: {title}\nsource: {}\narchived: {}\n---\n\n{}\n",
            page.source_url,
            timestamp(archived_at),
            page.text_content
        )
    }
}

fn dedupe_by_path(pages: &[PageRecord]) -> Vec<&PageRecord> {
    let mut order: Vec<&PageRecord> = Vec::with_capacity(pages.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for page in pages {
        match positions.get(page.path.as_str()) {
            Some(&index) => order[index] = page,
            None => {
                positions.insert(page.path.as_str(), order.len());
                order.push(page);
            }
        }
    }
    order
}

fn entry_name(path: &str) -> String {
    format!("{PAGES_DIR}/{path}")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Download file name, e.g. `vault-a-archive-20260101-120000.zip`.
pub fn archive_filename(site_identifier: &str, generated_at: DateTime<Utc>) -> String {
    let site: String = site_identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{site}-archive-{}.zip", generated_at.format("%Y%m%d-%H%M%S"))
}
