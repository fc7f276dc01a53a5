use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SECTION: &str = "Introduction";

/// Where an ingestion run puts rendered page images. One mode per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStorage {
    Blob,
    Directory(PathBuf),
}

impl ImageStorage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Directory(_) => "directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageImage {
    Blob(Vec<u8>),
    Path(String),
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub page_number: i64,
    pub section_name: String,
    pub page_text: String,
    pub image: PageImage,
}

/// One search result row: `(id, page_number, section_name, page_text)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHit {
    pub id: i64,
    pub page_number: i64,
    pub section_name: Option<String>,
    pub page_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub query: Option<String>,
    pub section: Option<String>,
}

impl PageQuery {
    /// Blank strings are treated the same as a missing parameter.
    pub fn new(query: Option<&str>, section: Option<&str>) -> Self {
        Self {
            query: non_blank(query),
            section: non_blank(section),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FtsEngine {
    Fts5,
    Fts4,
    Fts3,
}

impl FtsEngine {
    /// Most capable first.
    pub const LADDER: [FtsEngine; 3] = [FtsEngine::Fts5, FtsEngine::Fts4, FtsEngine::Fts3];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fts5 => "fts5",
            Self::Fts4 => "fts4",
            Self::Fts3 => "fts3",
        }
    }

    pub fn from_module(module: &str) -> Option<Self> {
        match module.trim().to_ascii_lowercase().as_str() {
            "fts5" => Some(Self::Fts5),
            "fts4" => Some(Self::Fts4),
            "fts3" => Some(Self::Fts3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub db_path: String,
    pub source_pdf: String,
    pub source_pdf_sha256: String,
    pub image_storage: String,
    pub pages_inserted: usize,
    pub sections_detected: usize,
    pub empty_pages: usize,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub engine: FtsEngine,
    pub created: bool,
    pub backfilled_rows: usize,
    pub triggers: Vec<String>,
}
