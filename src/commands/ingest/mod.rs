use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::db::{configure_connection, ensure_page_schema, set_metadata};
use crate::model::{DEFAULT_SECTION, ImageStorage, IngestSummary, PageImage, PageRecord};
use crate::util::{ensure_directory, now_utc_string, sha256_file};

mod render;
mod section;
#[cfg(test)]
mod tests;

use render::{PageRenderer, PopplerRenderer, RENDER_DPI};
use section::SectionDetector;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_at = now_utc_string();
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&args.pdf_path));
    let storage = if args.store_as_blob {
        ImageStorage::Blob
    } else {
        ImageStorage::Directory(args.images_folder.clone())
    };

    let renderer = PopplerRenderer::new(&args.pdf_path)?;
    let source_sha256 = sha256_file(&args.pdf_path)?;

    info!(
        pdf = %args.pdf_path.display(),
        db = %db_path.display(),
        image_storage = storage.as_str(),
        "starting ingest"
    );

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_page_schema(&connection)?;

    let detector = SectionDetector::new()?;
    let stats = ingest_pages(
        &mut connection,
        &renderer,
        &detector,
        &storage,
        args.max_pages,
    )?;

    let summary = IngestSummary {
        db_path: db_path.display().to_string(),
        source_pdf: args.pdf_path.display().to_string(),
        source_pdf_sha256: source_sha256,
        image_storage: storage.as_str().to_string(),
        pages_inserted: stats.pages_inserted,
        sections_detected: stats.sections.len(),
        empty_pages: stats.empty_pages,
        started_at,
        finished_at: now_utc_string(),
    };
    record_ingest_metadata(&connection, &summary)?;

    if summary.empty_pages > 0 {
        warn!(
            empty_pages = summary.empty_pages,
            "some pages produced no text; they remain browsable but never match a search"
        );
    }
    info!(
        db = %summary.db_path,
        pages = summary.pages_inserted,
        sections = summary.sections_detected,
        "PDF converted to SQLite database"
    );

    Ok(())
}

#[derive(Debug, Default)]
pub(crate) struct IngestStats {
    pub(crate) pages_inserted: usize,
    pub(crate) empty_pages: usize,
    pub(crate) sections: HashSet<String>,
}

/// Writes one row per page inside a single transaction. Image files created
/// by a run that fails are removed again.
pub(crate) fn ingest_pages(
    connection: &mut Connection,
    renderer: &dyn PageRenderer,
    detector: &SectionDetector,
    storage: &ImageStorage,
    max_pages: Option<usize>,
) -> Result<IngestStats> {
    if let ImageStorage::Directory(folder) = storage {
        ensure_directory(folder)?;
    }

    let mut total = renderer.page_count()?;
    if let Some(max_pages) = max_pages {
        total = total.min(max_pages);
    }

    let tx = connection.transaction()?;
    let mut created_files = Vec::new();
    let result = write_pages(&tx, renderer, detector, storage, total, &mut created_files)
        .and_then(|stats| {
            tx.commit()?;
            Ok(stats)
        });

    if result.is_err() {
        remove_created_files(&created_files);
    }
    result
}

fn write_pages(
    tx: &Connection,
    renderer: &dyn PageRenderer,
    detector: &SectionDetector,
    storage: &ImageStorage,
    total: usize,
    created_files: &mut Vec<PathBuf>,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let mut current_section = DEFAULT_SECTION.to_string();

    for page_number in 1..=total {
        let page_text = renderer.extract_text(page_number)?;
        current_section = detector.next_section(&page_text, &current_section);

        let jpeg = renderer.render_jpeg(page_number, RENDER_DPI)?;
        let image = store_page_image(storage, page_number, jpeg, created_files)?;

        if page_text.trim().is_empty() {
            stats.empty_pages += 1;
        }

        let record = PageRecord {
            page_number: page_number as i64,
            section_name: current_section.clone(),
            page_text,
            image,
        };
        insert_page(tx, &record)?;

        stats.pages_inserted += 1;
        stats.sections.insert(current_section.clone());
        info!(
            page = page_number,
            total,
            section = %current_section,
            "processed page"
        );
    }

    Ok(stats)
}

/// Files that already existed are overwritten but not recorded, so a failed
/// run never deletes images an earlier run still references.
fn store_page_image(
    storage: &ImageStorage,
    page_number: usize,
    jpeg: Vec<u8>,
    created_files: &mut Vec<PathBuf>,
) -> Result<PageImage> {
    match storage {
        ImageStorage::Blob => Ok(PageImage::Blob(jpeg)),
        ImageStorage::Directory(folder) => {
            let path = folder.join(format!("page_{page_number}.jpg"));
            let existed = path.exists();
            fs::write(&path, &jpeg)
                .with_context(|| format!("failed to write page image {}", path.display()))?;
            if !existed {
                created_files.push(path.clone());
            }
            Ok(PageImage::Path(path.display().to_string()))
        }
    }
}

fn remove_created_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove page image of failed run");
        }
    }
    if !paths.is_empty() {
        warn!(removed = paths.len(), "removed page images written by the failed run");
    }
}

pub(crate) fn insert_page(connection: &Connection, record: &PageRecord) -> Result<i64> {
    let (blob, path) = match &record.image {
        PageImage::Blob(bytes) => (Some(bytes.as_slice()), None),
        PageImage::Path(path) => (None, Some(path.as_str())),
    };

    connection
        .execute(
            "
            INSERT INTO pdf_pages(page_number, page_image, image_path, section_name, page_text)
            VALUES(?1, ?2, ?3, ?4, ?5)
            ",
            params![
                record.page_number,
                blob,
                path,
                &record.section_name,
                &record.page_text
            ],
        )
        .with_context(|| format!("failed to insert page {}", record.page_number))?;

    Ok(connection.last_insert_rowid())
}

fn record_ingest_metadata(connection: &Connection, summary: &IngestSummary) -> Result<()> {
    set_metadata(connection, "ingested_at", &summary.finished_at)?;
    set_metadata(connection, "source_pdf", &summary.source_pdf)?;
    set_metadata(connection, "source_pdf_sha256", &summary.source_pdf_sha256)?;
    set_metadata(connection, "page_count", &summary.pages_inserted.to_string())?;
    set_metadata(connection, "image_storage", &summary.image_storage)?;
    Ok(())
}

/// `<pdf stem>.db` in the working directory.
fn default_db_path(pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("pages");
    PathBuf::from(format!("{stem}.db"))
}
