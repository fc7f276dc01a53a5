use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::index::{existing_fts_engine, index_entry_count};
use crate::db::{PAGES_TABLE, count_rows, open_read_only, read_metadata, table_exists};

pub fn run(args: StatusArgs) -> Result<()> {
    info!(db = %args.db_path.display(), "status requested");

    if !args.db_path.exists() {
        warn!(path = %args.db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = open_read_only(&args.db_path)?;
    report(&connection)
}

fn report(connection: &Connection) -> Result<()> {
    for (key, value) in read_metadata(connection)? {
        info!(key = %key, value = %value, "metadata");
    }

    if !table_exists(connection, PAGES_TABLE)? {
        warn!("pdf_pages table missing; run ingest first");
        return Ok(());
    }

    let pages = count_rows(connection, "SELECT COUNT(*) FROM pdf_pages")?;
    let sections = count_rows(
        connection,
        "SELECT COUNT(DISTINCT section_name) FROM pdf_pages WHERE section_name IS NOT NULL",
    )?;
    let inline_images = count_rows(
        connection,
        "SELECT COUNT(*) FROM pdf_pages WHERE page_image IS NOT NULL",
    )?;
    let file_images = count_rows(
        connection,
        "SELECT COUNT(*) FROM pdf_pages WHERE image_path IS NOT NULL",
    )?;
    info!(pages, sections, inline_images, file_images, "page store");

    let Some(engine) = existing_fts_engine(connection)? else {
        warn!("full-text index missing; run index to enable text search");
        return Ok(());
    };

    let entries = index_entry_count(connection, engine)?;
    let triggers = count_rows(
        connection,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND tbl_name = 'pdf_pages'",
    )?;
    info!(engine = engine.as_str(), entries, triggers, "full-text index");

    if entries != pages {
        warn!(entries, pages, "full-text index is out of sync with pdf_pages");
    }

    Ok(())
}
