use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "1.0.0";
pub const PAGES_TABLE: &str = "pdf_pages";
pub const PAGES_FTS_TABLE: &str = "pdf_pages_fts";

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

/// Opens an existing database for the query path. Never creates the file.
pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        bail!("database file not found: {}", db_path.display());
    }

    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {} read-only", db_path.display()))
}

pub fn ensure_page_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pdf_pages (
              id INTEGER PRIMARY KEY,
              page_number INTEGER NOT NULL,
              page_image BLOB,
              image_path TEXT,
              section_name TEXT,
              page_text TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_pdf_pages_section_page
              ON pdf_pages(section_name, page_number);
            ",
        )
        .context("failed to initialize pdf_pages schema")?;

    set_metadata(connection, "db_schema_version", DB_SCHEMA_VERSION)?;
    set_metadata(connection, "db_updated_at", &now_utc_string())?;
    Ok(())
}

pub fn set_metadata(connection: &Connection, key: &str, value: &str) -> Result<()> {
    connection
        .execute(
            "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("failed to initialize metadata table")?;
    connection
        .execute(
            "INSERT INTO metadata(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [key, value],
        )
        .with_context(|| format!("failed to write metadata key {key}"))?;
    Ok(())
}

pub fn read_metadata(connection: &Connection) -> Result<Vec<(String, String)>> {
    if !table_exists(connection, "metadata")? {
        return Ok(Vec::new());
    }

    let mut statement = connection.prepare("SELECT key, value FROM metadata ORDER BY key")?;
    let rows = statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
    Ok(rows)
}

pub fn table_exists(connection: &Connection, name: &str) -> Result<bool> {
    let found = connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .with_context(|| format!("failed to inspect schema for {name}"))?;
    Ok(found.is_some())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
