use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{error, info, warn};

use crate::cli::IndexArgs;
use crate::db::{PAGES_FTS_TABLE, PAGES_TABLE, count_rows, set_metadata, table_exists};
use crate::model::{FtsEngine, IndexReport};
use crate::util::{condense_whitespace, now_utc_string};

use super::search::to_fts_query;

const SAMPLE_LIMIT: usize = 5;

pub fn run(args: IndexArgs) -> Result<()> {
    if index_database(&args.db_path, &args.sample_query) {
        info!(
            db = %args.db_path.display(),
            "full-text search is ready; queries use FTS match syntax"
        );
        Ok(())
    } else {
        bail!("failed to add full-text search to {}", args.db_path.display())
    }
}

/// Logs every failure and reports overall success; the connection is
/// dropped on every path.
fn index_database(db_path: &Path, sample_query: &str) -> bool {
    if !db_path.exists() {
        error!(db = %db_path.display(), "database file not found");
        return false;
    }

    let result = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))
        .and_then(|mut connection| {
            let version: String =
                connection.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
            info!(sqlite_version = %version, "inspecting database");

            let report = ensure_full_text_index(&mut connection)?;
            log_sample_matches(&connection, report.engine, sample_query)?;
            Ok(report)
        });

    match result {
        Ok(report) => {
            info!(
                engine = report.engine.as_str(),
                created = report.created,
                backfilled = report.backfilled_rows,
                triggers = %report.triggers.join(","),
                "FTS setup completed"
            );
            true
        }
        Err(err) => {
            error!(error = %err, "FTS setup failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            false
        }
    }
}

/// Tries each engine on the ladder with a throwaway temp table and returns
/// the first one this SQLite build supports.
pub(crate) fn probe_fts_engine(connection: &Connection) -> Result<FtsEngine> {
    probe_fts_engine_from(connection, &FtsEngine::LADDER)
}

fn probe_fts_engine_from(connection: &Connection, ladder: &[FtsEngine]) -> Result<FtsEngine> {
    for engine in ladder {
        let probe = format!(
            "CREATE VIRTUAL TABLE temp.fts_probe USING {}(content); DROP TABLE temp.fts_probe;",
            engine.as_str()
        );
        match connection.execute_batch(&probe) {
            Ok(()) => {
                info!(engine = engine.as_str(), "full-text engine available");
                return Ok(*engine);
            }
            Err(err) => {
                warn!(engine = engine.as_str(), error = %err, "full-text engine unavailable");
            }
        }
    }

    bail!("no full-text search engine (fts5, fts4, fts3) is available in this SQLite build")
}

/// Creates the index on first run (backfilled from existing rows) and
/// installs the sync triggers. Safe to re-run.
pub(crate) fn ensure_full_text_index(connection: &mut Connection) -> Result<IndexReport> {
    let engine = match existing_fts_engine(connection)? {
        Some(engine) => engine,
        None => probe_fts_engine(connection)?,
    };
    ensure_full_text_index_with(connection, engine)
}

pub(crate) fn ensure_full_text_index_with(
    connection: &mut Connection,
    engine: FtsEngine,
) -> Result<IndexReport> {
    if !table_exists(connection, PAGES_TABLE)? {
        bail!("table {PAGES_TABLE} does not exist; run ingest first");
    }

    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let created = !table_exists(&tx, PAGES_FTS_TABLE)?;
    let mut backfilled_rows = 0usize;
    if created {
        info!(engine = engine.as_str(), "creating FTS virtual table");
        tx.execute_batch(create_table_sql(engine))
            .with_context(|| format!("failed to create {PAGES_FTS_TABLE} using {}", engine.as_str()))?;

        info!("populating FTS table from existing pages");
        tx.execute_batch(backfill_sql(engine))
            .context("failed to backfill FTS table")?;
        backfilled_rows = count_rows(&tx, "SELECT COUNT(*) FROM pdf_pages")? as usize;
    } else {
        info!(engine = engine.as_str(), "FTS table already exists; skipping backfill");
    }

    info!("creating triggers to keep FTS table in sync");
    let mut triggers = Vec::new();
    for (name, sql) in trigger_sql(engine) {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to create trigger {name}"))?;
        triggers.push(name.to_string());
    }

    set_metadata(&tx, "fts_engine", engine.as_str())?;
    set_metadata(&tx, "indexed_at", &now_utc_string())?;
    tx.commit()?;

    Ok(IndexReport {
        engine,
        created,
        backfilled_rows,
        triggers,
    })
}

/// Reads the engine of an already-created index back from its DDL.
pub(crate) fn existing_fts_engine(connection: &Connection) -> Result<Option<FtsEngine>> {
    let sql: Option<String> = connection
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [PAGES_FTS_TABLE],
            |row| row.get(0),
        )
        .optional()?;

    let Some(sql) = sql else {
        return Ok(None);
    };

    let lowered = sql.to_ascii_lowercase();
    let module = lowered
        .split("using")
        .nth(1)
        .and_then(|rest| rest.split('(').next())
        .unwrap_or_default();

    match FtsEngine::from_module(module) {
        Some(engine) => Ok(Some(engine)),
        None => bail!("{PAGES_FTS_TABLE} exists but is not a recognized FTS table: {sql}"),
    }
}

/// Number of documents the index itself holds, independent of the
/// external content table.
pub(crate) fn index_entry_count(connection: &Connection, engine: FtsEngine) -> Result<i64> {
    let sql = match engine {
        FtsEngine::Fts5 | FtsEngine::Fts4 => "SELECT COUNT(*) FROM pdf_pages_fts_docsize",
        FtsEngine::Fts3 => "SELECT COUNT(*) FROM pdf_pages_fts_content",
    };
    count_rows(connection, sql)
}

fn create_table_sql(engine: FtsEngine) -> &'static str {
    match engine {
        FtsEngine::Fts5 => {
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS pdf_pages_fts USING fts5(
              page_number,
              section_name,
              page_text,
              content='pdf_pages',
              content_rowid='id'
            );
            "
        }
        FtsEngine::Fts4 => {
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS pdf_pages_fts USING fts4(
              page_number,
              section_name,
              page_text,
              content=\"pdf_pages\"
            );
            "
        }
        FtsEngine::Fts3 => {
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS pdf_pages_fts USING fts3(
              page_number,
              section_name,
              page_text
            );
            "
        }
    }
}

fn backfill_sql(engine: FtsEngine) -> &'static str {
    match engine {
        FtsEngine::Fts5 | FtsEngine::Fts4 => {
            "INSERT INTO pdf_pages_fts(pdf_pages_fts) VALUES('rebuild');"
        }
        FtsEngine::Fts3 => {
            "
            INSERT INTO pdf_pages_fts(docid, page_number, section_name, page_text)
            SELECT id, page_number, section_name, page_text FROM pdf_pages;
            "
        }
    }
}

fn trigger_sql(engine: FtsEngine) -> Vec<(&'static str, &'static str)> {
    match engine {
        FtsEngine::Fts5 => vec![
            (
                "pdf_pages_ai",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_ai AFTER INSERT ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(rowid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
            (
                "pdf_pages_au",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_au AFTER UPDATE ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(pdf_pages_fts, rowid, page_number, section_name, page_text)
                  VALUES ('delete', old.id, old.page_number, old.section_name, old.page_text);
                  INSERT INTO pdf_pages_fts(rowid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
            (
                "pdf_pages_ad",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_ad AFTER DELETE ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(pdf_pages_fts, rowid, page_number, section_name, page_text)
                  VALUES ('delete', old.id, old.page_number, old.section_name, old.page_text);
                END;
                ",
            ),
        ],
        // External-content FTS4 reads the old values from pdf_pages when
        // deleting, so removal has to happen before the base row changes.
        FtsEngine::Fts4 => vec![
            (
                "pdf_pages_bu",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_bu BEFORE UPDATE ON pdf_pages BEGIN
                  DELETE FROM pdf_pages_fts WHERE docid = old.id;
                END;
                ",
            ),
            (
                "pdf_pages_bd",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_bd BEFORE DELETE ON pdf_pages BEGIN
                  DELETE FROM pdf_pages_fts WHERE docid = old.id;
                END;
                ",
            ),
            (
                "pdf_pages_au",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_au AFTER UPDATE ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(docid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
            (
                "pdf_pages_ai",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_ai AFTER INSERT ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(docid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
        ],
        FtsEngine::Fts3 => vec![
            (
                "pdf_pages_ai",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_ai AFTER INSERT ON pdf_pages BEGIN
                  INSERT INTO pdf_pages_fts(docid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
            (
                "pdf_pages_au",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_au AFTER UPDATE ON pdf_pages BEGIN
                  DELETE FROM pdf_pages_fts WHERE docid = old.id;
                  INSERT INTO pdf_pages_fts(docid, page_number, section_name, page_text)
                  VALUES (new.id, new.page_number, new.section_name, new.page_text);
                END;
                ",
            ),
            (
                "pdf_pages_ad",
                "
                CREATE TRIGGER IF NOT EXISTS pdf_pages_ad AFTER DELETE ON pdf_pages BEGIN
                  DELETE FROM pdf_pages_fts WHERE docid = old.id;
                END;
                ",
            ),
        ],
    }
}

fn log_sample_matches(connection: &Connection, engine: FtsEngine, sample_query: &str) -> Result<()> {
    let fts_query = to_fts_query(sample_query);
    if fts_query.is_empty() {
        return Ok(());
    }

    let snippet = match engine {
        FtsEngine::Fts5 => "snippet(pdf_pages_fts, 2, '<b>', '</b>', '...', 20)",
        FtsEngine::Fts4 | FtsEngine::Fts3 => "snippet(pdf_pages_fts, '<b>', '</b>', '...', 2, 20)",
    };
    let sql = format!(
        "
        SELECT p.page_number, COALESCE(p.section_name, ''), COALESCE({snippet}, '')
        FROM pdf_pages_fts
        JOIN pdf_pages p ON p.id = pdf_pages_fts.rowid
        WHERE pdf_pages_fts MATCH ?1
        ORDER BY p.page_number
        LIMIT {SAMPLE_LIMIT}
        "
    );

    let mut statement = connection.prepare(&sql)?;
    let matches = statement
        .query_map([&fts_query], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<(i64, String, String)>>>()?;

    if matches.is_empty() {
        info!(query = sample_query, "no matches found for the sample query");
        return Ok(());
    }

    info!(query = sample_query, shown = matches.len(), "sample query matches");
    for (page, section, snippet) in matches {
        info!(page, section = %section, snippet = %condense_whitespace(&snippet), "match");
    }
    Ok(())
}
