use std::io::{self, Write};

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, Row, params};
use tracing::{debug, info};

use crate::cli::SearchArgs;
use crate::db::open_read_only;
use crate::model::{PageHit, PageQuery};
use crate::util::condense_whitespace;

pub(crate) const MATCH_LIMIT: i64 = 50;
pub(crate) const BROWSE_LIMIT: i64 = 20;

const SNIPPET_CHARS: usize = 160;

pub fn run(args: SearchArgs) -> Result<()> {
    let query = PageQuery::new(args.query.as_deref(), args.section.as_deref());
    let connection = open_read_only(&args.db_path)?;
    let hits = search_pages(&connection, &query)?;
    drop(connection);

    info!(
        query = query.query.as_deref().unwrap_or_default(),
        section = query.section.as_deref().unwrap_or_default(),
        returned = hits.len(),
        "search completed"
    );

    if args.json {
        write_json_response(&hits)
    } else {
        write_text_response(&hits)
    }
}

/// Runs the narrowest statement for the given filters. Read only.
///
/// Free text is handed to `MATCH` as written so operators, prefixes and
/// phrases work. Text SQLite rejects as match syntax is retried with every
/// word quoted; text without any word skips the index.
pub(crate) fn search_pages(connection: &Connection, query: &PageQuery) -> Result<Vec<PageHit>> {
    let section = query.section.as_deref();
    let Some(query_text) = query
        .query
        .as_deref()
        .filter(|text| !to_fts_query(text).is_empty())
    else {
        return scan_pages(connection, section);
    };

    let hits = match match_pages(connection, query_text, section) {
        Err(err) if is_match_syntax_error(&err) => {
            debug!(
                query = query_text,
                error = %err,
                "not a valid match expression; matching words literally"
            );
            match_pages(connection, &to_fts_query(query_text), section)
        }
        result => result,
    };

    hits.context("failed to search pages")
}

fn match_pages(
    connection: &Connection,
    match_expression: &str,
    section: Option<&str>,
) -> rusqlite::Result<Vec<PageHit>> {
    match section {
        Some(section) => {
            let mut statement = connection.prepare(
                "
                SELECT p.id, p.page_number, p.section_name, p.page_text
                FROM pdf_pages_fts
                JOIN pdf_pages p ON p.id = pdf_pages_fts.rowid
                WHERE pdf_pages_fts MATCH ?1 AND p.section_name = ?2
                ORDER BY p.page_number
                LIMIT ?3
                ",
            )?;
            statement
                .query_map(params![match_expression, section, MATCH_LIMIT], page_hit_from_row)?
                .collect::<rusqlite::Result<Vec<PageHit>>>()
        }
        None => {
            let mut statement = connection.prepare(
                "
                SELECT p.id, p.page_number, p.section_name, p.page_text
                FROM pdf_pages_fts
                JOIN pdf_pages p ON p.id = pdf_pages_fts.rowid
                WHERE pdf_pages_fts MATCH ?1
                ORDER BY p.page_number
                LIMIT ?2
                ",
            )?;
            statement
                .query_map(params![match_expression, MATCH_LIMIT], page_hit_from_row)?
                .collect::<rusqlite::Result<Vec<PageHit>>>()
        }
    }
}

fn scan_pages(connection: &Connection, section: Option<&str>) -> Result<Vec<PageHit>> {
    let hits = match section {
        Some(section) => {
            let mut statement = connection.prepare(
                "
                SELECT id, page_number, section_name, page_text
                FROM pdf_pages
                WHERE section_name = ?1
                ORDER BY page_number
                LIMIT ?2
                ",
            )?;
            statement
                .query_map(params![section, MATCH_LIMIT], page_hit_from_row)?
                .collect::<rusqlite::Result<Vec<PageHit>>>()
        }
        None => {
            let mut statement = connection.prepare(
                "
                SELECT id, page_number, section_name, page_text
                FROM pdf_pages
                ORDER BY page_number
                LIMIT ?1
                ",
            )?;
            statement
                .query_map(params![BROWSE_LIMIT], page_hit_from_row)?
                .collect::<rusqlite::Result<Vec<PageHit>>>()
        }
    };

    hits.context("failed to list pages")
}

/// SQLite reports malformed match expressions as a generic SQL error.
fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::Unknown
    )
}

pub(crate) fn list_sections(connection: &Connection) -> Result<Vec<String>> {
    let mut statement = connection.prepare(
        "
        SELECT DISTINCT section_name
        FROM pdf_pages
        WHERE section_name IS NOT NULL
        ORDER BY section_name
        ",
    )?;
    let sections = statement
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .context("failed to list sections")?;
    Ok(sections)
}

fn page_hit_from_row(row: &Row<'_>) -> rusqlite::Result<PageHit> {
    Ok(PageHit {
        id: row.get(0)?,
        page_number: row.get(1)?,
        section_name: row.get(2)?,
        page_text: row.get(3)?,
    })
}

/// Quotes every whitespace token so the text is matched literally
/// (implicit AND). Tokens without a letter or digit are dropped.
pub(crate) fn to_fts_query(query_text: &str) -> String {
    query_text
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("\"{token}\""))
        .collect::<Vec<String>>()
        .join(" ")
}

pub(crate) fn snippet(page_text: Option<&str>) -> String {
    let condensed = condense_whitespace(page_text.unwrap_or_default());
    if condensed.chars().count() <= SNIPPET_CHARS {
        return condensed;
    }

    let mut truncated = condensed.chars().take(SNIPPET_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn write_json_response(hits: &[PageHit]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, hits)
        .context("failed to serialize search json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(hits: &[PageHit]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Results: {}", hits.len())?;
    for hit in hits {
        writeln!(
            output,
            "page {}\t{}\tid={}",
            hit.page_number,
            hit.section_name.as_deref().unwrap_or("(no section)"),
            hit.id
        )?;
        writeln!(output, "\t{}", snippet(hit.page_text.as_deref()))?;
    }

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::params;

    use super::*;
    use crate::commands::index::ensure_full_text_index;
    use crate::db::ensure_page_schema;

    fn indexed_db(pages: &[(i64, &str, &str)]) -> Connection {
        let mut connection = Connection::open_in_memory().expect("in-memory db");
        ensure_page_schema(&connection).expect("schema");
        for (page, section, text) in pages {
            connection
                .execute(
                    "INSERT INTO pdf_pages(page_number, page_image, section_name, page_text) VALUES(?1, x'FFD8', ?2, ?3)",
                    params![page, section, text],
                )
                .expect("insert");
        }
        ensure_full_text_index(&mut connection).expect("index");
        connection
    }

    fn book() -> Connection {
        indexed_db(&[
            (3, "Introduction", "Plants grow toward light"),
            (1, "Introduction", "Welcome, let us grow food"),
            (2, "Introduction", "Pick a sunny spot"),
            (4, "Soil", "Roots grow deep in loose soil"),
            (5, "Soil", "Test the pH"),
        ])
    }

    fn pages(hits: &[PageHit]) -> Vec<i64> {
        hits.iter().map(|hit| hit.page_number).collect()
    }

    #[test]
    fn query_and_section_narrows_to_both() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("grow"), Some("Introduction")))
            .expect("search");

        assert_eq!(pages(&hits), vec![1, 3]);
        assert!(hits.iter().all(|hit| hit.section_name.as_deref() == Some("Introduction")));
    }

    #[test]
    fn query_only_matches_across_sections_in_page_order() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("grow"), None)).expect("search");
        assert_eq!(pages(&hits), vec![1, 3, 4]);
        assert_eq!(hits[2].page_text.as_deref(), Some("Roots grow deep in loose soil"));
    }

    #[test]
    fn section_only_scans_base_table() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(None, Some("Soil"))).expect("search");
        assert_eq!(pages(&hits), vec![4, 5]);
    }

    #[test]
    fn no_filters_returns_first_twenty_pages() {
        let rows = (1..=30)
            .rev()
            .map(|page| (page, "Introduction", "filler text"))
            .collect::<Vec<_>>();
        let connection = indexed_db(&rows);

        let hits = search_pages(&connection, &PageQuery::default()).expect("search");
        assert_eq!(pages(&hits), (1..=20).collect::<Vec<i64>>());
    }

    #[test]
    fn matches_are_capped_at_fifty() {
        let rows = (1..=75)
            .map(|page| (page, "Harvest", "grow and harvest"))
            .collect::<Vec<_>>();
        let connection = indexed_db(&rows);

        let by_query =
            search_pages(&connection, &PageQuery::new(Some("harvest"), None)).expect("search");
        let by_section =
            search_pages(&connection, &PageQuery::new(None, Some("Harvest"))).expect("search");

        let by_both = search_pages(&connection, &PageQuery::new(Some("harvest"), Some("Harvest")))
            .expect("search");

        assert_eq!(by_query.len(), 50);
        assert_eq!(by_section.len(), 50);
        assert_eq!(by_both.len(), 50);
        assert_eq!(by_query.last().map(|hit| hit.page_number), Some(50));
        assert_eq!(by_both.last().map(|hit| hit.page_number), Some(50));
    }

    #[test]
    fn blank_parameters_behave_like_missing_ones() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("   "), Some(""))).expect("search");
        assert_eq!(pages(&hits), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn match_operators_prefixes_and_phrases_are_honoured() {
        let connection = book();

        let either = search_pages(&connection, &PageQuery::new(Some("Plants OR Roots"), None))
            .expect("search");
        assert_eq!(pages(&either), vec![3, 4]);

        let prefix =
            search_pages(&connection, &PageQuery::new(Some("gro*"), None)).expect("search");
        assert_eq!(pages(&prefix), vec![1, 3, 4]);

        let phrase = search_pages(&connection, &PageQuery::new(Some("\"loose soil\""), None))
            .expect("search");
        assert_eq!(pages(&phrase), vec![4]);

        let in_section = search_pages(
            &connection,
            &PageQuery::new(Some("Plants OR Roots"), Some("Soil")),
        )
        .expect("search");
        assert_eq!(pages(&in_section), vec![4]);
    }

    #[test]
    fn malformed_match_syntax_is_retried_as_literal_words() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("grow\" (soil"), None))
            .expect("malformed syntax must not fail the search");
        assert_eq!(pages(&hits), vec![4]);

        let hits = search_pages(&connection, &PageQuery::new(Some("roots-grow"), None))
            .expect("malformed syntax must not fail the search");
        assert_eq!(pages(&hits), vec![4]);

        assert_eq!(to_fts_query("  grow   \"deep\" "), "\"grow\" \"deep\"");
        assert_eq!(to_fts_query("\"\""), "");
        assert_eq!(to_fts_query("!!! (soil"), "\"(soil\"");
    }

    #[test]
    fn query_without_words_falls_back_to_section_filter() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("!!!"), Some("Soil")))
            .expect("search");
        assert_eq!(pages(&hits), vec![4, 5]);

        let hits = search_pages(&connection, &PageQuery::new(Some("!!!"), None)).expect("search");
        assert_eq!(pages(&hits), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn query_that_is_only_quotes_falls_back_to_section_filter() {
        let connection = book();
        let hits = search_pages(&connection, &PageQuery::new(Some("\"\""), Some("Soil")))
            .expect("search");
        assert_eq!(pages(&hits), vec![4, 5]);
    }

    #[test]
    fn sections_are_distinct_and_sorted() {
        let connection = book();
        connection
            .execute(
                "INSERT INTO pdf_pages(page_number, image_path, section_name, page_text) VALUES(6, 'p6.jpg', NULL, '')",
                [],
            )
            .expect("insert");
        assert_eq!(
            list_sections(&connection).expect("sections"),
            vec!["Introduction".to_string(), "Soil".to_string()]
        );
    }

    #[test]
    fn snippet_condenses_and_truncates() {
        assert_eq!(snippet(Some("a\n\n b   c")), "a b c");
        assert_eq!(snippet(None), "");
        let long = "word ".repeat(100);
        let cut = snippet(Some(&long));
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
    }
}
