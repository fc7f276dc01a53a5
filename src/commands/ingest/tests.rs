use std::cell::Cell;

use anyhow::bail;

use super::*;

struct FakeRenderer {
    pages: Vec<&'static str>,
    renders: Cell<usize>,
}

impl FakeRenderer {
    fn new(pages: Vec<&'static str>) -> Self {
        Self {
            pages,
            renders: Cell::new(0),
        }
    }
}

impl PageRenderer for FakeRenderer {
    fn page_count(&self) -> Result<usize> {
        Ok(self.pages.len())
    }

    fn extract_text(&self, page_number: usize) -> Result<String> {
        match self.pages.get(page_number - 1) {
            Some(text) => Ok(text.to_string()),
            None => bail!("page {page_number} out of range"),
        }
    }

    fn render_jpeg(&self, page_number: usize, dpi: u32) -> Result<Vec<u8>> {
        assert_eq!(dpi, RENDER_DPI);
        self.renders.set(self.renders.get() + 1);
        Ok(format!("jpeg-{page_number}").into_bytes())
    }
}

fn book() -> FakeRenderer {
    FakeRenderer::new(vec![
        "Welcome to the garden",
        "Chapter 1: Soil\nLoam drains well",
        "Compost feeds the soil",
        "",
        "2. Watering Basics\nDeep and infrequent",
    ])
}

fn memory_db() -> Connection {
    let connection = Connection::open_in_memory().expect("in-memory db");
    ensure_page_schema(&connection).expect("schema");
    connection
}

fn stored_rows(connection: &Connection) -> Vec<(i64, String, Option<Vec<u8>>, Option<String>)> {
    let mut statement = connection
        .prepare(
            "SELECT page_number, section_name, page_image, image_path FROM pdf_pages ORDER BY page_number",
        )
        .expect("prepare");
    statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .expect("query")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("rows")
}

#[test]
fn sections_propagate_across_pages() {
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");

    let stats = ingest_pages(
        &mut connection,
        &book(),
        &detector,
        &ImageStorage::Blob,
        None,
    )
    .expect("ingest");

    let sections = stored_rows(&connection)
        .into_iter()
        .map(|(page, section, _, _)| (page, section))
        .collect::<Vec<_>>();
    assert_eq!(
        sections,
        vec![
            (1, "Introduction".to_string()),
            (2, "Soil".to_string()),
            (3, "Soil".to_string()),
            (4, "Soil".to_string()),
            (5, "2. Watering Basics".to_string()),
        ]
    );
    assert_eq!(stats.pages_inserted, 5);
    assert_eq!(stats.empty_pages, 1);
    assert_eq!(stats.sections.len(), 3);
}

#[test]
fn blob_mode_stores_only_inline_images() {
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");

    ingest_pages(&mut connection, &book(), &detector, &ImageStorage::Blob, None)
        .expect("ingest");

    for (page, _, blob, path) in stored_rows(&connection) {
        assert_eq!(blob, Some(format!("jpeg-{page}").into_bytes()));
        assert_eq!(path, None);
    }
}

#[test]
fn directory_mode_writes_files_and_stores_only_paths() {
    let folder = tempfile::tempdir().expect("tempdir");
    let images = folder.path().join("page_images");
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");

    ingest_pages(
        &mut connection,
        &book(),
        &detector,
        &ImageStorage::Directory(images.clone()),
        None,
    )
    .expect("ingest");

    for (page, _, blob, path) in stored_rows(&connection) {
        assert_eq!(blob, None);
        let path = path.expect("image path stored");
        assert_eq!(PathBuf::from(&path), images.join(format!("page_{page}.jpg")));
        assert_eq!(
            fs::read(&path).expect("image written"),
            format!("jpeg-{page}").into_bytes()
        );
    }
}

#[test]
fn max_pages_limits_the_run() {
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");
    let renderer = book();

    let stats = ingest_pages(
        &mut connection,
        &renderer,
        &detector,
        &ImageStorage::Blob,
        Some(2),
    )
    .expect("ingest");

    assert_eq!(stats.pages_inserted, 2);
    assert_eq!(renderer.renders.get(), 2);
    assert_eq!(stored_rows(&connection).len(), 2);
}

/// Fails on the third page.
struct BrokenRenderer;

impl PageRenderer for BrokenRenderer {
    fn page_count(&self) -> Result<usize> {
        Ok(3)
    }

    fn extract_text(&self, page_number: usize) -> Result<String> {
        if page_number == 3 {
            bail!("corrupt page stream");
        }
        Ok(format!("page {page_number}"))
    }

    fn render_jpeg(&self, _page_number: usize, _dpi: u32) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8])
    }
}

#[test]
fn failed_page_rolls_back_the_whole_run() {
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");

    let result = ingest_pages(
        &mut connection,
        &BrokenRenderer,
        &detector,
        &ImageStorage::Blob,
        None,
    );

    assert!(result.is_err());
    assert!(stored_rows(&connection).is_empty());
}

#[test]
fn failed_run_removes_only_the_images_it_created() {
    let folder = tempfile::tempdir().expect("tempdir");
    let earlier = folder.path().join("page_1.jpg");
    fs::write(&earlier, b"earlier run").expect("write earlier image");
    let mut connection = memory_db();
    let detector = SectionDetector::new().expect("detector");

    let result = ingest_pages(
        &mut connection,
        &BrokenRenderer,
        &detector,
        &ImageStorage::Directory(folder.path().to_path_buf()),
        None,
    );

    assert!(result.is_err());
    assert!(stored_rows(&connection).is_empty());
    assert!(earlier.exists());
    assert!(!folder.path().join("page_2.jpg").exists());
}

#[test]
fn default_db_path_uses_pdf_stem() {
    assert_eq!(
        default_db_path(Path::new("/books/Grow Veggies 2025.pdf")),
        PathBuf::from("Grow Veggies 2025.db")
    );
}
