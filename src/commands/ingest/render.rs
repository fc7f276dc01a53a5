use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::warn;

pub(crate) const RENDER_DPI: u32 = 300;

/// Per-page access to a source document.
pub(crate) trait PageRenderer {
    fn page_count(&self) -> Result<usize>;

    /// Plain text of a 1-based page, possibly empty.
    fn extract_text(&self, page_number: usize) -> Result<String>;

    /// JPEG rendering of a 1-based page.
    fn render_jpeg(&self, page_number: usize, dpi: u32) -> Result<Vec<u8>>;
}

/// Renderer backed by the poppler command line tools.
pub(crate) struct PopplerRenderer {
    pdf_path: PathBuf,
}

impl PopplerRenderer {
    pub(crate) fn new(pdf_path: &Path) -> Result<Self> {
        if !pdf_path.is_file() {
            bail!("PDF file not found: {}", pdf_path.display());
        }

        Ok(Self {
            pdf_path: pdf_path.to_path_buf(),
        })
    }
}

impl PageRenderer for PopplerRenderer {
    fn page_count(&self) -> Result<usize> {
        let output = Command::new("pdfinfo")
            .arg(&self.pdf_path)
            .output()
            .with_context(|| format!("failed to execute pdfinfo for {}", self.pdf_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdfinfo returned non-zero exit status for {}: {}",
                self.pdf_path.display(),
                stderr.trim()
            );
        }

        parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).with_context(|| {
            format!("pdfinfo did not report a page count for {}", self.pdf_path.display())
        })
    }

    fn extract_text(&self, page_number: usize) -> Result<String> {
        let output = Command::new("pdftotext")
            .arg("-enc")
            .arg("UTF-8")
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg(&self.pdf_path)
            .arg("-")
            .output()
            .with_context(|| {
                format!("failed to execute pdftotext for {}", self.pdf_path.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftotext returned non-zero exit status for {} page {}: {}",
                self.pdf_path.display(),
                page_number,
                stderr.trim()
            );
        }

        Ok(clean_page_text(&String::from_utf8_lossy(&output.stdout)))
    }

    fn render_jpeg(&self, page_number: usize, dpi: u32) -> Result<Vec<u8>> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let output_root = std::env::temp_dir().join(format!(
            "pagesearch_render_{}_{}_{}",
            std::process::id(),
            page_number,
            stamp
        ));
        let jpeg_path = PathBuf::from(format!("{}.jpg", output_root.display()));

        let output = Command::new("pdftoppm")
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-singlefile")
            .arg("-jpeg")
            .arg(&self.pdf_path)
            .arg(&output_root)
            .output()
            .with_context(|| {
                format!("failed to execute pdftoppm for {}", self.pdf_path.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftoppm returned non-zero exit status for {} page {}: {}",
                self.pdf_path.display(),
                page_number,
                stderr.trim()
            );
        }

        take_rendered_file(&jpeg_path).with_context(|| {
            format!(
                "pdftoppm did not produce expected image for {} page {}",
                self.pdf_path.display(),
                page_number
            )
        })
    }
}

/// Reads a rendered image and removes it whether or not the read worked.
fn take_rendered_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let bytes = fs::read(path);
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => {
            warn!(path = %path.display(), error = %err, "failed to remove rendered page image");
        }
        _ => {}
    }
    bytes
}

fn parse_pdfinfo_pages(info: &str) -> Option<usize> {
    info.lines()
        .filter_map(|line| line.strip_prefix("Pages:"))
        .find_map(|value| value.trim().parse::<usize>().ok())
}

/// pdftotext terminates every page with a form feed.
fn clean_page_text(raw: &str) -> String {
    raw.replace('\u{0000}', "")
        .trim_end_matches(['\u{000C}', '\n'])
        .to_string()
}
