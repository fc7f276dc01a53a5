use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_DB_FILENAME: &str = "textbook.db";

#[derive(Parser, Debug)]
#[command(
    name = "pagesearch",
    version,
    about = "PDF textbook page store with full-text search and a web UI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a PDF into a page-per-row SQLite database
    Ingest(IngestArgs),
    /// Add the full-text search table and its sync triggers
    Index(IndexArgs),
    /// Search pages from the command line
    Search(SearchArgs),
    /// Run the web UI
    Serve(ServeArgs),
    /// Summarize an ingested database
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    pub pdf_path: PathBuf,

    /// Output database, defaults to `<pdf stem>.db`
    #[arg(long, visible_alias = "db_path")]
    pub db_path: Option<PathBuf>,

    #[arg(long, visible_alias = "images_folder", default_value = "page_images")]
    pub images_folder: PathBuf,

    /// Store page images inline instead of writing them to the images folder
    #[arg(long, visible_alias = "store_as_blob", default_value_t = false)]
    pub store_as_blob: bool,

    #[arg(long)]
    pub max_pages: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(default_value = DEFAULT_DB_FILENAME)]
    pub db_path: PathBuf,

    #[arg(long, default_value = "grow")]
    pub sample_query: String,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = DEFAULT_DB_FILENAME)]
    pub db_path: PathBuf,

    #[arg(long)]
    pub query: Option<String>,

    #[arg(long)]
    pub section: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "PAGESEARCH_DB", default_value = DEFAULT_DB_FILENAME)]
    pub db_path: PathBuf,

    #[arg(long, env = "PAGESEARCH_BIND", default_value = "127.0.0.1:5000")]
    pub bind: String,

    #[arg(long, env = "POCKETBASE_URL", default_value = "http://127.0.0.1:8090")]
    pub identity_url: String,

    #[arg(long, default_value_t = 10)]
    pub identity_timeout_secs: u64,

    /// Sessions unused for this long are dropped
    #[arg(long, env = "PAGESEARCH_SESSION_IDLE_MINUTES", default_value_t = 720)]
    pub session_idle_minutes: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_DB_FILENAME)]
    pub db_path: PathBuf,
}
