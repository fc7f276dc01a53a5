pub mod index;
pub mod ingest;
pub mod search;
pub mod serve;
pub mod status;
