pub mod ingest;
pub mod punch;
pub mod records;
pub mod requests;
