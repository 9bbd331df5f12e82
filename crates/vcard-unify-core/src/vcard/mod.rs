pub mod parser;
pub mod writer;

pub use parser::{ingest, ingest_at, split_export, ParseError};
pub use writer::{export, export_records, write_record};
