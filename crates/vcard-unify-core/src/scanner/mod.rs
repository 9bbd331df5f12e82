pub mod walk;

pub use walk::{compile_patterns, discover_files, read_source, scan_sources, RawRecord};
