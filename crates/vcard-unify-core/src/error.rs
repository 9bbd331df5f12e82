use thiserror::Error;

use crate::compliance::UnfixableRecord;
use crate::vcard::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Unfixable(#[from] UnfixableRecord),

    #[error("Records {0} and {1} come from the same source '{2}' and cannot be scored")]
    SameSourcePair(String, String, String),

    #[error("Merge of group {group_id} dropped {field} value '{value}'")]
    ConservationViolated {
        group_id: String,
        field: String,
        value: String,
    },

    #[error("Non-deterministic {stage} output: {first} != {second}")]
    NonDeterminism {
        stage: &'static str,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Other(String),
}
