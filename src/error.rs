// src/error.rs

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Broad classification carried by progress entries, for callers that only
/// need to know which leg of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    FileSystem,
    Format,
    Storage,
    Schema,
}

/// Everything that can go wrong between the statistics page and the database.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("GET {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("empty response body from {url}")]
    EmptyDownload { url: String },

    /// The statistics page loaded but carried no spreadsheet attachment link.
    #[error("no spreadsheet attachment found on {url}")]
    NoAttachment { url: String },

    #[error("{}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded file is not a readable xlsx container. Fatal: nothing
    /// downstream can proceed.
    #[error("unreadable workbook {}: {source}", .path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::XlsxError,
    },

    /// One sheet failed to parse; isolated to that sheet.
    #[error("sheet '{sheet}': {source}")]
    Sheet {
        sheet: String,
        #[source]
        source: calamine::XlsxError,
    },

    #[error("sheet '{sheet}' has no cells")]
    EmptySheet { sheet: String },

    #[error("database: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("creating schema {schema}: {source}")]
    CreateSchema {
        schema: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("creating table {table}: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("appending rows to {table}: {source}")]
    Append {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    /// Two distinct source names mapped onto one identifier in the same run.
    #[error("'{second}' and '{first}' both normalize to identifier '{identifier}'")]
    IdentifierCollision {
        first: String,
        second: String,
        identifier: String,
    },

    #[error("aborted after {count} sheet errors")]
    TooManyErrors { count: usize },
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::InvalidUrl { .. } | Self::EmptyDownload { .. } => {
                ErrorKind::Network
            }
            Self::FileSystem { .. } => ErrorKind::FileSystem,
            Self::NoAttachment { .. }
            | Self::Workbook { .. }
            | Self::Sheet { .. }
            | Self::EmptySheet { .. }
            | Self::TooManyErrors { .. } => ErrorKind::Format,
            Self::Storage { .. } | Self::Append { .. } => ErrorKind::Storage,
            Self::CreateSchema { .. }
            | Self::CreateTable { .. }
            | Self::IdentifierCollision { .. } => ErrorKind::Schema,
        }
    }
}
