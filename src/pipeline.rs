// src/pipeline.rs

use crate::duck;
use crate::error::{ErrorKind, LoaderError};
use crate::fetch;
use crate::sheets::SheetReader;
use duckdb::Connection;
use reqwest::blocking::Client;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Default destination database file.
pub const DEFAULT_DB_PATH: &str = "imd2025.duckdb";
/// Default local cache path for the downloaded spreadsheet.
pub const DEFAULT_CACHE_PATH: &str = "data/imd2025.xlsx";

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Destination database file.
    pub db_path: PathBuf,
    /// Local cache path for the downloaded spreadsheet. The cache file's
    /// stem names the destination schema.
    pub cache_path: PathBuf,
    /// Download URL override; when unset the statistics page is scraped for
    /// its first spreadsheet attachment.
    pub url: Option<String>,
    /// Abort the run once more than this many sheets have failed. Unset
    /// means per-sheet failures never abort.
    pub error_limit: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            url: None,
            error_limit: None,
        }
    }
}

/// One pipeline milestone. Serializes as a map with a `stage` tag and only
/// the fields that stage carries.
///
/// `sheet_failed` entries are non-terminal: the run continues with the next
/// sheet. `complete` and `failed` are terminal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Progress {
    Starting,
    Downloading {
        url: String,
    },
    Downloaded {
        file: PathBuf,
        cached: bool,
    },
    Extracting {
        file: PathBuf,
        sheets: usize,
    },
    SheetExtracted {
        sheet: String,
        rows: usize,
    },
    TableLoaded {
        schema: String,
        table: String,
        rows: usize,
    },
    SheetFailed {
        sheet: String,
        kind: ErrorKind,
        detail: String,
    },
    Complete {
        total_tables: usize,
    },
    Failed {
        kind: ErrorKind,
        detail: String,
    },
}

enum State {
    Start,
    Fetch,
    Download {
        url: url::Url,
    },
    Open {
        file: PathBuf,
    },
    Sheets {
        reader: SheetReader,
        conn: Connection,
        schema: String,
        // normalized table identifier -> the sheet name that claimed it
        seen: HashMap<String, String>,
        loaded: usize,
        errors: usize,
    },
    Done {
        total: usize,
    },
    Finished,
}

/// Lazy pipeline run. Every blocking operation (resolution, download,
/// parsing, loading) happens inside `next()`; a caller that stops consuming
/// halts the run at the next yield point.
pub struct ProgressIter {
    options: LoadOptions,
    client: Client,
    queue: VecDeque<Progress>,
    state: State,
    failure: Option<LoaderError>,
}

impl ProgressIter {
    /// The fatal error behind a terminal `failed` entry, if the run ended
    /// that way.
    pub fn failure(&self) -> Option<&LoaderError> {
        self.failure.as_ref()
    }

    /// Consume the iterator and take the fatal error, if any.
    pub fn into_failure(self) -> Option<LoaderError> {
        self.failure
    }

    fn fail(&mut self, err: LoaderError) {
        warn!(error = %err, "pipeline aborted");
        self.queue.push_back(Progress::Failed {
            kind: err.kind(),
            detail: err.to_string(),
        });
        self.failure = Some(err);
        self.state = State::Finished;
    }

    fn advance(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Finished);
        match state {
            State::Start => {
                self.queue.push_back(Progress::Starting);
                self.state = State::Fetch;
            }

            State::Fetch => {
                if fetch::is_cached(&self.options.cache_path) {
                    debug!(file = %self.options.cache_path.display(), "using cached spreadsheet");
                    self.queue.push_back(Progress::Downloaded {
                        file: self.options.cache_path.clone(),
                        cached: true,
                    });
                    self.state = State::Open {
                        file: self.options.cache_path.clone(),
                    };
                    return;
                }
                match fetch::resolve(
                    &self.client,
                    self.options.url.as_deref(),
                    fetch::STATISTICS_PAGE_URL,
                ) {
                    Ok(url) => {
                        self.queue.push_back(Progress::Downloading {
                            url: url.to_string(),
                        });
                        self.state = State::Download { url };
                    }
                    Err(err) => self.fail(err),
                }
            }

            State::Download { url } => {
                match fetch::download(&self.client, &url, &self.options.cache_path) {
                    Ok(file) => {
                        self.queue.push_back(Progress::Downloaded {
                            file: file.clone(),
                            cached: false,
                        });
                        self.state = State::Open { file };
                    }
                    Err(err) => self.fail(err),
                }
            }

            State::Open { file } => {
                let reader = match SheetReader::open(&file) {
                    Ok(reader) => reader,
                    Err(err) => return self.fail(err),
                };
                let conn = match duck::open_db(&self.options.db_path) {
                    Ok(conn) => conn,
                    Err(err) => return self.fail(err),
                };
                let stem = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "imd".to_string());
                let schema = duck::normalize_identifier(&stem);
                if let Err(err) = duck::ensure_schema(&conn, &schema) {
                    return self.fail(err);
                }
                self.queue.push_back(Progress::Extracting {
                    file,
                    sheets: reader.sheet_names().len(),
                });
                self.state = State::Sheets {
                    reader,
                    conn,
                    schema,
                    seen: HashMap::new(),
                    loaded: 0,
                    errors: 0,
                };
            }

            State::Sheets {
                mut reader,
                conn,
                schema,
                mut seen,
                mut loaded,
                mut errors,
            } => {
                let Some((sheet_name, result)) = reader.next() else {
                    self.state = State::Done { total: loaded };
                    return;
                };

                match result {
                    Err(err) => {
                        warn!(sheet = %sheet_name, error = %err, "sheet unreadable, skipping");
                        self.queue.push_back(Progress::SheetFailed {
                            sheet: sheet_name,
                            kind: err.kind(),
                            detail: err.to_string(),
                        });
                        errors += 1;
                    }
                    Ok(table) if table.rows.is_empty() => {
                        // Header-only sheets produce no table.
                        debug!(sheet = %sheet_name, "no data rows, skipping");
                    }
                    Ok(table) => {
                        self.queue.push_back(Progress::SheetExtracted {
                            sheet: sheet_name.clone(),
                            rows: table.rows.len(),
                        });
                        let ident = duck::normalize_identifier(&sheet_name);
                        let outcome = match seen.get(&ident) {
                            Some(first) => Err(LoaderError::IdentifierCollision {
                                first: first.clone(),
                                second: sheet_name.clone(),
                                identifier: ident.clone(),
                            }),
                            None => {
                                seen.insert(ident.clone(), sheet_name.clone());
                                duck::load_table(&conn, &schema, &ident, &table)
                            }
                        };
                        match outcome {
                            Ok(rows) => {
                                loaded += 1;
                                self.queue.push_back(Progress::TableLoaded {
                                    schema: schema.clone(),
                                    table: ident,
                                    rows,
                                });
                            }
                            Err(err) => {
                                warn!(sheet = %sheet_name, error = %err, "load failed, skipping");
                                self.queue.push_back(Progress::SheetFailed {
                                    sheet: sheet_name,
                                    kind: err.kind(),
                                    detail: err.to_string(),
                                });
                                errors += 1;
                            }
                        }
                    }
                }

                if self
                    .options
                    .error_limit
                    .is_some_and(|limit| errors > limit)
                {
                    return self.fail(LoaderError::TooManyErrors { count: errors });
                }
                self.state = State::Sheets {
                    reader,
                    conn,
                    schema,
                    seen,
                    loaded,
                    errors,
                };
            }

            State::Done { total } => {
                self.queue.push_back(Progress::Complete {
                    total_tables: total,
                });
                self.state = State::Finished;
            }

            State::Finished => {}
        }
    }
}

impl Iterator for ProgressIter {
    type Item = Progress;

    fn next(&mut self) -> Option<Progress> {
        loop {
            if let Some(entry) = self.queue.pop_front() {
                return Some(entry);
            }
            if matches!(self.state, State::Finished) {
                return None;
            }
            self.advance();
        }
    }
}

/// Run the pipeline lazily, yielding one progress entry per milestone.
pub fn load_with_progress(options: LoadOptions) -> ProgressIter {
    ProgressIter {
        options,
        client: Client::new(),
        queue: VecDeque::new(),
        state: State::Start,
        failure: None,
    }
}

/// Run the whole pipeline to completion and return the number of tables
/// loaded. The blocking form of [`load_with_progress`]: it drains the same
/// progress sequence and surfaces the first fatal error by returning it.
pub fn load(options: LoadOptions) -> Result<usize, LoaderError> {
    let mut run = load_with_progress(options);
    let mut total = 0;
    for entry in &mut run {
        if let Progress::Complete { total_tables } = entry {
            total = total_tables;
        }
    }
    match run.failure {
        Some(err) => Err(err),
        None => Ok(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_the_documented_layout() {
        let options = LoadOptions::default();
        assert_eq!(options.db_path, PathBuf::from("imd2025.duckdb"));
        assert_eq!(options.cache_path, PathBuf::from("data/imd2025.xlsx"));
        assert!(options.url.is_none());
        assert!(options.error_limit.is_none());
    }

    #[test]
    fn progress_serializes_with_a_stage_tag() {
        let entry = Progress::TableLoaded {
            schema: "File_2_IoD2025".into(),
            table: "IoD2025_Domains".into(),
            rows: 42,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["stage"], "table_loaded");
        assert_eq!(json["rows"], 42);

        let entry = Progress::Failed {
            kind: ErrorKind::Network,
            detail: "GET failed".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["stage"], "failed");
        assert_eq!(json["kind"], "network");
    }

    #[test]
    fn fatal_fetch_error_yields_a_terminal_failed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            url: Some("http://127.0.0.1:9/imd2025.xlsx".into()),
            cache_path: dir.path().join("imd2025.xlsx"),
            db_path: dir.path().join("unused.duckdb"),
            error_limit: None,
        };
        let mut run = load_with_progress(options);
        let entries: Vec<Progress> = (&mut run).collect();

        assert!(matches!(entries.first(), Some(Progress::Starting)));
        assert!(matches!(entries.last(), Some(Progress::Failed { kind: ErrorKind::Network, .. })));
        assert!(run.failure().is_some());
    }
}
