use thiserror::Error;

/// Errors surfaced by the store (spec §7: `NoResults`/`InvalidResult` are
/// typed results, never a panic or a process-wide throw).
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying SQL engine reported a failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A query that is expected to return exactly one row returned none.
    #[error("no results for {0}")]
    NoResults(String),

    /// A row was found but didn't have the shape the caller expected.
    #[error("invalid result shape for {0}: {1}")]
    InvalidResult(String, String),

    /// The data directory could not be opened for reading and writing.
    ///
    /// This is the one store error that is fatal at startup (spec §7,
    /// `FatalError`) — the process exits rather than retrying.
    #[error("data directory not read-writable: {0}")]
    DataDirUnwritable(std::path::PathBuf),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
