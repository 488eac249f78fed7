use thiserror::Error;

/// Failure of a single logical HTTP request after the retry budget is spent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Connection {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build request: {0}")]
    Build(#[source] reqwest::Error),

    #[error("request body for {url} cannot be replayed")]
    NotReplayable { url: String },
}

/// Raised by the payment-mode mapper when a label has no code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no payment type for mode '{mode}', known modes: {}", known.join(", "))]
pub struct UnknownMode {
    pub mode: String,
    pub known: Vec<String>,
}

/// Per-dispatch failure. Never aborts a batch; the orchestrator turns it into an outcome line.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),

    #[error("{target}: invalid credentials")]
    Unauthorized { target: &'static str },

    #[error("{target}: {what} not found")]
    NotFound { target: &'static str, what: String },

    #[error("{target}: validation error: {message}")]
    Validation { target: &'static str, message: String },

    #[error("{target}: unexpected status {status}: {body}")]
    Status {
        target: &'static str,
        status: u16,
        body: String,
    },

    #[error("{target}: rate limited twice, giving up")]
    RateLimited { target: &'static str },

    #[error("invoice {invoice_id} has no reference number in its label")]
    MissingReference { invoice_id: String },

    #[error("{target}: invalid response body: {source}")]
    Decode {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl SyncError {
    /// Business failures that retrying later cannot fix without a data change.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownMode(_)
                | SyncError::NotFound { .. }
                | SyncError::Validation { .. }
                | SyncError::MissingReference { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state database: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
