// Error types for the ingestion and award-progress core
//
// Parse-level problems never abort an import; they are collected as
// ParseWarning values alongside the accepted records. Everything here is
// scoped to one request/import/sweep cycle - nothing is fatal to the process.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Input is not recognizable as ADIF at all (no fields, no markers).
    #[error("not recognizable as ADIF: {0}")]
    Parse(String),

    /// Spot creation referenced a bunker we have no record of.
    #[error("unknown bunker reference: {0}")]
    UnknownBunker(String),

    /// Spot creation referenced a bunker that is not approved.
    #[error("bunker {0} is not approved")]
    UnapprovedBunker(String),

    /// Spot frequency falls outside the amateur bands.
    #[error("frequency {0} MHz is outside amateur bands")]
    InvalidFrequency(f64),

    /// Spot submission carried neither a band nor a frequency.
    #[error("spot needs a band or a frequency")]
    MissingBand,

    /// A persistence gateway call exceeded the caller-supplied timeout.
    #[error("persistence call timed out after {0:?}")]
    PersistenceTimeout(Duration),

    /// A conditional write kept losing races past the retry bound.
    #[error("persistence conflict persisted after {0} attempts")]
    PersistenceConflict(u32),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored value corrupt: {0}")]
    Data(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
