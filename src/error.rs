use thiserror::Error;

/// Failure to turn an upstream record into a usable snapshot.
///
/// This is distinct from "no data available": callers must show an explicit
/// "could not determine conditions" state rather than a favorable default.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed report: {0}")]
    MalformedReport(String),
}

/// A non-fatal upstream failure: one of several concurrently fetched sources is missing and
/// the result was assembled with reduced fidelity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("incomplete upstream data from {source_name}: {reason}")]
    IncompleteUpstreamData { source_name: String, reason: String },
}
