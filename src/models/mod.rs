//! Data types shared by the library and the CLI

/// Anomaly verdicts and printable summaries.
pub mod anomaly;
/// The persisted embedding database.
pub mod store;
