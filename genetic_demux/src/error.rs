//! Error taxonomy of the demultiplexing engine.

/// Errors surfaced by the engine.
///
/// `NotAllDistinguishable` is not an error: an incomplete
/// distinguishing-variant search is reported through
/// [`crate::DemuxEvent::NotAllDistinguishable`] and the run still completes.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DemuxError {
    /// Too few barcodes survived dimensionality reduction to seed the states.
    #[error(
        "only {barcodes} barcodes survived dimensionality reduction, fewer than the {states} states requested"
    )]
    InsufficientInformation {
        /// Barcodes left after subsampling.
        barcodes: usize,
        /// Requested number of states.
        states: usize,
    },
    /// None of the restarts produced a usable model.
    #[error("none of the {restarts} restarts produced a non-degenerate model")]
    ModelDidNotConverge {
        /// Number of restarts attempted.
        restarts: usize,
    },
    /// The input matrices or labels are inconsistent.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// A run parameter is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name as it appears in the parameter file.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, DemuxError>;
