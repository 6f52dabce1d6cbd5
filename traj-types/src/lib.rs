//! Types shared between the trajectory crates and the command line tool

#![deny(missing_docs)]
#![deny(warnings)]

/// Error taxonomy for a trajectory run
pub mod error;

/// Serializable input and output records
pub mod records;

pub use error::TrajectoryError;
pub use records::{CellRecord, ClusterColor, ClusterSummary, LineageRecord, PseudotimeRow};
