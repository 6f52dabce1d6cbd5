//! # traj-rs: cluster lineages and pseudotime for single cell embeddings

#![deny(missing_docs)]
#![deny(warnings)]

/// Cell table construction and validation
pub mod ingest;

/// Arc-length pseudotime along lineages
pub mod pseudotime;

/// Long format tables, colors and subsampling for plotting
pub mod report;

/// End to end run over a cell table
pub mod pipeline;


pub use ingest::CellTable;
pub use lineage::{LineageTree, RootSelection};
pub use pipeline::{run_pipeline, run_table, PipelineConfig, Trajectory};
pub use pseudotime::{LineageCurve, PseudotimeMatrix};
pub use report::TrajectoryReport;
pub use traj_types::TrajectoryError;
