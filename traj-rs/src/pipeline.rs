use crate::ingest::CellTable;
use crate::pseudotime::PseudotimeMatrix;
use crate::report::TrajectoryReport;
use lineage::{centroids, LineageTree, RootSelection, TreeOptions};
use log::info;
use ndarray::Array2;
use traj_types::{CellRecord, TrajectoryError};

/// Options of a trajectory run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Root cluster choice, the largest cluster by default
    pub root: RootSelection,
    /// Clusters forced to be lineage end points
    pub end_clusters: Vec<String>,
}

impl PipelineConfig {
    /// Start lineages at the cluster labelled `label`
    pub fn with_root(mut self, label: impl Into<String>) -> PipelineConfig {
        self.root = RootSelection::Label(label.into());
        self
    }

    /// Force the cluster labelled `label` to be a leaf
    pub fn with_end_cluster(mut self, label: impl Into<String>) -> PipelineConfig {
        self.end_clusters.push(label.into());
        self
    }

    fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            root: self.root.clone(),
            end_clusters: self.end_clusters.clone(),
            ..Default::default()
        }
    }
}

/// Everything computed by one run. Each stage's output is kept unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    table: CellTable,
    centroids: Array2<f64>,
    tree: LineageTree,
    pseudotime: PseudotimeMatrix,
    report: TrajectoryReport,
}

impl Trajectory {
    /// Ingested cells
    pub fn table(&self) -> &CellTable {
        &self.table
    }

    /// Cluster centroids, one row per cluster in label order
    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Rooted spanning tree over clusters
    pub fn tree(&self) -> &LineageTree {
        &self.tree
    }

    /// Per cell, per lineage pseudotime
    pub fn pseudotime(&self) -> &PseudotimeMatrix {
        &self.pseudotime
    }

    /// Tables for plotting
    pub fn report(&self) -> &TrajectoryReport {
        &self.report
    }

    /// Lineages as cluster label paths, root first
    pub fn lineage_labels(&self) -> Vec<Vec<String>> {
        self.report.lineages().iter().map(|l| l.clusters.clone()).collect()
    }
}

/// Run ingestion, tree building, projection and reshaping in order. The first failing stage
/// aborts the run and nothing is returned from later stages.
pub fn run_pipeline(records: &[CellRecord], config: &PipelineConfig) -> Result<Trajectory, TrajectoryError> {
    let table = CellTable::from_records(records)?;
    run_table(table, config)
}

/// Same as `run_pipeline`, for an already built table
pub fn run_table(table: CellTable, config: &PipelineConfig) -> Result<Trajectory, TrajectoryError> {
    let centroids = centroids(&table.embedding(), table.all_members());
    let tree = LineageTree::build(&centroids, table.labels(), &table.cluster_sizes(), &config.tree_options())?;
    let pseudotime = PseudotimeMatrix::project(&table, &tree, &centroids);
    let report = TrajectoryReport::new(&table, &tree, &centroids, &pseudotime);
    info!(
        "trajectory: {} cells, {} clusters, {} lineages",
        table.n_cells(),
        table.n_clusters(),
        report.lineage_count()
    );

    Ok(Trajectory {
        table,
        centroids,
        tree,
        pseudotime,
        report,
    })
}
