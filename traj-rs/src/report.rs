use crate::ingest::CellTable;
use crate::pseudotime::PseudotimeMatrix;
use itertools::Itertools;
use lineage::LineageTree;
use log::{info, warn};
use ndarray::Array2;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use traj_types::{ClusterColor, ClusterSummary, LineageRecord, PseudotimeRow, TrajectoryError};

/// Plotting-ready view of a trajectory run: the long pseudotime table, lineage paths by label
/// and per-cluster summaries.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryReport {
    rows: Vec<PseudotimeRow>,
    lineages: Vec<LineageRecord>,
    clusters: Vec<ClusterSummary>,
}

impl TrajectoryReport {
    /// Reshape per-cell, per-lineage pseudotime into one row per present pair, ordered by
    /// lineage and then by cell
    pub fn new(
        table: &CellTable,
        tree: &LineageTree,
        centroids: &Array2<f64>,
        pseudotime: &PseudotimeMatrix,
    ) -> TrajectoryReport {
        let mut rows = Vec::new();
        for lineage in 0..pseudotime.n_lineages() {
            for (cell, cell_id) in table.cell_ids().iter().enumerate() {
                if let Some(t) = pseudotime.get(cell, lineage) {
                    rows.push(PseudotimeRow {
                        cell_id: cell_id.clone(),
                        lineage,
                        pseudotime: t,
                    });
                }
            }
        }

        let lineages = tree
            .lineages()
            .iter()
            .enumerate()
            .map(|(index, path)| LineageRecord {
                index,
                name: format!("Lineage{}", index + 1),
                clusters: path.iter().map(|&c| table.labels()[c].clone()).collect(),
            })
            .collect_vec();

        let clusters = table
            .labels()
            .iter()
            .zip(table.cluster_sizes())
            .zip(centroids.rows())
            .map(|((label, size), centroid)| ClusterSummary {
                label: label.clone(),
                size,
                centroid: centroid.to_vec(),
            })
            .collect_vec();

        info!("pseudotime table has {} rows over {} lineages", rows.len(), lineages.len());
        TrajectoryReport {
            rows,
            lineages,
            clusters,
        }
    }

    /// Long format rows `(cell_id, lineage, pseudotime)`
    pub fn rows(&self) -> &[PseudotimeRow] {
        &self.rows
    }

    /// Number of lineages
    pub fn lineage_count(&self) -> usize {
        self.lineages.len()
    }

    /// Lineages as cluster label paths
    pub fn lineages(&self) -> &[LineageRecord] {
        &self.lineages
    }

    /// Size and centroid of every cluster, sorted by label
    pub fn cluster_summaries(&self) -> &[ClusterSummary] {
        &self.clusters
    }

    /// Assign palette colors to clusters in sorted label order. Colors repeat when the palette is
    /// shorter than the number of clusters.
    pub fn colors_for_clusters<S: AsRef<str>>(&self, palette: &[S]) -> Result<Vec<ClusterColor>, TrajectoryError> {
        if palette.is_empty() {
            return Err(TrajectoryError::Configuration("color palette is empty".to_string()));
        }
        if palette.len() < self.clusters.len() {
            warn!(
                "palette has {} colors for {} clusters, colors will repeat",
                palette.len(),
                self.clusters.len()
            );
        }
        Ok(self
            .clusters
            .iter()
            .map(|c| c.label.as_str())
            .sorted()
            .enumerate()
            .map(|(i, label)| ClusterColor {
                cluster: label.to_string(),
                color: palette[i % palette.len()].as_ref().to_string(),
            })
            .collect())
    }

    /// Reproducible random subset of `round(fraction * rows)` rows, kept in table order.
    /// `fraction` must be in (0, 1].
    pub fn sample(&self, fraction: f64, seed: u64) -> Result<Vec<PseudotimeRow>, TrajectoryError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(TrajectoryError::Configuration(format!(
                "sampling fraction must be in (0, 1], got {fraction}"
            )));
        }
        let n = self.rows.len();
        let amount = ((fraction * n as f64).round() as usize).min(n);
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, n, amount).into_vec();
        picked.sort_unstable();
        Ok(picked.into_iter().map(|i| self.rows[i].clone()).collect())
    }
}
