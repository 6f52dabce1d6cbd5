use itertools::Itertools;
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::collections::{BTreeSet, HashMap, HashSet};
use traj_types::{CellRecord, TrajectoryError};

/// Validated cells with their embedding and cluster assignment. Clusters are indexed by the
/// sorted order of their labels.
#[derive(Clone, Debug, PartialEq)]
pub struct CellTable {
    cell_ids: Vec<String>,
    embedding: Array2<f64>,
    assignments: Vec<usize>,
    labels: Vec<String>,
    members: Vec<Vec<usize>>,
}

impl CellTable {
    /// Build a table from input rows. Every cell needs a non-blank label and a unique id, all
    /// embeddings must share one non-zero dimension, and at least two clusters must be present.
    /// Coordinates are not checked here; non-finite values are rejected when the lineage tree is
    /// built.
    pub fn from_records(records: &[CellRecord]) -> Result<CellTable, TrajectoryError> {
        let Some(first) = records.first() else {
            return Err(TrajectoryError::InvalidInput("no cells given".to_string()));
        };
        let n_dims = first.embedding.len();
        if n_dims == 0 {
            return Err(TrajectoryError::InvalidInput(format!(
                "cell '{}' has an empty embedding",
                first.cell_id
            )));
        }

        let mut seen = HashSet::with_capacity(records.len());
        let mut cell_labels = Vec::with_capacity(records.len());
        let mut coords = Vec::with_capacity(records.len() * n_dims);
        for rec in records {
            if rec.embedding.len() != n_dims {
                return Err(TrajectoryError::InvalidInput(format!(
                    "cell '{}' has {} embedding dimensions, expected {}",
                    rec.cell_id,
                    rec.embedding.len(),
                    n_dims
                )));
            }
            if !seen.insert(rec.cell_id.as_str()) {
                return Err(TrajectoryError::InvalidInput(format!(
                    "cell id '{}' appears more than once",
                    rec.cell_id
                )));
            }
            let label = rec.label().ok_or_else(|| {
                TrajectoryError::InvalidInput(format!("cell '{}' has no cluster label", rec.cell_id))
            })?;
            cell_labels.push(label);
            coords.extend_from_slice(&rec.embedding);
        }

        let embedding = Array2::from_shape_vec((records.len(), n_dims), coords)
            .map_err(|e| TrajectoryError::InvalidInput(e.to_string()))?;
        let cell_ids = records.iter().map(|r| r.cell_id.clone()).collect();
        CellTable::assemble(cell_ids, embedding, &cell_labels)
    }

    /// Build a table from an embedding (one row per cell) and per-cell labels. Cell ids are the
    /// row numbers.
    pub fn from_array(embedding: ArrayView2<f64>, labels: &[&str]) -> Result<CellTable, TrajectoryError> {
        if embedding.nrows() != labels.len() {
            return Err(TrajectoryError::InvalidInput(format!(
                "{} embedding rows but {} labels",
                embedding.nrows(),
                labels.len()
            )));
        }
        if embedding.nrows() == 0 || embedding.ncols() == 0 {
            return Err(TrajectoryError::InvalidInput(format!(
                "empty embedding of shape {:?}",
                embedding.shape()
            )));
        }
        let mut cell_labels = Vec::with_capacity(labels.len());
        for (i, l) in labels.iter().enumerate() {
            let l = l.trim();
            if l.is_empty() {
                return Err(TrajectoryError::InvalidInput(format!("cell '{i}' has no cluster label")));
            }
            cell_labels.push(l);
        }
        let cell_ids = (0..labels.len()).map(|i| i.to_string()).collect();
        CellTable::assemble(cell_ids, embedding.to_owned(), &cell_labels)
    }

    fn assemble(
        cell_ids: Vec<String>,
        embedding: Array2<f64>,
        cell_labels: &[&str],
    ) -> Result<CellTable, TrajectoryError> {
        let labels = cell_labels
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect_vec();
        if labels.len() < 2 {
            return Err(TrajectoryError::InvalidInput(format!(
                "a trajectory needs at least 2 clusters, found {}",
                labels.len()
            )));
        }

        let index: HashMap<&str, usize> = labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();
        let assignments = cell_labels.iter().map(|l| index[l]).collect_vec();
        let mut members = vec![Vec::new(); labels.len()];
        for (cell, &cluster) in assignments.iter().enumerate() {
            members[cluster].push(cell);
        }

        info!(
            "ingested {} cells in {} clusters ({} embedding dimensions)",
            embedding.nrows(),
            labels.len(),
            embedding.ncols()
        );

        Ok(CellTable {
            cell_ids,
            embedding,
            assignments,
            labels,
            members,
        })
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.embedding.nrows()
    }

    /// Embedding dimension
    pub fn n_dims(&self) -> usize {
        self.embedding.ncols()
    }

    /// Number of distinct clusters
    pub fn n_clusters(&self) -> usize {
        self.labels.len()
    }

    /// Cell identifiers, in input order
    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// The embedding, one row per cell
    pub fn embedding(&self) -> ArrayView2<'_, f64> {
        self.embedding.view()
    }

    /// Embedding coordinates of one cell
    pub fn coords(&self, cell: usize) -> ArrayView1<'_, f64> {
        self.embedding.row(cell)
    }

    /// Sorted cluster labels; position is the cluster index
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Cluster index of a label
    pub fn cluster_index(&self, label: &str) -> Option<usize> {
        self.labels.binary_search_by(|l| l.as_str().cmp(label)).ok()
    }

    /// Cluster index of `cell`
    pub fn cluster_of(&self, cell: usize) -> usize {
        self.assignments[cell]
    }

    /// Cells of `cluster`, ascending
    pub fn members(&self, cluster: usize) -> &[usize] {
        &self.members[cluster]
    }

    /// Member lists of all clusters
    pub fn all_members(&self) -> &[Vec<usize>] {
        &self.members
    }

    /// Number of cells in each cluster
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }
}
