use serde::{Deserialize, Serialize};

/// One row of the input table: a cell, its embedding coordinates and its cluster label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    /// Barcode or other unique identifier of the cell
    pub cell_id: String,
    /// Low dimensional coordinates (PCA, UMAP, ...)
    pub embedding: Vec<f64>,
    /// Cluster label; `None` or a blank string means the cell was never labeled
    #[serde(default, deserialize_with = "none_if_blank")]
    pub label: Option<String>,
}

impl CellRecord {
    /// Build a labeled record
    pub fn new(cell_id: impl Into<String>, embedding: Vec<f64>, label: impl Into<String>) -> CellRecord {
        CellRecord {
            cell_id: cell_id.into(),
            embedding,
            label: Some(label.into()),
        }
    }

    /// The label, if present and not blank
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// A lineage as handed to rendering: ordered cluster labels from the root to a leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageRecord {
    /// 0-based lineage index, as used in `PseudotimeRow::lineage`
    pub index: usize,
    /// Display name, `Lineage1`, `Lineage2`, ...
    pub name: String,
    /// Cluster labels, root first
    pub clusters: Vec<String>,
}

/// One row of the long format pseudotime table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PseudotimeRow {
    /// Cell identifier
    pub cell_id: String,
    /// 0-based lineage index
    pub lineage: usize,
    /// Non-negative position of the cell along the lineage
    pub pseudotime: f64,
}

/// Color assigned to a cluster for plotting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterColor {
    /// Cluster label
    pub cluster: String,
    /// Color as given in the palette, usually `#RRGGBB`
    pub color: String,
}

/// Size and centroid of a cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Cluster label
    pub label: String,
    /// Number of member cells
    pub size: usize,
    /// Mean embedding coordinate of the members
    pub centroid: Vec<f64>,
}

/// Deserialize an optional string, mapping blank values to `None`
pub fn none_if_blank<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(|v| v.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_blank_label() {
        let rec: CellRecord = serde_json::from_str(r#"{"cell_id": "AAAC-1", "embedding": [0.0, 1.0], "label": "  "}"#)
            .unwrap();
        assert_eq!(rec.label, None);
        assert_eq!(rec.label(), None);

        let rec: CellRecord = serde_json::from_str(r#"{"cell_id": "AAAC-1", "embedding": [0.0, 1.0]}"#).unwrap();
        assert_eq!(rec.label(), None);

        let rec = CellRecord::new("AAAG-1", vec![1.0, 2.0], " 3 ");
        assert_eq!(rec.label(), Some("3"));
    }
}
