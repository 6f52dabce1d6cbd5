//! Pseudotime by arc length along the centroid path of each lineage.
//!
//! This is a deterministic stand-in for principal-curve fitting: the lineage is the polyline
//! through its cluster centroids, each cluster owns the part of the polyline halfway to its
//! neighbours, and a cell is placed at its cluster's arc position shifted by its projection on
//! the local tangent, clamped to the cluster's part. The root and leaf parts reach as far behind
//! the root centroid and past the leaf centroid as their members do, and pseudotime starts at the
//! rearmost root cell. Values are reproducible and cluster order along a lineage is never
//! violated, but they are not numerically comparable to curve fitting.

use crate::ingest::CellTable;
use itertools::Itertools;
use lineage::LineageTree;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use noisy_float::types::n64;
use rayon::prelude::*;

/// Polyline through the centroids of one lineage
#[derive(Clone, Debug, PartialEq)]
pub struct LineageCurve {
    clusters: Vec<usize>,
    points: Array2<f64>,
    // unit vectors from point i to point i + 1, zero for coincident points
    tangents: Vec<Array1<f64>>,
    arc: Vec<f64>,
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl LineageCurve {
    /// Curve through `centroids` rows listed in `path`, root first
    pub fn new(path: &[usize], centroids: &Array2<f64>) -> LineageCurve {
        let points = centroids.select(Axis(0), path);
        let k = path.len();

        let mut tangents = Vec::with_capacity(k.saturating_sub(1));
        let mut arc = Vec::with_capacity(k);
        let mut s = 0.0;
        arc.push(s);
        for (a, b) in points.axis_iter(Axis(0)).tuple_windows() {
            let step = &b - &a;
            let len = step.dot(&step).sqrt();
            tangents.push(if len > 0.0 { step / len } else { Array1::zeros(a.len()) });
            s += len;
            arc.push(s);
        }

        let mut lo = Vec::with_capacity(k);
        let mut hi = Vec::with_capacity(k);
        for i in 0..k {
            lo.push(if i == 0 { 0.0 } else { 0.5 * (arc[i - 1] + arc[i]) });
            hi.push(if i + 1 == k { arc[i] } else { 0.5 * (arc[i] + arc[i + 1]) });
        }

        LineageCurve {
            clusters: path.to_vec(),
            points,
            tangents,
            arc,
            lo,
            hi,
        }
    }

    /// Widen the root segment backwards and the leaf segment forwards so that they cover the
    /// members of `table` lying behind the root centroid or past the leaf centroid.
    pub fn fit_ends(mut self, table: &CellTable) -> LineageCurve {
        let k = self.clusters.len();
        if k < 2 {
            return self;
        }
        let behind = self.tangent_offsets(table, 0, &self.tangents[0]).fold(0.0, f64::min);
        let past = self
            .tangent_offsets(table, k - 1, &self.tangents[k - 2])
            .fold(0.0, f64::max);
        self.lo[0] = behind;
        self.hi[k - 1] = self.arc[k - 1] + past;
        self
    }

    fn tangent_offsets<'a>(
        &'a self,
        table: &'a CellTable,
        pos: usize,
        tangent: &'a Array1<f64>,
    ) -> impl Iterator<Item = f64> + 'a {
        let center = self.points.row(pos);
        table
            .members(self.clusters[pos])
            .iter()
            .map(move |&cell| (&table.coords(cell) - &center).dot(tangent))
    }

    /// Clusters on the curve, root first
    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    /// Pseudotime at the far end of the leaf segment
    pub fn length(&self) -> f64 {
        self.hi.last().map_or(0.0, |hi| hi - self.lo[0])
    }

    /// Pseudotime at the centroid of the `pos`-th cluster on the curve
    pub fn arc_position(&self, pos: usize) -> f64 {
        self.arc[pos] - self.lo[0]
    }

    /// Pseudotime interval owned by the `pos`-th cluster on the curve
    pub fn segment(&self, pos: usize) -> (f64, f64) {
        (self.lo[pos] - self.lo[0], self.hi[pos] - self.lo[0])
    }

    /// Pseudotime of a point `x` that belongs to the `pos`-th cluster on the curve
    pub fn project(&self, pos: usize, x: ArrayView1<f64>) -> f64 {
        let k = self.clusters.len();
        if k == 1 {
            return 0.0;
        }
        let offset = &x - &self.points.row(pos);

        // end clusters have a single tangent and move along it both ways
        let shift = if pos == 0 {
            offset.dot(&self.tangents[0])
        } else if pos + 1 == k {
            offset.dot(&self.tangents[k - 2])
        } else {
            let forward = offset.dot(&self.tangents[pos]);
            let backward = offset.dot(&self.tangents[pos - 1]);
            if forward > 0.0 {
                forward
            } else if backward < 0.0 {
                backward
            } else {
                0.0
            }
        };
        (self.arc[pos] + shift).clamp(self.lo[pos], self.hi[pos]) - self.lo[0]
    }

    fn assign(&self, table: &CellTable) -> Vec<Option<f64>> {
        let mut values = vec![None; table.n_cells()];
        for (pos, &cluster) in self.clusters.iter().enumerate() {
            let cells = table.members(cluster);
            if cells.len() == 1 {
                let (lo, hi) = self.segment(pos);
                values[cells[0]] = Some(0.5 * (lo + hi));
                continue;
            }
            for &cell in cells {
                values[cell] = Some(self.project(pos, table.coords(cell)));
            }
        }
        values
    }
}

/// Pseudotime of every (cell, lineage) pair. Pairs whose cell is not in a cluster on the
/// lineage are absent, which is different from a pseudotime of zero.
#[derive(Clone, Debug, PartialEq)]
pub struct PseudotimeMatrix {
    curves: Vec<LineageCurve>,
    // cells x lineages
    values: Array2<Option<f64>>,
}

impl PseudotimeMatrix {
    /// Project every cell of `table` onto each lineage of `tree`. Lineages are processed in
    /// parallel and collected in order.
    pub fn project(table: &CellTable, tree: &LineageTree, centroids: &Array2<f64>) -> PseudotimeMatrix {
        let curves = tree
            .lineages()
            .iter()
            .map(|path| LineageCurve::new(path, centroids).fit_ends(table))
            .collect_vec();
        let columns: Vec<Vec<Option<f64>>> = curves.par_iter().map(|curve| curve.assign(table)).collect();
        let values = Array2::from_shape_fn((table.n_cells(), curves.len()), |(cell, l)| columns[l][cell]);

        info!(
            "projected {} cells onto {} lineages (lengths {})",
            table.n_cells(),
            curves.len(),
            curves.iter().map(|c| format!("{:.3}", c.length())).join(", ")
        );
        PseudotimeMatrix { curves, values }
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.values.nrows()
    }

    /// Number of lineages
    pub fn n_lineages(&self) -> usize {
        self.values.ncols()
    }

    /// Curve of lineage `lineage`
    pub fn curve(&self, lineage: usize) -> &LineageCurve {
        &self.curves[lineage]
    }

    /// Pseudotime of `cell` on `lineage`, if the cell lies on it
    pub fn get(&self, cell: usize, lineage: usize) -> Option<f64> {
        self.values[[cell, lineage]]
    }

    /// Average pseudotime of each cell over the lineages it lies on
    pub fn mean_pseudotime(&self) -> Vec<Option<f64>> {
        self.values
            .axis_iter(Axis(0))
            .map(|row| {
                let present = row.iter().flatten().copied().collect_vec();
                if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                }
            })
            .collect()
    }

    /// Cells on `lineage`, ordered by pseudotime and then by cell index
    pub fn ordered_cells(&self, lineage: usize) -> Vec<usize> {
        self.values
            .column(lineage)
            .iter()
            .enumerate()
            .filter_map(|(cell, v)| v.map(|t| (n64(t), cell)))
            .sorted()
            .map(|(_, cell)| cell)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use lineage::{centroids, TreeOptions};
    use ndarray::array;

    #[test]
    fn test_curve_segments() {
        let c = array![[0.0, 0.0], [3.0, 4.0], [3.0, 6.0]];
        let curve = LineageCurve::new(&[0, 1, 2], &c);
        assert_abs_diff_eq!(curve.length(), 7.0);
        assert_abs_diff_eq!(curve.arc_position(1), 5.0);
        assert_eq!(curve.segment(0), (0.0, 2.5));
        assert_eq!(curve.segment(1), (2.5, 6.0));
        assert_eq!(curve.segment(2), (6.0, 7.0));
    }

    #[test]
    fn test_project_clamps() {
        let c = array![[0.0, 0.0], [4.0, 0.0], [8.0, 0.0]];
        let curve = LineageCurve::new(&[0, 1, 2], &c);

        // behind the root centroid
        assert_abs_diff_eq!(curve.project(0, array![-3.0, 1.0].view()), 0.0);
        assert_abs_diff_eq!(curve.project(0, array![1.0, 5.0].view()), 1.0);
        // past the segment boundary
        assert_abs_diff_eq!(curve.project(0, array![3.5, 0.0].view()), 2.0);
        assert_abs_diff_eq!(curve.project(1, array![3.0, 0.0].view()), 3.0);
        assert_abs_diff_eq!(curve.project(1, array![5.0, -1.0].view()), 5.0);
        assert_abs_diff_eq!(curve.project(1, array![0.0, 0.0].view()), 2.0);
        assert_abs_diff_eq!(curve.project(2, array![20.0, 0.0].view()), 8.0);
        assert_abs_diff_eq!(curve.project(2, array![7.0, 0.0].view()), 7.0);
    }

    #[test]
    fn test_end_clusters_keep_order() {
        // root "a" spread around x = 0, leaf "b" around x = 10
        let xs = [-2.0, -1.0, 0.0, 1.0, 2.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let embedding = Array2::from_shape_fn((xs.len(), 2), |(i, j)| if j == 0 { xs[i] } else { 0.0 });
        let labels = xs.iter().map(|&x| if x < 5.0 { "a" } else { "b" }).collect_vec();
        let table = CellTable::from_array(embedding.view(), &labels).unwrap();
        let c = centroids(&table.embedding(), table.all_members());
        let opts = TreeOptions {
            root: lineage::RootSelection::Label("a".to_string()),
            ..Default::default()
        };
        let tree = LineageTree::build(&c, table.labels(), &table.cluster_sizes(), &opts).unwrap();
        let pt = PseudotimeMatrix::project(&table, &tree, &c);

        let values = (0..xs.len()).map(|cell| pt.get(cell, 0).unwrap()).collect_vec();
        for (v, x) in values.iter().zip(xs) {
            assert_abs_diff_eq!(*v, x + 2.0, epsilon = 1e-12);
        }
        assert!(values.iter().tuple_windows().all(|(a, b)| a < b));

        let curve = pt.curve(0);
        assert_abs_diff_eq!(curve.arc_position(0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.length(), 14.0, epsilon = 1e-12);
        assert_eq!(curve.segment(0).0, 0.0);
    }

    #[test]
    fn test_single_cluster_lineage() {
        let c = array![[1.0, 1.0]];
        let curve = LineageCurve::new(&[0], &c);
        assert_eq!(curve.length(), 0.0);
        assert_eq!(curve.project(0, array![5.0, 5.0].view()), 0.0);
    }

    #[test]
    fn test_singleton_cluster_midpoint() {
        // cluster "b" has a single cell far off the path
        let embedding = array![[0.0, 0.0], [0.0, 0.2], [4.0, 3.0], [8.0, 0.0], [8.0, 0.2]];
        let table = CellTable::from_array(embedding.view(), &["a", "a", "b", "c", "c"]).unwrap();
        let c = centroids(&table.embedding(), table.all_members());
        let opts = TreeOptions {
            root: lineage::RootSelection::Label("a".to_string()),
            ..Default::default()
        };
        let tree = LineageTree::build(&c, table.labels(), &table.cluster_sizes(), &opts).unwrap();
        let pt = PseudotimeMatrix::project(&table, &tree, &c);
        assert_eq!(pt.n_lineages(), 1);

        let (lo, hi) = pt.curve(0).segment(1);
        assert_abs_diff_eq!(pt.get(2, 0).unwrap(), 0.5 * (lo + hi));
    }

    #[test]
    fn test_absent_pairs_and_mean() {
        // a -> b branches into c (up) and d (down)
        let embedding = array![
            [0.0, 0.0],
            [0.5, 0.0],
            [4.0, 0.0],
            [4.5, 0.0],
            [8.0, 4.0],
            [8.5, 4.0],
            [8.0, -5.0],
            [8.5, -5.0]
        ];
        let labels = ["a", "a", "b", "b", "c", "c", "d", "d"];
        let table = CellTable::from_array(embedding.view(), &labels).unwrap();
        let c = centroids(&table.embedding(), table.all_members());
        let opts = TreeOptions {
            root: lineage::RootSelection::Label("a".to_string()),
            ..Default::default()
        };
        let tree = LineageTree::build(&c, table.labels(), &table.cluster_sizes(), &opts).unwrap();
        assert_eq!(tree.lineages(), &[vec![0, 1, 2], vec![0, 1, 3]]);

        let pt = PseudotimeMatrix::project(&table, &tree, &c);
        assert_eq!(pt.get(4, 1), None);
        assert_eq!(pt.get(6, 0), None);
        assert!(pt.get(4, 0).is_some());

        let mean = pt.mean_pseudotime();
        // shared cells average both lineages; branch cells only see their own
        assert_abs_diff_eq!(mean[0].unwrap(), 0.5 * (pt.get(0, 0).unwrap() + pt.get(0, 1).unwrap()));
        assert_abs_diff_eq!(mean[7].unwrap(), pt.get(7, 1).unwrap());

        let order = pt.ordered_cells(1);
        assert_eq!(order, vec![0, 1, 2, 3, 6, 7]);
    }
}
