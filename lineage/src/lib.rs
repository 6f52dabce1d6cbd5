//! Cluster level lineage graphs: cluster centroids, a Euclidean minimum spanning tree over the
//! centroids, and the root-to-leaf paths ("lineages") of that tree once it has been rooted.

#![deny(missing_docs)]
#![deny(warnings)]

use itertools::Itertools;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use noisy_float::types::n64;
use num_traits::Float;
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::ops::Mul;
use traj_types::TrajectoryError;

/// Distance between two centroids
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistanceMetric {
    /// L2 distance
    #[default]
    Euclidean,
}

impl DistanceMetric {
    /// Distance between `x1` and `x2`
    pub fn apply<T: Float + Mul>(self, x1: &ArrayView1<T>, x2: &ArrayView1<T>) -> T {
        match self {
            DistanceMetric::Euclidean => {
                let mut dx = x2 - x1;
                dx.map_inplace(|v| {
                    *v = (*v) * (*v);
                });
                dx.sum().sqrt()
            }
        }
    }
}

/// Mean embedding coordinate of every cluster. `members[c]` lists the rows of `embedding` that
/// belong to cluster `c`. An empty cluster gets a NaN centroid, which the tree builder rejects.
pub fn centroids(embedding: &ArrayView2<f64>, members: &[Vec<usize>]) -> Array2<f64> {
    let n_dims = embedding.ncols();
    let rows: Vec<Array1<f64>> = members
        .par_iter()
        .map(|cells| {
            embedding
                .select(Axis(0), cells)
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::from_elem(n_dims, f64::NAN))
        })
        .collect();

    let mut res = Array2::<f64>::zeros((members.len(), n_dims));
    for (mut row, centroid) in res.axis_iter_mut(Axis(0)).zip(rows.iter()) {
        row.assign(centroid);
    }
    res
}

/// How the root of the lineage tree is chosen
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RootSelection {
    /// The cluster with the most cells; ties go to the lower cluster index
    #[default]
    LargestCluster,
    /// A specific cluster, e.g. a known progenitor state
    Label(String),
}

/// Options for building a `LineageTree`
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    /// Root cluster choice
    pub root: RootSelection,
    /// Clusters forced to be leaves. The spanning tree is built without them and each one is then
    /// attached to its nearest remaining cluster.
    pub end_clusters: Vec<String>,
    /// Metric used between centroids
    pub metric: DistanceMetric,
}

/// An undirected tree edge between clusters `a < b`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    /// Lower cluster index
    pub a: usize,
    /// Higher cluster index
    pub b: usize,
    /// Distance between the two centroids
    pub weight: f64,
}

impl Edge {
    fn new(x: usize, y: usize, weight: f64) -> Edge {
        Edge {
            a: x.min(y),
            b: x.max(y),
            weight,
        }
    }
}

/// A spanning tree over clusters, rooted at one cluster, with one lineage per leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct LineageTree {
    root: usize,
    edges: Vec<Edge>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    lineages: Vec<Vec<usize>>,
}

impl LineageTree {
    /// Build the minimum spanning tree over `centroids` (one row per cluster, in the same order as
    /// `labels` and `sizes`), root it and enumerate its lineages.
    ///
    /// Equal-weight edges are taken in order of their (lower, higher) cluster index pair, so the
    /// result depends only on the inputs.
    pub fn build(
        centroids: &Array2<f64>,
        labels: &[String],
        sizes: &[usize],
        options: &TreeOptions,
    ) -> Result<LineageTree, TrajectoryError> {
        let n = labels.len();
        if n == 0 {
            return Err(TrajectoryError::InvalidInput("no clusters to connect".to_string()));
        }
        if centroids.nrows() != n || sizes.len() != n {
            return Err(TrajectoryError::InvalidInput(format!(
                "{} centroids and {} cluster sizes given for {} cluster labels",
                centroids.nrows(),
                sizes.len(),
                n
            )));
        }

        let end = resolve_end_clusters(labels, &options.end_clusters)?;
        let root = resolve_root(labels, sizes, &options.root, &end)?;
        let core = (0..n).filter(|c| !end.contains(c)).collect_vec();

        let mut edges = spanning_edges(centroids, labels, &core, options.metric)?;
        for &cluster in &end {
            edges.push(attach_end_cluster(centroids, labels, cluster, &core, options.metric)?);
        }
        edges.sort_unstable_by_key(|e| (n64(e.weight), e.a, e.b));
        for e in &edges {
            debug!("tree edge {} -- {} ({:.4})", labels[e.a], labels[e.b], e.weight);
        }

        let (parent, children) = orient(n, root, &edges);
        let lineages = enumerate_lineages(root, &children);
        info!(
            "lineage tree over {} clusters rooted at '{}' has {} lineages",
            n,
            labels[root],
            lineages.len()
        );

        Ok(LineageTree {
            root,
            edges,
            parent,
            children,
            lineages,
        })
    }

    /// Number of clusters spanned by the tree
    pub fn n_clusters(&self) -> usize {
        self.parent.len()
    }

    /// Root cluster index
    pub fn root(&self) -> usize {
        self.root
    }

    /// Tree edges sorted by weight, then by cluster indices
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sum of all edge weights
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Parent of `cluster` when walking from the root; `None` for the root
    pub fn parent(&self, cluster: usize) -> Option<usize> {
        self.parent[cluster]
    }

    /// Children of `cluster`, in ascending index order
    pub fn children(&self, cluster: usize) -> &[usize] {
        &self.children[cluster]
    }

    /// Clusters without children. The root only counts when it is the sole cluster.
    pub fn leaves(&self) -> Vec<usize> {
        let n = self.n_clusters();
        (0..n)
            .filter(|&c| self.children[c].is_empty() && (c != self.root || n == 1))
            .collect()
    }

    /// One cluster path per leaf, root first, in depth-first order with children visited by
    /// ascending index
    pub fn lineages(&self) -> &[Vec<usize>] {
        &self.lineages
    }
}

fn resolve_label(labels: &[String], label: &str) -> Option<usize> {
    labels.iter().position(|l| l == label)
}

fn resolve_end_clusters(labels: &[String], end_clusters: &[String]) -> Result<BTreeSet<usize>, TrajectoryError> {
    let mut end = BTreeSet::new();
    for label in end_clusters {
        let idx = resolve_label(labels, label)
            .ok_or_else(|| TrajectoryError::Configuration(format!("unknown end cluster '{label}'")))?;
        if !end.insert(idx) {
            return Err(TrajectoryError::Configuration(format!(
                "end cluster '{label}' given more than once"
            )));
        }
    }
    if end.len() == labels.len() {
        return Err(TrajectoryError::Configuration(
            "every cluster is declared an end cluster".to_string(),
        ));
    }
    Ok(end)
}

fn resolve_root(
    labels: &[String],
    sizes: &[usize],
    root: &RootSelection,
    end: &BTreeSet<usize>,
) -> Result<usize, TrajectoryError> {
    match root {
        RootSelection::Label(label) => {
            let idx = resolve_label(labels, label)
                .ok_or_else(|| TrajectoryError::Configuration(format!("unknown root cluster '{label}'")))?;
            if end.contains(&idx) {
                return Err(TrajectoryError::Configuration(format!(
                    "root cluster '{label}' is also an end cluster"
                )));
            }
            Ok(idx)
        }
        RootSelection::LargestCluster => (0..labels.len())
            .filter(|c| !end.contains(c))
            .max_by_key(|&c| (sizes[c], Reverse(c)))
            .ok_or_else(|| TrajectoryError::Configuration("no cluster is eligible as root".to_string())),
    }
}

fn pair_distance(
    centroids: &Array2<f64>,
    labels: &[String],
    metric: DistanceMetric,
    a: usize,
    b: usize,
) -> Result<f64, TrajectoryError> {
    let d = metric.apply(&centroids.row(a), &centroids.row(b));
    if d.is_finite() {
        Ok(d)
    } else {
        Err(TrajectoryError::DisconnectedGraph(format!(
            "distance between the centroids of '{}' and '{}' is {}",
            labels[a], labels[b], d
        )))
    }
}

// Kruskal over the complete graph on `core`, which must be sorted ascending.
fn spanning_edges(
    centroids: &Array2<f64>,
    labels: &[String],
    core: &[usize],
    metric: DistanceMetric,
) -> Result<Vec<Edge>, TrajectoryError> {
    let mut candidates = Vec::with_capacity(core.len() * core.len().saturating_sub(1) / 2);
    for (a, b) in core.iter().copied().tuple_combinations() {
        candidates.push(Edge::new(a, b, pair_distance(centroids, labels, metric, a, b)?));
    }
    candidates.sort_unstable_by_key(|e| (n64(e.weight), e.a, e.b));

    let needed = core.len().saturating_sub(1);
    let mut components = UnionFind::<usize>::new(labels.len());
    let mut edges = Vec::with_capacity(needed);
    for edge in candidates {
        if edges.len() == needed {
            break;
        }
        if components.union(edge.a, edge.b) {
            edges.push(edge);
        }
    }

    if edges.len() < needed {
        return Err(TrajectoryError::DisconnectedGraph(format!(
            "spanning tree reached only {} of {} required edges",
            edges.len(),
            needed
        )));
    }
    Ok(edges)
}

fn attach_end_cluster(
    centroids: &Array2<f64>,
    labels: &[String],
    cluster: usize,
    core: &[usize],
    metric: DistanceMetric,
) -> Result<Edge, TrajectoryError> {
    let mut best: Option<Edge> = None;
    for &other in core {
        let weight = pair_distance(centroids, labels, metric, cluster, other)?;
        if best.map_or(true, |b| weight < b.weight) {
            best = Some(Edge::new(cluster, other, weight));
        }
    }
    best.ok_or_else(|| {
        TrajectoryError::DisconnectedGraph(format!("end cluster '{}' has nothing to attach to", labels[cluster]))
    })
}

fn orient(n: usize, root: usize, edges: &[Edge]) -> (Vec<Option<usize>>, Vec<Vec<usize>>) {
    let mut adjacent = vec![Vec::new(); n];
    for e in edges {
        adjacent[e.a].push(e.b);
        adjacent[e.b].push(e.a);
    }

    let mut parent = vec![None; n];
    let mut children = vec![Vec::new(); n];
    let mut visited = vec![false; n];
    visited[root] = true;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        for &next in &adjacent[node] {
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some(node);
                children[node].push(next);
                stack.push(next);
            }
        }
    }
    for c in children.iter_mut() {
        c.sort_unstable();
    }
    (parent, children)
}

fn enumerate_lineages(root: usize, children: &[Vec<usize>]) -> Vec<Vec<usize>> {
    fn walk(node: usize, children: &[Vec<usize>], path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        path.push(node);
        if children[node].is_empty() {
            out.push(path.clone());
        } else {
            for &child in &children[node] {
                walk(child, children, path, out);
            }
        }
        path.pop();
    }

    let mut out = Vec::new();
    walk(root, children, &mut Vec::new(), &mut out);
    out
}
