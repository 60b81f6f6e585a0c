//! Cluster labelings: component cuts, contour-map merging, relabeling.
use crate::error::DcError;
use crate::graph::NeighborhoodGraph;

use fxhash::FxHashMap;

/// Assignment of every cluster to a segment label.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterLabeling {
    /// `labels[cluster_id]` is the segment the cluster belongs to.
    pub labels: Vec<usize>,
    /// Number of distinct segments; labels lie in `[0, num_labels)` after
    /// [`relabel`](Self::relabel).
    pub num_labels: usize,
}

impl ClusterLabeling {
    /// Build a labeling from raw labels and compact them.
    #[must_use]
    pub fn create_clean(labels: Vec<usize>) -> Self {
        let mut x = Self {
            labels,
            num_labels: 0,
        };
        x.relabel();
        x
    }

    /// Compact the labels to the contiguous range `[0, num_labels)`,
    /// keeping the first-occurrence order of the original labels.
    pub fn relabel(&mut self) {
        let mut remap = FxHashMap::default();
        let mut next = 0usize;
        for label in self.labels.iter_mut() {
            let compact = *remap.entry(*label).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            });
            *label = compact;
        }
        self.num_labels = next;
    }
}

/// Cut the graph at a boundary strength threshold.
///
/// Edges with `weight <= threshold` survive; the connected components of
/// the surviving graph become the segments. Clusters stranded without any
/// surviving edge each form their own segment.
pub fn labels_from_boundaries(
    graph: &NeighborhoodGraph,
    threshold: f32,
) -> Result<ClusterLabeling, DcError> {
    let n = graph.nodes;
    let mut adjacency: Vec<Vec<usize>> = Vec::new();
    adjacency.try_reserve_exact(n)?;
    adjacency.extend((0..n).map(|_| Vec::new()));
    for e in &graph.edges {
        if e.weight <= threshold {
            adjacency[e.a].push(e.b);
            adjacency[e.b].push(e.a);
        }
    }

    let mut labels = Vec::new();
    labels.try_reserve_exact(n)?;
    labels.extend((0..n).map(|_| usize::MAX));
    let mut queue = Vec::new();
    let mut num_labels = 0usize;
    for start in 0..n {
        if labels[start] != usize::MAX {
            continue;
        }
        labels[start] = num_labels;
        queue.clear();
        queue.push(start);
        let mut head = 0;
        while head < queue.len() {
            let v = queue[head];
            head += 1;
            for &u in &adjacency[v] {
                if labels[u] == usize::MAX {
                    labels[u] = num_labels;
                    queue.push(u);
                }
            }
        }
        num_labels += 1;
    }

    Ok(ClusterLabeling { labels, num_labels })
}

/// Ultrametric contour map cut: merge segments across edges in ascending
/// weight order until the first edge at or above the threshold.
#[must_use]
pub fn ucm(graph: &NeighborhoodGraph, threshold: f32) -> ClusterLabeling {
    let mut labels: Vec<usize> = (0..graph.nodes).collect();

    let mut edges: Vec<(f32, usize, usize)> = graph
        .edges
        .iter()
        .map(|e| (e.weight, e.a, e.b))
        .collect();
    edges.sort_unstable_by(|x, y| x.0.total_cmp(&y.0));

    for &(weight, a, b) in &edges {
        if weight >= threshold {
            break;
        }
        let l_old = labels[a];
        let l_new = labels[b];
        if l_old != l_new {
            for label in labels.iter_mut() {
                if *label == l_old {
                    *label = l_new;
                }
            }
        }
    }

    ClusterLabeling::create_clean(labels)
}
