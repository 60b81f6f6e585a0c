//! Superpixel adjacency graph with geometric edge data.
use crate::cluster::Cluster;
use crate::error::DcError;
use crate::params::ParametersExt;
use crate::point::PointField;

use fxhash::{FxHashMap, FxHashSet};

/// Filters applied while collecting adjacencies from the label image.
#[derive(Clone, Copy, Debug)]
pub struct NeighborGraphSettings {
    /// Drop edges whose shared boundary has fewer pixels than this.
    pub min_abs_border_overlap: usize,
    /// Drop edges whose shared boundary is shorter than this fraction of
    /// the smaller endpoint perimeter.
    pub min_border_overlap: f32,
}

impl Default for NeighborGraphSettings {
    fn default() -> Self {
        Self {
            min_abs_border_overlap: 2,
            min_border_overlap: 0.0,
        }
    }
}

/// Undirected edge between two clusters.
#[derive(Clone, Debug)]
pub struct GraphEdge {
    /// Lower endpoint cluster index.
    pub a: usize,
    /// Higher endpoint cluster index.
    pub b: usize,
    /// Color distance between the endpoint centers.
    pub c_color: f32,
    /// Camera-space distance between the endpoint centers in meters.
    pub c_world: f32,
    /// Angular distance `1 - nₐ·n_b` between the endpoint normals.
    pub c_normal: f32,
    /// Pixels on the shared boundary, sorted ascending.
    pub border_pixels: Vec<usize>,
    /// Spectral boundary strength; `0` until the spectral stage fills it.
    pub weight: f32,
}

impl GraphEdge {
    /// Create an edge between two clusters with zeroed distances.
    #[must_use]
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            a,
            b,
            c_color: 0.0,
            c_world: 0.0,
            c_normal: 0.0,
            border_pixels: Vec::new(),
            weight: 0.0,
        }
    }
}

/// Undirected neighborhood graph over the clusters of one frame.
#[derive(Clone, Debug)]
pub struct NeighborhoodGraph {
    /// Number of cluster nodes.
    pub nodes: usize,
    /// Adjacency edges, sorted by `(a, b)`.
    pub edges: Vec<GraphEdge>,
}

impl NeighborhoodGraph {
    /// Create a graph with `nodes` clusters and no edges.
    #[must_use]
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }
}

/// Build the cluster adjacency graph from the per-pixel label image.
///
/// Two clusters are adjacent iff their pixel regions touch under
/// 4-connectivity; both sides of each touching pixel pair are recorded as
/// border pixels. Edge filtering follows the settings.
#[allow(clippy::cast_precision_loss)]
pub fn build_neighborhood_graph(
    clusters: &[Cluster],
    pixel_labels: &[i32],
    points: &PointField,
    opt: &ParametersExt,
    settings: &NeighborGraphSettings,
) -> Result<NeighborhoodGraph, DcError> {
    let width = points.width() as usize;
    let height = points.height() as usize;
    if pixel_labels.len() != width * height {
        return Err(DcError::General("Label image does not match dimensions"));
    }

    let mut borders: FxHashMap<(usize, usize), FxHashSet<usize>> = FxHashMap::default();
    let mut perimeter = Vec::new();
    perimeter.try_reserve_exact(clusters.len())?;
    perimeter.extend((0..clusters.len()).map(|_| 0usize));

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let la = pixel_labels[i];
            if la < 0 {
                continue;
            }
            #[allow(clippy::cast_sign_loss)]
            let la = la as usize;
            if la >= clusters.len() {
                return Err(DcError::General("Pixel label out of cluster range"));
            }

            let mut on_boundary = x == 0 || x + 1 == width || y == 0 || y + 1 == height;
            for &j in &[
                if x + 1 < width { Some(i + 1) } else { None },
                if y + 1 < height { Some(i + width) } else { None },
                if x > 0 { Some(i - 1) } else { None },
                if y > 0 { Some(i - width) } else { None },
            ] {
                let Some(j) = j else { continue };
                let lb = pixel_labels[j];
                if lb == pixel_labels[i] {
                    continue;
                }
                on_boundary = true;
                if lb < 0 || j < i {
                    // pairs are collected once, from the lower index side
                    continue;
                }
                #[allow(clippy::cast_sign_loss)]
                let lb = lb as usize;
                let key = (la.min(lb), la.max(lb));
                let entry = borders.entry(key).or_default();
                let _ = entry.insert(i);
                let _ = entry.insert(j);
            }
            if on_boundary {
                perimeter[la] += 1;
            }
        }
    }

    let mut keys: Vec<(usize, usize)> = borders.keys().copied().collect();
    keys.sort_unstable();

    let mut edges = Vec::new();
    edges.try_reserve(keys.len())?;
    let focal = opt.base.camera.focal;
    for key in keys {
        let (a, b) = key;
        let set = borders.remove(&key).ok_or("Border set disappeared")?;
        let mut border_pixels: Vec<usize> = set.into_iter().collect();
        border_pixels.sort_unstable();

        if border_pixels.len() < settings.min_abs_border_overlap {
            continue;
        }
        let min_perimeter = perimeter[a].min(perimeter[b]);
        if (border_pixels.len() as f32) < settings.min_border_overlap * min_perimeter as f32 {
            continue;
        }

        let ca = &clusters[a].center;
        let cb = &clusters[b].center;
        edges.push(GraphEdge {
            a,
            b,
            c_color: (ca.color - cb.color).norm(),
            c_world: (points.world(ca, focal) - points.world(cb, focal)).norm(),
            c_normal: 1.0 - ca.normal.dot(&cb.normal),
            border_pixels,
            weight: 0.0,
        });
    }

    Ok(NeighborhoodGraph {
        nodes: clusters.len(),
        edges,
    })
}
