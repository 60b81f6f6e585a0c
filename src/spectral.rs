//! Spectral partitioning of the superpixel neighborhood graph.
//!
//! The affinity of every graph edge is turned into a scalar boundary
//! strength by solving the generalized eigenproblem of the normalized
//! graph Laplacian and accumulating eigenvector differences across each
//! edge, weighted by the inverse square root of the eigenvalue.
use crate::cluster::Cluster;
use crate::error::DcError;
use crate::graph::NeighborhoodGraph;
use crate::params::ParametersExt;
use crate::point::PointField;

use nalgebra::DMatrix;

/// Color normalization constant of the affinity, matching the contour
/// detection convention for frames of a few thousand superpixels.
const WEIGHT_RHO: f32 = 0.01;
/// Convergence threshold of the eigensolver.
const EIGEN_EPS: f32 = 1.0e-7;
/// Iteration budget of the eigensolver before giving up.
const EIGEN_MAX_ITER: usize = 1000;

/// Annotate the graph edges with spectral boundary strengths.
///
/// Returns a copy of the graph whose `weight` fields hold the accumulated
/// eigenvector differences. An empty graph passes through unchanged.
pub fn spectral_segmentation(
    clusters: &[Cluster],
    graph: &NeighborhoodGraph,
    points: &PointField,
    opt: &ParametersExt,
) -> Result<NeighborhoodGraph, DcError> {
    let mut result = graph.clone();
    if graph.nodes == 0 {
        return Ok(result);
    }

    let affinities = edge_affinities(clusters, graph, points, opt);
    let pairs: Vec<(usize, usize)> = graph.edges.iter().map(|e| (e.a, e.b)).collect();
    let weights = spectral_edge_weights(
        graph.nodes,
        &pairs,
        &affinities,
        opt.base.spectral.num_eigenvectors,
    )?;
    for (e, w) in result.edges.iter_mut().zip(weights) {
        e.weight = w;
    }
    Ok(result)
}

/// Edge affinities in `(0, 1]` from the per-edge color, spatial, and
/// normal distances.
///
/// With `concave_only` set, the normal term scores only edges whose
/// normals lean toward each other along the line connecting the centers;
/// convex transitions, which are usually surface curvature rather than
/// object boundaries, contribute nothing.
#[allow(clippy::cast_precision_loss)]
pub fn edge_affinities(
    clusters: &[Cluster],
    graph: &NeighborhoodGraph,
    points: &PointField,
    opt: &ParametersExt,
) -> Vec<f32> {
    let s = &opt.base.spectral;
    let color_normalizer = ((graph.nodes as f32).sqrt() * WEIGHT_RHO).recip();
    let focal = opt.base.camera.focal;

    graph
        .edges
        .iter()
        .map(|e| {
            let w_color = e.c_color * color_normalizer;
            let w_spatial = (e.c_world / 4.0 - 1.0).clamp(0.0, 4.0);
            let w_normal = if s.concave_only {
                let ca = &clusters[e.a].center;
                let cb = &clusters[e.b].center;
                let d = points.world(cb, focal) - points.world(ca, focal);
                let len = d.norm();
                if len > 0.0 {
                    let d = d / len;
                    let u = ca.normal.dot(&d) - cb.normal.dot(&d);
                    3.0 * u.max(0.0)
                } else {
                    0.0
                }
            } else {
                3.0 * e.c_normal
            };
            (-(s.w_spatial * w_spatial + s.w_color * w_color + s.w_normal * w_normal)).exp()
        })
        .collect()
}

/// Boundary strength per edge from the smallest generalized eigenpairs of
/// `(D - W, D)`.
///
/// Isolated nodes are connected to every other node with a uniform small
/// weight and unit degree first, which keeps the degree matrix invertible.
/// The generalized problem is reduced to an ordinary symmetric one through
/// `D^(-1/2)`, eigenpairs are sorted ascending, the trivial smallest one is
/// discarded, and the next `min(n - 1, num_eigenvectors)` contribute
/// `|ṽ[a] - ṽ[b]| / √λ` per edge, using min-max normalized eigenvector
/// components. Non-positive eigenvalues and degenerate component ranges
/// are skipped as numerical guards.
#[allow(clippy::cast_precision_loss)]
pub fn spectral_edge_weights(
    nodes: usize,
    pairs: &[(usize, usize)],
    affinities: &[f32],
    num_eigenvectors: u32,
) -> Result<Vec<f32>, DcError> {
    if pairs.len() != affinities.len() {
        return Err(DcError::General("Affinity count does not match edge count"));
    }
    let mut edge_weight = Vec::new();
    edge_weight.try_reserve_exact(pairs.len())?;
    edge_weight.extend((0..pairs.len()).map(|_| 0.0f32));
    if nodes == 0 {
        return Ok(edge_weight);
    }

    let mut w = DMatrix::<f32>::zeros(nodes, nodes);
    let mut degree = Vec::new();
    degree.try_reserve_exact(nodes)?;
    degree.extend((0..nodes).map(|_| 0.0f32));
    for (&(a, b), &aff) in pairs.iter().zip(affinities) {
        if a >= nodes || b >= nodes {
            return Err(DcError::General("Edge endpoint out of range"));
        }
        w[(a, b)] = aff;
        w[(b, a)] = aff;
        degree[a] += aff;
        degree[b] += aff;
    }

    // connect isolated nodes to everything so D stays invertible
    for i in 0..nodes {
        if degree[i] == 0.0 {
            log::debug!("cluster {i} has no connections");
            degree[i] = 1.0;
            let q = 1.0 / (nodes as f32 - 1.0);
            for j in 0..nodes {
                if j == i {
                    continue;
                }
                w[(i, j)] = q;
                w[(j, i)] = q;
            }
        }
    }

    // reduce A v = λ D v to the symmetric problem
    // D^(-1/2) A D^(-1/2) y = λ y with v = D^(-1/2) y
    let inv_sqrt_d: Vec<f32> = degree.iter().map(|d| d.sqrt().recip()).collect();
    let mut reduced = DMatrix::<f32>::zeros(nodes, nodes);
    for i in 0..nodes {
        for j in 0..nodes {
            let a_ij = if i == j {
                degree[i] - w[(i, j)]
            } else {
                -w[(i, j)]
            };
            reduced[(i, j)] = a_ij * inv_sqrt_d[i] * inv_sqrt_d[j];
        }
    }

    log::debug!("solving {nodes}x{nodes} eigensystem");
    let eigen = reduced
        .try_symmetric_eigen(EIGEN_EPS, EIGEN_MAX_ITER)
        .ok_or(DcError::EigenConvergence)?;

    let mut order: Vec<usize> = (0..nodes).collect();
    order.sort_unstable_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));

    let used = (nodes - 1).min(num_eigenvectors as usize);
    for k in 0..used {
        let idx = order[k + 1];
        let lambda = eigen.eigenvalues[idx];
        if lambda <= 0.0 {
            // omit if the eigenvalue is not positive
            continue;
        }
        let strength = lambda.sqrt().recip();

        let column = eigen.eigenvectors.column(idx);
        let v: Vec<f32> = (0..nodes).map(|i| column[i] * inv_sqrt_d[i]).collect();
        let min = v.iter().copied().fold(f32::INFINITY, f32::min);
        let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        if range <= 0.0 || !range.is_finite() {
            continue;
        }

        for (weight, &(a, b)) in edge_weight.iter_mut().zip(pairs) {
            let va = (v[a] - min) / range;
            let vb = (v[b] - min) / range;
            *weight += strength * (va - vb).abs();
        }
    }

    Ok(edge_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_node_is_regularized_without_nans() {
        let pairs = [(0usize, 1usize)];
        let affinities = [1.0f32];
        let weights = spectral_edge_weights(3, &pairs, &affinities, 4).unwrap();

        assert_eq!(weights.len(), 1);
        assert!(weights.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn empty_graph_produces_no_weights() {
        let weights = spectral_edge_weights(0, &[], &[], 4).unwrap();
        assert!(weights.is_empty());
    }

    #[test]
    fn single_node_has_nothing_to_cut() {
        let weights = spectral_edge_weights(1, &[], &[], 4).unwrap();
        assert!(weights.is_empty());
    }

    #[test]
    fn mismatched_affinities_are_rejected() {
        assert!(matches!(
            spectral_edge_weights(2, &[(0, 1)], &[], 4),
            Err(DcError::General(_))
        ));
    }

    #[test]
    fn weak_bridge_gets_the_strongest_boundary() {
        // two triangles joined by one weak edge
        let pairs = [
            (0usize, 1usize),
            (0, 2),
            (1, 2),
            (3, 4),
            (3, 5),
            (4, 5),
            (2, 3),
        ];
        let affinities = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.01];
        let weights = spectral_edge_weights(6, &pairs, &affinities, 1).unwrap();

        let bridge = weights[6];
        for (i, &w) in weights.iter().enumerate().take(6) {
            assert!(bridge > w, "edge {i}: bridge {bridge} <= {w}");
        }
    }
}
