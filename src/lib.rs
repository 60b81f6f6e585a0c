//! Depth-adaptive superpixel segmentation for RGB-D images.
//!
//! The crate partitions a registered RGB + depth frame into compact,
//! depth-aware superpixels with an iterative k-means-style assignment
//! whose seed density and search radius adapt to scene depth, then groups
//! the superpixels into larger segments by spectral analysis of their
//! neighborhood graph.
//!
//! The pipeline consumes raw row-major pixel buffers and emits cluster
//! sets, label images, an annotated adjacency graph, and a segment
//! labeling; decoding images and visualizing results are left to the
//! caller.
//!
//! ## Usage
//!
//! ```
//! use depth_clustering::params::{Parameters, SeedMode};
//! use depth_clustering::{segment_frame, CancelToken};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (width, height) = (16, 16);
//! let color = vec![128u8; (width * height * 3) as usize];
//! let depth = vec![1500u16; (width * height) as usize];
//!
//! let opt = Parameters {
//!     cluster_count: 4,
//!     iterations: 2,
//!     seed_mode: SeedMode::EquiDistant,
//!     ..Parameters::default()
//! };
//! let segmentation =
//!     segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new())?;
//! assert_eq!(segmentation.clusters.len(), 4);
//! assert!(segmentation.pixel_labels.iter().all(|&l| l >= 0));
//! # Ok(())
//! # }
//! ```
//!
//! Each stage is also exposed on its own ([`point::create_points`],
//! [`seed::find_seeds`], [`cluster::compute_superpixels`],
//! [`graph::build_neighborhood_graph`], [`spectral::spectral_segmentation`],
//! and the labeling utilities in [`labels`]), so callers can run a partial
//! pipeline or feed a synthetic graph straight into the spectral stage.
#![forbid(
    absolute_paths_not_starting_with_crate,
    missing_docs,
    non_ascii_idents,
    noop_method_call,
    unsafe_code,
    unused_results
)]
#![warn(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod bluenoise;
pub mod cluster;
pub mod error;
pub mod graph;
pub mod image;
pub mod labels;
pub mod mipmap;
pub mod params;
pub mod point;
pub mod seed;
pub mod spectral;

use crate::cluster::Cluster;
use crate::error::DcError;
use crate::graph::{NeighborGraphSettings, NeighborhoodGraph};
use crate::labels::ClusterLabeling;
use crate::params::ParametersExt;
use crate::point::Point;

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Squared mixed feature distance between a point and a cluster center.
///
/// Monotone in [`distance`], so assignment comparisons can skip the square
/// root.
#[inline]
fn distance_squared(a: &Point, b: &Point, opt: &ParametersExt) -> f32 {
    let d_color = (a.color - b.color).norm_squared();
    let d_pos = (a.pos - b.pos).norm_squared();
    let d_normal = 1.0 - a.normal.dot(&b.normal);
    let d_depth = (a.depth - b.depth) * (a.depth - b.depth);
    opt.base.weight_color * opt.base.weight_color * d_color
        + opt.weight_spatial_final * opt.weight_spatial_final * d_pos
        + opt.base.weight_normal * opt.base.weight_normal * d_normal
        + opt.base.weight_depth * opt.base.weight_depth * d_depth
}

/// Mixed feature distance between two points under the configured weights.
#[inline]
fn distance(a: &Point, b: &Point, opt: &ParametersExt) -> f32 {
    distance_squared(a, b, opt).max(0.0).sqrt()
}

/// Cooperative cancellation flag shared between a caller and a running
/// pipeline.
///
/// Cloning the token shares the flag; cancelling from any clone stops the
/// pipeline at its next checkpoint.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Everything one frame of the pipeline produces.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// Final superpixel clusters.
    pub clusters: Vec<Cluster>,
    /// Per-pixel cluster labels, `-1` for unassigned pixels.
    pub pixel_labels: Vec<i32>,
    /// Cluster adjacency graph annotated with spectral boundary strengths.
    pub graph: NeighborhoodGraph,
    /// Segment assignment per cluster.
    pub labeling: ClusterLabeling,
}

/// Run the full segmentation pipeline on one RGB-D frame.
///
/// `color` holds `W·H·3` RGB bytes, `depth` holds `W·H` millimeter values
/// with `0` marking invalid readings, and `normals` optionally holds
/// `W·H·3` unit vector components, all row-major. A frame without a single
/// valid pixel yields an empty [`Segmentation`] rather than an error.
/// Cancellation through the token aborts with [`DcError::Cancelled`] and
/// discards all intermediate buffers.
pub fn segment_frame(
    color: &[u8],
    depth: &[u16],
    normals: Option<&[f32]>,
    width: u32,
    height: u32,
    opt: &params::Parameters,
    cancel: &CancelToken,
) -> Result<Segmentation, DcError> {
    let opt_ext = params::compute_parameters(opt, width, height)?;
    let points = point::create_points(color, depth, normals, &opt_ext)?;
    let mut rng = StdRng::seed_from_u64(opt.rng_seed);

    let edges = seed::compute_edges(&points, &opt_ext)?;
    let clusters =
        cluster::compute_superpixels(&points, Some(&edges), &opt_ext, &mut rng, cancel)?;
    let pixel_labels = cluster::compute_pixel_labels(&clusters, &points)?;

    let graph = graph::build_neighborhood_graph(
        &clusters,
        &pixel_labels,
        &points,
        &opt_ext,
        &NeighborGraphSettings::default(),
    )?;
    let graph = spectral::spectral_segmentation(&clusters, &graph, &points, &opt_ext)?;
    let labeling = labels::labels_from_boundaries(&graph, opt.spectral.segment_threshold)?;

    Ok(Segmentation {
        clusters,
        pixel_labels,
        graph,
        labeling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{compute_parameters, Parameters};
    use nalgebra::{Vector2, Vector3};

    fn probe(pos: (f32, f32), color: f32, depth: f32) -> Point {
        Point {
            color: Vector3::new(color, color, color),
            pos: Vector2::new(pos.0, pos.1),
            depth,
            normal: Vector3::new(0.0, 0.0, -1.0),
            scala: 0.0,
        }
    }

    #[test]
    fn metric_mixes_the_configured_weights() {
        let opt = Parameters {
            cluster_count: 4,
            weight_color: 2.0,
            weight_spatial: 1.0,
            weight_normal: 0.0,
            weight_depth: 3.0,
            ..Parameters::default()
        };
        let ext = compute_parameters(&opt, 32, 32).unwrap();

        let a = probe((0.0, 0.0), 0.0, 1.0);
        let b = probe((4.0, 0.0), 0.5, 1.5);

        // color 4·(3·0.25), spatial (1/radius)²·16, depth 9·0.25
        let expected = 4.0 * 0.75
            + ext.weight_spatial_final * ext.weight_spatial_final * 16.0
            + 9.0 * 0.25;
        approx::assert_relative_eq!(distance_squared(&a, &b, &ext), expected, max_relative = 1e-5);
        approx::assert_relative_eq!(distance(&a, &b, &ext), expected.sqrt(), max_relative = 1e-5);
    }

    #[test]
    fn identical_points_are_at_distance_zero() {
        let opt = Parameters::default();
        let ext = compute_parameters(&opt, 32, 32).unwrap();
        let a = probe((3.0, 7.0), 0.25, 2.0);
        approx::assert_relative_eq!(distance(&a, &a, &ext), 0.0);
    }

    #[test]
    fn cancel_token_clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
