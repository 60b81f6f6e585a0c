//! Iterative depth-adaptive cluster assignment.
use crate::error::DcError;
use crate::image::ScalarImage;
use crate::params::ParametersExt;
use crate::point::{Point, PointField};
use crate::seed::{find_seeds, improve_seeds, Seed};
use crate::{distance_squared, CancelToken};

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rayon::prelude::*;

/// A cluster center together with the linear indices of its owned pixels.
#[derive(Clone, Debug)]
pub struct Cluster {
    /// Mean feature point of the owned pixels; `scala` is pinned to the
    /// seed position rather than averaged.
    pub center: Point,
    /// Linear pixel indices owned by this cluster.
    pub pixel_ids: Vec<usize>,
}

impl Cluster {
    /// Create an empty cluster centered on a seed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_seed(seed: &Seed) -> Self {
        let mut center = Point::zero();
        center.pos = Vector2::new(seed.x as f32, seed.y as f32);
        center.scala = seed.scala;
        Self {
            center,
            pixel_ids: Vec::new(),
        }
    }

    /// A cluster is valid iff it owns pixels and its center kept a usable
    /// normal through the last update.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.pixel_ids.is_empty() && self.center.normal.norm_squared() > 0.0
    }

    /// Recompute the center from the owned pixels.
    ///
    /// Color and position average over every owned pixel; depth and normal
    /// average over the valid ones only. A cluster whose valid pixels sum
    /// to a zero-length normal ends up invalid and is dropped by the
    /// caller. The expected radius is a property of the seed position and
    /// survives the update unchanged.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_center(&mut self, points: &PointField) {
        if self.pixel_ids.is_empty() {
            return;
        }
        let old_scala = self.center.scala;
        let mut center = Point::zero();
        let mut n_valid = 0u32;
        for &i in &self.pixel_ids {
            let p = &points[i];
            center.color += p.color;
            center.pos += p.pos;
            if p.valid() {
                center.depth += p.depth;
                center.normal += p.normal;
                n_valid += 1;
            }
        }
        let n = self.pixel_ids.len() as f32;
        center.color /= n;
        center.pos /= n;
        if n_valid > 0 {
            center.depth /= n_valid as f32;
            let norm = center.normal.norm();
            if norm > 0.0 {
                center.normal /= norm;
            } else {
                center.normal = Vector3::zeros();
            }
        } else {
            center.depth = 0.0;
            center.normal = Vector3::zeros();
        }
        center.scala = old_scala;
        self.center = center;
    }
}

/// Create one cluster per seed, initially owning the square window of
/// half-width `scala / 2` around the seed, and drop the ones that come
/// out invalid.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn create_clusters(
    seeds: &[Seed],
    points: &PointField,
    opt: &ParametersExt,
) -> Result<Vec<Cluster>, DcError> {
    let width = i32::try_from(opt.width).or(Err("Image width out of range"))?;
    let height = i32::try_from(opt.height).or(Err("Image height out of range"))?;

    let mut clusters = Vec::new();
    clusters.try_reserve(seeds.len())?;
    for seed in seeds {
        let mut c = Cluster::from_seed(seed);
        let r = ((c.center.radius() / 2.0).max(0.0)) as i32;
        let xmin = (seed.x - r).max(0) as u32;
        let xmax = (seed.x + r).min(width - 1) as u32;
        let ymin = (seed.y - r).max(0) as u32;
        let ymax = (seed.y + r).min(height - 1) as u32;
        let window = ((xmax - xmin + 1) * (ymax - ymin + 1)) as usize;
        c.pixel_ids.try_reserve(window)?;
        for yi in ymin..=ymax {
            for xi in xmin..=xmax {
                c.pixel_ids.push(points.index(xi, yi));
            }
        }
        c.update_center(points);
        if c.is_valid() {
            clusters.push(c);
        }
    }
    Ok(clusters)
}

/// One assignment-and-update iteration.
///
/// Every cluster scans the window of radius `scala · coverage` around its
/// center and bids for the valid pixels inside it; each pixel goes to the
/// closest bidding cluster, with ties resolved in favor of the lower
/// cluster index. Centers are then recomputed and invalid clusters
/// dropped, so the cluster count can shrink between iterations.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn move_clusters(
    clusters: &mut Vec<Cluster>,
    points: &PointField,
    opt: &ParametersExt,
) -> Result<(), DcError> {
    let width = points.width() as i32;
    let height = points.height() as i32;

    // Window scans are independent per cluster; the candidate lists are
    // merged sequentially in cluster index order, which makes the
    // tie-break deterministic.
    let candidates: Vec<Vec<(usize, f32)>> = clusters
        .par_iter()
        .map(|c| {
            let cx = c.center.spatial_x();
            let cy = c.center.spatial_y();
            let r = (c.center.scala * opt.base.coverage) as i32;
            let xmin = (cx - r).max(0) as u32;
            let xmax = (cx + r).min(width).max(0) as u32;
            let ymin = (cy - r).max(0) as u32;
            let ymax = (cy + r).min(height).max(0) as u32;
            let mut local = Vec::new();
            for y in ymin..ymax {
                for x in xmin..xmax {
                    let i = points.index(x, y);
                    let p = &points[i];
                    if !p.valid() {
                        continue;
                    }
                    local.push((i, distance_squared(p, &c.center, opt)));
                }
            }
            local
        })
        .collect();

    let mut best_dist = Vec::new();
    best_dist.try_reserve_exact(points.len())?;
    best_dist.extend((0..points.len()).map(|_| f32::INFINITY));
    let mut best_label = Vec::new();
    best_label.try_reserve_exact(points.len())?;
    best_label.extend((0..points.len()).map(|_| -1i64));

    for (j, local) in candidates.iter().enumerate() {
        let j_i64 = i64::try_from(j).or(Err("Cluster index out of range"))?;
        for &(i, d) in local {
            if d < best_dist[i] {
                best_dist[i] = d;
                best_label[i] = j_i64;
            }
        }
    }

    for c in clusters.iter_mut() {
        c.pixel_ids.clear();
    }
    for (i, &label) in best_label.iter().enumerate() {
        if label >= 0 {
            clusters[label as usize].pixel_ids.push(i);
        }
    }
    for c in clusters.iter_mut() {
        c.update_center(points);
    }
    clusters.retain(Cluster::is_valid);

    Ok(())
}

/// Run the full clustering: seed, improve, create, then iterate
/// [`move_clusters`] with a cancellation checkpoint between iterations.
pub fn compute_superpixels(
    points: &PointField,
    edges: Option<&ScalarImage>,
    opt: &ParametersExt,
    rng: &mut StdRng,
    cancel: &CancelToken,
) -> Result<Vec<Cluster>, DcError> {
    let mut seeds = find_seeds(points, opt, rng, cancel)?;
    if let Some(edges) = edges {
        improve_seeds(&mut seeds, points, edges);
    }
    let mut clusters = create_clusters(&seeds, points, opt)?;
    for _ in 0..opt.base.iterations {
        if cancel.is_cancelled() {
            return Err(DcError::Cancelled);
        }
        move_clusters(&mut clusters, points, opt)?;
    }
    log::debug!(
        "{} clusters after {} iterations",
        clusters.len(),
        opt.base.iterations
    );
    Ok(clusters)
}

/// Per-pixel cluster labels, `-1` for pixels no cluster owns.
pub fn compute_pixel_labels(
    clusters: &[Cluster],
    points: &PointField,
) -> Result<Vec<i32>, DcError> {
    let mut labels = Vec::new();
    labels.try_reserve_exact(points.len())?;
    labels.extend((0..points.len()).map(|_| -1i32));
    for (j, c) in clusters.iter().enumerate() {
        let j = i32::try_from(j).or(Err("Cluster index out of range"))?;
        for &i in &c.pixel_ids {
            labels[i] = j;
        }
    }
    Ok(labels)
}
