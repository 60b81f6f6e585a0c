//! Functions for initializing and improving cluster seeds.
use crate::bluenoise::BlueNoise;
use crate::error::DcError;
use crate::image::ScalarImage;
use crate::mipmap::compute_mipmaps;
use crate::params::{ParametersExt, SeedMode};
use crate::point::PointField;
use crate::{distance, CancelToken};

use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

/// Minimum pixel radius below which a depth-derived seed is discarded;
/// smaller radii degenerate into single-pixel clusters.
const MIN_SEED_SCALA: f32 = 2.0;

/// Initial center of one cluster.
#[derive(Clone, Copy, Debug)]
pub struct Seed {
    /// Pixel x-coordinate.
    pub x: i32,
    /// Pixel y-coordinate.
    pub y: i32,
    /// Expected cluster radius in pixels at the seed position.
    pub scala: f32,
}

/// Place the initial cluster seeds with the strategy selected in the
/// parameters.
///
/// The random number generator drives every stochastic seed mode and is
/// threaded through explicitly so that a fixed seed reproduces the exact
/// same placement.
pub fn find_seeds(
    points: &PointField,
    opt: &ParametersExt,
    rng: &mut StdRng,
    cancel: &CancelToken,
) -> Result<Vec<Seed>, DcError> {
    let seeds = match opt.base.seed_mode {
        SeedMode::EquiDistant => find_seeds_grid(opt)?,
        SeedMode::DepthDependentShooting => find_seeds_depth_shooting(points, opt, rng)?,
        SeedMode::DepthDependentMipmap => find_seeds_depth_mipmap(points, opt, rng)?,
        SeedMode::BlueNoise => find_seeds_depth_blue(points, opt, rng, cancel)?,
    };
    log::debug!(
        "placed {} seeds ({:?})",
        seeds.len(),
        opt.base.seed_mode
    );
    Ok(seeds)
}

/// Space seeds evenly on the cluster grid, ignoring depth.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn find_seeds_grid(opt: &ParametersExt) -> Result<Vec<Seed>, DcError> {
    let dx = opt.cluster_dx;
    let dy = opt.cluster_dy;
    let hx = dx / 2;
    let hy = dy / 2;
    let scala = dx.max(dy) as f32;

    let total = usize::try_from(u64::from(opt.cluster_nx) * u64::from(opt.cluster_ny))
        .or(Err("Total number of seeds too large"))?;
    let mut seeds = Vec::new();
    seeds.try_reserve_exact(total)?;
    for iy in 0..opt.cluster_ny {
        let y = hy + dy * iy;
        for ix in 0..opt.cluster_nx {
            let x = hx + dx * ix;
            seeds.push(Seed {
                x: x as i32,
                y: y as i32,
                scala,
            });
        }
    }

    Ok(seeds)
}

/// Per-pixel expected seed count, normalized so the image sums to the
/// requested cluster count.
///
/// A pixel whose expected cluster radius is `scala` should statistically
/// receive `1/scala²` seeds; invalid pixels receive none. Frames without
/// any valid pixel produce an all-zero density.
fn seed_density(points: &PointField, opt: &ParametersExt) -> Result<ScalarImage, DcError> {
    let mut density = ScalarImage::new(points.width(), points.height())?;
    for (v, p) in density.data_mut().iter_mut().zip(points.points()) {
        *v = p.estimated_count();
    }
    let total = density.sum();
    if total > 0.0 {
        #[allow(clippy::cast_precision_loss)]
        let scale = opt.base.cluster_count as f32 / total;
        for v in density.data_mut().iter_mut() {
            *v *= scale;
        }
    }
    Ok(density)
}

/// Walk the mipmap pyramid top-down, descending into cells that expect
/// more than one seed and placing a seed with probability equal to the
/// cell value otherwise.
fn walk_mipmaps(
    points: &PointField,
    seeds: &mut Vec<Seed>,
    mipmaps: &[ScalarImage],
    level: usize,
    x: u32,
    y: u32,
    rng: &mut StdRng,
) {
    let v = mipmaps[level].at(x, y);

    if v > 1.0 && level > 1 {
        // do not descend into mipmap 0
        let child = &mipmaps[level - 1];
        for (cx, cy) in [
            (2 * x, 2 * y),
            (2 * x, 2 * y + 1),
            (2 * x + 1, 2 * y),
            (2 * x + 1, 2 * y + 1),
        ] {
            if cx < child.width() && cy < child.height() {
                walk_mipmaps(points, seeds, mipmaps, level - 1, cx, cy, rng);
            }
        }
    } else if rng.gen::<f32>() < v {
        // seed in the middle of the cell footprint
        let half = if level == 0 { 0 } else { 1u32 << (level - 1) };
        let sx = (x << level) + half;
        let sy = (y << level) + half;
        if sx < points.width() && sy < points.height() {
            let scala = points.at(sx, sy).scala;
            if scala > MIN_SEED_SCALA {
                #[allow(clippy::cast_possible_wrap)]
                seeds.push(Seed {
                    x: sx as i32,
                    y: sy as i32,
                    scala,
                });
            }
        }
    }
}

fn find_seeds_depth_mipmap(
    points: &PointField,
    opt: &ParametersExt,
    rng: &mut StdRng,
) -> Result<Vec<Seed>, DcError> {
    let density = seed_density(points, opt)?;
    let mipmaps = compute_mipmaps(&density, 1)?;
    let mut seeds = Vec::new();
    walk_mipmaps(points, &mut seeds, &mipmaps, mipmaps.len() - 1, 0, 0, rng);
    Ok(seeds)
}

/// Rejection sampling of seed positions weighted by squared depth.
///
/// Inverts the cumulative distribution over `depth²` with a binary search
/// per draw; pixels without a depth reading are rejected. The attempt
/// budget bounds the loop on frames where almost every pixel is invalid.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn find_seeds_depth_shooting(
    points: &PointField,
    opt: &ParametersExt,
    rng: &mut StdRng,
) -> Result<Vec<Seed>, DcError> {
    let mut cdf = Vec::new();
    cdf.try_reserve_exact(points.len())?;
    let mut running = 0.0f32;
    for p in points.points() {
        running += p.depth * p.depth;
        cdf.push(running);
    }
    let total = running;
    if total <= 0.0 {
        return Ok(Vec::new());
    }

    let wanted = opt.base.cluster_count as usize;
    let mut seeds = Vec::new();
    seeds.try_reserve(wanted)?;
    let mut attempts = 0usize;
    let budget = wanted.saturating_mul(64);
    while seeds.len() < wanted && attempts < budget {
        attempts += 1;
        let r = rng.gen::<f32>() * total;
        let index = cdf.partition_point(|&c| c <= r);
        if index >= points.len() {
            continue;
        }
        let p = &points[index];
        if !p.valid() || p.scala <= MIN_SEED_SCALA {
            continue;
        }
        let width = points.width() as usize;
        seeds.push(Seed {
            x: (index % width) as i32,
            y: (index / width) as i32,
            scala: p.scala,
        });
    }

    Ok(seeds)
}

/// Blue-noise seed placement over the depth-adaptive density.
#[allow(clippy::cast_possible_truncation)]
fn find_seeds_depth_blue(
    points: &PointField,
    opt: &ParametersExt,
    rng: &mut StdRng,
    cancel: &CancelToken,
) -> Result<Vec<Seed>, DcError> {
    let density = seed_density(points, opt)?;
    let pnts = BlueNoise::new()?.compute(&density, rng, cancel)?;

    let mut seeds = Vec::new();
    seeds.try_reserve(pnts.len())?;
    for p in &pnts {
        let x = p.x.round() as i32;
        let y = p.y.round() as i32;
        if (0..points.width() as i32).contains(&x) && (0..points.height() as i32).contains(&y) {
            #[allow(clippy::cast_sign_loss)]
            let scala = points.at(x as u32, y as u32).scala;
            seeds.push(Seed { x, y, scala });
        }
    }
    Ok(seeds)
}

/// Pixel-wise feature discontinuity map.
///
/// Interior pixels hold the sum of the horizontal and vertical central
/// differences under the clustering metric; border pixels are set to
/// infinity so seeds never settle there.
pub fn compute_edges(points: &PointField, opt: &ParametersExt) -> Result<ScalarImage, DcError> {
    let width = points.width();
    let height = points.height();
    let mut edges = ScalarImage::new(width, height)?;

    edges
        .data_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            #[allow(clippy::cast_possible_truncation)]
            let y = y as u32;
            for (x, e) in row.iter_mut().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let x = x as u32;
                *e = if x == 0 || x + 1 >= width || y == 0 || y + 1 >= height {
                    f32::INFINITY
                } else {
                    let dx = distance(points.at(x - 1, y), points.at(x + 1, y), opt);
                    let dy = distance(points.at(x, y - 1), points.at(x, y + 1), opt);
                    dx + dy
                };
            }
        });

    Ok(edges)
}

/// Move every seed to the weakest edge pixel in its 3×3 neighborhood.
///
/// This keeps initial centers off feature discontinuities where the
/// assignment step would otherwise straddle a boundary.
pub fn improve_seeds(seeds: &mut [Seed], points: &PointField, edges: &ScalarImage) {
    const DX8: [i32; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];
    const DY8: [i32; 8] = [0, -1, -1, -1, 0, 1, 1, 1];

    let width = i64::from(points.width());
    let height = i64::from(points.height());

    for seed in seeds.iter_mut() {
        let sx = i64::from(seed.x);
        let sy = i64::from(seed.y);
        if !(0..width).contains(&sx) || !(0..height).contains(&sy) {
            continue;
        }
        let mut best = (sx, sy);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let mut best_edge = edges.at(sx as u32, sy as u32);
        for i in 0..8 {
            let nx = i64::from(seed.x + DX8[i]);
            let ny = i64::from(seed.y + DY8[i]);
            if (0..width).contains(&nx) && (0..height).contains(&ny) {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let v = edges.at(nx as u32, ny as u32);
                if v < best_edge {
                    best_edge = v;
                    best = (nx, ny);
                }
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        {
            seed.x = best.0 as i32;
            seed.y = best.1 as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{compute_parameters, Parameters, SeedMode};
    use crate::point::create_points;
    use rand::SeedableRng;

    fn flat_frame(width: u32, height: u32, depth_mm: u16, count: u32) -> (PointField, ParametersExt) {
        let opt = Parameters {
            cluster_count: count,
            seed_mode: SeedMode::EquiDistant,
            ..Parameters::default()
        };
        let ext = compute_parameters(&opt, width, height).unwrap();
        let color = vec![128u8; (width * height * 3) as usize];
        let depth = vec![depth_mm; (width * height) as usize];
        let points = create_points(&color, &depth, None, &ext).unwrap();
        (points, ext)
    }

    #[test]
    fn grid_seeds_land_on_cell_centers() {
        let (points, ext) = flat_frame(64, 48, 1000, 12);
        let mut rng = StdRng::seed_from_u64(7);
        let seeds = find_seeds(&points, &ext, &mut rng, &CancelToken::new()).unwrap();

        assert_eq!(seeds.len(), 12);
        assert_eq!((seeds[0].x, seeds[0].y), (8, 8));
        assert_eq!((seeds[11].x, seeds[11].y), (56, 40));
        approx::assert_relative_eq!(seeds[0].scala, 16.0);
    }

    #[test]
    fn mipmap_seeds_follow_depth_density() {
        let mut opt = Parameters::default();
        opt.cluster_count = 120;
        opt.seed_mode = SeedMode::DepthDependentMipmap;
        let ext = compute_parameters(&opt, 64, 64).unwrap();

        let color = vec![128u8; 64 * 64 * 3];
        let mut depth = vec![0u16; 64 * 64];
        for y in 0..64 {
            for x in 0..64 {
                depth[y * 64 + x] = if x < 32 { 500 } else { 2000 };
            }
        }
        let points = create_points(&color, &depth, None, &ext).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let seeds = find_seeds(&points, &ext, &mut rng, &CancelToken::new()).unwrap();

        // seeds per pixel scale with depth², so the deeper half dominates
        let near = seeds.iter().filter(|s| s.x < 32).count();
        let far = seeds.len() - near;
        assert!(far > 4 * near.max(1), "near={near} far={far}");
        assert!(far > 40);
        assert!(seeds.len() < 250);
    }

    #[test]
    fn invalid_frames_produce_no_depth_seeds() {
        let mut opt = Parameters::default();
        opt.cluster_count = 40;
        opt.seed_mode = SeedMode::DepthDependentMipmap;
        let ext = compute_parameters(&opt, 32, 32).unwrap();
        let color = vec![0u8; 32 * 32 * 3];
        let depth = vec![0u16; 32 * 32];
        let points = create_points(&color, &depth, None, &ext).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let seeds = find_seeds(&points, &ext, &mut rng, &CancelToken::new()).unwrap();
        assert!(seeds.is_empty());

        let mut opt = opt;
        opt.seed_mode = SeedMode::DepthDependentShooting;
        let ext = compute_parameters(&opt, 32, 32).unwrap();
        let seeds = find_seeds(&points, &ext, &mut rng, &CancelToken::new()).unwrap();
        assert!(seeds.is_empty());
    }

    #[test]
    fn improve_seeds_moves_off_strong_edges() {
        let (points, ext) = flat_frame(8, 8, 1000, 4);
        let mut edges = compute_edges(&points, &ext).unwrap();
        // carve a minimum next to the first seed
        *edges.at_mut(1, 2) = -1.0;

        let mut seeds = vec![Seed {
            x: 2,
            y: 2,
            scala: 4.0,
        }];
        improve_seeds(&mut seeds, &points, &edges);
        assert_eq!((seeds[0].x, seeds[0].y), (1, 2));
    }

    #[test]
    fn edge_field_is_infinite_on_the_border() {
        let (points, ext) = flat_frame(8, 8, 1000, 4);
        let edges = compute_edges(&points, &ext).unwrap();

        assert!(edges.at(0, 3).is_infinite());
        assert!(edges.at(7, 3).is_infinite());
        assert!(edges.at(3, 0).is_infinite());
        approx::assert_relative_eq!(edges.at(3, 3), 0.0);
    }
}
