//! Blue-noise point placement by multi-scale kernel density optimization.
//!
//! Produces a point set whose local density approximates a target density
//! image: points are seeded greedily on a coarse mipmap level, then split
//! into weighted children and relaxed with a stochastic gradient step as
//! the pyramid is descended to full resolution.
use crate::error::DcError;
use crate::image::ScalarImage;
use crate::mipmap::compute_mipmaps;
use crate::CancelToken;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Dimensionality of the image domain.
const DIM: u32 = 2;
/// Gaussian kernel amplitude `1/√(2π)`.
const KERNEL_A: f32 = 0.398_942_28;
/// Child offset factor `√(1/2)` used when splitting a point.
const SPLIT_OFFSET: f32 = 0.707_106_78;
/// Temperature of the stochastic relaxation step.
const TEMPERATURE: f32 = 0.5;
/// Upper bound of the tabulated squared kernel argument.
const KERNEL_RANGE: f32 = 20.0;
const KERNEL_SAMPLES: usize = 2048;
/// Coarsest mipmap resolution the optimizer starts from.
const TOP_LEVEL_SIZE: u32 = 4;

/// One weighted kernel point of the optimizer.
#[derive(Clone, Copy, Debug)]
pub struct BlueNoisePoint {
    /// Sub-pixel x-coordinate at the current pyramid level.
    pub x: f32,
    /// Sub-pixel y-coordinate at the current pyramid level.
    pub y: f32,
    /// Density mass carried by the point.
    pub weight: f32,
    /// Kernel bandwidth derived from the local density and weight.
    pub scale: f32,
}

/// Tabulated Gaussian kernel over the squared distance argument.
///
/// The table is owned by the solver instance so repeated frames reuse it
/// without process-global state.
struct KernelTable {
    values: Vec<f32>,
    step: f32,
}

impl KernelTable {
    #[allow(clippy::cast_precision_loss)]
    fn new() -> Result<Self, DcError> {
        let step = KERNEL_RANGE / (KERNEL_SAMPLES - 1) as f32;
        let mut values = Vec::new();
        values.try_reserve_exact(KERNEL_SAMPLES)?;
        values.extend((0..KERNEL_SAMPLES).map(|i| {
            let d2 = i as f32 * step;
            KERNEL_A * (-0.5 * d2).exp()
        }));
        Ok(Self { values, step })
    }

    /// Evaluate `K(d²)` by linear interpolation; arguments beyond the
    /// tabulated range decay to zero anyway.
    #[inline]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn eval(&self, d2: f32) -> f32 {
        let t = d2.abs() / self.step;
        let i = t as usize;
        if i + 1 >= self.values.len() {
            return 0.0;
        }
        let frac = t - i as f32;
        self.values[i] * (1.0 - frac) + self.values[i + 1] * frac
    }
}

/// Kernel bandwidth for a point of mass `weight` in a region of density
/// `rho`, the two-dimensional case of the `(ρ/w)^(-1/D)` rule.
#[inline]
fn kernel_scale(rho: f32, weight: f32) -> f32 {
    (rho / weight).powf(-1.0 / DIM as f32)
}

/// Multi-scale blue-noise solver.
pub struct BlueNoise {
    table: KernelTable,
}

impl BlueNoise {
    /// Create a solver with a freshly tabulated kernel.
    pub fn new() -> Result<Self, DcError> {
        Ok(Self {
            table: KernelTable::new()?,
        })
    }

    /// Optimize a point set against the density image.
    ///
    /// Checks for cancellation between pyramid levels.
    pub fn compute(
        &self,
        density: &ScalarImage,
        rng: &mut StdRng,
        cancel: &CancelToken,
    ) -> Result<Vec<BlueNoisePoint>, DcError> {
        let mipmaps = compute_mipmaps(density, TOP_LEVEL_SIZE)?;
        let top = mipmaps.len() - 1;
        let mut pnts = Vec::new();
        for i in (0..=top).rev() {
            if cancel.is_cancelled() {
                return Err(DcError::Cancelled);
            }
            let need_refinement = if i == top {
                pnts = self.place_points(&mipmaps[i], rng)?;
                true
            } else {
                let (split, added) = self.split(&pnts, &mipmaps[i])?;
                pnts = split;
                added
            };
            if need_refinement {
                self.refine(&mut pnts, &mipmaps[i], rng);
            }
            log::trace!("blue noise level {}: {} points", i, pnts.len());
        }
        Ok(pnts)
    }

    /// Approximated energy of the point set at image location `(x, y)`.
    fn energy_approximation(&self, pnts: &[BlueNoisePoint], x: f32, y: f32) -> f32 {
        let mut sum = 0.0;
        for p in pnts {
            let dx = p.x - x;
            let dy = p.y - y;
            let ka = (p.scale * p.scale).recip();
            let d2 = (dx * dx + dy * dy) / (p.scale * p.scale);
            sum += ka * self.table.eval(d2);
        }
        sum
    }

    /// Total absolute deviation between the approximated energy and the
    /// target density, summed over all pixels.
    #[allow(clippy::cast_precision_loss)]
    fn energy(&self, pnts: &[BlueNoisePoint], density: &ScalarImage) -> f32 {
        let mut error = 0.0;
        for y in 0..density.height() {
            for x in 0..density.width() {
                let a = self.energy_approximation(pnts, x as f32, y as f32);
                error += (a - density.at(x, y)).abs();
            }
        }
        error
    }

    /// Gradient of the energy with respect to point `i`, using the sign of
    /// the local deviation per sample.
    #[allow(clippy::cast_precision_loss)]
    fn energy_derivative(
        &self,
        pnts: &[BlueNoisePoint],
        density: &ScalarImage,
        i: usize,
    ) -> (f32, f32) {
        let mut de_x = 0.0;
        let mut de_y = 0.0;
        let px = pnts[i].x;
        let py = pnts[i].y;
        let ps = pnts[i].scale;
        let ps_scl = (ps * ps).recip();
        for y in 0..density.height() {
            for x in 0..density.width() {
                let ux = x as f32;
                let uy = y as f32;
                let dx = ux - px;
                let dy = uy - py;
                let mut k_val = self.table.eval((dx * dx + dy * dy) * ps_scl);
                let apx = self.energy_approximation(pnts, ux, uy);
                if apx < density.at(x, y) {
                    k_val = -k_val;
                }
                de_x += k_val * dx;
                de_y += k_val * dy;
            }
        }
        let a = ps.powi(DIM as i32 + 1).recip();
        (a * de_x, a * de_y)
    }

    /// Greedily seed points on the coarsest level in a random pixel order,
    /// rolling back any candidate that increases the energy.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn place_points(
        &self,
        density: &ScalarImage,
        rng: &mut StdRng,
    ) -> Result<Vec<BlueNoisePoint>, DcError> {
        let mut indices: Vec<usize> = Vec::new();
        indices.try_reserve_exact(density.len())?;
        indices.extend(0..density.len());
        indices.shuffle(rng);

        let mut pnts: Vec<BlueNoisePoint> = Vec::new();
        pnts.try_reserve(indices.len())?;
        let mut error_current = self.energy(&pnts, density);
        log::trace!("blue noise initial error: {error_current}");
        let width = density.width() as usize;
        for i in indices {
            let rho = density.data()[i];
            if rho <= 0.0 {
                continue;
            }
            let q: u32 = if rho < 1.0 {
                0
            } else {
                ((rho.log2() / DIM as f32).ceil() as u32).min(15)
            };
            let weight = (1u32 << (DIM * q)) as f32;
            let u = BlueNoisePoint {
                x: (i % width) as f32,
                y: (i / width) as f32,
                weight,
                scale: kernel_scale(rho, weight),
            };
            pnts.push(u);
            let error_new = self.energy(&pnts, density);
            if error_new > error_current {
                let _ = pnts.pop();
            } else {
                error_current = error_new;
            }
        }
        Ok(pnts)
    }

    /// Carry the point set one level down, splitting heavy points into up
    /// to four quarter-weight children on a `√(1/2)·σ` square. Children
    /// falling into zero-density regions are discarded. The flag reports
    /// whether any point actually split.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn split(
        &self,
        pnts: &[BlueNoisePoint],
        density: &ScalarImage,
    ) -> Result<(Vec<BlueNoisePoint>, bool), DcError> {
        const DELTA: [[f32; 2]; 4] = [
            [-SPLIT_OFFSET, -SPLIT_OFFSET],
            [SPLIT_OFFSET, -SPLIT_OFFSET],
            [-SPLIT_OFFSET, SPLIT_OFFSET],
            [SPLIT_OFFSET, SPLIT_OFFSET],
        ];

        let mut out = Vec::new();
        out.try_reserve(pnts.len().saturating_mul(4))?;
        let mut added = false;
        for &p in pnts {
            let mut u = p;
            u.x *= 2.0;
            u.y *= 2.0;
            if p.weight > 1.0 {
                added = true;
                u.weight = p.weight / (1u32 << DIM) as f32;
                for delta in &DELTA {
                    let mut child = u;
                    child.x += u.scale * delta[0];
                    child.y += u.scale * delta[1];
                    let rho =
                        density.zero_border(i64::from(child.x as i32), i64::from(child.y as i32));
                    if rho > 0.0 {
                        child.scale = kernel_scale(rho, child.weight);
                        out.push(child);
                    }
                }
            } else {
                u.weight = 1.0;
                let rho = density.zero_border(i64::from(u.x as i32), i64::from(u.y as i32));
                if rho > 0.0 {
                    u.scale = kernel_scale(rho, u.weight);
                    out.push(u);
                }
            }
        }
        Ok((out, added))
    }

    /// One stochastic gradient step per point with Gaussian exploration
    /// noise.
    fn refine(&self, pnts: &mut Vec<BlueNoisePoint>, density: &ScalarImage, rng: &mut StdRng) {
        const DT: f32 = 1.0;
        for i in 0..pnts.len() {
            let c0 = DT * pnts[i].scale;
            let c_a = c0 / 2.0;
            let c_b = (TEMPERATURE * c0).sqrt();
            let (dx, dy) = self.energy_derivative(pnts, density, i);
            pnts[i].x = pnts[i].x - c_a * dx + c_b * sample_standard_normal(rng);
            pnts[i].y = pnts[i].y - c_a * dy + c_b * sample_standard_normal(rng);
        }
    }
}

/// Draw one standard normal variate with the Box-Muller transform.
fn sample_standard_normal(rng: &mut StdRng) -> f32 {
    let u1 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
    let u2 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}
