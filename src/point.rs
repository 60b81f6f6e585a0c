//! Per-pixel feature points built from registered RGB and depth images.
use crate::error::DcError;
use crate::params::ParametersExt;

use nalgebra::{Vector2, Vector3};
use palette::{cast, Srgb};
use rayon::prelude::*;

/// A single pixel lifted into the mixed color/position/geometry feature
/// space used by the clustering metric.
#[derive(Clone, Copy, Debug)]
pub struct Point {
    /// Normalized RGB color in `[0, 1]`.
    pub color: Vector3<f32>,
    /// Image-plane position in pixels; cluster centers are sub-pixel.
    pub pos: Vector2<f32>,
    /// Depth in meters, `0` marks an invalid depth reading.
    pub depth: f32,
    /// Unit surface normal; camera-facing `(0, 0, -1)` when no normal
    /// image was supplied.
    pub normal: Vector3<f32>,
    /// Expected cluster radius in pixels at this pixel's depth.
    pub scala: f32,
}

impl Point {
    /// An all-zero point, used as the accumulator for center updates.
    #[inline]
    #[must_use]
    pub fn zero() -> Self {
        Self {
            color: Vector3::zeros(),
            pos: Vector2::zeros(),
            depth: 0.0,
            normal: Vector3::zeros(),
            scala: 0.0,
        }
    }

    /// A point is valid iff it carries a depth measurement.
    #[inline]
    #[must_use]
    pub fn valid(&self) -> bool {
        self.depth > 0.0
    }

    /// Nearest integer x-coordinate.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn spatial_x(&self) -> i32 {
        self.pos.x.round() as i32
    }

    /// Nearest integer y-coordinate.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn spatial_y(&self) -> i32 {
        self.pos.y.round() as i32
    }

    /// Expected cluster radius in pixels.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.scala
    }

    /// Expected number of cluster seeds covering this pixel, before
    /// normalization of the density image.
    #[inline]
    #[must_use]
    pub fn estimated_count(&self) -> f32 {
        if self.scala > 0.0 {
            (self.scala * self.scala).recip()
        } else {
            0.0
        }
    }
}

/// Dense, immutable W×H grid of [`Point`]s with constant-time coordinate
/// and linear-index access.
#[derive(Clone, Debug)]
pub struct PointField {
    width: u32,
    height: u32,
    points: Vec<Point>,
}

impl PointField {
    /// Frame width in pixels.
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels in the frame.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` if the frame contains no pixels.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Linear index of the pixel at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Point at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> &Point {
        &self.points[self.index(x, y)]
    }

    /// All points in row-major order.
    #[inline]
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Back-project a point into camera space using the pinhole model.
    ///
    /// Invalid points map to the origin since their depth is zero.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn world(&self, p: &Point, focal: f32) -> Vector3<f32> {
        let cx = self.width as f32 / 2.0;
        let cy = self.height as f32 / 2.0;
        p.depth * Vector3::new((p.pos.x - cx) / focal, (p.pos.y - cy) / focal, 1.0)
    }
}

impl std::ops::Index<usize> for PointField {
    type Output = Point;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

/// Build the point field for one frame.
///
/// `color` holds `W·H·3` RGB bytes, `depth` holds `W·H` millimeter values
/// with `0` marking an invalid reading, and `normals` optionally holds
/// `W·H·3` unit vector components; all buffers are row-major. Pixels
/// without a depth reading get `scala = 0` and stay invalid.
#[allow(clippy::cast_precision_loss)]
pub fn create_points(
    color: &[u8],
    depth: &[u16],
    normals: Option<&[f32]>,
    opt: &ParametersExt,
) -> Result<PointField, DcError> {
    let width = opt.width;
    let height = opt.height;
    let size = usize::try_from(u64::from(width) * u64::from(height))
        .or(Err("Invalid image dimensions in point field"))?;

    if color.len() != size.checked_mul(3).ok_or(DcError::MismatchedColorBuffer)? {
        return Err(DcError::MismatchedColorBuffer);
    }
    if depth.len() != size {
        return Err(DcError::MismatchedDepthBuffer);
    }
    if let Some(normals) = normals {
        if Some(normals.len()) != size.checked_mul(3) {
            return Err(DcError::MismatchedNormalBuffer);
        }
    }

    let rgb = cast::from_component_slice::<Srgb<u8>>(color);
    let pixel_size_factor = opt.pixel_size_factor();

    let mut points = Vec::new();
    points.try_reserve_exact(size)?;
    points.extend((0..size).map(|_| Point::zero()));

    let width_usize = width as usize;
    points
        .par_chunks_mut(width_usize)
        .enumerate()
        .for_each(|(y, row)| {
            let row_start = y * width_usize;
            for (x, p) in row.iter_mut().enumerate() {
                let i = row_start + x;
                let c: Srgb<f32> = rgb[i].into_format();
                p.color = Vector3::new(c.red, c.green, c.blue);
                p.pos = Vector2::new(x as f32, y as f32);
                let d = depth[i];
                p.depth = f32::from(d) * 0.001;
                p.scala = if d > 0 {
                    pixel_size_factor / p.depth
                } else {
                    0.0
                };
                p.normal = match normals {
                    Some(normals) => {
                        Vector3::new(normals[3 * i], normals[3 * i + 1], normals[3 * i + 2])
                    }
                    None => Vector3::new(0.0, 0.0, -1.0),
                };
            }
        });

    Ok(PointField {
        width,
        height,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{compute_parameters, Parameters};

    fn small_ext() -> ParametersExt {
        let opt = Parameters {
            cluster_count: 4,
            ..Parameters::default()
        };
        compute_parameters(&opt, 4, 2).unwrap()
    }

    #[test]
    fn converts_color_depth_and_scale() {
        let ext = small_ext();
        let mut color = vec![0u8; 4 * 2 * 3];
        color[0] = 255;
        color[4] = 51;
        let mut depth = vec![0u16; 4 * 2];
        depth[0] = 1000;
        depth[1] = 2000;

        let points = create_points(&color, &depth, None, &ext).unwrap();

        let p = points.at(0, 0);
        approx::assert_relative_eq!(p.color.x, 1.0);
        approx::assert_relative_eq!(p.depth, 1.0);
        approx::assert_relative_eq!(p.scala, ext.pixel_size_factor());
        assert!(p.valid());

        let q = points.at(1, 0);
        approx::assert_relative_eq!(q.color.y, 0.2);
        approx::assert_relative_eq!(q.scala, ext.pixel_size_factor() / 2.0);

        let invalid = points.at(2, 0);
        assert!(!invalid.valid());
        approx::assert_relative_eq!(invalid.scala, 0.0);
    }

    #[test]
    fn defaults_to_camera_facing_normal() {
        let ext = small_ext();
        let color = vec![0u8; 4 * 2 * 3];
        let depth = vec![500u16; 4 * 2];

        let points = create_points(&color, &depth, None, &ext).unwrap();
        approx::assert_relative_eq!(points.at(3, 1).normal.z, -1.0);
    }

    #[test]
    fn rejects_mismatched_buffers() {
        let ext = small_ext();
        let color = vec![0u8; 4 * 2 * 3];
        let depth = vec![0u16; 4 * 2];

        assert!(matches!(
            create_points(&color[1..], &depth, None, &ext),
            Err(DcError::MismatchedColorBuffer)
        ));
        assert!(matches!(
            create_points(&color, &depth[1..], None, &ext),
            Err(DcError::MismatchedDepthBuffer)
        ));
        let bad_normals = vec![0f32; 5];
        assert!(matches!(
            create_points(&color, &depth, Some(&bad_normals), &ext),
            Err(DcError::MismatchedNormalBuffer)
        ));
    }
}
