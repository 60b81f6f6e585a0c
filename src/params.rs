//! Clustering parameters and the per-frame values derived from them.
use crate::error::DcError;

use num_traits::ToPrimitive;

/// Strategy used to place the initial cluster seeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeedMode {
    /// Seeds on a regular grid at cell centers, ignoring depth.
    EquiDistant,
    /// Rejection sampling of pixels weighted by squared depth.
    DepthDependentShooting,
    /// Density-weighted random walk down a sum mipmap pyramid.
    DepthDependentMipmap,
    /// Blue-noise relaxation of a depth-adaptive density function.
    BlueNoise,
}

/// Pinhole camera intrinsics of the depth sensor.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// Focal length in pixels.
    pub focal: f32,
}

/// Settings for the spectral segmentation stage.
#[derive(Clone, Copy, Debug)]
pub struct SpectralSettings {
    /// Number of non-trivial eigenvectors used for edge strengths.
    pub num_eigenvectors: u32,
    /// Weight of the spatial term in the edge affinity.
    pub w_spatial: f32,
    /// Weight of the color term in the edge affinity.
    pub w_color: f32,
    /// Weight of the normal term in the edge affinity.
    pub w_normal: f32,
    /// Score only concave normal transitions, which usually mark object
    /// boundaries, instead of the symmetric angular distance.
    pub concave_only: bool,
    /// Boundary strength threshold used to cut the graph into segments.
    pub segment_threshold: f32,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            num_eigenvectors: 16,
            w_spatial: 1.0,
            w_color: 1.0,
            w_normal: 1.0,
            concave_only: true,
            segment_threshold: 1.0,
        }
    }
}

/// Base parameters of the depth-adaptive clustering pipeline.
#[derive(Clone, Copy, Debug)]
pub struct Parameters {
    /// Target number of clusters.
    pub cluster_count: u32,
    /// Number of assignment-and-update iterations.
    pub iterations: u32,
    /// Search radius multiplier for the assignment window.
    pub coverage: f32,
    /// Color weight of the point metric.
    pub weight_color: f32,
    /// Image-plane position weight of the point metric, before
    /// normalization by the cluster radius.
    pub weight_spatial: f32,
    /// Normal weight of the point metric.
    pub weight_normal: f32,
    /// Depth weight of the point metric.
    pub weight_depth: f32,
    /// Seed placement strategy.
    pub seed_mode: SeedMode,
    /// Depth sensor intrinsics.
    pub camera: Camera,
    /// Physical cluster radius in meters; together with the focal length
    /// this fixes the expected cluster radius in pixels at a given depth.
    pub cluster_radius_meters: f32,
    /// Seed for all random draws, making the pipeline reproducible.
    pub rng_seed: u64,
    /// Spectral segmentation settings.
    pub spectral: SpectralSettings,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            cluster_count: 400,
            iterations: 5,
            coverage: 1.7,
            weight_color: 2.0,
            weight_spatial: 1.0,
            weight_normal: 3.0,
            weight_depth: 1.0,
            seed_mode: SeedMode::DepthDependentMipmap,
            camera: Camera { focal: 580.0 },
            cluster_radius_meters: 0.025,
            rng_seed: 0,
            spectral: SpectralSettings::default(),
        }
    }
}

/// Parameters extended with values derived from the image dimensions.
///
/// The derived values are a pure function of the base parameters and
/// `(width, height)`; they are computed once per frame by
/// [`compute_parameters`].
#[derive(Clone, Copy, Debug)]
pub struct ParametersExt {
    /// Base parameters the derived values were computed from.
    pub base: Parameters,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Cluster count adjusted to fill the seed grid exactly.
    pub cluster_count: u32,
    /// Number of seed grid columns.
    pub cluster_nx: u32,
    /// Number of seed grid rows.
    pub cluster_ny: u32,
    /// Horizontal seed grid spacing in pixels.
    pub cluster_dx: u32,
    /// Vertical seed grid spacing in pixels.
    pub cluster_dy: u32,
    /// Diagonal of one seed grid cell in pixels.
    pub radius: f32,
    /// Reciprocal of `radius`.
    pub spatial_normalizer: f32,
    /// Spatial metric weight normalized by the cluster radius.
    pub weight_spatial_final: f32,
}

impl ParametersExt {
    /// Expected cluster radius in pixels at one meter depth.
    #[inline]
    #[must_use]
    pub fn pixel_size_factor(&self) -> f32 {
        self.base.camera.focal * self.base.cluster_radius_meters
    }
}

/// Derive the per-frame clustering parameters for an image of the given
/// dimensions.
///
/// All parameter validation happens here, before any per-pixel work:
/// dimensions and cluster count must be non-zero, the cluster count must be
/// smaller than the pixel count, and every floating point parameter must be
/// finite.
#[allow(clippy::cast_precision_loss)]
pub fn compute_parameters(
    opt: &Parameters,
    width: u32,
    height: u32,
) -> Result<ParametersExt, DcError> {
    if width == 0 || height == 0 {
        return Err(DcError::InvalidImageDimension);
    }
    if opt.cluster_count == 0 {
        return Err(DcError::ZeroClusterCount);
    }
    match u64::from(opt.cluster_count).cmp(&(u64::from(width) * u64::from(height))) {
        std::cmp::Ordering::Less => {}
        std::cmp::Ordering::Equal | std::cmp::Ordering::Greater => {
            return Err(DcError::InvalidClusterCount);
        }
    }
    let finite = [
        opt.coverage,
        opt.weight_color,
        opt.weight_spatial,
        opt.weight_normal,
        opt.weight_depth,
        opt.camera.focal,
        opt.cluster_radius_meters,
        opt.spectral.w_spatial,
        opt.spectral.w_color,
        opt.spectral.w_normal,
        opt.spectral.segment_threshold,
    ];
    if finite.iter().any(|v| !v.is_finite()) {
        return Err(DcError::NonFiniteParameter);
    }

    let d = ((width as f32 * height as f32) / opt.cluster_count as f32).sqrt();
    let cluster_nx = (width as f32 / d)
        .ceil()
        .to_u32()
        .ok_or("Could not convert grid columns")?;
    let cluster_ny = (height as f32 / d)
        .ceil()
        .to_u32()
        .ok_or("Could not convert grid rows")?;
    let cluster_dx = (width as f32 / cluster_nx as f32)
        .floor()
        .to_u32()
        .ok_or("Could not convert grid spacing")?;
    let cluster_dy = (height as f32 / cluster_ny as f32)
        .floor()
        .to_u32()
        .ok_or("Could not convert grid spacing")?;
    let radius =
        ((cluster_dx * cluster_dx + cluster_dy * cluster_dy) as f32).sqrt();
    let spatial_normalizer = radius.recip();

    Ok(ParametersExt {
        base: *opt,
        width,
        height,
        cluster_count: cluster_nx * cluster_ny,
        cluster_nx,
        cluster_ny,
        cluster_dx,
        cluster_dy,
        radius,
        spatial_normalizer,
        weight_spatial_final: opt.weight_spatial * spatial_normalizer,
    })
}
