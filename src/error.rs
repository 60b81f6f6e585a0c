//! Clustering and segmentation error enums.
use std::collections::TryReserveError;

/// Error for depth-adaptive clustering and spectral segmentation.
#[derive(Clone, Debug)]
pub enum DcError {
    /// The image `width` and/or `height` is equal to `0`.
    InvalidImageDimension,
    /// The number of clusters to find is equal to `0`.
    ZeroClusterCount,
    /// The number of clusters to find is greater than or equal to the number
    /// of pixels in the image.
    InvalidClusterCount,
    /// A clustering parameter is NaN or infinite.
    NonFiniteParameter,
    /// The color buffer length does not match the image dimensions.
    MismatchedColorBuffer,
    /// The depth buffer length does not match the image dimensions.
    MismatchedDepthBuffer,
    /// The normal buffer length does not match the image dimensions.
    MismatchedNormalBuffer,
    /// The eigensolver did not converge on the graph Laplacian.
    EigenConvergence,
    /// Cooperative cancellation was requested before the pipeline finished.
    Cancelled,
    /// Space could not be reserved for a collection required in the
    /// clustering calculation.
    Reserve(TryReserveError),
    /// A general error occurred.
    General(&'static str),
}

impl std::fmt::Display for DcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidImageDimension => write!(f, "Image dimension cannot be 0"),
            Self::ZeroClusterCount => write!(f, "Number of clusters cannot be 0"),
            Self::InvalidClusterCount => write!(
                f,
                "Number of clusters greater than or equal to pixels in image"
            ),
            Self::NonFiniteParameter => write!(f, "Clustering parameter is not finite"),
            Self::MismatchedColorBuffer => {
                write!(f, "Color buffer length does not equal image dimensions")
            }
            Self::MismatchedDepthBuffer => {
                write!(f, "Depth buffer length does not equal image dimensions")
            }
            Self::MismatchedNormalBuffer => {
                write!(f, "Normal buffer length does not equal image dimensions")
            }
            Self::EigenConvergence => write!(f, "Eigensolver did not converge"),
            Self::Cancelled => write!(f, "Pipeline was cancelled"),
            Self::Reserve(e) => write!(f, "{e}"),
            Self::General(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reserve(e) => e.source(),
            Self::InvalidImageDimension
            | Self::ZeroClusterCount
            | Self::InvalidClusterCount
            | Self::NonFiniteParameter
            | Self::MismatchedColorBuffer
            | Self::MismatchedDepthBuffer
            | Self::MismatchedNormalBuffer
            | Self::EigenConvergence
            | Self::Cancelled
            | Self::General(_) => None,
        }
    }
}

impl std::convert::From<TryReserveError> for DcError {
    fn from(error: TryReserveError) -> Self {
        Self::Reserve(error)
    }
}

impl std::convert::From<&'static str> for DcError {
    fn from(error: &'static str) -> Self {
        Self::General(error)
    }
}
