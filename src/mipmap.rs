//! Sum-reduction image pyramids.
use crate::error::DcError;
use crate::image::ScalarImage;

/// Build the pyramid `[D0, D1, ..., Dk]` where `D0` is a copy of `base`
/// and every following level halves the resolution with a 2×2 **sum**
/// reduction.
///
/// Summing instead of averaging keeps the total mass of the image constant
/// across levels, so a pixel of level `i` holds the expected seed count of
/// its `2^i × 2^i` footprint in the base image. Odd dimensions round up;
/// border cells sum the partial block that remains. Halving stops once the
/// larger dimension is at most `max(min_size, 1)`.
pub fn compute_mipmaps(base: &ScalarImage, min_size: u32) -> Result<Vec<ScalarImage>, DcError> {
    let floor = min_size.max(1);
    let mut levels = vec![base.clone()];
    loop {
        let top = levels.last().ok_or("Mipmap pyramid is empty")?;
        if top.width().max(top.height()) <= floor {
            break;
        }
        let next = downsample_sum(top)?;
        levels.push(next);
    }

    Ok(levels)
}

fn downsample_sum(src: &ScalarImage) -> Result<ScalarImage, DcError> {
    let width = src.width().div_ceil(2);
    let height = src.height().div_ceil(2);
    let mut dst = ScalarImage::new(width, height)?;
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (sx, sy) in [
                (2 * x, 2 * y),
                (2 * x + 1, 2 * y),
                (2 * x, 2 * y + 1),
                (2 * x + 1, 2 * y + 1),
            ] {
                if sx < src.width() && sy < src.height() {
                    sum += src.at(sx, sy);
                }
            }
            *dst.at_mut(x, y) = sum;
        }
    }
    Ok(dst)
}
