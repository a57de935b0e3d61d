use image::RgbImage;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::vision::VisionError;

/// Least-squares similarity transform (rotation, uniform scale,
/// translation) mapping `src` points onto `dst`, as a row-major 3x3 matrix.
pub(crate) fn similarity_transform(src: &[(f32, f32)], dst: &[(f32, f32)]) -> [f32; 9] {
    let n = src.len().min(dst.len()).max(1) as f32;
    let (sx, sy) = src.iter().fold((0.0, 0.0), |a, p| (a.0 + p.0, a.1 + p.1));
    let (dx, dy) = dst.iter().fold((0.0, 0.0), |a, p| (a.0 + p.0, a.1 + p.1));
    let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    let mut den = 0.0f32;
    for (s, d) in src.iter().zip(dst) {
        let (xs, ys) = (s.0 - sx, s.1 - sy);
        let (xd, yd) = (d.0 - dx, d.1 - dy);
        num_a += xs * xd + ys * yd;
        num_b += xs * yd - ys * xd;
        den += xs * xs + ys * ys;
    }
    let (a, b) = if den > f32::EPSILON {
        (num_a / den, num_b / den)
    } else {
        (1.0, 0.0)
    };
    let tx = dx - (a * sx - b * sy);
    let ty = dy - (b * sx + a * sy);
    [a, -b, tx, b, a, ty, 0.0, 0.0, 1.0]
}

/// Warp `image` through `matrix` into a `size`x`size` crop.
pub(crate) fn warp_crop(image: &RgbImage, matrix: [f32; 9], size: u32) -> Result<RgbImage, VisionError> {
    let projection = Projection::from_matrix(matrix)
        .ok_or_else(|| VisionError::Input("degenerate alignment transform".into()))?;
    let mut out = RgbImage::new(size, size);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        image::Rgb([0, 0, 0]),
        &mut out,
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_scale_and_translation() {
        let src = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let dst = [(5.0, 5.0), (25.0, 5.0), (5.0, 25.0)];
        let m = similarity_transform(&src, &dst);
        assert!((m[0] - 2.0).abs() < 1e-5);
        assert!(m[1].abs() < 1e-5);
        assert!((m[2] - 5.0).abs() < 1e-4);
        assert!((m[5] - 5.0).abs() < 1e-4);
    }

    #[test]
    fn recovers_rotation() {
        // 90 degrees counter-clockwise
        let src = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0)];
        let dst = [(0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
        let m = similarity_transform(&src, &dst);
        assert!(m[0].abs() < 1e-5);
        assert!((m[3] - 1.0).abs() < 1e-5);
    }
}
