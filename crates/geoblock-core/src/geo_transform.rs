//! Affine pixel-to-georeferenced transform.

/// Six-coefficient affine transform from pixel/line to georeferenced space.
///
/// ```text
/// Xgeo = gt[0] + pixel * gt[1] + line * gt[2]
/// Ygeo = gt[3] + pixel * gt[4] + line * gt[5]
/// ```
///
/// `gt[0]`/`gt[3]` are the top-left corner of the top-left pixel, `gt[1]` and
/// `gt[5]` the pixel size (`gt[5]` negative for north-up images), `gt[2]` and
/// `gt[4]` the rotation terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl GeoTransform {
    /// Pixel coordinates equal georeferenced coordinates.
    pub const IDENTITY: GeoTransform = GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    /// North-up transform from an origin and pixel size.
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    /// Maps `(pixel, line)` to georeferenced `(x, y)`.
    #[inline]
    pub fn apply(&self, pixel: f64, line: f64) -> (f64, f64) {
        let g = &self.0;
        (
            g[0] + pixel * g[1] + line * g[2],
            g[3] + pixel * g[4] + line * g[5],
        )
    }

    /// Inverse transform, `None` when the matrix is singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let g = &self.0;
        let det = g[1] * g[5] - g[2] * g[4];
        if det.abs() < 1e-15 {
            return None;
        }
        let inv = 1.0 / det;
        Some(GeoTransform([
            (g[2] * g[3] - g[0] * g[5]) * inv,
            g[5] * inv,
            -g[2] * inv,
            (-g[1] * g[3] + g[0] * g[4]) * inv,
            -g[4] * inv,
            g[1] * inv,
        ]))
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(v: [f64; 6]) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn north_up_apply() {
        let gt = GeoTransform::north_up(440720.0, 3751320.0, 60.0, 60.0);
        let (x, y) = gt.apply(10.0, 20.0);
        assert_relative_eq!(x, 441320.0);
        assert_relative_eq!(y, 3750120.0);
    }

    #[test]
    fn invert_round_trip() {
        let gt = GeoTransform([100.0, 2.0, 0.5, 200.0, 0.25, -3.0]);
        let inv = gt.invert().unwrap();
        let (x, y) = gt.apply(7.0, 11.0);
        let (p, l) = inv.apply(x, y);
        assert_relative_eq!(p, 7.0, epsilon = 1e-9);
        assert_relative_eq!(l, 11.0, epsilon = 1e-9);
    }

    #[test]
    fn singular_has_no_inverse() {
        assert!(GeoTransform([0.0, 1.0, 2.0, 0.0, 0.5, 1.0]).invert().is_none());
        assert_eq!(GeoTransform::default(), GeoTransform::IDENTITY);
    }
}
