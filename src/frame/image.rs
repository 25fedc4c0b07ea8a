//! Image helpers on top of the `image` crate.

use image::imageops::FilterType;
pub use image::{Rgba, RgbaImage};

/// Sample an RGBA image at sub-pixel position using bilinear interpolation.
///
/// Pixel centers are at integer coordinates. Returns `None` if `(x, y)` lies
/// outside `[0, w-1] x [0, h-1]`.
pub fn bilinear_sample_rgba(img: &RgbaImage, x: f64, y: f64) -> Option<[u8; 4]> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for (ch, value) in out.iter_mut().enumerate() {
        let v = (1.0 - fx) * (1.0 - fy) * p00[ch] as f64
            + fx * (1.0 - fy) * p10[ch] as f64
            + (1.0 - fx) * fy * p01[ch] as f64
            + fx * fy * p11[ch] as f64;
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

/// Downscaled copy whose longer side is at most `max_side` pixels.
pub fn thumbnail(img: &RgbaImage, max_side: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let longer = w.max(h);
    if longer <= max_side || longer == 0 {
        return img.clone();
    }
    let scale = max_side as f64 / longer as f64;
    let tw = ((w as f64 * scale).round() as u32).max(1);
    let th = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(img, tw, th, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 7, 255]))
    }

    #[test]
    fn test_bilinear_at_pixel_centers_is_exact() {
        let img = gradient(8, 6);
        assert_eq!(bilinear_sample_rgba(&img, 3.0, 2.0), Some([30, 20, 7, 255]));
        assert_eq!(bilinear_sample_rgba(&img, 7.0, 5.0), Some([70, 50, 7, 255]));
    }

    #[test]
    fn test_bilinear_interpolates_between_pixels() {
        let img = gradient(8, 6);
        assert_eq!(bilinear_sample_rgba(&img, 2.5, 1.5), Some([25, 15, 7, 255]));
    }

    #[test]
    fn test_bilinear_out_of_bounds() {
        let img = gradient(8, 6);
        assert!(bilinear_sample_rgba(&img, -0.1, 1.0).is_none());
        assert!(bilinear_sample_rgba(&img, 7.01, 1.0).is_none());
        assert!(bilinear_sample_rgba(&img, 1.0, f64::NAN).is_none());
    }

    #[test]
    fn test_thumbnail_limits_longer_side() {
        let thumb = thumbnail(&gradient(400, 200), 100);
        assert_eq!(thumb.dimensions(), (100, 50));
    }
}
