//! Drop shadows: a blurred, tinted copy of a shape's silhouette
//!
//! The Gaussian is approximated by three successive box blurs per axis,
//! which keeps the cost independent of the blur radius.

use super::canvas::Shadow;
use resvg::tiny_skia::{Pixmap, Rect, Transform};

const PASSES: usize = 3;

/// Tinted, blurred silhouette and where it lands on the canvas
pub struct ShadowLayer {
    pub pixmap: Pixmap,
    pub x: f32,
    pub y: f32,
}

/// Render the shadow of whatever `draw` paints, given its device-space `bounds`
///
/// `draw` receives a pixmap covering the shadow region and the transform that
/// maps the caller's coordinates (already including `transform`) into it.
pub fn cast(
    bounds: Rect,
    shadow: &Shadow,
    canvas: (u32, u32),
    transform: Transform,
    draw: impl FnOnce(&mut Pixmap, Transform),
) -> Option<ShadowLayer> {
    let sigma = (shadow.blur / 2.0).max(0.0);
    let margin = (sigma * 3.0).ceil() as i32 + 1;

    // Only the part that can reach the canvas after offsetting is rendered
    let reach_left = (-shadow.offset_x).floor() as i32 - margin;
    let reach_top = (-shadow.offset_y).floor() as i32 - margin;
    let reach_right = (canvas.0 as f32 - shadow.offset_x).ceil() as i32 + margin;
    let reach_bottom = (canvas.1 as f32 - shadow.offset_y).ceil() as i32 + margin;

    let left = (bounds.left().floor() as i32 - margin).max(reach_left);
    let top = (bounds.top().floor() as i32 - margin).max(reach_top);
    let right = (bounds.right().ceil() as i32 + margin).min(reach_right);
    let bottom = (bounds.bottom().ceil() as i32 + margin).min(reach_bottom);
    if right <= left || bottom <= top {
        return None;
    }

    let (width, height) = ((right - left) as u32, (bottom - top) as u32);
    let mut pixmap = Pixmap::new(width, height)?;
    draw(
        &mut pixmap,
        Transform::from_translate(-left as f32, -top as f32).pre_concat(transform),
    );

    let mut alpha: Vec<u8> = pixmap.data().chunks_exact(4).map(|px| px[3]).collect();
    blur_alpha(&mut alpha, width as usize, height as usize, sigma);

    let strength = shadow.alpha.clamp(0.0, 1.0);
    let (r, g, b) = (
        shadow.color.r as f32,
        shadow.color.g as f32,
        shadow.color.b as f32,
    );
    for (px, a) in pixmap.data_mut().chunks_exact_mut(4).zip(alpha) {
        let a = a as f32 * strength;
        let k = a / 255.0;
        px[0] = (r * k).round() as u8;
        px[1] = (g * k).round() as u8;
        px[2] = (b * k).round() as u8;
        px[3] = a.round() as u8;
    }

    Some(ShadowLayer {
        pixmap,
        x: left as f32 + shadow.offset_x,
        y: top as f32 + shadow.offset_y,
    })
}

/// Box widths whose successive application approximates a Gaussian of `sigma`
pub fn box_sizes(sigma: f32, passes: usize) -> Vec<usize> {
    let n = passes as f32;
    let ideal = ((12.0 * sigma * sigma / n) + 1.0).sqrt();
    let mut lower = ideal.floor() as i32;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let lf = lower as f32;
    let m = ((12.0 * sigma * sigma - n * lf * lf - 4.0 * n * lf - 3.0 * n) / (-4.0 * lf - 4.0))
        .round() as i32;
    (0..passes as i32)
        .map(|i| if i < m { lower as usize } else { upper as usize })
        .collect()
}

/// In-place Gaussian-like blur of a single 8-bit channel
pub fn blur_alpha(data: &mut [u8], width: usize, height: usize, sigma: f32) {
    if sigma < 0.5 || width == 0 || height == 0 {
        return;
    }
    let mut scratch = vec![0u8; data.len()];
    for size in box_sizes(sigma, PASSES) {
        let radius = (size - 1) / 2;
        if radius == 0 {
            continue;
        }
        box_horizontal(data, &mut scratch, width, height, radius);
        box_vertical(&scratch, data, width, height, radius);
    }
}

fn box_horizontal(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize) {
    let span = (2 * radius + 1) as u32;
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        let out = &mut dst[y * width..(y + 1) * width];
        // samples outside the row count as transparent
        let mut sum: u32 = row[..radius.min(width)].iter().map(|&v| v as u32).sum();
        for x in 0..width {
            if x + radius < width {
                sum += row[x + radius] as u32;
            }
            out[x] = ((sum + span / 2) / span) as u8;
            if x >= radius {
                sum -= row[x - radius] as u32;
            }
        }
    }
}

fn box_vertical(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize) {
    let span = (2 * radius + 1) as u32;
    let mut sums = vec![0u32; width];
    for y in 0..radius.min(height) {
        for (x, sum) in sums.iter_mut().enumerate() {
            *sum += src[y * width + x] as u32;
        }
    }
    for y in 0..height {
        if y + radius < height {
            let row = &src[(y + radius) * width..(y + radius + 1) * width];
            for (sum, &v) in sums.iter_mut().zip(row) {
                *sum += v as u32;
            }
        }
        let out = &mut dst[y * width..(y + 1) * width];
        for (o, &sum) in out.iter_mut().zip(&sums) {
            *o = ((sum + span / 2) / span) as u8;
        }
        if y >= radius {
            let row = &src[(y - radius) * width..(y - radius + 1) * width];
            for (sum, &v) in sums.iter_mut().zip(row) {
                *sum -= v as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_sizes_are_odd() {
        for sigma in [1.0, 2.5, 7.5, 15.0] {
            let sizes = box_sizes(sigma, PASSES);
            assert_eq!(sizes.len(), PASSES);
            assert!(sizes.iter().all(|s| s % 2 == 1), "{:?}", sizes);
        }
    }

    #[test]
    fn test_blur_spreads_and_preserves_mass() {
        let (w, h) = (41, 41);
        let mut data = vec![0u8; w * h];
        for y in 15..26 {
            for x in 15..26 {
                data[y * w + x] = 255;
            }
        }
        let before: u32 = data.iter().map(|&v| v as u32).sum();
        blur_alpha(&mut data, w, h, 3.0);
        let after: u32 = data.iter().map(|&v| v as u32).sum();

        assert!(data[20 * w + 12] > 0, "halo outside the square");
        assert!(data[20 * w + 20] > 200, "center stays dense");
        let drift = (before as f64 - after as f64).abs() / before as f64;
        assert!(drift < 0.05, "mass drift {}", drift);
    }

    #[test]
    fn test_tiny_sigma_is_noop() {
        let mut data = vec![0, 255, 0, 0];
        blur_alpha(&mut data, 4, 1, 0.2);
        assert_eq!(data, vec![0, 255, 0, 0]);
    }
}
