//! Image loading and normalization
//!
//! Every slide, logo and background image is decoded once per run into a
//! [`NormalizedBitmap`] whose longer side is bounded by a safety margin over
//! the size it will be drawn at. Raster images are only ever downscaled;
//! SVG documents are rasterized directly at the bound.

use crate::config::MediaSource;
use crate::{Error, Result};
use image::{DynamicImage, GenericImageView};
use resvg::tiny_skia::{IntSize, Pixmap, PixmapRef, Transform};
use std::path::Path;

/// Headroom over the target size, so zoom and framing can request more
/// detail than the native display size
pub const SAFETY_MARGIN: f64 = 1.5;

/// Size used for SVG documents that declare no usable dimensions
const FALLBACK_SVG_SIZE: f64 = 1024.0;

/// Decoded, premultiplied RGBA bitmap ready for repeated drawing
#[derive(Debug, Clone)]
pub struct NormalizedBitmap {
    pixmap: Pixmap,
}

impl NormalizedBitmap {
    /// Load from a media source, bounded for `target_max_dimension`
    pub fn from_source(source: &MediaSource, target_max_dimension: u32) -> Result<Self> {
        let bytes = source
            .read()
            .map_err(|e| Error::resource(format!("{}: {}", source.describe(), e)))?;
        Self::from_bytes(&bytes, target_max_dimension)
            .map_err(|e| Error::resource(format!("{}: {}", source.describe(), detail(e))))
    }

    /// Load from a file path, bounded for `target_max_dimension`
    pub fn from_path<P: AsRef<Path>>(path: P, target_max_dimension: u32) -> Result<Self> {
        Self::from_source(
            &MediaSource::Path(path.as_ref().to_path_buf()),
            target_max_dimension,
        )
    }

    /// Decode encoded image bytes (PNG, JPEG, WebP, GIF, BMP, SVG, ...)
    pub fn from_bytes(bytes: &[u8], target_max_dimension: u32) -> Result<Self> {
        let safe_max = target_max_dimension.max(1) as f64 * SAFETY_MARGIN;
        let pixmap = if is_svg(bytes) {
            rasterize_svg(bytes, safe_max)?
        } else {
            decode_raster(bytes, safe_max)?
        };
        Ok(Self { pixmap })
    }

    /// Wrap straight-alpha RGBA pixels
    pub fn from_rgba(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self> {
        premultiply_rgba8_in_place(&mut data);
        let size = IntSize::from_wh(width, height)
            .ok_or_else(|| Error::resource(format!("invalid bitmap size {}x{}", width, height)))?;
        let pixmap = Pixmap::from_vec(data, size).ok_or_else(|| {
            Error::resource(format!(
                "pixel buffer does not match {}x{} RGBA",
                width, height
            ))
        })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Width divided by height
    pub fn aspect(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }

    pub fn as_pixmap(&self) -> PixmapRef<'_> {
        self.pixmap.as_ref()
    }
}

/// Size after bounding the longer side to `max`, preserving aspect ratio
pub fn bounded_size(width: u32, height: u32, max: f64) -> (u32, u32) {
    let longer = width.max(height) as f64;
    if longer <= max {
        return (width, height);
    }
    let scale = max / longer;
    scaled_size(width as f64, height as f64, scale)
}

fn scaled_size(width: f64, height: f64, scale: f64) -> (u32, u32) {
    (
        ((width * scale).round() as u32).max(1),
        ((height * scale).round() as u32).max(1),
    )
}

fn detail(err: Error) -> String {
    match err {
        Error::ResourceLoad(msg) => msg,
        other => other.to_string(),
    }
}

fn is_svg(bytes: &[u8]) -> bool {
    // gzip-compressed SVG (svgz); raster formats are never gzip-wrapped
    if bytes.starts_with(&[0x1f, 0x8b]) {
        return true;
    }
    let head = &bytes[..bytes.len().min(1024)];
    let head = head.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(head);
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

fn decode_raster(bytes: &[u8], safe_max: f64) -> Result<Pixmap> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::resource(e.to_string()))?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::resource("image has no pixels"));
    }

    let (target_width, target_height) = bounded_size(width, height, safe_max);
    let img = if (target_width, target_height) == (width, height) {
        img
    } else {
        tracing::debug!(
            width,
            height,
            target_width,
            target_height,
            "downscaling image"
        );
        img.resize_exact(
            target_width,
            target_height,
            image::imageops::FilterType::Lanczos3,
        )
    };

    pixmap_from_dynamic(img)
}

fn pixmap_from_dynamic(img: DynamicImage) -> Result<Pixmap> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_raw();
    premultiply_rgba8_in_place(&mut data);
    let size = IntSize::from_wh(width, height)
        .ok_or_else(|| Error::resource(format!("invalid image size {}x{}", width, height)))?;
    Pixmap::from_vec(data, size).ok_or_else(|| Error::resource("failed to allocate bitmap"))
}

fn rasterize_svg(bytes: &[u8], safe_max: f64) -> Result<Pixmap> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
        .map_err(|e| Error::resource(format!("invalid svg: {}", e)))?;

    let size = tree.size();
    let (mut width, mut height) = (size.width() as f64, size.height() as f64);
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
        width = FALLBACK_SVG_SIZE;
        height = FALLBACK_SVG_SIZE;
    }

    // Vector sources are rendered at the bound rather than at native size
    let scale = safe_max / width.max(height);
    let (target_width, target_height) = scaled_size(width, height, scale);
    let mut pixmap = Pixmap::new(target_width, target_height)
        .ok_or_else(|| Error::resource("failed to allocate svg bitmap"))?;

    let transform = Transform::from_scale(
        target_width as f32 / size.width(),
        target_height as f32 / size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    Ok(pixmap)
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}
