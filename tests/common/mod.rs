//! Common test utilities

#![allow(dead_code)]

use image::{ImageBuffer, Rgba, RgbaImage};
use slidecast::config::{MediaSource, SlideSpec};
use slidecast::ProjectConfig;
use std::path::Path;
use std::process::{Command, Stdio};

/// Generate a test image with a solid color and optional gradient
pub fn generate_test_image(width: u32, height: u32, base_color: [u8; 4]) -> RgbaImage {
    let mut img = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        // Add subtle gradient to make frames distinguishable
        let r = base_color[0].saturating_add((x % 50) as u8);
        let g = base_color[1].saturating_add((y % 50) as u8);
        let b = base_color[2];
        let a = base_color[3];
        *pixel = Rgba([r, g, b, a]);
    }

    img
}

/// Generate a numbered test image (useful for slideshow testing)
pub fn generate_numbered_image(width: u32, height: u32, number: u32) -> RgbaImage {
    let colors = [
        [255, 100, 100, 255], // Red-ish
        [100, 255, 100, 255], // Green-ish
        [100, 100, 255, 255], // Blue-ish
        [255, 255, 100, 255], // Yellow-ish
        [255, 100, 255, 255], // Magenta-ish
        [100, 255, 255, 255], // Cyan-ish
    ];

    let color = colors[(number as usize) % colors.len()];
    generate_test_image(width, height, color)
}

/// Save a test image as JPEG
pub fn save_jpeg<P: AsRef<Path>>(img: &RgbaImage, path: P, quality: u8) -> std::io::Result<()> {
    // Convert RGBA to RGB for JPEG
    let rgb_img: image::RgbImage = image::DynamicImage::ImageRgba8(img.clone()).to_rgb8();

    let file = std::fs::File::create(path)?;
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, quality);
    encoder
        .encode_image(&rgb_img)
        .map_err(std::io::Error::other)?;

    Ok(())
}

/// Save a test image as PNG
pub fn save_png<P: AsRef<Path>>(img: &RgbaImage, path: P) -> std::io::Result<()> {
    img.save(path).map_err(std::io::Error::other)
}

/// Encode a test image as PNG bytes
pub fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// A flat-colored SVG document of the given size
pub fn svg_document(width: u32, height: u32, fill: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="{fill}"/></svg>"#,
        w = width,
        h = height,
        fill = fill
    )
}

/// A project with `count` inline numbered slides at a small custom size
pub fn small_project(count: u32, width: u32, height: u32) -> ProjectConfig {
    let slides = (0..count)
        .map(|i| SlideSpec {
            id: format!("slide-{}", i + 1),
            image: Some(MediaSource::Bytes(png_bytes(&generate_numbered_image(
                64, 48, i,
            )))),
            caption: String::new(),
        })
        .collect();

    ProjectConfig {
        slides,
        aspect_ratio: slidecast::config::AspectRatio::Custom,
        custom_width: Some(width),
        custom_height: Some(height),
        ..ProjectConfig::default()
    }
}

/// 16-bit PCM WAV file containing a 440 Hz tone
pub fn wav_bytes(sample_rate: u32, channels: u16, seconds: f64) -> Vec<u8> {
    let frames = (sample_rate as f64 * seconds).round() as u32;
    let data_len = frames * channels as u32 * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..channels {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
    }
    wav
}

/// Encode a mono AAC tone into an M4A whose `moov` box follows `mdat`
///
/// Returns false when ffmpeg cannot produce the file.
pub fn write_trailing_moov_m4a(path: &Path, seconds: f64) -> bool {
    Command::new("ffmpeg")
        .args(["-nostdin", "-v", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=440:sample_rate=44100:duration={}", seconds))
        .args(["-ac", "1", "-c:a", "aac"])
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Byte offset of the first occurrence of `pattern`
pub fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len()).position(|window| window == pattern)
}

/// Whether an ffmpeg binary is on PATH
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Verify that a file exists and has non-zero size
pub fn verify_file_exists_with_size<P: AsRef<Path>>(path: P) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Check for the EBML magic and the given DocType
pub fn verify_ebml_header(data: &[u8], doc_type: &str) -> bool {
    // WebM and Matroska start with EBML header: 0x1A 0x45 0xDF 0xA3
    if !data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return false;
    }
    // DocType element: ID 0x4282, one-byte size
    let mut element = vec![0x42, 0x82, 0x80 | doc_type.len() as u8];
    element.extend_from_slice(doc_type.as_bytes());
    data[..data.len().min(64)]
        .windows(element.len())
        .any(|w| w == element.as_slice())
}

/// Parse MP4 header to verify it's a valid MP4 file
pub fn verify_mp4_header(data: &[u8]) -> bool {
    // MP4 files have 'ftyp' box at offset 4
    data.len() >= 12 && &data[4..8] == b"ftyp"
}

/// Count occurrences of an element ID (or any byte pattern)
pub fn count_pattern(data: &[u8], pattern: &[u8]) -> usize {
    data.windows(pattern.len()).filter(|w| *w == pattern).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_test_image() {
        let img = generate_test_image(100, 100, [255, 0, 0, 255]);
        assert_eq!(img.width(), 100);
        assert_eq!(img.height(), 100);
    }

    #[test]
    fn test_save_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.jpg");

        let img = generate_test_image(100, 100, [255, 0, 0, 255]);
        save_jpeg(&img, &path, 85).unwrap();

        assert!(verify_file_exists_with_size(&path));
    }

    #[test]
    fn test_ebml_header_check() {
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F];
        data.extend_from_slice(&[0x42, 0x82, 0x84]);
        data.extend_from_slice(b"webm");
        assert!(verify_ebml_header(&data, "webm"));
        assert!(!verify_ebml_header(&data, "matroska"));
    }
}
