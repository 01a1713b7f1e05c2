//! Intake validation and upload re-encoding.
//!
//! Validates candidate files (declared type, size bound) and shrinks
//! oversized photos before upload: decode, fix EXIF orientation, cap the
//! longest edge, re-encode as JPEG. Re-encoding failure is never fatal —
//! the original bytes are uploaded unchanged.

use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use super::IntakeError;

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Intake limits and re-encoding parameters.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Hard upper bound on accepted file size.
    pub max_upload_bytes: usize,
    /// Files above this size are decoded and re-encoded before upload.
    pub reencode_threshold_bytes: usize,
    /// Longest edge after re-encoding. Chat screenshots keep readable
    /// bubble text well below this.
    pub max_edge_px: u32,
    /// JPEG quality factor for re-encoded uploads.
    pub jpeg_quality: u8,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 20 * 1024 * 1024,
            reencode_threshold_bytes: 1536 * 1024,
            max_edge_px: 1400,
            jpeg_quality: 82,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// A user-supplied file before validation.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub file_name: String,
    /// MIME type as declared by the picker, if any. Falls back to a
    /// file-name guess during validation.
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl CandidateFile {
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            declared_mime: None,
            bytes,
        }
    }

    pub fn with_mime(mut self, mime: &str) -> Self {
        self.declared_mime = Some(mime.to_string());
        self
    }

    /// Effective MIME type: declared, else guessed from the file name.
    pub fn effective_mime(&self) -> String {
        if let Some(ref m) = self.declared_mime {
            return m.clone();
        }
        mime_guess::from_path(&self.file_name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    }
}

/// Buffers for one accepted image.
///
/// `upload` aliases `original` (same allocation) when no re-encoding
/// occurred; otherwise it holds the smaller re-rendered bytes.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub original: Arc<Vec<u8>>,
    pub upload: Arc<Vec<u8>>,
    /// Wire format subtype for the upload data URL ("jpeg", "png", ...).
    pub wire_format: String,
    pub reencoded: bool,
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

/// Reject files whose declared type is not an image or whose size
/// exceeds the upload bound. A rejected file never enters the batch.
pub fn validate_candidate(file: &CandidateFile, config: &IntakeConfig) -> Result<(), IntakeError> {
    let mime = file.effective_mime();
    if !mime.starts_with("image/") {
        return Err(IntakeError::NotAnImage(mime));
    }
    if file.bytes.len() > config.max_upload_bytes {
        return Err(IntakeError::Oversize {
            size: file.bytes.len(),
            limit: config.max_upload_bytes,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Re-encoding
// ═══════════════════════════════════════════════════════════

/// Prepare upload bytes for a validated file.
///
/// Files at or under the re-encode threshold pass through byte-for-byte
/// (the upload buffer aliases the original). Larger files are decoded,
/// EXIF-orientation-corrected, capped at `max_edge_px` on the longest
/// edge, and re-encoded as JPEG. Any decode/encode failure falls back to
/// the original bytes.
pub fn prepare_upload(file: &CandidateFile, config: &IntakeConfig) -> PreparedImage {
    let original = Arc::new(file.bytes.clone());

    if original.len() <= config.reencode_threshold_bytes {
        return PreparedImage {
            upload: original.clone(),
            original,
            wire_format: wire_format_of(file),
            reencoded: false,
        };
    }

    match reencode(&original, config) {
        Ok(jpeg) => {
            debug!(
                file = %file.file_name,
                from = original.len(),
                to = jpeg.len(),
                "Re-encoded upload"
            );
            PreparedImage {
                upload: Arc::new(jpeg),
                original,
                wire_format: "jpeg".to_string(),
                reencoded: true,
            }
        }
        Err(e) => {
            warn!(file = %file.file_name, error = %e, "Re-encode failed, uploading original bytes");
            PreparedImage {
                upload: original.clone(),
                original,
                wire_format: wire_format_of(file),
                reencoded: false,
            }
        }
    }
}

fn wire_format_of(file: &CandidateFile) -> String {
    let mime = file.effective_mime();
    mime.strip_prefix("image/").unwrap_or("png").to_string()
}

fn reencode(bytes: &[u8], config: &IntakeConfig) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = apply_orientation(img, read_exif_orientation(bytes));

    let (w, h) = img.dimensions();
    let (target_w, target_h) = compute_capped_dimensions(w, h, config.max_edge_px);
    let img = if (target_w, target_h) != (w, h) {
        img.resize_exact(target_w, target_h, FilterType::CatmullRom)
    } else {
        img
    };

    // JPEG has no alpha channel; normalize to RGB before encoding.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, config.jpeg_quality);
    rgb.write_with_encoder(encoder)?;
    Ok(cursor.into_inner())
}

/// Scale dimensions so the longest edge is at most `max_edge`,
/// preserving aspect ratio. Images already within the cap are unchanged.
pub fn compute_capped_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = max_edge as f32 / longest as f32;
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    (new_w, new_h)
}

// ── EXIF orientation ──────────────────────────────────────

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn make_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 140, 160]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    // ── validate_candidate ──

    #[test]
    fn rejects_non_image_type() {
        let file = CandidateFile::new("notes.pdf", vec![1, 2, 3]);
        let err = validate_candidate(&file, &IntakeConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::NotAnImage(_)));
    }

    #[test]
    fn rejects_oversize_file() {
        let config = IntakeConfig {
            max_upload_bytes: 10,
            ..IntakeConfig::default()
        };
        let file = CandidateFile::new("big.png", vec![0; 11]);
        let err = validate_candidate(&file, &config).unwrap_err();
        assert!(matches!(err, IntakeError::Oversize { size: 11, .. }));
    }

    #[test]
    fn accepts_image_by_declared_mime() {
        // Extension says nothing, declared type wins
        let file = CandidateFile::new("photo.bin", vec![0; 100]).with_mime("image/jpeg");
        assert!(validate_candidate(&file, &IntakeConfig::default()).is_ok());
    }

    #[test]
    fn accepts_image_by_file_name_guess() {
        let file = CandidateFile::new("screenshot.png", vec![0; 100]);
        assert!(validate_candidate(&file, &IntakeConfig::default()).is_ok());
    }

    #[test]
    fn size_limit_default_is_20mb() {
        assert_eq!(IntakeConfig::default().max_upload_bytes, 20 * 1024 * 1024);
    }

    // ── prepare_upload ──

    #[test]
    fn small_file_passes_through_byte_identical() {
        let bytes = make_png(64, 64);
        let file = CandidateFile::new("small.png", bytes.clone());
        let prepared = prepare_upload(&file, &IntakeConfig::default());
        assert!(!prepared.reencoded);
        assert_eq!(*prepared.upload, bytes);
        // Pass-through uploads alias the original allocation
        assert!(Arc::ptr_eq(&prepared.upload, &prepared.original));
        assert_eq!(prepared.wire_format, "png");
    }

    #[test]
    fn large_file_is_reencoded_as_jpeg() {
        let bytes = make_png(256, 128);
        let file = CandidateFile::new("shot.png", bytes);
        let config = IntakeConfig {
            reencode_threshold_bytes: 16, // force the re-encode path
            ..IntakeConfig::default()
        };
        let prepared = prepare_upload(&file, &config);
        assert!(prepared.reencoded);
        assert!(!Arc::ptr_eq(&prepared.upload, &prepared.original));
        assert_eq!(prepared.wire_format, "jpeg");
        // JPEG magic bytes
        assert_eq!(&prepared.upload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn reencode_caps_longest_edge() {
        let bytes = make_png(400, 100);
        let file = CandidateFile::new("wide.png", bytes);
        let config = IntakeConfig {
            reencode_threshold_bytes: 16,
            max_edge_px: 200,
            ..IntakeConfig::default()
        };
        let prepared = prepare_upload(&file, &config);
        let out = image::load_from_memory(&prepared.upload).unwrap();
        assert_eq!(out.dimensions(), (200, 50));
    }

    #[test]
    fn undecodable_file_falls_back_to_original() {
        let garbage = vec![0xDE, 0xAD, 0xBE, 0xEF].repeat(64);
        let file = CandidateFile::new("broken.png", garbage.clone());
        let config = IntakeConfig {
            reencode_threshold_bytes: 16,
            ..IntakeConfig::default()
        };
        let prepared = prepare_upload(&file, &config);
        assert!(!prepared.reencoded);
        assert_eq!(*prepared.upload, garbage);
        assert!(Arc::ptr_eq(&prepared.upload, &prepared.original));
    }

    // ── compute_capped_dimensions ──

    #[test]
    fn cap_preserves_aspect_ratio() {
        let (w, h) = compute_capped_dimensions(2800, 1400, 1400);
        assert_eq!((w, h), (1400, 700));
    }

    #[test]
    fn cap_leaves_small_images_alone() {
        let (w, h) = compute_capped_dimensions(640, 480, 1400);
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn cap_handles_portrait() {
        let (w, h) = compute_capped_dimensions(1080, 5400, 1400);
        assert_eq!(h, 1400);
        assert_eq!(w, 280);
    }

    #[test]
    fn cap_clamps_zero_dimensions() {
        let (w, h) = compute_capped_dimensions(0, 0, 1400);
        assert!(w >= 1 && h >= 1);
    }

    // ── EXIF orientation ──

    #[test]
    fn exif_no_data_returns_identity() {
        let png = make_png(10, 10);
        assert_eq!(read_exif_orientation(&png), 1);
    }

    #[test]
    fn apply_orientation_rotate90_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([0, 0, 0])));
        let out = apply_orientation(img, 6);
        assert_eq!((out.width(), out.height()), (20, 10));
    }

    #[test]
    fn apply_orientation_unknown_is_identity() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([0, 0, 0])));
        let out = apply_orientation(img, 99);
        assert_eq!((out.width(), out.height()), (10, 20));
    }
}
