/// Disk image formats and constants

/// Format constants
pub mod constants;
/// Floppy disk format presets
pub mod spec;

pub use constants::*;
pub use spec::FloppyDiskFormat;

/// Kind of a disk image file, detected from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFileFormat {
    /// Teledisk container with normal compression
    Teledisk,
    /// Teledisk container with advanced (LZHUF) compression
    TelediskAdvanced,
    /// Headerless sector-major image
    Flat,
}

impl ImageFileFormat {
    /// Get the magic bytes for this format
    pub fn magic_bytes(&self) -> &'static [u8] {
        match self {
            ImageFileFormat::Teledisk => TELEDISK_SIGNATURE,
            ImageFileFormat::TelediskAdvanced => TELEDISK_ADVANCED_SIGNATURE,
            ImageFileFormat::Flat => &[], // Flat images have no magic bytes
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            ImageFileFormat::Teledisk => "Teledisk",
            ImageFileFormat::TelediskAdvanced => "Teledisk (advanced compression)",
            ImageFileFormat::Flat => "Flat image",
        }
    }

    /// Whether this crate can decode the format
    pub fn is_supported(&self) -> bool {
        !matches!(self, ImageFileFormat::TelediskAdvanced)
    }
}

/// Detect the image format from its leading bytes
///
/// Returns `None` when there are not enough bytes to decide; anything
/// without a known signature is treated as a flat image.
pub fn detect_format(magic: &[u8]) -> Option<ImageFileFormat> {
    if magic.len() < 3 {
        return None;
    }

    if magic.starts_with(TELEDISK_SIGNATURE) {
        Some(ImageFileFormat::Teledisk)
    } else if magic.starts_with(TELEDISK_ADVANCED_SIGNATURE) {
        Some(ImageFileFormat::TelediskAdvanced)
    } else {
        Some(ImageFileFormat::Flat)
    }
}
