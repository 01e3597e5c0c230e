/// Disk-level geometry state

use crate::format::FloppyDiskFormat;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Mutable geometry of one disk
///
/// Dimension fields are atomics so any thread can read them without taking
/// the disk lock. They are only changed while the disk lock is held.
/// Callers must re-read them rather than cache them across calls.
#[derive(Debug, Default)]
pub struct Geometry {
    sides: AtomicUsize,
    cylinders: AtomicUsize,
    sectors_per_track: AtomicUsize,
    sector_size: AtomicUsize,
    read_only: AtomicBool,
    repaired: AtomicBool,
    format_text: Mutex<Option<String>>,
    media_text: Mutex<Option<String>>,
    warning_text: Mutex<Option<String>>,
}

/// Point-in-time copy of the geometry dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometrySnapshot {
    /// Number of sides
    pub sides: usize,
    /// Number of cylinders
    pub cylinders: usize,
    /// Sectors per track
    pub sectors_per_track: usize,
    /// Sector size in bytes
    pub sector_size: usize,
}

impl GeometrySnapshot {
    /// Whether all dimensions are set
    pub fn is_formatted(&self) -> bool {
        self.sides > 0 && self.cylinders > 0 && self.sectors_per_track > 0 && self.sector_size > 0
    }

    /// Total capacity in bytes
    pub fn disk_size(&self) -> usize {
        self.sides * self.cylinders * self.sectors_per_track * self.sector_size
    }
}

impl Geometry {
    /// Create geometry from explicit dimensions
    pub fn new(sides: usize, cylinders: usize, sectors_per_track: usize, sector_size: usize) -> Self {
        let geometry = Self::default();
        geometry.sides.store(sides, Ordering::Relaxed);
        geometry.cylinders.store(cylinders, Ordering::Relaxed);
        geometry.sectors_per_track.store(sectors_per_track, Ordering::Relaxed);
        geometry.sector_size.store(sector_size, Ordering::Relaxed);
        geometry
    }

    /// Create geometry from a format description
    pub fn from_format(format: &FloppyDiskFormat) -> Self {
        Self::new(
            format.sides as usize,
            format.cylinders as usize,
            format.sectors_per_track as usize,
            format.sector_size,
        )
    }

    /// Number of sides
    #[inline]
    pub fn sides(&self) -> usize {
        self.sides.load(Ordering::Acquire)
    }

    /// Number of cylinders
    #[inline]
    pub fn cylinders(&self) -> usize {
        self.cylinders.load(Ordering::Acquire)
    }

    /// Sectors per track
    #[inline]
    pub fn sectors_per_track(&self) -> usize {
        self.sectors_per_track.load(Ordering::Acquire)
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size.load(Ordering::Acquire)
    }

    /// Copy all dimensions at once
    pub fn snapshot(&self) -> GeometrySnapshot {
        GeometrySnapshot {
            sides: self.sides(),
            cylinders: self.cylinders(),
            sectors_per_track: self.sectors_per_track(),
            sector_size: self.sector_size(),
        }
    }

    /// Set the number of sides; returns true if the value changed
    pub fn set_sides(&self, sides: usize) -> bool {
        self.update(&self.sides, sides)
    }

    /// Set the number of cylinders; returns true if the value changed
    pub fn set_cylinders(&self, cylinders: usize) -> bool {
        self.update(&self.cylinders, cylinders)
    }

    /// Set sectors per track; returns true if the value changed
    pub fn set_sectors_per_track(&self, sectors_per_track: usize) -> bool {
        self.update(&self.sectors_per_track, sectors_per_track)
    }

    /// Set the sector size; returns true if the value changed
    pub fn set_sector_size(&self, sector_size: usize) -> bool {
        self.update(&self.sector_size, sector_size)
    }

    fn update(&self, field: &AtomicUsize, value: usize) -> bool {
        let changed = field.swap(value, Ordering::AcqRel) != value;
        if changed {
            self.invalidate_format_text();
        }
        changed
    }

    /// Whether the medium is write protected
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Change write protection
    pub fn set_read_only(&self, read_only: bool) {
        if self.read_only.swap(read_only, Ordering::AcqRel) != read_only {
            self.invalidate_format_text();
        }
    }

    /// Whether the image was repaired while loading
    pub fn is_repaired(&self) -> bool {
        self.repaired.load(Ordering::Acquire)
    }

    /// Mark the image as repaired
    pub fn set_repaired(&self, repaired: bool) {
        self.repaired.store(repaired, Ordering::Release);
    }

    fn invalidate_format_text(&self) {
        *self
            .format_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Human-readable format description, cached until a dimension changes
    ///
    /// Example: `720 KByte, 80 tracks of 9 * 512 bytes, double-sided`
    pub fn format_text(&self) -> String {
        let mut cached = self
            .format_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(text) = cached.as_ref() {
            return text.clone();
        }

        let snap = self.snapshot();
        let mut text = if snap.is_formatted() {
            let mut text = format!(
                "{} KByte, {} tracks of {} * {} bytes",
                snap.disk_size() / 1024,
                snap.cylinders,
                snap.sectors_per_track,
                snap.sector_size
            );
            match snap.sides {
                1 => text.push_str(", single-sided"),
                2 => text.push_str(", double-sided"),
                _ => {}
            }
            text
        } else {
            "unformatted".to_string()
        };
        if self.is_read_only() {
            text.push_str(", write-protected");
        }
        *cached = Some(text.clone());
        text
    }

    /// Description of the medium, if known
    pub fn media_text(&self) -> Option<String> {
        self.media_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the description of the medium
    pub fn set_media_text(&self, text: Option<String>) {
        *self.media_text.lock().unwrap_or_else(PoisonError::into_inner) = text;
    }

    /// Warning collected while loading the image, if any
    pub fn warning_text(&self) -> Option<String> {
        self.warning_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the warning text
    pub fn set_warning_text(&self, text: Option<String>) {
        *self
            .warning_text
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_text() {
        let geometry = Geometry::new(2, 80, 9, 512);
        assert_eq!(
            geometry.format_text(),
            "720 KByte, 80 tracks of 9 * 512 bytes, double-sided"
        );
    }

    #[test]
    fn test_format_text_unformatted() {
        let geometry = Geometry::new(0, 0, 0, 0);
        assert_eq!(geometry.format_text(), "unformatted");
        geometry.set_read_only(true);
        assert_eq!(geometry.format_text(), "unformatted, write-protected");
    }

    #[test]
    fn test_format_text_invalidated_on_change() {
        let geometry = Geometry::new(1, 80, 5, 1024);
        assert_eq!(
            geometry.format_text(),
            "400 KByte, 80 tracks of 5 * 1024 bytes, single-sided"
        );
        assert!(geometry.set_sides(2));
        assert!(!geometry.set_sides(2));
        assert_eq!(
            geometry.format_text(),
            "800 KByte, 80 tracks of 5 * 1024 bytes, double-sided"
        );
    }

    #[test]
    fn test_texts_and_flags() {
        let geometry = Geometry::from_format(&FloppyDiskFormat::fmt_720k());
        assert_eq!(geometry.snapshot().disk_size(), 737_280);
        assert!(geometry.warning_text().is_none());
        geometry.set_warning_text(Some("repaired".into()));
        geometry.set_repaired(true);
        assert_eq!(geometry.warning_text().as_deref(), Some("repaired"));
        assert!(geometry.is_repaired());
    }
}
