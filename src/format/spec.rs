/// Floppy disk format descriptions and presets

use crate::error::{DiskError, Result};
use crate::format::size_code_for;
use std::fmt;

/// Physical and CP/M-level format of a floppy disk
///
/// The physical part (sides, cylinders, sectors per track, sector size,
/// interleave) describes the medium. The remaining fields describe the
/// CP/M volume layout used when building an image for the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloppyDiskFormat {
    /// Number of sides (1 or 2)
    pub sides: u8,
    /// Number of cylinders
    pub cylinders: u16,
    /// Sectors per track
    pub sectors_per_track: u16,
    /// Sector size in bytes
    pub sector_size: usize,
    /// Interleave factor (0 or 1 = no interleave)
    pub interleave: u16,
    /// Number of reserved system tracks
    pub system_tracks: u16,
    /// Number of allocation blocks holding the directory
    pub directory_blocks: u16,
    /// Allocation block size in bytes
    pub block_size: usize,
    /// Block numbers stored as 16-bit values
    pub block_num_16bit: bool,
    /// DateStamper timestamps enabled
    pub date_stamper: bool,
}

impl FloppyDiskFormat {
    /// Create a physical format description with default CP/M parameters
    pub fn new(sides: u8, cylinders: u16, sectors_per_track: u16, sector_size: usize) -> Self {
        Self {
            sides,
            cylinders,
            sectors_per_track,
            sector_size,
            interleave: 0,
            system_tracks: 0,
            directory_blocks: 2,
            block_size: 2048,
            block_num_16bit: true,
            date_stamper: false,
        }
    }

    /// Set the interleave factor
    pub fn with_interleave(mut self, interleave: u16) -> Self {
        self.interleave = interleave;
        self
    }

    /// Set the number of system tracks
    pub fn with_system_tracks(mut self, system_tracks: u16) -> Self {
        self.system_tracks = system_tracks;
        self
    }

    /// Set directory block count and block size
    pub fn with_blocks(mut self, directory_blocks: u16, block_size: usize, block_num_16bit: bool) -> Self {
        self.directory_blocks = directory_blocks;
        self.block_size = block_size;
        self.block_num_16bit = block_num_16bit;
        self
    }

    /// Enable or disable DateStamper
    pub fn with_date_stamper(mut self, date_stamper: bool) -> Self {
        self.date_stamper = date_stamper;
        self
    }

    /// 800 KByte, 5 x 1024 bytes, interleave 4, no system tracks
    pub fn fmt_800k_i4() -> Self {
        Self::new(2, 80, 5, 1024).with_interleave(4)
    }

    /// 800 KByte, 5 x 1024 bytes, no interleave, no system tracks
    pub fn fmt_800k() -> Self {
        Self::new(2, 80, 5, 1024)
    }

    /// 780 KByte CP/A format: 800 KByte medium with two system tracks
    pub fn fmt_780k() -> Self {
        Self::new(2, 80, 5, 1024).with_system_tracks(2)
    }

    /// 780 KByte with interleave 2
    pub fn fmt_780k_i2() -> Self {
        Self::fmt_780k().with_interleave(2)
    }

    /// 780 KByte with interleave 3
    pub fn fmt_780k_i3() -> Self {
        Self::fmt_780k().with_interleave(3)
    }

    /// 780 KByte with interleave 3 and DateStamper
    pub fn fmt_780k_i3_datestamper() -> Self {
        Self::fmt_780k_i3().with_date_stamper(true)
    }

    /// 720 KByte, 9 x 512 bytes
    pub fn fmt_720k() -> Self {
        Self::new(2, 80, 9, 512).with_blocks(3, 2048, true)
    }

    /// 711 KByte BASDOS format: 720 KByte medium with one system track, interleave 5
    pub fn fmt_711k_i5_basdos() -> Self {
        Self::new(2, 80, 9, 512)
            .with_interleave(5)
            .with_system_tracks(1)
            .with_blocks(3, 2048, true)
    }

    /// 624 KByte, 16 x 256 bytes with two system tracks
    pub fn fmt_624k() -> Self {
        Self::new(2, 80, 16, 256)
            .with_system_tracks(2)
            .with_blocks(2, 2048, true)
    }

    /// 400 KByte single-sided, 5 x 1024 bytes
    pub fn fmt_400k() -> Self {
        Self::new(1, 80, 5, 1024).with_blocks(2, 2048, false)
    }

    /// 1440 KByte, 18 x 512 bytes
    pub fn fmt_1440k() -> Self {
        Self::new(2, 80, 18, 512).with_blocks(4, 2048, true)
    }

    /// Total capacity in bytes
    pub fn disk_size(&self) -> usize {
        self.sides as usize
            * self.cylinders as usize
            * self.sectors_per_track as usize
            * self.sector_size
    }

    /// Total capacity in kilobytes
    pub fn disk_size_kb(&self) -> usize {
        self.disk_size() / 1024
    }

    /// Capacity available to the CP/M volume (without system tracks)
    pub fn volume_size(&self) -> usize {
        let reserved = self.system_tracks as usize
            * self.sides as usize
            * self.sectors_per_track as usize
            * self.sector_size;
        self.disk_size().saturating_sub(reserved)
    }

    /// Check that all physical values describe a usable medium
    pub fn validate(&self) -> Result<()> {
        if self.sides == 0 || self.sides > 2 {
            return Err(DiskError::geometry(format!("{} sides not supported", self.sides)));
        }
        if self.cylinders == 0 || self.sectors_per_track == 0 {
            return Err(DiskError::geometry(
                "cylinders and sectors per track must not be zero",
            ));
        }
        if self.sector_size < 128 || size_code_for(self.sector_size).is_none() {
            return Err(DiskError::geometry(format!(
                "sector size {} is not a power-of-two multiple of 128",
                self.sector_size
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FloppyDiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}K ({} x {} x {} x {} bytes",
            self.volume_size() / 1024,
            self.sides,
            self.cylinders,
            self.sectors_per_track,
            self.sector_size
        )?;
        if self.interleave > 1 {
            write!(f, ", interleave {}", self.interleave)?;
        }
        if self.date_stamper {
            write!(f, ", DateStamper")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_sizes() {
        assert_eq!(FloppyDiskFormat::fmt_720k().disk_size_kb(), 720);
        assert_eq!(FloppyDiskFormat::fmt_800k().disk_size_kb(), 800);
        assert_eq!(FloppyDiskFormat::fmt_1440k().disk_size_kb(), 1440);
        assert_eq!(FloppyDiskFormat::fmt_400k().disk_size_kb(), 400);
    }

    #[test]
    fn test_volume_sizes() {
        assert_eq!(FloppyDiskFormat::fmt_780k().volume_size() / 1024, 780);
        assert_eq!(FloppyDiskFormat::fmt_711k_i5_basdos().volume_size() / 1024, 711);
        assert_eq!(FloppyDiskFormat::fmt_624k().volume_size() / 1024, 624);
        assert_eq!(FloppyDiskFormat::fmt_800k_i4().volume_size() / 1024, 800);
    }

    #[test]
    fn test_validate() {
        assert!(FloppyDiskFormat::fmt_720k().validate().is_ok());
        assert!(FloppyDiskFormat::new(3, 80, 9, 512).validate().is_err());
        assert!(FloppyDiskFormat::new(2, 0, 9, 512).validate().is_err());
        assert!(FloppyDiskFormat::new(2, 80, 9, 500).validate().is_err());
        assert!(FloppyDiskFormat::new(2, 80, 9, 64).validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            FloppyDiskFormat::fmt_780k_i3_datestamper().to_string(),
            "780K (2 x 80 x 5 x 1024 bytes, interleave 3, DateStamper)"
        );
        assert_eq!(
            FloppyDiskFormat::fmt_720k().to_string(),
            "720K (2 x 80 x 9 x 512 bytes)"
        );
    }

    #[test]
    fn test_presets_are_distinct() {
        assert_ne!(FloppyDiskFormat::fmt_780k(), FloppyDiskFormat::fmt_780k_i2());
        assert_ne!(FloppyDiskFormat::fmt_780k_i3(), FloppyDiskFormat::fmt_780k_i3_datestamper());
        assert_ne!(FloppyDiskFormat::fmt_800k(), FloppyDiskFormat::fmt_800k_i4());
    }
}
