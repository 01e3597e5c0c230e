/// Floppy disk model: geometry, sectors and image backends

/// Floppy disk drive
pub mod drive;
/// Flat sector-major image backend
pub mod flat;
/// Disk-level geometry state
pub mod geometry;
/// Sector interleave mapping
pub mod interleave;
/// Sector identity and data
pub mod sector;
/// Teledisk sector table backend
pub mod teledisk;

pub use drive::FloppyDiskDrive;
pub use flat::{FlatImage, ImageSource, RandomAccess};
pub use geometry::{Geometry, GeometrySnapshot};
pub use interleave::Interleave;
pub use sector::{SectorData, SectorId, SharedImage};
pub use teledisk::TelediskTable;

use crate::error::{DiskError, Result};
use crate::format::{detect_format, FloppyDiskFormat, ImageFileFormat};
use crate::owner::{put_setting, DiskOwner, Settings};
use chrono::NaiveDateTime;
use log::debug;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Concrete representation behind a disk
#[derive(Debug)]
pub enum Backend {
    /// Flat sector-major image (file, device or memory)
    Flat(FlatImage),
    /// Decoded Teledisk sector table (read-only)
    Teledisk(TelediskTable),
}

/// Notification collected under the disk lock and delivered after it is released
#[derive(Debug)]
pub(crate) enum DiskEvent {
    Error(String, Option<io::Error>),
    FormatChanged,
}

#[derive(Debug)]
struct DiskState {
    backend: Backend,
    interleave_factor: usize,
    interleave: Interleave,
    interleave_spt: usize,
    events: Vec<DiskEvent>,
}

impl DiskState {
    /// Rebuild the interleave table if sectors per track changed
    fn sync_interleave(&mut self, geometry: &Geometry) {
        let spt = geometry.sectors_per_track();
        if spt != self.interleave_spt {
            self.interleave = Interleave::build(spt, self.interleave_factor);
            self.interleave_spt = spt;
        }
    }

    fn sectors_of_track(&self, geometry: &Geometry, cyl: usize, head: usize) -> usize {
        match &self.backend {
            Backend::Teledisk(table) => table.sectors_of_track(cyl, head),
            Backend::Flat(_) => {
                let sides = geometry.sides();
                if sides >= 1 && head < sides && cyl < geometry.cylinders() {
                    geometry.sectors_per_track()
                } else {
                    0
                }
            }
        }
    }

    fn sector_by_index(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        slot: usize,
    ) -> Option<SectorData> {
        match &mut self.backend {
            Backend::Flat(image) => {
                let logical = self.interleave.to_logical(slot);
                image.read_sector(geometry, cyl, head, logical, slot, &mut self.events)
            }
            Backend::Teledisk(table) => table.sector(cyl, head, slot).cloned(),
        }
    }

    /// Try the slot where sector `n` usually lives, then scan the track
    #[allow(clippy::too_many_arguments)]
    fn sector_by_id(
        &mut self,
        geometry: &Geometry,
        phys_cyl: usize,
        phys_head: usize,
        cyl: u8,
        head: u8,
        sector: u8,
        size_code: Option<u8>,
    ) -> Option<SectorData> {
        let likely = (sector as usize)
            .checked_sub(1)
            .map(|idx| self.interleave.to_physical(idx));
        if let Some(slot) = likely {
            if let Some(found) = self.sector_by_index(geometry, phys_cyl, phys_head, slot) {
                if found.id().matches(cyl, head, sector, size_code) {
                    return Some(found);
                }
            }
        }

        // Flat images derive IDs from positions, so the likely slot is conclusive
        if matches!(self.backend, Backend::Flat(_)) {
            return None;
        }

        let n = self.sectors_of_track(geometry, phys_cyl, phys_head);
        for slot in (0..n).filter(|&slot| Some(slot) != likely) {
            if let Some(found) = self.sector_by_index(geometry, phys_cyl, phys_head, slot) {
                if found.id().matches(cyl, head, sector, size_code) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn write_sector(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        sector: &mut SectorData,
        data: &[u8],
        deleted: bool,
    ) -> bool {
        if geometry.is_read_only() {
            return false;
        }
        match &mut self.backend {
            Backend::Flat(image) => {
                let logical = self.interleave.to_logical(sector.index_on_track());
                image.write_sector(
                    geometry,
                    cyl,
                    head,
                    logical,
                    sector,
                    data,
                    deleted,
                    &mut self.events,
                )
            }
            Backend::Teledisk(_) => false,
        }
    }

    fn format_track(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        ids: &[SectorId],
        data: &[u8],
    ) -> bool {
        if geometry.is_read_only() || ids.is_empty() {
            return false;
        }
        if let Backend::Flat(image) = &mut self.backend {
            if let Some(done) = image.append_track(geometry, cyl, head, ids, data, &mut self.events) {
                return done;
            }
        }
        for id in ids {
            let written = match self.sector_by_id(
                geometry,
                cyl,
                head,
                id.cylinder,
                id.head,
                id.sector,
                id.size_code,
            ) {
                Some(mut sector) => self.write_sector(geometry, cyl, head, &mut sector, data, false),
                None => false,
            };
            if !written {
                debug!("Formatting track {}/{} stopped at sector {}", cyl, head, id);
                return false;
            }
        }
        true
    }
}

/// A floppy disk medium
///
/// All sector lookups, writes and geometry changes on one disk are
/// serialized by a lock owned by that disk. Geometry dimensions can be read
/// from any thread without taking the lock.
pub struct FloppyDisk {
    geometry: Geometry,
    state: Mutex<DiskState>,
    owner: Option<Arc<dyn DiskOwner>>,
}

impl std::fmt::Debug for FloppyDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloppyDisk")
            .field("geometry", &self.geometry.snapshot())
            .field("read_only", &self.geometry.is_read_only())
            .finish()
    }
}

impl FloppyDisk {
    /// Create a disk from a backend and its geometry
    pub fn new(backend: Backend, geometry: Geometry, interleave: usize) -> Self {
        let read_only = match &backend {
            Backend::Flat(image) => image.is_read_only(),
            Backend::Teledisk(_) => true,
        };
        geometry.set_read_only(read_only);
        let spt = geometry.sectors_per_track();
        Self {
            state: Mutex::new(DiskState {
                backend,
                interleave_factor: interleave,
                interleave: Interleave::build(spt, interleave),
                interleave_spt: spt,
                events: Vec::new(),
            }),
            geometry,
            owner: None,
        }
    }

    /// Wrap a flat image with the given format
    pub fn from_flat(mut image: FlatImage, format: &FloppyDiskFormat) -> Self {
        image.init_size_code(format.sector_size);
        Self::new(
            Backend::Flat(image),
            Geometry::from_format(format),
            format.interleave as usize,
        )
    }

    /// Create a new flat image file that takes its geometry from formatting
    pub fn create_flat_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = FlatImage::new_file(path)?;
        Ok(Self::new(Backend::Flat(image), Geometry::default(), 0))
    }

    /// Open a disk image file
    ///
    /// Teledisk containers are detected by their header; any other file is
    /// opened as a flat image, which requires `format`.
    pub fn open<P: AsRef<Path>>(path: P, format: Option<&FloppyDiskFormat>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut header = [0u8; 3];
        let n = File::open(path)?.read(&mut header)?;
        match detect_format(&header[..n]) {
            Some(ImageFileFormat::Teledisk) | Some(ImageFileFormat::TelediskAdvanced) => {
                crate::io::teledisk::read_file(path, crate::io::teledisk::TelediskOptions::default())
            }
            _ => {
                let format = format.ok_or_else(|| {
                    DiskError::invalid_format(format!(
                        "{}: flat image needs a disk format",
                        path.display()
                    ))
                })?;
                format.validate()?;
                Ok(Self::from_flat(FlatImage::open_file(path, read_only)?, format))
            }
        }
    }

    /// Attach an owner receiving notifications
    pub fn with_owner(mut self, owner: Arc<dyn DiskOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Replace or remove the owner
    pub fn set_owner(&mut self, owner: Option<Arc<dyn DiskOwner>>) {
        self.owner = owner;
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the disk lock, then deliver collected notifications
    fn with_state<R>(&self, f: impl FnOnce(&mut DiskState, &Geometry) -> R) -> R {
        let (result, events) = {
            let mut state = self.lock();
            state.sync_interleave(&self.geometry);
            let result = f(&mut state, &self.geometry);
            (result, std::mem::take(&mut state.events))
        };
        self.dispatch(events);
        result
    }

    fn dispatch(&self, events: Vec<DiskEvent>) {
        let owner = match &self.owner {
            Some(owner) => owner,
            None => return,
        };
        for event in events {
            match event {
                DiskEvent::Error(message, cause) => owner.report_error(
                    &message,
                    cause.as_ref().map(|e| e as &(dyn std::error::Error + 'static)),
                ),
                DiskEvent::FormatChanged => owner.report_format_changed(self),
            }
        }
    }

    /// Geometry of the disk
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Number of sides
    #[inline]
    pub fn sides(&self) -> usize {
        self.geometry.sides()
    }

    /// Number of cylinders
    #[inline]
    pub fn cylinders(&self) -> usize {
        self.geometry.cylinders()
    }

    /// Sectors per track
    #[inline]
    pub fn sectors_per_track(&self) -> usize {
        self.geometry.sectors_per_track()
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.geometry.sector_size()
    }

    /// Total capacity in bytes
    pub fn disk_size(&self) -> usize {
        self.geometry.snapshot().disk_size()
    }

    fn change_geometry(&self, apply: impl FnOnce(&Geometry) -> bool) {
        let changed = self.with_state(|state, geometry| {
            let changed = apply(geometry);
            state.sync_interleave(geometry);
            if changed {
                if let Backend::Flat(image) = &mut state.backend {
                    image.clear_cache();
                    if geometry.sector_size() > 0 {
                        image.init_size_code(geometry.sector_size());
                    }
                }
            }
            changed
        });
        if changed {
            self.dispatch(vec![DiskEvent::FormatChanged]);
        }
    }

    /// Set the number of sides
    pub fn set_sides(&self, sides: usize) {
        self.change_geometry(|g| g.set_sides(sides));
    }

    /// Set the number of cylinders
    pub fn set_cylinders(&self, cylinders: usize) {
        self.change_geometry(|g| g.set_cylinders(cylinders));
    }

    /// Set sectors per track
    pub fn set_sectors_per_track(&self, sectors_per_track: usize) {
        self.change_geometry(|g| g.set_sectors_per_track(sectors_per_track));
    }

    /// Set the sector size
    pub fn set_sector_size(&self, sector_size: usize) {
        self.change_geometry(|g| g.set_sector_size(sector_size));
    }

    /// Whether the medium is write protected
    pub fn is_read_only(&self) -> bool {
        self.geometry.is_read_only()
    }

    /// Human-readable format description
    pub fn format_text(&self) -> String {
        self.geometry.format_text()
    }

    /// Name of the image file format
    pub fn file_format_text(&self) -> &'static str {
        match &self.lock().backend {
            Backend::Flat(_) => "Flat image",
            Backend::Teledisk(_) => "Teledisk image",
        }
    }

    /// Description of the medium, if known
    pub fn media_text(&self) -> Option<String> {
        self.geometry.media_text()
    }

    /// Warning collected while loading the image
    pub fn warning_text(&self) -> Option<String> {
        self.geometry.warning_text()
    }

    /// Whether the image was repaired while loading
    pub fn is_repaired(&self) -> bool {
        self.geometry.is_repaired()
    }

    /// Remark stored in the image
    pub fn remark(&self) -> Option<String> {
        match &self.lock().backend {
            Backend::Teledisk(table) => table.remark().map(str::to_string),
            Backend::Flat(_) => None,
        }
    }

    /// Capture date stored in the image
    pub fn disk_date(&self) -> Option<NaiveDateTime> {
        match &self.lock().backend {
            Backend::Teledisk(table) => table.disk_date(),
            Backend::Flat(_) => None,
        }
    }

    /// Remark and capture date combined for display
    pub fn description(&self) -> Option<String> {
        match &self.lock().backend {
            Backend::Teledisk(table) => table.description(),
            Backend::Flat(_) => None,
        }
    }

    /// Get a sector by its physical slot on a track
    pub fn sector_by_index(&self, cyl: usize, head: usize, idx: usize) -> Option<SectorData> {
        self.with_state(|state, geometry| state.sector_by_index(geometry, cyl, head, idx))
    }

    /// Get a sector by its ID on a physical track
    ///
    /// A `None` size code matches sectors of any size.
    pub fn sector_by_id(
        &self,
        phys_cyl: usize,
        phys_head: usize,
        cyl: u8,
        head: u8,
        sector: u8,
        size_code: Option<u8>,
    ) -> Option<SectorData> {
        self.with_state(|state, geometry| {
            state.sector_by_id(geometry, phys_cyl, phys_head, cyl, head, sector, size_code)
        })
    }

    /// Number of sectors on a physical track
    pub fn sectors_of_track(&self, cyl: usize, head: usize) -> usize {
        self.with_state(|state, geometry| state.sectors_of_track(geometry, cyl, head))
    }

    /// Format a track by writing `data` into every listed sector
    ///
    /// Fails on a read-only medium, an empty ID list, or the first sector
    /// that cannot be found or written.
    pub fn format_track(&self, cyl: usize, head: usize, ids: &[SectorId], data: &[u8]) -> bool {
        self.with_state(|state, geometry| state.format_track(geometry, cyl, head, ids, data))
    }

    /// Write a sector previously obtained from this disk
    ///
    /// On success the bytes are also copied into `sector`.
    pub fn write_sector(
        &self,
        cyl: usize,
        head: usize,
        sector: &mut SectorData,
        data: &[u8],
        deleted: bool,
    ) -> bool {
        self.with_state(|state, geometry| {
            state.write_sector(geometry, cyl, head, sector, data, deleted)
        })
    }

    /// Offset of the first sector number from 1, checked over all tracks
    ///
    /// Fails if tracks disagree on their lowest sector number or any track
    /// starts below 1.
    pub fn sector_offset(&self) -> Result<u8> {
        self.with_state(|state, geometry| {
            let snap = geometry.snapshot();
            let mut offset: Option<u8> = None;
            for cyl in 0..snap.cylinders {
                for head in 0..snap.sides {
                    let n = state.sectors_of_track(geometry, cyl, head);
                    let lowest = (0..n)
                        .filter_map(|idx| state.sector_by_index(geometry, cyl, head, idx))
                        .map(|sector| sector.sector())
                        .min();
                    let lowest = match lowest {
                        Some(lowest) => lowest,
                        None => continue,
                    };
                    if lowest < 1 {
                        return Err(DiskError::IrregularSectorNumbering(format!(
                            "cylinder {}, head {}: sector number {} below 1",
                            cyl, head, lowest
                        )));
                    }
                    match offset {
                        None => offset = Some(lowest - 1),
                        Some(o) if o != lowest - 1 => {
                            return Err(DiskError::IrregularSectorNumbering(format!(
                                "cylinder {}, head {}: first sector {} instead of {}",
                                cyl,
                                head,
                                lowest,
                                o + 1
                            )));
                        }
                        Some(_) => {}
                    }
                }
            }
            Ok(offset.unwrap_or(0))
        })
    }

    /// Write buffered data to the backing store
    pub fn flush(&self) -> Result<()> {
        match &mut self.lock().backend {
            Backend::Flat(image) => image.flush(),
            Backend::Teledisk(_) => Ok(()),
        }
    }

    /// Store the disk settings under `prefix`
    pub fn put_settings_to(&self, settings: &mut Settings, prefix: &str) {
        put_setting(settings, prefix, "readonly", self.is_read_only());
        put_setting(settings, prefix, "sides", self.sides());
        put_setting(settings, prefix, "cylinders", self.cylinders());
        put_setting(settings, prefix, "sectors_per_track", self.sectors_per_track());
        put_setting(settings, prefix, "sectorsize", self.sector_size());
        if let Backend::Flat(image) = &self.lock().backend {
            image.put_settings_to(settings, prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_disk(format: &FloppyDiskFormat) -> FloppyDisk {
        let mut data = vec![0u8; format.disk_size()];
        let spt = format.sectors_per_track as usize;
        for (n, chunk) in data.chunks_mut(format.sector_size).enumerate() {
            chunk.fill((n % spt) as u8 + 1);
        }
        FloppyDisk::from_flat(FlatImage::from_bytes(data), format)
    }

    fn teledisk_disk(numbers: &[u8]) -> FloppyDisk {
        let mut table = TelediskTable::new();
        for &num in numbers {
            let track = table.track_mut(0, 0);
            let idx = track.len();
            track.push(SectorData::new(idx, SectorId::new(0, 0, num, Some(0)), vec![num; 128]));
        }
        FloppyDisk::new(Backend::Teledisk(table), Geometry::new(1, 1, numbers.len(), 128), 0)
    }

    #[test]
    fn test_sector_by_index_and_id() {
        let disk = memory_disk(&FloppyDiskFormat::new(2, 40, 9, 512));
        let sector = disk.sector_by_index(3, 1, 4).unwrap();
        assert_eq!(sector.id(), &SectorId::new(3, 1, 5, Some(2)));
        assert_eq!(sector.data_byte(0), Some(5));

        let by_id = disk.sector_by_id(3, 1, 3, 1, 5, None).unwrap();
        assert_eq!(by_id.data(), sector.data());
        assert!(disk.sector_by_id(3, 1, 3, 1, 5, Some(3)).is_none());
        assert!(disk.sector_by_id(3, 1, 3, 1, 10, None).is_none());
    }

    #[test]
    fn test_geometry_change_rereads_file() {
        let format = FloppyDiskFormat::new(2, 2, 2, 512);
        let file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..format.disk_size()).map(|n| (n / 512) as u8).collect();
        std::fs::write(file.path(), &data).unwrap();
        let disk = FloppyDisk::open(file.path(), Some(&format), false).unwrap();

        assert_eq!(disk.sector_by_index(1, 0, 0).unwrap().data_byte(0), Some(4));

        disk.set_sides(1);
        assert_eq!(disk.sector_by_index(1, 0, 0).unwrap().data_byte(0), Some(2));

        disk.set_sector_size(256);
        let sector = disk.sector_by_index(1, 0, 0).unwrap();
        assert_eq!(sector.data_len(), 256);
        assert_eq!(sector.data_byte(0), Some(1));
        assert_eq!(sector.id().size_code, Some(1));
    }

    #[test]
    fn test_sectors_of_track_out_of_range() {
        let disk = memory_disk(&FloppyDiskFormat::new(1, 40, 9, 512));
        assert_eq!(disk.sectors_of_track(0, 0), 9);
        assert_eq!(disk.sectors_of_track(0, 1), 0);
        assert_eq!(disk.sectors_of_track(40, 0), 0);
    }

    #[test]
    fn test_interleave_maps_slots() {
        let format = FloppyDiskFormat::new(1, 2, 9, 128).with_interleave(2);
        let disk = memory_disk(&format);
        let numbers: Vec<u8> = (0..9)
            .map(|slot| disk.sector_by_index(0, 0, slot).unwrap().sector())
            .collect();
        assert_eq!(numbers, vec![1, 6, 2, 7, 3, 8, 4, 9, 5]);

        let sector = disk.sector_by_id(0, 0, 0, 0, 7, None).unwrap();
        assert_eq!(sector.index_on_track(), 3);
        assert_eq!(sector.data_byte(0), Some(7));
    }

    #[test]
    fn test_write_sector_round_trip() {
        let disk = memory_disk(&FloppyDiskFormat::fmt_720k());
        let mut sector = disk.sector_by_id(5, 0, 5, 0, 3, None).unwrap();
        assert!(disk.write_sector(5, 0, &mut sector, &[0xAB; 512], false));
        assert!(sector.data().iter().all(|&b| b == 0xAB));

        let again = disk.sector_by_id(5, 0, 5, 0, 3, None).unwrap();
        assert!(again.data().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_write_sector_rejections() {
        let disk = memory_disk(&FloppyDiskFormat::fmt_720k());
        let mut sector = disk.sector_by_id(1, 0, 1, 0, 1, None).unwrap();
        assert!(!disk.write_sector(1, 0, &mut sector, &[0; 256], false));
        assert!(!disk.write_sector(1, 0, &mut sector, &[0; 512], true));
        // stale handle: position does not match another track
        assert!(!disk.write_sector(2, 0, &mut sector, &[0; 512], false));
    }

    #[test]
    fn test_read_only_resource() {
        let format = FloppyDiskFormat::new(1, 1, 2, 128);
        let disk = FloppyDisk::from_flat(FlatImage::resource("rom", vec![0; 256]), &format);
        assert!(disk.is_read_only());
        let mut sector = disk.sector_by_index(0, 0, 0).unwrap();
        assert!(!disk.write_sector(0, 0, &mut sector, &[1; 128], false));
        assert!(!disk.format_track(0, 0, &[SectorId::new(0, 0, 1, Some(0))], &[0xE5; 128]));
        assert!(disk.format_text().ends_with(", write-protected"));
    }

    #[test]
    fn test_format_track_default() {
        let disk = memory_disk(&FloppyDiskFormat::new(2, 2, 4, 128));
        let ids: Vec<SectorId> = (1..=4).map(|n| SectorId::new(1, 1, n, Some(0))).collect();
        assert!(disk.format_track(1, 1, &ids, &[0xE5; 128]));
        for n in 1..=4 {
            let sector = disk.sector_by_id(1, 1, 1, 1, n, None).unwrap();
            assert!(sector.data().iter().all(|&b| b == 0xE5));
        }
        assert!(!disk.format_track(1, 1, &[], &[0xE5; 128]));
        let missing = [SectorId::new(1, 1, 9, Some(0))];
        assert!(!disk.format_track(1, 1, &missing, &[0xE5; 128]));
    }

    #[test]
    fn test_scan_finds_out_of_order_sectors() {
        let disk = teledisk_disk(&[3, 1, 4, 2]);
        assert_eq!(disk.sectors_of_track(0, 0), 4);
        let sector = disk.sector_by_id(0, 0, 0, 0, 4, Some(0)).unwrap();
        assert_eq!(sector.index_on_track(), 2);
        assert!(disk.sector_by_id(0, 0, 0, 0, 5, None).is_none());
        assert!(disk.is_read_only());
    }

    #[test]
    fn test_sector_offset() {
        assert_eq!(teledisk_disk(&[3, 1, 4, 2]).sector_offset().unwrap(), 0);
        assert_eq!(teledisk_disk(&[0x42, 0x41]).sector_offset().unwrap(), 0x40);
        assert!(matches!(
            teledisk_disk(&[0, 1]).sector_offset(),
            Err(DiskError::IrregularSectorNumbering(_))
        ));
    }

    #[test]
    fn test_sector_offset_disagreeing_tracks() {
        let mut table = TelediskTable::new();
        table
            .track_mut(0, 0)
            .push(SectorData::new(0, SectorId::new(0, 0, 1, Some(0)), vec![0; 128]));
        table
            .track_mut(1, 0)
            .push(SectorData::new(0, SectorId::new(1, 0, 2, Some(0)), vec![0; 128]));
        let disk = FloppyDisk::new(Backend::Teledisk(table), Geometry::new(1, 2, 1, 128), 0);
        assert!(disk.sector_offset().is_err());
    }

    #[test]
    fn test_settings() {
        let disk = memory_disk(&FloppyDiskFormat::fmt_720k());
        let mut settings = Settings::new();
        disk.put_settings_to(&mut settings, "fd.");
        assert_eq!(settings.get("fd.sides").map(String::as_str), Some("2"));
        assert_eq!(settings.get("fd.cylinders").map(String::as_str), Some("80"));
        assert_eq!(settings.get("fd.sectors_per_track").map(String::as_str), Some("9"));
        assert_eq!(settings.get("fd.sectorsize").map(String::as_str), Some("512"));
        assert_eq!(settings.get("fd.readonly").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_format_changed_notification() {
        #[derive(Default)]
        struct Counter(AtomicUsize);
        impl DiskOwner for Counter {
            fn report_format_changed(&self, disk: &FloppyDisk) {
                assert_eq!(disk.sides(), 1);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter::default());
        let disk = memory_disk(&FloppyDiskFormat::fmt_720k()).with_owner(counter.clone());
        disk.set_sides(1);
        disk.set_sides(1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            disk.format_text(),
            "360 KByte, 80 tracks of 9 * 512 bytes, single-sided"
        );
    }
}
