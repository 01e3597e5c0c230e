/// Floppy disk drive emulation

use super::sector::{SectorData, SectorId};
use super::FloppyDisk;
use crate::owner::{put_setting, DiskOwner, Settings};
use log::debug;
use std::sync::Arc;

/// One floppy disk drive with head position and an optional inserted disk
///
/// The drive can step over odd cylinders, which lets an 80-track drive
/// read media formatted with 40 tracks.
pub struct FloppyDiskDrive {
    number: usize,
    disk: Option<Arc<FloppyDisk>>,
    owner: Option<Arc<dyn DiskOwner>>,
    skip_odd_cylinders: bool,
    last_formatted_cyl: usize,
    head: usize,
    /// Present cylinder number
    pcn: usize,
    /// New cylinder number (seek target)
    ncn: usize,
}

impl std::fmt::Debug for FloppyDiskDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloppyDiskDrive")
            .field("number", &self.number)
            .field("disk", &self.disk)
            .field("skip_odd_cylinders", &self.skip_odd_cylinders)
            .field("pcn", &self.pcn)
            .field("ncn", &self.ncn)
            .finish()
    }
}

impl FloppyDiskDrive {
    /// Create an empty drive
    pub fn new(number: usize) -> Self {
        Self {
            number,
            disk: None,
            owner: None,
            skip_odd_cylinders: false,
            last_formatted_cyl: 0,
            head: 0,
            pcn: 0,
            ncn: 0,
        }
    }

    /// Attach an owner receiving drive access notifications
    pub fn with_owner(mut self, owner: Arc<dyn DiskOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Drive number
    pub fn number(&self) -> usize {
        self.number
    }

    /// Present cylinder number
    pub fn cylinder(&self) -> usize {
        self.pcn
    }

    /// Currently selected head
    pub fn head(&self) -> usize {
        self.head
    }

    /// The inserted disk
    pub fn disk(&self) -> Option<&Arc<FloppyDisk>> {
        self.disk.as_ref()
    }

    /// Whether odd cylinders are skipped
    pub fn skip_odd_cylinders(&self) -> bool {
        self.skip_odd_cylinders
    }

    /// A drive without a disk counts as write protected
    pub fn is_read_only(&self) -> bool {
        self.disk.as_ref().map_or(true, |disk| disk.is_read_only())
    }

    /// Whether a disk is inserted
    pub fn is_ready(&self) -> bool {
        self.disk.is_some()
    }

    /// Whether a seek is in progress
    pub fn is_seek_mode(&self) -> bool {
        self.is_ready() && self.pcn != self.ncn
    }

    /// Insert a disk
    pub fn set_disk(&mut self, disk: Arc<FloppyDisk>, skip_odd_cylinders: bool) {
        debug!("Drive {}: disk inserted ({})", self.number, disk.format_text());
        self.disk = Some(disk);
        self.skip_odd_cylinders = skip_odd_cylinders;
    }

    /// Remove the disk, flushing pending writes
    pub fn remove_disk(&mut self) -> Option<Arc<FloppyDisk>> {
        let disk = self.disk.take();
        if let Some(disk) = &disk {
            if let Err(e) = disk.flush() {
                if let Some(owner) = &self.owner {
                    owner.report_error("Flushing disk failed", Some(&e));
                }
            }
            debug!("Drive {}: disk removed", self.number);
        }
        disk
    }

    /// Reset head position and stepping state
    pub fn reset(&mut self) {
        self.skip_odd_cylinders = false;
        self.last_formatted_cyl = 0;
        self.head = 0;
        self.pcn = 0;
        self.ncn = 0;
    }

    /// Select a head and start seeking to `cyl`
    pub fn set_seek_mode(&mut self, head: usize, cyl: usize) {
        self.head = head;
        self.ncn = cyl;
    }

    /// Move the head one cylinder towards the seek target; returns true once
    /// the target is reached
    pub fn seek_step(&mut self) -> bool {
        if self.pcn < self.ncn {
            self.pcn += 1;
        } else if self.pcn > self.ncn {
            self.pcn -= 1;
        }
        self.pcn == self.ncn
    }

    /// Cylinder on the disk under the head
    fn disk_cylinder(&self) -> usize {
        if self.disk.is_some() && self.skip_odd_cylinders {
            self.pcn / 2
        } else {
            self.pcn
        }
    }

    fn accessed(&self) {
        if let Some(owner) = &self.owner {
            owner.report_drive_accessed(self.number);
        }
    }

    /// Find a sector by ID at or after slot `start_idx` of the current track
    ///
    /// If the first match lies before `start_idx`, the search continues
    /// slot by slot from `start_idx`.
    pub fn read_sector_by_id(
        &mut self,
        phys_head: usize,
        start_idx: usize,
        cyl: u8,
        head: u8,
        sector: u8,
        size_code: Option<u8>,
    ) -> Option<SectorData> {
        let disk = self.disk.as_ref()?;
        self.accessed();
        let phys_cyl = self.disk_cylinder();
        let found = disk.sector_by_id(phys_cyl, phys_head, cyl, head, sector, size_code)?;
        if found.index_on_track() >= start_idx {
            return Some(found);
        }
        (start_idx..)
            .map_while(|idx| disk.sector_by_index(phys_cyl, phys_head, idx))
            .find(|candidate| candidate.id().matches(cyl, head, sector, size_code))
    }

    /// Get a sector by its slot on the current track
    pub fn read_sector_by_index(&mut self, phys_head: usize, idx: usize) -> Option<SectorData> {
        let disk = self.disk.as_ref()?;
        self.accessed();
        disk.sector_by_index(self.disk_cylinder(), phys_head, idx)
    }

    /// Write a sector on the current track
    pub fn write_sector(
        &mut self,
        phys_head: usize,
        sector: &mut SectorData,
        data: &[u8],
        deleted: bool,
    ) -> bool {
        let disk = match &self.disk {
            Some(disk) => disk,
            None => return false,
        };
        self.accessed();
        disk.write_sector(self.disk_cylinder(), phys_head, sector, data, deleted)
    }

    /// Format the current track
    ///
    /// Formatting cylinder 2 directly after cylinder 0 of a fresh disk means
    /// the controller steps over odd cylinders.
    pub fn format_track(&mut self, head: usize, ids: &[SectorId], data: &[u8]) -> bool {
        self.head = head;
        let disk = match &self.disk {
            Some(disk) if !ids.is_empty() => Arc::clone(disk),
            _ => return false,
        };
        self.accessed();
        if self.pcn == 0 {
            self.skip_odd_cylinders = false;
        } else if self.pcn == 2 && self.last_formatted_cyl == 0 && disk.cylinders() < 2 {
            debug!("Drive {}: skipping odd cylinders", self.number);
            self.skip_odd_cylinders = true;
        } else if self.pcn % 2 != 0 {
            self.skip_odd_cylinders = false;
        }
        if disk.format_track(self.disk_cylinder(), head, ids, data) {
            self.last_formatted_cyl = self.pcn;
            true
        } else {
            false
        }
    }

    /// Store the settings of the inserted disk and the drive under `prefix`
    pub fn put_settings_to(&self, settings: &mut Settings, prefix: &str) {
        if let Some(disk) = &self.disk {
            disk.put_settings_to(settings, prefix);
            put_setting(settings, prefix, "skip_odd_cylinders", self.skip_odd_cylinders);
        }
    }
}
