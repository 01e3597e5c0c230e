/// CP/M disk image builder
///
/// Builds a flat image in memory: system tracks first, then the directory
/// area, then the file area. Block numbers count from the start of the
/// directory area, so the first file block follows the directory blocks.

use super::datestamper::{self, DateStamperTable};
use super::FileTimes;
use crate::error::{DiskError, Result};
use crate::format::constants::{CPM_DIR_ENTRY_SIZE, CPM_EOF_BYTE, CPM_ERASED_BYTE, CPM_RECORD_SIZE};
use crate::format::FloppyDiskFormat;
use log::{debug, trace};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// Highest number of extents one file may use
pub const MAX_EXTENTS: usize = 0x800;

/// Layout parameters of a CP/M image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpmImageConfig {
    /// Number of sides
    pub sides: usize,
    /// Number of cylinders
    pub cylinders: usize,
    /// Reserved system tracks (counted per cylinder, all sides)
    pub system_tracks: usize,
    /// Sectors per track
    pub sectors_per_track: usize,
    /// Sector size in bytes
    pub sector_size: usize,
    /// Allocation block size in bytes
    pub block_size: usize,
    /// Number of blocks holding the directory
    pub directory_blocks: usize,
    /// Block numbers stored as 16-bit values
    pub block_num_16bit: bool,
    /// Keep file times in a DateStamper timestamp file
    pub date_stamper: bool,
}

impl From<&FloppyDiskFormat> for CpmImageConfig {
    fn from(format: &FloppyDiskFormat) -> Self {
        Self {
            sides: format.sides as usize,
            cylinders: format.cylinders as usize,
            system_tracks: format.system_tracks as usize,
            sectors_per_track: format.sectors_per_track as usize,
            sector_size: format.sector_size,
            block_size: format.block_size,
            directory_blocks: format.directory_blocks as usize,
            block_num_16bit: format.block_num_16bit,
            date_stamper: format.date_stamper,
        }
    }
}

impl CpmImageConfig {
    /// Create a configuration from physical geometry with 2 KByte blocks
    pub fn new(sides: usize, cylinders: usize, sectors_per_track: usize, sector_size: usize) -> Self {
        Self {
            sides,
            cylinders,
            system_tracks: 0,
            sectors_per_track,
            sector_size,
            block_size: 2048,
            directory_blocks: 2,
            block_num_16bit: true,
            date_stamper: false,
        }
    }

    /// Set the number of system tracks
    pub fn with_system_tracks(mut self, system_tracks: usize) -> Self {
        self.system_tracks = system_tracks;
        self
    }

    /// Set the allocation block size
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the number of directory blocks
    pub fn with_directory_blocks(mut self, directory_blocks: usize) -> Self {
        self.directory_blocks = directory_blocks;
        self
    }

    /// Select 16-bit or 8-bit block numbers
    pub fn with_block_num_16bit(mut self, block_num_16bit: bool) -> Self {
        self.block_num_16bit = block_num_16bit;
        self
    }

    /// Enable or disable DateStamper
    pub fn with_date_stamper(mut self, date_stamper: bool) -> Self {
        self.date_stamper = date_stamper;
        self
    }

    /// Image size in bytes
    pub fn disk_size(&self) -> usize {
        self.sides * self.cylinders * self.sectors_per_track * self.sector_size
    }

    /// Offset of the directory area
    pub fn directory_start(&self) -> usize {
        self.system_tracks * self.sides * self.sectors_per_track * self.sector_size
    }

    /// Size of the directory area in bytes
    pub fn directory_size(&self) -> usize {
        self.directory_blocks * self.block_size
    }

    /// Offset of the file area
    pub fn file_area_start(&self) -> usize {
        self.directory_start() + self.directory_size()
    }

    /// Number of directory entries
    pub fn directory_entries(&self) -> usize {
        self.directory_size() / CPM_DIR_ENTRY_SIZE
    }

    /// Blocks referenced by one directory entry
    pub fn extent_blocks(&self) -> usize {
        if self.block_num_16bit {
            8
        } else {
            16
        }
    }

    /// Limit of the block number field; the limit itself is never allocated
    pub fn max_block_number(&self) -> usize {
        if self.block_num_16bit {
            0xFFFF
        } else {
            0xFF
        }
    }

    /// Image offset of an allocation block
    pub fn block_offset(&self, block: usize) -> usize {
        self.directory_start() + block * self.block_size
    }

    /// Check that the values describe a usable volume
    pub fn validate(&self) -> Result<()> {
        if self.sides == 0 || self.cylinders == 0 || self.sectors_per_track == 0 {
            return Err(DiskError::geometry(
                "sides, cylinders and sectors per track must not be zero",
            ));
        }
        if self.sector_size < CPM_RECORD_SIZE || !self.sector_size.is_power_of_two() {
            return Err(DiskError::geometry(format!(
                "sector size {} is not a power-of-two multiple of 128",
                self.sector_size
            )));
        }
        if self.block_size < 1024 || !self.block_size.is_power_of_two() {
            return Err(DiskError::geometry(format!(
                "block size {} is not a power of two of at least 1024",
                self.block_size
            )));
        }
        if self.directory_blocks == 0 {
            return Err(DiskError::geometry("no directory blocks"));
        }
        if self.system_tracks >= self.cylinders {
            return Err(DiskError::geometry("system tracks leave no room for the volume"));
        }
        if self.file_area_start() > self.disk_size() {
            return Err(DiskError::geometry("directory does not fit on the disk"));
        }
        Ok(())
    }
}

/// Builder for a flat CP/M disk image
#[derive(Debug)]
pub struct CpmImageBuilder {
    config: CpmImageConfig,
    image: Vec<u8>,
    dir_pos: usize,
    file_pos: usize,
    next_block: usize,
    time_table: Option<DateStamperTable>,
    time_file: Option<(usize, usize)>,
}

impl CpmImageBuilder {
    /// Create a builder with an empty volume
    ///
    /// With DateStamper enabled the timestamp file is created as the first
    /// directory entry.
    pub fn new(config: CpmImageConfig) -> Result<Self> {
        config.validate()?;
        let mut image = vec![0u8; config.disk_size()];
        image[config.directory_start()..].fill(CPM_ERASED_BYTE);

        let mut builder = Self {
            config,
            image,
            dir_pos: config.directory_start(),
            file_pos: config.file_area_start(),
            next_block: config.directory_blocks,
            time_table: None,
            time_file: None,
        };
        if config.date_stamper {
            let mut table = DateStamperTable::for_directory(config.directory_size());
            let start = builder.file_pos;
            builder.add_entries(0, datestamper::FILE_NAME, &table.to_bytes(), (false, false, false), None)?;
            builder.time_file = Some((start, builder.file_pos));
            // slot 0 belongs to the timestamp file itself
            table.skip_entry();
            builder.time_table = Some(table);
        }
        debug!(
            "CP/M image: {} bytes, directory at {:#x}, files at {:#x}",
            builder.image.len(),
            config.directory_start(),
            config.file_area_start()
        );
        Ok(builder)
    }

    /// Layout in use
    pub fn config(&self) -> &CpmImageConfig {
        &self.config
    }

    /// Add a file from a byte stream; returns the number of directory entries used
    #[allow(clippy::too_many_arguments)]
    pub fn add_file<R: Read>(
        &mut self,
        user: u8,
        name: &str,
        reader: R,
        read_only: bool,
        system: bool,
        archive: bool,
    ) -> Result<usize> {
        self.add_file_with_times(user, name, reader, read_only, system, archive, None)
    }

    /// Add a file together with its timestamps
    #[allow(clippy::too_many_arguments)]
    pub fn add_file_with_times<R: Read>(
        &mut self,
        user: u8,
        name: &str,
        mut reader: R,
        read_only: bool,
        system: bool,
        archive: bool,
        times: Option<&FileTimes>,
    ) -> Result<usize> {
        if self.time_file.is_some() && name == datestamper::FILE_NAME {
            return Err(DiskError::ReservedFileName(name.to_string()));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.add_entries(user, name, &data, (read_only, system, archive), times)
    }

    /// Add a file from the host filesystem, including its file times
    pub fn add_file_from_path<P: AsRef<Path>>(
        &mut self,
        user: u8,
        name: &str,
        path: P,
        read_only: bool,
        system: bool,
        archive: bool,
    ) -> Result<usize> {
        let path = path.as_ref();
        let times = FileTimes::from_metadata(&fs::metadata(path)?);
        let reader = BufReader::new(File::open(path)?);
        self.add_file_with_times(user, name, reader, read_only, system, archive, Some(&times))
    }

    /// Copy boot data into the system tracks
    pub fn fill_system_tracks(&mut self, data: &[u8]) -> Result<()> {
        let capacity = self.config.directory_start();
        if data.len() > capacity {
            return Err(DiskError::SystemTracksTooLarge {
                size: data.len(),
                capacity,
            });
        }
        self.image[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read boot data for the system tracks from a file
    pub fn fill_system_tracks_from_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = fs::read(path)?;
        self.fill_system_tracks(&data)
    }

    /// Finish the image
    pub fn emit(mut self) -> Vec<u8> {
        if let (Some(table), Some((start, end))) = (&self.time_table, self.time_file) {
            let bytes = table.to_bytes();
            let n = bytes.len().min(end - start);
            self.image[start..start + n].copy_from_slice(&bytes[..n]);
            datestamper::apply_checksums(&mut self.image[start..end]);
        }
        self.image
    }

    fn add_entries(
        &mut self,
        user: u8,
        name: &str,
        data: &[u8],
        flags: (bool, bool, bool),
        times: Option<&FileTimes>,
    ) -> Result<usize> {
        let extent_bytes = self.config.extent_blocks() * self.config.block_size;
        let mut extents = 0;
        let mut chunks = data.chunks(extent_bytes).peekable();
        if chunks.peek().is_none() {
            self.add_dir_entry(user, name, 0, flags, times)?;
            return Ok(1);
        }
        for chunk in chunks {
            if extents >= MAX_EXTENTS {
                return Err(DiskError::FileTooBig(name.to_string()));
            }
            let entry = self.add_dir_entry(user, name, extents, flags, times)?;
            extents += 1;
            for (n, block) in chunk.chunks(self.config.block_size).enumerate() {
                let number = self.write_block(name, block)?;
                if self.config.block_num_16bit {
                    let at = entry + 16 + n * 2;
                    self.image[at..at + 2].copy_from_slice(&(number as u16).to_le_bytes());
                } else {
                    self.image[entry + 16 + n] = number as u8;
                }
            }
            self.image[entry + 15] = chunk.len().div_ceil(CPM_RECORD_SIZE) as u8;
        }
        trace!("{}: {} bytes in {} extents", name, data.len(), extents);
        Ok(extents)
    }

    /// Write one block of file data; returns its block number
    fn write_block(&mut self, name: &str, data: &[u8]) -> Result<usize> {
        let number = self.next_block;
        if number >= self.config.max_block_number() {
            return Err(DiskError::FileTooBig(name.to_string()));
        }
        let start = self.file_pos;
        let end = start + self.config.block_size;
        if end > self.image.len() {
            return Err(DiskError::DiskFull);
        }
        let block = &mut self.image[start..end];
        block[..data.len()].copy_from_slice(data);
        let padded = data.len().next_multiple_of(CPM_RECORD_SIZE).min(block.len());
        block[data.len()..padded].fill(CPM_EOF_BYTE);
        block[padded..].fill(0);
        self.file_pos = end;
        self.next_block += 1;
        Ok(number)
    }

    /// Write a directory entry without block numbers; returns its offset
    fn add_dir_entry(
        &mut self,
        user: u8,
        name: &str,
        extent: usize,
        (read_only, system, archive): (bool, bool, bool),
        times: Option<&FileTimes>,
    ) -> Result<usize> {
        if self.dir_pos >= self.config.file_area_start() {
            return Err(DiskError::DirectoryFull);
        }
        let pos = self.dir_pos;
        let entry = &mut self.image[pos..pos + CPM_DIR_ENTRY_SIZE];
        entry.fill(0);
        entry[0] = user & 0x0F;
        entry[1..12].copy_from_slice(&pack_name(name));
        entry[12] = (extent & 0x1F) as u8;
        entry[14] = ((extent >> 5) & 0x3F) as u8;
        if read_only {
            entry[9] |= 0x80;
        }
        if system {
            entry[10] |= 0x80;
        }
        if archive {
            entry[11] |= 0x80;
        }
        self.dir_pos += CPM_DIR_ENTRY_SIZE;

        if let Some(table) = self.time_table.as_mut() {
            match times {
                Some(times) => table.add_times(times),
                None => table.skip_entry(),
            };
        }
        Ok(pos)
    }
}

/// Pack a file name into the 8.3 directory fields, space padded
pub fn pack_name(name: &str) -> [u8; 11] {
    let mut packed = [b' '; 11];
    let (base, ext) = name.split_once('.').unwrap_or((name, ""));
    let ext = ext.split('.').next().unwrap_or("");
    let ascii = |ch: char| if ch.is_ascii() { ch as u8 } else { b'?' };
    for (slot, ch) in packed[..8].iter_mut().zip(base.chars()) {
        *slot = ascii(ch);
    }
    for (slot, ch) in packed[8..].iter_mut().zip(ext.chars()) {
        *slot = ascii(ch);
    }
    packed
}
