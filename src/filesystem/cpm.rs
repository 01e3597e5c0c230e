/// CP/M directory reader for flat images

use super::builder::CpmImageConfig;
use super::datestamper::{self, DateStamperTable};
use super::{DirEntry, FileAttributes};
use crate::error::{DiskError, Result};
use crate::format::constants::{CPM_DIR_ENTRY_SIZE, CPM_ERASED_BYTE, CPM_RECORD_SIZE};
use log::{debug, trace};

/// CP/M directory entry (32 bytes)
#[derive(Debug, Clone)]
struct CpmDirEntry {
    index: usize,
    user: u8,
    filename: [u8; 8],
    extension: [u8; 3],
    extent_low: u8,
    extent_high: u8,
    record_count: u8,
    allocation: [u8; 16],
}

impl CpmDirEntry {
    /// Parse a directory entry from 32 bytes
    fn parse(index: usize, data: &[u8]) -> Option<Self> {
        if data.len() < CPM_DIR_ENTRY_SIZE {
            return None;
        }

        // Erased entries, labels and time entries are not files
        let user = data[0];
        if user == CPM_ERASED_BYTE || user > 0x0F {
            return None;
        }

        let mut filename = [0u8; 8];
        let mut extension = [0u8; 3];
        let mut allocation = [0u8; 16];
        filename.copy_from_slice(&data[1..9]);
        extension.copy_from_slice(&data[9..12]);
        allocation.copy_from_slice(&data[16..32]);

        Some(Self {
            index,
            user,
            filename,
            extension,
            extent_low: data[12],
            extent_high: data[14],
            record_count: data[15],
            allocation,
        })
    }

    /// Name and extension with attribute bits stripped, as stored (no dot)
    fn raw_name(&self) -> [u8; 11] {
        let mut raw = [0u8; 11];
        for (dst, &src) in raw.iter_mut().zip(self.filename.iter().chain(self.extension.iter())) {
            *dst = src & 0x7F;
        }
        raw
    }

    /// Get the full filename as a string
    fn filename_str(&self) -> String {
        let raw = self.raw_name();
        let name = String::from_utf8_lossy(&raw[..8]).trim_end().to_string();
        let ext = String::from_utf8_lossy(&raw[8..]).trim_end().to_string();
        if ext.is_empty() {
            name
        } else {
            format!("{}.{}", name, ext)
        }
    }

    fn attributes(&self) -> FileAttributes {
        FileAttributes {
            read_only: self.extension[0] & 0x80 != 0,
            system: self.extension[1] & 0x80 != 0,
            archive: self.extension[2] & 0x80 != 0,
        }
    }

    fn extent_number(&self) -> usize {
        ((self.extent_high as usize & 0x3F) << 5) | (self.extent_low as usize & 0x1F)
    }

    /// Allocated block numbers, zero entries skipped
    fn blocks(&self, block_num_16bit: bool) -> Vec<usize> {
        if block_num_16bit {
            self.allocation
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as usize)
                .filter(|&block| block != 0)
                .collect()
        } else {
            self.allocation
                .iter()
                .map(|&block| block as usize)
                .filter(|&block| block != 0)
                .collect()
        }
    }
}

/// Parse the directory area into raw entries
fn parse_directory(image: &[u8], config: &CpmImageConfig) -> Result<Vec<CpmDirEntry>> {
    config.validate()?;
    let area = image
        .get(config.directory_start()..config.file_area_start())
        .ok_or_else(|| DiskError::geometry("image is smaller than its directory area"))?;
    Ok(area
        .chunks_exact(CPM_DIR_ENTRY_SIZE)
        .enumerate()
        .filter_map(|(idx, data)| CpmDirEntry::parse(idx, data))
        .collect())
}

/// Group entries by user and name, extents sorted by extent number
fn merge_extents(entries: &[CpmDirEntry]) -> Vec<Vec<&CpmDirEntry>> {
    let mut files: Vec<Vec<&CpmDirEntry>> = Vec::new();
    for entry in entries {
        let key = (entry.user, entry.raw_name());
        match files
            .iter_mut()
            .find(|extents| (extents[0].user, extents[0].raw_name()) == key)
        {
            Some(extents) => extents.push(entry),
            None => files.push(vec![entry]),
        }
    }
    for extents in files.iter_mut() {
        extents.sort_by_key(|e| e.extent_number());
    }
    files
}

fn read_blocks(image: &[u8], config: &CpmImageConfig, extents: &[&CpmDirEntry]) -> Vec<u8> {
    let mut data = Vec::new();
    for extent in extents {
        for block in extent.blocks(config.block_num_16bit) {
            let start = config.block_offset(block);
            match image.get(start..start + config.block_size) {
                Some(bytes) => data.extend_from_slice(bytes),
                None => debug!("Block {} lies outside the image", block),
            }
        }
    }
    data
}

/// Size from the position of the last extent and its record count
///
/// A record count of zero in an entry with blocks means the entry is full,
/// since a full 32K entry holds 256 records.
fn file_size(config: &CpmImageConfig, extents: &[&CpmDirEntry]) -> usize {
    let last = match extents.last() {
        Some(last) => last,
        None => return 0,
    };
    let entry_bytes = config.extent_blocks() * config.block_size;
    let tail = match last.record_count as usize * CPM_RECORD_SIZE {
        0 if !last.blocks(config.block_num_16bit).is_empty() => entry_bytes,
        bytes => bytes,
    };
    last.extent_number() * entry_bytes + tail
}

/// Read the directory of a flat CP/M image
///
/// Extents of one file are merged into a single entry. If the configuration
/// enables DateStamper and the timestamp file is present, file times are
/// taken from it.
pub fn read_directory(image: &[u8], config: &CpmImageConfig) -> Result<Vec<DirEntry>> {
    let entries = parse_directory(image, config)?;
    let files = merge_extents(&entries);

    let times = if config.date_stamper {
        files
            .iter()
            .find(|extents| {
                extents[0].user == 0
                    && extents[0].raw_name().as_slice() == datestamper::ENTRY_NAME.as_bytes()
            })
            .map(|extents| DateStamperTable::from_bytes(read_blocks(image, config, extents)))
    } else {
        None
    };

    let result: Vec<DirEntry> = files
        .iter()
        .map(|extents| {
            let first = extents[0];
            DirEntry {
                name: first.filename_str(),
                user: first.user,
                extents: extents.len(),
                size: file_size(config, extents),
                attributes: first.attributes(),
                times: times.as_ref().and_then(|table| table.times(first.index)),
            }
        })
        .collect();
    trace!("Directory holds {} files", result.len());
    Ok(result)
}

/// Read the contents of a file, rounded up to whole 128-byte records
pub fn read_file(image: &[u8], config: &CpmImageConfig, user: u8, name: &str) -> Result<Vec<u8>> {
    let entries = parse_directory(image, config)?;
    let files = merge_extents(&entries);
    let extents = files
        .iter()
        .find(|extents| extents[0].user == user && extents[0].filename_str() == name)
        .ok_or_else(|| DiskError::FileNotFound(name.to_string()))?;

    let mut data = read_blocks(image, config, extents);
    data.truncate(file_size(config, extents));
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::builder::CpmImageBuilder;
    use crate::filesystem::FileTimes;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_dir_entry() {
        let mut data = [0u8; 32];
        data[1..9].copy_from_slice(b"TESTFILE");
        data[9..12].copy_from_slice(b"TXT");
        data[9] |= 0x80;
        data[15] = 10;

        let entry = CpmDirEntry::parse(0, &data).unwrap();
        assert_eq!(entry.user, 0);
        assert_eq!(entry.filename_str(), "TESTFILE.TXT");
        assert_eq!(entry.record_count, 10);
        assert!(entry.attributes().read_only);
        assert!(!entry.attributes().system);
    }

    #[test]
    fn test_parse_deleted_entry() {
        let mut data = [0u8; 32];
        data[0] = CPM_ERASED_BYTE;
        assert!(CpmDirEntry::parse(0, &data).is_none());
        data[0] = 0x20;
        assert!(CpmDirEntry::parse(0, &data).is_none());
    }

    #[test]
    fn test_extent_number() {
        let mut data = [0u8; 32];
        data[12] = 0x03;
        data[14] = 0x02;
        assert_eq!(CpmDirEntry::parse(0, &data).unwrap().extent_number(), 67);
    }

    #[test]
    fn test_read_back_built_image() {
        let config = CpmImageConfig::new(2, 80, 5, 1024).with_system_tracks(2);
        let mut builder = CpmImageBuilder::new(config).unwrap();
        let big: Vec<u8> = (0..40_000u32).map(|n| n as u8).collect();
        builder.add_file(0, "BIG.BIN", &big[..], false, true, false).unwrap();
        builder.add_file(5, "NOTE.TXT", &b"hi"[..], false, false, false).unwrap();
        builder.add_file(0, "EMPTY", &b""[..], false, false, false).unwrap();
        let image = builder.emit();

        let dir = read_directory(&image, &config).unwrap();
        assert_eq!(dir.len(), 3);
        assert_eq!(dir[0].name, "BIG.BIN");
        assert_eq!(dir[0].extents, 3);
        assert_eq!(dir[0].size, 40_064);
        assert!(dir[0].attributes.system);
        assert_eq!(dir[1].name, "NOTE.TXT");
        assert_eq!(dir[1].user, 5);
        assert_eq!(dir[1].size, 128);
        assert_eq!(dir[2].size, 0);
        assert!(dir[2].times.is_none());

        let data = read_file(&image, &config, 0, "BIG.BIN").unwrap();
        assert_eq!(&data[..40_000], &big[..]);
        assert!(data[40_000..].iter().all(|&b| b == 0x1A));

        let note = read_file(&image, &config, 5, "NOTE.TXT").unwrap();
        assert_eq!(&note[..2], b"hi");
        assert!(matches!(
            read_file(&image, &config, 0, "NOTE.TXT"),
            Err(DiskError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_size_of_full_entries() {
        let config = CpmImageConfig::new(2, 80, 5, 1024)
            .with_system_tracks(2)
            .with_block_num_16bit(false);
        let mut builder = CpmImageBuilder::new(config).unwrap();
        let long: Vec<u8> = (0..70_000u32).map(|n| (n % 251) as u8).collect();
        builder.add_file(0, "LONG.BIN", &long[..], false, false, false).unwrap();
        builder.add_file(0, "EXACT.BIN", &vec![7u8; 65_536][..], false, false, false).unwrap();
        let image = builder.emit();

        let dir = read_directory(&image, &config).unwrap();
        assert_eq!(dir[0].extents, 3);
        assert_eq!(dir[0].size, 70_016);
        assert_eq!(dir[1].extents, 2);
        assert_eq!(dir[1].size, 65_536);

        let data = read_file(&image, &config, 0, "LONG.BIN").unwrap();
        assert_eq!(data.len(), 70_016);
        assert_eq!(&data[..70_000], &long[..]);
        assert_eq!(read_file(&image, &config, 0, "EXACT.BIN").unwrap(), vec![7u8; 65_536]);
    }

    #[test]
    fn test_read_date_stamper_times() {
        let config = CpmImageConfig::new(2, 80, 5, 1024)
            .with_system_tracks(2)
            .with_date_stamper(true);
        let mut builder = CpmImageBuilder::new(config).unwrap();
        let modified = NaiveDate::from_ymd_opt(1991, 7, 1).and_then(|d| d.and_hms_opt(8, 15, 0));
        let times = FileTimes {
            created: None,
            accessed: None,
            modified,
        };
        builder
            .add_file_with_times(0, "A.TXT", &b"x"[..], false, false, false, Some(&times))
            .unwrap();
        let image = builder.emit();

        let dir = read_directory(&image, &config).unwrap();
        assert_eq!(dir[0].name, datestamper::FILE_NAME);
        assert_eq!(dir[1].name, "A.TXT");
        assert_eq!(dir[1].times, Some(times));
    }

    #[test]
    fn test_image_too_small() {
        let config = CpmImageConfig::new(2, 80, 5, 1024);
        assert!(read_directory(&[0u8; 1024], &config).is_err());
    }
}
