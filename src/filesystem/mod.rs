/// CP/M filesystem support

pub mod builder;
pub mod cpm;
pub mod datestamper;

pub use builder::{pack_name, CpmImageBuilder, CpmImageConfig};
pub use cpm::{read_directory, read_file};
pub use datestamper::DateStamperTable;

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::Metadata;
use std::time::SystemTime;

/// File attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// Read-only flag
    pub read_only: bool,
    /// System file flag
    pub system: bool,
    /// Archive flag
    pub archive: bool,
}

/// Creation, access and modification times of a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTimes {
    /// Creation time
    pub created: Option<NaiveDateTime>,
    /// Last access time
    pub accessed: Option<NaiveDateTime>,
    /// Last modification time
    pub modified: Option<NaiveDateTime>,
}

impl FileTimes {
    /// Take the times of a host file, in local time
    ///
    /// Times the host platform does not record are left empty.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        fn local(time: std::io::Result<SystemTime>) -> Option<NaiveDateTime> {
            time.ok().map(|t| DateTime::<Local>::from(t).naive_local())
        }
        Self {
            created: local(metadata.created()),
            accessed: local(metadata.accessed()),
            modified: local(metadata.modified()),
        }
    }
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Filename (8.3 format, e.g., "FILENAME.TXT")
    pub name: String,
    /// User number (0-15)
    pub user: u8,
    /// Number of directory entries the file uses
    pub extents: usize,
    /// File size in bytes, rounded up to whole records
    pub size: usize,
    /// File attributes
    pub attributes: FileAttributes,
    /// DateStamper times, if the volume carries them
    pub times: Option<FileTimes>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_times_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        let times = FileTimes::from_metadata(&file.as_file().metadata().unwrap());
        assert!(times.modified.is_some());
    }
}
