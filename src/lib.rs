/*!
# floppymedia

Floppy disk media for retro-computer emulators: disk geometry, sector
interleave, flat and Teledisk images, and CP/M image building with
DateStamper file times.

## Features

- Flat images backed by a file, an in-memory buffer, a read-only resource
  or a block device
- Teledisk (`TD`) container decoding with optional repair of damaged tracks,
  and Teledisk export
- Logical sector interleave for flat images
- Floppy drive model with head seeking and odd-cylinder skipping
- CP/M image builder with 8-bit or 16-bit block numbers and DateStamper
- Idiomatic Rust API with comprehensive error handling

## Quick Start

```rust,no_run
use floppymedia::{CpmImageBuilder, CpmImageConfig, FloppyDisk, FloppyDiskFormat};

// Open a flat image with a known format
let format = FloppyDiskFormat::fmt_780k();
let disk = FloppyDisk::open("disk.img", Some(&format), false)?;

// Read a sector by its ID
if let Some(sector) = disk.sector_by_id(0, 0, 0, 0, 1, None) {
    println!("{} bytes", sector.data_len());
}

// Teledisk containers are detected automatically
let td = FloppyDisk::open("disk.td0", None, true)?;
println!("{}", td.format_text());

// Build a CP/M image
let mut builder = CpmImageBuilder::new(CpmImageConfig::from(&format))?;
builder.add_file(0, "README.TXT", &b"Hello"[..], false, false, false)?;
let image = builder.emit();
# Ok::<(), floppymedia::DiskError>(())
```

## Modules

- `format`: disk format descriptions, presets and constants
- `image`: disks, sectors, geometry, interleave and drives
- `io`: Teledisk and flat image import and export
- `filesystem`: CP/M image building and directory reading
- `owner`: notification and settings interfaces
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Error types and Result alias
pub mod error;
/// CP/M image building, directory reading and DateStamper
pub mod filesystem;
/// Disk format descriptions, presets and constants
pub mod format;
/// Disks, sectors, geometry, interleave and drives
pub mod image;
/// Reading and writing disk image containers
pub mod io;
/// Owner notifications and settings
pub mod owner;

// Re-export common types
pub use error::{DiskError, Result};
pub use filesystem::{
    CpmImageBuilder, CpmImageConfig, DateStamperTable, DirEntry, FileAttributes, FileTimes,
};
pub use format::{FloppyDiskFormat, ImageFileFormat};
pub use image::{
    Backend, FlatImage, FloppyDisk, FloppyDiskDrive, Geometry, Interleave, SectorData, SectorId,
    TelediskTable,
};
pub use io::TelediskOptions;
pub use owner::{DiskOwner, NullOwner, Settings};
