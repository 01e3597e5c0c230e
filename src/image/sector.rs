/// Sector data structures

use crate::format::constants::{size_code_for, size_code_to_bytes};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory disk image shared by a backend and the sectors read from it
pub type SharedImage = Arc<RwLock<Vec<u8>>>;

/// Sector ID (CHRN) - addressing information for a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorId {
    /// C - Cylinder number as recorded in the ID field
    pub cylinder: u8,
    /// H - Head number as recorded in the ID field
    pub head: u8,
    /// R - Sector number
    pub sector: u8,
    /// N - Size code (0=128, 1=256, 2=512, 3=1024, ...), `None` if unknown
    pub size_code: Option<u8>,
}

impl SectorId {
    /// Create a new sector ID
    pub fn new(cylinder: u8, head: u8, sector: u8, size_code: Option<u8>) -> Self {
        Self {
            cylinder,
            head,
            sector,
            size_code,
        }
    }

    /// Get the advertised sector size in bytes based on size code
    pub fn size_bytes(&self) -> Option<usize> {
        self.size_code.and_then(size_code_to_bytes)
    }

    /// Compare against a requested ID; a `None` size code matches any size
    #[inline]
    pub fn matches(&self, cylinder: u8, head: u8, sector: u8, size_code: Option<u8>) -> bool {
        self.cylinder == cylinder
            && self.head == head
            && self.sector == sector
            && size_code.map_or(true, |code| self.size_code == Some(code))
    }

    /// Compare against another ID including the size code
    pub fn matches_id(&self, other: &SectorId) -> bool {
        self.matches(other.cylinder, other.head, other.sector, other.size_code)
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C={} H={} R={}", self.cylinder, self.head, self.sector)?;
        match self.size_code {
            Some(code) => write!(f, " N={}", code),
            None => write!(f, " N=?"),
        }
    }
}

/// Storage of sector bytes
///
/// A shared window aliases the in-memory image of its disk, so it sees
/// later writes to the image. It is replaced by an owned copy before the
/// sector itself is modified.
#[derive(Clone)]
pub enum SectorBytes {
    /// Window into a disk image buffer
    Shared {
        /// The image buffer
        image: SharedImage,
        /// Offset of the window
        offset: usize,
        /// Declared length of the window
        len: usize,
    },
    /// Buffer owned by the sector
    Owned(Vec<u8>),
}

impl SectorBytes {
    /// Run `f` on the bytes actually backed by storage (may be shorter
    /// than the declared length)
    fn with_available<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            SectorBytes::Shared { image, offset, len } => {
                let image = image.read().unwrap_or_else(PoisonError::into_inner);
                let start = (*offset).min(image.len());
                let end = offset.saturating_add(*len).min(image.len());
                f(&image[start..end])
            }
            SectorBytes::Owned(buf) => f(buf),
        }
    }
}

impl fmt::Debug for SectorBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectorBytes::Shared { offset, len, .. } => f
                .debug_struct("Shared")
                .field("offset", offset)
                .field("len", len)
                .finish(),
            SectorBytes::Owned(buf) => f.debug_tuple("Owned").field(&buf.len()).finish(),
        }
    }
}

/// A logical sector with its data and status flags
#[derive(Debug, Clone)]
pub struct SectorData {
    id: SectorId,
    index_on_track: usize,
    bytes: SectorBytes,
    data_len: usize,
    /// Deleted data address mark
    pub deleted: bool,
    /// Read error (I/O fault or CRC error)
    pub error: bool,
    /// ID was fabricated because the real ID header could not be read
    pub bogus_id: bool,
    /// Byte offset in the backing file, if the sector was read from one
    pub file_position: Option<u64>,
    /// Number of bytes the sector occupies in the backing file
    pub file_portion_len: usize,
}

impl SectorData {
    /// Create a sector owning its data
    ///
    /// If `size_code` is `None` and data is present, the size code is derived
    /// from the data length.
    pub fn new(index_on_track: usize, id: SectorId, data: Vec<u8>) -> Self {
        let data_len = data.len();
        Self::build(index_on_track, id, SectorBytes::Owned(data), data_len)
    }

    /// Create a sector aliasing `len` bytes at `offset` of a shared image
    pub fn shared(
        index_on_track: usize,
        id: SectorId,
        image: SharedImage,
        offset: usize,
        len: usize,
    ) -> Self {
        Self::build(
            index_on_track,
            id,
            SectorBytes::Shared { image, offset, len },
            len,
        )
    }

    fn build(index_on_track: usize, mut id: SectorId, bytes: SectorBytes, data_len: usize) -> Self {
        if id.size_code.is_none() && data_len > 0 {
            id.size_code = size_code_for(data_len);
        }
        Self {
            id,
            index_on_track,
            bytes,
            data_len,
            deleted: false,
            error: false,
            bogus_id: false,
            file_position: None,
            file_portion_len: 0,
        }
    }

    /// Set the deleted flag (builder style)
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Set the error flag (builder style)
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Sector identity
    #[inline]
    pub fn id(&self) -> &SectorId {
        &self.id
    }

    /// Cylinder number from the ID field
    #[inline]
    pub fn cylinder(&self) -> u8 {
        self.id.cylinder
    }

    /// Head number from the ID field
    #[inline]
    pub fn head(&self) -> u8 {
        self.id.head
    }

    /// Sector number from the ID field
    #[inline]
    pub fn sector(&self) -> u8 {
        self.id.sector
    }

    /// Size code from the ID field
    #[inline]
    pub fn size_code(&self) -> Option<u8> {
        self.id.size_code
    }

    /// Physical slot within the track
    #[inline]
    pub fn index_on_track(&self) -> usize {
        self.index_on_track
    }

    /// Declared data length
    #[inline]
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Whether the sector carries no data
    pub fn is_empty(&self) -> bool {
        self.data_len == 0
    }

    /// Whether the data still aliases the disk image
    pub fn is_shared(&self) -> bool {
        matches!(self.bytes, SectorBytes::Shared { .. })
    }

    /// Rewrite the sector identity (used by reformatting and repair)
    pub fn set_sector_id(&mut self, cylinder: u8, head: u8, sector: u8) {
        self.id.cylinder = cylinder;
        self.id.head = head;
        self.id.sector = sector;
    }

    /// Get one data byte; bytes past the stored data but inside the
    /// declared length read as zero
    pub fn data_byte(&self, idx: usize) -> Option<u8> {
        if idx >= self.data_len {
            return None;
        }
        Some(self.bytes.with_available(|src| src.get(idx).copied().unwrap_or(0)))
    }

    /// The sector data, zero-filled to the declared length
    pub fn data(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.data_len];
        self.read_into(&mut buf);
        buf
    }

    /// Copy the sector data into `dst`, zero-filling the remainder of the
    /// declared length; returns the number of bytes written
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let n = self.data_len.min(dst.len());
        let copied = self.bytes.with_available(|src| {
            let copied = src.len().min(n);
            dst[..copied].copy_from_slice(&src[..copied]);
            copied
        });
        dst[copied..n].fill(0);
        n
    }

    /// Replace the sector data
    ///
    /// A shared window or a buffer of different length is replaced by a new
    /// owned buffer before the bytes are copied.
    pub fn set_data(&mut self, deleted: bool, data: &[u8]) {
        self.deleted = deleted;
        match &mut self.bytes {
            SectorBytes::Owned(buf) if buf.len() == data.len() => buf.copy_from_slice(data),
            _ => self.bytes = SectorBytes::Owned(data.to_vec()),
        }
        self.data_len = data.len();
    }

    /// Write the sector data to `out`, at most `max_len` bytes if given;
    /// missing bytes are written as zero. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, out: &mut W, max_len: Option<usize>) -> io::Result<usize> {
        let limit = max_len.map_or(self.data_len, |max| max.min(self.data_len));
        let n = self.bytes.with_available(|src| {
            let n = src.len().min(limit);
            out.write_all(&src[..n]).map(|()| n)
        })?;
        if n < limit {
            out.write_all(&vec![0u8; limit - n])?;
        }
        Ok(limit)
    }
}

impl fmt::Display for SectorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes", self.id, self.data_len)?;
        if self.deleted {
            write!(f, ", deleted")?;
        }
        if self.error {
            write!(f, ", error")?;
        }
        if self.bogus_id {
            write!(f, ", bogus ID")?;
        }
        write!(f, ")")
    }
}
