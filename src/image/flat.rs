/// Flat sector-major image backend

use super::geometry::{Geometry, GeometrySnapshot};
use super::sector::{SectorData, SectorId, SharedImage};
use super::DiskEvent;
use crate::error::Result;
use crate::format::size_code_for;
use crate::owner::{put_setting, Settings};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Byte stream with random access, e.g. a raw floppy device
pub trait RandomAccess: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> RandomAccess for T {}

/// Where the image bytes live
enum ImageStore {
    Memory(SharedImage),
    File(File),
    Device(Box<dyn RandomAccess>),
}

impl ImageStore {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ImageStore::Memory(image) => {
                let bytes = image.read().unwrap_or_else(PoisonError::into_inner);
                let start = usize::try_from(pos).unwrap_or(usize::MAX).min(bytes.len());
                let n = (bytes.len() - start).min(buf.len());
                buf[..n].copy_from_slice(&bytes[start..start + n]);
                Ok(n)
            }
            ImageStore::File(file) => {
                file.seek(SeekFrom::Start(pos))?;
                read_fully(file, buf)
            }
            ImageStore::Device(device) => {
                device.seek(SeekFrom::Start(pos))?;
                read_fully(device, buf)
            }
        }
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> io::Result<()> {
        match self {
            ImageStore::Memory(image) => {
                let start = usize::try_from(pos)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
                let mut bytes = image.write().unwrap_or_else(PoisonError::into_inner);
                let end = start + data.len();
                if end > bytes.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "write beyond end of image",
                    ));
                }
                bytes[start..end].copy_from_slice(data);
                Ok(())
            }
            ImageStore::File(file) => {
                file.seek(SeekFrom::Start(pos))?;
                file.write_all(data)
            }
            ImageStore::Device(device) => {
                device.seek(SeekFrom::Start(pos))?;
                device.write_all(data)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ImageStore::Memory(_) => Ok(()),
            ImageStore::File(file) => file.flush(),
            ImageStore::Device(device) => device.flush(),
        }
    }
}

/// Fill `buf` from `reader`, retrying short reads until the buffer is full
/// or the source is exhausted; returns the number of bytes read
fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(len)
}

/// Origin of the image, used for settings output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image file on disk
    File(PathBuf),
    /// Raw drive device
    Drive(String),
    /// Built-in or bundled image
    Resource(String),
    /// Anonymous in-memory image
    Memory,
}

/// Headerless image storing sectors in cylinder, head, sector order
pub struct FlatImage {
    store: ImageStore,
    source: ImageSource,
    read_only: bool,
    appendable: bool,
    size_code: Option<u8>,
    cache: Option<HashMap<(usize, usize, usize), SectorData>>,
}

impl std::fmt::Debug for FlatImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatImage")
            .field("source", &self.source)
            .field("read_only", &self.read_only)
            .field("appendable", &self.appendable)
            .finish()
    }
}

impl FlatImage {
    fn with_store(store: ImageStore, source: ImageSource, read_only: bool, appendable: bool) -> Self {
        let cache = match store {
            ImageStore::Memory(_) => None,
            _ => Some(HashMap::new()),
        };
        Self {
            store,
            source,
            read_only,
            appendable,
            size_code: None,
            cache,
        }
    }

    /// Writable in-memory image
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::with_store(
            ImageStore::Memory(Arc::new(RwLock::new(data))),
            ImageSource::Memory,
            false,
            false,
        )
    }

    /// Read-only in-memory image of a bundled resource
    pub fn resource<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
        Self::with_store(
            ImageStore::Memory(Arc::new(RwLock::new(data))),
            ImageSource::Resource(name.into()),
            true,
            false,
        )
    }

    /// Open an existing image file
    ///
    /// A writable image may also be formatted track by track.
    pub fn open_file<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
        debug!("Opened flat image {} (read-only: {})", path.display(), read_only);
        Ok(Self::with_store(
            ImageStore::File(file),
            ImageSource::File(path.to_path_buf()),
            read_only,
            !read_only,
        ))
    }

    /// Create an empty image file whose geometry grows while it is formatted
    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        debug!("Created flat image {}", path.display());
        Ok(Self::with_store(
            ImageStore::File(file),
            ImageSource::File(path.to_path_buf()),
            false,
            true,
        ))
    }

    /// Wrap a raw drive device
    pub fn device<S: Into<String>>(name: S, device: Box<dyn RandomAccess>, read_only: bool) -> Self {
        Self::with_store(ImageStore::Device(device), ImageSource::Drive(name.into()), read_only, false)
    }

    /// Origin of the image
    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Whether the image rejects writes
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether formatting may extend the image
    pub fn is_appendable(&self) -> bool {
        self.appendable
    }

    pub(crate) fn init_size_code(&mut self, sector_size: usize) {
        self.size_code = size_code_for(sector_size);
    }

    /// Drop cached sectors; their positions depend on the geometry
    pub(crate) fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    /// Byte offset of a sector
    ///
    /// While a new image is formatted from scratch the geometry is still
    /// incomplete; cylinder 0 is then addressed by head and index directly
    /// so that ascending formatting computes the right offsets.
    pub fn sector_position(snap: &GeometrySnapshot, cyl: usize, head: usize, idx: usize) -> Option<u64> {
        let head = head & 0x01;
        let size = snap.sector_size;
        let spt = snap.sectors_per_track;
        if head < snap.sides && idx < spt && size > 0 {
            let mut skip = snap.sides * spt * cyl;
            if head > 0 {
                skip += spt;
            }
            skip += idx;
            return Some(skip as u64 * size as u64);
        }
        if cyl == 0 && snap.cylinders <= 1 {
            if head == 0 && idx == 0 {
                return Some(0);
            }
            if size > 0 {
                if head == 0 {
                    return Some((idx * size) as u64);
                }
                if spt > 0 {
                    return Some(((spt + idx) * size) as u64);
                }
            }
        }
        None
    }

    fn cache_key(cyl: usize, head: usize, logical: usize) -> (usize, usize, usize) {
        (cyl, head, logical)
    }

    pub(crate) fn read_sector(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        logical: usize,
        slot: usize,
        events: &mut Vec<DiskEvent>,
    ) -> Option<SectorData> {
        let key = Self::cache_key(cyl, head, logical);
        if let Some(sector) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            return Some(sector.clone());
        }

        let snap = geometry.snapshot();
        let sector_size = snap.sector_size;
        let pos = Self::sector_position(&snap, cyl, head, logical)?;
        if sector_size == 0 {
            return None;
        }
        let id = SectorId::new(
            u8::try_from(cyl).ok()?,
            u8::try_from(head).ok()?,
            u8::try_from(logical + 1).ok()?,
            self.size_code,
        );

        let memory = match &self.store {
            ImageStore::Memory(image) => Some(Arc::clone(image)),
            _ => None,
        };
        let mut sector = match memory {
            Some(image) => {
                let offset = usize::try_from(pos).ok()?;
                let len = image.read().unwrap_or_else(PoisonError::into_inner).len();
                if offset >= len {
                    return None;
                }
                SectorData::shared(slot, id, image, offset, sector_size)
            }
            None => {
                let mut buf = vec![0u8; sector_size];
                match self.store.read_at(pos, &mut buf) {
                    Ok(0) => return None,
                    Ok(n) => {
                        if n < sector_size {
                            trace!("Short read at {}: {} of {} bytes", pos, n, sector_size);
                        }
                        SectorData::new(slot, id, buf)
                    }
                    Err(e) => {
                        let message = format!(
                            "Sector [C={},H={},R={}] cannot be read",
                            cyl,
                            head,
                            logical + 1
                        );
                        warn!("{}: {}", message, e);
                        events.push(DiskEvent::Error(message, Some(e)));
                        SectorData::new(slot, id, vec![0u8; sector_size]).with_error(true)
                    }
                }
            }
        };
        sector.file_position = Some(pos);
        sector.file_portion_len = sector_size;
        // Failed reads are retried on the next access
        if !sector.error {
            if let Some(cache) = self.cache.as_mut() {
                cache.insert(key, sector.clone());
            }
        }
        Some(sector)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_sector(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        logical: usize,
        sector: &mut SectorData,
        data: &[u8],
        deleted: bool,
        events: &mut Vec<DiskEvent>,
    ) -> bool {
        if self.read_only || deleted {
            return false;
        }
        let snap = geometry.snapshot();
        if data.len() != snap.sector_size {
            return false;
        }
        let pos = match Self::sector_position(&snap, cyl, head, logical) {
            Some(pos) => pos,
            None => return false,
        };
        if sector.file_position != Some(pos) {
            debug!(
                "Rejected stale sector handle {} (position {:?}, expected {})",
                sector.id(),
                sector.file_position,
                pos
            );
            return false;
        }

        match self.store.write_at(pos, data) {
            Ok(()) => {
                sector.set_data(deleted, data);
                if let Some(cache) = self.cache.as_mut() {
                    cache.insert(Self::cache_key(cyl, head, logical), sector.clone());
                }
                trace!("Wrote sector {} at {}", sector.id(), pos);
                true
            }
            Err(e) => {
                let message = format!(
                    "Sector [C={},H={},R={}] cannot be written",
                    cyl,
                    head,
                    sector.sector()
                );
                warn!("{}: {}", message, e);
                events.push(DiskEvent::Error(message, Some(e)));
                sector.error = true;
                false
            }
        }
    }

    /// Format a track of an appendable image by writing its sectors at the
    /// positions given by their sector numbers, growing the geometry as
    /// needed. Returns `None` if the image is not in append mode.
    pub(crate) fn append_track(
        &mut self,
        geometry: &Geometry,
        cyl: usize,
        head: usize,
        ids: &[SectorId],
        data: &[u8],
        events: &mut Vec<DiskEvent>,
    ) -> Option<bool> {
        let old_size = geometry.sector_size();
        if !self.appendable
            || matches!(self.store, ImageStore::Memory(_))
            || (old_size != 0 && old_size != data.len())
        {
            return None;
        }

        for id in ids {
            let idx = match (id.sector as usize).checked_sub(1) {
                Some(idx) => idx,
                None => return Some(false),
            };
            let pos = match Self::sector_position(&geometry.snapshot(), cyl, head, idx) {
                Some(pos) => pos,
                None => return Some(false),
            };
            if let Err(e) = self.store.write_at(pos, data) {
                let message = "Appending sectors failed".to_string();
                warn!("{}: {}", message, e);
                events.push(DiskEvent::Error(message, Some(e)));
                return Some(false);
            }

            let sides = if head & 0x01 != 0 { 2 } else { 1 };
            let mut changed = false;
            if sides > geometry.sides() {
                changed |= geometry.set_sides(sides);
            }
            if cyl >= geometry.cylinders() {
                changed |= geometry.set_cylinders(cyl + 1);
            }
            if ids.len() > geometry.sectors_per_track() {
                changed |= geometry.set_sectors_per_track(ids.len());
            }
            if geometry.sector_size() == 0 {
                changed |= geometry.set_sector_size(data.len());
                self.size_code = id.size_code.or_else(|| size_code_for(data.len()));
            }
            if changed {
                debug!("Image grew to {}", geometry.format_text());
                events.push(DiskEvent::FormatChanged);
                self.clear_cache();
            } else if let Some(cache) = self.cache.as_mut() {
                cache.remove(&Self::cache_key(cyl, head, idx));
            }
        }
        Some(true)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }

    pub(crate) fn put_settings_to(&self, settings: &mut Settings, prefix: &str) {
        match &self.source {
            ImageSource::File(path) => put_setting(settings, prefix, "file", path.display()),
            ImageSource::Drive(name) => put_setting(settings, prefix, "drive", name),
            ImageSource::Resource(name) => put_setting(settings, prefix, "resource", name),
            ImageSource::Memory => {}
        }
    }
}
