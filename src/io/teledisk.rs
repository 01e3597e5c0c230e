/// Teledisk container reader and writer
///
/// Only the plain container is handled. Files written with "advanced"
/// compression (lower-case `td` magic) are recognised and rejected.

use crate::error::{DiskError, Result};
use crate::format::constants::{size_code_for, TELEDISK_ADVANCED_SIGNATURE, TELEDISK_SIGNATURE, TELEDISK_VERSION};
use crate::image::{Backend, FloppyDisk, Geometry, SectorData, SectorId, TelediskTable};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use log::{debug, trace, warn};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

const CRC_POLYNOMIAL: u16 = 0xA097;
const FLAG_REMARK: u8 = 0x80;
const END_OF_TRACKS: u8 = 0xFF;
const MAX_SIZE_CODE: u8 = 5;
const MAX_REMARK_LEN: usize = 0x7E;

const CTRL_CRC_ERROR: u8 = 0x02;
const CTRL_DELETED: u8 = 0x04;
const CTRL_NO_DATA: u8 = 0x30;
const CTRL_NO_DATA_FIELD: u8 = 0x20;
const CTRL_BOGUS_ID: u8 = 0x40;

const ENCODING_RAW: u8 = 0;
const ENCODING_REPEAT: u8 = 1;
const ENCODING_SEGMENTS: u8 = 2;

const REPAIR_WARNING: &str =
    "Sectors that could not be read correctly when the Teledisk file was created have been repaired.";

/// Decode options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelediskOptions {
    /// Merge duplicate sector records and renumber a single bogus-ID sector
    pub auto_repair: bool,
}

impl TelediskOptions {
    /// Enable or disable auto-repair
    pub fn with_auto_repair(mut self, auto_repair: bool) -> Self {
        self.auto_repair = auto_repair;
        self
    }
}

/// Check for a Teledisk magic (plain or advanced compression)
pub fn is_teledisk_header(header: &[u8]) -> bool {
    header.starts_with(TELEDISK_SIGNATURE) || header.starts_with(TELEDISK_ADVANCED_SIGNATURE)
}

/// Teledisk CRC-16 (polynomial 0xA097, MSB first)
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |mut crc, &b| {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Read a Teledisk file
pub fn read_file<P: AsRef<Path>>(path: P, options: TelediskOptions) -> Result<FloppyDisk> {
    let path = path.as_ref();
    debug!("Reading Teledisk image {}", path.display());
    let file = File::open(path)?;
    decode(BufReader::new(file), options)
}

/// Decode a Teledisk container into a read-only disk
pub fn decode<R: Read>(reader: R, options: TelediskOptions) -> Result<FloppyDisk> {
    let decoded = Decoder::new(reader, options).run()?;
    let geometry = Geometry::new(
        decoded.sides,
        decoded.cylinders,
        decoded.sectors_per_track,
        decoded.sector_size,
    );
    if decoded.repaired {
        warn!("Teledisk image repaired while loading");
        geometry.set_repaired(true);
        geometry.set_warning_text(Some(REPAIR_WARNING.to_string()));
    }
    Ok(FloppyDisk::new(Backend::Teledisk(decoded.table), geometry, 0))
}

/// Byte source that turns end-of-stream into a decode error
struct Input<R> {
    inner: R,
}

impl<R: Read> Input<R> {
    fn try_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn byte(&mut self) -> Result<u8> {
        self.try_byte()?.ok_or(DiskError::UnexpectedEof)
    }

    fn word(&mut self) -> Result<u16> {
        let lo = self.byte()?;
        let hi = self.byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }
}

struct Decoded {
    table: TelediskTable,
    sides: usize,
    cylinders: usize,
    sectors_per_track: usize,
    sector_size: usize,
    repaired: bool,
}

struct Decoder<R> {
    input: Input<R>,
    options: TelediskOptions,
    table: TelediskTable,
    cylinders: usize,
    sectors_per_track: usize,
    sector_size: usize,
    repaired: bool,
}

/// Identity of one sector record while its track is being read
struct SectorHeader {
    cylinder: u8,
    head: u8,
    sector: u8,
    size_code: u8,
    control: u8,
}

impl SectorHeader {
    fn mismatch(&self) -> DiskError {
        DiskError::LengthMismatch {
            cylinder: self.cylinder,
            head: self.head,
            sector: self.sector,
        }
    }
}

impl<R: Read> Decoder<R> {
    fn new(reader: R, options: TelediskOptions) -> Self {
        Self {
            input: Input { inner: reader },
            options,
            table: TelediskTable::new(),
            cylinders: 0,
            sectors_per_track: 0,
            sector_size: 0,
            repaired: false,
        }
    }

    fn run(mut self) -> Result<Decoded> {
        let sides = self.read_header()?;
        while self.read_track()? {}
        debug!(
            "Teledisk geometry: {} sides, {} cylinders, {} sectors of up to {} bytes",
            sides, self.cylinders, self.sectors_per_track, self.sector_size
        );
        Ok(Decoded {
            table: self.table,
            sides,
            cylinders: self.cylinders,
            sectors_per_track: self.sectors_per_track,
            sector_size: self.sector_size,
            repaired: self.repaired,
        })
    }

    /// Parse the fixed header and the optional remark block; returns the side count
    fn read_header(&mut self) -> Result<usize> {
        let mut header = [0u8; 12];
        for slot in header.iter_mut().take(3) {
            *slot = self
                .input
                .try_byte()?
                .ok_or_else(|| DiskError::invalid_format("not a Teledisk file"))?;
        }
        if header.starts_with(TELEDISK_ADVANCED_SIGNATURE) {
            return Err(DiskError::unsupported("Teledisk advanced compression"));
        }
        if !header.starts_with(TELEDISK_SIGNATURE) {
            return Err(DiskError::invalid_format("not a Teledisk file"));
        }
        for slot in header.iter_mut().skip(3) {
            *slot = self.input.byte()?;
        }
        let version = header[4];
        if version != TELEDISK_VERSION {
            return Err(DiskError::unsupported(format!(
                "Teledisk format version {:02X}",
                version
            )));
        }
        let stored_crc = u16::from_le_bytes([header[10], header[11]]);
        if crc16(0, &header[..10]) != stored_crc {
            debug!("Teledisk header CRC mismatch (stored {:04X})", stored_crc);
        }
        trace!(
            "Teledisk header: data rate {:02X}, drive type {:02X}, stepping {:02X}",
            header[5],
            header[6],
            header[7]
        );

        if header[7] & FLAG_REMARK != 0 {
            self.read_remark()?;
        }
        Ok(if header[9] == 1 { 1 } else { 2 })
    }

    fn read_remark(&mut self) -> Result<()> {
        let _crc = self.input.word()?;
        let len = self.input.word()? as usize;
        let mut stamp = [0u8; 6];
        for b in stamp.iter_mut() {
            *b = self.input.byte()?;
        }
        let date = NaiveDate::from_ymd_opt(1900 + stamp[0] as i32, stamp[1] as u32 + 1, stamp[2] as u32)
            .and_then(|d| d.and_hms_opt(stamp[3] as u32, stamp[4] as u32, stamp[5] as u32));

        let mut text = String::with_capacity(len);
        let mut trim_at: Option<usize> = None;
        for _ in 0..len {
            let b = self.input.byte()?;
            if b == 0 {
                trim_at.get_or_insert(text.len());
                text.push('\n');
                continue;
            }
            trim_at = None;
            text.push(if (0x20..0x7F).contains(&b) { b as char } else { ' ' });
        }
        if let Some(at) = trim_at {
            text.truncate(at);
        }
        let text = text.trim();
        debug!("Teledisk remark: {:?}, date {:?}", text, date);
        self.table.set_remark((!text.is_empty()).then(|| text.to_string()));
        self.table.set_disk_date(date);
        Ok(())
    }

    /// Read one track record; returns false at the end of the track list
    fn read_track(&mut self) -> Result<bool> {
        let count = match self.input.try_byte()? {
            None | Some(END_OF_TRACKS) => return Ok(false),
            Some(n) => n as usize,
        };
        let (track, head) = match (self.input.try_byte()?, self.input.try_byte()?) {
            (Some(track), Some(head)) => (track, head & 0x01),
            _ => return Ok(false),
        };
        let _crc = self.input.try_byte()?;
        debug!("Track {} head {}: {} sectors", track, head, count);
        if count == 0 {
            return Ok(true);
        }

        let (cyl, head_idx) = (track as usize, head as usize);
        self.cylinders = self.cylinders.max(cyl + 1);
        if self.sectors_per_track == 0 {
            self.sectors_per_track = count;
        }

        let mut abnormal = false;
        let mut bogus: Vec<usize> = Vec::new();
        for _ in 0..count {
            let header = SectorHeader {
                cylinder: self.input.byte()?,
                head: self.input.byte()?,
                sector: self.input.byte()?,
                size_code: self.input.byte()?,
                control: self.input.byte()?,
            };
            let _crc = self.input.byte()?;
            let data = self.read_sector_data(&header)?;
            self.sector_size = self.sector_size.max(data.len());

            let is_bogus = header.control & CTRL_BOGUS_ID != 0;
            if !is_bogus && (header.cylinder != track || header.head != head) {
                abnormal = true;
            }
            trace!(
                "Sector C={} H={} R={} N={} control {:02X}",
                header.cylinder,
                header.head,
                header.sector,
                header.size_code,
                header.control
            );

            if self.options.auto_repair && self.merge_duplicate(cyl, head_idx, &header, &data) {
                continue;
            }
            let sectors = self.table.track_mut(cyl, head_idx);
            let idx = sectors.len();
            let id = SectorId::new(header.cylinder, header.head, header.sector, Some(header.size_code));
            let mut sector = SectorData::new(idx, id, data)
                .with_error(header.control & CTRL_CRC_ERROR != 0)
                .with_deleted(header.control & CTRL_DELETED != 0);
            sector.bogus_id = is_bogus;
            sectors.push(sector);
            if is_bogus && !abnormal {
                bogus.push(idx);
            }
        }

        if self.options.auto_repair && !abnormal && bogus.len() == 1 {
            self.renumber_bogus(cyl, head_idx, track, head, count, bogus[0]);
        }
        Ok(true)
    }

    fn read_sector_data(&mut self, header: &SectorHeader) -> Result<Vec<u8>> {
        if header.size_code > MAX_SIZE_CODE {
            return Err(DiskError::unsupported(format!(
                "sector size code {:02X}",
                header.size_code
            )));
        }
        let mut buf = vec![0u8; 128 << header.size_code];
        if header.control & CTRL_NO_DATA != 0 {
            return Ok(buf);
        }
        let len = self.input.word()? as usize;
        if len == 0 {
            return Ok(buf);
        }
        let mut remaining = len - 1;
        let mut out = Output { buf: &mut buf, pos: 0 };
        match self.input.byte()? {
            ENCODING_RAW => {
                while remaining > 0 {
                    out.push(self.input.byte()?);
                    remaining -= 1;
                }
            }
            ENCODING_REPEAT => {
                if remaining < 4 {
                    return Err(header.mismatch());
                }
                let count = self.input.word()?;
                let pattern = [self.input.byte()?, self.input.byte()?];
                remaining -= 4;
                for _ in 0..count {
                    out.push_all(&pattern);
                }
            }
            ENCODING_SEGMENTS => {
                while remaining >= 2 {
                    let kind = self.input.byte()?;
                    let count = self.input.byte()? as usize;
                    remaining -= 2;
                    match kind {
                        0 => {
                            if count > remaining {
                                return Err(header.mismatch());
                            }
                            for _ in 0..count {
                                out.push(self.input.byte()?);
                            }
                            remaining -= count;
                        }
                        1 => {
                            if remaining < 2 {
                                return Err(header.mismatch());
                            }
                            let pattern = [self.input.byte()?, self.input.byte()?];
                            remaining -= 2;
                            for _ in 0..count {
                                out.push_all(&pattern);
                            }
                        }
                        other => {
                            return Err(DiskError::unsupported(format!(
                                "sector segment encoding {:02X}",
                                other
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(DiskError::unsupported(format!(
                    "sector encoding {:02X}",
                    other
                )))
            }
        }
        if remaining > 0 {
            return Err(header.mismatch());
        }
        Ok(buf)
    }

    /// Fold a repeated sector record into the copy already on the track
    ///
    /// Returns true if a sector with the same ID was present.
    fn merge_duplicate(&mut self, cyl: usize, head: usize, header: &SectorHeader, data: &[u8]) -> bool {
        let crc_error = header.control & CTRL_CRC_ERROR != 0;
        let mut deleted = header.control & CTRL_DELETED != 0;
        let mut found = false;
        for sector in self.table.track_mut(cyl, head).iter_mut() {
            if !sector
                .id()
                .matches(header.cylinder, header.head, header.sector, Some(header.size_code))
            {
                continue;
            }
            found = true;
            if sector.data() == data {
                if !crc_error {
                    sector.error = false;
                }
                if !deleted {
                    sector.deleted = false;
                }
            } else if sector.error && !crc_error {
                if deleted && !sector.deleted {
                    deleted = false;
                    self.repaired = true;
                }
                warn!("Replacing faulty copy of sector {}", sector.id());
                sector.set_data(deleted, data);
                sector.error = false;
            }
        }
        found
    }

    /// Give the one sector with an unreadable ID the number missing from the track
    fn renumber_bogus(&mut self, cyl: usize, head_idx: usize, track: u8, head: u8, count: usize, bogus: usize) {
        let sectors = self.table.track_mut(cyl, head_idx);
        if sectors.len() != count {
            return;
        }
        let numbers: BTreeSet<u8> = sectors
            .iter()
            .enumerate()
            .filter(|&(idx, _)| idx != bogus)
            .map(|(_, sector)| sector.sector())
            .collect();
        let (first, last) = match (numbers.first(), numbers.last()) {
            (Some(&first), Some(&last)) if numbers.len() + 1 == count => (first as usize, last as usize),
            _ => return,
        };
        let range = last - first + 1;
        let number = if range == count - 1 {
            match first {
                1 if last < u8::MAX as usize => Some(last as u8 + 1),
                2 => Some(1),
                _ => None,
            }
        } else if range == count {
            (first as u8 + 1..last as u8).find(|n| !numbers.contains(n))
        } else {
            None
        };
        if let Some(number) = number {
            warn!("Renumbering sector with unreadable ID on track {} head {} as {}", track, head, number);
            let sector = &mut sectors[bogus];
            sector.set_sector_id(track, head, number);
            sector.bogus_id = false;
            self.repaired = true;
        }
    }
}

/// Bounded writer into a sector buffer; excess bytes are dropped
struct Output<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Output<'_> {
    fn push(&mut self, b: u8) {
        if let Some(slot) = self.buf.get_mut(self.pos) {
            *slot = b;
            self.pos += 1;
        }
    }

    fn push_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }
}

/// Write a file as a Teledisk container
pub fn write_file<P: AsRef<Path>>(disk: &FloppyDisk, path: P, remark: Option<&str>) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    export(disk, &mut out, remark)?;
    out.flush()?;
    Ok(())
}

/// Export a disk as a plain Teledisk container
///
/// If `remark` is `None` the remark stored in the disk is used.
pub fn export<W: Write>(disk: &FloppyDisk, writer: &mut W, remark: Option<&str>) -> Result<()> {
    let geometry = disk.geometry().snapshot();
    if geometry.cylinders < 1 || geometry.sides < 1 {
        return Err(DiskError::invalid_format("disk has no content"));
    }
    let stored_remark = disk.remark();
    let remark = remark.or(stored_remark.as_deref());
    let remark_block = remark.and_then(|text| remark_bytes(text, disk.disk_date()));

    let disk_size = geometry.disk_size();
    let data_rate = if disk_size >= 1024 * 1024 { 2 } else { 0 };
    let mut drive_type = if disk_size >= 360 * 1024 { 2 } else { 1 };
    if geometry.cylinders >= 50 && geometry.sector_size == 512 {
        match geometry.sectors_per_track {
            8..=10 => drive_type = 3,
            n if n >= 17 => drive_type = 4,
            _ => {}
        }
    }

    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(TELEDISK_SIGNATURE);
    header.push(check_byte());
    header.push(TELEDISK_VERSION);
    header.push(data_rate);
    header.push(drive_type);
    header.push(if remark_block.is_some() { FLAG_REMARK } else { 0 });
    header.push(0);
    header.push(geometry.sides as u8);
    let crc = crc16(0, &header);
    header.extend_from_slice(&crc.to_le_bytes());
    writer.write_all(&header)?;

    if let Some(block) = &remark_block {
        let len = (block.len() - 6) as u16;
        let crc = crc16(crc16(0, &len.to_le_bytes()), block);
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(block)?;
    }

    let mut last = [0u8; 3];
    for cyl in 0..geometry.cylinders {
        for head in 0..geometry.sides {
            last[0] = cyl as u8;
            last[1] = head as u8;
            let sectors: Vec<SectorData> = (0..disk.sectors_of_track(cyl, head))
                .filter_map(|idx| disk.sector_by_index(cyl, head, idx))
                .collect();
            if sectors.is_empty() {
                continue;
            }
            let track_header = [sectors.len() as u8, cyl as u8, head as u8];
            last[2] = crc16(0, &track_header) as u8;
            writer.write_all(&track_header)?;
            writer.write_all(&[last[2]])?;
            for sector in &sectors {
                write_sector(writer, sector)?;
            }
        }
    }
    writer.write_all(&[END_OF_TRACKS, last[0], last[1], last[2]])?;
    Ok(())
}

fn write_sector<W: Write>(writer: &mut W, sector: &SectorData) -> Result<()> {
    let data = sector.data();
    let size_code = sector
        .size_code()
        .or_else(|| size_code_for(data.len()))
        .unwrap_or(0);
    let mut control = 0;
    if sector.error {
        control |= CTRL_CRC_ERROR;
    }
    if sector.deleted {
        control |= CTRL_DELETED;
    }
    if sector.bogus_id {
        control |= CTRL_BOGUS_ID;
    }
    if data.is_empty() {
        control |= CTRL_NO_DATA_FIELD;
    }
    let id = [sector.cylinder(), sector.head(), sector.sector(), size_code, control];
    writer.write_all(&id)?;

    if data.is_empty() {
        writer.write_all(&[crc16(0, &id) as u8])?;
        return Ok(());
    }
    writer.write_all(&[crc16(0, &data) as u8])?;

    let fill = data[0];
    if data.iter().all(|&b| b == fill) {
        let mut encoded = Vec::with_capacity(16);
        let mut remaining = data.len();
        while remaining > 5 {
            let n = (remaining / 2).min(255);
            encoded.extend_from_slice(&[1, n as u8, fill, fill]);
            remaining -= n * 2;
        }
        encoded.extend_from_slice(&[0, remaining as u8]);
        encoded.extend(std::iter::repeat(fill).take(remaining));
        writer.write_all(&((encoded.len() + 1) as u16).to_le_bytes())?;
        writer.write_all(&[ENCODING_SEGMENTS])?;
        writer.write_all(&encoded)?;
    } else {
        writer.write_all(&((data.len() + 1) as u16).to_le_bytes())?;
        writer.write_all(&[ENCODING_RAW])?;
        writer.write_all(&data)?;
    }
    Ok(())
}

/// Remark block without its length word: date stamp, text, NUL
fn remark_bytes(text: &str, date: Option<NaiveDateTime>) -> Option<Vec<u8>> {
    let date = date.unwrap_or_else(|| Local::now().naive_local());
    let mut block = vec![
        (date.year() - 1900).clamp(0, 255) as u8,
        date.month0() as u8,
        date.day() as u8,
        date.hour() as u8,
        date.minute() as u8,
        date.second() as u8,
    ];
    for ch in text.chars().take_while(|&ch| ch != '\0' && ch != '\x1A') {
        if block.len() >= MAX_REMARK_LEN {
            break;
        }
        block.push(match ch {
            '\n' => 0,
            ' '..='~' => ch as u8,
            _ => b'?',
        });
    }
    if block.len() > 6 {
        block.push(0);
        Some(block)
    } else {
        None
    }
}

/// Archive check byte; only needs to differ between archives
fn check_byte() -> u8 {
    Local::now().timestamp_subsec_nanos() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FloppyDiskFormat;
    use crate::image::FlatImage;

    fn header(sides: u8, flags: u8) -> Vec<u8> {
        let mut bytes = vec![b'T', b'D', 0, 0x42, TELEDISK_VERSION, 0, 2, flags, 0, sides];
        let crc = crc16(0, &bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn track(bytes: &mut Vec<u8>, count: u8, cyl: u8, head: u8) {
        bytes.extend_from_slice(&[count, cyl, head, 0]);
    }

    fn sector_header(bytes: &mut Vec<u8>, cyl: u8, head: u8, num: u8, size_code: u8, control: u8) {
        bytes.extend_from_slice(&[cyl, head, num, size_code, control, 0]);
    }

    fn raw_sector(bytes: &mut Vec<u8>, cyl: u8, head: u8, num: u8, control: u8, fill: u8) {
        sector_header(bytes, cyl, head, num, 0, control);
        bytes.extend_from_slice(&129u16.to_le_bytes());
        bytes.push(ENCODING_RAW);
        bytes.extend(std::iter::repeat(fill).take(128));
    }

    fn decode_bytes(bytes: &[u8]) -> Result<FloppyDisk> {
        decode(bytes, TelediskOptions::default())
    }

    #[test]
    fn test_crc16_reference() {
        assert_eq!(crc16(0, &[]), 0);
        let once = crc16(0, b"TD");
        assert_eq!(crc16(once, &[0]), crc16(0, b"TD\0"));
    }

    #[test]
    fn test_minimal_container() {
        let disk = decode_bytes(&header(0, 0)).unwrap();
        assert_eq!(disk.cylinders(), 0);
        assert_eq!(disk.sectors_of_track(0, 0), 0);
        assert!(disk.is_read_only());
        assert!(disk.remark().is_none());
        assert_eq!(disk.file_format_text(), "Teledisk image");
    }

    #[test]
    fn test_end_marker() {
        let mut bytes = header(1, 0);
        bytes.extend_from_slice(&[END_OF_TRACKS, 0, 0, 0]);
        let disk = decode_bytes(&bytes).unwrap();
        assert_eq!(disk.sides(), 1);
        assert_eq!(disk.cylinders(), 0);
    }

    #[test]
    fn test_repeat_encoding() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 1, 0);
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.push(ENCODING_REPEAT);
        bytes.extend_from_slice(&128u16.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0x55]);

        let disk = decode_bytes(&bytes).unwrap();
        let sector = disk.sector_by_index(0, 0, 0).unwrap();
        let data = sector.data();
        assert_eq!(data.len(), 256);
        assert!(data.chunks(2).all(|pair| pair == [0xAA, 0x55]));
        assert_eq!(disk.sector_size(), 256);
        assert_eq!(disk.sectors_per_track(), 1);
    }

    #[test]
    fn test_segment_encoding() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 0, 0);
        let segments = [0u8, 3, 1, 2, 3, 1, 62, 0xE5, 0xE6, 0, 1, 9];
        bytes.extend_from_slice(&(segments.len() as u16 + 1).to_le_bytes());
        bytes.push(ENCODING_SEGMENTS);
        bytes.extend_from_slice(&segments);

        let disk = decode_bytes(&bytes).unwrap();
        let data = disk.sector_by_index(0, 0, 0).unwrap().data();
        assert_eq!(&data[..5], &[1, 2, 3, 0xE5, 0xE6]);
        assert_eq!(data[126], 0xE6);
        assert_eq!(data[127], 9);
    }

    #[test]
    fn test_segment_overrun_is_length_mismatch() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 4, 0);
        sector_header(&mut bytes, 4, 0, 2, 0, 0);
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.push(ENCODING_SEGMENTS);
        bytes.extend_from_slice(&[0, 10, 1, 2]);
        assert!(matches!(
            decode_bytes(&bytes),
            Err(DiskError::LengthMismatch { cylinder: 4, head: 0, sector: 2 })
        ));
    }

    #[test]
    fn test_unknown_segment_type() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 0, 0);
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.push(ENCODING_SEGMENTS);
        bytes.extend_from_slice(&[7, 1]);
        assert!(matches!(decode_bytes(&bytes), Err(DiskError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_unknown_encoding() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 0, 0);
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(3);
        assert!(matches!(decode_bytes(&bytes), Err(DiskError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_bad_size_code() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 6, CTRL_NO_DATA);
        assert!(matches!(decode_bytes(&bytes), Err(DiskError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_no_data_sector() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 1, 0, 0);
        sector_header(&mut bytes, 0, 0, 1, 2, 0x10);
        let disk = decode_bytes(&bytes).unwrap();
        let sector = disk.sector_by_index(0, 0, 0).unwrap();
        assert_eq!(sector.data_len(), 512);
        assert!(sector.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_advanced_compression_and_version() {
        let mut advanced = header(1, 0);
        advanced[0] = b't';
        advanced[1] = b'd';
        assert!(matches!(decode_bytes(&advanced), Err(DiskError::UnsupportedFormat(_))));

        let mut version = header(1, 0);
        version[4] = 0x10;
        assert!(matches!(decode_bytes(&version), Err(DiskError::UnsupportedFormat(_))));

        assert!(matches!(decode_bytes(b"IMD 1.18"), Err(DiskError::InvalidFormat(_))));
        assert!(matches!(decode_bytes(b"TD"), Err(DiskError::InvalidFormat(_))));
    }

    #[test]
    fn test_unexpected_eof() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 2, 0, 0);
        raw_sector(&mut bytes, 0, 0, 1, 0, 0x11);
        sector_header(&mut bytes, 0, 0, 2, 0, 0);
        bytes.extend_from_slice(&129u16.to_le_bytes());
        bytes.push(ENCODING_RAW);
        bytes.extend_from_slice(&[0; 10]);
        assert!(matches!(decode_bytes(&bytes), Err(DiskError::UnexpectedEof)));

        assert!(matches!(decode_bytes(&header(1, 0)[..8]), Err(DiskError::UnexpectedEof)));
    }

    #[test]
    fn test_head_byte_masked() {
        let mut bytes = header(2, 0);
        track(&mut bytes, 1, 3, 0x81);
        raw_sector(&mut bytes, 3, 1, 1, 0, 0x33);
        let disk = decode_bytes(&bytes).unwrap();
        assert_eq!(disk.cylinders(), 4);
        assert_eq!(disk.sectors_of_track(3, 1), 1);
        assert_eq!(disk.sectors_of_track(3, 0), 0);
        assert!(disk.sector_by_id(3, 1, 3, 1, 1, Some(0)).is_some());
    }

    #[test]
    fn test_remark_and_date() {
        let mut bytes = header(1, FLAG_REMARK);
        let text = b"Boot disk\0side A\0\0";
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[89, 11, 24, 18, 30, 5]);
        bytes.extend_from_slice(text);

        let disk = decode_bytes(&bytes).unwrap();
        assert_eq!(disk.remark().as_deref(), Some("Boot disk\nside A"));
        let date = NaiveDate::from_ymd_opt(1989, 12, 24)
            .and_then(|d| d.and_hms_opt(18, 30, 5))
            .unwrap();
        assert_eq!(disk.disk_date(), Some(date));
    }

    #[test]
    fn test_duplicates_kept_without_repair() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 2, 0, 0);
        raw_sector(&mut bytes, 0, 0, 1, CTRL_CRC_ERROR, 0x00);
        raw_sector(&mut bytes, 0, 0, 1, 0, 0x77);
        let disk = decode_bytes(&bytes).unwrap();
        assert_eq!(disk.sectors_of_track(0, 0), 2);
        assert!(!disk.is_repaired());
    }

    #[test]
    fn test_auto_repair_replaces_faulty_copy() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 3, 0, 0);
        raw_sector(&mut bytes, 0, 0, 1, CTRL_CRC_ERROR, 0x00);
        raw_sector(&mut bytes, 0, 0, 2, 0, 0x22);
        raw_sector(&mut bytes, 0, 0, 1, 0, 0x77);
        let disk = decode(bytes.as_slice(), TelediskOptions::default().with_auto_repair(true)).unwrap();
        assert_eq!(disk.sectors_of_track(0, 0), 2);
        let sector = disk.sector_by_id(0, 0, 0, 0, 1, None).unwrap();
        assert!(!sector.error);
        assert!(sector.data().iter().all(|&b| b == 0x77));
    }

    #[test]
    fn test_auto_repair_renumbers_bogus_sector() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 4, 0, 0);
        raw_sector(&mut bytes, 0, 0, 1, 0, 1);
        raw_sector(&mut bytes, 0, 0, 2, 0, 2);
        raw_sector(&mut bytes, 0xFF, 0xFF, 0xFF, CTRL_BOGUS_ID, 3);
        raw_sector(&mut bytes, 0, 0, 4, 0, 4);
        let disk = decode(bytes.as_slice(), TelediskOptions { auto_repair: true }).unwrap();
        let sector = disk.sector_by_id(0, 0, 0, 0, 3, None).unwrap();
        assert_eq!(sector.index_on_track(), 2);
        assert!(!sector.bogus_id);
        assert_eq!(sector.data_byte(0), Some(3));
        assert!(disk.is_repaired());
        assert!(disk.warning_text().is_some());
    }

    #[test]
    fn test_auto_repair_missing_last_number() {
        let mut bytes = header(1, 0);
        track(&mut bytes, 3, 0, 0);
        raw_sector(&mut bytes, 0xFF, 0xFF, 0xFF, CTRL_BOGUS_ID, 3);
        raw_sector(&mut bytes, 0, 0, 1, 0, 1);
        raw_sector(&mut bytes, 0, 0, 2, 0, 2);
        let disk = decode(bytes.as_slice(), TelediskOptions { auto_repair: true }).unwrap();
        assert_eq!(disk.sector_by_id(0, 0, 0, 0, 3, None).unwrap().index_on_track(), 0);
    }

    #[test]
    fn test_is_teledisk_header() {
        assert!(is_teledisk_header(b"TD\0\x42"));
        assert!(is_teledisk_header(b"td\0"));
        assert!(!is_teledisk_header(b"TD"));
        assert!(!is_teledisk_header(b"MV - CPC"));
    }

    #[test]
    fn test_export_round_trip() {
        let format = FloppyDiskFormat::new(2, 3, 4, 256);
        let mut data = vec![0xE5u8; format.disk_size()];
        for (n, b) in data.iter_mut().enumerate().skip(256).take(256) {
            *b = n as u8;
        }
        let disk = FloppyDisk::from_flat(FlatImage::from_bytes(data), &format);

        let mut out = Vec::new();
        export(&disk, &mut out, Some("Exported\nby test")).unwrap();
        assert!(is_teledisk_header(&out));

        let copy = decode_bytes(&out).unwrap();
        assert_eq!(copy.sides(), 2);
        assert_eq!(copy.cylinders(), 3);
        assert_eq!(copy.sectors_per_track(), 4);
        assert_eq!(copy.sector_size(), 256);
        assert_eq!(copy.remark().as_deref(), Some("Exported\nby test"));
        assert!(copy.disk_date().is_some());
        for cyl in 0..3 {
            for head in 0..2 {
                for num in 1..=4u8 {
                    let a = disk.sector_by_id(cyl, head, cyl as u8, head as u8, num, None).unwrap();
                    let b = copy.sector_by_id(cyl, head, cyl as u8, head as u8, num, Some(1)).unwrap();
                    assert_eq!(a.data(), b.data());
                }
            }
        }
    }

    #[test]
    fn test_export_empty_disk_fails() {
        let disk = decode_bytes(&header(0, 0)).unwrap();
        assert!(export(&disk, &mut Vec::new(), None).is_err());
    }
}
