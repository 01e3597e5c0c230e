/// DateStamper timestamp codec and table
///
/// DateStamper keeps file times outside the CP/M directory, in a file named
/// `!!!TIME&.DAT`. The file holds one 16-byte slot per directory entry: three
/// 5-byte BCD stamps (created, accessed, modified) followed by one character
/// of the `!!!TIME\x92` signature. The last byte of every 128-byte record is a
/// checksum over the 127 bytes before it.

use super::FileTimes;
use crate::format::constants::{CPM_DIR_ENTRY_SIZE, CPM_RECORD_SIZE};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Directory entry name of the timestamp file (8.3 fields without the dot)
pub const ENTRY_NAME: &str = "!!!TIME&DAT";

/// File name of the timestamp file
pub const FILE_NAME: &str = "!!!TIME&.DAT";

/// Signature spread over the slots, one character per slot
pub const SIGNATURE: &[u8; 8] = b"!!!TIME\x92";

/// Bytes per encoded timestamp
pub const STAMP_LEN: usize = 5;

/// Bytes per directory entry slot
pub const SLOT_LEN: usize = 16;

const SIGNATURE_OFFSET: usize = 0x0F;

fn to_bcd(value: u32) -> u8 {
    ((((value / 10) % 10) << 4) | (value % 10)) as u8
}

fn from_bcd(b: u8) -> Option<u32> {
    let (hi, lo) = ((b >> 4) as u32, (b & 0x0F) as u32);
    (hi < 10 && lo < 10).then_some(hi * 10 + lo)
}

/// Encode a timestamp; absent or out-of-range times give five zero bytes
pub fn encode(time: Option<NaiveDateTime>) -> [u8; STAMP_LEN] {
    match time {
        Some(t) if (1978..2078).contains(&t.year()) => [
            to_bcd(t.year() as u32),
            to_bcd(t.month()),
            to_bcd(t.day()),
            to_bcd(t.hour()),
            to_bcd(t.minute()),
        ],
        _ => [0; STAMP_LEN],
    }
}

/// Decode a timestamp; impossible calendar values give `None`
pub fn decode(bytes: &[u8]) -> Option<NaiveDateTime> {
    let fields = bytes.get(..STAMP_LEN)?;
    let year = from_bcd(fields[0])?;
    let year = if year >= 78 { 1900 + year } else { 2000 + year };
    NaiveDate::from_ymd_opt(year as i32, from_bcd(fields[1])?, from_bcd(fields[2])?)?
        .and_hms_opt(from_bcd(fields[3])?, from_bcd(fields[4])?, 0)
}

/// Zero `buf` and write the signature characters into every slot
pub fn init_slots(buf: &mut [u8]) {
    buf.fill(0);
    let positions = (SIGNATURE_OFFSET..buf.len()).step_by(SLOT_LEN);
    for (pos, &ch) in positions.zip(SIGNATURE.iter().cycle()) {
        buf[pos] = ch;
    }
}

/// Store the checksum of every complete 128-byte record in its last byte
pub fn apply_checksums(buf: &mut [u8]) {
    for record in buf.chunks_exact_mut(CPM_RECORD_SIZE) {
        let (body, sum) = record.split_at_mut(CPM_RECORD_SIZE - 1);
        sum[0] = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    }
}

/// Timestamp table for a directory of a given size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateStamperTable {
    bytes: Vec<u8>,
    pos: usize,
}

impl DateStamperTable {
    /// Create an empty table with one slot per directory entry
    pub fn new(dir_entries: usize) -> Self {
        let mut bytes = vec![0u8; dir_entries * SLOT_LEN];
        init_slots(&mut bytes);
        Self { bytes, pos: 0 }
    }

    /// Table size matching a directory area of `dir_bytes` bytes
    pub fn for_directory(dir_bytes: usize) -> Self {
        Self::new(dir_bytes / CPM_DIR_ENTRY_SIZE)
    }

    /// Wrap the contents of an existing timestamp file
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.bytes.len() / SLOT_LEN
    }

    /// Whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the next slot to be filled
    pub fn position(&self) -> usize {
        self.pos / SLOT_LEN
    }

    /// Fill the next slot; returns false once the table is full
    pub fn add_times(&mut self, times: &FileTimes) -> bool {
        if self.pos + SLOT_LEN > self.bytes.len() {
            return false;
        }
        for (n, time) in [times.created, times.accessed, times.modified].into_iter().enumerate() {
            let at = self.pos + n * STAMP_LEN;
            self.bytes[at..at + STAMP_LEN].copy_from_slice(&encode(time));
        }
        self.pos += SLOT_LEN;
        true
    }

    /// Leave the next slot empty; returns false once the table is full
    pub fn skip_entry(&mut self) -> bool {
        if self.pos + SLOT_LEN > self.bytes.len() {
            return false;
        }
        self.pos += SLOT_LEN;
        true
    }

    /// Times stored in a slot
    pub fn times(&self, slot: usize) -> Option<FileTimes> {
        let start = slot.checked_mul(SLOT_LEN)?;
        let entry = self.bytes.get(start..start + SLOT_LEN)?;
        Some(FileTimes {
            created: decode(&entry[..STAMP_LEN]),
            accessed: decode(&entry[STAMP_LEN..2 * STAMP_LEN]),
            modified: decode(&entry[2 * STAMP_LEN..3 * STAMP_LEN]),
        })
    }

    /// Table bytes with checksums applied
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        apply_checksums(&mut bytes);
        bytes
    }
}
