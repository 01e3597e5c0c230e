/// In-memory sector table decoded from a Teledisk container

use super::sector::SectorData;
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// Per-track sector lists keyed by (head, cylinder)
///
/// Tracks keep their sectors in arrival order, so the number of sectors may
/// differ from track to track.
#[derive(Debug, Default, Clone)]
pub struct TelediskTable {
    tracks: HashMap<(usize, usize), Vec<SectorData>>,
    remark: Option<String>,
    disk_date: Option<NaiveDateTime>,
}

impl TelediskTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Sectors of one track in arrival order
    pub fn track(&self, cylinder: usize, head: usize) -> &[SectorData] {
        self.tracks
            .get(&(head, cylinder))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn track_mut(&mut self, cylinder: usize, head: usize) -> &mut Vec<SectorData> {
        self.tracks.entry((head, cylinder)).or_default()
    }

    /// Iterate all tracks as ((cylinder, head), sectors)
    pub fn tracks(&self) -> impl Iterator<Item = ((usize, usize), &[SectorData])> {
        self.tracks
            .iter()
            .map(|(&(head, cyl), sectors)| ((cyl, head), sectors.as_slice()))
    }

    /// Sector at a physical slot
    pub fn sector(&self, cylinder: usize, head: usize, idx: usize) -> Option<&SectorData> {
        self.track(cylinder, head).get(idx)
    }

    /// Number of sectors on a track
    pub fn sectors_of_track(&self, cylinder: usize, head: usize) -> usize {
        self.track(cylinder, head).len()
    }

    /// Total number of sectors
    pub fn sector_count(&self) -> usize {
        self.tracks.values().map(Vec::len).sum()
    }

    /// Whether no sector was decoded
    pub fn is_empty(&self) -> bool {
        self.sector_count() == 0
    }

    /// Remark text stored in the container
    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    pub(crate) fn set_remark(&mut self, remark: Option<String>) {
        self.remark = remark;
    }

    /// Capture date stored with the remark
    pub fn disk_date(&self) -> Option<NaiveDateTime> {
        self.disk_date
    }

    pub(crate) fn set_disk_date(&mut self, date: Option<NaiveDateTime>) {
        self.disk_date = date;
    }

    /// Remark prefixed with the capture date, e.g. `1989-12-24 18:30:05: Boot disk`
    pub fn description(&self) -> Option<String> {
        match (self.disk_date, self.remark.as_deref()) {
            (Some(date), Some(remark)) => Some(format!("{}: {}", date.format("%Y-%m-%d %H:%M:%S"), remark)),
            (Some(date), None) => Some(date.format("%Y-%m-%d %H:%M:%S").to_string()),
            (None, Some(remark)) => Some(remark.to_string()),
            (None, None) => None,
        }
    }
}
