/// Flat image export

use crate::error::{DiskError, Result};
use crate::image::FloppyDisk;
use log::{debug, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a disk to a flat image file
///
/// Returns a warning text if sectors had to be exported with lost attributes.
pub fn write_file<P: AsRef<Path>>(disk: &FloppyDisk, path: P) -> Result<Option<String>> {
    let mut out = BufWriter::new(File::create(path)?);
    let warning = export(disk, &mut out)?;
    out.flush()?;
    Ok(warning)
}

/// Export a disk in cylinder, head, sector order
///
/// Sectors 1..N of every track are looked up by ID. A missing sector, a
/// sector larger than the disk's sector size or a track with a different
/// number of sectors aborts the export. Deleted sectors are written as
/// ordinary data and listed in the returned warning text.
pub fn export<W: Write>(disk: &FloppyDisk, writer: &mut W) -> Result<Option<String>> {
    let geometry = disk.geometry().snapshot();
    if !geometry.is_formatted() {
        return Err(DiskError::geometry("disk is not formatted"));
    }
    debug!(
        "Exporting flat image: {} sides, {} cylinders, {} x {} bytes",
        geometry.sides, geometry.cylinders, geometry.sectors_per_track, geometry.sector_size
    );

    let mut deleted = Vec::new();
    for cyl in 0..geometry.cylinders {
        for head in 0..geometry.sides {
            let count = disk.sectors_of_track(cyl, head);
            if count != geometry.sectors_per_track {
                return Err(DiskError::geometry(format!(
                    "side {}, cylinder {}: {} sectors instead of {}",
                    head + 1,
                    cyl,
                    count,
                    geometry.sectors_per_track
                )));
            }
            for num in 1..=geometry.sectors_per_track {
                let sector = u8::try_from(num)
                    .ok()
                    .and_then(|n| disk.sector_by_id(cyl, head, cyl as u8, head as u8, n, None))
                    .ok_or(DiskError::SectorNotFound {
                        cylinder: cyl as u8,
                        head: head as u8,
                        sector: num as u8,
                    })?;
                if sector.data_len() > geometry.sector_size {
                    return Err(DiskError::geometry(format!(
                        "side {}, cylinder {}: sector {} is too large",
                        head + 1,
                        cyl,
                        num
                    )));
                }
                if sector.deleted {
                    deleted.push(format!(
                        "side {}, cylinder {}: sector {} is marked as deleted",
                        head + 1,
                        cyl,
                        num
                    ));
                }
                let n = sector.write_to(writer, Some(geometry.sector_size))?;
                if n < geometry.sector_size {
                    writer.write_all(&vec![0u8; geometry.sector_size - n])?;
                }
            }
        }
    }

    if deleted.is_empty() {
        return Ok(None);
    }
    warn!("{} deleted sectors exported as normal sectors", deleted.len());
    deleted.push("Flat images cannot mark sectors as deleted; they were exported as normal sectors.".to_string());
    Ok(Some(deleted.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FloppyDiskFormat;
    use crate::image::{Backend, FlatImage, Geometry, SectorData, SectorId, TelediskTable};

    fn teledisk(tracks: &[(usize, usize, Vec<u8>)], spt: usize) -> FloppyDisk {
        let mut table = TelediskTable::new();
        let mut cylinders = 0;
        for (cyl, head, numbers) in tracks {
            let (cyl, head) = (*cyl, *head);
            cylinders = cylinders.max(cyl + 1);
            for &num in numbers.iter() {
                let track = table.track_mut(cyl, head);
                let idx = track.len();
                track.push(SectorData::new(
                    idx,
                    SectorId::new(cyl as u8, head as u8, num, Some(0)),
                    vec![num; 128],
                ));
            }
        }
        FloppyDisk::new(Backend::Teledisk(table), Geometry::new(1, cylinders, spt, 128), 0)
    }

    #[test]
    fn test_export_sorts_by_sector_number() {
        let disk = teledisk(&[(0, 0, vec![2, 1, 3]), (1, 0, vec![3, 2, 1])], 3);
        let mut out = Vec::new();
        assert!(export(&disk, &mut out).unwrap().is_none());
        assert_eq!(out.len(), 6 * 128);
        for (n, chunk) in out.chunks(128).enumerate() {
            assert!(chunk.iter().all(|&b| b as usize == n % 3 + 1));
        }
    }

    #[test]
    fn test_export_missing_sector() {
        let disk = teledisk(&[(0, 0, vec![1, 2, 4])], 3);
        assert!(matches!(
            export(&disk, &mut Vec::new()),
            Err(DiskError::SectorNotFound { sector: 3, .. })
        ));
    }

    #[test]
    fn test_export_sector_count_mismatch() {
        let disk = teledisk(&[(0, 0, vec![1, 2, 3]), (1, 0, vec![1, 2])], 3);
        assert!(matches!(export(&disk, &mut Vec::new()), Err(DiskError::InvalidGeometry(_))));
    }

    #[test]
    fn test_export_deleted_warning() {
        let mut table = TelediskTable::new();
        let track = table.track_mut(0, 0);
        track.push(SectorData::new(0, SectorId::new(0, 0, 1, Some(0)), vec![1; 128]).with_deleted(true));
        let disk = FloppyDisk::new(Backend::Teledisk(table), Geometry::new(1, 1, 1, 128), 0);
        let warning = export(&disk, &mut Vec::new()).unwrap().unwrap();
        assert!(warning.contains("sector 1 is marked as deleted"));
    }

    #[test]
    fn test_export_flat_identity() {
        let format = FloppyDiskFormat::new(2, 2, 3, 128).with_interleave(2);
        let data: Vec<u8> = (0..format.disk_size()).map(|n| (n / 128) as u8).collect();
        let disk = FloppyDisk::from_flat(FlatImage::from_bytes(data.clone()), &format);
        let mut out = Vec::new();
        export(&disk, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_export_unformatted() {
        let disk = FloppyDisk::new(Backend::Teledisk(TelediskTable::new()), Geometry::default(), 0);
        assert!(export(&disk, &mut Vec::new()).is_err());
    }
}
