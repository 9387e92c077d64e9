//! SCSI hard disk drive (block device)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::scsi::target::{DiskGeometry, ScsiTarget, ScsiTargetType};
use crate::scsi::{STATUS_CHECK_CONDITION, STATUS_GOOD, ScsiCmdResult};

pub const DISK_BLOCKSIZE: usize = 512;

/// Sectors per track assumed for images without explicit geometry
/// (MFM drives behind the XT interface are hardwired to this)
pub const DEFAULT_SECTORS: usize = 17;
pub const DEFAULT_HEADS: usize = 4;

pub struct ScsiTargetDisk {
    /// Disk contents
    disk: Vec<u8>,

    /// Path where the original image resides
    path: Option<PathBuf>,

    geometry: Option<DiskGeometry>,

    /// Check condition code
    cc_code: u8,

    /// Check condition ASC
    cc_asc: u16,
}

impl ScsiTargetDisk {
    /// Try to load a disk image, given the filename of the image.
    pub fn load_disk(filename: &Path) -> Result<Self> {
        if !filename.exists() {
            bail!("File not found: {}", filename.display());
        }

        let disk = std::fs::read(filename)
            .with_context(|| format!("Failed to open file {}", filename.display()))?;

        let mut s = Self::from_bytes(disk)
            .with_context(|| format!("Cannot load disk image {}", filename.display()))?;
        s.path = Some(filename.to_path_buf());
        Ok(s)
    }

    /// Creates a disk from an in-memory image
    pub fn from_bytes(disk: Vec<u8>) -> Result<Self> {
        if disk.is_empty() || disk.len() % DISK_BLOCKSIZE != 0 {
            bail!(
                "Image size {} is not a non-zero multiple of {}",
                disk.len(),
                DISK_BLOCKSIZE
            );
        }
        Ok(Self {
            disk,
            path: None,
            geometry: None,
            cc_code: 0,
            cc_asc: 0,
        })
    }

    /// Overrides the CHS geometry derived from the image size
    pub fn with_geometry(mut self, geometry: DiskGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn image_fn(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contents(&self) -> &[u8] {
        &self.disk
    }
}

impl ScsiTarget for ScsiTargetDisk {
    fn target_type(&self) -> ScsiTargetType {
        ScsiTargetType::Disk
    }

    fn req_sense(&mut self) -> (u8, u16) {
        let r = (self.cc_code, self.cc_asc);
        self.cc_code = 0;
        self.cc_asc = 0;
        r
    }

    fn unit_ready(&mut self) -> Result<ScsiCmdResult> {
        Ok(ScsiCmdResult::Status(STATUS_GOOD))
    }

    fn inquiry(&mut self, _cmd: &[u8]) -> Result<ScsiCmdResult> {
        let mut result = vec![0; 36];

        // 0 Peripheral qualifier (5-7), peripheral device type (4-0)
        result[0] = 0; // Magnetic disk

        // SCSI version compliance
        result[2] = 0x02; // ANSI-2
        result[3] = 0x02; // ANSI-2

        // 4 Additional length (N-4), min. 32
        result[4] = result.len() as u8 - 4;

        // 8..16 Vendor identification
        result[8..(8 + 6)].copy_from_slice(b"WDSCSI");

        // 16..32 Product identification
        result[16..(16 + 11)].copy_from_slice(b"VIRTUAL HDD");

        // 32..36 Revision
        result[32..35].copy_from_slice(b"1.0");

        Ok(ScsiCmdResult::DataIn(result))
    }

    fn blocksize(&self) -> Option<usize> {
        Some(DISK_BLOCKSIZE)
    }

    fn blocks(&self) -> Option<usize> {
        Some(self.disk.len() / DISK_BLOCKSIZE)
    }

    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8> {
        self.disk[(block_offset * DISK_BLOCKSIZE)..((block_offset + block_count) * DISK_BLOCKSIZE)]
            .to_vec()
    }

    fn write(&mut self, block_offset: usize, data: &[u8]) {
        let offset = block_offset * DISK_BLOCKSIZE;
        let len = data.len().min(self.disk.len().saturating_sub(offset));
        self.disk[offset..(offset + len)].copy_from_slice(&data[..len]);
    }

    fn geometry(&self) -> Option<DiskGeometry> {
        if let Some(g) = self.geometry {
            return Some(g);
        }
        let blocks = self.disk.len() / DISK_BLOCKSIZE;
        Some(DiskGeometry {
            cyls: (blocks / (DEFAULT_SECTORS * DEFAULT_HEADS)).max(1),
            heads: DEFAULT_HEADS,
            sectors: DEFAULT_SECTORS,
        })
    }

    fn specific_cmd(&mut self, cmd: &[u8], _outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        log::error!("Unknown command {:02X}", cmd[0]);
        // ILLEGAL REQUEST, invalid command operation code
        self.cc_code = 0x05;
        self.cc_asc = 0x2000;
        Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(blocks: usize) -> ScsiTargetDisk {
        let img = (0..blocks * DISK_BLOCKSIZE)
            .map(|i| (i / DISK_BLOCKSIZE) as u8)
            .collect();
        ScsiTargetDisk::from_bytes(img).unwrap()
    }

    #[test]
    fn rejects_odd_size() {
        assert!(ScsiTargetDisk::from_bytes(vec![0; 100]).is_err());
        assert!(ScsiTargetDisk::from_bytes(vec![]).is_err());
    }

    #[test]
    fn read6() {
        let mut d = disk(8);
        let Ok(ScsiCmdResult::DataIn(data)) = d.cmd(&[0x08, 0, 0, 3, 2, 0], None) else {
            panic!("expected data in");
        };
        assert_eq!(data.len(), 2 * DISK_BLOCKSIZE);
        assert_eq!(data[0], 3);
        assert_eq!(data[DISK_BLOCKSIZE], 4);
    }

    #[test]
    fn read_beyond_disk() {
        let mut d = disk(8);
        assert!(matches!(
            d.cmd(&[0x08, 0, 0, 7, 2, 0], None),
            Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION))
        ));
    }

    #[test]
    fn write10() {
        let mut d = disk(8);
        let cmd = [0x2A, 0, 0, 0, 0, 5, 0, 0, 1, 0];
        assert!(matches!(
            d.cmd(&cmd, None),
            Ok(ScsiCmdResult::DataOut(DISK_BLOCKSIZE))
        ));
        assert!(matches!(
            d.cmd(&cmd, Some(&[0xAA; DISK_BLOCKSIZE][..])),
            Ok(ScsiCmdResult::Status(STATUS_GOOD))
        ));
        assert_eq!(d.contents()[5 * DISK_BLOCKSIZE], 0xAA);
        assert_eq!(d.contents()[6 * DISK_BLOCKSIZE], 6);
    }

    #[test]
    fn read_capacity() {
        let mut d = disk(8);
        let Ok(ScsiCmdResult::DataIn(data)) = d.cmd(&[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], None)
        else {
            panic!("expected data in");
        };
        assert_eq!(data, [0, 0, 0, 7, 0, 0, 2, 0]);
    }

    #[test]
    fn unknown_sets_sense() {
        let mut d = disk(1);
        assert!(matches!(
            d.cmd(&[0xC7, 0, 0, 0, 0, 0], None),
            Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION))
        ));
        assert_eq!(d.req_sense(), (0x05, 0x2000));
        assert_eq!(d.req_sense(), (0, 0));
    }

    #[test]
    fn default_geometry() {
        let d = disk(17 * 4 * 10);
        assert_eq!(
            d.geometry(),
            Some(DiskGeometry {
                cyls: 10,
                heads: 4,
                sectors: 17
            })
        );
    }
}
