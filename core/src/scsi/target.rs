//! SCSI target generic/shared code

use anyhow::Result;

use crate::scsi::{ScsiCmdResult, STATUS_CHECK_CONDITION, STATUS_GOOD};

#[derive(Debug, Clone, Copy, Eq, PartialEq, strum::Display)]
/// Enumeration of supported emulated SCSI target types (devices)
pub enum ScsiTargetType {
    Disk,
}

/// Physical drive geometry, as reported to XT-style CHS addressing
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DiskGeometry {
    pub cyls: usize,
    pub heads: usize,
    pub sectors: usize,
}

/// An abstraction of a generic SCSI target
pub trait ScsiTarget: Send {
    fn target_type(&self) -> ScsiTargetType;
    fn unit_ready(&mut self) -> Result<ScsiCmdResult>;
    fn inquiry(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult>;

    /// Request sense result (code, asc)
    fn req_sense(&mut self) -> (u8, u16);

    // For block devices
    fn blocksize(&self) -> Option<usize>;
    fn blocks(&self) -> Option<usize>;
    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8>;
    fn write(&mut self, block_offset: usize, data: &[u8]);

    /// CHS geometry, for targets that can sit behind the XT interface
    fn geometry(&self) -> Option<DiskGeometry> {
        None
    }

    /// Device-specific commands
    fn specific_cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult>;

    /// Returns the drives total capacity in bytes
    fn capacity(&self) -> Option<usize> {
        Some(self.blocksize()? * self.blocks()?)
    }

    fn cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        match cmd[0] {
            0x00 => {
                // TEST UNIT READY
                self.unit_ready()
            }
            0x03 => {
                // REQUEST SENSE
                let (key, asc) = self.req_sense();
                let mut result = vec![0; 14];
                result[0] = 0x70;
                result[2] = key & 0x0F;
                result[7] = 6;
                result[12..14].copy_from_slice(&asc.to_be_bytes());
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x04 => {
                // FORMAT UNIT(6)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x08 | 0x0A => {
                // READ(6) / WRITE(6)
                let blocknum = (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                let blockcnt = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                self.block_transfer(cmd[0] == 0x0A, blocknum, blockcnt, outdata)
            }
            0x12 => {
                // INQUIRY
                self.inquiry(cmd)
            }
            0x25 => {
                // READ CAPACITY(10)
                let mut result = vec![0; 8];
                let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
                    log::warn!("READ CAPACITY(10) command to non-block device");
                    return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
                };

                result[0..4].copy_from_slice(&((blocks as u32).saturating_sub(1)).to_be_bytes());
                result[4..8].copy_from_slice(&(blocksize as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x28 | 0x2A => {
                // READ(10) / WRITE(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                self.block_transfer(cmd[0] == 0x2A, blocknum, blockcnt, outdata)
            }
            0x2F => {
                // VERIFY(10)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            _ => self.specific_cmd(cmd, outdata),
        }
    }

    /// Shared READ/WRITE handling.
    ///
    /// A write without data asks for the data out phase; the command is then
    /// run again with the collected data.
    fn block_transfer(
        &mut self,
        write: bool,
        blocknum: usize,
        blockcnt: usize,
        outdata: Option<&[u8]>,
    ) -> Result<ScsiCmdResult> {
        let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
            log::warn!("Block transfer to non-block device");
            return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        };
        if blocknum + blockcnt > blocks {
            log::error!(
                "{} beyond disk: {} + {} > {}",
                if write { "Writing" } else { "Reading" },
                blocknum,
                blockcnt,
                blocks
            );
            return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        }

        if !write {
            return Ok(ScsiCmdResult::DataIn(self.read(blocknum, blockcnt)));
        }
        match outdata {
            Some(data) => {
                self.write(blocknum, data);
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            None => Ok(ScsiCmdResult::DataOut(blockcnt * blocksize)),
        }
    }
}
