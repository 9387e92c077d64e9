//! Legacy XT (DTC/Xebec style) hard disk interface of the A590/A2091
//!
//! The XT drive hangs off the same DMAC as the WD33C93 and uses the SCSI ID 7
//! slot for its storage. Four byte registers at 0xa1-0xa7 carry a 6-byte
//! command block, result bytes and a status/control pair.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use super::ControllerState;
use crate::scsi::Direction;
use crate::scsi::disk::DISK_BLOCKSIZE;
use crate::scsi::unit::ScsiUnit;
use crate::wd33c93::Wd33c93;

const XT_TRACE: bool = false;

/// Storage slot used by the XT drive
pub const XT_UNIT: usize = 7;

/// Sectors per track, hardwired on MFM drives
pub const XT_SECTORS: usize = 17;

/// Completion status byte: error
pub const XT_CSB_ERROR: u8 = 0x02;

/// Drives at least this large report the 40MB jumper setting
const XT_JUMPER_40M: usize = 41615 * 2 * 512;

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, strum::IntoStaticStr)]
pub enum XtCmd {
    TestReady = 0x00,
    Recalibrate = 0x01,
    Sense = 0x03,
    FormatDrive = 0x04,
    Verify = 0x05,
    FormatTrack = 0x06,
    FormatBad = 0x07,
    Read = 0x08,
    Write = 0x0a,
    Seek = 0x0b,
    /// Set drive parameters (DTC 5150X)
    DtcSetParam = 0x0c,
}

bitfield! {
    /// XT status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct XtStatus(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub ready: bool @ 0,
        /// Data flows from the controller to the host
        pub input: bool @ 1,
        /// Command phase
        pub command: bool @ 2,
        pub select: bool @ 3,
        /// Controller requests data
        pub request: bool @ 4,
        pub interrupt: bool @ 5,
    }
}

bitfield! {
    /// XT control register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct XtControl(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub dma_mode: bool @ 0,
        pub int_enable: bool @ 1,
    }
}

/// Saved XT state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XtSnapshot {
    pub cyls: usize,
    pub heads: usize,
    pub sectors: usize,
    pub status: u8,
    pub control: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XtController {
    cmd: [u8; 6],
    offset: usize,
    datalen: usize,
    status: XtStatus,
    control: XtControl,
    statusbyte: u8,
    pub(crate) irq: bool,

    pub(crate) cyls: usize,
    pub(crate) heads: usize,
    pub(crate) sectors: usize,
}

impl XtController {
    pub fn new() -> Self {
        Self {
            cmd: [0; 6],
            offset: 0,
            datalen: 0,
            status: XtStatus::default(),
            control: XtControl::default(),
            statusbyte: 0,
            irq: false,
            cyls: 0,
            heads: 0,
            sectors: XT_SECTORS,
        }
    }

    pub fn status(&self) -> XtStatus {
        self.status
    }

    /// A DMA transfer is set up and waiting for the DMAC
    pub fn wants_dma(&self) -> bool {
        self.status.input() || self.status.request()
    }

    fn set_status(&mut self, status: XtStatus) {
        self.status = status.with_select(true).with_ready(true);
    }

    fn default_geometry(&mut self, unit: &ScsiUnit) {
        if let Some(g) = unit.target().geometry() {
            self.cyls = g.cyls.min(1023);
            self.heads = g.heads.min(31);
        }
    }

    pub fn reset(&mut self, unit: &ScsiUnit) {
        self.control = XtControl::default();
        self.datalen = 0;
        self.status = XtStatus::default();
        self.default_geometry(unit);
        log::info!(
            "XT reset, C/H/S {}/{}/{}",
            self.cyls,
            self.heads,
            self.sectors
        );
    }

    /// Linear block address of the CHS address in the command block
    pub fn lba(&self) -> u32 {
        let cyl = u32::from(self.cmd[3]) | ((u32::from(self.cmd[2]) << 2) & 0x300);
        let head = u32::from(self.cmd[1] & 0x1f);
        let sector = u32::from(self.cmd[2] & 0x3f);
        let heads = self.heads as u32;
        let sectors = self.sectors as u32;
        cyl * heads * sectors + head * sectors + sector
    }

    pub(crate) fn command_done(&mut self, unit: &mut ScsiUnit) {
        match XtCmd::from_u8(self.cmd[0]) {
            Some(XtCmd::DtcSetParam) => {
                self.heads = usize::from(unit.get_buffer(2) & 0x1f);
                self.cyls =
                    (usize::from(unit.get_buffer(0) & 3) << 8) | usize::from(unit.get_buffer(1));
                self.sectors = XT_SECTORS;
                if self.heads == 0 || self.cyls == 0 {
                    self.default_geometry(unit);
                }
                log::info!("XT SETPARAM: cyls={} heads={}", self.cyls, self.heads);
            }
            Some(XtCmd::Write) => unit.execute(),
            _ => (),
        }

        self.set_status(XtStatus::default().with_interrupt(true));
        if self.control.int_enable() {
            self.irq = true;
        }
        self.datalen = 0;
        self.statusbyte = 0;
        if XT_TRACE {
            log::debug!("XT command {:02X} done", self.cmd[0]);
        }
    }

    fn wait_data(&mut self, len: usize) {
        self.set_status(XtStatus::default().with_request(true));
        self.offset = 0;
        self.datalen = len;
    }

    fn sense(&mut self, unit: &mut ScsiUnit) {
        self.datalen = 4;
        self.offset = 0;
        for i in 0..self.datalen {
            unit.put_buffer(i, 0);
        }
    }

    fn readwrite(&mut self, unit: &mut ScsiUnit, chip: &mut Wd33c93, write: bool) {
        let lba = self.lba();
        let blocks = if self.cmd[4] == 0 {
            256
        } else {
            usize::from(self.cmd[4])
        };
        self.offset = 0;
        self.datalen = blocks * DISK_BLOCKSIZE;

        if XT_TRACE {
            log::debug!(
                "XT {} block {}, {}",
                if write { "WRITE" } else { "READ" },
                lba,
                blocks
            );
        }

        unit.set_cdb(&[
            if write { 0x0a } else { 0x08 },
            (lba >> 16) as u8,
            (lba >> 8) as u8,
            lba as u8,
            blocks as u8,
            0,
        ]);
        unit.analyze();
        if write {
            unit.direction = Direction::ToTarget;
            self.set_status(XtStatus::default().with_request(true));
        } else {
            unit.direction = Direction::ToHost;
            self.set_status(XtStatus::default().with_input(true));
        }
        unit.start_transfer();
        chip.set_tc(unit.data_len() as u32);

        if !self.control.dma_mode() {
            self.command_done(unit);
        }
    }

    fn command(&mut self, unit: &mut ScsiUnit, chip: &mut Wd33c93) {
        match XtCmd::from_u8(self.cmd[0]) {
            Some(XtCmd::Read) => self.readwrite(unit, chip, false),
            Some(XtCmd::Write) => self.readwrite(unit, chip, true),
            Some(
                XtCmd::Seek
                | XtCmd::Verify
                | XtCmd::FormatBad
                | XtCmd::FormatTrack
                | XtCmd::TestReady
                | XtCmd::Recalibrate,
            ) => self.command_done(unit),
            Some(XtCmd::Sense) => self.sense(unit),
            Some(XtCmd::DtcSetParam) => self.wait_data(8),
            Some(XtCmd::FormatDrive) | None => {
                log::error!("XT unknown command {:02X}", self.cmd[0]);
                self.command_done(unit);
                self.status.set_input(true);
                self.offset = 0;
                self.datalen = 1;
                unit.put_buffer(0, XT_CSB_ERROR);
            }
        }
    }

    pub(crate) fn read_reg(&mut self, unit: &mut ScsiUnit, reg: u8) -> u8 {
        let v = match reg {
            0 => {
                if self.status.input() {
                    let v = unit.get_buffer(self.offset);
                    self.offset += 1;
                    if self.offset >= self.datalen {
                        self.command_done(unit);
                    }
                    v
                } else {
                    self.statusbyte
                }
            }
            1 => self.status.0,
            // 20MB: 0, 40MB: 2
            2 => {
                if unit.target().capacity().unwrap_or(0) >= XT_JUMPER_40M {
                    2
                } else {
                    0
                }
            }
            _ => 0xff,
        };
        if XT_TRACE {
            log::debug!("XT read {}: {:02X}", reg, v);
        }
        v
    }

    pub(crate) fn write_reg(&mut self, unit: &mut ScsiUnit, chip: &mut Wd33c93, reg: u8, val: u8) {
        if XT_TRACE {
            log::debug!("XT write {}: {:02X}", reg, val);
        }
        match reg {
            0 => {
                if !self.status.request() {
                    self.offset = 0;
                    self.set_status(XtStatus::default().with_command(true).with_request(true));
                }
                if self.status.command() {
                    if let Some(b) = self.cmd.get_mut(self.offset) {
                        *b = val;
                    }
                    self.offset += 1;
                    self.set_status(XtStatus::default().with_command(true).with_request(true));
                    if self.offset == self.cmd.len() {
                        self.command(unit, chip);
                    }
                } else {
                    unit.put_buffer(self.offset, val);
                    self.offset += 1;
                    if self.offset >= self.datalen {
                        self.command_done(unit);
                    }
                }
            }
            1 => self.reset(unit),
            2 => self.set_status(XtStatus::default().with_select(true)),
            _ => {
                self.control = XtControl(val);
                self.irq = false;
            }
        }
    }

    pub fn snapshot(&self) -> XtSnapshot {
        XtSnapshot {
            cyls: self.cyls,
            heads: self.heads,
            sectors: self.sectors,
            status: self.status.0,
            control: self.control.0,
        }
    }

    pub fn restore(&mut self, snap: &XtSnapshot) {
        self.cyls = snap.cyls;
        self.heads = snap.heads;
        self.sectors = snap.sectors;
        self.status = XtStatus(snap.status);
        self.control = XtControl(snap.control);
    }
}

impl ControllerState {
    /// XT register read, open bus without a drive
    pub(crate) fn read_xt_reg(&mut self, reg: u8) -> u8 {
        let Some(unit) = self.units[XT_UNIT].as_mut() else {
            return 0xff;
        };
        self.xt.read_reg(unit, reg)
    }

    pub(crate) fn write_xt_reg(&mut self, reg: u8, val: u8) {
        let Some(unit) = self.units[XT_UNIT].as_mut() else {
            return;
        };
        self.xt.write_reg(unit, &mut self.chip, reg, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::disk::ScsiTargetDisk;
    use crate::scsi::target::DiskGeometry;
    use crate::wd33c93::ChipRevision;

    const CYLS: usize = 20;
    const HEADS: usize = 4;

    fn setup() -> (XtController, ScsiUnit, Wd33c93) {
        let blocks = CYLS * HEADS * XT_SECTORS;
        let img = (0..blocks * DISK_BLOCKSIZE)
            .map(|i| (i / DISK_BLOCKSIZE) as u8)
            .collect();
        let disk = ScsiTargetDisk::from_bytes(img)
            .unwrap()
            .with_geometry(DiskGeometry {
                cyls: CYLS,
                heads: HEADS,
                sectors: XT_SECTORS,
            });
        let unit = ScsiUnit::new(XT_UNIT, Box::new(disk));
        let mut xt = XtController::new();
        xt.reset(&unit);
        (xt, unit, Wd33c93::new(ChipRevision::default()))
    }

    fn send_cmd(xt: &mut XtController, unit: &mut ScsiUnit, chip: &mut Wd33c93, cmd: &[u8; 6]) {
        for &b in cmd {
            xt.write_reg(unit, chip, 0, b);
        }
    }

    #[test]
    fn reset_geometry() {
        let (xt, _, _) = setup();
        assert_eq!(xt.cyls, CYLS);
        assert_eq!(xt.heads, HEADS);
        assert_eq!(xt.sectors, XT_SECTORS);
    }

    #[test]
    fn chs_to_lba() {
        let (mut xt, mut unit, mut chip) = setup();
        xt.write_reg(&mut unit, &mut chip, 3, XtControl::default().with_dma_mode(true).0);
        // head 2, sector 5, cylinder 10, 1 block
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x08, 2, 5, 10, 1, 0]);

        let expect = 10 * (HEADS * XT_SECTORS) + 2 * XT_SECTORS + 5;
        assert_eq!(xt.lba() as usize, expect);
        assert_eq!(&unit.cmd[..6], &[0x08, 0, (expect >> 8) as u8, expect as u8, 1, 0]);
        assert_eq!(unit.direction(), Direction::ToHost);
        assert_eq!(unit.data_len(), DISK_BLOCKSIZE);
        assert_eq!(unit.get_buffer(0), expect as u8);
        assert_eq!(chip.tc(), DISK_BLOCKSIZE as u32);
        assert!(xt.status().input());
        assert!(xt.wants_dma());
    }

    #[test]
    fn high_cylinder_bits() {
        let (mut xt, _, _) = setup();
        xt.cmd = [0x08, 0, 0xC0, 0x01, 1, 0];
        assert_eq!(xt.lba() as usize, 0x301 * HEADS * XT_SECTORS);
    }

    #[test]
    fn pio_completes_immediately() {
        let (mut xt, mut unit, mut chip) = setup();
        xt.write_reg(&mut unit, &mut chip, 3, XtControl::default().with_int_enable(true).0);
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x08, 0, 1, 0, 1, 0]);
        assert!(xt.status().interrupt());
        assert!(xt.status().ready());
        assert!(!xt.wants_dma());
        assert!(xt.irq);
        // Writing control acknowledges
        xt.write_reg(&mut unit, &mut chip, 3, 0);
        assert!(!xt.irq);
    }

    #[test]
    fn simple_commands() {
        let (mut xt, mut unit, mut chip) = setup();
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x00, 0, 0, 0, 0, 0]);
        assert_eq!(xt.read_reg(&mut unit, 1), 0x29);
        assert_eq!(xt.read_reg(&mut unit, 0), 0);
    }

    #[test]
    fn set_parameters() {
        let (mut xt, mut unit, mut chip) = setup();
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x0c, 0, 0, 0, 0, 0]);
        assert!(xt.status().request());
        assert!(!xt.status().command());
        for b in [0x01, 0x32, 0x06, 0, 0, 0, 0, 0] {
            xt.write_reg(&mut unit, &mut chip, 0, b);
        }
        assert_eq!(xt.cyls, 0x132);
        assert_eq!(xt.heads, 6);
        assert!(xt.status().interrupt());
    }

    #[test]
    fn set_parameters_zero_falls_back() {
        let (mut xt, mut unit, mut chip) = setup();
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x0c, 0, 0, 0, 0, 0]);
        for _ in 0..8 {
            xt.write_reg(&mut unit, &mut chip, 0, 0);
        }
        assert_eq!(xt.cyls, CYLS);
        assert_eq!(xt.heads, HEADS);
    }

    #[test]
    fn unknown_command() {
        let (mut xt, mut unit, mut chip) = setup();
        send_cmd(&mut xt, &mut unit, &mut chip, &[0x3f, 0, 0, 0, 0, 0]);
        assert!(xt.status().input());
        assert!(xt.status().interrupt());
        assert_eq!(xt.read_reg(&mut unit, 0), XT_CSB_ERROR);
        // Single byte, then done
        assert!(!xt.status().input());
    }

    #[test]
    fn jumper() {
        let (mut xt, mut unit, _) = setup();
        assert_eq!(xt.read_reg(&mut unit, 2), 0);
        assert_eq!(xt.read_reg(&mut unit, 3), 0xff);
    }

    #[test]
    fn select() {
        let (mut xt, mut unit, mut chip) = setup();
        xt.write_reg(&mut unit, &mut chip, 2, 0);
        assert_eq!(xt.status().0, 0x09);
    }
}
