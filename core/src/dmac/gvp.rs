//! GVP Series I (SRAM buffered) and Series II (bus master) DMA

use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use super::{DmaEngine, DmaState};
use crate::bus::{Address, DmaBus};
use crate::scsi::unit::ScsiUnit;
use crate::types::Field16;
use crate::wd33c93::Wd33c93;

const GVP_TRACE: bool = false;

/// Series I on-board buffer size
pub const GVP_S1_SRAM_SIZE: usize = 16384;
const GVP_S1_SRAM_MASK: usize = GVP_S1_SRAM_SIZE - 1;

/// Host product a Series II style DMAC is built into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum GvpHost {
    /// Impact Series II card
    SeriesII,
    /// A530 accelerator
    A530,
    /// G-Force 030 accelerator
    GForce030,
}

impl GvpHost {
    /// Product code returned in the odd bytes of the ROM area
    pub const fn version(self, has_rom: bool) -> u8 {
        match (self, has_rom) {
            (Self::SeriesII, _) => 0xf8,
            (Self::A530, false) => 0xc0,
            (Self::A530, true) => 0xd0,
            (Self::GForce030, false) => 0xa0,
            (Self::GForce030, true) => 0xb0,
        }
    }

    /// The accelerators can reach 32-bit fast RAM below 32MB
    pub const fn addr_mask(self) -> Address {
        match self {
            Self::SeriesII => 0x00ff_ffff,
            Self::A530 | Self::GForce030 => 0x01ff_ffff,
        }
    }
}

bitfield! {
    /// Series II control register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct GvpCntr(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Chip interrupt latched
        pub int_p: bool @ 1,
        pub inten: bool @ 3,
        /// DMA direction, set for memory -> target
        pub dir_out: bool @ 4,
    }
}

/// Series I: the chip moves data into or out of a 16KB SRAM, the host copies
/// it with programmed I/O.
pub struct GvpSeriesI {
    /// Interrupt enable, only bit 3 of the control byte is kept
    pub(crate) cntr: u8,
    sram: Vec<u8>,
    /// Host side SRAM pointer
    bufoffset: usize,
    /// Only advanced by outbound transfers
    addr: Address,
}

impl GvpSeriesI {
    pub fn new() -> Self {
        Self {
            cntr: 0,
            sram: vec![0; GVP_S1_SRAM_SIZE],
            bufoffset: 0,
            addr: 0,
        }
    }

    /// Host read from the SRAM window, advances the buffer pointer
    pub fn read_sram(&mut self) -> u8 {
        let v = self.sram[self.bufoffset];
        self.bufoffset = (self.bufoffset + 1) & GVP_S1_SRAM_MASK;
        v
    }

    pub fn write_sram(&mut self, val: u8) {
        self.sram[self.bufoffset] = val;
        self.bufoffset = (self.bufoffset + 1) & GVP_S1_SRAM_MASK;
    }

    pub fn rewind(&mut self) {
        self.bufoffset = 0;
    }

    pub fn write_cntr(&mut self, val: u8) {
        self.cntr = val & 8;
    }

    pub fn addr(&self) -> Address {
        self.addr
    }
}

impl DmaEngine for GvpSeriesI {
    fn pump(&mut self, chip: &mut Wd33c93, unit: &mut ScsiUnit, _mem: &mut dyn DmaBus) -> bool {
        if unit.direction().is_in() {
            loop {
                let (v, end) = unit.receive_byte();
                self.sram[chip.data_offset & GVP_S1_SRAM_MASK] = v;
                chip.data_offset = (chip.data_offset + 1) & GVP_S1_SRAM_MASK;
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else if unit.direction().is_out() {
            loop {
                let v = self.sram[chip.data_offset & GVP_S1_SRAM_MASK];
                chip.data_offset = (chip.data_offset + 1) & GVP_S1_SRAM_MASK;
                let end = unit.send_byte(v);
                self.addr = self.addr.wrapping_add(1);
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else {
            return false;
        }
        if GVP_TRACE {
            log::debug!(
                "GVP S1 DMA done, {}/{}",
                unit.offset(),
                unit.data_len()
            );
        }
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn is_irq_asserted(&mut self, chip_irq: bool, _xt_irq: bool) -> bool {
        self.cntr != 0 && chip_irq
    }

    fn reset(&mut self) {
        self.cntr = 0;
    }

    /// The SRAM is always ready, a stalled transfer resumes on the next
    /// chip request
    fn set_dma_done(&mut self) {}

    fn accepts_mode(&self, mode: u8) -> bool {
        if !matches!(mode, 0 | 2) {
            log::warn!("WD33C93 weird DMA mode {}", mode);
        }
        mode == 2
    }
}

/// Series II: bus mastering DMA straight into host memory
pub struct GvpSeriesII {
    host: GvpHost,
    pub(crate) cntr: Field16,
    addr: Address,
    addr_mask: Address,
    bank: u16,
    version: u8,
    dma: DmaState,
}

impl GvpSeriesII {
    pub fn new(host: GvpHost) -> Self {
        Self {
            host,
            cntr: Field16(0),
            addr: 0,
            addr_mask: host.addr_mask(),
            bank: 0,
            version: host.version(false),
            dma: DmaState::Idle,
        }
    }

    pub fn host(&self) -> GvpHost {
        self.host
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Boards with a SCSI boot ROM report a different product code
    pub fn set_has_rom(&mut self, has_rom: bool) {
        self.version = self.host.version(has_rom);
    }

    pub fn cntr(&self) -> GvpCntr {
        GvpCntr(self.cntr.0)
    }

    /// Host writes can't set the latched interrupt bits
    pub fn write_cntr(&mut self, val: u16) {
        self.cntr.0 = val & !3;
    }

    pub fn write_cntr_hi(&mut self, val: u8) {
        self.cntr.set_msb(val);
    }

    pub fn write_cntr_lo(&mut self, val: u8) {
        self.cntr.set_lsb(val & !3);
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn write_addr_hi(&mut self, val: u16) {
        self.addr = ((self.addr & 0xffff) | (Address::from(val & 0xff) << 16)) & self.addr_mask;
    }

    pub fn write_addr_lo(&mut self, val: u16) {
        self.addr = ((self.addr & 0xffff_0000) | Address::from(val)) & self.addr_mask;
    }

    pub fn bank(&self) -> u16 {
        self.bank
    }

    pub fn write_bank(&mut self, val: u16) {
        if val != 0 {
            log::debug!("GVP S2 bank {:02X}", val);
        }
        self.bank = val;
    }

    pub fn start_dma(&mut self) {
        self.dma = DmaState::Running;
    }

    pub fn stop_dma(&mut self) {
        self.dma = DmaState::Idle;
    }
}

impl DmaEngine for GvpSeriesII {
    fn pump(&mut self, chip: &mut Wd33c93, unit: &mut ScsiUnit, mem: &mut dyn DmaBus) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let start = self.addr;
        if unit.direction().is_in() {
            if self.cntr().dir_out() {
                log::warn!("GVP DMA: mismatched direction when reading");
                return false;
            }
            loop {
                let (v, end) = unit.receive_byte();
                mem.dma_write(self.addr, v);
                chip.mirror(v);
                self.addr = self.addr.wrapping_add(1) & self.addr_mask;
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else if unit.direction().is_out() {
            if !self.cntr().dir_out() {
                log::warn!("GVP DMA: mismatched direction when writing");
                return false;
            }
            loop {
                let v = mem.dma_read(self.addr);
                chip.mirror(v);
                let end = unit.send_byte(v);
                self.addr = self.addr.wrapping_add(1) & self.addr_mask;
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else {
            return false;
        }
        if GVP_TRACE {
            log::debug!(
                "GVP S2 DMA done, {}/{} {:08X}",
                unit.offset(),
                unit.data_len(),
                start
            );
        }
        true
    }

    fn is_enabled(&self) -> bool {
        self.dma == DmaState::Running
    }

    fn is_irq_asserted(&mut self, chip_irq: bool, _xt_irq: bool) -> bool {
        let mut cntr = self.cntr();
        if chip_irq {
            cntr.set_int_p(true);
        }
        self.cntr.0 = cntr.0;
        cntr.int_p() && cntr.inten()
    }

    fn reset(&mut self) {
        self.cntr = Field16(0);
        self.dma = DmaState::Idle;
    }

    fn set_dma_done(&mut self) {
        self.dma = DmaState::Done;
    }

    fn accepts_mode(&self, mode: u8) -> bool {
        if !matches!(mode, 0 | 1 | 4) {
            log::warn!("WD33C93 weird DMA mode {}", mode);
        }
        mode == 4 || mode == 1
    }
}
