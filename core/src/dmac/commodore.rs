//! Commodore DMAC (A2091/A590, CDTV) and SuperDMAC (A3000)

use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use super::{DmaEngine, DmaState};
use crate::bus::DmaBus;
use crate::scsi::unit::ScsiUnit;
use crate::types::Field32;
use crate::wd33c93::Wd33c93;

const DMAC_TRACE: bool = false;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum CommodoreModel {
    /// Zorro II DMAC (A2091/A590, CDTV)
    Dmac,
    /// A3000 mainboard SuperDMAC
    SuperDmac,
}

bitfield! {
    /// DMAC control register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Cntr(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Data direction (host -> peripheral)
        pub ddir: bool @ 3,
        pub inten: bool @ 4,
        pub pdmd: bool @ 5,
        /// Peripheral reset
        pub prest: bool @ 6,
        /// Terminal count enable
        pub tcen: bool @ 7,
    }
}

bitfield! {
    /// SuperDMAC control register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct SCntr(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub io_dx: bool @ 0,
        pub ddir: bool @ 1,
        pub inten: bool @ 2,
        pub pdmd: bool @ 3,
        pub prest: bool @ 4,
        pub tcen: bool @ 5,
    }
}

bitfield! {
    /// Interrupt status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Istr(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// FIFO empty
        pub fe_flg: bool @ 0,
        /// FIFO full
        pub ff_flg: bool @ 1,
        pub oe_int: bool @ 2,
        pub ue_int: bool @ 3,
        /// Interrupt pending
        pub int_p: bool @ 4,
        /// End of process
        pub e_int: bool @ 5,
        /// SCSI or XT peripheral interrupt
        pub ints: bool @ 6,
        pub int_f: bool @ 7,
    }
}

/// Plain copy of the saved DMAC registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmacSnapshot {
    pub model: CommodoreModel,
    pub old_dmac: bool,
    pub istr: u8,
    pub cntr: u8,
    pub wtc: u32,
    pub acr: u32,
    pub dawr: u16,
    pub dma_active: bool,
    pub configured: bool,
}

pub struct CommodoreDmac {
    model: CommodoreModel,
    /// First revision DMAC: readable WTC, long aligned ACR
    old_dmac: bool,

    pub(crate) istr: Istr,
    pub(crate) cntr: u8,
    /// Word transfer count
    pub(crate) wtc: Field32,
    /// Address counter
    pub(crate) acr: Field32,
    /// Data acknowledge width
    pub(crate) dawr: u16,
    pub(crate) dma: DmaState,
}

impl CommodoreDmac {
    pub fn new_dmac(old_dmac: bool) -> Self {
        Self::new(CommodoreModel::Dmac, old_dmac)
    }

    pub fn new_sdmac() -> Self {
        Self::new(CommodoreModel::SuperDmac, false)
    }

    fn new(model: CommodoreModel, old_dmac: bool) -> Self {
        Self {
            model,
            old_dmac,
            istr: Istr::default(),
            cntr: 0,
            wtc: Field32(0),
            acr: Field32(0),
            dawr: 0,
            dma: DmaState::Idle,
        }
    }

    pub fn model(&self) -> CommodoreModel {
        self.model
    }

    pub fn old_dmac(&self) -> bool {
        self.old_dmac
    }

    pub fn is_active(&self) -> bool {
        self.dma != DmaState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.dma == DmaState::Running
    }

    fn inten(&self) -> bool {
        match self.model {
            CommodoreModel::Dmac => Cntr(self.cntr).inten(),
            CommodoreModel::SuperDmac => SCntr(self.cntr).inten(),
        }
    }

    fn tcen(&self) -> bool {
        match self.model {
            CommodoreModel::Dmac => Cntr(self.cntr).tcen(),
            CommodoreModel::SuperDmac => SCntr(self.cntr).tcen(),
        }
    }

    /// ST_DMA strobe
    pub fn start_dma(&mut self) {
        if self.dma == DmaState::Running {
            return;
        }
        if DMAC_TRACE {
            log::debug!(
                "DMA started, ACR={:08X}, WTC={:08X} words",
                self.acr.0,
                self.wtc.0
            );
        }
        self.dma = DmaState::Running;
    }

    /// SP_DMA strobe
    pub fn stop_dma(&mut self) {
        self.dma = DmaState::Idle;
        self.istr.set_e_int(false);
    }

    /// CINT strobe
    pub fn clear_interrupts(&mut self) {
        self.istr = Istr::default();
    }

    /// FLUSH strobe
    pub fn flush(&mut self) {
        self.istr.set_fe_flg(true);
    }

    pub fn write_cntr(&mut self, val: u8) {
        self.cntr = val;
        let prest = match self.model {
            CommodoreModel::Dmac => Cntr(val).prest(),
            CommodoreModel::SuperDmac => SCntr(val).prest(),
        };
        if prest {
            log::info!("{} peripheral reset", self.model);
        }
    }

    /// Reads ISTR, synthesising INT_P and clearing the low nibble
    pub fn read_istr(&mut self) -> u8 {
        let mut v = self.istr;
        match self.model {
            CommodoreModel::Dmac => {
                if v.0 != 0 && self.inten() {
                    v.set_int_p(true);
                }
            }
            CommodoreModel::SuperDmac => {
                if v.ints() {
                    v.set_int_p(true);
                }
                if self.dma == DmaState::Idle {
                    v.set_fe_flg(true);
                }
            }
        }
        self.istr.0 &= !0x0f;
        v.0
    }

    /// Word transfer count as seen by the host. Only the first DMAC revision
    /// exposes it.
    pub fn read_wtc(&self) -> Option<u32> {
        self.old_dmac.then_some(self.wtc.0)
    }

    pub fn write_acr_hi(&mut self, val: u16) {
        self.acr.set_hi(val);
    }

    pub fn write_acr_lo(&mut self, val: u16) {
        let mut v = val & 0xfffe;
        if self.old_dmac {
            v &= !3;
        }
        self.acr.set_lo(v);
    }

    /// Per-byte bookkeeping: address advance and terminal count
    fn dmacheck(&mut self) {
        self.acr.0 = self.acr.0.wrapping_add(1);
        if self.old_dmac && self.tcen() {
            if self.wtc.0 == 0 {
                self.istr.set_e_int(true);
            } else {
                self.wtc.0 -= 1;
            }
        }
    }

    pub fn snapshot(&self, configured: bool) -> DmacSnapshot {
        DmacSnapshot {
            model: self.model,
            old_dmac: self.old_dmac,
            istr: self.istr.0,
            cntr: self.cntr,
            wtc: self.wtc.0,
            acr: self.acr.0,
            dawr: self.dawr,
            dma_active: self.dma != DmaState::Idle,
            configured,
        }
    }

    /// Restores the saved registers. DMA activity is not restored.
    pub fn restore(&mut self, snap: &DmacSnapshot) {
        self.istr = Istr(snap.istr);
        self.cntr = snap.cntr;
        self.wtc = Field32(snap.wtc);
        self.acr = Field32(snap.acr);
        self.dawr = snap.dawr;
    }
}

impl DmaEngine for CommodoreDmac {
    fn pump(&mut self, chip: &mut Wd33c93, unit: &mut ScsiUnit, mem: &mut dyn DmaBus) -> bool {
        let start = self.acr.0;
        if unit.direction().is_in() {
            loop {
                let (v, end) = unit.receive_byte();
                mem.dma_write(self.acr.0, v);
                chip.mirror(v);
                self.dmacheck();
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else if unit.direction().is_out() {
            loop {
                let v = mem.dma_read(self.acr.0);
                chip.mirror(v);
                let end = unit.send_byte(v);
                self.dmacheck();
                if chip.decrease_tc() || end {
                    break;
                }
            }
        } else {
            return false;
        }
        if DMAC_TRACE {
            log::debug!(
                "DMA {} done, {}/{} {:08X}",
                if unit.direction().is_in() { "from WD" } else { "to WD" },
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

    fn is_irq_asserted(&mut self, chip_irq: bool, xt_irq: bool) -> bool {
        if self.model == CommodoreModel::Dmac && xt_irq {
            self.istr.set_ints(true);
        }
        if chip_irq {
            self.istr.set_ints(true);
        }
        self.inten() && (self.istr.ints() || self.istr.e_int())
    }

    fn reset(&mut self) {
        self.dma = DmaState::Idle;
        self.istr = Istr::default();
        self.cntr = 0;
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
