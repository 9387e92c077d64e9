//! Host register windows of the boards
//!
//! Every board decodes a 64KB window. Byte and word cycles are decoded
//! separately; most registers are word registers that also answer byte
//! cycles on either half.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::autoconfig::AutoconfigWrite;
use super::{BoardKind, ControllerState};
use crate::bus::Address;
use crate::dmac::commodore::CommodoreDmac;
use crate::dmac::gvp::{GvpSeriesI, GvpSeriesII};
use crate::dmac::{DmaState, Dmac};

const WINDOW_TRACE: bool = false;

pub const WINDOW_MASK: Address = 0xffff;

/// Start of the boot ROM in the Commodore DMAC window
pub const CDMAC_ROM_OFFSET: Address = 0x2000;
/// Start of the boot ROM in the GVP window
pub const GVP_ROM_OFFSET: Address = 0x8000;
/// Start of the Series I SRAM window
pub const GVP_S1_RAM_OFFSET: Address = 0x4000;

/// End of the autoconfig area in the GVP window
const GVP_AUTOCONFIG_END: Address = 0x3e;
/// End of the autoconfig area in the Commodore DMAC window
const CDMAC_AUTOCONFIG_END: Address = 0x40;

/// Commodore DMAC word registers (A2091/A590, CDTV)
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
enum CdmacReg {
    /// Interrupt status
    ISTR = 0x40,
    /// Control
    CNTR = 0x42,
    /// Word transfer count
    WTC_HI = 0x80,
    WTC_LO = 0x82,
    /// Address counter
    ACR_HI = 0x84,
    ACR_LO = 0x86,
    /// Data acknowledge width
    DAWR = 0x8e,
    /// WD33C93 address register (write) / auxiliary status (read)
    SASR = 0x90,
    /// WD33C93 data
    SCMD = 0x92,
    /// DIP switches
    DIP = 0xc0,
    RSVD_C2 = 0xc2,
    RSVD_C4 = 0xc4,
    RSVD_C6 = 0xc6,
    /// Start DMA
    ST_DMA = 0xe0,
    /// Stop DMA
    SP_DMA = 0xe2,
    /// Clear interrupts
    CINT = 0xe4,
    FLUSH = 0xe8,
}

/// SuperDMAC word registers (A3000)
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
enum SdmacReg {
    DAWR = 0x02,
    WTC_HI = 0x04,
    WTC_LO = 0x06,
    CNTR = 0x0a,
    ACR_HI = 0x0c,
    ACR_LO = 0x0e,
    ST_DMA = 0x12,
    FLUSH = 0x16,
    CINT = 0x1a,
    ISTR = 0x1e,
    SP_DMA = 0x3e,
    SASR = 0x40,
    SCMD = 0x42,
    SCMD_ALT = 0x46,
    SASR_ALT = 0x48,
}

/// GVP Series II word registers
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive)]
enum GvpReg {
    CNTR = 0x40,
    BANK = 0x68,
    ADDR_HI = 0x70,
    ADDR_LO = 0x72,
    SECRET1 = 0x74,
    ST_DMA = 0x76,
    SP_DMA = 0x78,
    SECRET2 = 0x7a,
    SECRET3 = 0x7c,
}

/// Reads a ROM byte, the image repeats over the ROM area. Boards without a
/// ROM read 0 there.
fn rom_at(rom: Option<&[u8]>, offset: usize) -> u8 {
    match rom {
        Some(r) if !r.is_empty() => r[offset % r.len()],
        _ => 0,
    }
}

/// Byte cycle resolved through a word register: high half on even
/// addresses, low half on odd ones
fn word_half(addr: Address, word: u16) -> u8 {
    if addr & 1 == 0 {
        (word >> 8) as u8
    } else {
        word as u8
    }
}

/// Byte write turned into a word register write
fn byte_to_word(addr: Address, val: u8) -> u16 {
    if addr & 1 == 0 {
        u16::from(val) << 8
    } else {
        u16::from(val)
    }
}

impl ControllerState {
    fn cdmac(&mut self) -> Option<&mut CommodoreDmac> {
        self.dmac.as_commodore_mut()
    }

    fn gvp_s1(&mut self) -> Option<&mut GvpSeriesI> {
        match &mut self.dmac {
            Dmac::GvpSeriesI(d) => Some(d),
            _ => None,
        }
    }

    fn gvp_s2(&mut self) -> Option<&mut GvpSeriesII> {
        match &mut self.dmac {
            Dmac::GvpSeriesII(d) => Some(d),
            _ => None,
        }
    }

    // Commodore DMAC (A2091/A590, CDTV)

    fn cdmac_read_word(&mut self, addr: Address) -> u16 {
        if addr < CDMAC_AUTOCONFIG_END {
            return self.autoconfig.read_word(addr);
        }
        if addr >= CDMAC_ROM_OFFSET {
            let rom = self.rom.as_deref();
            let a = addr as usize;
            return (u16::from(rom_at(rom, a)) << 8) | u16::from(rom_at(rom, a + 1));
        }

        let v = match CdmacReg::from_u32(addr & !1) {
            Some(CdmacReg::ISTR) => self.cdmac().map_or(0, |d| d.read_istr().into()),
            Some(CdmacReg::CNTR) => self.cdmac().map_or(0, |d| d.cntr.into()),
            Some(CdmacReg::WTC_HI) => self
                .cdmac()
                .and_then(|d| d.read_wtc())
                .map_or(0, |w| (w >> 16) as u16),
            Some(CdmacReg::WTC_LO) => self
                .cdmac()
                .and_then(|d| d.read_wtc())
                .map_or(0, |w| w as u16),
            Some(CdmacReg::SASR) => self.chip.aux_status().into(),
            Some(CdmacReg::SCMD) => self.chip_get().into(),
            // All switches open
            Some(CdmacReg::DIP) => 0xff,
            Some(CdmacReg::RSVD_C2 | CdmacReg::RSVD_C4 | CdmacReg::RSVD_C6) => 0xffff,
            Some(CdmacReg::ST_DMA) => {
                if let Some(d) = self.cdmac() {
                    d.start_dma();
                }
                0
            }
            Some(CdmacReg::SP_DMA) => {
                if let Some(d) = self.cdmac() {
                    d.stop_dma();
                }
                0
            }
            Some(CdmacReg::CINT) => {
                if let Some(d) = self.cdmac() {
                    d.clear_interrupts();
                }
                0
            }
            Some(CdmacReg::FLUSH) => {
                // New DMAC only
                if let Some(d) = self.cdmac() {
                    if !d.old_dmac() && d.dma == DmaState::Running {
                        d.flush();
                    }
                }
                0
            }
            _ => 0,
        };
        if WINDOW_TRACE {
            log::debug!("{} DMAC word read {:04X} = {:04X}", self.name, addr, v);
        }
        v
    }

    fn cdmac_read_byte(&mut self, addr: Address) -> u8 {
        if addr < CDMAC_AUTOCONFIG_END {
            return self.autoconfig.read(addr);
        }
        if addr >= CDMAC_ROM_OFFSET {
            return rom_at(self.rom.as_deref(), addr as usize);
        }
        match addr {
            0x91 => self.chip.aux_status(),
            0x93 => self.chip_get(),
            0xa1 | 0xa3 | 0xa5 | 0xa7 => self.read_xt_reg(((addr - 0xa0) / 2) as u8),
            _ => {
                let w = self.cdmac_read_word(addr);
                word_half(addr, w)
            }
        }
    }

    fn cdmac_write_word(&mut self, addr: Address, val: u16) {
        if !(CDMAC_AUTOCONFIG_END..CDMAC_ROM_OFFSET).contains(&addr) {
            return;
        }
        if WINDOW_TRACE {
            log::debug!("{} DMAC word write {:04X} = {:04X}", self.name, addr, val);
        }

        let Some(reg) = CdmacReg::from_u32(addr & !1) else {
            log::warn!("{} DMAC write to unknown register {:04X}", self.name, addr);
            return;
        };
        match reg {
            CdmacReg::SASR => self.chip.set_pointer(val as u8),
            CdmacReg::SCMD => self.chip_put(val as u8),
            _ => {
                let Some(d) = self.cdmac() else {
                    return;
                };
                match reg {
                    CdmacReg::CNTR => d.write_cntr(val as u8),
                    CdmacReg::WTC_HI => d.wtc.set_hi(val),
                    CdmacReg::WTC_LO => d.wtc.set_lo(val),
                    CdmacReg::ACR_HI => d.write_acr_hi(val),
                    CdmacReg::ACR_LO => d.write_acr_lo(val),
                    CdmacReg::DAWR => d.dawr = val,
                    CdmacReg::ST_DMA => d.start_dma(),
                    CdmacReg::SP_DMA => d.stop_dma(),
                    CdmacReg::CINT => d.clear_interrupts(),
                    CdmacReg::FLUSH => d.flush(),
                    _ => (),
                }
            }
        }
    }

    fn cdmac_write_byte(&mut self, addr: Address, val: u8) {
        if !(CDMAC_AUTOCONFIG_END..CDMAC_ROM_OFFSET).contains(&addr) {
            return;
        }
        match addr {
            0x91 => self.chip.set_pointer(val),
            0x93 => self.chip_put(val),
            0xa1 | 0xa3 | 0xa5 | 0xa7 => self.write_xt_reg(((addr - 0xa0) / 2) as u8, val),
            _ => self.cdmac_write_word(addr, byte_to_word(addr, val)),
        }
    }

    // SuperDMAC (A3000)

    fn sdmac_read_word(&mut self, addr: Address) -> u16 {
        let Some(reg) = SdmacReg::from_u32(addr & 0xfffe) else {
            return 0xffff;
        };
        let v = match reg {
            SdmacReg::SASR | SdmacReg::SASR_ALT => self.chip.aux_status().into(),
            SdmacReg::SCMD | SdmacReg::SCMD_ALT => self.chip_get().into(),
            _ => {
                let Some(d) = self.cdmac() else {
                    return 0xffff;
                };
                match reg {
                    SdmacReg::DAWR => d.dawr,
                    SdmacReg::WTC_HI | SdmacReg::WTC_LO => 0xffff,
                    SdmacReg::CNTR => d.cntr.into(),
                    SdmacReg::ACR_HI => d.acr.hi(),
                    SdmacReg::ACR_LO => d.acr.lo(),
                    SdmacReg::ST_DMA => {
                        d.start_dma();
                        0
                    }
                    SdmacReg::CINT => {
                        d.clear_interrupts();
                        0
                    }
                    SdmacReg::ISTR => d.read_istr().into(),
                    SdmacReg::SP_DMA => {
                        if d.is_active() {
                            d.stop_dma();
                            d.flush();
                        }
                        0
                    }
                    _ => 0xffff,
                }
            }
        };
        if WINDOW_TRACE {
            log::debug!("{} SDMAC word read {:04X} = {:04X}", self.name, addr, v);
        }
        v
    }

    fn sdmac_read_byte(&mut self, addr: Address) -> u8 {
        match addr {
            0x41 | 0x49 => self.chip.aux_status(),
            0x43 | 0x47 => self.chip_get(),
            _ => {
                let w = self.sdmac_read_word(addr);
                word_half(addr, w)
            }
        }
    }

    fn sdmac_write_word(&mut self, addr: Address, val: u16) {
        if WINDOW_TRACE {
            log::debug!("{} SDMAC word write {:04X} = {:04X}", self.name, addr, val);
        }
        let Some(reg) = SdmacReg::from_u32(addr & 0xfffe) else {
            log::warn!("{} SDMAC write to unknown register {:04X}", self.name, addr);
            return;
        };
        match reg {
            SdmacReg::SASR | SdmacReg::SASR_ALT => self.chip.set_pointer(val as u8),
            SdmacReg::SCMD | SdmacReg::SCMD_ALT => self.chip_put(val as u8),
            _ => {
                let Some(d) = self.cdmac() else {
                    return;
                };
                match reg {
                    SdmacReg::DAWR => d.dawr = val,
                    SdmacReg::WTC_HI => d.wtc.set_hi(val),
                    SdmacReg::WTC_LO => d.wtc.set_lo(val),
                    SdmacReg::CNTR => d.write_cntr(val as u8),
                    SdmacReg::ACR_HI => d.write_acr_hi(val),
                    SdmacReg::ACR_LO => d.write_acr_lo(val),
                    SdmacReg::ST_DMA => d.start_dma(),
                    SdmacReg::FLUSH => {
                        if d.is_active() {
                            d.flush();
                            d.dma = DmaState::Idle;
                        }
                    }
                    SdmacReg::CINT => d.clear_interrupts(),
                    SdmacReg::SP_DMA => d.stop_dma(),
                    _ => (),
                }
            }
        }
    }

    fn sdmac_write_byte(&mut self, addr: Address, val: u8) {
        match addr {
            0x41 | 0x49 => self.chip.set_pointer(val),
            0x43 | 0x47 => self.chip_put(val),
            _ => self.sdmac_write_word(addr, byte_to_word(addr, val)),
        }
    }

    // GVP Series I and II

    fn gvp_rom_byte(&self, addr: Address) -> u8 {
        let off = (addr - GVP_ROM_OFFSET) as usize;
        match &self.dmac {
            Dmac::GvpSeriesII(d) if addr & 1 != 0 => d.version(),
            Dmac::GvpSeriesII(_) => rom_at(self.rom.as_deref(), off / 2),
            _ => rom_at(self.rom.as_deref(), off),
        }
    }

    fn gvp_read_byte(&mut self, addr: Address) -> u8 {
        if addr < GVP_AUTOCONFIG_END {
            return self.autoconfig.read(addr);
        }
        if addr >= GVP_ROM_OFFSET {
            return self.gvp_rom_byte(addr);
        }
        if addr >= GVP_S1_RAM_OFFSET {
            if let Some(d) = self.gvp_s1() {
                return d.read_sram();
            }
        }
        if !self.autoconfig.is_configured() {
            return 0xff;
        }

        let cntr = match &self.dmac {
            Dmac::GvpSeriesII(d) => Some(d.cntr),
            _ => None,
        };
        if let Some(cntr) = cntr {
            match addr {
                0x40 => cntr.msb(),
                0x41 => cntr.lsb(),
                0x61 => self.chip.aux_status(),
                0x63 => self.chip_get(),
                _ => {
                    log::warn!("{} S2 byte read from unknown register {:04X}", self.name, addr);
                    0
                }
            }
        } else {
            match addr {
                0x3e => self.chip.aux_status() & 0x80,
                0x60 => self.chip.aux_status(),
                0x62 => self.chip_get(),
                _ => {
                    log::warn!("{} S1 byte read from unknown register {:04X}", self.name, addr);
                    0
                }
            }
        }
    }

    fn gvp_read_word(&mut self, addr: Address) -> u16 {
        if addr < GVP_AUTOCONFIG_END {
            return self.autoconfig.read_word(addr);
        }
        if addr >= GVP_ROM_OFFSET {
            return match &self.dmac {
                Dmac::GvpSeriesII(d) => {
                    (u16::from(self.gvp_rom_byte(addr & !1)) << 8) | u16::from(d.version())
                }
                _ => {
                    (u16::from(self.gvp_rom_byte(addr)) << 8) | u16::from(self.gvp_rom_byte(addr + 1))
                }
            };
        }
        if addr >= GVP_S1_RAM_OFFSET {
            if let Some(d) = self.gvp_s1() {
                let hi = d.read_sram();
                let lo = d.read_sram();
                return (u16::from(hi) << 8) | u16::from(lo);
            }
        }
        if !self.autoconfig.is_configured() {
            return 0xffff;
        }

        let name = &self.name;
        let Dmac::GvpSeriesII(d) = &mut self.dmac else {
            return 0;
        };
        match GvpReg::from_u32(addr) {
            Some(GvpReg::CNTR) => d.cntr.0,
            Some(GvpReg::BANK) => d.bank(),
            Some(GvpReg::ADDR_HI) => (d.addr() >> 16) as u16,
            Some(GvpReg::ADDR_LO) => d.addr() as u16,
            _ => {
                log::warn!("{} S2 word read from unknown register {:04X}", name, addr);
                0
            }
        }
    }

    fn gvp_write_word(&mut self, addr: Address, val: u16) {
        if addr >= GVP_ROM_OFFSET {
            return;
        }
        if addr >= GVP_S1_RAM_OFFSET {
            if let Some(d) = self.gvp_s1() {
                d.write_sram((val >> 8) as u8);
                d.write_sram(val as u8);
                return;
            }
        }

        let name = &self.name;
        let Dmac::GvpSeriesII(d) = &mut self.dmac else {
            if WINDOW_TRACE {
                log::debug!("{} S1 word write {:04X} = {:04X}", name, addr, val);
            }
            return;
        };
        match GvpReg::from_u32(addr) {
            Some(GvpReg::CNTR) => d.write_cntr(val),
            Some(GvpReg::BANK) => d.write_bank(val),
            Some(GvpReg::ADDR_HI) => d.write_addr_hi(val),
            Some(GvpReg::ADDR_LO) => d.write_addr_lo(val),
            Some(GvpReg::ST_DMA) => d.start_dma(),
            Some(GvpReg::SP_DMA) => d.stop_dma(),
            Some(GvpReg::SECRET1 | GvpReg::SECRET2 | GvpReg::SECRET3) => {
                log::warn!("{} S2 config register {:04X} = {:04X}", name, addr, val);
            }
            None => {
                log::warn!("{} S2 word write to unknown register {:04X}", name, addr);
            }
        }
    }

    fn gvp_write_byte(&mut self, addr: Address, val: u8) {
        if addr >= GVP_ROM_OFFSET {
            return;
        }
        if addr >= GVP_S1_RAM_OFFSET {
            if let Some(d) = self.gvp_s1() {
                d.write_sram(val);
                return;
            }
        }

        if matches!(self.dmac, Dmac::GvpSeriesII(_)) {
            match addr {
                0x40 => {
                    if let Some(d) = self.gvp_s2() {
                        d.write_cntr_hi(val);
                    }
                }
                0x41 => {
                    if let Some(d) = self.gvp_s2() {
                        d.write_cntr_lo(val);
                    }
                }
                0x61 => self.chip.set_pointer(val),
                0x63 => self.chip_put(val),
                0x74 | 0x75 | 0x7a | 0x7b | 0x7c | 0x7d => {
                    log::warn!("{} S2 config register {:04X} = {:02X}", self.name, addr, val);
                }
                _ => log::warn!("{} S2 byte write to unknown register {:04X}", self.name, addr),
            }
            return;
        }
        match addr {
            0x60 => self.chip.set_pointer(val),
            0x62 => self.chip_put(val),
            // SRAM pointer reset
            0x68 => {
                if let Some(d) = self.gvp_s1() {
                    d.rewind();
                }
            }
            0x6c => {
                if let Some(d) = self.gvp_s1() {
                    d.write_cntr(val);
                }
            }
            _ => log::warn!("{} S1 byte write to unknown register {:04X}", self.name, addr),
        }
    }

    // Dispatch

    pub(crate) fn bus_read(&mut self, addr: Address) -> u8 {
        let addr = addr & WINDOW_MASK;
        match self.kind {
            BoardKind::A2091 | BoardKind::Cdtv => self.cdmac_read_byte(addr),
            BoardKind::A3000 => self.sdmac_read_byte(addr),
            BoardKind::GvpSeriesI | BoardKind::GvpSeriesII => self.gvp_read_byte(addr),
        }
    }

    pub(crate) fn bus_read_word(&mut self, addr: Address) -> u16 {
        let addr = addr & WINDOW_MASK;
        match self.kind {
            BoardKind::A2091 | BoardKind::Cdtv => self.cdmac_read_word(addr),
            BoardKind::A3000 => self.sdmac_read_word(addr),
            BoardKind::GvpSeriesI | BoardKind::GvpSeriesII => self.gvp_read_word(addr),
        }
    }

    pub(crate) fn bus_write(&mut self, addr: Address, val: u8) {
        let addr = addr & WINDOW_MASK;
        match self.autoconfig.intercept_write(addr, val) {
            AutoconfigWrite::Passthrough => (),
            AutoconfigWrite::Handled | AutoconfigWrite::Dropped => return,
        }
        match self.kind {
            BoardKind::A2091 | BoardKind::Cdtv => self.cdmac_write_byte(addr, val),
            BoardKind::A3000 => self.sdmac_write_byte(addr, val),
            BoardKind::GvpSeriesI | BoardKind::GvpSeriesII => self.gvp_write_byte(addr, val),
        }
    }

    pub(crate) fn bus_write_word(&mut self, addr: Address, val: u16) {
        let addr = addr & WINDOW_MASK;
        if !self.autoconfig.is_configured() {
            return;
        }
        match self.kind {
            BoardKind::A2091 | BoardKind::Cdtv => self.cdmac_write_word(addr, val),
            BoardKind::A3000 => self.sdmac_write_word(addr, val),
            BoardKind::GvpSeriesI | BoardKind::GvpSeriesII => self.gvp_write_word(addr, val),
        }
    }

    pub(crate) fn bus_write_long(&mut self, addr: Address, val: u32) {
        let addr = addr & WINDOW_MASK;
        // Long write to 0x40 on the SuperDMAC is a byte write to SASR
        if self.kind == BoardKind::A3000 && addr == 0x40 {
            self.sdmac_write_byte(0x41, val as u8);
            return;
        }
        self.bus_write_word(addr, (val >> 16) as u16);
        self.bus_write_word(addr.wrapping_add(2), val as u16);
    }
}
