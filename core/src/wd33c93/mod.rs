//! Western Digital WD33C93 SCSI bus interface controller
//!
//! This is the chip side only: the register file, the transfer counter, the
//! auxiliary status and the delayed status queue. The command/phase state
//! machine needs the attached targets and the DMA engine and lives with the
//! controller.

pub mod queue;
pub mod regs;

use serde::{Deserialize, Serialize};

use queue::StatusQueue;
use regs::*;

const WD_TRACE: bool = false;

/// Size of the chip's scratch data buffer
pub const WD_DATA_SIZE: usize = 32;

/// Chip revision, affects which register bits are writable
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display)]
pub enum ChipRevision {
    Wd33c93,
    #[default]
    Wd33c93A,
    Wd33c93B,
}

/// Pending data register transfer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRequest {
    #[default]
    Idle,
    /// Host moves bytes through the DATA register
    ProgrammedIo,
    /// The board's DMA engine moves bytes
    Dma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wd33c93 {
    regs: [u8; 32],
    sasr: u8,
    auxstatus: AuxStatus,
    revision: ChipRevision,

    /// Command in progress
    pub(crate) busy: bool,
    pub(crate) data_avail: DataRequest,
    /// A target is selected
    pub(crate) selected: bool,
    /// SCSI ID of the target the current command talks to
    pub(crate) active: Option<usize>,

    /// Scratch copy of the bytes moved in the current phase
    pub(crate) data: [u8; WD_DATA_SIZE],
    pub(crate) data_offset: usize,

    /// Last status code the phase machine produced
    pub(crate) wd_phase: u8,
    pub(crate) queue: StatusQueue,

    used: bool,
}

impl Wd33c93 {
    pub fn new(revision: ChipRevision) -> Self {
        Self {
            regs: [0; 32],
            sasr: 0,
            auxstatus: AuxStatus::default(),
            revision,
            busy: false,
            data_avail: DataRequest::Idle,
            selected: false,
            active: None,
            data: [0; WD_DATA_SIZE],
            data_offset: 0,
            wd_phase: 0,
            queue: StatusQueue::default(),
            used: false,
        }
    }

    pub fn revision(&self) -> ChipRevision {
        self.revision
    }

    /// Raw register contents
    pub fn reg(&self, reg: u8) -> u8 {
        self.regs[(reg & 0x1f) as usize]
    }

    /// Sets a register bypassing the host write rules
    pub(crate) fn set_reg(&mut self, reg: u8, val: u8) {
        self.regs[(reg & 0x1f) as usize] = val;
    }

    /// Host write to a register, honoring read-only and revision gated bits.
    pub fn write_register(&mut self, reg: u8, mut val: u8) {
        let reg = reg & 0x1f;
        if is_write_only(reg) {
            return;
        }
        if reg == OWN_ID {
            match self.revision {
                ChipRevision::Wd33c93 => val &= !(0x20 | 0x08),
                ChipRevision::Wd33c93A => val &= !0x20,
                ChipRevision::Wd33c93B => (),
            }
        }
        if reg > QUEUE_TAG && reg < AUXILIARY_STATUS {
            return;
        }
        // Queue tag is B revision only
        if reg == QUEUE_TAG && self.revision < ChipRevision::Wd33c93B {
            return;
        }
        self.regs[reg as usize] = val;
    }

    pub fn pointer(&self) -> u8 {
        self.sasr
    }

    pub fn set_pointer(&mut self, val: u8) {
        self.sasr = val & 0x1f;
    }

    /// Register pointer auto-increment after a host access
    pub fn advance_pointer(&mut self, after_write: bool) {
        if matches!(self.sasr, AUXILIARY_STATUS | DATA | COMMAND) {
            return;
        }
        if after_write && self.sasr == SCSI_STATUS {
            return;
        }
        self.sasr = (self.sasr + 1) & 0x1f;
    }

    /// Marks the chip as used, returns true on first use
    pub(crate) fn mark_used(&mut self) -> bool {
        !std::mem::replace(&mut self.used, true)
    }

    /// 24-bit transfer count
    pub fn tc(&self) -> u32 {
        u32::from(self.regs[TRANSFER_COUNT_LSB as usize])
            | (u32::from(self.regs[TRANSFER_COUNT as usize]) << 8)
            | (u32::from(self.regs[TRANSFER_COUNT_MSB as usize]) << 16)
    }

    pub fn set_tc(&mut self, tc: u32) {
        self.regs[TRANSFER_COUNT_LSB as usize] = tc as u8;
        self.regs[TRANSFER_COUNT as usize] = (tc >> 8) as u8;
        self.regs[TRANSFER_COUNT_MSB as usize] = (tc >> 16) as u8;
    }

    /// Counts one byte off the transfer count.
    ///
    /// Returns true when the count is exhausted, including when it already
    /// was zero.
    pub fn decrease_tc(&mut self) -> bool {
        let tc = self.tc();
        if tc == 0 {
            return true;
        }
        self.set_tc(tc - 1);
        tc == 1
    }

    /// Command phase progress byte
    pub fn phase(&self) -> u8 {
        self.regs[COMMAND_PHASE as usize]
    }

    pub(crate) fn set_phase(&mut self, phase: u8) {
        if WD_TRACE {
            log::debug!("Phase {:02X} -> {:02X}", self.phase(), phase);
        }
        self.regs[COMMAND_PHASE as usize] = phase;
    }

    pub fn control(&self) -> ControlReg {
        ControlReg(self.regs[CONTROL as usize])
    }

    /// DMA mode field of the CONTROL register
    pub fn dma_mode(&self) -> u8 {
        self.control().dma_mode()
    }

    /// SCSI ID addressed by the DESTINATION ID register
    pub fn destination(&self) -> usize {
        (self.regs[DESTINATION_ID as usize] & 7) as usize
    }

    pub fn aux_status(&self) -> u8 {
        AuxStatus::default()
            .with_int(self.auxstatus.int())
            .with_bsy(self.busy || self.data_avail == DataRequest::Dma)
            .with_dbr(self.data_avail != DataRequest::Idle)
            .0
    }

    pub fn interrupt_pending(&self) -> bool {
        self.auxstatus.int()
    }

    pub(crate) fn clear_interrupt(&mut self) {
        self.auxstatus.set_int(false);
    }

    /// Latches a status code and raises the interrupt
    pub(crate) fn deliver_status(&mut self, status: u8) {
        if WD_TRACE {
            log::debug!("Status {:02X}", status);
        }
        self.regs[SCSI_STATUS as usize] = status;
        self.auxstatus.set_int(true);
        self.busy = false;
    }

    /// Queues a status code for delivery after `delay` scan lines
    pub(crate) fn post_status(&mut self, status: u8, delay: u32) {
        self.queue.post(status, delay);
    }

    /// Delivers expired queue entries, unless an interrupt is still pending.
    pub fn check_interrupt(&mut self) {
        if self.auxstatus.int() {
            return;
        }
        for status in self.queue.expire().into_iter().flatten() {
            self.deliver_status(status);
        }
    }

    /// Records a transferred byte in the scratch buffer. Bytes past its end
    /// are dropped but still counted.
    pub(crate) fn mirror(&mut self, val: u8) {
        if let Some(b) = self.data.get_mut(self.data_offset) {
            *b = val;
        }
        self.data_offset += 1;
    }

    /// Chip reset: clears the register file, selection and queued status.
    pub fn reset(&mut self, irq: bool) {
        if irq {
            log::info!("WD33C93 reset");
        }
        for r in 1..SOURCE_ID {
            self.regs[r as usize] = 0;
        }
        self.regs[COMMAND as usize] = 0;
        self.sasr = 0;
        self.selected = false;
        self.active = None;
        self.queue.clear();
        self.auxstatus = AuxStatus::default();
        self.data_avail = DataRequest::Idle;
        if irq {
            // Advanced features enabled -> status 1
            let status = if self.regs[OWN_ID as usize] & 0x08 != 0 {
                1
            } else {
                0
            };
            self.post_status(status, 50);
        }
    }
}
