//! WD33C93 command execution and bus phase sequencing
//!
//! Chip commands run on the board's worker thread. They walk the COMMAND
//! PHASE register through the SCSI bus phases of the addressed target and
//! queue the status codes the host driver polls for.

use num_traits::FromPrimitive;

use super::ControllerState;
use super::worker::{RequestKind, WorkerRequest};
use super::xt::XT_UNIT;
use crate::bus::DmaBus;
use crate::dmac::Dmac;
use crate::scsi::Direction;
use crate::scsi::unit::{CDB_MAX, MSG_IDENTIFY, ScsiUnit};
use crate::wd33c93::regs::*;
use crate::wd33c93::{DataRequest, Wd33c93};

const PHASE_TRACE: bool = false;

// COMMAND PHASE register values
pub const PH_IDLE: u8 = 0x00;
/// Selected, message out expected
pub const PH_MSG_OUT: u8 = 0x10;
/// Identify message sent
pub const PH_MSG_SENT: u8 = 0x20;
/// Command phase, plus the number of CDB bytes transferred
pub const PH_COMMAND: u8 = 0x30;
pub const PH_DATA_SETUP: u8 = 0x44;
pub const PH_DATA: u8 = 0x45;
pub const PH_STATUS: u8 = 0x46;
pub const PH_STATUS_SENT: u8 = 0x47;
pub const PH_MSG_IN: u8 = 0x50;
pub const PH_COMPLETE: u8 = 0x60;

/// Our own SCSI ID, never a valid destination
pub const INITIATOR_ID: usize = 7;

fn data_phase(dir: Direction) -> u8 {
    if dir.is_in() { PHS_DATA_IN } else { PHS_DATA_OUT }
}

/// Completes an initiator -> target transfer (message out, command or data
/// out). Returns false if the target wants more bytes.
pub(crate) fn transfer_out(chip: &mut Wd33c93, unit: &mut ScsiUnit) -> bool {
    if PHASE_TRACE {
        log::debug!(
            "SCSI O [{:02X}] {}/{} TC={} {:02X?}",
            chip.phase(),
            unit.offset(),
            unit.data_len(),
            chip.tc(),
            &chip.data[..chip.data_offset.min(chip.data.len())]
        );
    }

    let phase = chip.phase();
    if phase < PH_MSG_SENT {
        // Message was sent
        let msg = chip.data[0];
        chip.set_phase(PH_MSG_SENT);
        chip.wd_phase = CSR_XFER_DONE | PHS_COMMAND;
        unit.status = 0;
        unit.start_transfer();
        unit.message = msg;
    } else if (PH_COMMAND..PH_COMMAND + CDB_MAX as u8).contains(&phase) {
        if unit.offset < unit.data_len {
            chip.wd_phase = CSR_XFER_DONE | PHS_COMMAND;
            chip.set_phase(PH_COMMAND + unit.offset as u8);
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        chip.set_tc(0);
        unit.start_transfer();
        unit.analyze();
        if unit.data_len == 0 || unit.direction == Direction::None {
            // Nothing to exchange, straight to status
            chip.wd_phase = CSR_XFER_DONE | PHS_STATUS;
            chip.set_phase(PH_STATUS);
        } else {
            chip.wd_phase = CSR_XFER_DONE | data_phase(unit.direction);
            chip.set_phase(PH_DATA);
        }
    } else if phase == PH_DATA || phase == PH_STATUS {
        if unit.offset < unit.data_len {
            chip.wd_phase = CSR_XFER_DONE | data_phase(unit.direction);
            chip.post_status(chip.wd_phase, 10);
            return false;
        }
        chip.set_tc(0);
        if unit.direction.is_out() {
            unit.execute();
            unit.data_len = 0;
            chip.wd_phase = CSR_XFER_DONE | PHS_STATUS;
        }
        unit.start_transfer();
        chip.set_phase(PH_STATUS_SENT);
    }
    chip.data_offset = 0;
    let delay = if unit.direction.is_out() { 1 } else { 0 };
    chip.post_status(chip.wd_phase, delay);
    chip.busy = false;
    true
}

/// Completes a target -> initiator transfer (data in, status, message in).
/// `msg` is set when the host read a message byte by programmed I/O, which
/// leaves the target waiting for NEGATE ACK.
pub(crate) fn transfer_in(chip: &mut Wd33c93, unit: &mut ScsiUnit, msg: bool) -> bool {
    if PHASE_TRACE {
        log::debug!(
            "SCSI I [{:02X}] {}/{} TC={}",
            chip.phase(),
            unit.offset(),
            unit.data_len(),
            chip.tc()
        );
    }

    chip.data_offset = 0;
    let phase = chip.phase();
    if (PH_COMMAND + 6..PH_STATUS).contains(&phase) {
        if unit.offset < unit.data_len {
            chip.wd_phase = CSR_XFER_DONE | data_phase(unit.direction);
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        chip.wd_phase = if chip.tc() != 0 {
            CSR_UNEXP | PHS_STATUS
        } else {
            CSR_XFER_DONE | PHS_STATUS
        };
        chip.set_phase(PH_STATUS);
        unit.start_transfer();
    } else if phase == PH_STATUS || phase == PH_STATUS_SENT {
        chip.set_phase(PH_MSG_IN);
        chip.wd_phase = CSR_XFER_DONE | PHS_MESS_IN;
        unit.start_transfer();
    } else if phase == PH_MSG_IN {
        if msg {
            chip.wd_phase = CSR_MSGIN;
        } else {
            chip.wd_phase = CSR_DISC;
            chip.selected = false;
            unit.start_transfer();
            chip.set_phase(PH_COMPLETE);
        }
    }
    chip.post_status(chip.wd_phase, 1);
    unit.direction = Direction::None;
    true
}

/// Hands the current phase to the DMA engine.
pub(crate) fn do_dma(
    chip: &mut Wd33c93,
    dmac: &mut Dmac,
    mem: &mut dyn DmaBus,
    unit: &mut ScsiUnit,
) -> bool {
    chip.data_avail = DataRequest::Idle;
    if unit.direction == Direction::None {
        log::warn!("WD33C93 DMA but no data");
    }
    dmac.pump(chip, unit, mem)
}

/// Data phase of SELECT-AND-TRANSFER. Returns true when the command went
/// through to the status phase, false when it stopped with a status posted.
fn sel_xfer_data(
    chip: &mut Wd33c93,
    dmac: &mut Dmac,
    mem: &mut dyn DmaBus,
    unit: &mut ScsiUnit,
) -> bool {
    let dir = unit.direction;

    if chip.tc() == 0 && dir != Direction::None {
        if dir.is_in() && unit.data_len == 0 {
            chip.set_phase(PH_STATUS);
            return true;
        }
        // TC is zero but the target has data
        chip.wd_phase = CSR_UNEXP | data_phase(dir);
        chip.post_status(chip.wd_phase, 1);
        return false;
    }

    if dir == Direction::None {
        if chip.tc() != 0 {
            // TC set but nothing to transfer
            chip.wd_phase = CSR_UNEXP | PHS_STATUS;
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        chip.set_phase(PH_STATUS);
        return true;
    }

    if !dmac.can_dma(chip) {
        // Host moves the data by programmed I/O
        chip.wd_phase = CSR_SRV_REQ | data_phase(dir);
        chip.post_status(chip.wd_phase, 1);
        return false;
    }

    if dir.is_in() {
        do_dma(chip, dmac, mem, unit);
        if unit.offset < unit.data_len {
            // Buffer not completely retrieved
            chip.wd_phase = CSR_UNEXP | PHS_DATA_IN;
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        if chip.tc() > 0 {
            // Host asked for more than the target had
            chip.wd_phase = CSR_UNEXP | PHS_STATUS;
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        chip.set_phase(PH_STATUS);
    } else {
        if !do_dma(chip, dmac, mem, unit) {
            chip.wd_phase = CSR_UNEXP | PHS_DATA_OUT;
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        chip.set_phase(PH_STATUS);
        if unit.offset < unit.data_len {
            chip.wd_phase = CSR_UNEXP | PHS_DATA_OUT;
            chip.post_status(chip.wd_phase, 1);
            return false;
        }
        unit.execute();
    }
    true
}

impl ControllerState {
    /// SELECT and SELECT-WITH-ATN
    fn cmd_sel(&mut self, atn: bool) {
        let chip = &mut self.chip;
        let id = chip.destination();
        if PHASE_TRACE {
            log::debug!("{} select{}, ID={}", self.name, if atn { " with atn" } else { "" }, id);
        }
        chip.wd_phase = 0;
        chip.set_phase(PH_IDLE);
        chip.active = Some(id);

        let unit = match self.units[id].as_mut() {
            Some(u) if id != INITIATOR_ID => u,
            _ => {
                chip.post_status(CSR_TIMEOUT, 1000);
                return;
            }
        };
        unit.start_transfer();
        unit.message = MSG_IDENTIFY;
        chip.selected = true;
        chip.post_status(CSR_SELECT, 2);
        if atn {
            chip.set_phase(PH_MSG_OUT);
            chip.post_status(CSR_SRV_REQ | PHS_MESS_OUT, 4);
        } else {
            chip.set_phase(PH_MSG_SENT);
            chip.post_status(CSR_SRV_REQ | PHS_COMMAND, 4);
        }
    }

    /// SELECT-AND-TRANSFER and SELECT-WITH-ATN-AND-TRANSFER: the whole
    /// command from selection to disconnect in one go, with the CDB taken
    /// from the chip's registers.
    fn cmd_sel_xfer(&mut self, atn: bool) {
        let chip = &mut self.chip;
        chip.data_avail = DataRequest::Idle;
        let tmp_tc = chip.tc();
        let id = chip.destination();
        chip.active = Some(id);

        let unit = match self.units[id].as_mut() {
            Some(u) if id != INITIATOR_ID => u,
            _ => {
                chip.post_status(CSR_TIMEOUT, 0);
                chip.set_phase(PH_IDLE);
                return;
            }
        };
        if !chip.selected {
            unit.message = MSG_IDENTIFY;
            chip.selected = true;
            chip.set_phase(PH_MSG_OUT);
        }

        if PHASE_TRACE {
            log::debug!(
                "{} select and transfer{}, ID={} PHASE={:02X} TC={} mode={}",
                self.name,
                if atn { " with atn" } else { "" },
                id,
                chip.phase(),
                tmp_tc,
                chip.dma_mode()
            );
        }

        if chip.phase() <= PH_COMMAND {
            unit.put_buffer(0, 0);
            unit.status = 0;
            let mut cdb = [0u8; CDB_MAX];
            for (i, b) in cdb.iter_mut().enumerate() {
                *b = chip.reg(CDB_1 + i as u8);
            }
            unit.set_cdb(&cdb);
            chip.data_offset = 0;
            for &b in &cdb[..unit.cmd_len] {
                chip.mirror(b);
            }
            unit.analyze();
            chip.set_phase(PH_COMMAND + unit.cmd_len as u8);
            chip.set_tc(0);
        }

        if chip.phase() <= 0x41 {
            chip.set_phase(PH_DATA_SETUP);
        }
        if chip.phase() == PH_DATA_SETUP {
            unit.start_transfer();
            chip.set_phase(PH_DATA);
        }
        if chip.phase() == PH_DATA {
            chip.set_tc(tmp_tc);
            chip.data_offset = 0;
            if !sel_xfer_data(chip, &mut self.dmac, &mut *self.mem, unit) {
                return;
            }
        }

        if chip.phase() == PH_STATUS {
            chip.set_phase(PH_MSG_IN);
            chip.set_reg(TARGET_LUN, unit.status);
            unit.put_buffer(0, unit.status);
        }

        chip.set_phase(PH_COMPLETE);
        chip.post_status(CSR_SEL_XFER_DONE, 2);
        if !chip.control().edi() {
            chip.post_status(CSR_DISC, 4);
        }
        chip.selected = false;
    }

    /// TRANSFER INFO: sets up the current phase for the host to feed or
    /// drain, by DMA if the engine can, otherwise through the DATA register.
    fn cmd_trans_info(&mut self) {
        let chip = &mut self.chip;
        let Some(unit) = chip
            .active
            .and_then(|id| self.units.get_mut(id))
            .and_then(Option::as_mut)
        else {
            log::error!("{} TRANSFER INFO without target", self.name);
            chip.busy = false;
            chip.post_status(CSR_INVALID, 10);
            return;
        };

        if chip.phase() == PH_MSG_SENT {
            chip.set_phase(PH_COMMAND);
            unit.status = 0;
        }
        chip.busy = true;
        if chip.reg(COMMAND) & CMD_SBT != 0 || chip.tc() == 0 {
            chip.set_tc(1);
        }
        chip.data_offset = 0;

        let tc = chip.tc() as usize;
        match chip.phase() {
            PH_COMMAND => unit.prepare_command(tc),
            PH_MSG_OUT => unit.prepare_out(tc),
            PH_DATA => unit.resume_data(),
            PH_STATUS | PH_STATUS_SENT => {
                chip.set_reg(TARGET_LUN, unit.status);
                unit.prepare_status();
            }
            PH_MSG_IN => unit.prepare_in(tc),
            _ => (),
        }

        chip.data_avail = if self.dmac.can_dma(chip) {
            DataRequest::Dma
        } else {
            DataRequest::ProgrammedIo
        };

        if PHASE_TRACE {
            log::debug!(
                "{} transfer info phase={:02X} TC={} dir={:?} data={}/{}",
                self.name,
                chip.phase(),
                chip.tc(),
                unit.direction(),
                unit.offset(),
                unit.data_len()
            );
        }
    }

    /// TRANSLATE ADDRESS: logical block to cylinder/head/sector using the
    /// geometry in the CDB registers. Only the XT driver uses this.
    fn cmd_trans_addr(&mut self) {
        let chip = &mut self.chip;
        let tcyls = (u32::from(chip.reg(T_CYLS_0)) << 8) | u32::from(chip.reg(T_CYLS_1));
        let theads = u32::from(chip.reg(T_HEADS));
        let tsectors = u32::from(chip.reg(T_SECTORS));
        let lba = u32::from_be_bytes([
            chip.reg(L_ADDR_0),
            chip.reg(L_ADDR_1),
            chip.reg(L_ADDR_2),
            chip.reg(L_ADDR_3),
        ]);

        if theads == 0 || tsectors == 0 {
            log::warn!(
                "{} TRANSLATE ADDRESS with zero geometry H={} S={}",
                self.name,
                theads,
                tsectors
            );
            chip.post_status(CSR_BAD_STATUS, 0);
            return;
        }

        let per_cyl = theads * tsectors;
        let cyls = lba / per_cyl;
        let heads = (lba % per_cyl) / tsectors;
        let sectors = (lba % per_cyl) % tsectors;

        chip.set_reg(CYL_0, (cyls >> 8) as u8);
        chip.set_reg(CYL_1, cyls as u8);
        chip.set_reg(HEAD, heads as u8);
        chip.set_reg(SECTOR, sectors as u8);

        // MFM drives have the sector count hardwired, follow the driver
        if self.units[XT_UNIT].is_some() && self.xt.sectors != tsectors as usize {
            log::info!(
                "XT drive sector value patched from {} to {}",
                self.xt.sectors,
                tsectors
            );
            self.xt.sectors = tsectors as usize;
        }

        chip.post_status(
            if cyls >= tcyls {
                CSR_BAD_STATUS
            } else {
                CSR_TRANS_ADDR
            },
            0,
        );
    }

    /// Runs a command written to the COMMAND register
    pub(crate) fn chip_command(&mut self, val: u8) {
        let Some(cmd) = WdCmd::from_u8(val & 0x7f) else {
            self.unknown_command(val);
            return;
        };
        if PHASE_TRACE {
            let name: &str = cmd.into();
            log::debug!("{} command {}", self.name, name);
        }

        match cmd {
            WdCmd::RESET => self.chip.reset(true),
            WdCmd::ABORT => log::info!("{} WD33C93 abort", self.name),
            WdCmd::SEL => self.cmd_sel(false),
            WdCmd::SEL_ATN => self.cmd_sel(true),
            WdCmd::SEL_XFER => self.cmd_sel_xfer(false),
            WdCmd::SEL_ATN_XFER => self.cmd_sel_xfer(true),
            WdCmd::TRANS_INFO => self.cmd_trans_info(),
            WdCmd::TRANS_ADDR => self.cmd_trans_addr(),
            WdCmd::NEGATE_ACK => {
                if self.chip.wd_phase == CSR_MSGIN && self.chip.selected {
                    self.continue_in(false);
                }
            }
            _ => self.unknown_command(val),
        }
    }

    fn unknown_command(&mut self, val: u8) {
        self.chip.busy = false;
        log::warn!(
            "{} WD33C93 unimplemented/unknown command {:02X}",
            self.name,
            val
        );
        self.chip.post_status(CSR_INVALID, 10);
    }

    fn continue_in(&mut self, msg: bool) {
        let Some(id) = self.chip.active else {
            log::error!("{} transfer in without target", self.name);
            return;
        };
        let Some(unit) = self.units.get_mut(id).and_then(Option::as_mut) else {
            log::error!("{} transfer in to missing ID {}", self.name, id);
            return;
        };
        transfer_in(&mut self.chip, unit, msg);
    }

    fn continue_out(&mut self) {
        let Some(id) = self.chip.active else {
            log::error!("{} transfer out without target", self.name);
            return;
        };
        let Some(unit) = self.units.get_mut(id).and_then(Option::as_mut) else {
            log::error!("{} transfer out to missing ID {}", self.name, id);
            return;
        };
        transfer_out(&mut self.chip, unit);
    }

    /// Executes one request on the worker thread
    pub(crate) fn handle_request(&mut self, req: WorkerRequest) {
        let id = usize::from(req.id);
        self.chip.active = self
            .units
            .get(id)
            .is_some_and(Option::is_some)
            .then_some(id);

        match req.kind {
            RequestKind::ChipCommand => self.chip_command(req.payload),
            RequestKind::ContinueIn => self.continue_in(false),
            RequestKind::ContinueOut => self.continue_out(),
            RequestKind::ContinueInMessage => self.continue_in(true),
        }
    }

    fn request(&mut self, kind: RequestKind, payload: u8) {
        let id = self.chip.active.unwrap_or(0) as u8;
        self.outbox.push(WorkerRequest { id, kind, payload });
    }

    fn pio_write(&mut self, val: u8) {
        if self.chip.data_avail == DataRequest::Idle {
            log::error!("{} WD_DATA write without data request", self.name);
            return;
        }
        let chip = &mut self.chip;
        chip.mirror(val);
        chip.decrease_tc();
        chip.data_avail = DataRequest::ProgrammedIo;
        let Some(unit) = chip
            .active
            .and_then(|id| self.units.get_mut(id))
            .and_then(Option::as_mut)
        else {
            log::error!("{} WD_DATA write without target", self.name);
            return;
        };
        if unit.send_byte(val) || chip.tc() == 0 {
            chip.data_avail = DataRequest::Idle;
            self.request(RequestKind::ContinueOut, 0);
        }
    }

    fn pio_read(&mut self) -> u8 {
        if self.chip.data_avail == DataRequest::Idle {
            log::error!("{} WD_DATA read without data request", self.name);
            return 0;
        }
        let chip = &mut self.chip;
        let Some(unit) = chip
            .active
            .and_then(|id| self.units.get_mut(id))
            .and_then(Option::as_mut)
        else {
            log::error!("{} WD_DATA read without target", self.name);
            return 0;
        };
        let (v, end) = unit.receive_byte();
        chip.mirror(v);
        chip.decrease_tc();
        chip.set_reg(DATA, v);
        chip.data_avail = DataRequest::ProgrammedIo;
        if end || chip.tc() == 0 {
            chip.data_avail = DataRequest::Idle;
            self.request(RequestKind::ContinueInMessage, 0);
        }
        v
    }

    /// Host write to the register selected by the address register
    pub(crate) fn chip_put(&mut self, val: u8) {
        let sasr = self.chip.pointer();
        self.chip.write_register(sasr, val);
        if self.chip.mark_used() {
            log::info!("{} WD33C93 in use", self.name);
        }
        match sasr {
            DATA => self.pio_write(val),
            COMMAND => {
                self.chip.busy = true;
                let id = self.chip.destination() as u8;
                self.outbox.push(WorkerRequest {
                    id,
                    kind: RequestKind::ChipCommand,
                    payload: val,
                });
            }
            _ => (),
        }
        self.chip.advance_pointer(true);
    }

    /// Host read of the register selected by the address register
    pub(crate) fn chip_get(&mut self) -> u8 {
        let sasr = self.chip.pointer();
        let mut v = self.chip.reg(sasr);
        match sasr {
            DATA => v = self.pio_read(),
            SCSI_STATUS => {
                self.chip.clear_interrupt();
                if let Some(d) = self.dmac.as_commodore_mut() {
                    d.istr.set_ints(false);
                }
            }
            AUXILIARY_STATUS => v = self.chip.aux_status(),
            _ => (),
        }
        self.chip.advance_pointer(false);
        v
    }
}
