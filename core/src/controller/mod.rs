//! WD33C93 based host adapters
//!
//! A [ControllerInstance] is one physical board: the chip, the board's DMA
//! engine, the A590 XT interface, up to eight attached targets and a worker
//! thread that executes chip commands. Host register accesses and the
//! scan-line tick run on the caller's thread; everything the worker needs is
//! handed over through its request queue.

pub mod autoconfig;
pub mod phase;
pub mod registry;
pub mod window;
pub mod worker;
pub mod xt;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::bus::{Address, BusMember, DmaBus, IrqSource};
use crate::dmac::commodore::{CommodoreDmac, DmacSnapshot};
use crate::dmac::gvp::{GvpHost, GvpSeriesI, GvpSeriesII};
use crate::dmac::Dmac;
use crate::scsi::Direction;
use crate::scsi::disk::ScsiTargetDisk;
use crate::scsi::target::ScsiTarget;
use crate::scsi::unit::ScsiUnit;
use crate::tickable::{Tickable, Ticks};
use crate::wd33c93::{ChipRevision, DataRequest, Wd33c93};

use autoconfig::Autoconfig;
use phase::{INITIATOR_ID, do_dma, transfer_in, transfer_out};
use worker::{QUEUE_DEPTH, RequestSender, WorkerMessage, WorkerRequest};
use xt::{XT_UNIT, XtController, XtSnapshot};

/// Number of SCSI IDs on the bus
pub const SCSI_IDS: usize = 8;

/// Longest [ControllerInstance::wait_idle] waits for the worker
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum BoardKind {
    /// A2091 Zorro II card / A590 sidecar, with the XT interface
    #[strum(to_string = "A2091/A590")]
    A2091,
    /// A3000 mainboard SCSI
    A3000,
    /// CDTV SCSI option
    #[strum(to_string = "CDTV")]
    Cdtv,
    /// GVP Series I (Impact A2000-HC)
    #[strum(to_string = "GVP")]
    GvpSeriesI,
    /// GVP Series II and the A530/G-Force accelerators
    #[strum(to_string = "GVP")]
    GvpSeriesII,
}

impl BoardKind {
    /// How many boards of this kind (or its pool) a system can carry
    pub const fn max_instances(self) -> usize {
        match self {
            Self::A2091 => 2,
            Self::A3000 | Self::Cdtv => 1,
            Self::GvpSeriesI | Self::GvpSeriesII => 2,
        }
    }

    pub const fn is_gvp(self) -> bool {
        matches!(self, Self::GvpSeriesI | Self::GvpSeriesII)
    }

    /// Both kinds count against the same instance limit
    pub const fn shares_pool(self, other: Self) -> bool {
        (self.is_gvp() && other.is_gvp()) || self as u8 == other as u8
    }

    /// Board decodes the A590 XT registers
    pub const fn has_xt(self) -> bool {
        matches!(self, Self::A2091)
    }

    /// The CDTV routes its interrupt outside the shared line
    pub const fn on_shared_irq(self) -> bool {
        !matches!(self, Self::Cdtv)
    }
}

/// Board construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub kind: BoardKind,
    pub revision: ChipRevision,
    /// First revision DMAC with a readable word transfer count (A2091 only)
    pub old_dmac: bool,
    /// Host product of a Series II style GVP DMAC
    pub gvp_host: GvpHost,
    /// Boot ROM image
    pub rom: Option<Vec<u8>>,
}

impl BoardConfig {
    pub fn new(kind: BoardKind) -> Self {
        Self {
            kind,
            revision: ChipRevision::default(),
            old_dmac: false,
            gvp_host: GvpHost::SeriesII,
            rom: None,
        }
    }
}

/// Saved board state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub kind: BoardKind,
    /// Commodore DMAC/SuperDMAC registers
    pub dmac: Option<DmacSnapshot>,
    pub xt: XtSnapshot,
    pub configured: bool,
}

/// Everything the host side and the worker thread share
pub struct ControllerState {
    pub(crate) name: String,
    pub(crate) kind: BoardKind,
    pub(crate) chip: Wd33c93,
    pub(crate) dmac: Dmac,
    pub(crate) xt: XtController,
    pub(crate) units: [Option<ScsiUnit>; SCSI_IDS],
    pub(crate) mem: Box<dyn DmaBus>,
    pub(crate) autoconfig: Autoconfig,
    pub(crate) rom: Option<Vec<u8>>,
    /// Requests produced by the current access, sent once the lock is dropped
    pub(crate) outbox: Vec<WorkerRequest>,
}

impl ControllerState {
    fn new(name: String, config: BoardConfig, mem: Box<dyn DmaBus>) -> Self {
        let dmac = match config.kind {
            BoardKind::A2091 => Dmac::Commodore(CommodoreDmac::new_dmac(config.old_dmac)),
            BoardKind::Cdtv => Dmac::Commodore(CommodoreDmac::new_dmac(false)),
            BoardKind::A3000 => Dmac::Commodore(CommodoreDmac::new_sdmac()),
            BoardKind::GvpSeriesI => Dmac::GvpSeriesI(GvpSeriesI::new()),
            BoardKind::GvpSeriesII => {
                let mut d = GvpSeriesII::new(config.gvp_host);
                d.set_has_rom(config.rom.is_some());
                Dmac::GvpSeriesII(d)
            }
        };
        let autoconfig = match config.kind {
            BoardKind::A2091 => Autoconfig::commodore(config.old_dmac),
            BoardKind::GvpSeriesI => Autoconfig::gvp(false),
            BoardKind::GvpSeriesII => Autoconfig::gvp(true),
            BoardKind::A3000 | BoardKind::Cdtv => Autoconfig::fixed(),
        };

        Self {
            name,
            kind: config.kind,
            chip: Wd33c93::new(config.revision),
            dmac,
            xt: XtController::new(),
            units: std::array::from_fn(|_| None),
            mem,
            autoconfig,
            rom: config.rom,
            outbox: vec![],
        }
    }

    fn reset(&mut self) {
        log::info!("{} reset", self.name);
        self.autoconfig.reset();
        self.chip.reset(false);
        self.dmac.reset();
        if self.kind.has_xt() {
            if let Some(unit) = self.units[XT_UNIT].as_ref() {
                self.xt.reset(unit);
            }
        }
        self.outbox.clear();
    }

    /// Drives a DMA transfer the chip is waiting for
    fn check_dma(&mut self) {
        if self.chip.data_avail != DataRequest::Dma || !self.dmac.is_enabled() {
            return;
        }
        let chip = &mut self.chip;
        let Some(unit) = chip
            .active
            .and_then(|id| self.units.get_mut(id))
            .and_then(Option::as_mut)
        else {
            return;
        };

        do_dma(chip, &mut self.dmac, &mut *self.mem, unit);
        let done = match unit.direction() {
            Direction::ToHost => transfer_in(chip, unit, false),
            Direction::ToTarget | Direction::Command => transfer_out(chip, unit),
            Direction::None => {
                log::error!("{} DMA but no data", self.name);
                true
            }
        };
        if done {
            unit.direction = Direction::None;
            chip.data_avail = DataRequest::Idle;
        } else {
            self.dmac.set_dma_done();
        }
    }

    /// XT transfers ride on the Commodore DMAC directly
    fn check_xt_dma(&mut self) {
        if !self.kind.has_xt() || !self.xt.wants_dma() {
            return;
        }
        if !self.dmac.as_commodore().is_some_and(CommodoreDmac::is_running) {
            return;
        }
        let Some(unit) = self.units[XT_UNIT].as_mut() else {
            return;
        };
        if self.dmac.pump(&mut self.chip, unit, &mut *self.mem) {
            self.xt.command_done(unit);
        }
    }

    fn tick_once(&mut self) {
        self.check_dma();
        self.check_xt_dma();
        self.chip.check_interrupt();
    }

    /// Board interrupt line, folding the chip and XT interrupts into the
    /// DMA engine's status
    fn is_irq(&mut self) -> bool {
        if !self.autoconfig.is_configured() {
            return false;
        }
        let chip_irq = self.chip.interrupt_pending();
        let xt_irq = self.kind.has_xt() && self.xt.irq;
        self.dmac.is_irq_asserted(chip_irq, xt_irq)
    }
}

/// One board and its worker thread
pub struct ControllerInstance {
    name: String,
    kind: BoardKind,
    state: Arc<Mutex<ControllerState>>,
    tx: RequestSender,
    /// Requests sent but not yet completed by the worker
    pending: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl ControllerInstance {
    /// Creates a board and starts its worker. `slot` numbers boards of the
    /// same kind from 0.
    pub fn new(config: BoardConfig, slot: usize, mem: Box<dyn DmaBus>) -> Result<Self> {
        let kind = config.kind;
        let name = if slot == 0 {
            kind.to_string()
        } else {
            format!("{} #{}", kind, slot + 1)
        };

        let state = Arc::new(Mutex::new(ControllerState::new(name.clone(), config, mem)));
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = worker::spawn(&name, Arc::clone(&state), rx, Arc::clone(&pending))?;

        log::info!("{} initialized", name);
        Ok(Self {
            name,
            kind,
            state,
            tx,
            pending,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BoardKind {
        self.kind
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a host access and forwards the requests it produced
    fn access<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let (result, requests) = {
            let mut s = self.lock();
            let result = f(&mut s);
            (result, std::mem::take(&mut s.outbox))
        };
        for req in requests {
            self.send(WorkerMessage::Request(req));
        }
        result
    }

    fn send(&self, msg: WorkerMessage) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(msg).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            log::error!("{} worker is gone, request {:08X} lost", self.name, msg.encode());
        }
    }

    /// Attaches a target. ID 7 is the XT drive, on boards that have one.
    pub fn attach_target(&self, id: usize, target: Box<dyn ScsiTarget>) -> Result<()> {
        if id >= SCSI_IDS {
            bail!("{}: invalid SCSI ID {}", self.name, id);
        }
        if id == INITIATOR_ID && !self.kind.has_xt() {
            bail!("{}: SCSI ID {} is the host adapter", self.name, id);
        }

        let mut s = self.lock();
        let unit = ScsiUnit::new(id, target);
        if id == XT_UNIT {
            s.xt.reset(&unit);
        }
        if s.units[id].replace(unit).is_some() {
            log::info!("{} ID {} replaced", self.name, id);
        }
        Ok(())
    }

    /// Attaches a disk image file
    pub fn attach_hdd_at(&self, id: usize, path: &Path) -> Result<()> {
        let disk = ScsiTargetDisk::load_disk(path)?;
        self.attach_target(id, Box::new(disk))?;
        log::info!("{} ID {}: {}", self.name, id, path.display());
        Ok(())
    }

    /// Removes a target, returns whether one was attached
    pub fn detach_target(&self, id: usize) -> bool {
        let mut s = self.lock();
        let Some(slot) = s.units.get_mut(id) else {
            return false;
        };
        let gone = slot.take().is_some();
        if gone && s.chip.active == Some(id) {
            s.chip.active = None;
        }
        gone
    }

    /// Board reset
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Waits until the worker has processed every request sent so far
    pub fn wait_idle(&self) -> Result<()> {
        let start = Instant::now();
        while self.pending.load(Ordering::Acquire) != 0 {
            if start.elapsed() > IDLE_TIMEOUT {
                bail!("{}: worker did not go idle", self.name);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Stops and joins the worker thread
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.tx.send(WorkerMessage::Shutdown).is_err() {
            log::warn!("{} worker already gone", self.name);
        }
        if worker.join().is_err() {
            log::error!("{} worker panicked", self.name);
        }
        log::info!("{} shut down", self.name);
    }

    /// Autoconfig base address bits 16-23, once configured
    pub fn base(&self) -> Option<u8> {
        self.lock().autoconfig.base()
    }

    pub fn is_configured(&self) -> bool {
        self.lock().autoconfig.is_configured()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let s = self.lock();
        let configured = s.autoconfig.is_configured();
        BoardSnapshot {
            kind: self.kind,
            dmac: s.dmac.as_commodore().map(|d| d.snapshot(configured)),
            xt: s.xt.snapshot(),
            configured,
        }
    }

    pub fn restore(&self, snap: &BoardSnapshot) -> Result<()> {
        if snap.kind != self.kind {
            bail!(
                "{}: snapshot is for a {} board",
                self.name,
                snap.kind
            );
        }
        let mut s = self.lock();
        if let (Some(d), Some(ds)) = (s.dmac.as_commodore_mut(), snap.dmac.as_ref()) {
            d.restore(ds);
        }
        s.xt.restore(&snap.xt);
        s.autoconfig.set_configured(snap.configured);
        Ok(())
    }
}

impl BusMember<Address> for ControllerInstance {
    fn read(&mut self, addr: Address) -> Option<u8> {
        Some(self.access(|s| s.bus_read(addr)))
    }

    fn write(&mut self, addr: Address, val: u8) -> Option<()> {
        self.access(|s| s.bus_write(addr, val));
        Some(())
    }

    fn read_word(&mut self, addr: Address) -> Option<u16> {
        Some(self.access(|s| s.bus_read_word(addr)))
    }

    fn write_word(&mut self, addr: Address, val: u16) -> Option<()> {
        self.access(|s| s.bus_write_word(addr, val));
        Some(())
    }

    fn write_long(&mut self, addr: Address, val: u32) -> Option<()> {
        self.access(|s| s.bus_write_long(addr, val));
        Some(())
    }
}

impl Tickable for ControllerInstance {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        let mut s = self.lock();
        for _ in 0..ticks {
            s.tick_once();
        }
        Ok(ticks)
    }
}

impl IrqSource for ControllerInstance {
    fn get_irq(&mut self) -> bool {
        self.lock().is_irq()
    }
}

impl Drop for ControllerInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testbus::Testbus;
    use crate::dmac::commodore::Cntr;
    use crate::scsi::disk::DISK_BLOCKSIZE;
    use crate::scsi::{STATUS_CHECK_CONDITION, STATUS_GOOD};
    use crate::wd33c93::regs::*;
    use strum::IntoEnumIterator;

    const BLOCKS: usize = 64;

    fn disk() -> Box<ScsiTargetDisk> {
        let img = (0..BLOCKS * DISK_BLOCKSIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        Box::new(ScsiTargetDisk::from_bytes(img).unwrap())
    }

    fn board(kind: BoardKind) -> (ControllerInstance, Testbus) {
        let mem = Testbus::new(0xFF_FFFF);
        let b = ControllerInstance::new(BoardConfig::new(kind), 0, Box::new(mem.clone())).unwrap();
        (b, mem)
    }

    /// WD33C93 address and data register byte addresses
    fn wd_ports(kind: BoardKind) -> (Address, Address) {
        match kind {
            BoardKind::A2091 | BoardKind::Cdtv => (0x91, 0x93),
            BoardKind::A3000 => (0x41, 0x43),
            BoardKind::GvpSeriesI => (0x60, 0x62),
            BoardKind::GvpSeriesII => (0x61, 0x63),
        }
    }

    fn wd_write(b: &mut ControllerInstance, reg: u8, val: u8) {
        let (sasr, scmd) = wd_ports(b.kind());
        b.write(sasr, reg).unwrap();
        b.write(scmd, val).unwrap();
    }

    fn wd_read(b: &mut ControllerInstance, reg: u8) -> u8 {
        let (sasr, scmd) = wd_ports(b.kind());
        b.write(sasr, reg).unwrap();
        b.read(scmd).unwrap()
    }

    fn wd_set_tc(b: &mut ControllerInstance, tc: u32) {
        wd_write(b, TRANSFER_COUNT_MSB, (tc >> 16) as u8);
        wd_write(b, TRANSFER_COUNT, (tc >> 8) as u8);
        wd_write(b, TRANSFER_COUNT_LSB, tc as u8);
    }

    /// Ticks until the chip raises INT and acknowledges by reading SCSI
    /// STATUS
    fn next_status(b: &mut ControllerInstance) -> Option<u8> {
        b.wait_idle().unwrap();
        for _ in 0..2000 {
            b.tick(1).unwrap();
            if b.lock().chip.interrupt_pending() {
                return Some(wd_read(b, SCSI_STATUS));
            }
        }
        None
    }

    fn configure(b: &mut ControllerInstance) {
        b.write(0x48, 0xe9).unwrap();
        assert!(b.is_configured());
    }

    #[test]
    fn names() {
        let mem = Testbus::new(0xFF_FFFF);
        let b = ControllerInstance::new(BoardConfig::new(BoardKind::A2091), 1, Box::new(mem))
            .unwrap();
        assert_eq!(b.name(), "A2091/A590 #2");
        let (g, _) = board(BoardKind::GvpSeriesII);
        assert_eq!(g.name(), "GVP");
    }

    #[test]
    fn pools() {
        let total: usize = BoardKind::iter()
            .filter(|k| *k != BoardKind::GvpSeriesI)
            .map(BoardKind::max_instances)
            .sum();
        assert_eq!(total, 6);
        assert!(BoardKind::GvpSeriesI.shares_pool(BoardKind::GvpSeriesII));
        assert!(BoardKind::A2091.shares_pool(BoardKind::A2091));
        assert!(!BoardKind::A2091.shares_pool(BoardKind::A3000));
        assert!(!BoardKind::Cdtv.on_shared_irq());
    }

    #[test]
    fn attach_rules() {
        let (a2091, _) = board(BoardKind::A2091);
        let (a3000, _) = board(BoardKind::A3000);
        assert!(a2091.attach_target(3, disk()).is_ok());
        assert!(a2091.attach_target(7, disk()).is_ok());
        assert!(a3000.attach_target(7, disk()).is_err());
        assert!(a3000.attach_target(8, disk()).is_err());
        assert!(a2091.attach_hdd_at(2, Path::new("/nonexistent/disk.hda")).is_err());

        assert!(a2091.detach_target(3));
        assert!(!a2091.detach_target(3));
        assert!(!a2091.detach_target(42));
    }

    #[test]
    fn select_missing_target_times_out() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(1, disk()).unwrap();

        for id in [0, 7] {
            wd_write(&mut b, DESTINATION_ID, id);
            wd_write(&mut b, COMMAND, WdCmd::SEL as u8);
            b.wait_idle().unwrap();
            // Not before the selection timeout
            b.tick(900).unwrap();
            assert!(!b.lock().chip.interrupt_pending());
            assert_eq!(next_status(&mut b), Some(CSR_TIMEOUT));
        }
    }

    #[test]
    fn select_present_target() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(1, disk()).unwrap();
        wd_write(&mut b, DESTINATION_ID, 1);
        wd_write(&mut b, COMMAND, WdCmd::SEL_ATN as u8);
        assert_eq!(next_status(&mut b), Some(CSR_SELECT));
        assert_eq!(next_status(&mut b), Some(CSR_SRV_REQ | PHS_MESS_OUT));
    }

    #[test]
    fn unknown_command_is_invalid() {
        let (mut b, _) = board(BoardKind::A3000);
        wd_write(&mut b, COMMAND, 0x7f);
        assert_eq!(next_status(&mut b), Some(CSR_INVALID));
        assert_eq!(b.lock().chip.aux_status() & 0x20, 0);
    }

    /// A2091 with ID 3 attached, bus DMA into 0x10000, then
    /// SELECT-AND-TRANSFER of `cdb`
    fn a2091_sel_xfer(tc: u32, cdb: &[u8]) -> (ControllerInstance, Testbus) {
        let (mut b, mem) = board(BoardKind::A2091);
        b.attach_target(3, disk()).unwrap();
        configure(&mut b);

        b.write_word(0x42, Cntr::default().with_inten(true).0.into())
            .unwrap();
        b.write_word(0x84, 0x0001).unwrap();
        b.write_word(0x86, 0x0000).unwrap();
        b.write_word(0xe0, 0).unwrap();

        // DMA mode 4 (bus)
        wd_write(&mut b, CONTROL, 0x80);
        wd_set_tc(&mut b, tc);
        for (i, &v) in cdb.iter().enumerate() {
            wd_write(&mut b, CDB_1 + i as u8, v);
        }
        wd_write(&mut b, DESTINATION_ID, 3);
        wd_write(&mut b, COMMAND, WdCmd::SEL_XFER as u8);
        (b, mem)
    }

    /// Selects `id` and feeds `cdb` through TRANSFER INFO and the data
    /// register. Returns the status that ends the command phase.
    fn pio_command(b: &mut ControllerInstance, id: u8, cdb: &[u8]) -> Option<u8> {
        wd_write(b, DESTINATION_ID, id);
        wd_write(b, COMMAND, WdCmd::SEL as u8);
        assert_eq!(next_status(b), Some(CSR_SELECT));
        assert_eq!(next_status(b), Some(CSR_SRV_REQ | PHS_COMMAND));

        wd_set_tc(b, cdb.len() as u32);
        wd_write(b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        for &v in cdb {
            wd_write(b, DATA, v);
        }
        next_status(b)
    }

    /// TRANSFER INFO for `len` bytes, drained through the data register
    fn pio_read_phase(b: &mut ControllerInstance, len: usize) -> Vec<u8> {
        wd_set_tc(b, len as u32);
        wd_write(b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        (0..len).map(|_| wd_read(b, DATA)).collect()
    }

    #[test]
    fn sel_xfer_read_by_dma() {
        // READ(6) block 2
        let (mut b, mem) = a2091_sel_xfer(DISK_BLOCKSIZE as u32, &[0x08, 0, 0, 2, 1, 0]);
        b.wait_idle().unwrap();

        let expect: Vec<u8> = (2 * DISK_BLOCKSIZE..3 * DISK_BLOCKSIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        assert_eq!(mem.read_block(0x10000, DISK_BLOCKSIZE), expect);

        b.tick(2).unwrap();
        assert!(b.get_irq());
        assert_eq!(wd_read(&mut b, SCSI_STATUS), CSR_SEL_XFER_DONE);
        assert_eq!(wd_read(&mut b, TARGET_LUN), 0);
        assert_eq!(next_status(&mut b), Some(CSR_DISC));
        assert_eq!(b.lock().chip.phase(), phase::PH_COMPLETE);
        assert_eq!(b.lock().chip.tc(), 0);
    }

    #[test]
    fn pio_command_and_data() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(2, disk()).unwrap();

        wd_write(&mut b, DESTINATION_ID, 2);
        wd_write(&mut b, COMMAND, WdCmd::SEL as u8);
        assert_eq!(next_status(&mut b), Some(CSR_SELECT));
        assert_eq!(next_status(&mut b), Some(CSR_SRV_REQ | PHS_COMMAND));

        // Command phase through the data register
        wd_set_tc(&mut b, 6);
        wd_write(&mut b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        assert_ne!(b.lock().chip.aux_status() & 0x01, 0);
        for v in [0x08, 0, 0, 1, 1, 0] {
            wd_write(&mut b, DATA, v);
        }
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_DATA_IN));

        wd_set_tc(&mut b, DISK_BLOCKSIZE as u32);
        wd_write(&mut b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        let got: Vec<u8> = (0..DISK_BLOCKSIZE).map(|_| wd_read(&mut b, DATA)).collect();
        let expect: Vec<u8> = (DISK_BLOCKSIZE..2 * DISK_BLOCKSIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        assert_eq!(got, expect);
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_STATUS));
    }

    #[test]
    fn pio_write_then_read_back() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(2, disk()).unwrap();
        let data: Vec<u8> = (0..DISK_BLOCKSIZE).map(|i| i as u8 ^ 0xa5).collect();

        // WRITE(6) block 5
        assert_eq!(
            pio_command(&mut b, 2, &[0x0A, 0, 0, 5, 1, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_OUT)
        );
        wd_set_tc(&mut b, DISK_BLOCKSIZE as u32);
        wd_write(&mut b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        for &v in &data {
            wd_write(&mut b, DATA, v);
        }
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_STATUS));
        assert_eq!(b.lock().units[2].as_ref().unwrap().status(), STATUS_GOOD);

        assert_eq!(
            pio_command(&mut b, 2, &[0x08, 0, 0, 5, 1, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_IN)
        );
        assert_eq!(pio_read_phase(&mut b, DISK_BLOCKSIZE), data);
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_STATUS));
    }

    #[test]
    fn sel_xfer_write_by_dma() {
        let (mut b, mem) = board(BoardKind::A2091);
        b.attach_target(3, disk()).unwrap();
        configure(&mut b);
        let data: Vec<u8> = (0..DISK_BLOCKSIZE).map(|i| (i * 7) as u8).collect();
        mem.fill(0x10000, &data);

        b.write_word(0x84, 0x0001).unwrap();
        b.write_word(0x86, 0x0000).unwrap();
        b.write_word(0xe0, 0).unwrap();
        wd_write(&mut b, CONTROL, 0x80);
        wd_set_tc(&mut b, DISK_BLOCKSIZE as u32);
        // WRITE(6) block 9
        for (i, &v) in [0x0A, 0, 0, 9, 1, 0].iter().enumerate() {
            wd_write(&mut b, CDB_1 + i as u8, v);
        }
        wd_write(&mut b, DESTINATION_ID, 3);
        wd_write(&mut b, COMMAND, WdCmd::SEL_XFER as u8);
        assert_eq!(next_status(&mut b), Some(CSR_SEL_XFER_DONE));
        assert_eq!(wd_read(&mut b, TARGET_LUN), STATUS_GOOD);
        assert_eq!(next_status(&mut b), Some(CSR_DISC));

        // Back through the data register
        wd_write(&mut b, CONTROL, 0);
        assert_eq!(
            pio_command(&mut b, 3, &[0x08, 0, 0, 9, 1, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_IN)
        );
        assert_eq!(pio_read_phase(&mut b, DISK_BLOCKSIZE), data);
    }

    #[test]
    fn sel_xfer_count_mismatch() {
        // Host wants two blocks, target has one
        let (mut b, mem) = a2091_sel_xfer(2 * DISK_BLOCKSIZE as u32, &[0x08, 0, 0, 0, 1, 0]);
        assert_eq!(next_status(&mut b), Some(CSR_UNEXP | PHS_STATUS));
        assert_eq!(mem.peek(0x10001), 1);

        // No count but the target has data
        let (mut b, _) = a2091_sel_xfer(0, &[0x08, 0, 0, 0, 1, 0]);
        assert_eq!(next_status(&mut b), Some(CSR_UNEXP | PHS_DATA_IN));
        assert_eq!(b.lock().units[3].as_ref().unwrap().offset(), 0);

        // Count set for a command without data
        let (mut b, _) = a2091_sel_xfer(16, &[0x00, 0, 0, 0, 0, 0]);
        assert_eq!(next_status(&mut b), Some(CSR_UNEXP | PHS_STATUS));
    }

    #[test]
    fn status_message_and_negate_ack() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(4, disk()).unwrap();

        // TEST UNIT READY, no data phase
        assert_eq!(
            pio_command(&mut b, 4, &[0x00, 0, 0, 0, 0, 0]),
            Some(CSR_XFER_DONE | PHS_STATUS)
        );
        assert_eq!(pio_read_phase(&mut b, 1), [STATUS_GOOD]);
        assert_eq!(wd_read(&mut b, TARGET_LUN), STATUS_GOOD);
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_MESS_IN));

        // Message byte read by programmed I/O leaves ACK asserted
        assert_eq!(pio_read_phase(&mut b, 1), [0]);
        assert_eq!(next_status(&mut b), Some(CSR_MSGIN));
        assert!(b.lock().chip.selected);

        wd_write(&mut b, COMMAND, WdCmd::NEGATE_ACK as u8);
        assert_eq!(next_status(&mut b), Some(CSR_DISC));
        let s = b.lock();
        assert!(!s.chip.selected);
        assert_eq!(s.chip.phase(), phase::PH_COMPLETE);
    }

    #[test]
    fn request_sense_after_check_condition() {
        let (mut b, _) = board(BoardKind::A3000);
        b.attach_target(2, disk()).unwrap();

        // Unknown opcode latches ILLEGAL REQUEST
        assert_eq!(
            pio_command(&mut b, 2, &[0x06, 0, 0, 0, 0, 0]),
            Some(CSR_XFER_DONE | PHS_STATUS)
        );
        assert_eq!(
            b.lock().units[2].as_ref().unwrap().status(),
            STATUS_CHECK_CONDITION
        );

        // The data phase hands out the sense taken when the command ran
        assert_eq!(
            pio_command(&mut b, 2, &[0x03, 0, 0, 0, 14, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_IN)
        );
        let sense = pio_read_phase(&mut b, 14);
        assert_eq!(sense[0], 0x70);
        assert_eq!(sense[2], 0x05);
        assert_eq!(sense[12..14], [0x20, 0x00]);
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_STATUS));
    }

    #[test]
    fn gvp_series2_trans_info_dma() {
        let (mut b, mem) = board(BoardKind::GvpSeriesII);
        b.attach_target(1, disk()).unwrap();
        configure(&mut b);
        b.write_word(0x70, 0x0003).unwrap();
        b.write_word(0x72, 0x0200).unwrap();
        b.write_word(0x76, 0).unwrap();

        assert_eq!(
            pio_command(&mut b, 1, &[0x08, 0, 0, 4, 1, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_IN)
        );

        // Data phase by DMA, driven from the tick
        wd_write(&mut b, CONTROL, 0x80);
        wd_set_tc(&mut b, DISK_BLOCKSIZE as u32);
        wd_write(&mut b, COMMAND, WdCmd::TRANS_INFO as u8);
        b.wait_idle().unwrap();
        assert_eq!(b.lock().chip.data_avail, DataRequest::Dma);
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_STATUS));

        let expect: Vec<u8> = (4 * DISK_BLOCKSIZE..5 * DISK_BLOCKSIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        assert_eq!(mem.read_block(0x3_0200, DISK_BLOCKSIZE), expect);
        assert_eq!(b.read_word(0x72), Some(0x0200 + DISK_BLOCKSIZE as u16));
    }

    #[test]
    fn gvp_series2_direction_mismatch() {
        let (mut b, mem) = board(BoardKind::GvpSeriesII);
        b.attach_target(1, disk()).unwrap();
        configure(&mut b);
        b.write_word(0x70, 0x0003).unwrap();
        // Memory -> target, but the command reads
        b.write_word(0x40, 0x0010).unwrap();
        b.write_word(0x76, 0).unwrap();

        assert_eq!(
            pio_command(&mut b, 1, &[0x08, 0, 0, 4, 1, 0]),
            Some(CSR_XFER_DONE | PHS_DATA_IN)
        );
        wd_write(&mut b, CONTROL, 0x80);
        wd_set_tc(&mut b, DISK_BLOCKSIZE as u32);
        wd_write(&mut b, COMMAND, WdCmd::TRANS_INFO as u8);
        mem.reset_trace();
        assert_eq!(next_status(&mut b), Some(CSR_XFER_DONE | PHS_DATA_IN));
        assert!(mem.get_trace().is_empty());
        let s = b.lock();
        assert_eq!(s.units[1].as_ref().unwrap().offset(), 0);
        assert_eq!(s.chip.tc(), DISK_BLOCKSIZE as u32);
    }

    #[test]
    fn a2091_window() {
        let (mut b, _) = board(BoardKind::A2091);
        // Unconfigured: autoconfig image, writes dropped
        assert_eq!(b.read(0x00), Some(0xd0));
        b.write_word(0x42, 0x10).unwrap();
        b.write(0x43, 0x10).unwrap();
        configure(&mut b);
        assert_eq!(b.base(), Some(0xe9));
        assert_eq!(b.read_word(0x42), Some(0));

        b.write_word(0x42, 0x10).unwrap();
        assert_eq!(b.read_word(0x42), Some(0x10));
        // Byte write to the odd half of a word register
        b.write(0x43, 0x18).unwrap();
        assert_eq!(b.read(0x43), Some(0x18));
        assert_eq!(b.read(0x42), Some(0));

        // Window repeats every 64K, no ROM reads 0
        assert_eq!(b.read_word(0x1_0042), Some(0x18));
        assert_eq!(b.read(0x2000), Some(0));
        assert_eq!(b.read_word(0x2010), Some(0));
        assert_eq!(b.read_word(0xc2), Some(0xffff));
        // New DMAC hides WTC
        b.write_word(0x82, 0x1234).unwrap();
        assert_eq!(b.read_word(0x82), Some(0));
        // No XT drive
        assert_eq!(b.read(0xa3), Some(0xff));
    }

    #[test]
    fn old_dmac_wtc() {
        let mem = Testbus::new(0xFF_FFFF);
        let mut config = BoardConfig::new(BoardKind::A2091);
        config.old_dmac = true;
        let mut b = ControllerInstance::new(config, 0, Box::new(mem)).unwrap();
        configure(&mut b);
        b.write_long(0x80, 0x0001_2345).unwrap();
        assert_eq!(b.read_word(0x80), Some(0x0001));
        assert_eq!(b.read_word(0x82), Some(0x2345));
    }

    #[test]
    fn rom_mapping() {
        let mem = Testbus::new(0xFF_FFFF);
        let mut config = BoardConfig::new(BoardKind::A2091);
        config.rom = Some((0..=255).collect());
        let mut b = ControllerInstance::new(config, 0, Box::new(mem)).unwrap();
        assert_eq!(b.read(0x2000), Some(0x00));
        assert_eq!(b.read(0x2005), Some(0x05));
        assert_eq!(b.read_word(0x2010), Some(0x1011));
    }

    #[test]
    fn sdmac_window() {
        let (mut b, _) = board(BoardKind::A3000);
        assert!(b.is_configured());
        b.write_word(0x0a, 0x04).unwrap();
        assert_eq!(b.read_word(0x0a), Some(0x04));
        b.write_word(0x0c, 0x0012).unwrap();
        b.write_word(0x0e, 0x3457).unwrap();
        assert_eq!(b.read_word(0x0c), Some(0x0012));
        assert_eq!(b.read_word(0x0e), Some(0x3456));
        assert_eq!(b.read_word(0x04), Some(0xffff));
        assert_eq!(b.read_word(0x50), Some(0xffff));

        // FE_FLG while idle
        assert_eq!(b.read_word(0x1e), Some(0x01));

        // Long write to 0x40 selects the chip register
        b.write_long(0x40, COMMAND_PHASE.into()).unwrap();
        assert_eq!(b.lock().chip.pointer(), COMMAND_PHASE);
        b.write(0x49, OWN_ID).unwrap();
        b.write(0x47, 0x07).unwrap();
        assert_eq!(b.lock().chip.reg(OWN_ID), 0x07);
    }

    #[test]
    fn sdmac_stop_flushes() {
        let (mut b, _) = board(BoardKind::A3000);
        b.read_word(0x12).unwrap();
        assert!(b.lock().dmac.as_commodore().unwrap().is_active());
        assert_eq!(b.read_word(0x3e), Some(0));
        let s = b.lock();
        let d = s.dmac.as_commodore().unwrap();
        assert!(!d.is_active());
        assert!(d.istr.fe_flg());
    }

    #[test]
    fn gvp_series2_window() {
        let (mut b, _) = board(BoardKind::GvpSeriesII);
        assert_eq!(b.read(0x61), Some(0xff));
        assert_eq!(b.read_word(0x68), Some(0xffff));
        // Version byte in the odd ROM bytes, no ROM
        assert_eq!(b.read(0x8001), Some(0xf8));
        assert_eq!(b.read(0x8000), Some(0));

        configure(&mut b);
        b.write_word(0x70, 0x0012).unwrap();
        b.write_word(0x72, 0x3456).unwrap();
        assert_eq!(b.read_word(0x70), Some(0x0012));
        assert_eq!(b.read_word(0x72), Some(0x3456));
        b.write_word(0x68, 0x0003).unwrap();
        assert_eq!(b.read_word(0x68), Some(0x0003));
        b.write(0x61, OWN_ID).unwrap();
        b.write(0x63, 0x07).unwrap();
        assert_eq!(b.lock().chip.reg(OWN_ID), 0x07);
        // Unknown registers read 0 once configured
        assert_eq!(b.read(0x50), Some(0));
    }

    #[test]
    fn gvp_series1_sram() {
        let (mut b, _) = board(BoardKind::GvpSeriesI);
        configure(&mut b);
        b.write(0x68, 0).unwrap();
        b.write_word(0x4000, 0x1234).unwrap();
        b.write(0x4000, 0x56).unwrap();
        b.write(0x68, 0).unwrap();
        assert_eq!(b.read_word(0x4000), Some(0x1234));
        assert_eq!(b.read(0x7ffe), Some(0x56));
    }

    #[test]
    fn gvp_series1_interrupt() {
        let (mut b, _) = board(BoardKind::GvpSeriesI);
        configure(&mut b);
        wd_write(&mut b, COMMAND, 0x7f);
        assert!(!b.get_irq());
        b.wait_idle().unwrap();
        b.tick(20).unwrap();
        assert_eq!(b.read(0x3e), Some(0x80));
        // Interrupt enable
        assert!(!b.get_irq());
        b.write(0x6c, 0x08).unwrap();
        assert!(b.get_irq());
    }

    #[test]
    fn xt_read_by_dma() {
        let (mut b, mem) = board(BoardKind::A2091);
        b.attach_target(7, disk()).unwrap();
        configure(&mut b);
        b.write_word(0x42, Cntr::default().with_inten(true).0.into())
            .unwrap();
        b.write_word(0x84, 0x0002).unwrap();
        b.write_word(0x86, 0x0000).unwrap();

        // DMA mode, interrupts on
        b.write(0xa7, 0x03).unwrap();
        // head 0, sector 1, cylinder 0, 1 block
        for v in [0x08, 0, 1, 0, 1, 0] {
            b.write(0xa1, v).unwrap();
        }
        b.wait_idle().unwrap();
        assert_ne!(b.read(0xa3).unwrap() & 0x02, 0);
        assert!(!b.get_irq());

        b.write_word(0xe0, 0).unwrap();
        b.tick(1).unwrap();
        let expect: Vec<u8> = (DISK_BLOCKSIZE..2 * DISK_BLOCKSIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        assert_eq!(mem.read_block(0x20000, DISK_BLOCKSIZE), expect);
        assert_eq!(b.read(0xa3), Some(0x29));
        assert!(b.get_irq());
    }

    #[test]
    fn unconfigured_board_is_quiet() {
        let (mut b, _) = board(BoardKind::A2091);
        b.lock().chip.deliver_status(CSR_DISC);
        b.lock().dmac.as_commodore_mut().unwrap().cntr = 0x10;
        assert!(!b.get_irq());
        configure(&mut b);
        assert!(b.get_irq());
    }

    #[test]
    fn reset_returns_to_autoconfig() {
        let (mut b, _) = board(BoardKind::A2091);
        configure(&mut b);
        wd_write(&mut b, CONTROL, 0x80);
        b.reset();
        assert!(!b.is_configured());
        assert_eq!(b.lock().chip.reg(CONTROL), 0);
    }

    #[test]
    fn snapshot_roundtrip() {
        let (mut b, _) = board(BoardKind::A2091);
        b.attach_target(7, disk()).unwrap();
        configure(&mut b);
        b.write_word(0x42, 0x14).unwrap();
        b.write_word(0x84, 0x0012).unwrap();
        b.write_word(0x86, 0x3456).unwrap();

        let snap = b.snapshot();
        assert!(snap.configured);
        let json = serde_json::to_string(&snap).unwrap();
        let back: BoardSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);

        let (other, _) = board(BoardKind::A2091);
        other.attach_target(7, disk()).unwrap();
        other.restore(&back).unwrap();
        assert!(other.is_configured());
        let s = other.lock();
        let d = s.dmac.as_commodore().unwrap();
        assert_eq!(d.cntr, 0x14);
        assert_eq!(d.acr.0, 0x0012_3456);
        drop(s);

        let (a3000, _) = board(BoardKind::A3000);
        assert!(a3000.restore(&back).is_err());
    }

    #[test]
    fn shutdown_joins_worker() {
        let (mut b, _) = board(BoardKind::A3000);
        b.shutdown();
        // Requests after shutdown are dropped
        wd_write(&mut b, COMMAND, WdCmd::RESET as u8);
        b.wait_idle().unwrap();
        b.shutdown();
    }
}
