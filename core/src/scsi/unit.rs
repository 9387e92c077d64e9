//! Transfer handle for one SCSI ID: command block, data buffer and the
//! byte-level send/receive primitives the chip and DMA engines use.

use crate::scsi::target::ScsiTarget;
use crate::scsi::{Direction, STATUS_CHECK_CONDITION, STATUS_GOOD, ScsiCmdResult, scsi_cmd_len};

const UNIT_TRACE: bool = false;

/// Maximum command descriptor block length
pub const CDB_MAX: usize = 16;

/// IDENTIFY message, sent implicitly on selection
pub const MSG_IDENTIFY: u8 = 0x80;

pub struct ScsiUnit {
    id: usize,
    target: Box<dyn ScsiTarget>,

    /// Command descriptor block
    pub(crate) cmd: [u8; CDB_MAX],
    pub(crate) cmd_len: usize,

    /// Data phase buffer (data in, data out, status and messages)
    pub(crate) buffer: Vec<u8>,
    pub(crate) data_len: usize,
    pub(crate) offset: usize,
    pub(crate) direction: Direction,

    /// Data phase set up by the last [ScsiUnit::analyze]
    result_dir: Direction,
    result_len: usize,

    /// Status byte of the last executed command
    pub(crate) status: u8,

    /// Last message received from the initiator
    pub(crate) message: u8,
}

impl ScsiUnit {
    pub fn new(id: usize, target: Box<dyn ScsiTarget>) -> Self {
        Self {
            id,
            target,
            cmd: [0; CDB_MAX],
            cmd_len: 0,
            buffer: vec![],
            data_len: 0,
            offset: 0,
            direction: Direction::None,
            result_dir: Direction::None,
            result_len: 0,
            status: STATUS_GOOD,
            message: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn target(&self) -> &dyn ScsiTarget {
        self.target.as_ref()
    }

    pub fn target_mut(&mut self) -> &mut dyn ScsiTarget {
        self.target.as_mut()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn message(&self) -> u8 {
        self.message
    }

    /// Bytes still expected in the current data phase
    pub fn remaining(&self) -> usize {
        self.data_len.saturating_sub(self.offset)
    }

    /// Loads a command descriptor block
    pub fn set_cdb(&mut self, cdb: &[u8]) {
        let len = cdb.len().min(CDB_MAX);
        self.cmd = [0; CDB_MAX];
        self.cmd[..len].copy_from_slice(&cdb[..len]);
        self.cmd_len = scsi_cmd_len(self.cmd[0]);
    }

    /// Runs the command in the CDB against the target up to the point where
    /// data would be exchanged and sets up the data phase accordingly.
    ///
    /// Reads complete here, the data in phase is served from the buffer.
    /// Writes only size the buffer and are completed by [Self::execute].
    pub fn analyze(&mut self) {
        self.cmd_len = scsi_cmd_len(self.cmd[0]);
        let cmd = self.cmd;
        let result = self.target.cmd(&cmd[..self.cmd_len], None);

        if UNIT_TRACE {
            log::debug!("ID {} analyze: {:02X?}", self.id, &cmd[..self.cmd_len]);
        }

        match result {
            Ok(ScsiCmdResult::DataIn(data)) => {
                self.status = STATUS_GOOD;
                self.data_len = data.len();
                self.buffer = data;
                self.direction = if self.data_len == 0 {
                    Direction::None
                } else {
                    Direction::ToHost
                };
            }
            Ok(ScsiCmdResult::DataOut(len)) => {
                self.status = STATUS_GOOD;
                if self.buffer.len() < len {
                    self.buffer.resize(len, 0);
                }
                self.data_len = len;
                self.direction = if len == 0 {
                    Direction::None
                } else {
                    Direction::ToTarget
                };
            }
            Ok(ScsiCmdResult::Status(status)) => {
                self.status = status;
                self.data_len = 0;
                self.direction = Direction::None;
            }
            Err(e) => {
                log::error!("ID {} command {:02X} error: {:#}", self.id, cmd[0], e);
                self.status = STATUS_CHECK_CONDITION;
                self.data_len = 0;
                self.direction = Direction::None;
            }
        }
        self.result_dir = self.direction;
        self.result_len = self.data_len;
    }

    /// Sets the data phase of the analyzed command up again without running
    /// it a second time. The byte pointer is left where it is.
    pub fn resume_data(&mut self) {
        self.direction = self.result_dir;
        self.data_len = self.result_len;
    }

    /// Completes a command once its data out phase has been filled.
    pub fn execute(&mut self) {
        if self.direction != Direction::ToTarget {
            return;
        }
        let cmd = self.cmd;
        let len = self.data_len.min(self.buffer.len());
        match self.target.cmd(&cmd[..self.cmd_len], Some(&self.buffer[..len])) {
            Ok(ScsiCmdResult::Status(status)) => self.status = status,
            Ok(_) => {
                log::error!(
                    "ID {} command {:02X} wants another data phase",
                    self.id,
                    cmd[0]
                );
                self.status = STATUS_CHECK_CONDITION;
            }
            Err(e) => {
                log::error!("ID {} command {:02X} error: {:#}", self.id, cmd[0], e);
                self.status = STATUS_CHECK_CONDITION;
            }
        }
    }

    /// Rewinds the byte pointer for the next phase
    pub fn start_transfer(&mut self) {
        self.offset = 0;
    }

    /// Sets up a command phase of `len` bytes
    pub(crate) fn prepare_command(&mut self, len: usize) {
        self.direction = Direction::Command;
        self.cmd_len = len;
        self.data_len = len;
    }

    /// Sets up an initiator -> target phase of `len` bytes (message out)
    pub(crate) fn prepare_out(&mut self, len: usize) {
        self.direction = Direction::ToTarget;
        self.data_len = len;
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }

    /// Sets up a target -> initiator phase of `len` bytes, served from
    /// whatever the buffer currently holds
    pub(crate) fn prepare_in(&mut self, len: usize) {
        self.direction = Direction::ToHost;
        self.data_len = len;
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }

    /// Sets up the single byte status phase
    pub(crate) fn prepare_status(&mut self) {
        if self.buffer.is_empty() {
            self.buffer.push(0);
        }
        self.buffer[0] = self.status;
        self.direction = Direction::ToHost;
        self.data_len = 1;
    }

    /// Stores a byte in the data buffer at an explicit position, growing it
    pub(crate) fn put_buffer(&mut self, pos: usize, val: u8) {
        if self.buffer.len() <= pos {
            self.buffer.resize(pos + 1, 0);
        }
        self.buffer[pos] = val;
    }

    pub(crate) fn get_buffer(&self, pos: usize) -> u8 {
        self.buffer.get(pos).copied().unwrap_or(0)
    }

    /// Sends one byte from the initiator.
    ///
    /// Returns true when the target has everything it wanted for this phase.
    pub fn send_byte(&mut self, val: u8) -> bool {
        match self.direction {
            Direction::Command => {
                if self.offset >= CDB_MAX {
                    return true;
                }
                self.cmd[self.offset] = val;
                self.offset += 1;
                if self.offset == self.cmd_len {
                    return true;
                }
            }
            Direction::ToTarget => {
                let pos = self.offset;
                self.put_buffer(pos, val);
                self.offset += 1;
            }
            _ => {
                log::warn!("ID {} byte {:02X} sent without data phase", self.id, val);
                return false;
            }
        }
        self.offset == self.data_len
    }

    /// Receives one byte for the initiator.
    ///
    /// Returns the byte and whether it was the last one of this phase. An
    /// empty phase yields (0, true).
    pub fn receive_byte(&mut self) -> (u8, bool) {
        if self.data_len == 0 || self.offset >= self.data_len {
            return (0, true);
        }
        let val = self.get_buffer(self.offset);
        self.offset += 1;
        (val, self.offset >= self.data_len)
    }
}
