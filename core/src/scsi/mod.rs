//! SCSI targets and the per-ID transfer handle the WD33C93 drives

pub mod disk;
pub mod target;
pub mod unit;

use serde::{Deserialize, Serialize};

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 2;

/// Command descriptor block length, derived from the group code
/// (upper three bits of the opcode).
pub const fn scsi_cmd_len(cmdnum: u8) -> usize {
    match cmdnum >> 5 {
        // Group 0: READ(6), WRITE(6), INQUIRY, ..
        0 => 6,
        // Group 1/2: READ(10), WRITE(10), READ CAPACITY, ..
        1 | 2 => 10,
        // Group 4: 16-byte commands
        4 => 16,
        // Group 5: READ(12), WRITE(12)
        5 => 12,
        // Reserved and vendor specific groups
        _ => 6,
    }
}

/// Result of a command
pub enum ScsiCmdResult {
    /// Immediately turn to the Status phase
    Status(u8),
    /// Returns data to the initiator
    DataIn(Vec<u8>),
    /// Expects data written to target
    DataOut(usize),
}

/// Direction of the transfer currently set up on a unit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum Direction {
    /// No data phase
    #[default]
    None,
    /// Target -> Initiator (data in, status, message in)
    ToHost,
    /// Initiator -> Target (data out, message out)
    ToTarget,
    /// Initiator -> Target into the command descriptor block
    Command,
}

impl Direction {
    pub fn is_in(self) -> bool {
        self == Self::ToHost
    }

    pub fn is_out(self) -> bool {
        matches!(self, Self::ToTarget | Self::Command)
    }
}
