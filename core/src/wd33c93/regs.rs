//! WD33C93 register map, command set and status codes

use num_derive::{FromPrimitive, ToPrimitive};
use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

pub const OWN_ID: u8 = 0x00;
pub const CONTROL: u8 = 0x01;
pub const TIMEOUT_PERIOD: u8 = 0x02;
/// CDB bytes 1-12 share 0x03-0x0e with the translate address registers
pub const CDB_1: u8 = 0x03;
pub const T_SECTORS: u8 = 0x03;
pub const T_HEADS: u8 = 0x04;
pub const T_CYLS_0: u8 = 0x05;
pub const T_CYLS_1: u8 = 0x06;
pub const L_ADDR_0: u8 = 0x07;
pub const L_ADDR_1: u8 = 0x08;
pub const L_ADDR_2: u8 = 0x09;
pub const L_ADDR_3: u8 = 0x0a;
pub const SECTOR: u8 = 0x0b;
pub const HEAD: u8 = 0x0c;
pub const CYL_0: u8 = 0x0d;
pub const CYL_1: u8 = 0x0e;
pub const TARGET_LUN: u8 = 0x0f;
pub const COMMAND_PHASE: u8 = 0x10;
pub const SYNCHRONOUS_TRANSFER: u8 = 0x11;
pub const TRANSFER_COUNT_MSB: u8 = 0x12;
pub const TRANSFER_COUNT: u8 = 0x13;
pub const TRANSFER_COUNT_LSB: u8 = 0x14;
pub const DESTINATION_ID: u8 = 0x15;
pub const SOURCE_ID: u8 = 0x16;
pub const SCSI_STATUS: u8 = 0x17;
pub const COMMAND: u8 = 0x18;
pub const DATA: u8 = 0x19;
pub const QUEUE_TAG: u8 = 0x1a;
pub const AUXILIARY_STATUS: u8 = 0x1f;

/// Chip commands (COMMAND register, bit 7 is the single byte transfer flag)
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive, strum::IntoStaticStr)]
pub enum WdCmd {
    RESET = 0x00,
    ABORT = 0x01,
    ASSERT_ATN = 0x02,
    NEGATE_ACK = 0x03,
    DISCONNECT = 0x04,
    RESELECT = 0x05,
    SEL_ATN = 0x06,
    SEL = 0x07,
    SEL_ATN_XFER = 0x08,
    SEL_XFER = 0x09,
    RESEL_RECEIVE = 0x0a,
    RESEL_SEND = 0x0b,
    WAIT_SEL_RECEIVE = 0x0c,
    TRANS_ADDR = 0x18,
    TRANS_INFO = 0x20,
    TRANSFER_PAD = 0x21,
}

/// Single byte transfer flag in the COMMAND register
pub const CMD_SBT: u8 = 0x80;

// SCSI STATUS register values
pub const CSR_MSGIN: u8 = 0x20;
pub const CSR_SELECT: u8 = 0x11;
pub const CSR_TRANS_ADDR: u8 = 0x15;
pub const CSR_SEL_XFER_DONE: u8 = 0x16;
pub const CSR_XFER_DONE: u8 = 0x18;
pub const CSR_INVALID: u8 = 0x40;
pub const CSR_UNEXP_DISC: u8 = 0x41;
pub const CSR_TIMEOUT: u8 = 0x42;
pub const CSR_BAD_STATUS: u8 = 0x45;
pub const CSR_UNEXP: u8 = 0x48;
pub const CSR_DISC: u8 = 0x85;
pub const CSR_SRV_REQ: u8 = 0x88;

// Bus phase, low bits of the status codes above
pub const PHS_DATA_OUT: u8 = 0x00;
pub const PHS_DATA_IN: u8 = 0x01;
pub const PHS_COMMAND: u8 = 0x02;
pub const PHS_STATUS: u8 = 0x03;
pub const PHS_MESS_OUT: u8 = 0x06;
pub const PHS_MESS_IN: u8 = 0x07;

bitfield! {
    /// Auxiliary status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct AuxStatus(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Data buffer ready
        pub dbr: bool @ 0,
        /// Parity error
        pub pe: bool @ 1,
        /// Command in progress
        pub cip: bool @ 4,
        /// Busy
        pub bsy: bool @ 5,
        /// Last command ignored
        pub lci: bool @ 6,
        /// Interrupt pending
        pub int: bool @ 7,
    }
}

bitfield! {
    /// CONTROL register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ControlReg(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Halt on SCSI parity error
        pub hsp: bool @ 0,
        /// Halt on ATN
        pub ha: bool @ 1,
        /// Intermediate disconnect interrupt
        pub idi: bool @ 2,
        /// Ending disconnect interrupt
        pub edi: bool @ 3,
        /// Halt on host parity error
        pub hhp: bool @ 4,
        /// DMA mode select (0 = polled I/O)
        pub dma_mode: u8 @ 5..=7,
    }
}

/// Registers that ignore writes from the host
pub const fn is_write_only(reg: u8) -> bool {
    reg == SCSI_STATUS
}
