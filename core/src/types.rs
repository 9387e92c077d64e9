use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

pub type Byte = u8;
pub type Word = u16;
pub type Long = u32;

bitfield! {
    /// General purpose 16-bit field
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct Field16(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        pub msb: u8 @ 8..16,
        pub lsb: u8 @ 0..8,
    }
}

bitfield! {
    /// General purpose 32-bit field, for registers the host accesses
    /// as two separate words.
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct Field32(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub hi: u16 @ 16..32,
        pub lo: u16 @ 0..16,
    }
}
