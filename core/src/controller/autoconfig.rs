//! Zorro II autoconfig identification block
//!
//! Each logical autoconfig byte is spread over two nibble-wide bytes at
//! `addr` (high nibble) and `addr + 2` (low nibble). All but the first
//! registers are stored inverted.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

/// Size of the identification area
pub const AUTOCONFIG_SIZE: usize = 0x80;

/// Base address register, a byte write here configures the board
const AC_BASE: u32 = 0x48;
/// Shut-up register, the board stays unmapped
const AC_SHUTUP: u32 = 0x4c;

/// Boot ROM vector of the Commodore boards
const CDMAC_ROM_VECTOR: u16 = 0x2000;

const GVP_SERIES_I: [u8; 16] = [
    0xd1, 0x02, 0x00, 0x00, 0x07, 0xe1, 0xee, 0xee, 0xee, 0xee, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const GVP_SERIES_II: [u8; 16] = [
    0xd1, 0x0b, 0x00, 0x00, 0x07, 0xe1, 0xee, 0xee, 0xee, 0xee, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// What a byte write did to the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoconfigWrite {
    /// Not an autoconfig access, pass to the board
    Passthrough,
    /// Consumed by autoconfig
    Handled,
    /// Board not configured yet, write is lost
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Autoconfig {
    #[serde(with = "BigArray")]
    image: [u8; AUTOCONFIG_SIZE],
    /// Board takes part in the autoconfig chain
    enabled: bool,
    configured: bool,
    /// Base address assigned by the host (bits 16-23)
    base: Option<u8>,
}

impl Autoconfig {
    fn new(enabled: bool) -> Self {
        Self {
            image: [0xff; AUTOCONFIG_SIZE],
            enabled,
            configured: !enabled,
            base: None,
        }
    }

    /// Boards hardwired into the address space (A3000, CDTV)
    pub fn fixed() -> Self {
        Self::new(false)
    }

    /// A2091/A590
    pub fn commodore(old_dmac: bool) -> Self {
        let mut ac = Self::new(true);
        ac.ew(0x00, 0xc0 | 0x10 | 0x01);
        // Product
        ac.ew(0x04, if old_dmac { 0x02 } else { 0x03 });
        // Manufacturer
        ac.ew(0x10, 0x02);
        ac.ew(0x14, 0x02);
        // Serial number
        for addr in [0x18, 0x1c, 0x20, 0x24] {
            ac.ew(addr, 0x00);
        }
        ac.ew(0x28, (CDMAC_ROM_VECTOR >> 8) as u8);
        ac.ew(0x2c, CDMAC_ROM_VECTOR as u8);
        ac
    }

    pub fn gvp(series2: bool) -> Self {
        let mut ac = Self::new(true);
        let table = if series2 { &GVP_SERIES_II } else { &GVP_SERIES_I };
        for (i, &b) in table.iter().enumerate() {
            ac.ew(i * 4, b);
        }
        ac
    }

    fn ew(&mut self, addr: usize, value: u8) {
        let (hi, lo) = (value & 0xf0, (value & 0x0f) << 4);
        if matches!(addr, 0x00 | 0x02 | 0x40 | 0x42) {
            self.image[addr] = hi;
            self.image[addr + 2] = lo;
        } else {
            self.image[addr] = !hi;
            self.image[addr + 2] = !lo;
        }
    }

    pub fn read(&self, addr: u32) -> u8 {
        self.image.get(addr as usize).copied().unwrap_or(0xff)
    }

    pub fn read_word(&self, addr: u32) -> u16 {
        (u16::from(self.read(addr)) << 8) | u16::from(self.read(addr + 1))
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn base(&self) -> Option<u8> {
        self.base
    }

    /// Host byte write while the board may still be in the autoconfig chain
    pub fn intercept_write(&mut self, addr: u32, val: u8) -> AutoconfigWrite {
        if !self.enabled || self.configured {
            return AutoconfigWrite::Passthrough;
        }
        match addr {
            AC_BASE => {
                log::info!("Autoconfig base {:02X}0000", val);
                self.base = Some(val);
                self.configured = true;
                AutoconfigWrite::Handled
            }
            AC_SHUTUP => {
                log::info!("Autoconfig shut up");
                self.configured = true;
                AutoconfigWrite::Handled
            }
            _ => AutoconfigWrite::Dropped,
        }
    }

    /// Back into the autoconfig chain
    pub fn reset(&mut self) {
        if self.enabled {
            self.configured = false;
            self.base = None;
        }
    }

    pub(crate) fn set_configured(&mut self, configured: bool) {
        self.configured = configured || !self.enabled;
    }
}
