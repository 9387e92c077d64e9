//! DMA engines bridging the WD33C93 data path to host memory
//!
//! Each board carries exactly one engine variant, fixed at construction.

pub mod commodore;
pub mod gvp;

use serde::{Deserialize, Serialize};

use crate::bus::DmaBus;
use crate::scsi::unit::ScsiUnit;
use crate::wd33c93::Wd33c93;

use commodore::CommodoreDmac;
use gvp::{GvpSeriesI, GvpSeriesII};

/// DMA activity state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum DmaState {
    #[default]
    Idle,
    /// Started by the host, waiting for (or moving) data
    Running,
    /// Transfer stalled mid-phase, waiting for the next chip request
    Done,
}

/// Behaviour shared by all DMA engine variants
pub trait DmaEngine {
    /// Moves bytes between the target and the engine's destination until the
    /// chip's transfer count runs out or the target ends the phase. Returns
    /// whether a transfer took place.
    fn pump(&mut self, chip: &mut Wd33c93, unit: &mut ScsiUnit, mem: &mut dyn DmaBus) -> bool;

    /// DMA has been started by the host
    fn is_enabled(&self) -> bool;

    /// Folds the interrupt sources into the engine's own status and reports
    /// whether the board asserts its interrupt line.
    fn is_irq_asserted(&mut self, chip_irq: bool, xt_irq: bool) -> bool;

    fn reset(&mut self);

    fn set_dma_done(&mut self);

    /// Whether the WD33C93 CONTROL register DMA mode selects this engine
    fn accepts_mode(&self, mode: u8) -> bool;
}

/// The DMA engine of a board
pub enum Dmac {
    Commodore(CommodoreDmac),
    GvpSeriesI(GvpSeriesI),
    GvpSeriesII(GvpSeriesII),
    /// XT-only or PIO-only configurations
    None,
}

impl Dmac {
    fn engine(&self) -> Option<&dyn DmaEngine> {
        match self {
            Self::Commodore(d) => Some(d),
            Self::GvpSeriesI(d) => Some(d),
            Self::GvpSeriesII(d) => Some(d),
            Self::None => None,
        }
    }

    fn engine_mut(&mut self) -> Option<&mut dyn DmaEngine> {
        match self {
            Self::Commodore(d) => Some(d),
            Self::GvpSeriesI(d) => Some(d),
            Self::GvpSeriesII(d) => Some(d),
            Self::None => None,
        }
    }

    pub fn pump(&mut self, chip: &mut Wd33c93, unit: &mut ScsiUnit, mem: &mut dyn DmaBus) -> bool {
        self.engine_mut()
            .is_some_and(|e| e.pump(chip, unit, mem))
    }

    pub fn is_enabled(&self) -> bool {
        self.engine().is_some_and(|e| e.is_enabled())
    }

    pub fn is_irq_asserted(&mut self, chip_irq: bool, xt_irq: bool) -> bool {
        self.engine_mut()
            .is_some_and(|e| e.is_irq_asserted(chip_irq, xt_irq))
    }

    pub fn reset(&mut self) {
        if let Some(e) = self.engine_mut() {
            e.reset();
        }
    }

    pub fn set_dma_done(&mut self) {
        if let Some(e) = self.engine_mut() {
            e.set_dma_done();
        }
    }

    /// Whether the chip's current DMA mode lets this engine drive transfers
    pub fn can_dma(&self, chip: &Wd33c93) -> bool {
        self.engine()
            .is_some_and(|e| e.accepts_mode(chip.dma_mode()))
    }

    pub fn as_commodore(&self) -> Option<&CommodoreDmac> {
        match self {
            Self::Commodore(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_commodore_mut(&mut self) -> Option<&mut CommodoreDmac> {
        match self {
            Self::Commodore(d) => Some(d),
            _ => None,
        }
    }
}
