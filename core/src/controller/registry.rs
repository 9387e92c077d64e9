//! All boards of a system and the shared interrupt line

use anyhow::Result;
use thiserror::Error;

use super::{BoardConfig, BoardKind, ControllerInstance};
use crate::bus::{DmaBus, IrqSource};
use crate::tickable::{Tickable, Ticks};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("all {max} {kind} board slots are in use")]
    SlotsExhausted { kind: BoardKind, max: usize },
    #[error("no board with id {0}")]
    UnknownBoard(usize),
}

/// Boards in the order they were added. Ids are indices into this list.
#[derive(Default)]
pub struct ControllerRegistry {
    boards: Vec<ControllerInstance>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a board, returns its id
    pub fn add_board(&mut self, config: BoardConfig, mem: Box<dyn DmaBus>) -> Result<usize> {
        let kind = config.kind;
        let slot = self
            .boards
            .iter()
            .filter(|b| b.kind().shares_pool(kind))
            .count();
        if slot >= kind.max_instances() {
            return Err(RegistryError::SlotsExhausted {
                kind,
                max: kind.max_instances(),
            }
            .into());
        }

        self.boards.push(ControllerInstance::new(config, slot, mem)?);
        Ok(self.boards.len() - 1)
    }

    pub fn get(&self, id: usize) -> Result<&ControllerInstance, RegistryError> {
        self.boards.get(id).ok_or(RegistryError::UnknownBoard(id))
    }

    pub fn get_mut(&mut self, id: usize) -> Result<&mut ControllerInstance, RegistryError> {
        self.boards
            .get_mut(id)
            .ok_or(RegistryError::UnknownBoard(id))
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// State of the shared interrupt line, evaluated from scratch on every
    /// call since reading it folds and clears per-board status bits.
    pub fn recompute_interrupt_line(&mut self) -> bool {
        let mut irq = false;
        for b in &mut self.boards {
            if b.kind().on_shared_irq() {
                // Every board folds its status, no short circuit
                irq |= b.get_irq();
            }
        }
        irq
    }

    pub fn reset_all(&self) {
        for b in &self.boards {
            b.reset();
        }
    }

    pub fn shutdown_all(&mut self) {
        for b in &mut self.boards {
            b.shutdown();
        }
    }
}

impl Tickable for ControllerRegistry {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        for b in &mut self.boards {
            b.tick(ticks)?;
        }
        Ok(ticks)
    }
}

impl IrqSource for ControllerRegistry {
    fn get_irq(&mut self) -> bool {
        self.recompute_interrupt_line()
    }
}
