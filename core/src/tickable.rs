use anyhow::Result;

/// Amount of ticks of the scan-line clock that drives the SCSI boards.
/// One tick corresponds to one horizontal sync of the host machine.
pub type Ticks = u64;

pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
