pub mod testbus;

use num_traits::{PrimInt, WrappingAdd};

/// Host CPU address data type (24-bit on the Zorro II boards, 32-bit on the A3000)
pub type Address = u32;

/// A register window mapped into the host address space.
///
/// Byte and word accesses are distinct bus cycles on these boards: a word
/// access is not two byte accesses, and several registers only respond to
/// one of the two sizes. Long accesses are split into two word cycles unless
/// a window says otherwise.
pub trait BusMember<T: PrimInt + WrappingAdd> {
    fn read(&mut self, addr: T) -> Option<u8>;
    fn write(&mut self, addr: T, val: u8) -> Option<()>;
    fn read_word(&mut self, addr: T) -> Option<u16>;
    fn write_word(&mut self, addr: T, val: u16) -> Option<()>;

    fn read_long(&mut self, addr: T) -> Option<u32> {
        let two = T::one() + T::one();
        let hi = self.read_word(addr)?;
        let lo = self.read_word(addr.wrapping_add(&two))?;
        Some((u32::from(hi) << 16) | u32::from(lo))
    }

    fn write_long(&mut self, addr: T, val: u32) -> Option<()> {
        let two = T::one() + T::one();
        self.write_word(addr, (val >> 16) as u16)?;
        self.write_word(addr.wrapping_add(&two), val as u16)
    }
}

/// Host memory as seen by a bus mastering DMA engine.
pub trait DmaBus: Send {
    fn dma_read(&mut self, addr: Address) -> u8;
    fn dma_write(&mut self, addr: Address, val: u8);
}

/// Open bus, for boards that never master the host bus (or tests that do
/// not care). Reads float high, writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenBus;

impl DmaBus for OpenBus {
    fn dma_read(&mut self, _addr: Address) -> u8 {
        0xFF
    }

    fn dma_write(&mut self, _addr: Address, _val: u8) {}
}

/// Level-triggered interrupt request source
pub trait IrqSource {
    fn get_irq(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Window that returns the low address byte and records word writes
    #[derive(Default)]
    struct Echo {
        words: Vec<(Address, u16)>,
    }

    impl BusMember<Address> for Echo {
        fn read(&mut self, addr: Address) -> Option<u8> {
            Some(addr as u8)
        }

        fn write(&mut self, _addr: Address, _val: u8) -> Option<()> {
            Some(())
        }

        fn read_word(&mut self, addr: Address) -> Option<u16> {
            Some(addr as u16)
        }

        fn write_word(&mut self, addr: Address, val: u16) -> Option<()> {
            self.words.push((addr, val));
            Some(())
        }
    }

    #[test]
    fn long_read_is_two_words() {
        let mut e = Echo::default();
        assert_eq!(e.read_long(0x40), Some(0x0040_0042));
    }

    #[test]
    fn long_write_is_two_words() {
        let mut e = Echo::default();
        e.write_long(0x84, 0x1234_5678);
        assert_eq!(e.words, vec![(0x84, 0x1234), (0x86, 0x5678)]);
    }

    #[test]
    fn open_bus() {
        let mut b = OpenBus;
        b.dma_write(0, 0x12);
        assert_eq!(b.dma_read(0), 0xFF);
    }
}
