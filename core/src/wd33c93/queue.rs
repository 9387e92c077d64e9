//! Delayed status delivery.
//!
//! Completion of a chip command becomes visible to the host some scan lines
//! later. Each slot holds a status byte and a countdown; a countdown of 1
//! means "deliver on the next poll", 0 means the slot is free.

use serde::{Deserialize, Serialize};

pub const WD_STATUS_QUEUE: usize = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Slot {
    status: u8,
    countdown: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusQueue {
    slots: [Slot; WD_STATUS_QUEUE],
    index: usize,
}

impl StatusQueue {
    /// Queues a status byte to be delivered after `delay` polls.
    ///
    /// A free slot is taken round-robin starting after the last used one.
    /// Only when every slot is occupied is the oldest overwritten.
    pub fn post(&mut self, status: u8, delay: u32) {
        let countdown = delay.max(1);
        let free = (1..=WD_STATUS_QUEUE)
            .map(|i| (self.index + i) % WD_STATUS_QUEUE)
            .find(|&i| self.slots[i].countdown == 0);
        let slot = free.unwrap_or((self.index + 1) % WD_STATUS_QUEUE);
        if free.is_none() {
            log::warn!(
                "Status queue full, dropping {:02X} for {:02X}",
                self.slots[slot].status,
                status
            );
        }
        self.index = slot;
        self.slots[slot] = Slot { status, countdown };
    }

    /// Advances all countdowns by one poll and returns the statuses that
    /// expired, in slot order.
    pub fn expire(&mut self) -> [Option<u8>; WD_STATUS_QUEUE] {
        let mut out = [None; WD_STATUS_QUEUE];
        for (slot, o) in self.slots.iter_mut().zip(out.iter_mut()) {
            match slot.countdown {
                0 => (),
                1 => {
                    slot.countdown = 0;
                    *o = Some(slot.status);
                }
                _ => slot.countdown -= 1,
            }
        }
        out
    }

    pub fn clear(&mut self) {
        for s in &mut self.slots {
            s.countdown = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.countdown == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_one_are_next_poll() {
        let mut q = StatusQueue::default();
        q.post(0x11, 0);
        assert_eq!(q.expire(), [None, Some(0x11)]);
        q.post(0x22, 1);
        assert_eq!(q.expire(), [Some(0x22), None]);
        assert!(q.is_empty());
    }

    #[test]
    fn countdown() {
        let mut q = StatusQueue::default();
        q.post(0x42, 5);
        for _ in 0..4 {
            assert_eq!(q.expire(), [None, None]);
        }
        assert_eq!(q.expire(), [None, Some(0x42)]);
        assert_eq!(q.expire(), [None, None]);
    }

    #[test]
    fn two_entries_both_delivered() {
        let mut q = StatusQueue::default();
        q.post(0x16, 2);
        q.post(0x85, 4);

        let mut seen = vec![];
        for _ in 0..10 {
            seen.extend(q.expire().into_iter().flatten());
        }
        assert_eq!(seen, vec![0x16, 0x85]);
    }

    #[test]
    fn same_poll_in_slot_order() {
        let mut q = StatusQueue::default();
        q.post(0xAA, 1);
        q.post(0xBB, 1);
        // First post lands in slot 1, second wraps to slot 0
        assert_eq!(q.expire(), [Some(0xBB), Some(0xAA)]);
    }

    #[test]
    fn overwrite_only_when_full() {
        let mut q = StatusQueue::default();
        q.post(1, 10);
        q.post(2, 10);
        q.post(3, 1);
        let mut seen = vec![];
        for _ in 0..12 {
            seen.extend(q.expire().into_iter().flatten());
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&3));
    }

    #[test]
    fn clear() {
        let mut q = StatusQueue::default();
        q.post(1, 3);
        q.clear();
        assert!(q.is_empty());
        for _ in 0..5 {
            assert_eq!(q.expire(), [None, None]);
        }
    }
}
