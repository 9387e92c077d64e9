use super::{Address, DmaBus};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TraceEntry {
    pub addr: Address,
    pub access: Access,
    pub val: u8,
}

#[derive(Default)]
struct TestbusInner {
    mem: HashMap<Address, u8>,
    trace: Vec<TraceEntry>,
    trace_enabled: bool,
    mask: Address,
}

/// Sparse host memory for tests.
///
/// Cloning yields another handle to the same memory, so a test can keep one
/// handle while a controller's worker thread owns the other.
#[derive(Clone)]
pub struct Testbus {
    inner: Arc<Mutex<TestbusInner>>,
}

impl Testbus {
    pub fn new(mask: Address) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TestbusInner {
                mask,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TestbusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a block of memory without tracing
    pub fn fill(&self, addr: Address, data: &[u8]) {
        let mut inner = self.lock();
        let mask = inner.mask;
        for (i, &b) in data.iter().enumerate() {
            inner.mem.insert(addr.wrapping_add(i as Address) & mask, b);
        }
    }

    /// Reads a single byte without tracing
    pub fn peek(&self, addr: Address) -> u8 {
        let inner = self.lock();
        *inner.mem.get(&(addr & inner.mask)).unwrap_or(&0)
    }

    /// Reads a block of memory without tracing
    pub fn read_block(&self, addr: Address, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.peek(addr.wrapping_add(i as Address)))
            .collect()
    }

    pub fn get_seen_addresses(&self) -> Vec<Address> {
        let mut v: Vec<_> = self.lock().mem.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn reset_trace(&self) {
        let mut inner = self.lock();
        inner.trace.clear();
        inner.trace_enabled = true;
    }

    pub fn get_trace(&self) -> Vec<TraceEntry> {
        self.lock().trace.clone()
    }
}

impl DmaBus for Testbus {
    fn dma_read(&mut self, addr: Address) -> u8 {
        let mut inner = self.lock();
        assert_eq!(addr & inner.mask, addr, "DMA read outside of mask");

        let val = *inner.mem.get(&addr).unwrap_or(&0);
        if inner.trace_enabled {
            inner.trace.push(TraceEntry {
                addr,
                access: Access::Read,
                val,
            });
        }
        val
    }

    fn dma_write(&mut self, addr: Address, val: u8) {
        let mut inner = self.lock();
        assert_eq!(addr & inner.mask, addr, "DMA write outside of mask");

        if inner.trace_enabled {
            inner.trace.push(TraceEntry {
                addr,
                access: Access::Write,
                val,
            });
        }
        inner.mem.insert(addr, val);
    }
}
