//! Per-board worker thread executing chip commands
//!
//! Register accesses from the host side only queue requests; the worker
//! dequeues them one at a time and runs the phase machine to its next wait
//! point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use super::ControllerState;

const WORKER_TRACE: bool = false;

/// Depth of the request queue
pub const QUEUE_DEPTH: usize = 100;

/// Packed form of [WorkerMessage::Shutdown]
pub const SHUTDOWN_WORD: u32 = 0xffff_ffff;

pub type RequestSender = crossbeam_channel::Sender<WorkerMessage>;
pub type RequestReceiver = crossbeam_channel::Receiver<WorkerMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, strum::IntoStaticStr)]
pub enum RequestKind {
    /// Execute the command byte in the payload
    ChipCommand = 0,
    /// Host finished reading a phase
    ContinueIn = 1,
    /// Host finished writing a phase
    ContinueOut = 2,
    /// Host finished reading a phase by programmed I/O, stop at message in
    ContinueInMessage = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRequest {
    /// SCSI ID the request concerns
    pub id: u8,
    pub kind: RequestKind,
    pub payload: u8,
}

impl WorkerRequest {
    /// ID in bits 24-31, kind in bits 8-23, payload in bits 0-7
    pub fn encode(&self) -> u32 {
        (u32::from(self.id) << 24) | ((self.kind as u32) << 8) | u32::from(self.payload)
    }

    pub fn decode(v: u32) -> Option<Self> {
        Some(Self {
            id: (v >> 24) as u8,
            kind: RequestKind::from_u32((v >> 8) & 0xffff)?,
            payload: v as u8,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMessage {
    Request(WorkerRequest),
    Shutdown,
}

impl WorkerMessage {
    pub fn encode(&self) -> u32 {
        match self {
            Self::Request(r) => r.encode(),
            Self::Shutdown => SHUTDOWN_WORD,
        }
    }

    pub fn decode(v: u32) -> Option<Self> {
        if v == SHUTDOWN_WORD {
            return Some(Self::Shutdown);
        }
        WorkerRequest::decode(v).map(Self::Request)
    }
}

/// Starts the worker thread of a board
pub(crate) fn spawn(
    name: &str,
    state: Arc<Mutex<ControllerState>>,
    rx: RequestReceiver,
    pending: Arc<AtomicUsize>,
) -> Result<JoinHandle<()>> {
    let tname = format!("scsi {}", name);
    thread::Builder::new()
        .name(tname.clone())
        .spawn(move || run(state, rx, pending))
        .with_context(|| format!("Cannot start worker thread '{}'", tname))
}

fn run(state: Arc<Mutex<ControllerState>>, rx: RequestReceiver, pending: Arc<AtomicUsize>) {
    while let Ok(msg) = rx.recv() {
        let req = match msg {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Request(req) => req,
        };
        if WORKER_TRACE {
            let kind: &str = req.kind.into();
            log::debug!("Worker got {} ID {} {:02X}", kind, req.id, req.payload);
        }
        // Host accesses and ticks wait for the request in flight
        {
            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            s.handle_request(req);
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    log::debug!("Worker exiting");
}
