//! Single-step debugging.
//!
//! A VM built with a [`Debugger`] publishes the instruction pointer after
//! every instruction and blocks until the host sends a step signal. When
//! the run ends it publishes `None` without waiting. Dropping the
//! [`DebugHandle`] detaches the debugger and lets the run finish freely.

use crossbeam::channel::{self, Receiver, Sender};

/// VM side of a debug session.
#[derive(Debug, Clone)]
pub struct Debugger {
    positions: Sender<Option<usize>>,
    steps: Receiver<()>,
}

/// Host side of a debug session.
#[derive(Debug)]
pub struct DebugHandle {
    positions: Receiver<Option<usize>>,
    steps: Sender<()>,
}

pub fn debugger() -> (Debugger, DebugHandle) {
    let (position_tx, position_rx) = channel::bounded(1);
    let (step_tx, step_rx) = channel::bounded(1);
    (
        Debugger {
            positions: position_tx,
            steps: step_rx,
        },
        DebugHandle {
            positions: position_rx,
            steps: step_tx,
        },
    )
}

impl Debugger {
    /// Publish `ip` and wait for the next step. Returns false once the
    /// host has gone away.
    pub(crate) fn pause(&self, ip: usize) -> bool {
        self.positions.send(Some(ip)).is_ok() && self.steps.recv().is_ok()
    }

    pub(crate) fn finish(&self) {
        let _ = self.positions.send(None);
    }
}

impl DebugHandle {
    /// Next published position; `None` when the run is over.
    pub fn next(&self) -> Option<usize> {
        self.positions.recv().ok().flatten()
    }

    /// Let the VM execute one more instruction.
    pub fn step(&self) -> bool {
        self.steps.send(()).is_ok()
    }
}
