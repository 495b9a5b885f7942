//! Observability sink.
//!
//! A [`Diagnostics`] implementation is handed to the link and the client at
//! construction.  Nothing in the protocol logic depends on what the sink
//! does with the events; [`NoDiagnostics`] discards them and [`Counters`]
//! tallies them.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::atomic::{AtomicU32, Ordering};

use crate::Error;
use crate::frame::Command;

/// Receiver of diagnostic events.  Called from both the caller's thread and
/// the listener thread, possibly while the link lock is held, so
/// implementations must be quick and must not call back into the link.
pub trait Diagnostics: Send + Sync {
    /// A command could not be put on the bus.
    fn send_failed(&self, command: Command, error: Error) {
        let _ = (command, error);
    }

    /// A command was sent but no satisfactory ack came back.
    fn ack_failed(&self, command: Command, error: Error) {
        let _ = (command, error);
    }

    /// The listener discarded a frame.
    fn receive_fault(&self, error: Error) {
        let _ = error;
    }

    /// Receive FIFO level seen at the start of a frame.
    fn receive_level(&self, level: u8) {
        let _ = level;
    }

    /// A button event was dropped because the queue was full.
    fn button_dropped(&self) {}

    /// A valid frame of `kind` was classified.
    fn frame_received(&self, kind: u8) {
        let _ = kind;
    }
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}

const COMMANDS: usize = Command::ALL.len();

fn command_index(command: Command) -> usize {
    Command::ALL
        .iter()
        .position(|c| *c == command)
        .unwrap_or(0)
}

/// Atomic counters for every diagnostic event.
#[derive(Debug, Default)]
pub struct Counters {
    send_failed: [AtomicU32; COMMANDS],
    ack_failed: [AtomicU32; COMMANDS],
    rx_timeout: AtomicU32,
    rx_wrong_address: AtomicU32,
    rx_buffer_full: AtomicU32,
    rx_size_mismatch: AtomicU32,
    rx_checksum: AtomicU32,
    rx_overrun: AtomicU32,
    rx_max_level: AtomicU32,
    buttons_dropped: AtomicU32,
    frames: AtomicU32,
}

/// Point in time copy of [`Counters`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Send failures, indexed like [`Command::ALL`].
    pub send_failed: [u32; COMMANDS],
    /// Ack failures, indexed like [`Command::ALL`].
    pub ack_failed: [u32; COMMANDS],
    pub rx_timeout: u32,
    pub rx_wrong_address: u32,
    pub rx_buffer_full: u32,
    pub rx_size_mismatch: u32,
    pub rx_checksum: u32,
    pub rx_overrun: u32,
    pub rx_max_level: u32,
    pub buttons_dropped: u32,
    pub frames: u32,
}

impl CounterSnapshot {
    pub fn send_failures(&self, command: Command) -> u32 {
        self.send_failed[command_index(command)]
    }

    pub fn ack_failures(&self, command: Command) -> u32 {
        self.ack_failed[command_index(command)]
    }

    pub fn receive_faults(&self) -> u32 {
        self.rx_timeout
            + self.rx_wrong_address
            + self.rx_buffer_full
            + self.rx_size_mismatch
            + self.rx_checksum
            + self.rx_overrun
    }
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU32| c.load(Ordering::Relaxed);
        CounterSnapshot {
            send_failed: core::array::from_fn(|i| load(&self.send_failed[i])),
            ack_failed: core::array::from_fn(|i| load(&self.ack_failed[i])),
            rx_timeout: load(&self.rx_timeout),
            rx_wrong_address: load(&self.rx_wrong_address),
            rx_buffer_full: load(&self.rx_buffer_full),
            rx_size_mismatch: load(&self.rx_size_mismatch),
            rx_checksum: load(&self.rx_checksum),
            rx_overrun: load(&self.rx_overrun),
            rx_max_level: load(&self.rx_max_level),
            buttons_dropped: load(&self.buttons_dropped),
            frames: load(&self.frames),
        }
    }
}

impl Diagnostics for Counters {
    fn send_failed(&self, command: Command, _error: Error) {
        self.send_failed[command_index(command)].fetch_add(1, Ordering::Relaxed);
    }

    fn ack_failed(&self, command: Command, _error: Error) {
        self.ack_failed[command_index(command)].fetch_add(1, Ordering::Relaxed);
    }

    fn receive_fault(&self, error: Error) {
        let counter = match error {
            Error::BusTimeout => &self.rx_timeout,
            Error::WrongAddress => &self.rx_wrong_address,
            Error::HardwareBufferFull => &self.rx_buffer_full,
            Error::SizeMismatch => &self.rx_size_mismatch,
            Error::ChecksumFault => &self.rx_checksum,
            Error::SoftwareBufferOverrun => &self.rx_overrun,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn receive_level(&self, level: u8) {
        self.rx_max_level.fetch_max(level as u32, Ordering::Relaxed);
    }

    fn button_dropped(&self) {
        self.buttons_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn frame_received(&self, _kind: u8) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = Counters::new();
        counters.send_failed(Command::Display, Error::Silent);
        counters.send_failed(Command::Display, Error::Collision);
        counters.ack_failed(Command::SetAndRun, Error::NoAck);
        counters.receive_fault(Error::ChecksumFault);
        counters.receive_fault(Error::NegativeAck);
        counters.receive_level(3);
        counters.receive_level(1);
        counters.button_dropped();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.send_failures(Command::Display), 2);
        assert_eq!(snapshot.send_failures(Command::Wake), 0);
        assert_eq!(snapshot.ack_failures(Command::SetAndRun), 1);
        assert_eq!(snapshot.rx_checksum, 1);
        assert_eq!(snapshot.receive_faults(), 1);
        assert_eq!(snapshot.rx_max_level, 3);
        assert_eq!(snapshot.buttons_dropped, 1);
    }
}
