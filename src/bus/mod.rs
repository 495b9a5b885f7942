//! Bus transport and the listener it runs.
//!
//! The [`Transport`] trait is what [`crate::client::ClockClient`] needs from
//! the bus: framed sends, acknowledgement and hello rendezvous, a bus reset,
//! and access to the state the listener publishes.
//!
//! [`BusLink`] is the production implementation.  It owns a
//! [`crate::io::RegisterPort`] and the [`crate::inbox::Inbox`] behind one
//! mutex, and runs the listener thread that keeps the slave receive FIFO
//! drained.
//!
//! Tests can supply their own [`Transport`] to script the clock's replies
//! without any register level simulation.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::time::Duration;

use crate::Result;
use crate::inbox::{ButtonEvent, ClockTime};

pub mod link;
pub(crate) mod wire;

pub use link::BusLink;

/// Bus operations used by the protocol engine.
pub trait Transport {
    /// Send `frame` to the 7-bit `destination`, with the slave armed to
    /// receive the reply on `listen`.
    ///
    /// Clears any previous ack and hello before the transfer starts.
    ///
    /// Returns:
    /// - `Ok(())` if every byte was acknowledged
    /// - [`crate::Error::BusTimeout`] if the bus never went idle or the
    ///   transfer never completed
    /// - [`crate::Error::Collision`] or [`crate::Error::LinesBusy`] on
    ///   contention
    /// - [`crate::Error::Silent`] if nothing acknowledged on a quiet bus
    fn send(&mut self, destination: u8, frame: &[u8], listen: u8) -> Result<()>;

    /// Block until an ack for `command` arrives on `listen`, returning its
    /// status byte, or [`crate::Error::NoAck`] after `timeout`.
    fn await_ack(&mut self, listen: u8, command: u8, timeout: Duration) -> Result<u8>;

    /// Whether a hello arrived since the last send, waiting up to `timeout`.
    fn await_hello(&mut self, timeout: Duration) -> bool;

    /// Re-initialise the bus hardware.
    fn reset_bus(&mut self) -> Result<()>;

    /// Latest time reported by the clock.
    fn time(&self) -> ClockTime;

    /// Next queued button event.  A pending receive fault is returned first.
    fn next_button(&mut self) -> Result<Option<ButtonEvent>>;

    /// Last raw button and lever state.
    fn button_state(&self) -> u8;

    /// Number of queued button events.
    fn pending(&self) -> usize {
        0
    }

    /// Stop listening and release the bus.  Further sends fail.
    fn shutdown(&mut self) {}
}
