//! Host-side link to a DGT3000 chess clock over I2C.
//!
//! This crate drives the clock from a single board computer (typically a
//! Raspberry Pi), using the SoC's BSC master block to send commands and its
//! BSC slave block to receive the frames the clock pushes when it becomes bus
//! master itself.  It gives the application acknowledged command delivery,
//! plus a queue of button events and a snapshot of the clock's time.
//!
//! ## Architecture
//!
//! The bus is shared and half-duplex, and the clock may start talking at any
//! time.  Two activities therefore run concurrently:
//!
//! - The **caller**, issuing commands through [`client::ClockClient`].  Each
//!   command is sent, then the caller blocks until the matching ack arrives or
//!   a timeout expires.
//! - The **listener**, a background thread owned by [`bus::BusLink`], which
//!   drains the slave receive FIFO, checks each frame and publishes its
//!   contents into the [`inbox::Inbox`].
//!
//! Both share a single lock over the register port and the inbox.  A send
//! holds it from clearing the previous ack, through arming the listen address,
//! to the end of the physical transfer, so an ack for an earlier command can
//! never satisfy a later wait.
//!
//! ## Modules
//!
//! - [`io`] - Register access trait, and a memory mapped implementation
//! - [`crc`] - CRC-8 used by every frame
//! - [`frame`] - Wire constants and reusable command frames
//! - [`bus`] - Framed send/receive, bus reset and the listener thread
//! - [`inbox`] - State published by the listener, including the button queue
//! - [`client`] - Commands, acknowledgement checks and the `configure()`
//!   recovery sequence
//! - [`config`] - Timings and retry limits
//! - [`stats`] - Optional diagnostics sink
//! - `sim` - Simulated register port, with the `sim` feature
//!
//! ## Getting Started
//!
//! 1. Map the GPIO, system timer, BSC master and BSC slave register windows
//!    (e.g. from `/dev/mem`) and create an [`io::MmioPort`] over them.  How
//!    the windows are mapped is up to the application.
//! 2. Start the link with [`bus::BusLink::start()`].  This checks the wiring,
//!    resets the bus and spawns the listener under `SCHED_FIFO`, which
//!    needs `CAP_SYS_NICE`.  Without it the listener runs at default
//!    priority and a warning is logged.
//! 3. Wrap the link in a [`client::ClockClient`] and call
//!    [`client::ClockClient::configure()`] to wake the clock and put it under
//!    central control.
//! 4. Use [`client::ClockClient::set_text()`],
//!    [`client::ClockClient::set_and_run()`] and friends, and poll
//!    [`client::ClockClient::button_event()`] and
//!    [`client::ClockClient::time()`].
//! 5. Call [`client::ClockClient::shutdown()`] (or drop the client) to stop
//!    the listener and release the bus.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dgt3000_link::bus::BusLink;
//! use dgt3000_link::client::ClockClient;
//! use dgt3000_link::config::Config;
//! use dgt3000_link::stats::NoDiagnostics;
//!
//! let port = unsafe { MmioPort::new(windows, SlavePins::Gpio18And19, 250)? };
//! let config = Config::default();
//! let diagnostics = Arc::new(NoDiagnostics);
//! let link = BusLink::start(port, config.clone(), diagnostics.clone())?;
//! let mut clock = ClockClient::new(link, config, diagnostics);
//! clock.configure()?;
//! clock.set_text("Hello", 0, 0, 0)?;
//! ```
//!
//! ## Features
//!
//! - `sim` - Export `sim::SimPort`, an in-memory simulation of the register
//!   blocks and the clock, for testing applications without hardware.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod bus;
pub mod client;
pub mod config;
pub mod crc;
pub mod frame;
pub mod inbox;
pub mod io;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod stats;

pub use bus::{BusLink, Transport};
pub use client::{ClockClient, ConfigureState, RecoveryReport};
pub use config::Config;
pub use inbox::{ButtonEvent, ClockTime};

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Register windows could not be obtained
    HardwareUnavailable,
    /// Bus lines or pin functions failed the start-up sanity check
    WiringFault,
    /// Bus never went idle, or the master never finished the transfer
    BusTimeout,
    /// Clock stretch timeout during send, another master was active
    Collision,
    /// Send was not acknowledged and the lines are still busy
    LinesBusy,
    /// Send was not acknowledged on a quiet bus, clock presumed off
    Silent,
    /// No matching ack before the timeout
    NoAck,
    /// Ack received, but its status reports failure
    NegativeAck,
    /// Ack received for a command that should not be acknowledged
    UnexpectedAck,
    /// Received frame failed its CRC
    ChecksumFault,
    /// Received frame was not sent by the clock
    WrongAddress,
    /// Received byte count differs from the declared frame length
    SizeMismatch,
    /// Slave receive FIFO overflowed
    HardwareBufferFull,
    /// Received frame would not fit in the receive buffer
    SoftwareBufferOverrun,
    /// Listener has been stopped
    NotRunning,
}

impl Error {
    /// Whether retrying, resetting or waking may clear the error.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::HardwareUnavailable | Error::WiringFault | Error::NotRunning
        )
    }

    /// Whether the error was raised while receiving a frame.
    pub fn is_receive_fault(&self) -> bool {
        matches!(
            self,
            Error::ChecksumFault
                | Error::WrongAddress
                | Error::SizeMismatch
                | Error::HardwareBufferFull
                | Error::SoftwareBufferOverrun
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Error::HardwareUnavailable => "register windows unavailable",
            Error::WiringFault => "bus wiring fault",
            Error::BusTimeout => "bus timeout",
            Error::Collision => "bus collision",
            Error::LinesBusy => "bus lines busy",
            Error::Silent => "clock did not respond",
            Error::NoAck => "no acknowledgement",
            Error::NegativeAck => "negative acknowledgement",
            Error::UnexpectedAck => "unexpected acknowledgement",
            Error::ChecksumFault => "checksum fault",
            Error::WrongAddress => "frame from wrong address",
            Error::SizeMismatch => "frame size mismatch",
            Error::HardwareBufferFull => "receive FIFO overflow",
            Error::SoftwareBufferOverrun => "receive buffer overrun",
            Error::NotRunning => "listener not running",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Error {}

/// Type to represent the result of a link operation
pub type Result<T> = core::result::Result<T, Error>;
