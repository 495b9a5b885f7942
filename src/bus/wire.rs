//! Register level send, receive and reset.
//!
//! [`Wire`] borrows the port for the duration of one operation.  Callers are
//! responsible for holding the link lock around it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{BusTimings, micros};
use crate::crc;
use crate::frame::{BROADCAST_ADDRESS, CLOCK_SOURCE, LENGTH_OFFSET, MIN_FRAME_LEN, SOURCE_OFFSET};
use crate::io::{MasterReg, RegisterPort, SlaveReg, master, slave};
use crate::{Error, Result};

// Pins stay released this long during a reset to unstick the master.
const RESET_RELEASE_MICROS: u64 = 2000;
const RESET_SETTLE_MICROS: u64 = 1000;

// Target bus clock, kHz.
const BUS_KHZ: u32 = 95;
// Above this core clock the default data delay is too short.
const SLOW_EDGE_CORE_MHZ: u32 = 300;
const SLOW_EDGE_DELAY: u32 = 0x0060_0060;

pub(crate) struct Wire<'a, P: RegisterPort> {
    port: &'a mut P,
    timings: &'a BusTimings,
}

impl<'a, P: RegisterPort> Wire<'a, P> {
    pub(crate) fn new(port: &'a mut P, timings: &'a BusTimings) -> Self {
        Self { port, timings }
    }

    pub(crate) fn now(&self) -> u64 {
        self.port.micros()
    }

    fn deadline(&self, after: Duration) -> u64 {
        self.now().saturating_add(micros(after))
    }

    fn expired(&self, deadline: u64) -> bool {
        self.now() > deadline
    }

    /// Set the 7-bit address the slave block answers on.
    pub(crate) fn set_listen(&mut self, address: u8) {
        self.port.write_slave(SlaveReg::Address, address as u32);
    }

    /// Whether the slave is mid-frame or holding undrained bytes.
    pub(crate) fn frame_pending(&mut self) -> bool {
        let flags = self.port.read_slave(SlaveReg::Flags);
        flags & slave::FR_RXBUSY != 0 || flags & slave::FR_RXFE == 0
    }

    /// Current slave receive FIFO level.
    pub(crate) fn receive_level(&mut self) -> u8 {
        let flags = self.port.read_slave(SlaveReg::Flags);
        ((flags & slave::FR_RXFLEVEL_MASK) >> slave::FR_RXFLEVEL_SHIFT) as u8
    }

    /// Lines high and nothing arriving on the slave.
    pub(crate) fn quiet(&mut self) -> bool {
        self.port.lines_idle() && !self.frame_pending()
    }

    /// Program length and destination, then fill the transmit FIFO with as
    /// much of `frame` as it accepts.  Byte 0 is the address byte, which the
    /// master generates itself.
    ///
    /// Returns the index of the first byte not yet queued.
    pub(crate) fn preload(&mut self, destination: u8, frame: &[u8]) -> usize {
        self.port.write_master(MasterReg::DataLength, frame.len().saturating_sub(1) as u32);
        self.port.write_master(MasterReg::Address, destination as u32);
        self.port.write_master(MasterReg::Control, master::C_CLEAR);

        let mut next = 1;
        while next < frame.len()
            && self.port.read_master(MasterReg::Status) & master::S_TXD != 0
        {
            self.port.write_master(MasterReg::Fifo, frame[next] as u32);
            next += 1;
        }
        next
    }

    /// Start the transfer of a preloaded frame, stream the rest of it and
    /// classify the outcome.
    ///
    /// On every failure path the slave is returned to broadcast listening.
    pub(crate) fn transmit(&mut self, frame: &[u8], mut next: usize, listen: u8) -> Result<()> {
        self.set_listen(listen);
        self.port.write_master(MasterReg::Status, master::S_CLEAR_ALL);
        self.port.write_master(MasterReg::Control, master::C_I2CEN | master::C_ST);

        'stream: while next < frame.len() {
            let deadline = self.deadline(self.timings.fifo_space);
            loop {
                let status = self.port.read_master(MasterReg::Status);
                if status & master::S_DONE != 0 {
                    debug!("Transfer ended after {next} of {} bytes", frame.len());
                    self.set_listen(BROADCAST_ADDRESS);
                    break 'stream;
                }
                if status & master::S_TXD != 0 {
                    break;
                }
                if self.expired(deadline) {
                    warn!("Timed out waiting for transmit FIFO space");
                    self.set_listen(BROADCAST_ADDRESS);
                    return Err(Error::BusTimeout);
                }
            }
            self.port.write_master(MasterReg::Fifo, frame[next] as u32);
            next += 1;
        }

        let deadline = self.deadline(self.timings.transfer_done);
        let status = loop {
            let status = self.port.read_master(MasterReg::Status);
            if status & master::S_DONE != 0 {
                break status;
            }
            if self.expired(deadline) {
                warn!("Timed out waiting for transfer to finish");
                self.set_listen(BROADCAST_ADDRESS);
                return Err(Error::BusTimeout);
            }
        };

        if status & (master::S_ERR | master::S_CLKT) == 0 {
            return Ok(());
        }

        self.set_listen(BROADCAST_ADDRESS);

        if status & master::S_ERR != 0 {
            debug!("Byte not acknowledged");
            self.port.write_master(MasterReg::Status, master::S_ERR);
        }
        if status & master::S_CLKT != 0 {
            debug!("Clock stretch timeout");
            self.port.write_master(MasterReg::Status, master::S_CLKT);
            return Err(Error::Collision);
        }

        let control = self.port.read_master(MasterReg::Control);
        self.port.write_master(MasterReg::Control, control | master::C_CLEAR);

        if !self.quiet() {
            Err(Error::LinesBusy)
        } else {
            Err(Error::Silent)
        }
    }

    /// Drain one frame from the slave FIFO into `buf`.
    ///
    /// Byte 0 is filled with the address the slave was listening on, as the
    /// hardware does not store it.  Returns the frame length, or 0 if the
    /// slave was addressed but no frame followed.
    pub(crate) fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let listen = self.port.read_slave(SlaveReg::Address) as u8;
        buf[0] = listen << 1;
        let mut len = 1;

        let deadline = self.deadline(self.timings.receive_frame);
        let poll = micros(self.timings.receive_byte_poll);

        while self.frame_pending() {
            if self.expired(deadline) {
                warn!("Frame incomplete after {len} bytes");
                self.discard(remaining(buf, len), deadline);
                return Err(Error::BusTimeout);
            }

            let flags = self.port.read_slave(SlaveReg::Flags);
            if flags & slave::FR_RXFE != 0 {
                // next byte still on the wire
                self.port.pause(poll);
                continue;
            }

            if len >= buf.len() {
                self.discard(remaining(buf, len), deadline);
                return Err(Error::SoftwareBufferOverrun);
            }
            buf[len] = (self.port.read_slave(SlaveReg::Data) & 0xff) as u8;
            len += 1;

            if len > LENGTH_OFFSET {
                let declared = buf[LENGTH_OFFSET] as usize;
                if declared > buf.len() {
                    debug!("Declared length {declared} exceeds receive buffer");
                    self.discard(declared - len, deadline);
                    return Err(Error::SoftwareBufferOverrun);
                }
                if len >= declared {
                    break;
                }
            }
        }

        self.set_listen(BROADCAST_ADDRESS);

        if len == 1 {
            return Ok(0);
        }
        // The clock follows some frames with an empty one
        if len == 3 && buf[1] == 0 && buf[2] == 0 {
            return Ok(0);
        }

        trace!("Received {:02x?}", &buf[..len]);

        if buf[SOURCE_OFFSET] != CLOCK_SOURCE {
            return Err(Error::WrongAddress);
        }

        if self.port.read_slave(SlaveReg::ReceiveStatus) & slave::RSR_OE != 0 {
            self.port.write_slave(SlaveReg::ReceiveStatus, 0);
            return Err(Error::HardwareBufferFull);
        }
        if len < MIN_FRAME_LEN || len != buf[LENGTH_OFFSET] as usize {
            self.port.write_slave(SlaveReg::ReceiveStatus, 0);
            return Err(Error::SizeMismatch);
        }

        if !crc::verify(&mut buf[..len]) {
            return Err(Error::ChecksumFault);
        }

        Ok(len)
    }

    /// Throw away up to `count` bytes of an abandoned frame, then go back to
    /// broadcast listening.  Waits for bytes still on the wire until
    /// `deadline`, but never reads past `count`, so a following frame stays
    /// intact.
    fn discard(&mut self, count: usize, deadline: u64) {
        let poll = micros(self.timings.receive_byte_poll);
        let mut dropped = 0;
        while dropped < count {
            let flags = self.port.read_slave(SlaveReg::Flags);
            if flags & slave::FR_RXFE == 0 {
                let _ = self.port.read_slave(SlaveReg::Data);
                dropped += 1;
            } else if flags & slave::FR_RXBUSY != 0 && !self.expired(deadline) {
                self.port.pause(poll);
            } else {
                break;
            }
        }
        trace!("Discarded {dropped} bytes");
        self.set_listen(BROADCAST_ADDRESS);
    }

    /// Re-initialise both blocks, leaving the slave listening on broadcast.
    pub(crate) fn reset(&mut self) {
        self.port.write_slave(SlaveReg::Control, 0);
        self.port.write_master(MasterReg::Control, master::C_CLEAR);
        self.port.write_master(MasterReg::Control, 0);

        // Toggling the pins via input unsticks a hung master
        self.port.connect_pins(false);
        self.port.write_master(MasterReg::DataLength, 0);

        let deadline = self.deadline(self.timings.receive_frame);
        while self.port.read_slave(SlaveReg::Flags) & slave::FR_RXFE == 0 {
            let _ = self.port.read_slave(SlaveReg::Data);
            if self.expired(deadline) {
                warn!("Slave FIFO did not drain during reset");
                break;
            }
        }

        self.port.pause(RESET_RELEASE_MICROS);
        self.port.write_slave(SlaveReg::Control, slave::CR_RESET);
        self.port.write_master(MasterReg::Status, master::S_CLEAR_ALL);
        self.port.write_master(MasterReg::Control, master::C_I2CEN | master::C_CLEAR);
        self.port.connect_pins(true);
        self.port.pause(RESET_SETTLE_MICROS);

        if !self.port.lines_idle() {
            warn!("Bus lines low after reset, master may be stuck");
        }

        self.port.write_slave(SlaveReg::Control, slave::CR_BREAK);
        self.port.write_slave(SlaveReg::Control, slave::CR_ENABLE);
        self.set_listen(BROADCAST_ADDRESS);
        self.port.write_slave(SlaveReg::ReceiveStatus, 0);

        let core_mhz = self.port.core_clock_mhz();
        self.port.write_master(MasterReg::ClockDivider, 1000 * core_mhz / BUS_KHZ);
        if core_mhz > SLOW_EDGE_CORE_MHZ {
            self.port.write_master(MasterReg::DataDelay, SLOW_EDGE_DELAY);
        }
        debug!("Bus reset, core clock {core_mhz} MHz");
    }
}

// Bytes of the frame in `buf` still to come, or a buffer's worth if the
// length byte has not arrived.
fn remaining(buf: &[u8], len: usize) -> usize {
    if len > LENGTH_OFFSET {
        (buf[LENGTH_OFFSET] as usize).saturating_sub(len)
    } else {
        buf.len()
    }
}
