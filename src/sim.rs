//! Simulated register port.
//!
//! [`SimPort`] models the parts of the BSC master and slave blocks the link
//! uses, the bus line levels and a microsecond clock.  The clock itself is a
//! responder closure: it sees each frame the master completes and decides
//! how the transfer ends and which frames the clock sends back.
//!
//! Replies and injected frames are queued per destination address and only
//! delivered once the slave is enabled and listening on that address,
//! mirroring how the real slave ignores frames for other addresses.
//!
//! `SimPort` is `Clone`; all clones share the same simulated bus, so a test
//! can hand one to [`crate::bus::BusLink`] and keep another to script and
//! inspect it.
//!
//! ```rust,ignore
//! let sim = SimPort::new();
//! sim.respond(|frame| Reply::ack(vec![frames::ack(0x10, frame[3], 0x08)]));
//! let link = BusLink::start(sim.clone(), Config::default(), Arc::new(NoDiagnostics))?;
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{MasterReg, RegisterPort, SlaveReg, master, slave};
use crate::{Error, Result};

/// How the simulated clock ends a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every byte acknowledged
    Ack,
    /// Address not acknowledged, lines idle afterwards
    Nack,
    /// Address not acknowledged, lines still busy afterwards
    NackLinesBusy,
    /// Clock stretch timeout
    ClockStretch,
    /// Transfer never completes
    Stall,
}

/// Responder result: the transfer outcome plus complete frames for the
/// clock to send back.  Each frame's byte 0 must be the destination address
/// shifted left once, as the CRC covers it.
#[derive(Debug, Clone)]
pub struct Reply {
    pub outcome: Outcome,
    pub frames: Vec<Vec<u8>>,
}

impl Reply {
    pub fn ack(frames: Vec<Vec<u8>>) -> Self {
        Self {
            outcome: Outcome::Ack,
            frames,
        }
    }

    pub fn nack() -> Self {
        Self {
            outcome: Outcome::Nack,
            frames: Vec::new(),
        }
    }

    pub fn nack_lines_busy() -> Self {
        Self {
            outcome: Outcome::NackLinesBusy,
            frames: Vec::new(),
        }
    }

    pub fn clock_stretch() -> Self {
        Self {
            outcome: Outcome::ClockStretch,
            frames: Vec::new(),
        }
    }

    pub fn stall() -> Self {
        Self {
            outcome: Outcome::Stall,
            frames: Vec::new(),
        }
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Reply + Send>;

const MASTER_REGS: usize = 7;
const SLAVE_REGS: usize = 5;
const SLAVE_ENABLE: u32 = 0x01;

struct SimBus {
    master: [u32; MASTER_REGS],
    slave: [u32; SLAVE_REGS],
    tx: Vec<u8>,
    started: bool,
    done: bool,
    stalled: bool,
    errors: u32,
    rx: VecDeque<u8>,
    pending: VecDeque<(u8, Vec<u8>)>,
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
    lines_stuck: bool,
    busy_reads: u32,
    overrun_next: bool,
    pins_connected: bool,
    pins_claimed: bool,
    resets: u32,
}

impl SimBus {
    fn new() -> Self {
        Self {
            master: [0; MASTER_REGS],
            slave: [0; SLAVE_REGS],
            tx: Vec::new(),
            started: false,
            done: false,
            stalled: false,
            errors: 0,
            rx: VecDeque::new(),
            pending: VecDeque::new(),
            sent: Vec::new(),
            responder: None,
            lines_stuck: false,
            busy_reads: 0,
            overrun_next: false,
            pins_connected: false,
            pins_claimed: false,
            resets: 0,
        }
    }

    fn data_length(&self) -> usize {
        self.master[MasterReg::DataLength as usize] as usize
    }

    fn master_status(&self) -> u32 {
        let mut status = self.errors;
        if self.done {
            status |= master::S_DONE;
        }
        let space = if self.started {
            !self.done
        } else {
            self.tx.len() < master::FIFO_DEPTH
        };
        if space {
            status |= master::S_TXD;
        }
        status
    }

    fn write_control(&mut self, value: u32) {
        if value & master::C_CLEAR != 0 {
            self.tx.clear();
            self.started = false;
            self.done = false;
            self.stalled = false;
        }
        if value & master::C_I2CEN != 0 && value & master::C_ST != 0 {
            self.started = true;
            self.try_complete();
        }
        self.master[MasterReg::Control as usize] = value & !(master::C_ST | master::C_CLEAR);
    }

    fn try_complete(&mut self) {
        if !self.started || self.done || self.stalled || self.tx.len() < self.data_length() {
            return;
        }

        let destination = self.master[MasterReg::Address as usize] as u8;
        let mut frame = Vec::with_capacity(self.tx.len() + 1);
        frame.push(destination << 1);
        frame.extend_from_slice(&self.tx);
        trace!("Sim received {:02x?}", frame);
        self.sent.push(frame.clone());

        let reply = match self.responder.as_mut() {
            Some(responder) => responder(&frame),
            None => Reply::nack(),
        };

        match reply.outcome {
            Outcome::Ack => self.done = true,
            Outcome::Nack => {
                self.done = true;
                self.errors |= master::S_ERR;
            }
            Outcome::NackLinesBusy => {
                self.done = true;
                self.errors |= master::S_ERR;
                self.busy_reads = 1;
            }
            Outcome::ClockStretch => {
                self.done = true;
                self.errors |= master::S_CLKT;
            }
            Outcome::Stall => self.stalled = true,
        }

        for frame in reply.frames {
            self.queue(frame);
        }
    }

    fn queue(&mut self, frame: Vec<u8>) {
        let Some((&first, rest)) = frame.split_first() else {
            return;
        };
        self.pending.push_back((first >> 1, rest.to_vec()));
    }

    // Move the first frame for the current listen address into the FIFO
    fn deliver(&mut self) {
        if !self.rx.is_empty() || self.slave[SlaveReg::Control as usize] & SLAVE_ENABLE == 0 {
            return;
        }
        let listen = self.slave[SlaveReg::Address as usize] as u8;
        let Some(index) = self.pending.iter().position(|(a, _)| *a == listen) else {
            return;
        };
        if let Some((_, bytes)) = self.pending.remove(index) {
            self.rx.extend(bytes);
            if self.overrun_next {
                self.overrun_next = false;
                self.slave[SlaveReg::ReceiveStatus as usize] |= slave::RSR_OE;
            }
        }
    }

    fn slave_flags(&mut self) -> u32 {
        self.deliver();
        let mut flags = (self.rx.len().min(31) as u32) << slave::FR_RXFLEVEL_SHIFT;
        if self.rx.is_empty() {
            flags |= slave::FR_RXFE;
        }
        flags
    }
}

/// In-memory [`RegisterPort`].
#[derive(Clone)]
pub struct SimPort {
    bus: Arc<Mutex<SimBus>>,
    epoch: Instant,
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPort {
    /// A quiet bus with no clock attached: every transfer is not
    /// acknowledged until a responder is installed.
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Mutex::new(SimBus::new())),
            epoch: Instant::now(),
        }
    }

    fn bus(&self) -> MutexGuard<'_, SimBus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the clock's behaviour, replacing any previous responder.
    pub fn respond<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Reply + Send + 'static,
    {
        self.bus().responder = Some(Box::new(responder));
    }

    /// Queue a frame from the clock, as if it had become bus master.
    pub fn inject(&self, frame: Vec<u8>) {
        self.bus().queue(frame);
    }

    /// Every frame the master completed, byte 0 included.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.bus().sent.clone()
    }

    /// Hold the lines low (or release them).
    pub fn set_lines_stuck(&self, stuck: bool) {
        self.bus().lines_stuck = stuck;
    }

    /// Flag a hardware overrun on the next delivered frame.
    pub fn flag_overrun(&self) {
        self.bus().overrun_next = true;
    }

    /// Pretend another driver has the bus pins configured as outputs.
    pub fn set_pins_claimed(&self, claimed: bool) {
        self.bus().pins_claimed = claimed;
    }

    pub fn pins_connected(&self) -> bool {
        self.bus().pins_connected
    }

    /// Number of times the slave was re-enabled by a bus reset.
    pub fn resets(&self) -> u32 {
        self.bus().resets
    }

    pub fn master_register(&self, reg: MasterReg) -> u32 {
        self.bus().master[reg as usize]
    }

    pub fn slave_register(&self, reg: SlaveReg) -> u32 {
        self.bus().slave[reg as usize]
    }
}

impl RegisterPort for SimPort {
    fn read_master(&mut self, reg: MasterReg) -> u32 {
        let bus = self.bus();
        match reg {
            MasterReg::Status => bus.master_status(),
            reg => bus.master[reg as usize],
        }
    }

    fn write_master(&mut self, reg: MasterReg, value: u32) {
        let mut bus = self.bus();
        match reg {
            MasterReg::Control => bus.write_control(value),
            MasterReg::Status => {
                if value & master::S_DONE != 0 {
                    bus.done = false;
                }
                bus.errors &= !value;
            }
            MasterReg::Fifo => {
                bus.tx.push(value as u8);
                bus.try_complete();
            }
            reg => bus.master[reg as usize] = value,
        }
    }

    fn read_slave(&mut self, reg: SlaveReg) -> u32 {
        let mut bus = self.bus();
        match reg {
            SlaveReg::Flags => bus.slave_flags(),
            SlaveReg::Data => bus.rx.pop_front().map_or(0, u32::from),
            reg => bus.slave[reg as usize],
        }
    }

    fn write_slave(&mut self, reg: SlaveReg, value: u32) {
        let mut bus = self.bus();
        if reg == SlaveReg::Control && value == slave::CR_RESET {
            bus.resets += 1;
        }
        bus.slave[reg as usize] = value;
    }

    fn lines_idle(&mut self) -> bool {
        let mut bus = self.bus();
        if bus.lines_stuck {
            return false;
        }
        if bus.busy_reads > 0 {
            bus.busy_reads -= 1;
            return false;
        }
        true
    }

    fn micros(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn connect_pins(&mut self, connected: bool) {
        self.bus().pins_connected = connected;
    }

    fn check_wiring(&mut self) -> Result<()> {
        if self.bus().pins_claimed {
            Err(Error::WiringFault)
        } else {
            Ok(())
        }
    }
}

/// Builders for frames the clock sends.
pub mod frames {
    use crate::crc;
    use crate::frame::{BROADCAST_ADDRESS, CLOCK_SOURCE};

    /// Sealed frame addressed to `listen`.
    pub fn build(listen: u8, kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![listen << 1, CLOCK_SOURCE, (payload.len() + 5) as u8, kind];
        frame.extend_from_slice(payload);
        frame.push(0);
        crc::seal(&mut frame);
        frame
    }

    pub fn ack(listen: u8, command: u8, status: u8) -> Vec<u8> {
        build(listen, 0x01, &[command, status])
    }

    pub fn hello() -> Vec<u8> {
        build(BROADCAST_ADDRESS, 0x02, &[])
    }

    /// Time frame.  `fields` are left h/m/s then right h/m/s, minutes and
    /// seconds in BCD.
    pub fn time(fields: [u8; 6], lever: bool) -> Vec<u8> {
        let mut payload = [0u8; 16];
        payload[1..4].copy_from_slice(&fields[..3]);
        payload[7..10].copy_from_slice(&fields[3..]);
        payload[15] = lever as u8;
        build(BROADCAST_ADDRESS, 0x04, &payload)
    }

    pub fn button(current: u8, previous: u8) -> Vec<u8> {
        build(BROADCAST_ADDRESS, 0x05, &[current, previous])
    }
}
