//! Register-level access to the bus hardware.
//!
//! This module contains the [`RegisterPort`] trait, the only way the rest of
//! the crate touches hardware.  It exposes the two peripheral register blocks
//! used to talk to the clock, plus the line levels and a free running
//! microsecond counter:
//!
//! - The BSC **master** block, used to send commands to the clock
//! - The BSC/SPI **slave** block, used to receive the frames the clock sends
//!   when it becomes bus master itself
//!
//! # Possible implementations
//!
//! - [`MmioPort`]: volatile access to register windows the application has
//!   already mapped into the process (e.g. from `/dev/mem` on a Raspberry Pi)
//! - `sim::SimPort`: an in-memory simulation used for testing
//!
//! Register values are the raw 32-bit contents.  Only the bits listed in
//! [`master`] and [`slave`] are interpreted by this crate.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::time::Duration;

use crate::{Error, Result};

/// Master (BSC) register offsets, in 32-bit words.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterReg {
    Control = 0,
    Status = 1,
    DataLength = 2,
    Address = 3,
    Fifo = 4,
    ClockDivider = 5,
    DataDelay = 6,
}

/// Slave (BSC/SPI slave) register offsets, in 32-bit words.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveReg {
    Data = 0,
    ReceiveStatus = 1,
    Address = 2,
    Control = 3,
    Flags = 4,
}

/// Master register bits.
pub mod master {
    /// Control: peripheral enable
    pub const C_I2CEN: u32 = 0x8000;
    /// Control: start transfer
    pub const C_ST: u32 = 0x80;
    /// Control: clear FIFO
    pub const C_CLEAR: u32 = 0x10;

    /// Status: transfer done
    pub const S_DONE: u32 = 0x02;
    /// Status: FIFO can accept data
    pub const S_TXD: u32 = 0x10;
    /// Status: slave address not acknowledged
    pub const S_ERR: u32 = 0x100;
    /// Status: clock stretch timeout
    pub const S_CLKT: u32 = 0x200;
    /// Write-1-to-clear mask for DONE, ERR and CLKT
    pub const S_CLEAR_ALL: u32 = S_CLKT | S_ERR | S_DONE;

    /// Depth of the transmit FIFO.
    pub const FIFO_DEPTH: usize = 16;
}

/// Slave register bits.
pub mod slave {
    /// Flags: receive FIFO empty
    pub const FR_RXFE: u32 = 0x02;
    /// Flags: receive in progress
    pub const FR_RXBUSY: u32 = 0x20;
    /// Flags: receive FIFO level field
    pub const FR_RXFLEVEL_MASK: u32 = 0xf800;
    pub const FR_RXFLEVEL_SHIFT: u32 = 11;

    /// Receive status: overrun
    pub const RSR_OE: u32 = 0x01;

    /// Control: enable, I2C mode, receive enable
    pub const CR_ENABLE: u32 = 0x205;
    /// Control: enable with transmit, used while resetting a stuck bus
    pub const CR_RESET: u32 = 0x285;
    /// Control: break
    pub const CR_BREAK: u32 = 0x80;
}

/// Register access trait.
///
/// Implementations must not cache register values: every read must reflect
/// the current hardware state, as the bus transport polls them in tight
/// loops.
///
/// The port is owned by a single [`crate::bus::BusLink`], moved onto the
/// listener thread's shared state, hence the `Send` bound.
pub trait RegisterPort: Send {
    /// Read a master register.
    fn read_master(&mut self, reg: MasterReg) -> u32;

    /// Write a master register.
    fn write_master(&mut self, reg: MasterReg, value: u32);

    /// Read a slave register.  Reading [`SlaveReg::Data`] pops a byte from
    /// the receive FIFO.
    fn read_slave(&mut self, reg: SlaveReg) -> u32;

    /// Write a slave register.
    fn write_slave(&mut self, reg: SlaveReg, value: u32);

    /// Whether both SDA and SCL currently read high.
    fn lines_idle(&mut self) -> bool;

    /// Free running microsecond counter.  Must be monotonic.
    fn micros(&self) -> u64;

    /// Route the bus pins to the peripherals (`true`) or release them to
    /// plain inputs (`false`).  Toggling via input unsticks a hung master.
    fn connect_pins(&mut self, connected: bool) {
        let _ = connected;
    }

    /// Check that nothing else has claimed the bus pins.
    ///
    /// Returns [`Error::WiringFault`] if they are driven by another function.
    fn check_wiring(&mut self) -> Result<()> {
        Ok(())
    }

    /// Core clock in MHz, used to program the master clock divider.
    fn core_clock_mhz(&self) -> u32 {
        250
    }

    /// Sleep for roughly `micros` microseconds.
    fn pause(&mut self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }
}

/// GPIO pair the slave block is routed to.  Differs by SoC generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlavePins {
    /// GPIO18/19, ALT3 (BCM2835/6/7)
    Gpio18And19,
    /// GPIO10/11, ALT3 (BCM2711)
    Gpio10And11,
}

/// Base pointers of the register windows used by [`MmioPort`].
#[derive(Debug, Clone, Copy)]
pub struct MmioWindows {
    pub gpio: *mut u32,
    pub system_timer: *mut u32,
    pub master: *mut u32,
    pub slave: *mut u32,
}

// GPIO words
const GPFSEL0: usize = 0;
const GPFSEL1: usize = 1;
const GPLEV0: usize = 13;

// System timer words
const TIMER_CLO: usize = 1;
const TIMER_CHI: usize = 2;

const SDA_BIT: u32 = 1 << 2;
const SCL_BIT: u32 = 1 << 3;

/// Register port using direct volatile access to memory mapped windows.
pub struct MmioPort {
    windows: MmioWindows,
    pins: SlavePins,
    core_clock_mhz: u32,
}

// SAFETY: the windows are process-wide device mappings, not thread-local
// data, and the port is only ever accessed by one thread at a time through
// the link's mutex.
unsafe impl Send for MmioPort {}

impl MmioPort {
    /// Create a new port over already mapped register windows.
    ///
    /// Returns [`Error::HardwareUnavailable`] if any window is null.
    ///
    /// # Safety
    ///
    /// Every pointer must reference a live mapping of at least one page of
    /// the corresponding peripheral, valid for volatile reads and writes for
    /// the lifetime of the port, and no other code may drive the master or
    /// slave block concurrently.
    pub unsafe fn new(windows: MmioWindows, pins: SlavePins, core_clock_mhz: u32) -> Result<Self> {
        if windows.gpio.is_null()
            || windows.system_timer.is_null()
            || windows.master.is_null()
            || windows.slave.is_null()
        {
            return Err(Error::HardwareUnavailable);
        }

        Ok(Self {
            windows,
            pins,
            core_clock_mhz,
        })
    }

    fn read(&self, base: *mut u32, word: usize) -> u32 {
        // SAFETY: `new()`'s contract guarantees `base` maps a full page.
        unsafe { core::ptr::read_volatile(base.add(word)) }
    }

    fn write(&mut self, base: *mut u32, word: usize, value: u32) {
        // SAFETY: `new()`'s contract guarantees `base` maps a full page.
        unsafe { core::ptr::write_volatile(base.add(word), value) }
    }
}

impl RegisterPort for MmioPort {
    fn read_master(&mut self, reg: MasterReg) -> u32 {
        self.read(self.windows.master, reg as usize)
    }

    fn write_master(&mut self, reg: MasterReg, value: u32) {
        self.write(self.windows.master, reg as usize, value)
    }

    fn read_slave(&mut self, reg: SlaveReg) -> u32 {
        self.read(self.windows.slave, reg as usize)
    }

    fn write_slave(&mut self, reg: SlaveReg, value: u32) {
        self.write(self.windows.slave, reg as usize, value)
    }

    fn lines_idle(&mut self) -> bool {
        let level = self.read(self.windows.gpio, GPLEV0);
        level & (SDA_BIT | SCL_BIT) == SDA_BIT | SCL_BIT
    }

    fn micros(&self) -> u64 {
        // CHI may tick between the reads; re-read until stable.
        loop {
            let hi = self.read(self.windows.system_timer, TIMER_CHI);
            let lo = self.read(self.windows.system_timer, TIMER_CLO);
            if hi == self.read(self.windows.system_timer, TIMER_CHI) {
                return ((hi as u64) << 32) | lo as u64;
            }
        }
    }

    fn connect_pins(&mut self, connected: bool) {
        let gpio = self.windows.gpio;

        // GPIO2/3: input (000) or ALT0 (100)
        let mut fsel0 = self.read(gpio, GPFSEL0) & 0xffff_f03f;
        if connected {
            fsel0 |= 0x900;
        }
        self.write(gpio, GPFSEL0, fsel0);

        // Slave pair: input (000) or ALT3 (111)
        let (clear, alt3) = match self.pins {
            SlavePins::Gpio18And19 => (0xc0ff_ffff, 0x3f00_0000),
            SlavePins::Gpio10And11 => (0xffff_ffc0, 0x0000_003f),
        };
        let mut fsel1 = self.read(gpio, GPFSEL1) & clear;
        if connected {
            fsel1 |= alt3;
        }
        self.write(gpio, GPFSEL1, fsel1);
    }

    // Any of the four pins configured as an output means another driver
    // owns it.
    fn check_wiring(&mut self) -> Result<()> {
        let fsel0 = self.read(self.windows.gpio, GPFSEL0);
        let fsel1 = self.read(self.windows.gpio, GPFSEL1);

        let is_output = |word: u32, pin_in_word: u32| (word >> (pin_in_word * 3)) & 0x7 == 0x1;

        let (a, b) = match self.pins {
            SlavePins::Gpio18And19 => (8, 9),
            SlavePins::Gpio10And11 => (0, 1),
        };
        if is_output(fsel0, 2) || is_output(fsel0, 3) || is_output(fsel1, a) || is_output(fsel1, b)
        {
            return Err(Error::WiringFault);
        }
        Ok(())
    }

    fn core_clock_mhz(&self) -> u32 {
        self.core_clock_mhz
    }
}
