//! Protocol engine for the clock.
//!
//! [`ClockClient`] owns one reusable frame per command, sends them over a
//! [`Transport`] and interprets the acknowledgements.  The single-shot
//! operations ([`ClockClient::mode_select()`], [`ClockClient::display()`],
//! ...) make exactly one attempt; the application level operations
//! ([`ClockClient::set_text()`], [`ClockClient::set_and_run()`], ...) retry
//! each step up to [`crate::config::RetryLimits::command_attempts`] times.
//!
//! [`ClockClient::configure()`], in [`recovery`], is the only operation that
//! chains several commands into a recovery policy.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::Transport;
use crate::config::Config;
use crate::frame::{
    BROADCAST_ADDRESS, Command, CommandBuffer, DISPLAY_TEXT_LEN, HOST_ADDRESS, MODE_CENTRAL,
    MODE_OFF, STATUS_CENTRAL_CONTROL, STATUS_DISPLAY_ALREADY_EMPTY, STATUS_DISPLAY_BUSY,
    STATUS_DISPLAY_BUSY_MASK, STATUS_DISPLAY_CLEARED, STATUS_DISPLAY_MASK, STATUS_READY, bcd_pack,
};
use crate::inbox::{ButtonEvent, ClockTime};
use crate::stats::Diagnostics;
use crate::{Error, Result};

pub mod recovery;

pub use recovery::{ConfigureState, RecoveryReport};

// Display payload, after the text
const DISPLAY_BEEP: usize = 12;
const DISPLAY_LEFT_DOTS: usize = 14;
const DISPLAY_RIGHT_DOTS: usize = 15;

// Set-and-run payload
const RUN_LEFT_HOURS: usize = 0;
const RUN_LEFT_MINUTES: usize = 1;
const RUN_LEFT_SECONDS: usize = 2;
const RUN_RIGHT_HOURS: usize = 3;
const RUN_RIGHT_MINUTES: usize = 4;
const RUN_RIGHT_SECONDS: usize = 5;
const RUN_FLAGS: usize = 6;

/// Timer run modes for [`ClockClient::set_and_run()`].
pub mod run {
    pub const STOP: u8 = 0;
    pub const COUNT_DOWN: u8 = 1;
    pub const COUNT_UP: u8 = 2;
}

struct Commands {
    wake: CommandBuffer,
    central_control: CommandBuffer,
    mode_select: CommandBuffer,
    end_display: CommandBuffer,
    display: CommandBuffer,
    set_and_run: CommandBuffer,
}

impl Commands {
    fn new() -> Self {
        Self {
            wake: CommandBuffer::new(Command::Wake),
            central_control: CommandBuffer::new(Command::CentralControl),
            mode_select: CommandBuffer::new(Command::ModeSelect),
            end_display: CommandBuffer::new(Command::EndDisplay),
            display: CommandBuffer::new(Command::Display),
            set_and_run: CommandBuffer::new(Command::SetAndRun),
        }
    }

    fn get(&self, command: Command) -> &CommandBuffer {
        match command {
            Command::Wake => &self.wake,
            Command::CentralControl => &self.central_control,
            Command::ModeSelect => &self.mode_select,
            Command::EndDisplay => &self.end_display,
            Command::Display => &self.display,
            Command::SetAndRun => &self.set_and_run,
        }
    }
}

/// Client for the clock's application protocol.
///
/// Not reentrant: the command frames are reused across calls, so callers on
/// several threads must serialize access themselves.
///
/// Example usage:
///
/// ```rust,ignore
/// let mut clock = ClockClient::new(link, Config::default(), Arc::new(NoDiagnostics));
/// clock.configure()?;
/// clock.set_and_run(run::COUNT_DOWN, 0, 5, 0, run::STOP, 0, 5, 0)?;
/// loop {
///     if let Some(event) = clock.button_event()? {
///         // ...
///     }
///     std::thread::sleep(Duration::from_millis(10));
/// }
/// ```
pub struct ClockClient<T: Transport> {
    transport: T,
    config: Config,
    diagnostics: Arc<dyn Diagnostics>,
    commands: Commands,
}

impl<T: Transport> ClockClient<T> {
    /// Create a new client.
    ///
    /// Arguments:
    /// - `transport`: started link, or any other [`Transport`]
    /// - `config`: acknowledgement timings and retry limits are used
    /// - `diagnostics`: sink for send and ack failures
    pub fn new(transport: T, config: Config, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            transport,
            config,
            diagnostics,
            commands: Commands::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Frame as it was last sent (or will next be sent) for `command`.
    pub fn command_frame(&self, command: Command) -> &[u8] {
        self.commands.get(command).as_bytes()
    }

    fn send(&mut self, command: Command, listen: u8) -> Result<()> {
        let frame = self.commands.get(command).as_bytes();
        trace!("Sending {} {:02x?}", command.name(), frame);
        self.transport
            .send(command.destination(), frame, listen)
            .inspect_err(|e| {
                warn!("Sending {} failed: {e}", command.name());
                self.diagnostics.send_failed(command, *e);
            })
    }

    fn ack(&mut self, command: Command, listen: u8, timeout: Duration) -> Result<u8> {
        self.transport
            .await_ack(listen, command.id(), timeout)
            .inspect_err(|e| {
                warn!("No ack for {}: {e}", command.name());
                self.diagnostics.ack_failed(command, *e);
            })
    }

    fn reject(&self, command: Command, status: u8) -> Error {
        warn!("{} rejected, status {status:#04x}", command.name());
        self.diagnostics.ack_failed(command, Error::NegativeAck);
        Error::NegativeAck
    }

    /// Send wake to the clock's power-down address and wait for hello.
    ///
    /// The clock never acknowledges a wake, so a successful send is itself
    /// a fault ([`Error::UnexpectedAck`]).
    pub fn wake(&mut self) -> Result<()> {
        let frame = self.commands.wake.as_bytes();
        match self
            .transport
            .send(Command::Wake.destination(), frame, BROADCAST_ADDRESS)
        {
            Ok(()) => {
                warn!("Wake was acknowledged");
                self.diagnostics
                    .ack_failed(Command::Wake, Error::UnexpectedAck);
                return Err(Error::UnexpectedAck);
            }
            Err(Error::NotRunning) => return Err(Error::NotRunning),
            Err(e) => trace!("Wake not acknowledged ({e}), as expected"),
        }

        if self.transport.await_hello(self.config.acks.hello) {
            debug!("Clock woke");
            Ok(())
        } else {
            warn!("No hello after wake");
            self.diagnostics.ack_failed(Command::Wake, Error::NoAck);
            Err(Error::NoAck)
        }
    }

    /// Ask the clock to accept central control.
    pub fn central_control(&mut self) -> Result<()> {
        let command = Command::CentralControl;
        self.send(command, HOST_ADDRESS)?;
        let status = self.ack(command, HOST_ADDRESS, self.config.acks.ack)?;
        if status & STATUS_CENTRAL_CONTROL != 0 {
            Ok(())
        } else {
            Err(self.reject(command, status))
        }
    }

    /// Select mode 25, where the host owns the display and timers.
    ///
    /// Fails with [`Error::NegativeAck`] if the clock is not under central
    /// control.
    pub fn mode_select(&mut self) -> Result<()> {
        let command = Command::ModeSelect;
        self.commands.mode_select.payload_mut()[0] = MODE_CENTRAL;
        self.commands.mode_select.seal();

        self.send(command, HOST_ADDRESS)?;
        let status = self.ack(command, HOST_ADDRESS, self.config.acks.ack)?;
        if status == STATUS_READY {
            Ok(())
        } else {
            Err(self.reject(command, status))
        }
    }

    /// Remove any text from the display.
    ///
    /// An empty display answers quickly on our own address; otherwise the
    /// clock broadcasts once the text is gone.
    pub fn end_display(&mut self) -> Result<()> {
        let command = Command::EndDisplay;
        self.send(command, HOST_ADDRESS)?;

        match self
            .transport
            .await_ack(HOST_ADDRESS, command.id(), self.config.acks.fast_reply)
        {
            Ok(status) if status & STATUS_DISPLAY_MASK == STATUS_DISPLAY_ALREADY_EMPTY => {
                trace!("Display already empty");
                return Ok(());
            }
            Ok(status) => return Err(self.reject(command, status)),
            Err(Error::NotRunning) => return Err(Error::NotRunning),
            Err(_) => (),
        }

        let status = self.ack(command, BROADCAST_ADDRESS, self.config.acks.ack)?;
        if status & STATUS_DISPLAY_MASK == STATUS_DISPLAY_CLEARED {
            Ok(())
        } else {
            Err(self.reject(command, status))
        }
    }

    /// Send the display frame as currently filled in by
    /// [`ClockClient::set_text()`].
    pub fn display(&mut self) -> Result<()> {
        let command = Command::Display;
        self.send(command, BROADCAST_ADDRESS)?;
        let status = self.ack(command, BROADCAST_ADDRESS, self.config.acks.ack)?;
        if status & STATUS_DISPLAY_BUSY_MASK == STATUS_DISPLAY_BUSY {
            Err(self.reject(command, status))
        } else {
            Ok(())
        }
    }

    /// Send the set-and-run frame as currently filled in by
    /// [`ClockClient::set_and_run()`].
    pub fn send_set_and_run(&mut self) -> Result<()> {
        let command = Command::SetAndRun;
        self.send(command, HOST_ADDRESS)?;
        let status = self.ack(command, HOST_ADDRESS, self.config.acks.ack)?;
        if status == STATUS_READY {
            Ok(())
        } else {
            Err(self.reject(command, status))
        }
    }

    fn retry(&mut self, what: &str, mut op: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        let attempts = self.config.retries.command_attempts.max(1);
        let mut last = Error::NoAck;
        for attempt in 1..=attempts {
            match op(self) {
                Ok(()) => return Ok(()),
                Err(Error::NotRunning) => return Err(Error::NotRunning),
                Err(e) => {
                    debug!("{what} attempt {attempt}/{attempts} failed: {e}");
                    last = e;
                }
            }
        }
        warn!("{what} failed after {attempts} attempts: {last}");
        Err(last)
    }

    /// Show `text` on the display.
    ///
    /// Text is truncated or space padded to 11 characters, stopping at the
    /// first NUL.  `beep` is the beep length, `left_dots` and `right_dots`
    /// select the dots and flags on each side.
    ///
    /// Clears the display first, then sends the text, each with retries.
    pub fn set_text(&mut self, text: &str, beep: u8, left_dots: u8, right_dots: u8) -> Result<()> {
        let display = &mut self.commands.display;
        let payload = display.payload_mut();
        let (field, flags) = payload.split_at_mut(DISPLAY_TEXT_LEN);
        field.fill(b' ');
        for (slot, byte) in field
            .iter_mut()
            .zip(text.bytes().take_while(|b| *b != 0))
        {
            *slot = byte;
        }
        flags[DISPLAY_BEEP - DISPLAY_TEXT_LEN] = beep;
        flags[DISPLAY_LEFT_DOTS - DISPLAY_TEXT_LEN] = left_dots;
        flags[DISPLAY_RIGHT_DOTS - DISPLAY_TEXT_LEN] = right_dots;
        display.seal();
        debug!("Set text {text:?}");

        self.retry("end display", Self::end_display)?;
        self.retry("display", Self::display)
    }

    /// Clear any text, returning the display to the clock times.
    pub fn end_text(&mut self) -> Result<()> {
        self.retry("end display", Self::end_display)
    }

    /// Set both timers and their run modes (see [`run`]).
    ///
    /// Minutes and seconds must be 0-59.
    #[allow(clippy::too_many_arguments)]
    pub fn set_and_run(
        &mut self,
        left_run: u8,
        left_hours: u8,
        left_minutes: u8,
        left_seconds: u8,
        right_run: u8,
        right_hours: u8,
        right_minutes: u8,
        right_seconds: u8,
    ) -> Result<()> {
        let buffer = &mut self.commands.set_and_run;
        let payload = buffer.payload_mut();
        payload[RUN_LEFT_HOURS] = left_hours;
        payload[RUN_LEFT_MINUTES] = bcd_pack(left_minutes);
        payload[RUN_LEFT_SECONDS] = bcd_pack(left_seconds);
        payload[RUN_RIGHT_HOURS] = right_hours;
        payload[RUN_RIGHT_MINUTES] = bcd_pack(right_minutes);
        payload[RUN_RIGHT_SECONDS] = bcd_pack(right_seconds);
        payload[RUN_FLAGS] = (left_run & 0x03) | ((right_run & 0x03) << 2);
        buffer.seal();
        debug!(
            "Set and run {left_hours}:{left_minutes:02}:{left_seconds:02} ({left_run}) \
             {right_hours}:{right_minutes:02}:{right_seconds:02} ({right_run})"
        );

        self.retry("set and run", Self::send_set_and_run)
    }

    /// Change the run modes, keeping the times the clock last reported.
    pub fn run(&mut self, left_run: u8, right_run: u8) -> Result<()> {
        let ClockTime { left, right, .. } = self.transport.time();
        self.set_and_run(
            left_run,
            left.hours,
            left.minutes,
            left.seconds,
            right_run,
            right.hours,
            right.minutes,
            right.seconds,
        )
    }

    /// Latest time reported by the clock.
    pub fn time(&self) -> ClockTime {
        self.transport.time()
    }

    /// Next button event, if any.  A receive fault since the last call is
    /// returned first, once.
    pub fn button_event(&mut self) -> Result<Option<ButtonEvent>> {
        self.transport.next_button()
    }

    /// Last raw button and lever state.
    pub fn button_state(&self) -> u8 {
        self.transport.button_state()
    }

    /// Queued button events.
    pub fn pending_buttons(&self) -> usize {
        self.transport.pending()
    }

    /// Switch the clock off.  `return_mode` selects the mode it comes back
    /// up in.  No acknowledgement is expected.
    pub fn off(&mut self, return_mode: u8) -> Result<()> {
        self.commands.mode_select.payload_mut()[0] = MODE_OFF | return_mode;
        self.commands.mode_select.seal();
        info!("Switching clock off, return mode {return_mode}");
        self.send(Command::ModeSelect, BROADCAST_ADDRESS)
    }

    /// Stop the transport.
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
    }
}
