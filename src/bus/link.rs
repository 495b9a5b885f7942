//! [`BusLink`], the register backed [`Transport`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
#[cfg(unix)]
use std::os::unix::thread::{JoinHandleExt, RawPthread};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::Transport;
use crate::bus::wire::Wire;
use crate::config::{BusTimings, Config, micros};
use crate::frame::{BROADCAST_ADDRESS, CLOCK_ADDRESS, HOST_ADDRESS, MessageKind, RECEIVE_BUFFER_LEN};
use crate::inbox::{ButtonEvent, ClockTime, Inbox};
use crate::io::{MasterReg, RegisterPort, SlaveReg};
use crate::stats::Diagnostics;
use crate::{Error, Result};

const LISTENER_NAME: &str = "dgt3000-listener";

struct BusState<P> {
    port: P,
    inbox: Inbox,
}

struct Shared<P> {
    state: Mutex<BusState<P>>,
    ack: Condvar,
    running: AtomicBool,
}

impl<P> Shared<P> {
    // A panic while holding the lock cannot leave the port or inbox
    // structurally invalid, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, BusState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of the register port, the inbox and the listener thread.
///
/// Created with [`BusLink::start()`].  Dropping the link stops the listener
/// and disables the slave block.
///
/// The listener is moved to `SCHED_FIFO` at maximum priority on start unless
/// [`BusTimings::listener_realtime`] is cleared.  That needs `CAP_SYS_NICE`;
/// without it the link still runs, at default priority, and logs a warning.
/// Applications managing scheduling themselves can use
/// [`BusLink::listener_pthread()`] instead.
///
/// Example:
///
/// ```rust,ignore
/// let mut config = Config::default();
/// config.bus.listener_realtime = false;
/// let link = BusLink::start(port, config, Arc::new(NoDiagnostics))?;
/// if let Some(thread) = link.listener_pthread() {
///     my_scheduler::pin_to_core(thread, 3);
/// }
/// ```
pub struct BusLink<P: RegisterPort + 'static> {
    shared: Arc<Shared<P>>,
    config: Config,
    listener: Option<JoinHandle<()>>,
}

impl<P: RegisterPort + 'static> BusLink<P> {
    /// Check the wiring, reset the bus and start the listener.
    ///
    /// Arguments:
    /// - `port`: register port, owned by the link from here on
    /// - `config`: timings, only the bus and button groups are used
    /// - `diagnostics`: sink for receive faults and queue drops
    ///
    /// Returns [`Error::WiringFault`] if the pins are claimed by another
    /// function, or either line is low with the pins released.  The listener
    /// is not started in either case.
    pub fn start(mut port: P, config: Config, diagnostics: Arc<dyn Diagnostics>) -> Result<Self> {
        port.check_wiring().inspect_err(|_| {
            error!("Bus pins configured as outputs, is another I2C driver loaded?");
        })?;

        port.connect_pins(false);
        if !port.lines_idle() {
            error!("Bus lines low with pins released, short circuit or no connection?");
            return Err(Error::WiringFault);
        }

        Wire::new(&mut port, &config.bus).reset();
        port.write_master(MasterReg::Address, CLOCK_ADDRESS as u32);

        let inbox = Inbox::new(&config.buttons, diagnostics.clone());
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState { port, inbox }),
            ack: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let listener = {
            let shared = shared.clone();
            let timings = config.bus.clone();
            thread::Builder::new()
                .name(LISTENER_NAME.into())
                .spawn(move || listen(shared, timings, diagnostics))
                .map_err(|e| {
                    error!("Failed to start listener: {e}");
                    Error::NotRunning
                })?
        };

        if config.bus.listener_realtime {
            match set_realtime(&listener) {
                Ok(()) => debug!("Listener running SCHED_FIFO"),
                Err(e) => warn!("Listener left at default priority: {e}"),
            }
        }

        info!("Link started");
        Ok(Self {
            shared,
            config,
            listener: Some(listener),
        })
    }

    /// The listener thread.  `None` after shutdown.
    pub fn listener_thread(&self) -> Option<&Thread> {
        self.listener.as_ref().map(|handle| handle.thread())
    }

    /// The listener's pthread, for applications that set its scheduling
    /// policy or affinity themselves.  `None` after shutdown.
    #[cfg(unix)]
    pub fn listener_pthread(&self) -> Option<RawPthread> {
        self.listener.as_ref().map(JoinHandleExt::as_pthread_t)
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some() && self.shared.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    /// Stop the listener and release the bus.  Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.listener.take() else {
            return;
        };

        // Stop the clock broadcasting to us
        self.shared
            .lock()
            .port
            .write_slave(SlaveReg::Address, HOST_ADDRESS as u32);

        self.shared.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            error!("Listener thread panicked");
        }

        let mut state = self.shared.lock();
        state.port.write_slave(SlaveReg::Control, 0);
        state.port.connect_pins(false);
        info!("Link stopped");
    }

    /// Wait for `polls` consecutive quiet samples, then return with the lock
    /// held so nothing can start arriving before the transfer does.
    ///
    /// The `bus_free` window restarts on every busy sample; `bus_free_cap`
    /// bounds the wait as a whole.
    fn wait_bus_free(&self, timings: &BusTimings) -> Result<MutexGuard<'_, BusState<P>>> {
        let mut state = self.shared.lock();
        let window = micros(timings.bus_free);
        let start = state.port.micros();
        let cap = start.saturating_add(micros(timings.bus_free_cap));
        let mut deadline = start.saturating_add(window);
        let mut quiet = 0;
        loop {
            let mut wire = Wire::new(&mut state.port, timings);
            if wire.quiet() {
                quiet += 1;
            } else {
                quiet = 0;
                deadline = wire.now().saturating_add(window);
            }
            let now = wire.now();

            if quiet >= timings.bus_free_polls {
                return Ok(state);
            }
            if now > deadline || now > cap {
                warn!("Bus not free after {}us", now.saturating_sub(start));
                return Err(Error::BusTimeout);
            }

            // Let the listener in to drain anything arriving
            drop(state);
            state = self.shared.lock();
        }
    }
}

impl<P: RegisterPort + 'static> Drop for BusLink<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: RegisterPort + 'static> Transport for BusLink<P> {
    fn send(&mut self, destination: u8, frame: &[u8], listen: u8) -> Result<()> {
        self.ensure_running()?;
        let timings = &self.config.bus;

        let next = Wire::new(&mut self.shared.lock().port, timings).preload(destination, frame);

        let mut state = self.wait_bus_free(timings)?;
        let BusState { port, inbox } = &mut *state;
        inbox.clear_for_send();
        trace!("Sending {:02x?} to {destination:#04x}", frame);
        Wire::new(port, timings).transmit(frame, next, listen)
    }

    fn await_ack(&mut self, listen: u8, command: u8, timeout: Duration) -> Result<u8> {
        self.ensure_running()?;
        let deadline = Instant::now() + timeout;

        let mut state = self.shared.lock();
        state.port.write_slave(SlaveReg::Address, listen as u32);

        loop {
            if let Some(status) = state.inbox.ack_for(command) {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .shared
                .ack
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.port.write_slave(SlaveReg::Address, BROADCAST_ADDRESS as u32);
        state.inbox.ack_for(command).ok_or(Error::NoAck)
    }

    fn await_hello(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.lock().inbox.hello_seen() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.acks.hello_poll);
        }
    }

    fn reset_bus(&mut self) -> Result<()> {
        self.ensure_running()?;
        let mut state = self.shared.lock();
        Wire::new(&mut state.port, &self.config.bus).reset();
        state.port.write_master(MasterReg::Address, CLOCK_ADDRESS as u32);
        Ok(())
    }

    fn time(&self) -> ClockTime {
        self.shared.lock().inbox.time()
    }

    fn next_button(&mut self) -> Result<Option<ButtonEvent>> {
        self.shared.lock().inbox.next_event()
    }

    fn button_state(&self) -> u8 {
        self.shared.lock().inbox.button_state()
    }

    fn pending(&self) -> usize {
        self.shared.lock().inbox.pending()
    }

    fn shutdown(&mut self) {
        BusLink::shutdown(self);
    }
}

/// Put `handle`'s thread under `SCHED_FIFO` at the highest priority.
#[cfg(target_os = "linux")]
fn set_realtime<T>(handle: &JoinHandle<T>) -> std::io::Result<()> {
    // SAFETY: `sched_param` is plain data, and the join handle keeps the
    // thread's pthread_t valid for the duration of the call.
    let rc = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        libc::pthread_setschedparam(handle.as_pthread_t(), libc::SCHED_FIFO, &param)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(rc))
    }
}

#[cfg(not(target_os = "linux"))]
fn set_realtime<T>(_handle: &JoinHandle<T>) -> std::io::Result<()> {
    Err(std::io::ErrorKind::Unsupported.into())
}

/// Listener loop.  Each iteration holds the lock for the whole poll, as a
/// receive is several register accesses that must not interleave with a
/// send.
fn listen<P: RegisterPort>(
    shared: Arc<Shared<P>>,
    timings: BusTimings,
    diagnostics: Arc<dyn Diagnostics>,
) {
    debug!("Listener running");
    let mut buffer = [0u8; RECEIVE_BUFFER_LEN];

    while shared.running.load(Ordering::Acquire) {
        {
            let mut state = shared.lock();
            let BusState { port, inbox } = &mut *state;
            let mut wire = Wire::new(port, &timings);

            if wire.frame_pending() {
                diagnostics.receive_level(wire.receive_level());
                match wire.receive(&mut buffer) {
                    Ok(0) => (),
                    Ok(len) => {
                        let now = wire.now();
                        if inbox.accept(&buffer[..len], now) == MessageKind::Ack {
                            shared.ack.notify_all();
                        }
                    }
                    Err(e) => {
                        warn!("Receive failed: {e}");
                        diagnostics.receive_fault(e);
                        inbox.record_error(e);
                    }
                }
            } else {
                inbox.tick(wire.now());
            }
        }
        thread::sleep(timings.listener_idle);
    }

    debug!("Listener exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Command, CommandBuffer, MODE_CENTRAL, STATUS_READY};
    use crate::sim::{Reply, SimPort, frames};
    use crate::stats::{Counters, NoDiagnostics};

    fn config() -> Config {
        let mut config = Config::default();
        config.acks.ack = Duration::from_millis(500);
        config.acks.hello = Duration::from_millis(500);
        config.bus.bus_free = Duration::from_millis(500);
        config.bus.bus_free_cap = Duration::from_secs(1);
        config.bus.bus_free_polls = 4;
        config.bus.listener_realtime = false;
        config
    }

    fn mode_select() -> CommandBuffer {
        let mut buffer = CommandBuffer::new(Command::ModeSelect);
        buffer.payload_mut()[0] = MODE_CENTRAL;
        buffer.seal();
        buffer
    }

    fn wait_for<F: FnMut() -> bool>(mut f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_start_rejects_stuck_lines() {
        let sim = SimPort::new();
        sim.set_lines_stuck(true);
        let result = BusLink::start(sim, config(), Arc::new(NoDiagnostics));
        assert_eq!(result.err(), Some(Error::WiringFault));
    }

    #[test]
    fn test_send_and_ack() {
        let sim = SimPort::new();
        sim.respond(|frame| {
            let command = frame[3];
            Reply::ack(vec![frames::ack(HOST_ADDRESS, command, STATUS_READY)])
        });
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        let frame = mode_select();
        link.send(CLOCK_ADDRESS, frame.as_bytes(), HOST_ADDRESS).unwrap();
        let status = link
            .await_ack(HOST_ADDRESS, Command::ModeSelect.id(), Duration::from_millis(500))
            .unwrap();
        assert_eq!(status, STATUS_READY);

        let sent = sim.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], frame.as_bytes());
    }

    #[test]
    fn test_ack_for_other_command_times_out() {
        let sim = SimPort::new();
        sim.respond(|_| Reply::ack(vec![frames::ack(HOST_ADDRESS, 0x0f, 0x08)]));
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        link.send(CLOCK_ADDRESS, mode_select().as_bytes(), HOST_ADDRESS)
            .unwrap();
        let result = link.await_ack(HOST_ADDRESS, 0x0b, Duration::from_millis(50));
        assert_eq!(result, Err(Error::NoAck));
    }

    #[test]
    fn test_stale_ack_cleared_by_send() {
        let sim = SimPort::new();
        sim.respond(|frame| {
            if frame[3] == 0x0b {
                Reply::ack(vec![frames::ack(HOST_ADDRESS, 0x0b, STATUS_READY)])
            } else {
                Reply::ack(vec![])
            }
        });
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        link.send(CLOCK_ADDRESS, mode_select().as_bytes(), HOST_ADDRESS)
            .unwrap();
        assert!(link.await_ack(HOST_ADDRESS, 0x0b, Duration::from_millis(500)).is_ok());

        // the ack above must not satisfy a wait after the next send
        let cc = CommandBuffer::new(Command::CentralControl);
        link.send(CLOCK_ADDRESS, cc.as_bytes(), HOST_ADDRESS).unwrap();
        let result = link.await_ack(HOST_ADDRESS, 0x0b, Duration::from_millis(50));
        assert_eq!(result, Err(Error::NoAck));
    }

    #[test]
    fn test_send_outcomes() {
        let sim = SimPort::new();
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();
        let frame = mode_select();

        sim.respond(|_| Reply::nack());
        assert_eq!(
            link.send(CLOCK_ADDRESS, frame.as_bytes(), HOST_ADDRESS),
            Err(Error::Silent)
        );

        sim.respond(|_| Reply::clock_stretch());
        assert_eq!(
            link.send(CLOCK_ADDRESS, frame.as_bytes(), HOST_ADDRESS),
            Err(Error::Collision)
        );

        sim.respond(|_| Reply::nack_lines_busy());
        assert_eq!(
            link.send(CLOCK_ADDRESS, frame.as_bytes(), HOST_ADDRESS),
            Err(Error::LinesBusy)
        );

        sim.respond(|_| Reply::stall());
        assert_eq!(
            link.send(CLOCK_ADDRESS, frame.as_bytes(), HOST_ADDRESS),
            Err(Error::BusTimeout)
        );
    }

    #[test]
    fn test_long_frame_is_streamed() {
        let sim = SimPort::new();
        sim.respond(|_| Reply::ack(vec![]));
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        let mut display = CommandBuffer::new(Command::Display);
        display.payload_mut()[..5].copy_from_slice(b"Hello");
        display.seal();
        link.send(CLOCK_ADDRESS, display.as_bytes(), BROADCAST_ADDRESS)
            .unwrap();
        assert_eq!(sim.sent()[0], display.as_bytes());
    }

    #[test]
    fn test_bus_busy_times_out_at_cap() {
        let sim = SimPort::new();
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();
        sim.set_lines_stuck(true);
        let mut cfg = config();
        cfg.bus.bus_free = Duration::from_millis(5);
        cfg.bus.bus_free_cap = Duration::from_millis(60);
        link.config = cfg;

        // every busy sample restarts the 5ms window, so only the cap ends it
        let started = Instant::now();
        let result = link.send(CLOCK_ADDRESS, mode_select().as_bytes(), HOST_ADDRESS);
        assert_eq!(result, Err(Error::BusTimeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(sim.sent().is_empty());
    }

    #[test]
    fn test_start_rejects_claimed_pins() {
        let sim = SimPort::new();
        sim.set_pins_claimed(true);
        let result = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics));
        assert_eq!(result.err(), Some(Error::WiringFault));
        assert_eq!(sim.resets(), 0);
    }

    #[test]
    fn test_reset_bus() {
        let sim = SimPort::new();
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();
        assert_eq!(sim.resets(), 1);

        sim.clone().write_slave(SlaveReg::Address, HOST_ADDRESS as u32);
        link.reset_bus().unwrap();
        assert_eq!(sim.resets(), 2);
        assert_eq!(sim.slave_register(SlaveReg::Address), BROADCAST_ADDRESS as u32);
        assert_eq!(sim.master_register(MasterReg::Address), CLOCK_ADDRESS as u32);
        assert!(sim.pins_connected());

        link.shutdown();
        assert_eq!(link.reset_bus(), Err(Error::NotRunning));
    }

    #[test]
    fn test_wake_and_hello() {
        let sim = SimPort::new();
        sim.respond(|frame| {
            if frame[0] == crate::frame::WAKE_ADDRESS << 1 {
                let mut reply = Reply::nack();
                reply.frames.push(frames::hello());
                reply
            } else {
                Reply::nack()
            }
        });
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        let wake = CommandBuffer::new(Command::Wake);
        let result = link.send(
            crate::frame::WAKE_ADDRESS,
            wake.as_bytes(),
            BROADCAST_ADDRESS,
        );
        assert_eq!(result, Err(Error::Silent));
        assert!(link.await_hello(Duration::from_millis(500)));
    }

    #[test]
    fn test_listener_publishes_time_and_buttons() {
        let sim = SimPort::new();
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();

        sim.inject(frames::time([1, 0x23, 0x45, 0, 0x05, 0x00], true));
        assert!(wait_for(|| link.time().left.minutes == 23));
        let time = link.time();
        assert_eq!(time.left.hours, 1);
        assert_eq!(time.left.seconds, 45);
        assert_eq!(time.right.minutes, 5);
        assert!(time.lever);

        sim.inject(frames::button(0x02, 0x00));
        assert!(wait_for(|| link.pending() > 0));
        let event = link.next_button().unwrap().unwrap();
        assert_eq!(event.buttons, 0x02);
        assert_eq!(event.repeat, 0);
    }

    #[test]
    fn test_receive_faults_are_sticky() {
        let sim = SimPort::new();
        let counters = Arc::new(Counters::new());
        let mut link = BusLink::start(sim.clone(), config(), counters.clone()).unwrap();

        let mut corrupt = frames::button(0x01, 0x00);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        sim.inject(corrupt);
        assert!(wait_for(|| counters.snapshot().rx_checksum == 1));
        assert_eq!(link.next_button(), Err(Error::ChecksumFault));
        assert_eq!(link.next_button(), Ok(None));

        let mut foreign = frames::button(0x01, 0x00);
        foreign[1] = 0x30;
        crate::crc::seal(&mut foreign);
        sim.inject(foreign);
        assert!(wait_for(|| counters.snapshot().rx_wrong_address == 1));
        assert_eq!(link.next_button(), Err(Error::WrongAddress));
    }

    #[test]
    fn test_oversized_frame_is_discarded() {
        let sim = SimPort::new();
        let counters = Arc::new(Counters::new());
        let mut link = BusLink::start(sim.clone(), config(), counters.clone()).unwrap();

        // declares 100 bytes, more than the receive buffer holds
        sim.inject(frames::build(BROADCAST_ADDRESS, 0x05, &[0; 95]));
        sim.inject(frames::button(0x04, 0x00));
        assert!(wait_for(|| link.pending() > 0));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.rx_overrun, 1);
        assert_eq!(snapshot.receive_faults(), 1);
        assert_eq!(link.next_button(), Err(Error::SoftwareBufferOverrun));
        assert_eq!(link.next_button().unwrap().unwrap().buttons, 0x04);
        assert_eq!(sim.slave_register(SlaveReg::Address), BROADCAST_ADDRESS as u32);
    }

    #[test]
    fn test_hardware_overrun() {
        let sim = SimPort::new();
        let counters = Arc::new(Counters::new());
        let mut link = BusLink::start(sim.clone(), config(), counters.clone()).unwrap();

        sim.flag_overrun();
        sim.inject(frames::button(0x01, 0x00));
        assert!(wait_for(|| counters.snapshot().rx_buffer_full == 1));
        assert_eq!(link.next_button(), Err(Error::HardwareBufferFull));
        assert_eq!(link.next_button(), Ok(None));
        assert_eq!(sim.slave_register(SlaveReg::ReceiveStatus), 0);
    }

    #[test]
    fn test_size_mismatch() {
        let sim = SimPort::new();
        let counters = Arc::new(Counters::new());
        let mut link = BusLink::start(sim.clone(), config(), counters.clone()).unwrap();

        // length byte claims two more bytes than follow
        let mut short = frames::button(0x01, 0x00);
        short[2] += 2;
        crate::crc::seal(&mut short);
        sim.inject(short);
        assert!(wait_for(|| counters.snapshot().rx_size_mismatch == 1));
        assert_eq!(link.next_button(), Err(Error::SizeMismatch));
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let sim = SimPort::new();
        let counters = Arc::new(Counters::new());
        let mut link = BusLink::start(sim.clone(), config(), counters.clone()).unwrap();

        sim.inject(vec![BROADCAST_ADDRESS << 1, 0x00, 0x00]);
        sim.inject(frames::button(0x08, 0x00));
        assert!(wait_for(|| link.pending() > 0));
        assert_eq!(link.next_button().unwrap().unwrap().buttons, 0x08);
        assert_eq!(counters.snapshot().receive_faults(), 0);
        assert_eq!(counters.snapshot().frames, 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_realtime_priority() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(20)));
        // succeeds with CAP_SYS_NICE, refused without it
        match set_realtime(&handle) {
            Ok(()) => (),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
        }
        handle.join().unwrap();

        // the link starts either way
        let mut cfg = config();
        cfg.bus.listener_realtime = true;
        let link = BusLink::start(SimPort::new(), cfg, Arc::new(NoDiagnostics)).unwrap();
        assert!(link.is_running());
        assert!(link.listener_pthread().is_some());
    }

    #[test]
    fn test_shutdown() {
        let sim = SimPort::new();
        let mut link = BusLink::start(sim.clone(), config(), Arc::new(NoDiagnostics)).unwrap();
        assert!(link.listener_thread().is_some());
        assert_eq!(
            link.listener_thread().and_then(|t| t.name().map(str::to_owned)),
            Some(LISTENER_NAME.to_owned())
        );

        link.shutdown();
        assert!(!link.is_running());
        assert!(link.listener_thread().is_none());
        #[cfg(unix)]
        assert!(link.listener_pthread().is_none());
        assert_eq!(sim.slave_register(SlaveReg::Control), 0);
        assert_eq!(sim.slave_register(SlaveReg::Address), HOST_ADDRESS as u32);
        assert_eq!(
            link.send(CLOCK_ADDRESS, mode_select().as_bytes(), HOST_ADDRESS),
            Err(Error::NotRunning)
        );

        // idempotent
        link.shutdown();
    }
}
