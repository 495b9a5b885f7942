//! Timing and retry configuration.
//!
//! The defaults match what the clock needs on real hardware.  Tests and slow
//! hosts may lengthen the timeouts; shortening them below the defaults will
//! cause spurious [`crate::Error::NoAck`] results.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::time::Duration;

/// Complete link and client configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bus: BusTimings,
    pub acks: AckTimings,
    pub buttons: ButtonTimings,
    pub retries: RetryLimits,
}

/// Bus transport and listener timings.
#[derive(Debug, Clone)]
pub struct BusTimings {
    /// Quiet window the bus must reach before a send.  Restarts whenever the
    /// bus is seen busy.
    pub bus_free: Duration,
    /// Hard limit on the whole bus-free wait, however often the window
    /// restarts.
    pub bus_free_cap: Duration,
    /// Consecutive idle polls required before the bus counts as free.  The
    /// clock sends queued frames ~50 us after the previous one, so a single
    /// idle sample is not enough.
    pub bus_free_polls: u32,
    /// How long to wait for space in the transmit FIFO, per byte.
    pub fifo_space: Duration,
    /// How long to wait for the master to report the transfer done.
    pub transfer_done: Duration,
    /// How long a single inbound frame may take to arrive.
    pub receive_frame: Duration,
    /// Pause between polls of an empty receive FIFO mid-frame.  A byte takes
    /// ~70 us on the wire.
    pub receive_byte_poll: Duration,
    /// Yield between listener iterations.
    pub listener_idle: Duration,
    /// Run the listener under `SCHED_FIFO` at maximum priority.  Without it
    /// a descheduled listener lets the slave FIFO overflow mid-frame.
    pub listener_realtime: bool,
}

impl Default for BusTimings {
    fn default() -> Self {
        Self {
            bus_free: Duration::from_millis(10),
            bus_free_cap: Duration::from_millis(50),
            bus_free_polls: 256,
            fifo_space: Duration::from_millis(10),
            transfer_done: Duration::from_millis(10),
            receive_frame: Duration::from_millis(10),
            receive_byte_poll: Duration::from_micros(10),
            listener_idle: Duration::from_micros(400),
            listener_realtime: true,
        }
    }
}

/// Acknowledgement rendezvous timings.
#[derive(Debug, Clone)]
pub struct AckTimings {
    /// Wait for a normal ack.
    pub ack: Duration,
    /// Wait for the fast, directed end-display reply.
    pub fast_reply: Duration,
    /// Wait for hello after a wake (usually arrives in ~5 ms).
    pub hello: Duration,
    /// Poll interval while waiting for hello.
    pub hello_poll: Duration,
    /// Pause before asking for central control during configure.
    pub central_control_pause: Duration,
}

impl Default for AckTimings {
    fn default() -> Self {
        Self {
            ack: Duration::from_millis(10),
            fast_reply: Duration::from_micros(1200),
            hello: Duration::from_millis(10),
            hello_poll: Duration::from_micros(100),
            central_control_pause: Duration::from_millis(10),
        }
    }
}

/// Button repeat and queue settings.
#[derive(Debug, Clone)]
pub struct ButtonTimings {
    /// Hold time before the first synthetic repeat.
    pub key_delay: Duration,
    /// Interval between subsequent repeats.
    pub key_repeat: Duration,
    /// Queue slots; one is kept free to tell full from empty.
    pub queue_capacity: usize,
}

impl Default for ButtonTimings {
    fn default() -> Self {
        Self {
            key_delay: Duration::from_millis(500),
            key_repeat: Duration::from_millis(250),
            queue_capacity: 16,
        }
    }
}

/// Attempt bounds.
#[derive(Debug, Clone)]
pub struct RetryLimits {
    /// Attempts per command in the display and set-and-run wrappers.
    pub command_attempts: u32,
    /// Central control requests during configure.
    pub central_control: u32,
    /// Bus resets during configure.
    pub resets: u32,
    /// Wake attempts during configure.
    pub wakes: u32,
    /// Immediate retries after a collision or busy lines during configure.
    pub contention: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            command_attempts: 3,
            central_control: 3,
            resets: 1,
            wakes: 3,
            contention: 20,
        }
    }
}

/// Whole microseconds of `duration`, saturating.
pub(crate) fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
