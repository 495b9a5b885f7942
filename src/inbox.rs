//! Shared inbox state written by the listener.
//!
//! The [`Inbox`] holds everything the listener learns from the clock: the
//! latest ack, whether a hello arrived, the latest time snapshot, and the
//! queue of button events, including synthetic repeats for held buttons.
//!
//! The inbox has no locking of its own.  [`crate::bus::BusLink`] keeps it
//! under the same mutex as the register port, because a send must clear the
//! ack state and arm the listen address as one step.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::Arc;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{ButtonTimings, micros};
use crate::frame::{KIND_OFFSET, MessageKind, PAYLOAD_OFFSET, bcd_unpack};
use crate::stats::Diagnostics;
use crate::{Error, Result};

/// Bits of a button mask that identify the five front buttons.
pub const BUTTON_MASK: u8 = 0x1f;
/// Power state bit, and the marker of a synthetic on/off event.
pub const BUTTON_POWER: u8 = 0x20;
/// Lever state bit, and the marker of a synthetic lever event.
pub const BUTTON_LEVER: u8 = 0x40;
/// Carries the previous power state (on/off events) or the new lever state
/// (lever events) in synthetic events.
pub const BUTTON_CARRY: u8 = 0x80;

const TIME_LEFT_HOURS: usize = 5;
const TIME_LEFT_MINUTES: usize = 6;
const TIME_LEFT_SECONDS: usize = 7;
const TIME_RIGHT_HOURS: usize = 11;
const TIME_RIGHT_MINUTES: usize = 12;
const TIME_RIGHT_SECONDS: usize = 13;
const TIME_LEVER: usize = 19;

const BUTTON_CURRENT: usize = 4;
const BUTTON_PREVIOUS: usize = 5;

/// Most recent acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Id of the acknowledged command
    pub command: u8,
    /// Command specific status byte
    pub status: u8,
}

/// A queued button event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Pressed buttons, or a synthetic power/lever event.
    pub buttons: u8,
    /// 0 for the initial press, then 1, 2, ... for each repeat while held.
    pub repeat: u8,
}

/// Hours, minutes and seconds of one side of the clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hms {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// Decoded clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockTime {
    pub left: Hms,
    pub right: Hms,
    /// Lever/orientation bit from the last time frame.
    pub lever: bool,
}

/// Time exactly as the clock reported it: hours as a plain nibble, minutes
/// and seconds as packed BCD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTime {
    pub fields: [u8; 6],
    pub lever: bool,
}

impl RawTime {
    pub fn decode(&self) -> ClockTime {
        let f = &self.fields;
        ClockTime {
            left: Hms {
                hours: f[0],
                minutes: bcd_unpack(f[1]),
                seconds: bcd_unpack(f[2]),
            },
            right: Hms {
                hours: f[3],
                minutes: bcd_unpack(f[4]),
                seconds: bcd_unpack(f[5]),
            },
            lever: self.lever,
        }
    }
}

/// Fixed capacity ring of button events.
///
/// `head == tail` means empty and `(tail + 1) % capacity == head` means
/// full, so one slot is always unused.  When full, new events are dropped
/// and counted; queued events are never evicted.
#[derive(Debug, Clone)]
pub struct ButtonQueue {
    slots: Vec<ButtonEvent>,
    head: usize,
    tail: usize,
    dropped: u32,
}

impl ButtonQueue {
    /// Create a queue with `capacity` slots (at least 2).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ButtonEvent::default(); capacity.max(2)],
            head: 0,
            tail: 0,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.tail + 1) % self.capacity() == self.head
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        (self.tail + self.capacity() - self.head) % self.capacity()
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Append `event`.  Returns `false`, and counts the drop, if full.
    pub fn push(&mut self, event: ButtonEvent) -> bool {
        if self.is_full() {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        self.slots[self.tail] = event;
        self.tail = (self.tail + 1) % self.capacity();
        true
    }

    /// Remove the oldest event.
    pub fn pop(&mut self) -> Option<ButtonEvent> {
        if self.is_empty() {
            return None;
        }
        let event = self.slots[self.head];
        self.head = (self.head + 1) % self.capacity();
        Some(event)
    }
}

/// State published by the listener.
pub struct Inbox {
    last_ack: Option<Ack>,
    hello: bool,
    time: RawTime,
    button_state: u8,
    last_button_state: u8,
    repeat_deadline: Option<u64>,
    repeat_count: u8,
    queue: ButtonQueue,
    last_error: Option<Error>,
    key_delay: u64,
    key_repeat: u64,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Inbox {
    pub fn new(timings: &ButtonTimings, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            last_ack: None,
            hello: false,
            time: RawTime::default(),
            button_state: 0,
            last_button_state: 0,
            repeat_deadline: None,
            repeat_count: 0,
            queue: ButtonQueue::new(timings.queue_capacity),
            last_error: None,
            key_delay: micros(timings.key_delay),
            key_repeat: micros(timings.key_repeat),
            diagnostics,
        }
    }

    /// Forget the last ack and hello so only replies to the next send count.
    pub fn clear_for_send(&mut self) {
        self.last_ack = None;
        self.hello = false;
    }

    pub fn last_ack(&self) -> Option<Ack> {
        self.last_ack
    }

    /// Status byte of the last ack, if it acknowledged `command`.
    pub fn ack_for(&self, command: u8) -> Option<u8> {
        self.last_ack
            .filter(|ack| ack.command == command)
            .map(|ack| ack.status)
    }

    pub fn hello_seen(&self) -> bool {
        self.hello
    }

    pub fn raw_time(&self) -> RawTime {
        self.time
    }

    pub fn time(&self) -> ClockTime {
        self.time.decode()
    }

    /// Last raw button byte, with the lever bit kept current by time frames.
    pub fn button_state(&self) -> u8 {
        self.last_button_state
    }

    /// Queued button events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &ButtonQueue {
        &self.queue
    }

    /// Store a receive fault, replacing any unconsumed one.
    pub fn record_error(&mut self, error: Error) {
        self.last_error = Some(error);
    }

    /// Take the sticky receive fault, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Next button event.  A pending receive fault is reported (and
    /// cleared) first.
    pub fn next_event(&mut self) -> Result<Option<ButtonEvent>> {
        if let Some(error) = self.take_error() {
            return Err(error);
        }
        Ok(self.queue.pop())
    }

    /// Classify a verified frame and update state.
    ///
    /// `now` is the port's microsecond clock, used to arm button repeats.
    /// Returns the message kind so the caller knows whether to wake ack
    /// waiters.
    pub fn accept(&mut self, frame: &[u8], now: u64) -> MessageKind {
        let Some(&kind_byte) = frame.get(KIND_OFFSET) else {
            return MessageKind::Other(0);
        };
        let kind = MessageKind::from(kind_byte);
        self.diagnostics.frame_received(kind_byte);

        let handled = match kind {
            MessageKind::Ack => self.accept_ack(frame),
            MessageKind::Hello => {
                trace!("Hello");
                self.hello = true;
                true
            }
            MessageKind::Time => self.accept_time(frame),
            MessageKind::Button => self.accept_button(frame, now),
            MessageKind::Other(kind) => {
                warn!("Unexpected message kind {kind:#04x} from clock");
                true
            }
        };
        if !handled {
            warn!("Short {kind:?} frame ignored ({} bytes)", frame.len());
        }
        kind
    }

    /// Emit a repeat for a held button once its deadline has passed.
    pub fn tick(&mut self, now: u64) {
        let Some(deadline) = self.repeat_deadline else {
            return;
        };
        if now <= deadline {
            return;
        }
        self.repeat_deadline = Some(deadline + self.key_repeat);
        self.repeat_count = self.repeat_count.wrapping_add(1);
        self.enqueue(self.button_state, self.repeat_count);
    }

    fn accept_ack(&mut self, frame: &[u8]) -> bool {
        let (Some(&command), Some(&status)) =
            (frame.get(PAYLOAD_OFFSET), frame.get(PAYLOAD_OFFSET + 1))
        else {
            return false;
        };
        trace!("Ack for {command:#04x} status {status:#04x}");
        self.last_ack = Some(Ack { command, status });
        true
    }

    fn accept_time(&mut self, frame: &[u8]) -> bool {
        let Some(&lever) = frame.get(TIME_LEVER) else {
            return false;
        };
        self.time = RawTime {
            fields: [
                frame[TIME_LEFT_HOURS] & 0x0f,
                frame[TIME_LEFT_MINUTES],
                frame[TIME_LEFT_SECONDS],
                frame[TIME_RIGHT_HOURS] & 0x0f,
                frame[TIME_RIGHT_MINUTES],
                frame[TIME_RIGHT_SECONDS],
            ],
            lever: lever & 0x01 != 0,
        };
        if self.time.lever {
            self.last_button_state |= BUTTON_LEVER;
        } else {
            self.last_button_state &= !BUTTON_LEVER;
        }
        trace!("Time {:?}", self.time.decode());
        true
    }

    fn accept_button(&mut self, frame: &[u8], now: u64) -> bool {
        let (Some(&current), Some(&previous)) =
            (frame.get(BUTTON_CURRENT), frame.get(BUTTON_PREVIOUS))
        else {
            return false;
        };
        trace!("Button {previous:#04x} -> {current:#04x}");

        if current & !previous & BUTTON_MASK != 0 {
            self.button_state |= current & BUTTON_MASK;
            self.last_button_state = current;
            self.repeat_deadline = Some(now + self.key_delay);
            self.repeat_count = 0;
            self.enqueue(self.button_state, 0);
        }

        if (current ^ previous) & BUTTON_POWER != 0 {
            self.enqueue(BUTTON_POWER | ((previous & BUTTON_POWER) << 2), 0);
        }

        if (current ^ previous) & BUTTON_LEVER != 0 {
            self.enqueue(BUTTON_LEVER | ((current & BUTTON_LEVER) << 1), 0);
        }

        if current & BUTTON_MASK == 0 && self.button_state != 0 {
            self.repeat_deadline = None;
            self.button_state = 0;
        }
        true
    }

    fn enqueue(&mut self, buttons: u8, repeat: u8) {
        if !self.queue.push(ButtonEvent { buttons, repeat }) {
            warn!("Button queue full, event {buttons:#04x}/{repeat} dropped");
            self.diagnostics.button_dropped();
        }
    }
}
