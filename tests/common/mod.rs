// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Scripted transport standing in for the bus and the clock.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dgt3000_link::bus::Transport;
use dgt3000_link::client::ClockClient;
use dgt3000_link::config::Config;
use dgt3000_link::frame::{Command, KIND_OFFSET};
use dgt3000_link::inbox::{ButtonEvent, ClockTime};
use dgt3000_link::stats::NoDiagnostics;
use dgt3000_link::{Error, Result};

/// What the clock does with one frame.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// The send itself fails
    Fail(Error),
    /// Acked on the address the sender listens on
    Ack(u8),
    /// Acked on a specific address
    AckOn(u8, u8),
    /// Sent, but no ack follows
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Sent(Command),
    Reset,
}

pub struct ScriptedClock {
    steps: HashMap<Command, VecDeque<Step>>,
    defaults: HashMap<Command, Step>,
    pub events: Vec<Event>,
    pub frames: Vec<Vec<u8>>,
    pub wake_hello: bool,
    pub buttons: VecDeque<Result<Option<ButtonEvent>>>,
    pub time: ClockTime,
    ack: Option<(u8, u8, u8)>,
    hello: bool,
}

impl ScriptedClock {
    /// A clock that accepts everything.
    pub fn new() -> Self {
        let defaults = HashMap::from([
            (Command::Wake, Step::Fail(Error::Silent)),
            (Command::CentralControl, Step::Ack(0x08)),
            (Command::ModeSelect, Step::Ack(0x08)),
            (Command::EndDisplay, Step::Ack(0x05)),
            (Command::Display, Step::Ack(0x00)),
            (Command::SetAndRun, Step::Ack(0x08)),
        ]);
        Self {
            steps: HashMap::new(),
            defaults,
            events: Vec::new(),
            frames: Vec::new(),
            wake_hello: true,
            buttons: VecDeque::new(),
            time: ClockTime::default(),
            ack: None,
            hello: false,
        }
    }

    /// Answer the next sends of `command` with `steps`, then fall back to
    /// the default.
    pub fn script(mut self, command: Command, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.entry(command).or_default().extend(steps);
        self
    }

    /// Answer every send of `command` with `step`.
    pub fn always(mut self, command: Command, step: Step) -> Self {
        self.defaults.insert(command, step);
        self
    }

    pub fn sent(&self, command: Command) -> usize {
        self.events
            .iter()
            .filter(|e| **e == Event::Sent(command))
            .count()
    }

    pub fn resets(&self) -> usize {
        self.events.iter().filter(|e| **e == Event::Reset).count()
    }

    pub fn last_frame(&self, command: Command) -> Option<&[u8]> {
        self.frames
            .iter()
            .rev()
            .find(|f| f[KIND_OFFSET] == command.id())
            .map(Vec::as_slice)
    }
}

impl Transport for ScriptedClock {
    fn send(&mut self, destination: u8, frame: &[u8], listen: u8) -> Result<()> {
        let command = Command::from_id(frame[KIND_OFFSET]).expect("unknown command");
        assert_eq!(destination, command.destination());
        self.events.push(Event::Sent(command));
        self.frames.push(frame.to_vec());
        self.ack = None;
        self.hello = false;

        let step = self
            .steps
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.defaults.get(&command).copied())
            .unwrap_or(Step::Silence);

        if command == Command::Wake {
            self.hello = self.wake_hello;
        }

        match step {
            Step::Fail(e) => Err(e),
            Step::Ack(status) => {
                self.ack = Some((listen, command.id(), status));
                Ok(())
            }
            Step::AckOn(address, status) => {
                self.ack = Some((address, command.id(), status));
                Ok(())
            }
            Step::Silence => Ok(()),
        }
    }

    fn await_ack(&mut self, listen: u8, command: u8, _timeout: Duration) -> Result<u8> {
        match self.ack {
            Some((address, id, status)) if address == listen && id == command => Ok(status),
            _ => Err(Error::NoAck),
        }
    }

    fn await_hello(&mut self, _timeout: Duration) -> bool {
        self.hello
    }

    fn reset_bus(&mut self) -> Result<()> {
        self.events.push(Event::Reset);
        Ok(())
    }

    fn time(&self) -> ClockTime {
        self.time
    }

    fn next_button(&mut self) -> Result<Option<ButtonEvent>> {
        self.buttons.pop_front().unwrap_or(Ok(None))
    }

    fn button_state(&self) -> u8 {
        0x40
    }

    fn pending(&self) -> usize {
        self.buttons.len()
    }
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.acks.central_control_pause = Duration::ZERO;
    config
}

pub fn client(clock: ScriptedClock) -> ClockClient<ScriptedClock> {
    ClockClient::new(clock, config(), Arc::new(NoDiagnostics))
}
