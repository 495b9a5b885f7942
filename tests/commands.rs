// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

mod common;

use common::{ScriptedClock, Step, client};
use dgt3000_link::client::run;
use dgt3000_link::frame::{BROADCAST_ADDRESS, Command, HOST_ADDRESS, PAYLOAD_OFFSET};
use dgt3000_link::inbox::{ButtonEvent, ClockTime, Hms};
use dgt3000_link::{Error, crc};

#[test]
fn set_text_pads_to_field() {
    let mut clock = client(ScriptedClock::new());
    clock.set_text("Hello", 0, 0, 0).unwrap();

    let frame = clock.command_frame(Command::Display);
    assert_eq!(&frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 11], b"Hello      ");
    assert_eq!(clock.transport().sent(Command::EndDisplay), 1);
    assert_eq!(clock.transport().sent(Command::Display), 1);

    let mut sent = clock.transport().last_frame(Command::Display).unwrap().to_vec();
    assert!(crc::verify(&mut sent));
}

#[test]
fn end_display_slow_reply() {
    // nothing on our own address, cleared reply on broadcast
    let scripted = ScriptedClock::new().script(
        Command::EndDisplay,
        [Step::AckOn(BROADCAST_ADDRESS, 0x00)],
    );
    let mut clock = client(scripted);
    assert_eq!(clock.end_display(), Ok(()));

    let scripted = ScriptedClock::new().script(
        Command::EndDisplay,
        [Step::AckOn(BROADCAST_ADDRESS, 0x03)],
    );
    let mut clock = client(scripted);
    assert_eq!(clock.end_display(), Err(Error::NegativeAck));

    let scripted = ScriptedClock::new().script(
        Command::EndDisplay,
        [Step::AckOn(HOST_ADDRESS, 0x01)],
    );
    let mut clock = client(scripted);
    assert_eq!(clock.end_display(), Err(Error::NegativeAck));
}

#[test]
fn busy_display_is_retried_then_fails() {
    let scripted = ScriptedClock::new().always(Command::Display, Step::Ack(0x23));
    let mut clock = client(scripted);

    assert_eq!(clock.set_text("Busy", 0, 0, 0), Err(Error::NegativeAck));
    assert_eq!(clock.transport().sent(Command::Display), 3);

    // bits 2 and 3 are masked off, so this is still busy and gets retried
    let scripted = ScriptedClock::new().script(Command::Display, [Step::Ack(0x2f)]);
    let mut clock = client(scripted);
    assert_eq!(clock.set_text("Busy", 0, 0, 0), Ok(()));
    assert_eq!(clock.transport().sent(Command::Display), 2);

    let scripted = ScriptedClock::new().script(Command::Display, [Step::Ack(0x22)]);
    let mut clock = client(scripted);
    assert_eq!(clock.set_text("Fine", 0, 0, 0), Ok(()));
}

#[test]
fn end_display_failure_stops_set_text() {
    let scripted =
        ScriptedClock::new().always(Command::EndDisplay, Step::Fail(Error::Collision));
    let mut clock = client(scripted);

    assert_eq!(clock.set_text("Hi", 0, 0, 0), Err(Error::Collision));
    assert_eq!(clock.transport().sent(Command::EndDisplay), 3);
    assert_eq!(clock.transport().sent(Command::Display), 0);
}

#[test]
fn set_and_run_frame() {
    let mut clock = client(ScriptedClock::new());
    clock
        .set_and_run(run::COUNT_DOWN, 0, 5, 0, run::STOP, 0, 5, 0)
        .unwrap();

    let frame = clock.transport().last_frame(Command::SetAndRun).unwrap();
    let payload = &frame[PAYLOAD_OFFSET..];
    assert_eq!(payload[1], 0x05);
    assert_eq!(payload[4], 0x05);
    assert_eq!(payload[6], 0x01);
}

#[test]
fn set_and_run_retries() {
    let scripted = ScriptedClock::new().script(
        Command::SetAndRun,
        [Step::Fail(Error::Collision), Step::Ack(0x00)],
    );
    let mut clock = client(scripted);
    clock
        .set_and_run(run::COUNT_UP, 1, 30, 0, run::STOP, 1, 30, 0)
        .unwrap();
    assert_eq!(clock.transport().sent(Command::SetAndRun), 3);

    let scripted = ScriptedClock::new().always(Command::SetAndRun, Step::Silence);
    let mut clock = client(scripted);
    assert_eq!(
        clock.set_and_run(run::STOP, 0, 0, 0, run::STOP, 0, 0, 0),
        Err(Error::NoAck)
    );
}

#[test]
fn run_keeps_current_time() {
    let mut scripted = ScriptedClock::new();
    scripted.time = ClockTime {
        left: Hms { hours: 1, minutes: 29, seconds: 59 },
        right: Hms { hours: 0, minutes: 42, seconds: 7 },
        lever: false,
    };
    let mut clock = client(scripted);
    clock.run(run::STOP, run::COUNT_DOWN).unwrap();

    let frame = clock.transport().last_frame(Command::SetAndRun).unwrap();
    assert_eq!(
        &frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 7],
        &[1, 0x29, 0x59, 0, 0x42, 0x07, 0x04]
    );
}

#[test]
fn off_sends_return_mode() {
    let mut clock = client(ScriptedClock::new().always(Command::ModeSelect, Step::Silence));
    clock.off(0).unwrap();
    let frame = clock.transport().last_frame(Command::ModeSelect).unwrap();
    assert_eq!(frame[PAYLOAD_OFFSET], 0x20);
}

#[test]
fn button_events_pass_through() {
    let mut scripted = ScriptedClock::new();
    scripted.buttons.push_back(Err(Error::ChecksumFault));
    scripted.buttons.push_back(Ok(Some(ButtonEvent {
        buttons: 0x01,
        repeat: 0,
    })));
    let mut clock = client(scripted);

    assert_eq!(clock.pending_buttons(), 2);
    assert_eq!(clock.button_event(), Err(Error::ChecksumFault));
    assert_eq!(clock.button_event().unwrap().unwrap().buttons, 0x01);
    assert_eq!(clock.button_event(), Ok(None));
    assert_eq!(clock.button_state(), 0x40);
}
