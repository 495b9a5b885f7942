//! Wire format of the clock's application protocol.
//!
//! Frame layout, both directions:
//!
//! ```text
//! [0] destination address << 1   (filled in from the listen address on receive)
//! [1] source address << 1
//! [2] total length, header and CRC included
//! [3] message kind
//! [4..len-1] payload
//! [len-1] CRC-8 over [0..len-1]
//! ```
//!
//! Byte 0 is the address byte the bus master puts on the wire itself, so it
//! is never written into the transmit FIFO, but it does take part in the CRC.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::crc;

/// 7-bit bus address of the clock.
pub const CLOCK_ADDRESS: u8 = 0x08;
/// 7-bit bus address the host listens on for directed replies.
pub const HOST_ADDRESS: u8 = 0x10;
/// 7-bit address the clock answers on while powered down.
pub const WAKE_ADDRESS: u8 = 0x28;
/// General call address used for broadcasts.
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Byte 1 of every frame the clock sends.
pub const CLOCK_SOURCE: u8 = CLOCK_ADDRESS << 1;
/// Byte 1 of every frame the host sends.
pub const HOST_SOURCE: u8 = HOST_ADDRESS << 1;

pub const ADDRESS_OFFSET: usize = 0;
pub const SOURCE_OFFSET: usize = 1;
pub const LENGTH_OFFSET: usize = 2;
pub const KIND_OFFSET: usize = 3;
pub const PAYLOAD_OFFSET: usize = 4;

/// Smallest structurally valid frame: the 4-byte header plus the CRC, no
/// payload.  A hello frame is exactly this long.
pub const MIN_FRAME_LEN: usize = 5;
/// Size of the software receive buffer.
pub const RECEIVE_BUFFER_LEN: usize = 64;

/// Ack status: clock idle and under central control.  Shared by mode-select
/// and set-and-run replies.
pub const STATUS_READY: u8 = 0x08;
/// Ack status bit set once the clock accepted central control.
pub const STATUS_CENTRAL_CONTROL: u8 = 0x08;
/// Mask for the display state carried in end-display replies.
pub const STATUS_DISPLAY_MASK: u8 = 0x07;
/// End-display, directed reply: nothing was displayed.
pub const STATUS_DISPLAY_ALREADY_EMPTY: u8 = 0x05;
/// End-display, broadcast reply: the text was removed.
pub const STATUS_DISPLAY_CLEARED: u8 = 0x00;
/// Mask and value of a display reply rejecting the text as busy.
pub const STATUS_DISPLAY_BUSY_MASK: u8 = 0xf3;
pub const STATUS_DISPLAY_BUSY: u8 = 0x23;

/// Mode-select payload for mode 25, host owned display and timers.
pub const MODE_CENTRAL: u8 = 0x39;
/// Mode-select payload base for switching the clock off.
pub const MODE_OFF: u8 = 0x20;

/// Width of the display text field.
pub const DISPLAY_TEXT_LEN: usize = 11;

/// Inbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ack,
    Hello,
    Time,
    Button,
    Other(u8),
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        match value {
            0x01 => MessageKind::Ack,
            0x02 => MessageKind::Hello,
            0x04 => MessageKind::Time,
            0x05 => MessageKind::Button,
            other => MessageKind::Other(other),
        }
    }
}

/// Outbound commands.  The discriminant is the message kind, which is also
/// the command id echoed back in acks.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Display = 0x06,
    EndDisplay = 0x07,
    SetAndRun = 0x0a,
    ModeSelect = 0x0b,
    Wake = 0x0d,
    CentralControl = 0x0f,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Display,
        Command::EndDisplay,
        Command::SetAndRun,
        Command::ModeSelect,
        Command::Wake,
        Command::CentralControl,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Map an id back to a command, for decoding acks and sent frames.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    /// Destination the command is addressed to.
    pub fn destination(self) -> u8 {
        match self {
            Command::Wake => WAKE_ADDRESS,
            _ => CLOCK_ADDRESS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Display => "display",
            Command::EndDisplay => "end display",
            Command::SetAndRun => "set and run",
            Command::ModeSelect => "mode select",
            Command::Wake => "wake",
            Command::CentralControl => "central control",
        }
    }

    fn template_len(self) -> usize {
        match self {
            Command::Wake | Command::CentralControl | Command::EndDisplay => 5,
            Command::ModeSelect => 6,
            Command::SetAndRun => 12,
            Command::Display => 21,
        }
    }
}

/// Longest outbound frame (display).
pub const MAX_COMMAND_LEN: usize = 21;

/// Reusable outbound frame for one command, mutated in place and resealed
/// before every send.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    command: Command,
    bytes: [u8; MAX_COMMAND_LEN],
}

impl CommandBuffer {
    /// Build the zero-payload template for `command`, already sealed.
    pub fn new(command: Command) -> Self {
        let len = command.template_len();
        let mut bytes = [0u8; MAX_COMMAND_LEN];
        bytes[ADDRESS_OFFSET] = command.destination() << 1;
        bytes[SOURCE_OFFSET] = HOST_SOURCE;
        bytes[LENGTH_OFFSET] = len as u8;
        bytes[KIND_OFFSET] = command.id();
        let mut buffer = Self { command, bytes };
        if command == Command::Display {
            buffer.payload_mut()[..DISPLAY_TEXT_LEN].fill(b' ');
        }
        buffer.seal();
        buffer
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// Total frame length as declared in the header.
    pub fn frame_len(&self) -> usize {
        self.bytes[LENGTH_OFFSET] as usize
    }

    /// The complete frame, CRC included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.frame_len()]
    }

    /// Payload bytes between header and CRC.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..self.frame_len() - 1]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.frame_len() - 1;
        &mut self.bytes[PAYLOAD_OFFSET..end]
    }

    /// Recompute the CRC after the payload changed.
    pub fn seal(&mut self) {
        let len = self.frame_len();
        crc::seal(&mut self.bytes[..len]);
    }
}

/// Pack a 0-99 value into two BCD digits.
pub fn bcd_pack(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Unpack two BCD digits into a decimal value.
pub fn bcd_unpack(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_templates_are_sealed() {
        for command in Command::ALL {
            let mut buffer = CommandBuffer::new(command);
            let len = buffer.frame_len();
            assert_eq!(buffer.as_bytes()[KIND_OFFSET], command.id());
            assert_eq!(buffer.as_bytes()[SOURCE_OFFSET], HOST_SOURCE);
            assert!(crc::verify(&mut buffer.bytes[..len]), "{command:?}");
        }
    }

    #[test]
    fn test_wake_is_addressed_to_wake_address() {
        let buffer = CommandBuffer::new(Command::Wake);
        assert_eq!(buffer.as_bytes()[ADDRESS_OFFSET], WAKE_ADDRESS << 1);
        let buffer = CommandBuffer::new(Command::ModeSelect);
        assert_eq!(buffer.as_bytes()[ADDRESS_OFFSET], CLOCK_ADDRESS << 1);
    }

    #[test]
    fn test_display_template_is_blank() {
        let buffer = CommandBuffer::new(Command::Display);
        assert_eq!(&buffer.payload()[..DISPLAY_TEXT_LEN], b"           ");
        assert_eq!(buffer.payload().len(), DISPLAY_TEXT_LEN + 5);
    }

    #[test]
    fn test_command_ids() {
        for command in Command::ALL {
            assert_eq!(Command::from_id(command.id()), Some(command));
        }
        assert_eq!(Command::from_id(0x01), None);
        assert_eq!(MessageKind::from(0x05), MessageKind::Button);
        assert_eq!(MessageKind::from(0x0b), MessageKind::Other(0x0b));
    }

    #[test]
    fn test_bcd() {
        assert_eq!(bcd_pack(5), 0x05);
        assert_eq!(bcd_pack(59), 0x59);
        assert_eq!(bcd_unpack(0x42), 42);
    }

    proptest! {
        #[test]
        fn bcd_round_trip(value in 0u8..=59) {
            prop_assert_eq!(bcd_unpack(bcd_pack(value)), value);
        }
    }
}
