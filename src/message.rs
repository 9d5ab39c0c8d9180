//! The message model.
//!
//! A [`Message`] is a single typed event: a chunk of line data,
//! a control value, or an option negotiation request.
//! Several messages travel together as a [`MessageChain`].

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Option bits which may be negotiated through
/// [`MessageKind::GetInOptions`] and [`MessageKind::GetOutOptions`].
pub mod options {
    /// The port reports connects and disconnects.
    pub const CONNECT: u32 = 1 << 0;

    /// The port reports modem status changes.
    pub const MODEM_STATUS: u32 = 1 << 1;

    /// The port reports line status changes.
    pub const LINE_STATUS: u32 = 1 << 2;

    /// The port reports break state changes.
    pub const BREAK_STATUS: u32 = 1 << 3;

    /// The port accepts baud rate changes.
    pub const SET_BAUD_RATE: u32 = 1 << 4;

    /// The port accepts line control changes.
    pub const SET_LINE_CONTROL: u32 = 1 << 5;

    /// The port accepts pin state changes.
    pub const SET_PIN_STATE: u32 = 1 << 6;
}

/// What kind of payload a [`MessageKind`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Nothing.
    None,

    /// An owned byte buffer.
    Buffer,

    /// A 32 bit value.
    Value,

    /// A shared accumulator and a mask of bits of interest.
    Accumulator,

    /// An opaque handle.
    Handle,
}

/// The meaning of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Bytes read from or to be written to the wire.
    LineData,

    /// A connection was established (1) or lost (0).
    Connect,

    /// Modem status lines changed.
    ModemStatus,

    /// Line status changed.
    LineStatus,

    /// Request to change output pins.
    SetPinState,

    /// Request to change the baud rate.
    SetBaudRate,

    /// Request to change the line control (data bits, parity, stop bits).
    SetLineControl,

    /// Break state changed (non-zero means break is on).
    BreakStatus,

    /// Request to purge the transmit queue.
    PurgeTx,

    /// Flow control: non-zero is XOFF, zero is XON.
    AddXoffXon,

    /// Which inbound options are supported.
    GetInOptions,

    /// Which outbound options are supported.
    GetOutOptions,

    /// Inbound options which were requested but are not supported.
    FailInOptions,

    /// Outbound options a port should enable.
    SetOutOptions,

    /// A tag value used to multiplex streams.
    Tag,

    /// The port the messages following it originate from.
    Origin,
}

impl MessageKind {
    /// The payload shape this kind carries.
    pub const fn shape(self) -> Shape {
        match self {
            MessageKind::LineData => Shape::Buffer,
            MessageKind::Connect
            | MessageKind::ModemStatus
            | MessageKind::LineStatus
            | MessageKind::SetPinState
            | MessageKind::SetBaudRate
            | MessageKind::SetLineControl
            | MessageKind::BreakStatus
            | MessageKind::AddXoffXon
            | MessageKind::FailInOptions
            | MessageKind::SetOutOptions
            | MessageKind::Tag => Shape::Value,
            MessageKind::PurgeTx => Shape::None,
            MessageKind::GetInOptions | MessageKind::GetOutOptions => Shape::Accumulator,
            MessageKind::Origin => Shape::Handle,
        }
    }
}

/// A cell outside of any message which option bits are OR-ed into.
///
/// Cloning the accumulator gives another reference to the same cell.
#[derive(Debug, Clone, Default)]
pub struct Accumulator(Arc<AtomicU32>);

impl Accumulator {
    /// A fresh accumulator with no bits set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bits accumulated so far.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// OR some bits into the cell.
    pub fn or(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::SeqCst);
    }
}

impl PartialEq for Accumulator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Accumulator {}

/// An opaque handle, e.g. a port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub usize);

/// The payload of a message.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload {
    /// No payload.
    Empty,

    /// Owned bytes.
    Buffer(Vec<u8>),

    /// A plain value.
    Value(u32),

    /// An external accumulator and the bits of interest.
    Accumulator {
        /// Where supported bits are OR-ed into.
        cell: Accumulator,

        /// The bits asked for.
        mask: u32,
    },

    /// A single handle.
    Handle(Handle),
}

impl Payload {
    fn try_clone(&self) -> Result<Self, Error> {
        Ok(match self {
            Payload::Empty => Payload::Empty,
            Payload::Buffer(bytes) => Payload::Buffer(copy_buffer(bytes)?),
            Payload::Value(v) => Payload::Value(*v),
            Payload::Accumulator { cell, mask } => Payload::Accumulator {
                cell: cell.clone(),
                mask: *mask,
            },
            Payload::Handle(h) => Payload::Handle(*h),
        })
    }
}

fn copy_buffer(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes.len())
        .map_err(|_| Error::OutOfMemory)?;
    buffer.extend_from_slice(bytes);

    Ok(buffer)
}

/// A single typed event flowing through the hub.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Payload,
}

impl Message {
    /// A message without payload.
    pub fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Payload::Empty,
        }
    }

    /// A message owning a copy of the given bytes.
    pub fn with_buffer(kind: MessageKind, bytes: &[u8]) -> Result<Self, Error> {
        debug_assert_eq!(kind.shape(), Shape::Buffer);

        Ok(Self {
            kind,
            payload: Payload::Buffer(copy_buffer(bytes)?),
        })
    }

    /// A message taking ownership of an already allocated buffer.
    pub fn with_owned_buffer(kind: MessageKind, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(kind.shape(), Shape::Buffer);

        Self {
            kind,
            payload: Payload::Buffer(bytes),
        }
    }

    /// Line data owning a copy of the given bytes.
    pub fn line_data<B: AsRef<[u8]>>(bytes: B) -> Result<Self, Error> {
        Self::with_buffer(MessageKind::LineData, bytes.as_ref())
    }

    /// A message carrying a value.
    pub fn with_value(kind: MessageKind, value: u32) -> Self {
        debug_assert_eq!(kind.shape(), Shape::Value);

        Self {
            kind,
            payload: Payload::Value(value),
        }
    }

    /// A message carrying an accumulator and the bits asked for.
    pub fn with_accumulator(kind: MessageKind, cell: Accumulator, mask: u32) -> Self {
        debug_assert_eq!(kind.shape(), Shape::Accumulator);

        Self {
            kind,
            payload: Payload::Accumulator { cell, mask },
        }
    }

    /// A message carrying a handle.
    pub fn with_handle(kind: MessageKind, handle: Handle) -> Self {
        debug_assert_eq!(kind.shape(), Shape::Handle);

        Self {
            kind,
            payload: Payload::Handle(handle),
        }
    }

    /// The kind of message.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Borrow the bytes, if this message carries a buffer.
    pub fn buffer(&self) -> Option<&[u8]> {
        if let Payload::Buffer(v) = &self.payload {
            Some(v)
        } else {
            None
        }
    }

    /// Mutably borrow the bytes, if this message carries a buffer.
    pub fn buffer_mut(&mut self) -> Option<&mut Vec<u8>> {
        if let Payload::Buffer(v) = &mut self.payload {
            Some(v)
        } else {
            None
        }
    }

    /// Take the buffer, if this message carries one.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        if let Payload::Buffer(v) = self.payload {
            Some(v)
        } else {
            None
        }
    }

    /// The value, if this message carries one.
    pub fn value(&self) -> Option<u32> {
        if let Payload::Value(v) = self.payload {
            Some(v)
        } else {
            None
        }
    }

    /// The handle, if this message carries one.
    pub fn handle(&self) -> Option<Handle> {
        if let Payload::Handle(h) = self.payload {
            Some(h)
        } else {
            None
        }
    }

    /// The number of payload bytes, zero for non-buffer payloads.
    pub fn len(&self) -> usize {
        self.buffer().map(<[u8]>::len).unwrap_or_default()
    }

    /// True if there are no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// OR the bits of interest among `bits` into the accumulator.
    ///
    /// Returns true if the message carries an accumulator and any bit matched.
    pub fn accumulate(&self, bits: u32) -> bool {
        match &self.payload {
            Payload::Accumulator { cell, mask } if mask & bits != 0 => {
                cell.or(mask & bits);
                true
            }
            _ => false,
        }
    }

    /// The bits asked for, if this message carries an accumulator.
    pub fn requested(&self) -> Option<u32> {
        if let Payload::Accumulator { mask, .. } = &self.payload {
            Some(*mask)
        } else {
            None
        }
    }

    /// Release the payload, keeping the kind.
    pub fn clean(&mut self) {
        self.payload = Payload::Empty;
    }

    /// A deep copy. Buffers are copied, accumulators still refer to the same cell.
    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            kind: self.kind,
            payload: self.payload.try_clone()?,
        })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind)?;

        match &self.payload {
            Payload::Empty => Ok(()),
            Payload::Buffer(bytes) => {
                let s = String::from_utf8_lossy(bytes)
                    .chars()
                    .take(48)
                    .collect::<String>();
                write!(f, "[{}]: {}", bytes.len(), s.trim())
            }
            Payload::Value(v) => write!(f, ": {v:#x}"),
            Payload::Accumulator { cell, mask } => {
                write!(f, ": mask {mask:#x}, got {:#x}", cell.get())
            }
            Payload::Handle(h) => write!(f, ": {}", h.0),
        }
    }
}

/// An ordered sequence of messages owned together.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MessageChain(Vec<Message>);

impl MessageChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    /// Append all of `other` after the last message of this chain.
    pub fn merge(&mut self, other: MessageChain) {
        self.0.extend(other.0);
    }

    /// The number of messages.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no messages.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over borrowed messages.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.0.iter()
    }

    /// Iterate over mutably borrowed messages.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.0.iter_mut()
    }

    /// A deep copy of every message.
    ///
    /// If any buffer can not be allocated the partial copy is dropped.
    pub fn try_clone(&self) -> Result<Self, Error> {
        self.0.iter().map(Message::try_clone).collect()
    }

    /// All payload bytes of line data messages, concatenated.
    pub fn line_data(&self) -> Vec<u8> {
        self.0
            .iter()
            .filter(|message| message.kind() == MessageKind::LineData)
            .filter_map(Message::buffer)
            .flatten()
            .copied()
            .collect()
    }
}

impl From<Message> for MessageChain {
    fn from(message: Message) -> Self {
        Self(vec![message])
    }
}

impl FromIterator<Message> for MessageChain {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for MessageChain {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<Message> for MessageChain {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

impl Display for MessageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, message) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clone_buffers_are_independent() {
        let original = MessageChain::from_iter([
            Message::line_data("hello").unwrap(),
            Message::with_value(MessageKind::Connect, 1),
        ]);

        let mut copy = original.try_clone().unwrap();
        assert_eq!(original, copy);

        copy.iter_mut()
            .next()
            .unwrap()
            .buffer_mut()
            .unwrap()
            .copy_from_slice(b"HELLO");

        assert_eq!(original.line_data(), b"hello");
        assert_eq!(copy.line_data(), b"HELLO");
    }

    #[test]
    fn clone_shares_accumulator() {
        let cell = Accumulator::new();
        let message = Message::with_accumulator(MessageKind::GetInOptions, cell.clone(), 0b11);

        let copy = message.try_clone().unwrap();
        assert!(copy.accumulate(0b01));

        assert_eq!(cell.get(), 0b01);
        assert_eq!(message, copy);
    }

    #[test]
    fn accumulate_respects_mask() {
        let cell = Accumulator::new();
        let message = Message::with_accumulator(MessageKind::GetInOptions, cell.clone(), 0b0110);

        assert!(!message.accumulate(0b1001));
        assert!(message.accumulate(0b0011));
        assert_eq!(cell.get(), 0b0010);

        let plain = Message::line_data("no accumulator").unwrap();
        assert!(!plain.accumulate(u32::MAX));
    }

    #[test]
    fn merge_appends_in_order() {
        let mut first = MessageChain::from_iter([
            Message::with_value(MessageKind::Tag, 1),
            Message::with_value(MessageKind::Tag, 2),
        ]);
        let second = MessageChain::from_iter([
            Message::with_value(MessageKind::Tag, 2),
            Message::with_value(MessageKind::Tag, 3),
        ]);

        first.merge(second);

        let values = first.iter().filter_map(Message::value).collect::<Vec<_>>();
        assert_eq!(values, vec![1, 2, 2, 3]);
    }

    #[test]
    fn clean_is_idempotent() {
        let mut message = Message::line_data("bytes").unwrap();

        message.clean();
        assert_eq!(message.payload(), &Payload::Empty);
        assert_eq!(message.kind(), MessageKind::LineData);

        message.clean();
        assert_eq!(message, Message::empty(MessageKind::LineData));
    }

    #[test]
    fn display_truncates_long_buffers() {
        let message = Message::line_data("x".repeat(100)).unwrap();
        let shown = message.to_string();

        assert!(shown.starts_with("LineData[100]"));
        assert!(shown.len() < 100);
    }
}
