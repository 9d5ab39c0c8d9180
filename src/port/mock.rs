//! A mock port.
//! Records everything written to it, so tests can look at it afterwards.
//!
//! May be set up as a loopback: line data written to it is then read back
//! from it, like a serial port with RX and TX connected.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use super::{HubEvent, HubEventSender, Port, PortId};
use crate::message::{Message, MessageChain, MessageKind};

#[derive(Debug, Default)]
struct Recorded {
    written: Vec<Message>,
    xoff_xon: Vec<bool>,
}

/// A view of what was done to a [`MockPort`], usable after the port
/// has been handed over to a hub.
#[derive(Debug, Clone, Default)]
pub struct MockRecord(Arc<Mutex<Recorded>>);

impl MockRecord {
    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        // A panicking test thread may poison the lock, the data is still fine to look at.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take every message written so far.
    pub fn take_written(&self) -> MessageChain {
        self.lock().written.drain(..).collect()
    }

    /// The number of messages written so far.
    pub fn written_len(&self) -> usize {
        self.lock().written.len()
    }

    /// All line data written so far, concatenated.
    pub fn written_line_data(&self) -> Vec<u8> {
        self.lock()
            .written
            .iter()
            .filter(|message| message.kind() == MessageKind::LineData)
            .filter_map(Message::buffer)
            .flatten()
            .copied()
            .collect()
    }

    /// The values of every written message of the given kind.
    pub fn written_values(&self, kind: MessageKind) -> Vec<u32> {
        self.lock()
            .written
            .iter()
            .filter(|message| message.kind() == kind)
            .filter_map(Message::value)
            .collect()
    }

    /// Every flow control signal given to the port, true meaning XOFF.
    pub fn xoff_xon(&self) -> Vec<bool> {
        self.lock().xoff_xon.clone()
    }
}

/// Builder for a [`MockPort`].
#[derive(Debug)]
pub struct MockBuilder {
    name: String,
    loopback: Option<(PortId, HubEventSender)>,
    supported: u32,
    requested_in: u32,
    requested_out: u32,
    connected: bool,
}

impl MockBuilder {
    /// Start a new builder.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            loopback: None,
            supported: 0,
            requested_in: 0,
            requested_out: 0,
            connected: true,
        }
    }

    /// Line data written to the port is read back as port `id`.
    pub fn loopback(mut self, id: PortId, events: HubEventSender) -> Self {
        self.loopback = Some((id, events));
        self
    }

    /// The option bits this port supports when asked.
    pub fn supporting(mut self, options: u32) -> Self {
        self.supported = options;
        self
    }

    /// The inbound option bits this port asks for when negotiating.
    pub fn requesting(mut self, options: u32) -> Self {
        self.requested_in = options;
        self
    }

    /// The outbound option bits this port asks for when negotiating.
    pub fn requesting_out(mut self, options: u32) -> Self {
        self.requested_out = options;
        self
    }

    /// All writes fail, as if there was nobody on the other end.
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    #[must_use]
    /// Create the port.
    pub fn build(self) -> MockPort {
        debug!(name = %self.name, loopback = self.loopback.is_some(), "Creating mock");

        MockPort {
            name: self.name,
            record: MockRecord::default(),
            loopback: self.loopback,
            supported: self.supported,
            requested_in: self.requested_in,
            requested_out: self.requested_out,
            connected: self.connected,
        }
    }
}

/// A port which only exists in memory.
#[derive(Debug)]
pub struct MockPort {
    name: String,
    record: MockRecord,
    loopback: Option<(PortId, HubEventSender)>,
    supported: u32,
    requested_in: u32,
    requested_out: u32,
    connected: bool,
}

impl MockPort {
    /// A plain mock.
    pub fn new(name: &str) -> Self {
        MockBuilder::new(name).build()
    }

    /// Get a handle to what is done to this port.
    pub fn record(&self) -> MockRecord {
        self.record.clone()
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, message: Message) -> bool {
        if !self.connected {
            trace!(name = %self.name, %message, "Not connected, dropping");
            return false;
        }

        match message.kind() {
            MessageKind::GetOutOptions => {
                message.accumulate(self.supported);
            }
            MessageKind::LineData => {
                if let Some((id, events)) = &self.loopback {
                    match message.try_clone() {
                        Ok(copy) => {
                            if let Err(e) = events.unbounded_send(HubEvent::Read(*id, copy.into())) {
                                warn!("Send error in loopback: {e:?}");
                            }
                        }
                        Err(e) => warn!(?e, "Could not copy message for loopback"),
                    }
                }
            }
            _ => {}
        }

        self.record.lock().written.push(message);

        true
    }

    fn add_xoff_xon(&mut self, xoff: bool) {
        trace!(name = %self.name, xoff, "Flow control");
        self.record.lock().xoff_xon.push(xoff);
    }

    fn fake_read_filter(&mut self, chain: &mut MessageChain) {
        for message in chain.iter() {
            if message.kind() == MessageKind::GetInOptions {
                message.accumulate(self.supported);
            }
        }
    }

    fn requested_options(&self, kind: MessageKind) -> u32 {
        match kind {
            MessageKind::GetInOptions => self.requested_in,
            MessageKind::GetOutOptions => self.requested_out,
            _ => 0,
        }
    }
}
