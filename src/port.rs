use std::fmt::Display;

use futures::channel::mpsc;
use serde::{Deserialize, Serialize};

use crate::message::{Handle, Message, MessageChain, MessageKind};

pub(crate) mod mock;
pub(crate) mod serial;
pub(crate) mod stream;
pub mod tcp;

pub use mock::{MockBuilder, MockPort, MockRecord};
pub use serial::SerialPortBuilder;
pub use stream::StreamPort;

/// Identifies a port by its index.
/// Indices are assigned in configuration order, starting from zero.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct PortId(pub usize);

impl PortId {
    /// The index of the port.
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PortId> for Handle {
    fn from(id: PortId) -> Self {
        Handle(id.0)
    }
}

/// Something a transport reports to the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// Messages arrived on the port.
    Read(PortId, MessageChain),

    /// The port is congested.
    Xoff(PortId),

    /// The port is no longer congested.
    Xon(PortId),
}

impl Display for HubEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubEvent::Read(id, chain) => write!(f, "read on {id}: {chain}"),
            HubEvent::Xoff(id) => write!(f, "xoff on {id}"),
            HubEvent::Xon(id) => write!(f, "xon on {id}"),
        }
    }
}

/// Where transports post their [`HubEvent`]s.
pub type HubEventSender = mpsc::UnboundedSender<HubEvent>;

/// A port is something the hub can write messages to.
/// Messages read from the port reach the hub as [`HubEvent`]s.
pub trait Port: Send {
    /// The display name of the port.
    fn name(&self) -> &str;

    /// Accept a single message for transmission.
    ///
    /// Returns false if the message could not be accepted,
    /// in which case it is counted as lost.
    fn write(&mut self, message: Message) -> bool;

    /// Another port this port feeds is congested (true) or recovered (false).
    fn add_xoff_xon(&mut self, xoff: bool);

    /// Look at negotiation messages before they are dispatched as if read from this port.
    fn fake_read_filter(&mut self, _chain: &mut MessageChain) {}

    /// The option bits this port asks for when negotiating `kind`.
    fn requested_options(&self, _kind: MessageKind) -> u32 {
        0
    }
}
