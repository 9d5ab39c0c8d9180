//! The hub owns the ports, the routes and the filters,
//! and decides where every message read from a port goes.

use std::fmt::Display;

use tracing::{debug, debug_span, trace, warn};

use crate::{
    error::Error,
    filters::Filters,
    message::{Accumulator, Message, MessageChain, MessageKind},
    port::{HubEvent, Port, PortId},
    route::RoutingConfig,
};

/// Data which could not be written to a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lost {
    /// Messages refused by the port.
    pub messages: usize,

    /// Payload bytes in those messages.
    pub bytes: usize,
}

impl Display for Lost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} byte(s) in {} message(s)", self.bytes, self.messages)
    }
}

/// The outcome of option negotiation for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationReport {
    /// The port which asked.
    pub port: PortId,

    /// The option bits asked for.
    pub requested: u32,

    /// The option bits someone said they support.
    pub supported: u32,
}

impl NegotiationReport {
    /// Bits asked for which nobody supports.
    pub fn unsupported(&self) -> u32 {
        self.requested & !self.supported
    }
}

struct PortSlot {
    port: Box<dyn Port>,
    lost: Lost,
    reported: Lost,
}

/// The ports, and what was lost writing to them.
struct Ports(Vec<PortSlot>);

impl Ports {
    fn name(&self, id: PortId) -> &str {
        self.0
            .get(id.index())
            .map(|slot| slot.port.name())
            .unwrap_or("<unknown>")
    }

    fn deliver(&mut self, to: PortId, chain: MessageChain) {
        let Some(slot) = self.0.get_mut(to.index()) else {
            warn!(%to, "No such port, dropping {} message(s)", chain.len());
            return;
        };

        for message in chain {
            let len = message.len();

            if !slot.port.write(message) {
                slot.lost.messages += 1;
                slot.lost.bytes += len;
                debug!(port = slot.port.name(), len, "Write refused, data lost");
            }
        }
    }
}

/// Routes messages between ports, through filters.
///
/// All methods run to completion without waiting on anything.
pub struct Hub {
    ports: Ports,
    routing: RoutingConfig,
    filters: Option<Filters>,
}

impl Hub {
    /// Create a hub. Port ids are the indices into `ports`.
    ///
    /// Without filters, messages are routed as they are.
    pub fn new(
        ports: Vec<Box<dyn Port>>,
        routing: RoutingConfig,
        filters: Option<Filters>,
    ) -> Result<Self, Error> {
        let num_ports = ports.len();

        let out_of_range = routing
            .data()
            .iter()
            .chain(routing.flow_control().iter())
            .flat_map(|(from, to)| [from, to])
            .find(|id| id.index() >= num_ports);

        if let Some(id) = out_of_range {
            return Err(Error::NoSuchPort(format!(
                "{id} is routed, but there are only {num_ports} port(s)"
            )));
        }

        Ok(Self {
            ports: Ports(
                ports
                    .into_iter()
                    .map(|port| PortSlot {
                        port,
                        lost: Lost::default(),
                        reported: Lost::default(),
                    })
                    .collect(),
            ),
            routing,
            filters,
        })
    }

    /// The number of ports.
    pub fn num_ports(&self) -> usize {
        self.ports.0.len()
    }

    /// The id of the port with the given name, if any.
    pub fn port_id(&self, name: &str) -> Option<PortId> {
        self.ports
            .0
            .iter()
            .position(|slot| slot.port.name() == name)
            .map(PortId)
    }

    /// The routes the hub was made with.
    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Messages were read from a port.
    ///
    /// The port's inbound filters run first. Any echo they produce is
    /// written back to the port. Then each destination gets its own copy,
    /// passed through the destination's outbound filters.
    ///
    /// A filter failing drops the messages for that destination only,
    /// or for everyone if it failed on the way in.
    pub fn on_read(&mut self, from: PortId, chain: MessageChain) {
        if from.index() >= self.num_ports() {
            warn!(%from, "Read from unknown port, dropping");
            return;
        }

        let _span = debug_span!("read", port = self.ports.name(from)).entered();
        trace!(%chain, "Dispatching");

        let (chain, echo) = match &mut self.filters {
            Some(filters) => match filters.inbound(from, chain) {
                Ok(composed) => composed,
                Err(e) => {
                    debug!(%e, "Inbound filters failed, dropping");
                    return;
                }
            },
            None => (chain, MessageChain::new()),
        };

        if !echo.is_empty() {
            trace!(%echo, "Echo");
            self.ports.deliver(from, echo);
        }

        if chain.is_empty() {
            return;
        }

        for &to in self.routing.data().destinations(from) {
            let copy = match chain.try_clone() {
                Ok(copy) => copy,
                Err(e) => {
                    warn!(%to, %e, "Could not copy messages, skipping destination");
                    continue;
                }
            };

            let copy = match &mut self.filters {
                Some(filters) => match filters.outbound(to, from, copy) {
                    Ok(copy) => copy,
                    Err(e) => {
                        debug!(%to, %e, "Outbound filters failed, skipping destination");
                        continue;
                    }
                },
                None => copy,
            };

            self.ports.deliver(to, copy);
        }
    }

    fn relay_flow_control(&mut self, from: PortId, xoff: bool) {
        for &to in self.routing.flow_control().destinations(from) {
            trace!(%from, %to, xoff, "Relaying flow control");

            if let Some(slot) = self.ports.0.get_mut(to.index()) {
                slot.port.add_xoff_xon(xoff);
            }
        }
    }

    /// A port is congested.
    pub fn add_xoff(&mut self, from: PortId) {
        self.relay_flow_control(from, true);
    }

    /// A port is no longer congested.
    pub fn add_xon(&mut self, from: PortId) {
        self.relay_flow_control(from, false);
    }

    /// Handle something a transport reported.
    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Read(from, chain) => self.on_read(from, chain),
            HubEvent::Xoff(from) => self.add_xoff(from),
            HubEvent::Xon(from) => self.add_xon(from),
        }
    }

    /// Find out which of the options each port asks for are supported.
    ///
    /// For each port, a `kind` message with a fresh accumulator is read
    /// from the port as if it came from the wire. Filters and ports which
    /// support an option add it to the accumulator along the way.
    ///
    /// Afterwards each port is told the outcome. Inbound options nobody
    /// supports are written back as [`MessageKind::FailInOptions`], the
    /// outbound options which are supported as [`MessageKind::SetOutOptions`].
    /// Unsupported options are also warned about, but are never an error.
    pub fn negotiate(&mut self, kind: MessageKind) -> Vec<NegotiationReport> {
        (0..self.num_ports())
            .map(PortId)
            .map(|id| {
                let slot = &mut self.ports.0[id.index()];
                let requested = slot.port.requested_options(kind);
                let cell = Accumulator::new();

                let mut chain =
                    MessageChain::from(Message::with_accumulator(kind, cell.clone(), requested));
                slot.port.fake_read_filter(&mut chain);

                self.on_read(id, chain);

                let negotiation = NegotiationReport {
                    port: id,
                    requested,
                    supported: cell.get(),
                };

                if negotiation.unsupported() != 0 {
                    warn!(
                        port = self.ports.name(id),
                        ?kind,
                        "Unsupported option(s): {:#x}",
                        negotiation.unsupported()
                    );
                }

                let outcome = match kind {
                    MessageKind::GetInOptions if negotiation.unsupported() != 0 => Some(
                        Message::with_value(MessageKind::FailInOptions, negotiation.unsupported()),
                    ),
                    MessageKind::GetOutOptions if negotiation.supported != 0 => Some(
                        Message::with_value(MessageKind::SetOutOptions, negotiation.supported),
                    ),
                    _ => None,
                };

                if let Some(outcome) = outcome {
                    trace!(%id, %outcome, "Negotiated");
                    self.ports.deliver(id, outcome.into());
                }

                negotiation
            })
            .collect()
    }

    /// Everything lost writing to a port so far.
    pub fn lost(&self, port: PortId) -> Lost {
        self.ports
            .0
            .get(port.index())
            .map(|slot| slot.lost)
            .unwrap_or_default()
    }

    /// Warn about data lost since the last call, per port.
    pub fn report_lost(&mut self) -> Vec<(PortId, Lost)> {
        let mut newly_lost = vec![];

        for (index, slot) in self.ports.0.iter_mut().enumerate() {
            let since = Lost {
                messages: slot.lost.messages - slot.reported.messages,
                bytes: slot.lost.bytes - slot.reported.bytes,
            };

            if since.messages > 0 {
                warn!(port = slot.port.name(), "Lost {since}, {} in total", slot.lost);
                slot.reported = slot.lost;
                newly_lost.push((PortId(index), since));
            }
        }

        newly_lost
    }

    /// Describe ports, routes and filters, one line each.
    pub fn report(&self) -> Vec<String> {
        let mut lines = vec![];

        for (index, slot) in self.ports.0.iter().enumerate() {
            lines.push(format!("Port {index}: {}", slot.port.name()));
        }

        lines.push("Route data:".into());
        lines.extend(self.routing.data().report().into_iter().map(|l| format!("  {l}")));

        lines.push("Route flow control:".into());
        lines.extend(
            self.routing
                .flow_control()
                .report()
                .into_iter()
                .map(|l| format!("  {l}")),
        );

        if let Some(filters) = &self.filters {
            lines.push("Filters:".into());
            lines.extend(filters.report().into_iter().map(|l| format!("  {l}")));
        }

        lines
    }
}
