//! The filters attached to each port, and how they are composed.
//!
//! Messages read from a port pass that port's filters first to last.
//! Messages routed to a port pass that port's filters last to first,
//! so the filter attached first is the one closest to the wire.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    error::Error,
    filter::{Filter, FilterInstance, SharedFilter},
    message::MessageChain,
    port::PortId,
};

/// A filter attached to a port.
struct Attached {
    filter: SharedFilter,
    instance: Box<dyn FilterInstance>,

    /// If present, the outbound transform only runs for messages from these ports.
    sources: Option<HashSet<PortId>>,
}

impl Attached {
    fn failed(&self, reason: impl ToString) -> Error {
        Error::FilterFailed {
            filter: self.filter.name().to_string(),
            reason: reason.to_string(),
        }
    }

    fn accepts_from(&self, from: PortId) -> bool {
        match &self.sources {
            Some(sources) if !sources.is_empty() => sources.contains(&from),
            _ => true,
        }
    }

    fn inbound(&mut self, chain: MessageChain, echo: &mut MessageChain) -> Result<MessageChain, Error> {
        let mut transformed = MessageChain::new();

        for message in chain {
            match self.instance.inbound(message, echo) {
                Ok(replacement) => transformed.merge(replacement),
                Err(e) => return Err(self.failed(e)),
            }
        }

        Ok(transformed)
    }

    fn outbound(&mut self, from: PortId, chain: MessageChain) -> Result<MessageChain, Error> {
        let mut transformed = MessageChain::new();

        for message in chain {
            match self.instance.outbound(from, message) {
                Ok(replacement) => transformed.merge(replacement),
                Err(e) => return Err(self.failed(e)),
            }
        }

        Ok(transformed)
    }
}

/// Runs the inbound transforms of `stack[0]` and onwards.
///
/// Returns the transformed chain and the echo to write back to `source`.
/// Echo produced by a filter comes before the echo of the filters after it,
/// and the latter has passed the outbound transform of this filter.
fn compose(
    stack: &mut [Attached],
    source: PortId,
    chain: MessageChain,
) -> Result<(MessageChain, MessageChain), Error> {
    let Some((first, rest)) = stack.split_first_mut() else {
        return Ok((chain, MessageChain::new()));
    };

    let capabilities = first.filter.capabilities();
    let mut echo = MessageChain::new();

    let chain = if capabilities.inbound {
        first.inbound(chain, &mut echo)?
    } else {
        chain
    };

    let (chain, mut downstream_echo) = compose(rest, source, chain)?;

    if capabilities.outbound && !downstream_echo.is_empty() {
        downstream_echo = first.outbound(source, downstream_echo)?;
    }

    echo.merge(downstream_echo);

    Ok((chain, echo))
}

/// Every created filter, and the filters attached to each port.
#[derive(Default)]
pub struct Filters {
    created: HashMap<String, SharedFilter>,
    ports: Vec<Vec<Attached>>,
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("created", &self.created.keys().sorted().collect::<Vec<_>>())
            .field("attached", &self.report())
            .finish()
    }
}

impl Filters {
    /// No filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a filter available for attaching by its group name.
    pub fn create(&mut self, filter: Filter) -> Result<(), Error> {
        let group = filter.group().to_string();

        if self.created.contains_key(&group) {
            return Err(Error::BadConfig(format!(
                "A filter with the group name `{group}` was already created"
            )));
        }

        debug!(%filter, "Filter available");
        self.created.insert(group, Arc::new(filter));

        Ok(())
    }

    /// Attach the filter created with `group` to a port.
    ///
    /// Filters attached earlier are closer to the wire.
    /// If `sources` is given, the outbound transform only runs for messages
    /// originating from those ports.
    pub fn attach(
        &mut self,
        port: PortId,
        port_name: &str,
        group: &str,
        sources: Option<HashSet<PortId>>,
    ) -> Result<(), Error> {
        let filter = self
            .created
            .get(group)
            .cloned()
            .ok_or_else(|| Error::UnknownFilterGroup(group.to_string()))?;

        if self.ports.len() <= port.index() {
            self.ports.resize_with(port.index() + 1, Vec::new);
        }

        debug!(%port, %filter, ?sources, "Attaching filter");

        let instance = filter.create_instance(port, port_name);
        self.ports[port.index()].push(Attached {
            filter,
            instance,
            sources,
        });

        Ok(())
    }

    /// True if no filter is attached to any port.
    pub fn is_empty(&self) -> bool {
        self.ports.iter().all(Vec::is_empty)
    }

    /// Pass messages read from `port` through its filters.
    ///
    /// Returns the transformed messages and the echo to write back to `port`.
    pub fn inbound(
        &mut self,
        port: PortId,
        chain: MessageChain,
    ) -> Result<(MessageChain, MessageChain), Error> {
        match self.ports.get_mut(port.index()) {
            Some(stack) => compose(stack, port, chain),
            None => Ok((chain, MessageChain::new())),
        }
    }

    /// Pass messages originating from `from` through the filters of the destination `port`.
    pub fn outbound(
        &mut self,
        port: PortId,
        from: PortId,
        mut chain: MessageChain,
    ) -> Result<MessageChain, Error> {
        let Some(stack) = self.ports.get_mut(port.index()) else {
            return Ok(chain);
        };

        for attached in stack.iter_mut().rev() {
            if !attached.filter.capabilities().outbound {
                continue;
            }

            if !attached.accepts_from(from) {
                trace!(%port, %from, filter = attached.filter.name(), "Skipped, source not accepted");
                continue;
            }

            chain = attached.outbound(from, chain)?;
        }

        Ok(chain)
    }

    /// One line per port with filters attached, e.g. `1: crypt (in, out), trace (in, out)`.
    pub fn report(&self) -> Vec<String> {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, stack)| !stack.is_empty())
            .map(|(index, stack)| {
                let filters = stack
                    .iter()
                    .map(|attached| match &attached.sources {
                        Some(sources) if !sources.is_empty() => format!(
                            "{} from [{}]",
                            attached.filter,
                            sources.iter().sorted().join(",")
                        ),
                        _ => attached.filter.to_string(),
                    })
                    .join(", ");
                format!("{index}: {filters}")
            })
            .collect()
    }
}
