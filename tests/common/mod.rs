#![allow(dead_code)]

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::channel::mpsc;
use port_hub::{
    filter::{Capabilities, Filter, FilterError, FilterInstance, FilterType},
    filters::Filters,
    hub::Hub,
    message::{Message, MessageChain, MessageKind},
    port::{HubEvent, HubEventSender, MockPort, MockRecord, Port, PortId},
    server,
};
use tokio::time::{sleep, timeout};

/// Plain mock ports named `mock0`, `mock1`, ...
pub fn mocks(n: usize) -> (Vec<Box<dyn Port>>, Vec<MockRecord>) {
    (0..n)
        .map(|i| {
            let mock = MockPort::new(&format!("mock{i}"));
            let record = mock.record();
            (Box::new(mock) as Box<dyn Port>, record)
        })
        .unzip()
}

/// Run the hub in a task.
pub fn start_hub(hub: Hub, events: mpsc::UnboundedReceiver<HubEvent>) {
    tokio::spawn(server::run_hub(hub, events));
}

/// Post an event, as a transport would.
pub fn post(events: &HubEventSender, event: HubEvent) -> Result<()> {
    events
        .unbounded_send(event)
        .map_err(|e| eyre!("Hub is gone: {e:?}"))
}

/// Wait until `done` is true, or give up after a few seconds.
pub async fn eventually<F: Fn() -> bool>(done: F) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while !done() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| eyre!("Timed out waiting"))
}

/// A filter which marks what passes through it.
///
/// Inbound, it appends its label to line data and echoes the label.
/// Outbound, it appends its label in lowercase, or fails if told to.
pub struct Mark {
    label: &'static str,
    capabilities: Capabilities,
    echo: bool,
    fail_outbound: bool,
}

impl Mark {
    pub fn both(label: &'static str) -> Self {
        Self {
            label,
            capabilities: Capabilities::BOTH,
            echo: false,
            fail_outbound: false,
        }
    }

    pub fn echoing(label: &'static str) -> Self {
        Self {
            echo: true,
            ..Self::both(label)
        }
    }

    pub fn failing(label: &'static str) -> Self {
        Self {
            capabilities: Capabilities::OUTBOUND,
            fail_outbound: true,
            ..Self::both(label)
        }
    }

    pub fn into_filter(self) -> Filter {
        let label = self.label;
        Filter::new(label, None, Box::new(self))
    }
}

struct MarkInstance {
    label: &'static str,
    echo: bool,
    fail_outbound: bool,
}

impl FilterType for Mark {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_instance(&self, _port: PortId, _port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(MarkInstance {
            label: self.label,
            echo: self.echo,
            fail_outbound: self.fail_outbound,
        })
    }
}

impl FilterInstance for MarkInstance {
    fn inbound(
        &mut self,
        mut message: Message,
        echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        if message.kind() != MessageKind::LineData {
            return Ok(message.into());
        }

        if self.echo {
            echo.push(Message::line_data(self.label).map_err(|e| FilterError::new(e.to_string()))?);
        }

        if let Some(bytes) = message.buffer_mut() {
            bytes.extend_from_slice(self.label.as_bytes());
        }

        Ok(message.into())
    }

    fn outbound(&mut self, _from: PortId, mut message: Message) -> Result<MessageChain, FilterError> {
        if self.fail_outbound {
            return Err(FilterError::new(format!("{} refuses", self.label)));
        }

        if let Some(bytes) = message.buffer_mut() {
            bytes.extend_from_slice(self.label.to_lowercase().as_bytes());
        }

        Ok(message.into())
    }
}

/// A filter which says it supports some inbound options.
pub struct Supports(pub u32);

struct SupportsInstance(u32);

impl FilterType for Supports {
    fn capabilities(&self) -> Capabilities {
        Capabilities::INBOUND
    }

    fn create_instance(&self, _port: PortId, _port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(SupportsInstance(self.0))
    }
}

impl FilterInstance for SupportsInstance {
    fn inbound(
        &mut self,
        message: Message,
        _echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        if message.kind() == MessageKind::GetInOptions {
            message.accumulate(self.0);
        }

        Ok(message.into())
    }
}

/// Create each filter and attach them all to `port`, in order.
pub fn attach_all(filters: &mut Filters, port: PortId, attach: Vec<Filter>) -> Result<()> {
    for filter in attach {
        let group = filter.group().to_string();
        filters.create(filter)?;
        filters.attach(port, &format!("mock{port}"), &group, None)?;
    }

    Ok(())
}

/// Line data, as a chain.
pub fn line(bytes: &str) -> Result<MessageChain> {
    Ok(Message::line_data(bytes)?.into())
}
