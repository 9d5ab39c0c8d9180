use std::time::Duration;

use futures::{
    channel::mpsc::{self, UnboundedReceiver},
    StreamExt,
};
use serialport::FlowControl;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    config::{Config, PortKind},
    error::Error,
    hub::Hub,
    message::MessageKind,
    port::{tcp, HubEvent, HubEventSender, MockBuilder, MockPort, Port, PortId, SerialPortBuilder},
};

/// How often data lost since last time is warned about.
pub const LOST_REPORT_PERIOD: Duration = Duration::from_secs(10);

/// Open every configured port.
///
/// Mock ports are set up as loopbacks.
pub async fn open_ports(config: &Config, events: HubEventSender) -> Result<Vec<Box<dyn Port>>, Error> {
    let mut ports: Vec<Box<dyn Port>> = Vec::with_capacity(config.ports.len());

    for (index, config_port) in config.ports.iter().enumerate() {
        let id = PortId(index);
        let name = config_port.display_name();

        debug!(%id, %name, kind = ?config_port.kind, "Opening port");

        let port: Box<dyn Port> = match &config_port.kind {
            PortKind::Mock(_) => Box::new(MockBuilder::new(&name).loopback(id, events.clone()).build()),
            PortKind::TcpServer(addr) => {
                let (port, local) = tcp::listen(id, &name, addr, events.clone()).await?;
                info!(%name, %local, "TCP server port ready");
                Box::new(port)
            }
            PortKind::TcpClient(addr) => Box::new(tcp::connect(id, &name, addr, events.clone())),
            PortKind::Serial {
                path,
                baud,
                flow_control,
            } => Box::new(serial_builder(path, *baud, *flow_control).build(id, &name, events.clone())?),
        };

        ports.push(port);
    }

    Ok(ports)
}

fn serial_builder(path: &str, baud: u32, flow_control: Option<FlowControl>) -> SerialPortBuilder {
    let builder = SerialPortBuilder::new(path).set_baud(baud);

    match flow_control {
        Some(flow_control) => builder.set_flow_control(flow_control),
        None => builder,
    }
}

/// Make a hub from the configuration and the opened ports.
pub fn build_hub(config: &Config, ports: Vec<Box<dyn Port>>) -> Result<Hub, Error> {
    config.validate()?;

    Hub::new(ports, config.routing()?, config.build_filters()?)
}

/// What the hub would look like, without opening any ports.
pub fn report(config: &Config) -> Result<Vec<String>, Error> {
    let placeholders = config
        .ports
        .iter()
        .map(|port| Box::new(MockPort::new(&port.display_name())) as Box<dyn Port>)
        .collect();

    Ok(build_hub(config, placeholders)?.report())
}

/// Negotiate options, then handle events until every sender is gone.
pub async fn run_hub(mut hub: Hub, mut events: UnboundedReceiver<HubEvent>) {
    for line in hub.report() {
        info!("{line}");
    }

    hub.negotiate(MessageKind::GetInOptions);
    hub.negotiate(MessageKind::GetOutOptions);

    let mut lost_report = tokio::time::interval(LOST_REPORT_PERIOD);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => hub.handle(event),
                None => {
                    info!("No more events, stopping");
                    return;
                }
            },
            _ = lost_report.tick() => {
                hub.report_lost();
            }
        }
    }
}

/// Validate the configuration, open the ports and run the hub.
pub async fn run(config: Config) -> Result<(), Error> {
    config.validate()?;

    let (events_tx, events_rx) = mpsc::unbounded();

    let ports = open_ports(&config, events_tx)
        .instrument(info_span!("open-ports"))
        .await?;
    let hub = build_hub(&config, ports)?;

    run_hub(hub, events_rx).instrument(info_span!("hub")).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ConfigPort;

    #[test]
    fn report_without_opening() {
        let config = Config {
            ports: vec![
                ConfigPort::from(PortKind::Serial {
                    path: "/dev/does-not-exist".into(),
                    baud: 9600,
                    flow_control: None,
                }),
                ConfigPort::from(PortKind::TcpClient("127.0.0.1:1".into())),
            ],
            ..Default::default()
        };

        let report = report(&config).unwrap();

        assert_eq!(report[0], "Port 0: /dev/does-not-exist");
        assert_eq!(report[1], "Port 1: tcp-client:127.0.0.1:1");
        assert!(report.contains(&"  0 --> 1".to_string()));
    }

    #[test]
    fn serial_flow_control_from_config() {
        assert_eq!(
            serial_builder("/dev/ttyS1", 19_200, Some(FlowControl::Hardware)),
            SerialPortBuilder::new("/dev/ttyS1")
                .set_baud(19_200)
                .set_flow_control(FlowControl::Hardware)
        );
        assert_eq!(
            serial_builder("/dev/ttyS1", 19_200, None),
            SerialPortBuilder::new("/dev/ttyS1").set_baud(19_200)
        );
    }

    #[test]
    fn report_of_bad_config() {
        assert!(report(&Config::default()).is_err());
    }
}
