//! Serial ports.

use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{error, info, info_span, warn, Instrument};

use super::{
    stream::{stream_port, StreamPort, StreamTask},
    HubEventSender, PortId,
};
use crate::error::Error;

/// Builder for a serial [`StreamPort`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SerialPortBuilder {
    baud: Option<u32>,
    flow_control: Option<serialport::FlowControl>,
    path: String,
}

fn try_create_serial_port(
    baud: u32,
    flow_control: serialport::FlowControl,
    path: &str,
) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| Error::InternalIssue(format!("Could not open port at {path}, problem: {e:#?}")))
}

async fn loop_create_serial_port(
    baud: u32,
    flow_control: serialport::FlowControl,
    path: &str,
) -> SerialStream {
    info!("Attempting to connect to serial port at {}", path);
    loop {
        match try_create_serial_port(baud, flow_control, path) {
            Ok(serial_stream) => {
                info!("Connected to serial port at {}", path);
                return serial_stream;
            }
            Err(e) => {
                error!(?e, "Serial port connection error. Retrying in 3 seconds...");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The path should likely be along the lines of `/dev/ttyACMx` on unix, and `COMx` on Windows.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Set the serial port builder's baud.
    /// Will use 115_200 if not set.
    pub fn set_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// Set the flow control.
    /// Will use none if not set.
    pub fn set_flow_control(mut self, flow_control: serialport::FlowControl) -> Self {
        self.flow_control = Some(flow_control);
        self
    }

    /// Open the port and start shuttling data between it and the hub.
    ///
    /// The port is opened once before returning, so a missing port is reported right away.
    /// If the port goes away later on it is reopened.
    pub fn build(self, id: PortId, name: &str, events: HubEventSender) -> Result<StreamPort, Error> {
        let baud = self.baud.unwrap_or(115_200);
        let flow_control = self.flow_control.unwrap_or(serialport::FlowControl::None);

        info!(%self.path, %baud, ?flow_control, "Starting serial port handler");

        let first = try_create_serial_port(baud, flow_control, &self.path)?;

        let (port, task) = stream_port(id, name, events);
        let tty_span = info_span!("tty", %self.path);

        tokio::spawn(run(first, task, baud, flow_control, self.path).instrument(tty_span));

        Ok(port)
    }
}

async fn run(
    first: SerialStream,
    mut task: StreamTask,
    baud: u32,
    flow_control: serialport::FlowControl,
    path: String,
) {
    let mut stream = first;

    loop {
        match task.session(stream).await {
            Ok(true) => warn!(name = task.name(), "Serial port closed"),
            Ok(false) => return,
            Err(e) => error!(?e, "Serial port error"),
        }

        stream = loop_create_serial_port(baud, flow_control, &path).await;
    }
}
