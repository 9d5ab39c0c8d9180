//! TCP ports.
//!
//! A server port accepts one client at a time.
//! A client port keeps trying to connect while it is not connected.

use std::{net::SocketAddr, time::Duration};

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, info_span, warn, Instrument};

use super::{
    stream::{stream_port, StreamPort, StreamTask},
    HubEventSender, PortId,
};
use crate::error::Error;

/// How long to wait before connecting again.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Listen on `addr` and serve one client at a time.
///
/// Binding happens before returning, so a bad address is reported right away.
/// Returns the port and the address actually bound.
pub async fn listen(
    id: PortId,
    name: &str,
    addr: &str,
    events: HubEventSender,
) -> Result<(StreamPort, SocketAddr), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::InternalIssue(format!("Could not listen on {addr}, problem: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::InternalIssue(format!("No local address for {addr}: {e}")))?;

    info!(%name, %local, "Listening");

    let (port, task) = stream_port(id, name, events);
    tokio::spawn(serve(listener, task).instrument(info_span!("tcp-server", %name)));

    Ok((port, local))
}

async fn serve(listener: TcpListener, mut task: StreamTask) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(?e, "Accept failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        info!(%peer, "Accepted");
        if let Err(e) = stream.set_nodelay(true) {
            warn!(?e, "Could not set nodelay");
        }

        match task.session(stream).await {
            Ok(true) => info!(%peer, "Client left"),
            Ok(false) => return,
            Err(e) => warn!(%peer, ?e, "Client connection error"),
        }
    }
}

/// Connect to `addr`, and connect again whenever the connection is lost.
pub fn connect(id: PortId, name: &str, addr: &str, events: HubEventSender) -> StreamPort {
    let (port, task) = stream_port(id, name, events);
    let addr = addr.to_string();

    tokio::spawn(keep_connected(addr.clone(), task).instrument(info_span!("tcp-client", %name, %addr)));

    port
}

async fn keep_connected(addr: String, mut task: StreamTask) {
    loop {
        match TcpStream::connect(addr.as_str()).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(?e, "Could not set nodelay");
                }

                match task.session(stream).await {
                    Ok(true) => info!(name = task.name(), "Remote closed the connection"),
                    Ok(false) => return,
                    Err(e) => warn!(?e, "Connection error"),
                }
            }
            Err(e) => {
                error!(?e, "Connection error. Retrying in {} seconds...", RECONNECT_DELAY.as_secs());
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
