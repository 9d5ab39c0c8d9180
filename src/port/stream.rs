//! What TCP and serial ports have in common: a byte stream which may come and go.
//!
//! The [`StreamPort`] half is owned by the hub and queues data for the wire.
//! The [`StreamTask`] half runs in a task and shuttles bytes between the
//! wire and the hub while a stream is connected.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::watch,
};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, trace, warn};

use super::{HubEvent, HubEventSender, Port, PortId};
use crate::message::{options, Message, MessageChain, MessageKind};

/// Queued bytes above this raise XOFF.
pub(crate) const HIGH_WATER: usize = 64 * 1024;

/// Queued bytes below this (after XOFF) raise XON.
pub(crate) const LOW_WATER: usize = 16 * 1024;

#[derive(Debug)]
struct Shared {
    id: PortId,
    name: String,
    events: HubEventSender,
    connected: AtomicBool,
    backlog: AtomicUsize,
    congested: AtomicBool,
}

impl Shared {
    fn post(&self, event: HubEvent) {
        if let Err(e) = self.events.unbounded_send(event) {
            warn!(port = %self.name, "Hub is gone: {e:?}");
        }
    }

    fn queued(&self, len: usize) {
        let backlog = self.backlog.fetch_add(len, Ordering::SeqCst) + len;

        if backlog > HIGH_WATER
            && self
                .congested
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            debug!(port = %self.name, backlog, "Congested");
            self.post(HubEvent::Xoff(self.id));
        }
    }

    fn dequeued(&self, len: usize) {
        let backlog = self.backlog.fetch_sub(len, Ordering::SeqCst) - len;

        if backlog < LOW_WATER
            && self
                .congested
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            debug!(port = %self.name, backlog, "No longer congested");
            self.post(HubEvent::Xon(self.id));
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.post(HubEvent::Read(
            self.id,
            Message::with_value(MessageKind::Connect, connected.into()).into(),
        ));
    }
}

/// The hub's side of a byte stream port.
#[derive(Debug)]
pub struct StreamPort {
    shared: Arc<Shared>,
    to_wire: UnboundedSender<Bytes>,
    pause: watch::Sender<usize>,
}

/// The task's side of a byte stream port.
#[derive(Debug)]
pub(crate) struct StreamTask {
    shared: Arc<Shared>,
    to_wire: UnboundedReceiver<Bytes>,
    pause: watch::Receiver<usize>,
}

/// Create both halves of a byte stream port.
pub(crate) fn stream_port(id: PortId, name: &str, events: HubEventSender) -> (StreamPort, StreamTask) {
    let shared = Arc::new(Shared {
        id,
        name: name.into(),
        events,
        connected: AtomicBool::new(false),
        backlog: AtomicUsize::new(0),
        congested: AtomicBool::new(false),
    });

    let (to_wire_tx, to_wire_rx) = mpsc::unbounded();
    let (pause_tx, pause_rx) = watch::channel(0);

    (
        StreamPort {
            shared: shared.clone(),
            to_wire: to_wire_tx,
            pause: pause_tx,
        },
        StreamTask {
            shared,
            to_wire: to_wire_rx,
            pause: pause_rx,
        },
    )
}

impl StreamPort {
    /// True while a stream is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Port for StreamPort {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn write(&mut self, message: Message) -> bool {
        match message.kind() {
            MessageKind::LineData => {
                if !self.is_connected() {
                    return false;
                }

                let Some(bytes) = message.into_buffer() else {
                    return true;
                };
                let len = bytes.len();

                self.shared.queued(len);
                if self.to_wire.unbounded_send(Bytes::from(bytes)).is_err() {
                    self.shared.dequeued(len);
                    return false;
                }

                true
            }
            MessageKind::GetOutOptions => {
                // Nothing can be set on a plain stream.
                true
            }
            MessageKind::SetBaudRate => {
                debug!(port = %self.shared.name, baud = ?message.value(), "Baud rate asked for, stream is left as configured");
                true
            }
            MessageKind::FailInOptions | MessageKind::SetOutOptions => {
                debug!(port = %self.shared.name, %message, "Negotiated");
                true
            }
            _ => {
                trace!(port = %self.shared.name, %message, "Ignored");
                true
            }
        }
    }

    fn add_xoff_xon(&mut self, xoff: bool) {
        self.pause.send_modify(|count| {
            if xoff {
                *count += 1;
            } else {
                *count = count.saturating_sub(1);
            }
        });
    }

    fn fake_read_filter(&mut self, chain: &mut MessageChain) {
        for message in chain.iter() {
            if message.kind() == MessageKind::GetInOptions {
                message.accumulate(options::CONNECT);
            }
        }
    }
}

impl StreamTask {
    /// The display name of the port.
    pub(crate) fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queued data is stale once the stream it was meant for is gone.
    fn discard_queued(&mut self) {
        while let Ok(Some(bytes)) = self.to_wire.try_next() {
            self.shared.dequeued(bytes.len());
        }
    }

    /// Run until the stream closes or fails.
    ///
    /// Returns `Ok(false)` if the port itself was dropped and the task should stop.
    pub(crate) async fn session<S>(&mut self, stream: S) -> io::Result<bool>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = FramedRead::new(reader, BytesCodec::new());

        self.discard_queued();
        self.shared.set_connected(true);
        info!(port = %self.shared.name, "Connected");

        let result = loop {
            let paused = *self.pause.borrow() > 0;

            tokio::select! {
                frame = reader.next(), if !paused => match frame {
                    Some(Ok(bytes)) => {
                        trace!(port = %self.shared.name, "Read {} byte(s)", bytes.len());
                        let message = Message::with_owned_buffer(MessageKind::LineData, bytes.to_vec());
                        self.shared.post(HubEvent::Read(self.shared.id, message.into()));
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(true),
                },
                bytes = self.to_wire.next() => match bytes {
                    Some(bytes) => {
                        let written = writer.write_all(&bytes).await;
                        self.shared.dequeued(bytes.len());
                        if let Err(e) = written {
                            break Err(e);
                        }
                    }
                    None => break Ok(false),
                },
                changed = self.pause.changed() => {
                    if changed.is_err() {
                        break Ok(false);
                    }
                    trace!(port = %self.shared.name, paused = *self.pause.borrow(), "Pause changed");
                }
            }
        };

        self.shared.set_connected(false);
        info!(port = %self.shared.name, "Disconnected");

        result
    }
}
