//! Logs every message passing through, without changing anything.

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;

use super::{parse_args, Capabilities, FilterError, FilterInstance, FilterType};
use crate::{
    message::{Message, MessageChain},
    port::PortId,
};

#[derive(Debug, Parser)]
struct Args {
    /// Shown in each trace line instead of the port name.
    #[arg(long)]
    label: Option<String>,
}

struct Trace {
    label: Option<String>,
}

impl FilterType for Trace {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    fn create_instance(&self, port: PortId, port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(TraceInstance {
            label: self
                .label
                .clone()
                .unwrap_or_else(|| format!("{port}:{port_name}")),
            started: Utc::now(),
            seen: 0,
        })
    }
}

struct TraceInstance {
    label: String,
    started: DateTime<Utc>,
    seen: usize,
}

impl TraceInstance {
    fn trace(&mut self, direction: &str, message: &Message) {
        self.seen += 1;
        let elapsed = Utc::now() - self.started;

        info!(
            port = %self.label,
            seen = self.seen,
            elapsed_ms = elapsed.num_milliseconds(),
            "{direction} {message}"
        );
    }
}

impl FilterInstance for TraceInstance {
    fn inbound(
        &mut self,
        message: Message,
        _echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        self.trace("in", &message);
        Ok(message.into())
    }

    fn outbound(&mut self, from: PortId, message: Message) -> Result<MessageChain, FilterError> {
        self.trace(&format!("out (from {from})"), &message);
        Ok(message.into())
    }
}

pub(crate) fn create(args: &[String]) -> Result<Box<dyn FilterType>, String> {
    let args: Args = parse_args("trace", args)?;

    Ok(Box::new(Trace { label: args.label }))
}
