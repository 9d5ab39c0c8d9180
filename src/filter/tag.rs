//! Prefixes line data with the index of the port it was read from.
//!
//! The text tag is for whoever reads the wire. It is preceded by an
//! [`MessageKind::Origin`] message, for ports which demultiplex by source.

use clap::Parser;

use super::{parse_args, Capabilities, FilterError, FilterInstance, FilterType};
use crate::{
    message::{Message, MessageChain, MessageKind},
    port::PortId,
};

#[derive(Debug, Parser)]
struct Args {
    /// Written before the port index.
    #[arg(long, default_value = "[")]
    open: String,

    /// Written after the port index.
    #[arg(long, default_value = "] ")]
    close: String,
}

struct Tag {
    open: String,
    close: String,
}

impl FilterType for Tag {
    fn capabilities(&self) -> Capabilities {
        Capabilities::OUTBOUND
    }

    fn create_instance(&self, _port: PortId, _port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(TagInstance {
            open: self.open.clone(),
            close: self.close.clone(),
        })
    }
}

struct TagInstance {
    open: String,
    close: String,
}

impl FilterInstance for TagInstance {
    fn outbound(&mut self, from: PortId, message: Message) -> Result<MessageChain, FilterError> {
        if message.kind() != MessageKind::LineData {
            return Ok(message.into());
        }

        let origin = Message::with_handle(MessageKind::Origin, from.into());

        let tag = format!("{}{from}{}", self.open, self.close);
        let tag = Message::line_data(tag).map_err(|e| FilterError::new(e.to_string()))?;

        Ok(MessageChain::from_iter([origin, tag, message]))
    }
}

pub(crate) fn create(args: &[String]) -> Result<Box<dyn FilterType>, String> {
    let args: Args = parse_args("tag", args)?;

    Ok(Box::new(Tag {
        open: args.open,
        close: args.close,
    }))
}
