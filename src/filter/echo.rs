//! Writes line data back to the port it was read from.

use clap::Parser;

use super::{parse_args, Capabilities, FilterError, FilterInstance, FilterType};
use crate::{
    message::{Message, MessageChain, MessageKind},
    port::PortId,
};

#[derive(Debug, Parser)]
struct Args {
    /// Do not route the echoed data on to other ports.
    #[arg(long)]
    no_pass: bool,
}

struct Echo {
    pass: bool,
}

impl FilterType for Echo {
    fn capabilities(&self) -> Capabilities {
        Capabilities::INBOUND
    }

    fn create_instance(&self, _port: PortId, _port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(EchoInstance { pass: self.pass })
    }
}

struct EchoInstance {
    pass: bool,
}

impl FilterInstance for EchoInstance {
    fn inbound(
        &mut self,
        message: Message,
        echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        if message.kind() != MessageKind::LineData {
            return Ok(message.into());
        }

        echo.push(
            message
                .try_clone()
                .map_err(|e| FilterError::new(e.to_string()))?,
        );

        if self.pass {
            Ok(message.into())
        } else {
            Ok(MessageChain::new())
        }
    }
}

pub(crate) fn create(args: &[String]) -> Result<Box<dyn FilterType>, String> {
    let args: Args = parse_args("echo", args)?;

    Ok(Box::new(Echo {
        pass: !args.no_pass,
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn echoes_and_passes() {
        let mut instance = create(&[]).unwrap().create_instance(PortId(0), "p0");

        let mut echo = MessageChain::new();
        let passed = instance
            .inbound(Message::line_data("ping").unwrap(), &mut echo)
            .unwrap();

        assert_eq!(echo.line_data(), b"ping");
        assert_eq!(passed.line_data(), b"ping");
    }

    #[test]
    fn no_pass_consumes() {
        let mut instance = create(&["--no-pass".into()])
            .unwrap()
            .create_instance(PortId(0), "p0");

        let mut echo = MessageChain::new();
        let passed = instance
            .inbound(Message::line_data("ping").unwrap(), &mut echo)
            .unwrap();

        assert_eq!(echo.len(), 1);
        assert!(passed.is_empty());
    }

    #[test]
    fn control_messages_are_not_echoed() {
        let mut instance = create(&[]).unwrap().create_instance(PortId(0), "p0");

        let mut echo = MessageChain::new();
        let passed = instance
            .inbound(Message::with_value(MessageKind::Connect, 1), &mut echo)
            .unwrap();

        assert!(echo.is_empty());
        assert_eq!(passed.len(), 1);
    }
}
