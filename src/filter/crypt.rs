//! A XOR cipher.
//! Line data written to the port is encrypted, line data read from it is decrypted.

use clap::Parser;

use super::{parse_args, Capabilities, FilterError, FilterInstance, FilterType};
use crate::{
    message::{Message, MessageChain, MessageKind},
    port::PortId,
};

#[derive(Debug, Parser)]
struct Args {
    /// The key bytes, cycled over the data.
    #[arg(long, default_value = "hub")]
    key: String,
}

struct Crypt {
    key: Vec<u8>,
}

impl FilterType for Crypt {
    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    fn create_instance(&self, _port: PortId, _port_name: &str) -> Box<dyn FilterInstance> {
        Box::new(CryptInstance {
            key: self.key.clone(),
            in_offset: 0,
            out_offset: 0,
        })
    }
}

/// Each direction keeps its own position in the key stream,
/// so data split over several messages is handled like one stream.
struct CryptInstance {
    key: Vec<u8>,
    in_offset: usize,
    out_offset: usize,
}

fn apply(key: &[u8], offset: &mut usize, mut message: Message) -> MessageChain {
    if message.kind() == MessageKind::LineData {
        if let Some(bytes) = message.buffer_mut() {
            for byte in bytes.iter_mut() {
                *byte ^= key[*offset % key.len()];
                *offset = (*offset + 1) % key.len();
            }
        }
    }

    message.into()
}

impl FilterInstance for CryptInstance {
    fn inbound(
        &mut self,
        message: Message,
        _echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        Ok(apply(&self.key, &mut self.in_offset, message))
    }

    fn outbound(&mut self, _from: PortId, message: Message) -> Result<MessageChain, FilterError> {
        Ok(apply(&self.key, &mut self.out_offset, message))
    }
}

pub(crate) fn create(args: &[String]) -> Result<Box<dyn FilterType>, String> {
    let args: Args = parse_args("crypt", args)?;

    if args.key.is_empty() {
        return Err("The key must not be empty".into());
    }

    Ok(Box::new(Crypt {
        key: args.key.into_bytes(),
    }))
}
