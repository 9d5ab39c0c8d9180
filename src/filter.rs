use std::{fmt::Display, sync::Arc};

use clap::Parser;
use thiserror::Error;
use tracing::debug;

use crate::{
    error::Error,
    message::{Message, MessageChain},
    port::PortId,
};

pub(crate) mod crypt;
pub(crate) mod echo;
pub(crate) mod tag;
pub(crate) mod trace;

/// A filter could not process a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FilterError(pub String);

impl FilterError {
    /// Create a new filter error with the given reason.
    pub fn new<S: AsRef<str>>(reason: S) -> Self {
        Self(reason.as_ref().into())
    }
}

/// Which transforms a filter provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Runs on messages read from the port the filter is attached to.
    pub inbound: bool,

    /// Runs on messages about to be written to the port the filter is attached to.
    pub outbound: bool,
}

impl Capabilities {
    /// Only an inbound transform.
    pub const INBOUND: Self = Self {
        inbound: true,
        outbound: false,
    };

    /// Only an outbound transform.
    pub const OUTBOUND: Self = Self {
        inbound: false,
        outbound: true,
    };

    /// Both transforms.
    pub const BOTH: Self = Self {
        inbound: true,
        outbound: true,
    };
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.inbound, self.outbound) {
            (true, true) => write!(f, "in, out"),
            (true, false) => write!(f, "in"),
            (false, true) => write!(f, "out"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// The behavior shared by all instances of a filter.
pub trait FilterType: Send + Sync {
    /// Which transforms instances of this filter implement.
    fn capabilities(&self) -> Capabilities;

    /// Create the state for this filter attached to a port.
    fn create_instance(&self, port: PortId, port_name: &str) -> Box<dyn FilterInstance>;
}

/// A filter attached to a port.
///
/// Each transform is given a single message and returns what should
/// replace it: the message itself (possibly modified), other messages,
/// several messages, or none at all.
pub trait FilterInstance: Send {
    /// Transform a message read from the port this instance is attached to.
    ///
    /// Messages pushed to `echo` are written back to that same port.
    fn inbound(
        &mut self,
        message: Message,
        _echo: &mut MessageChain,
    ) -> Result<MessageChain, FilterError> {
        Ok(message.into())
    }

    /// Transform a message originating from `from` about to be written
    /// to the port this instance is attached to.
    fn outbound(&mut self, _from: PortId, message: Message) -> Result<MessageChain, FilterError> {
        Ok(message.into())
    }
}

/// A created filter.
///
/// Filters live as long as the hub. The same filter may be attached to
/// several ports, each attachment gets its own [`FilterInstance`].
pub struct Filter {
    group: String,
    name: String,
    capabilities: Capabilities,
    filter_type: Box<dyn FilterType>,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Filter {
    /// A filter attached by `group`, shown as `name` (or the group if none).
    pub fn new(group: &str, name: Option<&str>, filter_type: Box<dyn FilterType>) -> Self {
        Self {
            group: group.into(),
            name: name.unwrap_or(group).into(),
            capabilities: filter_type.capabilities(),
            filter_type,
        }
    }

    /// Create a filter of a registered type from argv-like options.
    pub fn create(group: &str, kind: &str, args: &[String]) -> Result<Self, Error> {
        let factory = registry::factory(kind)
            .ok_or_else(|| Error::UnknownFilterType(kind.to_string()))?;

        let filter_type = factory(args).map_err(|problem| Error::BadFilterArgs {
            filter: kind.to_string(),
            problem,
        })?;

        debug!(%group, %kind, ?args, "Created filter");

        Ok(Self::new(group, Some(kind), filter_type))
    }

    /// The name used when attaching the filter to ports.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The name used in reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which transforms the filter provides.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn create_instance(&self, port: PortId, port_name: &str) -> Box<dyn FilterInstance> {
        self.filter_type.create_instance(port, port_name)
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name == self.group {
            write!(f, "{} ({})", self.name, self.capabilities)
        } else {
            write!(f, "{}:{} ({})", self.group, self.name, self.capabilities)
        }
    }
}

/// Parse argv-like filter options with `clap`.
///
/// The first element of `args` is not a program name,
/// so the filter name is prepended.
pub(crate) fn parse_args<P: Parser>(name: &str, args: &[String]) -> Result<P, String> {
    P::try_parse_from(std::iter::once(name).chain(args.iter().map(String::as_str)))
        .map_err(|e| e.to_string())
}

/// The filter types available from configuration.
pub mod registry {
    use super::FilterType;

    /// Creates a filter type from its options, or says why the options are bad.
    pub type FilterFactory = fn(&[String]) -> Result<Box<dyn FilterType>, String>;

    /// Names of all registered filter types.
    pub const NAMES: [&str; 4] = ["echo", "trace", "crypt", "tag"];

    /// Find the factory for a filter type.
    pub fn factory(kind: &str) -> Option<FilterFactory> {
        let factory: FilterFactory = match kind {
            "echo" => super::echo::create,
            "trace" => super::trace::create,
            "crypt" => super::crypt::create,
            "tag" => super::tag::create,
            _ => return None,
        };

        Some(factory)
    }

    /// A one line description per filter type.
    pub fn describe(kind: &str) -> Option<&'static str> {
        match kind {
            "echo" => Some("Writes line data read from a port back to that port."),
            "trace" => Some("Logs every message passing through."),
            "crypt" => Some("XOR encrypts outbound and decrypts inbound line data."),
            "tag" => Some("Prefixes outbound line data with the index of the port it came from."),
            _ => None,
        }
    }
}

/// Share a filter between the registry of created filters and attachments.
pub(crate) type SharedFilter = Arc<Filter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_rejected() {
        let err = Filter::create("g", "nope", &[]).unwrap_err();

        assert_eq!(err, Error::UnknownFilterType("nope".into()));
    }

    #[test]
    fn bad_args_are_rejected() {
        let err = Filter::create("g", "crypt", &["--bogus".to_string()]).unwrap_err();

        assert!(matches!(err, Error::BadFilterArgs { filter, .. } if filter == "crypt"));
    }

    #[test]
    fn every_registered_type_has_a_factory_and_description() {
        for name in registry::NAMES {
            assert!(registry::factory(name).is_some(), "{name}");
            assert!(registry::describe(name).is_some(), "{name}");
        }
    }

    #[test]
    fn names_come_from_group_and_type() {
        let filter = Filter::create("my-echo", "echo", &[]).unwrap();

        assert_eq!(filter.group(), "my-echo");
        assert_eq!(filter.name(), "echo");

        let echo = echo::create(&[]).unwrap();
        let filter = Filter::new("g", None, echo);
        assert_eq!(filter.name(), "g");
    }
}
