use std::{collections::HashSet, path::Path};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serialport::FlowControl;

use crate::{
    error::Error,
    filter::{registry, Filter},
    filters::Filters,
    port::PortId,
    route::{PortList, RouteDirective, RoutingConfig},
};

/// What kind of transport a port is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    /// An in-memory port, see [`crate::port::MockPort`].
    Mock(String),

    /// Listen on an address, e.g. `"127.0.0.1:7000"`, serving one client at a time.
    TcpServer(String),

    /// Connect to an address, reconnecting when the connection drops.
    TcpClient(String),

    /// A serial port, e.g. `Serial(path: "/dev/ttyUSB0", baud: 115200)`.
    Serial {
        /// The device path.
        path: String,

        /// The baud rate.
        baud: u32,

        /// Flow control, left as the port opens with if not given.
        #[serde(default)]
        flow_control: Option<FlowControl>,
    },
}

/// A port as described by a configuration file.
/// The index of the port is its position in [`Config::ports`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPort {
    /// An optional display name.
    #[serde(default)]
    pub name: Option<String>,

    /// The transport.
    pub kind: PortKind,
}

impl ConfigPort {
    /// The name given, or one made up from the transport.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        match &self.kind {
            PortKind::Mock(name) => name.clone(),
            PortKind::TcpServer(addr) => format!("tcp-server:{addr}"),
            PortKind::TcpClient(addr) => format!("tcp-client:{addr}"),
            PortKind::Serial { path, .. } => path.clone(),
        }
    }
}

impl From<PortKind> for ConfigPort {
    fn from(kind: PortKind) -> Self {
        Self { name: None, kind }
    }
}

/// A filter to create, available for attaching by its group name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFilter {
    /// Unique name used when attaching.
    pub group: String,

    /// The filter type, see [`registry::NAMES`].
    pub kind: String,

    /// Arguments, as on a command line, e.g. `["--key", "secret"]`.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Filters to attach to a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigAttach {
    /// The port index.
    pub port: usize,

    /// Group names of created filters.
    /// The first one is closest to the wire.
    pub groups: Vec<String>,

    /// Only messages from these ports are passed through the outbound transforms.
    #[serde(default)]
    pub sources: Option<PortList>,
}

/// The configuration used for running the hub.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// The ports, in index order.
    #[serde(default)]
    pub ports: Vec<ConfigPort>,

    /// The filters to create.
    #[serde(default)]
    pub filters: Vec<ConfigFilter>,

    /// Which filters go on which ports.
    #[serde(default)]
    pub attach: Vec<ConfigAttach>,

    /// Routing directives, applied in order.
    /// Without any data routes, port 0 is routed to and from all others.
    #[serde(default)]
    pub routes: Vec<RouteDirective>,
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            ports: vec![
                ConfigPort {
                    name: Some("device".into()),
                    kind: PortKind::Serial {
                        path: "/dev/ttyUSB0".into(),
                        baud: 115_200,
                        flow_control: Some(FlowControl::Hardware),
                    },
                },
                PortKind::TcpServer("0.0.0.0:7000".into()).into(),
                PortKind::TcpClient("192.168.1.10:7001".into()).into(),
            ],
            filters: vec![
                ConfigFilter {
                    group: "crypt".into(),
                    kind: "crypt".into(),
                    args: vec!["--key".into(), "secret".into()],
                },
                ConfigFilter {
                    group: "trace".into(),
                    kind: "trace".into(),
                    args: vec![],
                },
            ],
            attach: vec![
                ConfigAttach {
                    port: 0,
                    groups: vec!["trace".into()],
                    sources: None,
                },
                ConfigAttach {
                    port: 2,
                    groups: vec!["crypt".into()],
                    sources: Some(PortList::from("0")),
                },
            ],
            routes: vec![
                RouteDirective::BiRoute("0".into(), "1,2".into()),
                RouteDirective::NoDefaultFcRoute("2".into(), "0".into()),
            ],
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::InternalIssue(format!("Could not serialize config: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    fn check_has_ports(&self) -> Result<(), Error> {
        if self.ports.is_empty() {
            return Err(Error::BadConfig(
                "No ports configured, please add at least one".into(),
            ));
        }

        Ok(())
    }

    fn check_duplicate_filter_groups(&self) -> Result<(), Error> {
        let duplicates = self
            .filters
            .iter()
            .map(|filter| &filter.group)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "Filters are attached by group name, so these must be unique. Duplicates: {duplicates:?}"
            )))
        }
    }

    fn check_filter_kinds_known(&self) -> Result<(), Error> {
        for filter in &self.filters {
            if registry::factory(&filter.kind).is_none() {
                return Err(Error::BadConfig(format!(
                    "The filter group `{}` has the unknown type `{}`. Known types: {:?}",
                    filter.group,
                    filter.kind,
                    registry::NAMES
                )));
            }
        }

        Ok(())
    }

    fn check_attachments(&self) -> Result<(), Error> {
        let groups = self
            .filters
            .iter()
            .map(|filter| filter.group.as_str())
            .collect::<HashSet<_>>();

        for attach in &self.attach {
            if attach.port >= self.ports.len() {
                return Err(Error::BadConfig(format!(
                    "Filters are attached to port {}, but there are only {} port(s)",
                    attach.port,
                    self.ports.len()
                )));
            }

            if let Some(group) = attach.groups.iter().find(|group| !groups.contains(group.as_str())) {
                return Err(Error::BadConfig(format!(
                    "Port {} wants the filter group `{group}`, which is not in the list of filters",
                    attach.port
                )));
            }

            if let Some(sources) = &attach.sources {
                sources.resolve(self.ports.len()).map_err(|e| {
                    Error::BadConfig(format!(
                        "The sources for filters on port {} are not valid: {e}",
                        attach.port
                    ))
                })?;
            }
        }

        Ok(())
    }

    fn check_routes(&self) -> Result<(), Error> {
        RoutingConfig::from_directives(self.ports.len(), &self.routes)
            .map(|_| ())
            .map_err(|e| Error::BadConfig(format!("The routes are not valid: {e}")))
    }

    /// Check everything which can be checked without opening ports.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_has_ports()?;
        self.check_duplicate_filter_groups()?;
        self.check_filter_kinds_known()?;
        self.check_attachments()?;
        self.check_routes()?;

        Ok(())
    }

    /// The route tables described by the routing directives.
    pub fn routing(&self) -> Result<RoutingConfig, Error> {
        RoutingConfig::from_directives(self.ports.len(), &self.routes)
    }

    /// Create the configured filters and attach them.
    ///
    /// Gives `None` if no filters are configured.
    pub fn build_filters(&self) -> Result<Option<Filters>, Error> {
        if self.filters.is_empty() && self.attach.is_empty() {
            return Ok(None);
        }

        let mut filters = Filters::new();

        for filter in &self.filters {
            filters.create(Filter::create(&filter.group, &filter.kind, &filter.args)?)?;
        }

        for attach in &self.attach {
            let port = self
                .ports
                .get(attach.port)
                .ok_or_else(|| Error::NoSuchPort(attach.port.to_string()))?;

            let sources = attach
                .sources
                .as_ref()
                .map(|list| list.resolve(self.ports.len()))
                .transpose()?
                .map(|ids| ids.into_iter().collect::<HashSet<PortId>>());

            for group in &attach.groups {
                filters.attach(
                    PortId(attach.port),
                    &port.display_name(),
                    group,
                    sources.clone(),
                )?;
            }
        }

        Ok(Some(filters))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn two_mocks() -> Config {
        Config {
            ports: vec![
                PortKind::Mock("a".into()).into(),
                PortKind::Mock("b".into()).into(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn example_is_valid() {
        Config::example().validate().unwrap();
    }

    #[test]
    fn example_survives_serialization() {
        let example = Config::example();
        let serialized = example.serialize_pretty().unwrap();

        assert_eq!(Config::deserialize(&serialized).unwrap(), example);
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    ports: [
        (kind: Mock("left")),
        (name: "right", kind: TcpServer("127.0.0.1:7000")),
        (kind: Serial(path: "/dev/ttyACM0", baud: 9600, flow_control: Software)),
    ],
    filters: [
        (group: "tx", kind: "crypt", args: ["--key", "k"]),
        (group: "rx", kind: "echo"),
    ],
    attach: [
        (port: 0, groups: ["rx"]),
        (port: 1, groups: ["tx"], sources: "0,2"),
    ],
    routes: [
        BiRoute("0", "1-2"),
        NoDefaultFcRoute("All", "0"),
    ],
)"#;
        let config = Config::deserialize(input).unwrap();

        assert_eq!(config.ports.len(), 3);
        assert_eq!(config.ports[1].display_name(), "right");
        assert_eq!(config.ports[2].display_name(), "/dev/ttyACM0");
        assert_eq!(
            config.ports[2].kind,
            PortKind::Serial {
                path: "/dev/ttyACM0".into(),
                baud: 9600,
                flow_control: Some(FlowControl::Software),
            }
        );
        assert_eq!(config.attach[1].sources, Some(PortList::from("0,2")));
        assert_eq!(
            config.routes[0],
            RouteDirective::BiRoute("0".into(), "1-2".into())
        );

        config.validate().unwrap();
    }

    #[test]
    fn serial_flow_control_is_optional() {
        let config = Config::deserialize(
            r#"(ports: [(kind: Serial(path: "/dev/ttyS0", baud: 115200))])"#,
        )
        .unwrap();

        assert_eq!(
            config.ports[0].kind,
            PortKind::Serial {
                path: "/dev/ttyS0".into(),
                baud: 115_200,
                flow_control: None,
            }
        );
    }

    #[test]
    fn not_ron() {
        let err = Config::deserialize("ports: {").unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("RON"));
    }

    #[test]
    fn no_ports() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("No ports"));
    }

    #[test]
    fn duplicate_groups() {
        let mut config = two_mocks();
        config.filters = vec![
            ConfigFilter {
                group: "same".into(),
                kind: "echo".into(),
                args: vec![],
            },
            ConfigFilter {
                group: "same".into(),
                kind: "trace".into(),
                args: vec![],
            },
        ];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("Duplicates"));
    }

    #[test]
    fn unknown_filter_kind() {
        let mut config = two_mocks();
        config.filters = vec![ConfigFilter {
            group: "g".into(),
            kind: "compress".into(),
            args: vec![],
        }];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("compress"));
    }

    #[test]
    fn attach_to_missing_port() {
        let mut config = two_mocks();
        config.attach = vec![ConfigAttach {
            port: 2,
            groups: vec![],
            sources: None,
        }];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("only 2 port(s)"));
    }

    #[test]
    fn attach_missing_group() {
        let mut config = two_mocks();
        config.attach = vec![ConfigAttach {
            port: 1,
            groups: vec!["ghost".into()],
            sources: None,
        }];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("ghost"));
    }

    #[test]
    fn bad_sources() {
        let mut config = two_mocks();
        config.filters = vec![ConfigFilter {
            group: "g".into(),
            kind: "tag".into(),
            args: vec![],
        }];
        config.attach = vec![ConfigAttach {
            port: 1,
            groups: vec!["g".into()],
            sources: Some(PortList::from("7")),
        }];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("sources"));
    }

    #[test]
    fn bad_routes() {
        let mut config = two_mocks();
        config.routes = vec![RouteDirective::route("0", "x")];

        let err = config.validate().unwrap_err();
        assert!(err.try_into_bad_config().unwrap().contains("routes"));
    }

    #[test]
    fn no_filters_means_none() {
        assert!(two_mocks().build_filters().unwrap().is_none());
    }

    #[test]
    fn filters_are_attached() {
        let mut config = two_mocks();
        config.filters = vec![
            ConfigFilter {
                group: "c".into(),
                kind: "crypt".into(),
                args: vec![],
            },
            ConfigFilter {
                group: "t".into(),
                kind: "tag".into(),
                args: vec![],
            },
        ];
        config.attach = vec![ConfigAttach {
            port: 1,
            groups: vec!["c".into(), "t".into()],
            sources: Some(PortList::from("0")),
        }];

        let filters = config.build_filters().unwrap().unwrap();

        assert_eq!(
            filters.report(),
            vec!["1: c:crypt (in, out) from [0], t:tag (out) from [0]"]
        );
    }

    #[test]
    fn bad_filter_args_surface() {
        let mut config = two_mocks();
        config.filters = vec![ConfigFilter {
            group: "c".into(),
            kind: "crypt".into(),
            args: vec!["--nope".into()],
        }];

        assert!(matches!(
            config.build_filters(),
            Err(Error::BadFilterArgs { .. })
        ));
    }
}
