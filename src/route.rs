//! Route tables.
//!
//! Two route tables exist: one says where data read from a port goes,
//! the other says where congestion of a port is reported.

use std::{collections::BTreeMap, fmt::Display};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::Error, port::PortId};

/// Maps a source port to its destination ports.
///
/// Destinations keep the order they were added in.
/// A source/destination pair is present at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<PortId, Vec<PortId>>,
}

impl RouteTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Returns false if it was already present.
    pub fn add(&mut self, from: PortId, to: PortId) -> bool {
        let destinations = self.routes.entry(from).or_default();

        if destinations.contains(&to) {
            false
        } else {
            destinations.push(to);
            true
        }
    }

    /// Remove a route. Returns false if it was not present.
    pub fn remove(&mut self, from: PortId, to: PortId) -> bool {
        let Some(destinations) = self.routes.get_mut(&from) else {
            return false;
        };

        let before = destinations.len();
        destinations.retain(|destination| destination != &to);
        let removed = destinations.len() != before;

        if destinations.is_empty() {
            self.routes.remove(&from);
        }

        removed
    }

    /// Check if a route is present.
    pub fn contains(&self, from: PortId, to: PortId) -> bool {
        self.destinations(from).contains(&to)
    }

    /// Where messages from `from` go, in the order the routes were added.
    pub fn destinations(&self, from: PortId) -> &[PortId] {
        self.routes.get(&from).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate over all routes as (source, destination).
    pub fn iter(&self) -> impl Iterator<Item = (PortId, PortId)> + '_ {
        self.routes
            .iter()
            .flat_map(|(from, destinations)| destinations.iter().map(move |to| (*from, *to)))
    }

    /// The number of routes.
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// True if there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The flow control routes implied by data routes.
    ///
    /// Only ports which send data to each other get flow control between them.
    /// A port which only receives from another port does not report its
    /// congestion there.
    pub fn default_flow_control(data: &RouteTable) -> RouteTable {
        let mut flow_control = RouteTable::new();

        for (from, to) in data.iter() {
            if data.contains(to, from) {
                flow_control.add(to, from);
            }
        }

        flow_control
    }

    /// One line per source, e.g. `0 --> 1 2`.
    pub fn report(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|(from, destinations)| format!("{from} --> {}", destinations.iter().join(" ")))
            .collect()
    }
}

/// A list of ports, like `All`, `1`, `0,2` or `1-3,5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortList(pub String);

impl PortList {
    /// All ports.
    pub fn all() -> Self {
        Self("All".into())
    }

    /// Resolve the list against the number of configured ports.
    pub fn resolve(&self, num_ports: usize) -> Result<Vec<PortId>, Error> {
        let list = self.0.trim();
        let bad = || Error::BadRouteList(self.0.clone());

        if list.eq_ignore_ascii_case("all") {
            return Ok((0..num_ports).map(PortId).collect());
        }

        let mut ports = Vec::new();

        for item in list.split(',').map(str::trim) {
            let (first, last) = match item.split_once('-') {
                Some((first, last)) => (first.trim(), last.trim()),
                None => (item, item),
            };

            let first: usize = first.parse().map_err(|_| bad())?;
            let last: usize = last.parse().map_err(|_| bad())?;

            if first > last {
                return Err(bad());
            }

            if last >= num_ports {
                return Err(Error::NoSuchPort(format!(
                    "{last} (in `{}`, there are {num_ports} ports)",
                    self.0
                )));
            }

            for index in first..=last {
                if !ports.contains(&PortId(index)) {
                    ports.push(PortId(index));
                }
            }
        }

        Ok(ports)
    }
}

impl Display for PortList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: AsRef<str>> From<S> for PortList {
    fn from(list: S) -> Self {
        Self(list.as_ref().into())
    }
}

/// An operator's routing instruction.
///
/// Routes between a port and itself are only made by the echo variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDirective {
    /// Send data read from the first ports to the second ports.
    Route(PortList, PortList),

    /// Like [`RouteDirective::Route`], in both directions.
    BiRoute(PortList, PortList),

    /// Send data read from these ports back to themselves.
    EchoRoute(PortList),

    /// Remove data routes.
    NoRoute(PortList, PortList),

    /// Report congestion of the first ports to the second ports.
    FcRoute(PortList, PortList),

    /// Like [`RouteDirective::FcRoute`], in both directions.
    BiFcRoute(PortList, PortList),

    /// Report congestion of these ports to themselves.
    EchoFcRoute(PortList),

    /// Remove flow control routes.
    NoFcRoute(PortList, PortList),

    /// Remove flow control routes derived from data routes.
    NoDefaultFcRoute(PortList, PortList),
}

impl RouteDirective {
    /// A data route from `from` to `to`.
    pub fn route<A: Into<PortList>, B: Into<PortList>>(from: A, to: B) -> Self {
        Self::Route(from.into(), to.into())
    }

    /// A flow control route from `from` to `to`.
    pub fn fc_route<A: Into<PortList>, B: Into<PortList>>(from: A, to: B) -> Self {
        Self::FcRoute(from.into(), to.into())
    }

    fn adds_data_route(&self) -> bool {
        matches!(
            self,
            RouteDirective::Route(..) | RouteDirective::BiRoute(..) | RouteDirective::EchoRoute(_)
        )
    }

    fn defaults() -> [Self; 2] {
        [Self::route("0", "All"), Self::route("All", "0")]
    }
}

fn pairs(
    from: &PortList,
    to: &PortList,
    num_ports: usize,
) -> Result<Vec<(PortId, PortId)>, Error> {
    let from = from.resolve(num_ports)?;
    let to = to.resolve(num_ports)?;

    Ok(from
        .into_iter()
        .cartesian_product(to)
        .filter(|(from, to)| from != to)
        .collect())
}

fn apply(
    table: &mut RouteTable,
    directive: &RouteDirective,
    num_ports: usize,
) -> Result<(), Error> {
    use RouteDirective::*;

    match directive {
        Route(from, to) | FcRoute(from, to) => {
            for (from, to) in pairs(from, to, num_ports)? {
                table.add(from, to);
            }
        }
        BiRoute(from, to) | BiFcRoute(from, to) => {
            for (from, to) in pairs(from, to, num_ports)? {
                table.add(from, to);
                table.add(to, from);
            }
        }
        EchoRoute(ports) | EchoFcRoute(ports) => {
            for port in ports.resolve(num_ports)? {
                table.add(port, port);
            }
        }
        NoRoute(from, to) | NoFcRoute(from, to) | NoDefaultFcRoute(from, to) => {
            for from in from.resolve(num_ports)? {
                for to in to.resolve(num_ports)? {
                    table.remove(from, to);
                }
            }
        }
    }

    Ok(())
}

/// The routes a hub is built with. Not changed after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingConfig {
    data: RouteTable,
    flow_control: RouteTable,
}

impl RoutingConfig {
    /// Routing with the given tables as they are.
    pub fn new(data: RouteTable, flow_control: RouteTable) -> Self {
        Self { data, flow_control }
    }

    /// Build the route tables from directives.
    ///
    /// If no directive adds a data route, data goes from port 0 to all other
    /// ports and from all other ports to port 0.
    ///
    /// Flow control routes start out as [`RouteTable::default_flow_control`]
    /// of the data routes. [`RouteDirective::NoDefaultFcRoute`] removes from
    /// those, then explicit flow control directives are applied on top.
    pub fn from_directives(num_ports: usize, directives: &[RouteDirective]) -> Result<Self, Error> {
        let mut data = RouteTable::new();

        let defaults = RouteDirective::defaults();
        let data_directives = directives.iter().filter(|d| {
            matches!(
                d,
                RouteDirective::Route(..)
                    | RouteDirective::BiRoute(..)
                    | RouteDirective::EchoRoute(_)
                    | RouteDirective::NoRoute(..)
            )
        });

        if directives.iter().any(RouteDirective::adds_data_route) {
            for directive in data_directives {
                apply(&mut data, directive, num_ports)?;
            }
        } else {
            debug!("No data routes given, using defaults");
            for directive in defaults.iter().chain(data_directives) {
                apply(&mut data, directive, num_ports)?;
            }
        }

        let mut flow_control = RouteTable::default_flow_control(&data);

        for directive in directives {
            if let RouteDirective::NoDefaultFcRoute(..) = directive {
                apply(&mut flow_control, directive, num_ports)?;
            }
        }

        for directive in directives {
            if let RouteDirective::FcRoute(..)
            | RouteDirective::BiFcRoute(..)
            | RouteDirective::EchoFcRoute(_)
            | RouteDirective::NoFcRoute(..) = directive
            {
                apply(&mut flow_control, directive, num_ports)?;
            }
        }

        Ok(Self { data, flow_control })
    }

    /// Where data goes.
    pub fn data(&self) -> &RouteTable {
        &self.data
    }

    /// Where congestion is reported.
    pub fn flow_control(&self) -> &RouteTable {
        &self.flow_control
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const A: PortId = PortId(0);
    const B: PortId = PortId(1);
    const C: PortId = PortId(2);

    fn table(routes: &[(PortId, PortId)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (from, to) in routes {
            table.add(*from, *to);
        }
        table
    }

    #[test]
    fn destinations_keep_insertion_order() {
        let t = table(&[(A, C), (A, B), (A, C)]);

        assert_eq!(t.destinations(A), &[C, B]);
        assert_eq!(t.destinations(B), &[] as &[PortId]);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn remove_drops_empty_sources() {
        let mut t = table(&[(A, B)]);

        assert!(t.remove(A, B));
        assert!(!t.remove(A, B));
        assert!(t.is_empty());
    }

    #[test]
    fn default_flow_control_of_bidirectional_pair() {
        let fc = RouteTable::default_flow_control(&table(&[(A, B), (B, A)]));

        assert!(fc.contains(A, B));
        assert!(fc.contains(B, A));
        assert_eq!(fc.len(), 2);
    }

    #[test]
    fn default_flow_control_of_one_way_route_is_empty() {
        let fc = RouteTable::default_flow_control(&table(&[(A, B)]));

        assert!(fc.is_empty());
    }

    #[test]
    fn default_flow_control_of_asymmetric_fan_out() {
        let fc = RouteTable::default_flow_control(&table(&[(A, B), (A, C), (B, A)]));

        assert_eq!(fc, table(&[(B, A), (A, B)]));
        assert!(!fc.contains(C, A));
    }

    #[test]
    fn port_lists() {
        assert_eq!(PortList::all().resolve(3).unwrap(), vec![A, B, C]);
        assert_eq!(PortList::from("all").resolve(2).unwrap(), vec![A, B]);
        assert_eq!(PortList::from("2, 0").resolve(3).unwrap(), vec![C, A]);
        assert_eq!(
            PortList::from("0-2,1").resolve(3).unwrap(),
            vec![A, B, C]
        );

        assert_eq!(
            PortList::from("x").resolve(3),
            Err(Error::BadRouteList("x".into()))
        );
        assert_eq!(
            PortList::from("2-1").resolve(3),
            Err(Error::BadRouteList("2-1".into()))
        );
        assert!(matches!(
            PortList::from("3").resolve(3),
            Err(Error::NoSuchPort(_))
        ));
    }

    #[test]
    fn defaults_make_port_zero_a_hub() {
        let routing = RoutingConfig::from_directives(3, &[]).unwrap();

        assert_eq!(routing.data(), &table(&[(A, B), (A, C), (B, A), (C, A)]));
        assert_eq!(
            routing.flow_control(),
            &table(&[(B, A), (C, A), (A, B), (A, C)])
        );
    }

    #[test]
    fn no_route_removes_from_defaults() {
        let routing = RoutingConfig::from_directives(
            3,
            &[RouteDirective::NoRoute("2".into(), "0".into())],
        )
        .unwrap();

        assert_eq!(routing.data(), &table(&[(A, B), (A, C), (B, A)]));
        assert!(!routing.flow_control().contains(A, C));
    }

    #[test]
    fn routes_never_loop_back_without_echo() {
        let routing =
            RoutingConfig::from_directives(2, &[RouteDirective::route("All", "All")]).unwrap();
        assert_eq!(routing.data(), &table(&[(A, B), (B, A)]));

        let routing = RoutingConfig::from_directives(
            2,
            &[
                RouteDirective::route("0", "1"),
                RouteDirective::EchoRoute("1".into()),
            ],
        )
        .unwrap();
        assert_eq!(routing.data(), &table(&[(A, B), (B, B)]));
    }

    #[test]
    fn explicit_flow_control_wins_over_removed_default() {
        let routing = RoutingConfig::from_directives(
            2,
            &[
                RouteDirective::BiRoute("0".into(), "1".into()),
                RouteDirective::NoDefaultFcRoute("All".into(), "All".into()),
                RouteDirective::fc_route("1", "0"),
            ],
        )
        .unwrap();

        assert_eq!(routing.flow_control(), &table(&[(B, A)]));
    }

    #[test]
    fn no_default_fc_route_does_not_touch_data() {
        let routing = RoutingConfig::from_directives(
            2,
            &[RouteDirective::NoDefaultFcRoute("0".into(), "1".into())],
        )
        .unwrap();

        assert_eq!(routing.data().len(), 2);
        assert_eq!(routing.flow_control(), &table(&[(B, A)]));
    }

    #[test]
    fn bad_list_in_directive_is_an_error() {
        let err =
            RoutingConfig::from_directives(2, &[RouteDirective::route("0", "7")]).unwrap_err();

        assert!(matches!(err, Error::NoSuchPort(_)));
    }

    #[test]
    fn report() {
        let t = table(&[(B, A), (A, C), (A, B)]);

        assert_eq!(t.report(), vec!["0 --> 2 1", "1 --> 0"]);
    }
}
