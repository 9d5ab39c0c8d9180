#![deny(missing_docs)]

//! This crate routes data between ports.
//!
//! Ports are byte-stream endpoints: serial ports, TCP connections or
//! in-memory mocks. Whatever is read from one port is routed to the
//! ports configured as its destinations.
//!
//! Filters may be attached to ports. A filter can transform, split,
//! drop or answer (echo) messages read from its port, and transform
//! messages about to be written to it.
//!
//! Congestion of a port is relayed to the ports feeding it, so they
//! can pause reading.

/// The command line interface.
pub mod cli;

/// Describing what the hub should set up.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Filters: types, instances and the registry of available filters.
pub mod filter;

/// Filters created and attached to ports.
pub mod filters;

/// The hub itself.
pub mod hub;

/// Logging setup.
pub mod logging;

/// Messages and chains of messages.
pub mod message;

/// Ports, and the events they report to the hub.
pub mod port;

/// Routing tables and the directives building them.
pub mod route;

/// Running the hub with configured ports.
pub mod server;
