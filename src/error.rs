use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A port index or name does not exist.
    #[error("The port `{0}` does not exist")]
    NoSuchPort(String),

    /// Filters were attached by a group name nobody created.
    #[error("No filter was created with the group name `{0}`")]
    UnknownFilterGroup(String),

    /// The filter type asked for is not known to the registry.
    #[error("The filter type `{0}` is not known")]
    UnknownFilterType(String),

    /// A filter rejected its arguments.
    #[error("The filter `{filter}` rejected its arguments. Problem: {problem}")]
    BadFilterArgs {
        /// The filter which rejected the arguments.
        filter: String,

        /// Why the arguments were rejected.
        problem: String,
    },

    /// A list of ports in a route could not be understood.
    #[error("The port list `{0}` could not be parsed")]
    BadRouteList(String),

    /// Memory for a message buffer could not be allocated.
    #[error("Out of memory while allocating a message buffer")]
    OutOfMemory,

    /// A filter could not process a message.
    #[error("The filter `{filter}` failed: {reason}")]
    FilterFailed {
        /// Display name of the failing filter.
        filter: String,

        /// The reason given by the filter.
        reason: String,
    },

    /// Some internal problem happened, e.g. a transport could not be opened.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl Error {
    /// Get the inner bad configuration message, if the error is of that variant.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// Get the failing filter and the reason, if the error is of that variant.
    pub fn try_into_filter_failed(self) -> Result<(String, String), Self> {
        if let Self::FilterFailed { filter, reason } = self {
            Ok((filter, reason))
        } else {
            Err(self)
        }
    }
}
