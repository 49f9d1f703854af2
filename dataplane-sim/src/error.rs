use crate::network::ip::Prefix;
use std::sync::Arc;
use thiserror::Error;

/// Malformed input detected while constructing one of the kernel's value types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("invalid ip address `{0}`")]
    InvalidAddress(String),
    #[error("invalid prefix length `{0}` (must be an integer between 0 and 32)")]
    InvalidPrefixLength(String),
    #[error("prefix `{0}` contains trailing characters")]
    TrailingCharacters(String),
    #[error("invalid wildcard `{0}` (expected `address:wildcard-mask` or a prefix)")]
    InvalidWildcard(String),
    #[error("invalid sub range `{0}` (expected `n` or `start-end` with start <= end)")]
    InvalidSubRange(String),
    #[error("invalid prefix range `{0}` (expected `prefix` or `prefix:start-end`)")]
    InvalidPrefixRange(String),
    #[error("invalid ip protocol `{0}`")]
    InvalidIpProtocol(String),
    #[error("invalid tcp flags `{0}` (expected names like `SYN|ACK`)")]
    InvalidTcpFlags(String),
    #[error("invalid interface reference `{0}` (expected `node:interface`)")]
    InvalidInterfaceReference(String),
    #[error("route has no destination network")]
    MissingNetwork,
    #[error("route to `{network}` has neither a next hop ip nor a next hop interface")]
    MissingNextHop { network: Prefix },
}

/// A snapshot inconsistency, attributed to the device where it was found
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataPlaneError {
    #[error("device `{device}` is defined more than once")]
    DuplicateDevice { device: Arc<str> },
    #[error("vrf `{vrf}` is defined more than once on device `{device}`")]
    DuplicateVrf { device: Arc<str>, vrf: Arc<str> },
    #[error("device `{device}` references filter `{filter}`, which does not exist")]
    UnknownFilter { device: Arc<str>, filter: Arc<str> },
    #[error("device `{device}` references interface `{interface}`, which does not exist")]
    UnknownInterface {
        device: Arc<str>,
        interface: Arc<str>,
    },
    #[error("interface `{device}:{interface}` belongs to vrf `{vrf}`, which does not exist")]
    UnknownVrf {
        device: Arc<str>,
        interface: Arc<str>,
        vrf: Arc<str>,
    },
    #[error("device `{device}` has an invalid route")]
    InvalidRoute {
        device: Arc<str>,
        #[source]
        source: InvalidInput,
    },
}

impl DataPlaneError {
    /// The device the error is attributed to
    pub fn device(&self) -> &Arc<str> {
        match self {
            DataPlaneError::DuplicateDevice { device }
            | DataPlaneError::DuplicateVrf { device, .. }
            | DataPlaneError::UnknownFilter { device, .. }
            | DataPlaneError::UnknownInterface { device, .. }
            | DataPlaneError::UnknownVrf { device, .. }
            | DataPlaneError::InvalidRoute { device, .. } => device,
        }
    }
}
