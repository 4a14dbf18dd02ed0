// src/nat/error.rs
//! Error types for gateway discovery and control

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while talking to the local network and the gateway
#[derive(Debug, Error)]
pub enum NatError {
    /// UPnP IGD errors
    #[error("UPnP error: {0}")]
    Upnp(#[from] UpnpError),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout errors
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The controller was shut down while the operation was pending
    #[error("Operation cancelled")]
    Cancelled,
}

/// UPnP IGD specific errors
#[derive(Debug, Error)]
pub enum UpnpError {
    /// No SSDP answer within the read window
    #[error("No SSDP response within {0:?}")]
    DiscoveryTimeout(Duration),

    /// Scan ended without an acceptable gateway
    #[error("No UPnP gateway found on network")]
    NoGatewayFound,

    /// Description parsed but the device is not an IGD
    #[error("Device {device_type:?} is not an InternetGatewayDevice")]
    InvalidGateway { device_type: String },

    /// Gateway does not expose the required service or node
    #[error("Gateway does not expose {0}")]
    MissingService(String),

    /// SOAP fault with error code
    #[error("SOAP fault {code}: {description}")]
    SoapFault { code: u16, description: String },

    /// HTTP error
    #[error("HTTP error {code}: {reason}")]
    HttpStatus { code: u16, reason: String },

    /// Socket or HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// XML parsing error or missing node
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// URL that cannot be split into authority and path
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl UpnpError {
    /// Decoded IGD error code, if this is a SOAP fault with a known code
    pub fn error_code(&self) -> Option<UpnpErrorCode> {
        match self {
            Self::SoapFault { code, .. } => UpnpErrorCode::from_code(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpnpError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::HttpStatus {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            },
            None => Self::Transport(e.to_string()),
        }
    }
}

impl From<xmltree::ParseError> for UpnpError {
    fn from(e: xmltree::ParseError) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

impl From<reqwest::Error> for NatError {
    fn from(e: reqwest::Error) -> Self {
        NatError::Upnp(e.into())
    }
}

/// UPnP error codes returned by WANIPConnection actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UpnpErrorCode {
    /// Invalid action
    InvalidAction = 401,

    /// Invalid args
    InvalidArgs = 402,

    /// Action failed
    ActionFailed = 501,

    /// Argument value invalid
    ArgumentValueInvalid = 600,

    /// Argument value out of range
    ArgumentValueOutOfRange = 601,

    /// Action not authorized
    ActionNotAuthorized = 606,

    /// Port mapping not found
    NoSuchEntryInArray = 714,

    /// Wild card not permitted in source IP
    WildCardNotPermittedInSrcIp = 715,

    /// Wild card not permitted in external port
    WildCardNotPermittedInExtPort = 716,

    /// Port mapping conflict
    ConflictInMappingEntry = 718,

    /// Same port values required
    SamePortValuesRequired = 724,

    /// Only permanent lease supported
    OnlyPermanentLeaseSupported = 725,

    /// Remote host only supports wildcard
    RemoteHostOnlySupportsWildcard = 726,

    /// External port only supports wildcard
    ExternalPortOnlySupportsWildcard = 727,
}

impl fmt::Display for UpnpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAction => write!(f, "Invalid Action"),
            Self::InvalidArgs => write!(f, "Invalid Arguments"),
            Self::ActionFailed => write!(f, "Action Failed"),
            Self::ArgumentValueInvalid => write!(f, "Argument Value Invalid"),
            Self::ArgumentValueOutOfRange => write!(f, "Argument Value Out of Range"),
            Self::ActionNotAuthorized => write!(f, "Action Not Authorized"),
            Self::NoSuchEntryInArray => write!(f, "No Such Entry in Array"),
            Self::WildCardNotPermittedInSrcIp => write!(f, "Wildcard Not Permitted in Source IP"),
            Self::WildCardNotPermittedInExtPort => write!(f, "Wildcard Not Permitted in External Port"),
            Self::ConflictInMappingEntry => write!(f, "Conflict in Mapping Entry"),
            Self::SamePortValuesRequired => write!(f, "Same Port Values Required"),
            Self::OnlyPermanentLeaseSupported => write!(f, "Only Permanent Lease Supported"),
            Self::RemoteHostOnlySupportsWildcard => write!(f, "Remote Host Only Supports Wildcard"),
            Self::ExternalPortOnlySupportsWildcard => write!(f, "External Port Only Supports Wildcard"),
        }
    }
}

impl UpnpErrorCode {
    /// Convert from u16 error code
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            401 => Some(Self::InvalidAction),
            402 => Some(Self::InvalidArgs),
            501 => Some(Self::ActionFailed),
            600 => Some(Self::ArgumentValueInvalid),
            601 => Some(Self::ArgumentValueOutOfRange),
            606 => Some(Self::ActionNotAuthorized),
            714 => Some(Self::NoSuchEntryInArray),
            715 => Some(Self::WildCardNotPermittedInSrcIp),
            716 => Some(Self::WildCardNotPermittedInExtPort),
            718 => Some(Self::ConflictInMappingEntry),
            724 => Some(Self::SamePortValuesRequired),
            725 => Some(Self::OnlyPermanentLeaseSupported),
            726 => Some(Self::RemoteHostOnlySupportsWildcard),
            727 => Some(Self::ExternalPortOnlySupportsWildcard),
            _ => None,
        }
    }

    /// A later call with the same arguments may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConflictInMappingEntry | Self::ActionFailed)
    }
}

/// Result type for NAT operations
pub type NatResult<T> = Result<T, NatError>;

/// Convert I/O errors to NAT errors with context
pub trait IoErrorContext<T> {
    fn nat_context(self, context: &str) -> NatResult<T>;
}

impl<T> IoErrorContext<T> for io::Result<T> {
    fn nat_context(self, context: &str) -> NatResult<T> {
        self.map_err(|e| NatError::Upnp(UpnpError::Transport(format!("{}: {}", context, e))))
    }
}
