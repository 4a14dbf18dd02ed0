//! UPnP gateway control library (lib.rs)
//!
//! Finds the Internet Gateway Device on the local network via SSDP, asks it
//! for the public IP address and manages port forwarding rules through the
//! WANIPConnection:1 SOAP service. Without UPnP, the public IP can be looked
//! up over HTTP instead.

#![warn(clippy::all)]

pub mod nat;

// Re-export main types
pub use nat::{
    ControllerState,
    GatewayEndpoint,
    Protocol,
    UpnpConfig,
    UpnpController,
};

// Re-export error types
pub use nat::error::{NatError, NatResult, UpnpError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging system with custom configuration
///
/// # Arguments
/// * `level` - Log level (trace/debug/info/warn/error)
///
/// # Example
/// ```
/// upnp_gateway::init_logging("info");
/// ```
///
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Reduce verbosity of some dependencies
    for directive in ["tokio=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // A second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(true)
        )
        .with(filter)
        .try_init();
}
