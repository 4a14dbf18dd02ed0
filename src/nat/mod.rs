// src/nat/mod.rs
//! Gateway discovery and control: configuration and module wiring

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

pub mod error;
pub mod local_ip;
pub mod ssdp;
pub mod description;
pub mod soap;
pub mod external_ip;
pub mod upnp;

pub use self::description::{DescriptionResolver, GatewayEndpoint};
pub use self::error::{NatError, NatResult, UpnpError, UpnpErrorCode};
pub use self::local_ip::{detect_local_ip, select_local_ip};
pub use self::soap::{PortMappingRequest, Protocol, SoapClient, SoapResponse, WanIpAction};
pub use self::ssdp::SsdpScanner;
pub use self::upnp::{ControllerState, UpnpController};

/// SSDP discovery port
pub const SSDP_PORT: u16 = 1900;

/// Gateway discovery and control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpnpConfig {
    /// Where the M-SEARCH datagram is sent
    pub ssdp_target: SocketAddr,
    /// How many times the M-SEARCH is sent
    pub search_repeats: u32,
    /// Per-receive read timeout while waiting for SSDP answers
    pub receive_timeout_ms: u64,
    /// Upper bound for every HTTP request (description, SOAP, fallback)
    pub http_timeout_ms: u64,
    /// Plain-text public IP service used when UPnP is not requested
    pub external_ip_url: String,
    /// Description used by the CLI when none is given
    pub mapping_description: String,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            ssdp_target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, SSDP_PORT)),
            search_repeats: 2,
            receive_timeout_ms: 2000,
            http_timeout_ms: 5000,
            external_ip_url: "http://api.ipify.org".to_string(),
            mapping_description: "upnp-gateway".to_string(),
        }
    }
}

impl UpnpConfig {
    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> NatResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            NatError::Configuration(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make discovery meaningless
    pub fn validate(&self) -> NatResult<()> {
        if self.search_repeats == 0 {
            return Err(NatError::Configuration("search_repeats must be at least 1".into()));
        }
        if self.receive_timeout_ms == 0 || self.http_timeout_ms == 0 {
            return Err(NatError::Configuration("timeouts must be non-zero".into()));
        }
        if !(self.external_ip_url.starts_with("http://") || self.external_ip_url.starts_with("https://")) {
            return Err(NatError::Configuration(format!(
                "external_ip_url must be an http(s) URL, got {:?}",
                self.external_ip_url
            )));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// HTTP client shared by the description resolver, SOAP client and fallback
/// lookup. Idle connections are not pooled, every request gets its own.
/// Gateways live on the local network, so proxy settings are ignored.
pub(crate) fn http_client(config: &UpnpConfig) -> NatResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .map_err(|e| NatError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpnpConfig::default();
        assert_eq!(config.ssdp_target, "255.255.255.255:1900".parse().unwrap());
        assert_eq!(config.search_repeats, 2);
        assert_eq!(config.receive_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: UpnpConfig =
            serde_json::from_str(r#"{ "receive_timeout_ms": 250, "ssdp_target": "127.0.0.1:1901" }"#)
                .unwrap();
        assert_eq!(config.receive_timeout(), Duration::from_millis(250));
        assert_eq!(config.ssdp_target, "127.0.0.1:1901".parse().unwrap());
        assert_eq!(config.search_repeats, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = UpnpConfig { search_repeats: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(NatError::Configuration(_))));

        let config = UpnpConfig { external_ip_url: "ftp://example.org".into(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            UpnpConfig::from_file("/nonexistent/upnp-gateway.json"),
            Err(NatError::Io(_))
        ));
    }
}
