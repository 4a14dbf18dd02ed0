// src/nat/upnp.rs
//! Gateway controller
//!
//! Owns the discovery state shared with background discovery tasks and gates
//! port mapping requests on a known gateway endpoint.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::nat::description::{DescriptionResolver, GatewayEndpoint};
use crate::nat::error::{NatError, NatResult};
use crate::nat::soap::{PortMappingRequest, Protocol, SoapClient, WanIpAction};
use crate::nat::ssdp::SsdpScanner;
use crate::nat::{external_ip, http_client, local_ip, UpnpConfig};

/// Snapshot of what the controller knows about the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    pub discovered: bool,
    pub local_ip: IpAddr,
    pub external_ip: Option<IpAddr>,
    pub endpoint: Option<GatewayEndpoint>,
}

/// Discovers the gateway in the background and forwards ports through it.
///
/// Port mapping calls are silently dropped until a UPnP discovery has found
/// a gateway; nothing is queued.
pub struct UpnpController {
    config: UpnpConfig,
    http: reqwest::Client,
    state: Arc<RwLock<ControllerState>>,
    shutdown: CancellationToken,
}

impl UpnpController {
    /// Create a controller; the local IP is detected here, once
    pub fn new(config: UpnpConfig) -> NatResult<Self> {
        let local_ip = local_ip::detect_local_ip();
        Self::with_local_ip(config, local_ip)
    }

    /// Create a controller with an already known local IP
    pub fn with_local_ip(config: UpnpConfig, local_ip: IpAddr) -> NatResult<Self> {
        config.validate()?;
        let http = http_client(&config)?;

        Ok(Self {
            config,
            http,
            state: Arc::new(RwLock::new(ControllerState {
                discovered: false,
                local_ip,
                external_ip: None,
                endpoint: None,
            })),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start a discovery attempt on a background task.
    ///
    /// With `use_upnp` the gateway is searched via SSDP and asked for the
    /// external IP; otherwise only the HTTP fallback lookup runs. The
    /// returned receiver completes once the attempt has updated the state.
    /// If the controller is shut down during a fallback lookup the sender is
    /// dropped instead. Must be called within a tokio runtime.
    pub fn discover(&self, use_upnp: bool) -> oneshot::Receiver<()> {
        let (completed_tx, completed_rx) = oneshot::channel();

        let config = self.config.clone();
        let http = self.http.clone();
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if use_upnp {
                let (endpoint, external_ip) = discover_gateway(&config, &http).await;
                let mut state = state.write();
                // A failed attempt keeps the gateway found earlier
                if endpoint.is_some() {
                    state.endpoint = endpoint;
                }
                if external_ip.is_some() {
                    state.external_ip = external_ip;
                }
                state.discovered = true;
            } else {
                let result = tokio::select! {
                    _ = shutdown.cancelled() => Err(NatError::Cancelled),
                    result = external_ip::lookup(&http, &config.external_ip_url, config.http_timeout()) => result,
                };

                let external_ip = match result {
                    Ok(ip) => Some(ip),
                    Err(NatError::Cancelled) => {
                        tracing::debug!("External IP lookup cancelled");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("External IP lookup failed: {}", e);
                        None
                    }
                };

                let mut state = state.write();
                if external_ip.is_some() {
                    state.external_ip = external_ip;
                }
                state.discovered = true;
            }

            // The caller may have stopped listening
            let _ = completed_tx.send(());
        });

        completed_rx
    }

    /// A discovery attempt has completed
    pub fn is_discovered(&self) -> bool {
        self.state.read().discovered
    }

    /// A gateway endpoint is known; port mapping calls will be sent
    pub fn upnp_ready(&self) -> bool {
        self.state.read().endpoint.is_some()
    }

    pub fn local_ip(&self) -> IpAddr {
        self.state.read().local_ip
    }

    pub fn external_ip(&self) -> Option<IpAddr> {
        self.state.read().external_ip
    }

    pub fn endpoint(&self) -> Option<GatewayEndpoint> {
        self.state.read().endpoint.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.state.read().clone()
    }

    /// Forward `port` on the gateway to the same port on this host.
    ///
    /// Returns `false` without touching the network when no gateway is
    /// ready. The gateway's answer is only logged.
    pub async fn forward_port(&self, port: u16, protocol: Protocol, description: &str) -> bool {
        let (endpoint, local_ip) = {
            let state = self.state.read();
            match &state.endpoint {
                Some(endpoint) => (endpoint.clone(), state.local_ip),
                None => {
                    tracing::debug!("UPnP not ready, dropping forward of {}/{}", port, protocol);
                    return false;
                }
            }
        };

        let request = PortMappingRequest::new(port, protocol, local_ip, description);
        let response = SoapClient::new(self.http.clone())
            .invoke(&endpoint.control_url, &WanIpAction::AddPortMapping(request))
            .await;

        if !response.is_empty() {
            tracing::info!("UPnP port mapping created: {}/{} -> {}:{}", port, protocol, local_ip, port);
        }
        true
    }

    /// Remove the mapping for `port`.
    ///
    /// Returns `false` without touching the network when no gateway is ready.
    pub async fn delete_forwarding_rule(&self, port: u16, protocol: Protocol) -> bool {
        let endpoint = match self.endpoint() {
            Some(endpoint) => endpoint,
            None => {
                tracing::debug!("UPnP not ready, dropping removal of {}/{}", port, protocol);
                return false;
            }
        };

        let action = WanIpAction::DeletePortMapping { external_port: port, protocol };
        let response = SoapClient::new(self.http.clone())
            .invoke(&endpoint.control_url, &action)
            .await;

        if !response.is_empty() {
            tracing::info!("UPnP port mapping removed: {}/{}", port, protocol);
        }
        true
    }

    /// Cancel an outstanding fallback lookup. SSDP searches are not
    /// interrupted; they end on their own receive timeout.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for UpnpController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Scanner, resolver and external IP query, with every failure absorbed
async fn discover_gateway(
    config: &UpnpConfig,
    http: &reqwest::Client,
) -> (Option<GatewayEndpoint>, Option<IpAddr>) {
    let resolver = DescriptionResolver::new(http.clone());

    let endpoint = match SsdpScanner::from_config(config).scan(&resolver).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!("No UPnP gateway found: {}", e);
            return (None, None);
        }
    };

    let response = SoapClient::new(http.clone())
        .invoke(&endpoint.control_url, &WanIpAction::GetExternalIpAddress)
        .await;

    let external_ip = match response.text("NewExternalIPAddress") {
        Some(text) => match text.parse::<IpAddr>() {
            Ok(ip) => {
                tracing::info!("External IP via UPnP: {}", ip);
                Some(ip)
            }
            Err(_) => {
                tracing::warn!("Gateway returned invalid external IP {:?}", text);
                None
            }
        },
        None => {
            tracing::warn!("Gateway did not report an external IP");
            None
        }
    };

    (Some(endpoint), external_ip)
}
