// src/nat/ssdp.rs
//! SSDP gateway search
//!
//! Sends `M-SEARCH` for `upnp:rootdevice` and walks the answers until one of
//! them advertises a description the [`DescriptionResolver`] accepts as an
//! Internet Gateway Device.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::nat::description::{DescriptionResolver, GatewayEndpoint};
use crate::nat::error::{IoErrorContext, NatResult, UpnpError};
use crate::nat::UpnpConfig;

/// M-SEARCH request, sent verbatim
pub const SSDP_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
                               HOST: 239.255.255.250:1900\r\n\
                               ST:upnp:rootdevice\r\n\
                               MAN:\"ssdp:discover\"\r\n\
                               MX:3\r\n\r\n";

const SEARCH_TARGET: &str = "upnp:rootdevice";
const RECV_BUFFER_SIZE: usize = 0x1000;

/// One-shot SSDP search for a gateway
#[derive(Debug, Clone)]
pub struct SsdpScanner {
    target: SocketAddr,
    repeats: u32,
    receive_timeout: Duration,
}

impl SsdpScanner {
    pub fn new(target: SocketAddr, repeats: u32, receive_timeout: Duration) -> Self {
        Self { target, repeats, receive_timeout }
    }

    pub fn from_config(config: &UpnpConfig) -> Self {
        Self::new(config.ssdp_target, config.search_repeats, config.receive_timeout())
    }

    /// Search until a gateway is accepted by `resolver`, or until a receive
    /// times out, fails or yields an empty datagram.
    ///
    /// The socket lives only for the duration of this call.
    pub async fn scan(&self, resolver: &DescriptionResolver) -> NatResult<GatewayEndpoint> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.nat_context("bind SSDP socket")?;
        socket.set_broadcast(true).nat_context("enable broadcast")?;

        for _ in 0..self.repeats {
            socket
                .send_to(SSDP_SEARCH.as_bytes(), self.target)
                .await
                .nat_context("send M-SEARCH")?;
        }
        tracing::info!("Searching for UPnP gateway via {}", self.target);

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let (size, from) = match timeout(self.receive_timeout, socket.recv_from(&mut buf)).await {
                Ok(received) => received.nat_context("receive SSDP response")?,
                Err(_) => {
                    tracing::debug!("No SSDP response within {:?}", self.receive_timeout);
                    return Err(UpnpError::DiscoveryTimeout(self.receive_timeout).into());
                }
            };

            if size == 0 {
                return Err(UpnpError::NoGatewayFound.into());
            }

            let response = String::from_utf8_lossy(&buf[..size]);
            if !is_root_device(&response) {
                tracing::debug!("Ignoring non-rootdevice SSDP response from {}", from);
                continue;
            }

            let location = match parse_location(&response) {
                Some(location) => location,
                None => {
                    tracing::debug!("SSDP response from {} has no LOCATION", from);
                    continue;
                }
            };

            match resolver.resolve(&location).await {
                Ok(endpoint) => {
                    tracing::info!("Found UPnP gateway at {}", location);
                    return Ok(endpoint);
                }
                Err(e) => {
                    tracing::debug!("Rejected device at {}: {}", location, e);
                }
            }
        }
    }
}

fn is_root_device(response: &str) -> bool {
    response.to_ascii_lowercase().contains(SEARCH_TARGET)
}

/// Value of the `LOCATION` header; the key is case-insensitive, the value
/// keeps its case
pub fn parse_location(response: &str) -> Option<String> {
    response.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("location") {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}
