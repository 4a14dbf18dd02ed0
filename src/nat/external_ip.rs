// src/nat/external_ip.rs
//! Public IP lookup over plain HTTP, used when UPnP is not requested

use std::net::IpAddr;
use std::time::Duration;

use crate::nat::error::{NatError, NatResult, UpnpError};

/// GET `url` and parse the body as an IP address. Single attempt, no
/// alternate providers.
///
/// `timeout` is the one configured on `client`; it is only used to report
/// [`NatError::Timeout`].
pub async fn lookup(client: &reqwest::Client, url: &str, timeout: Duration) -> NatResult<IpAddr> {
    tracing::debug!("Looking up external IP via {}", url);

    let body = fetch(client, url).await.map_err(|e| {
        if e.is_timeout() {
            NatError::Timeout(timeout)
        } else {
            e.into()
        }
    })?;
    let ip = parse_ip_body(&body)?;

    tracing::info!("External IP via HTTP: {}", ip);
    Ok(ip)
}

async fn fetch(client: &reqwest::Client, url: &str) -> reqwest::Result<String> {
    client.get(url).send().await?.error_for_status()?.text().await
}

fn parse_ip_body(body: &str) -> Result<IpAddr, UpnpError> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| UpnpError::MalformedResponse(format!("not an IP address: {:?}", trimmed)))
}
