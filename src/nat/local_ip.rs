// src/nat/local_ip.rs
//! Local address detection
//!
//! Picks the host's IPv4 address that lives in the same /24 as the default
//! gateway. This is the address the gateway has to forward traffic to, so it
//! is what goes into `NewInternalClient`.

use std::net::{IpAddr, Ipv4Addr};

/// Detect the local IPv4 address on the default gateway's subnet.
///
/// Never fails: if no gateway is known or no local address matches, the
/// unspecified address `0.0.0.0` is returned.
pub fn detect_local_ip() -> IpAddr {
    let gateway = default_gateway();
    tracing::debug!("Default gateway: {:?}", gateway);

    let addresses = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::debug!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        }
    };

    let local_ip = select_local_ip(gateway, addresses);
    tracing::info!("Local IP: {}", local_ip);
    local_ip
}

/// Choose the first IPv4 candidate sharing the gateway's first three octets.
pub fn select_local_ip<I>(gateway: Option<Ipv4Addr>, candidates: I) -> IpAddr
where
    I: IntoIterator<Item = IpAddr>,
{
    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    let prefix = match gateway {
        Some(gw) if !gw.is_unspecified() => subnet_prefix(gw),
        _ => return any,
    };

    candidates
        .into_iter()
        .find(|addr| match addr {
            IpAddr::V4(v4) => subnet_prefix(*v4) == prefix,
            IpAddr::V6(_) => false,
        })
        .unwrap_or(any)
}

fn subnet_prefix(addr: Ipv4Addr) -> [u8; 3] {
    let [a, b, c, _] = addr.octets();
    [a, b, c]
}

/// First non-zero default gateway known to the host
#[cfg(target_os = "linux")]
pub fn default_gateway() -> Option<Ipv4Addr> {
    match std::fs::read_to_string("/proc/net/route") {
        Ok(table) => parse_proc_net_route(&table),
        Err(e) => {
            tracing::debug!("Cannot read /proc/net/route: {}", e);
            None
        }
    }
}

/// First non-zero default gateway known to the host
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub fn default_gateway() -> Option<Ipv4Addr> {
    use std::process::Command;

    Command::new("netstat")
        .args(["-nr", "-f", "inet"])
        .output()
        .ok()
        .and_then(|output| parse_netstat(&String::from_utf8_lossy(&output.stdout)))
}

/// First non-zero default gateway known to the host
#[cfg(target_os = "windows")]
pub fn default_gateway() -> Option<Ipv4Addr> {
    use std::process::Command;

    Command::new("route")
        .args(["print", "-4"])
        .output()
        .ok()
        .and_then(|output| parse_route_print(&String::from_utf8_lossy(&output.stdout)))
}

/// First non-zero default gateway known to the host
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "windows"
)))]
pub fn default_gateway() -> Option<Ipv4Addr> {
    None
}

/// Default route from the Linux kernel routing table.
///
/// Destination `00000000` marks the default route; the gateway column is
/// hex in host (little-endian) byte order.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_net_route(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(parts[2], 16).ok()?;
        let gateway = Ipv4Addr::from(raw.to_le_bytes());
        (!gateway.is_unspecified()).then_some(gateway)
    })
}

#[cfg_attr(
    not(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")),
    allow(dead_code)
)]
fn parse_netstat(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .filter(|line| line.starts_with("default"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|gw| gw.parse::<Ipv4Addr>().ok())
        .find(|gw| !gw.is_unspecified())
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_route_print(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3 && parts[0] == "0.0.0.0" && parts[1] == "0.0.0.0" {
            parts[2].parse::<Ipv4Addr>().ok().filter(|gw| !gw.is_unspecified())
        } else {
            None
        }
    })
}
