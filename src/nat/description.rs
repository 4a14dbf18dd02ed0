// src/nat/description.rs
//! UPnP device description resolution
//!
//! Fetches the description document advertised in an SSDP `LOCATION` header,
//! checks that it describes an Internet Gateway Device and extracts the
//! WANIPConnection:1 control and event URLs.

use xmltree::{Element, XMLNode};

use crate::nat::error::UpnpError;

/// UPnP device description namespace
pub const DEVICE_NAMESPACE: &str = "urn:schemas-upnp-org:device-1-0";

/// The only service this crate controls
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

/// Validated SOAP endpoint of a gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Device description document URL
    pub description_url: String,

    /// Absolute SOAP control URL of WANIPConnection:1
    pub control_url: String,

    /// Absolute GENA event subscription URL of WANIPConnection:1
    pub event_url: String,
}

/// Fetches and validates device descriptions
#[derive(Debug, Clone)]
pub struct DescriptionResolver {
    client: reqwest::Client,
}

impl DescriptionResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch the description at `location` and extract the gateway endpoint
    pub async fn resolve(&self, location: &str) -> Result<GatewayEndpoint, UpnpError> {
        tracing::debug!("Fetching device description from {}", location);

        let xml = self
            .client
            .get(location)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_description(location, &xml)
    }
}

/// Parse a device description fetched from `location`
pub fn parse_description(location: &str, xml: &str) -> Result<GatewayEndpoint, UpnpError> {
    let root = Element::parse(xml.as_bytes())?;

    if let Some(ns) = root.namespace.as_deref() {
        if ns != DEVICE_NAMESPACE {
            tracing::debug!("Unexpected description namespace {} at {}", ns, location);
        }
    }

    let device = root
        .get_child("device")
        .ok_or_else(|| UpnpError::MalformedResponse("no <device> element".to_string()))?;

    let device_type = child_text(device, "deviceType")
        .ok_or_else(|| UpnpError::MalformedResponse("no <deviceType> element".to_string()))?;

    if !device_type.contains("InternetGatewayDevice") {
        return Err(UpnpError::InvalidGateway { device_type });
    }

    let service = find_service(device, WAN_IP_CONNECTION)
        .ok_or_else(|| UpnpError::MissingService(WAN_IP_CONNECTION.to_string()))?;

    let control = child_text(service, "controlURL")
        .ok_or_else(|| UpnpError::MissingService(format!("{} controlURL", WAN_IP_CONNECTION)))?;
    let event = child_text(service, "eventSubURL")
        .ok_or_else(|| UpnpError::MissingService(format!("{} eventSubURL", WAN_IP_CONNECTION)))?;

    Ok(GatewayEndpoint {
        description_url: location.to_string(),
        control_url: combine_urls(location, &control)?,
        event_url: combine_urls(location, &event)?,
    })
}

/// Walk the device tree (services first, then embedded devices) looking for
/// a service of the given type
fn find_service<'a>(device: &'a Element, service_type: &str) -> Option<&'a Element> {
    if let Some(service_list) = device.get_child("serviceList") {
        for service in child_elements(service_list, "service") {
            if child_text(service, "serviceType").as_deref() == Some(service_type) {
                return Some(service);
            }
        }
    }

    let device_list = device.get_child("deviceList")?;
    child_elements(device_list, "device").find_map(|embedded| find_service(embedded, service_type))
}

fn child_elements<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    parent.children.iter().filter_map(move |child| match child {
        XMLNode::Element(e) if e.name == name => Some(e),
        _ => None,
    })
}

fn child_text(parent: &Element, name: &str) -> Option<String> {
    let text = parent.get_child(name)?.get_text()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Resolve `path` against the authority (`scheme://host[:port]`) of `base`.
///
/// Everything after the authority of `base` is replaced by `path`.
pub fn combine_urls(base: &str, path: &str) -> Result<String, UpnpError> {
    if is_absolute_http(path) {
        return Ok(path.to_string());
    }

    let scheme_end = base
        .find("://")
        .ok_or_else(|| UpnpError::InvalidUrl(base.to_string()))?;
    let authority_end = base[scheme_end + 3..]
        .find('/')
        .map(|i| scheme_end + 3 + i)
        .unwrap_or(base.len());

    let authority = &base[..authority_end];
    if path.starts_with('/') {
        Ok(format!("{}{}", authority, path))
    } else {
        Ok(format!("{}/{}", authority, path))
    }
}

fn is_absolute_http(url: &str) -> bool {
    url.split_once("://").map_or(false, |(scheme, _)| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    })
}
