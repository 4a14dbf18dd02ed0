// src/nat/soap.rs
//! SOAP-over-HTTP control of the WANIPConnection:1 service
//!
//! Three actions are supported: `GetExternalIPAddress`, `AddPortMapping` and
//! `DeletePortMapping`. [`SoapClient::call`] reports failures as typed errors,
//! [`SoapClient::invoke`] folds every failure into an empty [`SoapResponse`].

use std::fmt;
use std::net::IpAddr;

use xmltree::{Element, XMLNode};

use crate::nat::description::WAN_IP_CONNECTION;
use crate::nat::error::UpnpError;

const ENVELOPE_HEAD: &str = "<?xml version=\"1.0\"?>\
    <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
    s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
    <s:Body>";
const ENVELOPE_TAIL: &str = "</s:Body></s:Envelope>";

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Wire representation used in `NewProtocol`
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol {:?}, expected TCP or UDP", other)),
        }
    }
}

/// Arguments of an `AddPortMapping` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMappingRequest {
    pub external_port: u16,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub internal_client: IpAddr,
    pub description: String,
    /// Seconds; 0 means the mapping never expires
    pub lease_duration: u32,
}

impl PortMappingRequest {
    /// Same-port, permanent mapping to `internal_client`
    pub fn new(port: u16, protocol: Protocol, internal_client: IpAddr, description: &str) -> Self {
        Self {
            external_port: port,
            internal_port: port,
            protocol,
            internal_client,
            description: description.to_string(),
            lease_duration: 0,
        }
    }
}

/// A WANIPConnection:1 action with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WanIpAction {
    GetExternalIpAddress,
    AddPortMapping(PortMappingRequest),
    DeletePortMapping { external_port: u16, protocol: Protocol },
}

impl WanIpAction {
    /// Action name as used in the SOAPACTION header
    pub fn name(&self) -> &'static str {
        match self {
            WanIpAction::GetExternalIpAddress => "GetExternalIPAddress",
            WanIpAction::AddPortMapping(_) => "AddPortMapping",
            WanIpAction::DeletePortMapping { .. } => "DeletePortMapping",
        }
    }

    /// `SOAPACTION` header value, quotes included
    pub fn soap_action(&self) -> String {
        format!("\"{}#{}\"", WAN_IP_CONNECTION, self.name())
    }

    /// The action element placed inside `<s:Body>`
    pub fn fragment(&self) -> String {
        let args = match self {
            WanIpAction::GetExternalIpAddress => String::new(),
            WanIpAction::AddPortMapping(req) => format!(
                "<NewRemoteHost></NewRemoteHost>\
                 <NewExternalPort>{}</NewExternalPort>\
                 <NewProtocol>{}</NewProtocol>\
                 <NewInternalPort>{}</NewInternalPort>\
                 <NewInternalClient>{}</NewInternalClient>\
                 <NewEnabled>1</NewEnabled>\
                 <NewPortMappingDescription>{}</NewPortMappingDescription>\
                 <NewLeaseDuration>{}</NewLeaseDuration>",
                req.external_port,
                req.protocol,
                req.internal_port,
                req.internal_client,
                escape_xml(&req.description),
                req.lease_duration
            ),
            WanIpAction::DeletePortMapping { external_port, protocol } => format!(
                "<NewRemoteHost></NewRemoteHost>\
                 <NewExternalPort>{}</NewExternalPort>\
                 <NewProtocol>{}</NewProtocol>",
                external_port, protocol
            ),
        };

        format!(
            "<u:{name} xmlns:u=\"{ns}\">{args}</u:{name}>",
            name = self.name(),
            ns = WAN_IP_CONNECTION,
            args = args
        )
    }

    /// Complete SOAP 1.1 request body
    pub fn envelope(&self) -> String {
        format!("{}{}{}", ENVELOPE_HEAD, self.fragment(), ENVELOPE_TAIL)
    }
}

/// Parsed SOAP response; empty when the call failed for any reason
#[derive(Debug, Clone, Default)]
pub struct SoapResponse {
    root: Option<Element>,
}

impl SoapResponse {
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&Element> {
        self.root.as_ref()
    }

    /// Trimmed text of the first element named `name`, at any depth
    pub fn text(&self, name: &str) -> Option<String> {
        let element = find_descendant(self.root.as_ref()?, name)?;
        let text = element.get_text()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl From<Element> for SoapResponse {
    fn from(root: Element) -> Self {
        Self { root: Some(root) }
    }
}

/// Posts SOAP actions to a control URL
#[derive(Debug, Clone)]
pub struct SoapClient {
    client: reqwest::Client,
}

impl SoapClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send `action` and parse the reply, failing on transport, HTTP, fault
    /// and XML errors
    pub async fn call(&self, control_url: &str, action: &WanIpAction) -> Result<Element, UpnpError> {
        tracing::debug!("SOAP {} -> {}", action.name(), control_url);

        let response = self
            .client
            .post(control_url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPACTION", action.soap_action())
            .body(action.envelope())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Some(fault) = parse_fault(&body) {
                return Err(fault);
            }
            return Err(UpnpError::HttpStatus {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(Element::parse(body.as_bytes())?)
    }

    /// Send `action`; any failure yields an empty response
    pub async fn invoke(&self, control_url: &str, action: &WanIpAction) -> SoapResponse {
        match self.call(control_url, action).await {
            Ok(root) => root.into(),
            Err(e) => {
                match e.error_code() {
                    Some(code) if code.is_recoverable() => {
                        tracing::warn!("UPnP {} failed: {} ({}, may succeed on retry)", action.name(), e, code)
                    }
                    Some(code) => tracing::warn!("UPnP {} failed: {} ({})", action.name(), e, code),
                    None => tracing::warn!("UPnP {} failed: {}", action.name(), e),
                }
                SoapResponse::empty()
            }
        }
    }
}

/// Decode a UPnP fault body into [`UpnpError::SoapFault`]
pub fn parse_fault(body: &str) -> Option<UpnpError> {
    let root = Element::parse(body.as_bytes()).ok()?;
    let fault = find_descendant(&root, "Fault")?;
    let upnp_error = find_descendant(fault, "UPnPError")?;

    let code = upnp_error
        .get_child("errorCode")
        .and_then(|c| c.get_text())
        .and_then(|c| c.trim().parse::<u16>().ok())?;

    let description = upnp_error
        .get_child("errorDescription")
        .and_then(|d| d.get_text())
        .map(|d| d.trim().to_string())
        .unwrap_or_else(|| "Unknown error".to_string());

    Some(UpnpError::SoapFault { code, description })
}

fn find_descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    if element.name == name {
        return Some(element);
    }
    element.children.iter().find_map(|child| match child {
        XMLNode::Element(e) => find_descendant(e, name),
        _ => None,
    })
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
