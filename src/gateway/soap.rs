//! SOAP control requests
//!
//! Every action is sent with the SOAPAction header and body namespace of
//! the service the client was bound to, so an IGDv2 gateway is driven
//! through WANIPConnection:2 and not the :1 action set.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;
use xmltree::{Element, XMLNode};

/// Timeout for a single control request
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// A gateway service's control endpoint
#[derive(Debug, Clone)]
pub struct ControlPoint {
    location: SocketAddr,
    control_url: String,
    http: reqwest::Client,
}

impl ControlPoint {
    /// Control endpoint at `control_url` on the device reachable at `location`
    pub fn new(location: SocketAddr, control_url: &str) -> Result<Self, String> {
        // Gateways are on the local link; never route control traffic via a proxy
        let http = reqwest::Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            location,
            control_url: control_url.to_string(),
            http,
        })
    }

    /// Address of the device that served the description
    pub fn location(&self) -> SocketAddr {
        self.location
    }

    /// `controlURL` as it appeared in the description
    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Absolute URL requests are posted to
    pub fn endpoint(&self) -> String {
        if self.control_url.starts_with("http://") || self.control_url.starts_with("https://") {
            self.control_url.clone()
        } else if self.control_url.starts_with('/') {
            format!("http://{}{}", self.location, self.control_url)
        } else {
            format!("http://{}/{}", self.location, self.control_url)
        }
    }

    /// Invoke `action` on `service_urn` and return its response element
    pub async fn invoke(
        &self,
        service_urn: &str,
        action: &str,
        args: &[(&str, String)],
    ) -> Result<Element, String> {
        let url = self.endpoint();
        debug!("SOAP {}#{} -> {}", service_urn, action, url);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPAction", soap_action(service_urn, action))
            .body(envelope(service_urn, action, args))
            .send()
            .await
            .map_err(|e| format!("SOAP request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read SOAP response: {}", e))?;

        if !status.is_success() {
            return Err(parse_fault(&body).unwrap_or_else(|| format!("HTTP status {}", status)));
        }

        parse_response(&body, action)
    }
}

/// SOAPAction header value
pub fn soap_action(service_urn: &str, action: &str) -> String {
    format!("\"{}#{}\"", service_urn, action)
}

/// Request envelope for `action` with `args` in order
pub fn envelope(service_urn: &str, action: &str, args: &[(&str, String)]) -> String {
    let mut arguments = String::new();
    for (name, value) in args {
        let _ = write!(arguments, "<{name}>{}</{name}>", escape(value));
    }

    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body><u:{action} xmlns:u="{service_urn}">{arguments}</u:{action}></s:Body>
</s:Envelope>"#
    )
}

/// The `<action>Response` element of a successful reply
pub fn parse_response(body: &str, action: &str) -> Result<Element, String> {
    let root = Element::parse(body.as_bytes())
        .map_err(|e| format!("Failed to parse SOAP response: {}", e))?;
    let expected = format!("{}Response", action);

    root.get_child("Body")
        .and_then(|body| {
            body.children.iter().find_map(|node| match node {
                XMLNode::Element(element) if element.name == expected => Some(element.clone()),
                _ => None,
            })
        })
        .ok_or_else(|| format!("No {} in SOAP response", expected))
}

/// `UPnP error <code>: <description>` from a SOAP fault, if the body is one
pub fn parse_fault(body: &str) -> Option<String> {
    let root = Element::parse(body.as_bytes()).ok()?;
    let fault = root.get_child("Body")?.get_child("Fault")?;

    let error = fault
        .get_child("detail")
        .and_then(|detail| detail.get_child("UPnPError"));
    let text = |name: &str| {
        error
            .and_then(|e| e.get_child(name))
            .and_then(|c| c.get_text())
            .map(|t| t.trim().to_string())
    };

    match (text("errorCode"), text("errorDescription")) {
        (Some(code), Some(description)) => Some(format!("UPnP error {}: {}", code, description)),
        (Some(code), None) => Some(format!("UPnP error {}", code)),
        _ => fault
            .get_child("faultstring")
            .and_then(|s| s.get_text())
            .map(|s| s.trim().to_string()),
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
