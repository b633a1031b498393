//! Common types for the gateway module

use crate::mapping::Protocol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use xmltree::Element;

/// IGD service variants PortUP can drive, in descending preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IgdVariant {
    /// IGDv2 device exposing WANIPConnection:2
    WanIpConnection2,
    /// IGDv2 device exposing WANIPConnection:1
    WanIpConnection1,
    /// IGDv1 device exposing WANIPConnection:1
    LegacyWanIpConnection1,
}

impl IgdVariant {
    /// Discovery order: newest first, most compatible last
    pub const PREFERENCE: [IgdVariant; 3] = [
        IgdVariant::WanIpConnection2,
        IgdVariant::WanIpConnection1,
        IgdVariant::LegacyWanIpConnection1,
    ];

    /// Device type URN the variant requires
    pub fn device_urn(&self) -> &'static str {
        match self {
            IgdVariant::WanIpConnection2 | IgdVariant::WanIpConnection1 => {
                "urn:schemas-upnp-org:device:InternetGatewayDevice:2"
            }
            IgdVariant::LegacyWanIpConnection1 => "urn:schemas-upnp-org:device:InternetGatewayDevice:1",
        }
    }

    /// Service type URN the variant drives
    pub fn service_urn(&self) -> &'static str {
        match self {
            IgdVariant::WanIpConnection2 => "urn:schemas-upnp-org:service:WANIPConnection:2",
            IgdVariant::WanIpConnection1 | IgdVariant::LegacyWanIpConnection1 => {
                "urn:schemas-upnp-org:service:WANIPConnection:1"
            }
        }
    }

    /// Resolve a `(device, service)` URN pair back to a variant
    pub fn from_urns(device: &str, service: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|variant| variant.device_urn() == device && variant.service_urn() == service)
    }
}

impl fmt::Display for IgdVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgdVariant::WanIpConnection2 => f.write_str("IGDv2, WANIPConnection2"),
            IgdVariant::WanIpConnection1 => f.write_str("IGDv2, WANIPConnection1"),
            IgdVariant::LegacyWanIpConnection1 => f.write_str("IGDv1"),
        }
    }
}

/// One entry from the gateway's port mapping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMappingEntry {
    /// Remote host filter, empty for any
    pub remote_host: String,
    /// External port
    pub external_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Internal port
    pub internal_port: u16,
    /// Internal client address
    pub internal_client: String,
    /// Whether the mapping is active
    pub enabled: bool,
    /// Human readable description
    pub description: String,
    /// Remaining lease in seconds, 0 for permanent
    pub lease_duration: u32,
}

impl TryFrom<&Element> for PortMappingEntry {
    type Error = String;

    /// Read a `GetGenericPortMappingEntryResponse` element
    fn try_from(response: &Element) -> Result<Self, Self::Error> {
        let port = |name: &str| {
            let text = field(response, name);
            text.parse::<u16>()
                .map_err(|_| format!("invalid {} '{}'", name, text))
        };
        let protocol = field(response, "NewProtocol")
            .parse::<Protocol>()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            remote_host: field(response, "NewRemoteHost"),
            external_port: port("NewExternalPort")?,
            protocol,
            internal_port: port("NewInternalPort")?,
            internal_client: field(response, "NewInternalClient"),
            enabled: matches!(field(response, "NewEnabled").as_str(), "1" | "true"),
            description: field(response, "NewPortMappingDescription"),
            lease_duration: field(response, "NewLeaseDuration").parse().unwrap_or(0),
        })
    }
}

/// Trimmed text of a child element, empty when absent
pub(crate) fn field(element: &Element, name: &str) -> String {
    element
        .get_child(name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

/// Arguments of an AddPortMapping call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPortMapping {
    /// External port
    pub external_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Internal client address and port
    pub internal: SocketAddr,
    /// Description stored on the gateway
    pub description: String,
    /// Lease in seconds, 0 for permanent
    pub lease_duration: u32,
}

/// Errors from gateway discovery and control calls
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No variant found a device
    #[error("No UPnP gateway found. Please make sure UPnP is enabled on your router.")]
    NoGatewayFound,

    /// The facade was built for a service type it cannot drive
    #[error("Unsupported client type: {0}")]
    UnsupportedClientType(String),

    /// SSDP search failed
    #[error("Gateway search failed: {0}")]
    Search(String),

    /// Device description could not be fetched or parsed
    #[error("Device description: {0}")]
    Description(String),

    /// The gateway does not offer the service a variant drives
    #[error("{variant} not offered: {message}")]
    ServiceUnavailable {
        /// Variant being probed
        variant: IgdVariant,
        /// What the gateway offers instead
        message: String,
    },

    /// GetExternalIPAddress failed
    #[error("GetExternalIPAddress failed: {0}")]
    ExternalIp(String),

    /// GetGenericPortMappingEntry failed (often: no entry at this index)
    #[error("GetGenericPortMappingEntry({index}) failed: {message}")]
    MappingEntry {
        /// Slot index
        index: u16,
        /// Underlying error text
        message: String,
    },

    /// AddPortMapping failed
    #[error("AddPortMapping failed: {0}")]
    AddMapping(String),

    /// DeletePortMapping failed
    #[error("DeletePortMapping failed: {0}")]
    DeleteMapping(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
