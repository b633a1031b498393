//! UPnP Internet Gateway Device access
//!
//! - `discovery` finds a gateway, trying IGD service variants newest first
//! - `description` reads which services the gateway offers
//! - `client` hides which variant was found behind one control surface
//! - `soap` sends control actions in the bound service's namespace
//! - `http_ip` looks up the public address for the double-NAT check

pub mod client;
pub mod description;
pub mod discovery;
pub mod http_ip;
pub mod soap;
pub mod types;

pub use client::{
    GatewayClient, IgdClient, LegacyWanIpConnection1, WanIpConnection1, WanIpConnection2,
};
pub use description::{DeviceDescription, ServiceDescription};
pub use discovery::{
    Discovered, Discoverer, Probe, ProbeOutcome, ServiceProbe, UpnpDiscoverer, discover_with,
};
pub use http_ip::detect_public_ip;
pub use soap::ControlPoint;
pub use types::{AddPortMapping, GatewayError, IgdVariant, PortMappingEntry};
