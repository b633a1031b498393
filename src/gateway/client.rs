//! Uniform control surface over the supported IGD service variants
//!
//! Every variant owns the control endpoint of the service it was bound to at
//! discovery and sends that service's own action set. The variants differ in
//! how they treat lease durations: a WANIPConnection:2 service does not
//! accept an infinite (0) lease and is given the protocol maximum instead.

use super::soap::ControlPoint;
use super::types::{AddPortMapping, GatewayError, IgdVariant, PortMappingEntry, field};
use crate::mapping::Protocol;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Longest lease a WANIPConnection:2 service accepts (one week)
pub const IGD2_MAX_LEASE_SECS: u32 = 604_800;

/// Operations PortUP needs from a gateway
///
/// Calls run to completion or to the control request timeout; none of
/// them are cancellable.
#[allow(async_fn_in_trait)]
pub trait GatewayClient {
    /// GetExternalIPAddress
    async fn external_ip(&self) -> Result<IpAddr, GatewayError>;

    /// GetGenericPortMappingEntry at `index`
    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError>;

    /// AddPortMapping for any remote host, enabled
    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError>;

    /// DeletePortMapping for any remote host
    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError>;
}

/// IGDv2 gateway driven through WANIPConnection:2
#[derive(Debug, Clone)]
pub struct WanIpConnection2 {
    control: ControlPoint,
}

/// IGDv2 gateway driven through WANIPConnection:1
#[derive(Debug, Clone)]
pub struct WanIpConnection1 {
    control: ControlPoint,
}

/// IGDv1 gateway driven through WANIPConnection:1
#[derive(Debug, Clone)]
pub struct LegacyWanIpConnection1 {
    control: ControlPoint,
}

impl WanIpConnection2 {
    const SERVICE: &'static str = "urn:schemas-upnp-org:service:WANIPConnection:2";
}

impl WanIpConnection1 {
    const SERVICE: &'static str = "urn:schemas-upnp-org:service:WANIPConnection:1";
}

impl LegacyWanIpConnection1 {
    const SERVICE: &'static str = "urn:schemas-upnp-org:service:WANIPConnection:1";
}

impl GatewayClient for WanIpConnection2 {
    async fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        get_external_ip(&self.control, Self::SERVICE).await
    }

    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError> {
        get_mapping_entry(&self.control, Self::SERVICE, index).await
    }

    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError> {
        let mut request = request.clone();
        if request.lease_duration == 0 || request.lease_duration > IGD2_MAX_LEASE_SECS {
            debug!(
                "WANIPConnection:2 does not accept lease {}s, using {}s",
                request.lease_duration, IGD2_MAX_LEASE_SECS
            );
            request.lease_duration = IGD2_MAX_LEASE_SECS;
        }
        add_port(&self.control, Self::SERVICE, &request).await
    }

    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError> {
        remove_port(&self.control, Self::SERVICE, external_port, protocol).await
    }
}

impl GatewayClient for WanIpConnection1 {
    async fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        get_external_ip(&self.control, Self::SERVICE).await
    }

    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError> {
        get_mapping_entry(&self.control, Self::SERVICE, index).await
    }

    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError> {
        add_port(&self.control, Self::SERVICE, request).await
    }

    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError> {
        remove_port(&self.control, Self::SERVICE, external_port, protocol).await
    }
}

impl GatewayClient for LegacyWanIpConnection1 {
    async fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        get_external_ip(&self.control, Self::SERVICE).await
    }

    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError> {
        get_mapping_entry(&self.control, Self::SERVICE, index).await
    }

    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError> {
        add_port(&self.control, Self::SERVICE, request).await
    }

    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError> {
        remove_port(&self.control, Self::SERVICE, external_port, protocol).await
    }
}

/// The discovered gateway, whichever variant it is
#[derive(Debug, Clone)]
pub enum IgdClient {
    /// IGDv2, WANIPConnection:2
    WanIpConnection2(WanIpConnection2),
    /// IGDv2, WANIPConnection:1
    WanIpConnection1(WanIpConnection1),
    /// IGDv1, WANIPConnection:1
    LegacyWanIpConnection1(LegacyWanIpConnection1),
}

impl IgdClient {
    /// Build the client for a device/service URN pair
    ///
    /// Fails with `UnsupportedClientType` for any pair outside the three
    /// supported variants.
    pub fn new(
        device_urn: &str,
        service_urn: &str,
        control: ControlPoint,
    ) -> Result<Self, GatewayError> {
        let variant = IgdVariant::from_urns(device_urn, service_urn).ok_or_else(|| {
            GatewayError::UnsupportedClientType(format!("{} / {}", device_urn, service_urn))
        })?;

        Ok(match variant {
            IgdVariant::WanIpConnection2 => Self::WanIpConnection2(WanIpConnection2 { control }),
            IgdVariant::WanIpConnection1 => Self::WanIpConnection1(WanIpConnection1 { control }),
            IgdVariant::LegacyWanIpConnection1 => {
                Self::LegacyWanIpConnection1(LegacyWanIpConnection1 { control })
            }
        })
    }

    /// Which variant backs this client
    pub fn variant(&self) -> IgdVariant {
        match self {
            Self::WanIpConnection2(_) => IgdVariant::WanIpConnection2,
            Self::WanIpConnection1(_) => IgdVariant::WanIpConnection1,
            Self::LegacyWanIpConnection1(_) => IgdVariant::LegacyWanIpConnection1,
        }
    }

    /// Control endpoint of the bound service
    pub fn control(&self) -> &ControlPoint {
        match self {
            Self::WanIpConnection2(c) => &c.control,
            Self::WanIpConnection1(c) => &c.control,
            Self::LegacyWanIpConnection1(c) => &c.control,
        }
    }

    /// Address of the device that was discovered
    pub fn location(&self) -> SocketAddr {
        self.control().location()
    }

    /// Service type URN every action is sent with
    pub fn service_urn(&self) -> &'static str {
        match self {
            Self::WanIpConnection2(_) => WanIpConnection2::SERVICE,
            Self::WanIpConnection1(_) => WanIpConnection1::SERVICE,
            Self::LegacyWanIpConnection1(_) => LegacyWanIpConnection1::SERVICE,
        }
    }
}

impl GatewayClient for IgdClient {
    async fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        match self {
            Self::WanIpConnection2(c) => c.external_ip().await,
            Self::WanIpConnection1(c) => c.external_ip().await,
            Self::LegacyWanIpConnection1(c) => c.external_ip().await,
        }
    }

    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError> {
        match self {
            Self::WanIpConnection2(c) => c.mapping_at(index).await,
            Self::WanIpConnection1(c) => c.mapping_at(index).await,
            Self::LegacyWanIpConnection1(c) => c.mapping_at(index).await,
        }
    }

    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError> {
        match self {
            Self::WanIpConnection2(c) => c.add_mapping(request).await,
            Self::WanIpConnection1(c) => c.add_mapping(request).await,
            Self::LegacyWanIpConnection1(c) => c.add_mapping(request).await,
        }
    }

    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError> {
        match self {
            Self::WanIpConnection2(c) => c.delete_mapping(external_port, protocol).await,
            Self::WanIpConnection1(c) => c.delete_mapping(external_port, protocol).await,
            Self::LegacyWanIpConnection1(c) => c.delete_mapping(external_port, protocol).await,
        }
    }
}

async fn get_external_ip(control: &ControlPoint, service: &str) -> Result<IpAddr, GatewayError> {
    let response = control
        .invoke(service, "GetExternalIPAddress", &[])
        .await
        .map_err(GatewayError::ExternalIp)?;

    let text = field(&response, "NewExternalIPAddress");
    text.parse()
        .map_err(|_| GatewayError::ExternalIp(format!("invalid address '{}'", text)))
}

async fn get_mapping_entry(
    control: &ControlPoint,
    service: &str,
    index: u16,
) -> Result<PortMappingEntry, GatewayError> {
    let error = |message: String| GatewayError::MappingEntry { index, message };

    let response = control
        .invoke(
            service,
            "GetGenericPortMappingEntry",
            &[("NewPortMappingIndex", index.to_string())],
        )
        .await
        .map_err(error)?;

    PortMappingEntry::try_from(&response).map_err(error)
}

async fn add_port(
    control: &ControlPoint,
    service: &str,
    request: &AddPortMapping,
) -> Result<(), GatewayError> {
    debug!(
        "AddPortMapping {} {} -> {} ({}s, \"{}\")",
        request.protocol, request.external_port, request.internal, request.lease_duration, request.description
    );
    control
        .invoke(
            service,
            "AddPortMapping",
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", request.external_port.to_string()),
                ("NewProtocol", request.protocol.to_string()),
                ("NewInternalPort", request.internal.port().to_string()),
                ("NewInternalClient", request.internal.ip().to_string()),
                ("NewEnabled", "1".to_string()),
                ("NewPortMappingDescription", request.description.clone()),
                ("NewLeaseDuration", request.lease_duration.to_string()),
            ],
        )
        .await
        .map(|_| ())
        .map_err(GatewayError::AddMapping)
}

async fn remove_port(
    control: &ControlPoint,
    service: &str,
    external_port: u16,
    protocol: Protocol,
) -> Result<(), GatewayError> {
    debug!("DeletePortMapping {} {}", protocol, external_port);
    control
        .invoke(
            service,
            "DeletePortMapping",
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", external_port.to_string()),
                ("NewProtocol", protocol.to_string()),
            ],
        )
        .await
        .map(|_| ())
        .map_err(GatewayError::DeleteMapping)
}
