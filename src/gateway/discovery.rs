//! IGD gateway discovery with variant fallback
//!
//! Vendors implement the IGD service versions inconsistently, so discovery
//! tries each variant in [`IgdVariant::PREFERENCE`] order and keeps the first
//! device found. Errors from individual variants are informational; only
//! finding nothing across all of them is fatal.
//!
//! The network is searched once. Each variant is then matched against the
//! services listed in that gateway's description.

use super::client::{GatewayClient, IgdClient};
use super::description::DeviceDescription;
use super::soap::ControlPoint;
use super::types::{GatewayError, IgdVariant};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Default SSDP search timeout
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

/// What one variant's discovery attempt produced
#[derive(Debug)]
pub struct ProbeOutcome<C> {
    /// Devices found, in discovery order
    pub devices: Vec<C>,
    /// Errors encountered while probing
    pub errors: Vec<GatewayError>,
}

impl<C> Default for ProbeOutcome<C> {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Discovery for one IGD variant
#[allow(async_fn_in_trait)]
pub trait Probe {
    /// Client type produced on success
    type Client;

    /// Variant this probe looks for
    fn variant(&self) -> IgdVariant;

    /// Search the network for devices of this variant
    async fn probe(&self) -> ProbeOutcome<Self::Client>;
}

/// A selected gateway plus the errors seen before it was found
#[derive(Debug)]
pub struct Discovered<C> {
    /// Variant that produced the device
    pub variant: IgdVariant,
    /// First device reported by that variant
    pub client: C,
    /// Errors from variants tried earlier, and from this one
    pub errors: Vec<GatewayError>,
}

/// Try the probes in order; the first non-empty result wins
///
/// Each probe's errors are logged at info level and carried along; they do
/// not stop the search.
///
/// # Arguments
/// * `probes` - One probe per variant, most preferred first
///
/// # Returns
/// The first device of the first probe that found any, together with every
/// error seen up to that point, or `GatewayError::NoGatewayFound` when all
/// probes came back empty.
///
/// # Example
/// ```rust,no_run
/// use portup::gateway::{DeviceDescription, IgdVariant, ServiceProbe, discover_with};
///
/// # async fn example(description: DeviceDescription) -> Result<(), portup::GatewayError> {
/// let location = "192.168.1.1:5000".parse().unwrap();
/// let probes = IgdVariant::PREFERENCE.map(|v| ServiceProbe::new(v, location, &description));
/// let found = discover_with(&probes).await?;
/// println!("Using {}", found.variant);
/// # Ok(())
/// # }
/// ```
pub async fn discover_with<P: Probe>(probes: &[P]) -> Result<Discovered<P::Client>, GatewayError> {
    let mut errors = Vec::new();

    for probe in probes {
        let variant = probe.variant();
        debug!("Probing for {} gateway", variant);

        let outcome = probe.probe().await;
        for err in &outcome.errors {
            info!("Discovery error: {}", err);
        }
        errors.extend(outcome.errors);

        if let Some(client) = outcome.devices.into_iter().next() {
            info!("UPnP gateway found. {}", variant);
            return Ok(Discovered {
                variant,
                client,
                errors,
            });
        }
    }

    Err(GatewayError::NoGatewayFound)
}

/// Search the network for an IGD
///
/// `igd-next` only accepts a gateway whose description lists a WAN
/// connection service, but which one it binds to is not used here.
pub async fn search(timeout: Duration) -> Result<igd_next::Gateway, GatewayError> {
    tokio::task::spawn_blocking(move || {
        igd_next::search_gateway(igd_next::SearchOptions {
            timeout: Some(timeout),
            ..Default::default()
        })
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("Task join error: {}", e)))?
    .map_err(|e| GatewayError::Search(e.to_string()))
}

/// Fetch and parse the root description of a found gateway
pub async fn fetch_description(
    gateway: &igd_next::Gateway,
    timeout: Duration,
) -> Result<DeviceDescription, GatewayError> {
    let url = format!("http://{}{}", gateway.addr, gateway.root_url);
    debug!("Fetching device description from {}", url);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| GatewayError::Description(e.to_string()))?;

    let xml = client
        .get(&url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| GatewayError::Description(e.to_string()))?
        .text()
        .await
        .map_err(|e| GatewayError::Description(e.to_string()))?;

    DeviceDescription::parse(&xml)
}

/// Matches one variant against a gateway's description
#[derive(Debug, Clone)]
pub struct ServiceProbe<'a> {
    variant: IgdVariant,
    location: SocketAddr,
    description: &'a DeviceDescription,
}

impl<'a> ServiceProbe<'a> {
    /// Probe for `variant` on the device at `location`
    pub fn new(variant: IgdVariant, location: SocketAddr, description: &'a DeviceDescription) -> Self {
        Self {
            variant,
            location,
            description,
        }
    }
}

impl Probe for ServiceProbe<'_> {
    type Client = IgdClient;

    fn variant(&self) -> IgdVariant {
        self.variant
    }

    async fn probe(&self) -> ProbeOutcome<IgdClient> {
        let mut outcome = ProbeOutcome::default();

        let Some(service) = self.description.service_for(self.variant) else {
            outcome.errors.push(GatewayError::ServiceUnavailable {
                variant: self.variant,
                message: format!(
                    "gateway at {} is {} with services {:?}",
                    self.location,
                    self.description.device_type,
                    self.description.service_types()
                ),
            });
            return outcome;
        };

        let control = match ControlPoint::new(self.location, &service.control_url) {
            Ok(control) => control,
            Err(message) => {
                outcome.errors.push(GatewayError::Internal(message));
                return outcome;
            }
        };

        match IgdClient::new(&self.description.device_type, &service.service_type, control) {
            Ok(client) => outcome.devices.push(client),
            Err(e) => outcome.errors.push(e),
        }
        outcome
    }
}

/// Source of gateway handles, used for initial discovery and rediscovery
#[allow(async_fn_in_trait)]
pub trait Discoverer {
    /// Client type produced
    type Client: GatewayClient;

    /// Find a gateway or fail with `NoGatewayFound`
    async fn discover(&self) -> Result<Self::Client, GatewayError>;
}

/// Discovers real gateways on the local network
#[derive(Debug, Clone)]
pub struct UpnpDiscoverer {
    timeout: Duration,
}

impl UpnpDiscoverer {
    /// Create a discoverer with the given search timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for UpnpDiscoverer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_TIMEOUT)
    }
}

impl Discoverer for UpnpDiscoverer {
    type Client = IgdClient;

    async fn discover(&self) -> Result<IgdClient, GatewayError> {
        info!("Discovering UPnP gateway...");

        let found = search(self.timeout).await;
        let description = match found {
            Ok(gateway) => fetch_description(&gateway, self.timeout)
                .await
                .map(|description| (gateway.addr, description)),
            Err(e) => Err(e),
        };
        let (location, description) = match description {
            Ok(found) => found,
            Err(e) => {
                info!("Discovery error: {}", e);
                return Err(GatewayError::NoGatewayFound);
            }
        };

        let probes = IgdVariant::PREFERENCE.map(|variant| ServiceProbe::new(variant, location, &description));
        let discovered = discover_with(&probes).await?;
        debug!("Gateway control endpoint at {}", discovered.client.control().endpoint());
        Ok(discovered.client)
    }
}
