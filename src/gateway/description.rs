//! UPnP device description parsing
//!
//! The root device's type tells the IGD version; the WAN connection services
//! usually sit two levels down in embedded devices. A description may list
//! several connection services, so the one a variant drives is looked up by
//! exact service type rather than taken in document order.

use super::types::{GatewayError, IgdVariant, field};
use xmltree::{Element, XMLNode};

/// A service entry from a device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    /// `serviceType` URN
    pub service_type: String,
    /// `controlURL`, relative to the description's host or absolute
    pub control_url: String,
}

/// The parts of a root device description PortUP uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    /// Root device `deviceType` URN
    pub device_type: String,
    /// Services of the root device and all embedded devices, in document order
    pub services: Vec<ServiceDescription>,
}

impl DeviceDescription {
    /// Parse a root device description document
    pub fn parse(xml: &str) -> Result<Self, GatewayError> {
        let root = Element::parse(xml.as_bytes())
            .map_err(|e| GatewayError::Description(format!("invalid XML: {}", e)))?;
        let device = root
            .get_child("device")
            .ok_or_else(|| GatewayError::Description("no root device".to_string()))?;

        let mut services = Vec::new();
        collect_services(device, &mut services);

        Ok(Self {
            device_type: field(device, "deviceType"),
            services,
        })
    }

    /// The service `variant` drives, if this device offers it
    pub fn service_for(&self, variant: IgdVariant) -> Option<&ServiceDescription> {
        if self.device_type != variant.device_urn() {
            return None;
        }
        self.services
            .iter()
            .find(|service| service.service_type == variant.service_urn())
    }

    /// Service types found, for diagnostics
    pub fn service_types(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.service_type.as_str()).collect()
    }
}

fn collect_services(device: &Element, out: &mut Vec<ServiceDescription>) {
    if let Some(list) = device.get_child("serviceList") {
        for service in child_elements(list, "service") {
            let service_type = field(service, "serviceType");
            let control_url = field(service, "controlURL");
            if !service_type.is_empty() && !control_url.is_empty() {
                out.push(ServiceDescription {
                    service_type,
                    control_url,
                });
            }
        }
    }

    if let Some(list) = device.get_child("deviceList") {
        for embedded in child_elements(list, "device") {
            collect_services(embedded, out);
        }
    }
}

fn child_elements<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    parent.children.iter().filter_map(move |node| match node {
        XMLNode::Element(element) if element.name == name => Some(element),
        _ => None,
    })
}
