//! Local network inspection
//!
//! Determines the machine's outbound-routable address and classifies
//! addresses into the private ranges PortUP accepts as forwarding targets.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, warn};

/// Address used only to let the OS pick an outbound route. No packet is sent.
const ROUTING_PROBE_ADDRESS: &str = "8.8.8.8:80";

/// CGNAT (RFC 6598) IP range: 100.64.0.0/10
const CGNAT_RANGE_START: u32 = 0x6440_0000; // 100.64.0.0
const CGNAT_RANGE_END: u32 = 0x647F_FFFF; // 100.127.255.255

/// Address ranges used for validation and same-network checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRange {
    /// 10.0.0.0/8
    Private10,
    /// 172.16.0.0/12
    Private172,
    /// 192.168.0.0/16
    Private192,
    /// 127.0.0.0/8
    Loopback,
}

impl AddressRange {
    /// Classify an address, or `None` if it is in none of the known ranges
    pub fn of(ip: IpAddr) -> Option<Self> {
        let ipv4 = as_ipv4(ip)?;
        match ipv4.octets() {
            [10, ..] => Some(Self::Private10),
            [172, second, ..] if (16..=31).contains(&second) => Some(Self::Private172),
            [192, 168, ..] => Some(Self::Private192),
            [127, ..] => Some(Self::Loopback),
            _ => None,
        }
    }

    /// CIDR notation of the range
    pub fn cidr(&self) -> &'static str {
        match self {
            Self::Private10 => "10.0.0.0/8",
            Self::Private172 => "172.16.0.0/12",
            Self::Private192 => "192.168.0.0/16",
            Self::Loopback => "127.0.0.0/8",
        }
    }

    /// Whether forwarding to this range is accepted
    pub fn is_private(&self) -> bool {
        !matches!(self, Self::Loopback)
    }
}

/// IPv4-mapped IPv6 addresses are treated as their IPv4 form
fn as_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(ipv4) => Some(ipv4),
        IpAddr::V6(ipv6) => ipv6.to_ipv4_mapped(),
    }
}

/// Determine the local address the OS would use for outbound traffic
///
/// Returns `None` when the route cannot be determined (no network, no
/// default route). Callers treat that as "undeterminable" and let
/// validation reject the mapping instead of failing here.
pub fn detect_local_address() -> Option<IpAddr> {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(e) => {
            debug!("Failed to create routing probe socket: {}", e);
            return None;
        }
    };

    if let Err(e) = socket.connect(ROUTING_PROBE_ADDRESS) {
        debug!("No outbound route for local address detection: {}", e);
        return None;
    }

    match socket.local_addr() {
        Ok(addr) if !addr.ip().is_unspecified() => {
            let ip = addr.ip();
            match AddressRange::of(ip) {
                Some(range) => debug!("Local address {} ({})", ip, range.cidr()),
                None => debug!("Local address {} is not in a private range", ip),
            }
            Some(ip)
        }
        Ok(_) => None,
        Err(e) => {
            debug!("Failed to read local socket address: {}", e);
            None
        }
    }
}

/// True iff `ip` is in 10/8, 172.16/12 or 192.168/16
pub fn is_private_address(ip: IpAddr) -> bool {
    AddressRange::of(ip).is_some_and(|range| range.is_private())
}

/// True iff both addresses fall within the same one of 10/8, 172.16/12,
/// 192.168/16 or 127/8
pub fn same_range(a: IpAddr, b: IpAddr) -> bool {
    match (AddressRange::of(a), AddressRange::of(b)) {
        (Some(range_a), Some(range_b)) => range_a == range_b,
        _ => false,
    }
}

/// Detect if an external IP address is within CGNAT range
///
/// A gateway reporting an address in 100.64.0.0/10 sits behind carrier-grade
/// NAT, so mappings it creates will not be reachable from the internet.
pub fn detect_cgnat(external_ip: IpAddr) -> bool {
    match external_ip {
        IpAddr::V4(ipv4) => {
            let ip_u32 = u32::from(ipv4);
            let is_cgnat = (CGNAT_RANGE_START..=CGNAT_RANGE_END).contains(&ip_u32);

            if is_cgnat {
                warn!(
                    "CGNAT detected: gateway external IP {} is in range 100.64.0.0/10. \
                     Forwarded ports will likely not be reachable from the internet.",
                    ipv4
                );
            } else {
                debug!("External IP {} is not in CGNAT range", ipv4);
            }

            is_cgnat
        }
        IpAddr::V6(_) => false,
    }
}
