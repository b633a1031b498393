//! HTTP-based public IP detection
//!
//! Used to compare the address the internet sees against the address the
//! gateway reports. A mismatch usually means a second NAT sits upstream of
//! the gateway, and forwarding on it will not be reachable from outside.

use super::types::GatewayError;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public IP detection services, tried in order
const IP_DETECTION_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
    "https://checkip.amazonaws.com",
];

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Detect the public IP address using HTTP services
///
/// Returns the first address any service reports.
pub async fn detect_public_ip() -> Result<IpAddr, GatewayError> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

    for service_url in IP_DETECTION_SERVICES {
        debug!("Trying IP detection service: {}", service_url);

        match client.get(*service_url).send().await {
            Ok(response) => match response.text().await {
                Ok(text) => match parse_ip_response(&text) {
                    Some(ip) => {
                        info!("Public IP detected via HTTP: {} (from {})", ip, service_url);
                        return Ok(ip);
                    }
                    None => debug!("Invalid IP response from {}: {}", service_url, text.trim()),
                },
                Err(e) => debug!("Failed to read response from {}: {}", service_url, e),
            },
            Err(e) => debug!("Failed to query {}: {}", service_url, e),
        }
    }

    warn!("All HTTP IP detection services failed");
    Err(GatewayError::ExternalIp(
        "all HTTP IP detection services failed".to_string(),
    ))
}

/// Services answer with the bare address, sometimes with a trailing newline
pub fn parse_ip_response(body: &str) -> Option<IpAddr> {
    body.trim().parse().ok()
}
