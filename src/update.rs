//! Release feed version check
//!
//! Purely informational: any failure, including a timeout, is reported as a
//! warning and treated as "no update available".

use crate::{Error, Result};
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{info, warn};

/// Latest-release endpoint of the project's release feed
pub const RELEASE_FEED_URL: &str = "https://api.github.com/repos/IIpho3nix/PortUP/releases/latest";

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// Result of a version check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Running the newest release, or the feed could not be read
    UpToDate,
    /// A newer release exists
    Available(String),
}

/// Fetch the latest release tag
pub async fn fetch_latest_version(timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let response = client
        .get(RELEASE_FEED_URL)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", concat!("portup/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::Update(format!(
            "release feed returned status code {}",
            response.status()
        )));
    }

    let release: Release = response.json().await?;
    Ok(release.tag_name)
}

/// Check whether a newer release than `current` exists
pub async fn check_latest(current: &str, timeout: Duration) -> UpdateStatus {
    let latest = match fetch_latest_version(timeout).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!("Failed to fetch latest version: {}", e);
            return UpdateStatus::UpToDate;
        }
    };

    match compare_versions(&latest, current) {
        Some(Ordering::Greater) => {
            info!(
                "A new version ({}) is available. it is recommended to update to the latest version.",
                latest
            );
            UpdateStatus::Available(latest)
        }
        Some(_) => UpdateStatus::UpToDate,
        None => {
            warn!("Failed to check for updates: cannot compare {} with {}", latest, current);
            UpdateStatus::UpToDate
        }
    }
}

/// Compare dotted numeric versions such as `v1.5.1` and `1.6`
///
/// Missing components count as zero and a pre-release or build suffix is
/// ignored. Returns `None` if either side is not a version.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let a = parse_version(a)?;
    let b = parse_version(b)?;

    let len = a.len().max(b.len());
    let component = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
    Some(
        (0..len)
            .map(|i| component(&a, i).cmp(&component(&b, i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal),
    )
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
    let core = version.split(['-', '+']).next()?;
    if core.is_empty() {
        return None;
    }
    core.split('.').map(|part| part.parse().ok()).collect()
}
