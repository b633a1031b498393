//! Mapping lifecycle management
//!
//! The manager owns the gateway handle and the sequence of mappings it has
//! applied. Forwarding runs
//! `Idle → Discovering → Validating → Applying → Forwarding → Cleaning → Done`;
//! a cleanup run goes `Idle → Discovering → CleanupOnly → Done`.
//!
//! Gateway calls are issued strictly one at a time. Consumer routers tend to
//! drop or corrupt responses to concurrent SOAP requests.

use crate::gateway::{AddPortMapping, Discoverer, GatewayClient, GatewayError, PortMappingEntry};
use crate::mapping::{AppliedMapping, Mapping, MappingParser, ParseError, ParseOutcome, Protocol};
use crate::network::detect_cgnat;
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use crate::{Error, Result, TOOL_TAG};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the manager is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing done yet
    Idle,
    /// Looking for a gateway
    Discovering,
    /// Parsing mapping tokens
    Validating,
    /// Adding mappings to the gateway
    Applying,
    /// Waiting for shutdown; mappings are live
    Forwarding,
    /// Removing applied mappings
    Cleaning,
    /// Scanning for and removing tagged mappings
    CleanupOnly,
    /// Run finished
    Done,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tunables for the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Pause after a failed add or delete
    pub retry_backoff: Duration,
    /// Pause between mapping table reads during cleanup
    pub scan_delay: Duration,
    /// Number of mapping table slots read during cleanup
    pub max_scan_slots: u16,
    /// Lease requested for new mappings, 0 for permanent
    pub lease_duration_secs: u32,
    /// Re-run discovery after a failed add or delete
    pub rediscover_on_failure: bool,
    /// Compare the gateway's external IP with the HTTP-observed one
    pub check_public_ip: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(50),
            scan_delay: Duration::from_millis(50),
            max_scan_slots: 64,
            lease_duration_secs: 0,
            rediscover_on_failure: true,
            check_public_ip: true,
        }
    }
}

/// Outcome of applying a batch of mappings
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Mappings the gateway accepted, in input order
    pub applied: Vec<Mapping>,
    /// Mappings the gateway refused
    pub failed: Vec<(Mapping, GatewayError)>,
    /// Mappings not sent because their remote port and protocol were
    /// already applied
    pub skipped: Vec<Mapping>,
}

/// Outcome of removing mappings
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Mappings removed
    pub removed: Vec<AppliedMapping>,
    /// Mappings whose removal failed
    pub failed: Vec<(AppliedMapping, GatewayError)>,
}

/// Outcome of a cleanup scan
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Mapping table entries read
    pub scanned: u16,
    /// Entries whose description carries the tool tag
    pub matched: Vec<PortMappingEntry>,
    /// Result of deleting the matched entries
    pub teardown: TeardownReport,
}

/// Outcome of a complete forwarding run
#[derive(Debug)]
pub struct ForwardOutcome {
    /// Parser warnings and the validated mappings
    pub parsed: ParseOutcome,
    /// What the gateway accepted
    pub apply: ApplyReport,
    /// What ended forwarding
    pub reason: ShutdownReason,
    /// What was removed afterwards
    pub teardown: TeardownReport,
}

/// Drives mappings against a discovered gateway
pub struct LifecycleManager<D: Discoverer> {
    discoverer: D,
    config: LifecycleConfig,
    client: Option<D::Client>,
    applied: Vec<Mapping>,
    external_ip: Option<IpAddr>,
    state: LifecycleState,
}

impl<D: Discoverer> LifecycleManager<D> {
    /// Create an idle manager
    pub fn new(discoverer: D, config: LifecycleConfig) -> Self {
        Self {
            discoverer,
            config,
            client: None,
            applied: Vec::new(),
            external_ip: None,
            state: LifecycleState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Mappings currently applied, in the order they were added
    pub fn applied(&self) -> &[Mapping] {
        &self.applied
    }

    /// External IP reported by the gateway, once discovered
    pub fn external_ip(&self) -> Option<IpAddr> {
        self.external_ip
    }

    /// The gateway handle, once discovered
    pub fn client(&self) -> Option<&D::Client> {
        self.client.as_ref()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle: {} -> {}", self.state, next);
        self.state = next;
    }

    fn gateway(&self) -> Result<&D::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::State(format!("no gateway discovered ({})", self.state)))
    }

    /// Find the gateway and check what it reports about the WAN side
    pub async fn discover(&mut self) -> std::result::Result<(), GatewayError> {
        self.transition(LifecycleState::Discovering);
        let client = self.discoverer.discover().await?;
        self.client = Some(client);
        self.inspect_gateway().await;
        Ok(())
    }

    /// Warn about conditions under which forwarding will not be reachable
    async fn inspect_gateway(&mut self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };

        let external_ip = match client.external_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Could not read gateway external IP: {}", e);
                return;
            }
        };
        self.external_ip = Some(external_ip);
        info!("Gateway external IP: {}", external_ip);

        if external_ip.is_unspecified() {
            warn!(
                "Public IP is {}, UPnP may be disabled/misconfigured, PortUP may not work.",
                external_ip
            );
            return;
        }

        detect_cgnat(external_ip);

        if self.config.check_public_ip {
            match crate::gateway::detect_public_ip().await {
                Ok(public_ip) if public_ip != external_ip => warn!(
                    "Public IP mismatch: {} != {}, Likely Double NAT, PortUP may not work.",
                    public_ip, external_ip
                ),
                Ok(_) => debug!("Gateway external IP matches public IP"),
                Err(e) => debug!("Skipping double NAT check: {}", e),
            }
        }
    }

    /// Parse the user's tokens; nothing touches the gateway if this fails
    pub fn validate<S: AsRef<str>>(
        &mut self,
        parser: &MappingParser,
        tokens: &[S],
        protocol: Protocol,
    ) -> std::result::Result<ParseOutcome, ParseError> {
        self.transition(LifecycleState::Validating);
        parser.parse(tokens, protocol)
    }

    /// Add each mapping in order; failures are logged and skipped
    ///
    /// A mapping whose remote port and protocol are already applied is not
    /// sent, so every remote port is held by at most one mapping.
    pub async fn apply(&mut self, mappings: &[Mapping]) -> Result<ApplyReport> {
        self.gateway()?;
        self.transition(LifecycleState::Applying);

        let mut report = ApplyReport::default();
        for mapping in mappings {
            let key = mapping.applied();
            if let Some(existing) = self.applied.iter().find(|m| m.applied() == key) {
                warn!(
                    "Skipping port mapping {} -> {}:{} ({}): remote port already forwarded to {}:{}",
                    mapping.remote_port,
                    mapping.local_address,
                    mapping.local_port,
                    mapping.protocol,
                    existing.local_address,
                    existing.local_port
                );
                report.skipped.push(mapping.clone());
                continue;
            }

            let request = AddPortMapping {
                external_port: mapping.remote_port,
                protocol: mapping.protocol,
                internal: SocketAddr::new(mapping.local_address, mapping.local_port),
                description: mapping.description(),
                lease_duration: self.config.lease_duration_secs,
            };

            let result = self.gateway()?.add_mapping(&request).await;
            match result {
                Ok(()) => {
                    info!(
                        "Added port mapping {} -> {}:{} ({})",
                        mapping.remote_port, mapping.local_address, mapping.local_port, mapping.protocol
                    );
                    self.applied.push(mapping.clone());
                    report.applied.push(mapping.clone());
                }
                Err(e) => {
                    warn!(
                        "Failed to add port mapping {} -> {} ({}): {}",
                        mapping.remote_port, mapping.local_port, mapping.protocol, e
                    );
                    report.failed.push((mapping.clone(), e));
                    self.recover().await;
                }
            }
        }

        Ok(report)
    }

    /// Wait for the shutdown notification; mappings stay untouched meanwhile
    pub async fn forward(&mut self, signal: &mut ShutdownSignal) -> ShutdownReason {
        self.transition(LifecycleState::Forwarding);
        let reason = signal.wait().await;
        info!("Caught shutdown signal ({}). Cleaning up port mappings...", reason);
        reason
    }

    /// Remove every applied mapping, attempting each one regardless of
    /// earlier failures
    pub async fn teardown(&mut self) -> Result<TeardownReport> {
        self.transition(LifecycleState::Cleaning);

        let records: Vec<AppliedMapping> = self.applied.drain(..).map(|m| m.applied()).collect();
        let report = self.remove_all(&records).await?;

        self.transition(LifecycleState::Done);
        info!("Shutdown complete.");
        Ok(report)
    }

    /// Scan the gateway's mapping table and remove everything tagged by PortUP
    ///
    /// Ownership is inferred from the description containing the tool tag, so
    /// a foreign mapping whose description happens to contain it is removed
    /// too.
    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        self.gateway()?;
        self.transition(LifecycleState::CleanupOnly);

        let mut report = CleanupReport::default();
        for index in 0..self.config.max_scan_slots {
            if index > 0 {
                tokio::time::sleep(self.config.scan_delay).await;
            }

            let read = self.gateway()?.mapping_at(index).await;
            match read {
                Ok(entry) => {
                    report.scanned += 1;
                    if entry.description.contains(TOOL_TAG) {
                        debug!(
                            "Slot {}: {} {} \"{}\" is tool-owned",
                            index, entry.protocol, entry.external_port, entry.description
                        );
                        report.matched.push(entry);
                    }
                }
                Err(e) => {
                    debug!("Mapping table scan stopped at slot {}: {}", index, e);
                    break;
                }
            }
        }

        let records: Vec<AppliedMapping> = report
            .matched
            .iter()
            .map(|entry| AppliedMapping {
                remote_port: entry.external_port,
                protocol: entry.protocol,
            })
            .collect();
        report.teardown = self.remove_all(&records).await?;

        self.transition(LifecycleState::Done);
        info!("PortUP cleanup complete.");
        Ok(report)
    }

    async fn remove_all(&mut self, records: &[AppliedMapping]) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();

        for record in records {
            let result = self
                .gateway()?
                .delete_mapping(record.remote_port, record.protocol)
                .await;
            match result {
                Ok(()) => {
                    info!("Removed port mapping {} ({})", record.remote_port, record.protocol);
                    report.removed.push(*record);
                }
                Err(e) => {
                    warn!(
                        "Failed to remove port mapping {} ({}): {}",
                        record.remote_port, record.protocol, e
                    );
                    report.failed.push((*record, e));
                    self.recover().await;
                }
            }
        }

        Ok(report)
    }

    /// Back off after a failed call and optionally swap in a fresh handle
    async fn recover(&mut self) {
        tokio::time::sleep(self.config.retry_backoff).await;

        if !self.config.rediscover_on_failure {
            return;
        }

        debug!("Re-acquiring gateway handle after failure");
        match self.discoverer.discover().await {
            Ok(client) => self.client = Some(client),
            Err(e) => warn!("Rediscovery failed, keeping current gateway handle: {}", e),
        }
    }

    /// Full forwarding run
    ///
    /// Discovers the gateway, validates `tokens`, applies the mappings, waits
    /// on `signal` and removes everything it applied. If shutdown was already
    /// requested by the time validation finishes, nothing is applied.
    ///
    /// # Arguments
    /// * `parser` - Resolves tokens without an explicit IP to this machine
    /// * `tokens` - Mapping tokens such as `8080` or `192.168.1.50:1234~5678`
    /// * `protocol` - Protocol for every mapping in the run
    /// * `signal` - Ends forwarding
    /// * `on_forwarding` - Called once mappings are live, before waiting
    ///
    /// # Returns
    /// What was parsed, applied and removed, or the first fatal error:
    /// no gateway found or an invalid token.
    ///
    /// # Example
    /// ```rust,no_run
    /// use portup::gateway::UpnpDiscoverer;
    /// use portup::lifecycle::{LifecycleConfig, LifecycleManager};
    /// use portup::mapping::{MappingParser, Protocol};
    /// use portup::shutdown;
    ///
    /// # async fn example() -> portup::Result<()> {
    /// let mut manager = LifecycleManager::new(UpnpDiscoverer::default(), LifecycleConfig::default());
    /// let (trigger, mut signal) = shutdown::channel();
    /// shutdown::listen_for_signals(trigger)?;
    ///
    /// let outcome = manager
    ///     .run_forward(&MappingParser::new(), &["8080"], Protocol::TCP, &mut signal, |_, _| {})
    ///     .await?;
    /// println!("Removed {} mappings", outcome.teardown.removed.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_forward<S, F>(
        &mut self,
        parser: &MappingParser,
        tokens: &[S],
        protocol: Protocol,
        signal: &mut ShutdownSignal,
        on_forwarding: F,
    ) -> Result<ForwardOutcome>
    where
        S: AsRef<str>,
        F: FnOnce(&[Mapping], Option<IpAddr>),
    {
        self.discover().await?;
        let parsed = self.validate(parser, tokens, protocol)?;

        if let Some(reason) = signal.reason() {
            info!("Caught shutdown signal ({}) before forwarding started, nothing applied.", reason);
            self.transition(LifecycleState::Done);
            return Ok(ForwardOutcome {
                parsed,
                apply: ApplyReport::default(),
                reason,
                teardown: TeardownReport::default(),
            });
        }

        let apply = self.apply(&parsed.mappings).await?;

        on_forwarding(&self.applied, self.external_ip);

        let reason = self.forward(signal).await;
        let teardown = self.teardown().await?;

        Ok(ForwardOutcome {
            parsed,
            apply,
            reason,
            teardown,
        })
    }

    /// Full cleanup run
    pub async fn run_cleanup(&mut self) -> Result<CleanupReport> {
        self.discover().await?;
        self.cleanup().await
    }
}
