// Simulated gateway, discoverer and SOAP endpoint shared by the tests

use crate::gateway::{AddPortMapping, Discoverer, GatewayClient, GatewayError, PortMappingEntry};
use crate::lifecycle::LifecycleConfig;
use crate::mapping::Protocol;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A gateway call as the simulated gateway saw it
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ExternalIp,
    MappingAt(u16),
    Add(AddPortMapping),
    Delete(u16, Protocol),
}

#[derive(Debug, Default)]
pub struct GatewayState {
    pub external_ip: Option<IpAddr>,
    pub slots: Vec<PortMappingEntry>,
    pub fail_add_ports: HashSet<u16>,
    pub fail_delete_ports: HashSet<u16>,
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.state().external_ip = Some("203.0.113.10".parse().unwrap());
        gateway
    }

    pub fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    pub fn with_slots(self, slots: Vec<PortMappingEntry>) -> Self {
        self.state().slots = slots;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn adds(&self) -> Vec<AddPortMapping> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Add(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<(u16, Protocol)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(port, protocol) => Some((port, protocol)),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::MappingAt(_)))
            .count()
    }
}

impl GatewayClient for MockGateway {
    async fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::ExternalIp);
        state
            .external_ip
            .ok_or_else(|| GatewayError::ExternalIp("no WAN connection".to_string()))
    }

    async fn mapping_at(&self, index: u16) -> Result<PortMappingEntry, GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::MappingAt(index));
        state
            .slots
            .get(usize::from(index))
            .cloned()
            .ok_or_else(|| GatewayError::MappingEntry {
                index,
                message: "SpecifiedArrayIndexInvalid".to_string(),
            })
    }

    async fn add_mapping(&self, request: &AddPortMapping) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::Add(request.clone()));
        if state.fail_add_ports.contains(&request.external_port) {
            return Err(GatewayError::AddMapping("ConflictInMappingEntry".to_string()));
        }
        let entry = PortMappingEntry {
            remote_host: String::new(),
            external_port: request.external_port,
            protocol: request.protocol,
            internal_port: request.internal.port(),
            internal_client: request.internal.ip().to_string(),
            enabled: true,
            description: request.description.clone(),
            lease_duration: request.lease_duration,
        };
        state.slots.push(entry);
        Ok(())
    }

    async fn delete_mapping(&self, external_port: u16, protocol: Protocol) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(external_port, protocol));
        if state.fail_delete_ports.contains(&external_port) {
            return Err(GatewayError::DeleteMapping("NoSuchEntryInArray".to_string()));
        }
        state
            .slots
            .retain(|entry| !(entry.external_port == external_port && entry.protocol == protocol));
        Ok(())
    }
}

/// Hands out simulated gateways in order, repeating the last one
#[derive(Debug, Clone)]
pub struct MockDiscoverer {
    gateways: Vec<MockGateway>,
    successes: usize,
    discoveries: Arc<AtomicUsize>,
}

impl MockDiscoverer {
    pub fn new(gateway: MockGateway) -> Self {
        Self::sequence(vec![gateway])
    }

    /// The first discovery returns `gateways[0]`, the next `gateways[1]`...
    pub fn sequence(gateways: Vec<MockGateway>) -> Self {
        assert!(!gateways.is_empty());
        Self {
            gateways,
            successes: usize::MAX,
            discoveries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(MockGateway::new()).failing_after(0)
    }

    /// Discoveries after the first `successes` find nothing
    pub fn failing_after(self, successes: usize) -> Self {
        Self { successes, ..self }
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

impl Discoverer for MockDiscoverer {
    type Client = MockGateway;

    async fn discover(&self) -> Result<MockGateway, GatewayError> {
        let n = self.discoveries.fetch_add(1, Ordering::SeqCst);
        if n >= self.successes {
            return Err(GatewayError::NoGatewayFound);
        }
        let index = n.min(self.gateways.len() - 1);
        Ok(self.gateways[index].clone())
    }
}

/// HTTP endpoint answering every request with one canned SOAP reply
pub struct SoapResponder {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl SoapResponder {
    pub async fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                recorded.lock().unwrap().push(request);

                let reason = if status == 200 { "OK" } else { "Internal Server Error" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: text/xml; charset=\"utf-8\"\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    /// Raw requests received so far, headers and body
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&data).into_owned()
}

/// Config without delays or network lookups
pub fn test_config() -> LifecycleConfig {
    LifecycleConfig {
        retry_backoff: Duration::ZERO,
        scan_delay: Duration::ZERO,
        check_public_ip: false,
        ..LifecycleConfig::default()
    }
}

/// A mapping table entry with the given description
pub fn entry(external_port: u16, protocol: Protocol, description: &str) -> PortMappingEntry {
    PortMappingEntry {
        remote_host: String::new(),
        external_port,
        protocol,
        internal_port: external_port,
        internal_client: "192.168.1.20".to_string(),
        enabled: true,
        description: description.to_string(),
        lease_duration: 0,
    }
}
