use super::support::*;
use crate::gateway::GatewayError;
use crate::lifecycle::*;
use crate::mapping::{AppliedMapping, Mapping, MappingParser, Protocol};
use crate::shutdown::{self, ShutdownReason};
use crate::{Error, ParseError};
use std::net::IpAddr;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn parser() -> MappingParser {
    MappingParser::with_local_address(Some(ip("192.168.1.20")))
}

fn mapping(port: u16) -> Mapping {
    Mapping {
        local_address: ip("192.168.1.20"),
        local_port: port,
        remote_port: port,
        protocol: Protocol::TCP,
    }
}

async fn discovered(gateway: MockGateway) -> (LifecycleManager<MockDiscoverer>, MockDiscoverer) {
    let discoverer = MockDiscoverer::new(gateway);
    let mut manager = LifecycleManager::new(discoverer.clone(), test_config());
    manager.discover().await.unwrap();
    (manager, discoverer)
}

#[tokio::test]
async fn test_forward_end_to_end() {
    let gateway = MockGateway::new();
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());
    assert_eq!(manager.state(), LifecycleState::Idle);

    let (trigger, mut signal) = shutdown::channel();

    let mut shown = Vec::new();
    let outcome = manager
        .run_forward(
            &parser(),
            &["192.168.1.50:1234~5678"],
            Protocol::TCP,
            &mut signal,
            |live: &[Mapping], external: Option<IpAddr>| {
                shown = live.to_vec();
                assert_eq!(external, Some(ip("203.0.113.10")));
                trigger.trigger(ShutdownReason::Interrupt);
            },
        )
        .await
        .unwrap();

    let expected = Mapping {
        local_address: ip("192.168.1.50"),
        local_port: 1234,
        remote_port: 5678,
        protocol: Protocol::TCP,
    };
    assert_eq!(outcome.parsed.mappings, vec![expected.clone()]);
    assert_eq!(outcome.parsed.warnings.len(), 1);
    assert_eq!(shown, vec![expected]);

    let adds = gateway.adds();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].external_port, 5678);
    assert_eq!(adds[0].protocol, Protocol::TCP);
    assert_eq!(adds[0].internal, "192.168.1.50:1234".parse().unwrap());
    assert_eq!(adds[0].description, "PortUP TCP 1234");
    assert_eq!(adds[0].lease_duration, 0);

    assert_eq!(outcome.reason, ShutdownReason::Interrupt);
    assert_eq!(gateway.deletes(), vec![(5678, Protocol::TCP)]);
    assert_eq!(
        outcome.teardown.removed,
        vec![AppliedMapping {
            remote_port: 5678,
            protocol: Protocol::TCP,
        }]
    );
    assert!(manager.applied().is_empty());
    assert_eq!(manager.state(), LifecycleState::Done);
}

#[tokio::test]
async fn test_forward_waits_for_signal() {
    let gateway = MockGateway::new();
    let (mut manager, _) = discovered(gateway.clone()).await;
    manager.apply(&[mapping(8080)]).await.unwrap();

    let (trigger, mut signal) = shutdown::channel();
    let waiter = async {
        let reason = manager.forward(&mut signal).await;
        (reason, gateway.deletes().len())
    };
    let sender = async {
        tokio::task::yield_now().await;
        trigger.request_cleanup();
    };

    let ((reason, deletes_while_forwarding), ()) = tokio::join!(waiter, sender);
    assert_eq!(reason, ShutdownReason::CleanupRequested);
    assert_eq!(deletes_while_forwarding, 0);
    assert_eq!(manager.state(), LifecycleState::Forwarding);
    assert_eq!(manager.applied().len(), 1);
}

#[tokio::test]
async fn test_discovery_failure_is_fatal() {
    let mut manager = LifecycleManager::new(MockDiscoverer::unavailable(), test_config());
    let (_trigger, mut signal) = shutdown::channel();

    let err = manager
        .run_forward(&parser(), &["8080"], Protocol::TCP, &mut signal, |_: &[Mapping], _: Option<IpAddr>| {})
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Gateway(GatewayError::NoGatewayFound)));
    assert_eq!(manager.state(), LifecycleState::Discovering);
}

#[tokio::test]
async fn test_invalid_token_aborts_before_any_mutation() {
    let gateway = MockGateway::new();
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());
    let (_trigger, mut signal) = shutdown::channel();

    let err = manager
        .run_forward(
            &parser(),
            &["8080", "1~2~3", "9090"],
            Protocol::TCP,
            &mut signal,
            |_: &[Mapping], _: Option<IpAddr>| panic!("must not start forwarding"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Parse(ParseError::InvalidFormat(_))));
    assert!(gateway.adds().is_empty());
    assert!(gateway.deletes().is_empty());
    assert_eq!(manager.state(), LifecycleState::Validating);
}

#[tokio::test]
async fn test_apply_continues_after_failure() {
    let gateway = MockGateway::new();
    gateway.state().fail_add_ports.insert(81);
    let (mut manager, discoverer) = discovered(gateway.clone()).await;

    let report = manager
        .apply(&[mapping(80), mapping(81), mapping(82)])
        .await
        .unwrap();

    let applied: Vec<u16> = report.applied.iter().map(|m| m.remote_port).collect();
    assert_eq!(applied, vec![80, 82]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.remote_port, 81);
    assert!(matches!(report.failed[0].1, GatewayError::AddMapping(_)));

    let add_ports: Vec<u16> = gateway.adds().iter().map(|a| a.external_port).collect();
    assert_eq!(add_ports, vec![80, 81, 82]);
    assert_eq!(manager.applied().len(), 2);

    // initial discovery plus one re-acquisition after the failed add
    assert_eq!(discoverer.discoveries(), 2);
}

#[tokio::test]
async fn test_no_rediscovery_when_disabled() {
    let gateway = MockGateway::new();
    gateway.state().fail_add_ports.insert(80);
    let discoverer = MockDiscoverer::new(gateway);
    let config = LifecycleConfig {
        rediscover_on_failure: false,
        ..test_config()
    };
    let mut manager = LifecycleManager::new(discoverer.clone(), config);
    manager.discover().await.unwrap();

    manager.apply(&[mapping(80)]).await.unwrap();

    assert_eq!(discoverer.discoveries(), 1);
}

#[tokio::test]
async fn test_teardown_attempts_every_mapping() {
    let gateway = MockGateway::new();
    let (mut manager, _) = discovered(gateway.clone()).await;
    manager
        .apply(&[mapping(80), mapping(81), mapping(82)])
        .await
        .unwrap();
    gateway.state().fail_delete_ports.insert(80);

    let report = manager.teardown().await.unwrap();

    assert_eq!(
        gateway.deletes(),
        vec![(80, Protocol::TCP), (81, Protocol::TCP), (82, Protocol::TCP)]
    );
    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.remote_port, 80);
    assert!(manager.applied().is_empty());
    assert_eq!(manager.state(), LifecycleState::Done);

    // Nothing left to remove the second time
    let again = manager.teardown().await.unwrap();
    assert!(again.removed.is_empty() && again.failed.is_empty());
    assert_eq!(gateway.deletes().len(), 3);
}

#[tokio::test]
async fn test_apply_without_gateway_is_state_error() {
    let mut manager = LifecycleManager::new(MockDiscoverer::new(MockGateway::new()), test_config());
    let err = manager.apply(&[mapping(80)]).await.unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[tokio::test]
async fn test_cleanup_removes_only_tagged_slots() {
    let slots = (0..64u16)
        .map(|i| {
            let description = match i {
                3 => "PortUP TCP 8080".to_string(),
                40 => "PortUP UDP 27015".to_string(),
                _ => format!("Other app {}", i),
            };
            entry(10_000 + i, if i == 40 { Protocol::UDP } else { Protocol::TCP }, &description)
        })
        .collect();
    let gateway = MockGateway::new().with_slots(slots);
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());

    let report = manager.run_cleanup().await.unwrap();

    assert_eq!(report.scanned, 64);
    assert_eq!(gateway.reads(), 64);
    assert_eq!(report.matched.len(), 2);
    assert_eq!(
        gateway.deletes(),
        vec![(10_003, Protocol::TCP), (10_040, Protocol::UDP)]
    );
    assert_eq!(report.teardown.removed.len(), 2);
    assert_eq!(manager.state(), LifecycleState::Done);
}

#[tokio::test]
async fn test_cleanup_twice_is_idempotent() {
    let gateway = MockGateway::new().with_slots(vec![
        entry(8080, Protocol::TCP, "PortUP TCP 8080"),
        entry(9000, Protocol::UDP, "Game console"),
    ]);
    let discoverer = MockDiscoverer::new(gateway.clone());

    let mut first = LifecycleManager::new(discoverer.clone(), test_config());
    let report = first.run_cleanup().await.unwrap();
    assert_eq!(report.teardown.removed.len(), 1);

    let mut second = LifecycleManager::new(discoverer, test_config());
    let report = second.run_cleanup().await.unwrap();
    assert!(report.matched.is_empty());
    assert!(report.teardown.removed.is_empty());
    assert_eq!(gateway.deletes().len(), 1);
    assert_eq!(second.state(), LifecycleState::Done);
}

#[tokio::test]
async fn test_cleanup_scan_stops_at_first_read_error() {
    let gateway = MockGateway::new().with_slots(vec![
        entry(1000, Protocol::TCP, "Other"),
        entry(1001, Protocol::TCP, "PortUP TCP 1001"),
        entry(1002, Protocol::TCP, "Other"),
    ]);
    let (mut manager, _) = discovered(gateway.clone()).await;

    let report = manager.cleanup().await.unwrap();

    assert_eq!(report.scanned, 3);
    // three entries plus the read that signalled the end of the table
    assert_eq!(gateway.reads(), 4);
    assert_eq!(gateway.deletes(), vec![(1001, Protocol::TCP)]);
}

#[tokio::test]
async fn test_cleanup_respects_scan_limit() {
    let slots = (0..10u16)
        .map(|i| entry(2000 + i, Protocol::TCP, "PortUP TCP"))
        .collect();
    let gateway = MockGateway::new().with_slots(slots);
    let discoverer = MockDiscoverer::new(gateway.clone());
    let config = LifecycleConfig {
        max_scan_slots: 4,
        ..test_config()
    };
    let mut manager = LifecycleManager::new(discoverer, config);

    let report = manager.run_cleanup().await.unwrap();

    assert_eq!(gateway.reads(), 4);
    assert_eq!(report.teardown.removed.len(), 4);
}

#[tokio::test]
async fn test_cleanup_treats_foreign_tag_substring_as_owned() {
    // Ownership is a naming convention; a foreign description containing the
    // tag is indistinguishable from one of ours.
    let gateway = MockGateway::new().with_slots(vec![entry(
        3074,
        Protocol::UDP,
        "NotReallyPortUPButClose",
    )]);
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());

    manager.run_cleanup().await.unwrap();

    assert_eq!(gateway.deletes(), vec![(3074, Protocol::UDP)]);
}

#[tokio::test]
async fn test_cleanup_reports_success_despite_delete_failures() {
    let gateway = MockGateway::new().with_slots(vec![
        entry(7000, Protocol::TCP, "PortUP TCP 7000"),
        entry(7001, Protocol::TCP, "PortUP TCP 7001"),
    ]);
    gateway.state().fail_delete_ports.insert(7000);
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());

    let report = manager.run_cleanup().await.unwrap();

    assert_eq!(report.teardown.failed.len(), 1);
    assert_eq!(report.teardown.removed.len(), 1);
    assert_eq!(gateway.deletes().len(), 2);
}

#[tokio::test]
async fn test_discover_records_external_ip() {
    let gateway = MockGateway::new();
    let (manager, _) = discovered(gateway.clone()).await;

    assert_eq!(manager.external_ip(), Some(ip("203.0.113.10")));
    assert!(manager.client().is_some());
}

#[tokio::test]
async fn test_missing_external_ip_is_not_fatal() {
    let gateway = MockGateway::new();
    gateway.state().external_ip = None;
    let (manager, _) = discovered(gateway).await;

    assert_eq!(manager.external_ip(), None);
    assert!(manager.client().is_some());
}

#[tokio::test]
async fn test_duplicate_remote_port_is_applied_once() {
    let gateway = MockGateway::new();
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());
    let (trigger, mut signal) = shutdown::channel();

    let outcome = manager
        .run_forward(
            &parser(),
            &["8080", "192.168.1.50:9000~8080"],
            Protocol::TCP,
            &mut signal,
            |_: &[Mapping], _: Option<IpAddr>| {
                trigger.request_cleanup();
            },
        )
        .await
        .unwrap();

    let adds = gateway.adds();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].internal, "192.168.1.20:8080".parse().unwrap());
    assert_eq!(outcome.apply.applied, vec![mapping(8080)]);
    assert_eq!(outcome.apply.skipped.len(), 1);
    assert_eq!(outcome.apply.skipped[0].local_port, 9000);

    assert_eq!(gateway.deletes(), vec![(8080, Protocol::TCP)]);
    assert_eq!(outcome.teardown.removed.len(), 1);
    assert!(outcome.teardown.failed.is_empty());
}

#[tokio::test]
async fn test_duplicate_check_spans_apply_calls_and_protocols() {
    let gateway = MockGateway::new();
    let (mut manager, _) = discovered(gateway.clone()).await;

    manager.apply(&[mapping(80)]).await.unwrap();
    let again = manager.apply(&[mapping(80)]).await.unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.skipped, vec![mapping(80)]);

    // Same port over UDP is a different mapping
    let udp = Mapping {
        protocol: Protocol::UDP,
        ..mapping(80)
    };
    let report = manager.apply(&[udp]).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(gateway.adds().len(), 2);
    assert_eq!(manager.applied().len(), 2);
}

#[tokio::test]
async fn test_failed_port_can_be_retried_by_a_later_mapping() {
    let gateway = MockGateway::new();
    gateway.state().fail_add_ports.insert(80);
    let (mut manager, _) = discovered(gateway.clone()).await;

    let report = manager.apply(&[mapping(80), mapping(80)]).await.unwrap();

    // Only accepted mappings occupy a remote port
    assert_eq!(report.failed.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(gateway.adds().len(), 2);
}

#[tokio::test]
async fn test_add_failure_switches_to_rediscovered_gateway() {
    let first = MockGateway::new();
    first.state().fail_add_ports.insert(81);
    let second = MockGateway::new();
    let discoverer = MockDiscoverer::sequence(vec![first.clone(), second.clone()]);
    let mut manager = LifecycleManager::new(discoverer.clone(), test_config());
    manager.discover().await.unwrap();

    let report = manager
        .apply(&[mapping(80), mapping(81), mapping(82)])
        .await
        .unwrap();

    assert_eq!(discoverer.discoveries(), 2);
    let first_ports: Vec<u16> = first.adds().iter().map(|a| a.external_port).collect();
    let second_ports: Vec<u16> = second.adds().iter().map(|a| a.external_port).collect();
    assert_eq!(first_ports, vec![80, 81]);
    assert_eq!(second_ports, vec![82]);
    assert_eq!(report.applied.len(), 2);
}

#[tokio::test]
async fn test_delete_failure_switches_to_rediscovered_gateway() {
    let first = MockGateway::new();
    let second = MockGateway::new();
    let discoverer = MockDiscoverer::sequence(vec![first.clone(), second.clone()]);
    let mut manager = LifecycleManager::new(discoverer.clone(), test_config());
    manager.discover().await.unwrap();
    manager
        .apply(&[mapping(80), mapping(81), mapping(82)])
        .await
        .unwrap();
    first.state().fail_delete_ports.insert(80);

    let report = manager.teardown().await.unwrap();

    // initial discovery plus one after the failed delete
    assert_eq!(discoverer.discoveries(), 2);
    assert_eq!(first.deletes(), vec![(80, Protocol::TCP)]);
    assert_eq!(
        second.deletes(),
        vec![(81, Protocol::TCP), (82, Protocol::TCP)]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.removed.len(), 2);
}

#[tokio::test]
async fn test_failed_rediscovery_keeps_current_gateway() {
    let gateway = MockGateway::new();
    let discoverer = MockDiscoverer::new(gateway.clone()).failing_after(1);
    let mut manager = LifecycleManager::new(discoverer.clone(), test_config());
    manager.discover().await.unwrap();
    manager.apply(&[mapping(80), mapping(81)]).await.unwrap();
    gateway.state().fail_delete_ports.insert(80);

    let report = manager.teardown().await.unwrap();

    assert_eq!(discoverer.discoveries(), 2);
    assert_eq!(gateway.deletes(), vec![(80, Protocol::TCP), (81, Protocol::TCP)]);
    assert_eq!(report.removed.len(), 1);
    assert!(manager.client().is_some());
}

#[tokio::test]
async fn test_signal_before_apply_skips_forwarding() {
    let gateway = MockGateway::new();
    let mut manager = LifecycleManager::new(MockDiscoverer::new(gateway.clone()), test_config());
    let (trigger, mut signal) = shutdown::channel();
    trigger.trigger(ShutdownReason::Interrupt);

    let outcome = manager
        .run_forward(
            &parser(),
            &["8080", "9090"],
            Protocol::TCP,
            &mut signal,
            |_: &[Mapping], _: Option<IpAddr>| panic!("must not start forwarding"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.reason, ShutdownReason::Interrupt);
    assert_eq!(outcome.parsed.mappings.len(), 2);
    assert!(outcome.apply.applied.is_empty());
    assert!(outcome.teardown.removed.is_empty());
    assert!(gateway.adds().is_empty());
    assert!(gateway.deletes().is_empty());
    assert_eq!(manager.state(), LifecycleState::Done);
}
