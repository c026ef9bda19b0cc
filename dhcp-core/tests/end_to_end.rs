//! End-to-end scenarios against the literal configuration from the spec's
//! testable-properties table: server/interface 10.0.0.1, subnet 10.0.0.0/24,
//! pool 10.0.0.100-10.0.0.200, default-lease-time 3600.

use std::net::{Ipv4Addr, SocketAddrV4};

use dhcp_core::model::{AgentSubOption, Group, GroupSettings, MessageType, Pool, PoolAccess, SharedNetwork, Subnet};
use dhcp_core::wire::options::codes as opt;
use dhcp_core::wire::{self, Header};
use dhcp_core::{Config, Engine, InMemoryLeaseStore, NoopPingProbe, Transport};

struct RecordingTransport {
    sent: Vec<(SocketAddrV4, SocketAddrV4, Vec<u8>)>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self { sent: Vec::new() }
    }
}

impl Transport for RecordingTransport {
    fn send_packet(&mut self, from: SocketAddrV4, to: SocketAddrV4, data: &[u8]) -> std::io::Result<()> {
        self.sent.push((from, to, data.to_vec()));
        Ok(())
    }
}

fn sample_config() -> Config {
    Config {
        global: Group {
            name: "global".into(),
            settings: GroupSettings {
                authoritative: Some(true),
                default_lease_time: Some(3600),
                ..Default::default()
            },
            statements: vec![],
            on_commit: vec![],
            on_expiry: vec![],
            on_release: vec![],
        },
        shared_networks: vec![SharedNetwork {
            name: "office".into(),
            subnets: vec![Ipv4Addr::new(10, 0, 0, 0)],
            pools: vec![Pool {
                range_start: Ipv4Addr::new(10, 0, 0, 100),
                range_end: Ipv4Addr::new(10, 0, 0, 200),
                access: PoolAccess {
                    allow_unknown_clients: true,
                    deny_known_clients: false,
                    allow_dynamic_bootp: true,
                },
                group: Group::default(),
            }],
            group: Group::default(),
        }],
        subnets: vec![Subnet {
            network: Ipv4Addr::new(10, 0, 0, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            shared_network: "office".into(),
            group: Group::default(),
        }],
        hosts: vec![],
        classes: vec![],
    }
}

fn header(xid: u32, chaddr: [u8; 6], ciaddr: Ipv4Addr, giaddr: Ipv4Addr) -> Header {
    let mut full = [0u8; 16];
    full[..6].copy_from_slice(&chaddr);

    Header {
        reply: false,
        htype: 1,
        hlen: 6,
        hops: 0,
        xid,
        secs: 0,
        broadcast: true,
        ciaddr,
        yiaddr: Ipv4Addr::UNSPECIFIED,
        siaddr: Ipv4Addr::UNSPECIFIED,
        giaddr,
        chaddr: full,
    }
}

fn encode(header: &Header, options: &[u8]) -> Vec<u8> {
    wire::encode(header, options, &[0u8; wire::FILE_LEN], &[0u8; wire::SNAME_LEN])
}

/// Scenario 1: a bare DISCOVER gets an OFFER with the server's standard timers.
#[test]
fn discover_yields_an_offer_with_standard_timers() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let h = header(0xAB, [2, 0, 0, 0, 0, 1], Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
    let options = [opt::DHCP_MESSAGE_TYPE, 1, MessageType::Discover as u8, opt::END];
    let frame = encode(&h, &options);

    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    assert_eq!(transport.sent.len(), 1);
    let (_, _, bytes) = &transport.sent[0];
    let decoded = wire::decode(bytes).unwrap();

    assert_eq!(decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::DHCP_MESSAGE_TYPE), Some([2u8].as_slice()));
    assert!((100..=200).contains(&decoded.header.yiaddr.octets()[3]));
    assert_eq!(decoded.header.siaddr, Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::IP_ADDRESS_LEASE_TIME),
        Some(3600u32.to_be_bytes().as_slice())
    );
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::SERVER_IDENTIFIER),
        Some(Ipv4Addr::new(10, 0, 0, 1).octets().as_slice())
    );
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::RENEWAL_TIME),
        Some(1800u32.to_be_bytes().as_slice())
    );
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::REBINDING_TIME),
        Some(3150u32.to_be_bytes().as_slice())
    );
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::SUBNET_MASK),
        Some(Ipv4Addr::new(255, 255, 255, 0).octets().as_slice())
    );
}

/// Scenario 2: REQUESTing the offered address commits it and ACKs with the
/// same timers.
#[test]
fn request_for_the_offered_address_is_acked() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let h = header(0xAB, [2, 0, 0, 0, 0, 1], Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
    let mut options = vec![opt::DHCP_MESSAGE_TYPE, 1, MessageType::Request as u8];
    options.extend_from_slice(&[opt::REQUESTED_IP_ADDRESS, 4, 10, 0, 0, 100]);
    options.push(opt::END);
    let frame = encode(&h, &options);

    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    assert_eq!(transport.sent.len(), 1);
    let (_, _, bytes) = &transport.sent[0];
    let decoded = wire::decode(bytes).unwrap();

    assert_eq!(decoded.header.yiaddr, Ipv4Addr::new(10, 0, 0, 100));
    assert_eq!(decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::DHCP_MESSAGE_TYPE), Some([5u8].as_slice()));
    assert_eq!(
        decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::IP_ADDRESS_LEASE_TIME),
        Some(3600u32.to_be_bytes().as_slice())
    );

    assert!(store.find_by_ip(Ipv4Addr::new(10, 0, 0, 100)).is_some());
}

/// Scenario 3: requesting an out-of-pool address on an authoritative network
/// is NAKed, broadcast.
#[test]
fn request_for_an_out_of_pool_address_is_naked() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let h = header(0xCD, [2, 0, 0, 0, 0, 2], Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
    let mut options = vec![opt::DHCP_MESSAGE_TYPE, 1, MessageType::Request as u8];
    options.extend_from_slice(&[opt::REQUESTED_IP_ADDRESS, 4, 10, 0, 0, 50]);
    options.push(opt::END);
    let frame = encode(&h, &options);

    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    assert_eq!(transport.sent.len(), 1);
    let (_, to, bytes) = &transport.sent[0];
    let decoded = wire::decode(bytes).unwrap();

    assert_eq!(decoded.options.get(dhcp_core::store::Universe::Dhcp, opt::DHCP_MESSAGE_TYPE), Some([6u8].as_slice()));
    assert_eq!(to.ip(), &Ipv4Addr::BROADCAST);
}

/// Scenario 4: a RENEWING client unknown to us, on a wire we can't verify,
/// is silently ignored rather than NAKed.
#[test]
fn renewing_on_an_unverifiable_wire_is_ignored() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let h = header(0xEE, [2, 0, 0, 0, 0, 3], Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::UNSPECIFIED);
    let options = [opt::DHCP_MESSAGE_TYPE, 1, MessageType::Request as u8, opt::END];
    let frame = encode(&h, &options);

    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    assert!(transport.sent.is_empty());
}

/// Scenario 5: a relayed DISCOVER gets a unicast-to-giaddr OFFER that echoes
/// Option-82 verbatim.
#[test]
fn relayed_discover_echoes_option_82_and_unicasts_to_the_relay() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let giaddr = Ipv4Addr::new(192, 168, 1, 1);
    let h = header(0xF0, [2, 0, 0, 0, 0, 4], Ipv4Addr::UNSPECIFIED, giaddr);

    let mut options = vec![opt::DHCP_MESSAGE_TYPE, 1, MessageType::Discover as u8];
    let sub = AgentSubOption { code: 1, data: b"eth0/42".to_vec() };
    let encoded_sub = dhcp_core::wire::agent::encode_suboptions(std::slice::from_ref(&sub));
    options.push(opt::RELAY_AGENT_INFORMATION);
    options.push(encoded_sub.len() as u8);
    options.extend_from_slice(&encoded_sub);
    options.push(opt::END);
    let frame = encode(&h, &options);

    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    assert_eq!(transport.sent.len(), 1);
    let (_, to, bytes) = &transport.sent[0];
    assert_eq!(*to, SocketAddrV4::new(giaddr, 67));

    let decoded = wire::decode(bytes).unwrap();
    assert_eq!(decoded.agent_options.find(1), Some(b"eth0/42".as_slice()));
}

/// Scenario 6: RELEASE reduces the lease's `ends` without removing it from
/// the by-IP index.
#[test]
fn release_reduces_ends_but_keeps_the_lease_indexed() {
    let config = sample_config();
    let engine = Engine::new(&config, Ipv4Addr::new(10, 0, 0, 1));
    let mut store = InMemoryLeaseStore::new();
    let mut ping = NoopPingProbe;
    let mut transport = RecordingTransport::new();

    let chaddr = [2, 0, 0, 0, 0, 5];
    let h = header(0x10, chaddr, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
    let mut options = vec![opt::DHCP_MESSAGE_TYPE, 1, MessageType::Request as u8];
    options.extend_from_slice(&[opt::REQUESTED_IP_ADDRESS, 4, 10, 0, 0, 100]);
    options.push(opt::END);
    let frame = encode(&h, &options);
    engine.handle_datagram(&frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);
    assert_eq!(transport.sent.len(), 1);

    let release_header = header(0x11, chaddr, Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::UNSPECIFIED);
    let release_options = [opt::DHCP_MESSAGE_TYPE, 1, MessageType::Release as u8, opt::END];
    let release_frame = encode(&release_header, &release_options);
    engine.handle_datagram(&release_frame, Ipv4Addr::new(10, 0, 0, 1), &mut store, &mut ping, &mut transport);

    let lease = store.find_by_ip(Ipv4Addr::new(10, 0, 0, 100)).unwrap();
    assert!(lease.ends <= dhcp_core::model::now_secs());
}
