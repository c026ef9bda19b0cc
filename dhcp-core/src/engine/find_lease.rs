//! The `find_lease` resolver (§4.5): picks one candidate lease out of up
//! to four overlapping sources — a fixed host declaration, the client's
//! requested/current IP, its client-id chain, and its hardware-address
//! chain — reduces them by a fixed precedence, and releases whichever
//! candidates it drops in favour of another when the client has no
//! current binding worth protecting.

use std::net::Ipv4Addr;

use crate::collab::LeaseStore;
use crate::config::Config;
use crate::model::{now_secs, Lease, MessageType, Request};
use crate::store::Universe;
use crate::wire::options::codes;

pub struct FindLeaseResult {
    pub lease: Option<Lease>,
    /// Set when the requested IP belongs to us but we refuse to grant it —
    /// the caller NAKs only when this is set and the subnet is authoritative.
    pub ours: bool,
    /// Whether a host declaration matched this client.
    pub known: bool,
}

pub fn requested_ip(request: &Request) -> Option<Ipv4Addr> {
    request
        .options
        .get(Universe::Dhcp, codes::REQUESTED_IP_ADDRESS)
        .filter(|v| v.len() == 4)
        .map(|v| Ipv4Addr::new(v[0], v[1], v[2], v[3]))
        .or_else(|| (!request.ciaddr.is_unspecified()).then_some(request.ciaddr))
}

pub fn client_id(request: &Request) -> Vec<u8> {
    request
        .options
        .get(Universe::Dhcp, codes::CLIENT_IDENTIFIER)
        .map(|v| v.to_vec())
        .unwrap_or_else(|| request.hardware_addr.bytes().to_vec())
}

fn lease_on_network(lease: &Lease, config: &Config, shared_network: &str) -> bool {
    config
        .find_subnet_containing(lease.subnet)
        .map(|s| s.shared_network == shared_network)
        .unwrap_or(false)
}

fn pool_permits(config: &Config, shared_network: &str, pool: usize, known: bool) -> bool {
    config
        .find_shared_network(shared_network)
        .and_then(|net| net.pools.get(pool))
        .map(|p| p.access.permits(known))
        .unwrap_or(true)
}

fn hw_matches(lease: &Lease, request: &Request) -> bool {
    lease.hardware_addr.map(|h| h == request.hardware_addr).unwrap_or(true)
}

fn uid_matches(lease: &Lease, uid: &[u8]) -> bool {
    lease.uid.as_deref().map(|u| u == uid).unwrap_or(true)
}

pub fn find_lease(
    config: &Config,
    store: &mut dyn LeaseStore,
    shared_network: &str,
    request: &Request,
) -> FindLeaseResult {
    let cip = requested_ip(request);
    let uid = client_id(request);
    let known_binding = !request.ciaddr.is_unspecified();

    let host = config
        .find_host_by_uid(&uid)
        .or_else(|| config.find_host_by_hw(&request.hardware_addr));
    let known = host.is_some();

    let fixed_lease = host.and_then(|h| h.fixed_addr).and_then(|ip| {
        let subnet = config.find_subnet_containing(ip)?;
        (subnet.shared_network == shared_network)
            .then(|| Lease::mock_static(ip, subnet.network, &host.map(|h| h.name.clone()).unwrap_or_default()))
    });

    let mut uid_lease = None;
    for candidate in store.find_by_uid(&uid) {
        let eligible = lease_on_network(&candidate, config, shared_network)
            && candidate
                .pool
                .map(|p| pool_permits(config, shared_network, p, known))
                .unwrap_or(true);

        if !eligible {
            if !known_binding {
                let _ = store.dissociate_lease(candidate.ip_addr);
            }
            continue;
        }

        uid_lease = Some(candidate);
        break;
    }

    let mut hw_lease = None;
    for candidate in store.find_by_hw(&request.hardware_addr) {
        let eligible = lease_on_network(&candidate, config, shared_network)
            && candidate
                .pool
                .map(|p| pool_permits(config, shared_network, p, known))
                .unwrap_or(true)
            && uid_matches(&candidate, &uid);

        if !eligible {
            if !known_binding {
                let _ = store.dissociate_lease(candidate.ip_addr);
            }
            continue;
        }

        hw_lease = Some(candidate);
        break;
    }

    let ip_lease = cip.and_then(|ip| store.find_by_ip(ip)).filter(|lease| {
        lease_on_network(lease, config, shared_network)
            && hw_matches(lease, request)
            && uid_matches(lease, &uid)
            && lease
                .pool
                .map(|p| pool_permits(config, shared_network, p, known))
                .unwrap_or(true)
            && !(lease.flags.abandoned && Some(lease.ip_addr) != cip)
    });

    if let (Some(fixed), Some(requested)) = (&fixed_lease, cip) {
        if request.message_type == Some(MessageType::Request) && fixed.ip_addr != requested {
            return FindLeaseResult { lease: None, ours: true, known };
        }
    }

    if let (Some(_), Some(ip_lease)) = (&fixed_lease, &ip_lease) {
        if request.message_type == Some(MessageType::Request) && !ip_lease.is_expired(now_secs()) {
            log::error!(
                "host declaration for {:?} conflicts with database lease on {}",
                host.map(|h| h.name.as_str()),
                ip_lease.ip_addr
            );
            return FindLeaseResult { lease: None, ours: false, known };
        }
    }

    let chosen = fixed_lease
        .clone()
        .or_else(|| ip_lease.clone())
        .or_else(|| uid_lease.clone())
        .or_else(|| hw_lease.clone());

    if !known_binding {
        for dropped in [ip_lease, uid_lease, hw_lease].into_iter().flatten() {
            if chosen.as_ref().map(|c| c.ip_addr) != Some(dropped.ip_addr) {
                let _ = store.dissociate_lease(dropped.ip_addr);
            }
        }
    }

    match chosen {
        Some(lease) if lease.flags.abandoned => {
            if Some(lease.ip_addr) == cip && request.message_type == Some(MessageType::Request) {
                let mut reclaimed = lease;
                reclaimed.flags.abandoned = false;
                FindLeaseResult { lease: Some(reclaimed), ours: false, known }
            } else {
                FindLeaseResult { lease: None, ours: true, known }
            }
        }
        other => FindLeaseResult { lease: other, ours: false, known },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryLeaseStore;
    use crate::model::{GroupSettings, HardwareAddr, HostDecl, Pool, PoolAccess, SharedNetwork, Subnet};
    use crate::store::OptionState;

    fn sample_config() -> Config {
        Config {
            global: crate::model::Group {
                name: "global".into(),
                settings: GroupSettings::default(),
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
                    group: Default::default(),
                }],
                group: Default::default(),
            }],
            subnets: vec![Subnet {
                network: Ipv4Addr::new(10, 0, 0, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                shared_network: "office".into(),
                group: Default::default(),
            }],
            hosts: vec![],
            classes: vec![],
        }
    }

    fn request(ciaddr: Ipv4Addr, requested: Option<Ipv4Addr>) -> Request {
        let mut options = OptionState::default();
        if let Some(ip) = requested {
            options.supersede(Universe::Dhcp, codes::REQUESTED_IP_ADDRESS, ip.octets().to_vec());
        }

        Request {
            message_type: Some(MessageType::Request),
            hops: 0,
            xid: 1,
            secs: 0,
            broadcast: false,
            ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            hardware_addr: HardwareAddr::new(1, &[2, 0, 0, 0, 0, 1]).unwrap(),
            options,
            agent_options: Default::default(),
            options_valid: true,
            known: false,
            authenticated: false,
            got_requested_address: requested.is_some(),
            shared_network: None,
            matched_classes: Vec::new(),
        }
    }

    #[test]
    fn fixed_host_binding_wins_over_everything() {
        let mut config = sample_config();
        config.hosts.push(HostDecl {
            name: "printer".into(),
            client_id: None,
            hardware_addr: HardwareAddr::new(1, &[2, 0, 0, 0, 0, 1]),
            fixed_addr: Some(Ipv4Addr::new(10, 0, 0, 50)),
            group: Default::default(),
        });

        let mut store = InMemoryLeaseStore::new();
        let req = request(Ipv4Addr::UNSPECIFIED, Some(Ipv4Addr::new(10, 0, 0, 50)));

        let result = find_lease(&config, &mut store, "office", &req);
        assert_eq!(result.lease.unwrap().ip_addr, Ipv4Addr::new(10, 0, 0, 50));
        assert!(result.known);
    }

    #[test]
    fn requesting_someone_elses_ip_is_refused() {
        let config = sample_config();
        let mut store = InMemoryLeaseStore::new();

        store
            .supersede_lease(
                Lease {
                    ip_addr: Ipv4Addr::new(10, 0, 0, 150),
                    starts: 0,
                    ends: now_secs() + 3600,
                    timestamp: 0,
                    offered_expiry: now_secs() + 3600,
                    subnet: Ipv4Addr::new(10, 0, 0, 0),
                    pool: Some(0),
                    host: None,
                    billing_class: None,
                    hardware_addr: HardwareAddr::new(1, &[2, 0, 0, 0, 0, 99]),
                    uid: None,
                    flags: Default::default(),
                    state: None,
                    last_ping: None,
                    on_commit: Vec::new(),
                    on_expiry: Vec::new(),
                    on_release: Vec::new(),
                },
                true,
            )
            .unwrap();

        let req = request(Ipv4Addr::UNSPECIFIED, Some(Ipv4Addr::new(10, 0, 0, 150)));
        let result = find_lease(&config, &mut store, "office", &req);

        assert!(result.lease.is_none());
    }
}
