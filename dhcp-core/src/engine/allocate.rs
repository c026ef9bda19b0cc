//! `allocate_lease` (§4.5): picks a free address out of a shared
//! network's pools when `find_lease` found nothing to reuse. Prefers a
//! never-used address over the earliest-expiring previously-used one, and
//! a merely-expired lease over an abandoned one — across pool
//! boundaries, not just within a single pool.

use std::net::Ipv4Addr;

use crate::collab::LeaseStore;
use crate::config::Config;
use crate::model::{now_secs, Lease, LeaseFlags, Pool};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Quality {
    Virgin,
    Reused,
    Abandoned,
}

fn quality(lease: &Lease) -> Quality {
    if lease.flags.abandoned {
        Quality::Abandoned
    } else if lease.uid.is_some() || lease.hardware_addr.is_some() {
        Quality::Reused
    } else {
        Quality::Virgin
    }
}

fn first_virgin_address(store: &dyn LeaseStore, pool: &Pool) -> Option<Ipv4Addr> {
    let start: u32 = pool.range_start.into();
    let end: u32 = pool.range_end.into();

    (start..=end).map(Ipv4Addr::from).find(|ip| store.find_by_ip(*ip).is_none())
}

fn subnet_for_pool(config: &Config, shared_network: &str, pool: &Pool) -> Ipv4Addr {
    config
        .subnets
        .iter()
        .find(|s| s.shared_network == shared_network && s.contains(pool.range_start))
        .map(|s| s.network)
        .unwrap_or(pool.range_start)
}

pub fn allocate_lease(
    config: &Config,
    store: &mut dyn LeaseStore,
    shared_network: &str,
    known_client: bool,
) -> Option<Lease> {
    let net = config.find_shared_network(shared_network)?;
    let now = now_secs();

    let mut fallback: Option<Lease> = None;

    for (idx, pool) in net.pools.iter().enumerate() {
        if !pool.access.permits(known_client) {
            continue;
        }

        if let Some(ip) = first_virgin_address(store, pool) {
            return Some(Lease {
                ip_addr: ip,
                starts: now,
                ends: now,
                timestamp: now,
                offered_expiry: now,
                subnet: subnet_for_pool(config, shared_network, pool),
                pool: Some(idx),
                host: None,
                billing_class: None,
                hardware_addr: None,
                uid: None,
                flags: LeaseFlags::default(),
                state: None,
                last_ping: None,
                on_commit: Vec::new(),
                on_expiry: Vec::new(),
                on_release: Vec::new(),
            });
        }

        let Some(tail) = store.pool_tail(idx) else {
            continue;
        };

        if !tail.is_expired(now) {
            continue;
        }

        fallback = match fallback {
            Some(current) if quality(&current) <= quality(&tail) => Some(current),
            _ => Some(tail),
        };
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryLeaseStore;
    use crate::model::{Group, PoolAccess, SharedNetwork, Subnet};

    fn config_with_pool(start: u8, end: u8) -> Config {
        Config {
            global: Group::default(),
            shared_networks: vec![SharedNetwork {
                name: "office".into(),
                subnets: vec![Ipv4Addr::new(10, 0, 0, 0)],
                pools: vec![Pool {
                    range_start: Ipv4Addr::new(10, 0, 0, start),
                    range_end: Ipv4Addr::new(10, 0, 0, end),
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

    #[test]
    fn picks_a_virgin_address_when_the_pool_is_empty() {
        let config = config_with_pool(100, 102);
        let mut store = InMemoryLeaseStore::new();

        let lease = allocate_lease(&config, &mut store, "office", false).unwrap();
        assert_eq!(lease.ip_addr, Ipv4Addr::new(10, 0, 0, 100));
    }

    #[test]
    fn denies_unknown_clients_when_the_pool_forbids_them() {
        let mut config = config_with_pool(100, 102);
        config.shared_networks[0].pools[0].access.allow_unknown_clients = false;
        let mut store = InMemoryLeaseStore::new();

        assert!(allocate_lease(&config, &mut store, "office", false).is_none());
    }
}
