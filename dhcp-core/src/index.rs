//! The lease index (C4): three secondary indexes over the lease table
//! (by-IP, by-client-id, by-hardware-address) plus a per-pool
//! expiry-ordered chain.
//!
//! The original engine threads these through intrusive `n_uid`/`n_hw`/
//! `prev`/`next` fields on the `Lease` struct itself (§9). This rewrite
//! follows the re-architecture the spec already prescribes: an arena of
//! owned `Lease` records (keyed by IP, since by-IP is already the unique
//! index) with the other two indexes as plain hash maps of IP lists, and
//! the per-pool expiry chain as a sorted set rather than a linked list.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use crate::model::{ClientId, HardwareAddr, Lease, Seconds};

#[derive(Default)]
pub struct LeaseIndex {
    by_ip: HashMap<Ipv4Addr, Lease>,
    by_uid: HashMap<ClientId, Vec<Ipv4Addr>>,
    by_hw: HashMap<HardwareAddr, Vec<Ipv4Addr>>,
    /// Per-pool expiry order: `(ends, ip)` so the earliest-expiring lease in
    /// a pool sorts first; `pop_first` is `allocate_lease`'s "pop from the
    /// tail" (spec's `last_lease`).
    pool_expiry: HashMap<usize, BTreeSet<(Seconds, Ipv4Addr)>>,
}

impl LeaseIndex {
    pub fn get(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.by_ip.get(&ip)
    }

    pub fn get_mut(&mut self, ip: Ipv4Addr) -> Option<&mut Lease> {
        self.by_ip.get_mut(&ip)
    }

    pub fn by_uid(&self, uid: &[u8]) -> Vec<&Lease> {
        self.by_uid
            .get(uid)
            .into_iter()
            .flatten()
            .filter_map(|ip| self.by_ip.get(ip))
            .collect()
    }

    pub fn by_hw(&self, hw: &HardwareAddr) -> Vec<&Lease> {
        self.by_hw
            .get(hw)
            .into_iter()
            .flatten()
            .filter_map(|ip| self.by_ip.get(ip))
            .collect()
    }

    /// The tail of a pool's expiry chain: the lease with the earliest
    /// `ends`, or `None` if the pool has no leases yet.
    pub fn pool_tail(&self, pool: usize) -> Option<&Lease> {
        self.pool_expiry
            .get(&pool)
            .and_then(|set| set.iter().next())
            .and_then(|(_, ip)| self.by_ip.get(ip))
    }

    /// Inserts or replaces the lease at `lease.ip_addr`, relinking all three
    /// secondary indexes and the owning pool's expiry chain. Callers expect
    /// that on return all indexes reflect the new state (§4.4).
    pub fn supersede(&mut self, lease: Lease) {
        self.unlink(lease.ip_addr);

        if let Some(uid) = lease.uid.as_ref().filter(|u| !u.is_empty()) {
            self.by_uid.entry(uid.clone()).or_default().push(lease.ip_addr);
        }

        if let Some(hw) = lease.hardware_addr.filter(|h| h.hlen > 0) {
            self.by_hw.entry(hw).or_default().push(lease.ip_addr);
        }

        if let Some(pool) = lease.pool {
            self.pool_expiry
                .entry(pool)
                .or_default()
                .insert((lease.ends, lease.ip_addr));
        }

        self.by_ip.insert(lease.ip_addr, lease);
    }

    /// Removes `ip` from every index it's linked into (used by
    /// `release_lease`/`dissociate_lease` and before `supersede` relinks).
    pub fn unlink(&mut self, ip: Ipv4Addr) {
        if let Some(old) = self.by_ip.get(&ip) {
            if let Some(uid) = old.uid.as_ref() {
                if let Some(chain) = self.by_uid.get_mut(uid) {
                    chain.retain(|i| *i != ip);
                }
            }

            if let Some(hw) = old.hardware_addr {
                if let Some(chain) = self.by_hw.get_mut(&hw) {
                    chain.retain(|i| *i != ip);
                }
            }

            if let Some(pool) = old.pool {
                if let Some(set) = self.pool_expiry.get_mut(&pool) {
                    set.remove(&(old.ends, ip));
                }
            }
        }
    }

    pub fn remove(&mut self, ip: Ipv4Addr) -> Option<Lease> {
        self.unlink(ip);
        self.by_ip.remove(&ip)
    }

    pub fn all(&self) -> impl Iterator<Item = &Lease> {
        self.by_ip.values()
    }
}
