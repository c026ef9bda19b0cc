//! External collaborator traits (§6): the engine calls these but never
//! implements them — network transmission, lease persistence, and ICMP
//! ping-before-offer all live on the other side of this boundary.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::model::{HardwareAddr, Lease};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("lease database write failed: {0}")]
    WriteFailed(String),
    #[error("no such lease for {0}")]
    NotFound(Ipv4Addr),
}

/// `supersede_lease`/`release_lease`/`abandon_lease`/`dissociate_lease` plus
/// the by-{ip,uid,hw} index queries of §6's collaborator table.
pub trait LeaseStore {
    fn find_by_ip(&self, ip: Ipv4Addr) -> Option<Lease>;
    fn find_by_uid(&self, uid: &[u8]) -> Vec<Lease>;
    fn find_by_hw(&self, hw: &crate::model::HardwareAddr) -> Vec<Lease>;
    fn pool_tail(&self, pool: usize) -> Option<Lease>;

    /// Count of currently-active leases billed against `class` (§4.5 step 9),
    /// for enforcing a class's `lease_limit`.
    fn count_billed(&self, class: &str) -> u32;

    /// Atomically updates in-memory indexes; if `commit`, also writes to the
    /// persistent store. Returns an error on DB failure (the pipeline treats
    /// that as a drop, per `ack_lease` step 11).
    fn supersede_lease(&mut self, lease: Lease, commit: bool) -> Result<(), DbError>;

    fn release_lease(&mut self, ip: Ipv4Addr) -> Result<(), DbError>;
    fn abandon_lease(&mut self, ip: Ipv4Addr, reason: &str) -> Result<(), DbError>;
    fn dissociate_lease(&mut self, ip: Ipv4Addr) -> Result<(), DbError>;
}

/// `send_packet(iface, pkt, raw, len, from, to, hw)`: transmits one
/// datagram. Non-blocking from the engine's point of view; the return
/// status is advisory, matching §6.
pub trait Transport {
    fn send_packet(&mut self, from: SocketAddrV4, to: SocketAddrV4, data: &[u8]) -> std::io::Result<()>;

    /// Send without relying on ARP resolution (the raw-socket "unicast
    /// without ARP" path of `dhcp_reply`'s routing table). `to_hw` is the
    /// client's hardware address straight out of `chaddr`, since a raw
    /// transport has to address the link layer itself instead of letting
    /// the kernel ARP for `to`. The default implementation just falls back
    /// to `send_packet`; a real transport backed by a raw socket overrides
    /// this to frame the IP/UDP headers itself via `dhcp-raw`.
    fn send_packet_no_arp(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        to_hw: &HardwareAddr,
        data: &[u8],
    ) -> std::io::Result<()> {
        let _ = to_hw;
        self.send_packet(from, to, data)
    }
}

/// `icmp_echorequest(ip)` / `add_timeout(when, fn, arg)`: ping-before-offer
/// collaboration. A real implementation needs a raw ICMP socket (elevated
/// privileges); `NoopPingProbe` always reports "no answer" so the address is
/// believed free, which is what a privilege-less default must assume.
pub trait PingProbe {
    /// Returns `true` if `ip` answered the echo request before the
    /// collaborator-defined timeout elapsed.
    fn icmp_echorequest(&mut self, ip: Ipv4Addr) -> bool;
}

#[derive(Default)]
pub struct NoopPingProbe;

impl PingProbe for NoopPingProbe {
    fn icmp_echorequest(&mut self, _ip: Ipv4Addr) -> bool {
        false
    }
}
