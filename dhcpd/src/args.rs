use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// A DHCP/BOOTP server daemon.
#[derive(Debug, Parser)]
#[command(name = "dhcpd", version, about)]
pub struct Args {
    /// Path to the pool/subnet/host configuration file (YAML).
    #[arg(long, short = 'c', env = "DHCPD_CONFIG")]
    pub config: PathBuf,

    /// Address this server is reachable at, and the address it serves from
    /// when no shared network is relayed in via `giaddr`.
    #[arg(long, env = "DHCPD_INTERFACE_ADDRESS")]
    pub interface_address: Ipv4Addr,

    /// Local address/port to bind the DHCP socket to.
    #[arg(long, default_value = "0.0.0.0:67", env = "DHCPD_BIND")]
    pub bind: String,

    /// Append-only lease journal. Without this, leases only live in memory
    /// and are lost on restart.
    #[arg(long, env = "DHCPD_LEASE_FILE")]
    pub lease_file: Option<PathBuf>,

    /// Network interface to open a raw `AF_PACKET` socket on, for reaching a
    /// freshly-leased client that can't yet answer ARP (Linux only, and
    /// needs `CAP_NET_RAW`). Without this, that path falls back to a normal
    /// unicast send.
    #[arg(long, env = "DHCPD_INTERFACE")]
    pub interface: Option<String>,
}
