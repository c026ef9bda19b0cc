//! The data model shared by every other module: hardware/client identities,
//! leases, pools, the subnet/shared-network/group scope hierarchy, host
//! declarations and relay-agent sub-option lists.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::scope::Expression;
use crate::store::OptionState;

/// Seconds since the Unix epoch, matching the original engine's `cur_time`.
pub type Seconds = u32;

pub fn now_secs() -> Seconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Seconds)
        .unwrap_or(0)
}

/// `MAX_TIME`: the "infinite lease" sentinel used by BOOTP leases.
pub const MAX_TIME: Seconds = u32::MAX;

pub const DEFAULT_DEFAULT_LEASE_TIME: Seconds = 43200;

/// A hardware address, `htype`/`hlen` plus up to 16 address bytes, mirroring
/// the `chaddr` field of the BOOTP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HardwareAddr {
    pub htype: u8,
    pub hlen: u8,
    pub addr: [u8; 16],
}

impl HardwareAddr {
    pub fn new(htype: u8, raw: &[u8]) -> Option<Self> {
        if raw.len() > 16 {
            return None;
        }

        let mut addr = [0u8; 16];
        addr[..raw.len()].copy_from_slice(raw);

        Some(Self {
            htype,
            hlen: raw.len() as u8,
            addr,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.addr[..self.hlen as usize]
    }
}

/// Client-Identifier bytes (option 61), or none if the client didn't send one.
pub type ClientId = Vec<u8>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaseFlags {
    pub static_lease: bool,
    pub bootp_lease: bool,
    pub abandoned: bool,
    pub ms_null_termination: bool,
}

/// A transient record of reply-in-flight state, held on a `Lease` for the
/// span of one `ack_lease` call. `ack_lease` step 1 refuses re-entry while
/// this is `Some`, and step 2 allocates it before doing anything else
/// (`spec.md §4.5`, §5's "engine's only real state held across events").
/// This engine's `PingProbe::icmp_echorequest` always resolves synchronously
/// (see `collab.rs`), so there is no real suspension window for the guard to
/// span in this rewrite: `ack_lease` clears it again before the lease is
/// persisted, rather than leaving it set for a callback that never comes.
/// A collaborator backed by a real async ping could hold a lease across that
/// gap by simply not clearing it until the timeout fires.
#[derive(Clone, Debug)]
pub struct LeaseState {
    pub offer: bool,
}

#[derive(Clone, Debug)]
pub struct Lease {
    pub ip_addr: Ipv4Addr,
    pub starts: Seconds,
    pub ends: Seconds,
    pub timestamp: Seconds,
    pub offered_expiry: Seconds,
    pub subnet: Ipv4Addr,
    pub pool: Option<usize>,
    pub host: Option<String>,
    pub billing_class: Option<String>,
    pub hardware_addr: Option<HardwareAddr>,
    pub uid: Option<ClientId>,
    pub flags: LeaseFlags,
    pub state: Option<LeaseState>,
    /// Last time (§4.5 step 15) this address was ICMP-pinged before being
    /// offered; `None` if it never has been. Gates the "last ping > 60s ago"
    /// throttle so a flurry of DISCOVERs for the same address doesn't ping
    /// it on every single one.
    pub last_ping: Option<Seconds>,
    /// Statements to run when the lease commits/expires/releases (§3's Lease
    /// data model). Cleared and re-populated from the scope chain on every
    /// `ack_lease` call (step 4); see `scope::collect_lifecycle_statements`.
    /// Nothing in this rewrite executes them — their only out-of-scope
    /// consumer in the original system is DDNS update (`spec.md`'s "optional
    /// DNS update" collaborator), so they are carried as data only.
    pub on_commit: Vec<OptionStatement>,
    pub on_expiry: Vec<OptionStatement>,
    pub on_release: Vec<OptionStatement>,
}

impl Lease {
    pub fn is_expired(&self, now: Seconds) -> bool {
        self.ends <= now
    }

    /// A mock, unlinked lease synthesised for a fixed host-declaration binding.
    pub fn mock_static(ip_addr: Ipv4Addr, subnet: Ipv4Addr, host: &str) -> Self {
        Self {
            ip_addr,
            starts: 0,
            ends: MAX_TIME,
            timestamp: 0,
            offered_expiry: MAX_TIME,
            subnet,
            pool: None,
            host: Some(host.to_string()),
            billing_class: None,
            hardware_addr: None,
            uid: None,
            flags: LeaseFlags {
                static_lease: true,
                ..Default::default()
            },
            state: None,
            last_ping: None,
            on_commit: Vec::new(),
            on_expiry: Vec::new(),
            on_release: Vec::new(),
        }
    }
}

/// Which clients a pool will hand addresses to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolAccess {
    pub allow_unknown_clients: bool,
    pub deny_known_clients: bool,
    pub allow_dynamic_bootp: bool,
}

impl PoolAccess {
    pub fn permits(&self, known_client: bool) -> bool {
        if known_client {
            !self.deny_known_clients
        } else {
            self.allow_unknown_clients
        }
    }
}

#[derive(Clone, Debug)]
pub struct Pool {
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub access: PoolAccess,
    pub group: Group,
}

impl Pool {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let pos: u32 = ip.into();
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();

        pos >= start && pos <= end
    }
}

/// Configuration knobs that inherit top-down through the scope chain: a
/// subnet's `Group` can leave a field `None` to fall back to its
/// shared-network's, and so on up to the global group.
#[derive(Clone, Debug, Default)]
pub struct GroupSettings {
    pub authoritative: Option<bool>,
    pub allow_bootp: Option<bool>,
    pub allow_booting: Option<bool>,
    pub boot_unknown_clients: Option<bool>,
    pub deny_declines: Option<bool>,
    pub one_lease_per_client: Option<bool>,
    pub allow_duplicates: Option<bool>,
    pub min_secs: Option<u16>,
    pub default_lease_time: Option<Seconds>,
    pub min_lease_time: Option<Seconds>,
    pub max_lease_time: Option<Seconds>,
    pub bootp_lease_length: Option<Seconds>,
    pub bootp_lease_cutoff: Option<Seconds>,
    pub get_lease_hostnames: Option<bool>,
    pub use_host_decl_names: Option<bool>,
    pub always_broadcast: Option<bool>,
    pub filename: Option<String>,
    pub server_name: Option<String>,
    pub next_server: Option<Ipv4Addr>,
    pub server_identifier: Option<Ipv4Addr>,
}

macro_rules! inherit {
    ($child:expr, $parent:expr, $field:ident) => {
        $child.$field.clone().or_else(|| $parent.$field.clone())
    };
}

impl GroupSettings {
    pub fn merge_over(&self, parent: &GroupSettings) -> GroupSettings {
        GroupSettings {
            authoritative: inherit!(self, parent, authoritative),
            allow_bootp: inherit!(self, parent, allow_bootp),
            allow_booting: inherit!(self, parent, allow_booting),
            boot_unknown_clients: inherit!(self, parent, boot_unknown_clients),
            deny_declines: inherit!(self, parent, deny_declines),
            one_lease_per_client: inherit!(self, parent, one_lease_per_client),
            allow_duplicates: inherit!(self, parent, allow_duplicates),
            min_secs: inherit!(self, parent, min_secs),
            default_lease_time: inherit!(self, parent, default_lease_time),
            min_lease_time: inherit!(self, parent, min_lease_time),
            max_lease_time: inherit!(self, parent, max_lease_time),
            bootp_lease_length: inherit!(self, parent, bootp_lease_length),
            bootp_lease_cutoff: inherit!(self, parent, bootp_lease_cutoff),
            get_lease_hostnames: inherit!(self, parent, get_lease_hostnames),
            use_host_decl_names: inherit!(self, parent, use_host_decl_names),
            always_broadcast: inherit!(self, parent, always_broadcast),
            filename: inherit!(self, parent, filename),
            server_name: inherit!(self, parent, server_name),
            next_server: inherit!(self, parent, next_server),
            server_identifier: inherit!(self, parent, server_identifier),
        }
    }
}

/// A single `default`/`supersede`/`append`/`prepend` option assignment, the
/// unevaluated form a configuration scope carries until `execute_statements`
/// applies it (see `scope.rs`).
#[derive(Clone, Debug)]
pub struct OptionStatement {
    pub universe: crate::store::Universe,
    pub code: u8,
    pub op: crate::store::SetOp,
    pub expr: Expression,
}

/// A level in the scope chain: global / subnet / pool / class / host all use
/// this same shape (a list of option statements plus inheritable settings).
#[derive(Clone, Debug, Default)]
pub struct Group {
    pub name: String,
    pub settings: GroupSettings,
    pub statements: Vec<OptionStatement>,
    /// This scope's contribution to the lease's on_commit/on_expiry/
    /// on_release statement lists (§3), collected in scope-chain order by
    /// `scope::collect_lifecycle_statements`.
    pub on_commit: Vec<OptionStatement>,
    pub on_expiry: Vec<OptionStatement>,
    pub on_release: Vec<OptionStatement>,
}

#[derive(Clone, Debug)]
pub struct Subnet {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub shared_network: String,
    pub group: Group,
}

impl Subnet {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let net: u32 = self.network.into();
        let mask: u32 = self.netmask.into();
        let addr: u32 = ip.into();

        (addr & mask) == (net & mask)
    }
}

#[derive(Clone, Debug)]
pub struct SharedNetwork {
    pub name: String,
    pub subnets: Vec<Ipv4Addr>,
    pub pools: Vec<Pool>,
    pub group: Group,
}

/// A matching rule for packet classification (§3 "matched class
/// references"): a class applies to a packet when the named option carries
/// exactly the given value. ISC `dhcpd`'s `match if` clause supports
/// arbitrary boolean expressions; this rewrite keeps the common
/// equality-on-an-option case, which covers vendor-class-identifier and
/// user-class classification, the two actually used in `original_source/`.
#[derive(Clone, Debug)]
pub struct ClassMatch {
    pub universe: crate::store::Universe,
    pub code: u8,
    pub equals: Vec<u8>,
}

/// A client class (§3/§4.3): a named scope that applies to a packet when
/// its `matches` rule is satisfied, optionally capping how many leases may
/// be billed to it at once (§4.5 step 9).
#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub matches: ClassMatch,
    pub lease_limit: Option<u32>,
    pub group: Group,
}

#[derive(Clone, Debug)]
pub struct HostDecl {
    pub name: String,
    pub client_id: Option<ClientId>,
    pub hardware_addr: Option<HardwareAddr>,
    pub fixed_addr: Option<Ipv4Addr>,
    pub group: Group,
}

#[derive(Clone, Debug, Default)]
pub struct AgentSubOption {
    pub code: u8,
    pub data: Vec<u8>,
}

/// An ordered list of raw Relay-Agent-Information sub-TLVs, preserved
/// verbatim from ingress and re-emitted on egress per RFC 3046.
#[derive(Clone, Debug, Default)]
pub struct AgentOptions(pub Vec<AgentSubOption>);

impl AgentOptions {
    pub fn find(&self, code: u8) -> Option<&[u8]> {
        self.0
            .iter()
            .rev()
            .find(|o| o.code == code)
            .map(|o| o.data.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The decoded inbound unit plus the annotations the engine attaches while
/// classifying it. Read-only after `do_packet` finishes parsing; the
/// handler-local fields below are filled in by `locate_network`/dispatch.
#[derive(Clone, Debug)]
pub struct Request {
    pub message_type: Option<MessageType>,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub hardware_addr: HardwareAddr,
    pub options: OptionState,
    pub agent_options: AgentOptions,
    pub options_valid: bool,
    pub known: bool,
    pub authenticated: bool,
    pub got_requested_address: bool,
    pub shared_network: Option<String>,
    /// Names of every class (§3) whose `matches` rule this packet satisfies,
    /// in configuration-declaration order. `ack_lease`'s scope chain walks
    /// this list last-to-first so the earliest-declared class wins; billing
    /// (step 9) walks it in order looking for the first class with a
    /// `lease_limit`.
    pub matched_classes: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}
