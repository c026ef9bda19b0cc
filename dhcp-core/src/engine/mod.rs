//! The request engine (C5): classifies inbound packets, resolves a lease
//! for them via `find_lease`/`allocate`, runs the `ack_lease` commit-and-reply
//! pipeline, and routes the reply per `dhcp_reply`'s unicast/broadcast table.
//!
//! This is where the wire codec, option store, scope evaluator and lease
//! index all meet; everything else in the crate exists to be called from
//! here.

pub mod allocate;
pub mod find_lease;

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::collab::{LeaseStore, PingProbe, Transport};
use crate::config::Config;
use crate::model::{now_secs, HardwareAddr, Lease, LeaseState, MessageType, Request};
use crate::scope::{collect_lifecycle_statements, effective_settings, execute_scope_chain};
use crate::store::{OptionState, Universe};
use crate::wire::options::codes;
use crate::wire::{self, DecodedFrame, Header};

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;

/// The server's static identity: the address it names itself with in
/// Server-Identifier and the one `dhcp_reply` sends from.
pub struct Engine<'a> {
    pub config: &'a Config,
    pub server_identifier: Ipv4Addr,
}

struct ReplyPlan {
    message_type: MessageType,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    out_opts: OptionState,
    requested_codes: Vec<u8>,
    /// The lease's `LeaseFlags::ms_null_termination` (§4.6): whether
    /// `cons_options` should NUL-terminate the last chunk of a text option.
    ms_null_termination: bool,
}

const DEFAULT_PARAMETER_LIST: [u8; 4] = [
    codes::SUBNET_MASK,
    codes::ROUTER,
    codes::DOMAIN_NAME_SERVER,
    codes::HOST_NAME,
];

impl<'a> Engine<'a> {
    pub fn new(config: &'a Config, server_identifier: Ipv4Addr) -> Self {
        Self { config, server_identifier }
    }

    /// `do_packet`: decodes one datagram and dispatches it. Malformed
    /// frames and packets on an unresolvable network are dropped silently
    /// (§7 Drop), except a REQUEST, which still has to reach `dhcprequest`
    /// so it can NAK a client asking for an address on the wrong wire.
    pub fn handle_datagram(
        &self,
        data: &[u8],
        receiving_interface: Ipv4Addr,
        store: &mut dyn LeaseStore,
        ping: &mut dyn PingProbe,
        transport: &mut dyn Transport,
    ) {
        let frame = match wire::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                log::info!("Dropping malformed datagram: {e}");
                return;
            }
        };

        let options_valid = frame.options_valid;
        let mut request = Self::request_from_frame(frame);

        let shared_network = match self.locate_network(&request, receiving_interface) {
            Some(name) => name,
            None if !options_valid || request.message_type == Some(MessageType::Request) => String::new(),
            None => {
                log::info!("Dropping packet with no resolvable shared network");
                return;
            }
        };
        request.shared_network = Some(shared_network.clone());
        request.matched_classes = self.classify(&request);

        if !options_valid {
            self.bootp(&request, &shared_network, store, ping, transport);
            return;
        }

        match request.message_type {
            Some(MessageType::Discover) => self.dhcpdiscover(&request, &shared_network, store, ping, transport),
            Some(MessageType::Request) => self.dhcprequest(&request, &shared_network, store, ping, transport),
            Some(MessageType::Decline) => self.dhcpdecline(&request, &shared_network, store),
            Some(MessageType::Release) => self.dhcprelease(&request, &shared_network, store),
            Some(MessageType::Inform) => self.dhcpinform(&request, &shared_network, store, transport),
            other => log::info!("Ignoring unsupported message type {other:?}"),
        }
    }

    fn request_from_frame(frame: DecodedFrame) -> Request {
        let message_type = frame
            .options
            .get(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE)
            .and_then(|v| v.first())
            .copied()
            .and_then(MessageType::from_u8);

        let got_requested_address = frame.options.get(Universe::Dhcp, codes::REQUESTED_IP_ADDRESS).is_some();

        let hlen = frame.header.hlen.min(16) as usize;
        let hardware_addr = HardwareAddr::new(frame.header.htype, &frame.header.chaddr[..hlen])
            .unwrap_or(HardwareAddr { htype: frame.header.htype, hlen: 0, addr: [0; 16] });

        Request {
            message_type,
            hops: frame.header.hops,
            xid: frame.header.xid,
            secs: frame.header.secs,
            broadcast: frame.header.broadcast,
            ciaddr: frame.header.ciaddr,
            yiaddr: frame.header.yiaddr,
            siaddr: frame.header.siaddr,
            giaddr: frame.header.giaddr,
            hardware_addr,
            options_valid: frame.options_valid,
            options: frame.options,
            agent_options: frame.agent_options,
            known: false,
            authenticated: false,
            got_requested_address,
            shared_network: None,
            matched_classes: Vec::new(),
        }
    }

    /// `locate_network`: a relayed packet names its subnet via `giaddr`;
    /// otherwise the receiving interface's own address stands in for it.
    fn locate_network(&self, request: &Request, receiving_interface: Ipv4Addr) -> Option<String> {
        let lookup_ip = if !request.giaddr.is_unspecified() {
            request.giaddr
        } else {
            receiving_interface
        };

        self.config.find_subnet_containing(lookup_ip).map(|s| s.shared_network.clone())
    }

    /// Builds the scope chain `execute_statements_in_scope` walks: global →
    /// shared-network → subnet → pool → classes (declared-last first, so the
    /// earliest-declared matching class is applied last and wins, §4.3) →
    /// host.
    fn scope_chain<'c>(
        &'c self,
        shared_network: &str,
        lease: Option<&Lease>,
        matched_classes: &[String],
    ) -> Vec<&'c crate::model::Group> {
        let mut groups = vec![&self.config.global];

        if let Some(net) = self.config.find_shared_network(shared_network) {
            groups.push(&net.group);

            if let Some(subnet) = self
                .config
                .subnets
                .iter()
                .find(|s| s.shared_network == shared_network && Some(s.network) == lease.map(|l| l.subnet))
            {
                groups.push(&subnet.group);
            }

            if let Some(pool) = lease.and_then(|l| l.pool).and_then(|idx| net.pools.get(idx)) {
                groups.push(&pool.group);
            }
        }

        for name in matched_classes.iter().rev() {
            if let Some(class) = self.config.find_class(name) {
                groups.push(&class.group);
            }
        }

        if let Some(host_name) = lease.and_then(|l| l.host.as_deref()) {
            if let Some(host) = self.config.hosts.iter().find(|h| h.name == host_name) {
                groups.push(&host.group);
            }
        }

        groups
    }

    fn effective_settings(
        &self,
        shared_network: &str,
        lease: Option<&Lease>,
        matched_classes: &[String],
    ) -> crate::model::GroupSettings {
        effective_settings(&self.scope_chain(shared_network, lease, matched_classes))
    }

    /// Classifies a packet against every configured class (§3 "matched class
    /// references"): a class applies when the packet carries exactly its
    /// `matches` option value. Order follows configuration-declaration
    /// order; `scope_chain` is responsible for applying them in reverse.
    fn classify(&self, request: &Request) -> Vec<String> {
        self.config
            .classes
            .iter()
            .filter(|class| {
                request.options.get(class.matches.universe, class.matches.code) == Some(class.matches.equals.as_slice())
            })
            .map(|class| class.name.clone())
            .collect()
    }

    fn dhcpdiscover(
        &self,
        request: &Request,
        shared_network: &str,
        store: &mut dyn LeaseStore,
        ping: &mut dyn PingProbe,
        transport: &mut dyn Transport,
    ) {
        let result = find_lease::find_lease(self.config, store, shared_network, request);
        let lease = result
            .lease
            .or_else(|| allocate::allocate_lease(self.config, store, shared_network, result.known));

        let Some(lease) = lease else {
            log::info!("No address available in {shared_network} for a DISCOVER");
            return;
        };

        if let Some(plan) = self.ack_lease(request, shared_network, lease, MessageType::Offer, result.known, store, ping) {
            self.dhcp_reply(request, plan, transport);
        }
    }

    /// `dhcprequest`: the classification table decides only whether we are
    /// entitled to NAK when nothing was found — `find_lease` has already
    /// applied the SELECTING/INIT-REBOOT/RENEWING/REBINDING distinctions via
    /// `ciaddr`/Requested-Address/`giaddr`, since each case maps to exactly
    /// which of its candidate sources may be consulted.
    fn dhcprequest(
        &self,
        request: &Request,
        shared_network: &str,
        store: &mut dyn LeaseStore,
        ping: &mut dyn PingProbe,
        transport: &mut dyn Transport,
    ) {
        let result = find_lease::find_lease(self.config, store, shared_network, request);
        let authoritative = self
            .effective_settings(shared_network, None, &request.matched_classes)
            .authoritative
            .unwrap_or(false);

        match result.lease {
            Some(lease) => {
                if let Some(plan) =
                    self.ack_lease(request, shared_network, lease, MessageType::Ack, result.known, store, ping)
                {
                    self.dhcp_reply(request, plan, transport);
                }
            }
            None if result.ours && authoritative => {
                self.nak_lease(request, transport, "requested address is not available");
            }
            None => {
                log::info!("Ignoring a REQUEST we cannot satisfy on a non-authoritative network");
            }
        }
    }

    fn dhcpdecline(&self, request: &Request, shared_network: &str, store: &mut dyn LeaseStore) {
        let Some(ip) = find_lease::requested_ip(request) else {
            return;
        };

        let settings = self.effective_settings(shared_network, None, &request.matched_classes);
        if settings.deny_declines.unwrap_or(false) {
            log::info!("Ignoring DECLINE for {ip}: deny-declines is set");
            return;
        }

        if let Err(e) = store.abandon_lease(ip, "client declined the offered address") {
            log::warn!("Failed to mark {ip} abandoned: {e}");
        }
    }

    fn dhcprelease(&self, request: &Request, _shared_network: &str, store: &mut dyn LeaseStore) {
        let uid = find_lease::client_id(request);

        let lease = store
            .find_by_uid(&uid)
            .into_iter()
            .next()
            .or_else(|| (!request.ciaddr.is_unspecified()).then(|| store.find_by_ip(request.ciaddr)).flatten());

        let Some(lease) = lease else {
            return;
        };

        if lease.is_expired(now_secs()) {
            return;
        }

        if let Err(e) = store.release_lease(lease.ip_addr) {
            log::warn!("Failed to release {}: {e}", lease.ip_addr);
        }
    }

    /// `dhcpinform`: authoritative-subnets-only, synthesises an option set
    /// the way `ack_lease` does but commits no lease — the client already
    /// has an address of its own choosing and only wants configuration.
    fn dhcpinform(&self, request: &Request, shared_network: &str, store: &mut dyn LeaseStore, transport: &mut dyn Transport) {
        let settings = self.effective_settings(shared_network, None, &request.matched_classes);
        if !settings.authoritative.unwrap_or(false) {
            log::info!("Ignoring INFORM on non-authoritative network {shared_network}");
            return;
        }
        let _ = store;

        let mut out_opts = OptionState::default();
        out_opts.set_agent_options(&request.agent_options);

        let groups = self.scope_chain(shared_network, None, &request.matched_classes);
        execute_scope_chain(&groups, request, None, &mut out_opts);

        out_opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![MessageType::Ack as u8]);
        let server_id = settings.server_identifier.unwrap_or(self.server_identifier);
        out_opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, server_id.octets().to_vec());

        let requested_codes = request
            .options
            .get(Universe::Dhcp, codes::PARAMETER_REQUEST_LIST)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        let plan = ReplyPlan {
            message_type: MessageType::Ack,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: settings.next_server.unwrap_or(server_id),
            out_opts,
            requested_codes,
        };

        self.dhcp_reply(request, plan, transport);
    }

    fn bootp(
        &self,
        request: &Request,
        shared_network: &str,
        store: &mut dyn LeaseStore,
        ping: &mut dyn PingProbe,
        transport: &mut dyn Transport,
    ) {
        if shared_network.is_empty() {
            log::info!("Dropping plain BOOTP request with no resolvable shared network");
            return;
        }

        let result = find_lease::find_lease(self.config, store, shared_network, request);
        let Some(mut lease) = result
            .lease
            .or_else(|| allocate::allocate_lease(self.config, store, shared_network, result.known))
        else {
            return;
        };
        lease.flags.bootp_lease = true;

        if let Some(plan) = self.ack_lease(request, shared_network, lease, MessageType::Ack, result.known, store, ping) {
            self.dhcp_reply(request, plan, transport);
        }
    }

    /// `ack_lease`: the fifteen-step commit-and-populate pipeline shared by
    /// OFFER and ACK (and the BOOTP degenerate case, which calls this with
    /// `reply_type = Ack`). Returns `None` wherever the spec calls for a
    /// silent drop instead of a reply.
    #[allow(clippy::too_many_arguments)]
    fn ack_lease(
        &self,
        request: &Request,
        shared_network: &str,
        mut lease: Lease,
        reply_type: MessageType,
        known: bool,
        store: &mut dyn LeaseStore,
        ping: &mut dyn PingProbe,
    ) -> Option<ReplyPlan> {
        // Steps 1-2 (§4.5): refuse re-entry while a reply is already in
        // flight for this lease, then claim it for the duration of this call.
        if lease.state.is_some() {
            log::info!("Dropping re-entrant ack_lease for {}", lease.ip_addr);
            return None;
        }
        lease.state = Some(LeaseState {
            offer: reply_type == MessageType::Offer,
        });

        let settings = self.effective_settings(shared_network, Some(&lease), &request.matched_classes);

        if !known && !settings.boot_unknown_clients.unwrap_or(true) {
            log::info!("Dropping reply for an unknown client: boot-unknown-clients is false");
            return None;
        }
        if lease.flags.bootp_lease && !settings.allow_bootp.unwrap_or(true) {
            log::info!("Dropping BOOTP reply: allow-bootp is false");
            return None;
        }
        if !settings.allow_booting.unwrap_or(true) {
            log::info!("Dropping reply: allow-booting is false");
            return None;
        }

        if reply_type == MessageType::Offer {
            if let Some(min_secs) = settings.min_secs {
                if request.secs < min_secs {
                    log::info!("Dropping OFFER: client secs {} below min-secs {min_secs}", request.secs);
                    return None;
                }
            }
        }

        if reply_type == MessageType::Ack {
            if settings.one_lease_per_client.unwrap_or(false) {
                if let Some(uid) = lease.uid.clone() {
                    for other in store.find_by_uid(&uid) {
                        if other.ip_addr != lease.ip_addr {
                            let _ = store.release_lease(other.ip_addr);
                        }
                    }
                }
            }

            // Without `allow-duplicates`, the same hardware address never
            // holds more than one active lease even across uids.
            if !settings.allow_duplicates.unwrap_or(false) {
                for other in store.find_by_hw(&request.hardware_addr) {
                    if other.ip_addr != lease.ip_addr {
                        let _ = store.release_lease(other.ip_addr);
                    }
                }
            }
        }

        let now = now_secs();
        let requested_time = request
            .options
            .get(Universe::Dhcp, codes::IP_ADDRESS_LEASE_TIME)
            .filter(|v| v.len() == 4)
            .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]));

        let lease_time = if lease.flags.bootp_lease {
            settings.bootp_lease_length.unwrap_or(crate::model::MAX_TIME)
        } else {
            let base = requested_time
                .unwrap_or_else(|| settings.default_lease_time.unwrap_or(crate::model::DEFAULT_DEFAULT_LEASE_TIME));
            let min = settings.min_lease_time.unwrap_or(0);
            let max = settings.max_lease_time.unwrap_or(crate::model::MAX_TIME);
            base.clamp(min, max)
        };

        if let Some(cid) = request.options.get(Universe::Dhcp, codes::CLIENT_IDENTIFIER) {
            lease.uid = Some(cid.to_vec());
        }
        lease.hardware_addr = Some(request.hardware_addr);
        lease.starts = now;
        lease.timestamp = now;
        lease.ends = now.saturating_add(lease_time);
        lease.offered_expiry = lease.ends;

        if let Some(billed) = &lease.billing_class {
            if !request.matched_classes.iter().any(|c| c == billed) {
                lease.billing_class = None;
            }
        }
        if lease.billing_class.is_none() {
            for name in &request.matched_classes {
                let Some(class) = self.config.find_class(name) else { continue };
                let Some(limit) = class.lease_limit else { continue };
                let billed = store.count_billed(name);
                if billed >= limit {
                    log::info!("Dropping reply: class {name} is at its lease limit of {limit}");
                    return None;
                }
                lease.billing_class = Some(name.clone());
                break;
            }
        }

        let groups = self.scope_chain(shared_network, Some(&lease), &request.matched_classes);

        // Step 4: clear any on_commit/on_expiry/on_release left from a
        // previous commit, then re-populate from the scope chain.
        let (on_commit, on_expiry, on_release) = collect_lifecycle_statements(&groups);
        lease.on_commit = on_commit;
        lease.on_expiry = on_expiry;
        lease.on_release = on_release;

        if reply_type == MessageType::Offer && !lease.flags.static_lease {
            let due_for_ping = lease.last_ping.map(|t| now.saturating_sub(t) > 60).unwrap_or(true);
            if due_for_ping {
                lease.last_ping = Some(now);
                if ping.icmp_echorequest(lease.ip_addr) {
                    log::warn!("{} answered an echo request meant to be free; abandoning it", lease.ip_addr);
                    let _ = store.abandon_lease(lease.ip_addr, "answered a pre-offer ICMP echo");
                    return None;
                }
            }
        }

        // `icmp_echorequest` above always resolves synchronously in this
        // engine, so the re-entrancy window step 1/2 guard against never
        // actually spans a real suspension; release it before persisting so
        // the next DISCOVER for this client isn't refused forever.
        lease.state = None;

        let commit = reply_type == MessageType::Ack || lease.flags.bootp_lease;
        if let Err(e) = store.supersede_lease(lease.clone(), commit) {
            log::warn!("Failed to persist lease for {}: {e}", lease.ip_addr);
            return None;
        }

        let mut out_opts = OptionState::default();
        out_opts.set_agent_options(&request.agent_options);

        execute_scope_chain(&groups, request, Some(&lease), &mut out_opts);

        out_opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![reply_type as u8]);

        let server_id = settings.server_identifier.unwrap_or(self.server_identifier);
        out_opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, server_id.octets().to_vec());

        out_opts.supersede(Universe::Dhcp, codes::IP_ADDRESS_LEASE_TIME, lease_time.to_be_bytes().to_vec());
        out_opts.default(Universe::Dhcp, codes::RENEWAL_TIME, (lease_time / 2).to_be_bytes().to_vec());
        out_opts.default(
            Universe::Dhcp,
            codes::REBINDING_TIME,
            (((lease_time as u64) * 7 / 8) as u32).to_be_bytes().to_vec(),
        );

        if out_opts.get(Universe::Dhcp, codes::SUBNET_MASK).is_none() {
            if let Some(subnet) = self.config.subnets.iter().find(|s| s.network == lease.subnet) {
                out_opts.default(Universe::Dhcp, codes::SUBNET_MASK, subnet.netmask.octets().to_vec());
            }
        }

        let siaddr = settings.next_server.unwrap_or(server_id);

        let requested_codes = request
            .options
            .get(Universe::Dhcp, codes::PARAMETER_REQUEST_LIST)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        Some(ReplyPlan {
            message_type: reply_type,
            yiaddr: lease.ip_addr,
            siaddr,
            out_opts,
            requested_codes,
            ms_null_termination: lease.flags.ms_null_termination,
        })
    }

    /// `nak_lease`: a minimal reply — message type, server identifier and a
    /// human-readable reason in the Message option — broadcast-flagged
    /// unconditionally since the client that sent this REQUEST has, by
    /// definition, no usable address of its own yet.
    fn nak_lease(&self, request: &Request, transport: &mut dyn Transport, message: &str) {
        let mut out_opts = OptionState::default();
        out_opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![MessageType::Nak as u8]);
        out_opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, self.server_identifier.octets().to_vec());
        out_opts.supersede(Universe::Dhcp, codes::MESSAGE, message.as_bytes().to_vec());

        let header = Header {
            reply: true,
            htype: request.hardware_addr.htype,
            hlen: request.hardware_addr.hlen,
            hops: request.hops,
            xid: request.xid,
            secs: request.secs,
            broadcast: true,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.hardware_addr.addr,
        };

        let assembled = crate::reply::cons_options(&out_opts, &[], &[], crate::reply::MINIMUM_MESSAGE_SIZE, false);
        let bytes = wire::encode(&header, &assembled.options, &assembled.file, &assembled.sname);

        let from = SocketAddrV4::new(self.server_identifier, SERVER_PORT);
        let to = if !request.giaddr.is_unspecified() {
            SocketAddrV4::new(request.giaddr, SERVER_PORT)
        } else {
            SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT)
        };

        log::info!("NAK {to}: {message}");
        let _ = transport.send_packet(from, to, &bytes);
    }

    /// `dhcp_reply`'s routing table: a relayed packet always goes back to
    /// its relay; otherwise we try to reach the client directly before
    /// falling back to a broadcast, per the giaddr/ciaddr/broadcast-flag
    /// precedence of §4.5.
    fn dhcp_reply(&self, request: &Request, plan: ReplyPlan, transport: &mut dyn Transport) {
        let mms = crate::reply::resolve_max_message_size(
            request
                .options
                .get(Universe::Dhcp, codes::MAX_MESSAGE_SIZE)
                .filter(|v| v.len() == 2)
                .map(|v| u16::from_be_bytes([v[0], v[1]])),
            1500,
        );

        let assembled = crate::reply::cons_options(
            &plan.out_opts,
            &plan.requested_codes,
            &DEFAULT_PARAMETER_LIST,
            mms,
            plan.ms_null_termination,
        );

        let header = Header {
            reply: true,
            htype: request.hardware_addr.htype,
            hlen: request.hardware_addr.hlen,
            hops: request.hops,
            xid: request.xid,
            secs: request.secs,
            broadcast: request.broadcast,
            ciaddr: request.ciaddr,
            yiaddr: plan.yiaddr,
            siaddr: plan.siaddr,
            giaddr: request.giaddr,
            chaddr: request.hardware_addr.addr,
        };

        let bytes = wire::encode(&header, &assembled.options, &assembled.file, &assembled.sname);
        let from = SocketAddrV4::new(self.server_identifier, SERVER_PORT);

        let result = if !request.giaddr.is_unspecified() {
            transport.send_packet(from, SocketAddrV4::new(request.giaddr, SERVER_PORT), &bytes)
        } else if !request.ciaddr.is_unspecified() && plan.message_type == MessageType::Ack && !request.broadcast {
            transport.send_packet(from, SocketAddrV4::new(request.ciaddr, CLIENT_PORT), &bytes)
        } else if !request.broadcast {
            transport.send_packet_no_arp(
                from,
                SocketAddrV4::new(plan.yiaddr, CLIENT_PORT),
                &request.hardware_addr,
                &bytes,
            )
        } else {
            transport.send_packet(from, SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT), &bytes)
        };

        if let Err(e) = result {
            log::warn!("Failed to send {:?} for xid {:#x}: {e}", plan.message_type, request.xid);
        }
    }
}
