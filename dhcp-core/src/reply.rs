//! The reply assembler (C6): turns an evaluated `OptionState` into the
//! option bytes of an outbound datagram. Handles the requested-parameter
//! priority list, maximum-message-size clamping, Option Overload placement
//! into the `file`/`sname` buffers when the main options area is too small,
//! RFC 3396 splitting of values over 255 bytes, and relay-agent sub-option
//! re-attachment.

use std::collections::HashSet;

use crate::model::AgentSubOption;
use crate::store::{OptionState, Universe};
use crate::wire::agent::encode_suboptions;
use crate::wire::options::codes;
use crate::wire::{FILE_LEN, SNAME_LEN};

/// The smallest IP datagram every IP implementation must be able to
/// reassemble (RFC 2131 §4.3.1); the floor for `resolve_max_message_size`.
pub const MINIMUM_MESSAGE_SIZE: usize = 576;

/// The five codes every reply leads with regardless of the client's
/// Parameter-Request-List (§4.6): message type, server identifier,
/// lease time, message text, and the requested address. Each is still
/// only emitted if `out_opts` actually carries a value for it.
const MANDATORY_CODES: [u8; 5] = [
    codes::DHCP_MESSAGE_TYPE,
    codes::SERVER_IDENTIFIER,
    codes::IP_ADDRESS_LEASE_TIME,
    codes::MESSAGE,
    codes::REQUESTED_IP_ADDRESS,
];

/// Parameter-Request-List codes beyond this many are ignored (§4.6).
const PRL_CEILING: usize = 300;

pub struct AssembledReply {
    pub options: Vec<u8>,
    pub file: [u8; FILE_LEN],
    pub sname: [u8; SNAME_LEN],
}

/// Clamps the client's requested Maximum-Message-Size (option 57) between
/// the RFC 2131 floor and the sending interface's MTU. Absent a request,
/// falls back to the floor — the conservative choice for an unknown link.
pub fn resolve_max_message_size(requested: Option<u16>, interface_mtu: u16) -> usize {
    let requested = requested.map(|v| v as usize).unwrap_or(MINIMUM_MESSAGE_SIZE);
    requested.clamp(MINIMUM_MESSAGE_SIZE, interface_mtu as usize)
}

fn available_in_options_area(max_message_size: usize) -> usize {
    max_message_size.saturating_sub(crate::wire::FIXED_HEADER_LEN + crate::wire::COOKIE.len())
}

/// Mandatory codes first. If the client sent a Parameter-Request-List,
/// it's honored next, truncated to `PRL_CEILING` entries. Otherwise
/// (BOOTP clients, or DHCP clients that didn't send one) the server's own
/// default list is used, followed by every other code the evaluated
/// option state actually carries — `present` — so nothing configured for
/// the client is silently dropped just because it didn't ask by name.
/// Duplicates and already-mandatory codes are dropped either way.
fn priority_list(requested: &[u8], defaults: &[u8], present: &[u8]) -> Vec<u8> {
    let mut seen = HashSet::new();
    let mut list = Vec::new();

    for &code in MANDATORY_CODES.iter() {
        if seen.insert(code) {
            list.push(code);
        }
    }

    if !requested.is_empty() {
        for &code in requested.iter().take(PRL_CEILING) {
            if seen.insert(code) {
                list.push(code);
            }
        }
    } else {
        for &code in defaults.iter().chain(present) {
            if seen.insert(code) {
                list.push(code);
            }
        }
    }

    list
}

/// Option codes whose value is text (format `'t'` in the original
/// collaborator's per-option format table): Host-Name and the NAK/ACK
/// Message string. `ms_null_termination` only has an effect on these.
fn is_text_option(code: u8) -> bool {
    matches!(code, codes::HOST_NAME | codes::MESSAGE)
}

/// RFC 3396: a value over 255 bytes becomes multiple TLVs of the same
/// code, reassembled by the client via concatenation. `null_terminate`
/// appends a trailing `\0` to the *last* chunk of a text-format option —
/// Microsoft bug compatibility (§4.6) some DHCP clients depend on.
fn encode_tlv_split(code: u8, value: &[u8], null_terminate: bool) -> Vec<Vec<u8>> {
    let null_terminate = null_terminate && is_text_option(code);

    if value.is_empty() {
        return vec![if null_terminate { vec![code, 1, 0] } else { vec![code, 0] }];
    }

    let mut chunks: Vec<Vec<u8>> = value
        .chunks(255)
        .map(|chunk| {
            let mut tlv = vec![code, chunk.len() as u8];
            tlv.extend_from_slice(chunk);
            tlv
        })
        .collect();

    if null_terminate {
        // A full 255-byte last chunk has no room left for the trailing
        // byte without overflowing the TLV's length field; it gets its own
        // one-byte chunk instead.
        match chunks.last_mut() {
            Some(last) if last[1] < 255 => {
                last.push(0);
                last[1] += 1;
            }
            _ => chunks.push(vec![code, 1, 0]),
        }
    }

    chunks
}

/// Greedily packs whole TLVs (never splitting one across a buffer
/// boundary) starting at `tlvs[start]`, up to `budget` bytes. Returns the
/// packed bytes and the index of the first TLV that didn't fit.
fn pack_tlvs_into(budget: usize, tlvs: &[Vec<u8>], start: usize) -> (Vec<u8>, usize) {
    let mut buf = Vec::new();
    let mut idx = start;

    while idx < tlvs.len() && buf.len() + tlvs[idx].len() <= budget {
        buf.extend_from_slice(&tlvs[idx]);
        idx += 1;
    }

    (buf, idx)
}

/// Spills TLVs that don't fit the main options area into `file`, then
/// `sname`, setting the Option Overload bits as each buffer is used.
/// Anything left over after `sname` is also full is dropped and logged —
/// a configuration asking for more option data than 236+128+64 bytes can
/// hold has no other recovery available at this layer.
fn split_with_overload(
    tlvs: &[Vec<u8>],
    budget: usize,
    file: &mut [u8; FILE_LEN],
    sname: &mut [u8; SNAME_LEN],
) -> Vec<u8> {
    const OVERLOAD_TLV_AND_END: usize = 3 + 1;

    let (main_body, next) = pack_tlvs_into(budget.saturating_sub(OVERLOAD_TLV_AND_END), tlvs, 0);
    let mut main = main_body;

    if next == tlvs.len() {
        main.push(codes::END);
        return main;
    }

    let mut overload = 0u8;

    let (file_body, next) = pack_tlvs_into(FILE_LEN - 1, tlvs, next);
    file[..file_body.len()].copy_from_slice(&file_body);
    file[file_body.len()] = codes::END;
    overload |= 0b01;

    if next < tlvs.len() {
        let (sname_body, next) = pack_tlvs_into(SNAME_LEN - 1, tlvs, next);
        sname[..sname_body.len()].copy_from_slice(&sname_body);
        sname[sname_body.len()] = codes::END;
        overload |= 0b10;

        if next < tlvs.len() {
            log::warn!(
                "reply options exceed overload capacity; {} option(s) dropped",
                tlvs.len() - next
            );
        }
    }

    main.push(codes::OPTION_OVERLOAD);
    main.push(1);
    main.push(overload);
    main.push(codes::END);
    main
}

/// Assembles the reply's option bytes from the evaluated outbound state.
/// `requested` is the client's Parameter-Request-List (option 55, may be
/// empty for BOOTP clients); `defaults` is whatever the configuration
/// wants sent even when not asked for. `ms_null_termination` is the lease's
/// `LeaseFlags` bit (§4.6): when set, the last RFC 3396 chunk of a
/// text-format option gets a trailing NUL, for clients that mis-parse an
/// un-terminated string.
pub fn cons_options(
    out_opts: &OptionState,
    requested: &[u8],
    defaults: &[u8],
    max_message_size: usize,
    ms_null_termination: bool,
) -> AssembledReply {
    let mut tlvs = Vec::new();
    let present = out_opts.iter_codes(Universe::Dhcp);

    for code in priority_list(requested, defaults, &present) {
        if let Some(value) = out_opts.get(Universe::Dhcp, code) {
            tlvs.extend(encode_tlv_split(code, value, ms_null_termination));
        }
    }

    if !out_opts.agent_entries().is_empty() {
        let subs: Vec<AgentSubOption> = out_opts
            .agent_entries()
            .iter()
            .map(|(code, data)| AgentSubOption {
                code: *code,
                data: data.clone(),
            })
            .collect();
        tlvs.extend(encode_tlv_split(
            codes::RELAY_AGENT_INFORMATION,
            &encode_suboptions(&subs),
            false,
        ));
    }

    let budget = available_in_options_area(max_message_size);
    let total: usize = tlvs.iter().map(Vec::len).sum::<usize>() + 1;

    let mut file = [0u8; FILE_LEN];
    let mut sname = [0u8; SNAME_LEN];

    let options = if total <= budget {
        let mut main: Vec<u8> = tlvs.into_iter().flatten().collect();
        main.push(codes::END);
        main
    } else {
        split_with_overload(&tlvs, budget, &mut file, &mut sname)
    };

    AssembledReply { options, file, sname }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_list_puts_mandatory_codes_first_without_duplicates() {
        let list = priority_list(&[codes::SERVER_IDENTIFIER, 6], &[1], &[]);
        assert_eq!(
            list,
            vec![
                codes::DHCP_MESSAGE_TYPE,
                codes::SERVER_IDENTIFIER,
                codes::IP_ADDRESS_LEASE_TIME,
                codes::MESSAGE,
                codes::REQUESTED_IP_ADDRESS,
                6,
            ]
        );
    }

    #[test]
    fn empty_prl_falls_back_to_defaults_then_every_other_present_code() {
        let list = priority_list(&[], &[codes::SUBNET_MASK], &[codes::SUBNET_MASK, 43]);
        assert_eq!(
            list,
            vec![
                codes::DHCP_MESSAGE_TYPE,
                codes::SERVER_IDENTIFIER,
                codes::IP_ADDRESS_LEASE_TIME,
                codes::MESSAGE,
                codes::REQUESTED_IP_ADDRESS,
                codes::SUBNET_MASK,
                43,
            ]
        );
    }

    #[test]
    fn small_reply_needs_no_overload() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![5]);
        opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, vec![10, 0, 0, 1]);

        let reply = cons_options(&opts, &[], &[], 576, false);
        assert_eq!(reply.file, [0u8; FILE_LEN]);
        assert!(!reply.options.contains(&codes::OPTION_OVERLOAD));
        assert_eq!(*reply.options.last().unwrap(), codes::END);
    }

    #[test]
    fn oversize_reply_overflows_into_file_buffer() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![5]);
        opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, vec![10, 0, 0, 1]);
        // A vendor-class-identifier-sized blob that won't fit alongside the
        // fixed header in a tiny 260-byte message-size budget.
        opts.supersede(Universe::Dhcp, 60, vec![b'x'; 200]);

        let reply = cons_options(&opts, &[60], &[], 260, false);

        assert!(reply.options.contains(&codes::OPTION_OVERLOAD));
        assert_ne!(reply.file, [0u8; FILE_LEN]);
    }

    #[test]
    fn rfc3396_splits_values_over_255_bytes() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![5]);
        opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, vec![10, 0, 0, 1]);
        opts.supersede(Universe::Dhcp, 43, vec![b'y'; 300]);

        let tlvs = encode_tlv_split(43, &vec![b'y'; 300], false);
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0][1], 255);
        assert_eq!(tlvs[1][1], 45);
    }

    #[test]
    fn ms_null_termination_adds_a_trailing_nul_to_the_last_chunk_only() {
        let tlvs = encode_tlv_split(codes::HOST_NAME, &vec![b'h'; 300], true);
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0][1], 255);
        assert_eq!(*tlvs[0].last().unwrap(), b'h');
        assert_eq!(tlvs[1][1], 46);
        assert_eq!(*tlvs[1].last().unwrap(), 0);
    }

    #[test]
    fn ms_null_termination_spills_into_its_own_chunk_when_the_last_one_is_full() {
        let tlvs = encode_tlv_split(codes::HOST_NAME, &vec![b'h'; 255], true);
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0][1], 255);
        assert_eq!(tlvs[1], vec![codes::HOST_NAME, 1, 0]);
    }

    #[test]
    fn ms_null_termination_is_ignored_for_non_text_options() {
        let tlvs = encode_tlv_split(codes::ROUTER, &[10, 0, 0, 1], true);
        assert_eq!(tlvs, vec![vec![codes::ROUTER, 4, 10, 0, 0, 1]]);
    }

    #[test]
    fn cons_options_threads_ms_null_termination_into_the_host_name_option() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, codes::DHCP_MESSAGE_TYPE, vec![5]);
        opts.supersede(Universe::Dhcp, codes::SERVER_IDENTIFIER, vec![10, 0, 0, 1]);
        opts.supersede(Universe::Dhcp, codes::HOST_NAME, b"host".to_vec());

        let reply = cons_options(&opts, &[codes::HOST_NAME], &[], 576, true);
        let idx = reply
            .options
            .windows(2)
            .position(|w| w == [codes::HOST_NAME, 5])
            .unwrap();
        assert_eq!(&reply.options[idx + 2..idx + 7], b"host\0");
    }
}
