//! DHCP option codes, scalar (de)serialisation helpers, and the raw
//! code/length/value TLV walk used by both the main options area and the
//! Option-Overload `file`/`sname` buffers.

use std::net::Ipv4Addr;

use dhcp_raw::bytes::BytesIn;

use super::WireError;

pub mod codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DOMAIN_NAME_SERVER: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const VENDOR_ENCAPSULATED: u8 = 43;
    pub const REQUESTED_IP_ADDRESS: u8 = 50;
    pub const IP_ADDRESS_LEASE_TIME: u8 = 51;
    pub const OPTION_OVERLOAD: u8 = 52;
    pub const DHCP_MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const MESSAGE: u8 = 56;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const CLIENT_IDENTIFIER: u8 = 61;
    pub const RELAY_AGENT_INFORMATION: u8 = 82;
    pub const END: u8 = 255;
}

/// Walks one TLV area (main options, or a Option-Overload `file`/`sname`
/// buffer), skipping PAD and stopping at END. Does not interpret any code.
pub fn parse_tlvs(buf: &[u8]) -> Result<Vec<(u8, &[u8])>, WireError> {
    let mut bytes = BytesIn::new(buf);
    let mut out = Vec::new();

    while !bytes.is_empty() {
        let code = bytes.byte()?;

        if code == codes::PAD {
            continue;
        }

        if code == codes::END {
            break;
        }

        let len = bytes.byte()? as usize;
        let data = bytes.slice(len)?;

        out.push((code, data));
    }

    Ok(out)
}

pub fn encode_u8(v: u8) -> Vec<u8> {
    vec![v]
}

pub fn encode_u16(v: u16) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

pub fn encode_u32(v: u32) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

pub fn encode_ipv4(v: Ipv4Addr) -> Vec<u8> {
    v.octets().to_vec()
}

pub fn encode_ipv4_list(v: &[Ipv4Addr]) -> Vec<u8> {
    v.iter().flat_map(|a| a.octets()).collect()
}

pub fn decode_u8(b: &[u8]) -> Option<u8> {
    b.first().copied()
}

pub fn decode_u16(b: &[u8]) -> Option<u16> {
    <[u8; 2]>::try_from(b).ok().map(u16::from_be_bytes)
}

pub fn decode_u32(b: &[u8]) -> Option<u32> {
    <[u8; 4]>::try_from(b).ok().map(u32::from_be_bytes)
}

pub fn decode_ipv4(b: &[u8]) -> Option<Ipv4Addr> {
    <[u8; 4]>::try_from(b).ok().map(Ipv4Addr::from)
}

pub fn decode_ipv4_list(b: &[u8]) -> Vec<Ipv4Addr> {
    b.chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect()
}
