//! The wire codec (C1): decodes/encodes the 236-byte BOOTP fixed header and
//! the TLV options trailer, enforcing the magic cookie, PAD/END framing,
//! Option Overload, and Relay-Agent sub-TLV delegation.

pub mod agent;
pub mod options;

use std::net::Ipv4Addr;

use dhcp_raw::bytes::BytesIn;

use crate::model::AgentOptions;
use crate::store::{OptionState, Universe};

pub const COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
pub const FIXED_HEADER_LEN: usize = 236;
pub const SNAME_LEN: usize = 64;
pub const FILE_LEN: usize = 128;
pub const BOOTP_MIN_LEN: usize = 300;

const BOOT_REQUEST: u8 = 1;
const BOOT_REPLY: u8 = 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireError {
    Truncated,
    InvalidHlen,
}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Truncated => "Truncated BOOTP frame",
            Self::InvalidHlen => "Invalid hardware address length",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for WireError {}

impl From<dhcp_raw::bytes::Error> for WireError {
    fn from(_: dhcp_raw::bytes::Error) -> Self {
        Self::Truncated
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub reply: bool,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
}

#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub header: Header,
    pub options: OptionState,
    pub agent_options: AgentOptions,
    pub options_valid: bool,
}

/// Parses a BOOTP/DHCP datagram. Rejects `hlen > 16` per `do_packet` step 1.
/// A missing/mismatched magic cookie is not itself an error: it yields
/// `options_valid = false`, the plain-BOOTP case (§4.1 point 1).
pub fn decode(data: &[u8]) -> Result<DecodedFrame, WireError> {
    let mut bytes = BytesIn::new(data);

    let op = bytes.byte()?;
    let htype = bytes.byte()?;
    let hlen = bytes.byte()?;

    if hlen > 16 {
        return Err(WireError::InvalidHlen);
    }

    let hops = bytes.byte()?;
    let xid = u32::from_be_bytes(bytes.arr()?);
    let secs = u16::from_be_bytes(bytes.arr()?);
    let flags = u16::from_be_bytes(bytes.arr()?);
    let ciaddr = Ipv4Addr::from(bytes.arr::<4>()?);
    let yiaddr = Ipv4Addr::from(bytes.arr::<4>()?);
    let siaddr = Ipv4Addr::from(bytes.arr::<4>()?);
    let giaddr = Ipv4Addr::from(bytes.arr::<4>()?);
    let chaddr: [u8; 16] = bytes.arr()?;
    let sname: [u8; SNAME_LEN] = bytes.arr()?;
    let file: [u8; FILE_LEN] = bytes.arr()?;

    let header = Header {
        reply: op == BOOT_REPLY,
        htype,
        hlen,
        hops,
        xid,
        secs,
        broadcast: flags & 0x8000 != 0,
        ciaddr,
        yiaddr,
        siaddr,
        giaddr,
        chaddr,
    };

    let remaining = bytes.remaining();

    let options = OptionState::default();
    let agent_options = AgentOptions::default();

    if remaining.len() < 4 || remaining[..4] != COOKIE {
        return Ok(DecodedFrame {
            header,
            options,
            agent_options,
            options_valid: false,
        });
    }

    let mut options = options;
    let mut agent_options = agent_options;
    let mut overload = 0u8;

    ingest_tlv_area(&remaining[4..], &mut options, &mut agent_options, &mut overload)?;

    if overload & 0b01 != 0 {
        ingest_tlv_area(&file, &mut options, &mut agent_options, &mut overload)?;
    }

    if overload & 0b10 != 0 {
        ingest_tlv_area(&sname, &mut options, &mut agent_options, &mut overload)?;
    }

    Ok(DecodedFrame {
        header,
        options,
        agent_options,
        options_valid: true,
    })
}

fn ingest_tlv_area(
    buf: &[u8],
    options: &mut OptionState,
    agent_options: &mut AgentOptions,
    overload: &mut u8,
) -> Result<(), WireError> {
    for (code, data) in options::parse_tlvs(buf)? {
        if code == options::codes::OPTION_OVERLOAD {
            *overload |= data.first().copied().unwrap_or(0);
            continue;
        }

        if code == options::codes::RELAY_AGENT_INFORMATION {
            agent_options.0.extend(agent::parse_suboptions(data));
            continue;
        }

        // Duplicate-code occurrences are concatenations, not replacements
        // (§4.1 point 5), applied uniformly across universes.
        options.append(Universe::Dhcp, code, data.to_vec());
    }

    Ok(())
}

/// Encodes the fixed header plus a pre-assembled options/file/sname layout
/// (built by the reply assembler, §4.6) into one BOOTP/DHCP datagram,
/// padded to `BOOTP_MIN_LEN`.
pub fn encode(header: &Header, main_options: &[u8], file: &[u8; FILE_LEN], sname: &[u8; SNAME_LEN]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + COOKIE.len() + main_options.len());

    buf.push(if header.reply { BOOT_REPLY } else { BOOT_REQUEST });
    buf.push(header.htype);
    buf.push(header.hlen);
    buf.push(header.hops);
    buf.extend_from_slice(&header.xid.to_be_bytes());
    buf.extend_from_slice(&header.secs.to_be_bytes());
    buf.extend_from_slice(&(if header.broadcast { 0x8000u16 } else { 0 }).to_be_bytes());
    buf.extend_from_slice(&header.ciaddr.octets());
    buf.extend_from_slice(&header.yiaddr.octets());
    buf.extend_from_slice(&header.siaddr.octets());
    buf.extend_from_slice(&header.giaddr.octets());
    buf.extend_from_slice(&header.chaddr);
    buf.extend_from_slice(sname);
    buf.extend_from_slice(file);
    buf.extend_from_slice(&COOKIE);
    buf.extend_from_slice(main_options);

    while buf.len() < BOOTP_MIN_LEN {
        buf.push(options::codes::PAD);
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            reply: false,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0xAB,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: {
                let mut c = [0u8; 16];
                c[..6].copy_from_slice(&[2, 0, 0, 0, 0, 1]);
                c
            },
        }
    }

    #[test]
    fn round_trips_a_simple_discover() {
        let header = sample_header();
        let main_options = [53u8, 1, 1, 255]; // message-type=DISCOVER, END
        let file = [0u8; FILE_LEN];
        let sname = [0u8; SNAME_LEN];

        let encoded = encode(&header, &main_options, &file, &sname);
        let decoded = decode(&encoded).unwrap();

        assert!(decoded.options_valid);
        assert_eq!(decoded.header.xid, 0xAB);
        assert_eq!(decoded.options.get(Universe::Dhcp, 53), Some([1u8].as_slice()));
    }

    #[test]
    fn missing_cookie_is_plain_bootp_not_an_error() {
        let header = sample_header();
        let mut encoded = encode(&header, &[255], &[0u8; FILE_LEN], &[0u8; SNAME_LEN]);
        let cookie_offset = FIXED_HEADER_LEN;
        encoded[cookie_offset] = 0; // corrupt the cookie

        let decoded = decode(&encoded).unwrap();
        assert!(!decoded.options_valid);
    }

    #[test]
    fn oversize_hlen_is_rejected() {
        let mut header = sample_header();
        header.hlen = 17;
        let encoded = encode(&header, &[255], &[0u8; FILE_LEN], &[0u8; SNAME_LEN]);

        assert_eq!(decode(&encoded), Err(WireError::InvalidHlen));
    }

    #[test]
    fn overload_bit_pulls_options_from_file_buffer() {
        let header = sample_header();
        let main_options = [options::codes::OPTION_OVERLOAD, 1, 1, 255]; // overload=1 (file), END
        let mut file = [0u8; FILE_LEN];
        file[0] = 12; // HOST_NAME
        file[1] = 3;
        file[2..5].copy_from_slice(b"pc1");
        file[5] = 255;

        let encoded = encode(&header, &main_options, &file, &[0u8; SNAME_LEN]);
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.options.get(Universe::Dhcp, 12), Some(b"pc1".as_slice()));
    }
}
