//! The Relay-Agent-Information (option 82) sub-parser: a flat list of
//! `code, length, value` sub-TLVs, with no PAD/END framing of its own.

use crate::model::AgentSubOption;

pub fn parse_suboptions(buf: &[u8]) -> Vec<AgentSubOption> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset + 2 <= buf.len() {
        let code = buf[offset];
        let len = buf[offset + 1] as usize;

        if offset + 2 + len > buf.len() {
            log::warn!("Relay-Agent sub-option {code} truncated, skipping remainder");
            break;
        }

        out.push(AgentSubOption {
            code,
            data: buf[offset + 2..offset + 2 + len].to_vec(),
        });

        offset += 2 + len;
    }

    out
}

pub fn encode_suboptions(subs: &[AgentSubOption]) -> Vec<u8> {
    let mut out = Vec::new();

    for sub in subs {
        out.push(sub.code);
        out.push(sub.data.len().min(255) as u8);
        out.extend_from_slice(&sub.data[..sub.data.len().min(255)]);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_two_suboptions() {
        let subs = vec![
            AgentSubOption { code: 1, data: b"eth0/42".to_vec() },
            AgentSubOption { code: 2, data: vec![0xde, 0xad] },
        ];

        let encoded = encode_suboptions(&subs);
        let decoded = parse_suboptions(&encoded);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].data, b"eth0/42");
        assert_eq!(decoded[1].data, vec![0xde, 0xad]);
    }
}
