/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Shared DNS-level helpers used across plugins and executors.
//!
//! Covers response synthesis from a request, EDNS0 option surgery and
//! RFC 8467 padding. hickory keeps the OPT pseudo-record in
//! `Message::extensions()`, so all EDNS0 state goes through `Edns`.

use crate::core::error::Result;
use hickory_proto::op::{Edns, Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
use hickory_proto::rr::{RData, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use std::net::IpAddr;

/// Advertised UDP payload size when a message is upgraded to EDNS0.
pub const EDNS0_UDP_SIZE: u16 = 1232;

/// Wire size of an OPT pseudo-record without options:
/// root name (1) + type (2) + class (2) + ttl (4) + rdlen (2).
const OPT_RR_HEADER_LEN: usize = 11;

/// Wire size of an EDNS0 option header: code (2) + length (2).
const OPT_OPTION_HEADER_LEN: usize = 4;

/// Parse symbolic DNS response code name.
pub fn parse_named_response_code(raw: &str) -> Option<ResponseCode> {
    if let Ok(code) = raw.parse::<u16>() {
        return Some(code.into());
    }

    match raw.to_ascii_uppercase().as_str() {
        "NOERROR" => Some(ResponseCode::NoError),
        "FORMERR" => Some(ResponseCode::FormErr),
        "SERVFAIL" => Some(ResponseCode::ServFail),
        "NXDOMAIN" => Some(ResponseCode::NXDomain),
        "NOTIMP" => Some(ResponseCode::NotImp),
        "REFUSED" => Some(ResponseCode::Refused),
        "YXDOMAIN" => Some(ResponseCode::YXDomain),
        "YXRRSET" => Some(ResponseCode::YXRRSet),
        "NXRRSET" => Some(ResponseCode::NXRRSet),
        "NOTAUTH" => Some(ResponseCode::NotAuth),
        "NOTZONE" => Some(ResponseCode::NotZone),
        "BADVERS" => Some(ResponseCode::BADVERS),
        "BADSIG" => Some(ResponseCode::BADSIG),
        "BADKEY" => Some(ResponseCode::BADKEY),
        "BADTIME" => Some(ResponseCode::BADTIME),
        "BADMODE" => Some(ResponseCode::BADMODE),
        "BADNAME" => Some(ResponseCode::BADNAME),
        "BADALG" => Some(ResponseCode::BADALG),
        "BADTRUNC" => Some(ResponseCode::BADTRUNC),
        "BADCOOKIE" => Some(ResponseCode::BADCOOKIE),
        _ => None,
    }
}

/// Build a minimal DNS response from a request, preserving id/opcode/query.
pub fn build_response_from_request(request: &Message, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_op_code(request.op_code());
    response.set_message_type(MessageType::Response);
    response.set_response_code(rcode);
    response.set_recursion_desired(request.recursion_desired());
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response
}

/// Iterate all records in answer/authority/additional sections.
pub fn response_records(message: &Message) -> impl Iterator<Item = &Record> {
    message
        .answers()
        .iter()
        .chain(message.name_servers().iter())
        .chain(message.additionals().iter())
}

/// Extract A/AAAA IP from a resource record.
pub fn rr_to_ip(record: &Record) -> Option<IpAddr> {
    match record.record_type() {
        RecordType::A => match record.data() {
            RData::A(v) => Some(IpAddr::V4(**v)),
            _ => None,
        },
        RecordType::AAAA => match record.data() {
            RData::AAAA(v) => Some(IpAddr::V6(**v)),
            _ => None,
        },
        _ => None,
    }
}

/// Extract normalized CNAME target from a resource record.
pub fn rr_to_cname(record: &Record) -> Option<String> {
    match record.data() {
        RData::CNAME(v) => Some(v.0.to_utf8().trim_end_matches('.').to_ascii_lowercase()),
        _ => None,
    }
}

/// Whether the message carries an EDNS0 OPT pseudo-record.
pub fn is_edns0(message: &Message) -> bool {
    message.extensions().is_some()
}

/// Encoded wire length of the message.
pub fn message_wire_len(message: &Message) -> Result<usize> {
    Ok(message.to_bytes()?.len())
}

/// Enable EDNS0 on a message that does not have it yet.
pub fn upgrade_edns0(message: &mut Message) {
    if message.extensions().is_none() {
        let mut edns = Edns::new();
        edns.set_max_payload(EDNS0_UDP_SIZE);
        *message.extensions_mut() = Some(edns);
    }
}

/// Strip the entire EDNS0 OPT pseudo-record.
pub fn remove_edns0(message: &mut Message) {
    *message.extensions_mut() = None;
}

/// Remove one EDNS0 option by code, keeping the OPT record itself.
pub fn remove_edns0_option(message: &mut Message, code: EdnsCode) {
    if let Some(edns) = message.extensions_mut() {
        edns.options_mut().remove(code);
    }
}

/// Look up one EDNS0 option by code.
pub fn get_edns0_option(message: &Message, code: EdnsCode) -> Option<&EdnsOption> {
    message
        .extensions()
        .as_ref()
        .and_then(|edns| edns.options().get(code))
}

/// Payload length of an option as it would appear on the wire. PADDING is
/// always carried as an opaque option.
fn option_payload_len(option: &EdnsOption) -> usize {
    match option {
        EdnsOption::Unknown(_, data) => data.len(),
        _ => 0,
    }
}

/// Pad `message` to at least `min_len` octets with an EDNS0 PADDING option
/// (RFC 7830 / RFC 8467). Does nothing when the message is already long
/// enough or the target is unreachable.
///
/// Returns `(upgraded, new_padding)`: whether the message was upgraded to
/// EDNS0 and whether the PADDING option is new to it.
pub fn pad_to_minimum(message: &mut Message, min_len: usize) -> (bool, bool) {
    let Ok(wire) = message.to_bytes() else {
        return (false, false);
    };
    let current_len = wire.len();
    if current_len >= min_len {
        return (false, false);
    }

    let mut upgraded = false;
    let mut new_padding = false;
    let padding_len: isize;

    match message.extensions() {
        Some(edns) => {
            if let Some(existing) = edns.options().get(EdnsCode::Padding) {
                // Re-padding: the existing option is replaced, its bytes count
                // towards the new payload.
                padding_len =
                    min_len as isize - current_len as isize + option_payload_len(existing) as isize;
            } else {
                padding_len =
                    min_len as isize - current_len as isize - OPT_OPTION_HEADER_LEN as isize;
                new_padding = true;
            }
        }
        None => {
            padding_len = min_len as isize
                - current_len as isize
                - (OPT_RR_HEADER_LEN + OPT_OPTION_HEADER_LEN) as isize;
            upgraded = true;
            new_padding = true;
        }
    }

    if padding_len < 0 {
        return (false, false);
    }

    upgrade_edns0(message);
    if let Some(edns) = message.extensions_mut() {
        let options = edns.options_mut();
        options.remove(EdnsCode::Padding);
        options.insert(EdnsOption::Unknown(
            u16::from(EdnsCode::Padding),
            vec![0u8; padding_len as usize],
        ));
    }

    (upgraded, new_padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;

    fn bare_query() -> Message {
        let mut message = Message::new();
        message.set_id(0x2222);
        message.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        message
    }

    #[test]
    fn bare_query_wire_len_is_29() {
        // 12-byte header + 13-byte qname + qtype + qclass
        assert_eq!(message_wire_len(&bare_query()).unwrap(), 29);
    }

    #[test]
    fn pad_upgrades_and_hits_exact_target() {
        let mut message = bare_query();
        let (upgraded, new_padding) = pad_to_minimum(&mut message, 128);

        assert!(upgraded);
        assert!(new_padding);
        assert!(is_edns0(&message));
        assert!(get_edns0_option(&message, EdnsCode::Padding).is_some());
        assert_eq!(message_wire_len(&message).unwrap(), 128);
    }

    #[test]
    fn pad_replaces_existing_padding() {
        let mut message = bare_query();
        pad_to_minimum(&mut message, 128);

        let (upgraded, new_padding) = pad_to_minimum(&mut message, 468);
        assert!(!upgraded);
        assert!(!new_padding);
        assert_eq!(message_wire_len(&message).unwrap(), 468);
    }

    #[test]
    fn pad_leaves_long_messages_alone() {
        let mut message = bare_query();
        pad_to_minimum(&mut message, 468);

        let before = message_wire_len(&message).unwrap();
        let (upgraded, new_padding) = pad_to_minimum(&mut message, 128);
        assert!(!upgraded);
        assert!(!new_padding);
        assert_eq!(message_wire_len(&message).unwrap(), before);
    }

    #[test]
    fn remove_edns0_strips_the_opt_record() {
        let mut message = bare_query();
        pad_to_minimum(&mut message, 128);
        remove_edns0(&mut message);
        assert!(!is_edns0(&message));
        assert_eq!(message_wire_len(&message).unwrap(), 29);
    }

    #[test]
    fn named_rcodes_parse() {
        assert_eq!(
            parse_named_response_code("nxdomain"),
            Some(ResponseCode::NXDomain)
        );
        assert_eq!(parse_named_response_code("2"), Some(ResponseCode::ServFail));
        assert_eq!(parse_named_response_code("bogus"), None);
    }
}
