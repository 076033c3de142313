// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query-port discovery exchange.
//!
//! Every device runs a small directory service on a well-known TCP port.
//! Sending it a fixed probe frame yields the 2-byte port number of the
//! device's actual query server, which differs between device generations.

use super::field::ParseError;

/// Well-known TCP port of the query-port directory service.
pub const QUERY_PORT_SERVICE: u16 = 12523;

/// Service name carried by the probe frame.
const SERVICE_NAME: &[u8] = b"RemoteDBServer";

/// Build the fixed probe frame: a big-endian name length followed by the
/// NUL-terminated service name.
pub fn build_port_query() -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + SERVICE_NAME.len() + 1);
    out.extend_from_slice(&(SERVICE_NAME.len() as u32 + 1).to_be_bytes());
    out.extend_from_slice(SERVICE_NAME);
    out.push(0);
    out
}

/// Parse the 2-byte big-endian port reply.
pub fn parse_port_reply(data: &[u8]) -> Result<u16, ParseError> {
    match data {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ParseError::Incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_frame_bytes() {
        let frame = build_port_query();
        assert_eq!(&frame[..4], &[0, 0, 0, 0x0f]);
        assert_eq!(&frame[4..18], b"RemoteDBServer");
        assert_eq!(frame[18], 0);
        assert_eq!(frame.len(), 19);
    }

    #[test]
    fn test_port_reply() {
        assert_eq!(parse_port_reply(&[0x2f, 0x3c]), Ok(12092));
        assert_eq!(parse_port_reply(&[0x2f]), Err(ParseError::Incomplete));
        assert_eq!(parse_port_reply(&[]), Err(ParseError::Incomplete));
    }
}
