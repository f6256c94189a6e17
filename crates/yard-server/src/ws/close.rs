//! Close handshake payloads (RFC 6455 Sections 5.5.1 and 7.4).

/// Well-known close status codes.
pub struct CloseCode;

impl CloseCode {
    /// Normal closure (1000).
    pub const NORMAL: u16 = 1000;
    /// Going away (1001) -- sent when the server abandons an idle session.
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error (1002).
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status code present (1005) -- never sent on the wire; presented
    /// locally when a close frame arrived without a payload.
    pub const NO_STATUS: u16 = 1005;
    /// Message too big (1009).
    pub const TOO_BIG: u16 = 1009;
}

/// Split a close frame payload into (status code, reason).
///
/// A payload of at least two bytes carries a big-endian code followed by
/// a UTF-8 reason; anything shorter maps to 1005 with an empty reason.
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    } else {
        (CloseCode::NO_STATUS, String::new())
    }
}

/// Build a close frame payload: big-endian code, then the reason
/// truncated to 123 bytes so the control frame stays within its
/// 125-byte payload limit.
pub fn build_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let reason = &reason.as_bytes()[..reason.len().min(123)];
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_code_and_reason() {
        let (code, reason) = parse_close_payload(&[0x03, 0xE8, b'o', b'k']);
        assert_eq!(code, 1000);
        assert_eq!(reason, "ok");
    }

    #[test]
    fn parse_code_only() {
        let (code, reason) = parse_close_payload(&[0x03, 0xEA]);
        assert_eq!(code, 1002);
        assert_eq!(reason, "");
    }

    #[test]
    fn empty_payload_means_no_status() {
        assert_eq!(parse_close_payload(&[]), (1005, String::new()));
        assert_eq!(parse_close_payload(&[0x03]), (1005, String::new()));
    }

    #[test]
    fn build_and_parse_roundtrip() {
        let payload = build_close_payload(CloseCode::NORMAL, "bye");
        assert_eq!(payload, vec![0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(parse_close_payload(&payload), (1000, "bye".into()));
    }

    #[test]
    fn long_reason_is_truncated() {
        let reason = "x".repeat(200);
        let payload = build_close_payload(CloseCode::NORMAL, &reason);
        assert_eq!(payload.len(), 125);
    }
}
