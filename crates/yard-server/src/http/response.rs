//! Response assembly and serialization.

use yard_bus::Message;

use crate::http::body::BodySource;
use crate::http::headers::Headers;

/// Canonical reason phrase for a status code, empty for codes outside
/// the table.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// An HTTP response under construction.
///
/// `content_length` is tracked separately from the body because a
/// handler may announce a length (via `ohdr_Content-Length`) before its
/// stream is attached; `None` means unknown, which the writer turns into
/// chunked transfer encoding.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Echoes the request's version.
    pub version: String,
    pub headers: Headers,
    pub content_length: Option<u64>,
    pub body: BodySource,
}

impl Response {
    pub fn new(version: &str) -> Self {
        Self {
            status: 200,
            version: version.to_string(),
            headers: Headers::new(),
            content_length: None,
            body: BodySource::Empty,
        }
    }

    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status)
    }

    /// Install a finite in-memory body and record its length.
    pub fn set_inline_body(&mut self, bytes: Vec<u8>) {
        self.content_length = Some(bytes.len() as u64);
        self.body = BodySource::Inline(bytes);
    }

    /// Apply a dispatch result to the response: take the `status`
    /// parameter (default 200), reset the known length, then copy every
    /// `ohdr_`-prefixed parameter as a response header. The prefix can be
    /// overridden through an `ohdr_prefix` parameter, and a prefixed
    /// `Content-Length` sets the known length instead of becoming a
    /// header.
    pub fn apply(&mut self, msg: &Message) {
        self.content_length = None;
        self.status = msg
            .params
            .get_u64("status")
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(200);
        let prefix = msg.params.get_or("ohdr_prefix", "ohdr_").to_string();
        for (name, value) in msg.params.iter() {
            let Some(header) = name.strip_prefix(&prefix) else {
                continue;
            };
            if header.eq_ignore_ascii_case("Content-Length") {
                self.content_length = value.trim().parse().ok();
                continue;
            }
            self.headers.set(header, value);
        }
    }

    /// Give any status in [200, 600) lacking body bytes a minimal
    /// `"<code> <reason>"` text body so the peer always sees an entity.
    pub fn synthesize_missing_body(&mut self) {
        if self.status < 200 || self.status >= 600 {
            return;
        }
        let text = format!("{} {}\r\n", self.status, self.reason());
        self.headers.add("Content-Type", "text/plain");
        self.set_inline_body(text.into_bytes());
    }

    /// Serialize the status line and headers, blank line included. The
    /// caller is expected to have set the framing header
    /// (`Content-Length` or `Transfer-Encoding`) already.
    pub fn serialize_head(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(
            format!("HTTP/{} {} {}\r\n", self.version, self.status, self.reason()).as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_table_spot_checks() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(101), "Switching Protocols");
        assert_eq!(reason_phrase(413), "Request Entity Too Large");
        assert_eq!(reason_phrase(505), "HTTP Version Not Supported");
        assert_eq!(reason_phrase(599), "");
    }

    #[test]
    fn head_serialization() {
        let mut rsp = Response::new("1.1");
        rsp.status = 404;
        rsp.headers.add("Content-Type", "text/plain");
        rsp.headers.add("Content-Length", "9");
        let mut out = Vec::new();
        rsp.serialize_head(&mut out);
        assert_eq!(
            out,
            b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\n"
        );
    }

    #[test]
    fn apply_copies_prefixed_headers() {
        let mut msg = Message::new("http.serve");
        msg.params.set("status", "201");
        msg.params.set("ohdr_Content-Type", "application/json");
        msg.params.set("ohdr_Content-Length", "42");
        msg.params.set("other", "ignored");
        let mut rsp = Response::new("1.1");
        rsp.apply(&msg);
        assert_eq!(rsp.status, 201);
        assert_eq!(rsp.headers.get("Content-Type"), Some("application/json"));
        assert!(rsp.headers.get("Content-Length").is_none());
        assert_eq!(rsp.content_length, Some(42));
    }

    #[test]
    fn apply_resets_known_length() {
        let mut rsp = Response::new("1.1");
        rsp.set_inline_body(b"old".to_vec());
        rsp.apply(&Message::new("http.serve"));
        assert_eq!(rsp.content_length, None);
        assert_eq!(rsp.status, 200);
    }

    #[test]
    fn apply_honors_prefix_override() {
        let mut msg = Message::new("http.serve");
        msg.params.set("ohdr_prefix", "out_");
        msg.params.set("out_X-Tag", "v");
        msg.params.set("ohdr_X-Other", "w");
        let mut rsp = Response::new("1.1");
        rsp.apply(&msg);
        assert_eq!(rsp.headers.get("X-Tag"), Some("v"));
        assert!(rsp.headers.get("X-Other").is_none());
    }

    #[test]
    fn synthesized_body_for_bare_status() {
        let mut rsp = Response::new("1.0");
        rsp.status = 404;
        rsp.synthesize_missing_body();
        assert_eq!(rsp.content_length, Some(15));
        match &rsp.body {
            BodySource::Inline(b) => assert_eq!(b.as_slice(), b"404 Not Found\r\n"),
            other => panic!("expected inline body, got {other:?}"),
        }
    }

    #[test]
    fn no_synthesized_body_below_200() {
        let mut rsp = Response::new("1.1");
        rsp.status = 101;
        rsp.synthesize_missing_body();
        assert!(matches!(rsp.body, BodySource::Empty));
    }
}
