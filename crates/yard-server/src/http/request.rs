//! Request parsing.

use yard_bus::Message;

use crate::error::{Error, Result};
use crate::http::headers::Headers;

/// A parsed HTTP request head.
///
/// The body never lives here: the connection streams it into whatever
/// sink was installed for the request. `content_length` of `None` means
/// the length is unknown and the body, if one is read at all, runs until
/// end of stream.
#[derive(Debug)]
pub struct Request {
    /// Upper-cased method token.
    pub method: String,
    /// Request target exactly as received, query string included.
    pub uri: String,
    /// `MAJOR.MINOR` version digits, e.g. `"1.1"`.
    pub version: String,
    pub headers: Headers,
    pub content_length: Option<u64>,
}

impl Request {
    /// Parse a request head: first line plus header lines, ending at the
    /// first empty line. `head` is the byte range up to and including
    /// that empty line.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let mut lines = unfold_lines(head).into_iter();
        let first = lines.next().ok_or(Error::BadRequest("empty request"))?;
        let (method, uri, version) = parse_request_line(&first)?;

        let mut headers = Headers::new();
        let mut content_length = None;
        for line in lines {
            let col = line.find(':').ok_or(Error::BadRequest("header line without colon"))?;
            let name = line[..col].trim();
            if name.is_empty() {
                return Err(Error::BadRequest("empty header name"));
            }
            let value = line[col + 1..].trim();
            if content_length.is_none() && name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| Error::BadRequest("unparseable Content-Length"))?,
                );
            }
            headers.add(name, value);
        }

        // Neither Content-Length nor Transfer-Encoding: HTTP/1.1 requests
        // have no body; HTTP/1.0 GET/HEAD have none either; anything else
        // reads until end of stream.
        if content_length.is_none() && !headers.contains("Transfer-Encoding") {
            if version.as_str() > "1.0" || method == "GET" || method == "HEAD" {
                content_length = Some(0);
            }
        }

        Ok(Self {
            method,
            uri,
            version,
            headers,
            content_length,
        })
    }

    /// Whether the connection should read a body for this request.
    pub fn body_expected(&self) -> bool {
        let has_length = self.headers.contains("Transfer-Encoding")
            || self.headers.contains("Content-Length");
        if self.method == "TRACE" {
            return has_length;
        }
        has_length || self.method == "POST" || self.method == "PUT"
    }

    /// Copy the request into dispatch parameters: `version`, `method`,
    /// `uri`, and one `hdr_<Name>` per header (duplicates preserved).
    pub fn fill(&self, msg: &mut Message) {
        msg.params.add("version", &self.version);
        msg.params.add("method", &self.method);
        msg.params.add("uri", &self.uri);
        for (name, value) in self.headers.iter() {
            msg.params.add(&format!("hdr_{name}"), value);
        }
    }
}

/// Parse `METHOD SP TARGET SP HTTP/d.d+`, tolerating repeated whitespace
/// between tokens and any case in the `HTTP/` tag.
fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let mut parts = line.split_ascii_whitespace();
    let method = parts.next().ok_or(Error::BadRequest("missing method"))?;
    let target = parts.next().ok_or(Error::BadRequest("missing request target"))?;
    let proto = parts.next().ok_or(Error::BadRequest("missing version"))?;
    if parts.next().is_some() {
        return Err(Error::BadRequest("trailing tokens on request line"));
    }
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(Error::BadRequest("malformed method"));
    }
    let version = proto
        .get(..5)
        .filter(|tag| tag.eq_ignore_ascii_case("HTTP/"))
        .map(|_| &proto[5..])
        .ok_or(Error::BadRequest("malformed version"))?;
    if !version_is_valid(version) {
        return Err(Error::BadRequest("malformed version"));
    }
    Ok((
        method.to_ascii_uppercase(),
        target.to_string(),
        version.to_string(),
    ))
}

/// `d.d+`: one major digit, a dot, one or more minor digits.
fn version_is_valid(v: &str) -> bool {
    let mut it = v.bytes();
    matches!(it.next(), Some(b) if b.is_ascii_digit())
        && matches!(it.next(), Some(b'.'))
        && {
            let rest: Vec<u8> = it.collect();
            !rest.is_empty() && rest.iter().all(u8::is_ascii_digit)
        }
}

/// Split a head region into logical lines, joining RFC 7230 obs-fold
/// continuations (lines starting with space or tab) onto their
/// predecessor with a single space. Stops at the empty line.
fn unfold_lines(head: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(head);
    let mut out: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(prev) = out.last_mut() {
                prev.push(' ');
                prev.push_str(line.trim_start());
                continue;
            }
        }
        out.push(line.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(head: &str) -> Result<Request> {
        Request::parse(head.as_bytes())
    }

    #[test]
    fn basic_get() {
        let req = parse("GET /a/b?q=1 HTTP/1.1\r\nHost: example\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/a/b?q=1");
        assert_eq!(req.version, "1.1");
        assert_eq!(req.headers.get("host"), Some("example"));
        assert_eq!(req.content_length, Some(0));
        assert!(!req.body_expected());
    }

    #[test]
    fn method_is_uppercased_and_http_tag_case_insensitive() {
        let req = parse("get / http/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.version, "1.1");
    }

    #[test]
    fn multi_digit_minor_version() {
        let req = parse("GET / HTTP/1.12\r\n\r\n").unwrap();
        assert_eq!(req.version, "1.12");
    }

    #[test]
    fn malformed_first_lines() {
        assert!(parse("GET /\r\n\r\n").is_err());
        assert!(parse("G3T / HTTP/1.1\r\n\r\n").is_err());
        assert!(parse("GET / HTTP/11\r\n\r\n").is_err());
        assert!(parse("GET / HTTP/1.\r\n\r\n").is_err());
        assert!(parse("GET / FTP/1.1\r\n\r\n").is_err());
        assert!(parse("GET / HTTP/1.1 extra\r\n\r\n").is_err());
    }

    #[test]
    fn first_content_length_wins() {
        let req = parse("POST /u HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 9\r\n\r\n")
            .unwrap();
        assert_eq!(req.content_length, Some(5));
        assert!(req.body_expected());
    }

    #[test]
    fn unparseable_content_length_is_rejected() {
        assert!(parse("POST /u HTTP/1.1\r\nContent-Length: ten\r\n\r\n").is_err());
    }

    #[test]
    fn length_defaults_by_version_and_method() {
        // HTTP/1.0 POST without a length reads until end of stream
        let req = parse("POST /u HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.content_length, None);
        assert!(req.body_expected());
        // HTTP/1.0 GET has no body
        let req = parse("GET /u HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.content_length, Some(0));
        // HTTP/1.1 without length headers has no body
        let req = parse("DELETE /u HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.content_length, Some(0));
    }

    #[test]
    fn transfer_encoding_keeps_length_unknown() {
        let req = parse("POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        assert_eq!(req.content_length, None);
        assert!(req.body_expected());
    }

    #[test]
    fn trace_without_length_has_no_body() {
        let req = parse("TRACE /u HTTP/1.1\r\n\r\n").unwrap();
        assert!(!req.body_expected());
        let req = parse("TRACE /u HTTP/1.1\r\nContent-Length: 3\r\n\r\n").unwrap();
        assert!(req.body_expected());
    }

    #[test]
    fn folded_header_is_joined() {
        let req = parse("GET / HTTP/1.1\r\nX-Long: first\r\n\tsecond part\r\n\r\n").unwrap();
        assert_eq!(req.headers.get("X-Long"), Some("first second part"));
    }

    #[test]
    fn header_without_colon_is_rejected() {
        assert!(parse("GET / HTTP/1.1\r\nbogus line\r\n\r\n").is_err());
    }

    #[test]
    fn fill_exposes_headers_with_prefix() {
        let req = parse("GET /x HTTP/1.1\r\nHost: h\r\nAccept: a\r\nAccept: b\r\n\r\n").unwrap();
        let mut m = Message::new("http.route");
        req.fill(&mut m);
        assert_eq!(m.params.get("method"), Some("GET"));
        assert_eq!(m.params.get("uri"), Some("/x"));
        assert_eq!(m.params.get("version"), Some("1.1"));
        assert_eq!(m.params.get("hdr_Host"), Some("h"));
        let accepts: Vec<_> = m
            .params
            .iter()
            .filter(|(n, _)| *n == "hdr_Accept")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(accepts, vec!["a", "b"]);
    }

    #[test]
    fn reparse_of_serialized_headers_matches() {
        let head = "GET / HTTP/1.1\r\nHost: h\r\nVia: a\r\nVia: b\r\n\r\n";
        let req = parse(head).unwrap();
        let mut rebuilt = String::from("GET / HTTP/1.1\r\n");
        for (n, v) in req.headers.iter() {
            rebuilt.push_str(&format!("{n}: {v}\r\n"));
        }
        rebuilt.push_str("\r\n");
        let again = parse(&rebuilt).unwrap();
        let a: Vec<_> = req.headers.iter().collect();
        let b: Vec<_> = again.headers.iter().collect();
        assert_eq!(a, b);
    }
}
