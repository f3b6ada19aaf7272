//! SIP message text codec
//!
//! Only what the endpoint needs: building requests and responses as text
//! frames, and parsing inbound frames into a start line, an ordered header
//! list and a body. Compact header names are expanded on parse.

use std::fmt;

use super::{SipError, SipResult};

/// An ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Append a header
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn write_to(&self, f: &mut fmt::Formatter<'_>, body: &str) -> fmt::Result {
        for (name, value) in self.0.iter().filter(|(n, _)| !n.eq_ignore_ascii_case("Content-Length")) {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        write!(f, "Content-Length: {}\r\n\r\n{}", body.len(), body)
    }
}

/// An outgoing or incoming SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequest {
    /// Method (`REGISTER`, `INVITE`, ...)
    pub method: String,
    /// Request-URI
    pub uri: String,
    /// Headers in order
    pub headers: Headers,
    /// Body
    pub body: String,
}

impl SipRequest {
    /// Start a request
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Headers::default(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Set a body and its content type
    pub fn body(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.headers.push("Content-Type", content_type);
        self.body = body.into();
        self
    }
}

impl fmt::Display for SipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        self.headers.write_to(f, &self.body)
    }
}

/// An outgoing or incoming SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in order
    pub headers: Headers,
    /// Body
    pub body: String,
}

impl SipResponse {
    /// A response to `request` echoing its dialog headers
    ///
    /// A `To` tag is added when the request's `To` carries none.
    pub fn to_request(request: &SipRequest, status: u16, reason: &str, to_tag: &str) -> Self {
        let mut headers = Headers::default();
        for via in request.headers.get_all("Via") {
            headers.push("Via", via);
        }
        if let Some(from) = request.headers.get("From") {
            headers.push("From", from);
        }
        if let Some(to) = request.headers.get("To") {
            if tag_param(to).is_some() {
                headers.push("To", to);
            } else {
                headers.push("To", format!("{};tag={}", to, to_tag));
            }
        }
        for name in ["Call-ID", "CSeq"] {
            if let Some(value) = request.headers.get(name) {
                headers.push(name, value);
            }
        }
        Self {
            status,
            reason: reason.to_string(),
            headers,
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Whether this is a 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// Whether this is a 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Display for SipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.status, self.reason)?;
        self.headers.write_to(f, &self.body)
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    /// A request from the exchange
    Request(SipRequest),
    /// A response to one of our requests
    Response(SipResponse),
}

impl SipMessage {
    /// Headers of either kind
    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(r) => &r.headers,
            SipMessage::Response(r) => &r.headers,
        }
    }

    /// `Call-ID` value
    pub fn call_id(&self) -> Option<&str> {
        self.headers().get("Call-ID")
    }

    /// `CSeq` number and method
    pub fn cseq(&self) -> Option<(u32, &str)> {
        let value = self.headers().get("CSeq")?;
        let mut parts = value.split_whitespace();
        let number = parts.next()?.parse().ok()?;
        let method = parts.next()?;
        Some((number, method))
    }
}

/// Parse one WebSocket text frame
pub fn parse(text: &str) -> SipResult<SipMessage> {
    let text = text.trim_start_matches(['\r', '\n']);
    let (head, body) = match text.find("\r\n\r\n") {
        Some(pos) => (&text[..pos], &text[pos + 4..]),
        None => match text.find("\n\n") {
            Some(pos) => (&text[..pos], &text[pos + 2..]),
            None => (text, ""),
        },
    };

    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| SipError::Parse("empty message".into()))?;

    let mut headers = Headers::default();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SipError::Parse(format!("malformed header line '{}'", line)))?;
        headers.push(expand_compact(name.trim()), value.trim());
    }

    let body = match headers.get("Content-Length").and_then(|l| l.parse::<usize>().ok()) {
        Some(len) => body.get(..len).unwrap_or(body).to_string(),
        None => body.to_string(),
    };

    if let Some(rest) = start.strip_prefix("SIP/2.0 ") {
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        let status = code
            .parse()
            .map_err(|_| SipError::Parse(format!("bad status code '{}'", code)))?;
        return Ok(SipMessage::Response(SipResponse {
            status,
            reason: reason.to_string(),
            headers,
            body,
        }));
    }

    let mut parts = start.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some("SIP/2.0")) => Ok(SipMessage::Request(SipRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            headers,
            body,
        })),
        _ => Err(SipError::Parse(format!("bad start line '{}'", start))),
    }
}

fn expand_compact(name: &str) -> String {
    let full = match name {
        "v" | "V" => "Via",
        "f" | "F" => "From",
        "t" | "T" => "To",
        "i" | "I" => "Call-ID",
        "m" | "M" => "Contact",
        "l" | "L" => "Content-Length",
        "c" | "C" => "Content-Type",
        other => other,
    };
    full.to_string()
}

/// The `tag` parameter of a From/To value
pub fn tag_param(value: &str) -> Option<&str> {
    header_param(value, "tag")
}

/// A `;name=value` parameter after the URI part of a header value
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let params = match value.rfind('>') {
        Some(pos) => &value[pos + 1..],
        None => value,
    };
    params.split(';').skip_while(|p| p.contains(':')).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim().eq_ignore_ascii_case(name).then(|| val.trim().trim_matches('"'))
    })
}

/// The URI inside `<...>` of a name-addr, or the value itself
pub fn addr_uri(value: &str) -> &str {
    match (value.find('<'), value.find('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value.split(';').next().unwrap_or(value).trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_sets_content_length() {
        let request = SipRequest::new("OPTIONS", "sip:pbx.example.com")
            .header("Call-ID", "abc")
            .header("Content-Length", "999");
        assert_eq!(
            request.to_string(),
            "OPTIONS sip:pbx.example.com SIP/2.0\r\nCall-ID: abc\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_parse_response_with_compact_headers() {
        let text = "SIP/2.0 200 OK\r\nv: SIP/2.0/WSS a.invalid;branch=z9hG4bK1\r\ni: call-1\r\nCSeq: 2 REGISTER\r\nm: <sip:9001@a.invalid;transport=ws>;expires=300\r\nl: 0\r\n\r\n";
        let message = parse(text).unwrap();
        let SipMessage::Response(response) = &message else {
            panic!("expected response");
        };
        assert_eq!(response.status, 200);
        assert_eq!(message.call_id(), Some("call-1"));
        assert_eq!(message.cseq(), Some((2, "REGISTER")));
        assert_eq!(header_param(response.headers.get("Contact").unwrap(), "expires"), Some("300"));
    }

    #[test]
    fn test_parse_request_and_answer() {
        let text = "BYE sip:9001@a.invalid;transport=ws SIP/2.0\r\nVia: SIP/2.0/WSS pbx;branch=z9hG4bKx\r\nFrom: <sip:*90205@pbx>;tag=remote\r\nTo: <sip:9001@pbx>;tag=local\r\nCall-ID: c1\r\nCSeq: 5 BYE\r\nContent-Length: 0\r\n\r\n";
        let SipMessage::Request(request) = parse(text).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, "BYE");

        let response = SipResponse::to_request(&request, 200, "OK", "ignored");
        let rendered = response.to_string();
        assert!(rendered.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(rendered.contains("To: <sip:9001@pbx>;tag=local\r\n"));
        assert!(rendered.contains("CSeq: 5 BYE\r\n"));
    }

    #[test]
    fn test_tag_and_uri_helpers() {
        let value = "\"Supervisor\" <sip:9001@pbx.example.com;transport=ws>;tag=abc123";
        assert_eq!(tag_param(value), Some("abc123"));
        assert_eq!(addr_uri(value), "sip:9001@pbx.example.com;transport=ws");
        assert_eq!(tag_param("<sip:9001@pbx.example.com>"), None);
    }

    #[test]
    fn test_content_length_inside_multibyte_char_keeps_whole_body() {
        let text = "SIP/2.0 200 OK\r\nCall-ID: x\r\nCSeq: 1 INVITE\r\nContent-Length: 1\r\n\r\n\u{e9}";
        let SipMessage::Response(response) = parse(text).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "\u{e9}");

        let truncated = "SIP/2.0 200 OK\r\nCall-ID: x\r\nCSeq: 1 INVITE\r\nContent-Length: 2\r\n\r\nv=0";
        let SipMessage::Response(response) = parse(truncated).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.body, "v=");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("hello world").is_err());
    }
}
