//! SIP digest authentication (RFC 2617 / RFC 3261 §22)
//!
//! Supports `MD5` and `MD5-sess` with or without `qop=auth`.

use super::{SipError, SipResult};

/// A parsed `WWW-Authenticate` / `Proxy-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection realm
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Opaque value to echo back
    pub opaque: Option<String>,
    /// Algorithm, `MD5` when absent
    pub algorithm: String,
    /// Offered qop values
    pub qop: Vec<String>,
    /// Whether the previous nonce was merely stale
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a challenge header value
    ///
    /// ```rust
    /// use switchboard_client_core::sip::digest::DigestChallenge;
    ///
    /// let challenge = DigestChallenge::parse(
    ///     r#"Digest realm="asterisk", nonce="1700000000/abc", qop="auth,auth-int""#,
    /// ).unwrap();
    /// assert_eq!(challenge.realm, "asterisk");
    /// assert!(challenge.supports_auth_qop());
    /// ```
    pub fn parse(value: &str) -> SipResult<Self> {
        let value = value.trim();
        let (scheme, params) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("Digest") {
            return Err(SipError::Auth(format!("unsupported auth scheme '{}'", scheme)));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop = Vec::new();
        let mut stale = false;

        for (key, val) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => opaque = Some(val),
                "algorithm" => algorithm = Some(val),
                "qop" => qop = val.split(',').map(|q| q.trim().to_string()).filter(|q| !q.is_empty()).collect(),
                "stale" => stale = val.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        let algorithm = algorithm.unwrap_or_else(|| "MD5".to_string());
        if !algorithm.eq_ignore_ascii_case("MD5") && !algorithm.eq_ignore_ascii_case("MD5-sess") {
            return Err(SipError::Auth(format!("unsupported digest algorithm '{}'", algorithm)));
        }

        Ok(Self {
            realm: realm.ok_or_else(|| SipError::Auth("challenge has no realm".into()))?,
            nonce: nonce.ok_or_else(|| SipError::Auth("challenge has no nonce".into()))?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    /// Whether `qop=auth` is offered
    pub fn supports_auth_qop(&self) -> bool {
        self.qop.iter().any(|q| q.eq_ignore_ascii_case("auth"))
    }
}

/// Inputs of one digest response
#[derive(Debug, Clone)]
pub struct DigestRequest<'a> {
    /// Authenticating user (the extension)
    pub username: &'a str,
    /// Secret
    pub password: &'a str,
    /// Request method
    pub method: &'a str,
    /// Request-URI
    pub uri: &'a str,
    /// Nonce count for this nonce, starting at 1
    pub nonce_count: u32,
    /// Client nonce
    pub cnonce: &'a str,
}

/// The `response` hash
pub fn compute_response(challenge: &DigestChallenge, request: &DigestRequest<'_>) -> String {
    let mut ha1 = md5_hex(&format!("{}:{}:{}", request.username, challenge.realm, request.password));
    if challenge.algorithm.eq_ignore_ascii_case("MD5-sess") {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, request.cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", request.method, request.uri));

    if challenge.supports_auth_qop() {
        md5_hex(&format!(
            "{}:{}:{:08x}:{}:auth:{}",
            ha1, challenge.nonce, request.nonce_count, request.cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    }
}

/// A complete `Authorization` header value
pub fn authorization(challenge: &DigestChallenge, request: &DigestRequest<'_>) -> String {
    let response = compute_response(challenge, request);
    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        request.username, challenge.realm, challenge.nonce, request.uri, response, challenge.algorithm
    );
    if challenge.supports_auth_qop() {
        value.push_str(&format!(
            ", qop=auth, nc={:08x}, cnonce=\"{}\"",
            request.nonce_count, request.cnonce
        ));
    }
    if let Some(opaque) = &challenge.opaque {
        value.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    value
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Split `key=value, key="quoted, value"` pairs
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        params.push((key, value));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2617_vector() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        let request = DigestRequest {
            username: "Mufasa",
            password: "Circle Of Life",
            method: "GET",
            uri: "/dir/index.html",
            nonce_count: 1,
            cnonce: "0a4f113b",
        };
        assert_eq!(compute_response(&challenge, &request), "6629fae49393a05397450978507c4ef1");

        let header = authorization(&challenge, &request);
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("cnonce=\"0a4f113b\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_without_qop() {
        let challenge = DigestChallenge::parse(r#"Digest algorithm=MD5, realm="asterisk", nonce="abc""#).unwrap();
        assert!(!challenge.supports_auth_qop());
        let request = DigestRequest {
            username: "9001",
            password: "pw",
            method: "REGISTER",
            uri: "sip:pbx.example.com",
            nonce_count: 1,
            cnonce: "unused",
        };
        let ha1 = md5_hex("9001:asterisk:pw");
        let ha2 = md5_hex("REGISTER:sip:pbx.example.com");
        assert_eq!(compute_response(&challenge, &request), md5_hex(&format!("{}:abc:{}", ha1, ha2)));
        assert!(!authorization(&challenge, &request).contains("qop"));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_err());
        assert!(DigestChallenge::parse("Digest realm=\"x\"").is_err());
        assert!(DigestChallenge::parse("Digest realm=\"x\", nonce=\"n\", algorithm=SHA-512").is_err());
    }
}
