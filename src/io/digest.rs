//! HTTP digest access authentication (RFC 7616, RFC 2617 compatible)
//!
//! Modelled as two explicit steps so the caller owns the timing of both round
//! trips: parse the `WWW-Authenticate` challenge from a 401, then build the
//! `Authorization` header for the retried request.

use crate::domain::lane::Credentials;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("authentication scheme is not Digest: {0}")]
    NotDigest(String),
    #[error("challenge is missing `{0}`")]
    MissingParam(&'static str),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported qop: {0}")]
    UnsupportedQop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(token: &str) -> Result<Self, ChallengeError> {
        match token.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Algorithm::Md5),
            "MD5-SESS" => Ok(Algorithm::Md5Sess),
            "SHA-256" => Ok(Algorithm::Sha256),
            "SHA-256-SESS" => Ok(Algorithm::Sha256Sess),
            _ => Err(ChallengeError::UnsupportedAlgorithm(token.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => hex::encode(Md5::digest(data.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                hex::encode(Sha256::digest(data.as_bytes()))
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    /// `true` when the server offered `qop=auth`; `false` for legacy RFC 2069 challenges
    pub qop_auth: bool,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self, ChallengeError> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(ChallengeError::NotDigest(scheme.to_string()));
        }

        let mut params = parse_params(rest);
        let realm = params.remove("realm").ok_or(ChallengeError::MissingParam("realm"))?;
        let nonce = params.remove("nonce").ok_or(ChallengeError::MissingParam("nonce"))?;
        let algorithm = match params.get("algorithm") {
            Some(token) => Algorithm::parse(token)?,
            None => Algorithm::Md5,
        };

        let qop_auth = match params.get("qop") {
            None => false,
            Some(options) => {
                if options.split(',').any(|o| o.trim().eq_ignore_ascii_case("auth")) {
                    true
                } else {
                    return Err(ChallengeError::UnsupportedQop(options.clone()));
                }
            }
        };

        Ok(Self { realm, nonce, opaque: params.remove("opaque"), algorithm, qop_auth })
    }

    /// The `response` value for one request
    ///
    /// `nc` is the 8-hex-digit nonce count; `nc` and `cnonce` are ignored for legacy challenges.
    pub fn response(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        nc: &str,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;
        let mut ha1 =
            alg.hash(&format!("{}:{}:{}", credentials.username, self.realm, credentials.password));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = alg.hash(&format!("{}:{}", method, uri));

        if self.qop_auth {
            alg.hash(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2))
        } else {
            alg.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        }
    }

    /// Full `Authorization` header value
    pub fn authorization(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let nc = format!("{:08x}", nc);
        let response = self.response(credentials, method, uri, &nc, cnonce);

        let mut header = format!(
            "Digest username={}, realm={}, nonce={}, uri={}, algorithm={}, response={}",
            quote(&credentials.username),
            quote(&self.realm),
            quote(&self.nonce),
            quote(uri),
            self.algorithm.as_str(),
            quote(&response),
        );
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque={}", quote(opaque)));
        }
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={}, cnonce={}", nc, quote(cnonce)));
        }
        header
    }
}

/// Fresh client nonce
pub fn new_cnonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse `key=value, key="quoted, value"` auth parameters. Keys are lowercased.
pub fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            params.insert(key.to_ascii_lowercase(), String::new());
            continue;
        }
        chars.next();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        params.insert(key.to_ascii_lowercase(), value);
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mufasa() -> Credentials {
        Credentials::new("Mufasa", "Circle Of Life")
    }

    #[test]
    fn test_parse_dahua_challenge() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="Login to 4L01234PAZ", qop="auth", nonce="1795384613", opaque="d4f2a0b6""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "Login to 4L01234PAZ");
        assert_eq!(challenge.nonce, "1795384613");
        assert_eq!(challenge.opaque.as_deref(), Some("d4f2a0b6"));
        assert_eq!(challenge.algorithm, Algorithm::Md5);
        assert!(challenge.qop_auth);
    }

    #[test]
    fn test_rfc2617_example_response() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();

        let response =
            challenge.response(&mufasa(), "GET", "/dir/index.html", "00000001", "0a4f113b");
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_authorization_header_fields() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();

        let header = challenge.authorization(&mufasa(), "GET", "/dir/index.html", 1, "0a4f113b");
        assert!(header.starts_with("Digest "));

        let params = parse_params(header.trim_start_matches("Digest "));
        assert_eq!(params["username"], "Mufasa");
        assert_eq!(params["uri"], "/dir/index.html");
        assert_eq!(params["nc"], "00000001");
        assert_eq!(params["qop"], "auth");
        assert_eq!(params["opaque"], "5ccc069c403ebaf9f0171e9517f40e41");
        assert_eq!(params["response"], "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_legacy_challenge_without_qop() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        assert!(!challenge.qop_auth);

        let header = challenge.authorization(&mufasa(), "GET", "/", 1, "c");
        assert!(!header.contains("qop="));
        assert!(!header.contains("cnonce="));

        let expected = {
            let ha1 = hex::encode(Md5::digest(b"Mufasa:r:Circle Of Life"));
            let ha2 = hex::encode(Md5::digest(b"GET:/"));
            hex::encode(Md5::digest(format!("{}:n:{}", ha1, ha2).as_bytes()))
        };
        assert_eq!(challenge.response(&mufasa(), "GET", "/", "00000001", "c"), expected);
    }

    #[test]
    fn test_sha256_and_session_variants() {
        let sha = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth", algorithm=SHA-256"#)
            .unwrap();
        assert_eq!(sha.algorithm, Algorithm::Sha256);
        let response = sha.response(&mufasa(), "GET", "/", "00000001", "c");
        assert_eq!(response.len(), 64);

        let sess = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth", algorithm=MD5-sess"#)
            .unwrap();
        let plain = DigestChallenge { algorithm: Algorithm::Md5, ..sess.clone() };
        assert_ne!(
            sess.response(&mufasa(), "GET", "/", "00000001", "c"),
            plain.response(&mufasa(), "GET", "/", "00000001", "c")
        );
    }

    #[test]
    fn test_challenge_errors() {
        assert_eq!(
            DigestChallenge::parse(r#"Basic realm="r""#),
            Err(ChallengeError::NotDigest("Basic".to_string()))
        );
        assert_eq!(
            DigestChallenge::parse(r#"Digest nonce="n""#),
            Err(ChallengeError::MissingParam("realm"))
        );
        assert_eq!(
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-512-256"#),
            Err(ChallengeError::UnsupportedAlgorithm("SHA-512-256".to_string()))
        );
        assert!(matches!(
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth-int""#),
            Err(ChallengeError::UnsupportedQop(_))
        ));
    }

    #[test]
    fn test_parse_params_quoting() {
        let params = parse_params(r#"realm="a, \"b\"", stale=FALSE , nonce=xyz"#);
        assert_eq!(params["realm"], r#"a, "b""#);
        assert_eq!(params["stale"], "FALSE");
        assert_eq!(params["nonce"], "xyz");
    }

    #[test]
    fn test_cnonce_is_random_hex() {
        let a = new_cnonce();
        let b = new_cnonce();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
