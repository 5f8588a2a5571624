//! HTTP Signatures for ActivityPub
//!
//! Implements the draft-cavage profile used across the fediverse, pinned to
//! exactly four signed components:
//!
//! ```text
//! (request-target): post /inbox
//! host: <host>
//! date: <date>
//! digest: sha-256=<digest>
//! ```
//!
//! The receiver always rebuilds this string from its own view of the
//! request; the sender's `headers` list is only checked, never followed.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Signed components, in the only order this profile accepts.
pub const SIGNED_HEADERS: [&str; 4] = ["(request-target)", "host", "date", "digest"];

const DIGEST_ALGORITHM: &str = "sha-256";
const SUPPORTED_ALGORITHMS: [&str; 2] = ["rsa-sha256", "hs2019"];

/// Build the canonical signing string.
pub fn build_signing_string(
    method: &str,
    path: &str,
    host: &str,
    date: &str,
    digest: &str,
) -> String {
    format!(
        "(request-target): {} {}\nhost: {}\ndate: {}\ndigest: {}",
        method.to_ascii_lowercase(),
        path,
        host,
        date,
        digest
    )
}

/// Generate SHA-256 digest header value for a body
///
/// # Returns
/// `sha-256=base64(hash)`
pub fn compute_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("{}={}", DIGEST_ALGORITHM, BASE64.encode(hash))
}

/// Check a received `Digest` header against the body actually received.
///
/// The algorithm label is compared case-insensitively; other algorithms
/// listed next to sha-256 are ignored.
pub fn digest_matches(digest_header: &str, body: &[u8]) -> bool {
    let expected = BASE64.encode(Sha256::digest(body));

    digest_header.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(algorithm, value)| {
                algorithm.trim().eq_ignore_ascii_case(DIGEST_ALGORITHM) && value.trim() == expected
            })
    })
}

/// Sign a signing string with RSA-SHA256 (PKCS#1 v1.5).
///
/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
pub fn sign(private_key_pem: &str, signing_string: &str) -> Result<Vec<u8>, AppError> {
    let private_key = parse_private_key(private_key_pem)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    Ok(signature.to_vec())
}

/// Verify an RSA-SHA256 signature.
///
/// Never fails: a malformed key or signature is simply not a valid signature.
pub fn verify(public_key_pem: &str, signing_string: &str, signature: &[u8]) -> bool {
    let Ok(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(signature) = Pkcs1v15Signature::try_from(signature) else {
        return false;
    };

    VerifyingKey::<Sha256>::new(public_key)
        .verify(signing_string.as_bytes(), &signature)
        .is_ok()
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, AppError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::KeySigning(format!("invalid private key: {}", e)))
}

/// Parse an RSA public key from SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 PEM.
pub(crate) fn parse_public_key(pem: &str) -> Result<RsaPublicKey, String> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| e.to_string())
}

/// Format a timestamp as an HTTP date (RFC 1123, always GMT).
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP `Date` header value.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// `Host` value for a URL: host plus any non-default port.
pub fn server_name(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation(format!("Missing host in URL: {}", url)))?
        .to_ascii_lowercase();

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Path and query used in `(request-target)`.
pub fn request_target_path(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Headers to add for a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub host: String,
    /// Date header value (RFC 1123)
    pub date: String,
    pub digest: String,
    pub signature: String,
}

/// Sign an outgoing POST
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Exact request body bytes
/// * `key_id` - Full URL to the public key (actor#main-key)
/// * `private_key_pem` - RSA private key in PEM format
///
/// # Example
/// ```ignore
/// let headers = sign_request(
///     "POST",
///     &"https://remote.example/inbox".parse()?,
///     &body,
///     "https://local.example/users/alice#main-key",
///     &private_key,
/// )?;
/// ```
pub fn sign_request(
    method: &str,
    url: &url::Url,
    body: &[u8],
    key_id: &str,
    private_key_pem: &str,
) -> Result<SignedHeaders, AppError> {
    let host = server_name(url)?;
    let date = format_http_date(Utc::now());
    let digest = compute_digest(body);

    let signing_string =
        build_signing_string(method, &request_target_path(url), &host, &date, &digest);
    let signature = sign(private_key_pem, &signing_string)?;

    Ok(SignedHeaders {
        host,
        date,
        digest,
        signature: format_signature_header(key_id, &signature),
    })
}

/// Format the wire `Signature` header.
pub fn format_signature_header(key_id: &str, signature: &[u8]) -> String {
    format!(
        "keyId=\"{}\",headers=\"{}\",signature=\"{}\"",
        escape_quoted(key_id),
        SIGNED_HEADERS.join(" "),
        BASE64.encode(signature)
    )
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parsed `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaderFields {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Declared algorithm, if the sender included one
    pub algorithm: Option<String>,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Decoded signature bytes
    pub signature: Vec<u8>,
}

/// Parse a `Signature` header value
///
/// # Format
/// ```text
/// keyId="...",headers="(request-target) host date digest",signature="..."
/// ```
///
/// Values may be quoted strings (with backslash escapes) or bare tokens.
/// Unknown parameters are ignored; duplicated ones are rejected.
pub fn parse_signature_header(header: &str) -> Result<SignatureHeaderFields, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for (name, value) in ParamParser::new(header).parse()? {
        let slot = match name.to_ascii_lowercase().as_str() {
            "keyid" => &mut key_id,
            "algorithm" => &mut algorithm,
            "headers" => &mut headers,
            "signature" => &mut signature,
            _ => continue,
        };
        if slot.replace(value).is_some() {
            return Err(malformed(format!("duplicate parameter {}", name)));
        }
    }

    let key_id = key_id
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| malformed("missing keyId"))?;
    let headers: Vec<String> = headers
        .ok_or_else(|| malformed("missing headers"))?
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();
    let signature = signature.ok_or_else(|| malformed("missing signature"))?;

    if headers != SIGNED_HEADERS {
        return Err(malformed(format!(
            "signed headers must be exactly \"{}\", got \"{}\"",
            SIGNED_HEADERS.join(" "),
            headers.join(" ")
        )));
    }

    if let Some(algorithm) = &algorithm {
        if !SUPPORTED_ALGORITHMS
            .iter()
            .any(|supported| algorithm.eq_ignore_ascii_case(supported))
        {
            return Err(malformed(format!("unsupported algorithm {}", algorithm)));
        }
    }

    let signature = BASE64
        .decode(signature.trim())
        .map_err(|e| malformed(format!("signature is not base64: {}", e)))?;
    if signature.is_empty() {
        return Err(malformed("empty signature"));
    }

    Ok(SignatureHeaderFields {
        key_id,
        algorithm,
        headers,
        signature,
    })
}

fn malformed(reason: impl Into<String>) -> AppError {
    AppError::SignatureHeaderMalformed(reason.into())
}

/// Parser for `name=value, name="quoted value"` parameter lists.
struct ParamParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ParamParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse(mut self) -> Result<Vec<(String, String)>, AppError> {
        let mut params = Vec::new();

        self.skip_whitespace();
        if self.peek().is_none() {
            return Err(malformed("empty header"));
        }

        loop {
            self.skip_whitespace();
            let name = self.name()?;
            self.skip_whitespace();
            if self.bump() != Some('=') {
                return Err(malformed(format!("expected '=' after {}", name)));
            }
            self.skip_whitespace();
            let value = match self.peek() {
                Some('"') => self.quoted()?,
                _ => self.token(),
            };
            params.push((name, value));

            self.skip_whitespace();
            match self.bump() {
                None => return Ok(params),
                Some(',') => continue,
                Some(other) => {
                    return Err(malformed(format!(
                        "unexpected '{}' at byte {}",
                        other,
                        self.pos - other.len_utf8()
                    )));
                }
            }
        }
    }

    fn name(&mut self) -> Result<String, AppError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(malformed(format!("expected parameter name at byte {}", start)));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn quoted(&mut self) -> Result<String, AppError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => return Err(malformed("unterminated escape")),
                },
                Some(c) => value.push(c),
                None => return Err(malformed("unterminated quoted string")),
            }
        }
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c != ',' && !c.is_whitespace()) {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }
}
