//! SolarNetwork V2 (`SNWS2`) request signing.
//!
//! A signature covers the request method, path, query, the `host` and
//! `x-sn-date` headers and an empty body digest. The key is derived from the
//! token secret and the signing day, so a header is only valid around the
//! timestamp it was built for.

use crate::error::NimError;
use crate::types::NimResult;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, Url};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNING_SCHEME: &str = "SNWS2";
pub const SIGNING_ALGORITHM: &str = "SNWS2-HMAC-SHA256";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_PRESIGNED_AUTHORIZATION: &str = "X-SN-PreSignedAuthorization";
pub const HEADER_DATE: &str = "X-SN-Date";

const SIGNED_HEADERS: &str = "host;x-sn-date";
const SIGNING_KEY_TERMINATOR: &[u8] = b"snws2_request";

/// A SolarNetwork security token. The secret never leaves memory and is wiped
/// when the identity is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    token_id: String,
    secret: String,
}

impl Identity {
    pub fn new(token_id: impl Into<String>, secret: impl Into<String>) -> NimResult<Self> {
        let token_id = token_id.into();
        let secret = secret.into();

        if token_id.trim().is_empty() {
            return Err(NimError::InvalidIdentity(
                "token ID must not be empty".to_string(),
            ));
        }
        if secret.trim().is_empty() {
            return Err(NimError::InvalidIdentity(
                "token secret must not be empty".to_string(),
            ));
        }

        Ok(Self { token_id, secret })
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("token_id", &self.token_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    /// The signed request is the request that gets sent.
    Direct,
    /// The signed request is relayed by a delegate that verifies it later.
    Delegated,
}

/// Header values produced for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeaders {
    pub mode: SigningMode,
    pub authorization: String,
    pub date: String,
}

impl AuthorizationHeaders {
    pub fn authorization_header_name(&self) -> &'static str {
        match self.mode {
            SigningMode::Direct => HEADER_AUTHORIZATION,
            SigningMode::Delegated => HEADER_PRESIGNED_AUTHORIZATION,
        }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(HEADER_DATE, self.date.as_str())
            .header(self.authorization_header_name(), self.authorization.as_str())
    }
}

/// Sign the request that will actually be sent.
pub fn sign_direct(
    method: &Method,
    url: &Url,
    identity: &Identity,
    timestamp: DateTime<Utc>,
) -> AuthorizationHeaders {
    AuthorizationHeaders {
        mode: SigningMode::Direct,
        authorization: sign(method, url, identity, timestamp),
        date: http_date(timestamp),
    }
}

/// Sign `target_method target_url` for a delegate to replay on our behalf.
pub fn sign_delegated(
    target_method: &Method,
    target_url: &Url,
    identity: &Identity,
    timestamp: DateTime<Utc>,
) -> AuthorizationHeaders {
    AuthorizationHeaders {
        mode: SigningMode::Delegated,
        authorization: sign(target_method, target_url, identity, timestamp),
        date: http_date(timestamp),
    }
}

/// Build the `SNWS2` authorization header value for a request.
pub fn sign(method: &Method, url: &Url, identity: &Identity, timestamp: DateTime<Utc>) -> String {
    let canonical = canonical_request(method, url, &http_date(timestamp));
    let string_to_sign = format!(
        "{}\n{}\n{}",
        SIGNING_ALGORITHM,
        timestamp.format("%Y%m%dT%H%M%SZ"),
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );

    let key = signing_key(&identity.secret, timestamp);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "{} Credential={},SignedHeaders={},Signature={}",
        SIGNING_SCHEME, identity.token_id, SIGNED_HEADERS, signature
    )
}

/// RFC 1123 date in GMT, the format of the `X-SN-Date` header.
pub fn http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn canonical_request(method: &Method, url: &Url, date: &str) -> String {
    let path = match url.path() {
        "" => "/",
        path => path,
    };

    format!(
        "{}\n{}\n{}\nhost:{}\nx-sn-date:{}\n{}\n{}",
        method.as_str(),
        path,
        canonical_query(url),
        host_header(url),
        date,
        SIGNED_HEADERS,
        hex::encode(Sha256::digest(b""))
    )
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) if port != 80 && port != 443 => format!("{host}:{port}"),
        _ => host.to_string(),
    }
}

fn signing_key(secret: &str, timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut seed = format!("{SIGNING_SCHEME}{secret}").into_bytes();
    let day_key = hmac_sha256(&seed, timestamp.format("%Y%m%d").to_string().as_bytes());
    seed.zeroize();
    hmac_sha256(&day_key, SIGNING_KEY_TERMINATOR)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity::new("test.token", "test.secret").unwrap()
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 25, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_identity_rejects_empty_values() {
        assert!(matches!(
            Identity::new("", "secret"),
            Err(NimError::InvalidIdentity(_))
        ));
        assert!(matches!(
            Identity::new("   ", "secret"),
            Err(NimError::InvalidIdentity(_))
        ));
        assert!(matches!(
            Identity::new("token", ""),
            Err(NimError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_identity_debug_redacts_secret() {
        let debug = format!("{:?}", identity());
        assert!(debug.contains("test.token"));
        assert!(!debug.contains("test.secret"));
    }

    #[test]
    fn test_http_date_format() {
        assert_eq!(http_date(timestamp()), "Tue, 25 Apr 2017 14:30:00 GMT");
    }

    #[test]
    fn test_canonical_request_sorts_and_encodes_query() {
        let url = Url::parse("http://localhost:8080/api/v1/datum?b=two%20words&a=1").unwrap();
        let canonical = canonical_request(&Method::GET, &url, &http_date(timestamp()));
        assert_eq!(
            canonical,
            "GET\n/api/v1/datum\na=1&b=two%20words\nhost:localhost:8080\n\
             x-sn-date:Tue, 25 Apr 2017 14:30:00 GMT\nhost;x-sn-date\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sign_known_vector() {
        let url = Url::parse("https://data.solarnetwork.net/solaruser/api/v1/sec/whoami").unwrap();
        assert_eq!(
            sign(&Method::GET, &url, &identity(), timestamp()),
            "SNWS2 Credential=test.token,SignedHeaders=host;x-sn-date,\
             Signature=05127dfed53aeacd100e1decf65c556f16eeae8efe77cb1dae6bc03fd12e2df7"
        );

        let url = Url::parse("http://localhost:8080/api/v1/datum?b=two%20words&a=1").unwrap();
        assert!(sign(&Method::GET, &url, &identity(), timestamp()).ends_with(
            "Signature=ba4a90871bc8824728506475a39c0a88ed4b68afbe032c8f5e9f6352616b6e23"
        ));
    }

    #[test]
    fn test_sign_is_deterministic_and_input_sensitive() {
        let url = Url::parse("https://data.solarnetwork.net/solaruser/api/v1/sec/whoami").unwrap();
        let base = sign(&Method::GET, &url, &identity(), timestamp());
        assert_eq!(base, sign(&Method::GET, &url, &identity(), timestamp()));

        assert_ne!(base, sign(&Method::POST, &url, &identity(), timestamp()));

        let other_url = Url::parse("https://data.solarnetwork.net/solaruser/api/v1/sec/nim").unwrap();
        assert_ne!(base, sign(&Method::GET, &other_url, &identity(), timestamp()));

        let later = Utc.with_ymd_and_hms(2017, 4, 25, 14, 30, 1).unwrap();
        assert_ne!(base, sign(&Method::GET, &url, &identity(), later));

        let other_secret = Identity::new("test.token", "other.secret").unwrap();
        assert_ne!(base, sign(&Method::GET, &url, &other_secret, timestamp()));
    }

    #[test]
    fn test_signature_does_not_leak_secret() {
        let url = Url::parse("https://data.solarnetwork.net/").unwrap();
        let header = sign(&Method::GET, &url, &identity(), timestamp());
        assert!(!header.contains("test.secret"));
    }

    #[test]
    fn test_modes_choose_header_names() {
        let url = Url::parse("https://data.solarnetwork.net/solaruser/api/v1/sec/whoami").unwrap();
        let direct = sign_direct(&Method::GET, &url, &identity(), timestamp());
        let delegated = sign_delegated(&Method::GET, &url, &identity(), timestamp());

        assert_eq!(direct.authorization_header_name(), "Authorization");
        assert_eq!(
            delegated.authorization_header_name(),
            "X-SN-PreSignedAuthorization"
        );
        assert_eq!(direct.authorization, delegated.authorization);
        assert_eq!(delegated.date, "Tue, 25 Apr 2017 14:30:00 GMT");
    }
}
