//! Stateless session tokens.
//!
//! A token is `B64URL(value) | B64URL(HMAC-SHA256(secret, value))` with
//! `value = "<username> <unix expiry>"`. The secret lives only in memory, so a
//! restart logs everybody out.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;

pub const TOKEN_COOKIE: &str = "GROUND-USER-TOKEN";
pub const REDIRECT_COOKIE: &str = "GROUND-REDIRECT-URL";
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 3600);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Issues and checks tokens with a per-process secret.
#[derive(Clone)]
pub struct Signer {
    secret: Arc<[u8; 32]>,
}

impl Signer {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.as_slice()).expect("HMAC accepts keys of any length")
    }

    pub fn issue(&self, username: &str, now: SystemTime) -> String {
        let expiry = unix_seconds(now + TOKEN_LIFETIME);
        let value = format!("{username} {expiry}");
        let mut mac = self.mac();
        mac.update(value.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!(
            "{}|{}",
            URL_SAFE_NO_PAD.encode(value.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Returns the username the token was issued for.
    pub fn verify(&self, token: &str, now: SystemTime) -> Result<String, TokenError> {
        let mut parts = token.split('|');
        let (Some(value), Some(signature), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        let value = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        // verify_slice compares in constant time
        let mut mac = self.mac();
        mac.update(&value);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let value = String::from_utf8(value).map_err(|_| TokenError::Malformed)?;
        let fields: Vec<&str> = value.split(' ').collect();
        let [username, expiry] = fields.as_slice() else {
            return Err(TokenError::Malformed);
        };
        let expiry: u64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        if username.is_empty() {
            return Err(TokenError::Malformed);
        }
        if unix_seconds(now) > expiry {
            return Err(TokenError::Expired);
        }
        Ok(username.to_string())
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn session_cookie(name: &'static str, value: String, expires: OffsetDateTime) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .expires(expires)
        .build()
}

pub fn token_cookie(token: String, now: SystemTime) -> Cookie<'static> {
    session_cookie(TOKEN_COOKIE, token, OffsetDateTime::from(now + TOKEN_LIFETIME))
}

pub fn cleared_token_cookie() -> Cookie<'static> {
    session_cookie(TOKEN_COOKIE, String::new(), OffsetDateTime::UNIX_EPOCH)
}

/// Remembers where an unauthenticated visitor was headed. The jar
/// percent-encodes the value on the way out and decodes it on the way in.
pub fn redirect_cookie(url: &str, now: SystemTime) -> Cookie<'static> {
    session_cookie(
        REDIRECT_COOKIE,
        url.to_string(),
        OffsetDateTime::from(now + TOKEN_LIFETIME),
    )
}

pub fn cleared_redirect_cookie() -> Cookie<'static> {
    session_cookie(REDIRECT_COOKIE, String::new(), OffsetDateTime::UNIX_EPOCH)
}

/// The stored redirect target, accepting only same-site absolute paths.
pub fn redirect_target(url: &str) -> String {
    if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") && url != "/login" {
        url.to_string()
    } else {
        "/".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::from_secret([7u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let signer = signer();
        let now = SystemTime::now();
        for user in ["alice", "_svc", "bob-2"] {
            let token = signer.issue(user, now);
            assert_eq!(signer.verify(&token, now).unwrap(), user);
            let later = now + TOKEN_LIFETIME - Duration::from_secs(1);
            assert_eq!(signer.verify(&token, later).unwrap(), user);
        }
    }

    #[test]
    fn test_expired() {
        let signer = signer();
        let now = SystemTime::now();
        let token = signer.issue("alice", now);
        let after = now + TOKEN_LIFETIME + Duration::from_secs(2);
        assert_eq!(signer.verify(&token, after), Err(TokenError::Expired));
    }

    #[test]
    fn test_other_secret_rejected() {
        let now = SystemTime::now();
        let token = signer().issue("alice", now);
        let other = Signer::from_secret([8u8; 32]);
        assert_eq!(other.verify(&token, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_bit_flips_rejected() {
        let signer = signer();
        let now = SystemTime::now();
        let token = signer.issue("alice", now);
        let bytes = token.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] == b'|' {
                continue;
            }
            for bit in 0..8 {
                let mut tampered = bytes.to_vec();
                tampered[i] ^= 1 << bit;
                let Ok(tampered) = String::from_utf8(tampered) else {
                    continue;
                };
                assert!(
                    signer.verify(&tampered, now).is_err(),
                    "flip of bit {bit} at {i} accepted"
                );
            }
        }
    }

    #[test]
    fn test_truncation_and_swap_rejected() {
        let signer = signer();
        let now = SystemTime::now();
        let token = signer.issue("alice", now);
        let (value, signature) = token.split_once('|').unwrap();

        let truncated_value = format!("{}|{}", &value[..value.len() - 1], signature);
        assert!(signer.verify(&truncated_value, now).is_err());
        let truncated_sig = format!("{}|{}", value, &signature[..signature.len() - 1]);
        assert!(signer.verify(&truncated_sig, now).is_err());
        let swapped = format!("{signature}|{value}");
        assert!(signer.verify(&swapped, now).is_err());

        assert_eq!(signer.verify(value, now), Err(TokenError::Malformed));
        assert_eq!(
            signer.verify(&format!("{token}|x"), now),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_value_with_extra_field_rejected() {
        // A correctly signed value must still parse as exactly two fields.
        let signer = signer();
        let value = "alice bob 99999999999";
        let mut mac = signer.mac();
        mac.update(value.as_bytes());
        let token = format!(
            "{}|{}",
            URL_SAFE_NO_PAD.encode(value),
            URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
        );
        assert_eq!(
            signer.verify(&token, SystemTime::now()),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_redirect_target() {
        let cookie = redirect_cookie("/files/docs?sort=size", SystemTime::now());
        assert_eq!(redirect_target(cookie.value()), "/files/docs?sort=size");
        assert_eq!(cookie.value(), "/files/docs?sort=size");
        assert_eq!(redirect_target("/files/a%20b"), "/files/a%20b");
        assert_eq!(redirect_target("//evil.example"), "/");
        assert_eq!(redirect_target("/\\evil.example"), "/");
        assert_eq!(redirect_target("https://evil.example"), "/");
        assert_eq!(redirect_target("/login"), "/");
        assert_eq!(redirect_target(""), "/");
    }

    #[test]
    fn test_cleared_cookie_expires_at_epoch() {
        let cookie = cleared_token_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.expires_datetime(), Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(cookie.path(), Some("/"));
    }
}
