//! Signed context tokens.
//!
//! A token is a compact HS256 JWT whose payload is `{"context": ..., "iat": ...}`.
//! There is no `exp` claim: a token stays valid for as long as the bridge
//! process it was issued to keeps running.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{AuthenticationError, HostError};

const ALGORITHM: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Serialize)]
struct Claims<'a> {
    context: &'a Value,
    iat: u64,
}

/// Signs and verifies context tokens with one shared secret.
pub struct TokenSigner {
    key: hmac::Key,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_ref()),
        }
    }

    /// Embed `context` verbatim into a signed token.
    pub fn sign(&self, context: &Value) -> Result<String, serde_json::Error> {
        let header = serde_json::to_vec(&Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        })?;
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let claims = serde_json::to_vec(&Claims { context, iat })?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = hmac::sign(&self.key, signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.as_ref())
        ))
    }

    /// Check the signature and return the embedded context.
    ///
    /// Fails closed: any malformed segment, wrong algorithm, bad signature
    /// or missing context claim is an error.
    pub fn verify(&self, token: &str) -> Result<Value, AuthenticationError> {
        let fail = |message: &str| AuthenticationError(message.to_string());

        let mut parts = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(fail("jwt malformed"));
        };

        let header: Header = decode_segment(header).map_err(|e| fail(&format!("invalid token header: {e}")))?;
        if header.alg != ALGORITHM {
            return Err(fail("invalid algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| fail("invalid signature"))?;
        let signing_input = token.rfind('.').map_or(token, |dot| &token[..dot]);
        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| fail("invalid signature"))?;

        let mut claims: Map<String, Value> =
            decode_segment(claims).map_err(|e| fail(&format!("invalid token payload: {e}")))?;
        claims
            .remove("context")
            .ok_or_else(|| fail("token payload has no context claim"))
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, String> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

pub fn sign(secret: impl AsRef<[u8]>, context: &Value) -> Result<String, serde_json::Error> {
    TokenSigner::new(secret).sign(context)
}

pub fn verify(secret: impl AsRef<[u8]>, token: &str) -> Result<Value, AuthenticationError> {
    TokenSigner::new(secret).verify(token)
}

/// 32 random bytes, base64url encoded.
pub fn generate_secret() -> Result<String, HostError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], HostError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| HostError::Entropy)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_context() {
        for context in [
            json!({"tenant": "acme", "roles": ["admin"]}),
            json!("plain string"),
            json!(42),
            json!(null),
        ] {
            let token = sign("secret", &context).unwrap();
            assert_eq!(verify("secret", &token).unwrap(), context);
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign("secret", &json!({"user": 1})).unwrap();
        let err = verify("other-secret", &token).unwrap_err();
        assert_eq!(err, AuthenticationError("invalid signature".into()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign("secret", &json!({"user": 1})).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"context":{"user":2}}"#);
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);

        assert!(verify("secret", &tampered).is_err());
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.!!.!!"] {
            assert!(verify("secret", token).is_err(), "{token:?} should not verify");
        }
    }

    #[test]
    fn token_has_no_expiry_claim() {
        let token = sign("secret", &json!({})).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let claims: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert!(claims.get("exp").is_none());
        assert!(claims.get("iat").is_some());
    }

    #[test]
    fn generated_secrets_differ() {
        assert_ne!(generate_secret().unwrap(), generate_secret().unwrap());
    }
}
