//! CSRF double-submit token scheme.
//!
//! The secret half lives in an HTTP-only cookie the browser replays
//! automatically; the token half is derived from the secret under a
//! server-side signing key and echoed back by client code in a request
//! header. A forged cross-origin request can trigger the cookie but cannot
//! read the token, so the pair never matches. Verification is stateless:
//! nothing is stored server-side.

use axum::http::Method;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the secret half of the pair.
pub const CSRF_COOKIE: &str = "csrf-secret";

/// Request/response header carrying the derived token.
pub const CSRF_HEADER: &str = "x-csrf-token";

const SECRET_LEN: usize = 32;
const NONCE_LEN: usize = 16;

/// CSRF policy configuration.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Cookie name for the secret half
    pub cookie_name: String,

    /// Header name for the token half
    pub token_header: String,

    /// Methods that mutate state and therefore require the pair
    pub protected_methods: Vec<Method>,

    /// Paths exempt from verification. The issuance endpoint must be here:
    /// a client cannot hold a token before fetching its first one.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: CSRF_COOKIE.into(),
            token_header: CSRF_HEADER.into(),
            protected_methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            exempt_paths: vec!["/api/csrf".into()],
        }
    }
}

impl CsrfConfig {
    pub fn is_protected(&self, method: &Method) -> bool {
        self.protected_methods.contains(method)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|e| path == e)
    }
}

/// A freshly issued secret/token pair.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Goes into the HTTP-only cookie, never exposed to script
    pub secret: String,

    /// Goes into a client-readable channel (header or body)
    pub token: String,
}

/// Creates and verifies secret/token pairs.
///
/// Tokens have the form `{nonce_hex}.{tag_hex}` with
/// `tag = HMAC-SHA256(signing_key, nonce || ":" || secret)`. The random
/// nonce makes every issued token distinct while verification remains a
/// pure recomputation from the token itself and the presented secret.
pub struct TokenCodec {
    signing_key: [u8; 32],
}

impl TokenCodec {
    pub fn new(signing_key: [u8; 32]) -> Self {
        Self { signing_key }
    }

    /// Construct from a hex-encoded 32-byte key (configuration path).
    pub fn from_hex(key: &str) -> crate::error::Result<Self> {
        let bytes = hex::decode(key).map_err(|_| {
            crate::error::GatehouseError::Configuration(
                "csrf signing key is not valid hex".into(),
            )
        })?;
        let signing_key: [u8; 32] = bytes.try_into().map_err(|_| {
            crate::error::GatehouseError::Configuration(
                "csrf signing key must be exactly 32 bytes".into(),
            )
        })?;
        Ok(Self { signing_key })
    }

    /// Construct with a random key. Outstanding tokens do not survive a
    /// restart on this path.
    pub fn generate() -> Self {
        let mut signing_key = [0u8; 32];
        OsRng.fill_bytes(&mut signing_key);
        Self { signing_key }
    }

    /// Generate a fresh secret and a token bound to it.
    pub fn issue(&self) -> IssuedToken {
        let mut secret_bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret_bytes);
        let secret = URL_SAFE_NO_PAD.encode(secret_bytes);
        let token = self.token_for(&secret);
        IssuedToken { secret, token }
    }

    /// Derive a new token for an existing secret. Previously issued tokens
    /// for the same secret stay valid.
    pub fn token_for(&self, secret: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let tag = self.tag(&nonce, secret);
        format!("{}.{}", hex::encode(nonce), hex::encode(tag))
    }

    /// Check a presented token against a presented secret.
    ///
    /// Returns false on any malformed input; missing halves are the
    /// caller's uniform rejection, not a distinct error class.
    pub fn verify(&self, secret: &str, token: &str) -> bool {
        let Some((nonce_hex, tag_hex)) = token.split_once('.') else {
            return false;
        };
        let Ok(nonce) = hex::decode(nonce_hex) else {
            return false;
        };
        let Ok(tag) = hex::decode(tag_hex) else {
            return false;
        };
        if nonce.len() != NONCE_LEN {
            return false;
        }
        let expected = self.tag(&nonce, secret);
        expected.as_slice().ct_eq(&tag).into()
    }

    fn tag(&self, nonce: &[u8], secret: &str) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC can take key of any size");
        mac.update(nonce);
        mac.update(b":");
        mac.update(secret.as_bytes());
        mac.finalize().into_bytes().into()
    }
}
