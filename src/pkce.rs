//! PKCE (RFC 7636) verifier and S256 challenge generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters allowed in a code verifier
const VERIFIER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

/// A code verifier and its derived challenge.
///
/// The challenge is always `BASE64URL(SHA256(verifier))` without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceCodeChallenge {
    verifier: String,
    challenge: String,
}

impl PkceCodeChallenge {
    /// Generate a random verifier of 43 to 128 characters
    pub fn new_random() -> Self {
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN);
        let verifier: String = (0..len)
            .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
            .collect();
        PkceCodeChallenge::from_verifier(verifier)
    }

    /// Derive the challenge for an existing verifier
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = s256(&verifier);
        PkceCodeChallenge { verifier, challenge }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Always `S256`
    pub fn method(&self) -> &'static str {
        "S256"
    }
}

fn s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
