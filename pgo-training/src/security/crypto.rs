// Cryptographic utilities

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// SHA-256 base64 digest (STANDARD).
pub fn sha256_base64(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Compute a safe fingerprint for a secret (hash only; never log the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_base64(input.as_bytes())
}

/// Random `[A-Za-z0-9]` token of `len` characters from the OS CSPRNG.
///
/// Uses rejection sampling so every character is equally likely.
pub fn generate_token(len: usize) -> Result<String> {
    let rng = SystemRandom::new();
    // Largest multiple of the alphabet size that fits in a byte.
    let limit = 256 - (256 % TOKEN_ALPHABET.len());

    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        rng.fill(&mut buf)
            .map_err(|_| anyhow::anyhow!("System RNG unavailable"))?;
        for b in buf.iter().map(|b| *b as usize) {
            if b >= limit {
                continue;
            }
            out.push(TOKEN_ALPHABET[b % TOKEN_ALPHABET.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }
    Ok(out)
}
