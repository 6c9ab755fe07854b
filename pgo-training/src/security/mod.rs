// Security helpers: secret generation and log-safe fingerprints.

pub mod crypto;
