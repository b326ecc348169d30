//! Ephemeral host keys and fingerprinting (spec §4.3 step 1, §4.4 step 6).
//!
//! The receiver never persists a host key: a fresh Ed25519 keypair is
//! generated for every session and its fingerprint is what the relay
//! publishes to the sender for pinning.

use rand::rngs::OsRng;
use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};

/// Generates a fresh Ed25519 host key for one receiver session.
pub fn generate_ephemeral_host_key() -> Result<PrivateKey, russh::keys::Error> {
    PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
}

/// The `SHA256:...` fingerprint of a public key, exactly as spec §3 defines
/// `Invite.ReceiverFP` and as the sender pins in `ConnectAndHandshake`.
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_has_sha256_prefix() {
        let key = generate_ephemeral_host_key().unwrap();
        let fp = fingerprint(&key.public_key());
        assert!(fp.starts_with("SHA256:"), "unexpected fingerprint shape: {fp}");
    }

    #[test]
    fn distinct_keys_have_distinct_fingerprints() {
        let a = generate_ephemeral_host_key().unwrap();
        let b = generate_ephemeral_host_key().unwrap();
        assert_ne!(fingerprint(&a.public_key()), fingerprint(&b.public_key()));
    }
}
