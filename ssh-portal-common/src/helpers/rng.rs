use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// A fresh cryptographically secure RNG, seeded from the OS.
pub fn get_crypto_rng() -> ChaCha20Rng {
    ChaCha20Rng::from_os_rng()
}
