//! Deterministic random streams.
//!
//! Every simulated path owns two independent streams derived from one seed:
//! `policy` feeds the Hotz-Miller draws of the whole fleet and `deviation`
//! feeds the overriding truck's alternative action. Keeping them apart means
//! an optimal and a perturbed valuation of the same path share every fleet
//! draw.

use hmac::{Hmac, Mac};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

/// Derive a child seed from a parent seed, a domain tag and an index.
#[must_use]
pub fn derive_stream_seed(seed: u64, domain_tag: &[u8], index: u64) -> u64 {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&seed.to_le_bytes()).expect("64-bit seed is valid key");
    mac.update(domain_tag);
    mac.update(&index.to_le_bytes());
    let digest = mac.finalize().into_bytes();
    let seed_bytes: [u8; 8] = digest[..8].try_into().expect("digest slice length");
    u64::from_le_bytes(seed_bytes)
}

/// Seed for one estimation replicate.
#[must_use]
pub fn replicate_seed(master_seed: u64, replicate: usize) -> u64 {
    derive_stream_seed(master_seed, b"replicate", replicate as u64)
}

/// A ChaCha20 stream for Gumbel shocks that tallies the 64-bit words it
/// hands out, so a path outcome can report how much randomness it used.
#[derive(Debug, Clone)]
pub struct ShockStream {
    inner: ChaCha20Rng,
    words: u64,
}

impl ShockStream {
    #[must_use]
    pub fn from_seed_u64(seed: u64) -> Self {
        Self {
            inner: ChaCha20Rng::seed_from_u64(seed),
            words: 0,
        }
    }

    /// Words consumed so far; a byte fill counts each started word.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.words
    }

    fn tally(&mut self, words: usize) {
        self.words = self.words.saturating_add(words as u64);
    }
}

impl RngCore for ShockStream {
    fn next_u32(&mut self) -> u32 {
        self.tally(1);
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.tally(1);
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.tally(dest.len().div_ceil(8));
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.tally(dest.len().div_ceil(8));
        self.inner.try_fill_bytes(dest)
    }
}

/// The pair of streams consumed by one simulated path.
#[derive(Debug, Clone)]
pub struct PathStreams {
    policy: ShockStream,
    deviation: ShockStream,
}

impl PathStreams {
    /// Streams for path `path` of the valuation seeded by `seed`.
    #[must_use]
    pub fn for_path(seed: u64, path: u32) -> Self {
        let index = u64::from(path);
        Self {
            policy: ShockStream::from_seed_u64(derive_stream_seed(seed, b"policy", index)),
            deviation: ShockStream::from_seed_u64(derive_stream_seed(seed, b"deviation", index)),
        }
    }

    /// Stream for fleet-wide Hotz-Miller draws.
    pub fn policy(&mut self) -> &mut ShockStream {
        &mut self.policy
    }

    /// Stream for the deviating truck's alternative action.
    pub fn deviation(&mut self) -> &mut ShockStream {
        &mut self.deviation
    }

    /// Total draws taken from both streams.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.policy.draws().saturating_add(self.deviation.draws())
    }
}
