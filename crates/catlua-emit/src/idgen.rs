//! Global-ID generation.
//!
//! Every script, event, and action in the output document gets a 2-character
//! ID that must be unique within the document. IDs are drawn at random and
//! retried on collision.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;

const ID_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$^&*";

pub(crate) struct GlobalIdGen {
    rng: StdRng,
    used: FxHashSet<String>,
}

impl GlobalIdGen {
    /// Production generator with a non-deterministic seed.
    pub(crate) fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            used: FxHashSet::default(),
        }
    }

    /// Deterministic generator for tests.
    pub(crate) fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            used: FxHashSet::default(),
        }
    }

    pub(crate) fn next_id(&mut self) -> String {
        loop {
            let id: String = (0..2)
                .map(|_| {
                    let index = self.rng.gen_range(0..ID_CHARSET.len());
                    ID_CHARSET[index] as char
                })
                .collect();
            if self.used.insert(id.clone()) {
                return id;
            }
        }
    }
}
