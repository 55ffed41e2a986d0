//! Audience shuffling for A/B splits

use super::Contact;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Source of randomness for A/B assignment
pub trait Shuffler: Send + Sync {
    fn shuffle(&self, contacts: &mut [Contact]);
}

/// Shuffles with the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomShuffler;

impl Shuffler for RandomShuffler {
    fn shuffle(&self, contacts: &mut [Contact]) {
        contacts.shuffle(&mut rand::thread_rng());
    }
}

/// Same seed, same permutation
#[derive(Debug, Clone, Copy)]
pub struct SeededShuffler {
    seed: u64,
}

impl SeededShuffler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Shuffler for SeededShuffler {
    fn shuffle(&self, contacts: &mut [Contact]) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        contacts.shuffle(&mut rng);
    }
}
