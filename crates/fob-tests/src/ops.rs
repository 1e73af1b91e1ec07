//! Seeded pseudo-random operation generator.
//!
//! Mirrors how the store is actually used: mostly small blobs, occasional
//! multi-chunk ones, updates to existing names, fetches of absent names,
//! fewer stores as the store fills up.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One generated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Store or replace a blob.
    Store {
        /// Blob name.
        name: String,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// Fetch a blob (possibly absent).
    Fetch {
        /// Blob name.
        name: String,
    },
    /// Remove a blob (possibly absent).
    Remove {
        /// Blob name.
        name: String,
    },
    /// List all blobs.
    List,
}

const NAME_POOL: &[&str] = &[
    "config", "secret", "backup", "key", "cert", "data", "log", "cache", "index", "metadata",
    "state", "info", "settings", "profile", "session", "token", "auth", "creds",
];

/// Deterministic operation stream over a bounded-capacity store.
pub struct OpGenerator {
    rng: StdRng,
    existing: BTreeSet<String>,
    max_files: usize,
    max_payload: usize,
}

impl OpGenerator {
    /// Creates a generator with a fixed seed.
    ///
    /// `max_files` bounds how many distinct names are live at once;
    /// `max_payload` bounds payload sizes (pick it below the store capacity
    /// to keep `StoreFull` rare but possible).
    pub fn new(seed: u64, max_files: usize, max_payload: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            existing: BTreeSet::new(),
            max_files,
            max_payload,
        }
    }

    /// Draws the next operation, tracking which names should exist.
    pub fn next_op(&mut self) -> Op {
        let fill = self.existing.len() as f64 / self.max_files.max(1) as f64;
        let store_weight = if self.existing.is_empty() {
            1.0
        } else if fill >= 1.0 {
            0.2
        } else if fill >= 0.8 {
            0.25
        } else {
            0.4
        };

        let roll: f64 = self.rng.gen();
        if roll < store_weight {
            let name = self.pick_store_name(fill >= 1.0);
            let payload = self.random_payload();
            self.existing.insert(name.clone());
            Op::Store { name, payload }
        } else if roll < store_weight + 0.35 {
            Op::Fetch {
                name: self.pick_existing_or_absent(),
            }
        } else if roll < store_weight + 0.55 {
            let name = self.pick_existing_or_absent();
            self.existing.remove(&name);
            Op::Remove { name }
        } else {
            Op::List
        }
    }

    fn pick_store_name(&mut self, must_update: bool) -> String {
        if must_update || (!self.existing.is_empty() && self.rng.gen::<f64>() < 0.3) {
            let index = self.rng.gen_range(0..self.existing.len());
            self.existing.iter().nth(index).cloned().unwrap_or_default()
        } else {
            let base = NAME_POOL[self.rng.gen_range(0..NAME_POOL.len())];
            if self.existing.contains(base) {
                format!("{base}-{}", self.rng.gen_range(1000..10000))
            } else {
                base.to_string()
            }
        }
    }

    fn pick_existing_or_absent(&mut self) -> String {
        if self.existing.is_empty() || self.rng.gen::<f64>() < 0.1 {
            format!("nonexistent-{}", self.rng.gen_range(1000..10000))
        } else {
            let index = self.rng.gen_range(0..self.existing.len());
            self.existing.iter().nth(index).cloned().unwrap_or_default()
        }
    }

    fn random_payload(&mut self) -> Vec<u8> {
        // Mostly small, some medium, a few spanning several chunks.
        let roll: f64 = self.rng.gen();
        let cap = self.max_payload.max(2);
        let len = if roll < 0.7 {
            self.rng.gen_range(1..=cap.min(1024))
        } else if roll < 0.95 {
            self.rng.gen_range(1..=cap.min(5 * 1024))
        } else {
            self.rng.gen_range(cap / 2..=cap)
        };
        (0..len).map(|_| self.rng.gen()).collect()
    }
}
