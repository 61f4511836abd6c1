//! Seeded random value generation with per-column uniqueness pools.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_regex::Regex as RandRegex;

use crate::error::{GuardError, Result};

const DEFAULT_MAX_REPEAT: u32 = 32;

/// Attempts per value before a non-enumerable domain counts as exhausted.
pub(crate) const UNIQUE_ATTEMPT_LIMIT: usize = 64;

/// Hashable projection of a sampled value, used by the without-replacement
/// pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum UniqueKey {
    Int(i64),
    Str(String),
    Bits(u64),
}

/// Random value source backing schema and collection sampling.
///
/// Wraps a seeded ChaCha stream together with per-column pools tracking the
/// values already handed out, so unique columns stay distinct across every
/// batch drawn within one sampling run. Compiled generation patterns are
/// cached per pattern string.
#[derive(Debug)]
pub struct Generator {
    rng: ChaCha8Rng,
    pools: HashMap<String, HashSet<UniqueKey>>,
    patterns: HashMap<String, RandRegex>,
}

impl Generator {
    /// A generator seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_seed(rand::random::<u64>())
    }

    /// A deterministic generator: equal seeds yield equal draw sequences.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            pools: HashMap::new(),
            patterns: HashMap::new(),
        }
    }

    pub(crate) fn draw_null(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            false
        } else if probability >= 1.0 {
            true
        } else {
            self.rng.random_bool(probability)
        }
    }

    /// Draws an integer from `min..=max`. Panics if `min > max`.
    pub fn draw_int(&mut self, min: i64, max: i64) -> i64 {
        self.rng.random_range(min..=max)
    }

    /// Draws a float from `min..=max`. Panics if `min > max`.
    pub fn draw_float(&mut self, min: f64, max: f64) -> f64 {
        self.rng.random_range(min..=max)
    }

    /// Draws an unbiased boolean.
    pub fn draw_bool(&mut self) -> bool {
        self.rng.random_bool(0.5)
    }

    pub(crate) fn draw_index(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    pub(crate) fn draw_text(&mut self, charset: &str, min_len: usize, max_len: usize) -> String {
        let chars: Vec<char> = charset.chars().collect();
        let len = if min_len == max_len {
            min_len
        } else {
            self.rng.random_range(min_len..=max_len)
        };
        let mut value = String::with_capacity(len);
        for _ in 0..len {
            let idx = self.rng.random_range(0..chars.len());
            value.push(chars[idx]);
        }
        value
    }

    /// Draws a string matching `pattern`. Outer anchors are removed before
    /// compilation since the generator always produces full matches.
    pub(crate) fn sample_pattern(&mut self, pattern: &str) -> Result<String> {
        if let Some(compiled) = self.patterns.get(pattern) {
            let compiled = compiled.clone();
            return Ok(self.rng.sample(compiled));
        }
        let compiled = RandRegex::compile(strip_anchors(pattern), DEFAULT_MAX_REPEAT)
            .map_err(|e| {
                GuardError::definition(format!("cannot generate from pattern '{pattern}': {e}"))
            })?;
        self.patterns.insert(pattern.to_string(), compiled.clone());
        Ok(self.rng.sample(compiled))
    }

    /// Records `value` in the pool for `key`. Returns false if it was
    /// already present.
    pub(crate) fn pool_insert(&mut self, key: &str, value: UniqueKey) -> bool {
        self.pools.entry(key.to_string()).or_default().insert(value)
    }

    pub(crate) fn pool_len(&self, key: &str) -> usize {
        self.pools.get(key).map_or(0, HashSet::len)
    }

    /// Forgets all pooled values. Used between whole-batch retries where the
    /// previous draw is discarded entirely.
    pub(crate) fn reset_pools(&mut self) {
        self.pools.clear();
    }

    pub(crate) fn shuffle<T>(&mut self, values: &mut [T]) {
        values.shuffle(&mut self.rng);
    }

    /// Draws `needed` distinct integers from `min..=max`, excluding values
    /// already pooled under `key`. Small domains are enumerated and shuffled;
    /// large ones use attempt-capped rejection.
    pub(crate) fn unique_ints(
        &mut self,
        key: &str,
        min: i64,
        max: i64,
        needed: usize,
    ) -> Result<Vec<i64>> {
        if needed == 0 {
            return Ok(Vec::new());
        }
        let domain = (max as i128) - (min as i128) + 1;
        let available = domain - self.pool_len(key) as i128;
        if (needed as i128) > available {
            return Err(GuardError::DomainExhausted {
                column: key.to_string(),
                requested: needed,
                produced: available.max(0) as usize,
            });
        }

        if domain <= ((needed as i128) * 4).max(1024) {
            let pool = self.pools.get(key);
            let mut candidates: Vec<i64> = (min..=max)
                .filter(|v| pool.map_or(true, |p| !p.contains(&UniqueKey::Int(*v))))
                .collect();
            self.shuffle(&mut candidates);
            candidates.truncate(needed);
            for value in &candidates {
                self.pool_insert(key, UniqueKey::Int(*value));
            }
            return Ok(candidates);
        }

        let mut values = Vec::with_capacity(needed);
        while values.len() < needed {
            let mut attempts = 0;
            loop {
                let value = self.draw_int(min, max);
                if self.pool_insert(key, UniqueKey::Int(value)) {
                    values.push(value);
                    break;
                }
                attempts += 1;
                if attempts >= UNIQUE_ATTEMPT_LIMIT {
                    return Err(GuardError::DomainExhausted {
                        column: key.to_string(),
                        requested: needed,
                        produced: values.len(),
                    });
                }
            }
        }
        Ok(values)
    }

    /// Draws `needed` distinct elements of `values`, excluding elements whose
    /// key is already pooled under `key`.
    pub(crate) fn unique_choices<T: Clone>(
        &mut self,
        key: &str,
        values: &[T],
        needed: usize,
        to_key: impl Fn(&T) -> UniqueKey,
    ) -> Result<Vec<T>> {
        if needed == 0 {
            return Ok(Vec::new());
        }
        let pool = self.pools.get(key);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for value in values {
            let unique_key = to_key(value);
            if pool.is_some_and(|p| p.contains(&unique_key)) {
                continue;
            }
            if seen.insert(unique_key) {
                candidates.push(value.clone());
            }
        }
        if candidates.len() < needed {
            return Err(GuardError::DomainExhausted {
                column: key.to_string(),
                requested: needed,
                produced: candidates.len(),
            });
        }
        self.shuffle(&mut candidates);
        candidates.truncate(needed);
        for value in &candidates {
            self.pool_insert(key, to_key(value));
        }
        Ok(candidates)
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_anchors(pattern: &str) -> &str {
    let pattern = pattern.strip_prefix('^').unwrap_or(pattern);
    match pattern.strip_suffix('$') {
        Some(head) if !head.ends_with('\\') => head,
        _ => pattern,
    }
}
