//! Heap census histogram: object counts per (type name, generation).
//!
//! The free-space sentinel type and anonymous types never appear in a
//! histogram, and generations outside the retained set are dropped.

use crate::runtime::{Address, Generation, RuntimeProvider};
use crate::utils::config::{FREE_TYPE_NAME, MAX_GENERATION, PROGRESS_INTERVAL};
use crate::utils::error::{ConfigError, ProviderError};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Histogram key: one bucket per type name and generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HistogramKey {
    pub type_name: String,
    pub generation: Generation,
}

impl HistogramKey {
    pub fn new(type_name: impl Into<String>, generation: Generation) -> Self {
        Self {
            type_name: type_name.into(),
            generation,
        }
    }
}

/// Object counts per key
pub type Histogram = HashMap<HistogramKey, u64>;

/// Set of GC generations to retain in a census
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSet(BTreeSet<Generation>);

impl GenerationSet {
    pub fn new(generations: impl IntoIterator<Item = Generation>) -> Self {
        Self(generations.into_iter().collect())
    }

    /// gen0, gen1 and gen2
    pub fn all() -> Self {
        Self::new(0..=2)
    }

    pub fn contains(&self, generation: Generation) -> bool {
        self.0.contains(&generation)
    }

    pub fn iter(&self) -> impl Iterator<Item = Generation> + '_ {
        self.0.iter().copied()
    }
}

impl Default for GenerationSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for GenerationSet {
    type Err = ConfigError;

    /// Parse a comma separated list such as `"gen0, gen2"` or `"0,1"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = BTreeSet::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let lower = item.to_ascii_lowercase();
            let digits = lower.strip_prefix("gen").unwrap_or(&lower);
            match digits.parse::<Generation>() {
                Ok(generation) if generation <= MAX_GENERATION => {
                    set.insert(generation);
                }
                _ => return Err(ConfigError::InvalidGeneration(item.to_string())),
            }
        }

        if set.is_empty() {
            return Err(ConfigError::InvalidGeneration(s.to_string()));
        }
        Ok(Self(set))
    }
}

impl fmt::Display for GenerationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.iter().map(|g| format!("gen{}", g)).collect();
        write!(f, "{}", items.join(", "))
    }
}

/// Incrementally counts objects into a [`Histogram`]
#[derive(Debug)]
pub struct HistogramBuilder {
    counts: Histogram,
    retain: GenerationSet,
}

impl HistogramBuilder {
    pub fn new(retain: GenerationSet) -> Self {
        Self {
            counts: Histogram::with_capacity(16_000),
            retain,
        }
    }

    /// Count one object; returns false when the object is excluded
    pub fn record(&mut self, type_name: Option<&str>, generation: Generation) -> bool {
        let Some(name) = type_name.filter(|n| is_countable(n)) else {
            return false;
        };
        if !self.retain.contains(generation) {
            return false;
        }
        *self
            .counts
            .entry(HistogramKey::new(name, generation))
            .or_insert(0) += 1;
        true
    }

    pub fn finish(self) -> Histogram {
        self.counts
    }
}

fn is_countable(type_name: &str) -> bool {
    !type_name.is_empty() && type_name != FREE_TYPE_NAME
}

/// Build a histogram from (identity, type name, generation) samples
pub fn histogram<'a>(
    objects: impl IntoIterator<Item = (Address, Option<&'a str>, Generation)>,
    retain: &GenerationSet,
) -> Histogram {
    let mut builder = HistogramBuilder::new(retain.clone());
    for (_, type_name, generation) in objects {
        builder.record(type_name, generation);
    }
    builder.finish()
}

/// Scan the whole heap once and count every retained object
///
/// Objects that cannot be read are logged and skipped; the scan always
/// runs to the end of the heap.
pub fn census_heap(provider: &dyn RuntimeProvider, retain: &GenerationSet) -> Histogram {
    let mut builder = HistogramBuilder::new(retain.clone());
    let mut scanned: u64 = 0;
    let mut failures: u64 = 0;

    for address in provider.object_addresses() {
        if address == 0 {
            continue;
        }
        scanned += 1;
        if scanned % PROGRESS_INTERVAL == 0 {
            info!("Enumerated {} objects", scanned);
        }

        match sample_object(provider, address) {
            Ok(Some((type_name, generation))) => {
                builder.record(Some(type_name), generation);
            }
            Ok(None) => {}
            Err(e) => {
                failures += 1;
                warn!("Address '{:#x}' can't be read: {}", address, e);
            }
        }
    }

    let counts = builder.finish();
    debug!(
        "Heap census: {} objects scanned, {} unreadable, {} distinct keys",
        scanned,
        failures,
        counts.len()
    );
    counts
}

/// Type name and generation of a countable object
fn sample_object(
    provider: &dyn RuntimeProvider,
    address: Address,
) -> Result<Option<(&str, Generation)>, ProviderError> {
    let ty = provider.object_type(address)?;
    match provider.type_name(ty) {
        Some(name) if is_countable(name) => Ok(Some((name, provider.generation(address)?))),
        _ => Ok(None),
    }
}
