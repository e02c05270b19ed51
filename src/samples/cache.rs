// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Sample caching for triggered samples.
//!
//! Samples are decoded the first time they are referenced and kept until they are
//! explicitly evicted or the cache is cleared. There is no size limit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::audio::{DecodeError, Decoder, LoadedSample};

/// A decoded resource owned by the cache.
pub struct AudioUnit {
    /// The identifier the unit was decoded from.
    identifier: String,
    /// The decoded sample.
    sample: LoadedSample,
}

impl AudioUnit {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn sample(&self) -> &LoadedSample {
        &self.sample
    }
}

/// Manages loading and caching of sample data.
pub struct SampleCache {
    /// Cache of decoded samples by identifier.
    units: HashMap<String, AudioUnit>,
    /// Decoder used to load identifiers that are not cached yet.
    decoder: Arc<dyn Decoder>,
}

impl SampleCache {
    /// Creates a new, empty sample cache.
    pub fn new(decoder: Arc<dyn Decoder>) -> SampleCache {
        SampleCache {
            units: HashMap::new(),
            decoder,
        }
    }

    /// Returns the cached unit for the identifier, decoding it first if it isn't cached.
    /// A failed decode leaves the cache untouched.
    pub fn resolve(&mut self, identifier: &str) -> Result<&AudioUnit, DecodeError> {
        if !self.units.contains_key(identifier) {
            info!(identifier, "Loading sample into memory");
            let sample = self.decoder.decode(identifier)?;
            self.units.insert(
                identifier.to_string(),
                AudioUnit {
                    identifier: identifier.to_string(),
                    sample,
                },
            );
        } else {
            debug!(identifier, "Using cached sample");
        }

        Ok(&self.units[identifier])
    }

    /// Removes the identifier from the cache and releases its sample. Returns true if
    /// something was removed.
    pub fn evict(&mut self, identifier: &str) -> bool {
        match self.units.remove(identifier) {
            Some(unit) => {
                self.decoder.release(unit.sample);
                debug!(identifier, "Sample removed from cache");
                true
            }
            None => false,
        }
    }

    /// Releases every cached sample.
    pub fn clear(&mut self) {
        let count = self.units.len();
        for (_, unit) in self.units.drain() {
            self.decoder.release(unit.sample);
        }
        if count > 0 {
            info!(released = count, "Sample cache cleared");
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.units.contains_key(identifier)
    }

    /// Returns the number of cached samples.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.units.values().map(|u| u.sample.memory_size()).sum()
    }
}

impl Drop for SampleCache {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SampleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleCache")
            .field("cached_samples", &self.units.len())
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;

    fn cache_with_mock() -> (SampleCache, Arc<mock::Backend>) {
        let backend = Arc::new(mock::Backend::get("mock-cache", 4));
        backend.add_sample("a.ogg");
        backend.add_sample("b.ogg");
        (SampleCache::new(backend.clone()), backend)
    }

    #[test]
    fn test_resolve_decodes_once() {
        let (mut cache, backend) = cache_with_mock();

        let first = cache.resolve("a.ogg").unwrap().sample().clone();
        let second = cache.resolve("a.ogg").unwrap().sample().clone();

        assert!(first.same_data(&second));
        assert_eq!(1, backend.decode_count("a.ogg"));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_resolve_failure_is_not_cached() {
        let (mut cache, backend) = cache_with_mock();

        assert!(matches!(
            cache.resolve("missing.ogg"),
            Err(DecodeError::NotFound(_))
        ));
        assert!(cache.is_empty());

        // Failures are retried on the next reference.
        assert!(cache.resolve("missing.ogg").is_err());
        assert_eq!(2, backend.decode_count("missing.ogg"));
    }

    #[test]
    fn test_evict_then_resolve() {
        let (mut cache, backend) = cache_with_mock();

        let before = cache.resolve("a.ogg").unwrap().sample().clone();
        assert!(cache.evict("a.ogg"));
        assert!(!cache.contains("a.ogg"));
        assert_eq!(1, backend.releases());

        let after = cache.resolve("a.ogg").unwrap().sample().clone();
        assert_eq!(2, backend.decode_count("a.ogg"));
        assert!(!before.same_data(&after));
    }

    #[test]
    fn test_evict_absent() {
        let (mut cache, backend) = cache_with_mock();
        assert!(!cache.evict("never-loaded.ogg"));
        assert_eq!(0, backend.releases());
    }

    #[test]
    fn test_clear() {
        let (mut cache, backend) = cache_with_mock();
        cache.resolve("a.ogg").unwrap();
        cache.resolve("b.ogg").unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(2, backend.releases());

        drop(cache);
        assert_eq!(2, backend.releases());
    }

    #[test]
    fn test_identifiers_are_distinct_keys() {
        let (mut cache, _backend) = cache_with_mock();
        let a = cache.resolve("a.ogg").unwrap().sample().clone();
        let b = cache.resolve("b.ogg").unwrap().sample().clone();
        assert!(!a.same_data(&b));
        assert_eq!("b.ogg", cache.resolve("b.ogg").unwrap().identifier());
        assert_eq!(2, cache.len());
    }
}
