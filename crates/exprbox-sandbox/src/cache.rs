//! Compiled-script cache.
//!
//! Keyed by the exact wrapped script text. Entries are never evicted; the
//! cache lives and dies with its bridge because compiled handles are bound to
//! one isolate.

use std::collections::HashMap;

/// A cache from script text to a compiled handle `S`.
#[derive(Debug)]
pub struct ScriptCache<S> {
    entries: HashMap<String, S>,
    hits: u64,
    misses: u64,
}

impl<S> Default for ScriptCache<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<S> ScriptCache<S> {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the entry for `source`, compiling it with `compile` on a miss.
    ///
    /// Returns the entry and whether it was a hit. A failed compile inserts
    /// nothing.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        source: &str,
        compile: impl FnOnce(&str) -> Result<S, E>,
    ) -> Result<(&S, bool), E> {
        if self.entries.contains_key(source) {
            self.hits += 1;
            return Ok((&self.entries[source], true));
        }
        let compiled = compile(source)?;
        self.misses += 1;
        tracing::debug!(len = source.len(), "script cache miss");
        let entry = self.entries.entry(source.to_string()).or_insert(compiled);
        Ok((entry, false))
    }

    /// Whether `source` is cached.
    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    /// Number of cached scripts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that compiled.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_once_per_source() {
        let mut cache: ScriptCache<usize> = ScriptCache::new();
        let mut compiles = 0;
        for _ in 0..3 {
            let (len, _) = cache
                .get_or_try_insert_with("1 + 1", |s| {
                    compiles += 1;
                    Ok::<_, ()>(s.len())
                })
                .unwrap();
            assert_eq!(*len, 5);
        }
        assert_eq!(compiles, 1);
        assert_eq!((cache.hits(), cache.misses()), (2, 1));
    }

    #[test]
    fn reports_hit_flag() {
        let mut cache: ScriptCache<()> = ScriptCache::new();
        let (_, hit) = cache.get_or_try_insert_with("a", |_| Ok::<_, ()>(())).unwrap();
        assert!(!hit);
        let (_, hit) = cache.get_or_try_insert_with("a", |_| Ok::<_, ()>(())).unwrap();
        assert!(hit);
        let (_, hit) = cache.get_or_try_insert_with("a ", |_| Ok::<_, ()>(())).unwrap();
        assert!(!hit, "keys are exact text");
    }

    #[test]
    fn failed_compile_is_not_cached() {
        let mut cache: ScriptCache<()> = ScriptCache::new();
        let err = cache.get_or_try_insert_with("(", |_| Err("syntax")).unwrap_err();
        assert_eq!(err, "syntax");
        assert!(!cache.contains("("));
        assert!(cache.is_empty());
        cache.get_or_try_insert_with("x", |_| Ok::<_, ()>(())).unwrap();
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
