use std::collections::HashMap;

use anyhow::Result;
use tracing::trace;

/// Maximum number of decoded page groups held at once. Mirrors
/// `LIBHIBR_MAXIMUM_CACHE_ENTRIES_COMPRESSED_PAGE_DATA` in the source, which
/// fixes the same constant.
const MAX_CACHE_ENTRIES: usize = 8;

struct Entry {
    data: Vec<u8>,
    recency: u64,
}

/// Bounded least-recently-used cache of decoded page-group bytes, keyed by
/// group index. Owned exclusively by a single `ImageReader`; there is no
/// shared or global cache.
pub struct GroupCache {
    entries: HashMap<usize, Entry>,
    clock: u64,
}

impl GroupCache {
    pub fn new() -> Self {
        GroupCache {
            entries: HashMap::new(),
            clock: 0,
        }
    }

    /// Returns the decoded bytes for `group_index`, promoting the entry to
    /// most-recently-used on a hit. On a miss, `fill` is invoked to produce
    /// the buffer; if `fill` fails the cache is left unchanged. Inserting a
    /// fresh entry evicts the least-recently-used one first if the cache is
    /// already at capacity.
    pub fn get_or_fill<F>(&mut self, group_index: usize, fill: F) -> Result<&[u8]>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        self.clock += 1;
        let clock = self.clock;

        if self.entries.contains_key(&group_index) {
            trace!(group_index, "page group cache hit");
            let entry = self.entries.get_mut(&group_index).unwrap();
            entry.recency = clock;
            return Ok(&self.entries.get(&group_index).unwrap().data);
        }

        trace!(group_index, "page group cache miss");
        let data = fill()?;

        if self.entries.len() >= MAX_CACHE_ENTRIES {
            if let Some(&lru_index) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.recency)
                .map(|(index, _)| index)
            {
                trace!(evicted = lru_index, "evicting page group from cache");
                self.entries.remove(&lru_index);
            }
        }

        self.entries.insert(group_index, Entry { data, recency: clock });
        Ok(&self.entries.get(&group_index).unwrap().data)
    }
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}
