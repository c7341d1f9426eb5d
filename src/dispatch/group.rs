//! Work-group counts for a dispatch and a small cache in front of them.

use std::collections::HashMap;

use super::kernel::KernelId;

/// Number of thread groups launched per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchGroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGroupCount {
    /// `ceil(threads / group)` per axis, never below one group.
    pub fn compute(threads: [u32; 3], group_size: [u32; 3]) -> Self {
        let axis = |t: u32, g: u32| t.div_ceil(g.max(1)).max(1);
        Self {
            x: axis(threads[0], group_size[0]),
            y: axis(threads[1], group_size[1]),
            z: axis(threads[2], group_size[2]),
        }
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// True when the launched threads reach every requested thread.
    pub fn covers(&self, threads: [u32; 3], group_size: [u32; 3]) -> bool {
        self.as_array()
            .iter()
            .zip(threads.iter().zip(group_size.iter()))
            .all(|(&groups, (&t, &g))| u64::from(groups) * u64::from(g) >= u64::from(t))
    }
}

impl std::fmt::Display for DispatchGroupCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

type CacheKey = (KernelId, [u32; 3], [u32; 3]);

/// Memoised group counts keyed by kernel, thread counts and group size.
///
/// A change in any part of the key is a different entry, so stale counts are never served.
#[derive(Debug, Default)]
pub struct GroupCountCache {
    entries: HashMap<CacheKey, DispatchGroupCount>,
    hits: u64,
    misses: u64,
}

impl GroupCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        kernel: KernelId,
        threads: [u32; 3],
        group_size: [u32; 3],
    ) -> DispatchGroupCount {
        if let Some(count) = self.entries.get(&(kernel, threads, group_size)) {
            self.hits += 1;
            return *count;
        }
        self.misses += 1;
        let count = DispatchGroupCount::compute(threads, group_size);
        self.entries.insert((kernel, threads, group_size), count);
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_counts_cover_every_cell() {
        for n in [32u32, 64, 128, 256, 512, 1024] {
            for g in [8u32, 16] {
                let threads = [n, n, 1];
                let group = [g, g, 1];
                let count = DispatchGroupCount::compute(threads, group);
                assert!(count.covers(threads, group), "n={n} g={g}");
                assert_eq!(count.x, n / g);
                assert_eq!(count.z, 1);
            }
        }
    }

    #[test]
    fn test_group_counts_round_up() {
        let count = DispatchGroupCount::compute([10, 1, 1], [8, 1, 1]);
        assert_eq!(count.as_array(), [2, 1, 1]);
        let count = DispatchGroupCount::compute([4 * 1024, 1, 1], [64, 1, 1]);
        assert_eq!(count.x, 64);
    }

    #[test]
    fn test_group_counts_at_least_one() {
        let count = DispatchGroupCount::compute([0, 0, 0], [8, 8, 1]);
        assert_eq!(count.as_array(), [1, 1, 1]);
    }

    #[test]
    fn test_cache_hits_and_recompute_on_change() {
        let mut cache = GroupCountCache::new();
        let a = cache.get_or_compute(KernelId::JacobiSolve, [64, 64, 1], [8, 8, 1]);
        let b = cache.get_or_compute(KernelId::JacobiSolve, [64, 64, 1], [8, 8, 1]);
        assert_eq!(a, b);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);

        let c = cache.get_or_compute(KernelId::JacobiSolve, [64, 64, 1], [16, 16, 1]);
        assert_eq!(c.as_array(), [4, 4, 1]);
        let d = cache.get_or_compute(KernelId::JacobiSolve, [128, 128, 1], [16, 16, 1]);
        assert_eq!(d.as_array(), [8, 8, 1]);
        assert_eq!(cache.misses(), 3);
        assert_eq!(cache.len(), 3);
    }
}
