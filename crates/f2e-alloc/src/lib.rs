#![forbid(unsafe_code)]
//! Free-cluster accounting and extent allocation.
//!
//! The allocator owns the only authority over free space during a
//! conversion: a bitmap seeded from the FAT, plus the immutable sorted set
//! of cluster ranges reserved for future ext4 metadata. A single monotonic
//! cursor makes the whole run O(cluster count); the sorted set additionally
//! answers the relocation pass's "which blocked ranges intersect this
//! extent" query by binary search.

use f2e_error::{ConvertError, Result};
use f2e_types::{
    bitmap_count_free, bitmap_get, bitmap_set, ClusterNo, FatExtent, FAT_ENTRY_MASK, FAT_FREE,
    FIRST_DATA_CLUSTER,
};
use tracing::{debug, trace};

// ── Cluster bitmap ──────────────────────────────────────────────────────────

/// One bit per cluster index; set means used.
#[derive(Debug, Clone)]
pub struct ClusterBitmap {
    bits: Vec<u8>,
    cluster_count: u32,
}

impl ClusterBitmap {
    /// Seed from the FAT: reserved clusters 0 and 1 plus every cluster
    /// whose (masked) FAT entry is non-zero count as used.
    #[must_use]
    pub fn from_fat(fat: &[u32], cluster_count: u32) -> Self {
        let mut bits = vec![0_u8; (cluster_count as usize + 7) / 8];
        for cluster in 0..FIRST_DATA_CLUSTER {
            bitmap_set(&mut bits, cluster);
        }
        for cluster in FIRST_DATA_CLUSTER..cluster_count {
            if fat[cluster as usize] & FAT_ENTRY_MASK != FAT_FREE {
                bitmap_set(&mut bits, cluster);
            }
        }
        Self {
            bits,
            cluster_count,
        }
    }

    #[must_use]
    pub fn is_free(&self, cluster: ClusterNo) -> bool {
        cluster.0 < self.cluster_count && !bitmap_get(&self.bits, cluster.0)
    }

    pub fn set_used(&mut self, cluster: ClusterNo) {
        debug_assert!(cluster.0 < self.cluster_count);
        bitmap_set(&mut self.bits, cluster.0);
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        bitmap_count_free(&self.bits, self.cluster_count)
    }

    #[must_use]
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }
}

// ── Blocked-extent set ──────────────────────────────────────────────────────

/// Immutable, sorted set of physical ranges reserved for ext4 metadata.
///
/// Two read views exist over the same sequence: the allocator's monotonic
/// pointer (fast path) and `intersecting` (binary search for relocation).
#[derive(Debug, Clone)]
pub struct BlockedSet {
    extents: Vec<FatExtent>,
}

impl BlockedSet {
    /// Build from the planner's output. Sorts by physical start; the input
    /// must already contain the terminal sentinel.
    #[must_use]
    pub fn new(mut extents: Vec<FatExtent>) -> Self {
        extents.sort_by_key(|extent| extent.physical_start);
        Self { extents }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FatExtent> {
        self.extents.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Index of the first extent whose physical end lies past `physical`,
    /// i.e. the first candidate for an intersection query.
    #[must_use]
    pub fn first_at_or_after(&self, physical: u32) -> usize {
        self.extents
            .partition_point(|extent| extent.physical_end() <= physical)
    }

    /// All blocked extents intersecting the cluster range `start..end`.
    pub fn intersecting(&self, start: u32, end: u32) -> impl Iterator<Item = &FatExtent> {
        self.extents[self.first_at_or_after(start)..]
            .iter()
            .take_while(move |extent| extent.physical_start.0 < end)
            .filter(|extent| !extent.is_empty())
    }

    /// Whether `start..end` touches any blocked range.
    #[must_use]
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.intersecting(start, end).next().is_some()
    }
}

// ── Extent allocator ────────────────────────────────────────────────────────

/// Greedy linear-scan allocator over the free-cluster bitmap.
///
/// `Clone` exists for the dry run: the builder runs once against a cloned
/// allocator and a discarding writer, then once for real; both see the
/// same starting state, so their allocation sequences are identical.
#[derive(Debug, Clone)]
pub struct ExtentAllocator {
    bitmap: ClusterBitmap,
    blocked: BlockedSet,
    /// Next candidate cluster; only ever moves forward.
    cursor: u32,
    /// Index of the next blocked extent the cursor has not yet passed.
    blocked_index: usize,
}

enum Probe {
    Usable,
    NotUsable,
    Exhausted,
}

impl ExtentAllocator {
    #[must_use]
    pub fn new(bitmap: ClusterBitmap, blocked: BlockedSet) -> Self {
        debug!(
            target: "f2e::alloc",
            free_clusters = bitmap.free_count(),
            blocked_ranges = blocked.len(),
            "allocator initialized"
        );
        Self {
            bitmap,
            blocked,
            cursor: 0,
            blocked_index: 0,
        }
    }

    #[must_use]
    pub fn blocked(&self) -> &BlockedSet {
        &self.blocked
    }

    #[must_use]
    pub fn free_cluster_count(&self) -> u32 {
        self.bitmap.free_count()
    }

    /// Whether `cluster` is free right now (used by tests and assertions).
    #[must_use]
    pub fn is_free(&self, cluster: ClusterNo) -> bool {
        self.bitmap.is_free(cluster)
    }

    /// Mark a cluster used without allocating it (archive bookkeeping).
    pub fn reserve(&mut self, cluster: ClusterNo) {
        self.bitmap.set_used(cluster);
    }

    fn advance(&mut self) -> Probe {
        self.cursor += 1;
        let Some(blocked) = self.blocked.get(self.blocked_index) else {
            return Probe::Exhausted;
        };
        if self.cursor < blocked.physical_start.0 {
            if self.bitmap.is_free(ClusterNo(self.cursor)) {
                Probe::Usable
            } else {
                Probe::NotUsable
            }
        } else {
            // Retire the blocked range; the next probe starts right past
            // it. Retiring the end-of-volume sentinel exhausts the
            // allocator on the probe after this one.
            self.cursor = blocked.physical_end().saturating_sub(1);
            self.blocked_index += 1;
            Probe::NotUsable
        }
    }

    /// Allocate a contiguous extent of 1..=`max_len` clusters.
    ///
    /// Greedy: the first usable cluster starts the extent, which then
    /// extends while consecutive clusters stay usable. Running out of
    /// clusters while searching for the first one is fatal.
    pub fn allocate(&mut self, max_len: u16) -> Result<FatExtent> {
        debug_assert!(max_len > 0);
        loop {
            match self.advance() {
                Probe::Usable => break,
                Probe::NotUsable => {}
                Probe::Exhausted => {
                    return Err(ConvertError::NoSpace);
                }
            }
        }

        let start = self.cursor;
        self.bitmap.set_used(ClusterNo(start));
        let mut len: u16 = 1;
        while len < max_len {
            match self.advance() {
                Probe::Usable => {
                    self.bitmap.set_used(ClusterNo(self.cursor));
                    len = (self.cursor - start + 1) as u16;
                }
                Probe::NotUsable | Probe::Exhausted => break,
            }
        }

        trace!(target: "f2e::alloc", start, len, "allocated extent");
        Ok(FatExtent::new(0, len, ClusterNo(start)))
    }

    /// Allocate exactly one cluster.
    pub fn allocate_one(&mut self) -> Result<ClusterNo> {
        Ok(self.allocate(1)?.physical_start)
    }
}
