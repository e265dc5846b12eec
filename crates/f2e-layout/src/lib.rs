#![forbid(unsafe_code)]
//! Target layout planner: derives the ext4 geometry from the FAT32
//! geometry and computes the physical ranges that future ext4 metadata
//! will occupy.
//!
//! The plan is computed once, before any write, and is immutable. Both the
//! dry run and the commit build against the same plan, which is what makes
//! their allocation sequences identical.

use f2e_error::{ConvertError, Result};
use f2e_fat::Geometry;
use f2e_types::{
    ceil_div, ClusterNo, FatExtent, EXT4_DESC_SIZE, EXT4_FIRST_NON_RESERVED_INODE, EXT4_INODE_SIZE,
};
use tracing::{debug, info};

/// Largest number of blocks a group may span (bitmap fits one block, minus
/// the 8-block slack mke2fs keeps without bigalloc).
const MAX_BLOCKS_PER_GROUP: u32 = (1 << 16) - 8;
/// One inode per this many bytes of volume, mke2fs default.
const INODE_RATIO: u32 = 16384;
/// A trailing partial group must keep this many data blocks beyond its own
/// overhead, or the volume is shortened to exclude it (mke2fs rule).
const MIN_TAIL_GROUP_DATA_BLOCKS: u64 = 50;
/// Per-group overhead must fit the group descriptor's 16-bit free count.
const MAX_GROUP_OVERHEAD: u64 = 0xFFFF;

/// Whether a block group holds a superblock + GDT copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasSuperBlock {
    Primary,
    Backup,
    No,
}

/// The immutable ext4 target layout.
#[derive(Debug, Clone)]
pub struct Plan {
    pub block_size: u32,
    pub log_block_size: u32,
    /// 1 for 1 KiB blocks (the superblock padding occupies block 0), else 0.
    pub first_data_block: u32,
    /// Total block count after a possible tail drop.
    pub blocks_count: u64,
    /// Blocks cut off the end of the volume by the tail-group rule.
    pub dropped_tail_blocks: u64,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inodes_count: u32,
    pub group_count: u32,
    pub gdt_blocks: u32,
    pub itable_blocks: u32,
    pub reserved_gdt_blocks: u32,
    /// sparse_super2 backup groups; zero entries mean "absent".
    pub backup_groups: [u32; 2],
    pub uuid: [u8; 16],
    pub volume_label: Vec<u8>,
    pub mkfs_time: u32,
}

impl Plan {
    /// Compute the layout for a validated FAT volume.
    ///
    /// `uuid` and `mkfs_time` are injected so that planning stays
    /// deterministic under test.
    pub fn new(geometry: &Geometry, uuid: [u8; 16], mkfs_time: u32) -> Result<Self> {
        let block_size = geometry.cluster_size;
        let log_block_size = block_size.trailing_zeros() - 10;
        let first_data_block = u32::from(block_size == 1024);
        let blocks_per_group = (block_size * 8).min(MAX_BLOCKS_PER_GROUP);

        let inodes_per_group = u64::from(blocks_per_group)
            .saturating_mul(u64::from(block_size))
            .checked_div(u64::from(INODE_RATIO))
            .unwrap_or(0)
            .min(u64::from(block_size) * 8) as u32;
        let itable_blocks = ceil_div(
            u64::from(inodes_per_group) * u64::from(EXT4_INODE_SIZE),
            u64::from(block_size),
        ) as u32;

        let mut blocks_count = geometry.volume_bytes() / u64::from(block_size);
        let mut data_blocks = blocks_count.saturating_sub(u64::from(first_data_block));
        if data_blocks == 0 {
            return Err(ConvertError::Layout("volume holds no data blocks".into()));
        }

        // The tail-drop decision uses the group count before the drop; a
        // shrink can only shrink the GDT, never grow it.
        let descs_per_block = u64::from(block_size / u32::from(EXT4_DESC_SIZE));
        let provisional_groups = ceil_div(data_blocks, u64::from(blocks_per_group));
        let provisional_gdt = ceil_div(provisional_groups, descs_per_block);
        let overhead_with_sb = 3 + provisional_gdt + u64::from(itable_blocks);

        let tail_blocks = data_blocks % u64::from(blocks_per_group);
        let mut dropped_tail_blocks = 0;
        if tail_blocks > 0 && tail_blocks < overhead_with_sb + MIN_TAIL_GROUP_DATA_BLOCKS {
            dropped_tail_blocks = tail_blocks;
            blocks_count -= tail_blocks;
            data_blocks -= tail_blocks;
            info!(
                target: "f2e::layout",
                dropped_tail_blocks,
                "final block group too small, shortening volume"
            );
        }
        if data_blocks == 0 {
            return Err(ConvertError::Layout(
                "volume too small for a single block group".into(),
            ));
        }

        let group_count = u32::try_from(ceil_div(data_blocks, u64::from(blocks_per_group)))
            .map_err(|_| ConvertError::Layout("more than 2^32 block groups".into()))?;
        let gdt_blocks = ceil_div(u64::from(group_count), descs_per_block) as u32;

        let overhead = 3 + u64::from(gdt_blocks) + u64::from(itable_blocks);
        if overhead > MAX_GROUP_OVERHEAD {
            return Err(ConvertError::Layout(format!(
                "per-group overhead of {overhead} blocks exceeds 65535"
            )));
        }

        let inodes_count = inodes_per_group
            .checked_mul(group_count)
            .ok_or_else(|| ConvertError::Layout("more than 2^32 inodes".into()))?;
        if inodes_count <= EXT4_FIRST_NON_RESERVED_INODE {
            return Err(ConvertError::Layout(format!(
                "only {inodes_count} inodes available, need more than {EXT4_FIRST_NON_RESERVED_INODE}"
            )));
        }

        let mut backup_groups = [0_u32; 2];
        if group_count > 1 {
            backup_groups[0] = 1;
            if group_count > 2 {
                backup_groups[1] = group_count - 1;
            }
        }

        let mut label = geometry.volume_label.clone();
        label.truncate(16);

        let plan = Self {
            block_size,
            log_block_size,
            first_data_block,
            blocks_count,
            dropped_tail_blocks,
            blocks_per_group,
            inodes_per_group,
            inodes_count,
            group_count,
            gdt_blocks,
            itable_blocks,
            reserved_gdt_blocks: 0,
            backup_groups,
            uuid,
            volume_label: label,
            mkfs_time,
        };
        debug!(
            target: "f2e::layout",
            block_size,
            blocks = plan.blocks_count,
            groups = plan.group_count,
            inodes = plan.inodes_count,
            gdt_blocks = plan.gdt_blocks,
            "planned ext4 layout"
        );
        Ok(plan)
    }

    #[must_use]
    pub fn has_superblock(&self, group: u32) -> HasSuperBlock {
        if group == 0 {
            HasSuperBlock::Primary
        } else if group == self.backup_groups[0] || group == self.backup_groups[1] {
            HasSuperBlock::Backup
        } else {
            HasSuperBlock::No
        }
    }

    /// Blocks of metadata at the start of a group.
    #[must_use]
    pub fn overhead(&self, has_sb: HasSuperBlock) -> u32 {
        match has_sb {
            HasSuperBlock::Primary | HasSuperBlock::Backup => {
                1 + self.gdt_blocks + self.reserved_gdt_blocks + 2 + self.itable_blocks
            }
            HasSuperBlock::No => 2 + self.itable_blocks,
        }
    }

    #[must_use]
    pub fn group_overhead(&self, group: u32) -> u32 {
        self.overhead(self.has_superblock(group))
    }

    /// First block of a group.
    #[must_use]
    pub fn group_start_block(&self, group: u32) -> u64 {
        u64::from(self.first_data_block) + u64::from(group) * u64::from(self.blocks_per_group)
    }

    /// Number of blocks in a group (the last group may be shorter).
    #[must_use]
    pub fn group_block_count(&self, group: u32) -> u32 {
        let start = self.group_start_block(group);
        (self.blocks_count - start).min(u64::from(self.blocks_per_group)) as u32
    }

    /// Block group that owns `block`.
    #[must_use]
    pub fn group_of_block(&self, block: u64) -> u32 {
        ((block - u64::from(self.first_data_block)) / u64::from(self.blocks_per_group)) as u32
    }

    /// Block positions of a group's bitmaps and inode table.
    ///
    /// They sit directly after the superblock + GDT copy, or at the group
    /// start when the group has none.
    #[must_use]
    pub fn group_metadata_blocks(&self, group: u32) -> GroupMetadataBlocks {
        let start = self.group_start_block(group);
        let sb_overhead = match self.has_superblock(group) {
            HasSuperBlock::Primary | HasSuperBlock::Backup => {
                1 + u64::from(self.gdt_blocks) + u64::from(self.reserved_gdt_blocks)
            }
            HasSuperBlock::No => 0,
        };
        let block_bitmap = start + sb_overhead;
        GroupMetadataBlocks {
            block_bitmap,
            inode_bitmap: block_bitmap + 1,
            inode_table: block_bitmap + 2,
        }
    }

    /// The physical cluster ranges every block group's metadata will
    /// occupy, sorted by start, clipped to the data area, with a terminal
    /// sentinel covering everything past the last data cluster.
    #[must_use]
    pub fn blocked_extents(&self, geometry: &Geometry) -> Vec<FatExtent> {
        let mut extents = Vec::with_capacity(self.group_count as usize + 1);
        for group in 0..self.group_count {
            let overhead = self.group_overhead(group);
            let start_block = self.group_start_block(group);

            let extent = match geometry.block_to_cluster(start_block) {
                Some(start_cluster) => {
                    FatExtent::new(0, overhead as u16, start_cluster)
                }
                None => {
                    // The group's metadata begins inside the FAT reserved
                    // area; only its portion above cluster 2 can collide
                    // with file data.
                    match geometry.block_to_cluster(start_block + u64::from(overhead)) {
                        Some(end_cluster) => {
                            FatExtent::new(0, (end_cluster.0 - 2) as u16, ClusterNo(2))
                        }
                        None => FatExtent::new(0, 0, ClusterNo(0)),
                    }
                }
            };
            extents.push(extent);
        }
        // Terminal sentinel: everything at or past the end of the ext4
        // volume is unaddressable. When a tail group was dropped this sits
        // before the FAT's last cluster, fencing off the dropped region.
        let end_cluster = geometry
            .block_to_cluster(self.blocks_count)
            .map_or(geometry.cluster_count, |cluster| {
                cluster.0.min(geometry.cluster_count)
            });
        extents.push(FatExtent::new(0, 1, ClusterNo(end_cluster)));
        extents
    }
}

/// Absolute block numbers of one group's bitmap/table metadata.
#[derive(Debug, Clone, Copy)]
pub struct GroupMetadataBlocks {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
}
