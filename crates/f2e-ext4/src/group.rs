//! Per-block-group build state.
//!
//! Bitmaps live in memory while the filesystem is built and are written
//! out during finalization; inode tables are zeroed on disk up front and
//! filled one inode at a time.

use f2e_error::{ConvertError, Result};
use f2e_image::ByteImage;
use f2e_layout::{GroupMetadataBlocks, Plan};
use f2e_types::{
    bitmap_set, bitmap_set_range, u64_to_u32, InodeNo, EXT4_FIRST_NON_RESERVED_INODE,
    EXT4_INODE_SIZE,
};

/// Mutable state of one block group.
#[derive(Debug, Clone)]
pub struct GroupState {
    pub meta: GroupMetadataBlocks,
    pub block_bitmap: Vec<u8>,
    pub inode_bitmap: Vec<u8>,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub used_dirs: u32,
    start_block: u64,
}

impl GroupState {
    /// Initialize a group: overhead and tail bits pre-set in the block
    /// bitmap, reserved inodes pre-set in group 0's inode bitmap.
    #[must_use]
    pub fn new(plan: &Plan, group: u32) -> Self {
        let block_size = plan.block_size as usize;
        let overhead = plan.group_overhead(group);
        let block_count = plan.group_block_count(group);

        let mut block_bitmap = vec![0_u8; block_size];
        bitmap_set_range(&mut block_bitmap, 0, overhead);
        bitmap_set_range(&mut block_bitmap, block_count, plan.block_size * 8);

        let mut inode_bitmap = vec![0_u8; block_size];
        let reserved_inodes = if group == 0 {
            EXT4_FIRST_NON_RESERVED_INODE
        } else {
            0
        };
        bitmap_set_range(&mut inode_bitmap, 0, reserved_inodes);
        bitmap_set_range(&mut inode_bitmap, plan.inodes_per_group, plan.block_size * 8);

        Self {
            meta: plan.group_metadata_blocks(group),
            block_bitmap,
            inode_bitmap,
            free_blocks: block_count - overhead,
            free_inodes: plan.inodes_per_group - reserved_inodes,
            used_dirs: 0,
            start_block: plan.group_start_block(group),
        }
    }

    /// Zero this group's inode table on disk, one block at a time.
    pub fn zero_inode_table(&self, plan: &Plan, image: &mut dyn ByteImage) -> Result<()> {
        let zero_block = vec![0_u8; plan.block_size as usize];
        for block in 0..u64::from(plan.itable_blocks) {
            let offset = (self.meta.inode_table + block) * u64::from(plan.block_size);
            image.write_all_at(offset, &zero_block)?;
        }
        Ok(())
    }

    /// Mark `len` blocks starting at absolute block `start` as used.
    pub fn mark_blocks_used(&mut self, start: u64, len: u32) -> Result<()> {
        let relative = u64_to_u32(start - self.start_block, "relative_block")?;
        bitmap_set_range(&mut self.block_bitmap, relative, relative + len);
        self.free_blocks = self.free_blocks.checked_sub(len).ok_or_else(|| {
            ConvertError::BadArchive("group free-block count underflow".into())
        })?;
        Ok(())
    }

    /// Mark an inode used in the bitmap (non-reserved inodes only).
    pub fn take_inode(&mut self, index_in_group: u32) {
        bitmap_set(&mut self.inode_bitmap, index_in_group);
        self.free_inodes -= 1;
    }

    /// Write one encoded inode into the on-disk table.
    pub fn write_inode(
        &self,
        plan: &Plan,
        image: &mut dyn ByteImage,
        ino: InodeNo,
        bytes: &[u8; 256],
    ) -> Result<()> {
        let index = ino.index_in_group(plan.inodes_per_group);
        let offset = self.meta.inode_table * u64::from(plan.block_size)
            + u64::from(index) * u64::from(EXT4_INODE_SIZE);
        image.write_all_at(offset, bytes)
    }

    /// Write the block and inode bitmaps to their metadata blocks.
    pub fn write_bitmaps(&self, plan: &Plan, image: &mut dyn ByteImage) -> Result<()> {
        let block_size = u64::from(plan.block_size);
        image.write_all_at(self.meta.block_bitmap * block_size, &self.block_bitmap)?;
        image.write_all_at(self.meta.inode_bitmap * block_size, &self.inode_bitmap)?;
        Ok(())
    }
}
