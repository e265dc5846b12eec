//! On-disk encodings: superblock, group descriptor and directory entry.
//!
//! All fields are little-endian at the offsets defined by the kernel's
//! `ext4_super_block`, `ext4_group_desc` (64-byte variant) and
//! `ext4_dir_entry`. Wide counters are split across `_lo`/`_hi` halves.

use f2e_layout::Plan;
use f2e_types::{
    align_up, split_u64, write_bytes, write_le_u16, write_le_u32, EXT4_DESC_SIZE, EXT4_INODE_SIZE,
};

pub const EXT4_SUPER_MAGIC: u16 = 0xEF53;
pub const EXT4_EXTENT_MAGIC: u16 = 0xF30A;

/// Serialized superblock length.
pub const SUPERBLOCK_LEN: usize = 1024;

const STATE_CLEANLY_UNMOUNTED: u16 = 0x0001;
const ERRORS_CONTINUE: u16 = 1;
const DYNAMIC_REV: u32 = 1;
const FEATURE_COMPAT_SPARSE_SUPER2: u32 = 0x0200;
const FEATURE_INCOMPAT_EXTENTS: u32 = 0x0040;
const FEATURE_INCOMPAT_64BIT: u32 = 0x0080;
const FIRST_INO: u32 = 11;
/// Space past the classic 128-byte inode that carries the extra
/// timestamps (crtime included).
const EXTRA_ISIZE: u16 = 32;

/// Run-dependent superblock fields; everything structural comes from the
/// [`Plan`].
#[derive(Debug, Clone, Copy)]
pub struct SuperblockFields {
    pub free_blocks: u64,
    pub free_inodes: u32,
    /// `s_block_group_nr` of this copy.
    pub block_group_nr: u16,
}

/// Serialize a complete 1024-byte superblock.
#[must_use]
pub fn encode_superblock(plan: &Plan, fields: &SuperblockFields) -> Vec<u8> {
    let mut sb = vec![0_u8; SUPERBLOCK_LEN];
    let (blocks_lo, blocks_hi) = split_u64(plan.blocks_count);
    let (free_blocks_lo, free_blocks_hi) = split_u64(fields.free_blocks);

    write_le_u32(&mut sb, 0x00, plan.inodes_count);
    write_le_u32(&mut sb, 0x04, blocks_lo);
    // 0x08: s_r_blocks_count_lo stays 0, no reserved blocks.
    write_le_u32(&mut sb, 0x0C, free_blocks_lo);
    write_le_u32(&mut sb, 0x10, fields.free_inodes);
    write_le_u32(&mut sb, 0x14, plan.first_data_block);
    write_le_u32(&mut sb, 0x18, plan.log_block_size);
    write_le_u32(&mut sb, 0x1C, plan.log_block_size); // log_cluster_size, no bigalloc
    write_le_u32(&mut sb, 0x20, plan.blocks_per_group);
    write_le_u32(&mut sb, 0x24, plan.blocks_per_group); // clusters_per_group
    write_le_u32(&mut sb, 0x28, plan.inodes_per_group);
    write_le_u16(&mut sb, 0x36, u16::MAX); // s_max_mnt_count
    write_le_u16(&mut sb, 0x38, EXT4_SUPER_MAGIC);
    write_le_u16(&mut sb, 0x3A, STATE_CLEANLY_UNMOUNTED);
    write_le_u16(&mut sb, 0x3C, ERRORS_CONTINUE);
    write_le_u32(&mut sb, 0x4C, DYNAMIC_REV);
    write_le_u32(&mut sb, 0x54, FIRST_INO);
    write_le_u16(&mut sb, 0x58, EXT4_INODE_SIZE);
    write_le_u16(&mut sb, 0x5A, fields.block_group_nr);
    write_le_u32(&mut sb, 0x5C, FEATURE_COMPAT_SPARSE_SUPER2);
    write_le_u32(&mut sb, 0x60, FEATURE_INCOMPAT_EXTENTS | FEATURE_INCOMPAT_64BIT);
    // 0x64: s_feature_ro_compat stays 0.
    write_bytes(&mut sb, 0x68, &plan.uuid);
    write_bytes(&mut sb, 0x78, &plan.volume_label);
    // 0xCE: s_reserved_gdt_blocks stays 0.
    write_le_u16(&mut sb, 0xFE, EXT4_DESC_SIZE);
    write_le_u32(&mut sb, 0x108, plan.mkfs_time);
    write_le_u32(&mut sb, 0x150, blocks_hi);
    write_le_u32(&mut sb, 0x158, free_blocks_hi);
    write_le_u16(&mut sb, 0x15C, EXTRA_ISIZE); // s_min_extra_isize
    write_le_u16(&mut sb, 0x15E, EXTRA_ISIZE); // s_want_extra_isize
    write_le_u32(&mut sb, 0x24C, plan.backup_groups[0]);
    write_le_u32(&mut sb, 0x250, plan.backup_groups[1]);
    sb
}

/// Counters of one group descriptor.
#[derive(Debug, Clone, Copy)]
pub struct GroupDescFields {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table: u64,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub used_dirs: u32,
}

/// Serialize one 64-byte group descriptor into `out`.
pub fn encode_group_desc(fields: &GroupDescFields, out: &mut [u8]) {
    debug_assert_eq!(out.len(), usize::from(EXT4_DESC_SIZE));
    let (block_bitmap_lo, block_bitmap_hi) = split_u64(fields.block_bitmap);
    let (inode_bitmap_lo, inode_bitmap_hi) = split_u64(fields.inode_bitmap);
    let (inode_table_lo, inode_table_hi) = split_u64(fields.inode_table);

    write_le_u32(out, 0x00, block_bitmap_lo);
    write_le_u32(out, 0x04, inode_bitmap_lo);
    write_le_u32(out, 0x08, inode_table_lo);
    write_le_u16(out, 0x0C, fields.free_blocks as u16);
    write_le_u16(out, 0x0E, fields.free_inodes as u16);
    write_le_u16(out, 0x10, fields.used_dirs as u16);
    write_le_u32(out, 0x20, block_bitmap_hi);
    write_le_u32(out, 0x24, inode_bitmap_hi);
    write_le_u32(out, 0x28, inode_table_hi);
    write_le_u16(out, 0x2C, (fields.free_blocks >> 16) as u16);
    write_le_u16(out, 0x2E, (fields.free_inodes >> 16) as u16);
    write_le_u16(out, 0x30, (fields.used_dirs >> 16) as u16);
}

/// Length a directory entry occupies: 8-byte header plus the name,
/// rounded up to 4.
#[must_use]
pub fn dentry_len(name_len: usize) -> usize {
    align_up(8 + name_len as u64, 4).expect("alignment is a power of two") as usize
}

/// Encode a directory entry at `offset` in a block buffer.
///
/// `rec_len` may exceed the minimal length when the entry is the last in
/// its block.
pub fn encode_dentry(block: &mut [u8], offset: usize, inode: u32, rec_len: u16, name: &[u8]) {
    write_le_u32(block, offset, inode);
    write_le_u16(block, offset + 4, rec_len);
    write_le_u16(block, offset + 6, name.len() as u16);
    write_bytes(block, offset + 8, name);
}
