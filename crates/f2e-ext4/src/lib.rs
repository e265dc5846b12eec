#![forbid(unsafe_code)]
//! ext4 structure serialization and the filesystem builder.
//!
//! The builder drains the archive stream produced by the traversal phase
//! and emits a complete ext4 filesystem: group descriptors, bitmaps,
//! inode tables, extent trees and directory blocks, finishing with the
//! superblock copies (primary last). It runs twice per conversion, once
//! against a discarding writer for the dry run and once for real, and is
//! deterministic, so both runs produce identical allocation sequences.

mod builder;
mod dir;
mod disk;
mod extent_tree;
mod group;
mod inode;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::{BuildOptions, BuildStats, Ext4Builder};
pub use dir::DirWriter;
pub use disk::{
    dentry_len, encode_dentry, encode_group_desc, encode_superblock, SuperblockFields,
    EXT4_EXTENT_MAGIC, EXT4_SUPER_MAGIC,
};
pub use extent_tree::{extent_tree_arity, serialize_extent_tree, BlockExtent};
pub use group::GroupState;
pub use inode::InodeImage;
