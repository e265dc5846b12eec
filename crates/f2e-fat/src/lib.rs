#![forbid(unsafe_code)]
//! FAT32 reader: validated geometry, FAT chain traversal and directory
//! entry decoding (including long filenames).
//!
//! This crate only reads. Everything it hands out is either a copy or a
//! plain value, so the caller is free to mutate the image between calls.

mod boot;
mod dentry;
mod time;
mod volume;

#[cfg(test)]
pub(crate) mod testutil;

pub use boot::Geometry;
pub use dentry::{DirEntries, FatFile, RawEntry, ShortEntry, DENTRY_SIZE};
pub use time::fat_time_to_unix;
pub use volume::{ChainIter, FatVolume};
