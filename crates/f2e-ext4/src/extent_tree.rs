//! Extent-tree construction.
//!
//! An inode's extents are collected as plain values while the file is
//! built and serialized in one pass at finalize time: up to four extents
//! live inline in `i_block`; more push the tree down into freshly
//! allocated blocks, one level at a time. Tree nodes count toward the
//! inode's block usage but never appear in its own extent list.

use crate::disk::EXT4_EXTENT_MAGIC;
use crate::inode::INODE_BLOCK_AREA;
use f2e_alloc::ExtentAllocator;
use f2e_error::Result;
use f2e_fat::Geometry;
use f2e_image::ByteImage;
use f2e_types::{write_le_u16, write_le_u32};

/// Extent header length.
const EH_LEN: usize = 12;
/// Extent / index entry length.
const ENTRY_LEN: usize = 12;
/// Entry slots in the inode's inline root.
const ROOT_SLOTS: usize = (INODE_BLOCK_AREA - EH_LEN) / ENTRY_LEN;

/// An extent in ext4 block space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockExtent {
    pub logical: u32,
    pub len: u16,
    pub physical: u64,
}

/// Entries per extent-tree node block.
#[must_use]
pub fn extent_tree_arity(block_size: u32) -> usize {
    (block_size as usize - EH_LEN) / ENTRY_LEN
}

fn write_header(buf: &mut [u8], offset: usize, entries: u16, max: u16, depth: u16) {
    write_le_u16(buf, offset, EXT4_EXTENT_MAGIC);
    write_le_u16(buf, offset + 2, entries);
    write_le_u16(buf, offset + 4, max);
    write_le_u16(buf, offset + 6, depth);
    write_le_u32(buf, offset + 8, 0); // generation
}

fn write_extent(buf: &mut [u8], offset: usize, extent: &BlockExtent) {
    write_le_u32(buf, offset, extent.logical);
    write_le_u16(buf, offset + 4, extent.len);
    write_le_u16(buf, offset + 6, (extent.physical >> 32) as u16);
    write_le_u32(buf, offset + 8, extent.physical as u32);
}

fn write_index(buf: &mut [u8], offset: usize, logical: u32, child: u64) {
    write_le_u32(buf, offset, logical);
    write_le_u32(buf, offset + 4, child as u32);
    write_le_u16(buf, offset + 8, (child >> 32) as u16);
    write_le_u16(buf, offset + 10, 0);
}

/// Serialize `extents` into an extent tree.
///
/// Writes any needed node blocks through `image` (blocks come from
/// `alloc`, translated to block numbers via `geometry`), fills the
/// inode's 60-byte root area, and returns the allocated node blocks so
/// the caller can account for them.
pub fn serialize_extent_tree(
    image: &mut dyn ByteImage,
    alloc: &mut ExtentAllocator,
    geometry: &Geometry,
    extents: &[BlockExtent],
    root_area: &mut [u8; INODE_BLOCK_AREA],
) -> Result<Vec<u64>> {
    let block_size = geometry.cluster_size;
    root_area.fill(0);

    if extents.len() <= ROOT_SLOTS {
        write_header(root_area, 0, extents.len() as u16, ROOT_SLOTS as u16, 0);
        for (slot, extent) in extents.iter().enumerate() {
            write_extent(root_area, EH_LEN + slot * ENTRY_LEN, extent);
        }
        return Ok(Vec::new());
    }

    let arity = extent_tree_arity(block_size);
    let mut node_blocks = Vec::new();
    let mut node_buf = vec![0_u8; block_size as usize];

    // Leaves first: (first logical block, node block) per leaf.
    let mut level: Vec<(u32, u64)> = Vec::with_capacity(extents.len().div_ceil(arity));
    for chunk in extents.chunks(arity) {
        node_buf.fill(0);
        write_header(&mut node_buf, 0, chunk.len() as u16, arity as u16, 0);
        for (slot, extent) in chunk.iter().enumerate() {
            write_extent(&mut node_buf, EH_LEN + slot * ENTRY_LEN, extent);
        }
        let cluster = alloc.allocate_one()?;
        let block = geometry.cluster_to_block(cluster);
        image.write_all_at(block * u64::from(block_size), &node_buf)?;
        node_blocks.push(block);
        level.push((chunk[0].logical, block));
    }

    // Interior levels until the entries fit the inline root.
    let mut depth: u16 = 1;
    while level.len() > ROOT_SLOTS {
        let mut upper = Vec::with_capacity(level.len().div_ceil(arity));
        for chunk in level.chunks(arity) {
            node_buf.fill(0);
            write_header(&mut node_buf, 0, chunk.len() as u16, arity as u16, depth);
            for (slot, &(logical, child)) in chunk.iter().enumerate() {
                write_index(&mut node_buf, EH_LEN + slot * ENTRY_LEN, logical, child);
            }
            let cluster = alloc.allocate_one()?;
            let block = geometry.cluster_to_block(cluster);
            image.write_all_at(block * u64::from(block_size), &node_buf)?;
            node_blocks.push(block);
            upper.push((chunk[0].0, block));
        }
        level = upper;
        depth += 1;
    }

    write_header(root_area, 0, level.len() as u16, ROOT_SLOTS as u16, depth);
    for (slot, &(logical, child)) in level.iter().enumerate() {
        write_index(root_area, EH_LEN + slot * ENTRY_LEN, logical, child);
    }
    Ok(node_blocks)
}
