//! Directory block writer.
//!
//! Packs variable-length dentries into blocks. The blocks come first from
//! the directory's own (possibly relocated) FAT clusters, then from the
//! allocator once those run out. The last dentry of every block is grown
//! so its `rec_len` reaches the block end.

use crate::disk::{dentry_len, encode_dentry};
use crate::extent_tree::BlockExtent;
use f2e_alloc::ExtentAllocator;
use f2e_error::Result;
use f2e_fat::Geometry;
use f2e_image::ByteImage;
use f2e_types::{write_le_u16, FatExtent, InodeNo};
use std::collections::VecDeque;

/// Kernel convention: a rec_len of 65536 (full 64 KiB block) is stored as
/// 0xFFFF.
fn rec_len_to_disk(len: usize, block_size: usize) -> u16 {
    if len == 65536 && block_size == 65536 {
        0xFFFF
    } else {
        len as u16
    }
}

/// Result of writing one directory's blocks.
#[derive(Debug)]
pub struct DirBlocks {
    /// One single-block extent per dentry block, in logical order.
    pub extents: Vec<BlockExtent>,
    pub block_count: u32,
    /// Blocks that came from the allocator rather than the directory's
    /// own clusters.
    pub fresh_blocks: Vec<u64>,
}

/// Writes the dentry blocks of one directory.
pub struct DirWriter<'a> {
    geometry: &'a Geometry,
    block_size: usize,
    stream_blocks: VecDeque<u64>,
    buf: Vec<u8>,
    pos: usize,
    prev_dentry_pos: Option<usize>,
    current_block: u64,
    blocks_used: Vec<u64>,
    fresh_blocks: Vec<u64>,
}

impl<'a> DirWriter<'a> {
    /// Open a writer over the directory's archived extents.
    pub fn new(
        geometry: &'a Geometry,
        stream_extents: &[FatExtent],
        alloc: &mut ExtentAllocator,
    ) -> Result<Self> {
        let mut stream_blocks = VecDeque::new();
        for extent in stream_extents {
            for cluster in extent.physical_start.0..extent.physical_end() {
                stream_blocks.push_back(geometry.cluster_to_block(f2e_types::ClusterNo(cluster)));
            }
        }
        let block_size = geometry.cluster_size as usize;
        let mut writer = Self {
            geometry,
            block_size,
            stream_blocks,
            buf: vec![0_u8; block_size],
            pos: 0,
            prev_dentry_pos: None,
            current_block: 0,
            blocks_used: Vec::new(),
            fresh_blocks: Vec::new(),
        };
        writer.current_block = writer.next_block(alloc)?;
        Ok(writer)
    }

    fn next_block(&mut self, alloc: &mut ExtentAllocator) -> Result<u64> {
        if let Some(block) = self.stream_blocks.pop_front() {
            return Ok(block);
        }
        let cluster = alloc.allocate_one()?;
        let block = self.geometry.cluster_to_block(cluster);
        self.fresh_blocks.push(block);
        Ok(block)
    }

    /// Append one dentry; starts a new block when it does not fit.
    ///
    /// The caller guarantees `name` is at most 255 bytes.
    pub fn add_dentry(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        name: &[u8],
        ino: InodeNo,
    ) -> Result<()> {
        debug_assert!(!name.is_empty() && name.len() <= 255);
        let len = dentry_len(name.len());
        if self.block_size - self.pos < len {
            self.seal_block(image)?;
            self.current_block = self.next_block(alloc)?;
        }
        encode_dentry(
            &mut self.buf,
            self.pos,
            ino.0,
            rec_len_to_disk(len, self.block_size),
            name,
        );
        self.prev_dentry_pos = Some(self.pos);
        self.pos += len;
        Ok(())
    }

    /// Grow the last dentry to the block end and write the block out.
    fn seal_block(&mut self, image: &mut dyn ByteImage) -> Result<()> {
        let prev = self
            .prev_dentry_pos
            .expect("a directory block is never sealed empty");
        let rec_len = rec_len_to_disk(self.block_size - prev, self.block_size);
        write_le_u16(&mut self.buf, prev + 4, rec_len);

        image.write_all_at(
            self.current_block * self.block_size as u64,
            &self.buf,
        )?;
        self.blocks_used.push(self.current_block);

        self.buf.fill(0);
        self.pos = 0;
        self.prev_dentry_pos = None;
        Ok(())
    }

    /// Seal the trailing block and return the directory's block list.
    pub fn finish(mut self, image: &mut dyn ByteImage) -> Result<DirBlocks> {
        self.seal_block(image)?;
        let extents = self
            .blocks_used
            .iter()
            .enumerate()
            .map(|(logical, &block)| BlockExtent {
                logical: logical as u32,
                len: 1,
                physical: block,
            })
            .collect();
        Ok(DirBlocks {
            block_count: self.blocks_used.len() as u32,
            extents,
            fresh_blocks: self.fresh_blocks,
        })
    }
}
