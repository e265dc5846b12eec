//! The ext4 builder: drains the archive stream and writes the target
//! filesystem.
//!
//! Determinism contract: given the same plan, archive and allocator
//! state, `build` performs the same allocations in the same order. The
//! dry run relies on this when it replays the same code against a cloned
//! allocator and a discarding writer.

use crate::dir::DirWriter;
use crate::disk::{encode_group_desc, encode_superblock, GroupDescFields, SuperblockFields};
use crate::extent_tree::{serialize_extent_tree, BlockExtent};
use crate::group::GroupState;
use crate::inode::{InodeImage, InodeTimes};
use f2e_alloc::ExtentAllocator;
use f2e_archive::{ArchiveReader, DentryRecord, DirMeta, NameUnit};
use f2e_error::{ConvertError, Result};
use f2e_fat::Geometry;
use f2e_image::ByteImage;
use f2e_layout::Plan;
use f2e_types::{
    ucs2_to_utf8, FatExtent, InodeNo, EXT4_FIRST_NON_RESERVED_INODE, EXT4_NAME_MAX,
};
use tracing::{debug, info};

/// Identity and clock inputs for inode construction.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub uid: u32,
    pub gid: u32,
    /// Timestamp for the reserved inodes and `s_mkfs_time`.
    pub now: u32,
}

/// Counters and the allocation trace of one build run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub directories: u64,
    pub regular_files: u64,
    pub inodes_used: u32,
    /// Every block the builder obtained from the allocator, in order of
    /// registration. Identical between the dry run and the commit.
    pub allocated_blocks: Vec<u64>,
}

/// One node's records pulled off the stream.
struct StreamNode {
    dentry: DentryRecord,
    name: String,
    extents: Vec<FatExtent>,
    meta: DirMeta,
}

pub struct Ext4Builder<'a> {
    plan: &'a Plan,
    geometry: &'a Geometry,
    opts: BuildOptions,
    groups: Vec<GroupState>,
    next_inode: u32,
    stats: BuildStats,
}

impl<'a> Ext4Builder<'a> {
    #[must_use]
    pub fn new(plan: &'a Plan, geometry: &'a Geometry, opts: BuildOptions) -> Self {
        Self {
            plan,
            geometry,
            opts,
            groups: Vec::new(),
            next_inode: EXT4_FIRST_NON_RESERVED_INODE + 1,
            stats: BuildStats::default(),
        }
    }

    /// Build the complete filesystem from the archive stream.
    pub fn build(
        mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        reader: &mut ArchiveReader,
    ) -> Result<BuildStats> {
        self.init_groups(image)?;

        let root_extents: Vec<FatExtent> = reader.read_group(image)?;
        let root_meta = read_one::<DirMeta>(reader, image)?;
        if !root_meta.is_dir() {
            return Err(ConvertError::BadArchive(
                "stream does not start with a directory".into(),
            ));
        }

        let times = InodeTimes::all(self.opts.now);
        let mut root = InodeImage::directory(
            InodeNo::ROOT,
            0o755,
            self.opts.uid,
            self.opts.gid,
            times,
        );
        // Root's own `..` refers back to itself.
        root.links_count += 1;

        let mut root_writer = DirWriter::new(self.geometry, &root_extents, alloc)?;
        root_writer.add_dentry(image, alloc, b".", InodeNo::ROOT)?;
        root.links_count += 1;
        root_writer.add_dentry(image, alloc, b"..", InodeNo::ROOT)?;

        self.build_lost_found(image, alloc, &mut root_writer, &mut root.links_count)?;

        for _ in 0..root_meta.0 {
            self.build_child(
                image,
                alloc,
                reader,
                &mut root_writer,
                InodeNo::ROOT,
                &mut root.links_count,
            )?;
        }

        self.finish_dir(image, alloc, root, root_writer)?;
        self.stats.directories += 1;

        self.finalize(image)?;
        self.stats.inodes_used = self.next_inode - 1;
        info!(
            target: "f2e::ext4",
            directories = self.stats.directories,
            files = self.stats.regular_files,
            inodes = self.stats.inodes_used,
            "filesystem built"
        );
        Ok(self.stats)
    }

    fn init_groups(&mut self, image: &mut dyn ByteImage) -> Result<()> {
        for group in 0..self.plan.group_count {
            self.groups.push(GroupState::new(self.plan, group));
        }
        for group in &self.groups {
            group.zero_inode_table(self.plan, image)?;
        }
        debug!(target: "f2e::ext4", groups = self.plan.group_count, "group state initialized");
        Ok(())
    }

    /// `lost+found`: inode 11, one fresh block, owned by root.
    fn build_lost_found(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        root_writer: &mut DirWriter<'_>,
        root_links: &mut u16,
    ) -> Result<()> {
        let mut inode = InodeImage::directory(
            InodeNo::LOST_FOUND,
            0o700,
            0,
            0,
            InodeTimes::all(self.opts.now),
        );
        root_writer.add_dentry(image, alloc, b"lost+found", InodeNo::LOST_FOUND)?;
        inode.links_count += 1;

        let mut writer = DirWriter::new(self.geometry, &[], alloc)?;
        writer.add_dentry(image, alloc, b".", InodeNo::LOST_FOUND)?;
        inode.links_count += 1;
        writer.add_dentry(image, alloc, b"..", InodeNo::ROOT)?;
        *root_links += 1;

        self.finish_dir(image, alloc, inode, writer)?;
        self.stats.directories += 1;
        Ok(())
    }

    fn build_child(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        reader: &mut ArchiveReader,
        parent_writer: &mut DirWriter<'_>,
        parent_ino: InodeNo,
        parent_links: &mut u16,
    ) -> Result<()> {
        let node = self.read_node(image, reader)?;
        let ino = self.allocate_inode()?;
        parent_writer.add_dentry(image, alloc, node.name.as_bytes(), ino)?;

        let record = node.dentry;
        let times = InodeTimes {
            atime: record.access_time,
            mtime: record.modify_time,
            ctime: record.modify_time.saturating_add(1),
            crtime: record.create_time,
        };

        if node.meta.is_dir() {
            let mode_bits = if record.is_read_only { 0o555 } else { 0o755 };
            let mut inode = InodeImage::directory(ino, mode_bits, self.opts.uid, self.opts.gid, times);
            inode.links_count += 1; // the dentry in the parent
            *parent_links += 1; // this directory's `..`

            let mut writer = DirWriter::new(self.geometry, &node.extents, alloc)?;
            writer.add_dentry(image, alloc, b".", ino)?;
            inode.links_count += 1;
            writer.add_dentry(image, alloc, b"..", parent_ino)?;

            for _ in 0..node.meta.0 {
                self.build_child(image, alloc, reader, &mut writer, ino, &mut inode.links_count)?;
            }
            self.finish_dir(image, alloc, inode, writer)?;
            self.stats.directories += 1;
        } else {
            let mode_bits = if record.is_read_only { 0o444 } else { 0o644 };
            let mut inode = InodeImage::regular(ino, mode_bits, self.opts.uid, self.opts.gid, times);
            inode.links_count = 1;
            inode.size = u64::from(record.file_size);

            let extents = self.register_data_extents(&mut inode, &node.extents)?;
            self.finalize_inode(image, alloc, inode, &extents)?;
            self.stats.regular_files += 1;
        }
        Ok(())
    }

    fn read_node(&self, image: &dyn ByteImage, reader: &mut ArchiveReader) -> Result<StreamNode> {
        let dentry = read_one::<DentryRecord>(reader, image)?;
        let units: Vec<NameUnit> = reader.read_group(image)?;
        let raw_units: Vec<u16> = units.iter().map(|unit| unit.0).collect();
        let name = ucs2_to_utf8(&raw_units)?;
        if name.is_empty() {
            return Err(ConvertError::BadArchive("node with an empty name".into()));
        }
        if name.len() > EXT4_NAME_MAX {
            return Err(ConvertError::NameTooLong {
                len: name.len(),
                name,
            });
        }
        let extents: Vec<FatExtent> = reader.read_group(image)?;
        let meta = read_one::<DirMeta>(reader, image)?;
        Ok(StreamNode {
            dentry,
            name,
            extents,
            meta,
        })
    }

    fn allocate_inode(&mut self) -> Result<InodeNo> {
        let ino = self.next_inode;
        if ino > self.plan.inodes_count {
            return Err(ConvertError::NoInodes {
                limit: self.plan.inodes_count,
            });
        }
        self.next_inode += 1;
        let ino = InodeNo(ino);
        let group = ino.group(self.plan.inodes_per_group);
        self.groups[group.0 as usize].take_inode(ino.index_in_group(self.plan.inodes_per_group));
        Ok(ino)
    }

    /// Convert stream extents to block space and mark them used.
    fn register_data_extents(
        &mut self,
        inode: &mut InodeImage,
        extents: &[FatExtent],
    ) -> Result<Vec<BlockExtent>> {
        let mut out = Vec::with_capacity(extents.len());
        for extent in extents {
            let block = self.geometry.cluster_to_block(extent.physical_start);
            self.mark_used(block, u32::from(extent.len))?;
            inode.blocks_512 +=
                u64::from(extent.len) * u64::from(self.plan.block_size) / 512;
            out.push(BlockExtent {
                logical: extent.logical_start,
                len: extent.len,
                physical: block,
            });
        }
        Ok(out)
    }

    fn mark_used(&mut self, start_block: u64, len: u32) -> Result<()> {
        let group = self.plan.group_of_block(start_block);
        let last_group = self.plan.group_of_block(start_block + u64::from(len) - 1);
        if group != last_group {
            return Err(ConvertError::BadArchive(format!(
                "extent {start_block}+{len} spans block groups {group} and {last_group}"
            )));
        }
        self.groups[group as usize].mark_blocks_used(start_block, len)
    }

    /// Seal a directory, register its blocks and write its inode.
    fn finish_dir(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        mut inode: InodeImage,
        writer: DirWriter<'_>,
    ) -> Result<()> {
        let blocks = writer.finish(image)?;
        for extent in &blocks.extents {
            self.mark_used(extent.physical, u32::from(extent.len))?;
            inode.blocks_512 += u64::from(self.plan.block_size) / 512;
        }
        self.stats.allocated_blocks.extend(&blocks.fresh_blocks);
        inode.size = u64::from(blocks.block_count) * u64::from(self.plan.block_size);
        self.finalize_inode(image, alloc, inode, &blocks.extents)
    }

    /// Serialize the extent tree and write the inode into its table slot.
    fn finalize_inode(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        mut inode: InodeImage,
        extents: &[BlockExtent],
    ) -> Result<()> {
        let tree_blocks =
            serialize_extent_tree(image, alloc, self.geometry, extents, &mut inode.block_area)?;
        for &block in &tree_blocks {
            self.mark_used(block, 1)?;
            inode.blocks_512 += u64::from(self.plan.block_size) / 512;
        }
        self.stats.allocated_blocks.extend(&tree_blocks);

        let group = inode.ino.group(self.plan.inodes_per_group);
        if inode.is_dir() {
            self.groups[group.0 as usize].used_dirs += 1;
        }
        let bytes = inode.encode()?;
        self.groups[group.0 as usize].write_inode(self.plan, image, inode.ino, &bytes)
    }

    /// Write bitmaps, group descriptors and superblocks. The primary
    /// superblock goes last so the volume stays recognizable as FAT32 for
    /// as long as possible.
    fn finalize(&mut self, image: &mut dyn ByteImage) -> Result<()> {
        for group in &self.groups {
            group.write_bitmaps(self.plan, image)?;
        }

        let free_blocks: u64 = self.groups.iter().map(|g| u64::from(g.free_blocks)).sum();
        let free_inodes: u32 = self.groups.iter().map(|g| g.free_inodes).sum();

        let block_size = u64::from(self.plan.block_size);
        let mut gdt = vec![0_u8; self.plan.gdt_blocks as usize * self.plan.block_size as usize];
        for (index, group) in self.groups.iter().enumerate() {
            let fields = GroupDescFields {
                block_bitmap: group.meta.block_bitmap,
                inode_bitmap: group.meta.inode_bitmap,
                inode_table: group.meta.inode_table,
                free_blocks: group.free_blocks,
                free_inodes: group.free_inodes,
                used_dirs: group.used_dirs,
            };
            encode_group_desc(&fields, &mut gdt[index * 64..index * 64 + 64]);
        }

        for &backup in &self.plan.backup_groups {
            if backup == 0 {
                continue;
            }
            let fields = SuperblockFields {
                free_blocks,
                free_inodes,
                block_group_nr: backup as u16,
            };
            let sb = encode_superblock(self.plan, &fields);
            let start = self.plan.group_start_block(backup);
            image.write_all_at(start * block_size, &sb)?;
            image.write_all_at((start + 1) * block_size, &gdt)?;
        }

        let gdt_block = u64::from(self.plan.first_data_block) + 1;
        image.write_all_at(gdt_block * block_size, &gdt)?;
        let fields = SuperblockFields {
            free_blocks,
            free_inodes,
            block_group_nr: 0,
        };
        let sb = encode_superblock(self.plan, &fields);
        image.write_all_at(1024, &sb)?;
        Ok(())
    }
}

fn read_one<R: f2e_archive::Record + Copy>(
    reader: &mut ArchiveReader,
    image: &dyn ByteImage,
) -> Result<R> {
    let records: Vec<R> = reader.read_group(image)?;
    match records.as_slice() {
        [record] => Ok(*record),
        other => Err(ConvertError::BadArchive(format!(
            "expected exactly one record in group, found {}",
            other.len()
        ))),
    }
}
