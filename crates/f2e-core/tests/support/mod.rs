//! Test support: a FAT32 image fixture builder and a minimal ext4
//! read-back walker used to assert the conversion's end-to-end
//! properties without external tooling.

use f2e_image::MemImage;
use std::collections::BTreeMap;

// ── FAT32 fixture builder ───────────────────────────────────────────────────

const SECTOR: u32 = 1024;
const RESERVED_SECTORS: u32 = 2;
const FAT_COUNT: u32 = 2;
const END_OF_CHAIN: u32 = 0x0FFF_FFFF;

enum Node {
    Dir {
        children: BTreeMap<String, Node>,
        read_only: bool,
    },
    File {
        data: Vec<u8>,
        pinned: Option<Vec<u32>>,
        read_only: bool,
    },
}

/// Builds small FAT32 volumes with 1 KiB sectors and clusters.
pub struct FatImage {
    total_sectors: u32,
    sectors_per_fat: u32,
    cluster_count: u32,
    root: BTreeMap<String, Node>,
    fat: Vec<u32>,
    data: Vec<u8>,
    next_free: u32,
    short_name_counter: u32,
}

impl FatImage {
    /// A volume of `total_kib` 1 KiB sectors.
    pub fn new(total_kib: u32) -> Self {
        // Size the FAT so it addresses every cluster.
        let mut sectors_per_fat = 1;
        loop {
            let before_data = RESERVED_SECTORS + FAT_COUNT * sectors_per_fat;
            let cluster_count = total_kib - before_data + 2;
            if sectors_per_fat * SECTOR / 4 >= cluster_count {
                break;
            }
            sectors_per_fat += 1;
        }
        let before_data = RESERVED_SECTORS + FAT_COUNT * sectors_per_fat;
        let cluster_count = total_kib - before_data + 2;

        let mut fat = vec![0_u32; cluster_count as usize];
        fat[0] = 0x0FFF_FFF8;
        fat[1] = END_OF_CHAIN;

        Self {
            total_sectors: total_kib,
            sectors_per_fat,
            cluster_count,
            root: BTreeMap::new(),
            fat,
            data: vec![0_u8; ((total_kib - before_data) * SECTOR) as usize],
            next_free: 2,
            short_name_counter: 0,
        }
    }

    /// Clusters available for file data on the volume.
    pub fn data_cluster_capacity(&self) -> u32 {
        self.cluster_count - 2
    }

    pub fn add_dir(&mut self, path: &[&str]) {
        self.dir_at(path);
    }

    /// Stage a directory carrying the FAT read-only attribute.
    pub fn add_read_only_dir(&mut self, path: &[&str]) {
        self.dir_at(path);
        let (dir_path, name) = path.split_at(path.len() - 1);
        let parent = self.dir_at(dir_path);
        match parent.get_mut(name[0]) {
            Some(Node::Dir { read_only, .. }) => *read_only = true,
            _ => panic!("{} is not a staged directory", name[0]),
        }
    }

    pub fn add_file(&mut self, path: &[&str], contents: &[u8]) {
        self.stage_file(path, contents, None, false);
    }

    /// Stage a file carrying the FAT read-only attribute.
    pub fn add_read_only_file(&mut self, path: &[&str], contents: &[u8]) {
        self.stage_file(path, contents, None, true);
    }

    /// Stage a file whose chain uses exactly the given clusters, in
    /// order. The clusters must be free and the list must cover the data.
    pub fn add_file_with_clusters(&mut self, path: &[&str], contents: &[u8], clusters: Vec<u32>) {
        assert_eq!(
            clusters.len(),
            contents.len().div_ceil(SECTOR as usize).max(1)
        );
        self.stage_file(path, contents, Some(clusters), false);
    }

    fn stage_file(
        &mut self,
        path: &[&str],
        contents: &[u8],
        pinned: Option<Vec<u32>>,
        read_only: bool,
    ) {
        let (dir_path, name) = path.split_at(path.len() - 1);
        let dir = self.dir_at(dir_path);
        dir.insert(
            name[0].to_string(),
            Node::File {
                data: contents.to_vec(),
                pinned,
                read_only,
            },
        );
    }

    fn dir_at(&mut self, path: &[&str]) -> &mut BTreeMap<String, Node> {
        let mut current = &mut self.root;
        for part in path {
            let entry = current.entry(part.to_string()).or_insert_with(|| Node::Dir {
                children: BTreeMap::new(),
                read_only: false,
            });
            current = match entry {
                Node::Dir { children, .. } => children,
                Node::File { .. } => panic!("path component {part} is a file"),
            };
        }
        current
    }

    pub fn build(mut self) -> MemImage {
        let tree = std::mem::take(&mut self.root);
        let root_cluster = self.write_dir(&tree, true);

        let before_data = RESERVED_SECTORS + FAT_COUNT * self.sectors_per_fat;
        let mut bytes = vec![0_u8; (self.total_sectors * SECTOR) as usize];

        // Boot sector.
        bytes[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        bytes[13] = 1; // sectors per cluster
        bytes[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        bytes[16] = FAT_COUNT as u8;
        bytes[32..36].copy_from_slice(&self.total_sectors.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        bytes[44..48].copy_from_slice(&root_cluster.to_le_bytes());
        bytes[66] = 0x29;
        bytes[67..71].copy_from_slice(&0x1234_5678_u32.to_le_bytes());
        bytes[71..82].copy_from_slice(b"FIXTURE    ");
        bytes[510] = 0x55;
        bytes[511] = 0xAA;

        // Both FAT copies.
        for copy in 0..FAT_COUNT {
            let start = ((RESERVED_SECTORS + copy * self.sectors_per_fat) * SECTOR) as usize;
            for (index, entry) in self.fat.iter().enumerate() {
                let offset = start + index * 4;
                bytes[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
            }
        }

        // Data region.
        let data_start = (before_data * SECTOR) as usize;
        bytes[data_start..data_start + self.data.len()].copy_from_slice(&self.data);
        MemImage::from_vec(bytes)
    }

    fn alloc_chain(&mut self, count: u32, pinned: Option<Vec<u32>>) -> Vec<u32> {
        let clusters = match pinned {
            Some(clusters) => clusters,
            None => {
                let mut clusters = Vec::with_capacity(count as usize);
                while clusters.len() < count as usize {
                    let cluster = self.next_free;
                    assert!(cluster < self.cluster_count, "fixture volume overflow");
                    self.next_free += 1;
                    if self.fat[cluster as usize] == 0 {
                        clusters.push(cluster);
                    }
                }
                clusters
            }
        };
        for pair in clusters.windows(2) {
            assert_eq!(self.fat[pair[0] as usize], 0, "cluster staged twice");
            self.fat[pair[0] as usize] = pair[1];
        }
        if let Some(&last) = clusters.last() {
            assert_eq!(self.fat[last as usize], 0, "cluster staged twice");
            self.fat[last as usize] = END_OF_CHAIN;
        }
        clusters
    }

    fn write_cluster_data(&mut self, clusters: &[u32], data: &[u8]) {
        for (index, &cluster) in clusters.iter().enumerate() {
            let from = index * SECTOR as usize;
            let to = (data.len()).min(from + SECTOR as usize);
            if from >= data.len() {
                break;
            }
            let offset = ((cluster - 2) * SECTOR) as usize;
            self.data[offset..offset + (to - from)].copy_from_slice(&data[from..to]);
        }
    }

    fn write_file(&mut self, data: &[u8], pinned: Option<Vec<u32>>) -> u32 {
        if data.is_empty() && pinned.is_none() {
            return 0;
        }
        let count = data.len().div_ceil(SECTOR as usize).max(1) as u32;
        let clusters = self.alloc_chain(count, pinned);
        self.write_cluster_data(&clusters, data);
        clusters[0]
    }

    fn write_dir(&mut self, children: &BTreeMap<String, Node>, is_root: bool) -> u32 {
        // Children first, so their start clusters are known.
        let mut entries: Vec<(String, bool, bool, u32, u32)> = Vec::new();
        for (name, node) in children {
            match node {
                Node::Dir {
                    children: grandchildren,
                    read_only,
                } => {
                    let first = self.write_dir(grandchildren, false);
                    entries.push((name.clone(), true, *read_only, first, 0));
                }
                Node::File {
                    data,
                    pinned,
                    read_only,
                } => {
                    let first = self.write_file(data, pinned.clone());
                    entries.push((name.clone(), false, *read_only, first, data.len() as u32));
                }
            }
        }

        let mut dentries: Vec<u8> = Vec::new();
        let mut self_entry_offset = None;
        if !is_root {
            // Dot entries; the converter skips them, values are nominal.
            self_entry_offset = Some(dentries.len());
            dentries.extend_from_slice(&short_entry(*b".          ", 0x10, 0, 0));
            dentries.extend_from_slice(&short_entry(*b"..         ", 0x10, 0, 0));
        }
        for (name, is_dir, read_only, first, size) in &entries {
            self.push_named_entry(&mut dentries, name, *is_dir, *read_only, *first, *size);
        }
        dentries.extend_from_slice(&[0_u8; 32]); // table end

        let count = dentries.len().div_ceil(SECTOR as usize) as u32;
        let clusters = self.alloc_chain(count, None);
        if let Some(offset) = self_entry_offset {
            let first = clusters[0];
            dentries[offset + 26..offset + 28].copy_from_slice(&(first as u16).to_le_bytes());
            dentries[offset + 20..offset + 22]
                .copy_from_slice(&((first >> 16) as u16).to_le_bytes());
        }
        let data = dentries;
        self.write_cluster_data(&clusters, &data);
        clusters[0]
    }

    fn push_named_entry(
        &mut self,
        out: &mut Vec<u8>,
        name: &str,
        is_dir: bool,
        read_only: bool,
        first_cluster: u32,
        size: u32,
    ) {
        let short = self.unique_short_name();
        let checksum = short_name_checksum(&short);
        let units: Vec<u16> = name.encode_utf16().collect();
        assert!(units.len() <= 255, "fixture name too long for FAT");

        let lfn_count = units.len().div_ceil(13);
        for seq in (1..=lfn_count).rev() {
            let mut padded = [0xFFFF_u16; 13];
            let start = (seq - 1) * 13;
            let end = units.len().min(start + 13);
            for (slot, &unit) in units[start..end].iter().enumerate() {
                padded[slot] = unit;
            }
            if end - start < 13 {
                padded[end - start] = 0;
            }
            let mut entry = [0_u8; 32];
            entry[0] = seq as u8 | if seq == lfn_count { 0x40 } else { 0 };
            entry[11] = 0x0F;
            entry[13] = checksum;
            for (slot, offset) in (1..11).step_by(2).enumerate() {
                entry[offset..offset + 2].copy_from_slice(&padded[slot].to_le_bytes());
            }
            for (slot, offset) in (14..26).step_by(2).enumerate() {
                entry[offset..offset + 2].copy_from_slice(&padded[slot + 5].to_le_bytes());
            }
            for (slot, offset) in (28..32).step_by(2).enumerate() {
                entry[offset..offset + 2].copy_from_slice(&padded[slot + 11].to_le_bytes());
            }
            out.extend_from_slice(&entry);
        }

        let mut attrs = if is_dir { 0x10 } else { 0x20 };
        if read_only {
            attrs |= 0x01;
        }
        out.extend_from_slice(&short_entry(short, attrs, first_cluster, size));
    }

    fn unique_short_name(&mut self) -> [u8; 11] {
        self.short_name_counter += 1;
        let mut name = [b' '; 11];
        let base = format!("FS{:06}", self.short_name_counter);
        name[..8].copy_from_slice(base.as_bytes());
        name
    }
}

fn short_entry(name: [u8; 11], attrs: u8, first_cluster: u32, size: u32) -> [u8; 32] {
    let mut entry = [0_u8; 32];
    entry[0..11].copy_from_slice(&name);
    entry[11] = attrs;
    // Fixed plausible timestamps: 2019-07-20, 12:35:46.
    entry[14..16].copy_from_slice(&0x6477_u16.to_le_bytes());
    entry[16..18].copy_from_slice(&0x4EF4_u16.to_le_bytes());
    entry[18..20].copy_from_slice(&0x4EF4_u16.to_le_bytes());
    entry[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
    entry[22..24].copy_from_slice(&0x6477_u16.to_le_bytes());
    entry[24..26].copy_from_slice(&0x4EF4_u16.to_le_bytes());
    entry[26..28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

fn short_name_checksum(name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &byte in name {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
    }
    sum
}

// ── FAT-side snapshot (for abort-safety assertions) ─────────────────────────

/// Path → (is_dir, contents) for every node reachable from the FAT root.
pub fn fat_tree_snapshot(image: &MemImage) -> BTreeMap<String, (bool, Vec<u8>)> {
    let volume = f2e_fat::FatVolume::open(image).expect("volume no longer parses as FAT32");
    let mut out = BTreeMap::new();
    let root = volume.geometry().root_cluster;
    snapshot_dir(&volume, image, root, String::new(), &mut out);
    out
}

fn snapshot_dir(
    volume: &f2e_fat::FatVolume,
    image: &MemImage,
    cluster: f2e_types::ClusterNo,
    prefix: String,
    out: &mut BTreeMap<String, (bool, Vec<u8>)>,
) {
    let data = volume.read_chain(image, cluster).expect("directory chain");
    for file in volume.dir_entries(&data, cluster) {
        let file = file.expect("directory entry");
        let name = f2e_types::ucs2_to_utf8(&file.name_units).expect("name");
        let path = format!("{prefix}/{name}");
        if file.entry.is_dir() {
            out.insert(path.clone(), (true, Vec::new()));
            snapshot_dir(volume, image, file.entry.first_cluster(), path, out);
        } else {
            let mut contents = volume
                .read_chain(image, file.entry.first_cluster())
                .expect("file chain");
            contents.truncate(file.entry.file_size as usize);
            out.insert(path, (false, contents));
        }
    }
}

// ── Minimal ext4 walker ─────────────────────────────────────────────────────

fn le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn lo_hi(lo: u32, hi: u32) -> u64 {
    u64::from(lo) | (u64::from(hi) << 32)
}

pub struct Ext4Check<'a> {
    img: &'a [u8],
    pub block_size: u64,
    pub blocks_count: u64,
    pub first_data_block: u64,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inodes_count: u32,
    pub group_count: u32,
    pub backup_groups: [u32; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct WalkedExtent {
    pub logical: u32,
    pub len: u16,
    pub physical: u64,
}

#[derive(Debug, Clone)]
pub struct WalkedInode {
    pub ino: u32,
    pub mode: u16,
    pub size: u64,
    pub links: u16,
    pub blocks_512: u64,
    pub extents: Vec<WalkedExtent>,
    pub tree_blocks: Vec<u64>,
}

impl<'a> Ext4Check<'a> {
    pub fn open(image: &'a MemImage) -> Self {
        let img = image.as_slice();
        let sb = &img[1024..2048];
        assert_eq!(le16(sb, 0x38), 0xEF53, "superblock magic");
        assert_eq!(le16(sb, 0x3A), 1, "state cleanly unmounted");
        assert_eq!(le32(sb, 0x5C), 0x0200, "compat: sparse_super2");
        assert_eq!(le32(sb, 0x60), 0x00C0, "incompat: extents | 64bit");
        assert_eq!(le16(sb, 0x58), 256, "inode size");
        assert_eq!(le16(sb, 0xFE), 64, "descriptor size");

        let block_size = 1024_u64 << le32(sb, 0x18);
        let blocks_count = lo_hi(le32(sb, 0x04), le32(sb, 0x150));
        let first_data_block = u64::from(le32(sb, 0x14));
        let blocks_per_group = le32(sb, 0x20);
        let inodes_per_group = le32(sb, 0x28);
        let inodes_count = le32(sb, 0x00);
        let data_blocks = blocks_count - first_data_block;
        let group_count = data_blocks.div_ceil(u64::from(blocks_per_group)) as u32;

        Self {
            img,
            block_size,
            blocks_count,
            first_data_block,
            blocks_per_group,
            inodes_per_group,
            inodes_count,
            group_count,
            backup_groups: [le32(sb, 0x24C), le32(sb, 0x250)],
        }
    }

    fn block(&self, block: u64) -> &[u8] {
        let start = (block * self.block_size) as usize;
        &self.img[start..start + self.block_size as usize]
    }

    pub fn group_desc(&self, group: u32) -> (u64, u64, u64, u32, u32, u32) {
        let gdt_block = self.first_data_block + 1;
        let offset = (gdt_block * self.block_size) as usize + group as usize * 64;
        let desc = &self.img[offset..offset + 64];
        (
            lo_hi(le32(desc, 0x00), le32(desc, 0x20)),
            lo_hi(le32(desc, 0x04), le32(desc, 0x24)),
            lo_hi(le32(desc, 0x08), le32(desc, 0x28)),
            u32::from(le16(desc, 0x0C)) | (u32::from(le16(desc, 0x2C)) << 16),
            u32::from(le16(desc, 0x0E)) | (u32::from(le16(desc, 0x2E)) << 16),
            u32::from(le16(desc, 0x10)) | (u32::from(le16(desc, 0x30)) << 16),
        )
    }

    pub fn inode(&self, ino: u32) -> WalkedInode {
        assert!(ino >= 1 && ino <= self.inodes_count);
        let group = (ino - 1) / self.inodes_per_group;
        let index = (ino - 1) % self.inodes_per_group;
        let (_, _, table, _, _, _) = self.group_desc(group);
        let offset = (table * self.block_size) as usize + index as usize * 256;
        let raw = &self.img[offset..offset + 256];

        let mut inode = WalkedInode {
            ino,
            mode: le16(raw, 0x00),
            size: lo_hi(le32(raw, 0x04), le32(raw, 0x6C)),
            links: le16(raw, 0x1A),
            blocks_512: u64::from(le32(raw, 0x1C)) | (u64::from(le16(raw, 0x74)) << 32),
            extents: Vec::new(),
            tree_blocks: Vec::new(),
        };
        if le32(raw, 0x20) & 0x0008_0000 != 0 {
            let root = &raw[0x28..0x28 + 60];
            self.walk_extent_node(root, &mut inode);
        }
        inode
    }

    fn walk_extent_node(&self, node: &[u8], inode: &mut WalkedInode) {
        assert_eq!(le16(node, 0), 0xF30A, "extent node magic");
        let entries = le16(node, 2) as usize;
        let depth = le16(node, 6);
        for slot in 0..entries {
            let at = 12 + slot * 12;
            if depth == 0 {
                inode.extents.push(WalkedExtent {
                    logical: le32(node, at),
                    len: le16(node, at + 4),
                    physical: u64::from(le32(node, at + 8))
                        | (u64::from(le16(node, at + 6)) << 32),
                });
            } else {
                let child =
                    u64::from(le32(node, at + 4)) | (u64::from(le16(node, at + 8)) << 32);
                inode.tree_blocks.push(child);
                let child_block = self.block(child).to_vec();
                self.walk_extent_node(&child_block, inode);
            }
        }
    }

    pub fn read_file(&self, inode: &WalkedInode) -> Vec<u8> {
        let mut out = vec![0_u8; inode.size as usize];
        for extent in &inode.extents {
            for step in 0..u64::from(extent.len) {
                let logical = (u64::from(extent.logical) + step) * self.block_size;
                if logical >= inode.size {
                    break;
                }
                let end = inode.size.min(logical + self.block_size);
                let src = self.block(extent.physical + step);
                out[logical as usize..end as usize]
                    .copy_from_slice(&src[..(end - logical) as usize]);
            }
        }
        out
    }

    /// Dentries of a directory inode, excluding `.` and `..`.
    pub fn dir_entries(&self, inode: &WalkedInode) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        for extent in &inode.extents {
            for step in 0..u64::from(extent.len) {
                let block = self.block(extent.physical + step);
                let mut pos = 0_usize;
                while pos + 8 <= block.len() {
                    let ino = le32(block, pos);
                    let rec_len = le16(block, pos + 4) as usize;
                    let name_len = le16(block, pos + 6) as usize;
                    assert!(rec_len >= 8, "dentry rec_len too small");
                    assert_eq!(rec_len % 4, 0, "dentry rec_len unaligned");
                    let name =
                        String::from_utf8(block[pos + 8..pos + 8 + name_len].to_vec()).unwrap();
                    if ino != 0 && name != "." && name != ".." {
                        out.push((name, ino));
                    }
                    pos += rec_len;
                }
                assert_eq!(pos, block.len(), "dentries must cover the block exactly");
            }
        }
        out
    }

    /// Path → inode for the whole tree.
    pub fn walk_tree(&self) -> BTreeMap<String, WalkedInode> {
        let mut out = BTreeMap::new();
        let root = self.inode(2);
        self.walk_into(&root, String::new(), &mut out);
        out
    }

    fn walk_into(
        &self,
        dir: &WalkedInode,
        prefix: String,
        out: &mut BTreeMap<String, WalkedInode>,
    ) {
        for (name, ino) in self.dir_entries(dir) {
            let inode = self.inode(ino);
            let path = format!("{prefix}/{name}");
            if inode.mode & 0x4000 != 0 {
                self.walk_into(&inode, path.clone(), out);
            }
            out.insert(path, inode);
        }
    }

    fn bitmap_bit(&self, bitmap: &[u8], bit: u64) -> bool {
        bitmap[(bit / 8) as usize] >> (bit % 8) & 1 == 1
    }

    /// P4 + P5: no extent overlaps another inode's extents or any group's
    /// metadata, and every group's block bitmap equals overhead plus the
    /// referenced blocks.
    pub fn check_bitmaps_and_overlap(&self) {
        use std::collections::BTreeSet;

        // Blocks referenced by some inode (data extents + tree nodes).
        let mut referenced: BTreeSet<u64> = BTreeSet::new();
        let mut claim = |block: u64, what: &str| {
            assert!(
                referenced.insert(block),
                "block {block} referenced twice ({what})"
            );
        };
        let mut by_ino: BTreeMap<u32, WalkedInode> = BTreeMap::new();
        by_ino.insert(2, self.inode(2));
        by_ino.insert(11, self.inode(11));
        for inode in self.walk_tree().into_values() {
            by_ino.insert(inode.ino, inode);
        }
        for inode in by_ino.values() {
            for extent in &inode.extents {
                for step in 0..u64::from(extent.len) {
                    claim(extent.physical + step, "data extent");
                }
            }
            for &block in &inode.tree_blocks {
                claim(block, "extent tree node");
            }
        }

        for group in 0..self.group_count {
            let start =
                self.first_data_block + u64::from(group) * u64::from(self.blocks_per_group);
            let count = (self.blocks_count - start).min(u64::from(self.blocks_per_group));
            let (bitmap_block, inode_bitmap_block, table, _, _, _) = self.group_desc(group);
            let bitmap = self.block(bitmap_block);

            // Metadata region: from group start to the end of the inode
            // table; no referenced block may fall inside it.
            let inode_table_blocks =
                (u64::from(self.inodes_per_group) * 256).div_ceil(self.block_size);
            let meta_end = table + inode_table_blocks;
            let overhead = meta_end - start;
            assert_eq!(bitmap_block, inode_bitmap_block - 1);

            for bit in 0..u64::from(self.blocks_per_group) {
                let block = start + bit;
                let expected = if bit >= count {
                    true // padding past the group's last block
                } else if block < meta_end {
                    true // group metadata
                } else {
                    referenced.contains(&block)
                };
                assert_eq!(
                    self.bitmap_bit(bitmap, bit),
                    expected,
                    "block bitmap bit for block {block} in group {group} (overhead {overhead})"
                );
                if block < meta_end {
                    assert!(
                        !referenced.contains(&block),
                        "block {block} lies in group {group} metadata but is referenced"
                    );
                }
            }
        }
    }
}

/// A patterned payload that makes block-level mixups visible.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
