//! Depth-first FAT tree serialization with in-flight relocation.
//!
//! For every node the serializer aggregates the FAT cluster chain into
//! extents, splits them around the ranges reserved for ext4 metadata,
//! copies the payload of reserved ranges into freshly allocated clusters,
//! and appends the node's records to the archive stream. Directory
//! payloads go through the same path so their (possibly relocated)
//! clusters can later back the ext4 directory blocks.

use f2e_alloc::ExtentAllocator;
use f2e_archive::{ArchiveWriter, DentryRecord, DirMeta, NameUnit};
use f2e_error::{ConvertError, Result};
use f2e_fat::{fat_time_to_unix, FatFile, FatVolume};
use f2e_image::ByteImage;
use f2e_types::{ClusterNo, FatExtent, EXT4_MAX_EXTENT_LEN};
use tracing::{debug, trace};

/// Counters from the serialization phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerializeStats {
    pub directories: u64,
    pub regular_files: u64,
    pub relocated_clusters: u64,
}

/// Serializes the FAT directory tree into the archive stream.
pub struct FatTreeSerializer<'a> {
    volume: &'a FatVolume,
    stats: SerializeStats,
}

impl<'a> FatTreeSerializer<'a> {
    #[must_use]
    pub fn new(volume: &'a FatVolume) -> Self {
        Self {
            volume,
            stats: SerializeStats::default(),
        }
    }

    /// Walk the whole tree, starting at the root directory.
    ///
    /// Stream grammar, depth-first:
    /// `root := Extents DirMeta child*`,
    /// `child := Dentry Name Extents DirMeta child*` (children only for
    /// directories; files carry the regular-file marker instead).
    pub fn serialize_tree(
        mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        archiver: &mut ArchiveWriter,
    ) -> Result<SerializeStats> {
        let root_cluster = self.volume.geometry().root_cluster;
        let dir_data = self.volume.read_chain(image, root_cluster)?;
        let child_count = self.volume.count_children(&dir_data, root_cluster)?;

        let extents = self.relocated_extents(image, alloc, root_cluster, true)?;
        archiver.append_group(image, alloc, &extents)?;
        archiver.append_group(image, alloc, &[DirMeta(child_count)])?;

        for file in self.volume.dir_entries(&dir_data, root_cluster) {
            self.serialize_node(image, alloc, archiver, &file?)?;
        }
        debug!(
            target: "f2e::serialize",
            directories = self.stats.directories,
            files = self.stats.regular_files,
            relocated = self.stats.relocated_clusters,
            "tree serialized"
        );
        Ok(self.stats)
    }

    fn serialize_node(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        archiver: &mut ArchiveWriter,
        file: &FatFile,
    ) -> Result<()> {
        let entry = &file.entry;
        let record = DentryRecord {
            file_size: entry.file_size,
            access_time: fat_time_to_unix(entry.access_date, 0),
            modify_time: fat_time_to_unix(entry.modify_date, entry.modify_time),
            create_time: fat_time_to_unix(entry.create_date, entry.create_time),
            is_dir: entry.is_dir(),
            is_read_only: entry.is_read_only(),
        };
        let name_units: Vec<NameUnit> = file.name_units.iter().map(|&u| NameUnit(u)).collect();
        let first = entry.first_cluster();

        if entry.is_dir() {
            let dir_data = self.volume.read_chain(image, first)?;
            let child_count = self.volume.count_children(&dir_data, first)?;
            let extents = self.relocated_extents(image, alloc, first, true)?;

            archiver.append_group(image, alloc, &[record])?;
            archiver.append_group(image, alloc, &name_units)?;
            archiver.append_group(image, alloc, &extents)?;
            archiver.append_group(image, alloc, &[DirMeta(child_count)])?;
            self.stats.directories += 1;

            for child in self.volume.dir_entries(&dir_data, first) {
                self.serialize_node(image, alloc, archiver, &child?)?;
            }
        } else {
            let extents = self.relocated_extents(image, alloc, first, false)?;
            archiver.append_group(image, alloc, &[record])?;
            archiver.append_group(image, alloc, &name_units)?;
            archiver.append_group(image, alloc, &extents)?;
            archiver.append_group(image, alloc, &[DirMeta::REGULAR_FILE])?;
            self.stats.regular_files += 1;
        }
        Ok(())
    }

    /// Aggregate a cluster chain into extents and split each around the
    /// blocked ranges, resettling the covered fragments.
    fn relocated_extents(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        first: ClusterNo,
        is_dir: bool,
    ) -> Result<Vec<FatExtent>> {
        let mut out = Vec::new();
        let mut current: Option<FatExtent> = None;
        let mut logical: u32 = 0;

        for cluster in self.volume.chain(first) {
            let cluster = cluster?;
            let extends = current.map_or(false, |extent| {
                cluster.0 == extent.physical_end() && extent.len < EXT4_MAX_EXTENT_LEN
            });
            if extends {
                let extent = current.as_mut().expect("checked above");
                extent.len += 1;
            } else if let Some(extent) = current.take() {
                logical += u32::from(extent.len);
                self.split_around_blocked(image, alloc, extent, &mut out)?;
                current = Some(FatExtent::new(logical, 1, cluster));
            } else {
                current = Some(FatExtent::new(0, 1, cluster));
            }
        }
        if let Some(extent) = current {
            self.split_around_blocked(image, alloc, extent, &mut out)?;
        }
        if is_dir && out.is_empty() {
            return Err(ConvertError::BadDirectory {
                cluster: first.0,
                detail: "directory has no data clusters".into(),
            });
        }
        Ok(out)
    }

    /// Intersect one aggregated extent with the blocked set; fragments
    /// inside blocked ranges are resettled, the rest pass through.
    fn split_around_blocked(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        extent: FatExtent,
        out: &mut Vec<FatExtent>,
    ) -> Result<()> {
        let end = extent.physical_end();
        let blocked: Vec<FatExtent> = alloc
            .blocked()
            .intersecting(extent.physical_start.0, end)
            .copied()
            .collect();

        let logical_at = |physical: u32| extent.logical_start + (physical - extent.physical_start.0);
        let mut pos = extent.physical_start.0;
        let mut blocked_iter = blocked.iter().peekable();
        while pos < end {
            match blocked_iter.peek() {
                Some(range) if range.physical_start.0 <= pos => {
                    let fragment_end = end.min(range.physical_end());
                    self.resettle(image, alloc, logical_at(pos), pos, fragment_end, out)?;
                    blocked_iter.next();
                    pos = fragment_end;
                }
                Some(range) => {
                    let fragment_end = end.min(range.physical_start.0);
                    out.push(FatExtent::new(
                        logical_at(pos),
                        (fragment_end - pos) as u16,
                        ClusterNo(pos),
                    ));
                    pos = fragment_end;
                }
                None => {
                    out.push(FatExtent::new(
                        logical_at(pos),
                        (end - pos) as u16,
                        ClusterNo(pos),
                    ));
                    pos = end;
                }
            }
        }
        Ok(())
    }

    /// Copy the clusters `src..src_end` into freshly allocated extents,
    /// repeating while the allocator returns short runs.
    fn resettle(
        &mut self,
        image: &mut dyn ByteImage,
        alloc: &mut ExtentAllocator,
        mut logical: u32,
        mut src: u32,
        src_end: u32,
        out: &mut Vec<FatExtent>,
    ) -> Result<()> {
        let cluster_size = self.volume.geometry().cluster_size as usize;
        let mut buf = vec![0_u8; cluster_size];

        while src < src_end {
            let remaining = (src_end - src).min(u32::from(EXT4_MAX_EXTENT_LEN)) as u16;
            let mut dest = alloc.allocate(remaining)?;
            dest.logical_start = logical;

            for step in 0..u32::from(dest.len) {
                let from = self.volume.geometry().cluster_offset(ClusterNo(src + step));
                let to = self
                    .volume
                    .geometry()
                    .cluster_offset(ClusterNo(dest.physical_start.0 + step));
                image.read_exact_at(from, &mut buf)?;
                image.write_all_at(to, &buf)?;
            }
            trace!(
                target: "f2e::serialize",
                from = src,
                to = dest.physical_start.0,
                len = dest.len,
                "resettled clusters"
            );
            self.stats.relocated_clusters += u64::from(dest.len);
            out.push(dest);
            src += u32::from(dest.len);
            logical += u32::from(dest.len);
        }
        Ok(())
    }
}
