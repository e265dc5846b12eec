//! Phase orchestration: plan & serialize, dry run, commit.
//!
//! Phase 1 writes only into free clusters (relocated payloads and archive
//! pages); the volume still mounts as FAT32 afterwards. Phase 2 replays
//! the entire build against a cloned allocator and a discarding writer,
//! so any fatal condition surfaces while the volume is still intact.
//! Phase 3 repeats the identical build against the live image; its first
//! destructive write commits the conversion, and every error after that
//! point is reported as [`f2e_error::FailureClass::Corrupted`].

use crate::serialize::FatTreeSerializer;
use f2e_alloc::{BlockedSet, ClusterBitmap, ExtentAllocator};
use f2e_archive::{ArchiveReader, ArchiveWriter, PageStore};
use f2e_error::{ConvertError, Result};
use f2e_fat::FatVolume;
use f2e_image::{ByteImage, NullWriter};
use f2e_layout::Plan;
use f2e_ext4::{BuildOptions, Ext4Builder};
use serde::Serialize;
use tracing::{debug, info};

/// Caller-provided inputs for one conversion.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// Owner for every inode in the new filesystem.
    pub uid: u32,
    pub gid: u32,
    /// Timestamp used for `s_mkfs_time` and the reserved inodes.
    pub now: u32,
    /// Volume UUID for the superblock.
    pub uuid: [u8; 16],
    /// Stop after the dry run, leaving the volume FAT32.
    pub dry_run_only: bool,
}

impl ConvertOptions {
    /// Options with a fresh random UUID and the current time.
    #[must_use]
    pub fn with_owner(uid: u32, gid: u32) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
            .min(u64::from(u32::MAX)) as u32;
        Self {
            uid,
            gid,
            now,
            uuid: *uuid::Uuid::new_v4().as_bytes(),
            dry_run_only: false,
        }
    }
}

/// What a completed (or dry-run) conversion did.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub directories: u64,
    pub regular_files: u64,
    pub relocated_clusters: u64,
    pub archive_pages: u32,
    pub block_groups: u32,
    pub inodes_used: u32,
    pub dropped_tail_blocks: u64,
    pub committed: bool,
}

/// Run a full conversion over `image`.
pub fn convert(image: &mut dyn ByteImage, opts: &ConvertOptions) -> Result<ConversionSummary> {
    // ── Phase 1: plan & serialize ───────────────────────────────────────
    let volume = FatVolume::open(&*image)?;
    let geometry = volume.geometry().clone();
    let plan = Plan::new(&geometry, opts.uuid, opts.now)?;

    let bitmap = ClusterBitmap::from_fat(volume.fat(), geometry.cluster_count);
    let blocked = BlockedSet::new(plan.blocked_extents(&geometry));
    let mut alloc = ExtentAllocator::new(bitmap, blocked);

    let store = PageStore {
        data_start_byte: geometry.data_start_byte,
        cluster_size: geometry.cluster_size,
    };
    let mut archiver = ArchiveWriter::new(store);
    let serialize_stats =
        FatTreeSerializer::new(&volume).serialize_tree(image, &mut alloc, &mut archiver)?;
    let archive = archiver.finish(image, &mut alloc)?;
    info!(
        target: "f2e::convert",
        directories = serialize_stats.directories,
        files = serialize_stats.regular_files,
        relocated_clusters = serialize_stats.relocated_clusters,
        archive_pages = archive.pages,
        "phase 1 complete, tree serialized into free space"
    );

    let build_opts = BuildOptions {
        uid: opts.uid,
        gid: opts.gid,
        now: opts.now,
    };

    // ── Phase 2: dry run ────────────────────────────────────────────────
    let dry_stats = {
        let mut shadow = NullWriter::new(&*image);
        let mut scratch_alloc = alloc.clone();
        let mut reader = ArchiveReader::new(&*image, &archive)?;
        Ext4Builder::new(&plan, &geometry, build_opts).build(
            &mut shadow,
            &mut scratch_alloc,
            &mut reader,
        )?
    };
    debug!(
        target: "f2e::convert",
        inodes = dry_stats.inodes_used,
        allocated_blocks = dry_stats.allocated_blocks.len(),
        "dry run clean"
    );

    if opts.dry_run_only {
        return Ok(ConversionSummary {
            directories: dry_stats.directories,
            regular_files: dry_stats.regular_files,
            relocated_clusters: serialize_stats.relocated_clusters,
            archive_pages: archive.pages,
            block_groups: plan.group_count,
            inodes_used: dry_stats.inodes_used,
            dropped_tail_blocks: plan.dropped_tail_blocks,
            committed: false,
        });
    }

    // ── Phase 3: commit ─────────────────────────────────────────────────
    let commit_stats = {
        let mut reader = ArchiveReader::new(&*image, &archive)?;
        Ext4Builder::new(&plan, &geometry, build_opts)
            .build(image, &mut alloc, &mut reader)
            .map_err(ConvertError::into_after_commit)?
    };
    // The dry run's guarantees hold only if the commit replayed the same
    // allocation sequence.
    if dry_stats.allocated_blocks != commit_stats.allocated_blocks {
        return Err(ConvertError::CommitDiverged);
    }
    image.sync().map_err(ConvertError::into_after_commit)?;

    info!(target: "f2e::convert", "commit complete, volume is now ext4");
    Ok(ConversionSummary {
        directories: commit_stats.directories,
        regular_files: commit_stats.regular_files,
        relocated_clusters: serialize_stats.relocated_clusters,
        archive_pages: archive.pages,
        block_groups: plan.group_count,
        inodes_used: commit_stats.inodes_used,
        dropped_tail_blocks: plan.dropped_tail_blocks,
        committed: true,
    })
}
