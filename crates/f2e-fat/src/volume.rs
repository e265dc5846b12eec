use crate::boot::{Geometry, BOOT_SECTOR_LEN};
use crate::dentry::DirEntries;
use f2e_error::{ConvertError, Result};
use f2e_image::ByteImage;
use f2e_types::{ClusterNo, FAT_END_OF_CHAIN, FAT_ENTRY_MASK, FAT_FREE, FIRST_DATA_CLUSTER};
use tracing::debug;

/// An opened FAT32 volume: validated geometry plus an in-memory copy of the
/// first FAT.
///
/// The FAT copy is read once at open time; during conversion the on-disk
/// FAT is never modified (phase 3 overwrites it wholesale), so the copy
/// stays authoritative for the whole run.
pub struct FatVolume {
    geometry: Geometry,
    fat: Vec<u32>,
}

impl FatVolume {
    /// Read the boot sector and FAT from `image`.
    pub fn open(image: &dyn ByteImage) -> Result<Self> {
        let mut sector = [0_u8; BOOT_SECTOR_LEN];
        image.read_exact_at(0, &mut sector)?;
        let geometry = Geometry::parse(&sector, image.len_bytes())?;

        let entry_count = geometry.cluster_count as usize;
        let mut raw = vec![0_u8; entry_count * 4];
        image.read_exact_at(geometry.fat_start_byte, &mut raw)?;
        let fat = raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        debug!(target: "f2e::fat", entries = entry_count, "loaded FAT");
        Ok(Self { geometry, fat })
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The raw (unmasked) FAT entries, one per cluster.
    #[must_use]
    pub fn fat(&self) -> &[u32] {
        &self.fat
    }

    /// Masked FAT entry for `cluster`.
    #[must_use]
    pub fn entry(&self, cluster: ClusterNo) -> u32 {
        self.fat[cluster.0 as usize] & FAT_ENTRY_MASK
    }

    /// Whether the FAT marks `cluster` as free.
    #[must_use]
    pub fn is_free(&self, cluster: ClusterNo) -> bool {
        self.entry(cluster) == FAT_FREE
    }

    /// Iterate the cluster chain starting at `first`.
    ///
    /// A `first` of zero yields nothing (zero-length file). The iterator
    /// fails on out-of-range links and on chains longer than the cluster
    /// count (a cycle).
    #[must_use]
    pub fn chain(&self, first: ClusterNo) -> ChainIter<'_> {
        ChainIter {
            volume: self,
            next: if first.is_data() { Some(first) } else { None },
            remaining: self.geometry.cluster_count,
        }
    }

    /// Read one cluster's payload into `buf` (`buf.len()` == cluster size).
    pub fn read_cluster(
        &self,
        image: &dyn ByteImage,
        cluster: ClusterNo,
        buf: &mut [u8],
    ) -> Result<()> {
        debug_assert_eq!(buf.len(), self.geometry.cluster_size as usize);
        image.read_exact_at(self.geometry.cluster_offset(cluster), buf)
    }

    /// Load an entire cluster chain into memory (used for directories).
    pub fn read_chain(&self, image: &dyn ByteImage, first: ClusterNo) -> Result<Vec<u8>> {
        let cluster_size = self.geometry.cluster_size as usize;
        let mut data = Vec::new();
        for cluster in self.chain(first) {
            let cluster = cluster?;
            let start = data.len();
            data.resize(start + cluster_size, 0);
            self.read_cluster(image, cluster, &mut data[start..])?;
        }
        Ok(data)
    }

    /// Iterate the children of the directory whose chain starts at `first`.
    pub fn dir_entries<'a>(&self, data: &'a [u8], first: ClusterNo) -> DirEntries<'a> {
        DirEntries::new(data, first)
    }

    /// Count the children of a directory without decoding names.
    pub fn count_children(&self, data: &[u8], first: ClusterNo) -> Result<u32> {
        let mut count: u32 = 0;
        for file in self.dir_entries(data, first) {
            file?;
            count += 1;
        }
        Ok(count)
    }
}

/// Iterator over a FAT cluster chain.
pub struct ChainIter<'a> {
    volume: &'a FatVolume,
    next: Option<ClusterNo>,
    remaining: u32,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<ClusterNo>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if current.0 >= self.volume.geometry.cluster_count {
            self.next = None;
            return Some(Err(ConvertError::BadDirectory {
                cluster: current.0,
                detail: "cluster chain links past the end of the volume".into(),
            }));
        }
        if self.remaining == 0 {
            self.next = None;
            return Some(Err(ConvertError::BadDirectory {
                cluster: current.0,
                detail: "cluster chain longer than the volume (cycle)".into(),
            }));
        }
        self.remaining -= 1;

        let entry = self.volume.entry(current);
        if entry >= FAT_END_OF_CHAIN {
            self.next = None;
        } else if entry < FIRST_DATA_CLUSTER {
            self.next = None;
            return Some(Err(ConvertError::BadDirectory {
                cluster: current.0,
                detail: format!("cluster chain links to reserved entry {entry:#x}"),
            }));
        } else {
            self.next = Some(ClusterNo(entry));
        }
        Some(Ok(current))
    }
}
